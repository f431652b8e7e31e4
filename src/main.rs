use std::{path::Path, time::Duration};

use clap::Parser;
use kdam::{BarExt, tqdm};
use ragsync::{
    CancelToken,
    Config,
    ConfigDb,
    DataDir,
    EmbeddingProvider,
    Error,
    Indexer,
    OllamaClient,
    QueryEngine,
    RedbIndex,
    Reranker,
    Result,
    VectorIndex,
    cli::{self, Cli, Command, ConfigAction},
    config,
    filter::Filter,
    search::{self, SearchOptions, SearchRequest},
    walker,
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("RAGSYNC_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    let overrides = cli.overrides();

    if let Command::Config { action } = &cli.command {
        return cmd_config(&config_db, &overrides, action);
    }

    let config = Config::resolve(Some(&config_db), &overrides)?;

    match &cli.command {
        Command::Add(args) => {
            cmd_add(&config_db, &data_dir, &config, args, cli.quiet)?;
        }
        Command::Remove(args) => {
            cmd_remove(&data_dir, &config, args)?;
        }
        Command::Search(args) => {
            cmd_search(&data_dir, &config, args)?;
        }
        Command::Collections(args) => {
            cmd_collections(&config_db, &data_dir, args.json)?;
        }
        Command::Stats(args) => {
            cmd_stats(&config_db, &data_dir, &config, args)?;
        }
        Command::Models(args) => {
            cmd_models(&config, args.json)?;
        }
        Command::Config { .. } | Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_add(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    config: &Config,
    args: &cli::AddArgs,
    quiet: bool,
) -> Result<()> {
    let excludes = walker::build_excludes(&args.exclude)?;
    let files = walker::collect_inputs(&args.paths, &excludes)?;
    if files.is_empty() {
        eprintln!("No documents found.");
        return Ok(());
    }

    config_db.ensure_collection(&args.collection)?;

    let client = OllamaClient::new(&config.ollama)?;
    let index = RedbIndex::open(&data_dir.vectors_db())?;
    let indexer = Indexer::new(&client, &index, &config.chunking);

    let mut bar = (!quiet).then(|| tqdm!(total = files.len(), desc = "Indexing"));
    let report = indexer.add_files(&args.collection, &files, |_| {
        if let Some(bar) = bar.as_mut() {
            let _ = bar.update(1);
        }
    });
    if bar.is_some() {
        eprintln!();
    }

    println!(
        "Added {} document(s), {} chunk(s) to '{}'",
        report.added, report.chunks, args.collection
    );
    for source in &report.skipped {
        println!("  skipped (empty): {source}");
    }
    for (source, err) in &report.failed {
        println!("  failed: {source}: {err}");
    }
    if !report.is_clean() {
        return Err(Error::BatchFailed {
            failed: report.failed.len(),
            total: files.len(),
        });
    }
    Ok(())
}

fn cmd_remove(
    data_dir: &DataDir,
    config: &Config,
    args: &cli::RemoveArgs,
) -> Result<()> {
    let client = OllamaClient::new(&config.ollama)?;
    let index = RedbIndex::open(&data_dir.vectors_db())?;
    let indexer = Indexer::new(&client, &index, &config.chunking);

    let (removed, name) = match (&args.source, &args.id) {
        (Some(source), _) => {
            // sources are stored as canonical paths
            let source = Path::new(source)
                .canonicalize()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|_| source.clone());
            (indexer.remove_source(&args.collection, &source)?, source)
        }
        (None, Some(id)) => (indexer.remove_id(&args.collection, id)?, id.clone()),
        (None, None) => {
            return Err(Error::Configuration(
                "remove needs --source or --id".into(),
            ));
        }
    };

    if removed == 0 {
        return Err(Error::NotFound {
            kind: "document",
            name,
        });
    }
    println!("Removed {removed} entr(ies) for {name}");
    Ok(())
}

fn cmd_search(
    data_dir: &DataDir,
    config: &Config,
    args: &cli::SearchArgs,
) -> Result<()> {
    let client = OllamaClient::new(&config.ollama)?;
    let index = RedbIndex::open(&data_dir.vectors_db())?;
    let engine = QueryEngine::new(&client, &index, &config.search);

    let reranker = if args.rerank {
        Some(Reranker::new(&client, &config.rerank)?)
    } else {
        None
    };

    let mut request = SearchRequest::new(args.query.as_str(), &config.search)
        .collection(args.collection.as_str());
    if let Some(count) = args.count {
        request = request.max_results(count);
    }
    if let Some(min_score) = args.min_score {
        request = request.min_score(min_score);
    }
    if !args.filter.is_empty() {
        request = request.filter(Filter::parse_pairs(&args.filter)?);
    }
    if let Some(secs) = args.timeout_secs {
        let timeout = Duration::from_secs(secs);
        request = request.cancel(CancelToken::with_timeout(timeout));
    }

    let options = SearchOptions {
        mode: args.mode,
        aggregate: args.aggregate,
        rerank_top_k: args.rerank_top_k,
        overfetch: args.overfetch,
    };

    let outcome =
        search::execute_search(&engine, reranker.as_ref(), &request, &options)?;

    if args.json {
        println!("{}", search::format_json(&outcome, &args.query, &options)?);
    } else {
        print!("{}", search::format_human(&outcome));
    }
    Ok(())
}

/// Logical collections and their entry counts.
fn collection_counts(
    config_db: &ConfigDb,
    index: &dyn VectorIndex,
) -> Result<Vec<(String, String, usize, usize)>> {
    let mut names: Vec<(String, String)> = config_db.list_collections()?;
    for namespace in index.collections()? {
        let logical = namespace
            .strip_suffix("_chunks")
            .or_else(|| namespace.strip_suffix("_documents"));
        if let Some(logical) = logical
            && !names.iter().any(|(n, _)| n == logical)
        {
            names.push((logical.to_string(), String::new()));
        }
    }
    names.sort();

    names
        .into_iter()
        .map(|(name, description)| {
            let documents =
                index.count(&search::documents_collection(&name))?;
            let chunks = index.count(&search::chunks_collection(&name))?;
            Ok((name, description, documents, chunks))
        })
        .collect()
}

fn cmd_collections(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    json: bool,
) -> Result<()> {
    let index = RedbIndex::open(&data_dir.vectors_db())?;
    let collections = collection_counts(config_db, &index)?;

    if json {
        let value: Vec<_> = collections
            .iter()
            .map(|(name, description, documents, chunks)| {
                serde_json::json!({
                    "name": name,
                    "description": description,
                    "documents": documents,
                    "chunks": chunks,
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(value));
    } else if collections.is_empty() {
        println!("No collections yet.");
    } else {
        for (name, description, documents, chunks) in &collections {
            println!("{name}\t{documents} document(s)\t{chunks} chunk(s)\t{description}");
        }
    }
    Ok(())
}

fn cmd_stats(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    config: &Config,
    args: &cli::StatsArgs,
) -> Result<()> {
    let index = RedbIndex::open(&data_dir.vectors_db())?;
    let mut collections = collection_counts(config_db, &index)?;
    if let Some(only) = &args.collection {
        collections.retain(|(name, ..)| name == only);
        if collections.is_empty() {
            return Err(Error::NotFound {
                kind: "collection",
                name: only.clone(),
            });
        }
    }
    let documents: usize = collections.iter().map(|c| c.2).sum();
    let chunks: usize = collections.iter().map(|c| c.3).sum();

    if args.json {
        let value = serde_json::json!({
            "dataDir": data_dir.root().display().to_string(),
            "ollamaUrl": config.ollama.base_url,
            "embedModel": config.ollama.embed_model,
            "rerankModel": config.ollama.rerank_model,
            "collections": collections.len(),
            "documents": documents,
            "chunks": chunks,
            "config": config,
        });
        println!("{value}");
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Ollama: {}", config.ollama.base_url);
        println!("Embedding model: {}", config.ollama.embed_model);
        println!("Rerank model: {}", config.ollama.rerank_model);
        println!(
            "Chunking: {} lines, {} overlap",
            config.chunking.chunk_size, config.chunking.overlap
        );
        println!("Collections: {}", collections.len());
        for (name, _, docs, chunks) in &collections {
            println!("  {name}: {docs} document(s), {chunks} chunk(s)");
        }
        println!("Documents: {documents}");
        println!("Chunks: {chunks}");
    }
    Ok(())
}

fn cmd_models(config: &Config, json: bool) -> Result<()> {
    let client = OllamaClient::new(&config.ollama)?;
    let models = client.list_models()?;

    if json {
        let value = serde_json::json!({
            "models": models,
            "count": models.len(),
        });
        println!("{value}");
    } else if models.is_empty() {
        println!("No models installed on {}.", client.base_url());
    } else {
        for model in &models {
            let marker = if is_model(&model.name, client.model_name()) {
                " (embedding)"
            } else if is_model(&model.name, client.rerank_model()) {
                " (rerank)"
            } else {
                ""
            };
            println!("{}{marker}", model.name);
        }
    }
    Ok(())
}

/// `llama3` names `llama3:latest` and any other tag of the same model.
fn is_model(installed: &str, configured: &str) -> bool {
    installed == configured
        || installed
            .strip_prefix(configured)
            .is_some_and(|tag| tag.starts_with(':'))
}

fn cmd_config(
    config_db: &ConfigDb,
    overrides: &config::Overrides,
    action: &ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            if !config::is_known_key(key) {
                return Err(Error::Configuration(format!(
                    "unknown setting '{key}'"
                )));
            }
            // reject values that would leave the stored settings invalid
            let mut candidate = Config::resolve(Some(config_db), &Default::default())?;
            candidate.apply(key, value)?;
            candidate.validate()?;

            config_db.set_setting(key, value.trim())?;
            println!("{key} = {}", value.trim());
        }
        ConfigAction::Get { key } => {
            let effective = Config::resolve(Some(config_db), overrides)?;
            let value = effective.get(key).ok_or_else(|| Error::NotFound {
                kind: "setting",
                name: key.clone(),
            })?;
            println!("{value}");
        }
        ConfigAction::List { json } => {
            let effective = Config::resolve(Some(config_db), overrides)?;
            let stored = config_db.list_settings()?;
            if *json {
                let entries: serde_json::Map<String, serde_json::Value> =
                    config::SETTING_KEYS
                        .iter()
                        .filter_map(|(key, _)| {
                            effective.get(key).map(|v| (key.to_string(), v.into()))
                        })
                        .collect();
                println!("{}", serde_json::Value::Object(entries));
            } else {
                for (key, description) in config::SETTING_KEYS {
                    let value = effective.get(key).unwrap_or_default();
                    let marker = if stored.iter().any(|(k, _)| k == key) {
                        "*"
                    } else {
                        " "
                    };
                    println!("{marker} {key:<28} {value:<24} {description}");
                }
            }
        }
        ConfigAction::Unset { key } => {
            if !config_db.remove_setting(key)? {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key.clone(),
                });
            }
            println!("Unset {key}");
        }
    }
    Ok(())
}
