use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{
    config::{DEFAULT_COLLECTION, Overrides},
    search::QueryMode,
};

#[derive(Debug, Parser)]
#[command(
    name = "ragsync",
    about = "Local retrieval-augmented search over your documents"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Ollama server URL
    #[arg(long, global = true)]
    pub ollama_url: Option<String>,

    /// Embedding model served by Ollama
    #[arg(long, global = true)]
    pub embed_model: Option<String>,

    /// Model used to score relevance when reranking
    #[arg(long, global = true)]
    pub rerank_model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Command-line values that take precedence over stored settings.
    pub fn overrides(&self) -> Overrides {
        let (chunk_size, overlap) = match &self.command {
            Command::Add(args) => (args.chunk_size, args.overlap),
            _ => (None, None),
        };
        Overrides {
            chunk_size,
            overlap,
            ollama_url: self.ollama_url.clone(),
            embed_model: self.embed_model.clone(),
            rerank_model: self.rerank_model.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index files or directories into a collection
    Add(AddArgs),
    /// Remove a document from a collection
    Remove(RemoveArgs),
    /// Search a collection
    Search(SearchArgs),
    /// List collections and their sizes
    Collections(JsonArgs),
    /// Show index statistics and the effective configuration
    Stats(StatsArgs),
    /// List models available on the Ollama server
    Models(JsonArgs),
    /// Manage persistent settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Add --

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// Files or directories to index (.md and .txt inside directories)
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Target collection
    #[arg(short = 'c', long, default_value = DEFAULT_COLLECTION)]
    pub collection: String,

    /// Lines per chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Lines shared by consecutive chunks
    #[arg(long)]
    pub overlap: Option<usize>,

    /// Glob patterns to skip (matched against relative paths and names)
    #[arg(long)]
    pub exclude: Vec<String>,
}

// -- Remove --

#[derive(Debug, Parser)]
pub struct RemoveArgs {
    /// Source path of the document to remove
    #[arg(long, required_unless_present = "id", conflicts_with = "id")]
    pub source: Option<String>,

    /// Document or chunk id to remove
    #[arg(long)]
    pub id: Option<String>,

    /// Collection to remove from
    #[arg(short = 'c', long, default_value = DEFAULT_COLLECTION)]
    pub collection: String,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Minimum similarity threshold
    #[arg(long, allow_negative_numbers = true)]
    pub min_score: Option<f64>,

    /// Collection to search
    #[arg(short = 'c', long, default_value = DEFAULT_COLLECTION)]
    pub collection: String,

    /// Which entries to match against
    #[arg(long, value_enum, default_value_t = QueryMode::Chunks)]
    pub mode: QueryMode,

    /// Group results by source document
    #[arg(long)]
    pub aggregate: bool,

    /// Rescore candidates with the relevance model
    #[arg(long)]
    pub rerank: bool,

    /// Candidates scored when reranking
    #[arg(long, requires = "rerank")]
    pub rerank_top_k: Option<usize>,

    /// Candidates grouped when aggregating
    #[arg(long, requires = "aggregate")]
    pub overfetch: Option<usize>,

    /// Stop reranking after this many seconds
    #[arg(long, requires = "rerank")]
    pub timeout_secs: Option<u64>,

    /// Restrict matches by metadata (key=value, key!=value, key>=n, key<=n)
    #[arg(long)]
    pub filter: Vec<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Stats --

#[derive(Debug, Parser)]
pub struct StatsArgs {
    /// Restrict to one collection
    #[arg(short = 'c', long)]
    pub collection: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Persist a setting (see `config list` for keys)
    Set { key: String, value: String },
    /// Print the effective value of a setting
    Get { key: String },
    /// Show every setting with its effective value
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a stored setting, reverting to the default
    Unset { key: String },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "ragsync",
            &mut std::io::stdout(),
        );
    }
}
