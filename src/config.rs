//! Runtime configuration.
//!
//! A [`Config`] is resolved once per process from, lowest priority first:
//! built-in defaults, the `settings` table of the [`ConfigDb`], environment
//! variables and command-line [`Overrides`]. It is immutable afterwards and
//! passed around by reference.

use std::time::Duration;

use serde::Serialize;

use crate::{
    chunking::ChunkingConfig,
    config_db::ConfigDb,
    error::{Error, Result},
};

pub const OLLAMA_URL_ENV: &str = "RAGSYNC_OLLAMA_URL";
pub const EMBED_MODEL_ENV: &str = "RAGSYNC_EMBED_MODEL";
pub const RERANK_MODEL_ENV: &str = "RAGSYNC_RERANK_MODEL";

pub const DEFAULT_COLLECTION: &str = "default";

const WEIGHT_EPSILON: f64 = 1e-6;

/// Every key accepted by `config set`, with a short description.
pub const SETTING_KEYS: &[(&str, &str)] = &[
    ("chunking.chunk_size", "lines per chunk"),
    ("chunking.overlap", "lines shared by consecutive chunks"),
    ("chunking.max_chunks", "chunk cap per document"),
    ("search.max_results", "results returned by default"),
    ("search.min_score", "minimum similarity kept"),
    ("search.overfetch_multiplier", "candidate multiplier for aggregation"),
    ("search.group_cap", "chunks shown per aggregated document"),
    ("search.payload_chars", "characters of text returned per hit"),
    ("search.chunk_weight", "weight of chunk hits in combined mode"),
    ("search.document_weight", "weight of document hits in combined mode"),
    ("rerank.top_k_multiplier", "candidate multiplier for reranking"),
    ("rerank.concurrency", "parallel relevance scoring calls"),
    ("rerank.similarity_weight", "weight of vector similarity"),
    ("rerank.rerank_weight", "weight of relevance score"),
    ("rerank.timeout_secs", "reranking budget per query, 0 for none"),
    ("ollama.base_url", "Ollama server URL"),
    ("ollama.embed_model", "embedding model"),
    ("ollama.rerank_model", "relevance scoring model"),
    ("ollama.timeout_secs", "HTTP timeout per request"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchConfig {
    pub max_results: usize,
    pub min_score: f64,
    /// Candidates fetched per requested result when aggregating.
    pub overfetch_multiplier: usize,
    /// Chunks kept per aggregated group for display.
    pub group_cap: usize,
    /// Characters of hit text returned before truncation.
    pub payload_chars: usize,
    pub chunk_weight: f64,
    pub document_weight: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            min_score: 0.0,
            overfetch_multiplier: 3,
            group_cap: 5,
            payload_chars: 2000,
            chunk_weight: 0.6,
            document_weight: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RerankConfig {
    /// Candidates scored per requested result.
    pub top_k_multiplier: usize,
    /// Size of the scoring thread pool.
    pub concurrency: usize,
    pub similarity_weight: f64,
    pub rerank_weight: f64,
    /// Budget for the scoring stage. Unscored candidates keep their
    /// similarity once it runs out.
    pub timeout: Option<Duration>,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            top_k_multiplier: 3,
            concurrency: 4,
            similarity_weight: 0.3,
            rerank_weight: 0.7,
            timeout: None,
        }
    }
}

impl RerankConfig {
    /// Blend of similarity and relevance used to order reranked hits.
    pub fn combine(&self, similarity: f64, rerank_score: Option<f64>) -> f64 {
        match rerank_score {
            Some(score) => {
                self.similarity_weight * similarity + self.rerank_weight * score
            }
            None => similarity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OllamaConfig {
    pub base_url: String,
    pub embed_model: String,
    pub rerank_model: String,
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            rerank_model: "llama3".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Values given on the command line. They win over everything else.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub chunk_size: Option<usize>,
    pub overlap: Option<usize>,
    pub ollama_url: Option<String>,
    pub embed_model: Option<String>,
    pub rerank_model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub search: SearchConfig,
    pub rerank: RerankConfig,
    pub ollama: OllamaConfig,
}

impl Config {
    /// Build the effective configuration and validate it.
    pub fn resolve(db: Option<&ConfigDb>, overrides: &Overrides) -> Result<Self> {
        let mut config = Config::default();

        if let Some(db) = db {
            for (key, value) in db.list_settings()? {
                if is_known_key(&key) {
                    config.apply(&key, &value)?;
                } else {
                    tracing::warn!(%key, "ignoring unknown setting");
                }
            }
        }

        for (var, key) in [
            (OLLAMA_URL_ENV, "ollama.base_url"),
            (EMBED_MODEL_ENV, "ollama.embed_model"),
            (RERANK_MODEL_ENV, "ollama.rerank_model"),
        ] {
            if let Ok(value) = std::env::var(var)
                && !value.is_empty()
            {
                config.apply(key, &value)?;
            }
        }

        if let Some(size) = overrides.chunk_size {
            config.chunking.chunk_size = size;
        }
        if let Some(overlap) = overrides.overlap {
            config.chunking.overlap = overlap;
        }
        if let Some(url) = &overrides.ollama_url {
            config.ollama.base_url = url.clone();
        }
        if let Some(model) = &overrides.embed_model {
            config.ollama.embed_model = model.clone();
        }
        if let Some(model) = &overrides.rerank_model {
            config.ollama.rerank_model = model.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Set one dotted key from its string form.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "chunking.chunk_size" => {
                self.chunking.chunk_size = parse(key, value)?
            }
            "chunking.overlap" => self.chunking.overlap = parse(key, value)?,
            "chunking.max_chunks" => {
                self.chunking.max_chunks = parse(key, value)?
            }
            "search.max_results" => {
                self.search.max_results = parse(key, value)?
            }
            "search.min_score" => self.search.min_score = parse(key, value)?,
            "search.overfetch_multiplier" => {
                self.search.overfetch_multiplier = parse(key, value)?
            }
            "search.group_cap" => self.search.group_cap = parse(key, value)?,
            "search.payload_chars" => {
                self.search.payload_chars = parse(key, value)?
            }
            "search.chunk_weight" => {
                self.search.chunk_weight = parse(key, value)?
            }
            "search.document_weight" => {
                self.search.document_weight = parse(key, value)?
            }
            "rerank.top_k_multiplier" => {
                self.rerank.top_k_multiplier = parse(key, value)?
            }
            "rerank.concurrency" => {
                self.rerank.concurrency = parse(key, value)?
            }
            "rerank.similarity_weight" => {
                self.rerank.similarity_weight = parse(key, value)?
            }
            "rerank.rerank_weight" => {
                self.rerank.rerank_weight = parse(key, value)?
            }
            "rerank.timeout_secs" => {
                let secs: u64 = parse(key, value)?;
                self.rerank.timeout =
                    (secs > 0).then(|| Duration::from_secs(secs));
            }
            "ollama.base_url" => self.ollama.base_url = value.to_string(),
            "ollama.embed_model" => self.ollama.embed_model = value.to_string(),
            "ollama.rerank_model" => {
                self.ollama.rerank_model = value.to_string()
            }
            "ollama.timeout_secs" => {
                self.ollama.timeout = Duration::from_secs(parse(key, value)?)
            }
            _ => {
                return Err(Error::Configuration(format!(
                    "unknown setting '{key}'"
                )));
            }
        }
        Ok(())
    }

    /// Effective value of a dotted key, in the form `apply` accepts.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "chunking.chunk_size" => self.chunking.chunk_size.to_string(),
            "chunking.overlap" => self.chunking.overlap.to_string(),
            "chunking.max_chunks" => self.chunking.max_chunks.to_string(),
            "search.max_results" => self.search.max_results.to_string(),
            "search.min_score" => self.search.min_score.to_string(),
            "search.overfetch_multiplier" => {
                self.search.overfetch_multiplier.to_string()
            }
            "search.group_cap" => self.search.group_cap.to_string(),
            "search.payload_chars" => self.search.payload_chars.to_string(),
            "search.chunk_weight" => self.search.chunk_weight.to_string(),
            "search.document_weight" => self.search.document_weight.to_string(),
            "rerank.top_k_multiplier" => {
                self.rerank.top_k_multiplier.to_string()
            }
            "rerank.concurrency" => self.rerank.concurrency.to_string(),
            "rerank.similarity_weight" => {
                self.rerank.similarity_weight.to_string()
            }
            "rerank.rerank_weight" => self.rerank.rerank_weight.to_string(),
            "rerank.timeout_secs" => self
                .rerank
                .timeout
                .map_or(0, |t| t.as_secs())
                .to_string(),
            "ollama.base_url" => self.ollama.base_url.clone(),
            "ollama.embed_model" => self.ollama.embed_model.clone(),
            "ollama.rerank_model" => self.ollama.rerank_model.clone(),
            "ollama.timeout_secs" => self.ollama.timeout.as_secs().to_string(),
            _ => return None,
        };
        Some(value)
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate().map_err(|e| match e {
            Error::InvalidChunkParameters { .. } => {
                Error::Configuration(e.to_string())
            }
            other => other,
        })?;

        let search = &self.search;
        require(search.max_results > 0, "search.max_results must be at least 1")?;
        require(
            (-1.0..=1.0).contains(&search.min_score),
            "search.min_score must be between -1 and 1",
        )?;
        require(
            search.overfetch_multiplier > 0,
            "search.overfetch_multiplier must be at least 1",
        )?;
        require(search.group_cap > 0, "search.group_cap must be at least 1")?;
        require(
            search.payload_chars > 0,
            "search.payload_chars must be at least 1",
        )?;
        check_weights(
            "search.chunk_weight",
            search.chunk_weight,
            "search.document_weight",
            search.document_weight,
        )?;

        let rerank = &self.rerank;
        require(
            rerank.top_k_multiplier > 0,
            "rerank.top_k_multiplier must be at least 1",
        )?;
        require(rerank.concurrency > 0, "rerank.concurrency must be at least 1")?;
        check_weights(
            "rerank.similarity_weight",
            rerank.similarity_weight,
            "rerank.rerank_weight",
            rerank.rerank_weight,
        )?;

        let ollama = &self.ollama;
        require(
            ollama.base_url.starts_with("http://")
                || ollama.base_url.starts_with("https://"),
            "ollama.base_url must start with http:// or https://",
        )?;
        require(
            !ollama.embed_model.is_empty(),
            "ollama.embed_model must not be empty",
        )?;
        require(
            !ollama.rerank_model.is_empty(),
            "ollama.rerank_model must not be empty",
        )?;
        require(
            !ollama.timeout.is_zero(),
            "ollama.timeout_secs must be at least 1",
        )?;
        Ok(())
    }
}

pub fn is_known_key(key: &str) -> bool {
    SETTING_KEYS.iter().any(|(k, _)| *k == key)
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        Error::Configuration(format!("invalid value '{value}' for {key}"))
    })
}

fn require(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::Configuration(message.to_string()))
    }
}

fn check_weights(a_key: &str, a: f64, b_key: &str, b: f64) -> Result<()> {
    require(
        (0.0..=1.0).contains(&a) && (0.0..=1.0).contains(&b),
        &format!("{a_key} and {b_key} must be between 0 and 1"),
    )?;
    require(
        (a + b - 1.0).abs() <= WEIGHT_EPSILON,
        &format!("{a_key} and {b_key} must sum to 1"),
    )
}
