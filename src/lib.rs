//! ragsync - local retrieval-augmented search over a personal document corpus.
//!
//! Documents are split into overlapping line-based chunks, embedded through a
//! local [Ollama](https://ollama.com) server and stored in an exact cosine
//! index backed by [redb](https://github.com/cberner/redb). Queries can be
//! aggregated per source document and reranked by a second relevance model.
//!
//! # Quick start
//!
//! ```no_run
//! use ragsync::{Config, ConfigDb, DataDir, Indexer, OllamaClient, QueryEngine, RedbIndex};
//! use ragsync::ingestion::Document;
//! use ragsync::search::SearchRequest;
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();
//! let config = Config::resolve(Some(&config_db), &Default::default()).unwrap();
//!
//! let client = OllamaClient::new(&config.ollama).unwrap();
//! let index = RedbIndex::open(&data_dir.vectors_db()).unwrap();
//!
//! let indexer = Indexer::new(&client, &index, &config.chunking);
//! indexer
//!     .add_document(&Document::new("/notes/rust.md", "notes", "Ownership rules..."))
//!     .unwrap();
//!
//! let engine = QueryEngine::new(&client, &index, &config.search);
//! let request = SearchRequest::new("who owns a value?", &config.search).collection("notes");
//! for hit in engine.search_chunks(&request).unwrap() {
//!     println!("{} lines {} ({:.3})", hit.source, hit.metadata.line_range, hit.similarity);
//! }
//! ```

pub mod aggregate;
pub mod cancel;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod config_db;
pub mod data_dir;
pub mod doc_id;
pub mod error;
pub mod filter;
pub mod ingestion;
pub mod metadata;
pub mod ollama;
pub mod provider;
pub mod reranker;
pub mod search;
pub mod text_util;
pub mod vector_db;
pub mod vector_index;
pub mod walker;

pub use cancel::CancelToken;
pub use config::Config;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use error::{Error, Result};
pub use ingestion::Indexer;
pub use ollama::OllamaClient;
pub use provider::{EmbeddingProvider, RelevanceScorer};
pub use reranker::Reranker;
pub use search::QueryEngine;
pub use vector_db::RedbIndex;
pub use vector_index::VectorIndex;
