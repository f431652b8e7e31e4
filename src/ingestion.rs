//! The write path: chunk, embed and store documents.
//!
//! Every document is stored twice, once as a whole in the `{collection}_documents`
//! namespace and once per chunk in `{collection}_chunks`. Adding a document
//! whose `(collection, source)` already exists replaces all of its entries.

use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::{
    chunking::{self, ChunkingConfig, TextChunk},
    doc_id::DocumentId,
    error::{Error, Result},
    filter::Filter,
    metadata::{self, MetaValue, Metadata},
    provider::EmbeddingProvider,
    search::{chunks_collection, documents_collection},
    vector_index::{IndexRecord, VectorIndex},
    walker::DiscoveredFile,
};

/// A document to be indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Where the text came from, usually an absolute file path.
    pub source: String,
    pub collection: String,
    pub text: String,
}

impl Document {
    pub fn new(
        source: impl Into<String>,
        collection: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            collection: collection.into(),
            text: text.into(),
        }
    }
}

/// What was stored for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    pub id: DocumentId,
    /// Chunk entries written.
    pub chunks: usize,
    /// Whitespace-only chunks that were not stored.
    pub blank_chunks: usize,
}

/// Result of a batch add. One document's failure never stops the others.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub added: usize,
    pub chunks: usize,
    /// Sources rejected as empty.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

impl BatchReport {
    pub fn record(&mut self, source: &str, result: Result<AddOutcome>) {
        match result {
            Ok(outcome) => {
                self.added += 1;
                self.chunks += outcome.chunks;
            }
            Err(Error::EmptyInput(_)) => {
                warn!(source, "skipping empty document");
                self.skipped.push(source.to_string());
            }
            Err(err) => {
                warn!(source, error = %err, "failed to add document");
                self.failed.push((source.to_string(), err));
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Indexer<'a> {
    embedder: &'a dyn EmbeddingProvider,
    index: &'a dyn VectorIndex,
    chunking: &'a ChunkingConfig,
}

impl<'a> Indexer<'a> {
    pub fn new(
        embedder: &'a dyn EmbeddingProvider,
        index: &'a dyn VectorIndex,
        chunking: &'a ChunkingConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            chunking,
        }
    }

    /// Chunk, embed and store a document, replacing any previous version.
    ///
    /// All embeddings are computed before anything is written, so a
    /// provider failure leaves the index untouched.
    pub fn add_document(&self, doc: &Document) -> Result<AddOutcome> {
        if doc.text.trim().is_empty() {
            return Err(Error::EmptyInput(format!(
                "document '{}' has no text",
                doc.source
            )));
        }

        let chunks = chunking::chunk_document(&doc.text, self.chunking)?;
        let total_chunks = chunks.len();
        let id = DocumentId::new(&doc.collection, &doc.source);

        let document_vector = self.embedder.embed(&doc.text)?;

        let (kept, blank): (Vec<TextChunk>, Vec<TextChunk>) = chunks
            .into_iter()
            .partition(|chunk| !chunk.text.trim().is_empty());
        if !blank.is_empty() {
            debug!(
                source = %doc.source,
                count = blank.len(),
                "skipping whitespace-only chunks"
            );
        }

        let chunk_vectors = kept
            .par_iter()
            .map(|chunk| self.embedder.embed(&chunk.text))
            .collect::<Result<Vec<_>>>()?;

        let created_at = unix_now();
        let records: Vec<IndexRecord> = kept
            .into_iter()
            .zip(chunk_vectors)
            .map(|(chunk, vector)| IndexRecord {
                id: id.chunk_id(chunk.index),
                metadata: chunk_metadata(
                    doc,
                    &id,
                    &chunk,
                    total_chunks,
                    created_at,
                ),
                vector,
                text: chunk.text,
            })
            .collect();

        let documents = documents_collection(&doc.collection);
        let chunks_ns = chunks_collection(&doc.collection);
        let by_source = Filter::source(&doc.source);

        self.index.delete_ids(&documents, &[id.as_str().to_string()])?;
        self.index.delete_where(&documents, &by_source)?;
        self.index.upsert(
            &documents,
            id.as_str(),
            &document_vector,
            &doc.text,
            &document_metadata(doc, created_at),
        )?;

        let stale: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        self.index.delete_ids(&chunks_ns, &stale)?;
        self.index.delete_where(&chunks_ns, &by_source)?;
        self.index.upsert_batch(&chunks_ns, &records)?;

        info!(
            source = %doc.source,
            collection = %doc.collection,
            id = %id,
            chunks = records.len(),
            "added document"
        );

        Ok(AddOutcome {
            id,
            chunks: records.len(),
            blank_chunks: blank.len(),
        })
    }

    /// Remove every entry of the document stored under `source`.
    pub fn remove_source(&self, collection: &str, source: &str) -> Result<usize> {
        let filter = Filter::source(source);
        let removed = self
            .index
            .delete_where(&documents_collection(collection), &filter)?
            + self
                .index
                .delete_where(&chunks_collection(collection), &filter)?;
        info!(collection, source, removed, "removed document");
        Ok(removed)
    }

    /// Remove a document (and its chunks) by document id, or a single chunk
    /// by chunk id.
    pub fn remove_id(&self, collection: &str, id: &str) -> Result<usize> {
        let ids = [id.to_string()];
        let chunks_ns = chunks_collection(collection);
        let removed = self
            .index
            .delete_ids(&documents_collection(collection), &ids)?
            + self.index.delete_ids(&chunks_ns, &ids)?
            + self.index.delete_where(
                &chunks_ns,
                &Filter::new().eq(metadata::SOURCE_ID, id),
            )?;
        info!(collection, id, removed, "removed by id");
        Ok(removed)
    }

    /// Add documents one after another, reporting each through `progress`.
    pub fn add_batch(
        &self,
        docs: &[Document],
        mut progress: impl FnMut(&str),
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for doc in docs {
            report.record(&doc.source, self.add_document(doc));
            progress(&doc.source);
        }
        report
    }

    /// Read and add files. Unreadable files are recorded as failures.
    pub fn add_files(
        &self,
        collection: &str,
        files: &[DiscoveredFile],
        mut progress: impl FnMut(&str),
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for file in files {
            let source = file.absolute_path.to_string_lossy().to_string();
            let result = read_document(&file.absolute_path, &source, collection)
                .and_then(|doc| self.add_document(&doc));
            report.record(&source, result);
            progress(&source);
        }
        report
    }
}

impl std::fmt::Debug for Indexer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("chunking", &self.chunking)
            .finish_non_exhaustive()
    }
}

fn read_document(path: &Path, source: &str, collection: &str) -> Result<Document> {
    let text = std::fs::read_to_string(path)?;
    Ok(Document::new(source, collection, text))
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

fn document_metadata(doc: &Document, created_at: i64) -> Metadata {
    Metadata::from([
        (metadata::SOURCE.to_string(), MetaValue::from(doc.source.as_str())),
        (
            metadata::COLLECTION.to_string(),
            MetaValue::from(doc.collection.as_str()),
        ),
        (metadata::CREATED_AT.to_string(), MetaValue::Integer(created_at)),
        (
            metadata::LINE_COUNT.to_string(),
            MetaValue::from(chunking::count_lines(&doc.text)),
        ),
    ])
}

fn chunk_metadata(
    doc: &Document,
    id: &DocumentId,
    chunk: &TextChunk,
    total_chunks: usize,
    created_at: i64,
) -> Metadata {
    Metadata::from([
        (metadata::SOURCE.to_string(), MetaValue::from(doc.source.as_str())),
        (
            metadata::COLLECTION.to_string(),
            MetaValue::from(doc.collection.as_str()),
        ),
        (metadata::SOURCE_ID.to_string(), MetaValue::from(id.as_str())),
        (metadata::CHUNK_ID.to_string(), MetaValue::from(chunk.index)),
        (metadata::TOTAL_CHUNKS.to_string(), MetaValue::from(total_chunks)),
        (metadata::START_LINE.to_string(), MetaValue::from(chunk.start_line)),
        (metadata::END_LINE.to_string(), MetaValue::from(chunk.end_line)),
        (metadata::LINE_RANGE.to_string(), MetaValue::from(chunk.line_range())),
        (metadata::CREATED_AT.to_string(), MetaValue::Integer(created_at)),
    ])
}
