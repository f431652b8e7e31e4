//! Line-based chunking of documents into overlapping windows.
//!
//! A document is split on `\n` into lines and covered by windows of
//! `chunk_size` lines, each window starting `chunk_size - overlap` lines after
//! the previous one. Line numbers are 1-based and inclusive. The last window
//! is clipped to the end of the document and may be shorter than the others.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of lines per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// Default number of lines shared by consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 2;

/// Upper bound on chunks produced for a single document.
pub const DEFAULT_MAX_CHUNKS: usize = 300;

/// Chunking settings, resolved once at startup.
///
/// # Examples
///
/// ```
/// use ragsync::chunking::ChunkingConfig;
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.chunk_size, 20);
/// assert_eq!(config.overlap, 2);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Lines per chunk.
    pub chunk_size: usize,
    /// Lines shared between consecutive chunks.
    pub overlap: usize,
    /// Maximum chunks per document before the chunk size is raised.
    pub max_chunks: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            max_chunks: DEFAULT_MAX_CHUNKS,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        validate_params(self.chunk_size, self.overlap)?;
        if self.max_chunks == 0 {
            return Err(Error::Configuration(
                "max_chunks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A window of consecutive lines from a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Zero-based position of the chunk within the document.
    pub index: usize,
    /// First line of the chunk (1-based, inclusive).
    pub start_line: usize,
    /// Last line of the chunk (1-based, inclusive).
    pub end_line: usize,
    /// The chunk's lines joined with `\n`.
    pub text: String,
}

impl TextChunk {
    /// The `"start-end"` label stored alongside the chunk.
    pub fn line_range(&self) -> String {
        format!("{}-{}", self.start_line, self.end_line)
    }

    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }
}

/// Reject parameters that would make the window never advance.
pub fn validate_params(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(Error::InvalidChunkParameters {
            chunk_size,
            overlap,
        });
    }
    Ok(())
}

/// Split text into lines.
///
/// A single trailing newline terminates the last line rather than starting
/// an empty one. Empty text is one empty line.
pub fn split_lines(text: &str) -> Vec<&str> {
    let body = text.strip_suffix('\n').unwrap_or(text);
    body.split('\n').collect()
}

/// Number of lines [`split_lines`] yields for `text`.
pub fn count_lines(text: &str) -> usize {
    split_lines(text).len()
}

/// Number of chunks produced for `total_lines` lines.
///
/// `1` when the document fits in a single window, otherwise
/// `ceil((total_lines - chunk_size) / (chunk_size - overlap)) + 1`.
///
/// # Examples
///
/// ```
/// use ragsync::chunking::expected_chunk_count;
///
/// assert_eq!(expected_chunk_count(25, 10, 2), 3);
/// assert_eq!(expected_chunk_count(10, 10, 2), 1);
/// ```
pub fn expected_chunk_count(
    total_lines: usize,
    chunk_size: usize,
    overlap: usize,
) -> usize {
    if total_lines <= chunk_size {
        return 1;
    }
    let step = chunk_size.saturating_sub(overlap).max(1);
    (total_lines - chunk_size).div_ceil(step) + 1
}

/// Split `text` into overlapping line windows.
///
/// Fails with [`Error::InvalidChunkParameters`] when `chunk_size` is zero or
/// `overlap >= chunk_size`; the parameters are never clamped.
///
/// # Examples
///
/// ```
/// use ragsync::chunking::chunk_lines;
///
/// let text = (1..=25).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
/// let chunks = chunk_lines(&text, 10, 2).unwrap();
/// let ranges: Vec<_> = chunks.iter().map(|c| (c.start_line, c.end_line)).collect();
/// assert_eq!(ranges, vec![(1, 10), (9, 18), (17, 25)]);
/// ```
pub fn chunk_lines(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<TextChunk>> {
    validate_params(chunk_size, overlap)?;

    let lines = split_lines(text);
    let total_lines = lines.len();

    if total_lines <= chunk_size {
        return Ok(vec![TextChunk {
            index: 0,
            start_line: 1,
            end_line: total_lines,
            text: lines.join("\n"),
        }]);
    }

    let step = (chunk_size - overlap).max(1);
    let mut chunks =
        Vec::with_capacity(expected_chunk_count(total_lines, chunk_size, overlap));
    let mut start = 0;

    loop {
        let end = (start + chunk_size).min(total_lines);
        chunks.push(TextChunk {
            index: chunks.len(),
            start_line: start + 1,
            end_line: end,
            text: lines[start..end].join("\n"),
        });

        if end == total_lines {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

/// Chunk a document, raising the chunk size when the document would
/// otherwise exceed `config.max_chunks` chunks.
///
/// The adjustment is logged as a warning; it never fails the document.
pub fn chunk_document(
    text: &str,
    config: &ChunkingConfig,
) -> Result<Vec<TextChunk>> {
    validate_params(config.chunk_size, config.overlap)?;

    let chunk_size = effective_chunk_size(count_lines(text), config);
    chunk_lines(text, chunk_size, config.overlap)
}

/// The chunk size actually used for a document of `total_lines` lines.
pub fn effective_chunk_size(
    total_lines: usize,
    config: &ChunkingConfig,
) -> usize {
    let estimated =
        expected_chunk_count(total_lines, config.chunk_size, config.overlap);
    if config.max_chunks == 0 || estimated <= config.max_chunks {
        return config.chunk_size;
    }

    // smallest size s with ceil((n - s) / (s - overlap)) + 1 <= max_chunks
    let shared = (config.max_chunks - 1).saturating_mul(config.overlap);
    let adjusted = total_lines
        .saturating_add(shared)
        .div_ceil(config.max_chunks)
        .max(config.chunk_size);
    tracing::warn!(
        total_lines,
        estimated,
        max_chunks = config.max_chunks,
        "raising chunk size from {} to {} lines",
        config.chunk_size,
        adjusted
    );
    adjusted
}
