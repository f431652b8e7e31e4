//! Remote model collaborators used by the engine.
//!
//! Both traits describe blocking calls. Implementations are expected to be
//! long-lived clients that are shared across threads; the engine never retries
//! a failed call.

use crate::error::Result;

/// Turns text into a fixed-length vector.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text`. Callers reject blank text before calling this.
    fn embed(&self, text: &str) -> Result<Vec<f64>>;

    /// Name of the model producing the vectors, for logs and status output.
    fn model_name(&self) -> &str;
}

/// Scores how relevant a passage is to a query, in `[0, 1]`.
pub trait RelevanceScorer: Send + Sync {
    fn score_relevance(&self, query: &str, passage: &str) -> Result<f64>;
}

impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for &T {
    fn embed(&self, text: &str) -> Result<Vec<f64>> {
        (**self).embed(text)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

impl<T: RelevanceScorer + ?Sized> RelevanceScorer for &T {
    fn score_relevance(&self, query: &str, passage: &str) -> Result<f64> {
        (**self).score_relevance(query, passage)
    }
}
