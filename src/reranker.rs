use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    cancel::CancelToken,
    config::RerankConfig,
    error::{Error, Result},
    provider::RelevanceScorer,
    search::Hit,
};

/// A hit after the second relevance pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankedHit {
    #[serde(flatten)]
    pub hit: Hit,
    pub original_similarity: f64,
    /// Relevance in `[0, 1]`, or `None` when scoring failed or was skipped.
    pub rerank_score: Option<f64>,
    pub combined_score: f64,
}

/// Rescores candidates with a [`RelevanceScorer`] on a bounded thread pool.
pub struct Reranker<'a> {
    scorer: &'a dyn RelevanceScorer,
    config: &'a RerankConfig,
    pool: rayon::ThreadPool,
}

impl<'a> Reranker<'a> {
    pub fn new(
        scorer: &'a dyn RelevanceScorer,
        config: &'a RerankConfig,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.concurrency.max(1))
            .thread_name(|i| format!("rerank-{i}"))
            .build()
            .map_err(|e| {
                Error::Configuration(format!("failed to start rerank pool: {e}"))
            })?;

        Ok(Self {
            scorer,
            config,
            pool,
        })
    }

    /// Candidates to fetch for `max_results` final results.
    pub fn candidate_count(
        &self,
        max_results: usize,
        top_k: Option<usize>,
    ) -> usize {
        top_k
            .unwrap_or_else(|| {
                max_results.saturating_mul(self.config.top_k_multiplier)
            })
            .max(max_results)
    }

    /// Score every candidate and sort by combined score, best first.
    ///
    /// Never fails. A candidate whose scoring fails, or that is not scored
    /// before `cancel` fires or the configured timeout elapses, keeps its
    /// similarity as combined score. Candidates with equal combined scores
    /// stay in their input order.
    pub fn rerank(
        &self,
        query: &str,
        candidates: Vec<Hit>,
        cancel: &CancelToken,
    ) -> Vec<RerankedHit> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let deadline = self
            .config
            .timeout
            .and_then(|t| Instant::now().checked_add(t));
        let expired = || {
            cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d)
        };

        // One slot per candidate; collect keeps input order.
        let scores: Vec<Option<f64>> = self.pool.install(|| {
            candidates
                .par_iter()
                .map(|hit| self.score_one(query, hit, &expired))
                .collect()
        });

        let scored = scores.iter().filter(|s| s.is_some()).count();
        let degraded = candidates.len() - scored;
        if degraded > 0 && expired() {
            warn!(
                degraded,
                "reranking stopped early; unscored candidates keep their similarity"
            );
        }
        debug!(candidates = candidates.len(), scored, degraded, "reranked");

        let mut reranked: Vec<RerankedHit> = candidates
            .into_iter()
            .zip(scores)
            .map(|(hit, rerank_score)| {
                let original_similarity = hit.similarity;
                RerankedHit {
                    combined_score: self
                        .config
                        .combine(original_similarity, rerank_score),
                    original_similarity,
                    rerank_score,
                    hit,
                }
            })
            .collect();

        // Stable, so ties keep candidate order.
        reranked.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score));
        reranked
    }

    fn score_one(
        &self,
        query: &str,
        hit: &Hit,
        expired: &(impl Fn() -> bool + Sync),
    ) -> Option<f64> {
        if expired() {
            return None;
        }

        match self.scorer.score_relevance(query, &hit.text) {
            Ok(score) if score.is_finite() => {
                // results landing after cancellation are discarded
                if expired() {
                    None
                } else {
                    Some(score.clamp(0.0, 1.0))
                }
            }
            Ok(score) => {
                warn!(id = %hit.id, score, "ignoring non-finite relevance score");
                None
            }
            Err(err) => {
                warn!(id = %hit.id, error = %err, "relevance scoring failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for Reranker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reranker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
