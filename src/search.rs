use std::fmt::Write as _;

use serde::Serialize;
use tracing::debug;

use crate::{
    aggregate::{self, AggregatedGroup},
    cancel::CancelToken,
    config::{DEFAULT_COLLECTION, SearchConfig},
    error::{Error, Result},
    filter::Filter,
    metadata::{self, Metadata},
    provider::EmbeddingProvider,
    reranker::{RerankedHit, Reranker},
    text_util,
    vector_index::{QueryMatch, VectorIndex},
};

/// Index namespace holding one vector per chunk.
pub fn chunks_collection(collection: &str) -> String {
    format!("{collection}_chunks")
}

/// Index namespace holding one whole-document vector per document.
pub fn documents_collection(collection: &str) -> String {
    format!("{collection}_documents")
}

/// Which namespaces a query runs against.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    #[default]
    Chunks,
    Documents,
    Both,
}

/// Location information returned with every hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HitMetadata {
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<i64>,
    pub line_range: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

impl HitMetadata {
    fn from_stored(stored: &Metadata, fallback_collection: &str) -> Self {
        let start_line = metadata::get_i64(stored, metadata::START_LINE);
        let end_line = metadata::get_i64(stored, metadata::END_LINE);
        let line_range = metadata::get_str(stored, metadata::LINE_RANGE)
            .map(str::to_string)
            .or_else(|| match (start_line, end_line) {
                (Some(start), Some(end)) => Some(format!("{start}-{end}")),
                _ => None,
            })
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            collection: metadata::get_str(stored, metadata::COLLECTION)
                .unwrap_or(fallback_collection)
                .to_string(),
            chunk_id: metadata::get_i64(stored, metadata::CHUNK_ID),
            total_chunks: metadata::get_i64(stored, metadata::TOTAL_CHUNKS),
            start_line,
            end_line,
            line_range,
            created_at: metadata::get_i64(stored, metadata::CREATED_AT),
        }
    }
}

/// A single retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub id: String,
    pub source: String,
    pub text: String,
    pub metadata: HitMetadata,
    /// `1 - cosine distance`.
    pub similarity: f64,
}

/// Parameters of one query.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub collection: String,
    pub max_results: usize,
    pub min_score: f64,
    pub filter: Option<Filter>,
    pub cancel: CancelToken,
}

impl SearchRequest {
    /// A request against the default collection using configured limits.
    pub fn new(query: impl Into<String>, config: &SearchConfig) -> Self {
        Self {
            query: query.into(),
            collection: DEFAULT_COLLECTION.to_string(),
            max_results: config.max_results,
            min_score: config.min_score,
            filter: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Same request with a different result budget.
    pub(crate) fn widened(&self, top_k: usize) -> Self {
        self.clone().max_results(top_k)
    }
}

/// Embeds queries and turns index matches into thresholded hits.
pub struct QueryEngine<'a> {
    embedder: &'a dyn EmbeddingProvider,
    index: &'a dyn VectorIndex,
    config: &'a SearchConfig,
}

impl<'a> QueryEngine<'a> {
    pub fn new(
        embedder: &'a dyn EmbeddingProvider,
        index: &'a dyn VectorIndex,
        config: &'a SearchConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        self.config
    }

    /// Chunk-level hits, most similar first.
    ///
    /// Returns at most `max_results` hits, none below `min_score`.
    pub fn search_chunks(&self, request: &SearchRequest) -> Result<Vec<Hit>> {
        let vector = self.embed_query(request)?;
        self.lookup(
            &chunks_collection(&request.collection),
            &vector,
            request.max_results,
            request,
        )
    }

    /// Document-level hits, most similar first.
    pub fn search_documents(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<Hit>> {
        let vector = self.embed_query(request)?;
        self.lookup(
            &documents_collection(&request.collection),
            &vector,
            request.max_results,
            request,
        )
    }

    /// Chunk and document hits ranked together by weighted similarity.
    ///
    /// Each hit keeps its raw similarity; the weights only decide the order.
    pub fn search_combined(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<Hit>> {
        let vector = self.embed_query(request)?;
        let chunks = self.lookup(
            &chunks_collection(&request.collection),
            &vector,
            request.max_results,
            request,
        )?;
        let documents = self.lookup(
            &documents_collection(&request.collection),
            &vector,
            request.max_results,
            request,
        )?;

        let mut weighted: Vec<(f64, Hit)> = chunks
            .into_iter()
            .map(|hit| (hit.similarity * self.config.chunk_weight, hit))
            .chain(documents.into_iter().map(|hit| {
                (hit.similarity * self.config.document_weight, hit)
            }))
            .collect();
        weighted.sort_by(|a, b| b.0.total_cmp(&a.0));
        weighted.truncate(request.max_results);

        Ok(weighted.into_iter().map(|(_, hit)| hit).collect())
    }

    pub fn search(
        &self,
        mode: QueryMode,
        request: &SearchRequest,
    ) -> Result<Vec<Hit>> {
        match mode {
            QueryMode::Chunks => self.search_chunks(request),
            QueryMode::Documents => self.search_documents(request),
            QueryMode::Both => self.search_combined(request),
        }
    }

    fn embed_query(&self, request: &SearchRequest) -> Result<Vec<f64>> {
        if request.query.trim().is_empty() {
            return Err(Error::EmptyInput("query text is blank".into()));
        }
        if request.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let vector = self.embedder.embed(&request.query)?;
        debug!(
            model = self.embedder.model_name(),
            dimension = vector.len(),
            "embedded query"
        );
        Ok(vector)
    }

    fn lookup(
        &self,
        namespace: &str,
        vector: &[f64],
        top_k: usize,
        request: &SearchRequest,
    ) -> Result<Vec<Hit>> {
        let matches =
            self.index
                .query(namespace, vector, top_k, request.filter.as_ref())?;
        let fetched = matches.len();

        let mut hits: Vec<Hit> = matches
            .into_iter()
            .map(|m| self.to_hit(m, &request.collection))
            .filter(|hit| hit.similarity >= request.min_score)
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        debug!(
            namespace,
            fetched,
            kept = hits.len(),
            min_score = request.min_score,
            "index lookup"
        );
        Ok(hits)
    }

    fn to_hit(&self, m: QueryMatch, collection: &str) -> Hit {
        let source = metadata::get_str(&m.metadata, metadata::SOURCE)
            .unwrap_or("unknown")
            .to_string();
        Hit {
            metadata: HitMetadata::from_stored(&m.metadata, collection),
            text: text_util::truncate_chars(&m.text, self.config.payload_chars),
            similarity: 1.0 - m.distance,
            source,
            id: m.id,
        }
    }
}

/// How a query is post-processed.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub mode: QueryMode,
    /// Group hits by source document.
    pub aggregate: bool,
    /// Candidates scored when reranking. Defaults to
    /// `max_results * rerank.top_k_multiplier`.
    pub rerank_top_k: Option<usize>,
    /// Candidates grouped when aggregating. Defaults to
    /// `max_results * search.overfetch_multiplier`.
    pub overfetch: Option<usize>,
}

/// The result of [`execute_search`], shaped by the options used.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchOutcome {
    Hits(Vec<Hit>),
    Reranked(Vec<RerankedHit>),
    Groups(Vec<AggregatedGroup<Hit>>),
    RerankedGroups(Vec<AggregatedGroup<RerankedHit>>),
}

impl SearchOutcome {
    pub fn len(&self) -> usize {
        match self {
            SearchOutcome::Hits(v) => v.len(),
            SearchOutcome::Reranked(v) => v.len(),
            SearchOutcome::Groups(v) => v.len(),
            SearchOutcome::RerankedGroups(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Execute the full search pipeline.
///
/// 1. Vector retrieval in the requested mode (overfetched when a later
///    stage needs more candidates than `max_results`)
/// 2. Relevance reranking, when a reranker is given
/// 3. Grouping by source document, when `aggregate` is set
/// 4. Limit to `max_results` entries
pub fn execute_search(
    engine: &QueryEngine<'_>,
    reranker: Option<&Reranker<'_>>,
    request: &SearchRequest,
    options: &SearchOptions,
) -> Result<SearchOutcome> {
    let max_results = request.max_results;
    let config = engine.config();

    let outcome = match (reranker, options.aggregate) {
        (None, false) => SearchOutcome::Hits(engine.search(options.mode, request)?),
        (None, true) => {
            let fetch = options
                .overfetch
                .unwrap_or(
                    max_results.saturating_mul(config.overfetch_multiplier),
                )
                .max(max_results);
            let hits =
                engine.search(options.mode, &request.widened(fetch))?;
            SearchOutcome::Groups(aggregate::aggregate(
                hits,
                config.group_cap,
                max_results,
            ))
        }
        (Some(reranker), aggregate) => {
            let top_k = reranker.candidate_count(max_results, options.rerank_top_k);
            let candidates =
                engine.search(options.mode, &request.widened(top_k))?;
            let mut reranked =
                reranker.rerank(&request.query, candidates, &request.cancel);

            if aggregate {
                SearchOutcome::RerankedGroups(aggregate::aggregate(
                    reranked,
                    config.group_cap,
                    max_results,
                ))
            } else {
                reranked.truncate(max_results);
                SearchOutcome::Reranked(reranked)
            }
        }
    };

    debug!(results = outcome.len(), "search finished");
    Ok(outcome)
}

/// Format results for human-readable terminal output.
pub fn format_human(outcome: &SearchOutcome) -> String {
    let mut out = String::new();
    if outcome.is_empty() {
        out.push_str("No results found.\n");
        return out;
    }

    match outcome {
        SearchOutcome::Hits(hits) => {
            for (i, hit) in hits.iter().enumerate() {
                write_hit(&mut out, i + 1, hit, &format!("{:.3}", hit.similarity));
            }
        }
        SearchOutcome::Reranked(hits) => {
            for (i, r) in hits.iter().enumerate() {
                write_hit(&mut out, i + 1, &r.hit, &rerank_label(r));
            }
        }
        SearchOutcome::Groups(groups) => {
            for (i, group) in groups.iter().enumerate() {
                write_group_header(&mut out, i + 1, group);
                for hit in &group.chunks {
                    let _ = writeln!(
                        out,
                        "     - [{:.3}] lines {}",
                        hit.similarity, hit.metadata.line_range
                    );
                }
            }
        }
        SearchOutcome::RerankedGroups(groups) => {
            for (i, group) in groups.iter().enumerate() {
                write_group_header(&mut out, i + 1, group);
                for r in &group.chunks {
                    let _ = writeln!(
                        out,
                        "     - [{}] lines {}",
                        rerank_label(r),
                        r.hit.metadata.line_range
                    );
                }
            }
        }
    }

    let _ = writeln!(out, "\n{} result(s)", outcome.len());
    out
}

fn write_hit(out: &mut String, rank: usize, hit: &Hit, score: &str) {
    let _ = writeln!(
        out,
        "{rank:>3}. [{score}] {}:{} lines {}",
        hit.metadata.collection,
        text_util::display_name(&hit.source),
        hit.metadata.line_range,
    );
    let _ = writeln!(
        out,
        "     {}",
        text_util::preview(&hit.text, text_util::DEFAULT_PREVIEW_CHARS)
    );
}

fn write_group_header<T>(out: &mut String, rank: usize, group: &AggregatedGroup<T>) {
    let _ = writeln!(
        out,
        "{rank:>3}. [{:.3}] {} ({} matching chunk(s))",
        group.avg_similarity, group.source, group.chunk_count
    );
}

fn rerank_label(r: &RerankedHit) -> String {
    match r.rerank_score {
        Some(score) => format!(
            "{:.3} = sim {:.3} / rel {:.3}",
            r.combined_score, r.original_similarity, score
        ),
        None => format!("{:.3} = sim {:.3} / rel -", r.combined_score, r.original_similarity),
    }
}

/// Format results as a JSON document.
pub fn format_json(
    outcome: &SearchOutcome,
    query: &str,
    options: &SearchOptions,
) -> Result<String> {
    let value = serde_json::json!({
        "query": query,
        "mode": options.mode,
        "aggregated": options.aggregate,
        "count": outcome.len(),
        "results": outcome,
    });
    Ok(serde_json::to_string_pretty(&value)?)
}
