use std::{
    collections::BTreeSet,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use ragsync::{
    CancelToken,
    EmbeddingProvider,
    Error,
    Indexer,
    QueryEngine,
    RedbIndex,
    RelevanceScorer,
    Reranker,
    Result,
    VectorIndex,
    chunking::ChunkingConfig,
    config::{RerankConfig, SearchConfig},
    ingestion::Document,
    search::{self, QueryMode, SearchOptions, SearchOutcome, SearchRequest},
};

const VOCABULARY: &[&str] = &[
    "borrow", "ownership", "lifetime", "pasta", "sauce", "garlic", "tide",
    "moon",
];

/// Bag-of-words vector over a fixed vocabulary plus a constant component,
/// so no text maps to the zero vector.
struct KeywordEmbedder {
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl EmbeddingProvider for KeywordEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let lower = text.to_lowercase();
        let mut vector: Vec<f64> = VOCABULARY
            .iter()
            .map(|word| lower.matches(word).count() as f64)
            .collect();
        vector.push(0.1);
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "keywords"
    }
}

struct ConstantScorer(f64);

impl RelevanceScorer for ConstantScorer {
    fn score_relevance(&self, _query: &str, _passage: &str) -> Result<f64> {
        Ok(self.0)
    }
}

/// Fails for passages mentioning `marker`, scores 1.0 otherwise.
struct FlakyScorer {
    marker: &'static str,
}

impl RelevanceScorer for FlakyScorer {
    fn score_relevance(&self, _query: &str, passage: &str) -> Result<f64> {
        if passage.contains(self.marker) {
            Err(Error::Provider("scorer timed out".into()))
        } else {
            Ok(1.0)
        }
    }
}

/// Sleeps a passage-dependent time so completions arrive out of order.
struct JitteryScorer;

impl RelevanceScorer for JitteryScorer {
    fn score_relevance(&self, _query: &str, passage: &str) -> Result<f64> {
        let delay = 30u64.saturating_sub(passage.len() as u64 % 30);
        thread::sleep(Duration::from_millis(delay));
        Ok((passage.len() % 7) as f64 / 7.0)
    }
}

fn chunking() -> ChunkingConfig {
    ChunkingConfig {
        chunk_size: 2,
        overlap: 0,
        ..ChunkingConfig::default()
    }
}

fn corpus() -> Vec<Document> {
    vec![
        Document::new(
            "/notes/rust.md",
            "notes",
            "Ownership moves values.\nA borrow never outlives its owner.\n\
             Every borrow has a lifetime.\nLifetime elision hides most of them.",
        ),
        Document::new(
            "/notes/cooking.md",
            "notes",
            "Boil the pasta in salted water.\nFry garlic gently.\n\
             Add the garlic to the sauce.\nToss pasta with sauce.",
        ),
        Document::new(
            "/notes/sea.md",
            "notes",
            "The tide follows the moon.\nA spring tide is strongest.",
        ),
    ]
}

fn indexed(index: &RedbIndex, embedder: &KeywordEmbedder) {
    let chunking = chunking();
    let indexer = Indexer::new(embedder, index, &chunking);
    for doc in corpus() {
        indexer.add_document(&doc).unwrap();
    }
}

fn sources(hits: &[search::Hit]) -> Vec<&str> {
    hits.iter().map(|h| h.source.as_str()).collect()
}

#[test]
fn add_then_search_ranks_the_matching_document_first() {
    let tmp = tempfile::tempdir().unwrap();
    let index = RedbIndex::open(&tmp.path().join("vectors.redb")).unwrap();
    let embedder = KeywordEmbedder::new();
    indexed(&index, &embedder);

    assert_eq!(index.count("notes_documents").unwrap(), 3);
    assert_eq!(index.count("notes_chunks").unwrap(), 5);

    let config = SearchConfig::default();
    let engine = QueryEngine::new(&embedder, &index, &config);
    let request = SearchRequest::new("borrow lifetime", &config)
        .collection("notes")
        .max_results(3);
    let hits = engine.search_chunks(&request).unwrap();

    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].source, "/notes/rust.md");
    assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    assert_eq!(hits[0].metadata.collection, "notes");
    assert!(["1-2", "3-4"].contains(&hits[0].metadata.line_range.as_str()));
    assert_eq!(hits[0].metadata.total_chunks, Some(2));
}

#[test]
fn index_survives_reopening() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("vectors.redb");
    let embedder = KeywordEmbedder::new();
    {
        let index = RedbIndex::open(&path).unwrap();
        indexed(&index, &embedder);
    }

    let index = RedbIndex::open(&path).unwrap();
    assert_eq!(
        index.collections().unwrap(),
        vec!["notes_chunks".to_string(), "notes_documents".to_string()]
    );
    assert_eq!(index.count("notes_chunks").unwrap(), 5);
}

#[test]
fn re_adding_a_corpus_is_idempotent() {
    let index = RedbIndex::open_in_memory().unwrap();
    let embedder = KeywordEmbedder::new();
    let config = SearchConfig::default();

    indexed(&index, &embedder);
    let engine = QueryEngine::new(&embedder, &index, &config);
    let request =
        SearchRequest::new("garlic sauce", &config).collection("notes");
    let first = engine.search_chunks(&request).unwrap();

    indexed(&index, &embedder);
    let second = engine.search_chunks(&request).unwrap();

    assert_eq!(index.count("notes_documents").unwrap(), 3);
    assert_eq!(index.count("notes_chunks").unwrap(), 5);
    let ids = |hits: &[search::Hit]| {
        hits.iter().map(|h| h.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
}

#[test]
fn min_score_and_filters_narrow_results() {
    let index = RedbIndex::open_in_memory().unwrap();
    let embedder = KeywordEmbedder::new();
    indexed(&index, &embedder);

    let config = SearchConfig::default();
    let engine = QueryEngine::new(&embedder, &index, &config);

    let strict = SearchRequest::new("tide moon", &config)
        .collection("notes")
        .max_results(10)
        .min_score(0.5);
    let hits = engine.search_chunks(&strict).unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.similarity >= 0.5));
    assert!(hits.iter().all(|h| h.source == "/notes/sea.md"));

    let filtered = SearchRequest::new("tide moon", &config)
        .collection("notes")
        .max_results(10)
        .filter(ragsync::filter::Filter::source("/notes/cooking.md"));
    let hits = engine.search_chunks(&filtered).unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.source == "/notes/cooking.md"));
}

#[test]
fn document_mode_returns_one_hit_per_source() {
    let index = RedbIndex::open_in_memory().unwrap();
    let embedder = KeywordEmbedder::new();
    indexed(&index, &embedder);

    let config = SearchConfig::default();
    let engine = QueryEngine::new(&embedder, &index, &config);
    let request = SearchRequest::new("pasta", &config)
        .collection("notes")
        .max_results(10);
    let hits = engine.search(QueryMode::Documents, &request).unwrap();

    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].source, "/notes/cooking.md");
    let unique: BTreeSet<_> = sources(&hits).into_iter().collect();
    assert_eq!(unique.len(), 3);
}

#[test]
fn removing_a_source_drops_it_from_results() {
    let index = RedbIndex::open_in_memory().unwrap();
    let embedder = KeywordEmbedder::new();
    indexed(&index, &embedder);

    let chunking = chunking();
    let indexer = Indexer::new(&embedder, &index, &chunking);
    let removed = indexer.remove_source("notes", "/notes/rust.md").unwrap();
    assert_eq!(removed, 3);

    let config = SearchConfig::default();
    let engine = QueryEngine::new(&embedder, &index, &config);
    let request = SearchRequest::new("borrow ownership", &config)
        .collection("notes")
        .max_results(10);
    let hits = engine.search(QueryMode::Both, &request).unwrap();
    assert!(hits.iter().all(|h| h.source != "/notes/rust.md"));
}

#[test]
fn aggregation_groups_chunks_by_source() {
    let index = RedbIndex::open_in_memory().unwrap();
    let embedder = KeywordEmbedder::new();
    indexed(&index, &embedder);

    let config = SearchConfig::default();
    let engine = QueryEngine::new(&embedder, &index, &config);
    let request = SearchRequest::new("garlic pasta borrow", &config)
        .collection("notes")
        .max_results(2);
    let options = SearchOptions {
        aggregate: true,
        ..SearchOptions::default()
    };

    let outcome =
        search::execute_search(&engine, None, &request, &options).unwrap();
    let SearchOutcome::Groups(groups) = outcome else {
        panic!("expected aggregated groups");
    };

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].source, "/notes/cooking.md");
    assert!(groups[0].avg_similarity >= groups[1].avg_similarity);
    for group in &groups {
        assert_eq!(group.chunk_count, group.chunks.len());
        assert!(group.chunks.iter().all(|c| c.source == group.source));
        let mean = group.chunks.iter().map(|c| c.similarity).sum::<f64>()
            / group.chunks.len() as f64;
        assert!((mean - group.avg_similarity).abs() < 1e-9);
    }
}

#[test]
fn rerank_blends_similarity_with_relevance() {
    let index = RedbIndex::open_in_memory().unwrap();
    let embedder = KeywordEmbedder::new();
    indexed(&index, &embedder);

    let config = SearchConfig::default();
    let rerank_config = RerankConfig::default();
    let scorer = ConstantScorer(0.5);
    let engine = QueryEngine::new(&embedder, &index, &config);
    let reranker = Reranker::new(&scorer, &rerank_config).unwrap();

    let request = SearchRequest::new("moon", &config)
        .collection("notes")
        .max_results(2);
    let outcome = search::execute_search(
        &engine,
        Some(&reranker),
        &request,
        &SearchOptions::default(),
    )
    .unwrap();
    let SearchOutcome::Reranked(hits) = outcome else {
        panic!("expected reranked hits");
    };

    assert_eq!(hits.len(), 2);
    for hit in &hits {
        assert_eq!(hit.rerank_score, Some(0.5));
        let expected = 0.3 * hit.original_similarity + 0.7 * 0.5;
        assert!((hit.combined_score - expected).abs() < 1e-9);
    }
    assert!(hits[0].combined_score >= hits[1].combined_score);
}

#[test]
fn failing_scorer_degrades_only_its_candidates() {
    let index = RedbIndex::open_in_memory().unwrap();
    let embedder = KeywordEmbedder::new();
    indexed(&index, &embedder);

    let config = SearchConfig::default();
    let rerank_config = RerankConfig::default();
    let scorer = FlakyScorer { marker: "pasta" };
    let engine = QueryEngine::new(&embedder, &index, &config);
    let reranker = Reranker::new(&scorer, &rerank_config).unwrap();

    let request = SearchRequest::new("pasta tide", &config)
        .collection("notes")
        .max_results(5);
    let candidates = engine.search_chunks(&request).unwrap();
    let reranked = reranker.rerank(&request.query, candidates, &request.cancel);

    assert_eq!(reranked.len(), 5);
    for hit in &reranked {
        if hit.hit.text.contains("pasta") {
            assert_eq!(hit.rerank_score, None);
            assert_eq!(hit.combined_score, hit.original_similarity);
        } else {
            assert_eq!(hit.rerank_score, Some(1.0));
        }
    }
}

#[test]
fn cancelled_request_never_reaches_the_providers() {
    let index = RedbIndex::open_in_memory().unwrap();
    let embedder = KeywordEmbedder::new();
    indexed(&index, &embedder);
    let before = embedder.calls.load(Ordering::SeqCst);

    let config = SearchConfig::default();
    let rerank_config = RerankConfig::default();
    let scorer = ConstantScorer(1.0);
    let engine = QueryEngine::new(&embedder, &index, &config);
    let reranker = Reranker::new(&scorer, &rerank_config).unwrap();

    let token = CancelToken::new();
    token.cancel();
    let request = SearchRequest::new("moon", &config)
        .collection("notes")
        .cancel(token);
    let err = search::execute_search(
        &engine,
        Some(&reranker),
        &request,
        &SearchOptions::default(),
    )
    .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), before);
}

#[test]
fn expired_rerank_budget_falls_back_to_similarity_order() {
    let index = RedbIndex::open_in_memory().unwrap();
    let embedder = KeywordEmbedder::new();
    indexed(&index, &embedder);

    let config = SearchConfig::default();
    let rerank_config = RerankConfig {
        timeout: Some(Duration::ZERO),
        ..RerankConfig::default()
    };
    let scorer = ConstantScorer(1.0);
    let engine = QueryEngine::new(&embedder, &index, &config);
    let reranker = Reranker::new(&scorer, &rerank_config).unwrap();

    let request = SearchRequest::new("garlic", &config)
        .collection("notes")
        .max_results(4);
    let plain = engine.search_chunks(&request).unwrap();
    let outcome = search::execute_search(
        &engine,
        Some(&reranker),
        &request,
        &SearchOptions::default(),
    )
    .unwrap();
    let SearchOutcome::Reranked(reranked) = outcome else {
        panic!("expected reranked hits");
    };

    assert!(reranked.iter().all(|h| h.rerank_score.is_none()));
    let reranked_ids: Vec<_> = reranked.iter().map(|h| &h.hit.id).collect();
    let plain_ids: Vec<_> = plain.iter().map(|h| &h.id).collect();
    assert_eq!(reranked_ids, plain_ids);
}

#[test]
fn rerank_then_aggregate_groups_by_combined_score() {
    let index = RedbIndex::open_in_memory().unwrap();
    let embedder = KeywordEmbedder::new();
    indexed(&index, &embedder);

    let config = SearchConfig::default();
    let rerank_config = RerankConfig::default();
    let scorer = FlakyScorer { marker: "garlic" };
    let engine = QueryEngine::new(&embedder, &index, &config);
    let reranker = Reranker::new(&scorer, &rerank_config).unwrap();

    let request = SearchRequest::new("tide", &config)
        .collection("notes")
        .max_results(3);
    let options = SearchOptions {
        aggregate: true,
        rerank_top_k: Some(10),
        ..SearchOptions::default()
    };
    let outcome =
        search::execute_search(&engine, Some(&reranker), &request, &options)
            .unwrap();
    let SearchOutcome::RerankedGroups(groups) = outcome else {
        panic!("expected reranked groups");
    };

    // garlic passages keep their near-zero similarity, the rest score 1.0
    let order: Vec<_> = groups.iter().map(|g| g.source.as_str()).collect();
    assert_eq!(
        order,
        vec!["/notes/sea.md", "/notes/rust.md", "/notes/cooking.md"]
    );
    let cooking = &groups[2];
    assert!(cooking.chunks.iter().all(|c| c.rerank_score.is_none()));
    for group in &groups {
        let mean = group.chunks.iter().map(|c| c.combined_score).sum::<f64>()
            / group.chunks.len() as f64;
        assert!((mean - group.avg_similarity).abs() < 1e-9);
    }
}

#[test]
fn rerank_order_is_deterministic() {
    let index = RedbIndex::open_in_memory().unwrap();
    let embedder = KeywordEmbedder::new();
    indexed(&index, &embedder);

    let config = SearchConfig::default();
    let rerank_config = RerankConfig {
        concurrency: 3,
        ..RerankConfig::default()
    };
    let engine = QueryEngine::new(&embedder, &index, &config);
    let reranker = Reranker::new(&JitteryScorer, &rerank_config).unwrap();

    let request = SearchRequest::new("sauce borrow moon", &config)
        .collection("notes")
        .max_results(5);
    let run = || {
        match search::execute_search(
            &engine,
            Some(&reranker),
            &request,
            &SearchOptions::default(),
        )
        .unwrap()
        {
            SearchOutcome::Reranked(hits) => {
                hits.into_iter().map(|h| h.hit.id).collect::<Vec<_>>()
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    };

    let first = run();
    assert_eq!(first.len(), 5);
    for _ in 0..3 {
        assert_eq!(run(), first);
    }
}

#[test]
fn blank_query_is_rejected() {
    let index = RedbIndex::open_in_memory().unwrap();
    let embedder = KeywordEmbedder::new();
    let config = SearchConfig::default();
    let engine = QueryEngine::new(&embedder, &index, &config);

    let request = SearchRequest::new("   ", &config);
    let err = engine.search_chunks(&request).unwrap_err();
    assert!(matches!(err, Error::EmptyInput(_)));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}
