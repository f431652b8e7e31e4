//! Grouping of chunk-level hits by source document.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{reranker::RerankedHit, search::Hit};

/// Something that belongs to a source document and carries a score.
pub trait Scored {
    fn source(&self) -> &str;
    fn score(&self) -> f64;
}

impl Scored for Hit {
    fn source(&self) -> &str {
        &self.source
    }

    fn score(&self) -> f64 {
        self.similarity
    }
}

impl Scored for RerankedHit {
    fn source(&self) -> &str {
        &self.hit.source
    }

    fn score(&self) -> f64 {
        self.combined_score
    }
}

/// Hits from one source document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedGroup<T> {
    pub source: String,
    /// Best-scoring members, capped for display.
    pub chunks: Vec<T>,
    /// Matching members before the cap.
    pub chunk_count: usize,
    /// Mean score over all matching members, not just the displayed ones.
    pub avg_similarity: f64,
}

/// Group `hits` by source and rank the groups.
///
/// Groups are ordered by average score, then by number of matches, then by
/// source. At most `max_groups` groups are returned, each holding at most
/// `group_cap` members.
pub fn aggregate<T: Scored>(
    hits: Vec<T>,
    group_cap: usize,
    max_groups: usize,
) -> Vec<AggregatedGroup<T>> {
    let mut by_source: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for hit in hits {
        by_source.entry(hit.source().to_string()).or_default().push(hit);
    }

    let mut groups: Vec<AggregatedGroup<T>> = by_source
        .into_iter()
        .map(|(source, mut members)| {
            members.sort_by(|a, b| b.score().total_cmp(&a.score()));
            let chunk_count = members.len();
            let avg_similarity =
                members.iter().map(Scored::score).sum::<f64>()
                    / chunk_count as f64;
            members.truncate(group_cap);
            AggregatedGroup {
                source,
                chunks: members,
                chunk_count,
                avg_similarity,
            }
        })
        .collect();

    groups.sort_by(|a, b| {
        b.avg_similarity
            .total_cmp(&a.avg_similarity)
            .then_with(|| b.chunk_count.cmp(&a.chunk_count))
            .then_with(|| a.source.cmp(&b.source))
    });
    groups.truncate(max_groups);
    groups
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        source: String,
        score: f64,
    }

    impl Scored for Item {
        fn source(&self) -> &str {
            &self.source
        }

        fn score(&self) -> f64 {
            self.score
        }
    }

    fn item(source: &str, score: f64) -> Item {
        Item {
            source: source.to_string(),
            score,
        }
    }

    #[test]
    fn groups_by_source_and_averages() {
        let groups = aggregate(
            vec![item("A", 0.9), item("B", 0.7), item("A", 0.8)],
            5,
            10,
        );

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].source, "A");
        assert!((groups[0].avg_similarity - 0.85).abs() < 1e-9);
        assert_eq!(groups[0].chunk_count, 2);
        assert_eq!(groups[1].source, "B");
        assert!((groups[1].avg_similarity - 0.7).abs() < 1e-9);
    }

    #[test]
    fn members_are_sorted_and_capped_after_averaging() {
        let hits = (0..8).map(|i| item("A", i as f64 / 10.0)).collect();
        let groups = aggregate(hits, 5, 10);

        let group = &groups[0];
        assert_eq!(group.chunk_count, 8);
        assert_eq!(group.chunks.len(), 5);
        assert_eq!(group.chunks[0].score, 0.7);
        assert!((group.avg_similarity - 0.35).abs() < 1e-9);
    }

    #[test]
    fn ties_prefer_more_matches_then_source() {
        let groups = aggregate(
            vec![
                item("c", 0.5),
                item("b", 0.5),
                item("a", 0.5),
                item("b", 0.5),
            ],
            5,
            10,
        );
        let order: Vec<_> = groups.iter().map(|g| g.source.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn truncates_to_max_groups() {
        let groups = aggregate(
            vec![item("a", 0.9), item("b", 0.8), item("c", 0.7)],
            5,
            2,
        );
        assert_eq!(groups.len(), 2);
        assert!(aggregate(Vec::<Item>::new(), 5, 2).is_empty());
    }

    proptest! {
        #[test]
        fn groups_are_homogeneous_and_sorted(
            raw in prop::collection::vec((0u8..5, -1.0f64..1.0), 0..60),
            cap in 1usize..6,
        ) {
            let hits: Vec<Item> = raw
                .iter()
                .map(|(s, score)| item(&format!("s{s}"), *score))
                .collect();
            let groups = aggregate(hits.clone(), cap, usize::MAX);

            let total: usize = groups.iter().map(|g| g.chunk_count).sum();
            prop_assert_eq!(total, hits.len());

            for group in &groups {
                prop_assert!(group.chunks.len() <= cap);
                prop_assert!(group.chunks.iter().all(|c| c.source == group.source));
                let members: Vec<f64> = hits
                    .iter()
                    .filter(|h| h.source == group.source)
                    .map(|h| h.score)
                    .collect();
                let mean = members.iter().sum::<f64>() / members.len() as f64;
                prop_assert!((mean - group.avg_similarity).abs() < 1e-9);
            }
            for pair in groups.windows(2) {
                prop_assert!(pair[0].avg_similarity >= pair[1].avg_similarity);
            }
        }
    }
}
