use std::{collections::BTreeSet, path::Path};

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    TableDefinition,
    backends::InMemoryBackend,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    filter::Filter,
    metadata::Metadata,
    vector_index::{IndexRecord, QueryMatch, VectorIndex},
};

/// Rows keyed by `(collection, id)`.
const VECTORS: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("vectors");

/// Header size: 4 bytes vector dimension.
const HEADER_SIZE: usize = 4;

const F64_SIZE: usize = std::mem::size_of::<f64>();

/// Exact cosine-distance index stored in a single redb file.
///
/// Binary format per row:
/// - 4 bytes: dimension D (u32 LE)
/// - D * 8 bytes: f64 values in native (little-endian) order
/// - remaining bytes: JSON `{"text": .., "metadata": {..}}`
///
/// Queries scan every row of the collection, so results are exact.
pub struct RedbIndex {
    db: Database,
}

#[derive(Serialize)]
struct RowBodyRef<'a> {
    text: &'a str,
    metadata: &'a Metadata,
}

#[derive(Deserialize)]
struct RowBody {
    text: String,
    metadata: Metadata,
}

/// A stored row with its body left undecoded.
struct RawRow<'a> {
    vector: Vec<f64>,
    body: &'a [u8],
}

impl RedbIndex {
    /// Open or create an index at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use ragsync::{RedbIndex, VectorIndex};
    ///
    /// let index = RedbIndex::open(&tmp.path().join("vectors.redb")).unwrap();
    /// assert!(index.collections().unwrap().is_empty());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// An index that lives only as long as the value.
    pub fn open_in_memory() -> Result<Self> {
        let db =
            Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.commit()?;

        Ok(Self { db })
    }
}

impl VectorIndex for RedbIndex {
    fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: &[f64],
        text: &str,
        metadata: &Metadata,
    ) -> Result<()> {
        let row = encode_row(vector, text, metadata)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VECTORS)?;
            table.insert((collection, id), row.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn upsert_batch(
        &self,
        collection: &str,
        records: &[IndexRecord],
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let rows = records
            .iter()
            .map(|r| encode_row(&r.vector, &r.text, &r.metadata))
            .collect::<Result<Vec<_>>>()?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VECTORS)?;
            for (record, row) in records.iter().zip(&rows) {
                table.insert((collection, record.id.as_str()), row.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn delete_ids(&self, collection: &str, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let txn = self.db.begin_write()?;
        let mut removed = 0;
        {
            let mut table = txn.open_table(VECTORS)?;
            for id in ids {
                if table.remove((collection, id.as_str()))?.is_some() {
                    removed += 1;
                }
            }
        }
        txn.commit()?;
        Ok(removed)
    }

    fn delete_where(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(VECTORS)?;

            let mut doomed = Vec::new();
            for entry in table.range((collection, "")..)? {
                let (key, value) = entry?;
                let (coll, id) = key.value();
                if coll != collection {
                    break;
                }
                let body = decode_body(split_row(value.value())?.body)?;
                if filter.matches(&body.metadata) {
                    doomed.push(id.to_string());
                }
            }

            for id in &doomed {
                table.remove((collection, id.as_str()))?;
            }
            doomed.len()
        };
        txn.commit()?;
        Ok(removed)
    }

    fn query(
        &self,
        collection: &str,
        vector: &[f64],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryMatch>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        let filter = filter.filter(|f| !f.is_empty());

        let mut scored: Vec<(f64, String, Vec<u8>)> = Vec::new();
        for entry in table.range((collection, "")..)? {
            let (key, value) = entry?;
            let (coll, id) = key.value();
            if coll != collection {
                break;
            }

            let row = split_row(value.value())?;
            if row.vector.len() != vector.len() {
                return Err(Error::Index(format!(
                    "dimension mismatch in '{collection}': query has {}, \
                     row '{id}' has {}",
                    vector.len(),
                    row.vector.len()
                )));
            }

            if let Some(filter) = filter
                && !filter.matches(&decode_body(row.body)?.metadata)
            {
                continue;
            }

            let distance = cosine_distance(vector, &row.vector);
            scored.push((distance, id.to_string(), row.body.to_vec()));
        }

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(distance, id, body)| {
                let body = decode_body(&body)?;
                Ok(QueryMatch {
                    id,
                    text: body.text,
                    metadata: body.metadata,
                    distance,
                })
            })
            .collect()
    }

    fn count(&self, collection: &str) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        let mut count = 0;
        for entry in table.range((collection, "")..)? {
            let (key, _) = entry?;
            if key.value().0 != collection {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    fn collections(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        let mut names = BTreeSet::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            names.insert(key.value().0.to_string());
        }
        Ok(names.into_iter().collect())
    }
}

impl std::fmt::Debug for RedbIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbIndex").finish_non_exhaustive()
    }
}

fn encode_row(
    vector: &[f64],
    text: &str,
    metadata: &Metadata,
) -> Result<Vec<u8>> {
    if vector.is_empty() {
        return Err(Error::Index("refusing to store an empty vector".into()));
    }
    let dimension = u32::try_from(vector.len())
        .map_err(|_| Error::Index("vector dimension exceeds u32".into()))?;
    let body = serde_json::to_vec(&RowBodyRef { text, metadata })
        .map_err(|e| Error::Index(format!("failed to encode row: {e}")))?;

    let mut row = Vec::with_capacity(
        HEADER_SIZE + std::mem::size_of_val(vector) + body.len(),
    );
    row.extend_from_slice(&dimension.to_le_bytes());
    row.extend_from_slice(bytemuck::cast_slice(vector));
    row.extend_from_slice(&body);
    Ok(row)
}

fn split_row(bytes: &[u8]) -> Result<RawRow<'_>> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::Index("truncated row header".into()));
    }
    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&bytes[..HEADER_SIZE]);
    let dimension = u32::from_le_bytes(header) as usize;

    let vector_end = HEADER_SIZE + dimension * F64_SIZE;
    if bytes.len() < vector_end {
        return Err(Error::Index(format!(
            "row shorter than its {dimension}-dimensional vector"
        )));
    }

    // Row bytes carry no alignment guarantee, so copy rather than cast.
    let vector: Vec<f64> =
        bytemuck::pod_collect_to_vec(&bytes[HEADER_SIZE..vector_end]);

    Ok(RawRow {
        vector,
        body: &bytes[vector_end..],
    })
}

fn decode_body(body: &[u8]) -> Result<RowBody> {
    serde_json::from_slice(body)
        .map_err(|e| Error::Index(format!("corrupt row body: {e}")))
}

/// Cosine distance `1 - a·b / (|a||b|)`; zero vectors are at distance 1.
pub fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    1.0 - similarity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{self, MetaValue};

    fn test_index() -> (tempfile::TempDir, RedbIndex) {
        let tmp = tempfile::tempdir().unwrap();
        let index = RedbIndex::open(&tmp.path().join("vectors.redb")).unwrap();
        (tmp, index)
    }

    fn meta(source: &str) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert(metadata::SOURCE.into(), source.into());
        meta
    }

    #[test]
    fn upsert_and_query_orders_by_distance() {
        let (_tmp, index) = test_index();
        index
            .upsert("c", "x", &[1.0, 0.0], "east", &meta("a.md"))
            .unwrap();
        index
            .upsert("c", "y", &[0.0, 1.0], "north", &meta("b.md"))
            .unwrap();
        index
            .upsert("c", "z", &[1.0, 1.0], "north-east", &meta("c.md"))
            .unwrap();

        let matches = index.query("c", &[1.0, 0.1], 3, None).unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "z", "y"]);
        assert_eq!(matches[0].text, "east");
        assert_eq!(
            matches[0].metadata.get(metadata::SOURCE),
            Some(&MetaValue::Text("a.md".into()))
        );
        for pair in matches.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn query_respects_top_k_and_filter() {
        let (_tmp, index) = test_index();
        for i in 0..5 {
            let source = if i % 2 == 0 { "even.md" } else { "odd.md" };
            index
                .upsert("c", &format!("id{i}"), &[1.0, i as f64], "t", &meta(source))
                .unwrap();
        }

        assert_eq!(index.query("c", &[1.0, 0.0], 2, None).unwrap().len(), 2);

        let filter = Filter::source("odd.md");
        let matches = index.query("c", &[1.0, 0.0], 10, Some(&filter)).unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.id == "id1" || m.id == "id3"));
    }

    #[test]
    fn collections_are_isolated() {
        let (_tmp, index) = test_index();
        index.upsert("a", "1", &[1.0], "t", &meta("s")).unwrap();
        index.upsert("ab", "1", &[1.0], "t", &meta("s")).unwrap();
        index.upsert("b", "1", &[1.0], "t", &meta("s")).unwrap();

        assert_eq!(index.count("a").unwrap(), 1);
        assert_eq!(index.count("missing").unwrap(), 0);
        assert_eq!(index.query("a", &[1.0], 10, None).unwrap().len(), 1);
        assert_eq!(index.collections().unwrap(), vec!["a", "ab", "b"]);
    }

    #[test]
    fn upsert_overwrites_same_id() {
        let (_tmp, index) = test_index();
        index.upsert("c", "x", &[1.0, 0.0], "old", &meta("a")).unwrap();
        index.upsert("c", "x", &[0.0, 1.0], "new", &meta("a")).unwrap();

        assert_eq!(index.count("c").unwrap(), 1);
        let matches = index.query("c", &[0.0, 1.0], 1, None).unwrap();
        assert_eq!(matches[0].text, "new");
        assert!(matches[0].distance.abs() < 1e-12);
    }

    #[test]
    fn delete_by_ids_and_filter() {
        let (_tmp, index) = test_index();
        let records: Vec<IndexRecord> = (0..4)
            .map(|i| IndexRecord {
                id: format!("r{i}"),
                vector: vec![1.0, i as f64],
                text: format!("row {i}"),
                metadata: meta(if i < 3 { "doc.md" } else { "other.md" }),
            })
            .collect();
        index.upsert_batch("c", &records).unwrap();
        assert_eq!(index.count("c").unwrap(), 4);

        let removed = index
            .delete_ids("c", &["r0".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(removed, 1);

        let removed = index.delete_where("c", &Filter::source("doc.md")).unwrap();
        assert_eq!(removed, 2);

        let left = index.query("c", &[1.0, 0.0], 10, None).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "r3");
    }

    #[test]
    fn dimension_mismatch_is_an_index_error() {
        let (_tmp, index) = test_index();
        index.upsert("c", "x", &[1.0, 0.0, 0.0], "t", &meta("a")).unwrap();
        let err = index.query("c", &[1.0, 0.0], 1, None).unwrap_err();
        assert!(err.is_index());
    }

    #[test]
    fn empty_vectors_are_rejected() {
        let (_tmp, index) = test_index();
        assert!(index.upsert("c", "x", &[], "t", &meta("a")).is_err());
    }

    #[test]
    fn reopen_preserves_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.redb");
        {
            let index = RedbIndex::open(&path).unwrap();
            index.upsert("c", "x", &[0.5, 0.5], "kept", &meta("a")).unwrap();
        }
        {
            let index = RedbIndex::open(&path).unwrap();
            let matches = index.query("c", &[0.5, 0.5], 1, None).unwrap();
            assert_eq!(matches[0].text, "kept");
        }
    }

    #[test]
    fn in_memory_index_works() {
        let index = RedbIndex::open_in_memory().unwrap();
        index.upsert("c", "x", &[1.0], "t", &meta("a")).unwrap();
        assert_eq!(index.count("c").unwrap(), 1);
    }

    #[test]
    fn cosine_distance_edges() {
        assert!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-12);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 3.0]) - 1.0).abs() < 1e-12);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-12);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }
}
