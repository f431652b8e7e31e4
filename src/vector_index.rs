use crate::{error::Result, filter::Filter, metadata::Metadata};

/// A row to be written into a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub id: String,
    pub vector: Vec<f64>,
    pub text: String,
    pub metadata: Metadata,
}

/// A nearest-neighbor match, closest first.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// Cosine distance, `1 - cosine similarity`.
    pub distance: f64,
}

/// Persistent vector storage partitioned into named collections.
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite a single row.
    fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: &[f64],
        text: &str,
        metadata: &Metadata,
    ) -> Result<()>;

    /// Insert or overwrite several rows. Implementations may do this
    /// atomically; the default writes them one at a time.
    fn upsert_batch(
        &self,
        collection: &str,
        records: &[IndexRecord],
    ) -> Result<()> {
        for record in records {
            self.upsert(
                collection,
                &record.id,
                &record.vector,
                &record.text,
                &record.metadata,
            )?;
        }
        Ok(())
    }

    /// Delete rows by id. Returns how many existed.
    fn delete_ids(&self, collection: &str, ids: &[String]) -> Result<usize>;

    /// Delete every row whose metadata matches `filter`. Returns the count.
    fn delete_where(&self, collection: &str, filter: &Filter) -> Result<usize>;

    /// The `top_k` rows closest to `vector`, ascending by distance.
    fn query(
        &self,
        collection: &str,
        vector: &[f64],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryMatch>>;

    /// Number of rows in a collection. Unknown collections have zero.
    fn count(&self, collection: &str) -> Result<usize>;

    /// Names of all non-empty collections, sorted.
    fn collections(&self) -> Result<Vec<String>>;
}
