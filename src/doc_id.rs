use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

/// A stable document identifier derived from (collection, source).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    /// The raw hash value.
    pub numeric: u64,
    /// The full 16-character hex form used as the index key.
    pub hex: String,
}

impl DocumentId {
    /// Generate a stable document ID from collection name and source path.
    pub fn new(collection: &str, source: &str) -> Self {
        let numeric = Self::hash_pair(collection, source);
        Self {
            numeric,
            hex: format!("{numeric:016x}"),
        }
    }

    fn hash_pair(collection: &str, source: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        collection.hash(&mut hasher);
        source.hash(&mut hasher);
        hasher.finish()
    }

    pub fn as_str(&self) -> &str {
        &self.hex
    }

    /// Short hex prefix for human display.
    pub fn short(&self) -> &str {
        &self.hex[..6]
    }

    /// Index key of the chunk at `chunk_index` within this document.
    ///
    /// # Examples
    ///
    /// ```
    /// use ragsync::DocumentId;
    ///
    /// let id = DocumentId::new("notes", "/home/me/notes/todo.md");
    /// assert_eq!(id.chunk_id(3), format!("{}_chunk_3", id.as_str()));
    /// ```
    pub fn chunk_id(&self, chunk_index: usize) -> String {
        format!("{}_chunk_{chunk_index}", self.hex)
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short())
    }
}
