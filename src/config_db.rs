use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::error::Result;

/// Collection name to a free-form description.
const COLLECTIONS: TableDefinition<&str, &str> =
    TableDefinition::new("collections");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Persistent settings and the registry of known collections.
pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(COLLECTIONS)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Collections --

    pub fn set_collection(&self, name: &str, description: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(COLLECTIONS)?;
            table.insert(name, description)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Register a collection unless it already exists.
    pub fn ensure_collection(&self, name: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let created = {
            let mut table = txn.open_table(COLLECTIONS)?;
            if table.get(name)?.is_some() {
                false
            } else {
                table.insert(name, "")?;
                true
            }
        };
        txn.commit()?;
        Ok(created)
    }

    pub fn get_collection(&self, name: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(COLLECTIONS)?;
        Ok(table.get(name)?.map(|v| v.value().to_string()))
    }

    pub fn remove_collection(&self, name: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(COLLECTIONS)?;
            table.remove(name)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_collections(&self) -> Result<Vec<(String, String)>> {
        read_all(&self.db, COLLECTIONS)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// All stored settings, sorted by key.
    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        read_all(&self.db, SETTINGS)
    }
}

fn read_all(
    db: &Database,
    definition: TableDefinition<'_, &'static str, &'static str>,
) -> Result<Vec<(String, String)>> {
    let txn = db.begin_read()?;
    let table = txn.open_table(definition)?;
    let mut result = Vec::new();
    for entry in table.iter()? {
        let (k, v) = entry?;
        result.push((k.value().to_string(), v.value().to_string()));
    }
    Ok(result)
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, ConfigDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
        (tmp, db)
    }

    #[test]
    fn collections_crud() {
        let (_tmp, db) = test_db();

        assert_eq!(db.list_collections().unwrap(), vec![]);
        assert_eq!(db.get_collection("notes").unwrap(), None);

        db.set_collection("notes", "Personal notes").unwrap();
        assert_eq!(
            db.get_collection("notes").unwrap(),
            Some("Personal notes".to_string())
        );

        let collections = db.list_collections().unwrap();
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0].0, "notes");

        assert!(db.remove_collection("notes").unwrap());
        assert!(!db.remove_collection("notes").unwrap());
        assert_eq!(db.get_collection("notes").unwrap(), None);
    }

    #[test]
    fn ensure_collection_keeps_description() {
        let (_tmp, db) = test_db();

        assert!(db.ensure_collection("papers").unwrap());
        db.set_collection("papers", "Research papers").unwrap();
        assert!(!db.ensure_collection("papers").unwrap());
        assert_eq!(
            db.get_collection("papers").unwrap(),
            Some("Research papers".to_string())
        );
    }

    #[test]
    fn settings_crud() {
        let (_tmp, db) = test_db();

        assert_eq!(db.get_setting("ollama.embed_model").unwrap(), None);

        db.set_setting("ollama.embed_model", "nomic-embed-text").unwrap();
        db.set_setting("chunking.chunk_size", "30").unwrap();
        assert_eq!(
            db.get_setting("ollama.embed_model").unwrap(),
            Some("nomic-embed-text".to_string())
        );

        let keys: Vec<_> =
            db.list_settings().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["chunking.chunk_size", "ollama.embed_model"]);

        assert!(db.remove_setting("chunking.chunk_size").unwrap());
        assert!(!db.remove_setting("chunking.chunk_size").unwrap());
        assert_eq!(db.list_settings().unwrap().len(), 1);
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.redb");

        {
            let db = ConfigDb::open(&path).unwrap();
            db.set_collection("notes", "").unwrap();
            db.set_setting("search.max_results", "8").unwrap();
        }

        {
            let db = ConfigDb::open(&path).unwrap();
            assert_eq!(db.get_collection("notes").unwrap(), Some(String::new()));
            assert_eq!(
                db.get_setting("search.max_results").unwrap(),
                Some("8".to_string())
            );
        }
    }
}
