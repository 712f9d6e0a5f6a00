use std::fmt::Display;
use std::fs;
use std::path::Path;

use lnsync_core::store::{KvStore, StoreError};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::*;

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// The database file name inside the store directory
pub const DB_FILE: &str = "redb";

/// An iterator over a RedbKvStore range
pub struct Iter(std::vec::IntoIter<(String, Vec<u8>)>);

impl Iterator for Iter {
    type Item = (String, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}

/// A key-value store backed by redb
pub struct RedbKvStore {
    db: Database,
}

fn unavailable(e: impl Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn internal(e: impl Display) -> StoreError {
    StoreError::Internal(e.to_string())
}

impl RedbKvStore {
    /// Open or create the store in the directory `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path).map_err(unavailable)?;
        }
        if !path.is_dir() {
            return Err(StoreError::Unavailable(format!("{} is not a directory", path.display())));
        }
        let db = Database::create(path.join(DB_FILE)).map_err(unavailable)?;
        {
            // create the table if it doesn't exist
            let tx = db.begin_write().map_err(unavailable)?;
            tx.open_table(TABLE).map_err(internal)?;
            tx.commit().map_err(unavailable)?;
        }
        info!("opened graph store at {}", path.display());
        Ok(Self { db })
    }
}

impl KvStore for RedbKvStore {
    type Iter = Iter;

    #[instrument(skip(self, value))]
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        // skip the write transaction if nothing changes
        if self.get(key)?.as_deref() == Some(value) {
            return Ok(());
        }
        let tx = self.db.begin_write().map_err(unavailable)?;
        {
            let mut table = tx.open_table(TABLE).map_err(internal)?;
            table.insert(key, value).map_err(internal)?;
        }
        tx.commit().map_err(unavailable)?;
        Ok(())
    }

    #[instrument(
        skip(self),
        fields(
            key = key,
        )
    )]
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let tx = self.db.begin_read().map_err(unavailable)?;
        let table = tx.open_table(TABLE).map_err(internal)?;
        let result = table.get(key).map_err(internal)?;
        Ok(result.map(|value| value.value().to_vec()))
    }

    fn get_prefix(&self, prefix: &str) -> Result<Self::Iter, StoreError> {
        let tx = self.db.begin_read().map_err(unavailable)?;
        let table = tx.open_table(TABLE).map_err(internal)?;
        let mut result = Vec::new();
        for item in table.range(prefix..).map_err(internal)? {
            let (key, value) = item.map_err(internal)?;
            if key.value().starts_with(prefix) {
                result.push((key.value().to_string(), value.value().to_vec()));
            } else {
                break;
            }
        }
        Ok(Iter(result.into_iter()))
    }

    #[instrument(skip(self))]
    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let tx = self.db.begin_write().map_err(unavailable)?;
        {
            let mut table = tx.open_table(TABLE).map_err(internal)?;
            table.remove(key).map_err(internal)?;
        }
        tx.commit().map_err(unavailable)?;
        Ok(())
    }
}
