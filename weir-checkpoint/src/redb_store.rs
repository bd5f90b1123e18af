//! `redb`-backed checkpoint store. Pure Rust, single file, durable commits.
//!
//! All records live in one table; the key layout in [`crate::store`] carries
//! the namespacing. Reads tolerate a store that has never been written to
//! (the table does not exist yet).

use std::path::PathBuf;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition, TableError};

use weir_core::{Error, Result};

use crate::store::CheckpointStore;

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("weir_checkpoint");

fn store_err(e: impl std::fmt::Display) -> Error {
    Error::store(e.to_string())
}

/// Embedded checkpoint store over a single redb file.
pub struct RedbStore {
    // compact() needs exclusive access; everything else shares.
    db: RwLock<Database>,
    path: PathBuf,
}

impl RedbStore {
    /// Open or create the store file, creating parent directories as needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(&path)
            .map_err(|e| Error::store(format!("open {}: {e}", path.display())))?;
        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl CheckpointStore for RedbStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_batch(std::slice::from_ref(&(key.to_vec(), value.to_vec())))
    }

    fn put_batch(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        let db = self.db.read();
        let txn = db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(TABLE).map_err(store_err)?;
            for (key, value) in entries {
                table
                    .insert(key.as_slice(), value.as_slice())
                    .map_err(store_err)?;
            }
        }
        txn.commit().map_err(store_err)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let db = self.db.read();
        let txn = db.begin_read().map_err(store_err)?;
        let table = match txn.open_table(TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(store_err(e)),
        };
        Ok(table.get(key).map_err(store_err)?.map(|v| v.value().to_vec()))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let db = self.db.read();
        let txn = db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(TABLE).map_err(store_err)?;
            table.remove(key).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let db = self.db.read();
        let txn = db.begin_read().map_err(store_err)?;
        let table = match txn.open_table(TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(store_err(e)),
        };
        let mut out = Vec::new();
        for item in table.range(prefix..).map_err(store_err)? {
            let (key, value) = item.map_err(store_err)?;
            if !key.value().starts_with(prefix) {
                break;
            }
            out.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(out)
    }

    fn delete_prefix(&self, prefix: &[u8]) -> Result<u64> {
        let keys: Vec<Vec<u8>> = self
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }
        let db = self.db.read();
        let txn = db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(TABLE).map_err(store_err)?;
            for key in &keys {
                table.remove(key.as_slice()).map_err(store_err)?;
            }
        }
        txn.commit().map_err(store_err)?;
        Ok(keys.len() as u64)
    }

    fn compact(&self) -> Result<()> {
        let mut db = self.db.write();
        db.compact().map_err(store_err)?;
        Ok(())
    }

    fn size_on_disk(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}
