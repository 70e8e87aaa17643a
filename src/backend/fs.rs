//! Persistent backend over a [`redb`] database.

use std::{fmt, path::Path};

use redb::{
    backends::InMemoryBackend, Database, ReadOnlyTable, ReadableTable, TableDefinition,
};

use super::{Backend, BatchOp, KvVisitor, ScanOutcome, Snapshot, WriteBatch};
use crate::{BackendError, Result};

const STORE_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("syncdb-v0");

/// A [`Backend`] persisting to a single-file [`redb`] database.
///
/// The whole keyspace lives in one `&[u8] → &[u8]` table. Batches map to
/// write transactions, snapshots to read transactions.
pub struct FsBackend {
    db: Database,
}

impl fmt::Debug for FsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsBackend").finish_non_exhaustive()
    }
}

impl FsBackend {
    /// Create or open the database at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let db = Database::create(path).map_err(BackendError::new)?;
        Self::new_impl(db)
    }

    /// Create a fresh database backed by memory instead of a file.
    pub fn memory() -> Result<Self, BackendError> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(BackendError::new)?;
        Self::new_impl(db)
    }

    fn new_impl(db: Database) -> Result<Self, BackendError> {
        // Make sure the table exists so read transactions can open it.
        let tx = db.begin_write().map_err(BackendError::new)?;
        {
            let _table = tx.open_table(STORE_TABLE).map_err(BackendError::new)?;
        }
        tx.commit().map_err(BackendError::new)?;
        Ok(Self { db })
    }
}

fn scan_table<T>(table: &T, prefix: &[u8], visit: KvVisitor<'_>) -> Result<ScanOutcome>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let range = table.range(prefix..).map_err(BackendError::new)?;
    for item in range {
        let (k, v) = item.map_err(BackendError::new)?;
        let key = k.value();
        if !key.starts_with(prefix) {
            break;
        }
        if !visit(key, v.value())? {
            return Ok(ScanOutcome::Stopped);
        }
    }
    Ok(ScanOutcome::Completed)
}

impl Backend for FsBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        let tx = self.db.begin_read().map_err(BackendError::new)?;
        let table = tx.open_table(STORE_TABLE).map_err(BackendError::new)?;
        let value = table.get(key).map_err(BackendError::new)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        let tx = self.db.begin_write().map_err(BackendError::new)?;
        {
            let mut table = tx.open_table(STORE_TABLE).map_err(BackendError::new)?;
            table.insert(key, value).map_err(BackendError::new)?;
        }
        tx.commit().map_err(BackendError::new)
    }

    fn delete(&self, key: &[u8]) -> Result<(), BackendError> {
        let tx = self.db.begin_write().map_err(BackendError::new)?;
        {
            let mut table = tx.open_table(STORE_TABLE).map_err(BackendError::new)?;
            table.remove(key).map_err(BackendError::new)?;
        }
        tx.commit().map_err(BackendError::new)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), BackendError> {
        let tx = self.db.begin_write().map_err(BackendError::new)?;
        {
            let mut table = tx.open_table(STORE_TABLE).map_err(BackendError::new)?;
            for op in batch.into_ops() {
                match op {
                    BatchOp::Put { key, value } => {
                        table
                            .insert(key.as_slice(), value.as_slice())
                            .map_err(BackendError::new)?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_slice()).map_err(BackendError::new)?;
                    }
                }
            }
        }
        tx.commit().map_err(BackendError::new)
    }

    fn snapshot(&self) -> Result<Box<dyn Snapshot>, BackendError> {
        let tx = self.db.begin_read().map_err(BackendError::new)?;
        let table = tx.open_table(STORE_TABLE).map_err(BackendError::new)?;
        Ok(Box::new(FsSnapshot { table }))
    }

    fn iter_prefix(&self, prefix: &[u8], visit: KvVisitor<'_>) -> Result<ScanOutcome> {
        let tx = self.db.begin_read().map_err(BackendError::new)?;
        let table = tx.open_table(STORE_TABLE).map_err(BackendError::new)?;
        scan_table(&table, prefix, visit)
    }
}

struct FsSnapshot {
    table: ReadOnlyTable<&'static [u8], &'static [u8]>,
}

impl fmt::Debug for FsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsSnapshot").finish_non_exhaustive()
    }
}

impl Snapshot for FsSnapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        let value = self.table.get(key).map_err(BackendError::new)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn iter_prefix(&self, prefix: &[u8], visit: KvVisitor<'_>) -> Result<ScanOutcome> {
        scan_table(&self.table, prefix, visit)
    }
}
