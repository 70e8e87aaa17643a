//! Abstraction over the ordered key-value stores the index can run on.
//!
//! The index only ever sees an opaque, lexicographically ordered
//! byte-key/byte-value namespace with atomic write batches and stable
//! snapshots. [`memory::MemoryBackend`] keeps everything in a `BTreeMap` and
//! is what the tests use; [`fs::FsBackend`] persists to a [`redb`] database.

use std::fmt;

use crate::{BackendError, Result};

#[cfg(feature = "fs-store")]
pub mod fs;
pub mod memory;

/// Visitor passed to prefix scans.
///
/// Called once per `(key, value)` pair in ascending key order. Return
/// `Ok(false)` to stop the scan early; errors abort it and propagate.
pub type KvVisitor<'a> = &'a mut dyn FnMut(&[u8], &[u8]) -> Result<bool>;

/// How a traversal finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The scan visited every matching entry.
    Completed,
    /// The visitor asked to stop early.
    Stopped,
    /// The scan was cancelled via its cancellation token.
    Cancelled,
}

/// An ordered byte-key/byte-value store.
///
/// All writes that must be atomic go through [`Backend::commit`]; point
/// `put`/`delete` exist for callers that need exactly one key changed.
/// Iteration is visitor based so that the backing iterator is released on
/// every exit path.
pub trait Backend: fmt::Debug + Send + Sync + 'static {
    /// Point lookup.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError>;

    /// Store a single key.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), BackendError>;

    /// Delete a single key. Deleting an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), BackendError>;

    /// Atomically apply a batch: either every operation becomes visible or
    /// none does.
    fn commit(&self, batch: WriteBatch) -> Result<(), BackendError>;

    /// Open a stable read-only view. Concurrent writers do not disturb it.
    ///
    /// The view is released when the handle is dropped; holding snapshots
    /// open pins backend resources.
    fn snapshot(&self) -> Result<Box<dyn Snapshot>, BackendError>;

    /// Visit every entry whose key starts with `prefix`, in ascending key
    /// order. An empty prefix visits the whole keyspace.
    fn iter_prefix(&self, prefix: &[u8], visit: KvVisitor<'_>) -> Result<ScanOutcome>;
}

/// A stable read-only view of a [`Backend`] at one point in time.
pub trait Snapshot: fmt::Debug + Send + Sync {
    /// Point lookup within the snapshot.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError>;

    /// Prefix scan within the snapshot, see [`Backend::iter_prefix`].
    fn iter_prefix(&self, prefix: &[u8], visit: KvVisitor<'_>) -> Result<ScanOutcome>;
}

/// A single operation staged in a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Store `key` → `value`.
    Put {
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove `key`.
    Delete {
        /// Key bytes.
        key: Vec<u8>,
    },
}

/// A set of writes applied atomically by [`Backend::commit`].
///
/// Operations are applied in insertion order, so a later `put` wins over an
/// earlier `delete` of the same key.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Stage a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consume the batch, yielding its operations in insertion order.
    pub fn into_ops(self) -> impl Iterator<Item = BatchOp> {
        self.ops.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn test_backend_basics(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
        backend.put(b"a/1", b"one")?;
        backend.put(b"a/2", b"two")?;
        backend.put(b"b/1", b"three")?;

        assert_eq!(backend.get(b"a/1")?.as_deref(), Some(&b"one"[..]));
        assert_eq!(backend.get(b"missing")?, None);

        let mut seen = Vec::new();
        let outcome = backend.iter_prefix(b"a/", &mut |k, v| {
            seen.push((k.to_vec(), v.to_vec()));
            Ok(true)
        })?;
        assert_eq!(outcome, ScanOutcome::Completed);
        assert_eq!(
            seen,
            vec![
                (b"a/1".to_vec(), b"one".to_vec()),
                (b"a/2".to_vec(), b"two".to_vec()),
            ]
        );

        // Early stop.
        let mut count = 0;
        let outcome = backend.iter_prefix(b"", &mut |_, _| {
            count += 1;
            Ok(count < 2)
        })?;
        assert_eq!(outcome, ScanOutcome::Stopped);
        assert_eq!(count, 2);

        // Batches are atomic and ordered.
        let mut batch = WriteBatch::new();
        batch.put(b"c/1".to_vec(), b"x".to_vec());
        batch.delete(b"a/1".to_vec());
        batch.put(b"a/1".to_vec(), b"resurrected".to_vec());
        backend.commit(batch)?;
        assert_eq!(backend.get(b"c/1")?.as_deref(), Some(&b"x"[..]));
        assert_eq!(backend.get(b"a/1")?.as_deref(), Some(&b"resurrected"[..]));

        Ok(())
    }

    fn test_snapshot_isolation(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
        backend.put(b"k", b"before")?;
        let snap = backend.snapshot()?;
        backend.put(b"k", b"after")?;
        backend.put(b"k2", b"new")?;

        assert_eq!(snap.get(b"k")?.as_deref(), Some(&b"before"[..]));
        assert_eq!(snap.get(b"k2")?, None);
        assert_eq!(backend.get(b"k")?.as_deref(), Some(&b"after"[..]));

        let mut keys = Vec::new();
        snap.iter_prefix(b"", &mut |k, _| {
            keys.push(k.to_vec());
            Ok(true)
        })?;
        assert_eq!(keys, vec![b"k".to_vec()]);
        Ok(())
    }

    fn test_dropped_batch_invisible(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(b"ghost".to_vec(), b"boo".to_vec());
        drop(batch);
        assert_eq!(backend.get(b"ghost")?, None);
        Ok(())
    }

    #[test]
    fn test_memory_backend() -> anyhow::Result<()> {
        test_backend_basics(Arc::new(memory::MemoryBackend::new()))?;
        test_snapshot_isolation(Arc::new(memory::MemoryBackend::new()))?;
        test_dropped_batch_invisible(Arc::new(memory::MemoryBackend::new()))?;
        Ok(())
    }

    #[cfg(feature = "fs-store")]
    #[test]
    fn test_fs_backend() -> anyhow::Result<()> {
        test_backend_basics(Arc::new(fs::FsBackend::memory()?))?;
        test_snapshot_isolation(Arc::new(fs::FsBackend::memory()?))?;
        test_dropped_batch_invisible(Arc::new(fs::FsBackend::memory()?))?;
        Ok(())
    }

    #[cfg(feature = "fs-store")]
    #[test]
    fn test_fs_backend_persistent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("index.db");
        {
            let backend = fs::FsBackend::create(&path)?;
            backend.put(b"durable", b"yes")?;
        }
        let backend = fs::FsBackend::create(&path)?;
        assert_eq!(backend.get(b"durable")?.as_deref(), Some(&b"yes"[..]));
        Ok(())
    }
}
