//! Interning of folder and device identifiers to dense `u32` handles.
//!
//! Keys embed a lot of folder and device references; interning them keeps
//! keys at a fixed four bytes per reference instead of a variable-length
//! identifier, which matters for both on-disk size and iterator locality.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    backend::Backend,
    error::{Error, Result},
};

/// A bidirectional, write-through interner over one key-type prefix.
///
/// Handles are assigned in allocation order starting at zero and are never
/// reused, even after logical deletion. The in-memory caches are
/// authoritative; the backend copy exists so the mapping survives restarts.
#[derive(Debug, Clone)]
pub struct SmallIndex {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    backend: Arc<dyn Backend>,
    prefix: u8,
    cache: RwLock<Cache>,
}

#[derive(Debug, Default)]
struct Cache {
    // `None` marks a reserved id whose value was never persisted; such ids
    // are skipped by allocation but never resolved.
    id_to_val: HashMap<u32, Option<Vec<u8>>>,
    val_to_id: HashMap<Vec<u8>, u32>,
    next: u32,
}

impl SmallIndex {
    /// Load the interner for `prefix`, seeding the caches with one prefix
    /// scan.
    pub fn load(backend: Arc<dyn Backend>, prefix: u8) -> Result<Self> {
        let mut cache = Cache::default();
        backend.iter_prefix(&[prefix], &mut |key, value| {
            if key.len() != 5 {
                return Err(Error::corruption(key, "index key must be 5 bytes"));
            }
            let id = u32::from_be_bytes([key[1], key[2], key[3], key[4]]);
            if value.is_empty() {
                cache.id_to_val.insert(id, None);
            } else {
                cache.id_to_val.insert(id, Some(value.to_vec()));
                cache.val_to_id.insert(value.to_vec(), id);
            }
            if id >= cache.next {
                cache.next = id + 1;
            }
            Ok(true)
        })?;
        debug!(
            prefix,
            entries = cache.id_to_val.len(),
            next = cache.next,
            "loaded small index"
        );
        Ok(SmallIndex {
            inner: Arc::new(Inner {
                backend,
                prefix,
                cache: RwLock::new(cache),
            }),
        })
    }

    /// The handle for `val`, allocating and persisting a new one if absent.
    ///
    /// Concurrent calls for the same value return the same handle. The
    /// backend write happens before the cache is updated, so a failed write
    /// leaves no trace and the call can simply be retried.
    pub fn id(&self, val: &[u8]) -> Result<u32> {
        if let Some(id) = self.inner.cache.read().val_to_id.get(val) {
            return Ok(*id);
        }
        let mut cache = self.inner.cache.write();
        // Lost the race to another allocator?
        if let Some(id) = cache.val_to_id.get(val) {
            return Ok(*id);
        }
        let id = cache.next;
        self.inner.backend.put(&self.key_for(id), val)?;
        cache.next = id + 1;
        cache.id_to_val.insert(id, Some(val.to_vec()));
        cache.val_to_id.insert(val.to_vec(), id);
        Ok(id)
    }

    /// Reverse lookup. Returns `None` for unknown and reserved handles.
    pub fn val(&self, id: u32) -> Option<Vec<u8>> {
        self.inner.cache.read().id_to_val.get(&id).cloned().flatten()
    }

    /// Every interned value, sorted.
    pub fn values(&self) -> Vec<Vec<u8>> {
        let cache = self.inner.cache.read();
        let mut values: Vec<Vec<u8>> = cache.val_to_id.keys().cloned().collect();
        values.sort();
        values
    }

    fn key_for(&self, id: u32) -> [u8; 5] {
        let mut key = [0u8; 5];
        key[0] = self.inner.prefix;
        key[1..].copy_from_slice(&id.to_be_bytes());
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::keyer::KeyType;

    #[test]
    fn test_bijection_and_stability() -> anyhow::Result<()> {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let idx = SmallIndex::load(backend.clone(), KeyType::FolderIdx as u8)?;

        let a = idx.id(b"alpha")?;
        let b = idx.id(b"beta")?;
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(idx.id(b"alpha")?, a);
        assert_eq!(idx.val(a).as_deref(), Some(&b"alpha"[..]));
        assert_eq!(idx.val(b).as_deref(), Some(&b"beta"[..]));
        assert_eq!(idx.val(17), None);

        // A reloaded interner sees the same assignments and continues after
        // the highest id.
        let idx2 = SmallIndex::load(backend, KeyType::FolderIdx as u8)?;
        assert_eq!(idx2.id(b"alpha")?, a);
        assert_eq!(idx2.id(b"gamma")?, 2);
        assert_eq!(idx2.values(), vec![b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_reserved_tombstones() -> anyhow::Result<()> {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        // An allocated id whose value was never written: key exists with an
        // empty value.
        let mut key = [0u8; 5];
        key[0] = KeyType::DeviceIdx as u8;
        key[1..].copy_from_slice(&3u32.to_be_bytes());
        backend.put(&key, b"")?;

        let idx = SmallIndex::load(backend, KeyType::DeviceIdx as u8)?;
        // The reserved id resolves to nothing...
        assert_eq!(idx.val(3), None);
        // ...but is never handed out again.
        assert_eq!(idx.id(b"somedevice")?, 4);
        Ok(())
    }
}
