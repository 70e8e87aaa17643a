//! In-memory backend, for tests and ephemeral stores.

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::Arc,
};

use parking_lot::RwLock;

use super::{Backend, BatchOp, KvVisitor, ScanOutcome, Snapshot, WriteBatch};
use crate::{BackendError, Result};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// A [`Backend`] over a `BTreeMap`.
///
/// Snapshots clone the map, which is fine at test scale and gives exact
/// point-in-time semantics. Prefix scans copy the matching range before
/// visiting so the visitor may freely re-enter the backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    map: Arc<RwLock<Map>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

fn prefix_range(map: &Map, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    map.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn visit_pairs(pairs: &[(Vec<u8>, Vec<u8>)], visit: KvVisitor<'_>) -> Result<ScanOutcome> {
    for (k, v) in pairs {
        if !visit(k.as_slice(), v.as_slice())? {
            return Ok(ScanOutcome::Stopped);
        }
    }
    Ok(ScanOutcome::Completed)
}

impl Backend for MemoryBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), BackendError> {
        self.map.write().remove(key);
        Ok(())
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), BackendError> {
        let mut map = self.map.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<Box<dyn Snapshot>, BackendError> {
        Ok(Box::new(MemorySnapshot {
            map: self.map.read().clone(),
        }))
    }

    fn iter_prefix(&self, prefix: &[u8], visit: KvVisitor<'_>) -> Result<ScanOutcome> {
        let pairs = prefix_range(&self.map.read(), prefix);
        visit_pairs(&pairs, visit)
    }
}

#[derive(Debug)]
struct MemorySnapshot {
    map: Map,
}

impl Snapshot for MemorySnapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.map.get(key).cloned())
    }

    fn iter_prefix(&self, prefix: &[u8], visit: KvVisitor<'_>) -> Result<ScanOutcome> {
        for (k, v) in self
            .map
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
        {
            if !k.starts_with(prefix) {
                break;
            }
            if !visit(k.as_slice(), v.as_slice())? {
                return Ok(ScanOutcome::Stopped);
            }
        }
        Ok(ScanOutcome::Completed)
    }
}
