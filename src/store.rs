//! The lowlevel store: backend, interners, schema version, and whole-store
//! maintenance.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    backend::{Backend, ScanOutcome, WriteBatch},
    error::{Error, Result},
    fileset::FileSet,
    keyer::{
        read_u32, KeyType, Keyer, KEY_DEVICE_LEN, KEY_FOLDER_LEN, KEY_HASH_LEN, KEY_PREFIX_LEN,
    },
    model::{
        decode, BlockList, CountsSet, DeviceId, FileInfo, IndexId, VersionList, VirtualMtime,
    },
    smallindex::SmallIndex,
};

pub(crate) mod migrations;

/// The index database over one backend.
///
/// Cheap to clone; all clones share the backend, the interners, and the
/// per-folder update locks.
#[derive(Debug, Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

#[derive(Debug)]
pub(crate) struct StoreInner {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) folder_idx: SmallIndex,
    pub(crate) device_idx: SmallIndex,
    pub(crate) keyer: Keyer,
    pub(crate) local_device: u32,
    update_locks: Mutex<HashMap<u32, Arc<Mutex<()>>>>,
}

impl Store {
    /// Open the store: seed the interners, check the schema version, run any
    /// pending migrations, and sweep orphaned block lists.
    pub fn open(backend: Arc<dyn Backend>) -> Result<Store> {
        let folder_idx = SmallIndex::load(backend.clone(), KeyType::FolderIdx as u8)?;
        let device_idx = SmallIndex::load(backend.clone(), KeyType::DeviceIdx as u8)?;
        let keyer = Keyer::new(folder_idx.clone(), device_idx.clone());
        let local_device = device_idx.id(DeviceId::LOCAL.as_bytes())?;

        let store = Store {
            inner: Arc::new(StoreInner {
                backend,
                folder_idx,
                device_idx,
                keyer,
                local_device,
                update_locks: Mutex::new(HashMap::new()),
            }),
        };

        migrations::run(&store)?;

        let swept = store.gc_block_lists()?;
        if swept > 0 {
            debug!(swept, "pruned orphaned block lists");
        }

        info!("index database open");
        Ok(store)
    }

    /// Release the store. Remaining clones and snapshots stay usable; the
    /// backend closes when the last reference drops.
    pub fn close(self) {
        debug!("index database closed");
    }

    /// The key schema layer.
    pub fn keyer(&self) -> &Keyer {
        &self.inner.keyer
    }

    /// A per-folder view of the store. Cheap; state lives in the database.
    pub fn fileset(&self, folder: &str) -> Result<FileSet> {
        FileSet::new(self.clone(), folder)
    }

    /// Every folder the store has records for.
    pub fn list_folders(&self) -> Vec<String> {
        self.inner
            .folder_idx
            .values()
            .into_iter()
            .map(|v| String::from_utf8_lossy(&v).into_owned())
            .collect()
    }

    pub(crate) fn update_lock(&self, folder: u32) -> Arc<Mutex<()>> {
        self.inner
            .update_locks
            .lock()
            .entry(folder)
            .or_default()
            .clone()
    }

    /// Remove every record of `folder`: file lists, version lists, block
    /// refs, mtimes, needs, sequences, counters, and index IDs, in one
    /// batch. The interned folder handle survives so it is never reused.
    pub fn drop_folder(&self, folder: &str) -> Result<()> {
        let folder_id = self.inner.folder_idx.id(folder.as_bytes())?;
        let lock = self.update_lock(folder_id);
        let _guard = lock.lock();

        let mut batch = WriteBatch::new();
        for kind in [
            KeyType::Device,
            KeyType::Global,
            KeyType::Block,
            KeyType::VirtualMtime,
            KeyType::FolderMeta,
            KeyType::Sequence,
            KeyType::Need,
        ] {
            let mut prefix = vec![kind as u8];
            prefix.extend_from_slice(&folder_id.to_be_bytes());
            self.inner.backend.iter_prefix(&prefix, &mut |key, _| {
                batch.delete(key.to_vec());
                Ok(true)
            })?;
        }
        // Index IDs key by device first, so filter the whole type.
        self.inner
            .backend
            .iter_prefix(&[KeyType::IndexId as u8], &mut |key, _| {
                if read_u32(key, KEY_PREFIX_LEN + KEY_DEVICE_LEN) == Some(folder_id) {
                    batch.delete(key.to_vec());
                }
                Ok(true)
            })?;

        let dropped = batch.len();
        self.inner.backend.commit(batch)?;
        info!(folder, dropped, "dropped folder");
        Ok(())
    }

    /// Delete block lists no local record references anymore.
    ///
    /// Block lists are not refcounted; this sweep is the pruning mechanism.
    /// It runs on open and may be called at any quiescent point. Returns the
    /// number of lists removed.
    pub fn gc_block_lists(&self) -> Result<usize> {
        let local = self.inner.local_device;
        let mut live: HashSet<Vec<u8>> = HashSet::new();
        self.inner
            .backend
            .iter_prefix(&[KeyType::Device as u8], &mut |key, value| {
                let device = read_u32(key, KEY_PREFIX_LEN + KEY_FOLDER_LEN);
                if device == Some(local) {
                    let file: FileInfo = decode(key, value)?;
                    if !file.blocks_hash.is_empty() {
                        live.insert(file.blocks_hash);
                    }
                }
                Ok(true)
            })?;

        let mut batch = WriteBatch::new();
        self.inner
            .backend
            .iter_prefix(&[KeyType::BlockList as u8], &mut |key, _| {
                if !live.contains(&key[KEY_PREFIX_LEN..]) {
                    batch.delete(key.to_vec());
                }
                Ok(true)
            })?;

        let swept = batch.len();
        if swept > 0 {
            self.inner.backend.commit(batch)?;
        }
        Ok(swept)
    }

    /// The free-form miscellaneous namespace.
    pub fn misc_kv(&self) -> NamespacedKv {
        NamespacedKv::new(self.inner.backend.clone(), vec![KeyType::Misc as u8])
    }

    /// The statistics namespace for one device.
    pub fn device_stats_kv(&self, device: &DeviceId) -> NamespacedKv {
        let mut prefix = vec![KeyType::DeviceStat as u8];
        prefix.extend_from_slice(hex::encode(device.as_bytes()).as_bytes());
        NamespacedKv::new(self.inner.backend.clone(), prefix)
    }

    /// The statistics namespace for one folder.
    pub fn folder_stats_kv(&self, folder: &str) -> NamespacedKv {
        let mut prefix = vec![KeyType::FolderStat as u8];
        prefix.extend_from_slice(folder.as_bytes());
        NamespacedKv::new(self.inner.backend.clone(), prefix)
    }

    /// Walk the whole keyspace, yielding one parsed entry per record.
    ///
    /// This is the hook the database inspector renders from; the entries
    /// carry enough schema metadata to format every key kind.
    pub fn dump(&self, mut visit: impl FnMut(DumpEntry) -> bool) -> Result<ScanOutcome> {
        self.inner.backend.iter_prefix(&[], &mut |key, value| {
            let entry = parse_entry(key, value)?;
            Ok(visit(entry))
        })
    }
}

/// One parsed database record, as yielded by [`Store::dump`].
#[derive(Debug)]
pub enum DumpEntry {
    /// A device file record.
    Device {
        /// Folder handle.
        folder: u32,
        /// Device handle.
        device: u32,
        /// File name bytes.
        name: Vec<u8>,
        /// The record.
        file: FileInfo,
    },
    /// A version list.
    Global {
        /// Folder handle.
        folder: u32,
        /// File name bytes.
        name: Vec<u8>,
        /// The list, winners first.
        versions: VersionList,
    },
    /// A block reference.
    Block {
        /// Folder handle.
        folder: u32,
        /// Block hash.
        hash: Vec<u8>,
        /// File name bytes.
        name: Vec<u8>,
        /// Index of the block within the file.
        index: u32,
    },
    /// Free-form device statistics.
    DeviceStat {
        /// Key suffix.
        key: Vec<u8>,
        /// Raw value.
        value: Vec<u8>,
    },
    /// Free-form folder statistics.
    FolderStat {
        /// Key suffix.
        key: Vec<u8>,
        /// Raw value.
        value: Vec<u8>,
    },
    /// A virtual mtime pair.
    Mtime {
        /// Folder handle.
        folder: u32,
        /// File name bytes.
        name: Vec<u8>,
        /// The stored pair.
        mtime: VirtualMtime,
    },
    /// A folder interner entry.
    FolderIdx {
        /// The handle.
        id: u32,
        /// The folder identifier.
        folder: Vec<u8>,
    },
    /// A device interner entry. `device` is `None` for reserved handles
    /// whose identifier was never written.
    DeviceIdx {
        /// The handle.
        id: u32,
        /// The device identifier, if resolved.
        device: Option<Vec<u8>>,
    },
    /// An index-ID entry.
    IndexId {
        /// Device handle.
        device: u32,
        /// Folder handle.
        folder: u32,
        /// The stored ID.
        id: IndexId,
    },
    /// A folder's counter rows.
    FolderMeta {
        /// Folder handle.
        folder: u32,
        /// The rows.
        counts: CountsSet,
    },
    /// A miscellaneous entry.
    Misc {
        /// Key suffix.
        key: Vec<u8>,
        /// Raw value.
        value: Vec<u8>,
    },
    /// A sequence index entry.
    Sequence {
        /// Folder handle.
        folder: u32,
        /// The sequence number.
        sequence: i64,
        /// The device file key the entry points at.
        key: Vec<u8>,
    },
    /// A need marker.
    Need {
        /// Folder handle.
        folder: u32,
        /// File name bytes.
        name: Vec<u8>,
    },
    /// A stored block list.
    BlockList {
        /// The list hash.
        hash: Vec<u8>,
        /// The blocks.
        blocks: BlockList,
    },
    /// A key this schema does not know.
    Unknown {
        /// Raw key.
        key: Vec<u8>,
        /// Raw value.
        value: Vec<u8>,
    },
}

fn unknown(key: &[u8], value: &[u8]) -> DumpEntry {
    DumpEntry::Unknown {
        key: key.to_vec(),
        value: value.to_vec(),
    }
}

fn parse_entry(key: &[u8], value: &[u8]) -> Result<DumpEntry> {
    let Some(kind) = key.first().copied().and_then(KeyType::from_byte) else {
        return Ok(unknown(key, value));
    };
    let entry = match kind {
        KeyType::Device => {
            let (Some(folder), Some(device)) =
                (read_u32(key, KEY_PREFIX_LEN), read_u32(key, KEY_PREFIX_LEN + KEY_FOLDER_LEN))
            else {
                return Ok(unknown(key, value));
            };
            DumpEntry::Device {
                folder,
                device,
                name: key[KEY_PREFIX_LEN + KEY_FOLDER_LEN + KEY_DEVICE_LEN..].to_vec(),
                file: decode(key, value)?,
            }
        }
        KeyType::Global => {
            let Some(folder) = read_u32(key, KEY_PREFIX_LEN) else {
                return Ok(unknown(key, value));
            };
            DumpEntry::Global {
                folder,
                name: key[KEY_PREFIX_LEN + KEY_FOLDER_LEN..].to_vec(),
                versions: decode(key, value)?,
            }
        }
        KeyType::Block => {
            let fixed = KEY_PREFIX_LEN + KEY_FOLDER_LEN + KEY_HASH_LEN;
            let (Some(folder), true) = (read_u32(key, KEY_PREFIX_LEN), key.len() >= fixed) else {
                return Ok(unknown(key, value));
            };
            let index: [u8; 4] = value
                .try_into()
                .map_err(|_| Error::corruption(key, "block index must be 4 bytes"))?;
            DumpEntry::Block {
                folder,
                hash: key[KEY_PREFIX_LEN + KEY_FOLDER_LEN..fixed].to_vec(),
                name: key[fixed..].to_vec(),
                index: u32::from_be_bytes(index),
            }
        }
        KeyType::DeviceStat => DumpEntry::DeviceStat {
            key: key[KEY_PREFIX_LEN..].to_vec(),
            value: value.to_vec(),
        },
        KeyType::FolderStat => DumpEntry::FolderStat {
            key: key[KEY_PREFIX_LEN..].to_vec(),
            value: value.to_vec(),
        },
        KeyType::VirtualMtime => {
            let Some(folder) = read_u32(key, KEY_PREFIX_LEN) else {
                return Ok(unknown(key, value));
            };
            let mtime = VirtualMtime::from_bytes(value)
                .ok_or_else(|| Error::corruption(key, "mtime value must be 24 bytes"))?;
            DumpEntry::Mtime {
                folder,
                name: key[KEY_PREFIX_LEN + KEY_FOLDER_LEN..].to_vec(),
                mtime,
            }
        }
        KeyType::FolderIdx => {
            let Some(id) = read_u32(key, KEY_PREFIX_LEN) else {
                return Ok(unknown(key, value));
            };
            DumpEntry::FolderIdx {
                id,
                folder: value.to_vec(),
            }
        }
        KeyType::DeviceIdx => {
            let Some(id) = read_u32(key, KEY_PREFIX_LEN) else {
                return Ok(unknown(key, value));
            };
            DumpEntry::DeviceIdx {
                id,
                device: (!value.is_empty()).then(|| value.to_vec()),
            }
        }
        KeyType::IndexId => {
            let (Some(device), Some(folder)) =
                (read_u32(key, KEY_PREFIX_LEN), read_u32(key, KEY_PREFIX_LEN + KEY_DEVICE_LEN))
            else {
                return Ok(unknown(key, value));
            };
            let id = IndexId::from_slice(value)
                .ok_or_else(|| Error::corruption(key, "index id must be 8 bytes"))?;
            DumpEntry::IndexId { device, folder, id }
        }
        KeyType::FolderMeta => {
            let Some(folder) = read_u32(key, KEY_PREFIX_LEN) else {
                return Ok(unknown(key, value));
            };
            DumpEntry::FolderMeta {
                folder,
                counts: decode(key, value)?,
            }
        }
        KeyType::Misc => DumpEntry::Misc {
            key: key[KEY_PREFIX_LEN..].to_vec(),
            value: value.to_vec(),
        },
        KeyType::Sequence => {
            let Some(folder) = read_u32(key, KEY_PREFIX_LEN) else {
                return Ok(unknown(key, value));
            };
            let start = KEY_PREFIX_LEN + KEY_FOLDER_LEN;
            let Some(bytes) = key.get(start..start + 8) else {
                return Ok(unknown(key, value));
            };
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            DumpEntry::Sequence {
                folder,
                sequence: u64::from_be_bytes(buf) as i64,
                key: value.to_vec(),
            }
        }
        KeyType::Need => {
            let Some(folder) = read_u32(key, KEY_PREFIX_LEN) else {
                return Ok(unknown(key, value));
            };
            DumpEntry::Need {
                folder,
                name: key[KEY_PREFIX_LEN + KEY_FOLDER_LEN..].to_vec(),
            }
        }
        KeyType::BlockList => DumpEntry::BlockList {
            hash: key[KEY_PREFIX_LEN..].to_vec(),
            blocks: decode(key, value)?,
        },
    };
    Ok(entry)
}

/// A prefixed view of the backend for free-form values: statistics and
/// miscellaneous data.
#[derive(Debug, Clone)]
pub struct NamespacedKv {
    backend: Arc<dyn Backend>,
    prefix: Vec<u8>,
}

impl NamespacedKv {
    fn new(backend: Arc<dyn Backend>, prefix: Vec<u8>) -> Self {
        NamespacedKv { backend, prefix }
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = self.prefix.clone();
        full.extend_from_slice(key);
        full
    }

    /// Store raw bytes under `key`.
    pub fn put_bytes(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Ok(self.backend.put(&self.full_key(key), value)?)
    }

    /// Fetch raw bytes under `key`.
    pub fn get_bytes(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.backend.get(&self.full_key(key))?)
    }

    /// Remove `key`.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        Ok(self.backend.delete(&self.full_key(key))?)
    }

    /// Store a big-endian `u64` under `key`.
    pub fn put_u64(&self, key: &[u8], value: u64) -> Result<()> {
        self.put_bytes(key, &value.to_be_bytes())
    }

    /// Fetch a big-endian `u64` under `key`.
    pub fn get_u64(&self, key: &[u8]) -> Result<Option<u64>> {
        match self.get_bytes(key)? {
            None => Ok(None),
            Some(value) => {
                let bytes: [u8; 8] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::corruption(&self.full_key(key), "u64 must be 8 bytes"))?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
        }
    }

    /// Store a string under `key`.
    pub fn put_string(&self, key: &[u8], value: &str) -> Result<()> {
        self.put_bytes(key, value.as_bytes())
    }

    /// Fetch a string under `key`.
    pub fn get_string(&self, key: &[u8]) -> Result<Option<String>> {
        match self.get_bytes(key)? {
            None => Ok(None),
            Some(value) => String::from_utf8(value)
                .map(Some)
                .map_err(|_| Error::corruption(&self.full_key(key), "invalid utf-8")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;

    fn open_memory() -> Store {
        Store::open(Arc::new(MemoryBackend::new())).unwrap()
    }

    #[test]
    fn test_open_fresh() {
        let store = open_memory();
        assert!(store.list_folders().is_empty());
    }

    #[test]
    fn test_reopen_keeps_version() -> anyhow::Result<()> {
        let backend = Arc::new(MemoryBackend::new());
        let store = Store::open(backend.clone())?;
        store.close();
        let _store = Store::open(backend)?;
        Ok(())
    }

    #[test]
    fn test_schema_mismatch() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let mut key = vec![KeyType::Misc as u8];
        key.extend_from_slice(b"dbVersion");
        backend.put(&key, &u64::MAX.to_be_bytes()).unwrap();

        let err = Store::open(backend).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }

    #[test]
    fn test_namespaced_kv() -> anyhow::Result<()> {
        let store = open_memory();
        let misc = store.misc_kv();
        misc.put_string(b"greeting", "hello")?;
        misc.put_u64(b"count", 42)?;
        assert_eq!(misc.get_string(b"greeting")?.as_deref(), Some("hello"));
        assert_eq!(misc.get_u64(b"count")?, Some(42));
        assert_eq!(misc.get_u64(b"missing")?, None);
        misc.delete(b"count")?;
        assert_eq!(misc.get_u64(b"count")?, None);

        // Stats namespaces do not collide with misc.
        let stats = store.folder_stats_kv("default");
        stats.put_u64(b"count", 7)?;
        assert_eq!(misc.get_u64(b"count")?, None);
        assert_eq!(stats.get_u64(b"count")?, Some(7));

        let dstats = store.device_stats_kv(&DeviceId::new([1; 32]));
        dstats.put_string(b"lastSeen", "never")?;
        assert_eq!(dstats.get_string(b"lastSeen")?.as_deref(), Some("never"));
        Ok(())
    }
}
