//! The per-folder façade: transactional updates and snapshot reads.
//!
//! Every update method stages all of its cross-index effects — device
//! records, version lists, block refs, need markers, sequence keys, counter
//! rows — into a single batch and commits it atomically. Reads go through
//! [`Snapshot`], a stable view of the backend taken at one point in time.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    backend::{self, Backend, KvVisitor, ScanOutcome, WriteBatch},
    error::{Error, Result},
    keyer::{
        read_u32, BlockListKey, BlockMapKey, DeviceFileKey, FolderMetaKey, GlobalVersionKey,
        Keyer, MtimeKey, NeedFileKey, SequenceKey, KEY_DEVICE_LEN, KEY_FOLDER_LEN, KEY_HASH_LEN,
        KEY_PREFIX_LEN,
    },
    model::{
        blocks_hash, decode, encode, BlockList, Counts, CountsSet, DeviceId, FileInfo,
        FileVersion, IndexId, VersionList, VirtualMtime, GLOBAL_HANDLE, NEED_HANDLE,
    },
    store::Store,
};

/// Read access that is either the live backend or a snapshot.
pub(crate) enum ReaderRef<'a> {
    Backend(&'a dyn Backend),
    Snapshot(&'a dyn backend::Snapshot),
}

impl ReaderRef<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self {
            ReaderRef::Backend(b) => Ok(b.get(key)?),
            ReaderRef::Snapshot(s) => Ok(s.get(key)?),
        }
    }

    fn iter_prefix(&self, prefix: &[u8], visit: KvVisitor<'_>) -> Result<ScanOutcome> {
        match self {
            ReaderRef::Backend(b) => b.iter_prefix(prefix, visit),
            ReaderRef::Snapshot(s) => s.iter_prefix(prefix, visit),
        }
    }
}

fn load_file(
    reader: &ReaderRef<'_>,
    folder: u32,
    device: u32,
    name: &[u8],
) -> Result<Option<FileInfo>> {
    let key = DeviceFileKey::from_parts(folder, device, name);
    match reader.get(key.as_ref())? {
        Some(value) => Ok(Some(decode(key.as_ref(), &value)?)),
        None => Ok(None),
    }
}

/// A per-folder view of the index.
///
/// Cheap to create and clone; all state lives in the database. Updates to
/// one folder are serialized by a folder-scoped lock shared by every handle;
/// different folders update in parallel.
#[derive(Debug, Clone)]
pub struct FileSet {
    store: Store,
    folder: String,
    folder_id: u32,
    update_lock: Arc<Mutex<()>>,
}

impl FileSet {
    pub(crate) fn new(store: Store, folder: &str) -> Result<FileSet> {
        let folder_id = store.inner.folder_idx.id(folder.as_bytes())?;
        let update_lock = store.update_lock(folder_id);
        Ok(FileSet {
            store,
            folder: folder.to_string(),
            folder_id,
            update_lock,
        })
    }

    /// The folder this view is scoped to.
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Apply local scan results: records attributed to the local device.
    ///
    /// Assigns fresh sequence numbers and maintains the sequence index, the
    /// block map, and the stored block lists along with the shared
    /// version-list, need, and counter state. Records identical to what is
    /// already stored are skipped.
    pub fn update(&self, files: Vec<FileInfo>) -> Result<()> {
        self.update_device(self.store.inner.local_device, true, files)
    }

    /// Apply index data received from a remote device.
    ///
    /// Sequence numbers are taken as announced and tracked as that device's
    /// high-water mark; blocks and the sequence index are untouched.
    pub fn update_remote(&self, device: &DeviceId, files: Vec<FileInfo>) -> Result<()> {
        if *device == DeviceId::LOCAL {
            return self.update(files);
        }
        let handle = self.store.inner.keyer.device_handle(device)?;
        self.update_device(handle, false, files)
    }

    fn update_device(&self, device: u32, local: bool, mut files: Vec<FileInfo>) -> Result<()> {
        let lock = self.update_lock.clone();
        let _guard = lock.lock();
        let backend = self.store.inner.backend.clone();
        let reader = ReaderRef::Backend(backend.as_ref());
        let local_handle = self.store.inner.local_device;

        let mut meta = self.load_meta(&reader)?;
        let mut batch = WriteBatch::new();

        for file in &mut files {
            let name = file.name.clone().into_bytes();
            let dk = DeviceFileKey::from_parts(self.folder_id, device, &name);
            let old: Option<FileInfo> = match backend.get(dk.as_ref())? {
                Some(value) => Some(decode(dk.as_ref(), &value)?),
                None => None,
            };

            if let Some(old) = &old {
                if old.version == file.version
                    && old.invalid == file.invalid
                    && old.local_flags == file.local_flags
                    && old.deleted == file.deleted
                    && old.blocks_hash == file.blocks_hash
                {
                    continue;
                }
            }

            if local {
                if file.blocks.is_empty() {
                    file.blocks_hash.clear();
                } else if file.blocks_hash.is_empty() {
                    file.blocks_hash = blocks_hash(&file.blocks);
                }

                let sequence = meta.sequence(local_handle) + 1;
                file.sequence = sequence;
                meta.set_sequence(local_handle, sequence);
                if let Some(old) = &old {
                    if old.sequence > 0 {
                        batch.delete(
                            SequenceKey::from_parts(self.folder_id, old.sequence).as_ref(),
                        );
                    }
                }
                batch.put(
                    SequenceKey::from_parts(self.folder_id, sequence).as_ref(),
                    dk.as_ref(),
                );

                let old_hash = old.as_ref().map(|o| o.blocks_hash.as_slice()).unwrap_or(&[]);
                if old_hash != file.blocks_hash.as_slice() {
                    if let Some(old) = &old {
                        for block in &old.blocks {
                            batch.delete(
                                BlockMapKey::from_parts(self.folder_id, &block.hash, &name)
                                    .as_ref(),
                            );
                        }
                    }
                    for (index, block) in file.blocks.iter().enumerate() {
                        batch.put(
                            BlockMapKey::from_parts(self.folder_id, &block.hash, &name).as_ref(),
                            (index as u32).to_be_bytes().to_vec(),
                        );
                    }
                    if !file.blocks.is_empty() {
                        batch.put(
                            BlockListKey::from_parts(&file.blocks_hash).as_ref(),
                            encode(&BlockList {
                                blocks: file.blocks.clone(),
                            })?,
                        );
                    }
                }
            } else {
                meta.note_sequence(device, file.sequence);
            }

            batch.put(dk.as_ref(), encode(&*file)?);

            if let Some(old) = &old {
                meta.remove_file(device, old);
            }
            meta.add_file(device, file);

            self.update_global(&reader, &mut batch, &mut meta, device, &name, Some(file), old.as_ref())?;
        }

        batch.put(
            FolderMetaKey::from_parts(self.folder_id).as_ref(),
            encode(&meta)?,
        );
        backend.commit(batch)?;
        debug!(
            folder = %self.folder,
            records = files.len(),
            local,
            "applied index update"
        );
        Ok(())
    }

    /// Maintain the version list, need marker, and global/need counter rows
    /// for one name. `new_file` is `None` when the device's entry is being
    /// retracted.
    #[allow(clippy::too_many_arguments)]
    fn update_global(
        &self,
        reader: &ReaderRef<'_>,
        batch: &mut WriteBatch,
        meta: &mut CountsSet,
        device: u32,
        name: &[u8],
        new_file: Option<&FileInfo>,
        old_file: Option<&FileInfo>,
    ) -> Result<()> {
        let local_handle = self.store.inner.local_device;
        let gk = GlobalVersionKey::from_parts(self.folder_id, name);
        let mut list: VersionList = match reader.get(gk.as_ref())? {
            Some(value) => decode(gk.as_ref(), &value)?,
            None => VersionList::default(),
        };

        let old_winner = list.global().cloned();
        list.pop_device(device);
        if let Some(file) = new_file {
            list.insert_ordered(FileVersion {
                device,
                version: file.version.clone(),
                invalid: file.is_invalid(),
                deleted: file.deleted,
            });
        }
        let new_winner = list.global().cloned();

        if list.is_empty() {
            batch.delete(gk.as_ref());
        } else {
            batch.put(gk.as_ref(), encode(&list)?);
        }

        // The records behind the winners, for the counter rows. The updated
        // device's own record must come from the call, not the backend, so
        // the pre- and post-update states are seen as such.
        let old_winner_file = match &old_winner {
            None => None,
            Some(w) if w.device == device => old_file.cloned(),
            Some(w) => load_file(reader, self.folder_id, w.device, name)?,
        };
        let new_winner_file = match &new_winner {
            None => None,
            Some(w) if w.device == device => new_file.cloned(),
            Some(w) => load_file(reader, self.folder_id, w.device, name)?,
        };
        if old_winner.is_some() && old_winner_file.is_none()
            || new_winner.is_some() && new_winner_file.is_none()
        {
            warn!(
                folder = %self.folder,
                name = %String::from_utf8_lossy(name),
                "version list references a missing device record"
            );
        }

        if let Some(file) = &old_winner_file {
            meta.remove_file(GLOBAL_HANDLE, file);
        }
        if let Some(file) = &new_winner_file {
            meta.add_file(GLOBAL_HANDLE, file);
        }

        // Need state: marker presence and the need counter row both follow
        // the winner election.
        let nk = NeedFileKey::from_parts(self.folder_id, name);
        let had_need = reader.get(nk.as_ref())?.is_some();
        let local_entry = list.get(local_handle);
        let have = local_entry.is_some();
        let have_version = local_entry.map(|e| e.version.clone()).unwrap_or_default();
        let needs = new_winner
            .as_ref()
            .map(|w| w.needed_by(have, &have_version))
            .unwrap_or(false);

        if had_need {
            if let Some(file) = &old_winner_file {
                meta.remove_file(NEED_HANDLE, file);
            }
        }
        if needs {
            if let Some(file) = &new_winner_file {
                meta.add_file(NEED_HANDLE, file);
            }
        }
        if needs && !had_need {
            batch.put(nk.as_ref(), Vec::new());
        } else if !needs && had_need {
            batch.delete(nk.as_ref());
        }

        Ok(())
    }

    /// Forget every record announced by `device` for this folder and
    /// re-elect globals and needs accordingly. Works for the local device
    /// too, in which case block refs and sequence keys go with the records.
    pub fn drop_device(&self, device: &DeviceId) -> Result<()> {
        let device_handle = self.store.inner.keyer.device_handle(device)?;
        let local = device_handle == self.store.inner.local_device;
        let lock = self.update_lock.clone();
        let _guard = lock.lock();
        let backend = self.store.inner.backend.clone();
        let reader = ReaderRef::Backend(backend.as_ref());

        let mut meta = self.load_meta(&reader)?;
        let mut batch = WriteBatch::new();

        let prefix = DeviceFileKey::from_parts(self.folder_id, device_handle, b"");
        let fixed = KEY_PREFIX_LEN + KEY_FOLDER_LEN + KEY_DEVICE_LEN;
        let mut records: Vec<(Vec<u8>, FileInfo)> = Vec::new();
        backend.iter_prefix(prefix.as_ref(), &mut |key, value| {
            records.push((key[fixed..].to_vec(), decode(key, value)?));
            Ok(true)
        })?;

        for (name, file) in &records {
            batch.delete(DeviceFileKey::from_parts(self.folder_id, device_handle, name).as_ref());
            if local {
                if file.sequence > 0 {
                    batch.delete(SequenceKey::from_parts(self.folder_id, file.sequence).as_ref());
                }
                for block in &file.blocks {
                    batch.delete(
                        BlockMapKey::from_parts(self.folder_id, &block.hash, name).as_ref(),
                    );
                }
            }
            self.update_global(&reader, &mut batch, &mut meta, device_handle, name, None, Some(file))?;
        }

        batch.delete(
            self.store
                .inner
                .keyer
                .index_id_key(device, self.folder.as_bytes())?
                .as_ref(),
        );
        meta.reset_counts(device_handle);
        batch.put(
            FolderMetaKey::from_parts(self.folder_id).as_ref(),
            encode(&meta)?,
        );
        backend.commit(batch)?;
        info!(
            folder = %self.folder,
            device = %device,
            records = records.len(),
            "dropped device file list"
        );
        Ok(())
    }

    /// The index ID for `device`. A fresh random ID is generated and stored
    /// on the first query for the local device; for a remote device the zero
    /// ID is returned until one is recorded.
    pub fn index_id(&self, device: &DeviceId) -> Result<IndexId> {
        let key = self
            .store
            .inner
            .keyer
            .index_id_key(device, self.folder.as_bytes())?;
        match self.store.inner.backend.get(key.as_ref())? {
            Some(value) => IndexId::from_slice(&value)
                .ok_or_else(|| Error::corruption(key.as_ref(), "index id must be 8 bytes")),
            None if *device == DeviceId::LOCAL => {
                let id = IndexId::random();
                self.store.inner.backend.put(key.as_ref(), &id.to_be_bytes())?;
                Ok(id)
            }
            None => Ok(IndexId::ZERO),
        }
    }

    /// Record the index ID announced by `device`.
    pub fn set_index_id(&self, device: &DeviceId, id: IndexId) -> Result<()> {
        let key = self
            .store
            .inner
            .keyer
            .index_id_key(device, self.folder.as_bytes())?;
        Ok(self.store.inner.backend.put(key.as_ref(), &id.to_be_bytes())?)
    }

    /// Forget the index ID for `device`, forcing a fresh exchange.
    pub fn drop_index_id(&self, device: &DeviceId) -> Result<()> {
        let key = self
            .store
            .inner
            .keyer
            .index_id_key(device, self.folder.as_bytes())?;
        Ok(self.store.inner.backend.delete(key.as_ref())?)
    }

    /// The stored mtime pair for `name`, if any.
    pub fn mtime(&self, name: &str) -> Result<Option<VirtualMtime>> {
        let key = MtimeKey::from_parts(self.folder_id, name.as_bytes());
        match self.store.inner.backend.get(key.as_ref())? {
            None => Ok(None),
            Some(value) => VirtualMtime::from_bytes(&value)
                .map(Some)
                .ok_or_else(|| Error::corruption(key.as_ref(), "mtime value must be 24 bytes")),
        }
    }

    /// Store the mtime pair for `name`.
    pub fn set_mtime(&self, name: &str, mtime: VirtualMtime) -> Result<()> {
        let key = MtimeKey::from_parts(self.folder_id, name.as_bytes());
        Ok(self.store.inner.backend.put(key.as_ref(), &mtime.to_bytes())?)
    }

    /// Forget the mtime pair for `name`.
    pub fn delete_mtime(&self, name: &str) -> Result<()> {
        let key = MtimeKey::from_parts(self.folder_id, name.as_bytes());
        Ok(self.store.inner.backend.delete(key.as_ref())?)
    }

    /// Open a stable read view of this folder.
    pub fn snapshot(&self) -> Result<Snapshot> {
        self.snapshot_with_cancel(CancellationToken::new())
    }

    /// Open a stable read view whose traversals stop early once `cancel`
    /// fires, reporting [`ScanOutcome::Cancelled`].
    pub fn snapshot_with_cancel(&self, cancel: CancellationToken) -> Result<Snapshot> {
        let inner = self.store.inner.backend.snapshot()?;
        let meta = {
            let reader = ReaderRef::Snapshot(inner.as_ref());
            self.load_meta(&reader)?
        };
        Ok(Snapshot {
            keyer: self.store.inner.keyer.clone(),
            folder_id: self.folder_id,
            local_device: self.store.inner.local_device,
            meta,
            cancel,
            inner: Some(inner),
        })
    }

    fn load_meta(&self, reader: &ReaderRef<'_>) -> Result<CountsSet> {
        let key = FolderMetaKey::from_parts(self.folder_id);
        match reader.get(key.as_ref())? {
            Some(value) => decode(key.as_ref(), &value),
            None => self.calculate_meta(reader),
        }
    }

    /// Recalculate the counter rows from scratch. Only needed when the
    /// folder meta record is absent, since every update rewrites it in the
    /// same batch as the state it describes.
    fn calculate_meta(&self, reader: &ReaderRef<'_>) -> Result<CountsSet> {
        let mut meta = CountsSet::default();
        let local_handle = self.store.inner.local_device;

        let device_prefix = DeviceFileKey::from_parts(self.folder_id, 0, b"");
        reader.iter_prefix(device_prefix.without_name_and_device(), &mut |key, value| {
            let Some(device) = read_u32(key, KEY_PREFIX_LEN + KEY_FOLDER_LEN) else {
                return Err(Error::corruption(key, "truncated device file key"));
            };
            let file: FileInfo = decode(key, value)?;
            meta.add_file(device, &file);
            meta.note_sequence(device, file.sequence);
            Ok(true)
        })?;

        let global_prefix = GlobalVersionKey::from_parts(self.folder_id, b"");
        reader.iter_prefix(global_prefix.as_ref(), &mut |key, value| {
            let list: VersionList = decode(key, value)?;
            let Some(winner) = list.global() else {
                return Ok(true);
            };
            let name = &key[KEY_PREFIX_LEN + KEY_FOLDER_LEN..];
            let Some(file) = load_file(reader, self.folder_id, winner.device, name)? else {
                return Ok(true);
            };
            meta.add_file(GLOBAL_HANDLE, &file);
            let local_entry = list.get(local_handle);
            let have = local_entry.is_some();
            let have_version = local_entry.map(|e| e.version.clone()).unwrap_or_default();
            if winner.needed_by(have, &have_version) {
                meta.add_file(NEED_HANDLE, &file);
            }
            Ok(true)
        })?;

        Ok(meta)
    }
}

fn finish_scan(res: Result<ScanOutcome>) -> Result<ScanOutcome> {
    match res {
        Err(Error::Cancelled) => Ok(ScanOutcome::Cancelled),
        other => other,
    }
}

/// A stable, read-only view of one folder.
///
/// Safe for concurrent use; reads never block writers. Dropping the
/// snapshot releases the backend view, or call [`Snapshot::close`] to
/// release it early — methods on a closed snapshot fail with
/// [`Error::SnapshotClosed`].
#[derive(Debug)]
pub struct Snapshot {
    keyer: Keyer,
    folder_id: u32,
    local_device: u32,
    meta: CountsSet,
    cancel: CancellationToken,
    inner: Option<Box<dyn backend::Snapshot>>,
}

impl Snapshot {
    fn reader(&self) -> Result<ReaderRef<'_>> {
        match &self.inner {
            Some(snapshot) => Ok(ReaderRef::Snapshot(snapshot.as_ref())),
            None => Err(Error::SnapshotClosed),
        }
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Release the backend view. Further reads fail with
    /// [`Error::SnapshotClosed`].
    pub fn close(&mut self) {
        self.inner = None;
    }

    /// The globally elected record for `name`: the winning version list
    /// entry dereferenced through its owning device record.
    pub fn global(&self, name: &str) -> Result<Option<FileInfo>> {
        let reader = self.reader()?;
        let gk = GlobalVersionKey::from_parts(self.folder_id, name.as_bytes());
        let Some(value) = reader.get(gk.as_ref())? else {
            return Ok(None);
        };
        let list: VersionList = decode(gk.as_ref(), &value)?;
        let Some(winner) = list.global() else {
            return Ok(None);
        };
        load_file(&reader, self.folder_id, winner.device, name.as_bytes())
    }

    /// The record `device` announced for `name`, if any.
    pub fn have(&self, device: &DeviceId, name: &str) -> Result<Option<FileInfo>> {
        let reader = self.reader()?;
        let handle = self.keyer.device_handle(device)?;
        load_file(&reader, self.folder_id, handle, name.as_bytes())
    }

    /// Visit `device`'s records in name order. Return `false` from the
    /// visitor to stop early.
    pub fn with_have(
        &self,
        device: &DeviceId,
        prefix: &str,
        mut visit: impl FnMut(&FileInfo) -> bool,
    ) -> Result<ScanOutcome> {
        let reader = self.reader()?;
        let handle = self.keyer.device_handle(device)?;
        let key = DeviceFileKey::from_parts(self.folder_id, handle, prefix.as_bytes());
        let res = reader.iter_prefix(key.as_ref(), &mut |key, value| {
            self.check_cancel()?;
            let file: FileInfo = decode(key, value)?;
            Ok(visit(&file))
        });
        finish_scan(res)
    }

    /// Visit every globally elected record, in name order.
    pub fn with_global(&self, visit: impl FnMut(&FileInfo) -> bool) -> Result<ScanOutcome> {
        self.with_prefixed_global("", visit)
    }

    /// Visit the globally elected records under a name prefix.
    pub fn with_prefixed_global(
        &self,
        prefix: &str,
        mut visit: impl FnMut(&FileInfo) -> bool,
    ) -> Result<ScanOutcome> {
        let reader = self.reader()?;
        let gk = GlobalVersionKey::from_parts(self.folder_id, prefix.as_bytes());
        let res = reader.iter_prefix(gk.as_ref(), &mut |key, value| {
            self.check_cancel()?;
            let list: VersionList = decode(key, value)?;
            let Some(winner) = list.global() else {
                return Ok(true);
            };
            let name = &key[KEY_PREFIX_LEN + KEY_FOLDER_LEN..];
            let Some(file) = load_file(&reader, self.folder_id, winner.device, name)? else {
                warn!(
                    name = %String::from_utf8_lossy(name),
                    "version list references a missing device record"
                );
                return Ok(true);
            };
            Ok(visit(&file))
        });
        finish_scan(res)
    }

    /// Visit every globally elected record `device` still needs.
    ///
    /// For the local device this walks the persisted need markers; for a
    /// remote device the need set is computed from the version lists.
    pub fn with_need(
        &self,
        device: &DeviceId,
        mut visit: impl FnMut(&FileInfo) -> bool,
    ) -> Result<ScanOutcome> {
        let reader = self.reader()?;
        let handle = self.keyer.device_handle(device)?;

        if handle == self.local_device {
            let nk = NeedFileKey::from_parts(self.folder_id, b"");
            let res = reader.iter_prefix(nk.as_ref(), &mut |key, _| {
                self.check_cancel()?;
                let name = &key[KEY_PREFIX_LEN + KEY_FOLDER_LEN..];
                let gk = GlobalVersionKey::from_parts(self.folder_id, name);
                let Some(value) = reader.get(gk.as_ref())? else {
                    warn!(
                        name = %String::from_utf8_lossy(name),
                        "need marker without version list"
                    );
                    return Ok(true);
                };
                let list: VersionList = decode(gk.as_ref(), &value)?;
                let Some(winner) = list.global() else {
                    return Ok(true);
                };
                let Some(file) = load_file(&reader, self.folder_id, winner.device, name)? else {
                    return Ok(true);
                };
                Ok(visit(&file))
            });
            return finish_scan(res);
        }

        let gk = GlobalVersionKey::from_parts(self.folder_id, b"");
        let res = reader.iter_prefix(gk.as_ref(), &mut |key, value| {
            self.check_cancel()?;
            let list: VersionList = decode(key, value)?;
            let Some(winner) = list.global() else {
                return Ok(true);
            };
            let entry = list.get(handle);
            let have = entry.is_some();
            let have_version = entry.map(|e| e.version.clone()).unwrap_or_default();
            if !winner.needed_by(have, &have_version) {
                return Ok(true);
            }
            let name = &key[KEY_PREFIX_LEN + KEY_FOLDER_LEN..];
            let Some(file) = load_file(&reader, self.folder_id, winner.device, name)? else {
                return Ok(true);
            };
            Ok(visit(&file))
        });
        finish_scan(res)
    }

    /// Visit every file in this folder that references block `hash`, with
    /// the block's index within that file.
    pub fn with_blocks_hash(
        &self,
        hash: &[u8],
        mut visit: impl FnMut(&str, u32) -> bool,
    ) -> Result<ScanOutcome> {
        let reader = self.reader()?;
        let prefix = BlockMapKey::from_parts(self.folder_id, hash, b"");
        let fixed = KEY_PREFIX_LEN + KEY_FOLDER_LEN + KEY_HASH_LEN;
        let res = reader.iter_prefix(prefix.as_ref(), &mut |key, value| {
            self.check_cancel()?;
            let name = std::str::from_utf8(&key[fixed..])
                .map_err(|_| Error::corruption(key, "file name is not utf-8"))?;
            let index: [u8; 4] = value
                .try_into()
                .map_err(|_| Error::corruption(key, "block index must be 4 bytes"))?;
            Ok(visit(name, u32::from_be_bytes(index)))
        });
        finish_scan(res)
    }

    /// The highest sequence recorded for `device` as of this snapshot.
    pub fn sequence(&self, device: &DeviceId) -> Result<i64> {
        let handle = self.keyer.device_handle(device)?;
        Ok(self.meta.sequence(handle))
    }

    /// Counts of the globally elected records.
    pub fn global_size(&self) -> Counts {
        self.counts_row(GLOBAL_HANDLE)
    }

    /// Counts of the local device's records.
    pub fn local_size(&self) -> Counts {
        self.counts_row(self.local_device)
    }

    /// Counts of the local need set.
    pub fn need_size(&self) -> Counts {
        self.counts_row(NEED_HANDLE)
    }

    fn counts_row(&self, device: u32) -> Counts {
        self.meta.get(device).cloned().unwrap_or(Counts {
            device,
            ..Default::default()
        })
    }
}
