//! Schema versioning and migrations.
//!
//! The version lives under the misc-data key `dbVersion`. Each migration
//! step rebuilds state in one batch that also records the step's version, so
//! a crash leaves either the old or the new schema, never a mix.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::{
    backend::WriteBatch,
    error::{Error, Result},
    keyer::{
        read_u32, BlockListKey, BlockMapKey, DeviceFileKey, FolderMetaKey, GlobalVersionKey,
        KeyType, NeedFileKey, SequenceKey, KEY_DEVICE_LEN, KEY_FOLDER_LEN, KEY_PREFIX_LEN,
    },
    model::{
        decode, encode, BlockList, CountsSet, FileInfo, FileVersion, VersionList, GLOBAL_HANDLE,
        NEED_HANDLE,
    },
    store::Store,
};

/// The schema version this build reads and writes.
pub const SCHEMA_VERSION: u64 = 1;

type Migration = fn(&Store) -> Result<()>;

const MIGRATIONS: &[(u64, Migration)] = &[(1, migration_001_rebuild_derived)];

pub(crate) fn version_key() -> Vec<u8> {
    let mut key = vec![KeyType::Misc as u8];
    key.extend_from_slice(b"dbVersion");
    key
}

pub(crate) fn run(store: &Store) -> Result<()> {
    let key = version_key();
    let found = match store.inner.backend.get(&key)? {
        None => None,
        Some(value) => {
            let bytes: [u8; 8] = value
                .as_slice()
                .try_into()
                .map_err(|_| Error::corruption(&key, "version must be 8 bytes"))?;
            Some(u64::from_be_bytes(bytes))
        }
    };

    if let Some(found) = found {
        if found > SCHEMA_VERSION {
            return Err(Error::SchemaMismatch {
                found,
                supported: SCHEMA_VERSION,
            });
        }
        if found == SCHEMA_VERSION {
            return Ok(());
        }
    }

    let from = found.unwrap_or(0);
    for &(step, migrate) in MIGRATIONS {
        if step <= from {
            continue;
        }
        debug!(step, "running schema migration");
        migrate(store).map_err(|cause| Error::MigrationFailed {
            step,
            cause: Box::new(cause),
        })?;
        info!(step, "schema migration complete");
    }
    Ok(())
}

fn put_version(batch: &mut WriteBatch, version: u64) {
    batch.put(version_key(), version.to_be_bytes().to_vec());
}

/// Rebuild every derived index — version lists, block refs, needs, sequence
/// keys, and counter rows — from the authoritative per-device records.
fn migration_001_rebuild_derived(store: &Store) -> Result<()> {
    let backend = &store.inner.backend;
    let local = store.inner.local_device;
    let mut batch = WriteBatch::new();

    // Stale derived state is dropped wholesale and rebuilt below. Deletes
    // are staged first so the rebuilt puts win within the batch.
    for kind in [
        KeyType::Global,
        KeyType::Block,
        KeyType::Need,
        KeyType::Sequence,
        KeyType::FolderMeta,
    ] {
        backend.iter_prefix(&[kind as u8], &mut |key, _| {
            batch.delete(key.to_vec());
            Ok(true)
        })?;
    }

    let mut lists: BTreeMap<(u32, Vec<u8>), VersionList> = BTreeMap::new();
    let mut metas: BTreeMap<u32, CountsSet> = BTreeMap::new();

    backend.iter_prefix(&[KeyType::Device as u8], &mut |key, value| {
        let fixed = KEY_PREFIX_LEN + KEY_FOLDER_LEN + KEY_DEVICE_LEN;
        let (Some(folder), Some(device), true) = (
            read_u32(key, KEY_PREFIX_LEN),
            read_u32(key, KEY_PREFIX_LEN + KEY_FOLDER_LEN),
            key.len() >= fixed,
        ) else {
            return Err(Error::corruption(key, "truncated device file key"));
        };
        let name = key[fixed..].to_vec();
        let file: FileInfo = decode(key, value)?;

        let meta = metas.entry(folder).or_default();
        meta.add_file(device, &file);
        meta.note_sequence(device, file.sequence);

        if device == local {
            if file.sequence > 0 {
                batch.put(
                    SequenceKey::from_parts(folder, file.sequence).as_ref(),
                    key.to_vec(),
                );
            }
            for (index, block) in file.blocks.iter().enumerate() {
                batch.put(
                    BlockMapKey::from_parts(folder, &block.hash, &name).as_ref(),
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

        lists
            .entry((folder, name))
            .or_default()
            .insert_ordered(FileVersion {
                device,
                version: file.version.clone(),
                invalid: file.is_invalid(),
                deleted: file.deleted,
            });
        Ok(true)
    })?;

    for ((folder, name), list) in &lists {
        batch.put(
            GlobalVersionKey::from_parts(*folder, name).as_ref(),
            encode(list)?,
        );
        let Some(winner) = list.global() else {
            continue;
        };
        let winner_key = DeviceFileKey::from_parts(*folder, winner.device, name);
        let Some(value) = backend.get(winner_key.as_ref())? else {
            continue;
        };
        let winner_file: FileInfo = decode(winner_key.as_ref(), &value)?;
        let meta = metas.entry(*folder).or_default();
        meta.add_file(GLOBAL_HANDLE, &winner_file);

        let local_entry = list.get(local);
        let have = local_entry.is_some();
        let have_version = local_entry.map(|e| e.version.clone()).unwrap_or_default();
        if winner.needed_by(have, &have_version) {
            batch.put(NeedFileKey::from_parts(*folder, name).as_ref(), Vec::new());
            meta.add_file(NEED_HANDLE, &winner_file);
        }
    }

    for (folder, meta) in &metas {
        batch.put(FolderMetaKey::from_parts(*folder).as_ref(), encode(meta)?);
    }

    put_version(&mut batch, 1);
    backend.commit(batch)?;
    Ok(())
}
