//! The key schema.
//!
//! Every key starts with a single type byte; integers are big-endian. Folder
//! and device references are interned `u32` handles (see
//! [`crate::smallindex::SmallIndex`]), which keeps keys short and clusters
//! one folder's records together in the keyspace.
//!
//! Typed keys are backed by a `SmallVec` with 64 bytes of inline capacity,
//! so every key short of a long file name is built without heap allocation —
//! hot scans generate keys for free.

use smallvec::SmallVec;

use crate::{model::DeviceId, smallindex::SmallIndex, Result};

/// Length of the type byte.
pub const KEY_PREFIX_LEN: usize = 1;
/// Length of an interned folder handle.
pub const KEY_FOLDER_LEN: usize = 4;
/// Length of an interned device handle.
pub const KEY_DEVICE_LEN: usize = 4;
/// Length of a sequence number.
pub const KEY_SEQUENCE_LEN: usize = 8;
/// Length of a block hash inside a block map key.
pub const KEY_HASH_LEN: usize = 32;

type KeyBuf = SmallVec<[u8; 64]>;

/// The first byte of every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyType {
    /// `00 ‖ folder ‖ device ‖ name` → encoded `FileInfo`.
    Device = 0,
    /// `01 ‖ folder ‖ name` → encoded `VersionList`.
    Global = 1,
    /// `02 ‖ folder ‖ hash ‖ name` → `u32` block index.
    Block = 2,
    /// `03 ‖ …` → free-form device statistics.
    DeviceStat = 3,
    /// `04 ‖ …` → free-form folder statistics.
    FolderStat = 4,
    /// `05 ‖ folder ‖ name` → real ‖ virtual mtime halves.
    VirtualMtime = 5,
    /// `06 ‖ id` → folder identifier bytes.
    FolderIdx = 6,
    /// `07 ‖ id` → device identifier bytes.
    DeviceIdx = 7,
    /// `08 ‖ device ‖ folder` → 8-byte index ID.
    IndexId = 8,
    /// `09 ‖ folder` → encoded `CountsSet`.
    FolderMeta = 9,
    /// `0A ‖ name` → arbitrary.
    Misc = 10,
    /// `0B ‖ folder ‖ sequence` → a Device key.
    Sequence = 11,
    /// `0C ‖ folder ‖ name` → empty.
    Need = 12,
    /// `0D ‖ hash` → encoded `BlockList`.
    BlockList = 13,
}

impl KeyType {
    /// Parse a type byte.
    pub fn from_byte(byte: u8) -> Option<KeyType> {
        use KeyType::*;
        Some(match byte {
            0 => Device,
            1 => Global,
            2 => Block,
            3 => DeviceStat,
            4 => FolderStat,
            5 => VirtualMtime,
            6 => FolderIdx,
            7 => DeviceIdx,
            8 => IndexId,
            9 => FolderMeta,
            10 => Misc,
            11 => Sequence,
            12 => Need,
            13 => BlockList,
            _ => return None,
        })
    }
}

fn buf_with(kind: KeyType, capacity: usize) -> KeyBuf {
    let mut buf = KeyBuf::with_capacity(KEY_PREFIX_LEN + capacity);
    buf.push(kind as u8);
    buf
}

/// Key of one device's record of one name.
#[derive(Debug, Clone)]
pub struct DeviceFileKey(KeyBuf);

impl DeviceFileKey {
    pub(crate) fn from_parts(folder: u32, device: u32, name: &[u8]) -> Self {
        let mut buf = buf_with(
            KeyType::Device,
            KEY_FOLDER_LEN + KEY_DEVICE_LEN + name.len(),
        );
        buf.extend_from_slice(&folder.to_be_bytes());
        buf.extend_from_slice(&device.to_be_bytes());
        buf.extend_from_slice(name);
        DeviceFileKey(buf)
    }

    /// Prefix over every device's records for the folder.
    pub fn without_name_and_device(&self) -> &[u8] {
        &self.0[..KEY_PREFIX_LEN + KEY_FOLDER_LEN]
    }

    /// Prefix over one device's file list, in name order.
    pub fn without_name(&self) -> &[u8] {
        &self.0[..KEY_PREFIX_LEN + KEY_FOLDER_LEN + KEY_DEVICE_LEN]
    }
}

impl AsRef<[u8]> for DeviceFileKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Key of the version list of one name.
#[derive(Debug, Clone)]
pub struct GlobalVersionKey(KeyBuf);

impl GlobalVersionKey {
    pub(crate) fn from_parts(folder: u32, name: &[u8]) -> Self {
        let mut buf = buf_with(KeyType::Global, KEY_FOLDER_LEN + name.len());
        buf.extend_from_slice(&folder.to_be_bytes());
        buf.extend_from_slice(name);
        GlobalVersionKey(buf)
    }

    /// Prefix over every version list in the folder.
    pub fn without_name(&self) -> &[u8] {
        &self.0[..KEY_PREFIX_LEN + KEY_FOLDER_LEN]
    }
}

impl AsRef<[u8]> for GlobalVersionKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Key of one block reference: which file holds a block, and where.
#[derive(Debug, Clone)]
pub struct BlockMapKey(KeyBuf);

impl BlockMapKey {
    pub(crate) fn from_parts(folder: u32, hash: &[u8], name: &[u8]) -> Self {
        let mut buf = buf_with(KeyType::Block, KEY_FOLDER_LEN + KEY_HASH_LEN + name.len());
        buf.extend_from_slice(&folder.to_be_bytes());
        buf.extend_from_slice(hash);
        buf.extend_from_slice(name);
        BlockMapKey(buf)
    }

    /// Prefix over every file referencing this hash in the folder.
    pub fn without_name(&self) -> &[u8] {
        &self.0[..KEY_PREFIX_LEN + KEY_FOLDER_LEN + KEY_HASH_LEN]
    }

    /// Prefix over the folder's whole block map.
    pub fn without_hash_and_name(&self) -> &[u8] {
        &self.0[..KEY_PREFIX_LEN + KEY_FOLDER_LEN]
    }
}

impl AsRef<[u8]> for BlockMapKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Key of a need marker.
#[derive(Debug, Clone)]
pub struct NeedFileKey(KeyBuf);

impl NeedFileKey {
    pub(crate) fn from_parts(folder: u32, name: &[u8]) -> Self {
        let mut buf = buf_with(KeyType::Need, KEY_FOLDER_LEN + name.len());
        buf.extend_from_slice(&folder.to_be_bytes());
        buf.extend_from_slice(name);
        NeedFileKey(buf)
    }

    /// Prefix over the folder's need markers.
    pub fn without_name(&self) -> &[u8] {
        &self.0[..KEY_PREFIX_LEN + KEY_FOLDER_LEN]
    }
}

impl AsRef<[u8]> for NeedFileKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Key of a sequence index entry.
#[derive(Debug, Clone)]
pub struct SequenceKey(KeyBuf);

impl SequenceKey {
    pub(crate) fn from_parts(folder: u32, sequence: i64) -> Self {
        let mut buf = buf_with(KeyType::Sequence, KEY_FOLDER_LEN + KEY_SEQUENCE_LEN);
        buf.extend_from_slice(&folder.to_be_bytes());
        buf.extend_from_slice(&(sequence as u64).to_be_bytes());
        SequenceKey(buf)
    }

    /// Prefix over the folder's sequence index, in sequence order.
    pub fn without_sequence(&self) -> &[u8] {
        &self.0[..KEY_PREFIX_LEN + KEY_FOLDER_LEN]
    }
}

impl AsRef<[u8]> for SequenceKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Key of an index-ID entry for a (device, folder) pair.
#[derive(Debug, Clone)]
pub struct IndexIdKey(KeyBuf);

impl IndexIdKey {
    pub(crate) fn from_parts(device: u32, folder: u32) -> Self {
        let mut buf = buf_with(KeyType::IndexId, KEY_DEVICE_LEN + KEY_FOLDER_LEN);
        buf.extend_from_slice(&device.to_be_bytes());
        buf.extend_from_slice(&folder.to_be_bytes());
        IndexIdKey(buf)
    }
}

impl AsRef<[u8]> for IndexIdKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Key of a virtual mtime entry.
#[derive(Debug, Clone)]
pub struct MtimeKey(KeyBuf);

impl MtimeKey {
    pub(crate) fn from_parts(folder: u32, name: &[u8]) -> Self {
        let mut buf = buf_with(KeyType::VirtualMtime, KEY_FOLDER_LEN + name.len());
        buf.extend_from_slice(&folder.to_be_bytes());
        buf.extend_from_slice(name);
        MtimeKey(buf)
    }

    /// Prefix over the folder's mtime entries.
    pub fn without_name(&self) -> &[u8] {
        &self.0[..KEY_PREFIX_LEN + KEY_FOLDER_LEN]
    }
}

impl AsRef<[u8]> for MtimeKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Key of a folder's counter rows.
#[derive(Debug, Clone)]
pub struct FolderMetaKey(KeyBuf);

impl FolderMetaKey {
    pub(crate) fn from_parts(folder: u32) -> Self {
        let mut buf = buf_with(KeyType::FolderMeta, KEY_FOLDER_LEN);
        buf.extend_from_slice(&folder.to_be_bytes());
        FolderMetaKey(buf)
    }
}

impl AsRef<[u8]> for FolderMetaKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Key of a stored block list.
#[derive(Debug, Clone)]
pub struct BlockListKey(KeyBuf);

impl BlockListKey {
    pub(crate) fn from_parts(hash: &[u8]) -> Self {
        let mut buf = buf_with(KeyType::BlockList, hash.len());
        buf.extend_from_slice(hash);
        BlockListKey(buf)
    }

    /// The block list hash the key points at.
    pub fn blocks_hash(&self) -> &[u8] {
        &self.0[KEY_PREFIX_LEN..]
    }
}

impl AsRef<[u8]> for BlockListKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Key construction and parsing over the two interners.
#[derive(Debug, Clone)]
pub struct Keyer {
    folder_idx: SmallIndex,
    device_idx: SmallIndex,
}

impl Keyer {
    pub(crate) fn new(folder_idx: SmallIndex, device_idx: SmallIndex) -> Self {
        Keyer {
            folder_idx,
            device_idx,
        }
    }

    /// The interned handle for `folder`, allocating on first sight.
    pub fn folder_handle(&self, folder: &[u8]) -> Result<u32> {
        self.folder_idx.id(folder)
    }

    /// The interned handle for `device`, allocating on first sight.
    pub fn device_handle(&self, device: &DeviceId) -> Result<u32> {
        self.device_idx.id(device.as_bytes())
    }

    /// Build a device file key.
    pub fn device_file_key(
        &self,
        folder: &[u8],
        device: &DeviceId,
        name: &[u8],
    ) -> Result<DeviceFileKey> {
        let folder = self.folder_idx.id(folder)?;
        let device = self.device_idx.id(device.as_bytes())?;
        Ok(DeviceFileKey::from_parts(folder, device, name))
    }

    /// The name suffix of a device file key.
    pub fn name_from_device_file_key<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        let fixed = KEY_PREFIX_LEN + KEY_FOLDER_LEN + KEY_DEVICE_LEN;
        key.get(fixed..).unwrap_or(&[])
    }

    /// The device identifier referenced by a device file key.
    pub fn device_from_device_file_key(&self, key: &[u8]) -> Option<Vec<u8>> {
        let handle = read_u32(key, KEY_PREFIX_LEN + KEY_FOLDER_LEN)?;
        self.device_idx.val(handle)
    }

    /// The folder identifier referenced by a device file key.
    pub fn folder_from_device_file_key(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.folder_idx.val(read_u32(key, KEY_PREFIX_LEN)?)
    }

    /// Build a global version key.
    pub fn global_version_key(&self, folder: &[u8], name: &[u8]) -> Result<GlobalVersionKey> {
        let folder = self.folder_idx.id(folder)?;
        Ok(GlobalVersionKey::from_parts(folder, name))
    }

    /// The name suffix of a global version key.
    pub fn name_from_global_version_key<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        key.get(KEY_PREFIX_LEN + KEY_FOLDER_LEN..).unwrap_or(&[])
    }

    /// The folder identifier referenced by a global version key.
    pub fn folder_from_global_version_key(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.folder_idx.val(read_u32(key, KEY_PREFIX_LEN)?)
    }

    /// Build a block map key.
    pub fn block_map_key(&self, folder: &[u8], hash: &[u8], name: &[u8]) -> Result<BlockMapKey> {
        let folder = self.folder_idx.id(folder)?;
        Ok(BlockMapKey::from_parts(folder, hash, name))
    }

    /// The name suffix of a block map key.
    pub fn name_from_block_map_key<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        let fixed = KEY_PREFIX_LEN + KEY_FOLDER_LEN + KEY_HASH_LEN;
        key.get(fixed..).unwrap_or(&[])
    }

    /// Build a need marker key.
    pub fn need_file_key(&self, folder: &[u8], name: &[u8]) -> Result<NeedFileKey> {
        let folder = self.folder_idx.id(folder)?;
        Ok(NeedFileKey::from_parts(folder, name))
    }

    /// Build a sequence index key.
    pub fn sequence_key(&self, folder: &[u8], sequence: i64) -> Result<SequenceKey> {
        let folder = self.folder_idx.id(folder)?;
        Ok(SequenceKey::from_parts(folder, sequence))
    }

    /// The sequence number inside a sequence key.
    pub fn sequence_from_sequence_key(&self, key: &[u8]) -> i64 {
        let start = KEY_PREFIX_LEN + KEY_FOLDER_LEN;
        match key.get(start..start + KEY_SEQUENCE_LEN) {
            Some(bytes) => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                u64::from_be_bytes(buf) as i64
            }
            None => 0,
        }
    }

    /// Build an index-ID key.
    pub fn index_id_key(&self, device: &DeviceId, folder: &[u8]) -> Result<IndexIdKey> {
        let device = self.device_idx.id(device.as_bytes())?;
        let folder = self.folder_idx.id(folder)?;
        Ok(IndexIdKey::from_parts(device, folder))
    }

    /// The device identifier referenced by an index-ID key.
    pub fn device_from_index_id_key(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.device_idx.val(read_u32(key, KEY_PREFIX_LEN)?)
    }

    /// Build a virtual mtime key.
    pub fn mtime_key(&self, folder: &[u8], name: &[u8]) -> Result<MtimeKey> {
        let folder = self.folder_idx.id(folder)?;
        Ok(MtimeKey::from_parts(folder, name))
    }

    /// Build a folder meta key.
    pub fn folder_meta_key(&self, folder: &[u8]) -> Result<FolderMetaKey> {
        let folder = self.folder_idx.id(folder)?;
        Ok(FolderMetaKey::from_parts(folder))
    }

    /// Build a block list key.
    pub fn block_list_key(&self, hash: &[u8]) -> BlockListKey {
        BlockListKey::from_parts(hash)
    }
}

pub(crate) fn read_u32(key: &[u8], offset: usize) -> Option<u32> {
    let bytes = key.get(offset..offset + 4)?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    Some(u32::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::backend::memory::MemoryBackend;

    fn test_keyer() -> Keyer {
        let backend: Arc<dyn crate::backend::Backend> = Arc::new(MemoryBackend::new());
        let folder_idx = SmallIndex::load(backend.clone(), KeyType::FolderIdx as u8).unwrap();
        let device_idx = SmallIndex::load(backend, KeyType::DeviceIdx as u8).unwrap();
        Keyer::new(folder_idx, device_idx)
    }

    #[test]
    fn test_device_key() -> anyhow::Result<()> {
        let keyer = test_keyer();
        let folder = b"folder6789012345678901234567890123456789012345678901234567890123";
        let device = DeviceId::new([7; 32]);
        let name = b"name";

        let key = keyer.device_file_key(folder, &device, name)?;
        assert_eq!(key.as_ref()[0], KeyType::Device as u8);
        assert_eq!(
            keyer.folder_from_device_file_key(key.as_ref()).as_deref(),
            Some(&folder[..])
        );
        assert_eq!(
            keyer.device_from_device_file_key(key.as_ref()).as_deref(),
            Some(&device.as_bytes()[..])
        );
        assert_eq!(keyer.name_from_device_file_key(key.as_ref()), name);
        Ok(())
    }

    #[test]
    fn test_global_key() -> anyhow::Result<()> {
        let keyer = test_keyer();
        let folder = b"folder6789012345678901234567890123456789012345678901234567890123";
        let name = b"name";

        let key = keyer.global_version_key(folder, name)?;
        assert_eq!(
            keyer
                .folder_from_global_version_key(key.as_ref())
                .as_deref(),
            Some(&folder[..])
        );
        assert_eq!(keyer.name_from_global_version_key(key.as_ref()), name);

        // An unknown folder handle resolves to nothing.
        assert_eq!(keyer.folder_from_global_version_key(&[1, 2, 3, 4, 5]), None);
        Ok(())
    }

    #[test]
    fn test_sequence_key() -> anyhow::Result<()> {
        let keyer = test_keyer();
        let folder = b"default";
        let seq = 1234567890;
        let key = keyer.sequence_key(folder, seq)?;
        assert_eq!(keyer.sequence_from_sequence_key(key.as_ref()), seq);
        Ok(())
    }

    #[test]
    fn test_block_map_key() -> anyhow::Result<()> {
        let keyer = test_keyer();
        let hash = [0xab; KEY_HASH_LEN];
        let key = keyer.block_map_key(b"f", &hash, b"some/file")?;
        assert_eq!(keyer.name_from_block_map_key(key.as_ref()), b"some/file");
        assert_eq!(
            &key.without_name()[KEY_PREFIX_LEN + KEY_FOLDER_LEN..],
            &hash[..]
        );
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_device_key_roundtrip(
            folder in proptest::collection::vec(any::<u8>(), 1..64),
            device in any::<[u8; 32]>(),
            name in proptest::collection::vec(any::<u8>(), 0..1024),
        ) {
            let keyer = test_keyer();
            let device = DeviceId::new(device);
            let key = keyer.device_file_key(&folder, &device, &name).unwrap();
            prop_assert_eq!(keyer.folder_from_device_file_key(key.as_ref()), Some(folder));
            prop_assert_eq!(
                keyer.device_from_device_file_key(key.as_ref()),
                Some(device.as_bytes().to_vec())
            );
            prop_assert_eq!(keyer.name_from_device_file_key(key.as_ref()), &name[..]);
        }

        #[test]
        fn prop_prefixes_are_prefixes(
            folder in proptest::collection::vec(any::<u8>(), 1..32),
            name in proptest::collection::vec(any::<u8>(), 0..256),
            hash in any::<[u8; 32]>(),
            seq in any::<i64>(),
        ) {
            let keyer = test_keyer();
            let device = DeviceId::LOCAL;

            let key = keyer.device_file_key(&folder, &device, &name).unwrap();
            prop_assert!(key.as_ref().starts_with(key.without_name_and_device()));
            prop_assert!(key.as_ref().starts_with(key.without_name()));

            let key = keyer.global_version_key(&folder, &name).unwrap();
            prop_assert!(key.as_ref().starts_with(key.without_name()));

            let key = keyer.block_map_key(&folder, &hash, &name).unwrap();
            prop_assert!(key.as_ref().starts_with(key.without_name()));
            prop_assert!(key.as_ref().starts_with(key.without_hash_and_name()));

            let key = keyer.sequence_key(&folder, seq).unwrap();
            prop_assert!(key.as_ref().starts_with(key.without_sequence()));
            prop_assert_eq!(keyer.sequence_from_sequence_key(key.as_ref()), seq);
        }
    }
}
