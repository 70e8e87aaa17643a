//! Record types stored in the index: file metadata, version vectors, version
//! lists, block lists, and per-folder counters.
//!
//! Everything that ends up as a value in the backend is serde-derived and
//! encoded with [`postcard`].

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{Error, Result};

/// Identifier of a peer device, a 32-byte public key digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId([u8; 32]);

impl DeviceId {
    /// The local device. Records attributed to it drive the sequence index,
    /// the block map, and the need list.
    pub const LOCAL: DeviceId = DeviceId([0xff; 32]);

    /// Construct from a raw digest.
    pub const fn new(bytes: [u8; 32]) -> Self {
        DeviceId(bytes)
    }

    /// Construct from a byte slice, if it has the right length.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        Some(DeviceId(bytes))
    }

    /// The raw digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({}…)", hex::encode(&self.0[..4]))
    }
}

/// The 8-byte token asserting continuity of an index stream between two
/// devices. Rotated when the sides diverge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexId(u64);

impl IndexId {
    /// The zero value, meaning "no index ID exchanged yet".
    pub const ZERO: IndexId = IndexId(0);

    /// Construct from a raw value.
    pub const fn new(id: u64) -> Self {
        IndexId(id)
    }

    /// A fresh random, non-zero index ID.
    pub fn random() -> Self {
        IndexId(rand::random::<u64>().max(1))
    }

    /// Big-endian wire representation.
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Parse the big-endian wire representation.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = bytes.try_into().ok()?;
        Some(IndexId(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Wall-clock timestamp with nanosecond precision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Seconds since the Unix epoch, signed.
    pub secs: i64,
    /// Nanosecond remainder.
    pub nanos: i32,
}

impl Timestamp {
    /// Construct from parts.
    pub const fn new(secs: i64, nanos: i32) -> Self {
        Timestamp { secs, nanos }
    }
}

/// A (real, virtual) mtime pair for filesystems with lossy timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMtime {
    /// The timestamp the filesystem actually stores.
    pub real: Timestamp,
    /// The timestamp the scanner observed.
    pub virt: Timestamp,
}

impl VirtualMtime {
    /// Fixed-width encoding: two 12-byte halves, each `secs ‖ nanos`
    /// big-endian.
    pub fn to_bytes(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        out[..8].copy_from_slice(&self.real.secs.to_be_bytes());
        out[8..12].copy_from_slice(&self.real.nanos.to_be_bytes());
        out[12..20].copy_from_slice(&self.virt.secs.to_be_bytes());
        out[20..24].copy_from_slice(&self.virt.nanos.to_be_bytes());
        out
    }

    /// Parse the fixed-width encoding.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        fn half(b: &[u8]) -> Option<Timestamp> {
            let secs = i64::from_be_bytes(b[..8].try_into().ok()?);
            let nanos = i32::from_be_bytes(b[8..12].try_into().ok()?);
            Some(Timestamp::new(secs, nanos))
        }
        let bytes: &[u8; 24] = bytes.try_into().ok()?;
        Some(VirtualMtime {
            real: half(&bytes[..12])?,
            virt: half(&bytes[12..])?,
        })
    }
}

/// One counter of a version vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Short device identifier owning this counter.
    pub id: u64,
    /// Monotonically increasing change count.
    pub value: u64,
}

/// Relation between two version vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorOrdering {
    /// Identical vectors.
    Equal,
    /// Strictly newer than the other.
    Greater,
    /// Strictly older than the other.
    Lesser,
    /// Incomparable; the concurrency was detected after a greater counter.
    ConcurrentGreater,
    /// Incomparable; the concurrency was detected after a lesser counter.
    ConcurrentLesser,
}

impl VectorOrdering {
    /// True for either concurrent variant.
    pub fn is_concurrent(self) -> bool {
        matches!(
            self,
            VectorOrdering::ConcurrentGreater | VectorOrdering::ConcurrentLesser
        )
    }
}

/// A version vector: counter values per modifying device, kept sorted by
/// counter id.
///
/// `a ≤ b` iff every counter in `a` is ≤ the same counter in `b`;
/// incomparable vectors are concurrent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vector {
    /// The counters, ascending by id.
    pub counters: Vec<Counter>,
}

impl Vector {
    /// The empty vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a vector from `(id, value)` pairs in any order.
    pub fn from_pairs(pairs: &[(u64, u64)]) -> Self {
        let mut counters: Vec<Counter> = pairs
            .iter()
            .map(|&(id, value)| Counter { id, value })
            .collect();
        counters.sort_by_key(|c| c.id);
        Vector { counters }
    }

    /// The value of counter `id`, zero if absent.
    pub fn get(&self, id: u64) -> u64 {
        self.counters
            .binary_search_by_key(&id, |c| c.id)
            .map(|idx| self.counters[idx].value)
            .unwrap_or(0)
    }

    /// Bump counter `id` past every value in the vector, recording a new
    /// change by that device.
    pub fn update(&mut self, id: u64) {
        let next = self.counters.iter().map(|c| c.value).max().unwrap_or(0) + 1;
        match self.counters.binary_search_by_key(&id, |c| c.id) {
            Ok(idx) => self.counters[idx].value = next,
            Err(idx) => self.counters.insert(idx, Counter { id, value: next }),
        }
    }

    /// Take the per-counter maximum of both vectors.
    pub fn merge(&mut self, other: &Vector) {
        for c in &other.counters {
            match self.counters.binary_search_by_key(&c.id, |v| v.id) {
                Ok(idx) => {
                    if self.counters[idx].value < c.value {
                        self.counters[idx].value = c.value;
                    }
                }
                Err(idx) => self.counters.insert(idx, *c),
            }
        }
    }

    /// True if no counters are set.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// True if `self` is equal to or newer than `other`.
    pub fn ge(&self, other: &Vector) -> bool {
        matches!(
            self.compare(other),
            VectorOrdering::Equal | VectorOrdering::Greater
        )
    }

    /// Relation of `self` to `other` under the version-vector partial order.
    pub fn compare(&self, other: &Vector) -> VectorOrdering {
        let mut ai = 0;
        let mut bi = 0;
        let mut result = VectorOrdering::Equal;

        loop {
            let a = self.counters.get(ai).copied();
            let b = other.counters.get(bi).copied();

            match (a, b) {
                (None, None) => return result,
                (Some(av), Some(bv)) if av.id == bv.id => {
                    if av.value < bv.value {
                        if result == VectorOrdering::Greater {
                            return VectorOrdering::ConcurrentLesser;
                        }
                        result = VectorOrdering::Lesser;
                    } else if av.value > bv.value {
                        if result == VectorOrdering::Lesser {
                            return VectorOrdering::ConcurrentGreater;
                        }
                        result = VectorOrdering::Greater;
                    }
                    ai += 1;
                    bi += 1;
                }
                (Some(av), bv) if bv.map_or(true, |bv| av.id < bv.id) => {
                    // Counter missing on the other side.
                    if av.value > 0 {
                        if result == VectorOrdering::Lesser {
                            return VectorOrdering::ConcurrentGreater;
                        }
                        result = VectorOrdering::Greater;
                    }
                    ai += 1;
                }
                (_, Some(bv)) => {
                    // Counter missing on our side.
                    if bv.value > 0 {
                        if result == VectorOrdering::Greater {
                            return VectorOrdering::ConcurrentLesser;
                        }
                        result = VectorOrdering::Lesser;
                    }
                    bi += 1;
                }
                (Some(_), None) => unreachable!(),
            }
        }
    }
}

/// What kind of filesystem object a record describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// A regular file.
    #[default]
    File,
    /// A directory.
    Directory,
    /// A symbolic link.
    Symlink,
}

/// Record is unsupported by this device (hard links and the like).
pub const FLAG_LOCAL_UNSUPPORTED: u32 = 1 << 0;
/// Record matches an ignore pattern.
pub const FLAG_LOCAL_IGNORED: u32 = 1 << 1;
/// Record must be rescanned before it can be synced.
pub const FLAG_LOCAL_MUST_RESCAN: u32 = 1 << 2;
/// Record was changed locally in a receive-only folder.
pub const FLAG_LOCAL_RECEIVE_ONLY: u32 = 1 << 3;

/// Flags that make a record invalid for global election.
pub const LOCAL_INVALID_FLAGS: u32 =
    FLAG_LOCAL_UNSUPPORTED | FLAG_LOCAL_IGNORED | FLAG_LOCAL_MUST_RESCAN | FLAG_LOCAL_RECEIVE_ONLY;

/// One content block of a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Byte offset within the file.
    pub offset: u64,
    /// Block length in bytes.
    pub size: u32,
    /// Content hash of the block.
    pub hash: Vec<u8>,
}

/// The full block list of one file's content, stored once per distinct
/// content under its list hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockList {
    /// The blocks, in file order.
    pub blocks: Vec<BlockInfo>,
}

/// Hash identifying a block list: BLAKE3 over the concatenated block hashes.
pub fn blocks_hash(blocks: &[BlockInfo]) -> Vec<u8> {
    let mut hasher = blake3::Hasher::new();
    for block in blocks {
        hasher.update(&block.hash);
    }
    hasher.finalize().as_bytes().to_vec()
}

/// One device's record of one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Path relative to the folder root, forward-slash separated.
    pub name: String,
    /// Object kind.
    pub file_type: FileType,
    /// Size in bytes; zero for directories and deleted records.
    pub size: u64,
    /// Unix permission bits.
    pub permissions: u32,
    /// Last modification time.
    pub modified: Timestamp,
    /// The file no longer exists; the record remains as a tombstone.
    pub deleted: bool,
    /// The record must not win a global election.
    pub invalid: bool,
    /// Local-only state bits, see the `FLAG_LOCAL_*` constants.
    pub local_flags: u32,
    /// Version vector of this record.
    pub version: Vector,
    /// Per-folder change sequence; assigned by the store for local records.
    pub sequence: i64,
    /// Content blocks; empty unless a regular, present file.
    pub blocks: Vec<BlockInfo>,
    /// Hash of the block list, see [`blocks_hash`].
    pub blocks_hash: Vec<u8>,
    /// Target path, for symlinks.
    pub symlink_target: String,
}

impl FileInfo {
    /// True if this record is a deletion tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// True if this record may not be elected global, either because the
    /// peer flagged it invalid or because of local state bits.
    pub fn is_invalid(&self) -> bool {
        self.invalid || self.local_flags & LOCAL_INVALID_FLAGS != 0
    }

    /// True for directory records.
    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }

    /// True for regular file records.
    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    /// True for symlink records.
    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }
}

/// One entry of a [`VersionList`]: a device's announced version of a name.
///
/// Devices are referred to by their interned handle, which keeps the list
/// compact and makes the tie-break deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVersion {
    /// Interned device handle.
    pub device: u32,
    /// The announced version vector.
    pub version: Vector,
    /// The record is invalid and may not win the election.
    pub invalid: bool,
    /// The record is a deletion tombstone.
    pub deleted: bool,
}

impl FileVersion {
    /// Whether a device holding `have_version` (or nothing, if `have` is
    /// false) still needs this globally elected version.
    pub fn needed_by(&self, have: bool, have_version: &Vector) -> bool {
        // An invalid or versionless winner is never needed.
        if self.invalid || self.version.is_empty() {
            return false;
        }
        // A deletion is not needed by a device that never had the file.
        if self.deleted && !have {
            return false;
        }
        !(have && have_version.ge(&self.version))
    }
}

/// Ordering of version list entries: winners first.
///
/// Version dominance decides; concurrent or equal entries fall back to valid
/// before invalid, then ascending device handle.
fn orders_before(a: &FileVersion, b: &FileVersion) -> bool {
    match a.version.compare(&b.version) {
        VectorOrdering::Greater => true,
        VectorOrdering::Lesser => false,
        _ => {
            if a.invalid != b.invalid {
                b.invalid
            } else {
                a.device < b.device
            }
        }
    }
}

/// All devices' announced versions of one name, winners first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionList {
    /// The entries, in election order.
    pub versions: Vec<FileVersion>,
}

impl VersionList {
    /// The globally elected entry: the first valid one, or the first overall
    /// when every entry is invalid.
    pub fn global(&self) -> Option<&FileVersion> {
        self.versions
            .iter()
            .find(|v| !v.invalid)
            .or_else(|| self.versions.first())
    }

    /// The entry for `device`, if present.
    pub fn get(&self, device: u32) -> Option<&FileVersion> {
        self.versions.iter().find(|v| v.device == device)
    }

    /// Remove and return the entry for `device`.
    pub fn pop_device(&mut self, device: u32) -> Option<FileVersion> {
        let idx = self.versions.iter().position(|v| v.device == device)?;
        Some(self.versions.remove(idx))
    }

    /// Insert `version` at its election position.
    pub fn insert_ordered(&mut self, version: FileVersion) {
        let idx = self
            .versions
            .iter()
            .position(|existing| orders_before(&version, existing))
            .unwrap_or(self.versions.len());
        self.versions.insert(idx, version);
    }

    /// True if no device announces this name.
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Pseudo-device handle under which global counts are tracked.
pub const GLOBAL_HANDLE: u32 = u32::MAX;
/// Pseudo-device handle under which need counts are tracked.
pub const NEED_HANDLE: u32 = u32::MAX - 1;

/// Item and byte counts for one device's view of a folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    /// Interned device handle, or one of the pseudo handles.
    pub device: u32,
    /// Number of file records.
    pub files: u64,
    /// Number of directory records.
    pub directories: u64,
    /// Number of symlink records.
    pub symlinks: u64,
    /// Number of deletion tombstones.
    pub deleted: u64,
    /// Total bytes of file records.
    pub bytes: u64,
    /// Highest sequence seen for this device.
    pub sequence: i64,
}

impl Counts {
    fn add(&mut self, file: &FileInfo) {
        if file.is_deleted() {
            self.deleted += 1;
            return;
        }
        match file.file_type {
            FileType::File => {
                self.files += 1;
                self.bytes += file.size;
            }
            FileType::Directory => self.directories += 1,
            FileType::Symlink => self.symlinks += 1,
        }
    }

    fn remove(&mut self, file: &FileInfo) {
        if file.is_deleted() {
            self.deleted = self.deleted.saturating_sub(1);
            return;
        }
        match file.file_type {
            FileType::File => {
                self.files = self.files.saturating_sub(1);
                self.bytes = self.bytes.saturating_sub(file.size);
            }
            FileType::Directory => self.directories = self.directories.saturating_sub(1),
            FileType::Symlink => self.symlinks = self.symlinks.saturating_sub(1),
        }
    }

    /// Total records, tombstones included.
    pub fn total(&self) -> u64 {
        self.files + self.directories + self.symlinks + self.deleted
    }
}

/// The per-folder counter rows stored under the folder meta key, one per
/// device plus the global and need pseudo devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountsSet {
    /// The rows, in no particular order.
    pub counts: Vec<Counts>,
}

impl CountsSet {
    /// The row for `device`, if any.
    pub fn get(&self, device: u32) -> Option<&Counts> {
        self.counts.iter().find(|c| c.device == device)
    }

    fn entry(&mut self, device: u32) -> &mut Counts {
        if let Some(idx) = self.counts.iter().position(|c| c.device == device) {
            return &mut self.counts[idx];
        }
        self.counts.push(Counts {
            device,
            ..Default::default()
        });
        let last = self.counts.len() - 1;
        &mut self.counts[last]
    }

    /// Count `file` for `device`.
    pub fn add_file(&mut self, device: u32, file: &FileInfo) {
        self.entry(device).add(file);
    }

    /// Discount `file` for `device`.
    pub fn remove_file(&mut self, device: u32, file: &FileInfo) {
        self.entry(device).remove(file);
    }

    /// The highest sequence recorded for `device`.
    pub fn sequence(&self, device: u32) -> i64 {
        self.get(device).map(|c| c.sequence).unwrap_or(0)
    }

    /// Set the sequence high-water mark for `device`.
    pub fn set_sequence(&mut self, device: u32, sequence: i64) {
        self.entry(device).sequence = sequence;
    }

    /// Raise the sequence high-water mark for `device` if `sequence` exceeds
    /// it.
    pub fn note_sequence(&mut self, device: u32, sequence: i64) {
        let entry = self.entry(device);
        if sequence > entry.sequence {
            entry.sequence = sequence;
        }
    }

    /// Zero the counter row for `device`, keeping its sequence mark.
    pub fn reset_counts(&mut self, device: u32) {
        let entry = self.entry(device);
        *entry = Counts {
            device,
            sequence: entry.sequence,
            ..Default::default()
        };
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_stdvec(value).map_err(Error::Encode)
}

pub(crate) fn decode<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> Result<T> {
    postcard::from_bytes(bytes).map_err(|err| Error::corruption(key, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_compare() {
        let empty = Vector::new();
        let a = Vector::from_pairs(&[(1, 1)]);
        let b = Vector::from_pairs(&[(1, 2)]);
        let c = Vector::from_pairs(&[(2, 1)]);
        let ab = Vector::from_pairs(&[(1, 1), (2, 1)]);

        assert_eq!(a.compare(&a), VectorOrdering::Equal);
        assert_eq!(a.compare(&b), VectorOrdering::Lesser);
        assert_eq!(b.compare(&a), VectorOrdering::Greater);
        assert_eq!(empty.compare(&a), VectorOrdering::Lesser);
        assert_eq!(a.compare(&empty), VectorOrdering::Greater);
        assert!(a.compare(&c).is_concurrent());
        assert!(c.compare(&a).is_concurrent());
        assert_eq!(ab.compare(&a), VectorOrdering::Greater);
        assert_eq!(a.compare(&ab), VectorOrdering::Lesser);
        assert!(b.compare(&ab).is_concurrent());

        assert!(b.ge(&a));
        assert!(b.ge(&b));
        assert!(!a.ge(&b));
        assert!(!ab.ge(&b));
    }

    #[test]
    fn test_vector_update_and_merge() {
        let mut v = Vector::new();
        v.update(7);
        assert_eq!(v.get(7), 1);
        v.update(9);
        assert_eq!(v.get(9), 2);
        v.update(7);
        assert_eq!(v.get(7), 3);

        let mut a = Vector::from_pairs(&[(1, 5), (2, 1)]);
        let b = Vector::from_pairs(&[(1, 2), (3, 4)]);
        a.merge(&b);
        assert_eq!(a, Vector::from_pairs(&[(1, 5), (2, 1), (3, 4)]));
    }

    #[test]
    fn test_version_list_ordering() {
        let fv = |device: u32, pairs: &[(u64, u64)], invalid: bool| FileVersion {
            device,
            version: Vector::from_pairs(pairs),
            invalid,
            deleted: false,
        };

        // A dominating version sorts first.
        let mut list = VersionList::default();
        list.insert_ordered(fv(3, &[(1, 1)], false));
        list.insert_ordered(fv(2, &[(1, 2)], false));
        assert_eq!(list.versions[0].device, 2);
        assert_eq!(list.global().map(|v| v.device), Some(2));

        // Concurrent entries order by ascending device handle.
        let mut list = VersionList::default();
        list.insert_ordered(fv(9, &[(9, 1)], false));
        list.insert_ordered(fv(7, &[(7, 1)], false));
        assert_eq!(list.versions[0].device, 7);
        assert_eq!(list.global().map(|v| v.device), Some(7));

        // Valid entries beat invalid ones among concurrent versions.
        let mut list = VersionList::default();
        list.insert_ordered(fv(1, &[(1, 1)], true));
        list.insert_ordered(fv(5, &[(5, 1)], false));
        assert_eq!(list.versions[0].device, 5);

        // All invalid: the first entry is still reported as global.
        let mut list = VersionList::default();
        list.insert_ordered(fv(4, &[(4, 1)], true));
        list.insert_ordered(fv(2, &[(2, 1)], true));
        assert_eq!(list.global().map(|v| v.device), Some(2));
    }

    #[test]
    fn test_needed_by() {
        let winner = FileVersion {
            device: 1,
            version: Vector::from_pairs(&[(1, 2)]),
            invalid: false,
            deleted: false,
        };
        // Missing locally.
        assert!(winner.needed_by(false, &Vector::new()));
        // Older locally.
        assert!(winner.needed_by(true, &Vector::from_pairs(&[(1, 1)])));
        // Same version.
        assert!(!winner.needed_by(true, &Vector::from_pairs(&[(1, 2)])));
        // Newer locally.
        assert!(!winner.needed_by(true, &Vector::from_pairs(&[(1, 3)])));

        let deleted = FileVersion {
            deleted: true,
            ..winner.clone()
        };
        // A deletion of something we never had is not needed.
        assert!(!deleted.needed_by(false, &Vector::new()));
        assert!(deleted.needed_by(true, &Vector::from_pairs(&[(1, 1)])));

        let invalid = FileVersion {
            invalid: true,
            ..winner
        };
        assert!(!invalid.needed_by(false, &Vector::new()));
    }

    #[test]
    fn test_counts() {
        let file = FileInfo {
            name: "a".into(),
            size: 100,
            ..Default::default()
        };
        let dir = FileInfo {
            name: "d".into(),
            file_type: FileType::Directory,
            ..Default::default()
        };
        let gone = FileInfo {
            name: "g".into(),
            deleted: true,
            ..Default::default()
        };

        let mut set = CountsSet::default();
        set.add_file(0, &file);
        set.add_file(0, &dir);
        set.add_file(0, &gone);
        let counts = set.get(0).unwrap();
        assert_eq!(counts.files, 1);
        assert_eq!(counts.directories, 1);
        assert_eq!(counts.deleted, 1);
        assert_eq!(counts.bytes, 100);
        assert_eq!(counts.total(), 3);

        set.remove_file(0, &file);
        let counts = set.get(0).unwrap();
        assert_eq!(counts.files, 0);
        assert_eq!(counts.bytes, 0);

        set.set_sequence(0, 5);
        set.note_sequence(0, 3);
        assert_eq!(set.sequence(0), 5);
        set.note_sequence(0, 9);
        assert_eq!(set.sequence(0), 9);
        set.reset_counts(0);
        assert_eq!(set.sequence(0), 9);
        assert_eq!(set.get(0).unwrap().total(), 0);
    }

    #[test]
    fn test_virtual_mtime_roundtrip() {
        let mtime = VirtualMtime {
            real: Timestamp::new(1_700_000_000, 123_456_789),
            virt: Timestamp::new(-5, 0),
        };
        let bytes = mtime.to_bytes();
        assert_eq!(VirtualMtime::from_bytes(&bytes), Some(mtime));
        assert_eq!(VirtualMtime::from_bytes(&bytes[..23]), None);
    }

    #[test]
    fn test_blocks_hash_depends_on_content() {
        let b1 = BlockInfo {
            offset: 0,
            size: 128,
            hash: vec![1; 32],
        };
        let b2 = BlockInfo {
            offset: 128,
            size: 128,
            hash: vec![2; 32],
        };
        let h1 = blocks_hash(&[b1.clone(), b2.clone()]);
        let h2 = blocks_hash(&[b2, b1]);
        assert_eq!(h1.len(), 32);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let file = FileInfo {
            name: "dir/file.txt".into(),
            size: 1234,
            version: Vector::from_pairs(&[(1, 1)]),
            sequence: 42,
            ..Default::default()
        };
        let bytes = encode(&file).unwrap();
        let back: FileInfo = decode(b"key", &bytes).unwrap();
        assert_eq!(back, file);

        let err = decode::<VersionList>(b"key", &[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, Error::Corruption { .. }));
    }
}
