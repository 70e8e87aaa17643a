//! Local index database for a peer-to-peer folder synchronizer.
//!
//! The index records, per synchronized folder, every device's announced
//! version of every file, elects a per-name global winner, and keeps a set
//! of derived views — a block-hash reverse map, a need list, a sequence
//! index for change propagation, and per-folder counters — consistent with
//! those records. Everything lives in one ordered byte keyspace behind the
//! [`backend::Backend`] trait; every key starts with a type byte and refers
//! to folders and devices through interned `u32` handles, so cross-cutting
//! queries are single prefix scans.
//!
//! [`Store`] opens the database, runs schema migrations, and hands out
//! per-folder [`FileSet`] views. Updates stage all of their cross-index
//! effects into one atomic batch; reads go through [`Snapshot`], a stable
//! view that concurrent writers cannot disturb.
//!
//! ```
//! use std::sync::Arc;
//! use syncdb::{backend::memory::MemoryBackend, model::FileInfo, Store};
//!
//! # fn main() -> syncdb::Result<()> {
//! let store = Store::open(Arc::new(MemoryBackend::new()))?;
//! let files = store.fileset("documents")?;
//! files.update(vec![FileInfo {
//!     name: "notes.txt".into(),
//!     size: 5,
//!     ..Default::default()
//! }])?;
//!
//! let snapshot = files.snapshot()?;
//! assert!(snapshot.global("notes.txt")?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod backend;
mod error;
pub mod fileset;
pub mod keyer;
pub mod model;
pub mod smallindex;
pub mod store;

pub use self::backend::{Backend, ScanOutcome, WriteBatch};
pub use self::error::{BackendError, Error, Result};
pub use self::fileset::{FileSet, Snapshot};
pub use self::model::{
    BlockInfo, BlockList, Counts, CountsSet, DeviceId, FileInfo, FileType, FileVersion, IndexId,
    Timestamp, Vector, VersionList, VirtualMtime,
};
pub use self::store::migrations::SCHEMA_VERSION;
pub use self::store::{DumpEntry, NamespacedKv, Store};
