//! Error types for the index database.

use std::fmt;

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure in the underlying key-value backend.
///
/// Treated as fatal for the affected transaction: the batch it belonged to is
/// discarded and never partially applied.
#[derive(Debug, Error)]
#[error("backend failure: {source}")]
pub struct BackendError {
    #[source]
    source: anyhow::Error,
}

impl BackendError {
    /// Wrap an underlying storage error.
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self { source: err.into() }
    }
}

/// Errors returned by the index database.
#[derive(Debug, Error)]
pub enum Error {
    /// A backend operation failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The on-disk schema is newer than this code understands.
    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaMismatch {
        /// Version found in the database.
        found: u64,
        /// Highest version this build supports.
        supported: u64,
    },

    /// A schema migration step failed. Recoverable by retrying open.
    #[error("schema migration step {step} failed")]
    MigrationFailed {
        /// The migration step that failed.
        step: u64,
        #[source]
        /// Underlying cause.
        cause: Box<Error>,
    },

    /// The snapshot was released before this call.
    #[error("snapshot is closed")]
    SnapshotClosed,

    /// The operation was cancelled via its cancellation token.
    ///
    /// Used internally to unwind a traversal; public scan methods report
    /// cancellation as [`crate::backend::ScanOutcome::Cancelled`] instead.
    #[error("operation cancelled")]
    Cancelled,

    /// A stored value did not parse as its key type mandates.
    ///
    /// Fatal for the enclosing operation, but the store itself stays usable.
    #[error("corrupt value for key {key}: {detail}")]
    Corruption {
        /// Offending key bytes, hex encoded.
        key: String,
        /// What failed to parse.
        detail: String,
    },

    /// A record failed to serialize.
    #[error("failed to encode record")]
    Encode(#[source] postcard::Error),
}

impl Error {
    pub(crate) fn corruption(key: &[u8], detail: impl fmt::Display) -> Self {
        let key = hex::encode(key);
        let detail = detail.to_string();
        tracing::error!(%key, %detail, "corrupt database value");
        Error::Corruption { key, detail }
    }
}
