//! The top-level error type returned by `tensorset-lib`'s public API.
//!
//! Component modules define narrower error enums for failures that only make
//! sense inside that component (see [`crate::kv::KvError`],
//! [`crate::backend::chunked::ChunkedBackendError`], [`crate::sync::SyncError`])
//! and convert into [`Error`] with `#[from]` once they cross out of it.

use std::path::PathBuf;

use thiserror::Error;

use crate::diffmerge::ConflictReport;

/// Errors raised by `tensorset-lib`.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied argument is malformed: a bad branch/commit name, a
    /// key containing disallowed characters, or mutually exclusive arguments
    /// given together.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The repository is not in the state an operation requires, e.g. the
    /// staging area is DIRTY when CLEAN is required, or the writer lock is
    /// already held by someone else.
    #[error("invalid repository state: {0}")]
    StateError(String),

    /// A branch, remote, digest, schema, or commit could not be found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A three-way merge produced one or more conflicts.
    #[error("merge conflict: {0}")]
    Conflict(ConflictReport),

    /// The remote rejected the operation for lack of permission.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The sync transport failed for a reason other than not-found or
    /// permission-denied.
    #[error("transport error: {0}")]
    Transport(String),

    /// An on-disk invariant was violated: a digest mismatch, a missing
    /// backing file for a digest the hash index claims to know about, or a
    /// ref pointing at a commit that does not exist.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// Wraps an [`std::io::Error`] encountered while touching repository
    /// files, tagged with the path involved.
    #[error("I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::StateError(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Result alias used throughout `tensorset-lib`.
pub type Result<T> = std::result::Result<T, Error>;
