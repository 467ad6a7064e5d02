//! The backend capability set: dynamic dispatch over backends is replaced by
//! a small closed set of variants dispatched on a fixed format code stored
//! alongside the location in the hash index — adding a backend means adding
//! a variant here, not a new trait object hierarchy.

pub mod chunked;
pub mod refonly;

use crate::error::Result;
use crate::schema::Schema;
use crate::schema::Tensor;

/// Which concrete backend a [`crate::location::BackendLocation`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatCode {
    /// The chunked array container backend.
    Chunked,
    /// Placeholder for digests whose bytes have not been fetched yet.
    ReferenceOnly,
}

impl FormatCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chunked => "00",
            Self::ReferenceOnly => "50",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "00" => Some(Self::Chunked),
            "50" => Some(Self::ReferenceOnly),
            _ => None,
        }
    }
}

/// Selects which on-disk directory a write should land in: the writer's
/// staging area, or the holding area used while materializing a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    Stage,
    Remote,
}

/// Capability set every backend exposes: `{create_schema, write, read,
/// close, sweep_unused}`.
pub trait Backend: Send + Sync + std::fmt::Debug {
    fn format_code(&self) -> FormatCode;

    /// Registers a schema with the backend ahead of the first write for it.
    /// A no-op for backends (like [`refonly`]) that have no schema-specific
    /// state to allocate.
    fn create_schema(&mut self, schema: &Schema) -> Result<()>;

    /// Writes `tensor` and returns the location it was written to.
    fn write(&mut self, schema: &Schema, tensor: &Tensor, target: WriteTarget) -> Result<crate::location::BackendLocation>;

    /// Reads the sample at `location` back out, allocating a fresh buffer of
    /// exactly `location.shape`.
    fn read(&mut self, location: &crate::location::BackendLocation) -> Result<Tensor>;

    /// Flushes and closes any open writer handle.
    fn close(&mut self) -> Result<()>;

    /// Deletes stage-directory container files whose uid is not present in
    /// `referenced_uids`.
    fn sweep_unused(&self, referenced_uids: &std::collections::HashSet<String>) -> Result<()>;
}
