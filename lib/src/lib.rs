//! `tensorset-lib`: a content-addressed, version-controlled store for tensor
//! data. Arraysets of named samples are staged, committed into a DAG of
//! immutable commits, branched, merged, and synced between repositories, the
//! way a distributed version control system's commit/branch/op-store
//! machinery works for text repositories — just with tensors as the payload
//! instead of file trees.

pub mod arrayset;
pub mod backend;
pub mod branch;
pub mod checkout;
pub mod commit;
pub mod config;
pub mod diffmerge;
pub mod digest;
pub mod error;
pub mod hashindex;
pub mod keycodec;
pub mod kv;
pub mod location;
pub mod repo;
pub mod schema;
pub mod staging;
pub mod sync;
pub mod util;

pub use checkout::ReadCheckout;
pub use checkout::WriteCheckout;
pub use commit::CommitRecord;
pub use config::RepoConfig;
pub use config::UserIdentity;
pub use diffmerge::ConflictReport;
pub use digest::CommitId;
pub use digest::Digest;
pub use error::Error;
pub use error::Result;
pub use keycodec::ArraysetName;
pub use keycodec::MetadataKey;
pub use keycodec::SampleKey;
pub use location::BackendLocation;
pub use repo::MergeOutcome;
pub use repo::Repository;
pub use repo::RepoSummary;
pub use schema::DType;
pub use schema::Schema;
pub use schema::Tensor;
