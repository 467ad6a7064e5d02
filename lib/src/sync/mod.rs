//! The push/fetch sync protocol: a transport-agnostic RPC surface plus the
//! client-side orchestration that drives it, split the way `jj_lib`
//! separates its `op_store`/`git` wire calls from the logic that decides
//! which objects to ask for. The transport is an `async-trait`, the same way
//! backends in this crate are plain traits rather than a boxed hierarchy.
//!
//! Replication works at container granularity: a fetched or pushed sample's
//! bytes travel as the whole backing container file they live in, copied
//! verbatim, so every `BackendLocation` pointing at that container's uid
//! stays valid on the receiving side without remapping offsets.

pub mod local;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::backend::FormatCode;
use crate::commit::CommitRecord;
use crate::digest::CommitId;
use crate::digest::Digest;
use crate::error::Error;
use crate::error::Result;
use crate::location::BackendLocation;

/// One endpoint of a push/fetch exchange. A `SyncTransport` speaks for
/// either side: `LocalTransport` wraps an in-process peer repository, a
/// networked implementation would wrap an HTTP or gRPC client instead.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Liveness check before a longer exchange begins.
    async fn ping(&self) -> Result<()>;

    async fn branch_head(&self, branch: &str) -> Result<Option<CommitId>>;
    async fn set_branch_head(&self, branch: &str, head: &CommitId) -> Result<()>;

    /// Every ancestor of `want` (inclusive) not already covered by one of
    /// `have`'s ancestor closures.
    async fn find_missing_commits(&self, have: &[CommitId], want: &CommitId) -> Result<Vec<CommitId>>;
    async fn commit_record(&self, digest: &CommitId) -> Result<CommitRecord>;
    async fn put_commit_record(&self, record: CommitRecord) -> Result<()>;

    async fn find_missing_hash_records(&self, digests: &[Digest]) -> Result<Vec<Digest>>;
    async fn hash_record(&self, digest: &Digest) -> Result<(FormatCode, BackendLocation)>;
    /// Records where `digest`'s bytes live without requiring the bytes to be
    /// present locally yet (`fmt` is `ReferenceOnly` until a matching
    /// `put_container` call materialises the container).
    async fn put_hash_record(&self, digest: &Digest, fmt: FormatCode, location: BackendLocation) -> Result<()>;

    async fn find_missing_labels(&self, digests: &[Digest]) -> Result<Vec<Digest>>;
    async fn label(&self, digest: &Digest) -> Result<Vec<u8>>;
    async fn put_label(&self, digest: &Digest, value: Vec<u8>) -> Result<()>;

    /// Whether a container's bytes are already present locally.
    async fn has_container(&self, fmt: FormatCode, uid: &str) -> Result<bool>;
    async fn container_bytes(&self, fmt: FormatCode, uid: &str) -> Result<Vec<u8>>;
    async fn put_container_bytes(&self, fmt: FormatCode, uid: &str, bytes: Vec<u8>) -> Result<()>;
}

fn sample_digests(records: &[CommitRecord]) -> HashSet<Digest> {
    records
        .iter()
        .flat_map(|r| r.refs.arraysets.values())
        .flat_map(|a| a.samples.values())
        .cloned()
        .collect()
}

fn metadata_digests(records: &[CommitRecord]) -> HashSet<Digest> {
    records.iter().flat_map(|r| r.refs.metadata.values()).cloned().collect()
}

/// Fetches every commit between the local `have` frontier and
/// `remote_branch`'s head on `remote`, plus the hash records (as
/// `ReferenceOnly` placeholders) and label values those commits' refs
/// mention — but not the container bytes, so a partial clone can stop here.
pub async fn fetch_refs(remote: &dyn SyncTransport, local: &dyn SyncTransport, remote_branch: &str) -> Result<CommitId> {
    let want = remote
        .branch_head(remote_branch)
        .await?
        .ok_or_else(|| Error::not_found(format!("remote has no branch named {remote_branch}")))?;
    let have = local.branch_head(remote_branch).await?.into_iter().collect::<Vec<_>>();

    let missing_commits = remote.find_missing_commits(&have, &want).await?;
    let mut records = Vec::with_capacity(missing_commits.len());
    for digest in &missing_commits {
        let record = remote.commit_record(digest).await?;
        local.put_commit_record(record.clone()).await?;
        records.push(record);
    }

    let sample_digests: Vec<Digest> = sample_digests(&records).into_iter().collect();
    let missing_hashes = local.find_missing_hash_records(&sample_digests).await?;
    for digest in &missing_hashes {
        let (_, location) = remote.hash_record(digest).await?;
        local.put_hash_record(digest, FormatCode::ReferenceOnly, location).await?;
    }

    let label_digests: Vec<Digest> = metadata_digests(&records).into_iter().collect();
    let missing_labels = local.find_missing_labels(&label_digests).await?;
    for digest in &missing_labels {
        let value = remote.label(digest).await?;
        local.put_label(digest, value).await?;
    }

    local.set_branch_head(remote_branch, &want).await?;
    Ok(want)
}

/// Materialises `digests`' container bytes from `remote` into `local` and
/// flips their hash records from `ReferenceOnly` to `Chunked`. Containers
/// are deduplicated — several samples commonly share one container.
pub async fn fetch_data(remote: &dyn SyncTransport, local: &dyn SyncTransport, digests: &[Digest]) -> Result<()> {
    let mut copied_uids = HashSet::new();
    for digest in digests {
        let (fmt, location) = remote.hash_record(digest).await?;
        if copied_uids.insert(location.file_uid.clone()) && !local.has_container(fmt, &location.file_uid).await? {
            let bytes = remote.container_bytes(fmt, &location.file_uid).await?;
            local.put_container_bytes(fmt, &location.file_uid, bytes).await?;
        }
        local.put_hash_record(digest, fmt, location).await?;
    }
    Ok(())
}

/// The symmetric push: everything `fetch_refs`/`fetch_data` does with the
/// roles of `local` and `remote` swapped, except a push always ships
/// container bytes for every record it sends — there is no partial push.
pub async fn push(local: &dyn SyncTransport, remote: &dyn SyncTransport, branch: &str) -> Result<CommitId> {
    let want = local
        .branch_head(branch)
        .await?
        .ok_or_else(|| Error::not_found(format!("no local branch named {branch}")))?;
    let have = remote.branch_head(branch).await?.into_iter().collect::<Vec<_>>();

    let missing_commits = local.find_missing_commits(&have, &want).await?;
    let mut records = Vec::with_capacity(missing_commits.len());
    for digest in &missing_commits {
        let record = local.commit_record(digest).await?;
        remote.put_commit_record(record.clone()).await?;
        records.push(record);
    }

    let sample_digests: Vec<Digest> = sample_digests(&records).into_iter().collect();
    let missing_hashes = remote.find_missing_hash_records(&sample_digests).await?;
    let mut copied_uids = HashSet::new();
    for digest in &missing_hashes {
        let (fmt, location) = local.hash_record(digest).await?;
        if copied_uids.insert(location.file_uid.clone()) && !remote.has_container(fmt, &location.file_uid).await? {
            let bytes = local.container_bytes(fmt, &location.file_uid).await?;
            remote.put_container_bytes(fmt, &location.file_uid, bytes).await?;
        }
        remote.put_hash_record(digest, fmt, location).await?;
    }

    let label_digests: Vec<Digest> = metadata_digests(&records).into_iter().collect();
    let missing_labels = remote.find_missing_labels(&label_digests).await?;
    for digest in &missing_labels {
        let value = local.label(digest).await?;
        remote.put_label(digest, value).await?;
    }

    remote.set_branch_head(branch, &want).await?;
    Ok(want)
}
