//! An in-process `SyncTransport` over a [`crate::repo::Repository`], used to
//! drive push/fetch between two repositories in the same test process
//! without standing up a real network listener.

use async_trait::async_trait;

use super::SyncTransport;
use crate::backend::FormatCode;
use crate::commit::CommitRecord;
use crate::digest::CommitId;
use crate::digest::Digest;
use crate::error::Result;
use crate::location::BackendLocation;
use crate::repo::Repository;

pub struct LocalTransport<'a> {
    repo: &'a Repository,
}

impl<'a> LocalTransport<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl SyncTransport for LocalTransport<'_> {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn branch_head(&self, branch: &str) -> Result<Option<CommitId>> {
        self.repo.branch_head_opt(branch)
    }

    async fn set_branch_head(&self, branch: &str, head: &CommitId) -> Result<()> {
        self.repo.set_branch_head_direct(branch, head)
    }

    async fn find_missing_commits(&self, have: &[CommitId], want: &CommitId) -> Result<Vec<CommitId>> {
        self.repo.missing_commits(have, want)
    }

    async fn commit_record(&self, digest: &CommitId) -> Result<CommitRecord> {
        self.repo.commit_record(digest)
    }

    async fn put_commit_record(&self, record: CommitRecord) -> Result<()> {
        self.repo.put_commit_record_direct(&record)
    }

    async fn find_missing_hash_records(&self, digests: &[Digest]) -> Result<Vec<Digest>> {
        digests.iter().filter(|d| !self.repo.has_hash_record(d).unwrap_or(false)).cloned().map(Ok).collect()
    }

    async fn hash_record(&self, digest: &Digest) -> Result<(FormatCode, BackendLocation)> {
        self.repo.hash_record(digest)
    }

    async fn put_hash_record(&self, digest: &Digest, fmt: FormatCode, location: BackendLocation) -> Result<()> {
        self.repo.put_hash_record_direct(digest, fmt, location)
    }

    async fn find_missing_labels(&self, digests: &[Digest]) -> Result<Vec<Digest>> {
        digests.iter().filter(|d| !self.repo.has_label(d).unwrap_or(false)).cloned().map(Ok).collect()
    }

    async fn label(&self, digest: &Digest) -> Result<Vec<u8>> {
        self.repo.label(digest)
    }

    async fn put_label(&self, digest: &Digest, value: Vec<u8>) -> Result<()> {
        self.repo.put_label_direct(digest, value)
    }

    async fn has_container(&self, _fmt: FormatCode, uid: &str) -> Result<bool> {
        self.repo.has_container(uid)
    }

    async fn container_bytes(&self, _fmt: FormatCode, uid: &str) -> Result<Vec<u8>> {
        self.repo.container_bytes(uid)
    }

    async fn put_container_bytes(&self, _fmt: FormatCode, uid: &str, bytes: Vec<u8>) -> Result<()> {
        self.repo.put_container_bytes(uid, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keycodec::ArraysetName;
    use crate::keycodec::SampleKey;
    use crate::schema::DType;
    use crate::schema::Schema;
    use crate::schema::Tensor;
    use crate::sync;

    fn now() -> chrono::DateTime<chrono::Utc> {
        "2024-01-01T00:00:00Z".parse().unwrap()
    }

    #[tokio::test]
    async fn push_then_fetch_round_trips_a_commit_and_its_data() {
        let origin_dir = tempfile::tempdir().unwrap();
        let clone_dir = tempfile::tempdir().unwrap();
        let origin = Repository::init(origin_dir.path(), "Ada", "ada@example.invalid", now()).unwrap();
        let clone = Repository::init(clone_dir.path(), "Bea", "bea@example.invalid", now()).unwrap();

        {
            let mut wc = origin.checkout_write("master", Some("w1".into())).unwrap();
            wc.init_arrayset(ArraysetName::new("images").unwrap(), Schema::new("u".into(), vec![2], DType::F32, false, true)).unwrap();
            wc.put_sample(&ArraysetName::new("images").unwrap(), SampleKey::unnamed(0), Tensor::new(vec![2], DType::F32, vec![0; 8])).unwrap();
            wc.commit("add a sample", now()).unwrap();
        }

        let origin_transport = LocalTransport::new(&origin);
        let clone_transport = LocalTransport::new(&clone);
        let head = sync::fetch_refs(&origin_transport, &clone_transport, "master").await.unwrap();
        assert_eq!(clone.branch_head_opt("master").unwrap(), Some(head.clone()));

        let record = clone.commit_record(&head).unwrap();
        let digests: Vec<Digest> = record.refs.arraysets.values().flat_map(|a| a.samples.values()).cloned().collect();
        assert_eq!(digests.len(), 1);
        sync::fetch_data(&origin_transport, &clone_transport, &digests).await.unwrap();

        let mut rc = clone.checkout_read("master").unwrap();
        let tensor = rc.read_sample(&ArraysetName::new("images").unwrap(), &SampleKey::unnamed(0)).unwrap();
        assert_eq!(tensor.bytes, vec![0u8; 8]);
    }
}
