//! Read-only and writer checkout facades over a commit or the staging area.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;

use crate::arrayset::RecordSnapshot;
use crate::backend::Backend;
use crate::backend::FormatCode;
use crate::backend::WriteTarget;
use crate::backend::chunked::ChunkedBackend;
use crate::backend::refonly::ReferenceOnlyBackend;
use crate::branch::BranchStore;
use crate::commit;
use crate::commit::CommitRecord;
use crate::commit::CommitSpec;
use crate::config::UserIdentity;
use crate::digest::CommitId;
use crate::digest::Digest;
use crate::digest::blake2b_hash;
use crate::error::Error;
use crate::error::Result;
use crate::hashindex::HashIndex;
use crate::hashindex::LabelStore;
use crate::keycodec::ArraysetName;
use crate::keycodec::MetadataKey;
use crate::keycodec::SampleKey;
use crate::kv::KvEnv;
use crate::schema::Schema;
use crate::schema::Tensor;
use crate::staging::StagingArea;
use crate::staging::StagingStatus;

/// The small closed set of backends dispatched by format code.
pub struct BackendSet {
    pub chunked: ChunkedBackend,
    pub refonly: ReferenceOnlyBackend,
}

impl BackendSet {
    pub fn backend_mut(&mut self, fmt: FormatCode) -> &mut dyn Backend {
        match fmt {
            FormatCode::Chunked => &mut self.chunked,
            FormatCode::ReferenceOnly => &mut self.refonly,
        }
    }
}

/// Read-only view at a fixed commit. Many can coexist.
pub struct ReadCheckout {
    pub commit_digest: CommitId,
    pub refs: RecordSnapshot,
    hash_index: HashIndex,
    label_store: LabelStore,
    backends: BackendSet,
}

impl ReadCheckout {
    pub fn new(commit_digest: CommitId, refs: RecordSnapshot, hash_index: HashIndex, label_store: LabelStore, backends: BackendSet) -> Self {
        Self { commit_digest, refs, hash_index, label_store, backends }
    }

    pub fn read_sample(&mut self, arrayset: &ArraysetName, key: &SampleKey) -> Result<Tensor> {
        let record = self.refs.arraysets.get(arrayset).ok_or_else(|| Error::not_found(format!("arrayset {arrayset} not found")))?;
        let digest = record.samples.get(key).ok_or_else(|| Error::not_found(format!("sample {key} not found in arrayset {arrayset}")))?;
        let (fmt, location) = self.hash_index.get(digest)?;
        self.backends.backend_mut(fmt).read(&location)
    }

    pub fn read_metadata(&self, key: &MetadataKey) -> Result<Vec<u8>> {
        let digest = self.refs.metadata.get(key).ok_or_else(|| Error::not_found(format!("metadata key {key} not found")))?;
        self.label_store.get(digest)
    }

    pub fn schema(&self, arrayset: &ArraysetName) -> Result<&Schema> {
        Ok(&self.refs.arraysets.get(arrayset).ok_or_else(|| Error::not_found(format!("arrayset {arrayset} not found")))?.schema)
    }

    pub fn arrayset_names(&self) -> impl Iterator<Item = &ArraysetName> {
        self.refs.arraysets.keys()
    }
}

/// At most one per branch; requires the writer lock. Reads from the staging
/// overlay, writes through to staging and the backend.
pub struct WriteCheckout {
    branch_name: String,
    writer_uuid: String,
    user: UserIdentity,
    staging: StagingArea,
    hash_index: HashIndex,
    label_store: LabelStore,
    branch_store: BranchStore,
    ref_env: Arc<KvEnv>,
    backends: BackendSet,
    promote_dir: std::path::PathBuf,
}

impl WriteCheckout {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        branch_name: impl Into<String>,
        writer_uuid: impl Into<String>,
        user: UserIdentity,
        staging: StagingArea,
        hash_index: HashIndex,
        label_store: LabelStore,
        branch_store: BranchStore,
        ref_env: Arc<KvEnv>,
        backends: BackendSet,
        promote_dir: std::path::PathBuf,
    ) -> Self {
        Self { branch_name: branch_name.into(), writer_uuid: writer_uuid.into(), user, staging, hash_index, label_store, branch_store, ref_env, backends, promote_dir }
    }

    fn head_refs(&self) -> Result<RecordSnapshot> {
        let head = self.branch_store.head(&self.branch_name)?;
        commit::load_refs(&self.ref_env, &head)
    }

    pub fn init_arrayset(&mut self, name: ArraysetName, schema: Schema) -> Result<()> {
        self.backends.chunked.create_schema(&schema)?;
        self.staging.init_arrayset(name, schema)
    }

    pub fn delete_arrayset(&mut self, name: &ArraysetName) -> Result<()> {
        self.staging.delete_arrayset(name)
    }

    pub fn put_sample(&mut self, arrayset: &ArraysetName, key: SampleKey, tensor: Tensor) -> Result<Digest> {
        let schema = self
            .staging
            .snapshot()
            .arraysets
            .get(arrayset)
            .ok_or_else(|| Error::not_found(format!("arrayset {arrayset} not found")))?
            .schema
            .clone();
        let digest = Digest::new(blake2b_hash(&tensor.bytes));
        let location = self.backends.chunked.write(&schema, &tensor, WriteTarget::Stage)?;
        self.hash_index.put(&digest, FormatCode::Chunked, &location, true)?;
        self.staging.put_sample(arrayset, key, digest.clone())?;
        Ok(digest)
    }

    pub fn delete_sample(&mut self, arrayset: &ArraysetName, key: &SampleKey) -> Result<()> {
        self.staging.delete_sample(arrayset, key)
    }

    pub fn set_metadata(&mut self, key: MetadataKey, value: &[u8]) -> Result<Digest> {
        let digest = Digest::new(blake2b_hash(value));
        self.label_store.put(&digest, value)?;
        self.staging.set_metadata(key, digest.clone())?;
        Ok(digest)
    }

    pub fn delete_metadata(&mut self, key: &MetadataKey) -> Result<()> {
        self.staging.delete_metadata(key)
    }

    pub fn status(&self) -> Result<StagingStatus> {
        Ok(self.staging.status(&self.head_refs()?))
    }

    /// Freezes staging into a new commit and advances the branch HEAD.
    pub fn commit(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<CommitId> {
        let head = self.branch_store.head(&self.branch_name)?;
        let head_refs = commit::load_refs(&self.ref_env, &head)?;
        if self.staging.status(&head_refs) == StagingStatus::Clean {
            return Err(Error::state("staging area is clean; nothing to commit"));
        }
        let refs = self.staging.snapshot();
        let spec = CommitSpec { user: self.user.name.clone(), email: self.user.email.clone(), message: message.into(), time: now, is_merge: false, merge_master: None, merge_dev: None };
        let parents = vec![head];
        let digest = commit::compute_commit_digest(&refs, &parents, &spec);
        commit::persist_commit(&self.ref_env, &CommitRecord { digest: digest.clone(), parents, spec, refs })?;
        self.branch_store.set(&self.branch_name, &digest)?;
        self.hash_index.clear_stage()?;
        self.backends.chunked.close()?;
        self.backends.chunked.promote_to(&self.promote_dir)?;
        Ok(digest)
    }

    /// Rewrites staging to equal HEAD byte-for-byte and sweeps unreferenced
    /// stage containers.
    pub fn reset_staging_area(&mut self) -> Result<()> {
        let head_refs = self.head_refs()?;
        self.staging.reset(&head_refs)?;
        self.hash_index.clear_stage()?;
        let referenced: HashSet<String> = self.hash_index.list_all().into_iter().map(|(_, _, loc)| loc.file_uid).collect();
        self.backends.chunked.sweep_unused(&referenced)
    }

    pub fn writer_uuid(&self) -> &str {
        &self.writer_uuid
    }
}

impl Drop for WriteCheckout {
    /// Releases the repository-wide writer lock this checkout acquired, win
    /// or lose, so a dropped-without-committing checkout never wedges the
    /// next `checkout_write` call.
    fn drop(&mut self) {
        let _ = self.branch_store.release_writer_lock(&self.writer_uuid);
    }
}
