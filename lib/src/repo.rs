//! The repository handle: owns the KV registry and config, and constructs
//! backends/checkouts on demand. The writer lock, the txn registry, and the
//! open-file table are reached only through this struct's fields, never
//! through a process-wide singleton.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;

use crate::backend::FormatCode;
use crate::backend::chunked::ChunkedBackend;
use crate::backend::refonly::ReferenceOnlyBackend;
use crate::branch::BranchStore;
use crate::checkout::BackendSet;
use crate::checkout::ReadCheckout;
use crate::checkout::WriteCheckout;
use crate::commit;
use crate::commit::CommitRecord;
use crate::commit::CommitSpec;
use crate::config::RepoConfig;
use crate::diffmerge;
use crate::diffmerge::ConflictReport;
use crate::digest::CommitId;
use crate::error::Error;
use crate::error::Result;
use crate::hashindex::HashIndex;
use crate::hashindex::LabelStore;
use crate::kv::KvRegistry;
use crate::staging::StagingArea;
use crate::util::random_uid;

const CONFIG_FILE: &str = "config.toml";

pub struct Repository {
    store_root: PathBuf,
    config: RepoConfig,
    kv: KvRegistry,
}

impl Repository {
    fn store_dir(repo_root: &Path) -> PathBuf {
        repo_root.join(".store")
    }

    pub fn init(repo_root: &Path, name: impl Into<String>, email: impl Into<String>, now: DateTime<Utc>) -> Result<Self> {
        let store_root = Self::store_dir(repo_root);
        fs::create_dir_all(&store_root).map_err(|e| Error::io(&store_root, e))?;
        let config = RepoConfig::new(name, email);
        config.save(&store_root.join(CONFIG_FILE))?;
        let kv = KvRegistry::new(&store_root);

        let ref_env = kv.env("ref")?;
        let branch_env = kv.env("branch")?;
        let root_refs = crate::arrayset::RecordSnapshot::new();
        let spec = CommitSpec {
            user: config.user.name.clone(),
            email: config.user.email.clone(),
            message: "initial commit".into(),
            time: now,
            is_merge: false,
            merge_master: None,
            merge_dev: None,
        };
        let digest = commit::compute_commit_digest(&root_refs, &[], &spec);
        commit::persist_commit(&ref_env, &CommitRecord { digest: digest.clone(), parents: vec![], spec, refs: root_refs })?;
        BranchStore::new(branch_env).set("master", &digest)?;

        Ok(Self { store_root, config, kv })
    }

    pub fn open(repo_root: &Path) -> Result<Self> {
        let store_root = Self::store_dir(repo_root);
        let config = RepoConfig::load(&store_root.join(CONFIG_FILE))?;
        let kv = KvRegistry::new(&store_root);
        Ok(Self { store_root, config, kv })
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    fn data_dir(&self, fmt: FormatCode) -> PathBuf {
        self.store_root.join("data").join(fmt.as_str())
    }

    fn stage_data_dir(&self, fmt: FormatCode) -> PathBuf {
        self.store_root.join("stage_data").join(fmt.as_str())
    }

    fn store_data_dir(&self, fmt: FormatCode) -> PathBuf {
        self.store_root.join("store_data").join(fmt.as_str())
    }

    fn remote_data_dir(&self, fmt: FormatCode) -> PathBuf {
        self.store_root.join("remote_data").join(fmt.as_str())
    }

    fn chunked_backend_for_read(&self) -> Result<ChunkedBackend> {
        let fmt = FormatCode::Chunked;
        ChunkedBackend::new(
            self.data_dir(fmt),
            self.store_data_dir(fmt),
            vec![self.store_data_dir(fmt), self.remote_data_dir(fmt), self.stage_data_dir(fmt)],
            self.config.backend.chunked.to_backend_config()?,
        )
    }

    fn chunked_backend_for_write(&self) -> Result<ChunkedBackend> {
        let fmt = FormatCode::Chunked;
        ChunkedBackend::new(
            self.data_dir(fmt),
            self.stage_data_dir(fmt),
            vec![self.stage_data_dir(fmt), self.store_data_dir(fmt)],
            self.config.backend.chunked.to_backend_config()?,
        )
    }

    fn chunked_backend_for_fetch(&self) -> Result<ChunkedBackend> {
        let fmt = FormatCode::Chunked;
        ChunkedBackend::new(
            self.data_dir(fmt),
            self.remote_data_dir(fmt),
            vec![self.remote_data_dir(fmt), self.store_data_dir(fmt)],
            self.config.backend.chunked.to_backend_config()?,
        )
    }

    pub fn checkout_read(&self, branch_or_commit: &str) -> Result<ReadCheckout> {
        let digest = self.resolve_commit(branch_or_commit)?;
        let ref_env = self.kv.env("ref")?;
        let refs = commit::load_refs(&ref_env, &digest)?;
        let hash_index = HashIndex::new(self.kv.env("hash")?, self.kv.env("stagehash")?);
        let label_store = LabelStore::new(self.kv.env("label")?);
        let backends = BackendSet { chunked: self.chunked_backend_for_read()?, refonly: ReferenceOnlyBackend };
        Ok(ReadCheckout::new(digest, refs, hash_index, label_store, backends))
    }

    /// Resolves a branch name to its HEAD, or parses `name_or_digest` as a
    /// commit digest hex if no branch of that name exists.
    pub fn resolve_commit(&self, name_or_digest: &str) -> Result<CommitId> {
        let branch_env = self.kv.env("branch")?;
        let branches = BranchStore::new(branch_env);
        if let Ok(head) = branches.head(name_or_digest) {
            return Ok(head);
        }
        CommitId::from_hex(name_or_digest).ok_or_else(|| Error::not_found(format!("no branch or commit named {name_or_digest}")))
    }

    pub fn checkout_write(&self, branch_name: &str, writer_uuid: Option<String>) -> Result<WriteCheckout> {
        let branch_env = self.kv.env("branch")?;
        let uuid = writer_uuid.unwrap_or_else(random_uid);
        BranchStore::new(branch_env.clone()).acquire_writer_lock(&uuid)?;

        let ref_env = self.kv.env("ref")?;
        let stage_env = self.kv.env("stage")?;
        let hash_env = self.kv.env("hash")?;
        let stagehash_env = self.kv.env("stagehash")?;
        let label_env = self.kv.env("label")?;
        let backends = BackendSet { chunked: self.chunked_backend_for_write()?, refonly: ReferenceOnlyBackend };

        Ok(WriteCheckout::new(
            branch_name.to_string(),
            uuid,
            self.config.user.clone(),
            StagingArea::new(stage_env),
            HashIndex::new(hash_env, stagehash_env),
            LabelStore::new(label_env),
            BranchStore::new(branch_env),
            ref_env,
            backends,
            self.store_data_dir(FormatCode::Chunked),
        ))
    }

    pub fn branches(&self) -> Result<Vec<(String, CommitId)>> {
        let env = self.kv.env("branch")?;
        Ok(BranchStore::new(env).list())
    }

    pub fn create_branch(&self, name: &str, at: &str) -> Result<()> {
        let target = self.resolve_commit(at)?;
        let env = self.kv.env("branch")?;
        BranchStore::new(env).set(name, &target)
    }

    pub fn remove_branch(&self, name: &str) -> Result<()> {
        let env = self.kv.env("branch")?;
        BranchStore::new(env).remove(name)
    }

    /// `log`: commit history reachable from `branch_or_commit`, newest first.
    pub fn log(&self, branch_or_commit: &str) -> Result<Vec<CommitRecord>> {
        let head = self.resolve_commit(branch_or_commit)?;
        let ref_env = self.kv.env("ref")?;
        let reachable = commit::ancestors(&ref_env, &head)?;
        let mut records: Vec<CommitRecord> = reachable.keys().map(|d| commit::load_commit(&ref_env, d)).collect::<Result<_>>()?;
        records.sort_by(|a, b| b.spec.time.cmp(&a.spec.time).then_with(|| a.digest.hex().cmp(&b.digest.hex())));
        Ok(records)
    }

    /// Counts of arraysets/samples/metadata at a commit (the `hangar-py`
    /// `summary()`/`log()` CLI surface, supplemented here).
    pub fn summary(&self, branch_or_commit: &str) -> Result<RepoSummary> {
        let digest = self.resolve_commit(branch_or_commit)?;
        let ref_env = self.kv.env("ref")?;
        let refs = commit::load_refs(&ref_env, &digest)?;
        Ok(RepoSummary {
            commit: digest,
            num_arraysets: refs.arraysets.len(),
            num_samples: refs.arraysets.values().map(|r| r.samples.len()).sum(),
            num_metadata: refs.metadata.len(),
        })
    }

    /// Fast-forwards or three-way merges `dev` into `master`. Requires
    /// staging CLEAN and the writer lock acquirable.
    pub fn merge(&self, master: &str, dev: &str, message: impl Into<String>, now: DateTime<Utc>, writer_uuid: &str) -> Result<MergeOutcome> {
        let branch_env = self.kv.env("branch")?;
        let branches = BranchStore::new(branch_env);
        branches.acquire_writer_lock(writer_uuid)?;

        let stage_env = self.kv.env("stage")?;
        let staging = StagingArea::new(stage_env);
        let master_head = branches.head(master)?;
        let dev_head = branches.head(dev)?;
        let ref_env = self.kv.env("ref")?;
        let master_refs = commit::load_refs(&ref_env, &master_head)?;
        if staging.status(&master_refs) != crate::staging::StagingStatus::Clean {
            branches.release_writer_lock(writer_uuid)?;
            return Err(Error::state("staging area must be CLEAN before a merge"));
        }

        if commit::can_fast_forward(&ref_env, &master_head, &dev_head)? {
            branches.set(master, &dev_head)?;
            branches.release_writer_lock(writer_uuid)?;
            return Ok(MergeOutcome::FastForward { new_head: dev_head });
        }

        let ancestor_digest = commit::closest_common_ancestor(&ref_env, &master_head, &dev_head)?
            .ok_or_else(|| Error::state("master and dev share no common ancestor"))?;
        let ancestor_refs = commit::load_refs(&ref_env, &ancestor_digest)?;
        let dev_refs = commit::load_refs(&ref_env, &dev_head)?;

        let report = diffmerge::determine_conflicts(&ancestor_refs, &master_refs, &dev_refs);
        if report.conflict_found {
            branches.release_writer_lock(writer_uuid)?;
            return Ok(MergeOutcome::Conflict(report));
        }

        let merged_refs = diffmerge::apply_three_way_patch(&ancestor_refs, &master_refs, &dev_refs);
        let spec = CommitSpec {
            user: self.config.user.name.clone(),
            email: self.config.user.email.clone(),
            message: message.into(),
            time: now,
            is_merge: true,
            merge_master: Some(master_head.clone()),
            merge_dev: Some(dev_head.clone()),
        };
        let parents = vec![master_head, dev_head];
        let digest = commit::compute_commit_digest(&merged_refs, &parents, &spec);
        commit::persist_commit(&ref_env, &CommitRecord { digest: digest.clone(), parents, spec, refs: merged_refs })?;
        branches.set(master, &digest)?;
        branches.release_writer_lock(writer_uuid)?;
        Ok(MergeOutcome::Merged { new_head: digest })
    }

    pub fn add_remote(&self, name: &str, address: &str) -> Result<()> {
        let env = self.kv.env("branch")?;
        BranchStore::new(env).add_remote(name, address)
    }

    pub fn remove_remote(&self, name: &str) -> Result<()> {
        let env = self.kv.env("branch")?;
        BranchStore::new(env).remove_remote(name)
    }

    pub fn list_remotes(&self) -> Result<Vec<(String, String)>> {
        let env = self.kv.env("branch")?;
        Ok(BranchStore::new(env).list_remotes())
    }

    pub fn kv(&self) -> &KvRegistry {
        &self.kv
    }

    pub fn store_root(&self) -> &Path {
        &self.store_root
    }

    /// Promotes every container currently under `remote_data/` into
    /// `store_data/` once a fetch's commit record has been materialised.
    pub fn promote_remote_data(&self) -> Result<()> {
        let fmt = FormatCode::Chunked;
        self.chunked_backend_for_fetch()?.promote_to(&self.store_data_dir(fmt))
    }

    pub fn referenced_container_uids(&self) -> Result<HashSet<String>> {
        let hash_env = self.kv.env("hash")?;
        let stagehash_env = self.kv.env("stagehash")?;
        let index = HashIndex::new(hash_env, stagehash_env);
        Ok(index.list_all().into_iter().map(|(_, _, loc)| loc.file_uid).collect())
    }

    // -- sync protocol primitives, driven by `crate::sync::local::LocalTransport` --

    pub fn branch_head_opt(&self, branch: &str) -> Result<Option<CommitId>> {
        let env = self.kv.env("branch")?;
        Ok(BranchStore::new(env).head(branch).ok())
    }

    pub fn set_branch_head_direct(&self, branch: &str, head: &CommitId) -> Result<()> {
        let env = self.kv.env("branch")?;
        BranchStore::new(env).set(branch, head)
    }

    /// Every ancestor of `want` (inclusive) that is not also an ancestor of
    /// one of `have`.
    pub fn missing_commits(&self, have: &[CommitId], want: &CommitId) -> Result<Vec<CommitId>> {
        let ref_env = self.kv.env("ref")?;
        let want_ancestors = commit::ancestors(&ref_env, want)?;
        let mut known = HashSet::new();
        for h in have {
            known.extend(commit::ancestors(&ref_env, h)?.into_keys());
        }
        Ok(want_ancestors.into_keys().filter(|d| !known.contains(d)).collect())
    }

    pub fn commit_record(&self, digest: &CommitId) -> Result<CommitRecord> {
        commit::load_commit(&self.kv.env("ref")?, digest)
    }

    pub fn put_commit_record_direct(&self, record: &CommitRecord) -> Result<()> {
        commit::persist_commit(&self.kv.env("ref")?, record)
    }

    pub fn has_hash_record(&self, digest: &crate::digest::Digest) -> Result<bool> {
        let hash_env = self.kv.env("hash")?;
        let stagehash_env = self.kv.env("stagehash")?;
        Ok(HashIndex::new(hash_env, stagehash_env).contains(digest))
    }

    pub fn hash_record(&self, digest: &crate::digest::Digest) -> Result<(FormatCode, crate::location::BackendLocation)> {
        let hash_env = self.kv.env("hash")?;
        let stagehash_env = self.kv.env("stagehash")?;
        HashIndex::new(hash_env, stagehash_env).get(digest)
    }

    pub fn put_hash_record_direct(&self, digest: &crate::digest::Digest, fmt: FormatCode, location: crate::location::BackendLocation) -> Result<()> {
        let hash_env = self.kv.env("hash")?;
        let stagehash_env = self.kv.env("stagehash")?;
        HashIndex::new(hash_env, stagehash_env).put(digest, fmt, &location, false)
    }

    pub fn has_label(&self, digest: &crate::digest::Digest) -> Result<bool> {
        let label_env = self.kv.env("label")?;
        Ok(label_env.get(digest.as_bytes()).is_some())
    }

    pub fn label(&self, digest: &crate::digest::Digest) -> Result<Vec<u8>> {
        LabelStore::new(self.kv.env("label")?).get(digest)
    }

    pub fn put_label_direct(&self, digest: &crate::digest::Digest, value: Vec<u8>) -> Result<()> {
        LabelStore::new(self.kv.env("label")?).put(digest, &value)
    }

    /// Whether container `uid`'s bytes are already present locally.
    pub fn has_container(&self, uid: &str) -> Result<bool> {
        Ok(self.chunked_backend_for_read()?.read_container(uid).is_ok())
    }

    /// Reads a container's raw bytes, to serve a sync peer's request.
    pub fn container_bytes(&self, uid: &str) -> Result<Vec<u8>> {
        self.chunked_backend_for_read()?.read_container(uid)
    }

    /// Writes a fetched or pushed container directly into `store_data/`.
    /// Replication copies containers verbatim, so every existing
    /// `BackendLocation` referencing `uid` is valid immediately.
    pub fn put_container_bytes(&self, uid: &str, bytes: &[u8]) -> Result<()> {
        let fmt = FormatCode::Chunked;
        let backend = ChunkedBackend::new(
            self.data_dir(fmt),
            self.store_data_dir(fmt),
            vec![self.store_data_dir(fmt)],
            self.config.backend.chunked.to_backend_config()?,
        )?;
        backend.receive_container(uid, bytes)
    }
}

#[derive(Debug, Clone)]
pub struct RepoSummary {
    pub commit: CommitId,
    pub num_arraysets: usize,
    pub num_samples: usize,
    pub num_metadata: usize,
}

#[derive(Debug)]
pub enum MergeOutcome {
    FastForward { new_head: CommitId },
    Merged { new_head: CommitId },
    Conflict(ConflictReport),
}
