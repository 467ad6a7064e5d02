//! The staging area: a writer's mutable working copy, overlaid on HEAD until
//! committed.
//!
//! Staging's keyspace mirrors a
//! commit's ref keyspace key-by-key (`num_arraysets`, one key per sample,
//! …). We persist the same logical content — a [`RecordSnapshot`] — as a
//! single JSON blob in the `stage` env instead of exploding it into one KV
//! entry per sample; the CLEAN/DIRTY byte-for-byte comparison and every
//! staging operation behave identically either way, since both boil down to
//! comparing (or mutating) the same ordered snapshot.

use std::sync::Arc;

use crate::arrayset::ArraysetRecord;
use crate::arrayset::RecordSnapshot;
use crate::digest::Digest;
use crate::error::Error;
use crate::error::Result;
use crate::keycodec::ArraysetName;
use crate::keycodec::MetadataKey;
use crate::keycodec::SampleKey;
use crate::kv::KvEnv;
use crate::schema::Schema;

const SNAPSHOT_KEY: &[u8] = b"snapshot";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingStatus {
    Clean,
    Dirty,
}

pub struct StagingArea {
    stage_env: Arc<KvEnv>,
}

impl StagingArea {
    pub fn new(stage_env: Arc<KvEnv>) -> Self {
        Self { stage_env }
    }

    pub fn snapshot(&self) -> RecordSnapshot {
        match self.stage_env.get(SNAPSHOT_KEY) {
            Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            None => RecordSnapshot::new(),
        }
    }

    fn save(&self, snapshot: &RecordSnapshot) -> Result<()> {
        let bytes = serde_json::to_vec(snapshot).map_err(|e| Error::Corruption(format!("encoding staging snapshot: {e}")))?;
        let mut txn = self.stage_env.write_txn();
        txn.put(SNAPSHOT_KEY, &bytes)?;
        txn.commit();
        Ok(())
    }

    pub fn init_arrayset(&self, name: ArraysetName, schema: Schema) -> Result<()> {
        let mut snap = self.snapshot();
        if snap.arraysets.contains_key(&name) {
            return Err(Error::state(format!("arrayset {name} already exists")));
        }
        snap.arraysets.insert(name.clone(), ArraysetRecord::new(name, schema));
        self.save(&snap)
    }

    pub fn delete_arrayset(&self, name: &ArraysetName) -> Result<()> {
        let mut snap = self.snapshot();
        snap.arraysets.remove(name).ok_or_else(|| Error::not_found(format!("arrayset {name} not found")))?;
        self.save(&snap)
    }

    pub fn put_sample(&self, arrayset: &ArraysetName, key: SampleKey, digest: Digest) -> Result<()> {
        let mut snap = self.snapshot();
        let rec = snap.arraysets.get_mut(arrayset).ok_or_else(|| Error::not_found(format!("arrayset {arrayset} not found")))?;
        rec.samples.insert(key, digest);
        self.save(&snap)
    }

    pub fn delete_sample(&self, arrayset: &ArraysetName, key: &SampleKey) -> Result<()> {
        let mut snap = self.snapshot();
        let rec = snap.arraysets.get_mut(arrayset).ok_or_else(|| Error::not_found(format!("arrayset {arrayset} not found")))?;
        rec.samples.remove(key).ok_or_else(|| Error::not_found(format!("sample {key} not found in {arrayset}")))?;
        self.save(&snap)
    }

    pub fn set_metadata(&self, key: MetadataKey, digest: Digest) -> Result<()> {
        let mut snap = self.snapshot();
        snap.metadata.insert(key, digest);
        self.save(&snap)
    }

    pub fn delete_metadata(&self, key: &MetadataKey) -> Result<()> {
        let mut snap = self.snapshot();
        snap.metadata.remove(key).ok_or_else(|| Error::not_found(format!("metadata key {key} not found")))?;
        self.save(&snap)
    }

    /// Rewrites staging to equal `head_refs` byte-for-byte.
    pub fn reset(&self, head_refs: &RecordSnapshot) -> Result<()> {
        self.save(head_refs)
    }

    pub fn status(&self, head_refs: &RecordSnapshot) -> StagingStatus {
        if self.snapshot().canonical_bytes() == head_refs.canonical_bytes() {
            StagingStatus::Clean
        } else {
            StagingStatus::Dirty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::blake2b_hash;
    use crate::schema::DType;

    fn digest(s: &str) -> Digest {
        Digest::new(blake2b_hash(s.as_bytes()))
    }

    #[test]
    fn put_sample_requires_existing_arrayset() {
        let tmp = tempfile::tempdir().unwrap();
        let env = Arc::new(KvEnv::open(tmp.path()).unwrap());
        let staging = StagingArea::new(env.clone());
        let name = ArraysetName::new("d").unwrap();
        let err = staging.put_sample(&name, SampleKey::unnamed(0), digest("x")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn status_is_dirty_after_mutation_and_clean_after_reset() {
        let tmp = tempfile::tempdir().unwrap();
        let env = Arc::new(KvEnv::open(tmp.path()).unwrap());
        let staging = StagingArea::new(env.clone());
        let head = RecordSnapshot::new();
        assert_eq!(staging.status(&head), StagingStatus::Clean);

        let name = ArraysetName::new("d").unwrap();
        staging.init_arrayset(name.clone(), Schema::new("u".into(), vec![4], DType::I64, false, true)).unwrap();
        assert_eq!(staging.status(&head), StagingStatus::Dirty);

        staging.reset(&head).unwrap();
        assert_eq!(staging.status(&head), StagingStatus::Clean);
    }

    #[test]
    fn snapshot_round_trips_through_save() {
        let tmp = tempfile::tempdir().unwrap();
        let env = Arc::new(KvEnv::open(tmp.path()).unwrap());
        let staging = StagingArea::new(env.clone());
        let name = ArraysetName::new("d").unwrap();
        staging.init_arrayset(name.clone(), Schema::new("u".into(), vec![4], DType::I64, false, true)).unwrap();
        staging.put_sample(&name, SampleKey::unnamed(0), digest("s0")).unwrap();
        let snap = staging.snapshot();
        assert_eq!(snap.arraysets[&name].samples.len(), 1);
    }
}
