//! Digest → backend location mapping, plus the "pending in staging" set used
//! for stage cleanup and push discovery.
//!
//! Backed by two [`crate::kv::KvEnv`]s: `hash` (every digest this repository
//! has ever resolved, committed or not) and `stagehash` (digests written
//! since the last commit — cleared by [`HashIndex::clear_stage`] once they
//! are promoted or discarded).

use std::sync::Arc;

use crate::backend::FormatCode;
use crate::digest::Digest;
use crate::error::Error;
use crate::error::Result;
use crate::kv::KvEnv;
use crate::location;
use crate::location::BackendLocation;

pub struct HashIndex {
    hash_env: Arc<KvEnv>,
    stagehash_env: Arc<KvEnv>,
}

impl HashIndex {
    pub fn new(hash_env: Arc<KvEnv>, stagehash_env: Arc<KvEnv>) -> Self {
        Self { hash_env, stagehash_env }
    }

    /// Records where `digest`'s bytes live. `pending` marks the digest as
    /// written since the last commit, for later sweep/push discovery.
    pub fn put(&self, digest: &Digest, fmt: FormatCode, location: &BackendLocation, pending: bool) -> Result<()> {
        let value = location.encode(fmt);
        let mut txn = self.hash_env.write_txn();
        txn.put(digest.as_bytes(), &value)?;
        txn.commit();
        if pending {
            let mut stxn = self.stagehash_env.write_txn();
            stxn.put(digest.as_bytes(), b"1")?;
            stxn.commit();
        }
        Ok(())
    }

    pub fn get(&self, digest: &Digest) -> Result<(FormatCode, BackendLocation)> {
        let bytes = self
            .hash_env
            .get(digest.as_bytes())
            .ok_or_else(|| Error::not_found(format!("digest {digest} not present in the hash index")))?;
        location::decode(&bytes).map_err(|e| Error::Corruption(format!("decoding hash-index record for {digest}: {e}")))
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.hash_env.get(digest.as_bytes()).is_some()
    }

    pub fn list_all(&self) -> Vec<(Digest, FormatCode, BackendLocation)> {
        let txn = self.hash_env.read_txn();
        txn.iter_all()
            .filter_map(|(k, v)| location::decode(v).ok().map(|(fmt, loc)| (Digest::new(k.to_vec()), fmt, loc)))
            .collect()
    }

    /// Digests written since the last commit (or since the last
    /// [`HashIndex::clear_stage`]).
    pub fn pending_digests(&self) -> Vec<Digest> {
        let txn = self.stagehash_env.read_txn();
        txn.iter_all().map(|(k, _)| Digest::new(k.to_vec())).collect()
    }

    pub fn clear_stage(&self) -> Result<()> {
        let keys: Vec<Vec<u8>> = {
            let txn = self.stagehash_env.read_txn();
            txn.iter_all().map(|(k, _)| k.to_vec()).collect()
        };
        let mut txn = self.stagehash_env.write_txn();
        for key in keys {
            txn.delete(&key)?;
        }
        txn.commit();
        Ok(())
    }
}

/// Digest → raw bytes lookup for metadata values, backed by the `label` KV
/// env. Unlike [`HashIndex`], label values are small strings stored inline
/// rather than addressed through a backend, so there is no format code or
/// location to track.
pub struct LabelStore {
    label_env: Arc<KvEnv>,
}

impl LabelStore {
    pub fn new(label_env: Arc<KvEnv>) -> Self {
        Self { label_env }
    }

    pub fn put(&self, digest: &Digest, value: &[u8]) -> Result<()> {
        let mut txn = self.label_env.write_txn();
        txn.put(digest.as_bytes(), value)?;
        txn.commit();
        Ok(())
    }

    pub fn get(&self, digest: &Digest) -> Result<Vec<u8>> {
        self.label_env.get(digest.as_bytes()).ok_or_else(|| Error::not_found(format!("metadata value {digest} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::blake2b_hash;
    use crate::kv::KvEnv;

    fn envs(tmp: &std::path::Path) -> (Arc<KvEnv>, Arc<KvEnv>) {
        (Arc::new(KvEnv::open(tmp.join("hash")).unwrap()), Arc::new(KvEnv::open(tmp.join("stagehash")).unwrap()))
    }

    #[test]
    fn put_then_get_round_trips_location() {
        let tmp = tempfile::tempdir().unwrap();
        let (hash_env, stagehash_env) = envs(tmp.path());
        let index = HashIndex::new(hash_env.clone(), stagehash_env.clone());
        let digest = Digest::new(blake2b_hash(b"sample"));
        let loc = BackendLocation::new("uid1", 0, 3, vec![4]);
        index.put(&digest, FormatCode::Chunked, &loc, true).unwrap();
        let (fmt, got) = index.get(&digest).unwrap();
        assert_eq!(fmt, FormatCode::Chunked);
        assert_eq!(got, loc);
        assert_eq!(index.pending_digests(), vec![digest]);
    }

    #[test]
    fn clear_stage_empties_pending_set_but_not_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let (hash_env, stagehash_env) = envs(tmp.path());
        let index = HashIndex::new(hash_env.clone(), stagehash_env.clone());
        let digest = Digest::new(blake2b_hash(b"x"));
        let loc = BackendLocation::new("uid", 0, 0, vec![]);
        index.put(&digest, FormatCode::Chunked, &loc, true).unwrap();
        index.clear_stage().unwrap();
        assert!(index.pending_digests().is_empty());
        assert!(index.contains(&digest));
    }

    #[test]
    fn get_missing_digest_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let (hash_env, stagehash_env) = envs(tmp.path());
        let index = HashIndex::new(hash_env.clone(), stagehash_env.clone());
        let digest = Digest::new(blake2b_hash(b"missing"));
        assert!(matches!(index.get(&digest), Err(Error::NotFound(_))));
    }

    #[test]
    fn label_store_round_trips_value_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let env = Arc::new(KvEnv::open(tmp.path()).unwrap());
        let labels = LabelStore::new(env.clone());
        let digest = Digest::new(blake2b_hash(b"v"));
        labels.put(&digest, b"hello").unwrap();
        assert_eq!(labels.get(&digest).unwrap(), b"hello");
    }
}
