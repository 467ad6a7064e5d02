//! Branch HEAD pointers, the single-holder writer lock, and the remote
//! registry — all three live in the `branch` KV env.

use crate::digest::CommitId;
use crate::error::Error;
use crate::error::Result;
use std::sync::Arc;

use crate::kv::KvEnv;

const WRITER_LOCK_KEY: &[u8] = b"writer_lock";

/// Reserved holder id that always succeeds at releasing the writer lock,
/// regardless of who holds it.
pub const FORCE_RELEASE_SENTINEL: &str = "FORCE_RELEASE";

fn branch_key(name: &str) -> Vec<u8> {
    let mut out = b"branch\x1f".to_vec();
    out.extend_from_slice(name.as_bytes());
    out
}

fn remote_key(name: &str) -> Vec<u8> {
    let mut out = b"remote\x1f".to_vec();
    out.extend_from_slice(name.as_bytes());
    out
}

pub struct BranchStore {
    env: Arc<KvEnv>,
}

impl BranchStore {
    pub fn new(env: Arc<KvEnv>) -> Self {
        Self { env }
    }

    pub fn set(&self, name: &str, head: &CommitId) -> Result<()> {
        let mut txn = self.env.write_txn();
        txn.put(&branch_key(name), head.as_bytes())?;
        txn.commit();
        Ok(())
    }

    pub fn head(&self, name: &str) -> Result<CommitId> {
        self.env
            .get(&branch_key(name))
            .map(CommitId::new)
            .ok_or_else(|| Error::not_found(format!("branch {name} not found")))
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let mut txn = self.env.write_txn();
        txn.delete(&branch_key(name))?;
        txn.commit();
        Ok(())
    }

    pub fn list(&self) -> Vec<(String, CommitId)> {
        let txn = self.env.read_txn();
        txn.iter_prefix(b"branch\x1f")
            .map(|(k, v)| (String::from_utf8_lossy(&k[b"branch\x1f".len()..]).into_owned(), CommitId::new(v.to_vec())))
            .collect()
    }

    /// Fails if the lock is held by a different, non-empty holder.
    pub fn acquire_writer_lock(&self, holder_uuid: &str) -> Result<()> {
        let mut txn = self.env.write_txn();
        if let Some(existing) = txn.get(WRITER_LOCK_KEY) {
            if !existing.is_empty() && existing != holder_uuid.as_bytes() {
                return Err(Error::state("writer lock is already held by another writer"));
            }
        }
        txn.put(WRITER_LOCK_KEY, holder_uuid.as_bytes())?;
        txn.commit();
        Ok(())
    }

    /// Succeeds if `holder_uuid` matches the current holder, if there is no
    /// current holder, or if `holder_uuid` is [`FORCE_RELEASE_SENTINEL`].
    pub fn release_writer_lock(&self, holder_uuid: &str) -> Result<()> {
        let mut txn = self.env.write_txn();
        let held = txn.get(WRITER_LOCK_KEY).map(|b| b.to_vec());
        match held {
            None => Ok(()),
            Some(h) if h == holder_uuid.as_bytes() || holder_uuid == FORCE_RELEASE_SENTINEL => {
                txn.delete(WRITER_LOCK_KEY)?;
                txn.commit();
                Ok(())
            }
            Some(_) => Err(Error::state("writer lock is held by a different holder")),
        }
    }

    pub fn add_remote(&self, name: &str, address: &str) -> Result<()> {
        let mut txn = self.env.write_txn();
        txn.put(&remote_key(name), address.as_bytes())?;
        txn.commit();
        Ok(())
    }

    pub fn remove_remote(&self, name: &str) -> Result<()> {
        let mut txn = self.env.write_txn();
        txn.delete(&remote_key(name))?;
        txn.commit();
        Ok(())
    }

    pub fn remote_address(&self, name: &str) -> Result<String> {
        let bytes = self.env.get(&remote_key(name)).ok_or_else(|| Error::not_found(format!("remote {name} not found")))?;
        String::from_utf8(bytes).map_err(|_| Error::Corruption(format!("remote {name} address is not valid utf-8")))
    }

    pub fn list_remotes(&self) -> Vec<(String, String)> {
        let txn = self.env.read_txn();
        txn.iter_prefix(b"remote\x1f")
            .map(|(k, v)| (String::from_utf8_lossy(&k[b"remote\x1f".len()..]).into_owned(), String::from_utf8_lossy(v).into_owned()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::blake2b_hash;

    fn env(tmp: &std::path::Path) -> Arc<KvEnv> {
        Arc::new(KvEnv::open(tmp).unwrap())
    }

    #[test]
    fn branch_set_and_head_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let env = env(tmp.path());
        let store = BranchStore::new(env.clone());
        let head = CommitId::new(blake2b_hash(b"c1"));
        store.set("master", &head).unwrap();
        assert_eq!(store.head("master").unwrap(), head);
    }

    #[test]
    fn writer_lock_blocks_other_holders_until_released() {
        let tmp = tempfile::tempdir().unwrap();
        let env = env(tmp.path());
        let store = BranchStore::new(env.clone());
        store.acquire_writer_lock("alice").unwrap();
        assert!(store.acquire_writer_lock("bob").is_err());
        assert!(store.release_writer_lock("bob").is_err());
        store.release_writer_lock("alice").unwrap();
        store.acquire_writer_lock("bob").unwrap();
    }

    #[test]
    fn force_release_sentinel_always_releases() {
        let tmp = tempfile::tempdir().unwrap();
        let env = env(tmp.path());
        let store = BranchStore::new(env.clone());
        store.acquire_writer_lock("alice").unwrap();
        store.release_writer_lock(FORCE_RELEASE_SENTINEL).unwrap();
        store.acquire_writer_lock("bob").unwrap();
    }

    #[test]
    fn remotes_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let env = env(tmp.path());
        let store = BranchStore::new(env.clone());
        store.add_remote("origin", "http://example.invalid").unwrap();
        assert_eq!(store.remote_address("origin").unwrap(), "http://example.invalid");
        store.remove_remote("origin").unwrap();
        assert!(store.remote_address("origin").is_err());
    }
}
