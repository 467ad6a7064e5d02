//! Named transactional key-value stores and the registry that owns them.
//!
//! Each env is backed by a directory with one file per key (hex-encoded
//! filename, raw value bytes), written with `tempfile`'s create-then-persist
//! so a crash never leaves a half-written value, the same durability pattern
//! used for loose object files in content-addressed stores. An in-memory
//! `BTreeMap` mirrors the directory so prefix iteration is cheap and
//! genuinely ordered. The txn registry lives as a field of the repository
//! handle rather than behind a process-wide singleton.
//!
//! One `Mutex` per env both guards the in-memory mirror and gives write
//! exclusivity: holding a [`WriteTxn`] holds the lock, so the registry can
//! never have two open write transactions against the same env at once.
//! Read transactions are point-in-time snapshots, explicitly closed (though
//! dropping one is equally correct).

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::error::Error;
use crate::error::Result;

#[derive(Debug)]
pub struct KvEnv {
    dir: PathBuf,
    data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl KvEnv {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        let mut data = BTreeMap::new();
        for entry in fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))? {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok(key) = hex::decode(name) else { continue };
            let value = fs::read(entry.path()).map_err(|e| Error::io(entry.path(), e))?;
            data.insert(key, value);
        }
        Ok(Self { dir, data: Mutex::new(data) })
    }

    fn key_path(&self, key: &[u8]) -> PathBuf {
        self.dir.join(hex::encode(key))
    }

    /// Opens the single write transaction for this env, blocking until any
    /// other writer has committed or dropped theirs.
    pub fn write_txn(&self) -> WriteTxn<'_> {
        let guard = self.data.lock().unwrap_or_else(|p| p.into_inner());
        WriteTxn { env: self, guard }
    }

    /// Takes a read-only snapshot of the env as it stands right now.
    pub fn read_txn(&self) -> ReadTxn {
        let guard = self.data.lock().unwrap_or_else(|p| p.into_inner());
        ReadTxn { snapshot: guard.clone() }
    }

    /// Convenience one-shot read outside of an explicit [`ReadTxn`].
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.lock().unwrap_or_else(|p| p.into_inner()).get(key).cloned()
    }
}

pub struct WriteTxn<'a> {
    env: &'a KvEnv,
    guard: MutexGuard<'a, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl WriteTxn<'_> {
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let path = self.env.key_path(key);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.env.dir).map_err(|e| Error::io(&self.env.dir, e))?;
        tmp.write_all(value).map_err(|e| Error::io(&path, e))?;
        tmp.persist(&path).map_err(|e| Error::io(&path, e.error))?;
        self.guard.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        let path = self.env.key_path(key);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
        }
        self.guard.remove(key);
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.guard.get(key).map(|v| v.as_slice())
    }

    /// Consumes the transaction, releasing the write lock. Values are
    /// already durable as of each `put`/`delete`; this exists so call sites
    /// read the same way as a transactional KV store's commit boundary.
    pub fn commit(self) {}
}

pub struct ReadTxn {
    snapshot: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl ReadTxn {
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.snapshot.get(key).map(|v| v.as_slice())
    }

    pub fn iter_prefix<'a>(&'a self, prefix: &'a [u8]) -> impl Iterator<Item = (&'a [u8], &'a [u8])> {
        self.snapshot.range(prefix.to_vec()..).take_while(move |(k, _)| k.starts_with(prefix)).map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub fn iter_all(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.snapshot.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    pub fn close(self) {}
}

/// Owns every named env under `<repo>/.store/`, opening each lazily on first
/// use and handing out the same `Arc<KvEnv>` to every caller thereafter.
#[derive(Debug)]
pub struct KvRegistry {
    root: PathBuf,
    envs: Mutex<HashMap<String, Arc<KvEnv>>>,
}

impl KvRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), envs: Mutex::new(HashMap::new()) }
    }

    pub fn env(&self, name: &str) -> Result<Arc<KvEnv>> {
        let mut envs = self.envs.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = envs.get(name) {
            return Ok(existing.clone());
        }
        let dir = self.root.join(name);
        let env = Arc::new(KvEnv::open(dir)?);
        envs.insert(name.to_string(), env.clone());
        Ok(env)
    }

    /// The per-commit unpacked ref env readers use, keyed by commit digest
    /// hex (`commit_cache/<hex>/`).
    pub fn commit_cache_env(&self, commit_digest_hex: &str) -> Result<Arc<KvEnv>> {
        self.env(&format!("commit_cache/{commit_digest_hex}"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_reopen_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let env = KvEnv::open(tmp.path()).unwrap();
            let mut txn = env.write_txn();
            txn.put(b"k1", b"v1").unwrap();
            txn.commit();
        }
        let reopened = KvEnv::open(tmp.path()).unwrap();
        assert_eq!(reopened.get(b"k1"), Some(b"v1".to_vec()));
    }

    #[test]
    fn prefix_iteration_is_ordered_and_scoped() {
        let tmp = tempfile::tempdir().unwrap();
        let env = KvEnv::open(tmp.path()).unwrap();
        let mut txn = env.write_txn();
        txn.put(b"a\x1f1", b"1").unwrap();
        txn.put(b"a\x1f2", b"2").unwrap();
        txn.put(b"b\x1f1", b"3").unwrap();
        txn.commit();
        let read = env.read_txn();
        let got: Vec<_> = read.iter_prefix(b"a\x1f").map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
        assert_eq!(got, vec![(b"a\x1f1".to_vec(), b"1".to_vec()), (b"a\x1f2".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn delete_removes_from_disk_and_memory() {
        let tmp = tempfile::tempdir().unwrap();
        let env = KvEnv::open(tmp.path()).unwrap();
        let mut txn = env.write_txn();
        txn.put(b"k", b"v").unwrap();
        txn.delete(b"k").unwrap();
        txn.commit();
        assert_eq!(env.get(b"k"), None);
    }

    #[test]
    fn registry_hands_out_same_env_instance() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = KvRegistry::new(tmp.path());
        let a = registry.env("branch").unwrap();
        let b = registry.env("branch").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
