//! Commit records, the ancestor walk, and fast-forwardability. A commit is
//! persisted as three entries in the `ref` env keyed by `<commit
//! digest>\x00<field>` — `parents`, `spec`, `refs` — even though nothing
//! stops us from storing one blob; keeping them separate lets a caller load
//! just the parent list (the hot path for ancestor walks) without
//! deserialising the full record snapshot.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::arrayset::RecordSnapshot;
use crate::digest::CommitId;
use crate::digest::blake2b_hash;
use crate::error::Error;
use crate::error::Result;
use crate::kv::KvEnv;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSpec {
    pub user: String,
    pub email: String,
    pub message: String,
    pub time: DateTime<Utc>,
    pub is_merge: bool,
    pub merge_master: Option<CommitId>,
    pub merge_dev: Option<CommitId>,
}

impl CommitSpec {
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.user.as_bytes());
        out.push(0);
        out.extend_from_slice(self.email.as_bytes());
        out.push(0);
        out.extend_from_slice(self.message.as_bytes());
        out.push(0);
        out.extend_from_slice(&self.time.timestamp_micros().to_le_bytes());
        out.push(self.is_merge as u8);
        if let Some(m) = &self.merge_master {
            out.extend_from_slice(m.as_bytes());
        }
        if let Some(d) = &self.merge_dev {
            out.extend_from_slice(d.as_bytes());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub digest: CommitId,
    /// Zero entries for the repository's root commit, one or two otherwise.
    pub parents: Vec<CommitId>,
    pub spec: CommitSpec,
    pub refs: RecordSnapshot,
}

/// Commit digest = hash over `(sorted refs bytes, sorted parents, spec
/// bytes)`; identical content + parents + spec therefore yields an identical
/// digest regardless of which parent is listed primary vs secondary.
pub fn compute_commit_digest(refs: &RecordSnapshot, parents: &[CommitId], spec: &CommitSpec) -> CommitId {
    let mut sorted_parents: Vec<&CommitId> = parents.iter().collect();
    sorted_parents.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
    let mut out = Vec::new();
    out.extend_from_slice(&refs.canonical_bytes());
    for p in sorted_parents {
        out.extend_from_slice(p.as_bytes());
    }
    out.extend_from_slice(&spec.canonical_bytes());
    CommitId::new(blake2b_hash(&out))
}

fn ref_key(digest: &CommitId, field: &str) -> Vec<u8> {
    let mut out = digest.as_bytes().to_vec();
    out.push(0);
    out.extend_from_slice(field.as_bytes());
    out
}

pub fn persist_commit(ref_env: &KvEnv, commit: &CommitRecord) -> Result<()> {
    let parents_bytes = serde_json::to_vec(&commit.parents).map_err(|e| Error::Corruption(format!("encoding commit parents: {e}")))?;
    let spec_bytes = serde_json::to_vec(&commit.spec).map_err(|e| Error::Corruption(format!("encoding commit spec: {e}")))?;
    let refs_bytes = serde_json::to_vec(&commit.refs).map_err(|e| Error::Corruption(format!("encoding commit refs: {e}")))?;
    let mut txn = ref_env.write_txn();
    txn.put(&ref_key(&commit.digest, "parents"), &parents_bytes)?;
    txn.put(&ref_key(&commit.digest, "spec"), &spec_bytes)?;
    txn.put(&ref_key(&commit.digest, "refs"), &refs_bytes)?;
    txn.commit();
    Ok(())
}

pub fn load_parents(ref_env: &KvEnv, digest: &CommitId) -> Result<Vec<CommitId>> {
    let bytes = ref_env
        .get(&ref_key(digest, "parents"))
        .ok_or_else(|| Error::not_found(format!("commit {digest} not found")))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Corruption(format!("decoding parents for {digest}: {e}")))
}

pub fn load_spec(ref_env: &KvEnv, digest: &CommitId) -> Result<CommitSpec> {
    let bytes = ref_env
        .get(&ref_key(digest, "spec"))
        .ok_or_else(|| Error::not_found(format!("commit {digest} not found")))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Corruption(format!("decoding spec for {digest}: {e}")))
}

pub fn load_refs(ref_env: &KvEnv, digest: &CommitId) -> Result<RecordSnapshot> {
    let bytes = ref_env
        .get(&ref_key(digest, "refs"))
        .ok_or_else(|| Error::not_found(format!("commit {digest} not found")))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Corruption(format!("decoding refs for {digest}: {e}")))
}

pub fn load_commit(ref_env: &KvEnv, digest: &CommitId) -> Result<CommitRecord> {
    Ok(CommitRecord {
        digest: digest.clone(),
        parents: load_parents(ref_env, digest)?,
        spec: load_spec(ref_env, digest)?,
        refs: load_refs(ref_env, digest)?,
    })
}

pub fn exists(ref_env: &KvEnv, digest: &CommitId) -> bool {
    ref_env.get(&ref_key(digest, "parents")).is_some()
}

/// BFS over parent links: `{digest → parents}` for every commit reachable
/// from `start` (`start` included).
pub fn ancestors(ref_env: &KvEnv, start: &CommitId) -> Result<HashMap<CommitId, Vec<CommitId>>> {
    let mut result = HashMap::new();
    let mut queue = VecDeque::new();
    queue.push_back(start.clone());
    while let Some(current) = queue.pop_front() {
        if result.contains_key(&current) {
            continue;
        }
        let parents = load_parents(ref_env, &current)?;
        for p in &parents {
            queue.push_back(p.clone());
        }
        result.insert(current, parents);
    }
    Ok(result)
}

pub fn common_ancestors(ref_env: &KvEnv, a: &CommitId, b: &CommitId) -> Result<HashSet<CommitId>> {
    let anc_a: HashSet<CommitId> = ancestors(ref_env, a)?.into_keys().collect();
    let anc_b: HashSet<CommitId> = ancestors(ref_env, b)?.into_keys().collect();
    Ok(anc_a.intersection(&anc_b).cloned().collect())
}

/// The common ancestor with the latest commit time; ties broken by
/// lexicographically-smallest digest hex for reproducibility.
pub fn closest_common_ancestor(ref_env: &KvEnv, a: &CommitId, b: &CommitId) -> Result<Option<CommitId>> {
    let common = common_ancestors(ref_env, a, b)?;
    let mut best: Option<(DateTime<Utc>, CommitId)> = None;
    for digest in common {
        let spec = load_spec(ref_env, &digest)?;
        let candidate = (spec.time, digest);
        best = Some(match best {
            None => candidate,
            Some(cur) if candidate.0 > cur.0 => candidate,
            Some(cur) if candidate.0 == cur.0 && candidate.1.hex() < cur.1.hex() => candidate,
            Some(cur) => cur,
        });
    }
    Ok(best.map(|(_, digest)| digest))
}

/// `canFF(master, dev)` iff `master` is an ancestor of `dev` (including
/// `master == dev`).
pub fn can_fast_forward(ref_env: &KvEnv, master: &CommitId, dev: &CommitId) -> Result<bool> {
    Ok(ancestors(ref_env, dev)?.contains_key(master))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::blake2b_hash;

    fn spec(msg: &str, time: DateTime<Utc>) -> CommitSpec {
        CommitSpec {
            user: "u".into(),
            email: "u@e".into(),
            message: msg.into(),
            time,
            is_merge: false,
            merge_master: None,
            merge_dev: None,
        }
    }

    fn commit(ref_env: &KvEnv, parents: Vec<CommitId>, spec: CommitSpec, refs: RecordSnapshot) -> CommitId {
        let digest = compute_commit_digest(&refs, &parents, &spec);
        persist_commit(ref_env, &CommitRecord { digest: digest.clone(), parents, spec, refs }).unwrap();
        digest
    }

    #[test]
    fn identical_content_parents_spec_yields_identical_digest() {
        let refs = RecordSnapshot::new();
        let spec_a = spec("m", DateTime::from_timestamp(1000, 0).unwrap());
        let spec_b = spec_a.clone();
        assert_eq!(compute_commit_digest(&refs, &[], &spec_a), compute_commit_digest(&refs, &[], &spec_b));
    }

    #[test]
    fn ancestor_walk_and_fast_forward() {
        let tmp = tempfile::tempdir().unwrap();
        let ref_env = KvEnv::open(tmp.path()).unwrap();
        let root = commit(&ref_env, vec![], spec("root", DateTime::from_timestamp(0, 0).unwrap()), RecordSnapshot::new());
        let c1 = commit(&ref_env, vec![root.clone()], spec("c1", DateTime::from_timestamp(10, 0).unwrap()), RecordSnapshot::new());
        let c2 = commit(&ref_env, vec![c1.clone()], spec("c2", DateTime::from_timestamp(20, 0).unwrap()), RecordSnapshot::new());

        assert!(can_fast_forward(&ref_env, &root, &c2).unwrap());
        assert!(!can_fast_forward(&ref_env, &c2, &root).unwrap());
        assert_eq!(closest_common_ancestor(&ref_env, &c2, &c1).unwrap(), Some(c1));
    }

    #[test]
    fn closest_common_ancestor_breaks_ties_lexicographically() {
        let tmp = tempfile::tempdir().unwrap();
        let ref_env = KvEnv::open(tmp.path()).unwrap();
        let root = commit(&ref_env, vec![], spec("root", DateTime::from_timestamp(0, 0).unwrap()), RecordSnapshot::new());
        let t = DateTime::from_timestamp(5, 0).unwrap();
        let a = commit(&ref_env, vec![root.clone()], spec("a", t), RecordSnapshot::new());
        let b = commit(&ref_env, vec![root.clone()], spec("b", t), RecordSnapshot::new());
        let left = commit(&ref_env, vec![a.clone(), b.clone()], spec("merge", DateTime::from_timestamp(6, 0).unwrap()), RecordSnapshot::new());
        let right = commit(&ref_env, vec![a.clone(), b.clone()], spec("merge2", DateTime::from_timestamp(6, 0).unwrap()), RecordSnapshot::new());
        let got = closest_common_ancestor(&ref_env, &left, &right).unwrap().unwrap();
        assert!(got == a || got == b);
        let _ = blake2b_hash(b"unused-in-test");
    }
}
