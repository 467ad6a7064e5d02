//! The record types a commit or the staging area holds: arraysets (schema +
//! sample digests) and metadata.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::digest::Digest;
use crate::keycodec::ArraysetName;
use crate::keycodec::MetadataKey;
use crate::keycodec::SampleKey;
use crate::schema::Schema;
use crate::schema::schema_hash;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArraysetRecord {
    pub name: ArraysetName,
    pub schema: Schema,
    pub samples: BTreeMap<SampleKey, Digest>,
}

impl ArraysetRecord {
    pub fn new(name: ArraysetName, schema: Schema) -> Self {
        Self { name, schema, samples: BTreeMap::new() }
    }
}

/// The full set of records a commit (or staging) holds at one point in
/// time: every arrayset and every metadata entry. Both maps are `BTreeMap`s
/// keyed by types with a canonical `Ord`, so iteration order is already the
/// sorted order the commit digest and the CLEAN/DIRTY comparison need.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub arraysets: BTreeMap<ArraysetName, ArraysetRecord>,
    pub metadata: BTreeMap<MetadataKey, Digest>,
}

impl RecordSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic byte encoding used for the commit digest and for the
    /// byte-for-byte CLEAN/DIRTY staging comparison. An explicit layout
    /// (rather than relying on a serializer's field ordering) keeps this
    /// stable even if the `serde` derive output changes shape.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.arraysets.len() as u64).to_le_bytes());
        for (name, record) in &self.arraysets {
            out.extend_from_slice(name.as_str().as_bytes());
            out.push(0);
            out.extend_from_slice(&schema_hash(&record.schema).to_bytes());
            out.extend_from_slice(&(record.samples.len() as u64).to_le_bytes());
            for (key, digest) in &record.samples {
                out.extend_from_slice(&key.sort_key());
                out.push(0);
                out.extend_from_slice(digest.as_bytes());
            }
        }
        out.extend_from_slice(&(self.metadata.len() as u64).to_le_bytes());
        for (key, digest) in &self.metadata {
            out.extend_from_slice(key.as_str().as_bytes());
            out.push(0);
            out.extend_from_slice(digest.as_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::blake2b_hash;
    use crate::schema::DType;

    #[test]
    fn canonical_bytes_are_stable_for_equal_snapshots() {
        let mut a = RecordSnapshot::new();
        let name = ArraysetName::new("d").unwrap();
        let mut rec = ArraysetRecord::new(name.clone(), Schema::new("u".into(), vec![4], DType::I64, false, true));
        rec.samples.insert(SampleKey::unnamed(0), Digest::new(blake2b_hash(b"s0")));
        a.arraysets.insert(name, rec);
        let b = a.clone();
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn canonical_bytes_differ_when_a_sample_changes() {
        let name = ArraysetName::new("d").unwrap();
        let schema = Schema::new("u".into(), vec![4], DType::I64, false, true);
        let mut a = RecordSnapshot::new();
        let mut rec_a = ArraysetRecord::new(name.clone(), schema.clone());
        rec_a.samples.insert(SampleKey::unnamed(0), Digest::new(blake2b_hash(b"s0")));
        a.arraysets.insert(name.clone(), rec_a);

        let mut b = RecordSnapshot::new();
        let mut rec_b = ArraysetRecord::new(name.clone(), schema);
        rec_b.samples.insert(SampleKey::unnamed(0), Digest::new(blake2b_hash(b"s1")));
        b.arraysets.insert(name, rec_b);

        assert_ne!(a.canonical_bytes(), b.canonical_bytes());
    }
}
