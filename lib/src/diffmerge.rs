//! Three-way change classification, conflict detection, and patch
//! application. Generic over the map type so the same
//! `classify`/`apply_patch` pair serves schemas, samples-within-an-arrayset,
//! and metadata — the component design calls these "three layers" but they
//! are the same algorithm over three different key/value types.

use std::collections::BTreeMap;
use std::fmt;

use crate::arrayset::ArraysetRecord;
use crate::arrayset::RecordSnapshot;
use crate::keycodec::ArraysetName;
use crate::schema::schema_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Addition,
    Removal,
    Mutation,
    Unchanged,
}

/// Classifies every key present in `base` and/or `variant` into exactly one
/// of the four [`ChangeKind`]s. The partition is complete and disjoint.
pub fn classify<K: Ord + Clone, V: PartialEq>(base: &BTreeMap<K, V>, variant: &BTreeMap<K, V>) -> BTreeMap<K, ChangeKind> {
    let mut out = BTreeMap::new();
    for key in base.keys().chain(variant.keys()) {
        if out.contains_key(key) {
            continue;
        }
        let kind = match (base.get(key), variant.get(key)) {
            (None, Some(_)) => ChangeKind::Addition,
            (Some(_), None) => ChangeKind::Removal,
            (Some(b), Some(v)) if b == v => ChangeKind::Unchanged,
            (Some(_), Some(_)) => ChangeKind::Mutation,
            (None, None) => unreachable!("key came from one of the two maps"),
        };
        out.insert(key.clone(), kind);
    }
    out
}

/// Applies the three-way patch rule to a single map: master's map wins its
/// own adds and mutations; dev's adds/mutations not claimed by master are
/// folded in; dev's removals of keys master left unchanged are applied.
/// Callers are expected to have already run [`determine_conflicts`] and
/// bailed out if `conflict_found`, so the ambiguous add/add and
/// mutate/mutate cases here always resolve to "master wins" safely.
pub fn apply_patch<K: Ord + Clone, V: Clone + PartialEq>(ancestor: &BTreeMap<K, V>, master: &BTreeMap<K, V>, dev: &BTreeMap<K, V>) -> BTreeMap<K, V> {
    let mut result = master.clone();
    let master_change = classify(ancestor, master);
    let dev_change = classify(ancestor, dev);
    for (key, d_kind) in &dev_change {
        let m_kind = master_change.get(key).copied().unwrap_or(ChangeKind::Unchanged);
        match (d_kind, m_kind) {
            (ChangeKind::Addition, ChangeKind::Addition) => {}
            (ChangeKind::Addition, _) => {
                if let Some(v) = dev.get(key) {
                    result.insert(key.clone(), v.clone());
                }
            }
            (ChangeKind::Removal, ChangeKind::Unchanged) => {
                result.remove(key);
            }
            (ChangeKind::Mutation, ChangeKind::Mutation) => {}
            (ChangeKind::Mutation, _) => {
                if let Some(v) = dev.get(key) {
                    result.insert(key.clone(), v.clone());
                }
            }
            _ => {}
        }
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    AddAdd,
    RemoveMutate,
    MutateMutate,
    TypeStructure,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AddAdd => "add/add",
            Self::RemoveMutate => "remove/mutate",
            Self::MutateMutate => "mutate/mutate",
            Self::TypeStructure => "type/structure",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDetail {
    pub kind: ConflictKind,
    pub key: String,
}

/// `{conflict_found, details}` returned by [`determine_conflicts`], grouped
/// by layer, e.g. `{metadata: {mutate/mutate: ["k"]}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictReport {
    pub conflict_found: bool,
    pub metadata: Vec<ConflictDetail>,
    pub arraysets: BTreeMap<String, Vec<ConflictDetail>>,
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} metadata conflict(s)", self.metadata.len())?;
        for (name, details) in &self.arraysets {
            write!(f, ", {} conflict(s) in arrayset {name}", details.len())?;
        }
        Ok(())
    }
}

fn classify_conflict<V: PartialEq>(m_kind: ChangeKind, d_kind: ChangeKind, master_value: Option<&V>, dev_value: Option<&V>) -> Option<ConflictKind> {
    use ChangeKind::*;
    match (m_kind, d_kind) {
        (Addition, Addition) if master_value != dev_value => Some(ConflictKind::AddAdd),
        (Removal, Mutation) | (Mutation, Removal) => Some(ConflictKind::RemoveMutate),
        (Mutation, Mutation) if master_value != dev_value => Some(ConflictKind::MutateMutate),
        _ => None,
    }
}

fn conflicts_in_map<K: Ord + Clone + ToString, V: PartialEq>(ancestor: &BTreeMap<K, V>, master: &BTreeMap<K, V>, dev: &BTreeMap<K, V>) -> Vec<ConflictDetail> {
    let master_change = classify(ancestor, master);
    let dev_change = classify(ancestor, dev);
    let mut out = Vec::new();
    for (key, m_kind) in &master_change {
        let d_kind = dev_change.get(key).copied().unwrap_or(ChangeKind::Unchanged);
        if let Some(kind) = classify_conflict(*m_kind, d_kind, master.get(key), dev.get(key)) {
            out.push(ConflictDetail { kind, key: key.to_string() });
        }
    }
    out
}

/// Three-way conflict detection across the schema, sample, and metadata
/// layers.
pub fn determine_conflicts(ancestor: &RecordSnapshot, master: &RecordSnapshot, dev: &RecordSnapshot) -> ConflictReport {
    let mut report = ConflictReport::default();

    let base_schemas: BTreeMap<ArraysetName, _> = ancestor.arraysets.iter().map(|(n, r)| (n.clone(), schema_hash(&r.schema))).collect();
    let master_schemas: BTreeMap<ArraysetName, _> = master.arraysets.iter().map(|(n, r)| (n.clone(), schema_hash(&r.schema))).collect();
    let dev_schemas: BTreeMap<ArraysetName, _> = dev.arraysets.iter().map(|(n, r)| (n.clone(), schema_hash(&r.schema))).collect();
    for detail in conflicts_in_map(&base_schemas, &master_schemas, &dev_schemas) {
        report.arraysets.entry(detail.key.clone()).or_default().push(ConflictDetail { kind: ConflictKind::TypeStructure, key: detail.key });
    }

    report.metadata = conflicts_in_map(&ancestor.metadata, &master.metadata, &dev.metadata);

    for (name, master_rec) in &master.arraysets {
        let Some(dev_rec) = dev.arraysets.get(name) else { continue };
        let empty = ArraysetRecord::new(name.clone(), master_rec.schema.clone());
        let ancestor_rec = ancestor.arraysets.get(name).unwrap_or(&empty);
        let details = conflicts_in_map(&ancestor_rec.samples, &master_rec.samples, &dev_rec.samples);
        if !details.is_empty() {
            report.arraysets.entry(name.to_string()).or_default().extend(details);
        }
    }

    report.conflict_found = !report.metadata.is_empty() || !report.arraysets.is_empty();
    report
}

/// Produces the merged record snapshot once [`determine_conflicts`] has
/// confirmed there is nothing to report.
pub fn apply_three_way_patch(ancestor: &RecordSnapshot, master: &RecordSnapshot, dev: &RecordSnapshot) -> RecordSnapshot {
    let mut arraysets = master.arraysets.clone();
    for (name, dev_rec) in &dev.arraysets {
        match master.arraysets.get(name) {
            None => {
                arraysets.insert(name.clone(), dev_rec.clone());
            }
            Some(master_rec) => {
                let empty = ArraysetRecord::new(name.clone(), master_rec.schema.clone());
                let ancestor_rec = ancestor.arraysets.get(name).unwrap_or(&empty);
                let merged_samples = apply_patch(&ancestor_rec.samples, &master_rec.samples, &dev_rec.samples);
                if let Some(entry) = arraysets.get_mut(name) {
                    entry.samples = merged_samples;
                }
            }
        }
    }
    let metadata = apply_patch(&ancestor.metadata, &master.metadata, &dev.metadata);
    RecordSnapshot { arraysets, metadata }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;
    use crate::digest::blake2b_hash;
    use crate::keycodec::MetadataKey;

    fn digest(s: &str) -> Digest {
        Digest::new(blake2b_hash(s.as_bytes()))
    }

    #[test]
    fn classify_partitions_are_complete_and_disjoint() {
        let mut base = BTreeMap::new();
        base.insert("a", 1);
        base.insert("b", 2);
        let mut variant = BTreeMap::new();
        variant.insert("b", 2);
        variant.insert("c", 3);
        let result = classify(&base, &variant);
        assert_eq!(result.get("a"), Some(&ChangeKind::Removal));
        assert_eq!(result.get("b"), Some(&ChangeKind::Unchanged));
        assert_eq!(result.get("c"), Some(&ChangeKind::Addition));
    }

    #[test]
    fn non_conflicting_three_way_merge_combines_both_sides() {
        let ancestor = RecordSnapshot::new();
        let mut master = RecordSnapshot::new();
        master.metadata.insert(MetadataKey::new("a").unwrap(), digest("va"));
        let mut dev = RecordSnapshot::new();
        dev.metadata.insert(MetadataKey::new("b").unwrap(), digest("vb"));

        let report = determine_conflicts(&ancestor, &master, &dev);
        assert!(!report.conflict_found);
        let merged = apply_three_way_patch(&ancestor, &master, &dev);
        assert_eq!(merged.metadata.len(), 2);
    }

    #[test]
    fn conflicting_mutation_is_reported() {
        let mut ancestor = RecordSnapshot::new();
        ancestor.metadata.insert(MetadataKey::new("k").unwrap(), digest("v0"));
        let mut master = ancestor.clone();
        master.metadata.insert(MetadataKey::new("k").unwrap(), digest("v1"));
        let mut dev = ancestor.clone();
        dev.metadata.insert(MetadataKey::new("k").unwrap(), digest("v2"));

        let report = determine_conflicts(&ancestor, &master, &dev);
        assert!(report.conflict_found);
        assert_eq!(report.metadata.len(), 1);
        assert_eq!(report.metadata[0].kind, ConflictKind::MutateMutate);
    }
}
