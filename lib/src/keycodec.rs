//! Canonical encoding of record keys and names.
//!
//! Arrayset names, sample keys, and metadata keys all need a byte encoding
//! that (a) round-trips exactly and (b) sorts the same way as the strings it
//! was built from, because [`crate::kv`] keeps every env's keyspace in
//! lexicographic order and the staging/commit-ref byte streams are compared
//! byte-for-byte. Validation rejects empty or separator-carrying names up
//! front, failing at construction rather than at encode time.

use std::fmt;

use thiserror::Error;

/// A byte that must never appear inside a user-supplied name, since it is
/// used internally to delimit key segments.
const KEY_SEP: u8 = 0x1f; // ASCII unit separator

#[derive(Debug, Error)]
#[error("invalid name {value:?}: {reason}")]
pub struct InvalidNameError {
    value: String,
    reason: &'static str,
}

fn validate_name(value: &str) -> Result<(), InvalidNameError> {
    if value.is_empty() {
        return Err(InvalidNameError { value: value.to_owned(), reason: "must not be empty" });
    }
    if value.bytes().any(|b| b == KEY_SEP || b == b'\0') {
        return Err(InvalidNameError {
            value: value.to_owned(),
            reason: "must not contain the key separator or NUL byte",
        });
    }
    Ok(())
}

/// Name of an arrayset, unique within a repository snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ArraysetName(String);

impl ArraysetName {
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidNameError> {
        let value = value.into();
        validate_name(&value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArraysetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key identifying one sample within an arrayset: either a user-chosen name
/// (named arraysets) or a sequential integer (unnamed arraysets).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SampleKey {
    Named(String),
    Unnamed(u64),
}

impl SampleKey {
    pub fn named(value: impl Into<String>) -> Result<Self, InvalidNameError> {
        let value = value.into();
        validate_name(&value)?;
        Ok(Self::Named(value))
    }

    pub fn unnamed(index: u64) -> Self {
        Self::Unnamed(index)
    }

    /// Byte encoding used as the on-disk sort key. Named keys sort
    /// lexicographically among themselves; unnamed keys sort numerically by
    /// zero-padding to a fixed width so that e.g. `"9"` precedes `"10"`.
    pub fn sort_key(&self) -> Vec<u8> {
        match self {
            Self::Named(s) => {
                let mut out = vec![b'n'];
                out.extend_from_slice(s.as_bytes());
                out
            }
            Self::Unnamed(i) => {
                let mut out = vec![b'u'];
                out.extend_from_slice(&i.to_be_bytes());
                out
            }
        }
    }
}

impl Ord for SampleKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for SampleKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(s) => f.write_str(s),
            Self::Unnamed(i) => write!(f, "{i}"),
        }
    }
}

/// Key identifying one metadata entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct MetadataKey(String);

impl MetadataKey {
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidNameError> {
        let value = value.into();
        validate_name(&value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encodes the `kv` key under which a given sample record is stored within an
/// arrayset's keyspace: `<arrayset-name>\x1fsample\x1f<sort-key>`.
pub fn encode_sample_kv_key(arrayset: &ArraysetName, sample: &SampleKey) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(arrayset.as_str().as_bytes());
    out.push(KEY_SEP);
    out.extend_from_slice(b"sample");
    out.push(KEY_SEP);
    out.extend_from_slice(&sample.sort_key());
    out
}

/// Encodes the `kv` key for an arrayset's schema record:
/// `<arrayset-name>\x1fschema`.
pub fn encode_schema_kv_key(arrayset: &ArraysetName) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(arrayset.as_str().as_bytes());
    out.push(KEY_SEP);
    out.extend_from_slice(b"schema");
    out
}

/// Encodes the `kv` key for a metadata entry: `metadata\x1f<key>`.
pub fn encode_metadata_kv_key(key: &MetadataKey) -> Vec<u8> {
    let mut out = vec![];
    out.extend_from_slice(b"metadata");
    out.push(KEY_SEP);
    out.extend_from_slice(key.as_str().as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_separator_names() {
        assert!(ArraysetName::new("").is_err());
        assert!(ArraysetName::new("a\u{1f}b").is_err());
        assert!(ArraysetName::new("fine").is_ok());
    }

    #[test]
    fn unnamed_keys_sort_numerically() {
        let mut keys = vec![SampleKey::unnamed(10), SampleKey::unnamed(2), SampleKey::unnamed(9)];
        keys.sort();
        assert_eq!(keys, vec![SampleKey::unnamed(2), SampleKey::unnamed(9), SampleKey::unnamed(10)]);
    }

    #[test]
    fn sample_kv_keys_are_prefixed_by_arrayset() {
        let a = ArraysetName::new("d").unwrap();
        let k = encode_sample_kv_key(&a, &SampleKey::named("7").unwrap());
        assert!(k.starts_with(b"d\x1fsample\x1f"));
    }
}
