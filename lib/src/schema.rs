//! Arrayset schemas and the tensor buffer abstraction they describe.

use serde::Deserialize;
use serde::Serialize;

use crate::digest::Hashable;
use crate::digest::SchemaHash;

/// Element type of a tensor sample. A closed enum rather than a binding to a
/// specific ndarray crate — the array library itself is an external
/// collaborator, not something this crate redesigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl DType {
    /// Size in bytes of one element of this type.
    pub fn size_bytes(self) -> usize {
        match self {
            Self::Bool | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }
}

/// An in-memory tensor sample: shape, element type, and contiguous
/// row-major bytes. `bytes.len()` must equal `shape.iter().product::<u64>()
/// as usize * dtype.size_bytes()`; callers that violate this get a
/// `StateError` at the point the sample is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor {
    pub shape: Vec<u64>,
    pub dtype: DType,
    pub bytes: Vec<u8>,
}

impl Tensor {
    pub fn new(shape: Vec<u64>, dtype: DType, bytes: Vec<u8>) -> Self {
        Self { shape, dtype, bytes }
    }

    pub fn element_count(&self) -> u64 {
        self.shape.iter().product()
    }

    pub fn expected_byte_len(&self) -> usize {
        self.element_count() as usize * self.dtype.size_bytes()
    }

    pub fn is_well_formed(&self) -> bool {
        self.bytes.len() == self.expected_byte_len()
    }
}

/// `{uuid, hash, is_variable_shape, max_shape, dtype_code, is_named_samples}`.
/// The `uuid` disambiguates schemas that otherwise hash identically is never
/// needed in practice (content hash already does that),
/// but is kept because two arraysets created independently with the same
/// shape/dtype should not be forced to share a schema identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub uuid: String,
    pub is_variable_shape: bool,
    pub max_shape: Vec<u64>,
    pub dtype: DType,
    pub is_named_samples: bool,
}

impl Schema {
    pub fn new(uuid: String, max_shape: Vec<u64>, dtype: DType, is_variable_shape: bool, is_named_samples: bool) -> Self {
        Self { uuid, is_variable_shape, max_shape, dtype, is_named_samples }
    }

    /// Returns whether `shape` is a legal sample shape under this schema:
    /// same rank as `max_shape`, and every axis no larger than the
    /// corresponding max axis (exact match required unless
    /// `is_variable_shape`).
    pub fn accepts_shape(&self, shape: &[u64]) -> bool {
        if shape.len() != self.max_shape.len() {
            return false;
        }
        if self.is_variable_shape {
            shape.iter().zip(&self.max_shape).all(|(s, m)| s <= m)
        } else {
            shape == self.max_shape.as_slice()
        }
    }
}

impl Hashable for Schema {
    fn hash_bytes(&self) -> Vec<u8> {
        // Deterministic, order-independent of struct field declaration order:
        // serde_json over a BTreeMap-like canonical struct would also work,
        // but an explicit byte layout keeps the digest stable even if we
        // later reorder fields for readability.
        let mut out = Vec::new();
        out.extend_from_slice(self.uuid.as_bytes());
        out.push(0);
        out.push(self.is_variable_shape as u8);
        out.push(self.is_named_samples as u8);
        out.push(self.dtype as u8);
        for axis in &self.max_shape {
            out.extend_from_slice(&axis.to_le_bytes());
        }
        out
    }
}

pub fn schema_hash(schema: &Schema) -> SchemaHash {
    SchemaHash::new(schema.digest().to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_shape_fixed() {
        let s = Schema::new("u".into(), vec![50], DType::I64, false, true);
        assert!(s.accepts_shape(&[50]));
        assert!(!s.accepts_shape(&[49]));
        assert!(!s.accepts_shape(&[50, 1]));
    }

    #[test]
    fn accepts_shape_variable() {
        let s = Schema::new("u".into(), vec![50, 10], DType::F32, true, true);
        assert!(s.accepts_shape(&[10, 10]));
        assert!(!s.accepts_shape(&[51, 10]));
    }

    #[test]
    fn schema_hash_is_stable_for_equal_schemas() {
        let a = Schema::new("u".into(), vec![4], DType::U8, false, false);
        let b = Schema::new("u".into(), vec![4], DType::U8, false, false);
        assert_eq!(schema_hash(&a), schema_hash(&b));
    }
}
