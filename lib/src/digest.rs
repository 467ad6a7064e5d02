//! Content digests and the small family of id types built on top of them.
//!
//! Every entity that is identified by the hash of its own content (tensor
//! bytes, a [`crate::schema::Schema`], a [`crate::commit::CommitRecord`])
//! gets a distinct newtype here instead of passing raw `Vec<u8>` around.
//! There is no derivable `ContentHash` proc-macro here, so types that need to
//! be hashed implement [`Hashable`] directly.

use std::fmt;

use blake2::Blake2b512;
use blake2::Digest as _;

/// Computes the blake2b-512 digest of `bytes` and returns it as a raw byte
/// vector. Digests travel as raw bytes on the wire, never hex.
pub fn blake2b_hash(bytes: &[u8]) -> Vec<u8> {
    let mut hasher = Blake2b512::new();
    hasher.update(bytes);
    hasher.finalize().to_vec()
}

/// Implemented by anything that can be turned into bytes for the purpose of
/// content-addressing. Kept separate from `serde::Serialize` because the
/// byte encoding used for hashing must be stable across versions even if the
/// `serde` representation changes.
pub trait Hashable {
    fn hash_bytes(&self) -> Vec<u8>;

    fn digest(&self) -> Digest {
        Digest::new(blake2b_hash(&self.hash_bytes()))
    }
}

/// Defines a newtype wrapping an opaque content digest, with the usual
/// `ObjectId`-style helpers: hex encode/decode, raw byte access, and the
/// usual derived traits.
macro_rules! id_type {
    ($(#[$attr:meta])* $vis:vis $name:ident) => {
        $(#[$attr])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis struct $name(Vec<u8>);

        impl $name {
            pub fn new(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn to_bytes(&self) -> Vec<u8> {
                self.0.clone()
            }

            pub fn hex(&self) -> String {
                hex::encode(&self.0)
            }

            pub fn from_hex(s: &str) -> Option<Self> {
                hex::decode(s).ok().map(Self)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.hex()).finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.hex())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.hex())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid hex digest"))
            }
        }
    };
}

id_type!(
    /// Content digest of a tensor sample or a metadata value.
    pub Digest
);
id_type!(
    /// Content digest of a [`crate::schema::Schema`].
    pub SchemaHash
);
id_type!(
    /// Content digest of a [`crate::commit::CommitRecord`].
    pub CommitId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let d = Digest::new(blake2b_hash(b"hello"));
        let hex = d.hex();
        assert_eq!(Digest::from_hex(&hex).unwrap(), d);
    }

    #[test]
    fn identical_bytes_hash_identically() {
        assert_eq!(blake2b_hash(b"abc"), blake2b_hash(b"abc"));
        assert_ne!(blake2b_hash(b"abc"), blake2b_hash(b"abd"));
    }
}
