//! On-disk encoding of a [`BackendLocation`], the hash index's value type.
//!
//! The wire format is a short ASCII record, lifted directly from
//! `hangar-py`'s `HDF5_00_Parser.encode`/`.decode`
//! (`backends/hdf5.py`): `<fmtcode><sep><uid><hashsep><collection><listsep>
//! <row><slicesep><s0,s1,...>`. An empty shape (rank-0 sample) encodes to an
//! empty shape field and decodes back to `()`.

use thiserror::Error;

use crate::backend::FormatCode;

const SEP: u8 = b':';
const HASHSEP: u8 = b'$';
const LISTSEP: u8 = b',';
const SLICESEP: u8 = b'@';

/// Where one sample's bytes live inside the chunked backend:
/// `{file_uid, collection_index, row_index, shape}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendLocation {
    pub file_uid: String,
    pub collection_index: u64,
    pub row_index: u64,
    pub shape: Vec<u64>,
}

impl BackendLocation {
    pub fn new(file_uid: impl Into<String>, collection_index: u64, row_index: u64, shape: Vec<u64>) -> Self {
        Self { file_uid: file_uid.into(), collection_index, row_index, shape }
    }

    /// Encodes `self` as the hash-index value, prefixed with `fmt`'s code so
    /// the reader knows which backend to dispatch to without a second
    /// lookup.
    pub fn encode(&self, fmt: FormatCode) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(fmt.as_str().as_bytes()[0]);
        out.push(fmt.as_str().as_bytes()[1]);
        out.push(SEP);
        out.extend_from_slice(self.file_uid.as_bytes());
        out.push(HASHSEP);
        out.extend_from_slice(self.collection_index.to_string().as_bytes());
        out.push(LISTSEP);
        out.extend_from_slice(self.row_index.to_string().as_bytes());
        out.push(SLICESEP);
        let shape_str = self
            .shape
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        out.extend_from_slice(shape_str.as_bytes());
        out
    }
}

#[derive(Debug, Error)]
pub enum LocationDecodeError {
    #[error("location record too short")]
    TooShort,
    #[error("unrecognized backend format code {0:?}")]
    UnknownFormat(String),
    #[error("malformed location record: {0}")]
    Malformed(&'static str),
}

/// Decodes a hash-index value into its format code and [`BackendLocation`].
pub fn decode(bytes: &[u8]) -> Result<(FormatCode, BackendLocation), LocationDecodeError> {
    if bytes.len() < 3 {
        return Err(LocationDecodeError::TooShort);
    }
    let fmt = FormatCode::from_str(std::str::from_utf8(&bytes[0..2]).map_err(|_| LocationDecodeError::Malformed("format code"))?)
        .ok_or_else(|| LocationDecodeError::UnknownFormat(String::from_utf8_lossy(&bytes[0..2]).into_owned()))?;
    if bytes[2] != SEP {
        return Err(LocationDecodeError::Malformed("missing separator after format code"));
    }
    let rest = std::str::from_utf8(&bytes[3..]).map_err(|_| LocationDecodeError::Malformed("non-utf8 body"))?;
    let (uid, dset_vals) = rest
        .split_once(HASHSEP as char)
        .ok_or(LocationDecodeError::Malformed("missing hash separator"))?;
    let (coll_and_row, shape_str) = dset_vals
        .rsplit_once(SLICESEP as char)
        .ok_or(LocationDecodeError::Malformed("missing slice separator"))?;
    let (coll_str, row_str) = coll_and_row
        .split_once(LISTSEP as char)
        .ok_or(LocationDecodeError::Malformed("missing list separator"))?;
    let collection_index: u64 = coll_str.parse().map_err(|_| LocationDecodeError::Malformed("collection index"))?;
    let row_index: u64 = row_str.parse().map_err(|_| LocationDecodeError::Malformed("row index"))?;
    let shape = if shape_str.is_empty() {
        Vec::new()
    } else {
        shape_str
            .split(',')
            .map(|s| s.parse::<u64>().map_err(|_| LocationDecodeError::Malformed("shape axis")))
            .collect::<Result<Vec<_>, _>>()?
    };
    Ok((fmt, BackendLocation::new(uid.to_string(), collection_index, row_index, shape)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_rank_0() {
        let loc = BackendLocation::new("abc123", 0, 0, vec![]);
        let enc = loc.encode(FormatCode::Chunked);
        let (fmt, dec) = decode(&enc).unwrap();
        assert_eq!(fmt, FormatCode::Chunked);
        assert_eq!(dec, loc);
    }

    #[test]
    fn round_trips_multi_axis() {
        let loc = BackendLocation::new("uid-9", 3, 512, vec![50, 10, 3]);
        let enc = loc.encode(FormatCode::ReferenceOnly);
        let (fmt, dec) = decode(&enc).unwrap();
        assert_eq!(fmt, FormatCode::ReferenceOnly);
        assert_eq!(dec, loc);
    }
}
