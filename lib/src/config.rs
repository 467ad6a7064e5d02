//! Repository configuration, persisted as TOML at `<repo>/.store/config.toml`.
//! Collapsed to one struct since this repository has a single config surface
//! rather than user- and repo-level layers to merge.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::backend::chunked::ChunkedBackendConfig;
use crate::backend::chunked::CompressionCodec;
use crate::error::Error;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkedBackendSettings {
    pub collection_size: u64,
    pub collections_per_container: u64,
    pub max_chunk_bytes: u64,
    pub max_rdcc_bytes: u64,
    pub compression: String,
    pub checksum: bool,
}

impl Default for ChunkedBackendSettings {
    fn default() -> Self {
        let d = ChunkedBackendConfig::default();
        Self {
            collection_size: d.collection_size,
            collections_per_container: d.collections_per_container,
            max_chunk_bytes: d.max_chunk_bytes,
            max_rdcc_bytes: d.max_rdcc_bytes,
            compression: "zstd".into(),
            checksum: d.checksum,
        }
    }
}

impl ChunkedBackendSettings {
    pub fn to_backend_config(&self) -> Result<ChunkedBackendConfig> {
        let compression = match self.compression.as_str() {
            "zstd" => CompressionCodec::Zstd,
            "none" => CompressionCodec::None,
            other => return Err(Error::invalid_argument(format!("unknown compression codec {other:?}"))),
        };
        Ok(ChunkedBackendConfig {
            collection_size: self.collection_size,
            collections_per_container: self.collections_per_container,
            max_chunk_bytes: self.max_chunk_bytes,
            max_rdcc_bytes: self.max_rdcc_bytes,
            compression,
            checksum: self.checksum,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub user: UserIdentity,
    #[serde(default)]
    pub backend: BackendSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendSection {
    #[serde(default)]
    pub chunked: ChunkedBackendSettings,
}

impl RepoConfig {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self { user: UserIdentity { name: name.into(), email: email.into() }, backend: BackendSection::default() }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        toml::from_str(&text).map_err(|e| Error::Corruption(format!("parsing config at {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Corruption(format!("encoding config: {e}")))?;
        fs::write(path, text).map_err(|e| Error::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_toml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        let cfg = RepoConfig::new("Ada", "ada@example.invalid");
        cfg.save(&path).unwrap();
        let loaded = RepoConfig::load(&path).unwrap();
        assert_eq!(loaded.user, cfg.user);
        assert_eq!(loaded.backend.chunked.collection_size, cfg.backend.chunked.collection_size);
    }

    #[test]
    fn rejects_unknown_compression_codec() {
        let mut settings = ChunkedBackendSettings::default();
        settings.compression = "lz4".into();
        assert!(settings.to_backend_config().is_err());
    }
}
