//! JSON configuration files.

use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{addressing::AddressingMode, geometry::CacheConfig, page_table::PageTable};

#[derive(Error, Debug)]
pub enum ConfigFileError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Contents of a config file; every section is optional.
/// ```
/// use memsim::config::SimConfig;
///
/// let c = SimConfig::load(r#"{
///     "cache": { "cache_size": 64, "block_size": 16, "associativity": { "ways": 2 } },
///     "addressing": { "mode": "virtual-memory", "page_size": 4096 },
///     "page_table": [ { "valid": false }, { "valid": true, "frame_number": 7 } ],
///     "addresses": "0, 32, 0, 64"
/// }"#.as_bytes()).unwrap();
/// assert_eq!(c.cache.unwrap().cache_size, 64);
/// assert_eq!(c.page_table.unwrap().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub addressing: Option<AddressingMode>,
    #[serde(default)]
    pub page_table: Option<PageTable>,
    /// seed for generated page tables
    #[serde(default)]
    pub seed: Option<u64>,
    /// address batch, in the same syntax accepted on the command line
    #[serde(default)]
    pub addresses: Option<String>,
}

impl SimConfig {
    pub fn load(reader: impl std::io::Read) -> Result<Self, ConfigFileError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn load_path(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let config = Self::load(BufReader::new(File::open(path)?))?;
        log::info!("loaded config from {}", path.display());
        Ok(config)
    }
}
