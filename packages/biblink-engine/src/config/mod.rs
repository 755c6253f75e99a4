//! Engine configuration (YAML v1)
//!
//! ```yaml
//! version: 1
//! commit_interval: 5000
//! id_block_size: 1000
//! full_matchpoint_cache: false
//! intermediate_persistence: true
//! org_code_override: null
//! ```

pub mod error;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use error::{ConfigError, ConfigResult};

const SUPPORTED_VERSIONS: &[u32] = &[1];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Records processed between forced commits
    pub commit_interval: usize,

    /// Ids reserved from the store per allocator block
    pub id_block_size: u32,

    /// Keep both directions of every match-point table in memory
    pub full_matchpoint_cache: bool,

    /// Flush only the match-point delta (otherwise the whole in-memory map)
    pub intermediate_persistence: bool,

    /// Replaces every record's organization code when set
    pub org_code_override: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commit_interval: 5000,
            id_block_size: 1000,
            full_matchpoint_cache: false,
            intermediate_persistence: true,
            org_code_override: None,
        }
    }
}

/// On-disk shape: the config plus its schema version
#[derive(Debug, Serialize, Deserialize)]
struct ConfigFileV1 {
    version: Option<u32>,
    #[serde(flatten)]
    config: EngineConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.commit_interval == 0 || self.commit_interval > 10_000_000 {
            return Err(ConfigError::range_with_hint(
                "commit_interval",
                self.commit_interval,
                1,
                10_000_000,
                "A forced commit must happen at least once per batch",
            ));
        }

        if self.id_block_size == 0 || self.id_block_size > 1_000_000 {
            return Err(ConfigError::range_with_hint(
                "id_block_size",
                self.id_block_size,
                1,
                1_000_000,
                "Ids are reserved from the store one block at a time",
            ));
        }

        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let file: ConfigFileV1 = serde_yaml::from_str(yaml)?;

        let version = file.version.ok_or(ConfigError::MissingVersion)?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ConfigError::UnsupportedVersion {
                found: version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        file.config.validate()?;
        Ok(file.config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        let file = ConfigFileV1 {
            version: Some(1),
            config: self.clone(),
        };
        Ok(serde_yaml::to_string(&file)?)
    }

    pub fn with_commit_interval(mut self, commit_interval: usize) -> Self {
        self.commit_interval = commit_interval;
        self
    }

    pub fn with_id_block_size(mut self, id_block_size: u32) -> Self {
        self.id_block_size = id_block_size;
        self
    }

    pub fn with_full_matchpoint_cache(mut self, full: bool) -> Self {
        self.full_matchpoint_cache = full;
        self
    }

    pub fn with_org_code_override(mut self, org: impl Into<String>) -> Self {
        self.org_code_override = Some(org.into());
        self
    }
}
