//! Chain-state configuration
//!
//! Loaded from TOML; every field has a default so a partial file is enough.
//!
//! ```toml
//! data_dir = "/var/lib/node/chainstate"
//! metadata_cache_capacity = 500000
//! address_index = true
//!
//! [[maturity.steps]]
//! from_height = 0
//! blocks = 100
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lib_tokens::{MetadataCache, TokenResult, DEFAULT_METADATA_CAPACITY};
use lib_types::{Amount, BlockHeight, MAX_MONEY};

use crate::storage::{SledStore, StorageResult};

/// Blocks a reward output must wait before it can be spent, by default
pub const COINBASE_MATURITY: u32 = 100;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Metadata cache capacity must be non-zero")]
    ZeroCacheCapacity,

    #[error("Maturity schedule is empty")]
    EmptyMaturitySchedule,

    #[error("Maturity schedule must start at height 0 and ascend (step {index})")]
    UnorderedMaturitySchedule { index: usize },

    #[error("Max money out of range: {0}")]
    InvalidMaxMoney(Amount),
}

/// One step of the maturity schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaturityStep {
    /// First spend height this step applies to
    pub from_height: BlockHeight,
    /// Confirmations required
    pub blocks: u32,
}

/// Height-dependent reward maturity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaturitySchedule {
    pub steps: Vec<MaturityStep>,
}

impl Default for MaturitySchedule {
    fn default() -> Self {
        Self::fixed(COINBASE_MATURITY)
    }
}

impl MaturitySchedule {
    pub fn fixed(blocks: u32) -> Self {
        Self {
            steps: vec![MaturityStep { from_height: 0, blocks }],
        }
    }

    /// Confirmations a reward output needs when spent at `height`
    pub fn maturity_at(&self, height: BlockHeight) -> u32 {
        self.steps
            .iter()
            .take_while(|step| step.from_height <= height)
            .last()
            .map_or(COINBASE_MATURITY, |step| step.blocks)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.steps.is_empty() {
            return Err(ConfigError::EmptyMaturitySchedule);
        }
        if self.steps[0].from_height != 0 {
            return Err(ConfigError::UnorderedMaturitySchedule { index: 0 });
        }
        for (index, pair) in self.steps.windows(2).enumerate() {
            if pair[1].from_height <= pair[0].from_height {
                return Err(ConfigError::UnorderedMaturitySchedule { index: index + 1 });
            }
        }
        Ok(())
    }
}

/// Chain-state configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainStateConfig {
    /// Directory of the sled database
    pub data_dir: PathBuf,
    /// Records held by the asset metadata cache
    pub metadata_cache_capacity: usize,
    /// Reward maturity by spend height
    pub maturity: MaturitySchedule,
    /// Maintain the address index tree
    pub address_index: bool,
    /// Upper bound on native input values, their sum, the output sum and
    /// the fee checked by `check_tx_inputs`. Per-output and asset amounts are
    /// always bounded by the protocol `MAX_MONEY`, which this cannot exceed.
    pub max_money: Amount,
}

impl Default for ChainStateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("chainstate"),
            metadata_cache_capacity: DEFAULT_METADATA_CAPACITY,
            maturity: MaturitySchedule::default(),
            address_index: false,
            max_money: MAX_MONEY,
        }
    }
}

impl ChainStateConfig {
    /// Read and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading chain-state config {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("parsing chain-state config {}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded chain-state configuration");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metadata_cache_capacity == 0 {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        if self.max_money <= 0 || self.max_money > MAX_MONEY {
            return Err(ConfigError::InvalidMaxMoney(self.max_money));
        }
        self.maturity.validate()
    }

    /// Open the sled store under `data_dir`
    pub fn open_store(&self) -> StorageResult<SledStore> {
        tracing::info!(path = %self.data_dir.display(), "opening chain-state store");
        SledStore::open(&self.data_dir)
    }

    /// Metadata cache sized by `metadata_cache_capacity`
    pub fn metadata_cache(&self) -> TokenResult<MetadataCache> {
        MetadataCache::new(self.metadata_cache_capacity)
    }

    /// Whether `value` lies within the configured money range
    pub fn money_range(&self, value: Amount) -> bool {
        (0..=self.max_money).contains(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ChainStateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.maturity.maturity_at(1_000_000), COINBASE_MATURITY);
    }

    #[test]
    fn test_maturity_schedule_steps() {
        let schedule = MaturitySchedule {
            steps: vec![
                MaturityStep { from_height: 0, blocks: 10 },
                MaturityStep { from_height: 500, blocks: 50 },
                MaturityStep { from_height: 1000, blocks: 100 },
            ],
        };
        assert_eq!(schedule.maturity_at(0), 10);
        assert_eq!(schedule.maturity_at(499), 10);
        assert_eq!(schedule.maturity_at(500), 50);
        assert_eq!(schedule.maturity_at(5000), 100);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ChainStateConfig::from_toml_str(
            r#"
            address_index = true

            [[maturity.steps]]
            from_height = 0
            blocks = 5
            "#,
        )
        .unwrap();
        assert!(config.address_index);
        assert_eq!(config.maturity.maturity_at(10), 5);
        assert_eq!(config.metadata_cache_capacity, DEFAULT_METADATA_CAPACITY);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(ChainStateConfig::from_toml_str("metadata_cache_capacity = 0").is_err());
        assert!(ChainStateConfig::from_toml_str("max_money = -1").is_err());
        assert!(ChainStateConfig::from_toml_str(
            r#"
            [[maturity.steps]]
            from_height = 10
            blocks = 5
            "#
        )
        .is_err());
    }

    #[test]
    fn test_open_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChainStateConfig {
            data_dir: dir.path().join("db"),
            metadata_cache_capacity: 8,
            ..Default::default()
        };
        let store = config.open_store().unwrap();
        assert_eq!(store.version().unwrap(), crate::CHAIN_STATE_VERSION);
        assert!(config.data_dir.exists());
        assert_eq!(config.metadata_cache().unwrap().capacity(), 8);

        let zero = ChainStateConfig {
            metadata_cache_capacity: 0,
            ..config
        };
        assert!(zero.metadata_cache().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "metadata_cache_capacity = 64").unwrap();

        let config = ChainStateConfig::load(file.path()).unwrap();
        assert_eq!(config.metadata_cache_capacity, 64);
        assert!(ChainStateConfig::load("/nonexistent/chainstate.toml").is_err());
    }
}
