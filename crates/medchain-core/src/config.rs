//! Ledger tuning loaded from TOML.
//!
//! Every field has a default, so an empty document is a valid config:
//!
//! ```toml
//! max_append_retries = 3
//! verify_batch_size = 256
//! verify_timeout_ms = 5000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use medchain_contracts::error::{ChainError, ChainResult};

fn default_max_append_retries() -> u32 {
    3
}

fn default_verify_batch_size() -> u64 {
    256
}

/// Knobs for `HashChainLedger`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Extra attempts after the first when an append loses the tail race.
    /// Zero means a single attempt.
    #[serde(default = "default_max_append_retries")]
    pub max_append_retries: u32,

    /// How many records `verify()` pulls from the store per read.
    #[serde(default = "default_verify_batch_size")]
    pub verify_batch_size: u64,

    /// Upper bound on a whole verification scan.  Absent means unbounded.
    #[serde(default)]
    pub verify_timeout_ms: Option<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_append_retries: default_max_append_retries(),
            verify_batch_size: default_verify_batch_size(),
            verify_timeout_ms: None,
        }
    }
}

impl LedgerConfig {
    /// Parse `s` as TOML.
    ///
    /// Returns `ChainError::ConfigError` if the TOML is malformed or a value
    /// is out of range.
    pub fn from_toml_str(s: &str) -> ChainResult<Self> {
        let config: LedgerConfig = toml::from_str(s).map_err(|e| ChainError::ConfigError {
            reason: format!("failed to parse ledger TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file at `path` and parse it as TOML ledger configuration.
    pub fn from_file(path: &Path) -> ChainResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ChainError::ConfigError {
            reason: format!("failed to read ledger config '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Reject values the ledger cannot run with.
    pub fn validate(&self) -> ChainResult<()> {
        if self.verify_batch_size == 0 {
            return Err(ChainError::ConfigError {
                reason: "verify_batch_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn verify_timeout(&self) -> Option<Duration> {
        self.verify_timeout_ms.map(Duration::from_millis)
    }
}
