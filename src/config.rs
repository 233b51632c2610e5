//! Runtime configuration.
//!
//! The engine needs nothing beyond a directory for exchange snapshots; the
//! exchange name itself is a runtime argument to `start`. Values come from
//! defaults overridden by `BETMATCH_`-prefixed environment variables
//! (e.g. `BETMATCH_DATA_DIR=/var/lib/betmatch`).

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// Directory holding one snapshot file per exchange name.
    pub data_dir: PathBuf,
}

impl ExchangeConfig {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("data_dir", "./data")?
            .add_source(config::Environment::with_prefix("BETMATCH"))
            .build()?
            .try_deserialize()
    }

    /// Configuration pointing at an explicit data directory.
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: dir.into() }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_uses_default_data_dir() {
        let config = ExchangeConfig::load().expect("default config loads");
        assert_eq!(config.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn explicit_data_dir() {
        let config = ExchangeConfig::with_data_dir("/tmp/bm");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/bm"));
    }
}
