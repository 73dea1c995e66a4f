//! Configuration for the OpenCT reader backend

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::service::MAX_TERMINALS;

/// Placeholder readers registered by default
pub const DEFAULT_PREALLOCATE: usize = 5;

/// Configuration options for the OpenCT driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Number of terminal indices that get a placeholder reader when no
    /// terminal is plugged in, so devices attached later bind to a reader
    /// the host already knows. Zero disables hot-plug binding.
    pub preallocate: usize,

    /// Number of terminal indices scanned at startup
    pub max_readers: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            preallocate: DEFAULT_PREALLOCATE,
            max_readers: MAX_TERMINALS,
        }
    }
}

impl DriverConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of placeholder readers
    pub const fn with_preallocate(mut self, preallocate: usize) -> Self {
        self.preallocate = preallocate;
        self
    }

    /// Set the number of terminal indices scanned
    pub const fn with_max_readers(mut self, max_readers: usize) -> Self {
        self.max_readers = max_readers;
        self
    }

    /// Terminal indices to scan, never more than the service exposes
    pub fn scan_range(&self) -> std::ops::Range<u32> {
        // MAX_TERMINALS is small, the cast cannot truncate
        0..self.max_readers.min(MAX_TERMINALS) as u32
    }

    /// Load from a TOML file, overridden by `OPENCT_`-prefixed environment
    /// variables; missing keys keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("OPENCT_"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.preallocate, 5);
        assert_eq!(config.max_readers, 16);
        assert_eq!(config.scan_range(), 0..16);
    }

    #[test]
    fn test_scan_range_is_capped() {
        let config = DriverConfig::new().with_max_readers(64);
        assert_eq!(config.scan_range(), 0..16);
        assert_eq!(DriverConfig::new().with_max_readers(3).scan_range(), 0..3);
    }

    #[test]
    fn test_load_from_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file("openct.toml", "preallocate = 2")?;
            let config = DriverConfig::load("openct.toml")?;
            assert_eq!(config.preallocate, 2);
            assert_eq!(config.max_readers, 16);

            jail.set_env("OPENCT_MAX_READERS", "4");
            let config = DriverConfig::load("openct.toml")?;
            assert_eq!(config.max_readers, 4);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_keeps_defaults() {
        Jail::expect_with(|_| {
            assert_eq!(DriverConfig::load("absent.toml")?, DriverConfig::default());
            Ok(())
        });
    }
}
