//! Configuration types for FileChunk
//!
//! This module defines the configuration shared by every store attached to
//! one store context.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default width of the global I/O limiter
pub const DEFAULT_IO_CONCURRENCY: usize = 5;

/// Store context configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of backend operations in flight across all stores
    pub io_concurrency: usize,
    /// Capacity quota for the in-memory backend (None = unlimited)
    pub memory_quota: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            io_concurrency: DEFAULT_IO_CONCURRENCY,
            memory_quota: None,
        }
    }
}

impl StoreConfig {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields fall back to their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    /// Parse a configuration from a JSON string
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| Error::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.io_concurrency == 0 {
            return Err(Error::Configuration(
                "io_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
