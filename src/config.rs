//! Engine configuration parameters
//!
//! Tunables for a [`Host`](crate::engine::Host). Values can be loaded
//! from JSON; anything missing falls back to the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Host-wide engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // --- Dispatcher ---
    /// Worker threads running callbacks and protocol handlers
    pub completion_workers: usize,

    // --- Timing ---
    /// Timeout for `request_send_sync` / `operation_sync` (milliseconds, 0 = wait forever)
    pub default_timeout_ms: u32,
}

impl EngineConfig {
    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            log::warn!("config: invalid JSON: {}", e);
            Error::Config("malformed engine configuration")
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.completion_workers == 0 {
            return Err(Error::Config("completion_workers must be at least 1"));
        }
        Ok(())
    }

    /// Default synchronous timeout; `None` means no deadline.
    pub fn default_timeout(&self) -> Option<Duration> {
        match self.default_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(u64::from(ms))),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            completion_workers: 4,
            default_timeout_ms: 1000, // 1 s
        }
    }
}
