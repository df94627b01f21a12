//! Loop configuration
//!
//! All knobs have working defaults; a host may override them from a TOML file:
//!
//! ```toml
//! round_robin_budget = 50
//! shutdown_timeout_ms = 500
//! ```

use crate::error::LoopError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Steps each round-robin task gets per invocation before yielding to the loop.
pub const DEFAULT_ROUND_ROBIN_BUDGET: usize = 100;

/// Exit code reported after `stop()` or when no exit was requested.
pub const DEFAULT_STOP_EXIT_CODE: i32 = 1;

/// Tunables for an [`EventLoop`](crate::EventLoop).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    /// Maximum steps per task per round-robin invocation
    pub round_robin_budget: usize,

    /// Name of the background timer thread
    pub timer_thread_name: String,

    /// How long shutdown waits for the timer thread to join, in milliseconds
    pub shutdown_timeout_ms: u64,

    /// Exit code reported after `stop()`
    pub stop_exit_code: i32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            round_robin_budget: DEFAULT_ROUND_ROBIN_BUDGET,
            timer_thread_name: "hostloop-timer".to_string(),
            shutdown_timeout_ms: 2000,
            stop_exit_code: DEFAULT_STOP_EXIT_CODE,
        }
    }
}

impl LoopConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, LoopError> {
        let config: LoopConfig =
            toml::from_str(source).map_err(|e| LoopError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoopError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| LoopError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), LoopError> {
        if self.round_robin_budget == 0 {
            return Err(LoopError::Config(
                "round_robin_budget must be at least 1".to_string(),
            ));
        }
        if self.timer_thread_name.is_empty() {
            return Err(LoopError::Config(
                "timer_thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Shutdown timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
