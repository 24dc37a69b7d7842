//! Configuration for the cursor manager and the command handler.
//!
//! Every field has a default, so an empty configuration document is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cursor batching and lifetime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    /// First batch size used when a query does not specify one.
    pub default_batch_size: i64,
    /// Cursors untouched for this long are closed by the reaper.
    pub idle_timeout_ms: u64,
    /// How often the reaper looks for idle cursors.
    pub reap_interval_secs: u64,
}

impl CursorConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 101,
            idle_timeout_ms: 10 * 60 * 1000,
            reap_interval_secs: 60,
        }
    }
}

/// Settings for the command handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    pub cursors: CursorConfig,
}
