//! Engine configuration.
//!
//! Configuration is plain data with a default for every field, so a partial
//! RON document is enough:
//!
//! ```ron
//! (
//!     debounce_ms: 250,
//!     ignore_hidden: true,
//! )
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEBOUNCE_ENV_VAR, DEFAULT_DEBOUNCE, DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_NOTICE_CAPACITY,
    DEFAULT_POLL_INTERVAL, DEFAULT_SELF_WRITE_GRACE, TEST_DEBOUNCE,
};
use crate::error::{SyncError, SyncResult};

/// Tunables shared by coordinators and the directory observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Delay before a debounced write is flushed.
    pub debounce_ms: u64,
    /// Suppression window after `disable_and_perform` finishes.
    pub self_write_grace_ms: u64,
    /// Poll interval for polling `notify` backends.
    pub poll_interval_ms: u64,
    /// Capacity of each change-source channel.
    pub event_channel_capacity: usize,
    /// Capacity of each observable's change-notice channel.
    pub notice_capacity: usize,
    /// Drop change events for dot-files.
    pub ignore_hidden: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            self_write_grace_ms: DEFAULT_SELF_WRITE_GRACE.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            notice_capacity: DEFAULT_NOTICE_CAPACITY,
            ignore_hidden: true,
        }
    }
}

impl SyncConfig {
    /// Short delays for tests; everything else default.
    pub fn for_tests() -> Self {
        Self {
            debounce_ms: TEST_DEBOUNCE.as_millis() as u64,
            self_write_grace_ms: 50,
            poll_interval_ms: 50,
            ..Self::default()
        }
    }

    /// Parse from RON text.
    pub fn from_ron_str(text: &str) -> SyncResult<Self> {
        ron::from_str(text).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Load from a RON file, then apply environment overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(text) => Self::from_ron_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no sync config, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(SyncError::Config(format!("{}: {}", path.display(), e)));
            }
        };
        Ok(config.with_env_overrides())
    }

    /// Apply `KURA_DEBOUNCE_MS` if set and numeric.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var(DEBOUNCE_ENV_VAR) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.debounce_ms = ms,
                Err(_) => {
                    tracing::warn!(var = DEBOUNCE_ENV_VAR, value = %raw, "ignoring non-numeric override")
                }
            }
        }
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn self_write_grace(&self) -> Duration {
        Duration::from_millis(self.self_write_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
