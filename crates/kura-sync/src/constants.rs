//! Engine constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.
//! Every duration here is a default for the matching [`SyncConfig`](crate::SyncConfig) field.

use std::time::Duration;

/// Delay before a debounced write reaches disk.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Debounce delay used by [`SyncConfig::for_tests`](crate::SyncConfig::for_tests).
pub const TEST_DEBOUNCE: Duration = Duration::from_millis(25);

/// How long change events stay suppressed after a self-inflicted mutation.
pub const DEFAULT_SELF_WRITE_GRACE: Duration = Duration::from_millis(200);

/// Poll interval for `notify` backends that fall back to polling.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Buffer size of the channel between a change source and its pump task.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Buffer size of the change-notice broadcast channel of an observable.
pub const DEFAULT_NOTICE_CAPACITY: usize = 64;

/// Suffix of the hidden temp files `LocalFs` writes before renaming.
pub const TEMP_FILE_SUFFIX: &str = ".kura-tmp";

/// Environment variable overriding the debounce delay, in milliseconds.
pub const DEBOUNCE_ENV_VAR: &str = "KURA_DEBOUNCE_MS";
