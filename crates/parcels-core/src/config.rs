//! Configuration types for the parcels aggregator
//!
//! This module defines all configuration structures used throughout the crate.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main aggregator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Freshness policy
    #[serde(default)]
    pub freshness: FreshnessConfig,

    /// Shared deadline for all fetches of one lookup (in milliseconds)
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Capacity of the observability event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl AggregatorConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            freshness: FreshnessConfig::default(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.fetch_timeout_ms == 0 {
            return Err(crate::Error::config("Fetch timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }

        self.freshness.validate()
    }

    /// Fetch deadline as a duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// How long cached responses stay fresh, by response status
///
/// A source is refetched once `now` is strictly past
/// `last_fetched_at + interval`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessConfig {
    /// Recheck interval after a successful fetch (in seconds)
    ///
    /// The source knows the parcel, so it is checked most often.
    #[serde(default = "default_ok_check_interval_secs")]
    pub ok_check_interval_secs: u64,

    /// Recheck interval after a "not found" response (in seconds)
    ///
    /// The source is most likely irrelevant for this parcel.
    #[serde(default = "default_not_found_check_interval_secs")]
    pub not_found_check_interval_secs: u64,

    /// Recheck interval after an unknown error (in seconds)
    #[serde(default = "default_unknown_error_check_interval_secs")]
    pub unknown_error_check_interval_secs: u64,

    /// Recheck interval after the source reported rate limiting (in seconds)
    #[serde(default = "default_rate_limited_check_interval_secs")]
    pub rate_limited_check_interval_secs: u64,

    /// Age after which history is ignored entirely (in seconds)
    ///
    /// Carriers reuse tracking numbers, so very old history is treated as
    /// if the number had never been seen.
    #[serde(default = "default_expiry_secs")]
    pub expiry_secs: u64,
}

impl FreshnessConfig {
    /// Validate the freshness configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        let intervals = [
            ("ok_check_interval_secs", self.ok_check_interval_secs),
            ("not_found_check_interval_secs", self.not_found_check_interval_secs),
            ("unknown_error_check_interval_secs", self.unknown_error_check_interval_secs),
            ("rate_limited_check_interval_secs", self.rate_limited_check_interval_secs),
            ("expiry_secs", self.expiry_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(crate::Error::config(format!("{} must be > 0", name)));
            }
            if value > i64::MAX as u64 / 1000 {
                return Err(crate::Error::config(format!("{} is too large", name)));
            }
        }
        Ok(())
    }

    pub fn ok_check_interval(&self) -> TimeDelta {
        secs(self.ok_check_interval_secs)
    }

    pub fn not_found_check_interval(&self) -> TimeDelta {
        secs(self.not_found_check_interval_secs)
    }

    pub fn unknown_error_check_interval(&self) -> TimeDelta {
        secs(self.unknown_error_check_interval_secs)
    }

    pub fn rate_limited_check_interval(&self) -> TimeDelta {
        secs(self.rate_limited_check_interval_secs)
    }

    pub fn expiry(&self) -> TimeDelta {
        secs(self.expiry_secs)
    }
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            ok_check_interval_secs: default_ok_check_interval_secs(),
            not_found_check_interval_secs: default_not_found_check_interval_secs(),
            unknown_error_check_interval_secs: default_unknown_error_check_interval_secs(),
            rate_limited_check_interval_secs: default_rate_limited_check_interval_secs(),
            expiry_secs: default_expiry_secs(),
        }
    }
}

fn secs(value: u64) -> TimeDelta {
    TimeDelta::try_seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
        .unwrap_or(TimeDelta::MAX)
}

/// History store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryStoreConfig {
    /// JSON file history store
    File {
        /// Path to the history file
        path: String,
    },

    /// SQLite history store (`parcels-store-sqlite`)
    Sqlite {
        /// Path to the database file
        path: String,
    },

    /// In-memory history store (not persistent)
    #[default]
    Memory,
}

impl HistoryStoreConfig {
    /// Validate the history store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            HistoryStoreConfig::File { path } | HistoryStoreConfig::Sqlite { path } => {
                if path.is_empty() {
                    return Err(crate::Error::config(format!(
                        "{} history store path cannot be empty",
                        self.type_name()
                    )));
                }
                Ok(())
            }
            HistoryStoreConfig::Memory => Ok(()),
        }
    }

    /// Get the store type name
    pub fn type_name(&self) -> &'static str {
        match self {
            HistoryStoreConfig::File { .. } => "file",
            HistoryStoreConfig::Sqlite { .. } => "sqlite",
            HistoryStoreConfig::Memory => "memory",
        }
    }
}

fn default_ok_check_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_not_found_check_interval_secs() -> u64 {
    3 * 24 * 60 * 60
}

fn default_unknown_error_check_interval_secs() -> u64 {
    3 * 60 * 60
}

fn default_rate_limited_check_interval_secs() -> u64 {
    default_unknown_error_check_interval_secs()
}

fn default_expiry_secs() -> u64 {
    6 * 30 * 24 * 60 * 60
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_event_channel_capacity() -> usize {
    1000
}
