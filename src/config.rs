//! Tunables for the synchronization core
//!
//! Everything here has a sensible default; a `sync.toml` file in the
//! comunicado configuration directory can override individual values.

use crate::error::{SyncError, SyncResult};
use crate::util::dates::{self, DateTs, DAY_MILLIS};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current config file format version
const CONFIG_VERSION: u32 = 1;

/// Sync tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Version of the config file format
    pub version: u32,
    /// Fixed growth step used when the date probe gives up
    pub initial_sync_growth_days: i64,
    /// Approximate number of messages a grow should pull in
    pub growth_message_count_target: u32,
    /// Below this many unsynced messages a grow just takes the whole folder
    pub sync_whole_folder_at_n_messages: u32,
    /// Furthest back in time we are ever willing to go
    pub oldest_sync_date: NaiveDate,
    /// New POP3 messages synchronized per refresh, the rest go to overflow
    pub pop3_max_messages_per_sync: usize,
    /// Cumulative sequence/date inversion tolerated by the date probe
    pub probe_violation_tolerance_days: i64,
    /// Calendar range start relative to today
    pub calendar_past_days: i64,
    /// Calendar range end relative to today
    pub calendar_future_days: i64,
    /// How far back the first bug tracker query reaches
    pub bug_initial_sync_days: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            initial_sync_growth_days: 3,
            growth_message_count_target: 32,
            sync_whole_folder_at_n_messages: 40,
            oldest_sync_date: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default(),
            pop3_max_messages_per_sync: 100,
            probe_violation_tolerance_days: 7,
            calendar_past_days: 30,
            calendar_future_days: 30,
            bug_initial_sync_days: 30,
        }
    }
}

impl SyncConfig {
    /// Default location: `<config dir>/comunicado/sync.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("comunicado").join("sync.toml"))
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: SyncConfig = toml::from_str(&content)?;

        if config.version > CONFIG_VERSION {
            warn!(
                "Sync config version {} is newer than supported version {}",
                config.version, CONFIG_VERSION
            );
        }
        config.validate()?;

        debug!("Loaded sync configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration from file, falling back to defaults if it does not exist
    pub fn load_or_default(path: &Path) -> SyncResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("No sync config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> SyncResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        debug!("Saved sync configuration to {}", path.display());
        Ok(())
    }

    /// Reject values that would make the sync heuristics misbehave
    pub fn validate(&self) -> SyncResult<()> {
        if self.growth_message_count_target == 0 {
            return Err(SyncError::config("growth_message_count_target must be positive"));
        }
        if self.initial_sync_growth_days <= 0 {
            return Err(SyncError::config("initial_sync_growth_days must be positive"));
        }
        if self.probe_violation_tolerance_days < 0 {
            return Err(SyncError::config(
                "probe_violation_tolerance_days must not be negative",
            ));
        }
        Ok(())
    }

    /// `oldest_sync_date` as a timestamp
    pub fn oldest_sync_ts(&self) -> DateTs {
        dates::date_to_ts(self.oldest_sync_date)
    }

    /// Probe tolerance in milliseconds
    pub fn probe_violation_tolerance_millis(&self) -> DateTs {
        self.probe_violation_tolerance_days * DAY_MILLIS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.growth_message_count_target, 32);
        assert_eq!(config.sync_whole_folder_at_n_messages, 40);
        assert_eq!(config.oldest_sync_ts(), 631_152_000_000);
        assert_eq!(config.probe_violation_tolerance_millis(), 7 * DAY_MILLIS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("sync.toml");

        let mut config = SyncConfig::default();
        config.pop3_max_messages_per_sync = 5;
        config.save(&path).unwrap();

        let loaded = SyncConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        fs::write(&path, "initial_sync_growth_days = 9\n").unwrap();

        let loaded = SyncConfig::load(&path).unwrap();
        assert_eq!(loaded.initial_sync_growth_days, 9);
        assert_eq!(loaded.growth_message_count_target, 32);
    }

    #[test]
    fn test_missing_file_defaults() {
        let dir = tempdir().unwrap();
        let loaded = SyncConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, SyncConfig::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        fs::write(&path, "growth_message_count_target = 0\n").unwrap();
        assert!(matches!(SyncConfig::load(&path), Err(SyncError::Config(_))));
    }
}
