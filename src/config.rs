//! Application-level configuration loading: scheduler cadence, storage budgets and session policies.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_ARENA_CONFIG_PATH";

/// Timing knobs for the background scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Delay between two scheduler ticks.
    pub poll_interval: Duration,
    /// How long after `start_time` an auto-start session is still picked up.
    pub auto_start_window: Duration,
    /// Hard ceiling past which a late session is never auto-started.
    pub late_start_ceiling: Duration,
    /// Age after which a `scheduled` session is cancelled.
    pub stale_after: Duration,
    /// Minimum delay between two stale cleanups.
    pub stale_cleanup_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            auto_start_window: Duration::from_secs(60),
            late_start_ceiling: Duration::from_secs(300),
            stale_after: Duration::from_secs(24 * 60 * 60),
            stale_cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    /// Budget granted to every storage operation before it is reported as timed out.
    pub storage_timeout: Duration,
    /// Register unknown participants when they first fetch questions.
    pub auto_join_on_access: bool,
    /// Deployment-wide switch for answer-option shuffling.
    pub allow_option_shuffling: bool,
    /// Number of prize positions awarded per session.
    pub prize_positions: u8,
    /// Shared secret expected in `x-admin-token`; admin routes are open when unset.
    pub admin_token: Option<String>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        poll_interval_secs = app_config.scheduler.poll_interval.as_secs(),
                        prize_positions = app_config.prize_positions,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent keys keep their default value.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    scheduler: RawScheduler,
    storage: RawStorage,
    participation: RawParticipation,
    shuffle: RawShuffle,
    prizes: RawPrizes,
    admin: RawAdmin,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawScheduler {
    poll_interval_secs: u64,
    auto_start_window_secs: u64,
    late_start_ceiling_secs: u64,
    stale_after_hours: u64,
    stale_cleanup_interval_secs: u64,
}

impl Default for RawScheduler {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            auto_start_window_secs: 60,
            late_start_ceiling_secs: 300,
            stale_after_hours: 24,
            stale_cleanup_interval_secs: 3_600,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawStorage {
    operation_timeout_ms: u64,
}

impl Default for RawStorage {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawParticipation {
    auto_join_on_access: bool,
}

impl Default for RawParticipation {
    fn default() -> Self {
        Self {
            auto_join_on_access: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawShuffle {
    allow_option_shuffling: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawPrizes {
    positions: u8,
}

impl Default for RawPrizes {
    fn default() -> Self {
        Self { positions: 3 }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAdmin {
    token: Option<String>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let scheduler = SchedulerConfig {
            // a zero interval would make `tokio::time::interval` panic
            poll_interval: Duration::from_secs(value.scheduler.poll_interval_secs.max(1)),
            auto_start_window: Duration::from_secs(value.scheduler.auto_start_window_secs),
            late_start_ceiling: Duration::from_secs(value.scheduler.late_start_ceiling_secs),
            stale_after: Duration::from_secs(value.scheduler.stale_after_hours * 60 * 60),
            stale_cleanup_interval: Duration::from_secs(
                value.scheduler.stale_cleanup_interval_secs,
            ),
        };

        Self {
            scheduler,
            storage_timeout: Duration::from_millis(value.storage.operation_timeout_ms.max(1)),
            auto_join_on_access: value.participation.auto_join_on_access,
            allow_option_shuffling: value.shuffle.allow_option_shuffling,
            prize_positions: value.prizes.positions,
            admin_token: value.admin.token.filter(|token| !token.is_empty()),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.storage_timeout, Duration::from_secs(5));
        assert!(config.auto_join_on_access);
        assert!(!config.allow_option_shuffling);
        assert_eq!(config.prize_positions, 3);
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn partial_documents_keep_remaining_defaults() {
        let config = AppConfig::from_json(
            r#"{"scheduler": {"poll_interval_secs": 5}, "prizes": {"positions": 5}}"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(5));
        assert_eq!(config.scheduler.late_start_ceiling, Duration::from_secs(300));
        assert_eq!(config.prize_positions, 5);
        assert_eq!(config.storage_timeout, Duration::from_millis(5_000));
    }

    #[test]
    fn empty_admin_token_is_ignored() {
        let config = AppConfig::from_json(r#"{"admin": {"token": ""}}"#).unwrap();
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config = AppConfig::from_json(r#"{"scheduler": {"poll_interval_secs": 0}}"#).unwrap();
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn malformed_document_is_rejected() {
        assert!(AppConfig::from_json("{not json").is_err());
    }
}
