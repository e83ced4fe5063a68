//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/icsync/config.toml` by default. Every section is optional:
//!
//! ```toml
//! [storage]
//! database_path = "/var/lib/icsync/subscriptions.db"
//!
//! [sync]
//! interval_secs = 3600
//! default_alarm_minutes = 15
//!
//! [http]
//! user_agent = "icsync/0.1"
//!
//! [logging]
//! format = "json"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use icsync_core::TracingOutputFormat;
use icsync_providers::{FetcherConfig, MAX_REDIRECTS};
use icsync_server::{
    NotifyConfig, OrchestratorConfig, SchedulerConfig, default_calendar_path,
    default_database_path,
};

/// Configuration for the icsync client and daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Where the databases live.
    pub storage: StorageSettings,

    /// Sync scheduling and subscription defaults.
    pub sync: SyncSettings,

    /// HTTP fetcher settings.
    pub http: HttpSettings,

    /// Notification settings.
    pub notifications: NotificationSettings,

    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Database locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Subscription database (defaults to the data directory).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Native calendar store database (defaults to the data directory).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_path: Option<PathBuf>,

    /// Directory `content:` locators are resolved under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_root: Option<PathBuf>,
}

impl StorageSettings {
    /// Returns the subscription database path.
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }

    /// Returns the calendar store path.
    pub fn calendar_path(&self) -> PathBuf {
        self.calendar_path
            .clone()
            .unwrap_or_else(default_calendar_path)
    }
}

/// Sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Periodic sync interval; periodic sync is off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,

    /// Timed-event alarm given to new subscriptions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_alarm_minutes: Option<i64>,

    /// All-day-event alarm given to new subscriptions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_all_day_alarm_minutes: Option<i64>,

    /// First retry delay after a pass asked for a retry.
    pub initial_backoff_secs: u64,

    /// Upper bound for the retry delay.
    pub max_backoff_secs: u64,

    /// Retries in a row before the daemon waits for the next period.
    pub max_consecutive_failures: u32,

    /// Redirects followed per fetch.
    pub max_redirects: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: None,
            default_alarm_minutes: None,
            default_all_day_alarm_minutes: None,
            initial_backoff_secs: 30,
            max_backoff_secs: 3600,
            max_consecutive_failures: 10,
            max_redirects: MAX_REDIRECTS,
        }
    }
}

/// HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// User-Agent header (defaults to `icsync/<version>`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: None,
            connect_timeout_secs: FetcherConfig::DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: FetcherConfig::DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Show desktop notifications for sync problems.
    pub enabled: bool,

    /// Application name shown in notifications.
    pub app_name: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            app_name: "icsync".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `pretty`, `compact` or `json`.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: "compact".to_string(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from the default path.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("failed to read config: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse config: {}", e))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("icsync")
    }

    /// Checks values that parse but cannot work.
    pub fn validate(&self) -> Result<(), String> {
        self.log_format()?;
        if self.sync.interval_secs == Some(0) {
            return Err("sync.interval_secs must be greater than zero".to_string());
        }
        if self.http.connect_timeout_secs == 0 || self.http.request_timeout_secs == 0 {
            return Err("http timeouts must be greater than zero".to_string());
        }
        if self.sync.initial_backoff_secs == 0
            || self.sync.max_backoff_secs < self.sync.initial_backoff_secs
        {
            return Err(
                "sync.max_backoff_secs must be at least sync.initial_backoff_secs (> 0)"
                    .to_string(),
            );
        }
        for (key, value) in [
            ("default_alarm_minutes", self.sync.default_alarm_minutes),
            (
                "default_all_day_alarm_minutes",
                self.sync.default_all_day_alarm_minutes,
            ),
        ] {
            if value.is_some_and(|minutes| minutes < 0) {
                return Err(format!("sync.{} must not be negative", key));
            }
        }
        Ok(())
    }

    /// Returns the configured log output format.
    pub fn log_format(&self) -> Result<TracingOutputFormat, String> {
        self.logging
            .format
            .parse()
            .map_err(|e: icsync_core::TracingError| e.to_string())
    }

    /// Builds the fetcher configuration.
    pub fn fetcher_config(&self) -> FetcherConfig {
        let mut config = FetcherConfig::default()
            .with_connect_timeout(Duration::from_secs(self.http.connect_timeout_secs))
            .with_request_timeout(Duration::from_secs(self.http.request_timeout_secs))
            .with_max_redirects(self.sync.max_redirects);
        if let Some(ref user_agent) = self.http.user_agent {
            config = config.with_user_agent(user_agent.clone());
        }
        if let Some(ref root) = self.storage.content_root {
            config = config.with_content_root(root.clone());
        }
        config
    }

    /// Builds the orchestrator configuration.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_max_redirects(self.sync.max_redirects)
            .with_notify_on_error(self.notifications.enabled)
    }

    /// Builds the scheduler configuration; `interval_override` wins over
    /// `sync.interval_secs`.
    pub fn scheduler_config(&self, interval_override: Option<u64>) -> SchedulerConfig {
        let interval = interval_override
            .or(self.sync.interval_secs)
            .map(Duration::from_secs);
        SchedulerConfig::new(interval)
            .with_backoff(
                Duration::from_secs(self.sync.initial_backoff_secs),
                Duration::from_secs(self.sync.max_backoff_secs),
                2.0,
            )
            .with_max_consecutive_failures(self.sync.max_consecutive_failures)
    }

    /// Builds the notification configuration.
    pub fn notify_config(&self) -> NotifyConfig {
        NotifyConfig::default()
            .with_app_name(self.notifications.app_name.clone())
            .with_enabled(self.notifications.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config.http.connect_timeout_secs, 20);
        assert_eq!(config.http.request_timeout_secs, 60);
        assert_eq!(config.sync.interval_secs, None);
        assert!(config.notifications.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            [sync]
            interval_secs = 900
            default_alarm_minutes = 10

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.interval_secs, Some(900));
        assert_eq!(config.sync.default_alarm_minutes, Some(10));
        assert_eq!(config.sync.max_backoff_secs, 3600);
        assert_eq!(config.log_format().unwrap(), TracingOutputFormat::Json);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = ClientConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.sync.interval_secs = Some(0);
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.sync.default_all_day_alarm_minutes = Some(-5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn interval_override_wins() {
        let mut config = ClientConfig::default();
        config.sync.interval_secs = Some(600);
        assert_eq!(
            config.scheduler_config(None).periodic_interval,
            Some(Duration::from_secs(600))
        );
        assert_eq!(
            config.scheduler_config(Some(60)).periodic_interval,
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn fetcher_config_follows_settings() {
        let mut config = ClientConfig::default();
        config.http.user_agent = Some("test-agent".to_string());
        config.http.request_timeout_secs = 5;
        config.storage.content_root = Some(PathBuf::from("/srv/feeds"));

        let fetcher = config.fetcher_config();
        assert_eq!(fetcher.user_agent, "test-agent");
        assert_eq!(fetcher.request_timeout, Duration::from_secs(5));
        assert_eq!(fetcher.content_root, Some(PathBuf::from("/srv/feeds")));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage]\ndatabase_path = \"/tmp/subs.db\"\n").unwrap();

        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(
            config.storage.database_path(),
            PathBuf::from("/tmp/subs.db")
        );
        assert!(ClientConfig::load_from(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn dump_round_trips() {
        let config = ClientConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.http.connect_timeout_secs, 20);
    }
}
