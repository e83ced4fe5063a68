//! Engine configuration and default storage locations.

use std::path::PathBuf;

use icsync_providers::MAX_REDIRECTS;

/// File name of the subscription database.
pub const DATABASE_FILE: &str = "subscriptions.db";

/// File name of the standalone calendar store.
pub const CALENDAR_FILE: &str = "calendars.db";

/// Configuration of the sync orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of redirects followed per fetch.
    pub max_redirects: usize,

    /// Whether per-subscription failures raise a user notification.
    pub notify_on_error: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_redirects: MAX_REDIRECTS,
            notify_on_error: true,
        }
    }
}

impl OrchestratorConfig {
    /// Builder: set the redirect cap.
    #[must_use]
    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// Builder: enable or disable failure notifications.
    #[must_use]
    pub fn with_notify_on_error(mut self, notify: bool) -> Self {
        self.notify_on_error = notify;
        self
    }
}

/// Returns the directory icsync keeps its databases in.
///
/// Uses `$XDG_DATA_HOME/icsync` (or the platform equivalent) if available,
/// otherwise falls back to `./.icsync`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("icsync"))
        .unwrap_or_else(|| PathBuf::from(".icsync"))
}

/// Returns the default path of the subscription database.
pub fn default_database_path() -> PathBuf {
    default_data_dir().join(DATABASE_FILE)
}

/// Returns the default path of the calendar store.
pub fn default_calendar_path() -> PathBuf {
    default_data_dir().join(CALENDAR_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_redirects, 5);
        assert!(config.notify_on_error);
    }

    #[test]
    fn custom_config() {
        let config = OrchestratorConfig::default()
            .with_max_redirects(2)
            .with_notify_on_error(false);
        assert_eq!(config.max_redirects, 2);
        assert!(!config.notify_on_error);
    }

    #[test]
    fn default_paths_share_a_directory() {
        let db = default_database_path();
        let calendars = default_calendar_path();
        assert!(db.ends_with(DATABASE_FILE));
        assert!(calendars.ends_with(CALENDAR_FILE));
        assert_eq!(db.parent(), calendars.parent());
        assert!(db.to_string_lossy().contains("icsync"));
    }
}
