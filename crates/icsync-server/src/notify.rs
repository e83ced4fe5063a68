//! User notifications about sync problems.
//!
//! The orchestrator reports two kinds of problems through [`Notifier`]:
//! calendar storage refusing access, and a subscription failing to sync.
//! [`DesktopNotifier`] shows them with `notify-rust` and suppresses a repeat
//! of the same error for the same subscription until it syncs again.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use notify_rust::Notification;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use icsync_core::Subscription;

/// Configuration for desktop notifications.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Application name for notifications.
    pub app_name: String,
    /// Notification timeout in seconds.
    pub timeout_secs: u32,
    /// Whether notifications are enabled.
    pub enabled: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            app_name: "icsync".to_string(),
            timeout_secs: 10,
            enabled: true,
        }
    }
}

impl NotifyConfig {
    /// Builder: set app name.
    #[must_use]
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Builder: set timeout.
    #[must_use]
    pub fn with_timeout(mut self, secs: u32) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Builder: enable or disable notifications.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Receives user-facing sync problems.
pub trait Notifier: Send + Sync {
    /// Calendar storage refused access; the user has to grant it again.
    fn permission_denied(&self, message: &str);

    /// A subscription failed to sync.
    fn sync_failed(&self, subscription: &Subscription, message: &str);

    /// A subscription synced again after a failure.
    fn sync_recovered(&self, _subscription_id: i64) {}
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn permission_denied(&self, message: &str) {
        debug!(detail = message, "Notification suppressed: permission denied");
    }

    fn sync_failed(&self, subscription: &Subscription, message: &str) {
        debug!(
            subscription_id = subscription.id,
            detail = message,
            "Notification suppressed: sync failed"
        );
    }
}

/// Generates a stable hash for a subscription's error, used to avoid
/// showing the same failure on every pass.
pub fn notification_hash(subscription_id: i64, message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subscription_id.to_le_bytes());
    hasher.update(b"|");
    hasher.update(message.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Shows notifications on the desktop.
#[derive(Debug)]
pub struct DesktopNotifier {
    config: NotifyConfig,
    /// Last error shown per subscription.
    shown: Mutex<HashMap<i64, String>>,
}

impl DesktopNotifier {
    /// Creates a new desktop notifier.
    pub fn new(config: NotifyConfig) -> Self {
        Self {
            config,
            shown: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if the error was not shown yet and records it.
    fn should_show(&self, subscription_id: i64, message: &str) -> bool {
        let hash = notification_hash(subscription_id, message);
        let mut shown = match self.shown.lock() {
            Ok(shown) => shown,
            Err(poisoned) => poisoned.into_inner(),
        };
        if shown.get(&subscription_id) == Some(&hash) {
            return false;
        }
        shown.insert(subscription_id, hash);
        true
    }

    fn show(&self, summary: &str, body: &str) -> bool {
        if !self.config.enabled {
            debug!(summary, "Notifications disabled");
            return false;
        }

        let mut notification = Notification::new();
        notification
            .appname(&self.config.app_name)
            .summary(summary)
            .body(body)
            .timeout(Duration::from_secs(self.config.timeout_secs as u64));

        match notification.show() {
            Ok(_) => {
                info!(summary, "Notification sent");
                true
            }
            Err(e) => {
                error!(error = %e, summary, "Failed to send notification");
                false
            }
        }
    }
}

impl Notifier for DesktopNotifier {
    fn permission_denied(&self, message: &str) {
        self.show(
            "Calendar access required",
            &format!("icsync cannot write to the calendar store: {}", message),
        );
    }

    fn sync_failed(&self, subscription: &Subscription, message: &str) {
        if !self.should_show(subscription.id, message) {
            debug!(
                subscription_id = subscription.id,
                "Same error already notified"
            );
            return;
        }
        self.show(
            &format!("Sync failed: {}", subscription.display_name),
            message,
        );
    }

    fn sync_recovered(&self, subscription_id: i64) {
        let mut shown = match self.shown.lock() {
            Ok(shown) => shown,
            Err(poisoned) => poisoned.into_inner(),
        };
        shown.remove(&subscription_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_distinct() {
        assert_eq!(notification_hash(1, "boom"), notification_hash(1, "boom"));
        assert_ne!(notification_hash(1, "boom"), notification_hash(2, "boom"));
        assert_ne!(notification_hash(1, "boom"), notification_hash(1, "bang"));
    }

    #[test]
    fn repeated_error_is_shown_once_until_recovery() {
        let notifier = DesktopNotifier::new(NotifyConfig::default().with_enabled(false));

        assert!(notifier.should_show(1, "404"));
        assert!(!notifier.should_show(1, "404"));
        assert!(notifier.should_show(1, "401"));
        assert!(notifier.should_show(2, "401"));

        notifier.sync_recovered(1);
        assert!(notifier.should_show(1, "401"));
    }

    #[test]
    fn disabled_notifier_does_not_show() {
        let notifier = DesktopNotifier::new(NotifyConfig::default().with_enabled(false));
        assert!(!notifier.show("title", "body"));
    }

    #[test]
    fn config_builders() {
        let config = NotifyConfig::default()
            .with_app_name("test")
            .with_timeout(3)
            .with_enabled(false);
        assert_eq!(config.app_name, "test");
        assert_eq!(config.timeout_secs, 3);
        assert!(!config.enabled);
    }
}
