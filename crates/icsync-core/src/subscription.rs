//! Subscription and credential records.
//!
//! A [`Subscription`] points at one ICS source and carries its sync state.
//! Its JSON form is the backup/restore representation: every field has a
//! stable key and optional fields that are unset are omitted on write.

use serde::{Deserialize, Serialize};
use url::Url;

/// Color used for calendars whose feed does not declare one (ARGB).
pub const DEFAULT_COLOR: u32 = 0xFF2F80C7;

/// Where a subscription's content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Fetched over HTTP(S), including `webcal` locators.
    Network,
    /// Read from a `file` or `content` locator.
    Local,
}

impl SourceKind {
    /// Classifies a source locator by its scheme.
    ///
    /// Locators that are not valid URLs are treated as local paths.
    pub fn of(locator: &str) -> Self {
        match Url::parse(locator) {
            Ok(url) => match url.scheme() {
                "http" | "https" | "webcal" | "webcals" => Self::Network,
                _ => Self::Local,
            },
            Err(_) => Self::Local,
        }
    }
}

/// Selects which subscriptions a sync pass processes.
///
/// The network and local flows are two instances of the same pass,
/// parameterized by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncFilter {
    /// Only subscriptions with an HTTP(S) locator.
    NetworkOnly,
    /// Only subscriptions with a local locator.
    LocalOnly,
}

impl SyncFilter {
    /// Returns true if the given source kind belongs to this flow.
    pub fn accepts(&self, kind: SourceKind) -> bool {
        matches!(
            (self, kind),
            (Self::NetworkOnly, SourceKind::Network) | (Self::LocalOnly, SourceKind::Local)
        )
    }

    /// Returns a short name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkOnly => "network",
            Self::LocalOnly => "local",
        }
    }
}

impl std::fmt::Display for SyncFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

/// Reads an ARGB color written either unsigned or as a signed 32-bit int.
fn deserialize_argb<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Some(value) = Option::<i64>::deserialize(deserializer)? else {
        return Ok(None);
    };
    u32::try_from(value)
        .or_else(|_| i32::try_from(value).map(|v| v as u32))
        .map(Some)
        .map_err(|_| serde::de::Error::custom(format!("color {} is not a 32-bit value", value)))
}

/// A user-configured pointer to one ICS source plus its sync state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Repository id. Zero until the subscription has been stored.
    #[serde(default)]
    pub id: i64,
    /// Id of the native calendar this subscription is provisioned into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_id: Option<i64>,
    /// Source locator (`http(s)`, `webcal`, `file` or `content`).
    pub url: String,
    /// Entity tag returned by the last successful fetch.
    #[serde(rename = "eTag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Name shown for the calendar.
    pub display_name: String,
    /// Source's last modification time (epoch millis) at the last sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
    /// Time of the last sync attempt that reached the source (epoch millis).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<i64>,
    /// Error of the last sync, `None` when it succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Drop alarms embedded in the feed.
    #[serde(default)]
    pub ignore_embedded_alerts: bool,
    /// Add an alarm this many minutes before every timed event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_alarm_minutes: Option<i64>,
    /// Add an alarm this many minutes before every all-day event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_all_day_alarm_minutes: Option<i64>,
    /// Drop the `DESCRIPTION` of every event.
    #[serde(default)]
    pub ignore_description: bool,
    /// Calendar color (ARGB).
    #[serde(
        default,
        deserialize_with = "deserialize_argb",
        skip_serializing_if = "Option::is_none"
    )]
    pub color: Option<u32>,
    /// Whether sync passes pick up this subscription.
    #[serde(default = "default_true")]
    pub sync_enabled: bool,
    /// Whether the native calendar is shown.
    #[serde(default = "default_true")]
    pub visible: bool,
}

impl Subscription {
    /// Creates a new, unstored subscription.
    pub fn new(url: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: 0,
            calendar_id: None,
            url: url.into(),
            etag: None,
            display_name: display_name.into(),
            last_modified: None,
            last_sync: None,
            error_message: None,
            ignore_embedded_alerts: false,
            default_alarm_minutes: None,
            default_all_day_alarm_minutes: None,
            ignore_description: false,
            color: None,
            sync_enabled: true,
            visible: true,
        }
    }

    /// Builder method to set the color.
    #[must_use]
    pub fn with_color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    /// Builder method to set the default alarms.
    #[must_use]
    pub fn with_default_alarms(mut self, timed: Option<i64>, all_day: Option<i64>) -> Self {
        self.default_alarm_minutes = timed;
        self.default_all_day_alarm_minutes = all_day;
        self
    }

    /// Builder method to ignore embedded alarms.
    #[must_use]
    pub fn with_ignore_embedded_alerts(mut self, ignore: bool) -> Self {
        self.ignore_embedded_alerts = ignore;
        self
    }

    /// Builder method to drop event descriptions.
    #[must_use]
    pub fn with_ignore_description(mut self, ignore: bool) -> Self {
        self.ignore_description = ignore;
        self
    }

    /// Returns the kind of source this subscription points at.
    pub fn source_kind(&self) -> SourceKind {
        SourceKind::of(&self.url)
    }

    /// Returns true if a native calendar has been created for it.
    pub fn is_provisioned(&self) -> bool {
        self.calendar_id.is_some()
    }

    /// Returns the color to use for the native calendar.
    pub fn effective_color(&self) -> u32 {
        self.color.unwrap_or(DEFAULT_COLOR)
    }

    /// Returns true if a pass with the given filter should process it.
    pub fn matches(&self, filter: SyncFilter) -> bool {
        self.sync_enabled && filter.accepts(self.source_kind())
    }
}

/// Username/password pair attached to one subscription.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// The subscription this credential belongs to.
    pub subscription_id: i64,
    /// Username sent with Basic authentication.
    pub username: String,
    /// Password sent with Basic authentication.
    pub password: String,
}

impl Credential {
    /// Creates a new credential.
    pub fn new(
        subscription_id: i64,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id,
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("subscription_id", &self.subscription_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
