//! Native calendar storage.
//!
//! The orchestrator only talks to calendar storage through [`CalendarStore`],
//! so the storage backend can be swapped:
//!
//! - [`SqliteCalendarStore`] - A standalone store in its own SQLite file
//! - [`MemoryCalendarStore`] - An in-memory store with fault injection
//!
//! Every store error is a [`SyncError`] so the orchestrator can classify it
//! the same way as fetch and parse failures. Unavailable storage is
//! `StorageUnavailable`, revoked access is `PermissionDenied`.
//!
//! [`SyncError`]: icsync_providers::SyncError

mod memory;
mod sqlite;

use std::collections::HashMap;

use icsync_core::{ChangeCounts, ReconcilePlan, StoredEntry, Subscription};
use icsync_providers::{BasicCredentials, BoxFuture, ProviderResult};

pub use memory::{MemoryCalendarStore, StoreFault};
pub use sqlite::{CALENDAR_SCHEMA, SqliteCalendarStore};

/// A calendar as held by native calendar storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCalendar {
    /// Store-assigned id.
    pub id: i64,
    /// Subscription that owns the calendar, when known.
    pub subscription_id: Option<i64>,
    /// Source locator the calendar was created from.
    pub url: Option<String>,
    pub display_name: String,
    /// ARGB color.
    pub color: u32,
    pub visible: bool,
    /// Set once the calendar is tied to a subscription record.
    pub managed: bool,
    /// Credentials stored with calendars created before subscription records
    /// existed.
    pub legacy_credentials: Option<BasicCredentials>,
}

/// Metadata written when a calendar is created or updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarProperties {
    pub subscription_id: i64,
    pub url: String,
    pub display_name: String,
    pub color: u32,
    pub visible: bool,
}

impl CalendarProperties {
    /// Derives calendar metadata from a subscription.
    pub fn from_subscription(subscription: &Subscription) -> Self {
        Self {
            subscription_id: subscription.id,
            url: subscription.url.clone(),
            display_name: subscription.display_name.clone(),
            color: subscription.effective_color(),
            visible: subscription.visible,
        }
    }

    /// Returns true if `calendar` already carries these properties.
    pub fn matches(&self, calendar: &NativeCalendar) -> bool {
        calendar.subscription_id == Some(self.subscription_id)
            && calendar.url.as_deref() == Some(self.url.as_str())
            && calendar.display_name == self.display_name
            && calendar.color == self.color
            && calendar.visible == self.visible
    }
}

/// Access to native calendar storage.
pub trait CalendarStore: Send + Sync {
    /// Returns the name of this store for logging.
    fn name(&self) -> &str;

    /// Verifies the store can be read and written.
    fn check_access(&self) -> BoxFuture<'_, ProviderResult<()>>;

    /// Lists every calendar, managed or not.
    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<NativeCalendar>>>;

    /// Creates a managed calendar and returns its id.
    fn create_calendar(&self, properties: CalendarProperties)
    -> BoxFuture<'_, ProviderResult<i64>>;

    /// Overwrites a calendar's metadata.
    fn update_calendar(
        &self,
        id: i64,
        properties: CalendarProperties,
    ) -> BoxFuture<'_, ProviderResult<()>>;

    /// Deletes a calendar and all of its entries.
    fn delete_calendar(&self, id: i64) -> BoxFuture<'_, ProviderResult<()>>;

    /// Marks a calendar as tied to a subscription record.
    fn mark_managed(&self, id: i64) -> BoxFuture<'_, ProviderResult<()>>;

    /// Returns the change-detection records of a calendar, keyed by UID.
    fn read_entries(
        &self,
        calendar_id: i64,
    ) -> BoxFuture<'_, ProviderResult<HashMap<String, StoredEntry>>>;

    /// Applies a reconciliation plan to a calendar as one batch.
    ///
    /// Entries that cannot be written are skipped and counted. The returned
    /// counts include the plan's rejected entries as skipped.
    fn apply_plan(
        &self,
        calendar_id: i64,
        plan: ReconcilePlan,
    ) -> BoxFuture<'_, ProviderResult<ChangeCounts>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_follow_subscription() {
        let mut sub = Subscription::new("https://example.com/a.ics", "Team");
        sub.id = 4;
        sub.visible = false;

        let props = CalendarProperties::from_subscription(&sub);
        assert_eq!(props.subscription_id, 4);
        assert_eq!(props.color, icsync_core::DEFAULT_COLOR);
        assert!(!props.visible);

        let calendar = NativeCalendar {
            id: 1,
            subscription_id: Some(4),
            url: Some(sub.url.clone()),
            display_name: "Team".to_string(),
            color: icsync_core::DEFAULT_COLOR,
            visible: false,
            managed: true,
            legacy_credentials: None,
        };
        assert!(props.matches(&calendar));

        let renamed = NativeCalendar {
            display_name: "Old name".to_string(),
            ..calendar
        };
        assert!(!props.matches(&renamed));
    }
}
