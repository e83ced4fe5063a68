//! Calendar entries derived from a parsed feed.
//!
//! A [`CalendarEntry`] groups a master event with its recurrence exceptions.
//! The reconciler only looks at the UID, the effective last-modified
//! timestamp and the content fingerprint; everything else is payload for
//! the calendar store.

use serde::{Deserialize, Serialize};

use crate::time::EventTime;

/// An alarm attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    /// Minutes before the event start. Negative values fire after the start.
    pub minutes_before: i64,
    /// The `ACTION` of the alarm (`DISPLAY`, `AUDIO`, `EMAIL`).
    pub action: String,
    /// Text shown when the alarm fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Alarm {
    /// Creates a display alarm firing the given minutes before start.
    pub fn display(minutes_before: i64) -> Self {
        Self {
            minutes_before,
            action: "DISPLAY".to_string(),
            description: None,
        }
    }
}

/// The structured payload of a single VEVENT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub status: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    /// `DURATION` value, kept verbatim when no `DTEND` is given.
    pub duration: Option<String>,
    pub rrule: Option<String>,
    #[serde(default)]
    pub rdates: Vec<String>,
    #[serde(default)]
    pub exdates: Vec<String>,
    /// `RECURRENCE-ID` of an exception, verbatim.
    pub recurrence_id: Option<String>,
    #[serde(default)]
    pub alarms: Vec<Alarm>,
    /// `LAST-MODIFIED` as epoch millis.
    pub last_modified: Option<i64>,
}

impl EventData {
    /// Returns true if the event starts on a date rather than a date-time.
    pub fn is_all_day(&self) -> bool {
        self.start.as_ref().is_some_and(EventTime::is_all_day)
    }
}

/// One top-level entry of a subscription, identified by its UID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    /// The iCalendar UID. `None` when the feed did not provide one.
    pub uid: Option<String>,
    /// The master event.
    pub event: EventData,
    /// Recurrence exceptions overriding single instances of the master.
    #[serde(default)]
    pub exceptions: Vec<EventData>,
    /// Hash of the entry's content as delivered by the feed.
    pub fingerprint: String,
}

impl CalendarEntry {
    /// Creates a new entry without exceptions.
    pub fn new(uid: Option<String>, event: EventData, fingerprint: impl Into<String>) -> Self {
        Self {
            uid,
            event,
            exceptions: Vec::new(),
            fingerprint: fingerprint.into(),
        }
    }

    /// Builder method to attach recurrence exceptions.
    #[must_use]
    pub fn with_exceptions(mut self, exceptions: Vec<EventData>) -> Self {
        self.exceptions = exceptions;
        self
    }

    /// Returns the UID if it is present and not blank.
    pub fn usable_uid(&self) -> Option<&str> {
        self.uid
            .as_deref()
            .map(str::trim)
            .filter(|uid| !uid.is_empty())
    }

    /// Returns the effective last-modified timestamp.
    ///
    /// This is the newest `LAST-MODIFIED` across the master and its
    /// exceptions, or `None` if any of them lacks one.
    pub fn last_modified(&self) -> Option<i64> {
        std::iter::once(&self.event)
            .chain(self.exceptions.iter())
            .map(|event| event.last_modified)
            .try_fold(i64::MIN, |acc, ts| ts.map(|ts| acc.max(ts)))
    }

    /// Returns true if the master event is an all-day event.
    pub fn is_all_day(&self) -> bool {
        self.event.is_all_day()
    }

    /// Returns the change-detection record kept by the calendar store.
    pub fn stored(&self) -> StoredEntry {
        StoredEntry {
            last_modified: self.last_modified(),
            fingerprint: Some(self.fingerprint.clone()),
        }
    }
}

/// What the calendar store remembers about an applied entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Effective last-modified timestamp at the time it was applied.
    pub last_modified: Option<i64>,
    /// Content fingerprint at the time it was applied.
    pub fingerprint: Option<String>,
}

impl StoredEntry {
    /// Creates a record with only a timestamp.
    pub fn with_timestamp(last_modified: i64) -> Self {
        Self {
            last_modified: Some(last_modified),
            fingerprint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(last_modified: Option<i64>) -> EventData {
        EventData {
            summary: Some("Standup".to_string()),
            last_modified,
            ..Default::default()
        }
    }

    #[test]
    fn effective_timestamp_is_max_across_exceptions() {
        let entry = CalendarEntry::new(Some("a".to_string()), event(Some(100)), "fp")
            .with_exceptions(vec![event(Some(300)), event(Some(200))]);
        assert_eq!(entry.last_modified(), Some(300));
    }

    #[test]
    fn effective_timestamp_absent_when_any_member_lacks_one() {
        let entry = CalendarEntry::new(Some("a".to_string()), event(Some(100)), "fp")
            .with_exceptions(vec![event(None)]);
        assert_eq!(entry.last_modified(), None);

        let master_only = CalendarEntry::new(Some("b".to_string()), event(None), "fp");
        assert_eq!(master_only.last_modified(), None);
    }

    #[test]
    fn blank_uid_is_not_usable() {
        let entry = CalendarEntry::new(Some("   ".to_string()), event(None), "fp");
        assert!(entry.usable_uid().is_none());

        let entry = CalendarEntry::new(Some(" x@example ".to_string()), event(None), "fp");
        assert_eq!(entry.usable_uid(), Some("x@example"));
    }

    #[test]
    fn stored_record_carries_fingerprint() {
        let entry = CalendarEntry::new(Some("a".to_string()), event(Some(42)), "abc123");
        let stored = entry.stored();
        assert_eq!(stored.last_modified, Some(42));
        assert_eq!(stored.fingerprint.as_deref(), Some("abc123"));
    }
}
