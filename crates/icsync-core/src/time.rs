//! Time types for calendar entries.
//!
//! This module provides [`EventTime`] for representing the start, end and
//! recurrence-id values of an event as they were declared by the feed, and a
//! few helpers for converting epoch-millisecond timestamps.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Represents a date or date-time value taken from an iCalendar property.
///
/// The feed's original form is kept so that it can be written back to the
/// calendar store without losing the timezone reference:
/// - **Utc**: a date-time with the `Z` suffix
/// - **Floating**: a date-time without any timezone
/// - **Zoned**: a local date-time with a `TZID` parameter
/// - **AllDay**: a `VALUE=DATE` date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum EventTime {
    /// A date-time in UTC.
    Utc(DateTime<Utc>),
    /// A date-time without timezone information.
    Floating(NaiveDateTime),
    /// A local date-time in the named timezone.
    Zoned {
        /// The local wall-clock time.
        date_time: NaiveDateTime,
        /// The `TZID` the wall-clock time refers to.
        tzid: String,
    },
    /// A date without a time (all-day events).
    AllDay(NaiveDate),
}

impl EventTime {
    /// Returns `true` if this is an all-day date.
    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::AllDay(_))
    }

    /// Returns the date portion of this time.
    pub fn date(&self) -> NaiveDate {
        match self {
            Self::Utc(dt) => dt.date_naive(),
            Self::Floating(dt) => dt.date(),
            Self::Zoned { date_time, .. } => date_time.date(),
            Self::AllDay(date) => *date,
        }
    }

    /// Converts to a UTC instant for ordering purposes.
    ///
    /// Floating and zoned values are interpreted as UTC wall-clock time and
    /// all-day dates as midnight UTC.
    pub fn approximate_utc(&self) -> DateTime<Utc> {
        match self {
            Self::Utc(dt) => *dt,
            Self::Floating(dt) => Utc.from_utc_datetime(dt),
            Self::Zoned { date_time, .. } => Utc.from_utc_datetime(date_time),
            Self::AllDay(date) => {
                Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::default()))
            }
        }
    }
}

/// Returns the current time as milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Converts epoch milliseconds into a UTC date-time.
///
/// Returns `None` for values outside the range chrono can represent.
pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}
