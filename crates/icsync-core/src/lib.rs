//! Core types: subscriptions, calendar entries, reconciliation, colors

pub mod color;
pub mod entry;
pub mod outcome;
pub mod reconcile;
pub mod subscription;
pub mod time;
pub mod tracing;

pub use color::{color_from_string, color_to_hex};
pub use entry::{Alarm, CalendarEntry, EventData, StoredEntry};
pub use outcome::{PassOutcome, PassReport, SubscriptionReport, SyncResult};
pub use reconcile::{
    ChangeCounts, PlannedEntry, ReconcileOptions, ReconcilePlan, RejectedEntry, has_changed,
    reconcile,
};
pub use subscription::{Credential, DEFAULT_COLOR, SourceKind, Subscription, SyncFilter};
pub use time::{EventTime, millis_to_datetime, now_millis};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
