//! Sync engine: calendar store, subscription repository, orchestrator,
//! scheduler.
//!
//! This crate turns fetched and parsed feeds into native calendar content:
//! - [`SubscriptionRepository`] persists subscriptions and credentials in SQLite
//! - [`CalendarStore`] abstracts native calendar storage
//! - [`SyncOrchestrator`] runs one pass across the subscriptions of a flow
//! - [`SyncScheduler`] runs passes for the network and local flows, with
//!   backoff and an optional periodic interval
//! - [`DesktopNotifier`] tells the user about failures
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use icsync_core::SyncFilter;
//! use icsync_providers::{FetcherConfig, SourceFetcher};
//! use icsync_server::{PassRequest, SqliteCalendarStore, SubscriptionRepository, SyncOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repository = Arc::new(SubscriptionRepository::open("subscriptions.db").await?);
//!     let store = Arc::new(SqliteCalendarStore::open("calendars.db").await?);
//!     let fetcher = Arc::new(SourceFetcher::new(FetcherConfig::default())?);
//!
//!     let orchestrator = SyncOrchestrator::new(repository, store, fetcher);
//!     let report = orchestrator
//!         .run_pass(PassRequest::new(SyncFilter::NetworkOnly))
//!         .await;
//!     println!("{}", report.outcome);
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod notify;
mod orchestrator;
mod repository;
mod scheduler;
mod signals;
mod store;

pub use config::{
    CALENDAR_FILE, DATABASE_FILE, OrchestratorConfig, default_calendar_path, default_data_dir,
    default_database_path,
};
pub use error::{ServerError, ServerResult};
pub use notify::{DesktopNotifier, NoopNotifier, Notifier, NotifyConfig, notification_hash};
pub use orchestrator::{PassRequest, SubscriptionPolicy, SyncOrchestrator};
pub use repository::{Backup, RestoreSummary, SCHEMA, SubscriptionRepository};
pub use scheduler::{
    FLOWS, FlowState, SchedulerCommand, SchedulerConfig, SchedulerHandle, SchedulerState,
    SharedSchedulerState, SyncScheduler, new_scheduler_state,
};
pub use signals::{ShutdownHandle, ShutdownSignal, SignalHandler, SyncRequests};
pub use store::{
    CALENDAR_SCHEMA, CalendarProperties, CalendarStore, MemoryCalendarStore, NativeCalendar,
    SqliteCalendarStore, StoreFault,
};
