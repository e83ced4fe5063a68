//! Fetching and parsing of iCalendar subscriptions.
//!
//! This crate holds everything that talks to a calendar source:
//!
//! - [`Fetcher`] - The trait every source implements, with HTTP and local
//!   implementations combined in [`SourceFetcher`]
//! - [`follow_redirects`] - Bounded redirect handling on top of a fetcher
//! - [`parse_calendar`] - Turns ICS bytes into [`CalendarEntry`] values
//! - [`SyncError`] - Error taxonomy shared with the sync engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐
//! │  HTTP(S) feed   │    │  file / content │
//! └────────┬────────┘    └────────┬────────┘
//!          │                      │
//!          ▼                      ▼
//! ┌─────────────────┐    ┌─────────────────┐
//! │   HttpFetcher   │    │  LocalFetcher   │
//! └────────┬────────┘    └────────┬────────┘
//!          │       Fetcher        │
//!          └──────────┬───────────┘
//!                     │ FetchOutcome
//!                     ▼ parse_calendar()
//!              ┌────────────────┐
//!              │ ParsedCalendar │
//!              └────────────────┘
//! ```
//!
//! [`CalendarEntry`]: icsync_core::CalendarEntry

pub mod error;
pub mod fetch;
pub mod ics;
pub mod validate;

pub use error::{ProviderResult, SyncError, SyncErrorCode};
pub use fetch::{
    BasicCredentials, BoxFuture, ErrorFetcher, FetchOutcome, FetchRequest, FetchedCalendar,
    Fetcher, FetcherConfig, FollowedFetch, HttpFetcher, LocalFetcher, MAX_REDIRECTS,
    SourceFetcher, follow_redirects,
};
pub use ics::{ParsedCalendar, parse_calendar};
pub use validate::{FeedInfo, validate_feed};
