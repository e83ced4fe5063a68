//! Fetching raw ICS content from network and local sources.
//!
//! The [`Fetcher`] trait is the seam between the sync engine and the
//! outside world. A single call performs one retrieval and reports one of:
//!
//! - [`FetchOutcome::NotModified`] - the source confirmed our validators
//! - [`FetchOutcome::Success`] - the full body plus new validators
//! - [`FetchOutcome::Redirected`] - the source points somewhere else
//!
//! Failures are returned as [`SyncError`]. Redirect chains are driven by
//! [`follow_redirects`], which bounds the number of hops.

mod auth;
mod config;
mod http;
pub mod http_date;
mod local;
mod redirect;

use std::future::Future;
use std::pin::Pin;

use icsync_core::SourceKind;
use tracing::debug;

use crate::error::{ProviderResult, SyncError};

pub use auth::{BasicCredentials, basic_auth};
pub use config::FetcherConfig;
pub use http::{HttpFetcher, normalize_network_url};
pub use local::LocalFetcher;
pub use redirect::{FollowedFetch, MAX_REDIRECTS, follow_redirects};

/// A boxed future for async trait methods.
///
/// Boxing keeps [`Fetcher`] object-safe so the orchestrator can hold a
/// `dyn Fetcher` and tests can substitute a stub.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single retrieval request.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    /// Source locator.
    pub url: String,
    /// Credentials sent with this request only.
    pub credentials: Option<BasicCredentials>,
    /// Entity tag from the previous successful fetch.
    pub etag: Option<String>,
    /// Last-Modified from the previous successful fetch (epoch millis).
    pub last_modified: Option<i64>,
    /// Ignore stored validators and always retrieve the full body.
    pub force_resync: bool,
}

impl FetchRequest {
    /// Creates a request for the given locator.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Builder method to attach credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<BasicCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Builder method to set the cache validators.
    #[must_use]
    pub fn with_validators(mut self, etag: Option<String>, last_modified: Option<i64>) -> Self {
        self.etag = etag;
        self.last_modified = last_modified;
        self
    }

    /// Builder method to set force resync.
    #[must_use]
    pub fn with_force_resync(mut self, force: bool) -> Self {
        self.force_resync = force;
        self
    }

    /// Returns the entity tag to send, if any.
    pub fn conditional_etag(&self) -> Option<&str> {
        if self.force_resync {
            return None;
        }
        self.etag.as_deref().filter(|etag| !etag.is_empty())
    }

    /// Returns the last-modified timestamp to send, if any.
    pub fn conditional_last_modified(&self) -> Option<i64> {
        if self.force_resync {
            return None;
        }
        self.last_modified.filter(|ts| *ts != 0)
    }
}

/// The body of a successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedCalendar {
    /// Raw ICS bytes.
    pub body: Vec<u8>,
    /// Character encoding declared by the source.
    pub charset: Option<String>,
    /// New entity tag.
    pub etag: Option<String>,
    /// New last-modified timestamp (epoch millis).
    pub last_modified: Option<i64>,
    /// Name suggested by the source, e.g. the file name.
    pub display_name: Option<String>,
}

/// Result of one retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The content is unchanged since the sent validators.
    NotModified,
    /// The full content.
    Success(FetchedCalendar),
    /// The content lives at `location` (already resolved to an absolute URL).
    Redirected { location: String, permanent: bool },
}

/// Retrieves ICS content for a subscription.
pub trait Fetcher: Send + Sync {
    /// Returns the name of this fetcher for logging.
    fn name(&self) -> &str;

    /// Performs one retrieval without following redirects.
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, ProviderResult<FetchOutcome>>;
}

/// Dispatches to the HTTP or local fetcher based on the locator's scheme.
pub struct SourceFetcher {
    http: HttpFetcher,
    local: LocalFetcher,
}

impl SourceFetcher {
    /// Creates both fetchers from one configuration.
    pub fn new(config: FetcherConfig) -> ProviderResult<Self> {
        let local = LocalFetcher::new(config.content_root.clone());
        let http = HttpFetcher::new(config)?;
        Ok(Self { http, local })
    }
}

impl Fetcher for SourceFetcher {
    fn name(&self) -> &str {
        "source"
    }

    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, ProviderResult<FetchOutcome>> {
        match SourceKind::of(&request.url) {
            SourceKind::Network => {
                debug!(url = %request.url, "Dispatching to HTTP fetcher");
                self.http.fetch(request)
            }
            SourceKind::Local => {
                debug!(url = %request.url, "Dispatching to local fetcher");
                self.local.fetch(request)
            }
        }
    }
}

/// A fetcher that always fails with the same error.
///
/// Stands in for a fetcher that could not be constructed, and is handy in
/// tests.
#[derive(Debug)]
pub struct ErrorFetcher {
    error: SyncError,
}

impl ErrorFetcher {
    /// Creates a new error fetcher.
    pub fn new(error: SyncError) -> Self {
        Self { error }
    }
}

impl Fetcher for ErrorFetcher {
    fn name(&self) -> &str {
        "error"
    }

    fn fetch(&self, _request: FetchRequest) -> BoxFuture<'_, ProviderResult<FetchOutcome>> {
        let error = SyncError::new(self.error.code(), self.error.message());
        Box::pin(async move { Err(error) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncErrorCode;

    #[test]
    fn validators_are_withheld_on_force_resync() {
        let request = FetchRequest::new("https://example.com/a.ics")
            .with_validators(Some("\"abc\"".to_string()), Some(1_700_000_000_000));
        assert_eq!(request.conditional_etag(), Some("\"abc\""));
        assert_eq!(request.conditional_last_modified(), Some(1_700_000_000_000));

        let forced = request.with_force_resync(true);
        assert!(forced.conditional_etag().is_none());
        assert!(forced.conditional_last_modified().is_none());
    }

    #[test]
    fn empty_validators_are_not_sent() {
        let request =
            FetchRequest::new("https://example.com/a.ics").with_validators(Some(String::new()), Some(0));
        assert!(request.conditional_etag().is_none());
        assert!(request.conditional_last_modified().is_none());
    }

    #[tokio::test]
    async fn error_fetcher_returns_error() {
        let fetcher = ErrorFetcher::new(SyncError::network("offline"));
        assert_eq!(fetcher.name(), "error");

        let err = fetcher
            .fetch(FetchRequest::new("https://example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), SyncErrorCode::NetworkFailure);
        assert_eq!(err.message(), "offline");
    }

    #[tokio::test]
    async fn source_fetcher_routes_local_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.ics");
        std::fs::write(&path, "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n").unwrap();

        let fetcher = SourceFetcher::new(FetcherConfig::default()).unwrap();
        let outcome = fetcher
            .fetch(FetchRequest::new(path.to_string_lossy()))
            .await
            .unwrap();

        match outcome {
            FetchOutcome::Success(fetched) => {
                assert_eq!(fetched.display_name.as_deref(), Some("feed.ics"));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }
}
