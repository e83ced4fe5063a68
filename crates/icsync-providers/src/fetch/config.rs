//! Fetcher configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by the HTTP and local fetchers.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// User agent string.
    pub user_agent: String,

    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,

    /// Time allowed for the whole request, body included.
    pub request_timeout: Duration,

    /// Directory `content:` locators are resolved under.
    pub content_root: Option<PathBuf>,

    /// Maximum number of redirects followed in one fetch.
    pub max_redirects: usize,
}

impl FetcherConfig {
    /// Default connect timeout in seconds.
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;

    /// Default request timeout in seconds.
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

    /// Sets the user agent string.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the directory `content:` locators are resolved under.
    #[must_use]
    pub fn with_content_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.content_root = Some(root.into());
        self
    }

    /// Sets the redirect cap.
    #[must_use]
    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("icsync/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(Self::DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(Self::DEFAULT_REQUEST_TIMEOUT_SECS),
            content_root: None,
            max_redirects: super::MAX_REDIRECTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = FetcherConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(20));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.max_redirects, 5);
        assert!(config.user_agent.starts_with("icsync/"));
        assert!(config.content_root.is_none());
    }

    #[test]
    fn builders() {
        let config = FetcherConfig::default()
            .with_user_agent("test/1.0")
            .with_request_timeout(Duration::from_secs(5))
            .with_content_root("/srv/content")
            .with_max_redirects(2);
        assert_eq!(config.user_agent, "test/1.0");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.content_root, Some(PathBuf::from("/srv/content")));
        assert_eq!(config.max_redirects, 2);
    }
}
