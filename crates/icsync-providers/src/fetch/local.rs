//! Reading calendars from `file:` and `content:` locators.
//!
//! Local sources have no HTTP semantics: every read returns the whole file.
//! The file's modification time is reported as its last-modified validator
//! so the orchestrator can still record when the source last changed.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, trace};
use url::Url;

use crate::error::{ProviderResult, SyncError};

use super::{BoxFuture, FetchOutcome, FetchRequest, FetchedCalendar, Fetcher};

/// Fetches calendars from the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalFetcher {
    content_root: Option<PathBuf>,
}

impl LocalFetcher {
    /// Creates a fetcher resolving `content:` locators under `content_root`.
    pub fn new(content_root: Option<PathBuf>) -> Self {
        Self { content_root }
    }

    /// Maps a locator to a filesystem path.
    pub fn resolve(&self, locator: &str) -> ProviderResult<PathBuf> {
        let Ok(url) = Url::parse(locator) else {
            return Ok(PathBuf::from(locator));
        };

        match url.scheme() {
            "file" => url
                .to_file_path()
                .map_err(|_| SyncError::unreadable(format!("Invalid file URL {}", locator))),
            "content" => {
                let root = self.content_root.as_ref().ok_or_else(|| {
                    SyncError::configuration(format!(
                        "No content root configured for {}",
                        locator
                    ))
                })?;
                let relative = content_relative_path(&url);
                if relative
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
                {
                    return Err(SyncError::unreadable(format!(
                        "Content locator escapes the content root: {}",
                        locator
                    )));
                }
                Ok(root.join(relative))
            }
            other => Err(SyncError::configuration(format!(
                "Unsupported scheme {} for local source",
                other
            ))),
        }
    }

    async fn read(&self, request: FetchRequest) -> ProviderResult<FetchOutcome> {
        let path = self.resolve(&request.url)?;
        trace!(path = %path.display(), "Reading local calendar");

        let body = tokio::fs::read(&path).await.map_err(|e| {
            SyncError::unreadable(format!("Cannot read {}: {}", path.display(), e)).with_source(e)
        })?;

        let last_modified = tokio::fs::metadata(&path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
            .map(|mtime| chrono::DateTime::<chrono::Utc>::from(mtime).timestamp_millis());

        debug!(path = %path.display(), bytes = body.len(), "Read local calendar");

        Ok(FetchOutcome::Success(FetchedCalendar {
            body,
            charset: None,
            etag: None,
            last_modified,
            display_name: file_name(&path),
        }))
    }
}

impl Fetcher for LocalFetcher {
    fn name(&self) -> &str {
        "local"
    }

    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, ProviderResult<FetchOutcome>> {
        Box::pin(self.read(request))
    }
}

/// `content://authority/a/b` and `content:a/b` both map to `authority/a/b`
/// and `a/b` respectively.
fn content_relative_path(url: &Url) -> PathBuf {
    let mut relative = PathBuf::new();
    if let Some(host) = url.host_str() {
        relative.push(host);
    }
    for segment in url.path().split('/').filter(|s| !s.is_empty()) {
        relative.push(segment);
    }
    relative
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
}
