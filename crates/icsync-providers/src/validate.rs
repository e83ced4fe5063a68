//! One-shot feed validation used when adding or editing a subscription.

use tracing::info;

use crate::error::{ProviderResult, SyncError};
use crate::fetch::{FetchOutcome, FetchRequest, Fetcher, follow_redirects};
use crate::ics::parse_calendar;

/// What a feed looks like, as reported by [`validate_feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedInfo {
    /// Locator the calendar was finally read from.
    pub url: String,
    /// New locator to store, when the source moved permanently.
    pub permanent_url: Option<String>,
    /// Calendar name from the feed or the fetch hint.
    pub name: Option<String>,
    /// Calendar color (ARGB) declared by the feed.
    pub color: Option<u32>,
    /// Number of VEVENT components.
    pub event_count: usize,
}

/// Fetches and parses a feed without touching any stored state.
///
/// Validators in `request` are ignored so the full body is always read.
pub async fn validate_feed(
    fetcher: &dyn Fetcher,
    request: FetchRequest,
    max_redirects: usize,
) -> ProviderResult<FeedInfo> {
    let request = request.with_force_resync(true);
    let followed = follow_redirects(fetcher, request, max_redirects).await?;

    let fetched = match followed.outcome {
        FetchOutcome::Success(fetched) => fetched,
        other => {
            return Err(SyncError::malformed(format!(
                "Expected a calendar body, got {:?}",
                other
            )));
        }
    };

    let parsed = parse_calendar(
        &fetched.body,
        fetched.charset.as_deref(),
        fetched.display_name.as_deref(),
    )?;

    info!(
        url = %followed.final_url,
        events = parsed.event_count(),
        name = ?parsed.name,
        "Feed is valid"
    );

    Ok(FeedInfo {
        url: followed.final_url,
        permanent_url: followed.permanent_url,
        name: parsed.name.clone(),
        color: parsed.color,
        event_count: parsed.event_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncErrorCode;
    use crate::fetch::{ErrorFetcher, FetcherConfig, MAX_REDIRECTS, SourceFetcher};

    #[tokio::test]
    async fn validates_local_feed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("team.ics");
        std::fs::write(
            &path,
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nCOLOR:red\r\n\
             BEGIN:VEVENT\r\nUID:1\r\nSUMMARY:One\r\nEND:VEVENT\r\n\
             BEGIN:VEVENT\r\nUID:2\r\nSUMMARY:Two\r\nEND:VEVENT\r\n\
             END:VCALENDAR\r\n",
        )
        .unwrap();

        let fetcher = SourceFetcher::new(FetcherConfig::default()).unwrap();
        let info = validate_feed(
            &fetcher,
            FetchRequest::new(path.to_string_lossy()),
            MAX_REDIRECTS,
        )
        .await
        .unwrap();

        assert_eq!(info.event_count, 2);
        assert_eq!(info.name.as_deref(), Some("team.ics"));
        assert_eq!(info.color, Some(0xFFFF0000));
        assert!(info.permanent_url.is_none());
    }

    #[tokio::test]
    async fn fetch_errors_are_returned() {
        let fetcher = ErrorFetcher::new(SyncError::auth_required("HTTP 401 Unauthorized"));
        let err = validate_feed(&fetcher, FetchRequest::new("https://x/cal"), MAX_REDIRECTS)
            .await
            .unwrap_err();
        assert_eq!(err.code(), SyncErrorCode::AuthRequired);
    }
}
