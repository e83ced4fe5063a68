//! Bounded redirect following on top of a single-shot [`Fetcher`].

use icsync_core::SourceKind;
use tracing::{debug, info};
use url::Url;

use crate::error::{ProviderResult, SyncError};

use super::{FetchOutcome, FetchRequest, Fetcher};

/// Maximum number of redirects followed within one fetch.
pub const MAX_REDIRECTS: usize = 5;

/// The final outcome of a fetch after following redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowedFetch {
    /// `NotModified` or `Success`, never `Redirected`.
    pub outcome: FetchOutcome,
    /// New locator to persist, set only if every hop was permanent.
    pub permanent_url: Option<String>,
    /// Locator the outcome was obtained from.
    pub final_url: String,
}

/// Runs `request` against `fetcher`, following up to `max_redirects` hops.
///
/// Validators are carried along to every hop, credentials only while the
/// host stays the same. Redirects to non-network locators and from `https`
/// to any other scheme are refused.
pub async fn follow_redirects(
    fetcher: &dyn Fetcher,
    request: FetchRequest,
    max_redirects: usize,
) -> ProviderResult<FollowedFetch> {
    let mut current = request;
    let mut permanent_url = None;
    let mut all_permanent = true;

    for hop in 0..=max_redirects {
        let outcome = fetcher.fetch(current.clone()).await?;

        let (location, permanent) = match outcome {
            FetchOutcome::Redirected {
                location,
                permanent,
            } => (location, permanent),
            outcome => {
                return Ok(FollowedFetch {
                    outcome,
                    permanent_url,
                    final_url: current.url,
                });
            }
        };

        if hop == max_redirects {
            break;
        }

        if SourceKind::of(&location) != SourceKind::Network {
            return Err(SyncError::malformed(format!(
                "Refusing redirect from {} to non-network {}",
                current.url, location
            )));
        }
        if is_downgrade(&current.url, &location) {
            return Err(SyncError::malformed(format!(
                "Refusing redirect from {} to insecure {}",
                current.url, location
            )));
        }

        all_permanent &= permanent;
        if all_permanent {
            info!(from = %current.url, to = %location, "Source moved permanently");
            permanent_url = Some(location.clone());
        } else {
            debug!(from = %current.url, to = %location, "Following temporary redirect");
        }

        if current.credentials.is_some() && !same_host(&current.url, &location) {
            debug!(to = %location, "Dropping credentials on cross-host redirect");
            current.credentials = None;
        }
        current.url = location;
    }

    Err(SyncError::malformed(format!(
        "Too many redirects (more than {})",
        max_redirects
    )))
}

fn same_host(a: &str, b: &str) -> bool {
    let host = |url: &str| {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    };
    matches!((host(a), host(b)), (Some(a), Some(b)) if a == b)
}

fn is_downgrade(from: &str, to: &str) -> bool {
    let scheme = |url: &str| Url::parse(url).map(|u| u.scheme().to_ascii_lowercase()).ok();
    let from_secure = matches!(scheme(from).as_deref(), Some("https" | "webcals"));
    from_secure && scheme(to).as_deref() != Some("https")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncErrorCode;
    use crate::fetch::{BoxFuture, FetchedCalendar};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers each URL with a fixed outcome and records the requests.
    struct ScriptedFetcher {
        routes: HashMap<String, FetchOutcome>,
        seen: Mutex<Vec<FetchRequest>>,
    }

    impl ScriptedFetcher {
        fn new(routes: &[(&str, FetchOutcome)]) -> Self {
            Self {
                routes: routes
                    .iter()
                    .map(|(url, outcome)| (url.to_string(), outcome.clone()))
                    .collect(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Fetcher for ScriptedFetcher {
        fn name(&self) -> &str {
            "scripted"
        }

        fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, ProviderResult<FetchOutcome>> {
            let outcome = self
                .routes
                .get(&request.url)
                .cloned()
                .ok_or_else(|| SyncError::not_found(request.url.clone()));
            self.seen.lock().unwrap().push(request);
            Box::pin(async move { outcome })
        }
    }

    fn redirect(location: &str, permanent: bool) -> FetchOutcome {
        FetchOutcome::Redirected {
            location: location.to_string(),
            permanent,
        }
    }

    fn success() -> FetchOutcome {
        FetchOutcome::Success(FetchedCalendar::default())
    }

    #[tokio::test]
    async fn permanent_chain_reports_new_url() {
        let fetcher = ScriptedFetcher::new(&[
            ("https://a/cal", redirect("https://b/cal", true)),
            ("https://b/cal", redirect("https://c/cal", true)),
            ("https://c/cal", success()),
        ]);

        let followed = follow_redirects(&fetcher, FetchRequest::new("https://a/cal"), 5)
            .await
            .unwrap();

        assert_eq!(followed.outcome, success());
        assert_eq!(followed.permanent_url.as_deref(), Some("https://c/cal"));
        assert_eq!(followed.final_url, "https://c/cal");
    }

    #[tokio::test]
    async fn temporary_hop_stops_recording_permanent_moves() {
        let fetcher = ScriptedFetcher::new(&[
            ("https://a/cal", redirect("https://b/cal", true)),
            ("https://b/cal", redirect("https://c/cal", false)),
            ("https://c/cal", redirect("https://d/cal", true)),
            ("https://d/cal", success()),
        ]);

        let followed = follow_redirects(&fetcher, FetchRequest::new("https://a/cal"), 5)
            .await
            .unwrap();

        assert_eq!(followed.permanent_url.as_deref(), Some("https://b/cal"));
        assert_eq!(followed.final_url, "https://d/cal");
    }

    #[tokio::test]
    async fn validators_and_credentials_follow_same_host_hops() {
        let fetcher = ScriptedFetcher::new(&[
            ("https://a/cal", redirect("https://a/new/cal", false)),
            ("https://a/new/cal", FetchOutcome::NotModified),
        ]);
        let request = FetchRequest::new("https://a/cal")
            .with_validators(Some("\"x\"".to_string()), None)
            .with_credentials(Some(crate::fetch::BasicCredentials::new("u", "p")));

        let followed = follow_redirects(&fetcher, request, 5).await.unwrap();
        assert_eq!(followed.outcome, FetchOutcome::NotModified);
        assert!(followed.permanent_url.is_none());

        let seen = fetcher.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].etag.as_deref(), Some("\"x\""));
        assert!(seen[1].credentials.is_some());
    }

    #[tokio::test]
    async fn credentials_are_dropped_across_hosts() {
        let fetcher = ScriptedFetcher::new(&[
            ("https://a/cal", redirect("https://b/cal", true)),
            ("https://b/cal", success()),
        ]);
        let request = FetchRequest::new("https://a/cal")
            .with_credentials(Some(crate::fetch::BasicCredentials::new("u", "p")));

        follow_redirects(&fetcher, request, 5).await.unwrap();

        let seen = fetcher.seen.lock().unwrap();
        assert!(seen[0].credentials.is_some());
        assert!(seen[1].credentials.is_none());
    }

    #[tokio::test]
    async fn redirect_to_local_locator_is_refused() {
        let fetcher = ScriptedFetcher::new(&[(
            "http://a/cal",
            redirect("file:///tmp/secret.ics", true),
        )]);

        let err = follow_redirects(&fetcher, FetchRequest::new("http://a/cal"), 5)
            .await
            .unwrap_err();

        assert_eq!(err.code(), SyncErrorCode::MalformedResponse);
        assert_eq!(fetcher.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn redirect_loop_is_bounded() {
        let fetcher = ScriptedFetcher::new(&[
            ("https://a/cal", redirect("https://b/cal", false)),
            ("https://b/cal", redirect("https://a/cal", false)),
        ]);

        let err = follow_redirects(&fetcher, FetchRequest::new("https://a/cal"), MAX_REDIRECTS)
            .await
            .unwrap_err();

        assert_eq!(err.code(), SyncErrorCode::MalformedResponse);
        assert_eq!(fetcher.seen.lock().unwrap().len(), MAX_REDIRECTS + 1);
    }

    #[tokio::test]
    async fn https_downgrade_is_refused() {
        let fetcher = ScriptedFetcher::new(&[("https://a/cal", redirect("http://a/cal", true))]);

        let err = follow_redirects(&fetcher, FetchRequest::new("https://a/cal"), 5)
            .await
            .unwrap_err();
        assert!(err.message().contains("insecure"));
    }
}
