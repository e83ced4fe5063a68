//! Conditional HTTP(S) retrieval.

use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, ETAG, HeaderMap, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED, LOCATION,
};
use reqwest::{Client, Response, StatusCode, redirect};
use icsync_core::SourceKind;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{ProviderResult, SyncError};

use super::config::FetcherConfig;
use super::http_date::{format_http_date, parse_http_date};
use super::{BoxFuture, FetchOutcome, FetchRequest, FetchedCalendar, Fetcher};

const ACCEPT_CALENDAR: &str = "text/calendar, */*;q=0.9";

/// Rewrites `webcal://` and `webcals://` locators to `http://` and `https://`.
///
/// Other locators are returned unchanged.
pub fn normalize_network_url(locator: &str) -> String {
    let lower = locator.to_ascii_lowercase();
    if lower.starts_with("webcals://") {
        format!("https://{}", &locator["webcals://".len()..])
    } else if lower.starts_with("webcal://") {
        format!("http://{}", &locator["webcal://".len()..])
    } else {
        locator.to_string()
    }
}

/// Fetches calendars over HTTP(S) with conditional requests.
///
/// Redirects are never followed by the client; they are reported as
/// [`FetchOutcome::Redirected`] so the caller can persist permanent moves.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a new fetcher with the given configuration.
    pub fn new(config: FetcherConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                SyncError::internal(format!("Failed to create HTTP client: {}", e)).with_source(e)
            })?;

        Ok(Self { client })
    }

    async fn get(&self, request: FetchRequest) -> ProviderResult<FetchOutcome> {
        let url = normalize_network_url(&request.url);
        let parsed = Url::parse(&url)
            .map_err(|e| SyncError::configuration(format!("Invalid URL {}: {}", url, e)))?;

        let mut builder = self.client.get(parsed.clone()).header(ACCEPT, ACCEPT_CALENDAR);

        if let Some(credentials) = &request.credentials {
            builder = builder.header(AUTHORIZATION, credentials.header_value());
        }
        if let Some(etag) = request.conditional_etag() {
            builder = builder.header(IF_NONE_MATCH, etag);
        }
        if let Some(date) = request
            .conditional_last_modified()
            .and_then(format_http_date)
        {
            builder = builder.header(IF_MODIFIED_SINCE, date);
        }

        trace!(url = %parsed, force_resync = request.force_resync, "Sending GET");

        let response = builder.send().await.map_err(|e| {
            SyncError::network(format!("Request to {} failed: {}", parsed, e)).with_source(e)
        })?;

        handle_response(&parsed, response).await
    }
}

impl Fetcher for HttpFetcher {
    fn name(&self) -> &str {
        "http"
    }

    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, ProviderResult<FetchOutcome>> {
        Box::pin(self.get(request))
    }
}

async fn handle_response(url: &Url, response: Response) -> ProviderResult<FetchOutcome> {
    let status = response.status();
    debug!(url = %url, status = %status, "Received response");

    match status {
        s if s.is_success() => {
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(|e| {
                SyncError::network(format!("Failed to read response body: {}", e)).with_source(e)
            })?;
            Ok(FetchOutcome::Success(FetchedCalendar {
                body: body.to_vec(),
                charset: header_str(&headers, CONTENT_TYPE).and_then(charset_from_content_type),
                etag: header_str(&headers, ETAG).map(str::to_string),
                last_modified: header_str(&headers, LAST_MODIFIED).and_then(parse_http_date),
                display_name: None,
            }))
        }
        StatusCode::NOT_MODIFIED => Ok(FetchOutcome::NotModified),
        s if s.is_redirection() => {
            let location = header_str(response.headers(), LOCATION).ok_or_else(|| {
                SyncError::malformed(format!("HTTP {} without Location header", s))
            })?;
            let target = url.join(location).map_err(|e| {
                SyncError::malformed(format!("Invalid redirect target {}: {}", location, e))
            })?;
            if SourceKind::of(target.as_str()) != SourceKind::Network {
                return Err(SyncError::malformed(format!(
                    "Refusing redirect from {} to non-network {}",
                    url, target
                )));
            }
            let permanent = matches!(
                s,
                StatusCode::MOVED_PERMANENTLY | StatusCode::PERMANENT_REDIRECT
            );
            debug!(from = %url, to = %target, permanent, "Redirected");
            Ok(FetchOutcome::Redirected {
                location: target.to_string(),
                permanent,
            })
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(SyncError::auth_required(format!("HTTP {}", status_text(status))))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            Err(SyncError::not_found(format!("HTTP {}", status_text(status))))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Err(SyncError::network(format!("HTTP {}", status_text(status))))
        }
        s if s.is_server_error() => Err(SyncError::network(format!("HTTP {}", status_text(s)))),
        s => {
            warn!(url = %url, status = %s, "Unexpected response status");
            Err(SyncError::malformed(format!("Unexpected HTTP {}", status_text(s))))
        }
    }
}

fn status_text(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<&str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Extracts the `charset` parameter of a `Content-Type` header value.
fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    })
}
