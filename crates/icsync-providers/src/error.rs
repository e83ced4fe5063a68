//! Error types for fetch, parse and sync operations.
//!
//! Every failure that can happen while syncing a subscription is expressed
//! as a [`SyncError`] carrying a [`SyncErrorCode`]. The code decides how the
//! orchestrator reacts: record it on the subscription, retry the pass, or
//! fail the pass.

use std::fmt;
use thiserror::Error;

/// The category of a sync error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncErrorCode {
    /// Connection failed, timed out, or the server is temporarily unavailable.
    NetworkFailure,
    /// The source rejected the request's credentials (401/403).
    AuthRequired,
    /// The source does not exist (404/410).
    NotFound,
    /// The source answered with something that cannot be used.
    MalformedResponse,
    /// A local source could not be opened or read.
    LocalResourceUnreadable,
    /// The payload is not valid iCalendar.
    ParseError,
    /// Calendar storage is unreachable.
    StorageUnavailable,
    /// Access to calendar storage was not granted.
    PermissionDenied,
    /// A single entry could not be processed.
    PerEntry,
    /// The pass was interrupted before it could finish.
    Interrupted,
    /// Invalid configuration or input.
    Configuration,
    /// Unexpected internal state.
    Internal,
}

impl SyncErrorCode {
    /// Returns true if this error is transient and may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkFailure | Self::StorageUnavailable | Self::Interrupted
        )
    }

    /// Returns true if this error concerns the whole pass rather than one
    /// subscription, so the pass must stop and be retried.
    pub fn is_systemic(&self) -> bool {
        matches!(self, Self::StorageUnavailable | Self::Interrupted)
    }

    /// Returns a stable name for this error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkFailure => "network_failure",
            Self::AuthRequired => "auth_required",
            Self::NotFound => "not_found",
            Self::MalformedResponse => "malformed_response",
            Self::LocalResourceUnreadable => "local_resource_unreadable",
            Self::ParseError => "parse_error",
            Self::StorageUnavailable => "storage_unavailable",
            Self::PermissionDenied => "permission_denied",
            Self::PerEntry => "per_entry",
            Self::Interrupted => "interrupted",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for SyncErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error raised while syncing a subscription.
#[derive(Debug, Error)]
pub struct SyncError {
    code: SyncErrorCode,
    message: String,
    /// The subscription being processed, when known.
    subscription_id: Option<i64>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SyncError {
    /// Creates a new error with the given code and message.
    pub fn new(code: SyncErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            subscription_id: None,
            source: None,
        }
    }

    /// Creates a network failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::NetworkFailure, message)
    }

    /// Creates an authentication failure.
    pub fn auth_required(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::AuthRequired, message)
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::NotFound, message)
    }

    /// Creates a malformed-response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::MalformedResponse, message)
    }

    /// Creates an unreadable-local-resource error.
    pub fn unreadable(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::LocalResourceUnreadable, message)
    }

    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::ParseError, message)
    }

    /// Creates a storage-unavailable error.
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::StorageUnavailable, message)
    }

    /// Creates a permission-denied error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::PermissionDenied, message)
    }

    /// Creates a per-entry error.
    pub fn per_entry(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::PerEntry, message)
    }

    /// Creates an interrupted error.
    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::Interrupted, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::Configuration, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::Internal, message)
    }

    /// Sets the subscription this error belongs to.
    pub fn with_subscription(mut self, id: i64) -> Self {
        self.subscription_id = Some(id);
        self
    }

    /// Sets the source error for this error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error code.
    pub fn code(&self) -> SyncErrorCode {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the subscription id, if set.
    pub fn subscription_id(&self) -> Option<i64> {
        self.subscription_id
    }

    /// Returns true if this error is transient and may be retried.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Returns true if this error must stop the whole pass.
    pub fn is_systemic(&self) -> bool {
        self.code.is_systemic()
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = self.subscription_id {
            write!(f, "[subscription {}] ", id)?;
        }
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A specialized Result type for provider operations.
pub type ProviderResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_codes() {
        assert!(SyncErrorCode::NetworkFailure.is_retryable());
        assert!(SyncErrorCode::StorageUnavailable.is_retryable());
        assert!(SyncErrorCode::Interrupted.is_retryable());
        assert!(!SyncErrorCode::AuthRequired.is_retryable());
        assert!(!SyncErrorCode::NotFound.is_retryable());
        assert!(!SyncErrorCode::ParseError.is_retryable());
        assert!(!SyncErrorCode::PermissionDenied.is_retryable());
    }

    #[test]
    fn systemic_codes_are_a_subset_of_retryable() {
        assert!(SyncErrorCode::StorageUnavailable.is_systemic());
        assert!(SyncErrorCode::Interrupted.is_systemic());
        assert!(!SyncErrorCode::NetworkFailure.is_systemic());
    }

    #[test]
    fn error_creation() {
        let err = SyncError::auth_required("HTTP 401 Unauthorized");
        assert_eq!(err.code(), SyncErrorCode::AuthRequired);
        assert_eq!(err.message(), "HTTP 401 Unauthorized");
        assert!(err.subscription_id().is_none());
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_display_includes_subscription() {
        let err = SyncError::not_found("HTTP 404 Not Found").with_subscription(4);
        let display = format!("{}", err);
        assert!(display.contains("[subscription 4]"));
        assert!(display.contains("not_found"));
        assert!(display.contains("404"));
    }

    #[test]
    fn error_with_source() {
        use std::error::Error;
        let io_err = std::io::Error::other("disk full");
        let err = SyncError::unreadable("could not open storage file").with_source(io_err);
        assert!(err.source().is_some());
    }
}
