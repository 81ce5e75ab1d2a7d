use std::time::Duration;

use thiserror::Error;

/// Maximum characters to include in error message body for debugging.
pub(crate) const MAX_ERROR_BODY_CHARS: usize = 512;

/// Classification of a non-success HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// 400: invalid parameters or payload.
    BadRequest,
    /// 401 or 403: missing, invalid or insufficient credentials.
    Unauthorized,
    /// 404: the database, schema, pipe or channel does not exist.
    NotFound,
    /// 429, with the server-suggested delay when one was sent.
    RateLimited { retry_after: Option<Duration> },
    /// Any 5xx status.
    Server,
    /// Any other non-success status.
    Other,
}

impl ApiErrorKind {
    /// Maps an HTTP status to its error class.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            400 => ApiErrorKind::BadRequest,
            401 | 403 => ApiErrorKind::Unauthorized,
            404 => ApiErrorKind::NotFound,
            429 => ApiErrorKind::RateLimited { retry_after },
            s if s >= 500 => ApiErrorKind::Server,
            _ => ApiErrorKind::Other,
        }
    }
}

/// Errors that can occur when using the Snowpipe Streaming client.
#[derive(Debug, Error)]
pub enum StreamingError {
    /// HTTP/network layer error from reqwest.
    #[error("HTTP request failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("API error ({kind:?}): {message}")]
    Api {
        kind: ApiErrorKind,
        status: u16,
        code: Option<String>,
        request_id: Option<String>,
        message: String,
    },

    /// Key material is missing or unreadable.
    #[error("credential error: {0}")]
    Credential(String),

    /// Key material could not be decrypted, parsed or used for signing.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Operation attempted before the required setup was done.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Caller input rejected before any request was made.
    #[error("validation error: {0}")]
    Validation(String),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// The channel did not report the target offset token as committed in time.
    #[error("timed out after {waited:?} waiting for channel '{channel}' to commit token '{token}'")]
    CommitTimeout {
        channel: String,
        token: String,
        waited: Duration,
    },

    /// Response deserialization error.
    #[error("deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),

    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl StreamingError {
    /// Returns `true` if the error is potentially recoverable by retrying.
    ///
    /// Rate limiting, server errors and transport timeouts are retryable.
    /// Local precondition/validation failures and other client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamingError::HttpClient(e) => e.is_timeout() || e.is_connect(),
            StreamingError::Api { kind, .. } => {
                matches!(kind, ApiErrorKind::RateLimited { .. } | ApiErrorKind::Server)
            }
            StreamingError::Credential(_)
            | StreamingError::Crypto(_)
            | StreamingError::Precondition(_)
            | StreamingError::Validation(_)
            | StreamingError::Cancelled
            | StreamingError::CommitTimeout { .. }
            | StreamingError::Deserialize(_)
            | StreamingError::Config(_) => false,
        }
    }

    /// Returns the classification if this is an API error.
    pub fn kind(&self) -> Option<ApiErrorKind> {
        match self {
            StreamingError::Api { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns the HTTP status if this is an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            StreamingError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the request ID if the server supplied one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            StreamingError::Api { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }

    /// Returns the vendor error code if the server supplied one.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            StreamingError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Returns `true` for a 404 response.
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind(), Some(ApiErrorKind::NotFound))
    }

    /// Returns `true` if the caller cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamingError::Cancelled)
    }
}

/// A specialized Result type for Snowpipe Streaming operations.
pub type Result<T> = std::result::Result<T, StreamingError>;

/// Truncates a string to at most `max_chars` characters on a valid UTF-8 boundary.
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(kind: ApiErrorKind, status: u16) -> StreamingError {
        StreamingError::Api {
            kind,
            status,
            code: Some("INVALID".to_string()),
            request_id: Some("req-123".to_string()),
            message: "invalid request (status=400, code=INVALID, requestId=req-123)".to_string(),
        }
    }

    #[test]
    fn api_error_display() {
        let err = api_error(ApiErrorKind::BadRequest, 400);
        let msg = err.to_string();
        assert!(msg.contains("BadRequest"));
        assert!(msg.contains("req-123"));
        assert!(msg.contains("INVALID"));
    }

    #[test]
    fn api_error_accessors() {
        let err = api_error(ApiErrorKind::BadRequest, 400);
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.error_code(), Some("INVALID"));
        assert_eq!(err.request_id(), Some("req-123"));
        assert_eq!(err.kind(), Some(ApiErrorKind::BadRequest));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ApiErrorKind::from_status(400, None), ApiErrorKind::BadRequest);
        assert_eq!(ApiErrorKind::from_status(401, None), ApiErrorKind::Unauthorized);
        assert_eq!(ApiErrorKind::from_status(403, None), ApiErrorKind::Unauthorized);
        assert_eq!(ApiErrorKind::from_status(404, None), ApiErrorKind::NotFound);
        assert_eq!(
            ApiErrorKind::from_status(429, Some(Duration::from_secs(2))),
            ApiErrorKind::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );
        assert_eq!(ApiErrorKind::from_status(500, None), ApiErrorKind::Server);
        assert_eq!(ApiErrorKind::from_status(503, None), ApiErrorKind::Server);
        assert_eq!(ApiErrorKind::from_status(409, None), ApiErrorKind::Other);
    }

    #[test]
    fn retryable_classes() {
        assert!(api_error(ApiErrorKind::Server, 503).is_retryable());
        assert!(api_error(ApiErrorKind::RateLimited { retry_after: None }, 429).is_retryable());
        assert!(!api_error(ApiErrorKind::BadRequest, 400).is_retryable());
        assert!(!api_error(ApiErrorKind::Unauthorized, 401).is_retryable());
        assert!(!StreamingError::Precondition("no token".into()).is_retryable());
        assert!(!StreamingError::Cancelled.is_retryable());
    }

    #[test]
    fn not_found_helper() {
        assert!(api_error(ApiErrorKind::NotFound, 404).is_not_found());
        assert!(!api_error(ApiErrorKind::Server, 500).is_not_found());
        assert!(!StreamingError::Cancelled.is_not_found());
    }

    #[test]
    fn commit_timeout_display() {
        let err = StreamingError::CommitTimeout {
            channel: "ch".to_string(),
            token: "c2".to_string(),
            waited: Duration::from_secs(30),
        };
        let msg = err.to_string();
        assert!(msg.contains("'ch'"));
        assert!(msg.contains("'c2'"));
    }

    #[test]
    fn precondition_error_display() {
        let err = StreamingError::Precondition("ingest hostname not set".to_string());
        assert_eq!(err.to_string(), "precondition failed: ingest hostname not set");
    }

    #[test]
    fn truncate_str_short() {
        assert_eq!(truncate_str("hello", 10), "hello");
    }

    #[test]
    fn truncate_str_long() {
        assert_eq!(truncate_str("hello world", 5), "hello");
    }

    #[test]
    fn truncate_str_multibyte() {
        let s = "中文测试数据";
        assert_eq!(truncate_str(s, 4), "中文测试");
    }
}
