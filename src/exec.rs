//! Response handling shared by every endpoint: success-body parsing and
//! classification of non-success responses.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;

use crate::error::{ApiErrorKind, MAX_ERROR_BODY_CHARS, Result, StreamingError, truncate_str};
use crate::response::ApiErrorResponse;

/// Header some deployments use to echo the request identifier.
pub(crate) const REQUEST_ID_HEADER: &str = "x-request-id";

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub(crate) struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Reads the request identifier from the response headers.
pub(crate) fn header_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parses a `Retry-After` header given either as delta-seconds or as an HTTP date.
pub(crate) fn extract_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    (at.with_timezone(&chrono::Utc) - chrono::Utc::now())
        .to_std()
        .ok()
}

/// Parses a successful response body.
pub(crate) fn parse_success_response<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(StreamingError::from)
}

/// Converts a non-success response into a typed error.
///
/// Vendor code, message and request id come from the JSON body when present;
/// the request id falls back to the `X-Request-Id` header.
pub(crate) fn classify_error(status: StatusCode, headers: &HeaderMap, body: &str) -> StreamingError {
    let parsed = serde_json::from_str::<ApiErrorResponse>(body).ok();
    let (code, message, body_request_id) = match parsed {
        Some(api) => (api.error_code, api.message, api.request_id),
        None => (None, None, None),
    };
    let header_id = header_request_id(headers);
    let request_id = body_request_id
        .filter(|id| !id.is_empty())
        .or_else(|| header_id.clone());

    let message = message.filter(|m| !m.is_empty()).unwrap_or_else(|| {
        if !body.trim().is_empty() {
            truncate_str(body, MAX_ERROR_BODY_CHARS).to_string()
        } else {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
        }
    });

    let mut parts = vec![format!("status={}", status.as_u16())];
    if let Some(code) = &code {
        parts.push(format!("code={}", code));
    }
    if let Some(id) = &request_id {
        parts.push(format!("requestId={}", id));
    }
    if let Some(id) = &header_id
        && Some(id) != request_id.as_ref()
    {
        parts.push(format!("x-request-id={}", id));
    }

    let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
        extract_retry_after(headers)
    } else {
        None
    };

    StreamingError::Api {
        kind: ApiErrorKind::from_status(status.as_u16(), retry_after),
        status: status.as_u16(),
        code,
        request_id,
        message: format!("{} ({})", message, parts.join(", ")),
    }
}

/// Fails with a classified error unless the response is a success.
pub(crate) fn ensure_success(response: &RawResponse) -> Result<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(classify_error(
            response.status,
            &response.headers,
            &response.body,
        ))
    }
}

/// Handles response parsing for both success and error cases.
pub(crate) fn handle_response<T: DeserializeOwned>(response: &RawResponse) -> Result<T> {
    ensure_success(response)?;
    parse_success_response(&response.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn bad_request_carries_code_and_request_id() {
        let body = r#"{"error_code":"INVALID","message":"invalid request","requestId":"req-123"}"#;
        let err = classify_error(StatusCode::BAD_REQUEST, &HeaderMap::new(), body);
        assert_eq!(err.kind(), Some(ApiErrorKind::BadRequest));
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.error_code(), Some("INVALID"));
        assert_eq!(err.request_id(), Some("req-123"));
        let msg = err.to_string();
        assert!(msg.contains("invalid request"));
        assert!(msg.contains("code=INVALID"));
        assert!(msg.contains("requestId=req-123"));
    }

    #[test]
    fn request_id_falls_back_to_header() {
        let err = classify_error(
            StatusCode::NOT_FOUND,
            &headers(&[("x-request-id", "hdr-1")]),
            r#"{"message":"channel not found"}"#,
        );
        assert_eq!(err.kind(), Some(ApiErrorKind::NotFound));
        assert_eq!(err.request_id(), Some("hdr-1"));
        assert!(!err.to_string().contains("x-request-id="));
    }

    #[test]
    fn differing_header_id_is_appended() {
        let err = classify_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &headers(&[("x-request-id", "hdr-1")]),
            r#"{"message":"boom","requestId":"body-1"}"#,
        );
        assert_eq!(err.kind(), Some(ApiErrorKind::Server));
        assert_eq!(err.request_id(), Some("body-1"));
        assert!(err.to_string().contains("x-request-id=hdr-1"));
    }

    #[test]
    fn unauthorized_for_401_and_403() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let err = classify_error(status, &HeaderMap::new(), "");
            assert_eq!(err.kind(), Some(ApiErrorKind::Unauthorized));
        }
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let err = classify_error(
            StatusCode::TOO_MANY_REQUESTS,
            &headers(&[("retry-after", "7")]),
            "",
        );
        assert_eq!(
            err.kind(),
            Some(ApiErrorKind::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            })
        );
    }

    #[test]
    fn non_json_body_is_used_as_message() {
        let err = classify_error(StatusCode::BAD_GATEWAY, &HeaderMap::new(), "Bad Gateway");
        assert_eq!(err.kind(), Some(ApiErrorKind::Server));
        assert!(err.to_string().contains("Bad Gateway (status=502)"));
    }

    #[test]
    fn empty_body_uses_reason_phrase() {
        let err = classify_error(StatusCode::CONFLICT, &HeaderMap::new(), "");
        assert_eq!(err.kind(), Some(ApiErrorKind::Other));
        assert!(err.to_string().contains("Conflict (status=409)"));
    }

    #[test]
    fn long_body_is_truncated() {
        let body = "x".repeat(5000);
        let err = classify_error(StatusCode::CONFLICT, &HeaderMap::new(), &body);
        assert!(err.to_string().len() < 1000);
    }

    #[test]
    fn retry_after_parses_seconds_and_ignores_garbage() {
        assert_eq!(
            extract_retry_after(&headers(&[("retry-after", "3")])),
            Some(Duration::from_secs(3))
        );
        assert_eq!(extract_retry_after(&headers(&[("retry-after", "soon")])), None);
        assert_eq!(extract_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn retry_after_in_the_past_is_ignored() {
        let map = headers(&[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")]);
        assert_eq!(extract_retry_after(&map), None);
    }

    #[test]
    fn handle_response_parses_success_body() {
        #[derive(serde::Deserialize)]
        struct Body {
            hostname: String,
        }
        let resp = RawResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: r#"{"hostname":"ingest.example.com"}"#.into(),
        };
        let body: Body = handle_response(&resp).unwrap();
        assert_eq!(body.hostname, "ingest.example.com");
    }
}
