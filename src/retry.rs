//! Sends one logical request, retrying transient failures.

use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{Result, StreamingError};
use crate::exec::{RawResponse, extract_retry_after, header_request_id};

/// Statuses worth another attempt.
pub(crate) fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Backoff before retrying after failed attempt number `attempt` (1-based):
/// `base_delay * 2^(attempt - 1)` plus jitter in `[0, max_jitter)`.
pub(crate) fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let backoff = policy.base_delay.saturating_mul(1u32 << exponent);
    let jitter_ms = policy.max_jitter.as_millis() as u64;
    let jitter = if jitter_ms == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    };
    backoff + jitter
}

async fn execute(request: reqwest::RequestBuilder) -> Result<RawResponse> {
    let response = request.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await?;
    Ok(RawResponse {
        status,
        headers,
        body,
    })
}

/// Executes the request produced by `make_request` up to `policy.max_attempts` times.
///
/// The factory runs once per attempt. 429 and 5xx responses are retried while
/// attempts remain, waiting for the server's `Retry-After` when present and an
/// exponential backoff otherwise. Any other response, or the last transient one,
/// is returned as-is for the caller to classify. Transport errors are not retried.
pub(crate) async fn send_with_retry<F>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut make_request: F,
) -> Result<RawResponse>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(StreamingError::Cancelled);
        }

        let started = Instant::now();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamingError::Cancelled),
            result = execute(make_request()) => result?,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let request_id = header_request_id(&response.headers);
        debug!(
            operation,
            attempt,
            status = response.status.as_u16(),
            elapsed_ms,
            request_id = request_id.as_deref(),
            "streaming api response"
        );

        if response.is_success() {
            return Ok(response);
        }
        if !is_transient(response.status) || attempt >= max_attempts {
            warn!(
                operation,
                attempt,
                status = response.status.as_u16(),
                "streaming api request failed"
            );
            return Ok(response);
        }

        let delay = extract_retry_after(&response.headers)
            .unwrap_or_else(|| backoff_delay(policy, attempt));
        warn!(
            operation,
            attempt,
            status = response.status.as_u16(),
            delay_ms = delay.as_millis() as u64,
            "transient failure, retrying"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamingError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
