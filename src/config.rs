use std::env;
use std::time::Duration;

use crate::error::{Result, StreamingError};

/// Largest payload accepted by a single append request (16 MiB).
pub const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

/// Retry behaviour for transient (429 / 5xx) responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per logical request, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for every further attempt.
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the random jitter added to each backoff delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_jitter: Duration::from_millis(100),
        }
    }
}

/// Configuration for the Snowpipe Streaming client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Account URL used for hostname discovery and token exchange,
    /// e.g. `https://<account>.<region>.snowflakecomputing.com`.
    pub account_url: String,

    /// HTTP request timeout.
    pub timeout: Duration,

    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// How long idle pooled connections are kept.
    pub pool_idle_timeout: Duration,

    /// Maximum idle connections kept per host.
    pub pool_max_idle_per_host: usize,

    /// User-Agent sent with every request. The service rejects requests without one.
    pub user_agent: String,

    /// Retry behaviour for transient failures.
    pub retry: RetryPolicy,

    /// Delay between channel status polls while waiting for a commit.
    pub commit_poll_interval: Duration,

    /// Give up waiting for a commit after this long.
    pub commit_timeout: Duration,

    /// Byte budget of a single append request.
    pub max_request_bytes: usize,

    /// Treat a 404 from a channel drop as success.
    pub treat_missing_channel_as_dropped: bool,

    /// Tag open, append and drop requests with a random `requestId` query
    /// parameter for server-side tracing.
    pub send_request_ids: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            account_url: String::new(),
            timeout: Duration::from_secs(100),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 10,
            user_agent: format!("rs-snowpipe-streaming/{}", env!("CARGO_PKG_VERSION")),
            retry: RetryPolicy::default(),
            commit_poll_interval: Duration::from_millis(200),
            commit_timeout: Duration::from_secs(30),
            max_request_bytes: MAX_REQUEST_BYTES,
            treat_missing_channel_as_dropped: true,
            send_request_ids: false,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration bound to an account URL.
    pub fn new(account_url: impl Into<String>) -> Self {
        Self::default().with_account_url(account_url)
    }

    /// Reads the account URL from `SNOWFLAKE_ACCOUNT_URL`.
    pub fn from_env() -> Result<Self> {
        let url = env::var("SNOWFLAKE_ACCOUNT_URL")
            .map_err(|_| StreamingError::Config("SNOWFLAKE_ACCOUNT_URL not set".into()))?;
        if url.trim().is_empty() {
            return Err(StreamingError::Config("SNOWFLAKE_ACCOUNT_URL is empty".into()));
        }
        Ok(Self::new(url))
    }

    /// Sets the account URL.
    pub fn with_account_url(mut self, account_url: impl Into<String>) -> Self {
        self.account_url = account_url.into();
        self
    }

    /// Sets the HTTP request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the User-Agent header value.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Replaces the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the commit-wait poll interval.
    pub fn with_commit_poll_interval(mut self, interval: Duration) -> Self {
        self.commit_poll_interval = interval;
        self
    }

    /// Sets the commit-wait timeout.
    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Sets the per-request byte budget for appends.
    pub fn with_max_request_bytes(mut self, bytes: usize) -> Self {
        self.max_request_bytes = bytes;
        self
    }

    /// Controls whether dropping an already-missing channel is reported as success.
    pub fn with_treat_missing_channel_as_dropped(mut self, enabled: bool) -> Self {
        self.treat_missing_channel_as_dropped = enabled;
        self
    }

    /// Enables the `requestId` query parameter on open, append and drop.
    pub fn with_send_request_ids(mut self, enabled: bool) -> Self {
        self.send_request_ids = enabled;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.account_url.trim().is_empty() {
            return Err(StreamingError::Config("account_url is required".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(StreamingError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.max_request_bytes == 0 {
            return Err(StreamingError::Config("max_request_bytes must be positive".into()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(StreamingError::Config("user_agent must not be empty".into()));
        }
        Ok(())
    }
}
