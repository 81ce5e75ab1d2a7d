use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::{AccountTokenSource, TokenType};
use crate::channel::{Channel, ChannelId, OpenChannelOptions};
use crate::config::ClientConfig;
use crate::error::{Result, StreamingError};
use crate::exec::{ensure_success, handle_response};
use crate::request::{
    self, Chunk, FORM_CONTENT_TYPE, HOSTNAME_PATH, NDJSON_CONTENT_TYPE, OAUTH_TOKEN_PATH,
};
use crate::response::{
    AppendRowsResponse, BulkChannelStatusRequest, BulkChannelStatusResponse, ChannelStatus,
    OpenChannelRequest, OpenChannelResponse, parse_hostname, parse_scoped_token,
};
use crate::retry::send_with_retry;

/// Header naming the mechanism behind the bearer token.
pub const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";

/// Ingest endpoint and scoped token obtained by [`Client::exchange_token`].
#[derive(Clone)]
struct ScopedSession {
    ingest_base: String,
    token: String,
}

struct Inner {
    http: reqwest::Client,
    config: ClientConfig,
    account_base: String,
    account: AccountTokenSource,
    session: RwLock<Option<ScopedSession>>,
}

/// Async client for the Snowpipe Streaming REST API.
///
/// Cloning is cheap; clones share the connection pool, the account token
/// cache and the scoped session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("account_base", &self.inner.account_base)
            .field("token_type", &self.inner.account.token_type())
            .finish()
    }
}

impl Client {
    /// Creates a client for `config.account_url` authenticating with `account`.
    pub fn new(config: ClientConfig, account: AccountTokenSource) -> Result<Self> {
        config.validate()?;
        let account_base = config.account_url.trim().trim_end_matches('/').to_string();
        if !account_base.starts_with("https://") && !account_base.starts_with("http://") {
            return Err(StreamingError::Config(format!(
                "account_url '{}' must start with http:// or https://",
                account_base
            )));
        }

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| StreamingError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config,
                account_base,
                account,
                session: RwLock::new(None),
            }),
        })
    }

    /// Creates a client from `SNOWFLAKE_ACCOUNT_URL` and the key-pair
    /// credential variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?, AccountTokenSource::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The ingest base URL once a session is established.
    pub async fn ingest_base(&self) -> Option<String> {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.ingest_base.clone())
    }

    /// `true` once both the ingest endpoint and the scoped token are set.
    pub async fn is_connected(&self) -> bool {
        self.inner.session.read().await.is_some()
    }

    /// Discovers the ingest hostname for this account.
    pub async fn discover_endpoint(&self, cancel: &CancellationToken) -> Result<String> {
        let bearer = self.inner.account.bearer().await?;
        let url = format!("{}{}", self.inner.account_base, HOSTNAME_PATH);
        let response = send_with_retry(&self.inner.config.retry, cancel, "discover_endpoint", || {
            self.inner
                .http
                .get(&url)
                .bearer_auth(&bearer.token)
                .header(TOKEN_TYPE_HEADER, bearer.token_type.as_header_value())
        })
        .await?;
        ensure_success(&response)?;

        let hostname = parse_hostname(&response.body)
            .ok_or_else(|| malformed("hostname response carried no hostname"))?;
        debug!(hostname = %hostname, "discovered ingest host");
        Ok(hostname)
    }

    /// Exchanges the account token for a session token scoped to `hostname`
    /// and makes `hostname` the ingest endpoint.
    ///
    /// Endpoint and token are replaced together, so this can be called again
    /// to rotate an expiring session.
    pub async fn exchange_token(&self, hostname: &str, cancel: &CancellationToken) -> Result<()> {
        let hostname = hostname.trim();
        if hostname.is_empty() {
            return Err(StreamingError::Validation("hostname must not be empty".into()));
        }
        let bearer = self.inner.account.bearer().await?;
        let url = format!("{}{}", self.inner.account_base, OAUTH_TOKEN_PATH);
        let form = request::token_exchange_form(hostname);
        let response = send_with_retry(&self.inner.config.retry, cancel, "exchange_token", || {
            self.inner
                .http
                .post(&url)
                .bearer_auth(&bearer.token)
                .header(TOKEN_TYPE_HEADER, bearer.token_type.as_header_value())
                .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                .body(form.clone())
        })
        .await?;
        ensure_success(&response)?;

        let token = parse_scoped_token(&response.body)
            .ok_or_else(|| malformed("token exchange response carried no token"))?;
        let session = ScopedSession {
            ingest_base: self.ingest_base_for(hostname),
            token,
        };
        info!(ingest_base = %session.ingest_base, "scoped session established");
        *self.inner.session.write().await = Some(session);
        Ok(())
    }

    /// Discovers the ingest host and exchanges the account token for it.
    ///
    /// Returns the discovered hostname.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<String> {
        let hostname = self.discover_endpoint(cancel).await?;
        self.exchange_token(&hostname, cancel).await?;
        Ok(hostname)
    }

    /// Opens the channel, creating it if it does not exist.
    pub async fn open_channel(
        &self,
        id: ChannelId,
        options: OpenChannelOptions,
        cancel: &CancellationToken,
    ) -> Result<Channel> {
        let session = self.require_session().await?;
        let request_id = self.next_request_id();
        let path = request::with_request_id(
            request::channel_path(&id.database, &id.schema, &id.pipe, &id.name),
            request_id.as_deref(),
        );
        let body = match options.offset_token.as_deref() {
            Some(offset_token) => Some(serde_json::to_vec(&OpenChannelRequest {
                offset_token: Some(offset_token),
            })?),
            None => None,
        };
        debug!(channel = %id, request_id = ?request_id, "opening channel");

        let response = send_with_retry(&self.inner.config.retry, cancel, "open_channel", || {
            let builder = self.data_request(&session, Method::PUT, &path);
            match &body {
                Some(body) => builder
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone()),
                None => builder,
            }
        })
        .await?;
        let opened: OpenChannelResponse = handle_response(&response)?;
        let continuation = opened
            .next_continuation_token
            .filter(|token| !token.is_empty());
        info!(channel = %id, has_token = continuation.is_some(), "channel opened");

        Ok(Channel::new(
            self.clone(),
            id,
            continuation,
            opened.channel_status,
            options,
        ))
    }

    /// Sends one append request and returns the next continuation token.
    pub(crate) async fn append_chunk(
        &self,
        id: &ChannelId,
        continuation_token: &str,
        chunk: &Chunk,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let session = self.require_session().await?;
        let request_id = self.next_request_id();
        let path = request::with_request_id(
            request::append_rows_path(
                &id.database,
                &id.schema,
                &id.pipe,
                &id.name,
                continuation_token,
                chunk.offset_token.as_deref(),
            ),
            request_id.as_deref(),
        );
        debug!(
            channel = %id,
            bytes = chunk.body.len(),
            request_id = ?request_id,
            "appending chunk"
        );

        let response = send_with_retry(&self.inner.config.retry, cancel, "append_rows", || {
            self.data_request(&session, Method::POST, &path)
                .header(CONTENT_TYPE, NDJSON_CONTENT_TYPE)
                .body(chunk.body.clone())
        })
        .await?;
        let appended: AppendRowsResponse = handle_response(&response)?;
        appended
            .next_continuation_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| malformed("append response carried no continuation token"))
    }

    /// Fetches the status of `channel_names` in one pipe.
    ///
    /// Channels the service does not know are absent from the map.
    pub async fn bulk_channel_status(
        &self,
        database: &str,
        schema: &str,
        pipe: &str,
        channel_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, ChannelStatus>> {
        let session = self.require_session().await?;
        let path = request::bulk_channel_status_path(database, schema, pipe);
        let body = serde_json::to_vec(&BulkChannelStatusRequest { channel_names })?;

        let response = send_with_retry(
            &self.inner.config.retry,
            cancel,
            "bulk_channel_status",
            || {
                self.data_request(&session, Method::POST, &path)
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone())
            },
        )
        .await?;
        let statuses: BulkChannelStatusResponse = handle_response(&response)?;
        Ok(statuses.into_statuses())
    }

    /// Status of a single channel, `None` when the service does not report it.
    pub async fn channel_status(
        &self,
        id: &ChannelId,
        cancel: &CancellationToken,
    ) -> Result<Option<ChannelStatus>> {
        let names = [id.name.clone()];
        let mut statuses = self
            .bulk_channel_status(&id.database, &id.schema, &id.pipe, &names, cancel)
            .await?;
        Ok(take_status(&mut statuses, &id.name))
    }

    /// Deletes the channel on the server.
    ///
    /// A 404 counts as success unless
    /// [`ClientConfig::treat_missing_channel_as_dropped`] is off.
    pub async fn drop_channel(&self, id: &ChannelId, cancel: &CancellationToken) -> Result<()> {
        let session = self.require_session().await?;
        let request_id = self.next_request_id();
        let path = request::with_request_id(
            request::channel_path(&id.database, &id.schema, &id.pipe, &id.name),
            request_id.as_deref(),
        );
        debug!(channel = %id, request_id = ?request_id, "dropping channel");
        let response = send_with_retry(&self.inner.config.retry, cancel, "drop_channel", || {
            self.data_request(&session, Method::DELETE, &path)
        })
        .await?;

        match ensure_success(&response) {
            Ok(()) => {
                info!(channel = %id, "channel dropped");
                Ok(())
            }
            Err(e) if e.is_not_found() && self.inner.config.treat_missing_channel_as_dropped => {
                debug!(channel = %id, "channel already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Polls the channel status until its last committed offset token equals
    /// `target`, failing with [`StreamingError::CommitTimeout`] after
    /// [`ClientConfig::commit_timeout`]. A blank `target` is a
    /// [`StreamingError::Precondition`] error.
    pub async fn wait_for_commit(
        &self,
        id: &ChannelId,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<ChannelStatus> {
        if target.trim().is_empty() {
            return Err(StreamingError::Precondition(format!(
                "cannot wait for an empty offset token on channel {}",
                id
            )));
        }
        let config = &self.inner.config;
        let started = Instant::now();
        loop {
            if let Some(status) = self.channel_status(id, cancel).await?
                && status.last_committed_offset_token.as_deref() == Some(target)
            {
                debug!(channel = %id, token = target, "offset token committed");
                return Ok(status);
            }

            let waited = started.elapsed();
            if waited >= config.commit_timeout {
                return Err(StreamingError::CommitTimeout {
                    channel: id.to_string(),
                    token: target.to_string(),
                    waited,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamingError::Cancelled),
                _ = tokio::time::sleep(config.commit_poll_interval) => {}
            }
        }
    }

    async fn require_session(&self) -> Result<ScopedSession> {
        self.inner.session.read().await.clone().ok_or_else(|| {
            StreamingError::Precondition(
                "Ingest endpoint and scoped token not set. Call connect() \
                 (or discover_endpoint() then exchange_token()) first"
                    .into(),
            )
        })
    }

    /// A fresh request id when [`ClientConfig::send_request_ids`] is on.
    ///
    /// One id covers every retry attempt of the same operation.
    fn next_request_id(&self) -> Option<String> {
        self.inner
            .config
            .send_request_ids
            .then(|| uuid::Uuid::new_v4().to_string())
    }

    fn data_request(
        &self,
        session: &ScopedSession,
        method: Method,
        path: &str,
    ) -> reqwest::RequestBuilder {
        self.inner
            .http
            .request(method, format!("{}{}", session.ingest_base, path))
            .bearer_auth(&session.token)
            .header(TOKEN_TYPE_HEADER, TokenType::OAuth.as_header_value())
    }

    /// Ingest base for a discovered host, reusing the account URL's scheme.
    fn ingest_base_for(&self, hostname: &str) -> String {
        if hostname.starts_with("https://") || hostname.starts_with("http://") {
            return hostname.trim_end_matches('/').to_string();
        }
        let scheme = self
            .inner
            .account_base
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .unwrap_or("https");
        format!("{}://{}", scheme, hostname.trim_end_matches('/'))
    }
}

/// Removes the status reported for `name`. An exact key wins, otherwise the
/// key is matched ignoring ASCII case; the service may echo names upper-cased.
fn take_status(
    statuses: &mut HashMap<String, ChannelStatus>,
    name: &str,
) -> Option<ChannelStatus> {
    if let Some(status) = statuses.remove(name) {
        return Some(status);
    }
    let key = statuses
        .keys()
        .find(|key| key.eq_ignore_ascii_case(name))?
        .clone();
    statuses.remove(&key)
}

fn malformed(message: &str) -> StreamingError {
    StreamingError::Deserialize(<serde_json::Error as serde::de::Error>::custom(message))
}
