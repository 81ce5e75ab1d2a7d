//! Channel handles: ordered appends with continuation-token threading,
//! commit waits, and explicit close.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::client::Client;
use crate::error::{Result, StreamingError};
use crate::request::{plan_chunks, serialize_rows};
use crate::response::ChannelStatus;

/// Identifies a channel within a pipe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    pub database: String,
    pub schema: String,
    pub pipe: String,
    pub name: String,
}

impl ChannelId {
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        pipe: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            pipe: pipe.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}/{}",
            self.database, self.schema, self.pipe, self.name
        )
    }
}

/// Options for [`Client::open_channel`].
#[derive(Debug, Clone)]
pub struct OpenChannelOptions {
    /// Offset token to open the channel at.
    pub offset_token: Option<String>,
    /// On [`Channel::close`], wait for the last continuation token to commit
    /// and then drop the channel.
    pub drop_on_close: bool,
    /// Log and swallow failures of the close-time wait and drop instead of
    /// returning them.
    pub best_effort_close: bool,
}

impl Default for OpenChannelOptions {
    fn default() -> Self {
        Self {
            offset_token: None,
            drop_on_close: false,
            best_effort_close: true,
        }
    }
}

impl OpenChannelOptions {
    pub fn with_offset_token(mut self, token: impl Into<String>) -> Self {
        self.offset_token = Some(token.into());
        self
    }

    pub fn with_drop_on_close(mut self, enabled: bool) -> Self {
        self.drop_on_close = enabled;
        self
    }

    pub fn with_best_effort_close(mut self, enabled: bool) -> Self {
        self.best_effort_close = enabled;
        self
    }
}

/// An open channel.
///
/// Appends are serialized: the continuation-token lock is held for the whole
/// of an append call, so concurrent callers queue instead of racing on the
/// token. After [`drop_channel`](Self::drop_channel) or
/// [`close`](Self::close) every operation fails with
/// [`StreamingError::Precondition`].
pub struct Channel {
    client: Client,
    id: ChannelId,
    options: OpenChannelOptions,
    continuation: Mutex<Option<String>>,
    opened_status: Option<ChannelStatus>,
    closed: AtomicBool,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Channel {
    pub(crate) fn new(
        client: Client,
        id: ChannelId,
        continuation: Option<String>,
        opened_status: Option<ChannelStatus>,
        options: OpenChannelOptions,
    ) -> Self {
        Self {
            client,
            id,
            options,
            continuation: Mutex::new(continuation),
            opened_status,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn options(&self) -> &OpenChannelOptions {
        &self.options
    }

    /// Status returned by the open call, if the service sent one.
    pub fn opened_status(&self) -> Option<&ChannelStatus> {
        self.opened_status.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The continuation token the next append will send.
    pub async fn continuation_token(&self) -> Option<String> {
        self.continuation.lock().await.clone()
    }

    /// Serializes `rows` as NDJSON and appends them.
    ///
    /// Returns the continuation token after the last chunk.
    pub async fn append_rows<T: Serialize>(
        &self,
        rows: &[T],
        offset_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let lines = serialize_rows(rows)?;
        self.append_lines(lines.as_slice(), offset_token, cancel).await
    }

    /// Appends pre-serialized JSON lines.
    ///
    /// Lines are split into requests of at most
    /// [`ClientConfig::max_request_bytes`](crate::ClientConfig::max_request_bytes)
    /// and sent in order, each with the token returned by the previous one.
    /// `offset_token` goes with the first request only. A line larger than the
    /// budget fails the whole call before anything is sent.
    pub async fn append_lines<S: AsRef<str>>(
        &self,
        lines: &[S],
        offset_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.ensure_open()?;
        let mut continuation = self.continuation.lock().await;
        // Re-check: a drop may have completed while we waited for the lock.
        self.ensure_open()?;
        let mut current = continuation
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                StreamingError::Precondition(format!(
                    "channel {} has no continuation token. Open the channel before appending",
                    self.id
                ))
            })?;

        let chunks = plan_chunks(lines, self.client.config().max_request_bytes, offset_token)?;
        debug!(channel = %self.id, rows = lines.len(), chunks = chunks.len(), "appending rows");

        for chunk in &chunks {
            current = self
                .client
                .append_chunk(&self.id, &current, chunk, cancel)
                .await?;
            *continuation = Some(current.clone());
        }
        Ok(current)
    }

    /// Waits until the channel reports `target` as its last committed offset
    /// token. Without a target the latest continuation token is used.
    pub async fn wait_for_commit(
        &self,
        target: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ChannelStatus> {
        self.ensure_open()?;
        let target = match target {
            Some(token) => token.to_string(),
            None => self.continuation_token().await.ok_or_else(|| {
                StreamingError::Precondition(format!(
                    "channel {} has no token to wait for",
                    self.id
                ))
            })?,
        };
        self.client.wait_for_commit(&self.id, &target, cancel).await
    }

    /// Current server-side status of this channel.
    pub async fn status(&self, cancel: &CancellationToken) -> Result<Option<ChannelStatus>> {
        self.ensure_open()?;
        self.client.channel_status(&self.id, cancel).await
    }

    /// The last offset token the service reports as committed.
    pub async fn latest_committed_offset_token(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        Ok(self
            .status(cancel)
            .await?
            .and_then(|status| status.last_committed_offset_token))
    }

    /// Deletes the channel on the server and closes this handle.
    pub async fn drop_channel(&self, cancel: &CancellationToken) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.continuation.lock().await;
        self.ensure_open()?;
        self.client.drop_channel(&self.id, cancel).await?;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    /// Closes the handle.
    ///
    /// With `drop_on_close` the latest continuation token is waited for and
    /// the channel is dropped. With `best_effort_close` failures of those
    /// steps are logged and `Ok(())` is returned. Closing twice is a no-op.
    pub async fn close(&self, cancel: &CancellationToken) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let result = if self.options.drop_on_close {
            self.wait_then_drop(cancel).await
        } else {
            Ok(())
        };
        self.closed.store(true, Ordering::Release);

        match result {
            Ok(()) => {
                info!(channel = %self.id, "channel closed");
                Ok(())
            }
            Err(e) if self.options.best_effort_close => {
                error!(channel = %self.id, error = %e, "channel close-time cleanup failed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn wait_then_drop(&self, cancel: &CancellationToken) -> Result<()> {
        let continuation = self.continuation.lock().await;
        if let Some(token) = continuation.clone() {
            self.client.wait_for_commit(&self.id, &token, cancel).await?;
        }
        self.client.drop_channel(&self.id, cancel).await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StreamingError::Precondition(format!(
                "channel {} is closed",
                self.id
            )));
        }
        Ok(())
    }
}
