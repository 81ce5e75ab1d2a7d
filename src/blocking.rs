//! Synchronous (blocking) client for the Snowpipe Streaming API.
//!
//! This module is only available when the `blocking` feature is enabled.
//! It mirrors the async [`crate::Client`] API by driving it on a
//! current-thread Tokio runtime owned by the client.
//!
//! # When to Use
//!
//! Use the blocking client when:
//! - You're writing a CLI tool, batch job or simple script
//! - You prefer synchronous code style
//!
//! Use the async [`crate::Client`] when:
//! - You need many channels appending concurrently
//! - You need to cancel in-flight operations
//!
//! Calls must not be made from inside another Tokio runtime.
//!
//! # Example
//!
//! ```no_run
//! use rs_snowpipe_streaming::blocking::Client;
//! use rs_snowpipe_streaming::{AccountTokenSource, ChannelId, ClientConfig, OpenChannelOptions};
//!
//! fn main() -> rs_snowpipe_streaming::Result<()> {
//!     let client = Client::new(
//!         ClientConfig::new("https://xy12345.snowflakecomputing.com"),
//!         AccountTokenSource::from_env()?,
//!     )?;
//!     client.connect()?;
//!
//!     let channel = client.open_channel(
//!         ChannelId::new("DB", "PUBLIC", "EVENTS_PIPE", "worker-1"),
//!         OpenChannelOptions::default().with_drop_on_close(true),
//!     )?;
//!     channel.append_lines(&[r#"{"id": 1}"#], Some("1"))?;
//!     channel.close()?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::auth::AccountTokenSource;
use crate::channel::{ChannelId, OpenChannelOptions};
use crate::config::ClientConfig;
use crate::error::{Result, StreamingError};
use crate::response::ChannelStatus;

/// Synchronous client for the Snowpipe Streaming API.
pub struct Client {
    inner: crate::Client,
    runtime: Arc<Runtime>,
}

impl Client {
    /// Creates a new blocking client.
    pub fn new(config: ClientConfig, account: AccountTokenSource) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StreamingError::Config(format!("Failed to build runtime: {}", e)))?;
        Ok(Self {
            inner: crate::Client::new(config, account)?,
            runtime: Arc::new(runtime),
        })
    }

    /// Creates a new blocking client from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?, AccountTokenSource::from_env()?)
    }

    /// The async client this one drives.
    pub fn as_async(&self) -> &crate::Client {
        &self.inner
    }

    pub fn discover_endpoint(&self) -> Result<String> {
        self.runtime
            .block_on(self.inner.discover_endpoint(&CancellationToken::new()))
    }

    pub fn exchange_token(&self, hostname: &str) -> Result<()> {
        self.runtime
            .block_on(self.inner.exchange_token(hostname, &CancellationToken::new()))
    }

    /// Discovers the ingest host and exchanges the account token for it.
    pub fn connect(&self) -> Result<String> {
        self.runtime
            .block_on(self.inner.connect(&CancellationToken::new()))
    }

    /// Opens the channel, creating it if it does not exist.
    pub fn open_channel(&self, id: ChannelId, options: OpenChannelOptions) -> Result<Channel> {
        let inner = self.runtime.block_on(self.inner.open_channel(
            id,
            options,
            &CancellationToken::new(),
        ))?;
        Ok(Channel {
            inner,
            runtime: Arc::clone(&self.runtime),
        })
    }

    pub fn bulk_channel_status(
        &self,
        database: &str,
        schema: &str,
        pipe: &str,
        channel_names: &[String],
    ) -> Result<HashMap<String, ChannelStatus>> {
        self.runtime.block_on(self.inner.bulk_channel_status(
            database,
            schema,
            pipe,
            channel_names,
            &CancellationToken::new(),
        ))
    }

    pub fn drop_channel(&self, id: &ChannelId) -> Result<()> {
        self.runtime
            .block_on(self.inner.drop_channel(id, &CancellationToken::new()))
    }
}

/// Synchronous channel handle.
pub struct Channel {
    inner: crate::Channel,
    runtime: Arc<Runtime>,
}

impl Channel {
    pub fn id(&self) -> &ChannelId {
        self.inner.id()
    }

    pub fn continuation_token(&self) -> Option<String> {
        self.runtime.block_on(self.inner.continuation_token())
    }

    pub fn append_rows<T: Serialize>(&self, rows: &[T], offset_token: Option<&str>) -> Result<String> {
        self.runtime.block_on(self.inner.append_rows(
            rows,
            offset_token,
            &CancellationToken::new(),
        ))
    }

    pub fn append_lines<S: AsRef<str>>(
        &self,
        lines: &[S],
        offset_token: Option<&str>,
    ) -> Result<String> {
        self.runtime.block_on(self.inner.append_lines(
            lines,
            offset_token,
            &CancellationToken::new(),
        ))
    }

    pub fn wait_for_commit(&self, target: Option<&str>) -> Result<ChannelStatus> {
        self.runtime
            .block_on(self.inner.wait_for_commit(target, &CancellationToken::new()))
    }

    pub fn latest_committed_offset_token(&self) -> Result<Option<String>> {
        self.runtime
            .block_on(self.inner.latest_committed_offset_token(&CancellationToken::new()))
    }

    pub fn drop_channel(&self) -> Result<()> {
        self.runtime
            .block_on(self.inner.drop_channel(&CancellationToken::new()))
    }

    /// Closes the channel, blocking the calling thread until close-time
    /// cleanup finishes.
    pub fn close(&self) -> Result<()> {
        self.runtime
            .block_on(self.inner.close(&CancellationToken::new()))
    }
}
