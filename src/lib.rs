//! Snowpipe Streaming REST API client for Rust.
//!
//! Authenticates with a key-pair JWT (or a caller-supplied token), discovers
//! the ingest host, exchanges the account token for a scoped session token,
//! and streams NDJSON rows into channels:
//!
//! - [`Client::connect`] — discover the ingest host and establish a session
//! - [`Client::open_channel`] — open or create a channel
//! - [`Channel::append_rows`] / [`Channel::append_lines`] — byte-bounded, ordered appends
//! - [`Channel::wait_for_commit`] — poll until an offset token is committed
//! - [`Channel::drop_channel`] / [`Channel::close`] — release the channel
//!
//! Every network operation takes a [`CancellationToken`]. Transient failures
//! (429 and 5xx) are retried with backoff.
//!
//! # Quick Start (async)
//!
//! ```no_run
//! use rs_snowpipe_streaming::{
//!     AccountTokenSource, CancellationToken, ChannelId, Client, ClientConfig, KeyPairCredential,
//!     OpenChannelOptions,
//! };
//!
//! # async fn example() -> rs_snowpipe_streaming::Result<()> {
//! let credential = KeyPairCredential::from_key_file("xy12345.us-east-1", "ingest_user", "rsa_key.p8");
//! let client = Client::new(
//!     ClientConfig::new("https://xy12345.us-east-1.snowflakecomputing.com"),
//!     AccountTokenSource::key_pair(credential),
//! )?;
//!
//! let cancel = CancellationToken::new();
//! client.connect(&cancel).await?;
//!
//! let channel = client
//!     .open_channel(
//!         ChannelId::new("DB", "PUBLIC", "EVENTS_PIPE", "worker-1"),
//!         OpenChannelOptions::default().with_drop_on_close(true),
//!         &cancel,
//!     )
//!     .await?;
//!
//! #[derive(serde::Serialize)]
//! struct Event { id: u64, kind: &'static str }
//!
//! channel
//!     .append_rows(&[Event { id: 1, kind: "click" }], Some("1"), &cancel)
//!     .await?;
//! channel.wait_for_commit(Some("1"), &cancel).await?;
//! channel.close(&cancel).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod channel;
pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod response;

#[cfg(feature = "blocking")]
pub mod blocking;

mod exec;
mod request;
mod retry;

pub use auth::{AccountTokenSource, BearerToken, CachedToken, TokenCache, TokenType};
pub use channel::{Channel, ChannelId, OpenChannelOptions};
pub use client::{Client, TOKEN_TYPE_HEADER};
pub use config::{ClientConfig, MAX_REQUEST_BYTES, RetryPolicy};
pub use credential::{
    CredentialProvider, EnvProvider, KeyPairCredential, PrivateKeySource, StaticProvider,
};
pub use error::{ApiErrorKind, Result, StreamingError};
pub use response::ChannelStatus;
pub use tokio_util::sync::CancellationToken;

// Compile-time assertions: key types must be Send + Sync for use across threads.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<Client>;
    let _ = assert_send_sync::<Channel>;
    let _ = assert_send_sync::<StreamingError>;
    let _ = assert_send_sync::<KeyPairCredential>;
};
