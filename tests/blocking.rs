#![cfg(feature = "blocking")]

use std::time::Duration;

use mockito::{Matcher, Mock, ServerGuard};
use rs_snowpipe_streaming::blocking::Client;
use rs_snowpipe_streaming::{
    AccountTokenSource, ApiErrorKind, ChannelId, ClientConfig, OpenChannelOptions, RetryPolicy,
    StreamingError,
};

const CHANNEL_PATH: &str = "/v2/streaming/databases/DB/schemas/PUBLIC/pipes/P/channels/ch1";
const ROWS_PATH: &str = "/v2/streaming/data/databases/DB/schemas/PUBLIC/pipes/P/channels/ch1/rows";
const STATUS_PATH: &str = "/v2/streaming/databases/DB/schemas/PUBLIC/pipes/P:bulk-channel-status";

fn test_client(url: String) -> Client {
    let config = ClientConfig::new(url)
        .with_retry(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_jitter: Duration::ZERO,
        })
        .with_commit_poll_interval(Duration::from_millis(10))
        .with_commit_timeout(Duration::from_millis(200));
    Client::new(config, AccountTokenSource::jwt("account-jwt")).expect("failed to build client")
}

fn session_mocks(server: &mut ServerGuard) -> Vec<Mock> {
    let host = server.host_with_port();
    vec![
        server
            .mock("GET", "/v2/streaming/hostname")
            .with_status(200)
            .with_body(host)
            .create(),
        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(r#"{"token": "scoped-token"}"#)
            .create(),
        server
            .mock("PUT", CHANNEL_PATH)
            .with_status(200)
            .with_body(r#"{"next_continuation_token": "c0"}"#)
            .create(),
    ]
}

#[test]
fn blocking_append_and_close() {
    let mut server = mockito::Server::new();
    let _session = session_mocks(&mut server);

    let append = server
        .mock("POST", ROWS_PATH)
        .match_query(Matcher::UrlEncoded("continuationToken".into(), "c0".into()))
        .match_header("authorization", "Bearer scoped-token")
        .match_body("{\"id\":1}\n")
        .with_status(200)
        .with_body(r#"{"next_continuation_token": "c1"}"#)
        .create();
    let status = server
        .mock("POST", STATUS_PATH)
        .with_status(200)
        .with_body(r#"{"channel_statuses": {"ch1": {"last_committed_offset_token": "c1"}}}"#)
        .create();
    let delete = server.mock("DELETE", CHANNEL_PATH).with_status(204).create();

    let client = test_client(server.url());
    client.connect().expect("connect should succeed");

    let channel = client
        .open_channel(
            ChannelId::new("DB", "PUBLIC", "P", "ch1"),
            OpenChannelOptions::default().with_drop_on_close(true),
        )
        .expect("open should succeed");

    #[derive(serde::Serialize)]
    struct Row {
        id: u32,
    }
    let token = channel
        .append_rows(&[Row { id: 1 }], None)
        .expect("append should succeed");
    assert_eq!(token, "c1");
    assert_eq!(channel.continuation_token().as_deref(), Some("c1"));

    channel.close().expect("close should succeed");

    append.assert();
    status.assert();
    delete.assert();
}

#[test]
fn blocking_precondition_without_session() {
    let server = mockito::Server::new();
    let client = test_client(server.url());

    let result = client.open_channel(
        ChannelId::new("DB", "PUBLIC", "P", "ch1"),
        OpenChannelOptions::default(),
    );

    match result {
        Err(StreamingError::Precondition(_)) => {}
        other => panic!("expected StreamingError::Precondition, got: {:?}", other.err()),
    }
}

#[test]
fn blocking_api_error() {
    let mut server = mockito::Server::new();

    let mock = server
        .mock("GET", "/v2/streaming/hostname")
        .with_status(403)
        .with_body(r#"{"error_code": "FORBIDDEN", "message": "role lacks privilege", "requestId": "req-9"}"#)
        .create();

    let client = test_client(server.url());
    let err = client.discover_endpoint().unwrap_err();

    assert_eq!(err.kind(), Some(ApiErrorKind::Unauthorized));
    assert_eq!(err.request_id(), Some("req-9"));
    mock.assert();
}

#[test]
fn blocking_wait_for_commit_timeout() {
    let mut server = mockito::Server::new();
    let _session = session_mocks(&mut server);
    let _status = server
        .mock("POST", STATUS_PATH)
        .with_status(200)
        .with_body(r#"{"channel_statuses": {}}"#)
        .expect_at_least(1)
        .create();

    let client = test_client(server.url());
    client.connect().unwrap();
    let channel = client
        .open_channel(ChannelId::new("DB", "PUBLIC", "P", "ch1"), OpenChannelOptions::default())
        .unwrap();

    let err = channel.wait_for_commit(Some("5")).unwrap_err();
    assert!(matches!(err, StreamingError::CommitTimeout { .. }));
    assert_eq!(channel.latest_committed_offset_token().unwrap(), None);
}
