//! Endpoint paths, request bodies and append chunk planning.

use serde::Serialize;

use crate::error::{Result, StreamingError};

pub(crate) const HOSTNAME_PATH: &str = "/v2/streaming/hostname";
pub(crate) const OAUTH_TOKEN_PATH: &str = "/oauth/token";
pub(crate) const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
pub(crate) const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";
pub(crate) const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Percent-encodes a string per RFC 3986.
///
/// Unreserved characters (A-Z, a-z, 0-9, '-', '.', '_', '~') are NOT encoded.
/// All other characters are encoded as `%XX` (uppercase hex).
/// Spaces become `%20` (NOT `+`).
pub(crate) fn percent_encode(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len() * 2);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}

fn pipe_segments(database: &str, schema: &str, pipe: &str) -> String {
    format!(
        "databases/{}/schemas/{}/pipes/{}",
        percent_encode(database),
        percent_encode(schema),
        percent_encode(pipe)
    )
}

/// `/v2/streaming/databases/{db}/schemas/{schema}/pipes/{pipe}/channels/{name}`
pub(crate) fn channel_path(database: &str, schema: &str, pipe: &str, channel: &str) -> String {
    format!(
        "/v2/streaming/{}/channels/{}",
        pipe_segments(database, schema, pipe),
        percent_encode(channel)
    )
}

/// `/v2/streaming/data/databases/{db}/schemas/{schema}/pipes/{pipe}/channels/{name}/rows?...`
pub(crate) fn append_rows_path(
    database: &str,
    schema: &str,
    pipe: &str,
    channel: &str,
    continuation_token: &str,
    offset_token: Option<&str>,
) -> String {
    let mut path = format!(
        "/v2/streaming/data/{}/channels/{}/rows?continuationToken={}",
        pipe_segments(database, schema, pipe),
        percent_encode(channel),
        percent_encode(continuation_token)
    );
    if let Some(offset) = offset_token {
        path.push_str("&offsetToken=");
        path.push_str(&percent_encode(offset));
    }
    path
}

/// Appends `requestId` to a path that may already carry a query string.
pub(crate) fn with_request_id(mut path: String, request_id: Option<&str>) -> String {
    if let Some(id) = request_id {
        path.push(if path.contains('?') { '&' } else { '?' });
        path.push_str("requestId=");
        path.push_str(&percent_encode(id));
    }
    path
}

/// `/v2/streaming/databases/{db}/schemas/{schema}/pipes/{pipe}:bulk-channel-status`
pub(crate) fn bulk_channel_status_path(database: &str, schema: &str, pipe: &str) -> String {
    format!(
        "/v2/streaming/{}:bulk-channel-status",
        pipe_segments(database, schema, pipe)
    )
}

/// Form body of the scoped token exchange.
pub(crate) fn token_exchange_form(hostname: &str) -> String {
    format!(
        "grant_type={}&scope={}",
        percent_encode(JWT_BEARER_GRANT),
        percent_encode(hostname)
    )
}

/// Serializes each row as one JSON line.
pub(crate) fn serialize_rows<T: Serialize>(rows: &[T]) -> Result<Vec<String>> {
    rows.iter()
        .map(|row| serde_json::to_string(row).map_err(StreamingError::from))
        .collect()
}

/// One append request body and the offset token sent with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub body: String,
    pub offset_token: Option<String>,
}

/// Splits `lines` into NDJSON bodies of at most `max_bytes` each, keeping row order.
///
/// Every line is newline-terminated. The whole input is validated before any
/// chunk is returned, so a line that alone exceeds `max_bytes` fails the call
/// without a partial plan. `offset_token` is attached to the first chunk only.
pub(crate) fn plan_chunks<S: AsRef<str>>(
    lines: &[S],
    max_bytes: usize,
    offset_token: Option<&str>,
) -> Result<Vec<Chunk>> {
    let mut bodies = Vec::new();
    let mut current = String::new();

    for (index, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        let needs_newline = !line.ends_with('\n');
        let line_len = line.len() + usize::from(needs_newline);
        if line_len > max_bytes {
            return Err(StreamingError::Validation(format!(
                "row {} is {} bytes, exceeding the {}-byte request limit",
                index, line_len, max_bytes
            )));
        }
        if !current.is_empty() && current.len() + line_len > max_bytes {
            bodies.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        if needs_newline {
            current.push('\n');
        }
    }
    if !current.is_empty() {
        bodies.push(current);
    }

    Ok(bodies
        .into_iter()
        .enumerate()
        .map(|(i, body)| Chunk {
            body,
            offset_token: if i == 0 {
                offset_token.map(str::to_string)
            } else {
                None
            },
        })
        .collect())
}
