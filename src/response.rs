use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Server-reported state of one channel.
///
/// Every field is optional: the service omits what it does not know yet.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChannelStatus {
    #[serde(default, alias = "channelStatusCode")]
    pub channel_status_code: Option<String>,
    #[serde(default, alias = "lastCommittedOffsetToken")]
    pub last_committed_offset_token: Option<String>,
    #[serde(default, alias = "databaseName")]
    pub database_name: Option<String>,
    #[serde(default, alias = "schemaName")]
    pub schema_name: Option<String>,
    #[serde(default, alias = "pipeName")]
    pub pipe_name: Option<String>,
    #[serde(default, alias = "channelName")]
    pub channel_name: Option<String>,
    #[serde(default, alias = "rowsInserted")]
    pub rows_inserted: Option<i64>,
    #[serde(default, alias = "rowsParsed")]
    pub rows_parsed: Option<i64>,
    #[serde(default, alias = "rowsErrors", alias = "rows_error_count")]
    pub rows_errors: Option<i64>,
    #[serde(default, alias = "lastErrorOffsetUpperBound")]
    pub last_error_offset_upper_bound: Option<String>,
    #[serde(default, alias = "lastErrorMessage")]
    pub last_error_message: Option<String>,
    /// Epoch milliseconds.
    #[serde(default, alias = "lastErrorTimestamp")]
    pub last_error_timestamp: Option<i64>,
    #[serde(default, alias = "snowflakeAvgProcessingLatencyMs")]
    pub snowflake_avg_processing_latency_ms: Option<f64>,
}

/// Response of the open-channel `PUT`.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenChannelResponse {
    #[serde(default, alias = "nextContinuationToken")]
    pub next_continuation_token: Option<String>,
    #[serde(default, alias = "channelStatus")]
    pub channel_status: Option<ChannelStatus>,
}

/// Response of an append-rows `POST`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppendRowsResponse {
    #[serde(default, alias = "nextContinuationToken")]
    pub next_continuation_token: Option<String>,
}

/// Response of the bulk channel status `POST`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkChannelStatusResponse {
    #[serde(default, alias = "channelStatuses")]
    pub channel_statuses: Option<HashMap<String, ChannelStatus>>,
}

impl BulkChannelStatusResponse {
    /// The status map, empty when the key was absent.
    pub fn into_statuses(self) -> HashMap<String, ChannelStatus> {
        self.channel_statuses.unwrap_or_default()
    }
}

/// Error body returned alongside non-success statuses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default, alias = "code", alias = "errorCode")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "requestId", alias = "request_id")]
    pub request_id: Option<String>,
}

/// Body of the open-channel `PUT`.
#[derive(Debug, Serialize)]
pub(crate) struct OpenChannelRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_token: Option<&'a str>,
}

/// Body of the bulk channel status `POST`.
#[derive(Debug, Serialize)]
pub(crate) struct BulkChannelStatusRequest<'a> {
    pub channel_names: &'a [String],
}

/// Reads the ingest hostname from either `{"hostname": ...}` or a plain-text body.
///
/// A JSON object without a string `hostname` yields `None`.
pub(crate) fn parse_hostname(body: &str) -> Option<String> {
    json_or_text(body, &["hostname"])
}

/// Reads the scoped token from either `{"token": ...}` or a plain-text body.
pub(crate) fn parse_scoped_token(body: &str) -> Option<String> {
    json_or_text(body, &["token", "access_token"])
}

fn json_or_text(body: &str, fields: &[&str]) -> Option<String> {
    let trimmed = body.trim();
    let value = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(map)) => fields
            .iter()
            .find_map(|field| map.get(*field).and_then(|v| v.as_str()))?
            .to_string(),
        Ok(serde_json::Value::String(text)) => text,
        Ok(_) | Err(_) => trimmed.to_string(),
    };
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
