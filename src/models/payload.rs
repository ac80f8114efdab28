use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire payload for the collector endpoint (HTTP POST, JSON body).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlushPayload {
    pub project_id: String,
    pub share_token: String,
    pub session_started_at: DateTime<Utc>,
    pub section_times: BTreeMap<String, u64>,
    pub total_time_seconds: u64,
    pub visibility_changes: u32,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub is_final: bool,
}

/// Collector response on a successful flush.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushResponse {
    pub session_id: String,
}
