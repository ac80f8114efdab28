use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-page-view session metadata.
///
/// `session_id` stays `None` until the collector assigns one in its first
/// flush response; `is_active` mirrors the host's document-visibility state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub visibility_changes: u32,
    pub is_active: bool,
}

impl SessionState {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            session_id: None,
            started_at,
            visibility_changes: 0,
            is_active: true,
        }
    }
}
