use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A live session as announced on the signaling channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub host_identity: String,
    /// Milliseconds since the Unix epoch
    pub created_at: u64,
    #[serde(default)]
    pub viewer_count: u32,
    #[serde(default)]
    pub thumbnail_ref: Option<String>,
}

impl SessionInfo {
    /// New session owned by `host_identity`, with a fresh id
    pub fn new(host_identity: impl Into<String>, thumbnail_ref: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            host_identity: host_identity.into(),
            created_at: now_millis(),
            viewer_count: 0,
            thumbnail_ref,
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
