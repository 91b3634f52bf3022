use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::change::ChangeRequest;

/// One planning/execution event, persisted via the `HistoryStore`
/// collaborator (§6) for operator-driven recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub uuid: Uuid,
    pub changes: Vec<ChangeRequest>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryRecord {
    pub fn started(changes: Vec<ChangeRequest>) -> Self {
        Self { uuid: Uuid::new_v4(), changes, started_at: Utc::now(), finished_at: None, error: None }
    }

    pub fn finish(&mut self, error: Option<String>) {
        self.finished_at = Some(Utc::now());
        self.error = error;
    }

    pub fn succeeded(&self) -> bool {
        self.finished_at.is_some() && self.error.is_none()
    }
}
