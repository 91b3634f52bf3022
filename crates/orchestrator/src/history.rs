//! File-backed `HistoryStore` (§6): one JSON record per run, written under
//! the same work-directory tree the plan and install log live in
//! (`/var/sdcadm/updates/<ISO8601Z>/history.json`, §6 persisted-state layout).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::error::{InternalError, Result};
use crate::external::HistoryStore;
use crate::model::HistoryRecord;

pub struct FileHistoryStore {
    root: PathBuf,
}

impl FileHistoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_path(&self, record: &HistoryRecord) -> PathBuf {
        run_dir(&self.root, record).join("history.json")
    }

    async fn write(&self, record: &HistoryRecord) -> Result<()> {
        let path = self.record_path(record);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(InternalError::Io)?;
        }
        let json = serde_json::to_string_pretty(record).map_err(|e| InternalError::Serialization(e.to_string()))?;
        fs::write(&path, json).await.map_err(InternalError::Io)?;
        Ok(())
    }
}

/// Work directory for one run, named by the run's start time in ISO8601Z,
/// matching the `plan.json`/`install.log` siblings a run produces.
fn run_dir(root: &Path, record: &HistoryRecord) -> PathBuf {
    root.join(record.started_at.format("%Y%m%dT%H%M%SZ").to_string())
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn save_history(&self, record: &HistoryRecord) -> Result<()> {
        self.write(record).await
    }

    async fn update_history(&self, record: &HistoryRecord) -> Result<()> {
        self.write(record).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(InternalError::Io(e).into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(InternalError::Io)? {
            let history_path = entry.path().join("history.json");
            if !history_path.is_file() {
                continue;
            }
            let data = match fs::read_to_string(&history_path).await {
                Ok(data) => data,
                Err(_) => continue,
            };
            if let Ok(record) = serde_json::from_str::<HistoryRecord>(&data) {
                records.push(record);
            }
        }

        records.sort_by_key(|r| std::cmp::Reverse(r.started_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_update_round_trips_and_list_recent_finds_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path());

        let mut record = HistoryRecord::started(vec![]);
        store.save_history(&record).await.unwrap();

        record.finish(None);
        store.update_history(&record).await.unwrap();

        let recent = store.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].uuid, record.uuid);
        assert!(recent[0].succeeded());
    }

    #[tokio::test]
    async fn list_recent_on_empty_root_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path().join("does-not-exist-yet"));
        let recent = store.list_recent(10).await.unwrap();
        assert!(recent.is_empty());
    }
}
