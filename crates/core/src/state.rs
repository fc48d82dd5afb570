use crate::error::SyncError;
use crate::models::SyncRecord;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Persisted mapping `remote_id -> SyncRecord`, the single source of truth
/// for incremental-sync decisions. The file is loaded fully before each
/// decision and rewritten fully after each successful update.
pub struct SyncStateStore {
    path: PathBuf,
    records: BTreeMap<String, SyncRecord>,
}

impl SyncStateStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(records) => records,
                Err(error) => {
                    warn!(path = %path.display(), %error, "sync state unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        Self { path, records }
    }

    pub fn get(&self, remote_id: &str) -> Option<&SyncRecord> {
        self.records.get(remote_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Commits one record and rewrites the whole file. Callers invoke this
    /// only after the local file write succeeded.
    pub fn commit(&mut self, remote_id: &str, record: SyncRecord) -> Result<(), SyncError> {
        self.records.insert(remote_id.to_string(), record);
        self.save()
    }

    fn save(&self) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(&self.records)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(revision: i64) -> SyncRecord {
        SyncRecord {
            title: "Doc".to_string(),
            revision,
            local_filename: "Doc.md".to_string(),
        }
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = SyncStateStore::load(dir.path().join(".sync_state.json"));
        assert!(store.is_empty());
    }

    #[test]
    fn commit_roundtrips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".sync_state.json");

        let mut store = SyncStateStore::load(&path);
        store.commit("doc-1", record(100)).unwrap();
        store.commit("doc-1", record(200)).unwrap();

        let reloaded = SyncStateStore::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("doc-1").unwrap().revision, 200);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".sync_state.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = SyncStateStore::load(&path);
        assert!(store.is_empty());
        assert_eq!(store.path(), path.as_path());
    }
}
