//! Local Session Store
//!
//! One JSON file per session under `<root>/sess_<id>.json`, plus a
//! `last_active.json` pointer naming the session that was being polled when
//! the process last ran. Writes go through a tmp file and a rename so a
//! reader never observes a torn snapshot.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::session::SessionSnapshot;

const SNAPSHOT_PREFIX: &str = "sess_";
const LAST_ACTIVE_FILE: &str = "last_active.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid session ID: {0:?}")]
    InvalidSessionId(String),
}

impl Serialize for StoreError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Validate that a session ID contains only safe characters (alphanumeric, dash, underscore).
/// Rejects any path traversal attempts (/, \, ..).
pub fn validate_session_id(session_id: &str) -> Result<(), StoreError> {
    if !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        Ok(())
    } else {
        Err(StoreError::InvalidSessionId(session_id.to_string()))
    }
}

/// Atomic write: write to a .tmp sibling then rename into place.
fn atomic_write(path: &Path, contents: &str) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastActive {
    session_id: String,
}

#[derive(Debug, Clone)]
pub struct LocalSessionStore {
    root: PathBuf,
}

impl LocalSessionStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_path(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        validate_session_id(session_id)?;
        Ok(self
            .root
            .join(format!("{}{}.json", SNAPSHOT_PREFIX, session_id)))
    }

    /// Persist a snapshot, replacing any previous one with the same id.
    pub fn put(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let path = self.snapshot_path(&snapshot.session_id)?;
        let content = serde_json::to_string_pretty(snapshot)?;
        atomic_write(&path, &content)?;
        tracing::debug!(session_id = %snapshot.session_id, status = %snapshot.status, "Snapshot persisted");
        Ok(())
    }

    /// Read one snapshot. Unreadable or corrupt entries are reported as absent.
    pub fn get(&self, session_id: &str) -> Option<SessionSnapshot> {
        let path = match self.snapshot_path(session_id) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Rejected snapshot lookup");
                return None;
            }
        };
        if !path.exists() {
            return None;
        }
        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Failed to parse snapshot");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "Failed to read snapshot");
                None
            }
        }
    }

    /// All snapshots, most recently saved first. Storage problems degrade to
    /// an empty (or partial) history instead of an error.
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(root = ?self.root, error = %e, "Session store unavailable, history is empty");
                return Vec::new();
            }
        };

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_snapshot = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(SNAPSHOT_PREFIX) && n.ends_with(".json"))
                .unwrap_or(false);
            if !is_snapshot {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<SessionSnapshot>(&content) {
                    Ok(snapshot) => sessions.push(snapshot),
                    Err(e) => {
                        tracing::warn!(path = ?path, error = %e, "Failed to parse snapshot");
                    }
                },
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Failed to read snapshot");
                }
            }
        }

        sessions.sort_by(|a, b| b.last_saved.cmp(&a.last_saved));
        sessions
    }

    /// Remove one snapshot. Removing an absent id is not an error.
    pub fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let path = self.snapshot_path(session_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every snapshot and the last-active pointer.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with(SNAPSHOT_PREFIX) || name == LAST_ACTIVE_FILE {
                fs::remove_file(&path)?;
                if name != LAST_ACTIVE_FILE {
                    removed += 1;
                }
            }
        }
        tracing::info!(removed, "Cleared session store");
        Ok(removed)
    }

    pub fn last_active(&self) -> Option<String> {
        let path = self.root.join(LAST_ACTIVE_FILE);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<LastActive>(&content) {
            Ok(marker) if validate_session_id(&marker.session_id).is_ok() => Some(marker.session_id),
            Ok(marker) => {
                tracing::warn!(session_id = %marker.session_id, "Ignoring invalid last-active marker");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse last-active marker");
                None
            }
        }
    }

    pub fn set_last_active(&self, session_id: &str) -> Result<(), StoreError> {
        validate_session_id(session_id)?;
        let marker = LastActive {
            session_id: session_id.to_string(),
        };
        atomic_write(
            &self.root.join(LAST_ACTIVE_FILE),
            &serde_json::to_string(&marker)?,
        )
    }

    pub fn clear_last_active(&self) -> Result<(), StoreError> {
        match fs::remove_file(self.root.join(LAST_ACTIVE_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionContext, SessionStatus};
    use chrono::{Duration, Utc};

    fn store() -> (tempfile::TempDir, LocalSessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalSessionStore::open(dir.path().join("sessions")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("session_1700_ab12").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../etc").is_err());
        assert!(validate_session_id("a/b").is_err());
    }

    #[test]
    fn test_put_overwrites_by_id() {
        let (_dir, store) = store();
        let mut snap = SessionSnapshot::new("s1", SessionContext::new());
        store.put(&snap).unwrap();
        snap.status = SessionStatus::Running;
        snap.progress_percent = 40;
        store.put(&snap).unwrap();

        let all = store.list();
        assert_eq!(all.len(), 1);
        assert_eq!(store.get("s1").unwrap().progress_percent, 40);
    }

    #[test]
    fn test_list_orders_by_last_saved_desc() {
        let (_dir, store) = store();
        let now = Utc::now();
        for (id, age) in [("old", 3), ("new", 0), ("mid", 1)] {
            let mut snap = SessionSnapshot::new(id, SessionContext::new());
            snap.last_saved = now - Duration::hours(age);
            store.put(&snap).unwrap();
        }
        let ids: Vec<_> = store.list().into_iter().map(|s| s.session_id).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_list_skips_corrupt_entries() {
        let (_dir, store) = store();
        store.put(&SessionSnapshot::new("good", SessionContext::new())).unwrap();
        fs::write(store.root().join("sess_bad.json"), "{ not json").unwrap();
        let all = store.list();
        assert_eq!(all.len(), 1);
        assert!(store.get("bad").is_none());
    }

    #[test]
    fn test_list_on_missing_root_is_empty() {
        let (_dir, store) = store();
        fs::remove_dir_all(store.root()).unwrap();
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_delete_and_clear() {
        let (_dir, store) = store();
        store.put(&SessionSnapshot::new("a", SessionContext::new())).unwrap();
        store.put(&SessionSnapshot::new("b", SessionContext::new())).unwrap();
        store.set_last_active("a").unwrap();

        store.delete("a").unwrap();
        store.delete("a").unwrap();
        assert!(store.get("a").is_none());

        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.list().is_empty());
        assert!(store.last_active().is_none());
    }

    #[test]
    fn test_last_active_roundtrip() {
        let (_dir, store) = store();
        assert!(store.last_active().is_none());
        store.set_last_active("s1").unwrap();
        assert_eq!(store.last_active().as_deref(), Some("s1"));
        store.clear_last_active().unwrap();
        store.clear_last_active().unwrap();
        assert!(store.last_active().is_none());
    }
}
