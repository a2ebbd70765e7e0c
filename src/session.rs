//! Persisted bridge session identity.
//!
//! The session id is created once, stored in the state store, and outlives
//! both individual transport connections and process restarts. The project
//! name and hash identify which project this bridge instance serves when
//! registering with a hub.

use std::path::Path;

use anyhow::Result;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::store::{StateStore, KEY_SESSION_ID};

/// Identity presented to hubs when registering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Stable UUID, persisted across restarts and resets.
    pub session_id: Uuid,
    /// Project directory name, e.g. "my-game".
    pub project_name: String,
    /// Hex SHA-256 of the canonical project root path.
    pub project_hash: String,
}

impl Session {
    /// Load the persisted session, creating and persisting a new one on
    /// first use.
    pub fn load_or_create(store: &StateStore, project_root: &Path) -> Result<Self> {
        let session_id = match store
            .get_str(KEY_SESSION_ID)
            .and_then(|s| Uuid::parse_str(&s).ok())
        {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4();
                store.set(KEY_SESSION_ID, json!(id.to_string()))?;
                log::info!("created new bridge session {id}");
                id
            }
        };

        let canonical = std::fs::canonicalize(project_root)
            .unwrap_or_else(|_| project_root.to_path_buf());
        Ok(Self {
            session_id,
            project_name: canonical
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Unknown Project".to_string()),
            project_hash: hash_path(&canonical),
        })
    }

    /// Forget the persisted session id (tests, explicit re-pairing).
    pub fn reset(store: &StateStore) -> Result<()> {
        store.delete(KEY_SESSION_ID)
    }
}

fn hash_path(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_session_id_persists_across_loads() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open_in(dir.path());

        let first = Session::load_or_create(&store, dir.path()).unwrap();
        let second = Session::load_or_create(&store, dir.path()).unwrap();
        assert_eq!(first.session_id, second.session_id);
    }

    #[test]
    fn test_reset_creates_fresh_id() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open_in(dir.path());

        let first = Session::load_or_create(&store, dir.path()).unwrap();
        Session::reset(&store).unwrap();
        let second = Session::load_or_create(&store, dir.path()).unwrap();
        assert_ne!(first.session_id, second.session_id);
    }

    #[test]
    fn test_project_hash_is_stable_hex() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open_in(dir.path());

        let a = Session::load_or_create(&store, dir.path()).unwrap();
        let b = Session::load_or_create(&store, dir.path()).unwrap();
        assert_eq!(a.project_hash, b.project_hash);
        assert_eq!(a.project_hash.len(), 64);
        assert!(a.project_hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_project_name_from_directory() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("space-shooter");
        std::fs::create_dir(&project).unwrap();
        let store = StateStore::open_in(dir.path());

        let session = Session::load_or_create(&store, &project).unwrap();
        assert_eq!(session.project_name, "space-shooter");
    }
}
