//! Persistent key-value store that survives in-process resets.
//!
//! The host's reset destroys every live object but leaves the process and
//! the filesystem intact, so the store keeps its truth on disk: each
//! operation reads the JSON file fresh and writes it back. That makes a
//! brand-new handle opened after a reset observe exactly what the old one
//! wrote, which is the property the reload controller depends on.
//!
//! Stored here: the session id, the configured transport mode mirror,
//! resume intents, and the spawned-RPC-server bookkeeping.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::config::Config;

/// Persisted session UUID.
pub const KEY_SESSION_ID: &str = "session_id";
/// Mirror of the configured transport mode, re-read by the resume loop.
pub const KEY_CONFIGURED_MODE: &str = "configured_mode";
/// PID of an RPC server this bridge spawned, if any.
pub const KEY_RPC_SERVER_PID: &str = "rpc_server_pid";
/// Scope marker proving the recorded RPC server belongs to this bridge.
pub const KEY_RPC_SERVER_SCOPE: &str = "rpc_server_scope";

/// File-backed key-value store.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Open the store in the default config directory.
    pub fn open_default() -> Result<Self> {
        Ok(Self {
            path: Config::config_dir()?.join("state.json"),
        })
    }

    /// Open the store in an explicit directory (tests, embedding).
    pub fn open_in(dir: &Path) -> Self {
        Self {
            path: dir.join("state.json"),
        }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch a value by key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read_map().get(key).cloned()
    }

    /// Fetch a string value by key.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    /// Set a key, persisting immediately.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut map = self.read_map();
        map.insert(key.to_string(), value);
        self.write_map(&map)
    }

    /// Delete a key if present.
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.read_map();
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }

    fn read_map(&self) -> Map<String, Value> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<Map<String, Value>>(&contents) {
                Ok(map) => map,
                Err(e) => {
                    log::warn!("state store corrupt at {}: {e}; starting fresh", self.path.display());
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => {
                log::warn!("state store unreadable at {}: {e}", self.path.display());
                Map::new()
            }
        }
    }

    fn write_map(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(map).context("serializing state store")?;
        fs::write(&self.path, contents)
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_set_get_delete_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open_in(dir.path());

        assert!(store.get("answer").is_none());
        store.set("answer", json!(42)).unwrap();
        assert_eq!(store.get("answer"), Some(json!(42)));
        store.delete("answer").unwrap();
        assert!(store.get("answer").is_none());
    }

    #[test]
    fn test_survives_new_handle_on_same_directory() {
        // Simulates an in-process reset: the old handle is dropped, a new
        // one opened on the same directory must see the persisted state.
        let dir = TempDir::new().unwrap();
        {
            let store = StateStore::open_in(dir.path());
            store.set(KEY_CONFIGURED_MODE, json!("http-push")).unwrap();
        }
        let reopened = StateStore::open_in(dir.path());
        assert_eq!(reopened.get_str(KEY_CONFIGURED_MODE).as_deref(), Some("http-push"));
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open_in(dir.path());
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(store.get("anything").is_none());
        store.set("anything", json!("works")).unwrap();
        assert_eq!(store.get_str("anything").as_deref(), Some("works"));
    }

    #[test]
    fn test_delete_missing_key_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open_in(dir.path());
        store.delete("never-set").unwrap();
    }
}
