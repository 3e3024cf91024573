//! Persistent key-value storage for squirrel-dl
//!
//! The manager persists the whole job table under one key and per-download
//! resume tokens under derived keys. Anything that can durably map a string
//! key to a byte blob satisfies the contract.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use log::warn;

/// Fixed key holding the serialized job table.
pub const JOB_TABLE_KEY: &str = "download-jobs";

/// Derives the store key holding the resume token for one identifier.
///
/// Identifiers are the only variable part, so two distinct identifiers can
/// never collide on a key.
pub fn resume_token_key(identifier: &str) -> String {
    format!("resume-{identifier}")
}

/// Durable string-key to byte-blob mapping, surviving process restarts.
pub trait KeyValueStore: Send + Sync {
    /// Returns the blob stored under `key`, if any.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores `value` under `key`, replacing any previous blob.
    fn set(&self, key: &str, value: &[u8]);

    /// Deletes the blob stored under `key`, if any.
    fn remove(&self, key: &str);
}

/// File-backed store: one file per key inside a state directory.
pub struct DiskKeyValueStore {
    root: PathBuf,
}

impl DiskKeyValueStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file_name_for(key: &str) -> String {
        // Keys are internal ("download-jobs", "resume-<id>"); identifiers may
        // contain path separators, which must not escape the state directory.
        key.chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect()
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(Self::file_name_for(key))
    }
}

impl KeyValueStore for DiskKeyValueStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        std::fs::read(self.path_for(key)).ok()
    }

    fn set(&self, key: &str, value: &[u8]) {
        if let Err(e) = std::fs::create_dir_all(&self.root) {
            warn!("could not create state directory {:?}: {e}", self.root);
            return;
        }
        // Write beside the key and rename into place, so a crash mid-write
        // can never leave a torn blob under the key itself.
        let staging = self.root.join(format!("{}.tmp", Self::file_name_for(key)));
        let result = std::fs::write(&staging, value)
            .and_then(|_| std::fs::rename(&staging, self.path_for(key)));
        if let Err(e) = result {
            warn!("could not persist key '{key}': {e}");
        }
    }

    fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.path_for(key));
    }
}

/// In-memory store. Not durable; useful for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &[u8]) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}
