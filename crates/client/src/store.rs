//! Durable key/value persistence for session credentials.
//!
//! The store has no logic of its own beyond get/set/clear. Every component
//! reads it fresh when a decision depends on it, so another process sharing the
//! same backing file is observed on the next read (last writer wins).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::Context;
use thiserror::Error;

/// Keys persisted by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    /// Access token.
    Token,
    RefreshToken,
    /// JSON snapshot of the last-known-good user.
    User,
}

impl StorageKey {
    pub const ALL: [StorageKey; 3] = [StorageKey::Token, StorageKey::RefreshToken, StorageKey::User];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::Token => "token",
            StorageKey::RefreshToken => "refreshToken",
            StorageKey::User => "user",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store I/O failed: {0:#}")]
    Io(anyhow::Error),

    #[error("credential store lock poisoned")]
    Poisoned,
}

pub trait CredentialStore: Send + Sync {
    fn get(&self, key: StorageKey) -> Option<String>;

    fn set(&self, key: StorageKey, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: StorageKey) -> Result<(), StoreError>;

    /// Remove every session key.
    fn clear(&self) -> Result<(), StoreError> {
        for key in StorageKey::ALL {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// Process-local store; contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<&'static str, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: StorageKey) -> Option<String> {
        let entries = self.entries.read().ok()?;
        entries.get(key.as_str()).cloned()
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.as_str(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: StorageKey) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key.as_str());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.clear();
        Ok(())
    }
}

/// JSON-file store that survives process restarts.
///
/// Reads go to disk on every call; writes replace the file atomically
/// (temp file + rename).
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: std::sync::Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: std::sync::Mutex::new(()),
        }
    }

    /// Store at `{app_data_dir}/lendops/session.json`.
    pub fn in_data_dir() -> Result<Self, StoreError> {
        Ok(Self::new(default_session_path().map_err(StoreError::Io)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> anyhow::Result<HashMap<String, String>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {:?}", self.path));
            }
        };
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&raw).with_context(|| format!("corrupt session file {:?}", self.path))
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create session directory at {:?}", parent))?;
        }
        let data = serde_json::to_string_pretty(entries).context("failed to encode session file")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data).with_context(|| format!("failed to write {:?}", tmp))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {:?}", self.path))?;
        Ok(())
    }

    fn modify<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        // A corrupt file is replaced rather than blocking every future write.
        let mut entries = self.read_all().unwrap_or_else(|err| {
            tracing::error!("discarding unreadable session file: {err:#}");
            HashMap::new()
        });
        f(&mut entries);
        self.write_all(&entries).map_err(StoreError::Io)
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: StorageKey) -> Option<String> {
        match self.read_all() {
            Ok(mut entries) => entries.remove(key.as_str()),
            Err(err) => {
                tracing::error!("failed to read credential store: {err:#}");
                None
            }
        }
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<(), StoreError> {
        self.modify(|entries| {
            entries.insert(key.as_str().to_string(), value.to_string());
        })
    }

    fn remove(&self, key: StorageKey) -> Result<(), StoreError> {
        self.modify(|entries| {
            entries.remove(key.as_str());
        })
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.modify(|entries| {
            for key in StorageKey::ALL {
                entries.remove(key.as_str());
            }
        })
    }
}

/// Resolve `{app_data_dir}/lendops/session.json`.
fn default_session_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    let mut path = base;
    path.push("lendops");
    path.push("session.json");
    Ok(path)
}
