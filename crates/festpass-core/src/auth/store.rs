//! Durable storage for the credential pair and cached identity.
//!
//! Three string entries are kept under stable keys: `access`, `refresh` and
//! `user` (the JSON-serialized identity record). Backends implement
//! [`KeyValueStore`]; [`TokenStore`] layers the session semantics on top and
//! falls back to memory when the backend stops working.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::identity::IdentityRecord;

/// Session file name in the cache directory
const SESSION_FILE: &str = "session.json";

pub const ACCESS_KEY: &str = "access";
pub const REFRESH_KEY: &str = "refresh";
pub const USER_KEY: &str = "user";

/// Access credential plus the (optional) credential that renews it.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access: String,
    pub refresh: Option<String>,
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access", &"<redacted>")
            .field("has_refresh", &self.refresh.is_some())
            .finish()
    }
}

/// What a previous process left behind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredSession {
    pub access: Option<String>,
    pub refresh: Option<String>,
    pub user: Option<IdentityRecord>,
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

// ============================================================================
// Memory backend
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}

// ============================================================================
// File backend
// ============================================================================

/// JSON object of string entries in `<dir>/session.json`.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read session file")?;
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&contents).context("Failed to parse session file")
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).context("Failed to remove session file")?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create session directory")?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, contents).context("Failed to write session file")?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

// ============================================================================
// Token store
// ============================================================================

/// Session persistence that never fails.
///
/// Every write also lands in an in-memory copy. The first backend error
/// switches the store to that copy for the rest of the process, so the
/// session keeps working (memory-only) when storage is unavailable.
pub struct TokenStore {
    backend: Box<dyn KeyValueStore>,
    memory: MemoryStore,
    degraded: AtomicBool,
}

impl TokenStore {
    pub fn new(backend: impl KeyValueStore + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            memory: MemoryStore::new(),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// True once the backend failed and the store runs from memory only.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn degrade(&self, op: &str, error: &anyhow::Error) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(operation = op, error = %error, "Session storage unavailable, keeping session in memory only");
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        if !self.is_degraded() {
            match self.backend.get(key) {
                Ok(value) => return value,
                Err(e) => self.degrade("get", &e),
            }
        }
        self.memory.get(key).ok().flatten()
    }

    fn set(&self, key: &str, value: &str) {
        let _ = self.memory.set(key, value);
        if !self.is_degraded() {
            if let Err(e) = self.backend.set(key, value) {
                self.degrade("set", &e);
            }
        }
    }

    fn remove(&self, key: &str) {
        let _ = self.memory.remove(key);
        if !self.is_degraded() {
            if let Err(e) = self.backend.remove(key) {
                self.degrade("remove", &e);
            }
        }
    }

    /// Persist the credential pair. A pair without refresh credential removes any stored one.
    pub fn save(&self, pair: &CredentialPair) {
        self.set(ACCESS_KEY, &pair.access);
        match pair.refresh {
            Some(ref refresh) => self.set(REFRESH_KEY, refresh),
            None => self.remove(REFRESH_KEY),
        }
    }

    pub fn save_user(&self, user: &IdentityRecord) {
        match serde_json::to_string(user) {
            Ok(json) => self.set(USER_KEY, &json),
            Err(e) => warn!(error = %e, "Failed to serialize identity record"),
        }
    }

    pub fn load(&self) -> StoredSession {
        let user = self.get(USER_KEY).and_then(|json| {
            serde_json::from_str(&json)
                .map_err(|e| debug!(error = %e, "Ignoring unreadable cached identity"))
                .ok()
        });
        StoredSession {
            access: self.get(ACCESS_KEY).filter(|s| !s.is_empty()),
            refresh: self.get(REFRESH_KEY).filter(|s| !s.is_empty()),
            user,
        }
    }

    pub fn clear(&self) {
        for key in [ACCESS_KEY, REFRESH_KEY, USER_KEY] {
            self.remove(key);
        }
    }
}
