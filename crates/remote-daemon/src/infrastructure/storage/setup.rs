//! Per-remote setup persistence.
//!
//! Each named remote source may store one opaque string across runs — the
//! serial driver keeps its negotiated access code here so the next start
//! skips the whole trial-and-error round.  The store is a small TOML map
//! (`remotes.toml`) next to the daemon config.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Key-value setup contract consumed by the drivers.
pub trait SetupStore: Send + Sync {
    /// Returns the stored string for `name`, if any.
    fn get_setup(&self, name: &str) -> Option<String>;

    /// Stores `value` for `name`, replacing any previous value.
    fn put_setup(&self, name: &str, value: &str);
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SetupFile {
    #[serde(default)]
    remotes: BTreeMap<String, String>,
}

/// TOML-file-backed [`SetupStore`].
///
/// Reads lazily, writes through on every `put_setup`.  I/O failures are
/// logged and swallowed: losing a stored code only costs the next startup
/// one negotiation round, which must not take the driver down.
pub struct FileSetupStore {
    path: PathBuf,
    cache: Mutex<Option<BTreeMap<String, String>>>,
}

impl FileSetupStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path, cache: Mutex::new(None) }
    }

    fn load(&self) -> BTreeMap<String, String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match toml::from_str::<SetupFile>(&content) {
                Ok(file) => file.remotes,
                Err(e) => {
                    warn!("ignoring malformed setup file {}: {e}", self.path.display());
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("cannot read setup file {}: {e}", self.path.display());
                BTreeMap::new()
            }
        }
    }

    fn save(&self, remotes: &BTreeMap<String, String>) {
        if let Some(dir) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!("cannot create setup directory {}: {e}", dir.display());
                return;
            }
        }
        let file = SetupFile { remotes: remotes.clone() };
        match toml::to_string_pretty(&file) {
            Ok(text) => {
                if let Err(e) = std::fs::write(&self.path, text) {
                    warn!("cannot write setup file {}: {e}", self.path.display());
                }
            }
            Err(e) => warn!("cannot serialize setup file: {e}"),
        }
    }
}

impl SetupStore for FileSetupStore {
    fn get_setup(&self, name: &str) -> Option<String> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let remotes = cache.get_or_insert_with(|| self.load());
        remotes.get(name).cloned()
    }

    fn put_setup(&self, name: &str, value: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let remotes = cache.get_or_insert_with(|| self.load());
        remotes.insert(name.to_string(), value.to_string());
        debug!("setup for '{name}' set to '{value}'");
        self.save(remotes);
    }
}

/// In-memory [`SetupStore`] for tests.
#[derive(Default)]
pub struct MemorySetupStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemorySetupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds an entry, as if a previous run had stored it.
    pub fn with(name: &str, value: &str) -> Self {
        let store = Self::new();
        store.put_setup(name, value);
        store
    }
}

impl SetupStore for MemorySetupStore {
    fn get_setup(&self, name: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn put_setup(&self, name: &str, value: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.to_string());
    }
}
