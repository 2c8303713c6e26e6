//! Application-scoped key/value persistence

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::debug;

use crate::error::{Error, Result};

/// Minimal settings store: string keys to string values
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: &str);

    /// Flush pending writes to durable storage
    fn sync(&mut self) -> Result<()>;
}

/// Volatile store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

/// TOML file holding a flat table of strings
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
    dirty: bool,
}

impl FileStore {
    /// Open the store at `path`; a missing file is an empty store
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let values: BTreeMap<String, String> = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content).map_err(|e| Error::KeyStore(e.to_string()))?
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), entries = values.len(), "Opened key store");

        Ok(Self {
            path,
            values,
            dirty: false,
        })
    }

    /// Open the store in the per-user data directory
    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_path()?)
    }

    /// `<data dir>/keystore.toml` for this application
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "NUR", "humlink").ok_or(Error::NoDataDir)?;
        Ok(dirs.data_dir().join("keystore.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
        self.dirty = true;
    }

    fn sync(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string(&self.values).map_err(|e| Error::KeyStore(e.to_string()))?;
        fs::write(&self.path, content)?;
        self.dirty = false;

        debug!(path = %self.path.display(), "Key store synced");
        Ok(())
    }
}
