//! Durable persistence of the [`CredentialPair`].
//!
//! The store is the only writer of credential state. Readers never see a
//! half-written pair: the memory store swaps the whole value under one lock,
//! and the file store writes a temporary sibling file and renames it over the
//! record.

use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::types::CredentialPair;

/// Fixed key under which the credential pair is persisted.
pub const STORAGE_KEY: &str = "authTokens";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Unavailable(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// Persistence for the session's credential pair.
///
/// Storage access is synchronous; implementations must not block on network I/O.
pub trait TokenStore: Send + Sync + 'static {
    /// Replace the stored pair.
    fn save(&self, pair: &CredentialPair) -> Result<(), StoreError>;

    /// Current pair, or `None` if absent or unreadable.
    fn load(&self) -> Option<CredentialPair>;

    /// Remove the stored pair. Clearing an empty store succeeds.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    pair: Mutex<Option<CredentialPair>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn save(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        *self.pair.lock() = Some(pair.clone());
        Ok(())
    }

    fn load(&self) -> Option<CredentialPair> {
        self.pair.lock().clone()
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.pair.lock().take();
        Ok(())
    }
}

/// Store backed by a single JSON file, `<dir>/authTokens.json`.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Store the record inside `dir`. The directory must already exist.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{STORAGE_KEY}.json")),
        }
    }

    /// Location of the record file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

impl TokenStore for FileTokenStore {
    fn save(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(pair)?;
        // One temp file per save; deleted on drop unless persisted.
        let mut tmp = tempfile::Builder::new()
            .prefix(STORAGE_KEY)
            .suffix(".tmp")
            .tempfile_in(self.dir())?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn load(&self) -> Option<CredentialPair> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "Token record unreadable");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(pair) => Some(pair),
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "Malformed token record ignored");
                None
            }
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
