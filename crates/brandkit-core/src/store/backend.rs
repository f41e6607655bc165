//! Where the session lives between runs and between execution contexts.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::auth::Session;

/// Session file name in the cache directory
const SESSION_FILE: &str = "session.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read session file: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to write session file: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to parse session file: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Failed to encode session: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Durable key/value holder for the session keys.
///
/// `save` and `clear` must write or remove the whole key set at once.
pub trait SessionBackend: Send + Sync + 'static {
    fn load(&self) -> Result<Option<Session>, StoreError>;

    fn save(&self, session: &Session) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;
}

/// In-memory backend. Clones share the same slot, so several contexts in
/// one process can share it the way browser tabs share local storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    slot: Arc<RwLock<Option<Session>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionBackend for MemoryBackend {
    fn load(&self) -> Result<Option<Session>, StoreError> {
        Ok(self.slot.read().clone())
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        *self.slot.write() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot.write() = None;
        Ok(())
    }
}

/// JSON file backend: `access_token`, `refresh_token`, `user` and
/// `expires_at` in one document.
///
/// Writes go to a temporary file that is renamed over the real one, so
/// another process either sees the old key set or the new one.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Back the session with `session.json` inside `dir`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

impl SessionBackend for FileBackend {
    fn load(&self) -> Result<Option<Session>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Read(e)),
        };
        let session = serde_json::from_str(&contents).map_err(StoreError::Parse)?;
        Ok(Some(session))
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::Write)?;
        }
        let contents = serde_json::to_string_pretty(session).map_err(StoreError::Encode)?;
        let temp = self.temp_path();
        std::fs::write(&temp, contents).map_err(StoreError::Write)?;
        std::fs::rename(&temp, &self.path).map_err(StoreError::Write)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Write(e)),
        }
    }
}
