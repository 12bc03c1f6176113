use std::io::Write;
use std::path::{Path, PathBuf};

use super::{CredentialStore, StoreError};

/// Key slot backed by one file, replaced by rename on every save.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileStore {
    fn read_payload(&self) -> Result<String, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(self.path.clone()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn save(&self, payload: &str) -> Result<(), StoreError> {
        write_atomic(&self.path, payload.as_bytes())?;
        tracing::debug!(path = %self.path.display(), bytes = payload.len(), "Key saved");
        Ok(())
    }
}

/// Write `bytes` to a temp file next to `path`, sync it, then rename it
/// over `path`. Readers see the old content or the new, never a prefix.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
    temp.as_file_mut().write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
