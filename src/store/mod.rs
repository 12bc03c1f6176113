pub mod disk;
pub mod memory;

pub use disk::FileStore;
pub use memory::MemoryStore;

use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::credential::{CredentialError, CredentialRecord, codec};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Key file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("No key stored")]
    Empty,
    #[error("Stored key is unreadable: {0}")]
    Decode(#[from] CredentialError),
}

impl StoreError {
    /// No key has been stored yet; the scanner cannot start.
    pub fn is_missing(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::Empty)
    }
}

/// Single slot holding the key the device currently accepts.
///
/// `save` replaces the slot wholesale; a concurrent read sees either the
/// previous payload or the new one, never a mix.
pub trait CredentialStore: Send + Sync {
    /// Payload text exactly as last saved.
    fn read_payload(&self) -> Result<String, StoreError>;
    fn save(&self, payload: &str) -> Result<(), StoreError>;

    fn load(&self) -> Result<CredentialRecord, StoreError> {
        Ok(codec::decode(&self.read_payload()?)?)
    }

    /// Record and raw fields, both taken from a single read.
    fn load_key(&self) -> Result<StoredKey, StoreError> {
        StoredKey::parse(&self.read_payload()?)
    }
}

impl<S: CredentialStore + ?Sized> CredentialStore for std::sync::Arc<S> {
    fn read_payload(&self) -> Result<String, StoreError> {
        (**self).read_payload()
    }

    fn save(&self, payload: &str) -> Result<(), StoreError> {
        (**self).save(payload)
    }
}

/// The stored key as the loop uses it: `record` drives the window and
/// rotation checks, `fields` is what scans are compared against. `fields`
/// keeps the stored spelling of every key and value, extras included.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredKey {
    pub record: CredentialRecord,
    pub fields: Map<String, Value>,
}

impl StoredKey {
    pub fn parse(payload: &str) -> Result<Self, StoreError> {
        Ok(Self {
            record: codec::decode(payload)?,
            fields: codec::decode_fields(payload)?,
        })
    }
}

/// A new key replaced `previous`. Only the secret is compared: door and
/// window may repeat between issuances, the secret may not.
pub fn has_rotated(previous: &CredentialRecord, current: &CredentialRecord) -> bool {
    previous.secret() != current.secret()
}
