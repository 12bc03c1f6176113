use std::sync::{Arc, Mutex};

use super::{CredentialStore, StoreError};

/// In-process key slot for when the receiver and the scanner share an
/// address space. Clones share the slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn read_payload(&self) -> Result<String, StoreError> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.clone().ok_or(StoreError::Empty)
    }

    fn save(&self, payload: &str) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(payload.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_slot() {
        let store = MemoryStore::new();
        assert!(matches!(store.load(), Err(StoreError::Empty)));
    }

    #[test]
    fn test_clones_share_slot() {
        let store = MemoryStore::new();
        let writer = store.clone();
        writer
            .save(r#"{"doorID":"d","passwd":"p","start":"2025-01-01, 10:00:00","end":"2025-01-01, 10:10:00"}"#)
            .unwrap();
        assert_eq!(store.load().unwrap().secret(), "p");
    }
}
