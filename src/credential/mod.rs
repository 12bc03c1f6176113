pub mod codec;
pub mod issuer;
pub mod secret;

pub use codec::{decode, decode_fields, encode, to_fields};
pub use issuer::{CredentialIssuer, Issuance};
pub use secret::{DEFAULT_SECRET, SecretId};

use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::clock::truncate_to_seconds;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Invalid window: {0}")]
    InvalidWindow(String),
    #[error("Decode: {0}")]
    Decode(String),
}

/// One issued access grant. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "codec::WireRecord")]
pub struct CredentialRecord {
    door_id: String,
    secret: String,
    valid_from: NaiveDateTime,
    valid_until: NaiveDateTime,
}

impl CredentialRecord {
    /// Build a record; timestamps are truncated to whole seconds and the
    /// window must be non-empty.
    pub fn new(
        door_id: impl Into<String>,
        secret: impl Into<String>,
        valid_from: NaiveDateTime,
        valid_until: NaiveDateTime,
    ) -> Result<Self, CredentialError> {
        let valid_from = truncate_to_seconds(valid_from);
        let valid_until = truncate_to_seconds(valid_until);
        if valid_from >= valid_until {
            return Err(CredentialError::InvalidWindow(format!(
                "start {valid_from} is not before end {valid_until}"
            )));
        }
        Ok(Self {
            door_id: door_id.into(),
            secret: secret.into(),
            valid_from,
            valid_until,
        })
    }

    pub fn door_id(&self) -> &str {
        &self.door_id
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn valid_from(&self) -> NaiveDateTime {
        self.valid_from
    }

    pub fn valid_until(&self) -> NaiveDateTime {
        self.valid_until
    }

    /// `[valid_from, valid_until)` contains `now`.
    pub fn is_valid_at(&self, now: NaiveDateTime) -> bool {
        self.valid_from <= now && now < self.valid_until
    }
}
