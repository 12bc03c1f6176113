pub mod run;
pub mod source;
pub mod validate;

pub use run::ValidationLoop;
pub use source::{ChannelSource, PayloadSource, ZbarSource};
pub use validate::{Mismatch, validate};

use chrono::NaiveDateTime;

use crate::credential::CredentialRecord;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Failed to start decoder: {0}")]
    Spawn(String),
    #[error("Decoder stream closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Store: {0}")]
    Store(#[from] StoreError),
    #[error("Decoder: {0}")]
    Decoder(#[from] DecoderError),
    #[error("Scanner already terminated")]
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Key not valid yet.
    Waiting,
    Active,
    Expired,
    /// A different key was stored after the loop started.
    Rotated,
    Terminated,
}

impl LoopState {
    /// Position of `now` relative to the key's window.
    pub fn at(record: &CredentialRecord, now: NaiveDateTime) -> Self {
        if now < record.valid_from() {
            LoopState::Waiting
        } else if now < record.valid_until() {
            LoopState::Active
        } else {
            LoopState::Expired
        }
    }
}

/// Why a loop instance stopped. `Rotated` asks the owner to start a new
/// instance for `next`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Rotated { next: CredentialRecord },
    Expired,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub termination: Termination,
    pub iterations: u64,
    pub actuations: u32,
    pub rejected: u32,
    pub malformed: u32,
    pub rate_limited: u32,
}
