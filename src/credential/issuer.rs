use chrono::TimeDelta;

use super::{CredentialError, CredentialRecord, DEFAULT_SECRET, SecretId, codec};
use crate::clock::{Clock, SystemClock};

/// A freshly minted record together with the id it was minted under.
///
/// `key_id` names the artifacts written for this key (QR image, payload
/// file). It doubles as the secret when the caller asked for a generated one.
#[derive(Debug, Clone)]
pub struct Issuance {
    pub key_id: SecretId,
    pub record: CredentialRecord,
}

impl Issuance {
    pub fn payload(&self) -> String {
        codec::encode(&self.record)
    }
}

pub struct CredentialIssuer<C = SystemClock> {
    clock: C,
    span: tracing::Span,
}

impl CredentialIssuer<SystemClock> {
    pub fn new(span: tracing::Span) -> Self {
        Self::with_clock(SystemClock, span)
    }
}

impl<C: Clock> CredentialIssuer<C> {
    pub fn with_clock(clock: C, span: tracing::Span) -> Self {
        Self { clock, span }
    }

    /// Mint a record valid from now for `window_minutes`.
    ///
    /// A `secret` of [`DEFAULT_SECRET`] is replaced by a generated id; any
    /// other value is used verbatim.
    pub fn issue(
        &self,
        door_id: &str,
        secret: &str,
        window_minutes: i64,
    ) -> Result<Issuance, CredentialError> {
        let _enter = self.span.enter();

        if window_minutes <= 0 {
            return Err(CredentialError::InvalidWindow(format!(
                "window must be positive, got {window_minutes} minute(s)"
            )));
        }
        let window = TimeDelta::try_minutes(window_minutes).ok_or_else(|| {
            CredentialError::InvalidWindow(format!("window of {window_minutes} minutes is too large"))
        })?;

        let valid_from = self.clock.now();
        let valid_until = valid_from.checked_add_signed(window).ok_or_else(|| {
            CredentialError::InvalidWindow(format!("end of window overflows ({window_minutes} minutes)"))
        })?;

        let key_id = SecretId::generate();
        tracing::info!(key_id = %key_id, "Generated key");

        let secret = if secret == DEFAULT_SECRET {
            key_id.to_string()
        } else {
            secret.to_owned()
        };

        let record = CredentialRecord::new(door_id, secret, valid_from, valid_until)?;
        tracing::debug!(
            door_id,
            start = %record.valid_from(),
            end = %record.valid_until(),
            "Key window"
        );
        Ok(Issuance { key_id, record })
    }
}
