//! Canonical text form of a [`CredentialRecord`].
//!
//! The same JSON object is published on the bus, persisted on the device and
//! rendered into the QR code:
//!
//! ```text
//! {"doorID":"front","end":"2025-01-01, 10:10:00","passwd":"...","start":"2025-01-01, 10:00:00"}
//! ```

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{CredentialError, CredentialRecord};
use crate::config::TIMESTAMP_FORMAT;

pub const FIELD_DOOR_ID: &str = "doorID";
pub const FIELD_SECRET: &str = "passwd";
pub const FIELD_START: &str = "start";
pub const FIELD_END: &str = "end";

#[derive(Deserialize)]
pub(crate) struct WireRecord {
    #[serde(rename = "doorID", alias = "door_id")]
    door_id: String,
    passwd: String,
    start: String,
    end: String,
}

impl TryFrom<WireRecord> for CredentialRecord {
    type Error = CredentialError;

    fn try_from(wire: WireRecord) -> Result<Self, Self::Error> {
        let start = parse_timestamp(&wire.start)?;
        let end = parse_timestamp(&wire.end)?;
        CredentialRecord::new(wire.door_id, wire.passwd, start, end)
            .map_err(|e| CredentialError::Decode(e.to_string()))
    }
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, CredentialError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map_err(|e| CredentialError::Decode(format!("bad timestamp {s:?}: {e}")))
}

/// The record as wire fields, keyed by their wire names.
pub fn to_fields(record: &CredentialRecord) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(FIELD_DOOR_ID.into(), Value::String(record.door_id().to_owned()));
    fields.insert(FIELD_SECRET.into(), Value::String(record.secret().to_owned()));
    fields.insert(FIELD_START.into(), Value::String(format_timestamp(record.valid_from())));
    fields.insert(FIELD_END.into(), Value::String(format_timestamp(record.valid_until())));
    fields
}

pub fn encode(record: &CredentialRecord) -> String {
    Value::Object(to_fields(record)).to_string()
}

/// Parse a payload into its raw fields without interpreting them.
///
/// Fails only when the text is not a JSON object.
pub fn decode_fields(text: &str) -> Result<Map<String, Value>, CredentialError> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(CredentialError::Decode(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(CredentialError::Decode(e.to_string())),
    }
}

pub fn decode(text: &str) -> Result<CredentialRecord, CredentialError> {
    serde_json::from_str(text.trim()).map_err(|e| CredentialError::Decode(e.to_string()))
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
