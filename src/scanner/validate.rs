use serde_json::{Map, Value};
use std::fmt;

/// First field of the active key that the scanned payload does not carry
/// with an identical value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub field: String,
    pub expected: String,
    /// `None` when the field is absent from the scanned payload.
    pub actual: Option<String>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual {
            Some(actual) => write!(
                f,
                "Key mismatch - Field: {}, Expected: {}, Got: {}",
                self.field, self.expected, actual
            ),
            None => write!(
                f,
                "Key mismatch - Field: {}, Expected: {}, Got: nothing",
                self.field, self.expected
            ),
        }
    }
}

/// Every field of the stored key `active` must appear in `scanned` with an
/// equal value. Fields only present in `scanned` are ignored.
pub fn validate(scanned: &Map<String, Value>, active: &Map<String, Value>) -> Result<(), Mismatch> {
    for (field, expected) in active {
        let actual = scanned.get(field);
        if actual != Some(expected) {
            return Err(Mismatch {
                field: field.clone(),
                expected: render(expected),
                actual: actual.map(render),
            });
        }
    }
    Ok(())
}

fn render(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
