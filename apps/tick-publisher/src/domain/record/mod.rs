//! Market Record
//!
//! One decoded market-data datagram. The record keeps every JSON field it was
//! decoded from, in arrival order, so re-encoding for the broker forwards
//! unrecognized fields untouched.
//!
//! # Wire Format
//!
//! ```json
//! {"msgType":"TRADE","symbol":"AAPL","price":175.52,"size":300,
//!  "timestamp":1718900000123456,"sequence":42,"dailyVolume":1200}
//! ```
//!
//! `timestamp` is in microseconds since the Unix epoch. Numeric fields may
//! also arrive as numeric strings.

use std::borrow::Cow;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{Map, Value};

/// Message type label used when a record carries no `msgType`.
pub const DEFAULT_MSG_TYPE: &str = "unknown";

/// Symbol label used in metrics when a record carries no `symbol`.
pub const UNKNOWN_SYMBOL: &str = "unknown";

const MSG_TYPE_KEY: &str = "msgType";

// =============================================================================
// Required Fields
// =============================================================================

/// Fields every record must carry before numeric checks can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequiredField {
    /// Instrument symbol.
    Symbol,
    /// Trade or quote price.
    Price,
    /// Producer timestamp in microseconds.
    Timestamp,
    /// Per-symbol sequence number.
    Sequence,
}

impl RequiredField {
    /// All required fields, in check order.
    pub const ALL: [Self; 4] = [Self::Symbol, Self::Price, Self::Timestamp, Self::Sequence];

    /// JSON key of the field on the wire.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Symbol => "symbol",
            Self::Price => "price",
            Self::Timestamp => "timestamp",
            Self::Sequence => "sequence",
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Datagram could not be turned into a record.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Payload is not UTF-8 text.
    #[error("datagram is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Payload is not JSON.
    #[error("datagram is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is JSON but not an object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// A required field is absent or holds a value of the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// Field is absent or `null`.
    #[error("missing field `{}`", .0.key())]
    Missing(RequiredField),

    /// Field is present but does not parse.
    #[error("field `{}` is not a valid {expected}", .field.key())]
    Invalid {
        /// The offending field.
        field: RequiredField,
        /// What the field should have been.
        expected: &'static str,
    },
}

// =============================================================================
// Market Record
// =============================================================================

/// A decoded market-data record.
///
/// Immutable after decoding. Accessors parse on demand so that a malformed
/// field only affects the checks that need it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketRecord {
    fields: Map<String, Value>,
}

impl MarketRecord {
    /// Decode a datagram: UTF-8 text holding a single JSON object.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if the bytes are not UTF-8, not JSON, or not a
    /// JSON object.
    pub fn decode(datagram: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(datagram)?;
        match serde_json::from_str::<Value>(text)? {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(DecodeError::NotAnObject(json_kind(&other))),
        }
    }

    /// All fields, in arrival order.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Raw value of a required field, treating `null` as absent.
    #[must_use]
    pub fn field(&self, field: RequiredField) -> Option<&Value> {
        self.fields.get(field.key()).filter(|v| !v.is_null())
    }

    /// Required fields that are absent or `null`, in check order.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<RequiredField> {
        RequiredField::ALL
            .into_iter()
            .filter(|f| self.field(*f).is_none())
            .collect()
    }

    /// The symbol, if present.
    ///
    /// Non-string symbols are rendered as their JSON text so they still key
    /// a distinct per-symbol state.
    #[must_use]
    pub fn symbol(&self) -> Option<Cow<'_, str>> {
        match self.field(RequiredField::Symbol)? {
            Value::String(s) => Some(Cow::Borrowed(s.as_str())),
            other => Some(Cow::Owned(other.to_string())),
        }
    }

    /// Symbol label for metrics, falling back to `"unknown"`.
    #[must_use]
    pub fn symbol_label(&self) -> Cow<'_, str> {
        self.symbol().unwrap_or(Cow::Borrowed(UNKNOWN_SYMBOL))
    }

    /// Message type, falling back to `"unknown"`.
    #[must_use]
    pub fn msg_type(&self) -> &str {
        self.fields
            .get(MSG_TYPE_KEY)
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MSG_TYPE)
    }

    /// Parse the price as a decimal.
    ///
    /// # Errors
    ///
    /// Returns `FieldError` if the price is missing or not numeric.
    pub fn price(&self) -> Result<Decimal, FieldError> {
        let value = self
            .field(RequiredField::Price)
            .ok_or(FieldError::Missing(RequiredField::Price))?;
        parse_decimal(value).ok_or(FieldError::Invalid {
            field: RequiredField::Price,
            expected: "decimal",
        })
    }

    /// Parse the producer timestamp (microseconds since epoch).
    ///
    /// # Errors
    ///
    /// Returns `FieldError` if the timestamp is missing or not an integer.
    pub fn timestamp_micros(&self) -> Result<i64, FieldError> {
        let value = self
            .field(RequiredField::Timestamp)
            .ok_or(FieldError::Missing(RequiredField::Timestamp))?;
        parse_integer(value)
            .and_then(|v| i64::try_from(v).ok())
            .ok_or(FieldError::Invalid {
                field: RequiredField::Timestamp,
                expected: "integer",
            })
    }

    /// Parse the sequence number.
    ///
    /// # Errors
    ///
    /// Returns `FieldError` if the sequence is missing or not a non-negative
    /// integer.
    pub fn sequence(&self) -> Result<u64, FieldError> {
        let value = self
            .field(RequiredField::Sequence)
            .ok_or(FieldError::Missing(RequiredField::Sequence))?;
        parse_integer(value)
            .and_then(|v| u64::try_from(v).ok())
            .ok_or(FieldError::Invalid {
                field: RequiredField::Sequence,
                expected: "non-negative integer",
            })
    }

    /// Re-encode the record for forwarding.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.fields)
    }
}

fn parse_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

#[allow(clippy::cast_possible_truncation)]
fn parse_integer(value: &Value) -> Option<i128> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i128)
            }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
