//! Export of plain values as JSON or CBOR.

use crate::error::SerializeResult;
use entisync_core::Value;

/// Encodes a plain value as compact JSON.
///
/// Byte strings become arrays of numbers.
pub fn to_json(value: &Value) -> SerializeResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Encodes a plain value as indented JSON.
pub fn to_json_pretty(value: &Value) -> SerializeResult<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Encodes a plain value as CBOR. Map keys keep their output order.
pub fn to_cbor(value: &Value) -> SerializeResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

/// Parses JSON into a plain value.
pub fn from_json(json: &str) -> SerializeResult<Value> {
    let parsed: serde_json::Value = serde_json::from_str(json)?;
    Ok(Value::from_json(parsed))
}
