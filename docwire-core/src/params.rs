//! Helpers that pull typed command parameters out of a command document.
//!
//! Each command builds its parameter struct by hand with these helpers. A field
//! is either required, optional, unimplemented (rejected when present) or
//! ignored (accepted with a warning). Type errors use the same wording for every
//! command: `BSON field '<command>.<field>' is the wrong type '<actual>', expected type '<expected>'`.

use tracing::warn;

use crate::{
    document::{Array, Document},
    error::{DocWireError, DocWireResult, ErrorCode},
    value::Value,
};

const NUMBER_TYPES: &str = "[long, int, decimal, double]";
const BOOL_TYPES: &str = "[bool, long, int, decimal, double]";

fn wrong_type(command: &str, key: &str, actual: &Value, expected: &str) -> DocWireError {
    DocWireError::command(
        ErrorCode::TypeMismatch,
        format!(
            "BSON field '{command}.{key}' is the wrong type '{}', expected type '{expected}'",
            actual.type_alias()
        ),
    )
}

fn wrong_types(command: &str, key: &str, actual: &Value, expected: &str) -> DocWireError {
    DocWireError::command(
        ErrorCode::TypeMismatch,
        format!(
            "BSON field '{command}.{key}' is the wrong type '{}', expected types '{expected}'",
            actual.type_alias()
        ),
    )
}

fn missing(command: &str, key: &str) -> DocWireError {
    DocWireError::command(
        ErrorCode::MissingField,
        format!("BSON field '{command}.{key}' is missing but a required field"),
    )
}

/// Returns the required string field `key`.
///
/// # Errors
///
/// `MissingField` when absent, `TypeMismatch` when not a string.
pub fn require_string(doc: &Document, command: &str, key: &str) -> DocWireResult<String> {
    match doc.get(key) {
        None => Err(missing(command, key)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(wrong_type(command, key, other, "string")),
    }
}

/// Returns the required `long` field `key`. Other numeric types are rejected.
pub fn require_long(doc: &Document, command: &str, key: &str) -> DocWireResult<i64> {
    match doc.get(key) {
        None => Err(missing(command, key)),
        Some(Value::Int64(i)) => Ok(*i),
        Some(other) => Err(wrong_type(command, key, other, "long")),
    }
}

/// Returns the optional string field `key`.
pub fn optional_string(doc: &Document, command: &str, key: &str) -> DocWireResult<Option<String>> {
    match doc.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(wrong_type(command, key, other, "string")),
    }
}

/// Returns the optional document field `key`. A `null` value counts as absent.
pub fn optional_document(doc: &Document, command: &str, key: &str) -> DocWireResult<Option<Document>> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Document(d)) => Ok(Some(d.clone())),
        Some(other) => Err(wrong_type(command, key, other, "object")),
    }
}

/// Returns the optional array field `key`.
pub fn optional_array(doc: &Document, command: &str, key: &str) -> DocWireResult<Option<Array>> {
    match doc.get(key) {
        None => Ok(None),
        Some(Value::Array(a)) => Ok(Some(a.clone())),
        Some(other) => Err(wrong_type(command, key, other, "array")),
    }
}

/// Returns the optional boolean field `key`.
///
/// Numbers are accepted as booleans: zero is false, anything else is true.
pub fn optional_bool(doc: &Document, command: &str, key: &str) -> DocWireResult<Option<bool>> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Boolean(b)) => Ok(Some(*b)),
        Some(v @ (Value::Int32(_) | Value::Int64(_) | Value::Double(_))) => Ok(Some(v.is_truthy())),
        Some(other) => Err(wrong_types(command, key, other, BOOL_TYPES)),
    }
}

/// Returns the optional numeric field `key` as a whole number.
///
/// Doubles are truncated toward zero.
pub fn optional_whole_number(doc: &Document, command: &str, key: &str) -> DocWireResult<Option<i64>> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Int32(i)) => Ok(Some(i64::from(*i))),
        Some(Value::Int64(i)) => Ok(Some(*i)),
        Some(Value::Double(f)) => Ok(Some(f.trunc() as i64)),
        Some(other) => Err(wrong_types(command, key, other, NUMBER_TYPES)),
    }
}

/// Returns the optional non-negative whole number `key`.
///
/// # Errors
///
/// `Location51024` when the value is negative.
pub fn optional_non_negative(doc: &Document, command: &str, key: &str) -> DocWireResult<Option<i64>> {
    let value = optional_whole_number(doc, command, key)?;
    match value {
        Some(v) if v < 0 => Err(DocWireError::command(
            ErrorCode::ValueNegative,
            format!("BSON field '{key}' value must be >= 0, actual value '{v}'"),
        )),
        other => Ok(other),
    }
}

/// Rejects a field that is recognised but not implemented.
///
/// # Errors
///
/// `NotImplemented` when the field is present.
pub fn reject_if_present(doc: &Document, command: &str, key: &str) -> DocWireResult<()> {
    if doc.contains_key(key) {
        return Err(DocWireError::NotImplemented(format!(
            "{command}: support for field \"{key}\" is not implemented yet"
        )));
    }
    Ok(())
}

/// Accepts a field that has no effect, logging a warning when present.
pub fn ignore_if_present(doc: &Document, command: &str, key: &str) {
    if doc.contains_key(key) {
        warn!(command, field = key, "ignoring unsupported field");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(bson: bson::Document) -> Document {
        Document::try_from(bson).unwrap()
    }

    #[test]
    fn required_fields() {
        let d = doc(bson::doc! { "collection": {}, "getMore": 12_i32 });

        let err = require_string(&d, "getMore", "collection").unwrap_err();
        assert_eq!(err.code(), ErrorCode::TypeMismatch);
        assert_eq!(
            err.to_string(),
            "BSON field 'getMore.collection' is the wrong type 'object', expected type 'string'"
        );

        let err = require_long(&d, "getMore", "getMore").unwrap_err();
        assert_eq!(err.to_string(), "BSON field 'getMore.getMore' is the wrong type 'int', expected type 'long'");

        let err = require_string(&Document::new(), "getMore", "collection").unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingField);
        assert_eq!(err.to_string(), "BSON field 'getMore.collection' is missing but a required field");
    }

    #[test]
    fn numbers_truncate_and_reject_negatives() {
        let d = doc(bson::doc! { "a": 1.9, "b": -1_i64, "c": false });
        assert_eq!(optional_whole_number(&d, "getMore", "a").unwrap(), Some(1));

        let err = optional_non_negative(&d, "getMore", "b").unwrap_err();
        assert_eq!(err.code().code(), 51024);
        assert_eq!(err.to_string(), "BSON field 'b' value must be >= 0, actual value '-1'");

        let err = optional_whole_number(&d, "getMore", "c").unwrap_err();
        assert_eq!(
            err.to_string(),
            "BSON field 'getMore.c' is the wrong type 'bool', expected types '[long, int, decimal, double]'"
        );
    }

    #[test]
    fn numeric_bools() {
        let d = doc(bson::doc! { "upsert": 1, "multi": 0.0, "bad": "x" });
        assert_eq!(optional_bool(&d, "update", "upsert").unwrap(), Some(true));
        assert_eq!(optional_bool(&d, "update", "multi").unwrap(), Some(false));
        assert!(optional_bool(&d, "update", "bad").is_err());
        assert_eq!(optional_bool(&d, "update", "absent").unwrap(), None);
    }

    #[test]
    fn unimplemented_fields() {
        let d = doc(bson::doc! { "collation": {} });
        let err = reject_if_present(&d, "find", "collation").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotImplemented);
        assert!(reject_if_present(&d, "find", "let").is_ok());
    }
}
