//! The closed set of values a document can hold.
//!
//! [`Value`] is a sum type over the thirteen supported scalar and composite
//! types. The only way to get a value out of arbitrary decoded input is through
//! [`TryFrom<Bson>`], which rejects every BSON type outside the supported set
//! with [`ValidationError::UnsupportedType`].
//!
//! # Example
//!
//! ```ignore
//! use docwire_core::value::Value;
//!
//! let v = Value::from(42);
//! assert_eq!(v.type_alias(), "int");
//! assert!(v.is_number());
//! ```

use bson::{Bson, DateTime, Timestamp, oid::ObjectId, spec::BinarySubtype};

use crate::{
    document::{Array, Document},
    error::{DocWireResult, ValidationError},
};

/// Binary data with a subtype byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    pub subtype: u8,
    pub bytes: Vec<u8>,
}

impl Binary {
    pub fn new(subtype: u8, bytes: impl Into<Vec<u8>>) -> Self {
        Self { subtype, bytes: bytes.into() }
    }
}

/// A regular expression pattern with its option letters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regex {
    pub pattern: String,
    pub options: String,
}

impl Regex {
    pub fn new(pattern: impl Into<String>, options: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), options: options.into() }
    }
}

/// A single document value.
///
/// Variants map one to one onto the supported BSON types. Integers keep their
/// width so that numeric promotion in update operators and type names in error
/// messages follow what clients expect.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Double(f64),
    String(String),
    Document(Document),
    Array(Array),
    Binary(Binary),
    ObjectId(ObjectId),
    Boolean(bool),
    DateTime(DateTime),
    Null,
    Regex(Regex),
    Int32(i32),
    Timestamp(Timestamp),
    Int64(i64),
}

impl Value {
    /// Returns the BSON type alias used by `$type` and in type-mismatch messages.
    pub fn type_alias(&self) -> &'static str {
        match self {
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Document(_) => "object",
            Value::Array(_) => "array",
            Value::Binary(_) => "binData",
            Value::ObjectId(_) => "objectId",
            Value::Boolean(_) => "bool",
            Value::DateTime(_) => "date",
            Value::Null => "null",
            Value::Regex(_) => "regex",
            Value::Int32(_) => "int",
            Value::Timestamp(_) => "timestamp",
            Value::Int64(_) => "long",
        }
    }

    /// Returns the numeric BSON type code for the value.
    pub fn type_code(&self) -> i32 {
        match self {
            Value::Double(_) => 1,
            Value::String(_) => 2,
            Value::Document(_) => 3,
            Value::Array(_) => 4,
            Value::Binary(_) => 5,
            Value::ObjectId(_) => 7,
            Value::Boolean(_) => 8,
            Value::DateTime(_) => 9,
            Value::Null => 10,
            Value::Regex(_) => 11,
            Value::Int32(_) => 16,
            Value::Timestamp(_) => 17,
            Value::Int64(_) => 18,
        }
    }

    /// Returns true for `Double`, `Int32` and `Int64`.
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Double(_) | Value::Int32(_) | Value::Int64(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_document_mut(&mut self) -> Option<&mut Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the value as a double when it is any numeric type.
    ///
    /// Large `Int64` values lose precision; use [`crate::compare::compare`]
    /// when exactness matters.
    pub fn to_f64_lossy(&self) -> Option<f64> {
        match self {
            Value::Double(f) => Some(*f),
            Value::Int32(i) => Some(f64::from(*i)),
            Value::Int64(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Returns the value as an `i64` when it is an integer, or a double with
    /// no fractional part that fits in the `i64` range.
    pub fn to_whole_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(i) => Some(i64::from(*i)),
            Value::Int64(i) => Some(*i),
            Value::Double(f) if f.is_finite() && f.fract() == 0.0 => {
                if *f >= -9_223_372_036_854_775_808.0 && *f < 9_223_372_036_854_775_808.0 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Returns whether the value counts as "true" in projections and similar
    /// boolean-ish positions.
    ///
    /// `false`, `null` and every numeric zero are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Null => false,
            Value::Int32(i) => *i != 0,
            Value::Int64(i) => *i != 0,
            Value::Double(f) => *f != 0.0,
            _ => true,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Document(v)
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Value::Array(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::ObjectId(v)
    }
}

impl From<DateTime> for Value {
    fn from(v: DateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Binary> for Value {
    fn from(v: Binary) -> Self {
        Value::Binary(v)
    }
}

impl From<Regex> for Value {
    fn from(v: Regex) -> Self {
        Value::Regex(v)
    }
}

impl TryFrom<Bson> for Value {
    type Error = ValidationError;

    fn try_from(bson: Bson) -> Result<Self, Self::Error> {
        Ok(match bson {
            Bson::Double(f) => Value::Double(f),
            Bson::String(s) => Value::String(s),
            Bson::Document(d) => Value::Document(Document::try_from(d)?),
            Bson::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<Vec<_>, _>>()?
                    .into(),
            ),
            Bson::Binary(b) => Value::Binary(Binary::new(u8::from(b.subtype), b.bytes)),
            Bson::ObjectId(oid) => Value::ObjectId(oid),
            Bson::Boolean(b) => Value::Boolean(b),
            Bson::DateTime(dt) => Value::DateTime(dt),
            Bson::Null => Value::Null,
            Bson::RegularExpression(re) => Value::Regex(Regex::new(re.pattern.as_str(), re.options.as_str())),
            Bson::Int32(i) => Value::Int32(i),
            Bson::Timestamp(ts) => Value::Timestamp(ts),
            Bson::Int64(i) => Value::Int64(i),
            other => return Err(ValidationError::UnsupportedType(format!("{:?}", other.element_type()))),
        })
    }
}

impl Value {
    /// Converts the value into its wire-boundary BSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if a regex pattern or option string contains a NUL byte.
    pub fn to_bson(&self) -> DocWireResult<Bson> {
        Ok(match self {
            Value::Double(f) => Bson::Double(*f),
            Value::String(s) => Bson::String(s.clone()),
            Value::Document(d) => Bson::Document(d.to_bson()?),
            Value::Array(a) => Bson::Array(a.iter().map(Value::to_bson).collect::<DocWireResult<Vec<_>>>()?),
            Value::Binary(b) => Bson::Binary(bson::Binary {
                subtype: BinarySubtype::from(b.subtype),
                bytes: b.bytes.clone(),
            }),
            Value::ObjectId(oid) => Bson::ObjectId(*oid),
            Value::Boolean(b) => Bson::Boolean(*b),
            Value::DateTime(dt) => Bson::DateTime(*dt),
            Value::Null => Bson::Null,
            Value::Regex(re) => {
                // Same construction as bson's crate-private `Regex::from_strings`:
                // option letters are stored sorted.
                let mut chars: Vec<char> = re.options.chars().collect();
                chars.sort_unstable();
                Bson::RegularExpression(bson::Regex {
                    pattern: re.pattern.clone().try_into()?,
                    options: chars.into_iter().collect::<String>().try_into()?,
                })
            }
            Value::Int32(i) => Bson::Int32(*i),
            Value::Timestamp(ts) => Bson::Timestamp(*ts),
            Value::Int64(i) => Bson::Int64(*i),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_bson_types_are_rejected() {
        assert!(matches!(Value::try_from(Bson::Undefined), Err(ValidationError::UnsupportedType(_))));
        assert!(matches!(Value::try_from(Bson::MinKey), Err(ValidationError::UnsupportedType(_))));
        assert!(matches!(
            Value::try_from(Bson::JavaScriptCode("x".into())),
            Err(ValidationError::UnsupportedType(_))
        ));
        assert!(matches!(
            Value::try_from(Bson::Array(vec![Bson::Int32(1), Bson::MaxKey])),
            Err(ValidationError::UnsupportedType(_))
        ));
    }

    #[test]
    fn supported_bson_types_convert_both_ways() {
        let bson = Bson::Array(vec![
            Bson::Int32(1),
            Bson::Int64(2),
            Bson::Double(-0.0),
            Bson::String("x".into()),
            Bson::Null,
            Bson::Boolean(true),
        ]);
        let value = Value::try_from(bson.clone()).unwrap();
        assert_eq!(value.to_bson().unwrap(), bson);
    }

    #[test]
    fn truthiness_follows_projection_rules() {
        assert!(!Value::Int32(0).is_truthy());
        assert!(!Value::Double(-0.0).is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Double(0.5).is_truthy());
        assert!(Value::from("0").is_truthy());
    }

    #[test]
    fn whole_doubles_convert_to_i64() {
        assert_eq!(Value::Double(3.0).to_whole_i64(), Some(3));
        assert_eq!(Value::Double(3.5).to_whole_i64(), None);
        assert_eq!(Value::Double(f64::NAN).to_whole_i64(), None);
        assert_eq!(Value::Double(9_223_372_036_854_775_808.0).to_whole_i64(), None);
    }
}
