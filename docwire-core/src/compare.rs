//! The canonical total order over [`Value`]s.
//!
//! Every sort and comparison site goes through [`compare`]. Values are first
//! grouped into classes:
//!
//! ```text
//! null < NaN < numbers < string < object < array < binary < objectId < bool < date < timestamp < regex
//! ```
//!
//! and then compared within their class. All numeric types share one class and
//! compare by numeric value. Comparisons between `Int64` and `Double` are exact,
//! including near 2^63 where converting the integer to a double would round.
//! Negative zero equals positive zero, and NaN equals NaN.

use std::cmp::Ordering;

use crate::{
    document::{Array, Document},
    value::Value,
};

fn class(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Double(f) if f.is_nan() => 1,
        Value::Double(_) | Value::Int32(_) | Value::Int64(_) => 2,
        Value::String(_) => 3,
        Value::Document(_) => 4,
        Value::Array(_) => 5,
        Value::Binary(_) => 6,
        Value::ObjectId(_) => 7,
        Value::Boolean(_) => 8,
        Value::DateTime(_) => 9,
        Value::Timestamp(_) => 10,
        Value::Regex(_) => 11,
    }
}

/// Returns true if both values belong to the same ordering class.
///
/// Range operators such as `$gt` only match values of the same class as their
/// argument.
pub fn same_class(a: &Value, b: &Value) -> bool {
    class(a) == class(b)
}

/// Compares two values under the canonical order.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    let (ca, cb) = (class(a), class(b));
    if ca != cb {
        return ca.cmp(&cb);
    }

    match (a, b) {
        (Value::Double(x), Value::Double(y)) if x.is_nan() && y.is_nan() => Ordering::Equal,
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Double(x), Value::Int32(y)) => compare_f64_i64(*x, i64::from(*y)),
        (Value::Double(x), Value::Int64(y)) => compare_f64_i64(*x, *y),
        (Value::Int32(x), Value::Double(y)) => compare_f64_i64(*y, i64::from(*x)).reverse(),
        (Value::Int64(x), Value::Double(y)) => compare_f64_i64(*y, *x).reverse(),
        (Value::Int32(x), Value::Int32(y)) => x.cmp(y),
        (Value::Int32(x), Value::Int64(y)) => i64::from(*x).cmp(y),
        (Value::Int64(x), Value::Int32(y)) => x.cmp(&i64::from(*y)),
        (Value::Int64(x), Value::Int64(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Value::Document(x), Value::Document(y)) => compare_documents(x, y),
        (Value::Array(x), Value::Array(y)) => compare_arrays(x, y),
        (Value::Binary(x), Value::Binary(y)) => x.bytes.cmp(&y.bytes).then(x.subtype.cmp(&y.subtype)),
        (Value::ObjectId(x), Value::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::DateTime(x), Value::DateTime(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
        (Value::Timestamp(x), Value::Timestamp(y)) => (x.time, x.increment).cmp(&(y.time, y.increment)),
        (Value::Regex(x), Value::Regex(y)) => x.pattern.cmp(&y.pattern).then_with(|| x.options.cmp(&y.options)),
        _ => Ordering::Equal,
    }
}

/// Returns true if the two values compare equal.
pub fn equal(a: &Value, b: &Value) -> bool {
    compare(a, b) == Ordering::Equal
}

/// Returns true if the values have the same type and the same contents.
///
/// Stricter than [`equal`]: `1` and `1.0` differ, as do `0.0` and `-0.0`.
/// Unlike `==`, NaN is identical to NaN. Used to tell real changes from no-ops.
pub fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits() || (x.is_nan() && y.is_nan()),
        (Value::Document(x), Value::Document(y)) => identical_documents(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| identical(a, b))
        }
        _ => a == b,
    }
}

/// [`identical`] for documents: same keys in the same order with identical values.
pub fn identical_documents(a: &Document, b: &Document) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| ka == kb && identical(va, vb))
}

const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

// `f` must not be NaN.
fn compare_f64_i64(f: f64, i: i64) -> Ordering {
    if f >= TWO_POW_63 {
        return Ordering::Greater;
    }
    if f < -TWO_POW_63 {
        return Ordering::Less;
    }

    let whole = f.trunc();
    match (whole as i64).cmp(&i) {
        Ordering::Equal => (f - whole).partial_cmp(&0.0).unwrap_or(Ordering::Equal),
        other => other,
    }
}

fn compare_documents(a: &Document, b: &Document) -> Ordering {
    for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
        let ord = ka.cmp(kb).then_with(|| compare(va, vb));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_arrays(a: &Array, b: &Array) -> Ordering {
    for (va, vb) in a.iter().zip(b.iter()) {
        let ord = compare(va, vb);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// A [`Value`] wrapper whose `Ord` is the canonical order.
///
/// Used as a key in ordered maps and sets.
#[derive(Debug, Clone)]
pub struct ValueKey(pub Value);

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        equal(&self.0, &other.0)
    }
}

impl Eq for ValueKey {}

impl PartialOrd for ValueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ValueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use bson::{DateTime, oid::ObjectId};
    use proptest::prelude::*;

    use super::*;
    use crate::value::{Binary, Regex};

    #[test]
    fn class_order() {
        let ordered = vec![
            Value::Null,
            Value::Double(f64::NAN),
            Value::Double(f64::NEG_INFINITY),
            Value::Int32(1),
            Value::from(""),
            Value::Document(Document::new()),
            Value::Array(Array::new()),
            Value::Binary(Binary::new(0, vec![])),
            Value::ObjectId(ObjectId::new()),
            Value::Boolean(false),
            Value::DateTime(DateTime::from_millis(0)),
            Value::Timestamp(bson::Timestamp { time: 0, increment: 0 }),
            Value::Regex(Regex::new("", "")),
        ];

        for pair in ordered.windows(2) {
            assert_eq!(compare(&pair[0], &pair[1]), Ordering::Less, "{:?} < {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn zero_and_nan_equality() {
        assert!(equal(&Value::Double(-0.0), &Value::Double(0.0)));
        assert!(equal(&Value::Double(-0.0), &Value::Int32(0)));
        assert!(equal(&Value::Double(f64::NAN), &Value::Double(f64::NAN)));
        assert!(!equal(&Value::Double(f64::NAN), &Value::Int32(0)));
    }

    #[test]
    fn int64_vs_double_near_two_pow_63_is_exact() {
        let max = Value::Int64(i64::MAX);
        let two_pow_63 = Value::Double(TWO_POW_63);
        assert_eq!(compare(&max, &two_pow_63), Ordering::Less);

        let big = Value::Int64((1 << 53) + 1);
        let rounded = Value::Double((1u64 << 53) as f64);
        assert_eq!(compare(&big, &rounded), Ordering::Greater);

        assert_eq!(compare(&Value::Int64(i64::MIN), &Value::Double(-TWO_POW_63)), Ordering::Equal);
        assert_eq!(compare(&Value::Double(2.5), &Value::Int32(2)), Ordering::Greater);
        assert_eq!(compare(&Value::Double(-2.5), &Value::Int32(-2)), Ordering::Less);
    }

    #[test]
    fn composites_compare_element_wise() {
        let short: Array = vec![Value::Int32(1)].into();
        let long: Array = vec![Value::Int32(1), Value::Int32(0)].into();
        assert_eq!(compare(&Value::Array(short), &Value::Array(long)), Ordering::Less);

        let a = Document::try_from(bson::doc! { "a": 2 }).unwrap();
        let b = Document::try_from(bson::doc! { "b": 1 }).unwrap();
        assert_eq!(compare(&Value::Document(a), &Value::Document(b)), Ordering::Less);
    }

    fn boundary_numbers() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Int32(i32::MAX)),
            Just(Value::Int32(i32::MIN)),
            Just(Value::Int64(1 << 31)),
            Just(Value::Int64((1 << 53) + 1)),
            Just(Value::Int64(1 << 53)),
            Just(Value::Int64(i64::MAX)),
            Just(Value::Int64(i64::MIN)),
            Just(Value::Double(2147483648.0)),
            Just(Value::Double(9007199254740992.0)),
            Just(Value::Double(TWO_POW_63)),
            Just(Value::Double(-TWO_POW_63)),
            Just(Value::Double(-0.0)),
            Just(Value::Double(f64::NAN)),
            Just(Value::Double(f64::INFINITY)),
        ]
    }

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<f64>().prop_map(Value::Double),
            any::<i32>().prop_map(Value::Int32),
            any::<i64>().prop_map(Value::Int64),
            boundary_numbers(),
            "[a-c]{0,3}".prop_map(Value::String),
            any::<bool>().prop_map(Value::Boolean),
            any::<i64>().prop_map(|ms| Value::DateTime(DateTime::from_millis(ms))),
            prop::collection::vec(any::<u8>(), 0..3).prop_map(|b| Value::Binary(Binary::new(0, b))),
        ]
    }

    fn value() -> impl Strategy<Value = Value> {
        prop_oneof![
            4 => scalar(),
            1 => prop::collection::vec(scalar(), 0..3).prop_map(|items| Value::Array(items.into())),
        ]
    }

    proptest! {
        #[test]
        fn ordering_is_antisymmetric(a in value(), b in value()) {
            prop_assert_eq!(compare(&a, &b), compare(&b, &a).reverse());
        }

        #[test]
        fn ordering_is_transitive(a in value(), b in value(), c in value()) {
            if compare(&a, &b) == Ordering::Less && compare(&b, &c) == Ordering::Less {
                prop_assert_eq!(compare(&a, &c), Ordering::Less);
            }
            if compare(&a, &b) != Ordering::Greater && compare(&b, &c) != Ordering::Greater {
                prop_assert_ne!(compare(&a, &c), Ordering::Greater);
            }
        }
    }
}
