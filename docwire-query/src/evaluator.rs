//! Matching compiled expressions against documents.
//!
//! Field predicates resolve their path with [`find_values`], diving into arrays
//! by index and into arrays of documents by key. A predicate matches when any
//! resolved value matches, either directly or through one of its elements if
//! the value is an array. Operators that describe the array itself (`$size`,
//! `$all`, `$elemMatch`, `$exists`) are not applied to elements.
//!
//! When the path resolves to nothing, the field is missing: only predicates
//! that accept null, such as `{a: null}` or `{a: {$exists: false}}`, match.

use std::{cmp::Ordering, convert::Infallible};

use docwire_core::{
    compare::{compare, equal, same_class},
    document::Document,
    path::{FindValuesOpts, Path, find_values},
    value::Value,
};

use crate::expr::{BitsTest, CompiledRegex, ElemMatch, Expr, FieldOp, InItem, QueryVisitor, TypeMatch};

/// Evaluates an [`Expr`] against one document.
#[derive(Debug, Clone, Copy)]
pub struct DocumentEvaluator<'a> {
    doc: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(doc: &'a Document) -> Self {
        Self { doc }
    }

    fn field_matches(&self, path: Option<&Path>, op: &FieldOp) -> bool {
        match op {
            FieldOp::Not(inner) => !self.field_matches(path, inner),
            FieldOp::All(ops) => ops.iter().all(|op| self.field_matches(path, op)),
            _ => {
                let values = path
                    .map(|p| find_values(self.doc, p, FindValuesOpts::dive()))
                    .unwrap_or_default();

                if values.is_empty() {
                    return matches_missing(op);
                }

                values.into_iter().any(|value| value_matches(op, value, true))
            }
        }
    }
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = Infallible;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<bool, Infallible> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<bool, Infallible> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn visit_nor(&mut self, exprs: &[Expr]) -> Result<bool, Infallible> {
        Ok(!self.visit_or(exprs)?)
    }

    fn visit_field(&mut self, path: Option<&Path>, op: &FieldOp) -> Result<bool, Infallible> {
        Ok(self.field_matches(path, op))
    }
}

/// Whether the operator matches a field that does not exist.
fn matches_missing(op: &FieldOp) -> bool {
    match op {
        FieldOp::Eq(Value::Null) | FieldOp::Gte(Value::Null) | FieldOp::Lte(Value::Null) => true,
        FieldOp::Exists(exists) => !exists,
        FieldOp::In(items) => items.iter().any(|item| matches!(item, InItem::Value(Value::Null))),
        FieldOp::Not(inner) => !matches_missing(inner),
        FieldOp::All(ops) => ops.iter().all(matches_missing),
        _ => false,
    }
}

/// Operators whose argument describes the whole array rather than an element.
fn applies_to_array(op: &FieldOp) -> bool {
    matches!(
        op,
        FieldOp::Size(_) | FieldOp::AllOf(_) | FieldOp::ElemMatch(_) | FieldOp::Exists(_)
    )
}

/// Matches one resolved value. With `dive`, array values also match when any
/// element matches.
pub(crate) fn value_matches(op: &FieldOp, value: &Value, dive: bool) -> bool {
    match op {
        FieldOp::Not(inner) => !value_matches(inner, value, dive),
        FieldOp::All(ops) => ops.iter().all(|op| value_matches(op, value, dive)),
        _ => {
            if scalar_matches(op, value) {
                return true;
            }
            match value {
                Value::Array(arr) if dive && !applies_to_array(op) => {
                    arr.iter().any(|item| scalar_matches(op, item))
                }
                _ => false,
            }
        }
    }
}

fn scalar_matches(op: &FieldOp, value: &Value) -> bool {
    match op {
        FieldOp::Eq(expected) => equal(value, expected),
        FieldOp::Gt(bound) => ordered(value, bound, |o| o == Ordering::Greater),
        FieldOp::Gte(bound) => ordered(value, bound, |o| o != Ordering::Less),
        FieldOp::Lt(bound) => ordered(value, bound, |o| o == Ordering::Less),
        FieldOp::Lte(bound) => ordered(value, bound, |o| o != Ordering::Greater),
        FieldOp::In(items) => items.iter().any(|item| item_matches(item, value)),
        FieldOp::Exists(exists) => *exists,
        FieldOp::Type(types) => types.iter().any(|t| match t {
            TypeMatch::Code(code) => value.type_code() == *code,
            TypeMatch::Number => value.is_number(),
        }),
        FieldOp::Regex(re) => regex_matches(re, value),
        FieldOp::Size(size) => value.as_array().is_some_and(|arr| arr.len() == *size),
        FieldOp::AllOf(items) => {
            !items.is_empty()
                && items.iter().all(|item| {
                    item_matches(item, value)
                        || value.as_array().is_some_and(|arr| arr.iter().any(|v| item_matches(item, v)))
                })
        }
        FieldOp::ElemMatch(elem) => value.as_array().is_some_and(|arr| {
            arr.iter().any(|item| match elem.as_ref() {
                ElemMatch::Ops(op) => value_matches(op, item, false),
                ElemMatch::Filter(filter) => item.as_document().is_some_and(|doc| filter.matches(doc)),
            })
        }),
        FieldOp::Mod { divisor, remainder } => {
            mod_operand(value).is_some_and(|n| n.wrapping_rem(*divisor) == *remainder)
        }
        FieldOp::Bits { test, positions } => bits_match(*test, positions, value),
        FieldOp::Not(_) | FieldOp::All(_) => value_matches(op, value, false),
    }
}

fn ordered(value: &Value, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    same_class(value, bound) && accept(compare(value, bound))
}

fn item_matches(item: &InItem, value: &Value) -> bool {
    match item {
        InItem::Value(expected) => equal(value, expected),
        InItem::Regex(re) => regex_matches(re, value),
    }
}

fn regex_matches(re: &CompiledRegex, value: &Value) -> bool {
    match value {
        Value::String(s) => re.regex.is_match(s),
        Value::Regex(other) => other.pattern == re.pattern && other.options == re.options,
        _ => false,
    }
}

/// The integer a field value contributes to `$mod`. Fractions are truncated;
/// NaN and infinities never match.
fn mod_operand(value: &Value) -> Option<i64> {
    match value {
        Value::Int32(i) => Some(i64::from(*i)),
        Value::Int64(i) => Some(*i),
        Value::Double(f) if f.is_finite() => Some(f.trunc() as i64),
        _ => None,
    }
}

fn bits_match(test: BitsTest, positions: &[u32], value: &Value) -> bool {
    let bit: Box<dyn Fn(u32) -> bool + '_> = match value {
        Value::Int32(_) | Value::Int64(_) | Value::Double(_) => {
            let Some(n) = value.to_whole_i64() else {
                return false;
            };
            // Bits past 63 repeat the sign bit.
            Box::new(move |pos| if pos >= 64 { n < 0 } else { n & (1_i64 << pos) != 0 })
        }
        Value::Binary(bin) => Box::new(move |pos| {
            bin.bytes
                .get((pos / 8) as usize)
                .is_some_and(|byte| byte & (1 << (pos % 8)) != 0)
        }),
        _ => return false,
    };

    match test {
        BitsTest::AllSet => positions.iter().all(|&p| bit(p)),
        BitsTest::AllClear => positions.iter().all(|&p| !bit(p)),
        BitsTest::AnySet => positions.iter().any(|&p| bit(p)),
        BitsTest::AnyClear => positions.iter().any(|&p| !bit(p)),
    }
}

#[cfg(test)]
mod tests {
    use bson::{Binary, doc, spec::BinarySubtype};

    use super::*;
    use crate::filter::{Filter, default_operators};

    fn d(bson: bson::Document) -> Document {
        Document::try_from(bson).unwrap()
    }

    fn matches(filter: bson::Document, doc: bson::Document) -> bool {
        let filter = Filter::compile(&d(filter), &default_operators().unwrap()).unwrap();
        filter.matches(&d(doc))
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(matches(doc! {}, doc! {}));
        assert!(matches(doc! {}, doc! { "a": [1, { "b": null }] }));
    }

    #[test]
    fn equality_dives_into_arrays() {
        assert!(matches(doc! { "a": 2 }, doc! { "a": [1, 2, 3] }));
        assert!(matches(doc! { "a": [1, 2] }, doc! { "a": [1, 2] }));
        assert!(!matches(doc! { "a": [1] }, doc! { "a": [1, 2] }));
        assert!(matches(doc! { "a.b": 1 }, doc! { "a": [{ "b": 2 }, { "b": 1 }] }));
        assert!(matches(doc! { "a.1": 5 }, doc! { "a": [4, 5] }));
        assert!(matches(doc! { "a": 1 }, doc! { "a": 1.0 }));
        assert!(matches(doc! { "v": 0 }, doc! { "v": -0.0 }));
    }

    #[test]
    fn null_matches_missing() {
        assert!(matches(doc! { "a": null }, doc! { "b": 1 }));
        assert!(matches(doc! { "a": null }, doc! { "a": null }));
        assert!(!matches(doc! { "a": { "$ne": null } }, doc! { "b": 1 }));
        assert!(matches(doc! { "a": { "$exists": false } }, doc! { "b": 1 }));
        assert!(!matches(doc! { "a": { "$exists": true } }, doc! { "b": 1 }));
        assert!(matches(doc! { "a": { "$in": [null, 5] } }, doc! {}));
    }

    #[test]
    fn ranges_stay_within_a_type_class() {
        assert!(matches(doc! { "a": { "$gt": 1 } }, doc! { "a": 1.5 }));
        assert!(!matches(doc! { "a": { "$gt": 1 } }, doc! { "a": "2" }));
        assert!(matches(doc! { "a": { "$gt": 1, "$lt": 3 } }, doc! { "a": 2_i64 }));
        assert!(!matches(doc! { "a": { "$gt": 1, "$lt": 3 } }, doc! { "a": 3 }));
        assert!(matches(doc! { "a": { "$gte": "b" } }, doc! { "a": ["a", "c"] }));
    }

    #[test]
    fn negations_cover_every_element() {
        assert!(!matches(doc! { "a": { "$ne": 1 } }, doc! { "a": [1, 2] }));
        assert!(matches(doc! { "a": { "$ne": 3 } }, doc! { "a": [1, 2] }));
        assert!(!matches(doc! { "a.b": { "$ne": 1 } }, doc! { "a": [{ "b": 1 }, { "b": 2 }] }));
        assert!(matches(doc! { "a": { "$nin": [3, 4] } }, doc! { "a": 1 }));
        assert!(!matches(doc! { "a": { "$not": { "$gt": 1 } } }, doc! { "a": 2 }));
        assert!(matches(doc! { "a": { "$not": { "$gt": 1 } } }, doc! {}));
    }

    #[test]
    fn logical_operators() {
        let d1 = doc! { "a": 1, "b": 2 };
        assert!(matches(doc! { "$or": [{ "a": 5 }, { "b": 2 }] }, d1.clone()));
        assert!(!matches(doc! { "$and": [{ "a": 1 }, { "b": 3 }] }, d1.clone()));
        assert!(matches(doc! { "$nor": [{ "a": 5 }, { "b": 3 }] }, d1.clone()));
        assert!(!matches(doc! { "$nor": [{ "a": 1 }] }, d1));
    }

    #[test]
    fn mod_matches_negative_zero_but_not_strings() {
        let filter = doc! { "v": { "$mod": [5, 0] } };
        assert!(matches(filter.clone(), doc! { "_id": 1, "v": 0 }));
        assert!(matches(filter.clone(), doc! { "_id": 2, "v": -0.0 }));
        assert!(!matches(filter.clone(), doc! { "_id": 3, "v": "1" }));
        assert!(matches(filter.clone(), doc! { "v": 10.9 }));
        assert!(!matches(filter, doc! { "v": f64::NAN }));
        assert!(matches(doc! { "v": { "$mod": [-3, -1] } }, doc! { "v": -7_i64 }));
    }

    #[test]
    fn regex_requires_strings() {
        let re = bson::Regex { pattern: "^ab".try_into().unwrap(), options: "i".try_into().unwrap() };
        assert!(matches(doc! { "a": re.clone() }, doc! { "a": "ABc" }));
        assert!(!matches(doc! { "a": re.clone() }, doc! { "a": 1 }));
        assert!(matches(doc! { "a": re }, doc! { "a": ["x", "abz"] }));
        assert!(matches(doc! { "a": { "$regex": "b$", "$options": "" } }, doc! { "a": "ab" }));
        assert!(matches(doc! { "a": { "$in": [bson::Regex { pattern: "z".try_into().unwrap(), options: "".try_into().unwrap() }] } }, doc! { "a": "xyz" }));
    }

    #[test]
    fn array_level_operators() {
        assert!(matches(doc! { "a": { "$size": 2 } }, doc! { "a": [1, [2, 3]] }));
        assert!(!matches(doc! { "a": { "$size": 2 } }, doc! { "a": [[1, 2]] }));
        assert!(matches(doc! { "a": { "$all": [1, 3] } }, doc! { "a": [3, 2, 1] }));
        assert!(!matches(doc! { "a": { "$all": [1, 4] } }, doc! { "a": [3, 2, 1] }));
        assert!(!matches(doc! { "a": { "$all": [] } }, doc! { "a": [1] }));
        assert!(matches(doc! { "a": { "$elemMatch": { "$gt": 1, "$lt": 3 } } }, doc! { "a": [0, 2, 5] }));
        assert!(!matches(doc! { "a": { "$elemMatch": { "$gt": 1, "$lt": 3 } } }, doc! { "a": [0, 5] }));
        assert!(matches(
            doc! { "a": { "$elemMatch": { "b": 1, "c": 2 } } },
            doc! { "a": [{ "b": 1, "c": 1 }, { "b": 1, "c": 2 }] }
        ));
        assert!(!matches(doc! { "a": { "$elemMatch": { "b": 1 } } }, doc! { "a": { "b": 1 } }));
    }

    #[test]
    fn type_matching() {
        assert!(matches(doc! { "a": { "$type": "number" } }, doc! { "a": 1_i64 }));
        assert!(matches(doc! { "a": { "$type": ["string", 16] } }, doc! { "a": 3 }));
        assert!(matches(doc! { "a": { "$type": "array" } }, doc! { "a": [] }));
        assert!(matches(doc! { "a": { "$type": "string" } }, doc! { "a": [1, "x"] }));
        assert!(!matches(doc! { "a": { "$type": "decimal" } }, doc! { "a": 1.5 }));
    }

    #[test]
    fn bit_tests() {
        // 0b1010
        let doc10 = doc! { "a": 10 };
        assert!(matches(doc! { "a": { "$bitsAllSet": [1, 3] } }, doc10.clone()));
        assert!(matches(doc! { "a": { "$bitsAllSet": 10 } }, doc10.clone()));
        assert!(!matches(doc! { "a": { "$bitsAllSet": [0, 1] } }, doc10.clone()));
        assert!(matches(doc! { "a": { "$bitsAllClear": [0, 2] } }, doc10.clone()));
        assert!(matches(doc! { "a": { "$bitsAnySet": [0, 1] } }, doc10.clone()));
        assert!(matches(doc! { "a": { "$bitsAnyClear": [1, 2] } }, doc10.clone()));
        assert!(matches(doc! { "a": { "$bitsAllSet": [] } }, doc10.clone()));
        assert!(!matches(doc! { "a": { "$bitsAnySet": [] } }, doc10));

        assert!(matches(doc! { "a": { "$bitsAllSet": [100] } }, doc! { "a": -1 }));
        assert!(!matches(doc! { "a": { "$bitsAllSet": [1] } }, doc! { "a": 2.5 }));
        assert!(!matches(doc! { "a": { "$bitsAllSet": [1] } }, doc! { "a": "2" }));

        let bin = Binary { subtype: BinarySubtype::Generic, bytes: vec![0b0000_0010, 0b1000_0000] };
        assert!(matches(doc! { "a": { "$bitsAllSet": [1, 15] } }, doc! { "a": bin.clone() }));
        assert!(matches(doc! { "a": { "$bitsAllClear": [40] } }, doc! { "a": bin.clone() }));
        let mask = Binary { subtype: BinarySubtype::Generic, bytes: vec![0b0000_0010] };
        assert!(matches(doc! { "a": { "$bitsAllSet": mask } }, doc! { "a": 2 }));
    }
}
