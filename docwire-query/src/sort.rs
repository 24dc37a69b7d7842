//! Sort specifications.
//!
//! Keys are applied in the order given, each ascending (`1`) or descending
//! (`-1`). Missing fields sort as null. An array field sorts by its smallest
//! element when ascending and by its largest when descending; an empty array
//! sorts as null.

use std::cmp::Ordering;

use docwire_core::{
    compare::compare,
    document::Document,
    error::{DocWireError, DocWireResult, ErrorCode},
    format::format_value,
    path::{FindValuesOpts, Path, find_values},
    value::Value,
};

/// A compiled sort specification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SortSpec {
    keys: Vec<(Path, bool)>,
}

impl SortSpec {
    /// Compiles a sort document such as `{a: 1, "b.c": -1}`.
    ///
    /// # Errors
    ///
    /// Returns `SortBadValue` for non-numeric directions, `SortBadOrder` for
    /// numbers other than 1 and -1, and `BadValue` for empty paths.
    pub fn compile(spec: &Document) -> DocWireResult<Self> {
        let mut keys = Vec::with_capacity(spec.len());

        for (key, value) in spec.iter() {
            if !value.is_number() {
                return Err(DocWireError::command(
                    ErrorCode::SortBadValue,
                    format!("Illegal key in $sort specification: {key}: {}", format_value(value)),
                ));
            }

            let descending = match value.to_whole_i64() {
                Some(1) => false,
                Some(-1) => true,
                _ => {
                    return Err(DocWireError::command(
                        ErrorCode::SortBadOrder,
                        "$sort key ordering must be 1 (for ascending) or -1 (for descending)",
                    ));
                }
            };

            if key.starts_with('$') {
                return Err(DocWireError::NotImplemented(format!("sort key {key} is not supported")));
            }

            let path = Path::parse(key)
                .map_err(|_| DocWireError::bad_value("FieldPath field names may not be empty strings."))?;
            keys.push((path, descending));
        }

        Ok(Self { keys })
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Extracts the sort key values of a document, one per sort field.
    pub fn key_values(&self, doc: &Document) -> Vec<Value> {
        self.keys.iter().map(|(path, descending)| sort_value(doc, path, *descending)).collect()
    }

    /// Compares two sets of key values produced by [`SortSpec::key_values`].
    pub fn compare_keys(&self, a: &[Value], b: &[Value]) -> Ordering {
        for ((x, y), (_, descending)) in a.iter().zip(b).zip(&self.keys) {
            let ord = compare(x, y);
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Compares two documents.
    pub fn compare_documents(&self, a: &Document, b: &Document) -> Ordering {
        self.compare_keys(&self.key_values(a), &self.key_values(b))
    }

    /// Sorts documents in place. Equal documents keep their relative order.
    pub fn sort(&self, docs: &mut Vec<Document>) {
        if self.is_empty() {
            return;
        }

        let mut keyed: Vec<(Vec<Value>, Document)> = docs.drain(..).map(|doc| (self.key_values(&doc), doc)).collect();
        keyed.sort_by(|(a, _), (b, _)| self.compare_keys(a, b));
        docs.extend(keyed.into_iter().map(|(_, doc)| doc));
    }
}

fn sort_value(doc: &Document, path: &Path, descending: bool) -> Value {
    let candidates = find_values(doc, path, FindValuesOpts::dive()).into_iter().flat_map(|value| match value {
        Value::Array(arr) => arr.iter().collect::<Vec<_>>(),
        other => vec![other],
    });

    let best = if descending {
        candidates.max_by(|a, b| compare(a, b))
    } else {
        candidates.min_by(|a, b| compare(a, b))
    };

    best.cloned().unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    fn d(bson: bson::Document) -> Document {
        Document::try_from(bson).unwrap()
    }

    fn ids(docs: &[Document]) -> Vec<i32> {
        docs.iter().map(|doc| doc["_id"].as_i32().unwrap()).collect()
    }

    #[test]
    fn bad_specs() {
        let err = SortSpec::compile(&d(doc! { "a": 2 })).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SortBadOrder);

        let err = SortSpec::compile(&d(doc! { "a": "asc" })).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SortBadValue);
        assert_eq!(err.to_string(), "Illegal key in $sort specification: a: \"asc\"");

        assert!(SortSpec::compile(&d(doc! { "a": -1.0 })).is_ok());
    }

    #[test]
    fn multi_key_stable_sort() {
        let mut docs = vec![
            d(doc! { "_id": 1, "a": 2, "b": 1 }),
            d(doc! { "_id": 2, "a": 1 }),
            d(doc! { "_id": 3, "a": 2, "b": 0 }),
            d(doc! { "_id": 4, "a": 1 }),
            d(doc! { "_id": 5, "a": "x" }),
        ];

        SortSpec::compile(&d(doc! { "a": 1, "b": -1 })).unwrap().sort(&mut docs);
        assert_eq!(ids(&docs), vec![2, 4, 1, 3, 5]);
    }

    #[test]
    fn missing_and_arrays() {
        let mut docs = vec![
            d(doc! { "_id": 1, "a": [5, 1] }),
            d(doc! { "_id": 2 }),
            d(doc! { "_id": 3, "a": 3 }),
            d(doc! { "_id": 4, "a": [] }),
        ];

        let asc = SortSpec::compile(&d(doc! { "a": 1 })).unwrap();
        asc.sort(&mut docs);
        assert_eq!(ids(&docs), vec![2, 4, 1, 3]);

        let desc = SortSpec::compile(&d(doc! { "a": -1 })).unwrap();
        desc.sort(&mut docs);
        assert_eq!(ids(&docs), vec![1, 3, 2, 4]);
    }
}
