//! Ordered documents and arrays.
//!
//! A [`Document`] keeps its keys in insertion order. Setting an existing key
//! replaces the value in place, so the first-seen position is kept. Documents
//! are plain values: cloning one produces an independent deep copy, and there
//! is no copy-on-write sharing between clones.
//!
//! # Example
//!
//! ```ignore
//! use docwire_core::document::Document;
//!
//! let mut doc = Document::new();
//! doc.set("b", 1);
//! doc.set("a", 2);
//! doc.set("b", 3);
//! assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["b", "a"]);
//! ```

use std::ops::Index;

use bson::oid::ObjectId;

use crate::{
    compare::equal,
    error::{DocWireResult, PathError, PathErrorKind, ValidationError},
    value::Value,
};

/// The most nulls [`Array::set`] inserts to reach an index past the end.
pub const MAX_ARRAY_PADDING: usize = 1_500_000;

/// An insertion-ordered mapping from string keys to [`Value`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { fields: Vec::with_capacity(capacity) }
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns a mutable reference to the value stored under `key`, if any.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    /// Sets `key` to `value`.
    ///
    /// An existing key keeps its position and has its value replaced; a new key
    /// is appended.
    ///
    /// # Returns
    ///
    /// The previous value under `key`, if there was one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();

        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((key, value));
                None
            }
        }
    }

    /// Removes `key` and returns its value. Missing keys are a no-op.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let position = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(position).1)
    }

    /// Returns the keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    /// Returns `(key, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the first key, if the document is not empty.
    pub fn first_key(&self) -> Option<&str> {
        self.fields.first().map(|(k, _)| k.as_str())
    }

    /// Makes sure the document has an `_id`.
    ///
    /// When `_id` is absent a fresh [`ObjectId`] is generated. In both cases
    /// `_id` is moved to the first position.
    pub fn ensure_id(&mut self) {
        let id = self.remove("_id").unwrap_or_else(|| Value::ObjectId(ObjectId::new()));
        self.fields.insert(0, ("_id".to_owned(), id));
    }

    /// Checks that the document can be handed to a storage engine.
    ///
    /// # Errors
    ///
    /// Returns an error if `_id` is missing or has an array or regex value, or
    /// if any key at any depth is empty, starts with `$` or contains `.`.
    pub fn validate_for_storage(&self) -> Result<(), ValidationError> {
        match self.get("_id") {
            None => return Err(ValidationError::MissingId),
            Some(id @ (Value::Array(_) | Value::Regex(_))) => {
                return Err(ValidationError::InvalidIdType(id.type_alias().to_owned()));
            }
            Some(_) => {}
        }

        validate_keys(self)
    }

    /// Converts the document into a `bson::Document` for the wire layer.
    ///
    /// # Errors
    ///
    /// Returns an error if a nested value cannot be represented in BSON.
    pub fn to_bson(&self) -> DocWireResult<bson::Document> {
        let mut out = bson::Document::new();
        for (k, v) in self.iter() {
            out.insert(k, v.to_bson()?);
        }
        Ok(out)
    }
}

fn validate_keys(doc: &Document) -> Result<(), ValidationError> {
    for (key, value) in doc.iter() {
        if key.is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        if key.starts_with('$') {
            return Err(ValidationError::DollarPrefixedKey(key.to_owned()));
        }
        if key.contains('.') {
            return Err(ValidationError::DottedKey(key.to_owned()));
        }
        validate_nested(value)?;
    }
    Ok(())
}

fn validate_nested(value: &Value) -> Result<(), ValidationError> {
    match value {
        Value::Document(doc) => validate_keys(doc),
        Value::Array(arr) => arr.iter().try_for_each(validate_nested),
        _ => Ok(()),
    }
}

impl Index<&str> for Document {
    type Output = Value;

    fn index(&self, key: &str) -> &Self::Output {
        static NULL: Value = Value::Null;
        self.get(key).unwrap_or(&NULL)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.set(k, v);
        }
        doc
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl TryFrom<bson::Document> for Document {
    type Error = ValidationError;

    fn try_from(doc: bson::Document) -> Result<Self, Self::Error> {
        let mut out = Document::with_capacity(doc.len());
        for (k, v) in doc {
            out.set(k, Value::try_from(v)?);
        }
        Ok(out)
    }
}

/// An ordered, zero-indexed sequence of [`Value`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Array {
    items: Vec<Value>,
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.items.get_mut(index)
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.items.push(value.into());
    }

    /// Replaces the element at `index`, padding with nulls when `index` is past the end.
    ///
    /// # Errors
    ///
    /// Returns an `IndexOutOfBound` path error if reaching `index` would take
    /// more than [`MAX_ARRAY_PADDING`] nulls.
    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> Result<(), PathError> {
        let len = self.items.len();
        if index >= len {
            if index - len > MAX_ARRAY_PADDING {
                return Err(PathError::new(
                    PathErrorKind::IndexOutOfBound,
                    format!("can't backfill more than {MAX_ARRAY_PADDING} elements"),
                ));
            }
            self.items.resize(index + 1, Value::Null);
        }
        self.items[index] = value.into();
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<Value> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    pub fn pop_first(&mut self) -> Option<Value> {
        self.remove(0)
    }

    pub fn pop_last(&mut self) -> Option<Value> {
        self.items.pop()
    }

    pub fn retain(&mut self, f: impl FnMut(&Value) -> bool) {
        self.items.retain(f);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns true if any element equals `value` under the canonical ordering.
    ///
    /// Unlike IEEE-754 equality, a NaN element matches a NaN `value`.
    pub fn contains(&self, value: &Value) -> bool {
        self.items.iter().any(|item| equal(item, value))
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.items
    }
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self {
        Self { items }
    }
}

impl<V: Into<Value>> FromIterator<V> for Array {
    fn from_iter<T: IntoIterator<Item = V>>(iter: T) -> Self {
        Self { items: iter.into_iter().map(Into::into).collect() }
    }
}

impl IntoIterator for Array {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Array {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_preserves_first_seen_order() {
        let mut doc = Document::new();
        doc.set("b", 1);
        doc.set("a", 2);
        assert_eq!(doc.set("b", 3), Some(Value::Int32(1)));

        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(doc.get("b"), Some(&Value::Int32(3)));
    }

    #[test]
    fn clones_are_independent() {
        let mut inner = Document::new();
        inner.set("x", 1);
        let mut doc = Document::new();
        doc.set("inner", inner);

        let mut copy = doc.clone();
        copy.get_mut("inner").and_then(Value::as_document_mut).unwrap().set("x", 2);

        assert_eq!(doc["inner"].as_document().unwrap().get("x"), Some(&Value::Int32(1)));
    }

    #[test]
    fn ensure_id_generates_and_moves_first() {
        let mut doc = Document::new();
        doc.set("a", 1);
        doc.ensure_id();
        assert_eq!(doc.first_key(), Some("_id"));
        assert!(matches!(doc["_id"], Value::ObjectId(_)));

        let mut doc = Document::new();
        doc.set("a", 1);
        doc.set("_id", 7);
        doc.ensure_id();
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["_id", "a"]);
        assert_eq!(doc["_id"], Value::Int32(7));
    }

    #[test]
    fn storage_validation() {
        let mut doc = Document::new();
        doc.set("a", 1);
        assert_eq!(doc.validate_for_storage(), Err(ValidationError::MissingId));

        doc.set("_id", 1);
        assert_eq!(doc.validate_for_storage(), Ok(()));

        let mut nested = Document::new();
        nested.set("$bad", 1);
        doc.set("n", Array::from(vec![Value::Document(nested)]));
        assert_eq!(doc.validate_for_storage(), Err(ValidationError::DollarPrefixedKey("$bad".into())));

        let mut doc = Document::new();
        doc.set("_id", Array::new());
        assert_eq!(doc.validate_for_storage(), Err(ValidationError::InvalidIdType("array".into())));
    }

    #[test]
    fn array_contains_matches_nan() {
        let arr: Array = vec![Value::Double(f64::NAN), Value::Int32(1)].into();
        assert!(arr.contains(&Value::Double(f64::NAN)));
        assert!(arr.contains(&Value::Int64(1)));
        assert!(arr.contains(&Value::Double(1.0)));
        assert!(!arr.contains(&Value::from("1")));
    }

    #[test]
    fn array_set_pads_with_null() {
        let mut arr = Array::new();
        arr.set(2, 5).unwrap();
        assert_eq!(arr.into_vec(), vec![Value::Null, Value::Null, Value::Int32(5)]);
    }

    #[test]
    fn array_set_bounds_padding() {
        let mut arr = Array::new();
        let err = arr.set(usize::MAX, 1).unwrap_err();
        assert_eq!(err.kind, PathErrorKind::IndexOutOfBound);
        assert_eq!(arr.set(MAX_ARRAY_PADDING + 1, 1).unwrap_err().kind, PathErrorKind::IndexOutOfBound);
        assert!(arr.is_empty());
    }
}
