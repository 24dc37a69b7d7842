//! Collection storage.
//!
//! A collection keeps documents in insertion order, keyed by a sequence
//! number that only ever grows, plus an index from `_id` to sequence number.
//! Tail iterators remember the last sequence number they yielded and resume
//! after it, so eviction and deletion never make them skip or repeat
//! documents.

use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::Arc,
};

use docwire_core::{
    backend::CappedParams,
    compare::ValueKey,
    document::{Array, Document},
    error::{BackendError, BackendErrorCode, DocWireError, DocWireResult},
    format::format_value,
    value::Value,
};
use mea::rwlock::RwLock;
use tracing::debug;

pub(crate) type SharedCollection = Arc<RwLock<CollectionData>>;

/// Databases by name, each holding its collections by name.
pub(crate) type Databases = HashMap<String, BTreeMap<String, SharedCollection>>;

/// The documents of one collection.
#[derive(Debug, Default)]
pub(crate) struct CollectionData {
    capped: Option<CappedParams>,
    docs: BTreeMap<u64, Document>,
    ids: BTreeMap<ValueKey, u64>,
    next_seq: u64,
    size: usize,
}

impl CollectionData {
    pub(crate) fn new(capped: Option<CappedParams>) -> Self {
        Self { capped, ..Default::default() }
    }

    pub(crate) fn capped(&self) -> Option<CappedParams> {
        self.capped
    }

    pub(crate) fn len(&self) -> usize {
        self.docs.len()
    }

    /// Total encoded size of the stored documents in bytes.
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Returns every document in insertion order.
    pub(crate) fn snapshot(&self) -> Vec<Document> {
        self.docs.values().cloned().collect()
    }

    pub(crate) fn get_by_id(&self, id: &Value) -> Option<&Document> {
        let seq = self.ids.get(&ValueKey(id.clone()))?;
        self.docs.get(seq)
    }

    /// Returns the first document stored after sequence number `after`.
    pub(crate) fn next_after(&self, after: Option<u64>) -> Option<(u64, &Document)> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        self.docs.range((lower, Bound::Unbounded)).next().map(|(seq, doc)| (*seq, doc))
    }

    /// Appends a document.
    ///
    /// # Errors
    ///
    /// Returns a `DuplicateKey` backend error if the `_id` is already stored.
    pub(crate) fn insert(&mut self, namespace: &str, doc: Document) -> DocWireResult<()> {
        let id = document_id(&doc)?;
        let key = ValueKey(id.clone());

        if self.ids.contains_key(&key) {
            debug!(namespace, id = %format_value(&id), "duplicate key on insert");
            return Err(BackendError::new(
                BackendErrorCode::DuplicateKey,
                format!(
                    "E11000 duplicate key error collection: {namespace} index: _id_ dup key: {{ _id: {} }}",
                    format_value(&id)
                ),
            )
            .into());
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.size += document_size(&doc);
        self.ids.insert(key, seq);
        self.docs.insert(seq, doc);

        self.evict(namespace);
        Ok(())
    }

    /// Replaces the stored document with the same `_id`. Returns false if there is none.
    pub(crate) fn replace(&mut self, namespace: &str, doc: Document) -> DocWireResult<bool> {
        let id = document_id(&doc)?;
        let Some(seq) = self.ids.get(&ValueKey(id)).copied() else {
            return Ok(false);
        };

        let new_size = document_size(&doc);
        if let Some(old) = self.docs.insert(seq, doc) {
            self.size = self.size.saturating_sub(document_size(&old));
        }
        self.size += new_size;

        self.evict(namespace);
        Ok(true)
    }

    /// Removes the document with the given `_id`. Returns false if there is none.
    pub(crate) fn remove(&mut self, id: &Value) -> bool {
        let Some(seq) = self.ids.remove(&ValueKey(id.clone())) else {
            return false;
        };
        if let Some(old) = self.docs.remove(&seq) {
            self.size = self.size.saturating_sub(document_size(&old));
        }
        true
    }

    /// Drops the oldest documents while a capped collection is over its limits.
    /// The newest document is always kept.
    fn evict(&mut self, namespace: &str) {
        let Some(capped) = self.capped else {
            return;
        };

        let max_size = usize::try_from(capped.max_size).unwrap_or(usize::MAX);
        let max_docs = capped
            .max_documents
            .filter(|n| *n > 0)
            .map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));

        let mut evicted = 0;
        while self.docs.len() > 1 && (self.docs.len() > max_docs || self.size > max_size) {
            let Some((_, doc)) = self.docs.pop_first() else {
                break;
            };
            if let Some(id) = doc.get("_id") {
                self.ids.remove(&ValueKey(id.clone()));
            }
            self.size = self.size.saturating_sub(document_size(&doc));
            evicted += 1;
        }

        if evicted > 0 {
            debug!(namespace, evicted, remaining = self.docs.len(), "evicted documents from capped collection");
        }
    }
}

fn document_id(doc: &Document) -> DocWireResult<Value> {
    doc.get("_id")
        .cloned()
        .ok_or_else(|| DocWireError::Internal("document reached storage without an _id".into()))
}

/// Encoded BSON size of a document.
pub(crate) fn document_size(doc: &Document) -> usize {
    let fields: usize = doc.iter().map(|(key, value)| element_size(key.len(), value)).sum();
    4 + fields + 1
}

fn array_size(arr: &Array) -> usize {
    let fields: usize = arr
        .iter()
        .enumerate()
        .map(|(i, value)| element_size(i.to_string().len(), value))
        .sum();
    4 + fields + 1
}

fn element_size(key_len: usize, value: &Value) -> usize {
    1 + key_len + 1 + value_size(value)
}

fn value_size(value: &Value) -> usize {
    match value {
        Value::Double(_) | Value::DateTime(_) | Value::Timestamp(_) | Value::Int64(_) => 8,
        Value::String(s) => 4 + s.len() + 1,
        Value::Document(doc) => document_size(doc),
        Value::Array(arr) => array_size(arr),
        Value::Binary(bin) => 4 + 1 + bin.bytes.len(),
        Value::ObjectId(_) => 12,
        Value::Boolean(_) => 1,
        Value::Null => 0,
        Value::Regex(re) => re.pattern.len() + 1 + re.options.len() + 1,
        Value::Int32(_) => 4,
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    fn d(bson: bson::Document) -> Document {
        Document::try_from(bson).unwrap()
    }

    #[test]
    fn sizes_match_bson_encoding() {
        assert_eq!(document_size(&Document::new()), 5);
        // 4 + (1 + "_id\0" + 4) + 1
        assert_eq!(document_size(&d(doc! { "_id": 1 })), 14);
        // 4 + (1 + "s\0" + 4 + "abc\0") + 1
        assert_eq!(document_size(&d(doc! { "s": "abc" })), 17);
        // 4 + (1 + "a\0" + [4 + (1 + "0\0" + 8) + 1]) + 1
        assert_eq!(document_size(&d(doc! { "a": [1_i64] })), 24);
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut data = CollectionData::new(None);
        data.insert("db.c", d(doc! { "_id": 1 })).unwrap();

        let err = data.insert("db.c", d(doc! { "_id": 1.0, "x": 1 })).unwrap_err();
        assert_eq!(
            err.to_string(),
            "E11000 duplicate key error collection: db.c index: _id_ dup key: { _id: 1.0 }"
        );
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn capped_by_document_count() {
        let mut data = CollectionData::new(Some(CappedParams { max_size: 1 << 20, max_documents: Some(3) }));
        for i in 0..5 {
            data.insert("db.c", d(doc! { "_id": i })).unwrap();
        }

        let ids: Vec<i32> = data.snapshot().iter().map(|doc| doc["_id"].as_i32().unwrap()).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert!(data.get_by_id(&Value::Int32(0)).is_none());
        assert_eq!(data.size(), 3 * 14);
    }

    #[test]
    fn capped_by_size() {
        let mut data = CollectionData::new(Some(CappedParams { max_size: 30, max_documents: None }));
        for i in 0..4 {
            data.insert("db.c", d(doc! { "_id": i })).unwrap();
        }
        assert_eq!(data.len(), 2);
        assert!(data.size() <= 30);
    }

    #[test]
    fn next_after_skips_removed() {
        let mut data = CollectionData::new(None);
        for i in 0..3 {
            data.insert("db.c", d(doc! { "_id": i })).unwrap();
        }
        assert!(data.remove(&Value::Int32(1)));
        assert!(!data.remove(&Value::Int32(1)));

        let (seq, first) = data.next_after(None).unwrap();
        assert_eq!(first["_id"], Value::Int32(0));
        let (_, second) = data.next_after(Some(seq)).unwrap();
        assert_eq!(second["_id"], Value::Int32(2));
    }
}
