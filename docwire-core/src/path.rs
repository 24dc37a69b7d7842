//! Dotted field paths and path-based document access.
//!
//! A [`Path`] is an immutable, non-empty sequence of non-empty segments such as
//! `a.b.0.c`. Invalid paths are rejected when they are built, so every method
//! that takes a `&Path` can rely on at least one segment being present.
//!
//! Path access comes in two flavours:
//!
//! - Exact access ([`Document::get_by_path`] and friends) treats a segment as a
//!   key on documents and as an index on arrays.
//! - [`find_values`] collects every value reachable through the path, and can
//!   optionally dive into arrays of documents.

use std::{fmt, str::FromStr};

use crate::{
    document::{Array, Document},
    error::{PathError, PathErrorKind},
    format::format_value,
    value::Value,
};

/// A validated dotted path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// Builds a path from its segments.
    ///
    /// # Errors
    ///
    /// Returns [`PathErrorKind::EmptyElement`] if there are no segments or any
    /// segment is empty.
    pub fn new<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();

        if segments.is_empty() {
            return Err(PathError::new(PathErrorKind::EmptyElement, "path must not be empty"));
        }
        if segments.iter().any(String::is_empty) {
            return Err(PathError::new(PathErrorKind::EmptyElement, "path element must not be empty"));
        }

        Ok(Self { segments })
    }

    /// Parses a dotted path such as `a.b.0`.
    pub fn parse(s: &str) -> Result<Self, PathError> {
        Self::new(s.split('.'))
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; kept for symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the first segment.
    pub fn prefix(&self) -> &str {
        &self.segments[0]
    }

    /// Returns the last segment.
    pub fn suffix(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    /// Returns the path without its last segment, or `None` for a single segment path.
    pub fn trim_suffix(&self) -> Option<Path> {
        (self.len() > 1).then(|| Path { segments: self.segments[..self.len() - 1].to_vec() })
    }

    /// Returns the path without its first segment, or `None` for a single segment path.
    pub fn trim_prefix(&self) -> Option<Path> {
        (self.len() > 1).then(|| Path { segments: self.segments[1..].to_vec() })
    }

    /// Returns a new path with `segment` appended.
    pub fn append(&self, segment: impl Into<String>) -> Result<Path, PathError> {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Path::new(segments)
    }

    /// Returns true if `self` is a prefix of `other` or the other way around.
    ///
    /// Two update operators touching such paths conflict.
    pub fn overlaps(&self, other: &Path) -> bool {
        self.segments.iter().zip(other.segments.iter()).all(|(a, b)| a == b)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

fn key_not_found(key: &str) -> PathError {
    PathError::new(PathErrorKind::KeyNotFound, format!("key not found: {key}"))
}

fn index_lookup<'a>(arr: &'a Array, segment: &str) -> Result<&'a Value, PathError> {
    let index: i64 = segment
        .parse()
        .map_err(|_| PathError::new(PathErrorKind::ArrayInvalidIndex, format!("invalid array index: {segment}")))?;

    usize::try_from(index)
        .ok()
        .and_then(|i| arr.get(i))
        .ok_or_else(|| PathError::new(PathErrorKind::IndexOutOfBound, format!("index {index} is out of bounds")))
}

fn cannot_access(value: &Value, segment: &str) -> PathError {
    PathError::new(
        PathErrorKind::CannotAccess,
        format!("can't access {} by path \"{segment}\"", value.type_alias()),
    )
}

fn cannot_create(field: &str, parent: &str, value: &Value) -> PathError {
    PathError::new(
        PathErrorKind::CannotCreateField,
        format!("Cannot create field '{field}' in element {{{parent}: {}}}", format_value(value)),
    )
}

impl Document {
    /// Returns the value at `path` using exact key and index access.
    ///
    /// # Errors
    ///
    /// Returns a [`PathError`] describing the first segment that could not be
    /// resolved. Missing intermediate segments are errors, never panics.
    pub fn get_by_path(&self, path: &Path) -> Result<&Value, PathError> {
        let (first, rest) = split(path);
        let mut current = self.get(first).ok_or_else(|| key_not_found(first))?;

        for segment in rest {
            current = match current {
                Value::Document(doc) => doc.get(segment).ok_or_else(|| key_not_found(segment))?,
                Value::Array(arr) => index_lookup(arr, segment)?,
                other => return Err(cannot_access(other, segment)),
            };
        }

        Ok(current)
    }

    /// Mutable counterpart of [`Document::get_by_path`].
    pub fn get_by_path_mut(&mut self, path: &Path) -> Result<&mut Value, PathError> {
        let (first, rest) = split(path);
        let mut current = self.get_mut(first).ok_or_else(|| key_not_found(first))?;

        for segment in rest {
            current = match current {
                Value::Document(doc) => doc.get_mut(segment).ok_or_else(|| key_not_found(segment))?,
                Value::Array(arr) => {
                    let index = parse_index(segment).ok_or_else(|| {
                        PathError::new(PathErrorKind::ArrayInvalidIndex, format!("invalid array index: {segment}"))
                    })?;
                    arr.get_mut(index).ok_or_else(|| {
                        PathError::new(PathErrorKind::IndexOutOfBound, format!("index {index} is out of bounds"))
                    })?
                }
                other => return Err(cannot_access(other, segment)),
            };
        }

        Ok(current)
    }

    /// Returns true if `path` resolves to a value.
    pub fn has_by_path(&self, path: &Path) -> bool {
        self.get_by_path(path).is_ok()
    }

    /// Removes the value at `path`.
    ///
    /// A path that does not resolve is a no-op. Removing an array element
    /// shifts the following elements down.
    pub fn remove_by_path(&mut self, path: &Path) -> Option<Value> {
        let (first, rest) = split(path);
        if rest.is_empty() {
            return self.remove(first);
        }
        remove_in_value(self.get_mut(first)?, rest)
    }

    /// Creates every intermediate node of `path` that does not exist yet.
    ///
    /// Missing document keys become empty documents. An array segment must be
    /// a non-negative integer; arrays are padded with nulls up to that index.
    /// The last segment is not created.
    ///
    /// # Errors
    ///
    /// Returns [`PathErrorKind::CannotCreateField`] when an intermediate node is
    /// a scalar or an array segment is not a valid index.
    pub fn insert_by_path(&mut self, path: &Path) -> Result<(), PathError> {
        set_in_document(self, path.segments(), None)
    }

    /// Sets the value at `path`, creating intermediate nodes as
    /// [`Document::insert_by_path`] does.
    pub fn set_by_path(&mut self, path: &Path, value: impl Into<Value>) -> Result<(), PathError> {
        set_in_document(self, path.segments(), Some(value.into()))
    }
}

fn split(path: &Path) -> (&str, &[String]) {
    let segments = path.segments();
    (&segments[0], &segments[1..])
}

fn remove_in_value(node: &mut Value, segments: &[String]) -> Option<Value> {
    let (head, rest) = segments.split_first()?;

    match node {
        Value::Document(doc) if rest.is_empty() => doc.remove(head),
        Value::Document(doc) => remove_in_value(doc.get_mut(head)?, rest),
        Value::Array(arr) => {
            let index = parse_index(head)?;
            if rest.is_empty() {
                arr.remove(index)
            } else {
                remove_in_value(arr.get_mut(index)?, rest)
            }
        }
        _ => None,
    }
}

fn set_in_document(doc: &mut Document, segments: &[String], value: Option<Value>) -> Result<(), PathError> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };

    if rest.is_empty() {
        if let Some(value) = value {
            doc.set(head.clone(), value);
        }
        return Ok(());
    }

    if !doc.contains_key(head) {
        doc.set(head.clone(), Document::new());
    }
    let child = doc.get_mut(head).ok_or_else(|| key_not_found(head))?;

    set_in_value(child, head, rest, value)
}

fn set_in_value(node: &mut Value, name: &str, segments: &[String], value: Option<Value>) -> Result<(), PathError> {
    match node {
        Value::Document(doc) => set_in_document(doc, segments, value),
        Value::Array(arr) => set_in_array(arr, name, segments, value),
        other => Err(cannot_create(&segments[0], name, other)),
    }
}

fn set_in_array(arr: &mut Array, name: &str, segments: &[String], value: Option<Value>) -> Result<(), PathError> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };

    let Some(index) = parse_index(head) else {
        return Err(cannot_create(head, name, &Value::Array(arr.clone())));
    };

    if rest.is_empty() {
        if let Some(value) = value {
            arr.set(index, value)?;
        }
        return Ok(());
    }

    if arr.get(index).is_none() {
        arr.set(index, Document::new())?;
    }
    let child = arr
        .get_mut(index)
        .ok_or_else(|| PathError::new(PathErrorKind::IndexOutOfBound, format!("index {index} is out of bounds")))?;

    set_in_value(child, head, rest, value)
}

/// Controls how [`find_values`] treats arrays met along a path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindValuesOpts {
    /// Treat a numeric segment as an index into the array.
    pub array_index: bool,
    /// Look the segment up as a key in every document element of the array.
    pub array_values: bool,
}

impl FindValuesOpts {
    /// Both array behaviours enabled, as used by filter evaluation.
    pub fn dive() -> Self {
        Self { array_index: true, array_values: true }
    }
}

/// Returns every value reachable through `path`.
///
/// Missing keys and scalars met before the end of the path simply contribute
/// nothing. Arrays are only traversed in the ways `opts` enables.
pub fn find_values<'a>(doc: &'a Document, path: &Path, opts: FindValuesOpts) -> Vec<&'a Value> {
    let (first, rest) = split(path);
    let mut values: Vec<&Value> = doc.get(first).into_iter().collect();

    for segment in rest {
        let mut next = Vec::new();

        for value in values {
            match value {
                Value::Document(d) => next.extend(d.get(segment)),
                Value::Array(arr) => {
                    if opts.array_index {
                        next.extend(parse_index(segment).and_then(|i| arr.get(i)));
                    }
                    if opts.array_values {
                        next.extend(arr.iter().filter_map(|v| v.as_document()).filter_map(|d| d.get(segment)));
                    }
                }
                _ => {}
            }
        }

        values = next;
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(bson: bson::Document) -> Document {
        Document::try_from(bson).unwrap()
    }

    fn path(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[test]
    fn empty_paths_are_rejected_at_construction() {
        assert_eq!(Path::parse("").unwrap_err().kind, PathErrorKind::EmptyElement);
        assert_eq!(Path::parse("a..b").unwrap_err().kind, PathErrorKind::EmptyElement);
        assert_eq!(Path::new(Vec::<String>::new()).unwrap_err().kind, PathErrorKind::EmptyElement);
    }

    #[test]
    fn path_pieces() {
        let p = path("a.b.c");
        assert_eq!(p.prefix(), "a");
        assert_eq!(p.suffix(), "c");
        assert_eq!(p.trim_suffix().unwrap().to_string(), "a.b");
        assert_eq!(p.trim_prefix().unwrap().to_string(), "b.c");
        assert!(path("a").trim_suffix().is_none());
        assert!(path("a.b").overlaps(&path("a")));
        assert!(!path("a.b").overlaps(&path("a.c")));
    }

    #[test]
    fn get_by_path_reports_reason() {
        let d = doc(bson::doc! { "a": { "b": [10, 20] }, "s": 1 });

        assert_eq!(d.get_by_path(&path("a.b.1")).unwrap(), &Value::Int32(20));
        assert_eq!(d.get_by_path(&path("a.x")).unwrap_err().kind, PathErrorKind::KeyNotFound);
        assert_eq!(d.get_by_path(&path("a.b.x")).unwrap_err().kind, PathErrorKind::ArrayInvalidIndex);
        assert_eq!(d.get_by_path(&path("a.b.5")).unwrap_err().kind, PathErrorKind::IndexOutOfBound);
        assert_eq!(d.get_by_path(&path("a.b.-1")).unwrap_err().kind, PathErrorKind::IndexOutOfBound);
        assert_eq!(d.get_by_path(&path("s.t")).unwrap_err().kind, PathErrorKind::CannotAccess);
        assert!(!d.has_by_path(&path("missing.deep.path")));
    }

    #[test]
    fn remove_by_path_ignores_missing() {
        let mut d = doc(bson::doc! { "a": { "b": [1, 2, 3] } });
        assert_eq!(d.remove_by_path(&path("a.c.d")), None);
        assert_eq!(d.remove_by_path(&path("a.b.1")), Some(Value::Int32(2)));
        assert_eq!(d, doc(bson::doc! { "a": { "b": [1, 3] } }));
    }

    #[test]
    fn set_by_path_creates_intermediates() {
        let mut d = Document::new();
        d.set_by_path(&path("a.b.c"), 1).unwrap();
        assert_eq!(d, doc(bson::doc! { "a": { "b": { "c": 1 } } }));

        let mut d = doc(bson::doc! { "a": [] });
        d.set_by_path(&path("a.2.x"), 1).unwrap();
        assert_eq!(d, doc(bson::doc! { "a": [null, null, { "x": 1 }] }));
    }

    #[test]
    fn set_by_path_refuses_scalars() {
        let mut d = doc(bson::doc! { "a": 1 });
        let err = d.set_by_path(&path("a.b"), 2).unwrap_err();
        assert_eq!(err.kind, PathErrorKind::CannotCreateField);
        assert_eq!(err.message, "Cannot create field 'b' in element {a: 1}");

        let mut d = doc(bson::doc! { "a": [1] });
        let err = d.set_by_path(&path("a.x"), 2).unwrap_err();
        assert_eq!(err.message, "Cannot create field 'x' in element {a: [ 1 ]}");
    }

    #[test]
    fn set_by_path_refuses_huge_indexes() {
        let mut d = doc(bson::doc! { "a": [1, 2] });
        let err = d.set_by_path(&path("a.18446744073709551615"), 1).unwrap_err();
        assert_eq!(err.kind, PathErrorKind::IndexOutOfBound);
        let err = d.set_by_path(&path("a.999999999999.b"), 1).unwrap_err();
        assert_eq!(err.kind, PathErrorKind::IndexOutOfBound);
        let err = d.set_by_path(&path("a.99999999999999999999999"), 1).unwrap_err();
        assert_eq!(err.kind, PathErrorKind::CannotCreateField);
        assert_eq!(d, doc(bson::doc! { "a": [1, 2] }));
    }

    #[test]
    fn insert_by_path_leaves_last_segment() {
        let mut d = Document::new();
        d.insert_by_path(&path("a.b.c")).unwrap();
        assert_eq!(d, doc(bson::doc! { "a": { "b": {} } }));
    }

    #[test]
    fn find_values_dives_only_when_asked() {
        let d = doc(bson::doc! { "a": [{ "b": 1 }, { "b": 2 }, { "c": 3 }, 4] });

        let exact = find_values(&d, &path("a.b"), FindValuesOpts::default());
        assert!(exact.is_empty());

        let dive = find_values(&d, &path("a.b"), FindValuesOpts::dive());
        assert_eq!(dive, vec![&Value::Int32(1), &Value::Int32(2)]);

        let index = find_values(&d, &path("a.3"), FindValuesOpts { array_index: true, array_values: false });
        assert_eq!(index, vec![&Value::Int32(4)]);
    }
}
