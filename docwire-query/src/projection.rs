//! Projections.
//!
//! A projection is either an inclusion (`{a: 1, "b.c": true}`) or an exclusion
//! (`{a: 0}`). `_id` is included by default and may be switched either way in
//! both kinds. Values other than booleans and numbers set the field to that
//! literal and count as inclusion.
//!
//! Mixing the two kinds is rejected when the projection is compiled, before any
//! document is touched.

use docwire_core::{
    document::{Array, Document},
    error::{DocWireError, DocWireResult, ErrorCode},
    path::Path,
    value::Value,
};

#[derive(Debug, Clone, PartialEq)]
enum Leaf {
    Include,
    Exclude,
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(Leaf),
    Branch(Vec<(String, Node)>),
}

/// How `_id` is treated.
#[derive(Debug, Clone, PartialEq)]
enum IdRule {
    Keep,
    Drop,
    Literal(Value),
}

/// A compiled projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    inclusion: bool,
    id: IdRule,
    tree: Vec<(String, Node)>,
}

impl Projection {
    /// Compiles a projection document.
    ///
    /// # Errors
    ///
    /// Returns `ProjectionExIn`/`ProjectionInEx` when inclusion and exclusion
    /// are mixed, `NotImplemented` for projection operators, and `BadValue`
    /// for overlapping or empty paths.
    pub fn compile(spec: &Document) -> DocWireResult<Self> {
        let mut projection = Self { inclusion: false, id: IdRule::Keep, tree: Vec::new() };
        let mut mode: Option<bool> = None;

        for (key, value) in spec.iter() {
            if key.contains('$') {
                return Err(DocWireError::NotImplemented(format!(
                    "projection operator $ is not supported in {key}"
                )));
            }

            let leaf = match value {
                Value::Document(op) => {
                    let name = op.first_key().unwrap_or_default();
                    return Err(DocWireError::NotImplemented(format!(
                        "projection operator {name} is not supported"
                    )));
                }
                Value::Boolean(_) | Value::Int32(_) | Value::Int64(_) | Value::Double(_) => {
                    if value.is_truthy() { Leaf::Include } else { Leaf::Exclude }
                }
                other => Leaf::Literal(other.clone()),
            };

            if key == "_id" {
                projection.id = match leaf {
                    Leaf::Include => IdRule::Keep,
                    Leaf::Exclude => IdRule::Drop,
                    Leaf::Literal(v) => IdRule::Literal(v),
                };
                continue;
            }

            let include = !matches!(leaf, Leaf::Exclude);
            match mode {
                Some(true) if !include => {
                    return Err(DocWireError::command(
                        ErrorCode::ProjectionExIn,
                        format!("Cannot do exclusion on field {key} in inclusion projection"),
                    ));
                }
                Some(false) if include => {
                    return Err(DocWireError::command(
                        ErrorCode::ProjectionInEx,
                        format!("Cannot do inclusion on field {key} in exclusion projection"),
                    ));
                }
                _ => mode = Some(include),
            }

            let path = Path::parse(key)
                .map_err(|_| DocWireError::bad_value(format!("projection path '{key}' contains an empty field name")))?;
            insert(&mut projection.tree, path.segments(), leaf, key)?;
        }

        projection.inclusion = match mode {
            Some(include) => include,
            // Only `_id` was given: `{_id: 1}` keeps just `_id`.
            None => !matches!(projection.id, IdRule::Drop),
        };

        Ok(projection)
    }

    /// Returns true for inclusion projections.
    pub fn is_inclusion(&self) -> bool {
        self.inclusion
    }

    /// Applies the projection to a document.
    ///
    /// # Errors
    ///
    /// Returns `PathNotViable` if a literal cannot be placed in the output.
    pub fn apply(&self, doc: &Document) -> DocWireResult<Document> {
        let out = if self.inclusion {
            let mut out = Document::new();
            match (&self.id, doc.get("_id")) {
                (IdRule::Keep, Some(id)) | (IdRule::Literal(id), _) => {
                    out.set("_id", id.clone());
                }
                _ => {}
            }
            for (k, v) in include_document(doc, &self.tree).iter().filter(|(k, _)| *k != "_id") {
                out.set(k, v.clone());
            }
            add_literals(&mut out, &self.tree, &mut Vec::new())?;
            out
        } else {
            let mut out = doc.clone();
            exclude_document(&mut out, &self.tree);
            match &self.id {
                IdRule::Drop => {
                    out.remove("_id");
                }
                IdRule::Literal(value) => {
                    out.set("_id", value.clone());
                }
                IdRule::Keep => {}
            }
            out
        };

        Ok(out)
    }
}

fn insert(tree: &mut Vec<(String, Node)>, segments: &[String], leaf: Leaf, key: &str) -> DocWireResult<()> {
    let collision = || DocWireError::bad_value(format!("Path collision at {key}"));
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };

    let existing = tree.iter_mut().find(|(k, _)| k == head);

    if rest.is_empty() {
        if existing.is_some() {
            return Err(collision());
        }
        tree.push((head.clone(), Node::Leaf(leaf)));
        return Ok(());
    }

    match existing {
        Some((_, Node::Branch(children))) => insert(children, rest, leaf, key),
        Some((_, Node::Leaf(_))) => Err(collision()),
        None => {
            let mut children = Vec::new();
            insert(&mut children, rest, leaf, key)?;
            tree.push((head.clone(), Node::Branch(children)));
            Ok(())
        }
    }
}

fn include_document(doc: &Document, tree: &[(String, Node)]) -> Document {
    let mut out = Document::new();

    for (key, value) in doc.iter() {
        let Some((_, node)) = tree.iter().find(|(k, _)| k == key) else {
            continue;
        };

        match node {
            Node::Leaf(Leaf::Include) => {
                out.set(key, value.clone());
            }
            Node::Leaf(_) => {}
            Node::Branch(children) => match value {
                Value::Document(sub) => {
                    out.set(key, include_document(sub, children));
                }
                Value::Array(arr) => {
                    let items: Array = arr
                        .iter()
                        .filter_map(Value::as_document)
                        .map(|sub| Value::Document(include_document(sub, children)))
                        .collect();
                    out.set(key, items);
                }
                _ => {}
            },
        }
    }

    out
}

fn add_literals(out: &mut Document, tree: &[(String, Node)], prefix: &mut Vec<String>) -> DocWireResult<()> {
    for (key, node) in tree {
        prefix.push(key.clone());
        match node {
            Node::Leaf(Leaf::Literal(value)) => {
                let path = Path::new(prefix.iter().cloned())?;
                out.set_by_path(&path, value.clone())
                    .map_err(|err| DocWireError::command(ErrorCode::PathNotViable, err.message))?;
            }
            Node::Branch(children) => add_literals(out, children, prefix)?,
            Node::Leaf(_) => {}
        }
        prefix.pop();
    }
    Ok(())
}

fn exclude_document(doc: &mut Document, tree: &[(String, Node)]) {
    for (key, node) in tree {
        match node {
            Node::Leaf(_) => {
                doc.remove(key);
            }
            Node::Branch(children) => match doc.get_mut(key) {
                Some(Value::Document(sub)) => exclude_document(sub, children),
                Some(Value::Array(arr)) => {
                    for i in 0..arr.len() {
                        if let Some(Value::Document(sub)) = arr.get_mut(i) {
                            exclude_document(sub, children);
                        }
                    }
                }
                _ => {}
            },
        }
    }
}
