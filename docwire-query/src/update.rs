//! Update documents: replacements and modifier operators.
//!
//! An update document is either a replacement (`{a: 1}`) or a set of
//! modifiers (`{$set: {a: 1}, $inc: {n: 2}}`). Modifiers are looked up in an
//! [`UpdateOperators`] registry and compiled into [`UpdateAction`]s, one per
//! target path. Paths touched by two actions are rejected at compile time.
//!
//! Applying an update reports whether the document actually changed, so a
//! `$set` to the current value counts as a no-op.

use std::cmp::Ordering;

use docwire_core::{
    compare::{compare, identical, identical_documents},
    document::{Array, Document},
    error::{DocWireError, DocWireResult, ErrorCode, PathError},
    format::format_value,
    path::Path,
    value::Value,
};

use crate::{expr::EqualityCollector, filter::Filter, registry::OperatorRegistry};

/// What a single update action does to its path.
#[derive(Debug, Clone, PartialEq)]
pub enum Modifier {
    Set(Value),
    /// Like `Set`, but only when the update creates a new document.
    SetOnInsert(Value),
    Unset,
    Inc(Value),
    Mul(Value),
    Min(Value),
    Max(Value),
    /// Moves the value to another path.
    Rename(Path),
    CurrentDate { timestamp: bool },
    Pop { first: bool },
    Push(Vec<Value>),
    AddToSet(Vec<Value>),
    PullAll(Vec<Value>),
}

/// A modifier bound to a path.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateAction {
    pub path: Path,
    pub modifier: Modifier,
}

impl UpdateAction {
    /// Every path the action writes.
    fn paths(&self) -> Vec<&Path> {
        match &self.modifier {
            Modifier::Rename(to) => vec![&self.path, to],
            _ => vec![&self.path],
        }
    }
}

/// Parses the argument of one modifier for one path.
pub type ModifierParser = fn(&Path, &Value) -> DocWireResult<Modifier>;

/// The registry of update modifiers.
pub type UpdateOperators = OperatorRegistry<ModifierParser>;

/// Builds the registry with every supported update modifier.
///
/// # Errors
///
/// Returns an internal error if a modifier name is registered twice.
pub fn default_modifiers() -> DocWireResult<UpdateOperators> {
    let mut ops = UpdateOperators::new("update");
    ops.register("$set", |_, arg| Ok(Modifier::Set(arg.clone())))?;
    ops.register("$setOnInsert", |_, arg| Ok(Modifier::SetOnInsert(arg.clone())))?;
    ops.register("$unset", |_, _| Ok(Modifier::Unset))?;
    ops.register("$inc", parse_inc)?;
    ops.register("$mul", parse_mul)?;
    ops.register("$min", |_, arg| Ok(Modifier::Min(arg.clone())))?;
    ops.register("$max", |_, arg| Ok(Modifier::Max(arg.clone())))?;
    ops.register("$rename", parse_rename)?;
    ops.register("$currentDate", parse_current_date)?;
    ops.register("$pop", parse_pop)?;
    ops.register("$push", parse_push)?;
    ops.register("$addToSet", parse_add_to_set)?;
    ops.register("$pullAll", parse_pull_all)?;
    Ok(ops)
}

/// A compiled update.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Replace everything but `_id`.
    Replacement(Document),
    /// Apply modifiers in order.
    Operators(Vec<UpdateAction>),
}

impl Update {
    /// Compiles an update document.
    ///
    /// # Arguments
    ///
    /// * `update` - A replacement document or a document of modifiers
    /// * `ops` - The modifier registry
    ///
    /// # Errors
    ///
    /// Returns `FailedToParse` for unknown or malformed modifiers,
    /// `EmptyFieldName` for empty paths, `ConflictingUpdateOperators` when two
    /// modifiers touch overlapping paths, and modifier-specific argument errors.
    pub fn compile(update: &Document, ops: &UpdateOperators) -> DocWireResult<Self> {
        if !update.keys().any(|k| k.starts_with('$')) {
            return Ok(Update::Replacement(update.clone()));
        }

        let mut actions: Vec<UpdateAction> = Vec::new();

        for (name, arg) in update.iter() {
            let parser = ops.get(name).ok_or_else(|| {
                DocWireError::failed_to_parse(format!(
                    "Unknown modifier: {name}. Expected a valid update modifier or pipeline-style update specified as an array"
                ))
            })?;

            let fields = arg.as_document().ok_or_else(|| {
                DocWireError::failed_to_parse(format!(
                    "Modifiers operate on fields but we found type {} instead. For example: {{$mod: {{<field>: ...}}}} not {{{name}: {}}}",
                    arg.type_alias(),
                    format_value(arg)
                ))
            })?;

            for (field, value) in fields.iter() {
                let path = update_path(field)?;
                let action = UpdateAction { modifier: parser(&path, value)?, path };

                for new in action.paths() {
                    let existing = actions.iter().flat_map(UpdateAction::paths).find(|p| p.overlaps(new));
                    if let Some(existing) = existing {
                        return Err(DocWireError::command(
                            ErrorCode::ConflictingUpdateOperators,
                            format!("Updating the path '{new}' would create a conflict at '{existing}'"),
                        ));
                    }
                }
                if let Modifier::Rename(to) = &action.modifier {
                    if action.path.overlaps(to) {
                        return Err(DocWireError::command(
                            ErrorCode::ConflictingUpdateOperators,
                            format!("Updating the path '{to}' would create a conflict at '{}'", action.path),
                        ));
                    }
                }

                actions.push(action);
            }
        }

        Ok(Update::Operators(actions))
    }

    /// Applies the update in place and returns whether the document changed.
    ///
    /// `is_insert` is true when the document is being created by an upsert;
    /// only then do `$setOnInsert` actions run.
    ///
    /// # Errors
    ///
    /// Returns `ImmutableField` if `_id` changed, `TypeMismatch` for arithmetic
    /// on non-numeric fields, and `PathNotViable` when a path cannot be created.
    pub fn apply(&self, doc: &mut Document, is_insert: bool) -> DocWireResult<bool> {
        let before = doc.clone();

        match self {
            Update::Replacement(replacement) => {
                let mut next = Document::with_capacity(replacement.len() + 1);
                if let Some(id) = replacement.get("_id").or_else(|| before.get("_id")) {
                    next.set("_id", id.clone());
                }
                for (k, v) in replacement.iter().filter(|(k, _)| *k != "_id") {
                    next.set(k, v.clone());
                }
                *doc = next;
            }
            Update::Operators(actions) => {
                for action in actions {
                    apply_action(doc, action, is_insert)?;
                }
            }
        }

        if !is_insert {
            check_id_unchanged(&before, doc)?;
        }

        Ok(!identical_documents(doc, &before))
    }

    /// Builds the document an upsert inserts when nothing matched.
    ///
    /// Equality predicates from the filter seed the document, then the update
    /// is applied as an insert. A replacement only keeps the filter's `_id`.
    pub fn upsert_document(&self, filter: &Filter) -> DocWireResult<Document> {
        let seed = EqualityCollector::collect(filter.expr()).into_document();

        let mut doc = match self {
            Update::Replacement(_) => {
                let mut doc = Document::new();
                if let Some(id) = seed.get("_id") {
                    doc.set("_id", id.clone());
                }
                doc
            }
            Update::Operators(_) => seed,
        };

        self.apply(&mut doc, true)?;
        doc.ensure_id();
        Ok(doc)
    }
}

fn update_path(field: &str) -> DocWireResult<Path> {
    if field.is_empty() {
        return Err(DocWireError::command(ErrorCode::EmptyFieldName, "An empty update path is not valid."));
    }

    let path = Path::parse(field).map_err(|_| {
        DocWireError::command(
            ErrorCode::EmptyFieldName,
            format!("The update path '{field}' contains an empty field name, which is not allowed."),
        )
    })?;

    if path.segments().iter().any(|s| s.starts_with('$')) {
        return Err(DocWireError::NotImplemented(format!(
            "positional update path '{field}' is not supported"
        )));
    }

    Ok(path)
}

fn check_id_unchanged(before: &Document, after: &Document) -> DocWireResult<()> {
    let Some(old) = before.get("_id") else {
        return Ok(());
    };

    match after.get("_id") {
        Some(new) if identical(new, old) => Ok(()),
        Some(new) => Err(DocWireError::command(
            ErrorCode::ImmutableField,
            format!(
                "After applying the update, the (immutable) field '_id' was found to have been altered to _id: {}",
                format_value(new)
            ),
        )),
        None => Err(DocWireError::command(
            ErrorCode::ImmutableField,
            "Performing an update on the path '_id' would modify the immutable field '_id'",
        )),
    }
}

fn path_not_viable(err: PathError) -> DocWireError {
    DocWireError::command(ErrorCode::PathNotViable, err.message)
}

/// `{_id: <id>}`, as used in error messages naming the updated document.
fn id_fragment(doc: &Document) -> String {
    format!("{{_id: {}}}", doc.get("_id").map(format_value).unwrap_or_else(|| "null".to_owned()))
}

fn set(doc: &mut Document, path: &Path, value: Value) -> DocWireResult<()> {
    if doc.get_by_path(path).is_ok_and(|current| identical(current, &value)) {
        return Ok(());
    }
    doc.set_by_path(path, value).map_err(path_not_viable)
}

fn apply_action(doc: &mut Document, action: &UpdateAction, is_insert: bool) -> DocWireResult<()> {
    let path = &action.path;
    let current = doc.get_by_path(path).ok().cloned();

    match &action.modifier {
        Modifier::Set(value) => set(doc, path, value.clone()),
        Modifier::SetOnInsert(value) if is_insert => set(doc, path, value.clone()),
        Modifier::SetOnInsert(_) => Ok(()),
        Modifier::Unset => {
            unset(doc, path);
            Ok(())
        }
        Modifier::Inc(delta) => match current {
            None => set(doc, path, delta.clone()),
            Some(value) => {
                let sum = arithmetic(doc, path, "$inc", &value, delta, Arith::Add)?;
                set(doc, path, sum)
            }
        },
        Modifier::Mul(factor) => match current {
            None => set(doc, path, zero_like(factor)),
            Some(value) => {
                let product = arithmetic(doc, path, "$mul", &value, factor, Arith::Mul)?;
                set(doc, path, product)
            }
        },
        Modifier::Min(value) | Modifier::Max(value) => {
            let wanted = if matches!(action.modifier, Modifier::Min(_)) { Ordering::Less } else { Ordering::Greater };
            match current {
                Some(cur) if compare(value, &cur) != wanted => Ok(()),
                _ => set(doc, path, value.clone()),
            }
        }
        Modifier::Rename(to) => {
            let Some(value) = doc.remove_by_path(path) else {
                return Ok(());
            };
            doc.set_by_path(to, value).map_err(path_not_viable)
        }
        Modifier::CurrentDate { timestamp } => {
            let now = bson::DateTime::now();
            let value = if *timestamp {
                Value::Timestamp(bson::Timestamp {
                    time: u32::try_from(now.timestamp_millis() / 1000).unwrap_or(u32::MAX),
                    increment: 1,
                })
            } else {
                Value::DateTime(now)
            };
            doc.set_by_path(path, value).map_err(path_not_viable)
        }
        Modifier::Pop { first } => {
            let Some(cur) = current else {
                return Ok(());
            };
            let mut arr = match cur {
                Value::Array(arr) => arr,
                other => {
                    return Err(DocWireError::command(
                        ErrorCode::TypeMismatch,
                        format!("Path '{path}' contains an element of non-array type '{}'", other.type_alias()),
                    ));
                }
            };
            let popped = if *first { arr.pop_first() } else { arr.pop_last() };
            if popped.is_none() {
                return Ok(());
            }
            set(doc, path, Value::Array(arr))
        }
        Modifier::Push(values) => {
            let mut arr = existing_array(doc, path, current, "$push")?;
            values.iter().for_each(|v| arr.push(v.clone()));
            set(doc, path, Value::Array(arr))
        }
        Modifier::AddToSet(values) => {
            let mut arr = existing_array(doc, path, current, "$addToSet")?;
            for v in values {
                if !arr.contains(v) {
                    arr.push(v.clone());
                }
            }
            set(doc, path, Value::Array(arr))
        }
        Modifier::PullAll(values) => {
            let Some(cur) = current else {
                return Ok(());
            };
            let Value::Array(mut arr) = cur else {
                return Err(DocWireError::bad_value("Cannot apply $pull to a non-array value"));
            };
            let values: Array = values.iter().cloned().collect();
            arr.retain(|item| !values.contains(item));
            set(doc, path, Value::Array(arr))
        }
    }
}

fn unset(doc: &mut Document, path: &Path) {
    // Array elements are nulled rather than removed, so indexes stay put.
    if let Some(parent) = path.trim_suffix() {
        if let Ok(Value::Array(arr)) = doc.get_by_path_mut(&parent) {
            if let Ok(index) = path.suffix().parse::<usize>() {
                if let Some(item) = arr.get_mut(index) {
                    *item = Value::Null;
                }
            }
            return;
        }
    }
    doc.remove_by_path(path);
}

fn existing_array(doc: &Document, path: &Path, current: Option<Value>, op: &str) -> DocWireResult<Array> {
    match current {
        None => Ok(Array::new()),
        Some(Value::Array(arr)) => Ok(arr),
        Some(other) if op == "$addToSet" => Err(DocWireError::bad_value(format!(
            "Cannot apply $addToSet to non-array field. Field named '{}' has non-array type {}",
            path.suffix(),
            other.type_alias()
        ))),
        Some(other) => Err(DocWireError::bad_value(format!(
            "The field '{path}' must be an array but is of type {} in document {}",
            other.type_alias(),
            id_fragment(doc)
        ))),
    }
}

#[derive(Debug, Clone, Copy)]
enum Arith {
    Add,
    Mul,
}

fn zero_like(value: &Value) -> Value {
    match value {
        Value::Int32(_) => Value::Int32(0),
        Value::Int64(_) => Value::Int64(0),
        _ => Value::Double(0.0),
    }
}

fn arithmetic(doc: &Document, path: &Path, op: &str, current: &Value, operand: &Value, arith: Arith) -> DocWireResult<Value> {
    if !current.is_number() {
        return Err(DocWireError::command(
            ErrorCode::TypeMismatch,
            format!(
                "Cannot apply {op} to a value of non-numeric type. {} has the field '{}' of non-numeric type {}",
                id_fragment(doc),
                path.suffix(),
                current.type_alias()
            ),
        ));
    }

    combine(current, operand, arith).ok_or_else(|| {
        DocWireError::bad_value(format!(
            "Failed to apply {op} operations to current value ({}) for document {}",
            format_value(current),
            id_fragment(doc)
        ))
    })
}

/// Adds or multiplies two numbers. Int32 overflow widens to Int64; Int64
/// overflow yields `None`. Any double makes the result a double.
fn combine(a: &Value, b: &Value, arith: Arith) -> Option<Value> {
    match (a, b) {
        (Value::Int32(x), Value::Int32(y)) => {
            let narrow = match arith {
                Arith::Add => x.checked_add(*y),
                Arith::Mul => x.checked_mul(*y),
            };
            match narrow {
                Some(n) => Some(Value::Int32(n)),
                None => combine(&Value::Int64(i64::from(*x)), &Value::Int64(i64::from(*y)), arith),
            }
        }
        (Value::Double(_), _) | (_, Value::Double(_)) => {
            let (x, y) = (a.to_f64_lossy()?, b.to_f64_lossy()?);
            Some(Value::Double(match arith {
                Arith::Add => x + y,
                Arith::Mul => x * y,
            }))
        }
        _ => {
            let (x, y) = (whole(a)?, whole(b)?);
            match arith {
                Arith::Add => x.checked_add(y),
                Arith::Mul => x.checked_mul(y),
            }
            .map(Value::Int64)
        }
    }
}

fn whole(value: &Value) -> Option<i64> {
    match value {
        Value::Int32(i) => Some(i64::from(*i)),
        Value::Int64(i) => Some(*i),
        _ => None,
    }
}

fn numeric_argument(path: &Path, arg: &Value, verb: &str) -> DocWireResult<Value> {
    if !arg.is_number() {
        return Err(DocWireError::command(
            ErrorCode::TypeMismatch,
            format!("Cannot {verb} with non-numeric argument: {{{path}: {}}}", format_value(arg)),
        ));
    }
    Ok(arg.clone())
}

fn parse_inc(path: &Path, arg: &Value) -> DocWireResult<Modifier> {
    Ok(Modifier::Inc(numeric_argument(path, arg, "increment")?))
}

fn parse_mul(path: &Path, arg: &Value) -> DocWireResult<Modifier> {
    Ok(Modifier::Mul(numeric_argument(path, arg, "multiply")?))
}

fn parse_rename(path: &Path, arg: &Value) -> DocWireResult<Modifier> {
    let Value::String(to) = arg else {
        return Err(DocWireError::bad_value(format!(
            "The 'to' field for $rename must be a string: {path}: {}",
            format_value(arg)
        )));
    };

    if to == &path.to_string() {
        return Err(DocWireError::bad_value(format!(
            "The source and target field for $rename must differ: {path}: \"{to}\""
        )));
    }

    Ok(Modifier::Rename(update_path(to)?))
}

fn parse_current_date(_: &Path, arg: &Value) -> DocWireResult<Modifier> {
    match arg {
        Value::Boolean(_) => Ok(Modifier::CurrentDate { timestamp: false }),
        Value::Document(spec) => match spec.get("$type").and_then(Value::as_str) {
            Some("date") if spec.len() == 1 => Ok(Modifier::CurrentDate { timestamp: false }),
            Some("timestamp") if spec.len() == 1 => Ok(Modifier::CurrentDate { timestamp: true }),
            _ => Err(DocWireError::bad_value(
                "The '$type' string field is required to be 'date' or 'timestamp': {$currentDate: {field : {$type: 'date'}}}",
            )),
        },
        other => Err(DocWireError::bad_value(format!(
            "{} is not valid type for $currentDate. Please use a boolean ('true') or a $type expression ({{$type: 'timestamp/date'}}).",
            other.type_alias()
        ))),
    }
}

fn parse_pop(path: &Path, arg: &Value) -> DocWireResult<Modifier> {
    if !arg.is_number() {
        return Err(DocWireError::failed_to_parse(format!(
            "Expected a number in: {path}: {}",
            format_value(arg)
        )));
    }

    match arg.to_whole_i64() {
        Some(1) => Ok(Modifier::Pop { first: false }),
        Some(-1) => Ok(Modifier::Pop { first: true }),
        _ => Err(DocWireError::failed_to_parse(format!("$pop expects 1 or -1, found: {}", format_value(arg)))),
    }
}

fn each_values(op: &str, arg: &Value) -> DocWireResult<Vec<Value>> {
    let Value::Document(spec) = arg else {
        return Ok(vec![arg.clone()]);
    };
    if spec.first_key() != Some("$each") {
        return Ok(vec![arg.clone()]);
    }

    if let Some(key) = spec.keys().find(|k| *k != "$each") {
        return Err(DocWireError::NotImplemented(format!("{op} modifier {key} is not supported")));
    }

    match &spec["$each"] {
        Value::Array(items) => Ok(items.iter().cloned().collect()),
        other => Err(DocWireError::bad_value(format!(
            "The argument to $each in {op} must be an array but it was of type: {}",
            other.type_alias()
        ))),
    }
}

fn parse_push(_: &Path, arg: &Value) -> DocWireResult<Modifier> {
    Ok(Modifier::Push(each_values("$push", arg)?))
}

fn parse_add_to_set(_: &Path, arg: &Value) -> DocWireResult<Modifier> {
    Ok(Modifier::AddToSet(each_values("$addToSet", arg)?))
}

fn parse_pull_all(_: &Path, arg: &Value) -> DocWireResult<Modifier> {
    match arg {
        Value::Array(items) => Ok(Modifier::PullAll(items.iter().cloned().collect())),
        other => Err(DocWireError::bad_value(format!(
            "$pullAll requires an array argument but was given a {}",
            other.type_alias()
        ))),
    }
}
