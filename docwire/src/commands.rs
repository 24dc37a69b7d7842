//! Typed parameters for each supported command.
//!
//! Every command has a parameter struct built by hand from the command
//! document with the helpers in [`docwire_core::params`]. Fields fall into four
//! groups: required, optional, unimplemented (rejected with `NotImplemented`
//! when present) and ignored (accepted, logged, and otherwise unused).
//!
//! # Example
//!
//! ```ignore
//! use docwire::commands::FindParams;
//!
//! let params = FindParams::from_document(&command)?;
//! assert_eq!(params.namespace.to_string(), "test.users");
//! ```

use std::time::Duration;

use docwire_core::{
    document::{Array, Document},
    error::{DocWireError, DocWireResult, ErrorCode},
    params::{
        ignore_if_present, optional_array, optional_bool, optional_document, optional_non_negative,
        optional_whole_number, reject_if_present, require_long, require_string,
    },
    value::Value,
};
use docwire_cursor::Namespace;

/// Fields every command accepts and ignores.
const IGNORED_COMMON: &[&str] = &["lsid", "$clusterTime", "$readPreference", "readConcern", "writeConcern", "comment"];

fn ignore_all(doc: &Document, command: &str, keys: &[&str]) {
    for key in IGNORED_COMMON.iter().chain(keys) {
        ignore_if_present(doc, command, key);
    }
}

fn reject_all(doc: &Document, command: &str, keys: &[&str]) -> DocWireResult<()> {
    for key in keys {
        reject_if_present(doc, command, key)?;
    }
    Ok(())
}

/// Reads the namespace from `$db` and the collection named by the command key.
fn namespace(doc: &Document, command: &str) -> DocWireResult<Namespace> {
    let database = require_string(doc, command, "$db")?;
    let collection = match doc.get(command) {
        Some(Value::String(name)) => name.clone(),
        Some(other) => {
            return Err(DocWireError::command(
                ErrorCode::InvalidNamespace,
                format!("collection name has invalid type {}", other.type_alias()),
            ));
        }
        None => return Err(missing(command, command)),
    };
    Ok(Namespace::new(database, collection))
}

fn missing(command: &str, key: &str) -> DocWireError {
    DocWireError::command(
        ErrorCode::MissingField,
        format!("BSON field '{command}.{key}' is missing but a required field"),
    )
}

fn require_array(doc: &Document, command: &str, key: &str) -> DocWireResult<Array> {
    optional_array(doc, command, key)?.ok_or_else(|| missing(command, key))
}

/// Reads every element of `array` as a document.
fn documents_of(array: &Array, command: &str, key: &str) -> DocWireResult<Vec<Document>> {
    array
        .iter()
        .enumerate()
        .map(|(i, value)| match value {
            Value::Document(doc) => Ok(doc.clone()),
            other => Err(DocWireError::command(
                ErrorCode::TypeMismatch,
                format!(
                    "BSON field '{command}.{key}.{i}' is the wrong type '{}', expected type 'object'",
                    other.type_alias()
                ),
            )),
        })
        .collect()
}

fn max_time(doc: &Document, command: &str) -> DocWireResult<Option<Duration>> {
    let ms = optional_non_negative(doc, command, "maxTimeMS")?;
    Ok(ms.filter(|ms| *ms > 0).map(|ms| Duration::from_millis(ms.unsigned_abs())))
}

fn has_operators(update: &Document) -> bool {
    update.keys().any(|k| k.starts_with('$'))
}

/// Parameters of `find`.
#[derive(Debug, Clone, PartialEq)]
pub struct FindParams {
    pub namespace: Namespace,
    pub filter: Document,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub skip: u64,
    /// Zero means no limit.
    pub limit: u64,
    pub batch_size: Option<i64>,
    /// Return a single batch and close the cursor.
    pub single_batch: bool,
    pub tailable: bool,
    pub max_time: Option<Duration>,
}

impl FindParams {
    /// Extracts the parameters of a `find` command.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for mistyped fields, `Location51024` for negative
    /// numbers, and `NotImplemented` for unsupported options.
    pub fn from_document(doc: &Document) -> DocWireResult<Self> {
        const COMMAND: &str = "find";

        reject_all(
            doc,
            COMMAND,
            &["collation", "let", "min", "max", "returnKey", "showRecordId", "allowPartialResults", "oplogReplay"],
        )?;
        ignore_all(doc, COMMAND, &["hint", "noCursorTimeout", "awaitData", "allowDiskUse", "readOnce"]);

        let limit = optional_whole_number(doc, COMMAND, "limit")?;
        // A negative limit asks for a single batch of that many documents.
        let (limit, negative_limit) = match limit {
            Some(n) if n < 0 => (n.unsigned_abs(), true),
            Some(n) => (n.unsigned_abs(), false),
            None => (0, false),
        };

        Ok(Self {
            namespace: namespace(doc, COMMAND)?,
            filter: optional_document(doc, COMMAND, "filter")?.unwrap_or_default(),
            sort: optional_document(doc, COMMAND, "sort")?,
            projection: optional_document(doc, COMMAND, "projection")?,
            skip: optional_non_negative(doc, COMMAND, "skip")?.map_or(0, i64::unsigned_abs),
            limit,
            batch_size: optional_non_negative(doc, COMMAND, "batchSize")?,
            single_batch: negative_limit || optional_bool(doc, COMMAND, "singleBatch")?.unwrap_or(false),
            tailable: optional_bool(doc, COMMAND, "tailable")?.unwrap_or(false),
            max_time: max_time(doc, COMMAND)?,
        })
    }
}

/// Parameters of `getMore`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetMoreParams {
    pub namespace: Namespace,
    pub cursor_id: i64,
    pub batch_size: Option<i64>,
    pub max_time: Option<Duration>,
}

impl GetMoreParams {
    /// Extracts the parameters of a `getMore` command.
    ///
    /// The cursor id must be a `long`; the collection is read from the
    /// `collection` field.
    pub fn from_document(doc: &Document) -> DocWireResult<Self> {
        const COMMAND: &str = "getMore";

        ignore_all(doc, COMMAND, &[]);

        let database = require_string(doc, COMMAND, "$db")?;
        let cursor_id = require_long(doc, COMMAND, COMMAND)?;
        let collection = require_string(doc, COMMAND, "collection")?;

        Ok(Self {
            namespace: Namespace::new(database, collection),
            cursor_id,
            batch_size: optional_non_negative(doc, COMMAND, "batchSize")?,
            max_time: max_time(doc, COMMAND)?,
        })
    }
}

/// Parameters of `killCursors`.
#[derive(Debug, Clone, PartialEq)]
pub struct KillCursorsParams {
    pub namespace: Namespace,
    pub cursor_ids: Vec<i64>,
}

impl KillCursorsParams {
    pub fn from_document(doc: &Document) -> DocWireResult<Self> {
        const COMMAND: &str = "killCursors";

        ignore_all(doc, COMMAND, &[]);

        let cursors = require_array(doc, COMMAND, "cursors")?;
        let cursor_ids = cursors
            .iter()
            .enumerate()
            .map(|(i, value)| match value {
                Value::Int64(id) => Ok(*id),
                other => Err(DocWireError::command(
                    ErrorCode::TypeMismatch,
                    format!(
                        "BSON field 'killCursors.cursors.{i}' is the wrong type '{}', expected type 'long'",
                        other.type_alias()
                    ),
                )),
            })
            .collect::<DocWireResult<_>>()?;

        Ok(Self { namespace: namespace(doc, COMMAND)?, cursor_ids })
    }
}

/// Parameters of `insert`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertParams {
    pub namespace: Namespace,
    pub documents: Vec<Document>,
    /// Stop at the first failing document.
    pub ordered: bool,
}

impl InsertParams {
    pub fn from_document(doc: &Document) -> DocWireResult<Self> {
        const COMMAND: &str = "insert";

        ignore_all(doc, COMMAND, &["bypassDocumentValidation"]);

        let documents = require_array(doc, COMMAND, "documents")?;

        Ok(Self {
            namespace: namespace(doc, COMMAND)?,
            documents: documents_of(&documents, COMMAND, "documents")?,
            ordered: optional_bool(doc, COMMAND, "ordered")?.unwrap_or(true),
        })
    }
}

/// One statement of an `update` command.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub filter: Document,
    pub update: Document,
    pub multi: bool,
    pub upsert: bool,
}

/// Parameters of `update`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateParams {
    pub namespace: Namespace,
    pub updates: Vec<UpdateStatement>,
    pub ordered: bool,
}

impl UpdateParams {
    /// Extracts the parameters of an `update` command.
    ///
    /// # Errors
    ///
    /// Returns `FailedToParse` for a replacement-style update with `multi: true`,
    /// and `NotImplemented` for `let`, `c`, `collation` and `arrayFilters`.
    pub fn from_document(doc: &Document) -> DocWireResult<Self> {
        const COMMAND: &str = "update";

        reject_all(doc, COMMAND, &["let"])?;
        ignore_all(doc, COMMAND, &["bypassDocumentValidation"]);

        let statements = require_array(doc, COMMAND, "updates")?;
        let updates = documents_of(&statements, COMMAND, "updates")?
            .iter()
            .map(|statement| -> DocWireResult<UpdateStatement> {
                reject_all(statement, COMMAND, &["c", "collation", "arrayFilters"])?;
                ignore_if_present(statement, COMMAND, "hint");

                let update = optional_document(statement, COMMAND, "u")?.ok_or_else(|| missing(COMMAND, "updates.u"))?;
                let multi = optional_bool(statement, COMMAND, "multi")?.unwrap_or(false);
                if multi && !has_operators(&update) {
                    return Err(DocWireError::failed_to_parse(
                        "multi update is not supported for replacement-style update",
                    ));
                }

                Ok(UpdateStatement {
                    filter: optional_document(statement, COMMAND, "q")?.unwrap_or_default(),
                    update,
                    multi,
                    upsert: optional_bool(statement, COMMAND, "upsert")?.unwrap_or(false),
                })
            })
            .collect::<DocWireResult<_>>()?;

        Ok(Self {
            namespace: namespace(doc, COMMAND)?,
            updates,
            ordered: optional_bool(doc, COMMAND, "ordered")?.unwrap_or(true),
        })
    }
}

/// One statement of a `delete` command.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub filter: Document,
    /// Delete at most one matching document.
    pub single: bool,
}

/// Parameters of `delete`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteParams {
    pub namespace: Namespace,
    pub deletes: Vec<DeleteStatement>,
    pub ordered: bool,
}

impl DeleteParams {
    /// Extracts the parameters of a `delete` command.
    ///
    /// # Errors
    ///
    /// Returns `FailedToParse` when a statement's `limit` is neither 0 nor 1.
    pub fn from_document(doc: &Document) -> DocWireResult<Self> {
        const COMMAND: &str = "delete";

        reject_all(doc, COMMAND, &["let"])?;
        ignore_all(doc, COMMAND, &[]);

        let statements = require_array(doc, COMMAND, "deletes")?;
        let deletes = documents_of(&statements, COMMAND, "deletes")?
            .iter()
            .map(|statement| -> DocWireResult<DeleteStatement> {
                reject_all(statement, COMMAND, &["collation"])?;
                ignore_if_present(statement, COMMAND, "hint");

                let single = match optional_whole_number(statement, COMMAND, "limit")? {
                    None | Some(0) => false,
                    Some(1) => true,
                    Some(n) => {
                        return Err(DocWireError::failed_to_parse(format!(
                            "The limit field in delete objects must be 0 or 1. Got {n}"
                        )));
                    }
                };

                Ok(DeleteStatement { filter: optional_document(statement, COMMAND, "q")?.unwrap_or_default(), single })
            })
            .collect::<DocWireResult<_>>()?;

        Ok(Self {
            namespace: namespace(doc, COMMAND)?,
            deletes,
            ordered: optional_bool(doc, COMMAND, "ordered")?.unwrap_or(true),
        })
    }
}

/// Parameters of `count`.
#[derive(Debug, Clone, PartialEq)]
pub struct CountParams {
    pub namespace: Namespace,
    pub filter: Document,
    pub skip: u64,
    /// Zero means no limit.
    pub limit: u64,
}

impl CountParams {
    pub fn from_document(doc: &Document) -> DocWireResult<Self> {
        const COMMAND: &str = "count";

        reject_all(doc, COMMAND, &["collation"])?;
        ignore_all(doc, COMMAND, &["hint"]);

        Ok(Self {
            namespace: namespace(doc, COMMAND)?,
            filter: optional_document(doc, COMMAND, "query")?.unwrap_or_default(),
            skip: optional_non_negative(doc, COMMAND, "skip")?.map_or(0, i64::unsigned_abs),
            limit: optional_whole_number(doc, COMMAND, "limit")?.map_or(0, i64::unsigned_abs),
        })
    }
}

/// The command being explained.
#[derive(Debug, Clone, PartialEq)]
pub enum Explained {
    Find(FindParams),
    Count(CountParams),
}

impl Explained {
    pub fn namespace(&self) -> &Namespace {
        match self {
            Explained::Find(params) => &params.namespace,
            Explained::Count(params) => &params.namespace,
        }
    }
}

/// Parameters of `explain`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainParams {
    pub command: Explained,
}

impl ExplainParams {
    /// Extracts the parameters of an `explain` command.
    ///
    /// The explained command inherits `$db` from the outer command.
    ///
    /// # Errors
    ///
    /// Returns `NotImplemented` for commands other than `find` and `count`.
    pub fn from_document(doc: &Document) -> DocWireResult<Self> {
        const COMMAND: &str = "explain";

        ignore_all(doc, COMMAND, &["verbosity"]);

        let database = require_string(doc, COMMAND, "$db")?;
        let mut inner = optional_document(doc, COMMAND, COMMAND)?.ok_or_else(|| missing(COMMAND, COMMAND))?;
        inner.set("$db", database);

        let command = match inner.first_key() {
            Some("find") => Explained::Find(FindParams::from_document(&inner)?),
            Some("count") => Explained::Count(CountParams::from_document(&inner)?),
            Some(other) => {
                return Err(DocWireError::NotImplemented(format!("explain for {other} is not implemented")));
            }
            None => return Err(DocWireError::bad_value("explain command requires a nested object")),
        };

        Ok(Self { command })
    }
}

/// Parameters of `create`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateParams {
    pub namespace: Namespace,
    pub capped: bool,
    pub size: i64,
    pub max: Option<i64>,
}

impl CreateParams {
    pub fn from_document(doc: &Document) -> DocWireResult<Self> {
        const COMMAND: &str = "create";

        reject_all(doc, COMMAND, &["timeseries", "expireAfterSeconds", "clusteredIndex", "viewOn", "pipeline", "collation"])?;
        ignore_all(doc, COMMAND, &["autoIndexId", "validator", "validationLevel", "validationAction"]);

        Ok(Self {
            namespace: namespace(doc, COMMAND)?,
            capped: optional_bool(doc, COMMAND, "capped")?.unwrap_or(false),
            size: optional_non_negative(doc, COMMAND, "size")?.unwrap_or(0),
            max: optional_non_negative(doc, COMMAND, "max")?.filter(|max| *max > 0),
        })
    }
}

/// Parameters of `drop`.
#[derive(Debug, Clone, PartialEq)]
pub struct DropParams {
    pub namespace: Namespace,
}

impl DropParams {
    pub fn from_document(doc: &Document) -> DocWireResult<Self> {
        ignore_all(doc, "drop", &[]);
        Ok(Self { namespace: namespace(doc, "drop")? })
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
    fn find_defaults_and_options() {
        let params = FindParams::from_document(&d(doc! { "find": "users", "$db": "test" })).unwrap();
        assert_eq!(params.namespace, Namespace::new("test", "users"));
        assert!(params.filter.is_empty());
        assert_eq!((params.skip, params.limit, params.batch_size), (0, 0, None));

        let params = FindParams::from_document(&d(doc! {
            "find": "users",
            "filter": { "a": 1 },
            "limit": -5,
            "batchSize": 2,
            "maxTimeMS": 100,
            "$db": "test",
        }))
        .unwrap();
        assert_eq!(params.limit, 5);
        assert!(params.single_batch);
        assert_eq!(params.batch_size, Some(2));
        assert_eq!(params.max_time, Some(Duration::from_millis(100)));
    }

    #[test]
    fn find_rejects_unimplemented_and_mistyped() {
        let err = FindParams::from_document(&d(doc! { "find": "c", "collation": {}, "$db": "test" })).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotImplemented);

        let err = FindParams::from_document(&d(doc! { "find": "c", "filter": 1, "$db": "test" })).unwrap_err();
        assert_eq!(err.to_string(), "BSON field 'find.filter' is the wrong type 'int', expected type 'object'");

        let err = FindParams::from_document(&d(doc! { "find": "c", "batchSize": -1, "$db": "test" })).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValueNegative);
    }

    #[test]
    fn get_more_requires_long_id() {
        let params = GetMoreParams::from_document(&d(doc! {
            "getMore": 42_i64,
            "collection": "users",
            "batchSize": 3,
            "$db": "test",
        }))
        .unwrap();
        assert_eq!(params.cursor_id, 42);
        assert_eq!(params.namespace.to_string(), "test.users");

        let err = GetMoreParams::from_document(&d(doc! { "getMore": 42, "collection": "users", "$db": "test" }))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TypeMismatch);
    }

    #[test]
    fn update_statements() {
        let params = UpdateParams::from_document(&d(doc! {
            "update": "users",
            "updates": [
                { "q": { "a": 1 }, "u": { "$set": { "b": 2 } }, "multi": true },
                { "q": {}, "u": { "x": 1 }, "upsert": 1 },
            ],
            "$db": "test",
        }))
        .unwrap();
        assert_eq!(params.updates.len(), 2);
        assert!(params.updates[0].multi);
        assert!(params.updates[1].upsert);

        let err = UpdateParams::from_document(&d(doc! {
            "update": "users",
            "updates": [{ "q": {}, "u": { "x": 1 }, "multi": true }],
            "$db": "test",
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "multi update is not supported for replacement-style update");

        let err = UpdateParams::from_document(&d(doc! {
            "update": "users",
            "updates": [{ "q": {}, "u": { "$set": { "x": 1 } }, "arrayFilters": [] }],
            "$db": "test",
        }))
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotImplemented);
    }

    #[test]
    fn delete_limit_must_be_zero_or_one() {
        let err = DeleteParams::from_document(&d(doc! {
            "delete": "users",
            "deletes": [{ "q": {}, "limit": 2 }],
            "$db": "test",
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "The limit field in delete objects must be 0 or 1. Got 2");
    }

    #[test]
    fn insert_documents_must_be_objects() {
        let err = InsertParams::from_document(&d(doc! {
            "insert": "users",
            "documents": [{ "_id": 1 }, 2],
            "$db": "test",
        }))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "BSON field 'insert.documents.1' is the wrong type 'int', expected type 'object'"
        );
    }

    #[test]
    fn explain_inherits_database() {
        let params = ExplainParams::from_document(&d(doc! {
            "explain": { "count": "users", "query": { "a": 1 } },
            "$db": "test",
        }))
        .unwrap();
        assert_eq!(params.command.namespace().to_string(), "test.users");

        let err = ExplainParams::from_document(&d(doc! { "explain": { "aggregate": "users" }, "$db": "test" }))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotImplemented);
    }

    #[test]
    fn kill_cursors_ids() {
        let params = KillCursorsParams::from_document(&d(doc! {
            "killCursors": "users",
            "cursors": [1_i64, 2_i64],
            "$db": "test",
        }))
        .unwrap();
        assert_eq!(params.cursor_ids, vec![1, 2]);
    }
}
