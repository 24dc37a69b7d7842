//! Cursor identity and batch types.

use std::fmt;

use docwire_core::document::Document;
use uuid::Uuid;

/// Identifies the client connection that owns a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A database and collection pair. Rendered as `db.collection`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self { database: database.into(), collection: collection.into() }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Options for opening a cursor.
#[derive(Debug, Clone)]
pub struct CursorParams {
    pub namespace: Namespace,
    pub owner: ConnectionId,
    /// Size of the first batch. `None` uses the configured default.
    pub batch_size: Option<i64>,
    /// Keep the cursor open when it catches up with the data.
    pub tailable: bool,
}

impl CursorParams {
    pub fn new(namespace: Namespace, owner: ConnectionId) -> Self {
        Self { namespace, owner, batch_size: None, tailable: false }
    }

    pub fn batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn tailable(mut self, tailable: bool) -> Self {
        self.tailable = tailable;
        self
    }
}

/// One batch of results.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorBatch {
    /// The id to pass to the next `getMore`, or 0 when the results are exhausted.
    pub cursor_id: i64,
    pub namespace: Namespace,
    pub documents: Vec<Document>,
}

impl CursorBatch {
    /// Returns true if no more batches follow.
    pub fn is_last(&self) -> bool {
        self.cursor_id == 0
    }
}
