//! The storage backend contract.
//!
//! This module defines the traits every storage engine implements. The query
//! evaluator and the cursor manager only ever talk to storage through these
//! traits, so they work unchanged over any engine.
//!
//! # Overview
//!
//! - [`Backend`] resolves databases and manages their lifecycle.
//! - [`Database`] resolves collections and manages their lifecycle.
//! - [`Collection`] queries and mutates documents.
//! - [`BackendBuilder`] constructs a backend.
//!
//! Every call takes a [`Context`] and must return promptly with
//! [`DocWireError::Cancelled`](crate::error::DocWireError::Cancelled) or
//! [`DocWireError::MaxTimeExpired`](crate::error::DocWireError::MaxTimeExpired)
//! once the context is done.
//!
//! # Pushdown is optional
//!
//! [`Collection::query`] receives the filter and sort, but a backend is free to
//! ignore them. [`QueryResult`] reports whether the filter and sort were
//! applied; when they were not, callers re-apply them in process. Callers must
//! never assume backend-side filtering happened.
//!
//! # Example
//!
//! ```ignore
//! use docwire_core::{backend::{Backend, QueryParams}, context::Context};
//!
//! let ctx = Context::background();
//! let db = backend.database(&ctx, "test").await?;
//! let coll = db.collection(&ctx, "users").await?;
//! let res = coll.query(&ctx, QueryParams::default()).await?;
//! let docs = res.iter.collect(&ctx).await?;
//! ```

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    context::Context,
    document::Document,
    error::DocWireResult,
    iterator::QueryIterator,
    value::Value,
};

/// Parameters for [`Collection::query`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    /// Filter hint. The backend may apply any subset of it, or none.
    pub filter: Option<Document>,
    /// Sort hint. The backend may ignore it.
    pub sort: Option<Document>,
    /// Limit hint, only honoured when the backend applied the whole filter and sort.
    pub limit: Option<i64>,
    /// Keep the iterator open at end of data and yield documents inserted later.
    pub tailable: bool,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn tailable(mut self, tailable: bool) -> Self {
        self.tailable = tailable;
        self
    }
}

/// The result of [`Collection::query`].
#[derive(Debug)]
pub struct QueryResult {
    pub iter: QueryIterator,
    /// The whole filter was applied by the backend.
    pub filter_pushdown: bool,
    /// The whole sort was applied by the backend.
    pub sort_pushdown: bool,
}

impl QueryResult {
    /// A result that applied neither the filter nor the sort.
    pub fn unfiltered(iter: QueryIterator) -> Self {
        Self { iter, filter_pushdown: false, sort_pushdown: false }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertResult {
    pub inserted_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub updated_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted_count: usize,
}

/// The result of [`Collection::explain`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainResult {
    /// Engine-specific description of the plan.
    pub query_plan: Document,
    pub filter_pushdown: bool,
    pub sort_pushdown: bool,
}

/// Size limits of a capped collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CappedParams {
    /// Maximum total size in bytes.
    pub max_size: i64,
    /// Maximum number of documents, if limited.
    pub max_documents: Option<i64>,
}

/// Parameters for [`Database::create_collection`].
#[derive(Debug, Clone, PartialEq)]
pub struct CreateCollectionParams {
    pub name: String,
    pub capped: Option<CappedParams>,
}

impl CreateCollectionParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), capped: None }
    }

    pub fn capped(mut self, max_size: i64, max_documents: Option<i64>) -> Self {
        self.capped = Some(CappedParams { max_size, max_documents });
        self
    }
}

/// Describes one collection returned by [`Database::list_collections`].
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub capped: Option<CappedParams>,
}

impl CollectionInfo {
    pub fn is_capped(&self) -> bool {
        self.capped.is_some()
    }
}

/// Abstract interface for storage engines.
///
/// Implementations must be safe to share across connection tasks. Connection
/// pools and other engine resources are owned by the implementation.
#[async_trait]
pub trait Backend: Send + Sync + Debug {
    /// Returns a handle to the named database.
    ///
    /// The database does not have to exist; it is created implicitly by the
    /// first write.
    ///
    /// # Errors
    ///
    /// Returns a backend error with
    /// [`BackendErrorCode::DatabaseNameInvalid`](crate::error::BackendErrorCode::DatabaseNameInvalid)
    /// if the name is not valid.
    async fn database(&self, ctx: &Context, name: &str) -> DocWireResult<Box<dyn Database>>;

    /// Lists the names of the existing databases.
    async fn list_databases(&self, ctx: &Context) -> DocWireResult<Vec<String>>;

    /// Drops a database and all its collections.
    ///
    /// # Errors
    ///
    /// Returns a backend error with
    /// [`BackendErrorCode::DatabaseDoesNotExist`](crate::error::BackendErrorCode::DatabaseDoesNotExist)
    /// if there is no such database.
    async fn drop_database(&self, ctx: &Context, name: &str) -> DocWireResult<()>;
}

#[async_trait]
impl<B> Backend for &B
where
    B: Backend + ?Sized,
{
    async fn database(&self, ctx: &Context, name: &str) -> DocWireResult<Box<dyn Database>> {
        (**self).database(ctx, name).await
    }

    async fn list_databases(&self, ctx: &Context) -> DocWireResult<Vec<String>> {
        (**self).list_databases(ctx).await
    }

    async fn drop_database(&self, ctx: &Context, name: &str) -> DocWireResult<()> {
        (**self).drop_database(ctx, name).await
    }
}

#[async_trait]
impl<B> Backend for Arc<B>
where
    B: Backend + ?Sized,
{
    async fn database(&self, ctx: &Context, name: &str) -> DocWireResult<Box<dyn Database>> {
        (**self).database(ctx, name).await
    }

    async fn list_databases(&self, ctx: &Context) -> DocWireResult<Vec<String>> {
        (**self).list_databases(ctx).await
    }

    async fn drop_database(&self, ctx: &Context, name: &str) -> DocWireResult<()> {
        (**self).drop_database(ctx, name).await
    }
}

/// A database within a backend.
#[async_trait]
pub trait Database: Send + Sync + Debug {
    /// Returns a handle to the named collection.
    ///
    /// The collection does not have to exist; queries against a missing
    /// collection return no documents and inserts create it.
    async fn collection(&self, ctx: &Context, name: &str) -> DocWireResult<Box<dyn Collection>>;

    /// Creates a collection.
    ///
    /// # Errors
    ///
    /// Returns a backend error with
    /// [`BackendErrorCode::CollectionAlreadyExists`](crate::error::BackendErrorCode::CollectionAlreadyExists)
    /// if it exists already.
    async fn create_collection(&self, ctx: &Context, params: CreateCollectionParams) -> DocWireResult<()>;

    /// Drops a collection and all its documents.
    ///
    /// # Errors
    ///
    /// Returns a backend error with
    /// [`BackendErrorCode::CollectionDoesNotExist`](crate::error::BackendErrorCode::CollectionDoesNotExist)
    /// if there is no such collection.
    async fn drop_collection(&self, ctx: &Context, name: &str) -> DocWireResult<()>;

    /// Lists the collections of this database, sorted by name.
    async fn list_collections(&self, ctx: &Context) -> DocWireResult<Vec<CollectionInfo>>;
}

/// A collection of documents.
#[async_trait]
pub trait Collection: Send + Sync + Debug {
    /// Starts a query and returns a pull iterator over the results.
    ///
    /// # Arguments
    ///
    /// * `params` - Filter and sort hints, limit, and the tailable flag
    ///
    /// # Returns
    ///
    /// A [`QueryResult`] whose iterator yields documents and whose flags report
    /// which hints were applied.
    async fn query(&self, ctx: &Context, params: QueryParams) -> DocWireResult<QueryResult>;

    /// Inserts documents, creating the collection if needed.
    ///
    /// # Arguments
    ///
    /// * `docs` - Documents ready for storage; each has an `_id`
    ///
    /// # Errors
    ///
    /// Returns a backend error with
    /// [`BackendErrorCode::DuplicateKey`](crate::error::BackendErrorCode::DuplicateKey)
    /// if any `_id` collides with a stored document. Documents before the
    /// colliding one stay inserted.
    async fn insert_all(&self, ctx: &Context, docs: Vec<Document>) -> DocWireResult<InsertResult>;

    /// Replaces stored documents that have the same `_id` as the given ones.
    ///
    /// Documents with no stored counterpart are skipped and not counted.
    async fn update_all(&self, ctx: &Context, docs: Vec<Document>) -> DocWireResult<UpdateResult>;

    /// Deletes the documents with the given `_id` values.
    ///
    /// Missing ids are skipped and not counted.
    async fn delete_all(&self, ctx: &Context, ids: Vec<Value>) -> DocWireResult<DeleteResult>;

    /// Describes how the backend would run a query.
    async fn explain(&self, ctx: &Context, params: QueryParams) -> DocWireResult<ExplainResult>;
}

/// Factory trait for creating backends.
#[async_trait]
pub trait BackendBuilder {
    type Backend: Backend;

    async fn build(self) -> DocWireResult<Self::Backend>;
}
