//! The in-memory [`Backend`] implementation.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use docwire_core::{
    backend::{
        Backend, BackendBuilder, Collection, CollectionInfo, CreateCollectionParams, Database, DeleteResult,
        ExplainResult, InsertResult, QueryParams, QueryResult, UpdateResult,
    },
    context::Context,
    document::Document,
    error::{BackendError, BackendErrorCode, DocWireError, DocWireResult},
    iterator::QueryIterator,
    value::Value,
};
use mea::rwlock::RwLock;
use tracing::{debug, info};

use crate::{
    store::{CollectionData, Databases, SharedCollection},
    tail::TailIterator,
};

/// A storage engine that keeps every database in process memory.
///
/// Cloning is cheap; clones share the same data.
///
/// # Example
///
/// ```ignore
/// use docwire_memory::MemoryBackend;
/// use docwire_core::backend::BackendBuilder;
///
/// let backend = MemoryBackend::builder().build().await?;
/// let db = backend.database(&ctx, "test").await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    databases: Arc<RwLock<Databases>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for constructing a `MemoryBackend` with pre-created collections.
    pub fn builder() -> MemoryBackendBuilder {
        MemoryBackendBuilder::default()
    }

    async fn find_collection(&self, db: &str, name: &str) -> Option<SharedCollection> {
        self.databases.read().await.get(db)?.get(name).cloned()
    }

    /// Returns the collection, creating it and its database if needed.
    async fn get_or_create(&self, db: &str, name: &str) -> SharedCollection {
        if let Some(existing) = self.find_collection(db, name).await {
            return existing;
        }

        let mut databases = self.databases.write().await;
        databases
            .entry(db.to_string())
            .or_default()
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(database = db, collection = name, "created collection implicitly");
                Arc::new(RwLock::new(CollectionData::new(None)))
            })
            .clone()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn database(&self, ctx: &Context, name: &str) -> DocWireResult<Box<dyn Database>> {
        ctx.check()?;
        Ok(Box::new(MemoryDatabase { backend: self.clone(), name: name.to_string() }))
    }

    async fn list_databases(&self, ctx: &Context) -> DocWireResult<Vec<String>> {
        ctx.check()?;
        let mut names: Vec<String> = self.databases.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn drop_database(&self, ctx: &Context, name: &str) -> DocWireResult<()> {
        ctx.check()?;
        if self.databases.write().await.remove(name).is_none() {
            return Err(BackendError::new(
                BackendErrorCode::DatabaseDoesNotExist,
                format!("database {name} does not exist"),
            )
            .into());
        }

        info!(database = name, "dropped database");
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryDatabase {
    backend: MemoryBackend,
    name: String,
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn collection(&self, ctx: &Context, name: &str) -> DocWireResult<Box<dyn Collection>> {
        ctx.check()?;
        Ok(Box::new(MemoryCollection {
            backend: self.backend.clone(),
            database: self.name.clone(),
            name: name.to_string(),
        }))
    }

    async fn create_collection(&self, ctx: &Context, params: CreateCollectionParams) -> DocWireResult<()> {
        ctx.check()?;
        let mut databases = self.backend.databases.write().await;
        let collections = databases.entry(self.name.clone()).or_default();

        if collections.contains_key(&params.name) {
            return Err(BackendError::new(
                BackendErrorCode::CollectionAlreadyExists,
                format!("Collection {}.{} already exists.", self.name, params.name),
            )
            .into());
        }

        debug!(database = %self.name, collection = %params.name, capped = params.capped.is_some(), "created collection");
        collections.insert(params.name, Arc::new(RwLock::new(CollectionData::new(params.capped))));
        Ok(())
    }

    async fn drop_collection(&self, ctx: &Context, name: &str) -> DocWireResult<()> {
        ctx.check()?;
        let mut databases = self.backend.databases.write().await;

        let removed = databases.get_mut(&self.name).and_then(|collections| collections.remove(name));
        if removed.is_none() {
            return Err(BackendError::new(
                BackendErrorCode::CollectionDoesNotExist,
                format!("ns {}.{name} not found", self.name),
            )
            .into());
        }

        if databases.get(&self.name).is_some_and(BTreeMap::is_empty) {
            databases.remove(&self.name);
        }

        debug!(database = %self.name, collection = name, "dropped collection");
        Ok(())
    }

    async fn list_collections(&self, ctx: &Context) -> DocWireResult<Vec<CollectionInfo>> {
        ctx.check()?;
        let collections: Vec<(String, SharedCollection)> = match self.backend.databases.read().await.get(&self.name) {
            Some(collections) => collections.iter().map(|(name, data)| (name.clone(), data.clone())).collect(),
            None => return Ok(Vec::new()),
        };

        let mut infos = Vec::with_capacity(collections.len());
        for (name, data) in collections {
            let capped = data.read().await.capped();
            infos.push(CollectionInfo { name, capped });
        }
        Ok(infos)
    }
}

#[derive(Debug)]
struct MemoryCollection {
    backend: MemoryBackend,
    database: String,
    name: String,
}

/// How a query will be answered.
#[derive(Debug, Clone, PartialEq)]
enum Plan {
    /// Look up a single `_id`.
    IdLookup(Value),
    /// Read every document.
    Scan,
    /// Follow the collection as documents are inserted.
    Tail,
}

impl Plan {
    fn name(&self) -> &'static str {
        match self {
            Plan::IdLookup(_) => "IDHACK",
            Plan::Scan => "COLLSCAN",
            Plan::Tail => "TAILSCAN",
        }
    }
}

impl MemoryCollection {
    fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    /// Picks a plan. Only a filter of exactly `{_id: <scalar>}` is pushed down.
    async fn plan(&self, params: &QueryParams) -> DocWireResult<Plan> {
        if params.tailable {
            let capped = match self.backend.find_collection(&self.database, &self.name).await {
                Some(data) => data.read().await.capped().is_some(),
                None => false,
            };
            if !capped {
                return Err(DocWireError::bad_value(format!(
                    "tailable cursor requested on non capped collection {}",
                    self.namespace()
                )));
            }
            return Ok(Plan::Tail);
        }

        let id = params
            .filter
            .as_ref()
            .filter(|filter| filter.len() == 1)
            .and_then(|filter| filter.get("_id"))
            .filter(|id| is_plain_id(id));

        Ok(match id {
            Some(id) => Plan::IdLookup(id.clone()),
            None => Plan::Scan,
        })
    }
}

/// Values that match an `_id` by equality alone.
fn is_plain_id(value: &Value) -> bool {
    !matches!(value, Value::Document(_) | Value::Array(_) | Value::Regex(_))
}

#[async_trait]
impl Collection for MemoryCollection {
    async fn query(&self, ctx: &Context, params: QueryParams) -> DocWireResult<QueryResult> {
        ctx.check()?;
        let plan = self.plan(&params).await?;
        let data = self.backend.find_collection(&self.database, &self.name).await;

        let result = match (plan, data) {
            (Plan::Tail, Some(data)) => QueryResult::unfiltered(QueryIterator::new(TailIterator::new(data))),
            (Plan::IdLookup(id), data) => {
                let docs = match data {
                    Some(data) => data.read().await.get_by_id(&id).cloned().into_iter().collect(),
                    None => Vec::new(),
                };
                QueryResult { iter: QueryIterator::from_documents(docs), filter_pushdown: true, sort_pushdown: true }
            }
            (_, Some(data)) => QueryResult::unfiltered(QueryIterator::from_documents(data.read().await.snapshot())),
            (_, None) => QueryResult::unfiltered(QueryIterator::from_documents(Vec::new())),
        };

        Ok(result)
    }

    async fn insert_all(&self, ctx: &Context, docs: Vec<Document>) -> DocWireResult<InsertResult> {
        ctx.check()?;
        let data = self.backend.get_or_create(&self.database, &self.name).await;
        let namespace = self.namespace();

        let mut guard = data.write().await;
        let mut inserted_count = 0;
        for doc in docs {
            guard.insert(&namespace, doc)?;
            inserted_count += 1;
        }

        Ok(InsertResult { inserted_count })
    }

    async fn update_all(&self, ctx: &Context, docs: Vec<Document>) -> DocWireResult<UpdateResult> {
        ctx.check()?;
        let Some(data) = self.backend.find_collection(&self.database, &self.name).await else {
            return Ok(UpdateResult::default());
        };
        let namespace = self.namespace();

        let mut guard = data.write().await;
        let mut updated_count = 0;
        for doc in docs {
            if guard.replace(&namespace, doc)? {
                updated_count += 1;
            }
        }

        Ok(UpdateResult { updated_count })
    }

    async fn delete_all(&self, ctx: &Context, ids: Vec<Value>) -> DocWireResult<DeleteResult> {
        ctx.check()?;
        let Some(data) = self.backend.find_collection(&self.database, &self.name).await else {
            return Ok(DeleteResult::default());
        };

        let mut guard = data.write().await;
        let deleted_count = ids.iter().filter(|id| guard.remove(id)).count();

        Ok(DeleteResult { deleted_count })
    }

    async fn explain(&self, ctx: &Context, params: QueryParams) -> DocWireResult<ExplainResult> {
        ctx.check()?;
        let plan = self.plan(&params).await?;
        let pushdown = matches!(plan, Plan::IdLookup(_));

        let mut query_plan = Document::new();
        query_plan.set("namespace", self.namespace());
        query_plan.set("engine", "memory");
        query_plan.set("stage", plan.name());
        if let Some(filter) = params.filter {
            query_plan.set("filter", filter);
        }
        if let Plan::IdLookup(id) = plan {
            query_plan.set("key", id);
        }
        if let Some(data) = self.backend.find_collection(&self.database, &self.name).await {
            let data = data.read().await;
            query_plan.set("documents", i64::try_from(data.len()).unwrap_or(i64::MAX));
            query_plan.set("size", i64::try_from(data.size()).unwrap_or(i64::MAX));
        }

        Ok(ExplainResult { query_plan, filter_pushdown: pushdown, sort_pushdown: pushdown })
    }
}

/// Builder for [`MemoryBackend`].
///
/// # Example
///
/// ```ignore
/// use docwire_core::backend::{BackendBuilder, CreateCollectionParams};
/// use docwire_memory::MemoryBackend;
///
/// let backend = MemoryBackend::builder()
///     .collection("test", CreateCollectionParams::new("log").capped(4096, Some(100)))
///     .build()
///     .await?;
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackendBuilder {
    collections: Vec<(String, CreateCollectionParams)>,
}

impl MemoryBackendBuilder {
    /// Creates a collection when the backend is built.
    pub fn collection(mut self, database: impl Into<String>, params: CreateCollectionParams) -> Self {
        self.collections.push((database.into(), params));
        self
    }
}

#[async_trait]
impl BackendBuilder for MemoryBackendBuilder {
    type Backend = MemoryBackend;

    /// Builds the backend and creates the requested collections.
    ///
    /// # Errors
    ///
    /// Returns `CollectionAlreadyExists` if the same collection was requested twice.
    async fn build(self) -> DocWireResult<Self::Backend> {
        let backend = MemoryBackend::new();
        let ctx = Context::background();

        for (database, params) in self.collections {
            backend.database(&ctx, &database).await?.create_collection(&ctx, params).await?;
        }

        Ok(backend)
    }
}
