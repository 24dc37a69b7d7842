//! A thin command handler over a backend, the evaluator and the cursor registry.
//!
//! The wire layer decodes a command into a [`Document`] and passes it to
//! [`Connection::handle`], which returns the reply document. Failed commands
//! produce an error reply; the connection stays usable.
//!
//! # Example
//!
//! ```ignore
//! use docwire::{handler::Handler, memory::MemoryBackend};
//!
//! let handler = Handler::new(MemoryBackend::new(), HandlerConfig::default())?;
//! let _reaper = handler.spawn_reaper();
//!
//! let conn = handler.connect();
//! let reply = conn.handle(&command).await;
//! conn.close().await;
//! ```

use std::sync::Arc;

use docwire_core::{
    backend::{Backend, Collection, CreateCollectionParams, QueryParams},
    config::HandlerConfig,
    context::{CancelHandle, Context},
    contract::ContractBackend,
    document::{Array, Document},
    error::{DocWireError, DocWireResult},
    value::Value,
};
use docwire_cursor::{ConnectionId, CursorBatch, CursorManager, CursorParams, Namespace};
use docwire_query::{Evaluator, Pipeline, projection::Projection, sort::SortSpec};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::commands::{
    CountParams, CreateParams, DeleteParams, DropParams, Explained, ExplainParams, FindParams, GetMoreParams,
    InsertParams, KillCursorsParams, UpdateParams, UpdateStatement,
};

#[derive(Debug)]
struct HandlerInner {
    backend: Box<dyn Backend>,
    evaluator: Evaluator,
    cursors: CursorManager,
}

/// Shared state for every connection. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Handler {
    inner: Arc<HandlerInner>,
}

impl Handler {
    /// Creates a handler over `backend`.
    ///
    /// The backend is wrapped in a [`ContractBackend`], so names and documents
    /// are validated before they reach it.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the operator registries are inconsistent.
    pub fn new<B: Backend + 'static>(backend: B, config: HandlerConfig) -> DocWireResult<Self> {
        Ok(Self {
            inner: Arc::new(HandlerInner {
                backend: Box::new(ContractBackend::new(backend)),
                evaluator: Evaluator::new()?,
                cursors: CursorManager::new(config.cursors),
            }),
        })
    }

    pub fn cursors(&self) -> &CursorManager {
        &self.inner.cursors
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.inner.evaluator
    }

    /// Starts the idle cursor reaper. Must be called inside a tokio runtime.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        self.inner.cursors.spawn_reaper()
    }

    /// Opens a new client connection.
    pub fn connect(&self) -> Connection {
        let (ctx, cancel) = Context::new();
        let id = ConnectionId::new();
        debug!(connection = %id, "connection opened");
        Connection { id, ctx, cancel, handler: self.clone() }
    }

    /// Closes every open cursor.
    pub async fn shutdown(&self) {
        self.inner.cursors.shutdown().await;
    }
}

/// One client connection.
///
/// Commands run one at a time per connection. Dropping the connection cancels
/// its in-flight backend calls; [`Connection::close`] also closes its cursors.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    ctx: Context,
    cancel: CancelHandle,
    handler: Handler,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Per-statement failures of a write command.
#[derive(Debug, Default)]
struct WriteErrors(Vec<Value>);

impl WriteErrors {
    /// Records `err` for statement `index`, or returns it if it fails the whole command.
    fn record(&mut self, index: usize, err: DocWireError) -> DocWireResult<()> {
        if matches!(err, DocWireError::Cancelled | DocWireError::MaxTimeExpired | DocWireError::Internal(_)) {
            return Err(err);
        }

        let mut entry = Document::new();
        entry.set("index", count_value(index));
        entry.set("code", err.code().code());
        entry.set("errmsg", err.to_string());
        self.0.push(Value::Document(entry));
        Ok(())
    }

    fn write_to(self, reply: &mut Document) {
        if !self.0.is_empty() {
            reply.set("writeErrors", Array::from(self.0));
        }
    }
}

fn count_value(n: usize) -> Value {
    match i32::try_from(n) {
        Ok(n) => Value::Int32(n),
        Err(_) => Value::Int64(i64::try_from(n).unwrap_or(i64::MAX)),
    }
}

fn ok_reply(mut reply: Document) -> Document {
    reply.set("ok", 1.0);
    reply
}

fn cursor_reply(batch: CursorBatch, key: &str) -> Document {
    let docs: Vec<Value> = batch.documents.into_iter().map(Value::Document).collect();

    let mut cursor = Document::new();
    cursor.set(key, Array::from(docs));
    cursor.set("id", batch.cursor_id);
    cursor.set("ns", batch.namespace.to_string());

    let mut reply = Document::new();
    reply.set("cursor", cursor);
    ok_reply(reply)
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Runs a command and returns its reply, rendering failures as error replies.
    pub async fn handle(&self, command: &Document) -> Document {
        match self.run(command).await {
            Ok(reply) => reply,
            Err(err) => {
                debug!(connection = %self.id, error = %err, "command failed");
                err.to_reply()
            }
        }
    }

    /// Runs a command.
    ///
    /// # Errors
    ///
    /// Returns the command's error. Errors of individual write statements are
    /// reported in the reply's `writeErrors` instead.
    pub async fn run(&self, command: &Document) -> DocWireResult<Document> {
        let name = command.first_key().ok_or_else(|| DocWireError::bad_value("empty command document"))?;
        debug!(connection = %self.id, command = name, "handling command");

        match name {
            "find" => self.find(FindParams::from_document(command)?).await,
            "getMore" => self.get_more(GetMoreParams::from_document(command)?).await,
            "killCursors" => self.kill_cursors(KillCursorsParams::from_document(command)?).await,
            "insert" => self.insert(InsertParams::from_document(command)?).await,
            "update" => self.update(UpdateParams::from_document(command)?).await,
            "delete" => self.delete(DeleteParams::from_document(command)?).await,
            "count" => self.count(CountParams::from_document(command)?).await,
            "explain" => self.explain(ExplainParams::from_document(command)?).await,
            "create" => self.create(CreateParams::from_document(command)?).await,
            "drop" => self.drop_collection(DropParams::from_document(command)?).await,
            other => Err(DocWireError::NotImplemented(format!("no such command: '{other}'"))),
        }
    }

    /// Cancels in-flight work and closes the cursors this connection opened.
    pub async fn close(self) {
        self.cancel.cancel();
        let closed = self.handler.inner.cursors.close_owned_by(self.id).await;
        info!(connection = %self.id, closed_cursors = closed, "connection closed");
    }

    async fn collection(&self, ctx: &Context, namespace: &Namespace) -> DocWireResult<Box<dyn Collection>> {
        let backend = &self.handler.inner.backend;
        backend.database(ctx, &namespace.database).await?.collection(ctx, &namespace.collection).await
    }

    fn evaluator(&self) -> &Evaluator {
        &self.handler.inner.evaluator
    }

    async fn find(&self, params: FindParams) -> DocWireResult<Document> {
        if params.tailable && params.sort.as_ref().is_some_and(|sort| !sort.is_empty()) {
            return Err(DocWireError::bad_value("cannot use tailable option with a sort"));
        }

        let filter = self.evaluator().compile_filter(&params.filter)?;
        let sort = params.sort.as_ref().map(SortSpec::compile).transpose()?;
        let projection = params.projection.as_ref().map(Projection::compile).transpose()?;

        let ctx = match params.max_time {
            Some(timeout) => self.ctx.with_timeout(timeout),
            None => self.ctx.clone(),
        };

        let mut query = QueryParams::new().filter(params.filter.clone()).tailable(params.tailable);
        if let Some(sort) = &params.sort {
            query = query.sort(sort.clone());
        }
        if params.limit > 0 {
            query = query.limit(i64::try_from(params.limit).unwrap_or(i64::MAX));
        }

        let coll = self.collection(&ctx, &params.namespace).await?;
        let result = coll.query(&ctx, query).await?;

        let pipeline = Pipeline { filter: Some(filter), sort, skip: params.skip, limit: params.limit, projection };
        let iter = pipeline.wrap(result.iter, result.filter_pushdown, result.sort_pushdown);

        let mut cursor = CursorParams::new(params.namespace, self.id).tailable(params.tailable);
        let batch_size = match params.batch_size {
            Some(size) => Some(size),
            None if params.single_batch && params.limit > 0 => Some(i64::try_from(params.limit).unwrap_or(i64::MAX)),
            None => None,
        };
        if let Some(size) = batch_size {
            cursor = cursor.batch_size(size);
        }

        let cursors = &self.handler.inner.cursors;
        let mut batch = cursors.open(&ctx, iter, cursor).await?;
        if params.single_batch && batch.cursor_id != 0 {
            cursors.close(batch.cursor_id).await;
            batch.cursor_id = 0;
        }

        Ok(cursor_reply(batch, "firstBatch"))
    }

    async fn get_more(&self, params: GetMoreParams) -> DocWireResult<Document> {
        let batch = self
            .handler
            .inner
            .cursors
            .get_more(&self.ctx, params.cursor_id, &params.namespace, params.batch_size, params.max_time)
            .await?;

        Ok(cursor_reply(batch, "nextBatch"))
    }

    async fn kill_cursors(&self, params: KillCursorsParams) -> DocWireResult<Document> {
        let (killed, not_found) = self.handler.inner.cursors.kill(&params.cursor_ids).await;
        let ids = |ids: Vec<i64>| Array::from(ids.into_iter().map(Value::Int64).collect::<Vec<_>>());

        let mut reply = Document::new();
        reply.set("cursorsKilled", ids(killed));
        reply.set("cursorsNotFound", ids(not_found));
        reply.set("cursorsAlive", Array::new());
        reply.set("cursorsUnknown", Array::new());
        Ok(ok_reply(reply))
    }

    async fn insert(&self, params: InsertParams) -> DocWireResult<Document> {
        let coll = self.collection(&self.ctx, &params.namespace).await?;

        let mut inserted = 0;
        let mut errors = WriteErrors::default();
        for (index, mut doc) in params.documents.into_iter().enumerate() {
            doc.ensure_id();
            match coll.insert_all(&self.ctx, vec![doc]).await {
                Ok(res) => inserted += res.inserted_count,
                Err(err) => {
                    errors.record(index, err)?;
                    if params.ordered {
                        break;
                    }
                }
            }
        }

        let mut reply = Document::new();
        reply.set("n", count_value(inserted));
        errors.write_to(&mut reply);
        Ok(ok_reply(reply))
    }

    async fn update(&self, params: UpdateParams) -> DocWireResult<Document> {
        let coll = self.collection(&self.ctx, &params.namespace).await?;

        let mut matched = 0;
        let mut modified = 0;
        let mut upserted = Vec::new();
        let mut errors = WriteErrors::default();

        for (index, statement) in params.updates.into_iter().enumerate() {
            match self.update_one(coll.as_ref(), &statement).await {
                Ok(outcome) => {
                    matched += outcome.matched;
                    modified += outcome.modified;
                    if let Some(id) = outcome.upserted_id {
                        let mut entry = Document::new();
                        entry.set("index", count_value(index));
                        entry.set("_id", id);
                        upserted.push(Value::Document(entry));
                    }
                }
                Err(err) => {
                    errors.record(index, err)?;
                    if params.ordered {
                        break;
                    }
                }
            }
        }

        let mut reply = Document::new();
        reply.set("n", count_value(matched + upserted.len()));
        reply.set("nModified", count_value(modified));
        if !upserted.is_empty() {
            reply.set("upserted", Array::from(upserted));
        }
        errors.write_to(&mut reply);
        Ok(ok_reply(reply))
    }

    async fn update_one(
        &self,
        coll: &dyn Collection,
        statement: &UpdateStatement,
    ) -> DocWireResult<UpdateOutcome> {
        let filter = self.evaluator().compile_filter(&statement.filter)?;
        let update = self.evaluator().compile_update(&statement.update)?;

        let result = coll.query(&self.ctx, QueryParams::new().filter(statement.filter.clone())).await?;
        let pipeline = Pipeline {
            filter: Some(filter.clone()),
            limit: if statement.multi { 0 } else { 1 },
            ..Default::default()
        };
        let docs = pipeline.wrap(result.iter, result.filter_pushdown, true).collect(&self.ctx).await?;

        if docs.is_empty() {
            if !statement.upsert {
                return Ok(UpdateOutcome::default());
            }

            let doc = update.upsert_document(&filter)?;
            let id = doc.get("_id").cloned();
            coll.insert_all(&self.ctx, vec![doc]).await?;
            debug!(connection = %self.id, "upserted document");
            return Ok(UpdateOutcome { upserted_id: id, ..Default::default() });
        }

        let matched = docs.len();
        let mut changed = Vec::new();
        for mut doc in docs {
            if update.apply(&mut doc, false)? {
                changed.push(doc);
            }
        }

        let modified = if changed.is_empty() { 0 } else { coll.update_all(&self.ctx, changed).await?.updated_count };

        Ok(UpdateOutcome { matched, modified, upserted_id: None })
    }

    async fn delete(&self, params: DeleteParams) -> DocWireResult<Document> {
        let coll = self.collection(&self.ctx, &params.namespace).await?;

        let mut deleted = 0;
        let mut errors = WriteErrors::default();
        for (index, statement) in params.deletes.into_iter().enumerate() {
            let res = async {
                let filter = self.evaluator().compile_filter(&statement.filter)?;
                let result = coll.query(&self.ctx, QueryParams::new().filter(statement.filter.clone())).await?;
                let pipeline = Pipeline {
                    filter: Some(filter),
                    limit: u64::from(statement.single),
                    ..Default::default()
                };

                let ids: Vec<Value> = pipeline
                    .wrap(result.iter, result.filter_pushdown, true)
                    .collect(&self.ctx)
                    .await?
                    .into_iter()
                    .filter_map(|mut doc| doc.remove("_id"))
                    .collect();

                Ok::<_, DocWireError>(coll.delete_all(&self.ctx, ids).await?.deleted_count)
            }
            .await;

            match res {
                Ok(n) => deleted += n,
                Err(err) => {
                    errors.record(index, err)?;
                    if params.ordered {
                        break;
                    }
                }
            }
        }

        let mut reply = Document::new();
        reply.set("n", count_value(deleted));
        errors.write_to(&mut reply);
        Ok(ok_reply(reply))
    }

    async fn count(&self, params: CountParams) -> DocWireResult<Document> {
        let filter = self.evaluator().compile_filter(&params.filter)?;
        let coll = self.collection(&self.ctx, &params.namespace).await?;
        let result = coll.query(&self.ctx, QueryParams::new().filter(params.filter.clone())).await?;

        let pipeline = Pipeline { filter: Some(filter), skip: params.skip, limit: params.limit, ..Default::default() };
        let n = pipeline.wrap(result.iter, result.filter_pushdown, true).collect(&self.ctx).await?.len();

        let mut reply = Document::new();
        reply.set("n", count_value(n));
        Ok(ok_reply(reply))
    }

    async fn explain(&self, params: ExplainParams) -> DocWireResult<Document> {
        let (namespace, query) = match params.command {
            Explained::Find(find) => {
                let mut query = QueryParams::new().filter(find.filter);
                if let Some(sort) = find.sort {
                    query = query.sort(sort);
                }
                (find.namespace, query)
            }
            Explained::Count(count) => (count.namespace, QueryParams::new().filter(count.filter)),
        };

        let coll = self.collection(&self.ctx, &namespace).await?;
        let explained = coll.explain(&self.ctx, query).await?;

        let mut reply = Document::new();
        reply.set("queryPlanner", explained.query_plan);
        reply.set("explainVersion", "1");
        reply.set("filterPushdown", explained.filter_pushdown);
        reply.set("sortPushdown", explained.sort_pushdown);
        Ok(ok_reply(reply))
    }

    async fn create(&self, params: CreateParams) -> DocWireResult<Document> {
        let mut create = CreateCollectionParams::new(params.namespace.collection.clone());
        if params.capped {
            create = create.capped(params.size, params.max);
        }

        let db = self.handler.inner.backend.database(&self.ctx, &params.namespace.database).await?;
        db.create_collection(&self.ctx, create).await?;
        Ok(ok_reply(Document::new()))
    }

    async fn drop_collection(&self, params: DropParams) -> DocWireResult<Document> {
        let db = self.handler.inner.backend.database(&self.ctx, &params.namespace.database).await?;
        db.drop_collection(&self.ctx, &params.namespace.collection).await?;

        let mut reply = Document::new();
        reply.set("ns", params.namespace.to_string());
        Ok(ok_reply(reply))
    }
}

#[derive(Debug, Default)]
struct UpdateOutcome {
    matched: usize,
    modified: usize,
    upserted_id: Option<Value>,
}

#[cfg(test)]
mod tests {
    use docwire_core::error::ErrorCode;

    use super::*;

    #[test]
    fn write_error_index_is_not_clamped() {
        let mut errors = WriteErrors::default();
        errors.record(3, DocWireError::bad_value("x")).unwrap();
        errors.record(usize::try_from(i64::from(i32::MAX) + 1).unwrap(), DocWireError::bad_value("y")).unwrap();

        let mut reply = Document::new();
        errors.write_to(&mut reply);
        let entries = reply["writeErrors"].as_array().unwrap();
        let index = |i: usize| entries.get(i).unwrap().as_document().unwrap()["index"].clone();
        assert_eq!(index(0), Value::Int32(3));
        assert_eq!(index(1), Value::Int64(i64::from(i32::MAX) + 1));
        assert_eq!(
            entries.get(0).unwrap().as_document().unwrap()["code"],
            Value::Int32(ErrorCode::BadValue.code())
        );
    }

    #[test]
    fn fatal_errors_fail_the_whole_write() {
        let mut errors = WriteErrors::default();
        assert_eq!(errors.record(0, DocWireError::Cancelled), Err(DocWireError::Cancelled));
    }
}
