//! The cursor registry.
//!
//! [`CursorManager`] keeps every open cursor in a map shared by all
//! connections. The map lock is held only to look up, insert or remove an
//! entry; each cursor then has its own async mutex, so a slow `getMore` on one
//! cursor never blocks another, and two `getMore` calls on the same cursor run
//! one after the other.
//!
//! A cursor goes through three states:
//!
//! - open: registered, with unread results;
//! - exhausted: the batch that read the last document reports id 0 and the
//!   cursor is removed;
//! - closed: removed by `killCursors`, an idle timeout, the owning connection
//!   closing, a failed fetch, or shutdown.
//!
//! Tailable cursors are never exhausted. Reaching the end of the current data
//! returns an empty batch and keeps the id valid.

use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use docwire_core::{
    config::CursorConfig,
    context::Context,
    document::Document,
    error::{DocWireError, DocWireResult, ErrorCode},
    iterator::{DocumentIterator, QueryIterator},
};
use mea::{mutex::Mutex, rwlock::RwLock};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cursor::{ConnectionId, CursorBatch, CursorParams, Namespace};

#[derive(Debug)]
struct CursorState {
    iter: QueryIterator,
    /// A document read ahead to tell whether the previous batch was the last.
    lookahead: Option<Document>,
    closed: bool,
}

impl CursorState {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.lookahead = None;
            self.iter.close();
        }
    }
}

#[derive(Debug)]
struct CursorEntry {
    id: i64,
    namespace: Namespace,
    owner: ConnectionId,
    tailable: bool,
    /// Batch size given when the cursor was opened.
    batch_size: i64,
    /// Milliseconds since the manager's epoch.
    last_used: AtomicU64,
    state: Mutex<CursorState>,
}

#[derive(Debug)]
struct Inner {
    cursors: RwLock<HashMap<i64, Arc<CursorEntry>>>,
    config: CursorConfig,
    epoch: Instant,
}

impl Inner {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Tracks open cursors across connections.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Debug, Clone)]
pub struct CursorManager {
    inner: Arc<Inner>,
}

/// How many documents a fetch may return.
#[derive(Debug, Clone, Copy)]
enum Limit {
    Count(usize),
    Unlimited,
}

impl Limit {
    fn reached(self, n: usize) -> bool {
        matches!(self, Limit::Count(max) if n >= max)
    }
}

enum Fetched {
    /// The batch, and whether the iterator is exhausted.
    Batch(Vec<Document>, bool),
    /// The fetch failed after some documents were read.
    Partial(Vec<Document>),
}

impl CursorManager {
    pub fn new(config: CursorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                cursors: RwLock::new(HashMap::new()),
                config,
                epoch: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> &CursorConfig {
        &self.inner.config
    }

    /// Returns the number of open cursors.
    pub async fn len(&self) -> usize {
        self.inner.cursors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns true if `cursor_id` refers to an open cursor.
    pub async fn contains(&self, cursor_id: i64) -> bool {
        self.inner.cursors.read().await.contains_key(&cursor_id)
    }

    /// Opens a cursor over `iter` and returns its first batch.
    ///
    /// A `batch_size` of 0 returns an empty first batch without reading from
    /// `iter`. The next `getMore` without a batch size then returns everything
    /// that is left, so `{batchSize: 0}` means "empty now, unlimited later"
    /// rather than "small batches". Clients depend on that asymmetry.
    ///
    /// When the first batch reads the last document the cursor is never
    /// registered and the batch reports id 0, unless the cursor is tailable.
    ///
    /// # Errors
    ///
    /// Returns `ValueNegative` for a negative batch size, or any error raised
    /// by `iter`; the iterator is closed in both cases.
    pub async fn open(&self, ctx: &Context, iter: QueryIterator, params: CursorParams) -> DocWireResult<CursorBatch> {
        let mut iter = iter;
        let batch_size = params.batch_size.unwrap_or(self.inner.config.default_batch_size);
        if batch_size < 0 {
            iter.close();
            return Err(negative_batch_size(batch_size));
        }

        let mut state = CursorState { iter, lookahead: None, closed: false };

        let (documents, exhausted) = if batch_size == 0 {
            (Vec::new(), false)
        } else {
            match fetch(ctx, &mut state, limit_of(batch_size), params.tailable).await {
                Ok(Fetched::Batch(docs, exhausted)) => (docs, exhausted),
                Ok(Fetched::Partial(docs)) => {
                    // Out of time with documents in hand: return them and
                    // drop the cursor, so the next getMore reports it gone.
                    state.close();
                    debug!(namespace = %params.namespace, batch = docs.len(), "cursor abandoned after partial first batch");
                    return Ok(CursorBatch { cursor_id: 0, namespace: params.namespace, documents: docs });
                }
                Err(err) => {
                    state.close();
                    return Err(err);
                }
            }
        };

        if exhausted && !params.tailable {
            state.close();
            return Ok(CursorBatch { cursor_id: 0, namespace: params.namespace, documents });
        }

        // Only an explicit size carries over to getMore; the default covers
        // the first batch alone.
        let next_batch_size = params.batch_size.unwrap_or(0);
        let id = self.register(params.namespace.clone(), params.owner, params.tailable, next_batch_size, state).await;
        debug!(cursor_id = id, namespace = %params.namespace, owner = %params.owner, batch = documents.len(), "cursor opened");

        Ok(CursorBatch { cursor_id: id, namespace: params.namespace, documents })
    }

    async fn register(
        &self,
        namespace: Namespace,
        owner: ConnectionId,
        tailable: bool,
        batch_size: i64,
        state: CursorState,
    ) -> i64 {
        let mut cursors = self.inner.cursors.write().await;

        let id = loop {
            let candidate = random_cursor_id();
            if !cursors.contains_key(&candidate) {
                break candidate;
            }
        };

        cursors.insert(
            id,
            Arc::new(CursorEntry {
                id,
                namespace,
                owner,
                tailable,
                batch_size,
                last_used: AtomicU64::new(self.inner.now_ms()),
                state: Mutex::new(state),
            }),
        );

        id
    }

    /// Returns the next batch of an open cursor.
    ///
    /// The batch holds at most `batch_size` documents. Without a batch size,
    /// the size passed explicitly to `open` is used if it was positive;
    /// otherwise the batch is unlimited. The configured default only sizes the
    /// first batch. A batch size of 0 is also unlimited.
    ///
    /// `max_time` bounds this call only. When it passes before any document
    /// was read, the cursor is closed and `MaxTimeMSExpired` is returned. When
    /// it passes after some were read, those are returned with cursor id 0 and
    /// the cursor is closed.
    ///
    /// # Errors
    ///
    /// - `CursorNotFound` if the cursor does not exist or was closed
    /// - `Unauthorized` if the cursor belongs to another namespace
    /// - `ValueNegative` for a negative batch size
    /// - `MaxTimeMSExpired` as described above, or any iterator error
    pub async fn get_more(
        &self,
        ctx: &Context,
        cursor_id: i64,
        namespace: &Namespace,
        batch_size: Option<i64>,
        max_time: Option<Duration>,
    ) -> DocWireResult<CursorBatch> {
        if let Some(size) = batch_size.filter(|s| *s < 0) {
            return Err(negative_batch_size(size));
        }

        let entry = self
            .inner
            .cursors
            .read()
            .await
            .get(&cursor_id)
            .cloned()
            .ok_or(DocWireError::CursorNotFound(cursor_id))?;

        if entry.namespace != *namespace {
            return Err(DocWireError::Unauthorized {
                requested: namespace.to_string(),
                owner: entry.namespace.to_string(),
            });
        }

        let mut state = entry.state.lock().await;
        if state.closed {
            return Err(DocWireError::CursorNotFound(cursor_id));
        }
        entry.last_used.store(self.inner.now_ms(), Ordering::Relaxed);

        let limit = match batch_size {
            Some(size) => limit_of(size),
            None => limit_of(entry.batch_size),
        };
        let call_ctx = match max_time {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        };

        match fetch(&call_ctx, &mut state, limit, entry.tailable).await {
            Ok(Fetched::Batch(documents, exhausted)) => {
                if exhausted && !entry.tailable {
                    state.close();
                    drop(state);
                    self.remove(cursor_id).await;
                    debug!(cursor_id, batch = documents.len(), "cursor exhausted");
                    return Ok(CursorBatch { cursor_id: 0, namespace: namespace.clone(), documents });
                }
                Ok(CursorBatch { cursor_id, namespace: namespace.clone(), documents })
            }
            Ok(Fetched::Partial(documents)) => {
                state.close();
                drop(state);
                self.remove(cursor_id).await;
                debug!(cursor_id, batch = documents.len(), "cursor closed after partial batch");
                Ok(CursorBatch { cursor_id: 0, namespace: namespace.clone(), documents })
            }
            Err(err) => {
                state.close();
                drop(state);
                self.remove(cursor_id).await;
                debug!(cursor_id, error = %err, "cursor closed after failed fetch");
                Err(err)
            }
        }
    }

    async fn remove(&self, cursor_id: i64) -> Option<Arc<CursorEntry>> {
        self.inner.cursors.write().await.remove(&cursor_id)
    }

    /// Closes a cursor. Returns false if it was not open.
    ///
    /// Waits for an in-flight `getMore` on the same cursor to finish.
    pub async fn close(&self, cursor_id: i64) -> bool {
        let Some(entry) = self.remove(cursor_id).await else {
            return false;
        };
        entry.state.lock().await.close();
        debug!(cursor_id, "cursor closed");
        true
    }

    /// Closes several cursors, returning the ids that were closed and those
    /// that were not found.
    pub async fn kill(&self, cursor_ids: &[i64]) -> (Vec<i64>, Vec<i64>) {
        let mut killed = Vec::new();
        let mut not_found = Vec::new();
        for &id in cursor_ids {
            if self.close(id).await {
                killed.push(id);
            } else {
                not_found.push(id);
            }
        }
        (killed, not_found)
    }

    async fn close_where(&self, pred: impl Fn(&CursorEntry) -> bool) -> usize {
        let removed: Vec<Arc<CursorEntry>> = {
            let mut cursors = self.inner.cursors.write().await;
            let ids: Vec<i64> = cursors.values().filter(|e| pred(e)).map(|e| e.id).collect();
            ids.iter().filter_map(|id| cursors.remove(id)).collect()
        };

        for entry in &removed {
            entry.state.lock().await.close();
        }
        removed.len()
    }

    /// Closes every cursor owned by a connection. Called when it disconnects.
    pub async fn close_owned_by(&self, owner: ConnectionId) -> usize {
        let closed = self.close_where(|e| e.owner == owner).await;
        if closed > 0 {
            debug!(%owner, closed, "closed cursors of disconnected connection");
        }
        closed
    }

    /// Closes cursors unused for longer than the idle timeout.
    pub async fn reap_idle(&self) -> usize {
        let timeout = u64::try_from(self.inner.config.idle_timeout().as_millis()).unwrap_or(u64::MAX);
        let now = self.inner.now_ms();

        let reaped = self
            .close_where(|e| now.saturating_sub(e.last_used.load(Ordering::Relaxed)) > timeout)
            .await;
        if reaped > 0 {
            info!(reaped, "reaped idle cursors");
        }
        reaped
    }

    /// Spawns a task that reaps idle cursors periodically.
    ///
    /// The task stops once every clone of the manager is dropped.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.reap_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                CursorManager { inner }.reap_idle().await;
            }
        })
    }

    /// Closes every cursor.
    pub async fn shutdown(&self) {
        let closed = self.close_where(|_| true).await;
        if closed > 0 {
            warn!(closed, "closed open cursors on shutdown");
        }
    }
}

fn negative_batch_size(size: i64) -> DocWireError {
    DocWireError::command(
        ErrorCode::ValueNegative,
        format!("BSON field 'batchSize' value must be >= 0, actual value '{size}'"),
    )
}

fn limit_of(batch_size: i64) -> Limit {
    match usize::try_from(batch_size) {
        Ok(0) | Err(_) => Limit::Unlimited,
        Ok(n) => Limit::Count(n),
    }
}

/// A random positive non-zero id.
fn random_cursor_id() -> i64 {
    loop {
        let id = (Uuid::new_v4().as_u128() as i64) & i64::MAX;
        if id != 0 {
            return id;
        }
    }
}

/// Reads up to `limit` documents. Non-tailable cursors read one document
/// ahead so an exhausted iterator is reported on the batch that drained it.
async fn fetch(ctx: &Context, state: &mut CursorState, limit: Limit, tailable: bool) -> DocWireResult<Fetched> {
    let mut docs = Vec::new();
    if let Some(doc) = state.lookahead.take() {
        docs.push(doc);
    }

    while !limit.reached(docs.len()) {
        match state.iter.next(ctx).await {
            Ok(Some((_, doc))) => docs.push(doc),
            Ok(None) => return Ok(Fetched::Batch(docs, !tailable)),
            Err(err) => return partial_or(err, docs),
        }
    }

    if tailable {
        return Ok(Fetched::Batch(docs, false));
    }

    match state.iter.next(ctx).await {
        Ok(Some((_, doc))) => {
            state.lookahead = Some(doc);
            Ok(Fetched::Batch(docs, false))
        }
        Ok(None) => Ok(Fetched::Batch(docs, true)),
        Err(err) => partial_or(err, docs),
    }
}

fn partial_or(err: DocWireError, docs: Vec<Document>) -> DocWireResult<Fetched> {
    match err {
        DocWireError::MaxTimeExpired if !docs.is_empty() => Ok(Fetched::Partial(docs)),
        err => Err(err),
    }
}
