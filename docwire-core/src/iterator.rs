//! The pull-based document iterator contract.
//!
//! Backends hand results back as a [`DocumentIterator`]. Each call to
//! [`DocumentIterator::next`] observes the [`Context`] before doing any work and
//! yields `(index, document)` pairs, where `index` counts from zero. `Ok(None)`
//! marks the end of the stream.
//!
//! Every iterator must be closed on every exit path. [`QueryIterator`] owns a
//! boxed iterator and closes it when dropped, so holding results in a
//! `QueryIterator` is enough to meet that obligation.

use std::{collections::VecDeque, fmt::Debug};

use async_trait::async_trait;
use futures::stream::{self, Stream};

use crate::{
    context::Context,
    document::Document,
    error::DocWireResult,
};

/// A pull iterator over documents.
#[async_trait]
pub trait DocumentIterator: Send + Debug {
    /// Returns the next document and its index, or `None` at the end.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DocWireError::Cancelled`] or
    /// [`crate::error::DocWireError::MaxTimeExpired`] when `ctx` is done,
    /// or any error raised while producing the document.
    async fn next(&mut self, ctx: &Context) -> DocWireResult<Option<(usize, Document)>>;

    /// Releases the resources held by the iterator.
    ///
    /// Safe to call more than once. After `close`, `next` returns `Ok(None)`.
    fn close(&mut self);
}

#[async_trait]
impl<I> DocumentIterator for Box<I>
where
    I: DocumentIterator + ?Sized,
{
    async fn next(&mut self, ctx: &Context) -> DocWireResult<Option<(usize, Document)>> {
        (**self).next(ctx).await
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Owns an iterator and closes it when dropped.
#[derive(Debug)]
pub struct QueryIterator {
    inner: Box<dyn DocumentIterator>,
    closed: bool,
}

impl QueryIterator {
    pub fn new(inner: impl DocumentIterator + 'static) -> Self {
        Self { inner: Box::new(inner), closed: false }
    }

    pub fn from_boxed(inner: Box<dyn DocumentIterator>) -> Self {
        Self { inner, closed: false }
    }

    /// Creates an iterator over an in-memory list of documents.
    pub fn from_documents(docs: Vec<Document>) -> Self {
        Self::new(VecIterator::new(docs))
    }

    /// Drains the iterator into a vector, closing it afterwards.
    pub async fn collect(mut self, ctx: &Context) -> DocWireResult<Vec<Document>> {
        let mut out = Vec::new();
        while let Some((_, doc)) = self.next(ctx).await? {
            out.push(doc);
        }
        self.close();
        Ok(out)
    }

    /// Turns the iterator into a stream of documents.
    ///
    /// The stream ends after the first error.
    pub fn into_stream(self, ctx: Context) -> impl Stream<Item = DocWireResult<Document>> + Send {
        stream::unfold(Some((self, ctx)), |state| async move {
            let (mut iter, ctx) = state?;
            match iter.next(&ctx).await {
                Ok(Some((_, doc))) => Some((Ok(doc), Some((iter, ctx)))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}

#[async_trait]
impl DocumentIterator for QueryIterator {
    async fn next(&mut self, ctx: &Context) -> DocWireResult<Option<(usize, Document)>> {
        if self.closed {
            return Ok(None);
        }
        self.inner.next(ctx).await
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.close();
        }
    }
}

impl Drop for QueryIterator {
    fn drop(&mut self) {
        self.close();
    }
}

/// Iterates over documents already held in memory.
#[derive(Debug, Default)]
pub struct VecIterator {
    docs: VecDeque<Document>,
    index: usize,
}

impl VecIterator {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs: docs.into(), index: 0 }
    }
}

#[async_trait]
impl DocumentIterator for VecIterator {
    async fn next(&mut self, ctx: &Context) -> DocWireResult<Option<(usize, Document)>> {
        ctx.check()?;

        let Some(doc) = self.docs.pop_front() else {
            return Ok(None);
        };
        let index = self.index;
        self.index += 1;
        Ok(Some((index, doc)))
    }

    fn close(&mut self) {
        self.docs.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use futures::StreamExt;

    use super::*;
    use crate::error::DocWireError;

    fn docs(n: i32) -> Vec<Document> {
        (0..n)
            .map(|i| {
                let mut d = Document::new();
                d.set("_id", i);
                d
            })
            .collect()
    }

    #[derive(Debug)]
    struct CountingClose(Arc<AtomicUsize>);

    #[async_trait]
    impl DocumentIterator for CountingClose {
        async fn next(&mut self, _ctx: &Context) -> DocWireResult<Option<(usize, Document)>> {
            Ok(None)
        }

        fn close(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn yields_indexes_then_end() {
        let ctx = Context::background();
        let mut iter = QueryIterator::from_documents(docs(2));

        assert_eq!(iter.next(&ctx).await.unwrap().map(|(i, _)| i), Some(0));
        assert_eq!(iter.next(&ctx).await.unwrap().map(|(i, _)| i), Some(1));
        assert!(iter.next(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn next_observes_cancellation() {
        let (ctx, handle) = Context::new();
        let mut iter = QueryIterator::from_documents(docs(2));
        handle.cancel();
        assert_eq!(iter.next(&ctx).await.unwrap_err(), DocWireError::Cancelled);
    }

    #[tokio::test]
    async fn close_runs_once_even_when_dropped() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let mut iter = QueryIterator::new(CountingClose(count.clone()));
            iter.close();
            iter.close();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);

        drop(QueryIterator::new(CountingClose(count.clone())));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stream_adapter_yields_all() {
        let stream = QueryIterator::from_documents(docs(3)).into_stream(Context::background());
        let collected: Vec<_> = stream.collect().await;
        assert_eq!(collected.len(), 3);
        assert!(collected.iter().all(Result::is_ok));
    }
}
