//! In-process query stages.
//!
//! Backends may ignore filter and sort hints, so results are re-processed
//! here. Each stage wraps a [`QueryIterator`] and is itself a
//! [`DocumentIterator`], so stages chain. Indexes are renumbered from zero by
//! every stage. Closing a stage closes everything beneath it.
//!
//! # Example
//!
//! ```ignore
//! let iter = FilterIterator::wrap(iter, filter);
//! let iter = SortIterator::wrap(iter, sort);
//! let iter = LimitIterator::wrap(SkipIterator::wrap(iter, 10), 5);
//! ```

use std::collections::VecDeque;

use async_trait::async_trait;
use docwire_core::{
    context::Context,
    document::Document,
    error::DocWireResult,
    iterator::{DocumentIterator, QueryIterator},
};

use crate::{filter::Filter, projection::Projection, sort::SortSpec};

/// Yields only documents matching a filter.
#[derive(Debug)]
pub struct FilterIterator {
    inner: QueryIterator,
    filter: Filter,
    index: usize,
}

impl FilterIterator {
    pub fn wrap(inner: QueryIterator, filter: Filter) -> QueryIterator {
        if filter.is_empty() {
            return inner;
        }
        QueryIterator::new(Self { inner, filter, index: 0 })
    }
}

#[async_trait]
impl DocumentIterator for FilterIterator {
    async fn next(&mut self, ctx: &Context) -> DocWireResult<Option<(usize, Document)>> {
        while let Some((_, doc)) = self.inner.next(ctx).await? {
            if self.filter.matches(&doc) {
                let index = self.index;
                self.index += 1;
                return Ok(Some((index, doc)));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

/// Reads the whole input on first use, then yields it sorted.
#[derive(Debug)]
pub struct SortIterator {
    inner: QueryIterator,
    sort: SortSpec,
    sorted: Option<VecDeque<Document>>,
    index: usize,
}

impl SortIterator {
    pub fn wrap(inner: QueryIterator, sort: SortSpec) -> QueryIterator {
        if sort.is_empty() {
            return inner;
        }
        QueryIterator::new(Self { inner, sort, sorted: None, index: 0 })
    }
}

#[async_trait]
impl DocumentIterator for SortIterator {
    async fn next(&mut self, ctx: &Context) -> DocWireResult<Option<(usize, Document)>> {
        if self.sorted.is_none() {
            let mut docs = Vec::new();
            while let Some((_, doc)) = self.inner.next(ctx).await? {
                docs.push(doc);
            }
            self.inner.close();
            self.sort.sort(&mut docs);
            self.sorted = Some(docs.into());
        }

        ctx.check()?;

        let Some(doc) = self.sorted.as_mut().and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        let index = self.index;
        self.index += 1;
        Ok(Some((index, doc)))
    }

    fn close(&mut self) {
        self.inner.close();
        self.sorted = Some(VecDeque::new());
    }
}

/// Drops the first `skip` documents.
#[derive(Debug)]
pub struct SkipIterator {
    inner: QueryIterator,
    remaining: u64,
    index: usize,
}

impl SkipIterator {
    pub fn wrap(inner: QueryIterator, skip: u64) -> QueryIterator {
        if skip == 0 {
            return inner;
        }
        QueryIterator::new(Self { inner, remaining: skip, index: 0 })
    }
}

#[async_trait]
impl DocumentIterator for SkipIterator {
    async fn next(&mut self, ctx: &Context) -> DocWireResult<Option<(usize, Document)>> {
        while self.remaining > 0 {
            if self.inner.next(ctx).await?.is_none() {
                return Ok(None);
            }
            self.remaining -= 1;
        }

        let Some((_, doc)) = self.inner.next(ctx).await? else {
            return Ok(None);
        };
        let index = self.index;
        self.index += 1;
        Ok(Some((index, doc)))
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

/// Stops after `limit` documents and closes its input.
#[derive(Debug)]
pub struct LimitIterator {
    inner: QueryIterator,
    limit: u64,
    index: usize,
}

impl LimitIterator {
    /// A `limit` of zero means no limit.
    pub fn wrap(inner: QueryIterator, limit: u64) -> QueryIterator {
        if limit == 0 {
            return inner;
        }
        QueryIterator::new(Self { inner, limit, index: 0 })
    }
}

#[async_trait]
impl DocumentIterator for LimitIterator {
    async fn next(&mut self, ctx: &Context) -> DocWireResult<Option<(usize, Document)>> {
        if self.index as u64 >= self.limit {
            self.inner.close();
            return Ok(None);
        }

        let Some((_, doc)) = self.inner.next(ctx).await? else {
            return Ok(None);
        };
        let index = self.index;
        self.index += 1;
        Ok(Some((index, doc)))
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

/// Applies a projection to every document.
#[derive(Debug)]
pub struct ProjectionIterator {
    inner: QueryIterator,
    projection: Projection,
}

impl ProjectionIterator {
    pub fn wrap(inner: QueryIterator, projection: Projection) -> QueryIterator {
        QueryIterator::new(Self { inner, projection })
    }
}

#[async_trait]
impl DocumentIterator for ProjectionIterator {
    async fn next(&mut self, ctx: &Context) -> DocWireResult<Option<(usize, Document)>> {
        match self.inner.next(ctx).await? {
            Some((index, doc)) => Ok(Some((index, self.projection.apply(&doc)?))),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::filter::default_operators;

    fn docs() -> Vec<Document> {
        (0..10)
            .map(|i| Document::try_from(doc! { "_id": i, "v": (10 - i), "even": (i % 2 == 0) }).unwrap())
            .collect()
    }

    fn d(bson: bson::Document) -> Document {
        Document::try_from(bson).unwrap()
    }

    #[tokio::test]
    async fn stages_chain() {
        let ctx = Context::background();
        let filter = Filter::compile(&d(doc! { "even": true }), &default_operators().unwrap()).unwrap();
        let sort = SortSpec::compile(&d(doc! { "v": 1 })).unwrap();
        let projection = Projection::compile(&d(doc! { "v": 0, "even": 0 })).unwrap();

        let iter = FilterIterator::wrap(QueryIterator::from_documents(docs()), filter);
        let iter = SortIterator::wrap(iter, sort);
        let iter = LimitIterator::wrap(SkipIterator::wrap(iter, 1), 2);
        let mut iter = ProjectionIterator::wrap(iter, projection);

        let mut out = Vec::new();
        while let Some((index, doc)) = iter.next(&ctx).await.unwrap() {
            out.push((index, doc));
        }

        assert_eq!(out, vec![(0, d(doc! { "_id": 6 })), (1, d(doc! { "_id": 4 }))]);
    }

    #[tokio::test]
    async fn skip_past_end() {
        let ctx = Context::background();
        let iter = SkipIterator::wrap(QueryIterator::from_documents(docs()), 20);
        assert!(iter.collect(&ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_context_stops_sort() {
        let (ctx, handle) = Context::new();
        handle.cancel();
        let sort = SortSpec::compile(&d(doc! { "v": 1 })).unwrap();
        let mut iter = SortIterator::wrap(QueryIterator::from_documents(docs()), sort);
        assert!(iter.next(&ctx).await.is_err());
    }
}
