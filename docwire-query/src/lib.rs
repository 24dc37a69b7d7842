//! Expression evaluation for docwire.
//!
//! This crate decides, without touching storage, what a query or update does to
//! a document:
//!
//! - **Filters** ([`filter`], [`expr`], [`evaluator`]) - Compile filter documents and match documents against them
//! - **Updates** ([`update`]) - Modifier operators, replacements and upsert synthesis
//! - **Projections** ([`projection`]) - Inclusion and exclusion projections
//! - **Sorting** ([`sort`]) - Multi-key stable sorts under the canonical order
//! - **Processing** ([`processing`]) - Iterator stages that re-apply filter, sort, skip, limit and projection
//! - **Registries** ([`registry`]) - Named operator tables built once at startup
//!
//! # Example
//!
//! ```ignore
//! use docwire_query::Evaluator;
//!
//! let evaluator = Evaluator::new()?;
//! let filter = evaluator.compile_filter(&filter_doc)?;
//! let update = evaluator.compile_update(&update_doc)?;
//!
//! if filter.matches(&doc) {
//!     let changed = update.apply(&mut doc, false)?;
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docwire_query;

pub mod evaluator;
pub mod expr;
pub mod filter;
pub mod processing;
pub mod projection;
pub mod registry;
pub mod sort;
pub mod update;

use docwire_core::{
    document::Document,
    error::DocWireResult,
    iterator::QueryIterator,
};
use tracing::debug;

use crate::{
    filter::{Filter, FilterOperators},
    processing::{FilterIterator, LimitIterator, ProjectionIterator, SkipIterator, SortIterator},
    projection::Projection,
    sort::SortSpec,
    update::{Update, UpdateOperators},
};

/// Holds the operator registries and compiles query documents.
///
/// Build one at startup and share it; it is immutable afterwards.
#[derive(Debug)]
pub struct Evaluator {
    filters: FilterOperators,
    updates: UpdateOperators,
}

impl Evaluator {
    /// Builds the evaluator with every supported operator registered.
    ///
    /// # Errors
    ///
    /// Returns an internal error if an operator is registered twice.
    pub fn new() -> DocWireResult<Self> {
        let filters = filter::default_operators()?;
        let updates = update::default_modifiers()?;
        debug!(filter_operators = filters.len(), update_modifiers = updates.len(), "built operator registries");
        Ok(Self { filters, updates })
    }

    pub fn filter_operators(&self) -> &FilterOperators {
        &self.filters
    }

    pub fn update_operators(&self) -> &UpdateOperators {
        &self.updates
    }

    /// Compiles a filter document.
    pub fn compile_filter(&self, filter: &Document) -> DocWireResult<Filter> {
        Filter::compile(filter, &self.filters)
    }

    /// Compiles an update document.
    pub fn compile_update(&self, update: &Document) -> DocWireResult<Update> {
        Update::compile(update, &self.updates)
    }

    /// Returns whether `doc` matches `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter is malformed.
    pub fn matches(&self, doc: &Document, filter: &Document) -> DocWireResult<bool> {
        Ok(self.compile_filter(filter)?.matches(doc))
    }

    /// Applies an update document in place and returns whether the document changed.
    pub fn apply_update(&self, doc: &mut Document, update: &Document) -> DocWireResult<bool> {
        self.compile_update(update)?.apply(doc, false)
    }

    /// Applies a projection document.
    pub fn apply_projection(&self, doc: &Document, projection: &Document) -> DocWireResult<Document> {
        Projection::compile(projection)?.apply(doc)
    }

    /// Sorts documents in place by a sort document.
    pub fn sort_documents(&self, docs: &mut Vec<Document>, sort: &Document) -> DocWireResult<()> {
        SortSpec::compile(sort)?.sort(docs);
        Ok(())
    }
}

/// The in-process stages to apply on top of a backend result.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub filter: Option<Filter>,
    pub sort: Option<SortSpec>,
    pub skip: u64,
    pub limit: u64,
    pub projection: Option<Projection>,
}

impl Pipeline {
    /// Wraps `iter` in filter, sort, skip, limit and projection stages, in that order.
    ///
    /// Pass `filter_done`/`sort_done` when the backend already applied them.
    pub fn wrap(self, iter: QueryIterator, filter_done: bool, sort_done: bool) -> QueryIterator {
        let mut iter = iter;
        if let Some(filter) = self.filter.filter(|_| !filter_done) {
            iter = FilterIterator::wrap(iter, filter);
        }
        if let Some(sort) = self.sort.filter(|_| !sort_done) {
            iter = SortIterator::wrap(iter, sort);
        }
        iter = SkipIterator::wrap(iter, self.skip);
        iter = LimitIterator::wrap(iter, self.limit);
        if let Some(projection) = self.projection {
            iter = ProjectionIterator::wrap(iter, projection);
        }
        iter
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use docwire_core::context::Context;

    use super::*;

    fn d(bson: bson::Document) -> Document {
        Document::try_from(bson).unwrap()
    }

    #[test]
    fn evaluator_entry_points() {
        let evaluator = Evaluator::new().unwrap();

        assert!(evaluator.matches(&d(doc! { "a": 1 }), &d(doc! {})).unwrap());
        assert!(evaluator.matches(&d(doc! { "a": 1 }), &d(doc! { "a": { "$lte": 1 } })).unwrap());

        let mut doc = d(doc! { "_id": 1, "a": 1 });
        assert!(evaluator.apply_update(&mut doc, &d(doc! { "$inc": { "a": 1 } })).unwrap());
        assert_eq!(doc, d(doc! { "_id": 1, "a": 2 }));

        let projected = evaluator.apply_projection(&doc, &d(doc! { "_id": 0 })).unwrap();
        assert_eq!(projected, d(doc! { "a": 2 }));

        let mut docs = vec![d(doc! { "a": 2 }), d(doc! { "a": 1 })];
        evaluator.sort_documents(&mut docs, &d(doc! { "a": -1 })).unwrap();
        assert_eq!(docs[0], d(doc! { "a": 2 }));
    }

    #[tokio::test]
    async fn pipeline_skips_stages_done_by_backend() {
        let evaluator = Evaluator::new().unwrap();
        let docs = vec![d(doc! { "_id": 1, "a": 1 }), d(doc! { "_id": 2, "a": 2 })];

        let pipeline = Pipeline {
            filter: Some(evaluator.compile_filter(&d(doc! { "a": 2 })).unwrap()),
            ..Default::default()
        };

        let ctx = Context::background();
        let pushed_down = pipeline.clone().wrap(QueryIterator::from_documents(docs.clone()), true, false);
        assert_eq!(pushed_down.collect(&ctx).await.unwrap().len(), 2);

        let filtered = pipeline.wrap(QueryIterator::from_documents(docs), false, false);
        assert_eq!(filtered.collect(&ctx).await.unwrap(), vec![d(doc! { "_id": 2, "a": 2 })]);
    }
}
