//! Tail iterators over capped collections.

use async_trait::async_trait;
use docwire_core::{
    context::Context,
    document::Document,
    error::DocWireResult,
    iterator::DocumentIterator,
};

use crate::store::SharedCollection;

/// Yields documents in insertion order and, once caught up, keeps yielding
/// documents inserted later.
///
/// Reaching the current end returns `Ok(None)` without closing the iterator;
/// the next call picks up anything inserted in between.
#[derive(Debug)]
pub struct TailIterator {
    data: SharedCollection,
    last_seq: Option<u64>,
    index: usize,
    closed: bool,
}

impl TailIterator {
    pub(crate) fn new(data: SharedCollection) -> Self {
        Self { data, last_seq: None, index: 0, closed: false }
    }
}

#[async_trait]
impl DocumentIterator for TailIterator {
    async fn next(&mut self, ctx: &Context) -> DocWireResult<Option<(usize, Document)>> {
        ctx.check()?;

        if self.closed {
            return Ok(None);
        }

        let data = self.data.read().await;
        let Some((seq, doc)) = data.next_after(self.last_seq) else {
            return Ok(None);
        };

        self.last_seq = Some(seq);
        let index = self.index;
        self.index += 1;
        Ok(Some((index, doc.clone())))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
