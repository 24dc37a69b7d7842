//! Convenient re-exports of commonly used types from docwire.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docwire::prelude::*;
//! ```
//!
//! This provides access to:
//! - Values, documents and paths
//! - The backend contract and its builder trait
//! - The evaluator and its compiled forms
//! - Cursors and the command handler
//! - Error types and configuration

pub use docwire_core::{
    backend::{Backend, BackendBuilder, Collection, Database, QueryParams, QueryResult},
    config::{CursorConfig, HandlerConfig},
    context::{CancelHandle, Context},
    document::{Array, Document},
    error::{DocWireError, DocWireResult, ErrorCode},
    iterator::{DocumentIterator, QueryIterator},
    path::Path,
    value::Value,
};
pub use docwire_cursor::{ConnectionId, CursorBatch, CursorManager, CursorParams, Namespace};
pub use docwire_query::{
    Evaluator, Pipeline,
    filter::Filter,
    projection::Projection,
    sort::SortSpec,
    update::Update,
};

pub use crate::handler::{Connection, Handler};
