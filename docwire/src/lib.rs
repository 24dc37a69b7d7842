//! Main docwire crate: the protocol translation core of a document database.
//!
//! This crate is the primary entry point. It re-exports the document model,
//! the expression evaluator, the cursor registry and the storage contract from
//! the sub-crates, and adds the pieces that tie them together: typed command
//! parameters and a thin command handler.
//!
//! # Features
//!
//! - **Document model** - Ordered documents, a closed value set and a canonical total order
//! - **Query evaluation** - Filters, updates, projections and sorts evaluated in process
//! - **Cursors** - Batched results, `getMore`, tailable cursors and idle reaping
//! - **Pluggable storage** - Any engine implementing the backend contract; an in-memory one ships by default
//!
//! # Quick Start
//!
//! ```ignore
//! use docwire::{prelude::*, memory::MemoryBackend};
//!
//! #[tokio::main]
//! async fn main() -> DocWireResult<()> {
//!     let handler = Handler::new(MemoryBackend::new(), HandlerConfig::default())?;
//!     let _reaper = handler.spawn_reaper();
//!
//!     let conn = handler.connect();
//!
//!     let insert = Document::try_from(bson::doc! {
//!         "insert": "users",
//!         "documents": [{ "name": "Alice" }, { "name": "Bob" }],
//!         "$db": "test",
//!     })?;
//!     conn.handle(&insert).await;
//!
//!     let find = Document::try_from(bson::doc! {
//!         "find": "users",
//!         "filter": { "name": "Alice" },
//!         "batchSize": 1,
//!         "$db": "test",
//!     })?;
//!     let reply = conn.handle(&find).await;
//!     println!("{reply:?}");
//!
//!     conn.close().await;
//!     handler.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Using the evaluator directly
//!
//! The evaluator needs no storage at all:
//!
//! ```ignore
//! use docwire::prelude::*;
//!
//! let evaluator = Evaluator::new()?;
//! let matched = evaluator.matches(&doc, &filter)?;
//! let changed = evaluator.apply_update(&mut doc, &update)?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing (requires the `memory` feature, on by default)

#[allow(unused_extern_crates)]
extern crate self as docwire;

pub mod commands;
pub mod handler;
pub mod prelude;

pub use docwire_core::{backend, compare, config, context, contract, document, error, format, iterator, params, path, value};
pub use docwire_cursor as cursor;
pub use docwire_query as query;

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
///
/// This module is only available when the `memory` feature is enabled.
#[cfg(feature = "memory")]
pub mod memory {
    pub use docwire_memory::{MemoryBackend, MemoryBackendBuilder, TailIterator};
}
