//! Server-side cursors for docwire.
//!
//! A query returns its first batch directly. If results remain, the rest is
//! parked behind a cursor id that later `getMore` calls page through. This
//! crate owns that registry:
//!
//! - **Identity** ([`cursor`]) - Connection ids, namespaces and batches
//! - **Registry** ([`manager`]) - Opening, paging, killing and reaping cursors
//!
//! # Example
//!
//! ```ignore
//! use docwire_cursor::{CursorManager, CursorParams, Namespace, ConnectionId};
//!
//! let cursors = CursorManager::new(CursorConfig::default());
//! let _reaper = cursors.spawn_reaper();
//!
//! let first = cursors.open(&ctx, iter, CursorParams::new(Namespace::new("db", "c"), conn).batch_size(3)).await?;
//! let next = cursors.get_more(&ctx, first.cursor_id, &first.namespace, None, None).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docwire_cursor;

pub mod cursor;
pub mod manager;

pub use cursor::{ConnectionId, CursorBatch, CursorParams, Namespace};
pub use manager::CursorManager;
