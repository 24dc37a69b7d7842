//! In-memory storage engine for docwire.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! [`Backend`](docwire_core::backend::Backend) contract. It uses async-aware
//! read-write locks for concurrent access and serves as the reference engine
//! for tests and small deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - One lock for the database map, one per collection
//! - **Insertion order** - Documents are returned in the order they were inserted
//! - **`_id` index** - Duplicate keys are rejected and `{_id: x}` filters are answered by lookup
//! - **Capped collections** - Oldest documents are evicted by count or size
//! - **Tailable queries** - Tail iterators follow a capped collection as it grows
//!
//! # Quick Start
//!
//! ```ignore
//! use docwire_core::{backend::{Backend, BackendBuilder, QueryParams}, context::Context};
//! use docwire_memory::MemoryBackend;
//!
//! let backend = MemoryBackend::builder().build().await?;
//! let ctx = Context::background();
//!
//! let coll = backend.database(&ctx, "test").await?.collection(&ctx, "users").await?;
//! coll.insert_all(&ctx, vec![doc]).await?;
//!
//! let res = coll.query(&ctx, QueryParams::new()).await?;
//! let docs = res.iter.collect(&ctx).await?;
//! ```
//!
//! The engine only pushes down `{_id: <value>}` filters. Everything else comes
//! back unfiltered and unsorted, so callers must apply the filter and sort
//! themselves.

#[allow(unused_extern_crates)]
extern crate self as docwire_memory;

pub mod backend;
mod store;
pub mod tail;

pub use backend::{MemoryBackend, MemoryBackendBuilder};
pub use tail::TailIterator;
