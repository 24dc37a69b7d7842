//! Core document model and storage contract for docwire.
//!
//! This crate is the foundation of the docwire project and provides:
//!
//! - **Values and documents** ([`value`], [`document`]) - The closed set of supported value types and ordered documents
//! - **Paths** ([`path`]) - Dotted field paths and path-based access
//! - **Ordering** ([`compare`]) - The canonical total order shared by every sort and comparison
//! - **Formatting** ([`format`]) - Shell-style value rendering for error messages
//! - **Error handling** ([`error`]) - Error taxonomy, client error codes and result types
//! - **Cancellation** ([`context`]) - Cancellable contexts with deadlines
//! - **Iteration** ([`iterator`]) - The pull-based document iterator contract
//! - **Storage contract** ([`backend`], [`contract`]) - Traits every storage engine implements, plus contract enforcement
//! - **Parameters** ([`params`]) - Helpers for extracting typed command parameters
//! - **Configuration** ([`config`]) - Cursor and handler settings
//!
//! # Example
//!
//! ```ignore
//! use docwire_core::{document::Document, path::Path};
//!
//! let mut doc = Document::new();
//! doc.set_by_path(&Path::parse("a.b")?, 1)?;
//! assert!(doc.has_by_path(&Path::parse("a.b")?));
//! ```

#[allow(unused_extern_crates)]
extern crate self as docwire_core;

pub mod backend;
pub mod compare;
pub mod config;
pub mod context;
pub mod contract;
pub mod document;
pub mod error;
pub mod format;
pub mod iterator;
pub mod params;
pub mod path;
pub mod value;
