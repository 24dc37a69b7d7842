//! Named operator registries.
//!
//! Filter operators and update modifiers are looked up by name in an
//! [`OperatorRegistry`]. A registry is filled by explicit `register` calls once,
//! at startup, and is read-only afterwards. Registering the same name twice is
//! an error, so a typo that shadows an operator is caught when the registry is
//! built rather than when a query happens to use it.

use std::{
    collections::{HashMap, hash_map::Entry},
    fmt,
};

use docwire_core::error::{DocWireError, DocWireResult};

/// An immutable-after-construction map from operator name to handler.
pub struct OperatorRegistry<F> {
    kind: &'static str,
    ops: HashMap<&'static str, F>,
}

impl<F: Copy> OperatorRegistry<F> {
    /// Creates an empty registry. `kind` names the registry in error messages.
    pub fn new(kind: &'static str) -> Self {
        Self { kind, ops: HashMap::new() }
    }

    /// Registers `op` under `name`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if `name` is already registered.
    pub fn register(&mut self, name: &'static str, op: F) -> DocWireResult<()> {
        match self.ops.entry(name) {
            Entry::Occupied(_) => {
                Err(DocWireError::Internal(format!("{} operator {name} registered twice", self.kind)))
            }
            Entry::Vacant(slot) => {
                slot.insert(op);
                Ok(())
            }
        }
    }

    /// Looks up an operator by name.
    pub fn get(&self, name: &str) -> Option<F> {
        self.ops.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.ops.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl<F> fmt::Debug for OperatorRegistry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.ops.keys().collect();
        names.sort_unstable();
        f.debug_struct("OperatorRegistry").field("kind", &self.kind).field("ops", &names).finish()
    }
}
