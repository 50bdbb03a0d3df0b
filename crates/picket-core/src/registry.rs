// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Name-keyed registries for transformations, operators, and actions.
//!
//! Names are case-insensitive and resolve exactly once, at rule
//! registration; nothing on the evaluation path looks up a string.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::field::norm;
use crate::status::{EngineError, EngineResult};

/// Case-insensitive name → trait-object registry.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    entries: FxHashMap<String, Arc<T>>,
}

impl<T: ?Sized> Registry<T> {
    /// Empty registry; `kind` names the entry family in errors.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: FxHashMap::default(),
        }
    }

    /// Registers `item` under `name`.
    ///
    /// # Errors
    /// `Exists` when the name (case-insensitively) is already taken.
    pub fn register(&mut self, name: &str, item: Arc<T>) -> EngineResult<()> {
        let key = norm(name);
        if self.entries.contains_key(&key) {
            return Err(EngineError::Exists(format!("{} {name}", self.kind)));
        }
        self.entries.insert(key, item);
        Ok(())
    }

    /// Resolves `name` to its registered entry.
    ///
    /// # Errors
    /// `NotFound` when nothing is registered under the name.
    pub fn lookup(&self, name: &str) -> EngineResult<Arc<T>> {
        self.entries
            .get(&norm(name))
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("{} {name}", self.kind)))
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: ?Sized> core::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("entries", &self.entries.len())
            .finish()
    }
}
