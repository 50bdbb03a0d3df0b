// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Lifetime-scoped cleanup ledger and module data.
//!
//! A [`Scope`] is owned by exactly one parent lifetime (engine, connection,
//! transaction, or a short-lived control request). Registered cleanups run in
//! LIFO order exactly once, either on an explicit [`Scope::finish`] or when
//! the scope drops. Modules hang per-lifetime state off the scope's typed
//! data bag instead of carrying their own destructors.
//!
//! Cross-scope references are permitted only where the referred-to scope
//! strictly outlives the referring one; ownership enforces this by
//! construction (a connection owns its transactions' scopes transitively).

use std::any::Any;

use rustc_hash::FxHashMap;

type CleanupFn = Box<dyn FnOnce() + Send>;

/// Scoped cleanup ledger plus typed per-module data.
pub struct Scope {
    label: &'static str,
    cleanups: Vec<CleanupFn>,
    data: FxHashMap<String, Box<dyn Any + Send>>,
    finished: bool,
}

impl Scope {
    /// Creates an empty scope. The label names the owning lifetime in logs.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            cleanups: Vec::new(),
            data: FxHashMap::default(),
            finished: false,
        }
    }

    /// Label of the owning lifetime.
    pub const fn label(&self) -> &'static str {
        self.label
    }

    /// Registers a cleanup to run when the scope finishes.
    ///
    /// Cleanups run in reverse registration order.
    pub fn register_cleanup(&mut self, cleanup: impl FnOnce() + Send + 'static) {
        self.cleanups.push(Box::new(cleanup));
    }

    /// Stores a module-owned value under `key`, replacing any previous value.
    ///
    /// The value lives exactly as long as the scope.
    pub fn set_module_data<T: Any + Send>(&mut self, key: &str, value: T) {
        self.data.insert(key.to_owned(), Box::new(value));
    }

    /// Borrows module data of type `T` stored under `key`.
    ///
    /// Returns `None` when the key is absent or holds a different type.
    pub fn module_data<T: Any>(&self, key: &str) -> Option<&T> {
        self.data.get(key).and_then(|boxed| boxed.downcast_ref())
    }

    /// Mutably borrows module data of type `T` stored under `key`.
    pub fn module_data_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.data
            .get_mut(key)
            .and_then(|boxed| boxed.downcast_mut())
    }

    /// Runs all registered cleanups in LIFO order and drops module data.
    ///
    /// Idempotent; a second call is a no-op.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        while let Some(cleanup) = self.cleanups.pop() {
            cleanup();
        }
        self.data.clear();
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.finish();
    }
}

impl core::fmt::Debug for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scope")
            .field("label", &self.label)
            .field("cleanups", &self.cleanups.len())
            .field("data_keys", &self.data.len())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn cleanups_run_in_reverse_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut scope = Scope::new("test");
        for i in 0..3 {
            let order = Arc::clone(&order);
            scope.register_cleanup(move || order.lock().unwrap().push(i));
        }
        scope.finish();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn finish_is_idempotent_and_drop_does_not_rerun() {
        let count = Arc::new(Mutex::new(0));
        {
            let mut scope = Scope::new("test");
            let count = Arc::clone(&count);
            scope.register_cleanup(move || *count.lock().unwrap() += 1);
            scope.finish();
            scope.finish();
        }
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn module_data_is_typed() {
        let mut scope = Scope::new("test");
        scope.set_module_data("counter", 7u64);
        assert_eq!(scope.module_data::<u64>("counter"), Some(&7));
        assert_eq!(scope.module_data::<String>("counter"), None);
        *scope.module_data_mut::<u64>("counter").unwrap() += 1;
        assert_eq!(scope.module_data::<u64>("counter"), Some(&8));
    }
}
