// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! picket-manager: owns the engine lifecycle.
//!
//! The manager holds one current engine plus a retired-but-referenced set.
//! Hot reload creates a fresh engine from the configuration documents,
//! installs it as current, and retires the predecessor; transactions that
//! acquired the old engine keep it (an acquire is an `Arc` reference) until
//! they drain, at which point [`EngineManager::engine_cleanup`] drops it.
#![forbid(unsafe_code)]

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use picket_core::{config, Engine, EngineError, EngineResult, HostServer, Outcome};

/// Hook run on every newly created engine around its configuration load.
///
/// Preconfig hooks run before the documents load (module registration,
/// logger injection); postconfig hooks run after, before the engine closes.
pub type ConfigHook = Box<dyn Fn(&mut Engine) -> EngineResult<()> + Send + Sync>;

/// Result of [`EngineManager::engine_create`].
#[derive(Debug, Clone)]
pub enum CreateDisposition {
    /// The engine was created and installed as current.
    Created(Arc<Engine>),
    /// The engine limit was reached; nothing changed.
    Declined,
}

struct Inner {
    current: Option<Arc<Engine>>,
    retired: Vec<Arc<Engine>>,
    serial: u64,
}

/// Owner of a pool of engines with reference-counted hot reload.
pub struct EngineManager {
    max: usize,
    host: Arc<dyn HostServer>,
    preconfig: Vec<ConfigHook>,
    postconfig: Vec<ConfigHook>,
    inner: Mutex<Inner>,
}

impl EngineManager {
    /// Creates a manager allowing at most `max` simultaneous engines
    /// (current plus retired).
    ///
    /// # Errors
    /// `InvalidArg` when `max` is zero.
    pub fn new(max: usize, host: Arc<dyn HostServer>) -> EngineResult<Self> {
        if max == 0 {
            return Err(EngineError::InvalidArg(
                "engine limit must be at least 1".to_owned(),
            ));
        }
        Ok(Self {
            max,
            host,
            preconfig: Vec::new(),
            postconfig: Vec::new(),
            inner: Mutex::new(Inner {
                current: None,
                retired: Vec::new(),
                serial: 0,
            }),
        })
    }

    /// Registers a hook run before each new engine loads its configuration.
    pub fn add_preconfig_hook(
        &mut self,
        hook: impl Fn(&mut Engine) -> EngineResult<()> + Send + Sync + 'static,
    ) {
        self.preconfig.push(Box::new(hook));
    }

    /// Registers a hook run after each new engine loads its configuration.
    pub fn add_postconfig_hook(
        &mut self,
        hook: impl Fn(&mut Engine) -> EngineResult<()> + Send + Sync + 'static,
    ) {
        self.postconfig.push(Box::new(hook));
    }

    /// Builds an engine from `config_path`, installs it as current, and
    /// retires the predecessor.
    ///
    /// Returns [`CreateDisposition::Declined`] (not an error) when creating
    /// would exceed the engine limit.
    pub fn engine_create(&self, config_path: &Path) -> EngineResult<CreateDisposition> {
        let mut inner = self.lock()?;
        Self::cleanup_locked(&mut inner);
        let live = usize::from(inner.current.is_some()) + inner.retired.len();
        if live >= self.max {
            warn!(live, max = self.max, "engine limit reached; create declined");
            return Ok(CreateDisposition::Declined);
        }

        inner.serial += 1;
        let serial = inner.serial;
        let mut engine = Engine::builder()
            .host(Arc::clone(&self.host))
            .serial(serial)
            .build()?;
        for hook in &self.preconfig {
            hook(&mut engine)?;
        }
        config::load_file(&mut engine, config_path)?;
        for hook in &self.postconfig {
            hook(&mut engine)?;
        }
        engine.close()?;

        let engine = Arc::new(engine);
        if let Some(old) = inner.current.replace(Arc::clone(&engine)) {
            info!(serial = old.serial(), "engine retired");
            inner.retired.push(old);
        }
        info!(serial, config = %config_path.display(), "engine installed");
        Ok(CreateDisposition::Created(engine))
    }

    /// The current engine, without acquiring it for a transaction.
    pub fn engine_current(&self) -> Option<Arc<Engine>> {
        self.lock().ok()?.current.clone()
    }

    /// Acquires the current engine for a transaction.
    ///
    /// The returned reference pins the engine: a retired engine is not
    /// destroyed while any acquire is outstanding.
    pub fn engine_acquire(&self) -> Option<Arc<Engine>> {
        self.engine_current()
    }

    /// Releases an acquired engine.
    pub fn engine_release(&self, engine: Arc<Engine>) {
        drop(engine);
    }

    /// Retires the current engine without creating a replacement.
    ///
    /// Returns `Declined` when there is no current engine.
    pub fn engine_disable(&self) -> EngineResult {
        let mut inner = self.lock()?;
        match inner.current.take() {
            Some(engine) => {
                info!(serial = engine.serial(), "engine disabled");
                inner.retired.push(engine);
                Ok(Outcome::Ok)
            }
            None => Ok(Outcome::Declined),
        }
    }

    /// Destroys retired engines whose references have drained. Returns how
    /// many were destroyed.
    pub fn engine_cleanup(&self) -> usize {
        self.lock().map_or(0, |mut inner| Self::cleanup_locked(&mut inner))
    }

    /// Number of live engines (current plus retired).
    pub fn engine_count(&self) -> usize {
        self.lock()
            .map_or(0, |inner| usize::from(inner.current.is_some()) + inner.retired.len())
    }

    /// Serial of the current engine, when one is installed.
    pub fn current_serial(&self) -> Option<u64> {
        self.lock().ok()?.current.as_ref().map(|e| e.serial())
    }

    fn cleanup_locked(inner: &mut Inner) -> usize {
        let before = inner.retired.len();
        inner.retired.retain(|engine| {
            let referenced = Arc::strong_count(engine) > 1;
            if !referenced {
                info!(serial = engine.serial(), "engine destroyed");
            }
            referenced
        });
        before - inner.retired.len()
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| EngineError::Other("engine manager lock poisoned".to_owned()))
    }
}

impl core::fmt::Debug for EngineManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EngineManager")
            .field("max", &self.max)
            .field("engines", &self.engine_count())
            .finish_non_exhaustive()
    }
}
