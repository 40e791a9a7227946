//! Script units.
//!
//! A unit is one isolated script engine instance plus its lifecycle state,
//! attached addons and message queues. Units are created by the
//! [`Registry`] and handed out as cheap, cloneable [`Unit`] handles.
//!
//! # Threading
//!
//! A unit started with `multithreaded = true` owns a worker thread and
//! [`Unit::step`] only hands it a request; poll [`Unit::state`] (or use
//! [`Unit::wait_while_running`]) to see the frame complete. Otherwise the
//! frame runs on the caller's thread before `step` returns.

mod state;
mod worker;

pub use state::{UnitId, UnitState};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::addon::{Addon, AddonInfo};
use crate::engine::{EngineError, EntryArg, ScriptContext, ScriptEngine};
use crate::error::{Error, Result};
use crate::message::MessageId;
use crate::registry::{Registry, WeakRegistry};

use worker::Worker;

/// Handle to a unit. Clones refer to the same unit.
#[derive(Clone)]
pub struct Unit {
    inner: Arc<UnitInner>,
}

/// Non-owning handle to a unit.
#[derive(Clone)]
pub struct WeakUnit(Weak<UnitInner>);

impl WeakUnit {
    pub fn upgrade(&self) -> Option<Unit> {
        self.0.upgrade().map(|inner| Unit { inner })
    }
}

struct UnitInner {
    id: UnitId,
    name: String,
    registry: WeakRegistry,
    state: Mutex<UnitState>,
    start_claimed: AtomicBool,
    debug_level: AtomicI64,
    bootstrap: Mutex<Option<String>>,
    engine: Mutex<Option<Box<dyn ScriptEngine>>>,
    addons: Mutex<Vec<Box<dyn Addon>>>,
    addon_info: Mutex<Vec<AddonInfo>>,
    fetched: Mutex<Vec<MessageId>>,
    worker: Mutex<Option<Worker>>,
    last_step: Mutex<Option<Instant>>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex
        .lock()
        .unwrap_or_else(|_| panic!("Unit {} lock poisoned", what))
}

impl Unit {
    pub(crate) fn new(id: UnitId, name: String, registry: WeakRegistry) -> Self {
        Self {
            inner: Arc::new(UnitInner {
                id,
                name,
                registry,
                state: Mutex::new(UnitState::NotStarted),
                start_claimed: AtomicBool::new(false),
                debug_level: AtomicI64::new(0),
                bootstrap: Mutex::new(None),
                engine: Mutex::new(None),
                addons: Mutex::new(Vec::new()),
                addon_info: Mutex::new(Vec::new()),
                fetched: Mutex::new(Vec::new()),
                worker: Mutex::new(None),
                last_step: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> UnitId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The registry that created this unit.
    pub fn registry(&self) -> WeakRegistry {
        self.inner.registry.clone()
    }

    pub fn downgrade(&self) -> WeakUnit {
        WeakUnit(Arc::downgrade(&self.inner))
    }

    pub fn state(&self) -> UnitState {
        *lock(&self.inner.state, "state")
    }

    pub fn debug_level(&self) -> i64 {
        self.inner.debug_level.load(Ordering::Relaxed)
    }

    /// Set the debug level scripts can query. Takes effect immediately.
    pub fn set_debug(&self, level: i64) {
        if self.state() != UnitState::NotStarted {
            log::warn!("Unit {}: debug level changed after start", self.inner.id);
        }
        self.inner.debug_level.store(level, Ordering::Relaxed);
    }

    /// Use a bootstrap program other than the configured default.
    pub fn set_bootstrap(&self, path: &str) -> Result<()> {
        self.ensure_not_started("set bootstrap")?;
        *lock(&self.inner.bootstrap, "bootstrap") = Some(path.to_string());
        Ok(())
    }

    fn upgrade_registry(&self) -> Result<Registry> {
        self.inner
            .registry
            .upgrade()
            .ok_or(Error::InvalidUnitIndex(self.inner.id))
    }

    fn ensure_not_started(&self, op: &'static str) -> Result<()> {
        let state = self.state();
        if state != UnitState::NotStarted || self.inner.start_claimed.load(Ordering::SeqCst) {
            log::error!("Unit {}: cannot {} after start", self.inner.id, op);
            return Err(Error::InvalidState {
                unit: self.inner.id,
                op,
                state,
            });
        }
        Ok(())
    }

    /// Apply a transition if the state machine allows it.
    fn transition(&self, next: UnitState) -> bool {
        let mut state = lock(&self.inner.state, "state");
        if state.can_transition_to(next) {
            *state = next;
            true
        } else {
            false
        }
    }

    /// Record a lifecycle failure: log it, enter `Error`, report the code.
    fn fail(&self, registry: &Registry, err: &Error) {
        log::error!("{}", err);
        self.transition(UnitState::Error);
        registry.set_error(err.code());
    }

    // ========================================================================
    // Addons
    // ========================================================================

    /// Attach an addon. Only allowed before the unit starts; the unit owns
    /// the addon from then on.
    pub fn attach_addon(&self, addon: Box<dyn Addon>) -> Result<()> {
        self.ensure_not_started("attach addon")?;
        log::debug!(
            "Unit {}: attaching addon '{}' v{}",
            self.inner.id,
            addon.name(),
            addon.version()
        );
        let info = AddonInfo::of(addon.as_ref());
        lock(&self.inner.addons, "addons").push(addon);
        lock(&self.inner.addon_info, "addon info").push(info);
        Ok(())
    }

    pub fn num_addons(&self) -> usize {
        lock(&self.inner.addon_info, "addon info").len()
    }

    /// Name, descriptor and version of the addon at `index`.
    pub fn get_addon(&self, index: usize) -> Result<AddonInfo> {
        lock(&self.inner.addon_info, "addon info")
            .get(index)
            .cloned()
            .ok_or(Error::InvalidAddonIndex {
                unit: self.inner.id,
                index,
            })
    }

    /// Run `f` against the addon at `index`.
    ///
    /// Must not be called from inside that addon's own hooks.
    pub fn with_addon<R>(&self, index: usize, f: impl FnOnce(&mut dyn Addon) -> R) -> Result<R> {
        let mut addons = lock(&self.inner.addons, "addons");
        let addon = addons.get_mut(index).ok_or(Error::InvalidAddonIndex {
            unit: self.inner.id,
            index,
        })?;
        Ok(f(addon.as_mut()))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the unit.
    ///
    /// Creates the engine, runs the bootstrap program, initializes addons in
    /// attachment order and calls the init entry with `arg`. Any failure
    /// leaves the unit in `Error` and reports the failure's code to the
    /// registry. A unit can only be started once.
    pub fn start(&self, arg: &str, multithreaded: bool) -> Result<()> {
        let id = self.inner.id;
        let state = self.state();
        if state != UnitState::NotStarted || self.inner.start_claimed.swap(true, Ordering::SeqCst) {
            log::error!("Unit {}: can't start twice", id);
            return Err(Error::InvalidState {
                unit: id,
                op: "start",
                state,
            });
        }
        let registry = self.upgrade_registry()?;

        log::debug!("Unit {}: starting ({})", id, self.inner.name);
        if let Err(err) = self.boot(&registry, arg) {
            self.fail(&registry, &err);
            return Err(err);
        }

        if !self.transition(UnitState::Idle) {
            // Stopped while booting.
            return Err(Error::InvalidState {
                unit: id,
                op: "start",
                state: self.state(),
            });
        }

        if multithreaded {
            match Worker::spawn(self) {
                Ok(worker) => *lock(&self.inner.worker, "worker") = Some(worker),
                Err(source) => {
                    let err = Error::ThreadSpawn { unit: id, source };
                    self.fail(&registry, &err);
                    return Err(err);
                }
            }
        }

        log::info!(
            "Unit {} ({}) started{}",
            id,
            self.inner.name,
            if multithreaded { " on its own thread" } else { "" }
        );
        Ok(())
    }

    fn boot(&self, registry: &Registry, arg: &str) -> Result<()> {
        let id = self.inner.id;
        let settings = registry.config().unit.clone();

        let ctx = ScriptContext {
            registry: registry.downgrade(),
            unit: id,
            unit_name: self.inner.name.clone(),
        };
        let mut engine = registry
            .engine_factory()
            .create(ctx)
            .map_err(|source| Error::EngineCreation { unit: id, source })?;

        let path = lock(&self.inner.bootstrap, "bootstrap")
            .clone()
            .unwrap_or(settings.bootstrap);
        let source = registry.read_file(&path).map_err(|e| Error::BootstrapLoad {
            unit: id,
            path: path.clone(),
            reason: e.to_string(),
        })?;
        engine
            .load_buffer(&source, &path)
            .map_err(|e| Error::BootstrapLoad {
                unit: id,
                path: path.clone(),
                reason: e.to_string(),
            })?;
        engine
            .execute_loaded()
            .map_err(|source| Error::BootstrapExecution { unit: id, source })?;

        for addon in lock(&self.inner.addons, "addons").iter_mut() {
            addon.init(self).map_err(|e| Error::InitCapability {
                unit: id,
                addon: addon.name().to_string(),
                reason: format!("{:#}", e),
            })?;
        }

        engine
            .call_entry(&settings.init_entry, &[EntryArg::Str(arg.to_string())])
            .map_err(|source| Error::EntryCall {
                unit: id,
                entry: settings.init_entry.clone(),
                per_frame: false,
                source,
            })?;

        *lock(&self.inner.engine, "engine") = Some(engine);
        Ok(())
    }

    /// Request one frame. Only valid while `Idle`.
    ///
    /// Returns the state right after the call: `Running` for a threaded
    /// unit (the frame is in flight), otherwise the state the frame ended in.
    pub fn step(&self) -> Result<UnitState> {
        {
            let mut state = lock(&self.inner.state, "state");
            if *state != UnitState::Idle {
                return Err(Error::InvalidState {
                    unit: self.inner.id,
                    op: "step",
                    state: *state,
                });
            }
            *state = UnitState::Running;
        }

        let requested = lock(&self.inner.worker, "worker")
            .as_ref()
            .map(Worker::request_step);
        match requested {
            Some(Ok(())) => Ok(UnitState::Running),
            Some(Err(_)) => {
                log::error!("Unit {}: worker thread is gone", self.inner.id);
                self.transition(UnitState::Error);
                if let Some(registry) = self.inner.registry.upgrade() {
                    registry.set_error(crate::error::codes::ENTRY_UPDATE);
                }
                Ok(self.state())
            }
            None => {
                self.run_step();
                Ok(self.state())
            }
        }
    }

    /// Run one frame on the current thread: addon updates in attachment
    /// order, then the update entry.
    pub(crate) fn run_step(&self) {
        if self.state() != UnitState::Running {
            return;
        }
        let Some(registry) = self.inner.registry.upgrade() else {
            self.transition(UnitState::Terminated);
            return;
        };
        let settings = &registry.config().unit;
        let dt = self.frame_dt(settings.default_dt);

        for addon in lock(&self.inner.addons, "addons").iter_mut() {
            addon.update(dt);
        }

        let result = match lock(&self.inner.engine, "engine").as_mut() {
            Some(engine) => engine.call_entry(&settings.update_entry, &[]),
            None => Err(EngineError::Runtime {
                message: "engine not started".to_string(),
            }),
        };

        match result {
            Ok(()) => {
                self.transition(UnitState::Idle);
            }
            Err(source) => {
                let err = Error::EntryCall {
                    unit: self.inner.id,
                    entry: settings.update_entry.clone(),
                    per_frame: true,
                    source,
                };
                self.fail(&registry, &err);
            }
        }
    }

    /// Seconds since the previous frame, `default_dt` on the first.
    fn frame_dt(&self, default_dt: f64) -> f64 {
        let now = Instant::now();
        let mut last = lock(&self.inner.last_step, "clock");
        let dt = last.map_or(default_dt, |prev| now.duration_since(prev).as_secs_f64());
        *last = Some(now);
        dt
    }

    /// Terminate the unit. Idempotent.
    ///
    /// A threaded unit's worker finishes its current frame and exits; the
    /// call waits for that unless it is made from the worker itself.
    pub fn stop(&self) {
        let changed = self.transition(UnitState::Terminated);
        let worker = lock(&self.inner.worker, "worker").take();
        if let Some(worker) = worker {
            if worker.thread_id() == thread::current().id() {
                log::debug!("Unit {}: stopping from its own thread", self.inner.id);
            }
            worker.shutdown();
        }
        if changed {
            log::info!("Unit {} ({}) terminated", self.inner.id, self.inner.name);
        }
    }

    /// Block while the unit is `Running`, up to `timeout` if given.
    pub fn wait_while_running(&self, timeout: Option<Duration>) -> UnitState {
        let started = Instant::now();
        loop {
            let state = self.state();
            if state != UnitState::Running {
                return state;
            }
            if timeout.is_some_and(|t| started.elapsed() >= t) {
                return state;
            }
            thread::sleep(Duration::from_micros(200));
        }
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    /// Deliver a message to this unit's inbox. The unit holds its own
    /// reference until the batch it lands in is replaced.
    pub fn send_message(&self, message: MessageId) -> Result<()> {
        self.upgrade_registry()?.dispatch(self.inner.id, message)
    }

    /// Swap the inbox into the fetched batch and return the batch size.
    ///
    /// The previous batch is released, so ids from it must be acquired
    /// before fetching again if they are to be kept.
    pub fn fetch_messages(&self) -> Result<usize> {
        self.upgrade_registry()?.fetch_messages_for(self)
    }

    /// Message `index` of the current fetched batch.
    pub fn get_message(&self, index: usize) -> Option<MessageId> {
        lock(&self.inner.fetched, "fetched queue").get(index).copied()
    }

    /// Replace the fetched batch, returning the previous one.
    pub(crate) fn replace_fetched(&self, batch: Vec<MessageId>) -> Vec<MessageId> {
        std::mem::replace(&mut *lock(&self.inner.fetched, "fetched queue"), batch)
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for UnitInner {
    fn drop(&mut self) {
        let addons = self
            .addons
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for addon in addons.iter_mut() {
            addon.shutdown();
        }
        log::debug!("Unit {} destroyed", self.id);
    }
}
