//! The registry: owner of every unit and of all shared runtime state.
//!
//! A [`Registry`] holds, behind one lock, the list of units with their
//! inboxes, the message pool, the store and the process error code. The
//! virtual filesystem sits behind its own read/write lock. Handles are
//! cheap to clone; scripts and addons keep a [`WeakRegistry`] so they never
//! keep the runtime alive on their own.
//!
//! Most programs use the process-wide instance from [`Registry::global`];
//! tests and embedders can build independent registries with
//! [`Registry::new`].

use std::path::{Path, PathBuf};
use std::sync::{
    Arc, Mutex, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::Instant;

use crate::config::{RuntimeConfig, DEFAULT_BOOTSTRAP};
use crate::engine::{EngineFactory, RhaiEngineFactory};
use crate::error::{Error, Result};
use crate::logging::{log_at, LogLevel};
use crate::message::{MessageHeader, MessageId, MessagePool, MessageType};
use crate::store::Store;
use crate::unit::{Unit, UnitId};
use crate::vfs::{FileKind, Vfs};

const EMBEDDED_BOOTSTRAP: &str = include_str!("bootstrap.rhai");

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Handle to the runtime. Clones refer to the same registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

/// Non-owning handle to a registry.
#[derive(Clone, Default)]
pub struct WeakRegistry(Weak<RegistryInner>);

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<Registry> {
        self.0.upgrade().map(|inner| Registry { inner })
    }
}

struct RegistryInner {
    config: RuntimeConfig,
    factory: Arc<dyn EngineFactory>,
    state: Mutex<RegistryState>,
    vfs: RwLock<Vfs>,
    started_at: Instant,
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for slot in &state.units {
            slot.unit.stop();
        }
    }
}

struct UnitSlot {
    unit: Unit,
    inbox: Vec<MessageId>,
}

#[derive(Default)]
struct RegistryState {
    next_id: u32,
    units: Vec<UnitSlot>,
    pool: MessagePool,
    store: Store,
    error: i32,
    error_history: Vec<i32>,
}

impl RegistryState {
    fn slot_mut(&mut self, id: UnitId) -> Result<&mut UnitSlot> {
        let index = self
            .units
            .binary_search_by_key(&id, |slot| slot.unit.id())
            .map_err(|_| Error::InvalidUnitIndex(id))?;
        Ok(&mut self.units[index])
    }

    fn release(&mut self, id: MessageId, op: &'static str) -> Result<u32> {
        self.pool.release(id).ok_or_else(|| misuse(id, op))
    }
}

fn misuse(id: MessageId, op: &'static str) -> Error {
    log::error!("Refcount misuse: {} on released message {}", op, id);
    Error::RefcountMisuse { id, op }
}

fn build_vfs(config: &RuntimeConfig) -> Vfs {
    let settings = &config.vfs;
    let mut vfs = Vfs::new(&settings.base_dir);
    for mount in &settings.mounts {
        if let Err(e) = vfs.add_path(&mount.path, &mount.mount_point, mount.append) {
            log::error!("Failed to mount {}: {}", mount.path.display(), e);
        }
    }
    if !settings.write_dir.as_os_str().is_empty() {
        if let Err(e) = vfs.set_write_dir(&settings.write_dir) {
            log::error!("Failed to set write dir: {}", e);
        }
    }
    if let Err(e) = vfs.add_memory_file(DEFAULT_BOOTSTRAP, EMBEDDED_BOOTSTRAP) {
        log::error!("Failed to embed default bootstrap: {}", e);
    }
    vfs
}

impl Registry {
    /// Create a registry whose units run Rhai.
    pub fn new(config: RuntimeConfig) -> Self {
        let factory = Arc::new(RhaiEngineFactory::new(config.engine.clone()));
        Self::with_engine_factory(config, factory)
    }

    /// Create a registry with a custom engine backend.
    pub fn with_engine_factory(config: RuntimeConfig, factory: Arc<dyn EngineFactory>) -> Self {
        let vfs = build_vfs(&config);
        Self {
            inner: Arc::new(RegistryInner {
                config,
                factory,
                state: Mutex::new(RegistryState::default()),
                vfs: RwLock::new(vfs),
                started_at: Instant::now(),
            }),
        }
    }

    /// The process-wide registry, created with the default configuration
    /// on first use unless [`init_global`](Self::init_global) ran before.
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(|| Registry::new(RuntimeConfig::default()))
    }

    /// Create the process-wide registry from `config`.
    ///
    /// Fails if it already exists, including when [`global`](Self::global)
    /// was called first.
    pub fn init_global(config: RuntimeConfig) -> Result<&'static Registry> {
        let mut created = false;
        let registry = GLOBAL.get_or_init(|| {
            created = true;
            Registry::new(config)
        });
        if created {
            Ok(registry)
        } else {
            Err(Error::AlreadyInitialized)
        }
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry(Arc::downgrade(&self.inner))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn engine_factory(&self) -> &dyn EngineFactory {
        self.inner.factory.as_ref()
    }

    fn with_state<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut RegistryState) -> R,
    {
        let mut state = self.inner.state.lock().expect("Registry lock poisoned");
        f(&mut state)
    }

    fn vfs(&self) -> RwLockReadGuard<'_, Vfs> {
        self.inner.vfs.read().expect("VFS lock poisoned")
    }

    fn vfs_mut(&self) -> RwLockWriteGuard<'_, Vfs> {
        self.inner.vfs.write().expect("VFS lock poisoned")
    }

    // ========================================================================
    // Units
    // ========================================================================

    /// Create a new, not yet started unit.
    pub fn spawn(&self) -> Result<Unit> {
        self.spawn_with(None)
    }

    /// Create a new unit with a display name.
    pub fn spawn_named(&self, name: &str) -> Result<Unit> {
        self.spawn_with(Some(name))
    }

    fn spawn_with(&self, name: Option<&str>) -> Result<Unit> {
        let unit = self.with_state(|state| {
            let Some(next) = state.next_id.checked_add(1) else {
                log::error!("Cannot spawn unit: ids exhausted");
                return Err(Error::UnitIdsExhausted);
            };
            let id = UnitId::new(state.next_id);
            state.next_id = next;
            let name = name.map_or_else(|| format!("unit-{}", id), str::to_string);
            let unit = Unit::new(id, name, self.downgrade());
            state.units.push(UnitSlot {
                unit: unit.clone(),
                inbox: Vec::new(),
            });
            Ok(unit)
        })?;
        log::debug!("Spawned unit {} ({})", unit.id(), unit.name());
        Ok(unit)
    }

    pub fn get_unit(&self, id: UnitId) -> Result<Unit> {
        self.with_state(|state| state.slot_mut(id).map(|slot| slot.unit.clone()))
    }

    /// First unit spawned with `name`.
    pub fn find_unit_by_name(&self, name: &str) -> Result<Unit> {
        self.with_state(|state| {
            state
                .units
                .iter()
                .find(|slot| slot.unit.name() == name)
                .map(|slot| slot.unit.clone())
                .ok_or_else(|| Error::UnknownUnitName(name.to_string()))
        })
    }

    pub fn num_units(&self) -> usize {
        self.with_state(|state| state.units.len())
    }

    /// Snapshot of all units in spawn order.
    pub fn units(&self) -> Vec<Unit> {
        self.with_state(|state| state.units.iter().map(|slot| slot.unit.clone()).collect())
    }

    /// Stop every unit, joining worker threads.
    pub fn stop_all(&self) {
        for unit in self.units() {
            unit.stop();
        }
    }

    /// Stop all units and release everything the registry holds.
    ///
    /// Units are dropped once the last outside handle goes away, which runs
    /// their addons' shutdown hooks. Idempotent.
    pub fn shutdown(&self) {
        self.stop_all();
        let slots = self.with_state(|state| {
            let slots = std::mem::take(&mut state.units);
            for slot in &slots {
                let fetched = slot.unit.replace_fetched(Vec::new());
                for id in slot.inbox.iter().chain(fetched.iter()) {
                    if state.pool.release(*id).is_none() {
                        log::error!("Queued message {} was already released", id);
                    }
                }
            }
            let RegistryState { store, pool, .. } = state;
            store.clear(pool);
            slots
        });
        let count = slots.len();
        drop(slots);
        if count > 0 {
            log::info!(
                "Registry shut down: {} units, {} messages still live",
                count,
                self.live_messages()
            );
        }
    }

    /// Send `message` to unit `target`, taking a reference for the inbox.
    pub fn dispatch(&self, target: UnitId, message: MessageId) -> Result<()> {
        self.with_state(|state| {
            state.slot_mut(target)?;
            state
                .pool
                .acquire(message)
                .ok_or_else(|| misuse(message, "dispatch"))?;
            state.slot_mut(target)?.inbox.push(message);
            Ok(())
        })
    }

    /// Move `unit`'s inbox into its fetched batch, releasing the old batch.
    ///
    /// A handle in the old batch that was already released is logged and
    /// skipped; the rest of the batch is still released.
    pub(crate) fn fetch_messages_for(&self, unit: &Unit) -> Result<usize> {
        self.with_state(|state| {
            let batch = std::mem::take(&mut state.slot_mut(unit.id())?.inbox);
            let count = batch.len();
            for id in unit.replace_fetched(batch) {
                let _ = state.release(id, "fetch");
            }
            Ok(count)
        })
    }

    // ========================================================================
    // Errors, logging, time
    // ========================================================================

    /// Record an error code. Only the first non-zero code is kept as the
    /// process error; every code is appended to the history.
    pub fn set_error(&self, code: i32) {
        if code == 0 {
            return;
        }
        self.with_state(|state| {
            state.error_history.push(code);
            if state.error == 0 {
                state.error = code;
            } else {
                log::debug!("Error {} recorded, keeping {}", code, state.error);
            }
        });
    }

    pub fn get_error(&self) -> i32 {
        self.with_state(|state| state.error)
    }

    /// Every non-zero code passed to [`set_error`](Self::set_error), in order.
    pub fn error_history(&self) -> Vec<i32> {
        self.with_state(|state| state.error_history.clone())
    }

    pub fn log_message(&self, level: LogLevel, text: &str) {
        log_at(level, "host", text);
    }

    /// Nanoseconds since the registry was created.
    pub fn elapsed_nanos(&self) -> u64 {
        self.inner.started_at.elapsed().as_nanos() as u64
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Allocate a zero-filled message. The caller owns one reference.
    pub fn allocate_message(&self, length: usize) -> MessageId {
        self.with_state(|state| state.pool.allocate(length))
    }

    /// Allocate a message holding a copy of `bytes`. The caller owns one
    /// reference.
    pub fn create_message(&self, message_type: MessageType, bytes: &[u8]) -> MessageId {
        self.with_state(|state| state.pool.allocate_from(message_type, bytes))
    }

    pub fn acquire_message(&self, id: MessageId) -> Result<u32> {
        self.with_state(|state| state.pool.acquire(id).ok_or_else(|| misuse(id, "acquire")))
    }

    /// Drop a reference. Returns the remaining count; at zero the message
    /// is freed and `id` becomes stale.
    pub fn release_message(&self, id: MessageId) -> Result<u32> {
        self.with_state(|state| state.release(id, "release"))
    }

    /// Independent copy of a message. The caller owns one reference.
    pub fn copy_message(&self, id: MessageId) -> Result<MessageId> {
        self.with_state(|state| state.pool.copy(id).ok_or_else(|| misuse(id, "copy")))
    }

    pub fn message_bytes(&self, id: MessageId) -> Result<Vec<u8>> {
        self.with_state(|state| {
            state
                .pool
                .bytes(id)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| misuse(id, "read"))
        })
    }

    /// Message contents as text, trailing NULs stripped.
    pub fn message_string(&self, id: MessageId) -> Result<String> {
        self.with_message(id, "read", |m| {
            let data = m.data();
            let end = data.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
            String::from_utf8_lossy(&data[..end]).into_owned()
        })
    }

    pub fn message_type(&self, id: MessageId) -> Result<MessageType> {
        self.with_message(id, "read", |m| m.message_type())
    }

    pub fn message_len(&self, id: MessageId) -> Result<usize> {
        self.with_message(id, "read", |m| m.len())
    }

    pub fn message_refcount(&self, id: MessageId) -> Result<u32> {
        self.with_message(id, "refcount", |m| m.refcount())
    }

    /// The fixed-layout header of a message.
    ///
    /// `data` points into the pool and is only valid while the caller holds
    /// a reference and nothing writes to the message.
    pub fn message_header(&self, id: MessageId) -> Result<MessageHeader> {
        self.with_state(|state| state.pool.header(id).ok_or_else(|| misuse(id, "header")))
    }

    /// Overwrite bytes at `offset`. Returns `false` if they don't fit.
    pub fn write_message(&self, id: MessageId, offset: usize, bytes: &[u8]) -> Result<bool> {
        self.with_state(|state| {
            state
                .pool
                .write(id, offset, bytes)
                .ok_or_else(|| misuse(id, "write"))
        })
    }

    pub fn set_message_type(&self, id: MessageId, message_type: MessageType) -> Result<()> {
        self.with_state(|state| {
            state
                .pool
                .set_type(id, message_type)
                .ok_or_else(|| misuse(id, "set type"))
        })
    }

    /// Number of messages not yet freed.
    pub fn live_messages(&self) -> usize {
        self.with_state(|state| state.pool.live_count())
    }

    fn with_message<R>(
        &self,
        id: MessageId,
        op: &'static str,
        f: impl FnOnce(&crate::message::Message) -> R,
    ) -> Result<R> {
        self.with_state(|state| state.pool.get(id).map(f).ok_or_else(|| misuse(id, op)))
    }

    // ========================================================================
    // Store
    // ========================================================================

    /// The message stored under `key`. No reference is transferred; acquire
    /// it to keep it beyond the next store update.
    pub fn get_store_value(&self, key: &str) -> Option<MessageId> {
        self.with_state(|state| state.store.get(key))
    }

    /// Store `id` under `key`. The store takes its own reference.
    /// Returns whether the key already existed.
    pub fn set_store_value(&self, key: &str, id: MessageId) -> Result<bool> {
        self.with_state(|state| {
            let RegistryState { store, pool, .. } = state;
            store.set(pool, key, id).ok_or_else(|| misuse(id, "store"))
        })
    }

    /// Store a copy of `bytes` under `key`.
    pub fn set_store_bytes(&self, key: &str, message_type: MessageType, bytes: &[u8]) -> bool {
        self.with_state(|state| {
            let RegistryState { store, pool, .. } = state;
            store.set_bytes(pool, key, message_type, bytes)
        })
    }

    pub fn set_store_string(&self, key: &str, value: &str) -> bool {
        self.set_store_bytes(key, MessageType::CString, value.as_bytes())
    }

    /// The stored message under `key` decoded as text.
    pub fn get_store_string(&self, key: &str) -> Option<String> {
        let id = self.get_store_value(key)?;
        self.message_string(id).ok()
    }

    pub fn store_keys(&self) -> Vec<String> {
        self.with_state(|state| state.store.keys().map(str::to_string).collect())
    }

    // ========================================================================
    // Virtual filesystem
    // ========================================================================

    pub fn check_file(&self, path: &str) -> FileKind {
        self.vfs().check(path)
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        Ok(self.vfs().read(path)?)
    }

    /// Read a file into a new `Blob` message. The caller owns one reference.
    pub fn load_file(&self, path: &str) -> Result<MessageId> {
        let bytes = self.read_file(path).map_err(|e| {
            log::error!("Failed to load '{}': {}", path, e);
            e
        })?;
        Ok(self.create_message(MessageType::Blob, &bytes))
    }

    /// Write a message's bytes to `path` in the write directory.
    pub fn save_file(&self, path: &str, id: MessageId) -> Result<()> {
        let bytes = self.message_bytes(id)?;
        self.vfs().write(path, &bytes).map_err(|e| {
            log::error!("Failed to save '{}': {}", path, e);
            e.into()
        })
    }

    pub fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.vfs().list_directory(path)?)
    }

    /// Mount a real directory. `append` searches it after existing mounts.
    pub fn add_fs_path(&self, dir: impl AsRef<Path>, mount_point: &str, append: bool) -> Result<()> {
        Ok(self.vfs_mut().add_path(dir, mount_point, append)?)
    }

    pub fn set_write_dir(&self, dir: impl AsRef<Path>) -> Result<()> {
        Ok(self.vfs_mut().set_write_dir(dir)?)
    }

    /// Host path backing a virtual file, if it lives on disk.
    pub fn real_path(&self, path: &str) -> Option<PathBuf> {
        self.vfs().real_path(path)
    }

    /// Add or replace a file in the in-memory layer.
    pub fn add_memory_file(&self, path: &str, contents: impl Into<Vec<u8>>) -> Result<()> {
        Ok(self.vfs_mut().add_memory_file(path, contents)?)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("units", &self.num_units())
            .field("error", &self.get_error())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitState;

    fn registry() -> Registry {
        Registry::new(RuntimeConfig::default())
    }

    #[test]
    fn test_spawn_assigns_unique_ids() {
        let registry = registry();
        let a = registry.spawn().unwrap();
        let b = registry.spawn_named("worker").unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.name(), format!("unit-{}", a.id()));
        assert_eq!(registry.num_units(), 2);
        assert_eq!(registry.find_unit_by_name("worker").unwrap().id(), b.id());
        assert!(matches!(
            registry.find_unit_by_name("nobody"),
            Err(Error::UnknownUnitName(_))
        ));
        assert!(registry.get_unit(UnitId::new(99)).is_err());
    }

    #[test]
    fn test_spawn_fails_when_ids_run_out() {
        let registry = registry();
        registry.with_state(|state| state.next_id = u32::MAX - 1);
        let last = registry.spawn().unwrap();
        assert_eq!(last.id(), UnitId::new(u32::MAX - 1));
        assert!(matches!(registry.spawn(), Err(Error::UnitIdsExhausted)));
        assert!(matches!(registry.spawn_named("late"), Err(Error::UnitIdsExhausted)));
        assert_eq!(registry.num_units(), 1);
    }

    #[test]
    fn test_first_error_wins() {
        let registry = registry();
        assert_eq!(registry.get_error(), 0);
        registry.set_error(0);
        registry.set_error(1001);
        registry.set_error(2000);
        assert_eq!(registry.get_error(), 1001);
        assert_eq!(registry.error_history(), vec![1001, 2000]);
    }

    #[test]
    fn test_message_refcounting() {
        let registry = registry();
        let id = registry.create_message(MessageType::CString, b"hello\0");
        assert_eq!(registry.message_string(id).unwrap(), "hello");
        assert_eq!(registry.acquire_message(id).unwrap(), 2);
        assert_eq!(registry.release_message(id).unwrap(), 1);
        assert_eq!(registry.release_message(id).unwrap(), 0);
        assert_eq!(registry.live_messages(), 0);

        // A stale handle is reported, never reused silently.
        assert!(matches!(
            registry.release_message(id),
            Err(Error::RefcountMisuse { op: "release", .. })
        ));
        let fresh = registry.allocate_message(4);
        assert_ne!(fresh, id);
        assert!(registry.acquire_message(id).is_err());
    }

    #[test]
    fn test_write_and_header() {
        let registry = registry();
        let id = registry.allocate_message(4);
        assert!(registry.write_message(id, 1, b"ab").unwrap());
        assert!(!registry.write_message(id, 3, b"ab").unwrap());
        assert_eq!(registry.message_bytes(id).unwrap(), b"\0ab\0");
        registry.set_message_type(id, MessageType::Blob).unwrap();
        let header = registry.message_header(id).unwrap();
        assert_eq!(header.type_tag, MessageType::Blob.tag());
        assert_eq!(header.length, 4);
        assert_eq!(header.refcount, 1);
    }

    #[test]
    fn test_store_holds_one_reference() {
        let registry = registry();
        let id = registry.create_message(MessageType::CString, b"v1");
        assert!(!registry.set_store_value("k", id).unwrap());
        assert_eq!(registry.get_store_value("k"), Some(id));
        assert_eq!(registry.message_refcount(id).unwrap(), 2);
        registry.release_message(id).unwrap();

        assert!(registry.set_store_string("k", "v2"));
        assert!(registry.acquire_message(id).is_err());
        assert_eq!(registry.get_store_string("k").as_deref(), Some("v2"));
        assert_eq!(registry.get_store_string("missing"), None);
        assert_eq!(registry.store_keys(), vec!["k".to_string()]);
    }

    #[test]
    fn test_dispatch_to_unknown_unit() {
        let registry = registry();
        let id = registry.create_message(MessageType::Blob, b"x");
        assert!(matches!(
            registry.dispatch(UnitId::new(5), id),
            Err(Error::InvalidUnitIndex(_))
        ));
        assert_eq!(registry.message_refcount(id).unwrap(), 1);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let registry = registry();
        registry
            .add_memory_file(DEFAULT_BOOTSTRAP, "fn core_init(arg) {} fn core_update() {}")
            .unwrap();
        let unit = registry.spawn().unwrap();
        unit.start("", true).unwrap();

        let id = registry.create_message(MessageType::CString, b"queued");
        unit.send_message(id).unwrap();
        registry.release_message(id).unwrap();
        registry.set_store_string("k", "v");
        assert_eq!(registry.live_messages(), 2);

        registry.shutdown();
        registry.shutdown();
        assert_eq!(unit.state(), UnitState::Terminated);
        assert_eq!(registry.num_units(), 0);
        assert_eq!(registry.live_messages(), 0);
    }

    #[test]
    fn test_vfs_wrappers() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        registry.set_write_dir(dir.path()).unwrap();
        registry.add_fs_path(dir.path(), "data", false).unwrap();

        let id = registry.create_message(MessageType::CString, b"saved");
        registry.save_file("out.txt", id).unwrap();
        assert_eq!(registry.check_file("data/out.txt"), FileKind::File);

        let loaded = registry.load_file("data/out.txt").unwrap();
        assert_eq!(registry.message_type(loaded).unwrap(), MessageType::Blob);
        assert_eq!(registry.message_bytes(loaded).unwrap(), b"saved");
        assert!(registry.load_file("data/missing.txt").is_err());
        assert_eq!(registry.list_directory("data").unwrap(), vec!["out.txt".to_string()]);
    }

    #[test]
    fn test_default_bootstrap_is_embedded() {
        let registry = registry();
        assert_eq!(registry.check_file(DEFAULT_BOOTSTRAP), FileKind::File);
    }
}
