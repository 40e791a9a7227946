//! Error types for the truss core.

use thiserror::Error;

use crate::engine::EngineError;
use crate::message::MessageId;
use crate::unit::{UnitId, UnitState};
use crate::vfs::VfsError;

/// Process error codes reported through [`Registry::get_error`](crate::Registry::get_error).
pub mod codes {
    /// The bootstrap program could not be read or compiled.
    pub const BOOTSTRAP_LOAD: i32 = 1000;
    /// The bootstrap program raised an error while executing.
    pub const BOOTSTRAP_EXECUTION: i32 = 1001;
    /// The init entry point failed.
    pub const ENTRY_INIT: i32 = 1002;
    /// The script engine instance could not be created.
    pub const ENGINE_CREATION: i32 = 1003;
    /// A capability failed to initialize.
    pub const ADDON_INIT: i32 = 1004;
    /// The per-frame entry point failed.
    pub const ENTRY_UPDATE: i32 = 2000;
    /// Anything that is not a unit lifecycle failure.
    pub const GENERIC: i32 = 1;
}

/// Errors that can occur in the truss runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// The script engine instance could not be created.
    #[error("unit {unit}: failed to create script engine: {source}")]
    EngineCreation {
        unit: UnitId,
        #[source]
        source: EngineError,
    },

    /// The bootstrap program could not be loaded.
    #[error("unit {unit}: failed to load bootstrap '{path}': {reason}")]
    BootstrapLoad {
        unit: UnitId,
        path: String,
        reason: String,
    },

    /// The bootstrap program failed while executing.
    #[error("unit {unit}: bootstrap failed: {source}")]
    BootstrapExecution {
        unit: UnitId,
        #[source]
        source: EngineError,
    },

    /// A capability's `init` hook failed.
    #[error("unit {unit}: addon '{addon}' failed to initialize: {reason}")]
    InitCapability {
        unit: UnitId,
        addon: String,
        reason: String,
    },

    /// A designated entry point failed.
    #[error("unit {unit}: entry '{entry}' failed: {source}")]
    EntryCall {
        unit: UnitId,
        entry: String,
        per_frame: bool,
        #[source]
        source: EngineError,
    },

    /// No unit is registered under this id.
    #[error("invalid unit index: {0}")]
    InvalidUnitIndex(UnitId),

    /// Every unit id has been handed out.
    #[error("unit ids exhausted")]
    UnitIdsExhausted,

    /// No unit is registered under this name.
    #[error("no unit named '{0}'")]
    UnknownUnitName(String),

    /// The unit has no capability at this index.
    #[error("unit {unit}: invalid addon index {index}")]
    InvalidAddonIndex { unit: UnitId, index: usize },

    /// A message handle was used after its last reference was released.
    #[error("refcount misuse: {op} on released message {id}")]
    RefcountMisuse { id: MessageId, op: &'static str },

    /// The operation is not valid in the unit's current state.
    #[error("unit {unit}: cannot {op} while {state}")]
    InvalidState {
        unit: UnitId,
        op: &'static str,
        state: UnitState,
    },

    /// The worker thread could not be spawned.
    #[error("unit {unit}: failed to spawn worker thread: {source}")]
    ThreadSpawn {
        unit: UnitId,
        #[source]
        source: std::io::Error,
    },

    /// Virtual filesystem error.
    #[error(transparent)]
    Vfs(#[from] VfsError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The process-wide registry was already constructed.
    #[error("registry already initialized")]
    AlreadyInitialized,
}

impl Error {
    /// The process error code this failure contributes to the registry.
    pub fn code(&self) -> i32 {
        match self {
            Error::EngineCreation { .. } => codes::ENGINE_CREATION,
            Error::BootstrapLoad { .. } => codes::BOOTSTRAP_LOAD,
            Error::BootstrapExecution { .. } => codes::BOOTSTRAP_EXECUTION,
            Error::InitCapability { .. } => codes::ADDON_INIT,
            Error::EntryCall { per_frame: false, .. } => codes::ENTRY_INIT,
            Error::EntryCall { per_frame: true, .. } => codes::ENTRY_UPDATE,
            _ => codes::GENERIC,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Result type alias for truss operations.
pub type Result<T> = std::result::Result<T, Error>;
