//! Script engine adapter.
//!
//! A unit talks to its embedded engine through [`ScriptEngine`]: load a
//! chunk, execute it, call a named entry point. Engines are produced by an
//! [`EngineFactory`] that receives a [`ScriptContext`] binding the new
//! instance to its unit and registry, so the foreign-call API can be wired
//! up without any thread-local lookup.
//!
//! The shipped backend is [`RhaiEngine`].

mod resolver;
mod rhai_engine;

pub use resolver::VfsModuleResolver;
pub use rhai_engine::{RhaiEngine, RhaiEngineFactory};

use thiserror::Error;

use crate::registry::WeakRegistry;
use crate::unit::UnitId;

/// Errors reported by a script engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("failed to create engine: {0}")]
    Creation(String),

    #[error("failed to compile '{name}': {message}")]
    Compile { name: String, message: String },

    #[error("{message}")]
    Runtime { message: String },

    #[error("entry point '{0}' is not defined")]
    MissingEntry(String),
}

/// Argument passed to an entry point.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryArg {
    Str(String),
    Int(i64),
    Float(f64),
}

impl From<&str> for EntryArg {
    fn from(s: &str) -> Self {
        EntryArg::Str(s.to_string())
    }
}

/// Everything an engine instance needs to know about its owner.
#[derive(Clone)]
pub struct ScriptContext {
    pub registry: WeakRegistry,
    pub unit: UnitId,
    pub unit_name: String,
}

/// One embedded engine instance, owned by exactly one unit.
pub trait ScriptEngine: Send {
    /// Compile a chunk. It runs on the next [`execute_loaded`](Self::execute_loaded).
    fn load_buffer(&mut self, source: &[u8], name: &str) -> Result<(), EngineError>;

    /// Execute the most recently loaded chunk.
    fn execute_loaded(&mut self) -> Result<(), EngineError>;

    /// Call a function defined by any executed chunk.
    fn call_entry(&mut self, name: &str, args: &[EntryArg]) -> Result<(), EngineError>;
}

/// Creates engine instances for newly started units.
pub trait EngineFactory: Send + Sync {
    fn create(&self, ctx: ScriptContext) -> Result<Box<dyn ScriptEngine>, EngineError>;
}
