//! Functions exposed to unit scripts.
//!
//! Every engine instance gets its own copy of the API, bound to its unit
//! through a [`ScriptContext`]. The closures hold only weak references, so
//! an engine never keeps the registry alive.
//!
//! Message handles appear in scripts as values of type `Message`. They
//! follow the same reference rules as on the host side: `create_message`,
//! `copy_message` and `load_file` hand the script one reference it must
//! eventually `release_message`.

mod files;
mod messages;
mod runtime;
mod store;
mod units;

use rhai::{Engine, EvalAltResult};

use crate::engine::ScriptContext;
use crate::error::Error;
use crate::registry::Registry;
use crate::unit::{Unit, UnitId};

pub(crate) type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

/// Register the full script API on `engine`.
pub fn register_api(engine: &mut Engine, ctx: &ScriptContext) {
    runtime::register(engine, ctx);
    units::register(engine, ctx);
    messages::register(engine, ctx);
    store::register(engine, ctx);
    files::register(engine, ctx);
}

pub(crate) fn script_error(err: Error) -> Box<EvalAltResult> {
    err.to_string().into()
}

impl ScriptContext {
    pub(crate) fn registry(&self) -> RhaiResult<Registry> {
        self.registry
            .upgrade()
            .ok_or_else(|| "runtime has shut down".into())
    }

    pub(crate) fn own_unit(&self) -> RhaiResult<Unit> {
        self.registry()?.get_unit(self.unit).map_err(script_error)
    }

    pub(crate) fn unit_by_id(&self, id: i64) -> RhaiResult<Unit> {
        let id = UnitId::from_i64(id).ok_or_else(|| format!("invalid unit id {}", id))?;
        self.registry()?.get_unit(id).map_err(script_error)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::RuntimeConfig;

    /// An engine bound to a fresh unit of a fresh registry.
    pub fn script_engine() -> (Registry, Unit, Engine) {
        let registry = Registry::new(RuntimeConfig::default());
        let unit = registry.spawn_named("api-test").unwrap();
        let ctx = ScriptContext {
            registry: registry.downgrade(),
            unit: unit.id(),
            unit_name: unit.name().to_string(),
        };
        let mut engine = Engine::new();
        register_api(&mut engine, &ctx);
        (registry, unit, engine)
    }
}
