//! Identity, errors, logging, time and addon introspection.

use std::time::Duration;

use rhai::Engine;

use super::{script_error, RhaiResult};
use crate::engine::ScriptContext;
use crate::logging::{log_at, LogLevel};

pub(super) fn register(engine: &mut Engine, ctx: &ScriptContext) {
    let id = ctx.unit.as_i64();
    engine.register_fn("unit_id", move || id);

    let name = ctx.unit_name.clone();
    engine.register_fn("unit_name", move || name.clone());

    let c = ctx.clone();
    engine.register_fn("debug_level", move || -> RhaiResult<i64> {
        Ok(c.own_unit()?.debug_level())
    });

    engine.register_fn("truss_version", || env!("CARGO_PKG_VERSION").to_string());

    // Errors

    let c = ctx.clone();
    engine.register_fn("set_error", move |code: i64| -> RhaiResult<()> {
        let code = i32::try_from(code).map_err(|_| format!("error code {} out of range", code))?;
        c.registry()?.set_error(code);
        Ok(())
    });

    let c = ctx.clone();
    engine.register_fn("get_error", move || -> RhaiResult<i64> {
        Ok(c.registry()?.get_error() as i64)
    });

    // Logging

    let source = format!("unit {}", ctx.unit);
    engine.register_fn("log", move |level: i64, text: &str| {
        log_at(LogLevel::from_i64(level), &source, text);
    });

    // Time

    let c = ctx.clone();
    engine.register_fn("hp_time", move || -> RhaiResult<i64> {
        Ok(c.registry()?.elapsed_nanos() as i64)
    });

    engine.register_fn("sleep_ms", |ms: i64| {
        std::thread::sleep(Duration::from_millis(ms.max(0) as u64));
    });

    // Addons

    let c = ctx.clone();
    engine.register_fn("addon_count", move || -> RhaiResult<i64> {
        Ok(c.own_unit()?.num_addons() as i64)
    });

    let c = ctx.clone();
    engine.register_fn("addon_name", move |index: i64| -> RhaiResult<String> {
        Ok(addon_info(&c, index)?.name)
    });

    let c = ctx.clone();
    engine.register_fn("addon_version", move |index: i64| -> RhaiResult<String> {
        Ok(addon_info(&c, index)?.version)
    });

    let c = ctx.clone();
    engine.register_fn("addon_descriptor", move |index: i64| -> RhaiResult<String> {
        Ok(addon_info(&c, index)?.descriptor)
    });
}

fn addon_info(ctx: &ScriptContext, index: i64) -> RhaiResult<crate::addon::AddonInfo> {
    let index = usize::try_from(index).map_err(|_| format!("invalid addon index {}", index))?;
    ctx.own_unit()?.get_addon(index).map_err(script_error)
}
