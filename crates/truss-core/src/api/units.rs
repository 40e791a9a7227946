//! Spawning and driving other units.

use rhai::Engine;

use super::{script_error, RhaiResult};
use crate::engine::ScriptContext;
use crate::registry::Registry;

/// Spawn a unit, optionally with its own bootstrap, and start it threaded.
///
/// A child that fails to start is still returned; its state reports the
/// failure.
fn spawn_child(
    ctx: &ScriptContext,
    registry: &Registry,
    name: Option<&str>,
    bootstrap: &str,
    arg: &str,
) -> RhaiResult<i64> {
    let unit = match name {
        Some(name) => registry.spawn_named(name),
        None => registry.spawn(),
    }
    .map_err(script_error)?;
    if !bootstrap.is_empty() {
        unit.set_bootstrap(bootstrap).map_err(script_error)?;
    }
    if let Ok(parent) = registry.get_unit(ctx.unit) {
        unit.set_debug(parent.debug_level());
    }
    if let Err(e) = unit.start(arg, true) {
        log::warn!("Unit {}: child unit {} failed to start: {}", ctx.unit, unit.id(), e);
    }
    Ok(unit.id().as_i64())
}

pub(super) fn register(engine: &mut Engine, ctx: &ScriptContext) {
    let c = ctx.clone();
    engine.register_fn("spawn_unit", move |bootstrap: &str, arg: &str| -> RhaiResult<i64> {
        spawn_child(&c, &c.registry()?, None, bootstrap, arg)
    });

    let c = ctx.clone();
    engine.register_fn(
        "spawn_unit",
        move |name: &str, bootstrap: &str, arg: &str| -> RhaiResult<i64> {
            spawn_child(&c, &c.registry()?, Some(name), bootstrap, arg)
        },
    );

    // Returns false if the unit was not idle.
    let c = ctx.clone();
    engine.register_fn("step_unit", move |id: i64| -> RhaiResult<bool> {
        Ok(c.unit_by_id(id)?.step().is_ok())
    });

    let c = ctx.clone();
    engine.register_fn("stop_unit", move |id: i64| -> RhaiResult<()> {
        c.unit_by_id(id)?.stop();
        Ok(())
    });

    let c = ctx.clone();
    engine.register_fn("unit_state", move |id: i64| -> RhaiResult<String> {
        Ok(c.unit_by_id(id)?.state().to_string())
    });

    let c = ctx.clone();
    engine.register_fn("find_unit", move |name: &str| -> RhaiResult<i64> {
        let unit = c.registry()?.find_unit_by_name(name).map_err(script_error)?;
        Ok(unit.id().as_i64())
    });

    let c = ctx.clone();
    engine.register_fn("num_units", move || -> RhaiResult<i64> {
        Ok(c.registry()?.num_units() as i64)
    });

    let c = ctx.clone();
    engine.register_fn("shutdown", move || -> RhaiResult<()> {
        log::info!("Unit {} requested shutdown", c.unit);
        c.registry()?.stop_all();
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::api::test_support::script_engine;
    use crate::unit::{UnitId, UnitState};

    #[test]
    fn test_spawn_and_drive_child() {
        let (registry, _unit, engine) = script_engine();
        registry
            .add_memory_file(
                "scripts/child.rhai",
                "fn core_init(arg) { set_store_string(\"child.arg\", arg); }
                 fn core_update() { set_store_string(\"child.stepped\", \"yes\"); }",
            )
            .unwrap();

        let id = engine
            .eval::<i64>(r#"spawn_unit("child", "scripts/child.rhai", "payload")"#)
            .unwrap();
        let child = registry.get_unit(UnitId::from_i64(id).unwrap()).unwrap();
        assert_eq!(child.name(), "child");
        assert_eq!(registry.get_store_string("child.arg").as_deref(), Some("payload"));
        assert_eq!(engine.eval::<String>(&format!("unit_state({})", id)).unwrap(), "IDLE");
        assert_eq!(engine.eval::<i64>(r#"find_unit("child")"#).unwrap(), id);
        let err = engine.eval::<i64>(r#"find_unit("nobody")"#).unwrap_err();
        assert!(err.to_string().contains("no unit named 'nobody'"));

        assert!(engine.eval::<bool>(&format!("step_unit({})", id)).unwrap());
        child.wait_while_running(Some(Duration::from_secs(5)));
        assert_eq!(registry.get_store_string("child.stepped").as_deref(), Some("yes"));

        engine.run(&format!("stop_unit({})", id)).unwrap();
        assert_eq!(child.state(), UnitState::Terminated);
        assert!(!engine.eval::<bool>(&format!("step_unit({})", id)).unwrap());
        registry.shutdown();
    }

    #[test]
    fn test_failed_child_still_reported() {
        let (registry, _unit, engine) = script_engine();
        let id = engine
            .eval::<i64>(r#"spawn_unit("scripts/missing.rhai", "")"#)
            .unwrap();
        assert_eq!(engine.eval::<String>(&format!("unit_state({})", id)).unwrap(), "ERROR");
        assert_eq!(engine.eval::<i64>("num_units()").unwrap(), 2);
        assert_eq!(registry.get_error(), crate::error::codes::BOOTSTRAP_LOAD);
    }

    #[test]
    fn test_unknown_unit_raises() {
        let (_registry, _unit, engine) = script_engine();
        assert!(engine.eval::<String>("unit_state(42)").is_err());
        assert!(engine.run("stop_unit(-1)").is_err());
    }
}
