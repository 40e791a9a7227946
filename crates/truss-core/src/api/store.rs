//! Store access.

use rhai::{Dynamic, Engine};

use super::{script_error, RhaiResult};
use crate::engine::ScriptContext;
use crate::message::MessageId;

pub(super) fn register(engine: &mut Engine, ctx: &ScriptContext) {
    // No reference is transferred; acquire the result to keep it.
    let c = ctx.clone();
    engine.register_fn("get_store_value", move |key: &str| -> RhaiResult<Dynamic> {
        Ok(c.registry()?
            .get_store_value(key)
            .map_or(Dynamic::UNIT, Dynamic::from))
    });

    let c = ctx.clone();
    engine.register_fn("get_store_string", move |key: &str| -> RhaiResult<Dynamic> {
        Ok(c.registry()?
            .get_store_string(key)
            .map_or(Dynamic::UNIT, Dynamic::from))
    });

    let c = ctx.clone();
    engine.register_fn("set_store_value", move |key: &str, m: MessageId| -> RhaiResult<bool> {
        c.registry()?.set_store_value(key, m).map_err(script_error)
    });

    let c = ctx.clone();
    engine.register_fn("set_store_string", move |key: &str, value: &str| -> RhaiResult<bool> {
        Ok(c.registry()?.set_store_string(key, value))
    });

    let c = ctx.clone();
    engine.register_fn("store_keys", move || -> RhaiResult<rhai::Array> {
        Ok(c.registry()?
            .store_keys()
            .into_iter()
            .map(Dynamic::from)
            .collect())
    });
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::script_engine;

    #[test]
    fn test_store_strings() {
        let (registry, _unit, engine) = script_engine();
        registry.set_store_string("arg0", "scripts/main.rhai");
        assert_eq!(
            engine.eval::<String>(r#"get_store_string("arg0")"#).unwrap(),
            "scripts/main.rhai"
        );
        assert!(engine.eval::<()>(r#"get_store_string("arg9")"#).is_ok());
        assert!(engine.eval::<()>(r#"get_store_value("arg9")"#).is_ok());

        let existed = engine
            .eval::<bool>(r#"set_store_string("k", "a"); set_store_string("k", "b")"#)
            .unwrap();
        assert!(existed);
        assert_eq!(registry.get_store_string("k").as_deref(), Some("b"));
    }

    #[test]
    fn test_store_values_keep_a_reference() {
        let (registry, _unit, engine) = script_engine();
        engine
            .run(
                r#"
                let m = message_from_string("shared");
                set_store_value("shared", m);
                release_message(m);
                "#,
            )
            .unwrap();
        assert_eq!(registry.live_messages(), 1);
        assert_eq!(
            engine
                .eval::<String>(r#"message_string(get_store_value("shared"))"#)
                .unwrap(),
            "shared"
        );
        assert_eq!(engine.eval::<rhai::Array>("store_keys()").unwrap().len(), 1);
    }
}
