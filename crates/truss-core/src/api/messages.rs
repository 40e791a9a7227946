//! Message handles and unit-to-unit delivery.

use rhai::{Dynamic, Engine};

use super::{script_error, RhaiResult};
use crate::engine::ScriptContext;
use crate::message::{MessageId, MessageType};
use crate::unit::UnitId;

pub(super) fn register(engine: &mut Engine, ctx: &ScriptContext) {
    engine
        .register_type_with_name::<MessageId>("Message")
        .register_fn("to_string", |m: &mut MessageId| m.to_string())
        .register_fn("to_debug", |m: &mut MessageId| format!("Message({})", m))
        .register_fn("==", |a: MessageId, b: MessageId| a == b)
        .register_fn("!=", |a: MessageId, b: MessageId| a != b);

    let c = ctx.clone();
    engine.register_fn("create_message", move |len: i64| -> RhaiResult<MessageId> {
        let len = usize::try_from(len).map_err(|_| format!("invalid message length {}", len))?;
        Ok(c.registry()?.allocate_message(len))
    });

    let c = ctx.clone();
    engine.register_fn("message_from_string", move |text: &str| -> RhaiResult<MessageId> {
        Ok(c.registry()?.create_message(MessageType::CString, text.as_bytes()))
    });

    let c = ctx.clone();
    engine.register_fn("acquire_message", move |m: MessageId| -> RhaiResult<i64> {
        Ok(c.registry()?.acquire_message(m).map_err(script_error)? as i64)
    });

    let c = ctx.clone();
    engine.register_fn("release_message", move |m: MessageId| -> RhaiResult<i64> {
        Ok(c.registry()?.release_message(m).map_err(script_error)? as i64)
    });

    let c = ctx.clone();
    engine.register_fn("copy_message", move |m: MessageId| -> RhaiResult<MessageId> {
        c.registry()?.copy_message(m).map_err(script_error)
    });

    let c = ctx.clone();
    engine.register_fn("message_string", move |m: MessageId| -> RhaiResult<String> {
        c.registry()?.message_string(m).map_err(script_error)
    });

    let c = ctx.clone();
    engine.register_fn("message_len", move |m: MessageId| -> RhaiResult<i64> {
        Ok(c.registry()?.message_len(m).map_err(script_error)? as i64)
    });

    let c = ctx.clone();
    engine.register_fn("message_refcount", move |m: MessageId| -> RhaiResult<i64> {
        Ok(c.registry()?.message_refcount(m).map_err(script_error)? as i64)
    });

    let c = ctx.clone();
    engine.register_fn("message_type", move |m: MessageId| -> RhaiResult<i64> {
        Ok(c.registry()?.message_type(m).map_err(script_error)?.tag() as i64)
    });

    let c = ctx.clone();
    engine.register_fn(
        "write_message",
        move |m: MessageId, offset: i64, text: &str| -> RhaiResult<bool> {
            let Ok(offset) = usize::try_from(offset) else {
                return Ok(false);
            };
            c.registry()?
                .write_message(m, offset, text.as_bytes())
                .map_err(script_error)
        },
    );

    // The inbox takes its own reference; the sender keeps theirs.
    let c = ctx.clone();
    engine.register_fn("send_message", move |target: i64, m: MessageId| -> RhaiResult<()> {
        let target = UnitId::from_i64(target).ok_or_else(|| format!("invalid unit id {}", target))?;
        c.registry()?.dispatch(target, m).map_err(script_error)
    });

    let c = ctx.clone();
    engine.register_fn("fetch_messages", move || -> RhaiResult<i64> {
        Ok(c.own_unit()?.fetch_messages().map_err(script_error)? as i64)
    });

    let c = ctx.clone();
    engine.register_fn("get_message", move |index: i64| -> RhaiResult<Dynamic> {
        let unit = c.own_unit()?;
        Ok(usize::try_from(index)
            .ok()
            .and_then(|i| unit.get_message(i))
            .map_or(Dynamic::UNIT, Dynamic::from))
    });
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::script_engine;
    use crate::message::MessageId;

    #[test]
    fn test_message_lifecycle() {
        let (registry, _unit, engine) = script_engine();
        let m = engine
            .eval::<MessageId>(r#"let m = message_from_string("hello"); m"#)
            .unwrap();
        assert_eq!(registry.message_string(m).unwrap(), "hello");

        let mut scope = rhai::Scope::new();
        scope.push("m", m);
        let len = engine.eval_with_scope::<i64>(&mut scope, "message_len(m)").unwrap();
        assert_eq!(len, 5);
        let count = engine
            .eval_with_scope::<i64>(&mut scope, "acquire_message(m); release_message(m)")
            .unwrap();
        assert_eq!(count, 1);
        engine.run_with_scope(&mut scope, "release_message(m);").unwrap();
        assert_eq!(registry.live_messages(), 0);

        // Released handles raise instead of touching a reused slot.
        assert!(engine.run_with_scope(&mut scope, "message_len(m)").is_err());
    }

    #[test]
    fn test_copy_and_write() {
        let (registry, _unit, engine) = script_engine();
        let text = engine
            .eval::<String>(
                r#"
                let a = create_message(5);
                write_message(a, 0, "abc");
                let b = copy_message(a);
                write_message(b, 3, "de");
                let out = message_string(a) + "|" + message_string(b);
                release_message(a);
                release_message(b);
                out
                "#,
            )
            .unwrap();
        assert_eq!(text, "abc|abcde");
        assert_eq!(registry.live_messages(), 0);
    }

    #[test]
    fn test_send_fetch_get() {
        let (registry, unit, engine) = script_engine();
        let script = format!(
            r#"
            let m = message_from_string("ping");
            send_message({id}, m);
            release_message(m);
            let n = fetch_messages();
            let got = get_message(0);
            let missing = get_message(1);
            `${{n}}:${{message_string(got)}}:${{type_of(missing)}}`
            "#,
            id = unit.id()
        );
        assert_eq!(engine.eval::<String>(&script).unwrap(), "1:ping:()");
        assert_eq!(registry.live_messages(), 1);
        assert_eq!(engine.eval::<i64>("fetch_messages()").unwrap(), 0);
        assert_eq!(registry.live_messages(), 0);
    }
}
