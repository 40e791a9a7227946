//! Rhai backend for the script engine adapter.

use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Map, Scope, AST};

use super::{EngineError, EngineFactory, EntryArg, ScriptContext, ScriptEngine, VfsModuleResolver};
use crate::config::EngineSettings;

/// Builds a [`RhaiEngine`] per unit with the full truss API registered.
#[derive(Debug, Clone, Default)]
pub struct RhaiEngineFactory {
    settings: EngineSettings,
}

impl RhaiEngineFactory {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }
}

impl EngineFactory for RhaiEngineFactory {
    fn create(&self, ctx: ScriptContext) -> Result<Box<dyn ScriptEngine>, EngineError> {
        if ctx.registry.upgrade().is_none() {
            return Err(EngineError::Creation("registry has been dropped".to_string()));
        }
        Ok(Box::new(RhaiEngine::new(&self.settings, ctx)))
    }
}

/// A Rhai engine bound to one unit.
///
/// Every executed chunk contributes its functions to a single merged AST,
/// so entry points may come from the bootstrap or from anything it loaded
/// later. State that must survive between entry calls lives in `this`, an
/// object map bound to every call.
pub struct RhaiEngine {
    engine: Engine,
    functions: AST,
    pending: Option<AST>,
    scope: Scope<'static>,
    this: Dynamic,
}

impl RhaiEngine {
    pub fn new(settings: &EngineSettings, ctx: ScriptContext) -> Self {
        let mut engine = Engine::new();

        engine.set_max_expr_depths(settings.max_expr_depth, settings.max_expr_depth);
        engine.set_max_call_levels(settings.max_call_levels);
        engine.set_max_operations(settings.max_operations);

        // Route print() and debug() through the log system
        let unit = ctx.unit;
        engine.on_print(move |text| {
            log::info!("[unit {}] {}", unit, text);
        });
        engine.on_debug(move |text, source, pos| {
            let loc = match (source, pos) {
                (Some(src), pos) if !pos.is_none() => format!(" ({}:{})", src, pos),
                (Some(src), _) => format!(" ({})", src),
                (None, pos) if !pos.is_none() => format!(" ({})", pos),
                _ => String::new(),
            };
            log::debug!("[unit {}]{} {}", unit, loc, text);
        });

        engine.set_module_resolver(VfsModuleResolver::new(ctx.registry.clone()));
        crate::api::register_api(&mut engine, &ctx);

        Self {
            engine,
            functions: AST::empty(),
            pending: None,
            scope: Scope::new(),
            this: Dynamic::from(Map::new()),
        }
    }

    /// The state object bound as `this` for entry calls.
    pub fn this(&self) -> &Dynamic {
        &self.this
    }
}

fn runtime_error(err: Box<EvalAltResult>) -> EngineError {
    EngineError::Runtime {
        message: err.to_string(),
    }
}

impl ScriptEngine for RhaiEngine {
    fn load_buffer(&mut self, source: &[u8], name: &str) -> Result<(), EngineError> {
        let text = std::str::from_utf8(source).map_err(|e| EngineError::Compile {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        let mut ast = self.engine.compile(text).map_err(|e| EngineError::Compile {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        ast.set_source(name);
        self.pending = Some(ast);
        Ok(())
    }

    fn execute_loaded(&mut self) -> Result<(), EngineError> {
        let ast = self.pending.take().ok_or_else(|| EngineError::Runtime {
            message: "no chunk loaded".to_string(),
        })?;
        self.engine
            .run_ast_with_scope(&mut self.scope, &ast)
            .map_err(runtime_error)?;
        self.functions.combine(ast.clone_functions_only());
        Ok(())
    }

    fn call_entry(&mut self, name: &str, args: &[EntryArg]) -> Result<(), EngineError> {
        let args: Vec<Dynamic> = args
            .iter()
            .map(|arg| match arg {
                EntryArg::Str(s) => Dynamic::from(s.clone()),
                EntryArg::Int(i) => Dynamic::from(*i),
                EntryArg::Float(f) => Dynamic::from(*f),
            })
            .collect();

        let options = CallFnOptions::new()
            .eval_ast(false)
            .rewind_scope(true)
            .bind_this_ptr(&mut self.this);

        self.engine
            .call_fn_with_options::<Dynamic>(options, &mut self.scope, &self.functions, name, args)
            .map(|_| ())
            .map_err(|err| match *err {
                EvalAltResult::ErrorFunctionNotFound(ref sig, _) if sig.starts_with(name) => {
                    EngineError::MissingEntry(name.to_string())
                }
                _ => runtime_error(err),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Registry, RuntimeConfig};

    fn engine() -> (Registry, RhaiEngine) {
        let registry = Registry::new(RuntimeConfig::default());
        let unit = registry.spawn_named("engine-test").unwrap();
        let ctx = ScriptContext {
            registry: registry.downgrade(),
            unit: unit.id(),
            unit_name: unit.name().to_string(),
        };
        (registry, RhaiEngine::new(&EngineSettings::default(), ctx))
    }

    #[test]
    fn test_entry_state_persists_in_this() {
        let (_registry, mut engine) = engine();
        engine
            .load_buffer(
                b"fn core_init(arg) { this.arg = arg; this.frames = 0; }
                  fn core_update() { this.frames += 1; }",
                "boot",
            )
            .unwrap();
        engine.execute_loaded().unwrap();
        engine.call_entry("core_init", &["hello".into()]).unwrap();
        engine.call_entry("core_update", &[]).unwrap();
        engine.call_entry("core_update", &[]).unwrap();

        let map = engine.this().clone().cast::<Map>();
        assert_eq!(map["frames"].as_int().unwrap(), 2);
        assert_eq!(map["arg"].clone().into_string().unwrap(), "hello");
    }

    #[test]
    fn test_compile_error_reported_on_load() {
        let (_registry, mut engine) = engine();
        let err = engine.load_buffer(b"fn broken( {", "bad").unwrap_err();
        assert!(matches!(err, EngineError::Compile { ref name, .. } if name == "bad"));
    }

    #[test]
    fn test_runtime_error_reported_on_execute() {
        let (_registry, mut engine) = engine();
        engine.load_buffer(b"throw \"boom\";", "boot").unwrap();
        let err = engine.execute_loaded().unwrap_err();
        assert!(matches!(err, EngineError::Runtime { ref message } if message.contains("boom")));
    }

    #[test]
    fn test_missing_entry() {
        let (_registry, mut engine) = engine();
        engine.load_buffer(b"let x = 1;", "boot").unwrap();
        engine.execute_loaded().unwrap();
        assert!(matches!(
            engine.call_entry("core_update", &[]),
            Err(EngineError::MissingEntry(_))
        ));
    }

    #[test]
    fn test_functions_accumulate_across_chunks() {
        let (_registry, mut engine) = engine();
        engine.load_buffer(b"fn helper() { 41 }", "a").unwrap();
        engine.execute_loaded().unwrap();
        engine
            .load_buffer(b"fn core_update() { this.v = helper() + 1; }", "b")
            .unwrap();
        engine.execute_loaded().unwrap();
        engine.call_entry("core_update", &[]).unwrap();
        let map = engine.this().clone().cast::<Map>();
        assert_eq!(map["v"].as_int().unwrap(), 42);
    }
}
