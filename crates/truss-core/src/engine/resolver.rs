//! Module resolver that reads `import`ed scripts through the VFS.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rhai::{Engine, EvalAltResult, Module, ModuleResolver, Position, Scope};

use crate::registry::WeakRegistry;

/// Resolves `import "path" as m;` to `path.rhai` in the virtual filesystem.
///
/// Compiled modules are cached for the lifetime of the owning engine.
pub struct VfsModuleResolver {
    registry: WeakRegistry,
    cache: RwLock<HashMap<String, Arc<Module>>>,
}

impl VfsModuleResolver {
    pub fn new(registry: WeakRegistry) -> Self {
        Self {
            registry,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

impl ModuleResolver for VfsModuleResolver {
    fn resolve(
        &self,
        engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Arc<Module>, Box<EvalAltResult>> {
        let file = if path.ends_with(".rhai") {
            path.to_string()
        } else {
            format!("{}.rhai", path)
        };

        if let Some(module) = self.cache.read().expect("Module cache poisoned").get(&file) {
            return Ok(module.clone());
        }

        let not_found = || Box::new(EvalAltResult::ErrorModuleNotFound(path.to_string(), pos));
        let registry = self.registry.upgrade().ok_or_else(not_found)?;
        let bytes = registry.read_file(&file).map_err(|e| {
            log::debug!("Module '{}' not resolved: {}", path, e);
            not_found()
        })?;
        let text = String::from_utf8(bytes).map_err(|_| not_found())?;

        let in_module = |err: Box<EvalAltResult>| {
            Box::new(EvalAltResult::ErrorInModule(path.to_string(), err, pos))
        };
        let mut ast = engine.compile(&text).map_err(|e| in_module(e.into()))?;
        ast.set_source(file.as_str());
        let module: Arc<Module> = Module::eval_ast_as_new(Scope::new(), &ast, engine)
            .map_err(in_module)?
            .into();

        self.cache
            .write()
            .expect("Module cache poisoned")
            .insert(file, module.clone());
        Ok(module)
    }
}
