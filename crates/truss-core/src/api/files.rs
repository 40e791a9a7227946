//! Virtual filesystem access.

use rhai::{Array, Dynamic, Engine};

use super::{script_error, RhaiResult};
use crate::engine::ScriptContext;
use crate::message::MessageId;

pub(super) fn register(engine: &mut Engine, ctx: &ScriptContext) {
    // 0 missing, 1 file, 2 directory
    let c = ctx.clone();
    engine.register_fn("check_file", move |path: &str| -> RhaiResult<i64> {
        Ok(c.registry()?.check_file(path) as i64)
    });

    // A Blob message the caller owns, or () if the file can't be read.
    let c = ctx.clone();
    engine.register_fn("load_file", move |path: &str| -> RhaiResult<Dynamic> {
        Ok(c.registry()?
            .load_file(path)
            .map_or(Dynamic::UNIT, Dynamic::from))
    });

    let c = ctx.clone();
    engine.register_fn("save_file", move |path: &str, m: MessageId| -> RhaiResult<bool> {
        Ok(c.registry()?.save_file(path, m).is_ok())
    });

    let c = ctx.clone();
    engine.register_fn("list_directory", move |path: &str| -> RhaiResult<Array> {
        let names = c.registry()?.list_directory(path).map_err(script_error)?;
        Ok(names.into_iter().map(Dynamic::from).collect())
    });

    // Host directories and paths

    let c = ctx.clone();
    engine.register_fn(
        "add_fs_path",
        move |dir: &str, mount_point: &str, append: bool| -> RhaiResult<()> {
            c.registry()?
                .add_fs_path(dir, mount_point, append)
                .map_err(script_error)
        },
    );

    let c = ctx.clone();
    engine.register_fn("set_write_dir", move |dir: &str| -> RhaiResult<()> {
        c.registry()?.set_write_dir(dir).map_err(script_error)
    });

    // Host path of a file on disk, or () for missing and in-memory files.
    let c = ctx.clone();
    engine.register_fn("real_path", move |path: &str| -> RhaiResult<Dynamic> {
        Ok(c.registry()?
            .real_path(path)
            .map_or(Dynamic::UNIT, |p| Dynamic::from(p.display().to_string())))
    });
}
