//! truss core - hosting runtime for script units.
//!
//! This crate provides the building blocks of a truss process:
//!
//! - **Units** - isolated script engine instances with a lifecycle,
//!   optionally stepped on their own worker thread
//! - **Registry** - owner of all units and of the shared runtime state
//! - **Messages** - reference-counted byte buffers exchanged between units
//! - **Store** - a keyed blackboard of messages
//! - **Addons** - named capabilities attached to units
//! - **VFS** - the virtual filesystem scripts read and write through
//! - **API** - the functions every unit script can call
//!
//! # Architecture
//!
//! A host creates units through the [`Registry`], attaches addons and
//! starts them. Starting runs a bootstrap program that defines the unit's
//! init and per-frame entry points; the host then drives the unit with
//! [`Unit::step`]. Units never share script state, they talk by sending
//! messages to each other's inboxes or through the store.
//!
//! ```no_run
//! use truss_core::{Registry, RuntimeConfig, UnitState};
//!
//! let registry = Registry::new(RuntimeConfig::default());
//! let unit = registry.spawn_named("main")?;
//! unit.start("scripts/main.rhai", false)?;
//! while unit.state() == UnitState::Idle {
//!     unit.step()?;
//! }
//! registry.shutdown();
//! # Ok::<(), truss_core::Error>(())
//! ```

pub mod addon;
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod message;
pub mod registry;
pub mod store;
pub mod unit;
pub mod vfs;

pub use addon::{Addon, AddonInfo, FrameClock};
pub use config::{RuntimeConfig, DEFAULT_BOOTSTRAP};
pub use engine::{EngineError, EngineFactory, EntryArg, ScriptContext, ScriptEngine};
pub use error::{codes, Error, Result};
pub use logging::LogLevel;
pub use message::{MessageHeader, MessageId, MessageType};
pub use registry::{Registry, WeakRegistry};
pub use store::Store;
pub use unit::{Unit, UnitId, UnitState, WeakUnit};
pub use vfs::{FileKind, Vfs, VfsError};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_default_bootstrap_drives_main_module() {
        init_logging();
        let registry = Registry::new(RuntimeConfig::default());
        registry
            .add_memory_file(
                "scripts/main.rhai",
                r#"
                fn init(arg) {
                    set_store_string("main.arg", arg);
                    #{ frames: 0 }
                }
                fn update(state) {
                    state.frames += 1;
                    set_store_string("main.frames", `${state.frames}`);
                    if state.frames == 3 { stop_unit(unit_id()); }
                    state
                }
                "#,
            )
            .unwrap();

        let unit = registry.spawn_named("main").unwrap();
        unit.start("scripts/main.rhai", false).unwrap();
        assert_eq!(
            registry.get_store_string("main.arg").as_deref(),
            Some("scripts/main.rhai")
        );

        let mut steps = 0;
        while unit.state() == UnitState::Idle {
            unit.step().unwrap();
            steps += 1;
        }
        assert_eq!(steps, 3);
        assert_eq!(unit.state(), UnitState::Terminated);
        assert_eq!(registry.get_store_string("main.frames").as_deref(), Some("3"));
        assert_eq!(registry.get_error(), 0);
        registry.shutdown();
    }

    #[test]
    fn test_default_bootstrap_with_plain_argument() {
        init_logging();
        let registry = Registry::new(RuntimeConfig::default());
        let unit = registry.spawn().unwrap();
        unit.start("hello", false).unwrap();
        assert_eq!(unit.state(), UnitState::Idle);
        assert_eq!(unit.step().unwrap(), UnitState::Idle);
        assert_eq!(unit.fetch_messages().unwrap(), 0);
    }

    #[test]
    fn test_ping_pong_between_threaded_units() {
        init_logging();
        let registry = Registry::new(RuntimeConfig::default());
        registry
            .add_memory_file(
                "scripts/pong.rhai",
                r#"
                fn core_init(arg) { this.peer = find_unit(arg); }
                fn core_update() {
                    let n = fetch_messages();
                    for i in 0..n {
                        let text = message_string(get_message(i));
                        let reply = message_from_string(text + "-pong");
                        send_message(this.peer, reply);
                        release_message(reply);
                    }
                }
                "#,
            )
            .unwrap();

        let host = registry.spawn_named("host").unwrap();
        host.set_bootstrap("scripts/pong.rhai").unwrap();
        let pong = registry.spawn_named("pong").unwrap();
        pong.set_bootstrap("scripts/pong.rhai").unwrap();
        host.start("pong", true).unwrap();
        pong.start("host", true).unwrap();

        let ping = registry.create_message(MessageType::CString, b"ping");
        pong.send_message(ping).unwrap();
        registry.release_message(ping).unwrap();

        pong.step().unwrap();
        assert_eq!(pong.wait_while_running(Some(Duration::from_secs(5))), UnitState::Idle);

        assert_eq!(host.fetch_messages().unwrap(), 1);
        let reply = host.get_message(0).unwrap();
        assert_eq!(registry.message_string(reply).unwrap(), "ping-pong");

        registry.shutdown();
        assert_eq!(registry.live_messages(), 0);
    }

    #[test]
    fn test_init_global_once() {
        let _ = Registry::init_global(RuntimeConfig::default());
        let again = Registry::init_global(RuntimeConfig::default());
        assert!(matches!(again, Err(Error::AlreadyInitialized)));
        assert_eq!(Registry::global().config(), &RuntimeConfig::default());
    }
}
