//! truss CLI - The `truss` command.
//!
//! Hosts a main script unit from the command line: loads the runtime
//! configuration, mounts the requested directories, starts the unit and
//! steps it until it stops or the process is interrupted. The exit code is
//! the runtime's error code.

mod logger;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use signal_hook::consts::{SIGINT, SIGTERM};
use truss_core::{FileKind, FrameClock, Registry, RuntimeConfig, UnitState};

/// truss - script unit host
#[derive(Parser, Debug)]
#[command(name = "truss")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Runs Rhai script units", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a main unit and step it until it stops
    Run(RunArgs),

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file (defaults to the user config location)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Argument handed to the main unit's init entry
    #[arg(value_name = "ARG", default_value = "scripts/main.rhai")]
    arg: String,

    /// Extra arguments, stored as arg2..argN
    #[arg(last = true, value_name = "ARGS")]
    extra: Vec<String>,

    /// Bootstrap program to run instead of the configured one
    #[arg(short, long, value_name = "PATH")]
    bootstrap: Option<String>,

    /// Configuration file (defaults to the user config location)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Additional directories mounted at the VFS root
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Step the main unit on its own thread
    #[arg(short, long)]
    threaded: bool,

    /// Debug level visible to scripts; non-zero also enables debug logging
    #[arg(short, long, default_value_t = 0)]
    debug: i64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => {
            let code = run(run_args)?;
            std::process::exit(code);
        }
        Commands::Config { config } => {
            let config = load_config(config.as_ref())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Version => {
            println!("truss {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Script unit host built on Rhai");
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<RuntimeConfig> {
    let path = match path {
        Some(path) => path.clone(),
        None => RuntimeConfig::default_path()?,
    };
    RuntimeConfig::load_or_default(&path)
        .with_context(|| format!("Failed to load config: {}", path.display()))
}

/// Store the command line as `arg0..argN`: the program, the unit
/// argument, then any extra arguments.
fn seed_arguments(registry: &Registry, program: &str, arg: &str, extra: &[String]) {
    let args = [program, arg]
        .into_iter()
        .chain(extra.iter().map(String::as_str));
    for (i, value) in args.enumerate() {
        registry.set_store_string(&format!("arg{}", i), value);
    }
}

fn run(args: RunArgs) -> Result<i32> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(bootstrap) = args.bootstrap {
        config.unit.bootstrap = bootstrap;
    }
    if args.debug > 0 {
        config.log.level = "debug".to_string();
    }
    logger::init_logger(&config.log)?;

    let registry = Registry::init_global(config)?;
    for dir in &args.include {
        registry
            .add_fs_path(dir, "", true)
            .with_context(|| format!("Failed to mount {}", dir.display()))?;
    }
    let program = std::env::args().next().unwrap_or_else(|| "truss".to_string());
    seed_arguments(registry, &program, &args.arg, &args.extra);

    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&interrupted))
        .context("Failed to install SIGINT handler")?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&interrupted))
        .context("Failed to install SIGTERM handler")?;

    let unit = registry.spawn_named("main")?;
    unit.set_debug(args.debug);
    unit.attach_addon(Box::new(FrameClock::new()))?;

    if registry.check_file(&args.arg) == FileKind::Missing {
        log::debug!("'{}' is not a file in the VFS", args.arg);
    }

    log::info!("Starting main unit with '{}'", args.arg);
    match unit.start(&args.arg, args.threaded) {
        Ok(()) => {
            while unit.state() == UnitState::Idle && !interrupted.load(Ordering::Relaxed) {
                if unit.step().is_err() {
                    break;
                }
                if args.threaded {
                    unit.wait_while_running(None);
                }
            }
        }
        Err(e) => log::error!("Main unit failed to start: {}", e),
    }

    if interrupted.load(Ordering::Relaxed) {
        log::info!("Interrupted, shutting down...");
    } else {
        log::info!("Main unit finished ({})", unit.state());
    }

    registry.shutdown();
    let code = registry.get_error();
    if code != 0 {
        log::error!("Exiting with error code {}", code);
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_defaults() {
        let args = Args::try_parse_from(["truss", "run"]).unwrap();
        let Commands::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.arg, "scripts/main.rhai");
        assert!(!run.threaded);
        assert_eq!(run.debug, 0);
        assert!(run.extra.is_empty());
    }

    #[test]
    fn test_parse_run_options() {
        let args = Args::try_parse_from([
            "truss", "run", "game.rhai", "-I", "assets", "-I", "mods", "--threaded", "--debug",
            "2", "--", "fast", "quiet",
        ])
        .unwrap();
        let Commands::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.arg, "game.rhai");
        assert_eq!(run.include, vec![PathBuf::from("assets"), PathBuf::from("mods")]);
        assert!(run.threaded);
        assert_eq!(run.debug, 2);
        assert_eq!(run.extra, vec!["fast", "quiet"]);
    }

    #[test]
    fn test_seed_arguments() {
        let registry = Registry::new(RuntimeConfig::default());
        let extra = ["x".to_string(), "y".to_string()];
        seed_arguments(&registry, "truss", "main.rhai", &extra);
        assert_eq!(registry.get_store_string("arg0").as_deref(), Some("truss"));
        assert_eq!(registry.get_store_string("arg1").as_deref(), Some("main.rhai"));
        assert_eq!(registry.get_store_string("arg3").as_deref(), Some("y"));
        assert_eq!(registry.get_store_string("arg4"), None);
    }
}
