//! Logger setup for the CLI.

use std::fs::File;

use anyhow::{Context, Result};
use truss_core::config::LogSettings;

/// Initialize env_logger from the configured level, overridable via
/// `RUST_LOG`. Logs go to stderr unless a log file is configured.
pub fn init_logger(settings: &LogSettings) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&settings.level));
    builder.format_timestamp_millis();

    if !settings.file.is_empty() {
        let file = File::create(&settings.file)
            .with_context(|| format!("Failed to open log file: {}", settings.file))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("Logger already initialized")?;
    Ok(())
}
