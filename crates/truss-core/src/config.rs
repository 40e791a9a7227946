//! Runtime configuration.
//!
//! Configuration is stored in TOML format. The default location is:
//! - Linux: `~/.config/truss/truss.toml`
//! - macOS: `~/Library/Application Support/truss/truss.toml`
//! - Windows: `%APPDATA%\truss\truss.toml`

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// VFS path of the bootstrap program shipped with the runtime.
pub const DEFAULT_BOOTSTRAP: &str = "scripts/core/bootstrap.rhai";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub unit: UnitSettings,
    pub engine: EngineSettings,
    pub vfs: VfsSettings,
    pub log: LogSettings,
}

/// How units boot and which entry points they call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UnitSettings {
    /// VFS path of the bootstrap program every unit runs on start.
    pub bootstrap: String,
    /// Entry called once after the bootstrap, with the start argument.
    pub init_entry: String,
    /// Entry called once per step.
    pub update_entry: String,
    /// Frame time handed to capabilities on the very first step.
    pub default_dt: f64,
}

impl Default for UnitSettings {
    fn default() -> Self {
        Self {
            bootstrap: DEFAULT_BOOTSTRAP.to_string(),
            init_entry: "core_init".to_string(),
            update_entry: "core_update".to_string(),
            default_dt: 1.0 / 60.0,
        }
    }
}

/// Limits applied to every script engine instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    /// Maximum operations per script call, 0 for unlimited.
    pub max_operations: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_call_levels: 4096,
            max_expr_depth: 4096,
            max_operations: 0,
        }
    }
}

/// An extra directory mounted into the virtual filesystem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MountSettings {
    pub path: PathBuf,
    #[serde(default)]
    pub mount_point: String,
    #[serde(default = "default_append")]
    pub append: bool,
}

fn default_append() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VfsSettings {
    /// Real directory mounted at the virtual root.
    pub base_dir: PathBuf,
    pub mounts: Vec<MountSettings>,
    /// Write directory, relative to `base_dir`.
    pub write_dir: PathBuf,
}

impl Default for VfsSettings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            mounts: Vec::new(),
            write_dir: PathBuf::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter, overridden by `RUST_LOG`.
    pub level: String,
    /// Log file path, empty for stderr.
    pub file: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: String::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Load configuration, falling back to defaults if the file is missing.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the default configuration file path.
    pub fn default_path() -> Result<PathBuf> {
        ProjectDirs::from("", "", "truss")
            .map(|dirs| dirs.config_dir().join("truss.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.unit.bootstrap, DEFAULT_BOOTSTRAP);
        assert_eq!(config.unit.init_entry, "core_init");
        assert_eq!(config.unit.update_entry, "core_update");
        assert_eq!(config.engine.max_operations, 0);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RuntimeConfig::from_toml(
            r#"
[unit]
bootstrap = "boot/custom.rhai"

[[vfs.mounts]]
path = "assets"
mount_point = "data"
"#,
        )
        .unwrap();
        assert_eq!(config.unit.bootstrap, "boot/custom.rhai");
        assert_eq!(config.unit.update_entry, "core_update");
        assert_eq!(config.vfs.mounts.len(), 1);
        assert!(config.vfs.mounts[0].append);
        assert_eq!(config.vfs.mounts[0].mount_point, "data");
    }

    #[test]
    fn test_toml_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truss.toml");
        let mut config = RuntimeConfig::default();
        config.log.file = "trusslog.txt".to_string();
        fs::write(&path, config.to_toml().unwrap()).unwrap();
        assert_eq!(RuntimeConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(RuntimeConfig::load(&path), Err(Error::Config(_))));
        assert_eq!(RuntimeConfig::load_or_default(&path).unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            RuntimeConfig::from_toml("[unit\nbootstrap = 1"),
            Err(Error::Config(_))
        ));
    }
}
