//! Virtual filesystem.
//!
//! Scripts never see real paths. They address files through a virtual,
//! `/`-separated namespace assembled from an ordered list of mounts:
//!
//! - **Directory mounts** map a real directory onto a mount point.
//! - **The memory layer** holds files embedded in the binary (such as the
//!   default bootstrap program) and is always searched last.
//!
//! Reads search mounts front to back; writes go to the single write
//! directory.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Errors that can occur in the virtual filesystem.
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("'{0}' is a directory")]
    IsDirectory(String),

    #[error("no write directory configured")]
    NoWriteDir,

    #[error("insecure path: {0}")]
    InsecurePath(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// What a virtual path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FileKind {
    Missing = 0,
    File = 1,
    Directory = 2,
}

#[derive(Debug, Clone)]
struct DirMount {
    root: PathBuf,
    /// Normalized mount point, "" for the virtual root.
    mount_point: String,
}

impl DirMount {
    /// Real path for `path` if it lives under this mount.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let rest = if self.mount_point.is_empty() {
            path
        } else if path == self.mount_point {
            ""
        } else {
            path.strip_prefix(&self.mount_point)?.strip_prefix('/')?
        };
        Some(if rest.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rest)
        })
    }
}

/// The virtual filesystem.
#[derive(Debug, Default)]
pub struct Vfs {
    base_dir: PathBuf,
    mounts: Vec<DirMount>,
    memory: BTreeMap<String, Vec<u8>>,
    write_dir: Option<PathBuf>,
}

/// Normalize a virtual path, rejecting anything that escapes the root.
fn normalize(path: &str) -> Result<String, VfsError> {
    let mut parts = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return Err(VfsError::InsecurePath(path.to_string())),
            p if p.contains(':') => return Err(VfsError::InsecurePath(path.to_string())),
            p => parts.push(p),
        }
    }
    Ok(parts.join("/"))
}

impl Vfs {
    /// Create a filesystem rooted at `base_dir`, mounted at "/".
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            mounts: vec![DirMount {
                root: base_dir.clone(),
                mount_point: String::new(),
            }],
            write_dir: Some(base_dir.clone()),
            base_dir,
            memory: BTreeMap::new(),
        }
    }

    /// Create a filesystem with no directory mounts and no write directory.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Mount a directory. Relative directories resolve against the base
    /// directory. `append` puts the mount after existing ones.
    pub fn add_path(
        &mut self,
        dir: impl AsRef<Path>,
        mount_point: &str,
        append: bool,
    ) -> Result<(), VfsError> {
        let dir = dir.as_ref();
        let root = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.base_dir.join(dir)
        };
        if !root.is_dir() {
            return Err(VfsError::NotFound(root.display().to_string()));
        }
        let mount = DirMount {
            root,
            mount_point: normalize(mount_point)?,
        };
        log::debug!("Mounting {} at /{}", mount.root.display(), mount.mount_point);
        if append {
            self.mounts.push(mount);
        } else {
            self.mounts.insert(0, mount);
        }
        Ok(())
    }

    /// Set the write directory, relative to the base directory.
    pub fn set_write_dir(&mut self, dir: impl AsRef<Path>) -> Result<(), VfsError> {
        let dir = dir.as_ref();
        let path = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.base_dir.join(dir)
        };
        fs::create_dir_all(&path).map_err(|source| VfsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        log::debug!("Setting write dir: {}", path.display());
        self.write_dir = Some(path);
        Ok(())
    }

    /// Add an in-memory file, searched after every directory mount.
    pub fn add_memory_file(&mut self, path: &str, contents: impl Into<Vec<u8>>) -> Result<(), VfsError> {
        self.memory.insert(normalize(path)?, contents.into());
        Ok(())
    }

    /// Check whether a path exists and what it is.
    pub fn check(&self, path: &str) -> FileKind {
        let Ok(path) = normalize(path) else {
            return FileKind::Missing;
        };
        for mount in &self.mounts {
            if let Some(real) = mount.resolve(&path) {
                if real.is_dir() {
                    return FileKind::Directory;
                }
                if real.is_file() {
                    return FileKind::File;
                }
            }
        }
        if self.memory.contains_key(&path) {
            return FileKind::File;
        }
        let prefix = format!("{}/", path);
        if path.is_empty() || self.memory.keys().any(|k| k.starts_with(&prefix)) {
            return FileKind::Directory;
        }
        FileKind::Missing
    }

    pub fn exists(&self, path: &str) -> bool {
        self.check(path) != FileKind::Missing
    }

    /// Read a whole file.
    pub fn read(&self, path: &str) -> Result<Vec<u8>, VfsError> {
        let norm = normalize(path)?;
        for mount in &self.mounts {
            let Some(real) = mount.resolve(&norm) else {
                continue;
            };
            if real.is_dir() {
                return Err(VfsError::IsDirectory(path.to_string()));
            }
            if real.is_file() {
                return fs::read(&real).map_err(|source| VfsError::Io {
                    path: real.display().to_string(),
                    source,
                });
            }
        }
        self.memory
            .get(&norm)
            .cloned()
            .ok_or_else(|| VfsError::NotFound(path.to_string()))
    }

    /// Write a whole file into the write directory, creating parents.
    pub fn write(&self, path: &str, bytes: &[u8]) -> Result<(), VfsError> {
        let dir = self.write_dir.as_ref().ok_or(VfsError::NoWriteDir)?;
        let norm = normalize(path)?;
        if norm.is_empty() {
            return Err(VfsError::IsDirectory(path.to_string()));
        }
        let real = dir.join(&norm);
        let io_err = |source| VfsError::Io {
            path: real.display().to_string(),
            source,
        };
        if let Some(parent) = real.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&real, bytes).map_err(io_err)
    }

    /// Real path of the first mount that contains `path`.
    pub fn real_path(&self, path: &str) -> Option<PathBuf> {
        let norm = normalize(path).ok()?;
        self.mounts
            .iter()
            .filter_map(|m| m.resolve(&norm))
            .find(|real| real.exists())
    }

    /// Entries of a virtual directory, merged across mounts and sorted.
    pub fn list_directory(&self, path: &str) -> Result<Vec<String>, VfsError> {
        let norm = normalize(path)?;
        let mut names = BTreeSet::new();
        let mut found = false;

        for mount in &self.mounts {
            let Some(real) = mount.resolve(&norm) else {
                continue;
            };
            let Ok(entries) = fs::read_dir(&real) else {
                continue;
            };
            found = true;
            for entry in entries.flatten() {
                names.insert(entry.file_name().to_string_lossy().to_string());
            }
        }

        let prefix = if norm.is_empty() {
            String::new()
        } else {
            format!("{}/", norm)
        };
        for key in self.memory.keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                found = true;
                if let Some(first) = rest.split('/').next() {
                    names.insert(first.to_string());
                }
            }
        }

        if found {
            Ok(names.into_iter().collect())
        } else {
            Err(VfsError::NotFound(path.to_string()))
        }
    }
}
