//! Filesystem-backed resource store

use sonority_core::domain::audio::{AudioError, Result};
use sonority_core::domain::store::ResourceStore;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Serves files below a root directory. Resource names are `/`-separated
/// paths relative to the root.
#[derive(Debug, Clone)]
pub struct DirectoryResourceStore {
    root: PathBuf,
}

impl DirectoryResourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `name` under the root. Names that would escape it are rejected.
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || escapes {
            return None;
        }
        Some(self.root.join(relative))
    }

    fn collect(&self, dir: &Path, names: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.collect(&path, names)?;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                let name: Vec<_> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect();
                names.push(name.join("/"));
            }
        }
        Ok(())
    }
}

impl ResourceStore for DirectoryResourceStore {
    fn get(&self, name: &str) -> Result<Vec<u8>> {
        let path = self
            .resolve(name)
            .ok_or_else(|| AudioError::ResourceNotFound(name.to_string()))?;

        match fs::read(&path) {
            Ok(data) => {
                debug!("Loaded resource {} ({} bytes)", name, data.len());
                Ok(data)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(AudioError::ResourceNotFound(name.to_string()))
            }
            Err(e) if path.is_dir() => {
                debug!("Resource {} is a directory: {}", name, e);
                Err(AudioError::ResourceNotFound(name.to_string()))
            }
            Err(e) => Err(AudioError::OsError(format!("{}: {}", path.display(), e))),
        }
    }

    fn available_resources(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Err(e) = self.collect(&self.root, &mut names) {
            warn!("Failed to list {}: {}", self.root.display(), e);
        }
        names.sort();
        names
    }
}
