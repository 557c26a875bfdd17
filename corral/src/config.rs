use std::env;
use std::io;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;

/// Root for all state owned by the agent, unless overridden.
pub const DEFAULT_BASE_PATH: &str = "/var/lib/containers";

/// Environment variable that overrides [`container_base_path`].
pub const ENV_BASE_PATH: &str = "CORRAL_BASE_PATH";

static BASE_PATH: OnceCell<PathBuf> = OnceCell::new();

/// The process-wide base path. Resolved once, on first use: an explicit
/// [`set_container_base_path`] wins, then [`ENV_BASE_PATH`], then the default.
pub fn container_base_path() -> &'static Path {
    BASE_PATH
        .get_or_init(|| match env::var(ENV_BASE_PATH) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => PathBuf::from(DEFAULT_BASE_PATH),
        })
        .as_path()
}

/// Pin the base path before anything derives from it. Fails if a path has
/// already been resolved.
pub fn set_container_base_path(path: impl Into<PathBuf>) -> Result<(), PathBuf> {
    BASE_PATH.set(path.into())
}

/// Directories a subsystem needs present before it can run, ensured during
/// initialization.
#[derive(Default)]
pub struct RequiredDirectories {
    entries: Vec<PathBuf>,
}

impl RequiredDirectories {
    pub fn add(&mut self, path: impl Into<PathBuf>) {
        self.entries.push(path.into());
    }

    pub fn ensure(&self) -> io::Result<()> {
        for path in &self.entries {
            std::fs::create_dir_all(path)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_base_path() -> &'static Path {
    use tempfile::TempDir;

    static DIR: OnceCell<TempDir> = OnceCell::new();

    let dir = DIR.get_or_init(|| TempDir::new().unwrap());
    let _ = set_container_base_path(dir.path());
    // Another test may have pinned a different root first; either way the
    // resolved path is a temporary directory owned by this process.
    container_base_path()
}
