//! Executable resolver for command-not-found detection
//!
//! Before forking, the VM asks whether the staged command names a program
//! it can run: either a path to an executable file, or a name found in one
//! of the `PATH` directories. Lookups are cached until `PATH` changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::env;

/// Resolves command names to executable files
#[derive(Debug, Default)]
pub struct ExecutableResolver {
    /// Cached PATH lookup results
    path_cache: HashMap<String, Option<PathBuf>>,
    /// The PATH value the cache was built from
    path: String,
    /// Parsed PATH directories
    path_dirs: Vec<PathBuf>,
}

impl ExecutableResolver {
    /// Create a resolver that follows the process `PATH`
    pub fn new() -> Self {
        let mut resolver = ExecutableResolver::default();
        resolver.refresh(&env::path_get());
        resolver
    }

    /// Create a resolver with a fixed PATH (for testing)
    #[cfg(test)]
    pub fn with_path(path: &str) -> Self {
        let mut resolver = ExecutableResolver::default();
        resolver.refresh(path);
        resolver
    }

    fn refresh(&mut self, path: &str) {
        self.path = path.to_string();
        self.path_dirs = path
            .split(':')
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .collect();
        self.path_cache.clear();
    }

    /// Re-read `PATH`, dropping the cache if it changed.
    pub fn sync(&mut self) {
        let path = env::path_get();
        if path != self.path {
            tracing::debug!(%path, "PATH changed, clearing resolver cache");
            self.refresh(&path);
        }
    }

    /// Where `command` would be executed from, if anywhere.
    pub fn resolve(&mut self, command: &str) -> Option<PathBuf> {
        if command.is_empty() {
            return None;
        }
        if command.contains('/') {
            let path = Path::new(command);
            return is_executable(path).then(|| path.to_path_buf());
        }
        if let Some(cached) = self.path_cache.get(command) {
            return cached.clone();
        }
        let found = self
            .path_dirs
            .iter()
            .map(|dir| dir.join(command))
            .find(|candidate| is_executable(candidate));
        self.path_cache.insert(command.to_string(), found.clone());
        found
    }

    pub fn is_executable(&mut self, command: &str) -> bool {
        self.resolve(command).is_some()
    }

    /// Clear the PATH cache
    pub fn clear_cache(&mut self) {
        self.path_cache.clear();
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
