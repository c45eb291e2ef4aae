//! Environment access.
//!
//! [`Env`] is a snapshot of the process environment taken at startup and
//! kept in a [`Vars`] table; `export` writes through to the real process
//! environment so children inherit the binding.

use std::path::PathBuf;

use crate::arena::ArenaError;
use crate::vars::Vars;

pub const HOME: &str = "HOME";
pub const PATH: &str = "PATH";
pub const XDG_CONFIG_HOME: &str = "XDG_CONFIG_HOME";
/// Overrides the directory `~` expands to.
pub const HOME_OVERRIDE: &str = "OPSH_HOME";

/// Directory used for `~` expansion: `OPSH_HOME`, else `HOME`.
pub fn home_get() -> Option<String> {
    std::env::var(HOME_OVERRIDE)
        .ok()
        .filter(|home| !home.is_empty())
        .or_else(|| std::env::var(HOME).ok())
        .filter(|home| !home.is_empty())
}

/// Base directory for configuration: `XDG_CONFIG_HOME`, else `$HOME/.config`.
pub fn config_home_get() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os(XDG_CONFIG_HOME).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg));
    }
    std::env::var_os(HOME)
        .filter(|v| !v.is_empty())
        .map(|home| PathBuf::from(home).join(".config"))
}

pub fn path_get() -> String {
    std::env::var(PATH).unwrap_or_default()
}

#[derive(Debug, Default)]
pub struct Env {
    table: Vars,
}

impl Env {
    const ARENA_CAPACITY: usize = 1 << 20;

    pub fn new() -> Self {
        Env {
            table: Vars::with_capacity(64, Self::ARENA_CAPACITY),
        }
    }

    /// Copy the current process environment. Entries that do not fit are skipped.
    pub fn from_process() -> Self {
        let mut env = Env::new();
        for (key, value) in std::env::vars_os() {
            let (Some(key), Some(value)) = (key.to_str(), value.to_str()) else {
                continue;
            };
            if let Err(err) = env.table.set(key, value) {
                tracing::warn!(%key, %err, "environment entry dropped");
            }
        }
        env
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.table.get(key)
    }

    pub fn add_or_get(&mut self, key: &str) -> Result<&str, ArenaError> {
        self.table.add_or_get(key, "")
    }

    /// Bind `key` in the snapshot and in the process environment.
    pub fn export(&mut self, key: &str, value: &str) -> Result<(), ArenaError> {
        self.table.set(key, value)?;
        std::env::set_var(key, value);
        Ok(())
    }

    pub fn unset(&mut self, key: &str) {
        self.table.remove(key);
        std::env::remove_var(key);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.table.iter()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
