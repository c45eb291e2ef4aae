//! Common test utilities for opsh integration tests

#![allow(dead_code)]

pub use opsh::{CommandResult, Shell};

use std::fs;
use std::path::Path;

/// Run one line on a fresh shell
pub fn run(line: &str) -> CommandResult {
    Shell::new().run_line(line).unwrap()
}

/// Run `line` with its standard output sent to a file in `dir`, returning
/// the result and what was written.
pub fn capture(shell: &mut Shell, dir: &Path, line: &str) -> (CommandResult, String) {
    let out = dir.join("captured.out");
    let result = shell
        .run_line(&format!("{} > {}", line, out.display()))
        .unwrap();
    let text = fs::read_to_string(&out).unwrap_or_default();
    (result, text)
}

/// Number of descriptors open in this process
#[cfg(target_os = "linux")]
pub fn open_fds() -> usize {
    fs::read_dir("/proc/self/fd").unwrap().count()
}

/// Path as the `&str` a command line needs
pub fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}
