use opsh::config::{self, ConfigError};
use opsh::Shell;
use std::fs;
use std::io::ErrorKind;

/// Load the rc file into `shell`, creating the config directory if needed.
/// A missing rc file is not an error. Returns false only when the shell
/// ran out of memory while loading.
pub(crate) fn load_rc(shell: &mut Shell) -> bool {
    let Some(dir) = config::config_dir() else {
        tracing::debug!("no config home, skipping rc file");
        return true;
    };
    if let Err(e) = fs::create_dir_all(&dir) {
        tracing::debug!(dir = %dir.display(), %e, "could not create config directory");
    }

    let path = dir.join(config::RC_FILE);
    match config::load_file(&mut shell.state, &path) {
        Ok(applied) => {
            tracing::debug!(path = %path.display(), applied, "rc file loaded");
            true
        }
        Err(ConfigError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => true,
        Err(ConfigError::Arena(e)) => {
            eprintln!("opsh: fatal: {}", e);
            false
        }
        Err(e) => {
            eprintln!("Warning: {}", e);
            true
        }
    }
}
