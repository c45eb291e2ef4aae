//! File redirections for one command.
//!
//! The shell's own standard descriptors are swapped for the target files
//! before the first stage starts, so every child inherits them. Originals
//! are parked on close-on-exec descriptors and put back when the
//! [`Redirections`] guard is dropped, on every return path.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};

use nix::errno::Errno;
use thiserror::Error;

use super::pipes::{close_fd, dup2};
use crate::arena::Arena;
use crate::preprocess::{Redirect, RedirectKind, TokenData};

/// Saved descriptors live at or above this number.
const SAVE_FLOOR: RawFd = 10;

#[derive(Error, Debug)]
pub enum RedirectError {
    #[error("Invalid file handle '{path}': could not open file for {purpose} redirection: {source}")]
    Open {
        path: String,
        purpose: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("could not redirect file descriptor {fd}: {source}")]
    Dup { fd: RawFd, source: Errno },
}

fn purpose(kind: RedirectKind) -> &'static str {
    match kind {
        RedirectKind::Stdout => "output",
        RedirectKind::Stdin => "input",
        RedirectKind::Stderr => "error",
        RedirectKind::StdoutAndStderr => "output & error",
    }
}

fn targets(kind: RedirectKind) -> &'static [RawFd] {
    match kind {
        RedirectKind::Stdout => &[libc::STDOUT_FILENO],
        RedirectKind::Stdin => &[libc::STDIN_FILENO],
        RedirectKind::Stderr => &[libc::STDERR_FILENO],
        RedirectKind::StdoutAndStderr => &[libc::STDOUT_FILENO, libc::STDERR_FILENO],
    }
}

/// Active redirections. Dropping restores the original descriptors.
#[derive(Debug, Default)]
pub struct Redirections {
    saved: Vec<(RawFd, RawFd)>,
}

impl Redirections {
    /// Apply every redirect in `data`. On failure the ones already applied
    /// are undone before the error is returned.
    pub fn apply(data: &TokenData, arena: &Arena) -> Result<Self, RedirectError> {
        let mut redirections = Redirections::default();
        for redirect in &data.redirects {
            redirections.redirect(redirect, arena.get(redirect.target))?;
        }
        Ok(redirections)
    }

    fn redirect(&mut self, redirect: &Redirect, path: &str) -> Result<(), RedirectError> {
        let mut options = OpenOptions::new();
        if redirect.kind == RedirectKind::Stdin {
            options.read(true);
        } else {
            options.write(true).create(true).mode(0o644);
            if redirect.append {
                options.append(true);
            } else {
                options.truncate(true);
            }
        }
        let file = options.open(path).map_err(|source| RedirectError::Open {
            path: path.to_string(),
            purpose: purpose(redirect.kind),
            source,
        })?;

        let _ = std::io::stdout().flush();
        for &fd in targets(redirect.kind) {
            // SAFETY: duplicating a standard descriptor onto a fresh close-on-exec slot.
            let saved = Errno::result(unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, SAVE_FLOOR) })
                .map_err(|source| RedirectError::Dup { fd, source })?;
            self.saved.push((fd, saved));
            dup2(file.as_raw_fd(), fd).map_err(|source| RedirectError::Dup { fd, source })?;
        }
        tracing::debug!(path, kind = ?redirect.kind, append = redirect.append, "redirection started");
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }

    /// Put the original descriptors back, most recent first.
    pub fn restore(&mut self) {
        if self.saved.is_empty() {
            return;
        }
        let _ = std::io::stdout().flush();
        while let Some((fd, mut saved)) = self.saved.pop() {
            if let Err(err) = dup2(saved, fd) {
                tracing::warn!(fd, %err, "could not restore descriptor");
            }
            close_fd(&mut saved);
        }
        tracing::debug!("redirections stopped");
    }
}

impl Drop for Redirections {
    fn drop(&mut self) {
        self.restore();
    }
}
