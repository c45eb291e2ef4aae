//! Signal handling for opsh
//!
//! The shell itself survives interactive interrupts; while a foreground
//! child runs, SIGINT and SIGQUIT are passed on to it instead:
//! - SIGINT (Ctrl+C): forwarded from the `ctrlc` handler
//! - SIGQUIT (Ctrl+\): forwarded from a `signal-hook` handler
//! - SIGCHLD: ignored after a background launch, default for foreground waits

use std::sync::atomic::{AtomicI32, Ordering};

use nix::sys::signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;

/// PID of the current foreground process (or -1 if none)
pub static FOREGROUND_PID: AtomicI32 = AtomicI32::new(-1);

/// Set up signal handlers for the shell
pub fn setup_signal_handlers() {
    // SAFETY: the handler only does an atomic load and kill(2), both async-signal-safe.
    let registered = unsafe {
        signal_hook::low_level::register(signal_hook::consts::SIGQUIT, || {
            let pid = FOREGROUND_PID.load(Ordering::SeqCst);
            if pid > 0 {
                libc::kill(pid, libc::SIGQUIT);
            }
        })
    };
    if let Err(err) = registered {
        tracing::warn!(%err, "could not install SIGQUIT handler");
    }
}

/// Set the foreground process PID
pub fn set_foreground_pid(pid: i32) {
    FOREGROUND_PID.store(pid, Ordering::SeqCst);
}

/// Clear the foreground process PID
pub fn clear_foreground_pid() {
    FOREGROUND_PID.store(-1, Ordering::SeqCst);
}

/// Get the current foreground process PID (or None if no foreground job)
pub fn get_foreground_pid() -> Option<i32> {
    let pid = FOREGROUND_PID.load(Ordering::SeqCst);
    if pid > 0 {
        Some(pid)
    } else {
        None
    }
}

/// Send SIGINT to the foreground process. Returns false when there is none.
pub fn interrupt_foreground() -> bool {
    match get_foreground_pid() {
        Some(pid) => {
            if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGINT) {
                tracing::debug!(pid, %err, "could not forward SIGINT");
            }
            true
        }
        None => false,
    }
}

fn set_disposition(signal: Signal, handler: SigHandler) -> nix::Result<()> {
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    // SAFETY: only SigDfl and SigIgn are installed, no Rust handler runs in signal context.
    unsafe { sigaction(signal, &action) }.map(|_| ())
}

/// Let the kernel reap children automatically.
pub fn ignore_children() -> nix::Result<()> {
    set_disposition(Signal::SIGCHLD, SigHandler::SigIgn)
}

/// Restore default SIGCHLD handling so `waitpid` sees child exits.
pub fn default_children() -> nix::Result<()> {
    set_disposition(Signal::SIGCHLD, SigHandler::SigDfl)
}

/// Reset dispositions a child must not inherit from the shell. Called after
/// fork, before exec.
pub fn reset_for_child() -> nix::Result<()> {
    for signal in [
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGTSTP,
        Signal::SIGCHLD,
        Signal::SIGPIPE,
    ] {
        set_disposition(signal, SigHandler::SigDfl)?;
    }
    Ok(())
}
