//! Pipe plumbing for pipelines.
//!
//! A pipeline of any length runs on two pipe slots. Stage `k` writes into
//! slot A when `k` is odd and slot B when `k` is even; each stage reads from
//! the slot its predecessor wrote, so the last stage of an `n`-stage
//! pipeline reads A when `n` is odd and B when it is even. A slot is opened
//! just before the stage that writes into it and both of its ends are
//! closed in the parent once the reading stage has been launched.

use std::io;
use std::os::unix::io::RawFd;

use nix::errno::Errno;

const CLOSED: RawFd = -1;

#[derive(Debug, Clone, Copy)]
struct Pipe {
    read: RawFd,
    write: RawFd,
}

impl Pipe {
    const CLOSED: Pipe = Pipe {
        read: CLOSED,
        write: CLOSED,
    };
}

pub fn close_fd(fd: &mut RawFd) {
    if *fd >= 0 {
        // SAFETY: closing a descriptor this module owns; it is forgotten right after.
        unsafe { libc::close(*fd) };
        *fd = CLOSED;
    }
}

pub fn dup2(from: RawFd, to: RawFd) -> nix::Result<()> {
    // SAFETY: plain descriptor duplication, no memory is involved.
    Errno::result(unsafe { libc::dup2(from, to) }).map(|_| ())
}

/// Two reusable pipe slots.
#[derive(Debug)]
pub struct PipeRing {
    a: Pipe,
    b: Pipe,
    opened: usize,
}

impl Default for PipeRing {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeRing {
    pub fn new() -> Self {
        PipeRing {
            a: Pipe::CLOSED,
            b: Pipe::CLOSED,
            opened: 0,
        }
    }

    fn slot(&mut self, odd: bool) -> &mut Pipe {
        if odd {
            &mut self.a
        } else {
            &mut self.b
        }
    }

    /// Open the slot stage `position` writes into.
    pub fn start(&mut self, position: usize) -> nix::Result<()> {
        let mut fds = [CLOSED; 2];
        // SAFETY: `fds` is a valid two-element buffer for pipe(2).
        Errno::result(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
        let slot = self.slot(position % 2 != 0);
        close_fd(&mut slot.read);
        close_fd(&mut slot.write);
        *slot = Pipe {
            read: fds[0],
            write: fds[1],
        };
        self.opened += 2;
        tracing::trace!(position, read = fds[0], write = fds[1], "opened pipe");
        Ok(())
    }

    /// Descriptor stage `position` of `len` reads from.
    pub fn input_fd(&self, position: usize, len: usize) -> RawFd {
        if len < 2 || position == 0 {
            return libc::STDIN_FILENO;
        }
        if position == len - 1 {
            return if len % 2 != 0 { self.a.read } else { self.b.read };
        }
        if position % 2 != 0 {
            self.b.read
        } else {
            self.a.read
        }
    }

    /// Descriptor stage `position` of `len` writes to.
    pub fn output_fd(&self, position: usize, len: usize) -> RawFd {
        if len < 2 || position == len - 1 {
            return libc::STDOUT_FILENO;
        }
        if position % 2 != 0 {
            self.a.write
        } else {
            self.b.write
        }
    }

    /// Wire stdin and stdout of a forked child to its stage, then close
    /// every ring descriptor the child inherited.
    pub fn connect(&mut self, position: usize, len: usize) -> nix::Result<()> {
        let input = self.input_fd(position, len);
        let output = self.output_fd(position, len);
        if input != libc::STDIN_FILENO {
            dup2(input, libc::STDIN_FILENO)?;
        }
        if output != libc::STDOUT_FILENO {
            dup2(output, libc::STDOUT_FILENO)?;
        }
        self.close_all();
        Ok(())
    }

    /// In the parent, close the ends stage `position` of `len` was given.
    pub fn stop(&mut self, position: usize, len: usize) {
        if len < 2 {
            return;
        }
        if position == 0 {
            close_fd(&mut self.b.write);
        } else if position == len - 1 {
            if len % 2 != 0 {
                close_fd(&mut self.a.read);
            } else {
                close_fd(&mut self.b.read);
            }
        } else if position % 2 != 0 {
            close_fd(&mut self.b.read);
            close_fd(&mut self.a.write);
        } else {
            close_fd(&mut self.a.read);
            close_fd(&mut self.b.write);
        }
        tracing::trace!(position, len, "closed pipe ends");
    }

    pub fn close_all(&mut self) {
        for fd in [
            &mut self.a.read,
            &mut self.a.write,
            &mut self.b.read,
            &mut self.b.write,
        ] {
            close_fd(fd);
        }
    }

    /// Total descriptors created by [`PipeRing::start`] so far.
    pub fn opened(&self) -> usize {
        self.opened
    }

    pub fn open_count(&self) -> usize {
        [self.a.read, self.a.write, self.b.read, self.b.write]
            .iter()
            .filter(|fd| **fd >= 0)
            .count()
    }
}

impl Drop for PipeRing {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Unbuffered writer over a raw descriptor it does not own.
#[derive(Debug, Clone, Copy)]
pub struct FdWriter(pub RawFd);

impl io::Write for FdWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            // SAFETY: `buf` is valid for `buf.len()` bytes.
            let n = unsafe { libc::write(self.0, buf.as_ptr().cast(), buf.len()) };
            match Errno::result(n) {
                Ok(n) => return Ok(n as usize),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(io::Error::from(errno)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
