//! Background job table.

use std::io::{self, Write};

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub number: usize,
    pub pid: Pid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Exited(i32),
    Signaled(i32),
    /// Reaped by the kernel while SIGCHLD was ignored; the status is lost.
    Done,
}

#[derive(Debug, Default)]
pub struct Jobs {
    jobs: Vec<Job>,
    next: usize,
}

impl Jobs {
    pub fn new() -> Self {
        Jobs::default()
    }

    /// Record a launched job and return its number.
    pub fn add(&mut self, pid: Pid) -> usize {
        self.next += 1;
        self.jobs.push(Job {
            number: self.next,
            pid,
        });
        self.next
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    /// Poll every job without blocking and drop the finished ones.
    pub fn reap(&mut self) -> Vec<(Job, JobStatus)> {
        let mut finished = Vec::new();
        self.jobs.retain(|job| {
            let status = match waitpid(job.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, code)) => JobStatus::Exited(code),
                Ok(WaitStatus::Signaled(_, signal, _)) => JobStatus::Signaled(signal as i32),
                Ok(_) => return true,
                Err(Errno::ECHILD) => JobStatus::Done,
                Err(err) => {
                    tracing::warn!(pid = %job.pid, %err, "could not poll job");
                    return true;
                }
            };
            tracing::debug!(number = job.number, pid = %job.pid, ?status, "job finished");
            finished.push((*job, status));
            false
        });
        if self.jobs.is_empty() {
            self.next = 0;
        }
        finished
    }

    pub fn print(&self, out: &mut dyn Write) -> io::Result<()> {
        for job in &self.jobs {
            writeln!(out, "job [{}] pid [{}] running", job.number, job.pid)?;
        }
        Ok(())
    }
}

/// One line report for a finished job.
pub fn describe(job: &Job, status: JobStatus) -> String {
    match status {
        JobStatus::Exited(code) => format!(
            "job [{}] pid [{}] exited with status {}",
            job.number, job.pid, code
        ),
        JobStatus::Signaled(signal) => format!(
            "job [{}] pid [{}] killed by signal {}",
            job.number, job.pid, signal
        ),
        JobStatus::Done => format!("job [{}] pid [{}] done", job.number, job.pid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbering_and_listing() {
        let mut jobs = Jobs::new();
        assert_eq!(jobs.add(Pid::from_raw(100)), 1);
        assert_eq!(jobs.add(Pid::from_raw(200)), 2);
        let mut out = Vec::new();
        jobs.print(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "job [1] pid [100] running\njob [2] pid [200] running\n"
        );
    }

    #[test]
    fn describe_statuses() {
        let job = Job {
            number: 3,
            pid: Pid::from_raw(77),
        };
        assert_eq!(describe(&job, JobStatus::Exited(0)), "job [3] pid [77] exited with status 0");
        assert_eq!(describe(&job, JobStatus::Done), "job [3] pid [77] done");
    }
}
