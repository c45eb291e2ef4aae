//! The virtual machine: runs preprocessed commands.
//!
//! A plain command is split into pipelines joined by `&&`/`||`, and every
//! pipeline into stages joined by `|`. One state machine walks the stages:
//!
//! - `StageSetup` opens the pipe slot the stage writes into and picks a
//!   dispatch path
//! - `BuiltinDispatch` runs a builtin in-process with its output on the
//!   stage's pipe (or stdout)
//! - `ExternalFork` resolves, forks and execs an external program
//! - `ExternalWait` waits for the pipeline's children and records its result
//! - `RedirectionTeardown` restores the descriptors redirections replaced
//!
//! Redirections are applied once per command, before its first stage.

pub mod builtins;
pub mod jobs;
pub mod pipes;
pub mod redirect;

use std::ffi::{CString, NulError};
use std::io::Write;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, fork, getpid, setsid, ForkResult, Pid};
use thiserror::Error;

use crate::arena::Arena;
use crate::args::Op;
use crate::logic;
use crate::preprocess::{Command, Conditional, RedirectKind, Simple};
use crate::shell::ShellState;
use crate::signals;
use pipes::{close_fd, dup2, FdWriter, PipeRing};
use redirect::{RedirectError, Redirections};

/// Most words one stage may pass to a program.
pub const ARGV_LIMIT: usize = 128;

/// Outcome of running a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    /// End the session.
    Exit,
    SuccessContinue,
    FailedContinue,
    SyntaxError,
    /// Unrecoverable; end the session with a failure status.
    ExitFailure,
    CommandNotFound,
    /// A program exited with a non-zero status.
    Failed(i32),
    Signaled(i32),
    Background { job: usize, pid: i32 },
}

impl CommandResult {
    pub fn code(self) -> i32 {
        match self {
            CommandResult::Exit => 0,
            CommandResult::SuccessContinue | CommandResult::Background { .. } => 1,
            CommandResult::FailedContinue
            | CommandResult::Failed(_)
            | CommandResult::Signaled(_) => 2,
            CommandResult::SyntaxError => -2,
            CommandResult::ExitFailure => -1,
            CommandResult::CommandNotFound => -5,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            CommandResult::SuccessContinue | CommandResult::Background { .. }
        )
    }

    /// Process exit status for a session ending on this result.
    pub fn exit_status(self) -> i32 {
        match self {
            CommandResult::Exit
            | CommandResult::SuccessContinue
            | CommandResult::Background { .. } => 0,
            CommandResult::Failed(code) => code,
            CommandResult::Signaled(signal) => 128 + signal,
            CommandResult::CommandNotFound => 127,
            CommandResult::SyntaxError => 2,
            CommandResult::FailedContinue | CommandResult::ExitFailure => 1,
        }
    }

    fn ends_session(self) -> bool {
        matches!(self, CommandResult::Exit | CommandResult::ExitFailure)
    }
}

#[derive(Error, Debug)]
pub enum VmError {
    #[error("{0}: command not found")]
    NotFound(String),
    #[error("too many arguments, the limit is {}", ARGV_LIMIT)]
    TooManyArguments,
    #[error("Invalid syntax: found an empty command")]
    EmptyCommand,
    #[error("argument contains a nul byte")]
    Nul(#[from] NulError),
    #[error(transparent)]
    Redirect(#[from] RedirectError),
    #[error("could not create pipe: {0}")]
    Pipe(Errno),
    #[error("fork failed: {0}")]
    Fork(Errno),
    #[error("wait failed: {0}")]
    Wait(Errno),
}

impl VmError {
    pub fn result(&self) -> CommandResult {
        match self {
            VmError::NotFound(_) => CommandResult::CommandNotFound,
            VmError::EmptyCommand => CommandResult::SyntaxError,
            VmError::Pipe(_) => CommandResult::ExitFailure,
            _ => CommandResult::FailedContinue,
        }
    }
}

fn report(err: VmError) -> CommandResult {
    eprintln!("opsh: {}", err);
    err.result()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StageSetup,
    BuiltinDispatch,
    ExternalFork,
    ExternalWait,
    RedirectionTeardown,
    Done,
}

/// Stages joined by `|`, run when `connector` allows.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pipeline<'s> {
    connector: Option<Op>,
    stages: Vec<Vec<&'s str>>,
}

/// Build argv lists for every stage, leaving out redirect operators, their
/// targets and the background marker.
fn stage<'s>(simple: &Simple, arena: &'s Arena) -> Result<Vec<Pipeline<'s>>, VmError> {
    let mut pipelines = Vec::new();
    let mut current = Pipeline {
        connector: None,
        stages: Vec::new(),
    };
    let mut argv = Vec::new();
    for (i, arg) in simple.args.iter().enumerate() {
        if simple.data.is_redirect_target(i) {
            continue;
        }
        match arg.op {
            Op::BackgroundJob => {}
            Op::Pipe => current.stages.push(std::mem::take(&mut argv)),
            Op::And | Op::Or => {
                current.stages.push(std::mem::take(&mut argv));
                let next = Pipeline {
                    connector: Some(arg.op),
                    stages: Vec::new(),
                };
                pipelines.push(std::mem::replace(&mut current, next));
            }
            _ => {
                if argv.len() >= ARGV_LIMIT {
                    return Err(VmError::TooManyArguments);
                }
                argv.push(arena.get(arg.value));
            }
        }
    }
    current.stages.push(argv);
    pipelines.push(current);

    if pipelines
        .iter()
        .any(|p| p.stages.iter().any(|argv| argv.is_empty()))
    {
        return Err(VmError::EmptyCommand);
    }
    Ok(pipelines)
}

/// Which standard streams a background child points at the null device.
#[derive(Debug, Clone, Copy)]
struct Detach {
    stdin: bool,
    stdout: bool,
    stderr: bool,
}

fn detach(streams: Detach) -> nix::Result<()> {
    setsid()?;
    // SAFETY: the path is a nul-terminated literal.
    let mut null = Errno::result(unsafe { libc::open(b"/dev/null\0".as_ptr().cast(), libc::O_RDWR) })?;
    for (fd, wanted) in [
        (libc::STDIN_FILENO, streams.stdin),
        (libc::STDOUT_FILENO, streams.stdout),
        (libc::STDERR_FILENO, streams.stderr),
    ] {
        if wanted {
            dup2(null, fd)?;
        }
    }
    close_fd(&mut null);
    Ok(())
}

/// Runs in the forked child and never returns. Everything it needs is
/// built before the fork.
fn exec_child(
    ring: &mut PipeRing,
    position: usize,
    len: usize,
    background: Option<Detach>,
    argv: &[CString],
    failure: &[u8],
) -> ! {
    let setup = signals::reset_for_child()
        .and_then(|()| ring.connect(position, len))
        .and_then(|()| background.map_or(Ok(()), detach));
    if setup.is_ok() {
        if let Some(program) = argv.first() {
            let _ = execvp(program, argv);
        }
    }
    let _ = FdWriter(libc::STDERR_FILENO).write_all(failure);
    let _ = kill(getpid(), Signal::SIGTERM);
    // SAFETY: ends the child without running the shell's destructors.
    unsafe { libc::_exit(127) }
}

fn wait(pid: Pid) -> nix::Result<WaitStatus> {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WUNTRACED)) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

fn status_result(status: WaitStatus) -> CommandResult {
    match status {
        WaitStatus::Exited(_, 0) => CommandResult::SuccessContinue,
        WaitStatus::Exited(_, code) => CommandResult::Failed(code),
        WaitStatus::Signaled(_, signal, _) => CommandResult::Signaled(signal as i32),
        WaitStatus::Stopped(pid, signal) => {
            eprintln!("opsh: process {} stopped by {}", pid, signal);
            CommandResult::Signaled(signal as i32)
        }
        _ => CommandResult::SuccessContinue,
    }
}

/// Progress through one plain command.
struct Run<'s> {
    pipelines: Vec<Pipeline<'s>>,
    background: bool,
    redirected: [bool; 3],
    pipeline: usize,
    position: usize,
    ring: PipeRing,
    pids: Vec<Pid>,
    /// Result of the current pipeline's last stage, when known without waiting.
    last: Option<CommandResult>,
    last_pid: Option<Pid>,
    abort: bool,
    result: CommandResult,
}

impl<'s> Run<'s> {
    fn stage_len(&self) -> usize {
        self.pipelines[self.pipeline].stages.len()
    }

    fn argv(&self) -> &[&'s str] {
        &self.pipelines[self.pipeline].stages[self.position]
    }

    fn is_last_stage(&self) -> bool {
        self.position + 1 == self.stage_len()
    }

    fn advance(&mut self) -> State {
        self.position += 1;
        if self.position < self.stage_len() {
            State::StageSetup
        } else {
            State::ExternalWait
        }
    }
}

/// Executes commands against the shell's state. Argument text lives in
/// `arena`, the per-line scratch arena.
pub struct Vm<'a> {
    state: &'a mut ShellState,
    arena: &'a Arena,
}

impl<'a> Vm<'a> {
    pub fn new(state: &'a mut ShellState, arena: &'a Arena) -> Self {
        Vm { state, arena }
    }

    /// Run `commands` in order, stopping early when one ends the session.
    pub fn execute(&mut self, commands: &[Command]) -> CommandResult {
        let mut result = CommandResult::SuccessContinue;
        for command in commands {
            result = match command {
                Command::Simple(simple) => self.simple(simple),
                Command::Conditional(conditional) => self.conditional(conditional),
            };
            if result.ends_session() {
                break;
            }
        }
        result
    }

    fn conditional(&mut self, conditional: &Conditional) -> CommandResult {
        let taken = logic::evaluate(&conditional.condition, self.arena);
        tracing::debug!(taken, "condition evaluated");
        if taken {
            self.execute(&conditional.then_branch)
        } else {
            self.execute(&conditional.else_branch)
        }
    }

    fn simple(&mut self, simple: &Simple) -> CommandResult {
        let arena = self.arena;
        let pipelines = match stage(simple, arena) {
            Ok(pipelines) => pipelines,
            Err(err) => return report(err),
        };
        tracing::debug!(
            pipelines = pipelines.len(),
            stages = simple.data.pipe_commands,
            background = simple.data.background,
            "staged command"
        );
        let mut redirections = match Redirections::apply(&simple.data, arena) {
            Ok(redirections) => redirections,
            Err(err) => return report(err.into()),
        };

        let has = |kind| simple.data.redirect(kind).is_some();
        let both = has(RedirectKind::StdoutAndStderr);
        let mut run = Run {
            pipelines,
            background: simple.data.background,
            redirected: [
                has(RedirectKind::Stdin),
                has(RedirectKind::Stdout) || both,
                has(RedirectKind::Stderr) || both,
            ],
            pipeline: 0,
            position: 0,
            ring: PipeRing::new(),
            pids: Vec::new(),
            last: None,
            last_pid: None,
            abort: false,
            result: CommandResult::SuccessContinue,
        };

        let mut state = State::StageSetup;
        while state != State::Done {
            tracing::trace!(?state, pipeline = run.pipeline, position = run.position, "vm step");
            state = match state {
                State::StageSetup => self.stage_setup(&mut run),
                State::BuiltinDispatch => self.builtin_dispatch(&mut run),
                State::ExternalFork => self.external_fork(&mut run),
                State::ExternalWait => self.external_wait(&mut run),
                State::RedirectionTeardown => {
                    run.ring.close_all();
                    redirections.restore();
                    State::Done
                }
                State::Done => State::Done,
            };
        }
        run.result
    }

    fn stage_setup(&mut self, run: &mut Run<'_>) -> State {
        let Some(pipeline) = run.pipelines.get(run.pipeline) else {
            return State::RedirectionTeardown;
        };
        if run.position == 0 {
            let skip = match pipeline.connector {
                Some(Op::And) => !run.result.is_success(),
                Some(Op::Or) => run.result.is_success(),
                _ => false,
            };
            if skip {
                tracing::debug!(pipeline = run.pipeline, "short-circuited");
                run.pipeline += 1;
                return State::StageSetup;
            }
        }

        if !run.is_last_stage() {
            if let Err(err) = run.ring.start(run.position) {
                run.last = Some(report(VmError::Pipe(err)));
                run.abort = true;
                return State::ExternalWait;
            }
        }
        if self.state.builtins.find(run.argv()[0]).is_some() {
            State::BuiltinDispatch
        } else {
            State::ExternalFork
        }
    }

    fn builtin_dispatch(&mut self, run: &mut Run<'_>) -> State {
        let (position, len) = (run.position, run.stage_len());
        let argv = run.argv().to_vec();
        let Some(func) = self.state.builtins.find(argv[0]) else {
            return State::ExternalFork;
        };
        tracing::debug!(builtin = argv[0], position, len, "running builtin");
        let mut out = FdWriter(run.ring.output_fd(position, len));
        let result = func(self.state, &argv, &mut out);
        run.ring.stop(position, len);
        if run.is_last_stage() {
            run.last = Some(result);
        }
        run.advance()
    }

    fn external_fork(&mut self, run: &mut Run<'_>) -> State {
        let (position, len) = (run.position, run.stage_len());
        let last = run.is_last_stage();
        let argv = run.argv().to_vec();
        match self.fork(run, &argv) {
            Ok(pid) if run.background => {
                let job = self.state.jobs.add(pid);
                eprintln!("job [{}] pid [{}]", job, pid);
                if last {
                    run.last = Some(CommandResult::Background {
                        job,
                        pid: pid.as_raw(),
                    });
                }
            }
            Ok(pid) => {
                run.pids.push(pid);
                if last {
                    run.last_pid = Some(pid);
                }
            }
            Err(err) => {
                run.ring.stop(position, len);
                let result = report(err);
                if last {
                    run.last = Some(result);
                }
            }
        }
        run.advance()
    }

    fn fork(&mut self, run: &mut Run<'_>, argv: &[&str]) -> Result<Pid, VmError> {
        let (position, len) = (run.position, run.stage_len());
        let program = argv[0];
        self.state.resolver.sync();
        if self.state.resolver.resolve(program).is_none() {
            return Err(VmError::NotFound(program.to_string()));
        }
        let cargs = argv
            .iter()
            .map(|arg| CString::new(*arg))
            .collect::<Result<Vec<_>, _>>()?;
        let failure = format!("opsh: {}: could not execute\n", program);
        let background = run.background.then_some(Detach {
            stdin: position == 0 && !run.redirected[0],
            stdout: position + 1 == len && !run.redirected[1],
            stderr: !run.redirected[2],
        });

        if background.is_none() {
            if let Err(err) = signals::default_children() {
                tracing::warn!(%err, "could not restore SIGCHLD");
            }
        }
        let _ = std::io::stdout().flush();
        tracing::debug!(?argv, position, len, "forking");
        // SAFETY: the child only rewires descriptors, resets signal
        // dispositions and execs, using buffers allocated before the fork.
        match unsafe { fork() }.map_err(VmError::Fork)? {
            ForkResult::Child => {
                exec_child(&mut run.ring, position, len, background, &cargs, failure.as_bytes())
            }
            ForkResult::Parent { child } => {
                run.ring.stop(position, len);
                if background.is_some() {
                    if let Err(err) = signals::ignore_children() {
                        tracing::warn!(%err, "could not ignore SIGCHLD");
                    }
                }
                tracing::debug!(pid = %child, "forked");
                Ok(child)
            }
        }
    }

    fn external_wait(&mut self, run: &mut Run<'_>) -> State {
        if let Some(pid) = run.last_pid {
            signals::set_foreground_pid(pid.as_raw());
        }
        for pid in std::mem::take(&mut run.pids) {
            let result = match wait(pid) {
                Ok(status) => {
                    tracing::debug!(%pid, ?status, "child finished");
                    status_result(status)
                }
                Err(err) => report(VmError::Wait(err)),
            };
            if Some(pid) == run.last_pid {
                run.last = Some(result);
            }
        }
        signals::clear_foreground_pid();
        run.ring.close_all();

        run.result = run.last.take().unwrap_or(CommandResult::SuccessContinue);
        run.last_pid = None;
        run.position = 0;
        run.pipeline += 1;
        if run.abort || run.result.ends_session() {
            State::RedirectionTeardown
        } else {
            State::StageSetup
        }
    }
}
