//! The shell session.
//!
//! [`Shell`] owns every table that outlives a line and the scratch arena a
//! line is built in. Each line goes through:
//! 1. Reap finished background jobs
//! 2. Tokenize and parse (lexer + parser)
//! 3. Validate, expand and split into commands (preprocess)
//! 4. Execute (vm)
//!
//! Recoverable errors are printed with an `opsh: ` prefix and turned into a
//! [`CommandResult`]. Arena exhaustion is returned as [`ShellError::Arena`]
//! and ends the session.

use thiserror::Error;

use crate::alias::Aliases;
use crate::arena::{Arena, ArenaError};
use crate::args::Args;
use crate::env::Env;
use crate::expand::{ExpandError, Expander};
use crate::lexer::{LexError, Lexer};
use crate::parser::{ParseError, Parser};
use crate::preprocess::{preprocess, PreprocessError};
use crate::resolver::ExecutableResolver;
use crate::vars::Vars;
use crate::vm::builtins::Builtins;
use crate::vm::jobs::{self, Jobs};
use crate::vm::{CommandResult, Vm};

/// Scratch arena size for one line.
pub const SCRATCH_CAPACITY: usize = 1 << 20;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("fatal: {0}")]
    Arena(#[from] ArenaError),
}

impl ShellError {
    /// The arena failure behind this error, if that is what it is.
    pub fn arena(&self) -> Option<ArenaError> {
        match self {
            ShellError::Arena(err)
            | ShellError::Parse(ParseError::Arena(err))
            | ShellError::Parse(ParseError::Lex(LexError::Arena(err)))
            | ShellError::Preprocess(PreprocessError::Expand(ExpandError::Arena(err))) => {
                Some(*err)
            }
            _ => None,
        }
    }

    /// The result a recoverable error leaves the line with.
    pub fn result(&self) -> CommandResult {
        match self {
            ShellError::Arena(_) => CommandResult::ExitFailure,
            ShellError::Parse(_) => CommandResult::FailedContinue,
            ShellError::Preprocess(PreprocessError::Syntax(_))
            | ShellError::Preprocess(PreprocessError::Expand(
                ExpandError::ConflictingRedirections | ExpandError::MissingTarget(_),
            )) => CommandResult::SyntaxError,
            ShellError::Preprocess(_) => CommandResult::FailedContinue,
        }
    }
}

/// Everything a command can read or change.
#[derive(Debug)]
pub struct ShellState {
    pub vars: Vars,
    pub env: Env,
    pub aliases: Aliases,
    pub jobs: Jobs,
    pub builtins: Builtins,
    pub resolver: ExecutableResolver,
}

impl Default for ShellState {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellState {
    pub fn new() -> Self {
        ShellState {
            vars: Vars::new(),
            env: Env::from_process(),
            aliases: Aliases::new(),
            jobs: Jobs::new(),
            builtins: Builtins::new(),
            resolver: ExecutableResolver::new(),
        }
    }

    /// Print a line for every background job that has finished.
    pub fn report_jobs(&mut self) {
        for (job, status) in self.jobs.reap() {
            eprintln!("{}", jobs::describe(&job, status));
        }
    }
}

pub struct Shell {
    scratch: Arena,
    pub state: ShellState,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    pub fn new() -> Self {
        Shell {
            scratch: Arena::new(SCRATCH_CAPACITY),
            state: ShellState::new(),
        }
    }

    /// Run one line of input.
    pub fn run_line(&mut self, line: &str) -> Result<CommandResult, ShellError> {
        self.run_parts(&[line])
    }

    /// Run `parts` as a single line; each part ends a word, as after a
    /// `\` continuation.
    pub fn run_parts(&mut self, parts: &[&str]) -> Result<CommandResult, ShellError> {
        self.state.report_jobs();
        match self.execute(parts) {
            Ok(result) => Ok(result),
            Err(err) => match err.arena() {
                Some(arena) => Err(ShellError::Arena(arena)),
                None => {
                    eprintln!("opsh: {}", err);
                    Ok(err.result())
                }
            },
        }
    }

    fn parse(&mut self, parts: &[&str]) -> Result<Args, ParseError> {
        self.scratch.reset();
        let mut lexer = Lexer::new(&mut self.scratch);
        for part in parts {
            lexer.feed(part)?;
        }
        let tokens = lexer.finish()?;
        Parser::new(tokens, &mut self.scratch).parse()
    }

    fn execute(&mut self, parts: &[&str]) -> Result<CommandResult, ShellError> {
        let args = self.parse(parts)?;
        if args.is_empty() {
            return Ok(CommandResult::SuccessContinue);
        }
        tracing::debug!(args = ?args.values(&self.scratch), ops = ?args.ops(), "parsed line");

        let mut expander = Expander {
            arena: &mut self.scratch,
            vars: &mut self.state.vars,
            env: &self.state.env,
            aliases: &self.state.aliases,
        };
        let commands = preprocess(args, &mut expander)?;
        tracing::debug!(commands = commands.len(), "preprocessed line");

        Ok(Vm::new(&mut self.state, &self.scratch).execute(&commands))
    }

    /// Run a script: every line in turn, joining lines that end in `\`.
    /// Stops at the first result that ends the session.
    pub fn run_lines(&mut self, text: &str) -> Result<CommandResult, ShellError> {
        let mut result = CommandResult::SuccessContinue;
        let mut pending: Vec<&str> = Vec::new();
        for line in text.lines() {
            if let Some(head) = line.strip_suffix('\\') {
                pending.push(head);
                continue;
            }
            pending.push(line);
            result = self.run_parts(&pending)?;
            pending.clear();
            if matches!(result, CommandResult::Exit | CommandResult::ExitFailure) {
                return Ok(result);
            }
        }
        if !pending.is_empty() {
            result = self.run_parts(&pending)?;
        }
        Ok(result)
    }
}
