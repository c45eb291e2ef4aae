//! From parsed arguments to runnable commands.
//!
//! [`preprocess`] validates operator placement, expands the line, then
//! splits it on `;` into [`Command`]s. A plain command gets a [`TokenData`]
//! describing its redirections, pipe count and background flag; an `if`
//! block is lowered into a [`Conditional`] whose bodies are commands in
//! turn (`elif` becomes a nested conditional in the else body).

use thiserror::Error;

use crate::arena::Str;
use crate::args::{Arg, Args, Op};
use crate::expand::{ExpandError, Expander};
use crate::logic::{self, ElseBranch, LogicError, Statement};
use crate::syntax::{self, SyntaxError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Expand(#[from] ExpandError),
    #[error(transparent)]
    Logic(#[from] LogicError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    Stdout,
    Stdin,
    Stderr,
    StdoutAndStderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redirect {
    pub kind: RedirectKind,
    pub append: bool,
    pub target: Str,
    /// Index of the operator node. The target is the node after it.
    pub operator: usize,
}

impl Redirect {
    fn from_op(op: Op) -> Option<(RedirectKind, bool)> {
        Some(match op {
            Op::StdoutRedirection => (RedirectKind::Stdout, false),
            Op::StdoutRedirectionAppend => (RedirectKind::Stdout, true),
            Op::StdinRedirection | Op::StdinRedirectionAppend => (RedirectKind::Stdin, false),
            Op::StderrRedirection => (RedirectKind::Stderr, false),
            Op::StderrRedirectionAppend => (RedirectKind::Stderr, true),
            Op::StdoutAndStderrRedirection => (RedirectKind::StdoutAndStderr, false),
            Op::StdoutAndStderrRedirectionAppend => (RedirectKind::StdoutAndStderr, true),
            _ => return None,
        })
    }

    /// True for the operator node and its target.
    pub fn covers(&self, index: usize) -> bool {
        index == self.operator || index == self.operator + 1
    }
}

/// Facts about one command, gathered before it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenData {
    pub redirects: Vec<Redirect>,
    /// Number of pipeline stages: pipe operators plus one.
    pub pipe_commands: usize,
    pub background: bool,
}

impl TokenData {
    pub fn redirect(&self, kind: RedirectKind) -> Option<&Redirect> {
        self.redirects.iter().find(|r| r.kind == kind)
    }

    pub fn is_redirect_target(&self, index: usize) -> bool {
        self.redirects.iter().any(|r| r.covers(index))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simple {
    pub args: Args,
    pub data: TokenData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conditional {
    pub condition: Args,
    pub then_branch: Vec<Command>,
    pub else_branch: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Simple(Simple),
    Conditional(Conditional),
}

/// Validate, expand and split a parsed line. An empty result means there
/// is nothing to run (for example a line holding only assignments).
pub fn preprocess(mut args: Args, expander: &mut Expander<'_>) -> Result<Vec<Command>, PreprocessError> {
    syntax::validate(&args)?;
    expander.run(&mut args)?;
    if args.is_empty() {
        return Ok(Vec::new());
    }
    syntax::validate(&args)?;
    commands(args.as_slice())
}

/// Split already expanded arguments into commands.
pub fn commands(args: &[Arg]) -> Result<Vec<Command>, PreprocessError> {
    logic::split_commands(args)
        .into_iter()
        .map(|range| command(&args[range]))
        .collect()
}

fn command(args: &[Arg]) -> Result<Command, PreprocessError> {
    match args[0].op {
        Op::If | Op::While | Op::For => {
            let statement = logic::extract(args)?;
            Ok(Command::Conditional(lower(statement)?))
        }
        op @ (Op::Then | Op::Else | Op::Elif | Op::Fi | Op::Do | Op::Done) => {
            Err(LogicError::Stray(op).into())
        }
        _ => simple(args).map(Command::Simple),
    }
}

fn body(segments: Vec<Args>) -> Result<Vec<Command>, PreprocessError> {
    segments.iter().map(|args| command(args.as_slice())).collect()
}

fn lower(statement: Statement) -> Result<Conditional, PreprocessError> {
    let else_branch = match statement.else_branch {
        ElseBranch::None => Vec::new(),
        ElseBranch::Else(segments) => body(segments)?,
        ElseBranch::Elif(inner) => vec![Command::Conditional(lower(*inner)?)],
    };
    Ok(Conditional {
        condition: statement.condition,
        then_branch: body(statement.then_branch)?,
        else_branch,
    })
}

/// Collect redirections, count pipes, note a trailing `&` and turn
/// keywords that do not start a block into plain words.
fn simple(args: &[Arg]) -> Result<Simple, PreprocessError> {
    let mut args: Args = args.iter().copied().collect();
    let mut data = TokenData {
        pipe_commands: 1,
        ..TokenData::default()
    };
    let mut words = 0;
    let mut i = 0;
    while i < args.len() {
        let op = args[i].op;
        if let Some((kind, append)) = Redirect::from_op(op) {
            let target = match args.get(i + 1) {
                Some(arg) if !arg.op.is_command_boundary() && !arg.op.is_redirection() => {
                    arg.value
                }
                _ => return Err(ExpandError::MissingTarget(op.symbol()).into()),
            };
            tracing::debug!(?kind, append, operator = i, "redirect");
            data.redirects.push(Redirect {
                kind,
                append,
                target,
                operator: i,
            });
            i += 2;
            continue;
        }
        match op {
            Op::Pipe | Op::And | Op::Or => {
                if words == 0 {
                    return Err(SyntaxError::First(op).into());
                }
                if op == Op::Pipe {
                    data.pipe_commands += 1;
                }
                words = 0;
            }
            Op::BackgroundJob => data.background = true,
            op if op.is_keyword() => {
                args[i].op = Op::Constant;
                words += 1;
            }
            _ => words += 1,
        }
        i += 1;
    }

    let reads = data.redirect(RedirectKind::Stdin).is_some();
    let writes = data.redirect(RedirectKind::Stdout).is_some()
        || data.redirect(RedirectKind::StdoutAndStderr).is_some();
    if reads && writes {
        return Err(ExpandError::ConflictingRedirections.into());
    }
    Ok(Simple { args, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::Aliases;
    use crate::arena::Arena;
    use crate::env::Env;
    use crate::parser::parse;
    use crate::vars::Vars;
    use pretty_assertions::assert_eq;

    struct Fixture {
        arena: Arena,
        vars: Vars,
        env: Env,
        aliases: Aliases,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                arena: Arena::new(1 << 16),
                vars: Vars::new(),
                env: Env::new(),
                aliases: Aliases::new(),
            }
        }

        fn run(&mut self, line: &str) -> Result<Vec<Command>, PreprocessError> {
            let args = parse(line, &mut self.arena).unwrap();
            let mut expander = Expander {
                arena: &mut self.arena,
                vars: &mut self.vars,
                env: &self.env,
                aliases: &self.aliases,
            };
            preprocess(args, &mut expander)
        }

        fn simple(&mut self, line: &str) -> Simple {
            match self.run(line).unwrap().remove(0) {
                Command::Simple(simple) => simple,
                other => panic!("expected a simple command, got {:?}", other),
            }
        }
    }

    #[test]
    fn output_redirect_truncates() {
        let mut fx = Fixture::new();
        let simple = fx.simple("echo hi > out.txt");
        let redirect = simple.data.redirect(RedirectKind::Stdout).unwrap();
        assert!(!redirect.append);
        assert_eq!(fx.arena.get(redirect.target), "out.txt");
        assert_eq!(redirect.operator, 2);
        let argv: Vec<&str> = simple
            .args
            .iter()
            .enumerate()
            .filter(|(i, _)| !simple.data.is_redirect_target(*i))
            .map(|(_, a)| fx.arena.get(a.value))
            .collect();
        assert_eq!(argv, vec!["echo", "hi"]);
    }

    #[test]
    fn append_and_stderr_redirects() {
        let mut fx = Fixture::new();
        let simple = fx.simple("make 2>> err.log >> out.log");
        assert!(simple.data.redirect(RedirectKind::Stderr).unwrap().append);
        assert!(simple.data.redirect(RedirectKind::Stdout).unwrap().append);
    }

    #[test]
    fn pipe_commands_counted() {
        let mut fx = Fixture::new();
        assert_eq!(fx.simple("ls | sort | wc -c").data.pipe_commands, 3);
        assert_eq!(fx.simple("ls").data.pipe_commands, 1);
    }

    #[test]
    fn background_flag() {
        let mut fx = Fixture::new();
        assert!(fx.simple("sleep 1 &").data.background);
        assert!(!fx.simple("sleep 1").data.background);
    }

    #[test]
    fn input_and_output_conflict() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.run("sort < in > out"),
            Err(PreprocessError::Expand(ExpandError::ConflictingRedirections))
        );
        assert_eq!(
            fx.run("sort < in &> out"),
            Err(PreprocessError::Expand(ExpandError::ConflictingRedirections))
        );
        assert!(fx.run("sort < in 2> err").is_ok());
    }

    #[test]
    fn redirect_needs_a_target() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.run("ls > | wc"),
            Err(PreprocessError::Expand(ExpandError::MissingTarget(">")))
        );
    }

    #[test]
    fn syntax_checked_before_expansion() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.run("| ls"),
            Err(PreprocessError::Syntax(SyntaxError::First(Op::Pipe)))
        );
    }

    #[test]
    fn syntax_checked_after_expansion() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.run("$OPSH_SURELY_UNSET_NAME | wc"),
            Err(PreprocessError::Syntax(SyntaxError::First(Op::Pipe)))
        );
    }

    #[test]
    fn empty_pipeline_stage() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.run("ls | | wc"),
            Err(PreprocessError::Syntax(SyntaxError::First(Op::Pipe)))
        );
    }

    #[test]
    fn keywords_demoted_outside_blocks() {
        let mut fx = Fixture::new();
        let simple = fx.simple("echo true -eq [ x ]");
        assert!(simple.args.iter().all(|a| a.op == Op::Constant));
    }

    #[test]
    fn assignment_only_line_runs_nothing() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run("X=1").unwrap(), Vec::new());
        assert_eq!(fx.vars.get("X"), Some("1"));
    }

    #[test]
    fn separators_make_separate_commands() {
        let mut fx = Fixture::new();
        let commands = fx.run("echo a > f; echo b").unwrap();
        assert_eq!(commands.len(), 2);
        let Command::Simple(second) = &commands[1] else {
            panic!("expected simple");
        };
        assert!(second.data.redirects.is_empty());
    }

    #[test]
    fn if_lowered_to_conditional() {
        let mut fx = Fixture::new();
        let commands = fx
            .run("if [ 1 -eq 2 ]; then echo a; elif [ 1 -eq 1 ]; then echo b > f; else echo c; fi; echo after")
            .unwrap();
        assert_eq!(commands.len(), 2);
        let Command::Conditional(outer) = &commands[0] else {
            panic!("expected conditional");
        };
        assert_eq!(outer.then_branch.len(), 1);
        let [Command::Conditional(inner)] = outer.else_branch.as_slice() else {
            panic!("expected elif lowered to a nested conditional");
        };
        let Command::Simple(b) = &inner.then_branch[0] else {
            panic!("expected simple");
        };
        assert_eq!(b.data.redirects.len(), 1);
        assert_eq!(inner.else_branch.len(), 1);
    }

    #[test]
    fn stray_keywords_are_errors() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run("fi"), Err(PreprocessError::Logic(LogicError::Stray(Op::Fi))));
        assert_eq!(
            fx.run("for x in a; do echo; done"),
            Err(PreprocessError::Logic(LogicError::Unsupported("for")))
        );
    }
}
