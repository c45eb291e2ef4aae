//! Operator placement checks.
//!
//! Runs on the parsed [`Args`] before anything is expanded or executed and
//! stops at the first problem. The `Display` text of [`SyntaxError`] is the
//! diagnostic shown to the user.

use std::fmt;

use crate::args::{Args, Op};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxError {
    NoArgs,
    /// An operator that needs something on its left was found first.
    First(Op),
    /// An operator that needs something on its right was found last.
    Last(Op),
    BackgroundNotLast,
}

impl std::error::Error for SyntaxError {}

/// Human name and example usage for each operator the validator knows.
fn describe(op: Op) -> (&'static str, &'static str) {
    match op {
        Op::Pipe => ("pipe operator", "program1 | program2"),
        Op::StdoutRedirection => ("output redirection operator", "program > file"),
        Op::StdoutRedirectionAppend => ("output redirection append operator", "program >> file"),
        Op::StdinRedirection => ("input redirection operator", "program < file"),
        Op::StdinRedirectionAppend => ("input redirection operator", "program << file"),
        Op::StderrRedirection => ("error redirection operator", "program 2> file"),
        Op::StderrRedirectionAppend => ("error redirection append operator", "program 2>> file"),
        Op::StdoutAndStderrRedirection => ("output & error redirection operator", "program &> file"),
        Op::StdoutAndStderrRedirectionAppend => {
            ("output & error redirection operator", "program &>> file")
        }
        Op::BackgroundJob => ("background job operator", "program &"),
        Op::And => ("and operator", "true && true"),
        Op::Or => ("or operator", "false || true"),
        _ => ("operator", "program"),
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SyntaxError::NoArgs => write!(f, "Invalid syntax: no arguments to execute."),
            SyntaxError::First(op) => {
                let (name, usage) = describe(op);
                write!(
                    f,
                    "Invalid syntax: found {} ('{}') as first argument. Correct usage of {} is '{}'.",
                    name,
                    op.symbol(),
                    name,
                    usage
                )
            }
            SyntaxError::Last(op) if op.is_redirection() && op != Op::StdinRedirection => {
                let (name, usage) = describe(op);
                write!(
                    f,
                    "Invalid syntax: found no filename after {} ('{}'). Correct usage of {} is '{}'.",
                    name,
                    op.symbol(),
                    name,
                    usage
                )
            }
            SyntaxError::Last(op) => {
                let (name, usage) = describe(op);
                write!(
                    f,
                    "Invalid syntax: found {} ('{}') as last argument. Correct usage of {} is '{}'.",
                    name,
                    op.symbol(),
                    name,
                    usage
                )
            }
            SyntaxError::BackgroundNotLast => {
                let (name, usage) = describe(Op::BackgroundJob);
                write!(
                    f,
                    "Invalid syntax: found {} ('&') in position other than last argument. Correct usage of {} is '{}'.",
                    name, name, usage
                )
            }
        }
    }
}

fn invalid_first(op: Op) -> bool {
    op.is_redirection() || matches!(op, Op::Pipe | Op::BackgroundJob | Op::And | Op::Or)
}

fn invalid_last(op: Op) -> bool {
    op.is_redirection() || matches!(op, Op::Pipe | Op::And | Op::Or)
}

/// Check operator placement: first node, then last node, then any `&`
/// that is not at the end.
pub fn validate(args: &Args) -> Result<(), SyntaxError> {
    let (Some(first), Some(last)) = (args.first(), args.last()) else {
        return Err(SyntaxError::NoArgs);
    };
    if invalid_first(first.op) {
        return Err(SyntaxError::First(first.op));
    }
    if invalid_last(last.op) {
        return Err(SyntaxError::Last(last.op));
    }
    let body = &args.as_slice()[..args.len() - 1];
    if body.iter().any(|arg| arg.op == Op::BackgroundJob) {
        return Err(SyntaxError::BackgroundNotLast);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::parser::parse;

    fn check(line: &str) -> Result<(), SyntaxError> {
        let mut arena = Arena::new(1 << 12);
        let args = parse(line, &mut arena).unwrap();
        validate(&args)
    }

    #[test]
    fn valid_lines_pass() {
        for line in ["ls", "ls | wc -l", "sleep 1 &", "a && b || c", "echo hi > out", "cat < in"] {
            assert_eq!(check(line), Ok(()), "{}", line);
        }
    }

    #[test]
    fn empty_line_has_no_args() {
        assert_eq!(check(""), Err(SyntaxError::NoArgs));
        assert_eq!(check("# only a comment"), Err(SyntaxError::NoArgs));
    }

    #[test]
    fn pipe_first() {
        let err = check("| ls").unwrap_err();
        assert_eq!(err, SyntaxError::First(Op::Pipe));
        assert_eq!(
            err.to_string(),
            "Invalid syntax: found pipe operator ('|') as first argument. Correct usage of pipe operator is 'program1 | program2'."
        );
    }

    #[test]
    fn operators_first() {
        assert_eq!(check("> f"), Err(SyntaxError::First(Op::StdoutRedirection)));
        assert_eq!(check("2>> f"), Err(SyntaxError::First(Op::StderrRedirectionAppend)));
        assert_eq!(check("& ls"), Err(SyntaxError::First(Op::BackgroundJob)));
        assert_eq!(check("&& ls"), Err(SyntaxError::First(Op::And)));
        assert_eq!(check("|| ls"), Err(SyntaxError::First(Op::Or)));
    }

    #[test]
    fn operators_last() {
        assert_eq!(check("ls |"), Err(SyntaxError::Last(Op::Pipe)));
        assert_eq!(check("ls &>>"), Err(SyntaxError::Last(Op::StdoutAndStderrRedirectionAppend)));
        assert_eq!(check("ls &&"), Err(SyntaxError::Last(Op::And)));
        assert_eq!(check("ls ||"), Err(SyntaxError::Last(Op::Or)));
    }

    #[test]
    fn missing_filename_message() {
        let err = check("ls >").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid syntax: found no filename after output redirection operator ('>'). Correct usage of output redirection operator is 'program > file'."
        );
    }

    #[test]
    fn background_must_be_last() {
        assert_eq!(check("sleep 1 & ls"), Err(SyntaxError::BackgroundNotLast));
    }

    #[test]
    fn first_check_runs_before_last_check() {
        assert_eq!(check("| ls |"), Err(SyntaxError::First(Op::Pipe)));
    }
}
