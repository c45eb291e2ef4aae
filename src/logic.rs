//! `if` / `elif` / `else` extraction and condition evaluation.
//!
//! A statement walks through the states expect-condition-start,
//! collecting-conditions, expect-condition-end, expect-then,
//! collecting-if-body, then either `fi`, `elif` (a nested statement sharing
//! the closing `fi`) or `else` followed by collecting-else-body and `fi`.
//! Bodies are split into commands on `;`. Keywords only count when they
//! start a command, so `echo fi` is an ordinary argument.

use std::ops::Range;

use thiserror::Error;

use crate::arena::Arena;
use crate::args::{Arg, Args, Op};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogicError {
    #[error("expected '[' after '{0}'")]
    MissingConditionStart(&'static str),
    #[error("found an empty condition '[ ]'")]
    EmptyCondition,
    #[error("unsupported {0:?} in condition, expected values and comparisons")]
    InvalidCondition(Op),
    #[error("expected ']' to close the condition")]
    MissingConditionEnd,
    #[error("expected 'then' after the condition")]
    MissingThen,
    #[error("found no commands after '{0}'")]
    EmptyBody(&'static str),
    #[error("expected 'fi' to close 'if'")]
    MissingFi,
    #[error("found {0:?} after 'else', expected 'fi'")]
    UnexpectedKeyword(Op),
    #[error("found {0:?} after 'fi', expected ';' or end of line")]
    TrailingTokens(Op),
    #[error("found {0:?} outside of an 'if' statement")]
    Stray(Op),
    #[error("'{0}' loops are not supported")]
    Unsupported(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElseBranch {
    None,
    Else(Vec<Args>),
    Elif(Box<Statement>),
}

/// One `if` block. Each body entry is one `;`-separated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub condition: Args,
    pub then_branch: Vec<Args>,
    pub else_branch: ElseBranch,
}

fn is_condition_op(op: Op) -> bool {
    matches!(op, Op::Constant | Op::True | Op::False) || op.is_comparison()
}

/// True when `args[i]` begins a command within a body that starts at `from`.
fn at_command_start(args: &[Arg], i: usize, from: usize) -> bool {
    i == from
        || matches!(
            args[i - 1].op,
            Op::Separator | Op::Then | Op::Else | Op::And | Op::Or | Op::Pipe
        )
}

/// Ranges of the `;`-separated commands in `args`, keeping nested
/// `if ... fi` blocks whole. Empty commands are skipped.
pub fn split_commands(args: &[Arg]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, arg) in args.iter().enumerate() {
        match arg.op {
            Op::If if at_command_start(args, i, 0) => depth += 1,
            Op::Fi if depth > 0 && at_command_start(args, i, 0) => depth -= 1,
            Op::Separator if depth == 0 => {
                if i > start {
                    ranges.push(start..i);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < args.len() {
        ranges.push(start..args.len());
    }
    ranges
}

/// Index of the `else`, `elif` or `fi` that ends the body starting at `from`.
fn body_end(args: &[Arg], from: usize) -> Option<usize> {
    let mut depth = 0usize;
    for i in from..args.len() {
        if !at_command_start(args, i, from) {
            continue;
        }
        match args[i].op {
            Op::If => depth += 1,
            Op::Fi if depth > 0 => depth -= 1,
            Op::Fi | Op::Else | Op::Elif if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

fn body(args: &[Arg], range: Range<usize>) -> Vec<Args> {
    let offset = range.start;
    split_commands(&args[range])
        .into_iter()
        .map(|r| args[r.start + offset..r.end + offset].iter().copied().collect())
        .collect()
}

/// Parse the statement whose `if` or `elif` is at `pos`. Returns the
/// statement and the index just past its `fi`.
fn statement(args: &[Arg], pos: usize) -> Result<(Statement, usize), LogicError> {
    let keyword = if args[pos].op == Op::Elif { "elif" } else { "if" };
    let mut i = pos + 1;
    if args.get(i).map(|a| a.op) != Some(Op::ConditionStart) {
        return Err(LogicError::MissingConditionStart(keyword));
    }
    i += 1;

    let condition_start = i;
    while args.get(i).map_or(false, |a| is_condition_op(a.op)) {
        i += 1;
    }
    match args.get(i).map(|a| a.op) {
        Some(Op::ConditionEnd) if i == condition_start => return Err(LogicError::EmptyCondition),
        Some(Op::ConditionEnd) => {}
        Some(op) => return Err(LogicError::InvalidCondition(op)),
        None => return Err(LogicError::MissingConditionEnd),
    }
    let condition: Args = args[condition_start..i].iter().copied().collect();
    i += 1;

    while args.get(i).map(|a| a.op) == Some(Op::Separator) {
        i += 1;
    }
    if args.get(i).map(|a| a.op) != Some(Op::Then) {
        return Err(LogicError::MissingThen);
    }
    i += 1;

    let then_end = body_end(args, i).ok_or(LogicError::MissingFi)?;
    let then_branch = body(args, i..then_end);
    if then_branch.is_empty() {
        return Err(LogicError::EmptyBody("then"));
    }

    let (else_branch, end) = match args[then_end].op {
        Op::Elif => {
            let (inner, end) = statement(args, then_end)?;
            (ElseBranch::Elif(Box::new(inner)), end)
        }
        Op::Else => {
            let from = then_end + 1;
            let fi = body_end(args, from).ok_or(LogicError::MissingFi)?;
            if args[fi].op != Op::Fi {
                return Err(LogicError::UnexpectedKeyword(args[fi].op));
            }
            let else_branch = body(args, from..fi);
            if else_branch.is_empty() {
                return Err(LogicError::EmptyBody("else"));
            }
            (ElseBranch::Else(else_branch), fi + 1)
        }
        _ => (ElseBranch::None, then_end + 1),
    };

    tracing::debug!(
        condition = condition.len(),
        then_commands = then_branch.len(),
        "extracted if statement"
    );
    Ok((
        Statement {
            condition,
            then_branch,
            else_branch,
        },
        end,
    ))
}

/// Extract the statement making up `args`, which must start with `if` and
/// end with its `fi`.
pub fn extract(args: &[Arg]) -> Result<Statement, LogicError> {
    match args.first().map(|a| a.op) {
        Some(Op::If) => {}
        Some(Op::While) => return Err(LogicError::Unsupported("while")),
        Some(Op::For) => return Err(LogicError::Unsupported("for")),
        _ => return Err(LogicError::MissingConditionStart("if")),
    }
    let (statement, end) = statement(args, 0)?;
    if let Some(extra) = args.get(end) {
        return Err(LogicError::TrailingTokens(extra.op));
    }
    Ok(statement)
}

fn truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && value != "false"
}

/// Evaluate an expanded condition. A single value is tested for truth;
/// `a OP b` compares integers, falling back to text for `-eq`/`-ne`.
/// Anything else is false.
pub fn evaluate(condition: &Args, arena: &Arena) -> bool {
    match condition.as_slice() {
        [single] => match single.op {
            Op::True => true,
            Op::False => false,
            _ => truthy(arena.get(single.value)),
        },
        [lhs, op, rhs] if op.op.is_comparison() => {
            let (lhs, rhs) = (arena.get(lhs.value), arena.get(rhs.value));
            match (lhs.trim().parse::<i64>(), rhs.trim().parse::<i64>()) {
                (Ok(a), Ok(b)) => match op.op {
                    Op::Equals => a == b,
                    Op::NotEquals => a != b,
                    Op::LessThan => a < b,
                    Op::LessThanOrEquals => a <= b,
                    Op::GreaterThan => a > b,
                    Op::GreaterThanOrEquals => a >= b,
                    _ => false,
                },
                _ => match op.op {
                    Op::Equals => lhs == rhs,
                    Op::NotEquals => lhs != rhs,
                    _ => {
                        tracing::warn!(lhs, rhs, "non-numeric operands in comparison");
                        false
                    }
                },
            }
        }
        _ => {
            tracing::warn!(len = condition.len(), "unsupported condition shape");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn extract_line(line: &str) -> (Arena, Result<Statement, LogicError>) {
        let mut arena = Arena::new(1 << 14);
        let args = parse(line, &mut arena).unwrap();
        let result = extract(args.as_slice());
        (arena, result)
    }

    fn words(arena: &Arena, args: &Args) -> Vec<String> {
        args.values(arena).into_iter().map(String::from).collect()
    }

    #[test]
    fn if_else_statement() {
        let (arena, result) = extract_line("if [ 1 -eq 1 ]; then echo yes; else echo no; fi");
        let statement = result.unwrap();
        assert_eq!(words(&arena, &statement.condition), vec!["1", "-eq", "1"]);
        assert_eq!(statement.then_branch.len(), 1);
        assert_eq!(words(&arena, &statement.then_branch[0]), vec!["echo", "yes"]);
        match &statement.else_branch {
            ElseBranch::Else(body) => assert_eq!(words(&arena, &body[0]), vec!["echo", "no"]),
            other => panic!("expected else branch, got {:?}", other),
        }
        assert!(evaluate(&statement.condition, &arena));
    }

    #[test]
    fn body_split_on_separators() {
        let (arena, result) = extract_line("if [ true ]; then echo a; echo b | wc -c; fi");
        let statement = result.unwrap();
        assert_eq!(statement.then_branch.len(), 2);
        assert_eq!(words(&arena, &statement.then_branch[1]), vec!["echo", "b", "|", "wc", "-c"]);
        assert_eq!(statement.else_branch, ElseBranch::None);
    }

    #[test]
    fn elif_chain_shares_fi() {
        let (_, result) =
            extract_line("if [ 1 -gt 2 ]; then echo a; elif [ 2 -gt 1 ]; then echo b; else echo c; fi");
        let statement = result.unwrap();
        let ElseBranch::Elif(inner) = statement.else_branch else {
            panic!("expected elif");
        };
        assert!(matches!(inner.else_branch, ElseBranch::Else(_)));
    }

    #[test]
    fn nested_if_in_body() {
        let (arena, result) =
            extract_line("if [ true ]; then if [ false ]; then echo x; fi; echo after; fi");
        let statement = result.unwrap();
        assert_eq!(statement.then_branch.len(), 2);
        assert_eq!(statement.then_branch[0][0].op, Op::If);
        assert_eq!(words(&arena, &statement.then_branch[1]), vec!["echo", "after"]);
    }

    #[test]
    fn keywords_as_arguments_do_not_end_bodies() {
        let (arena, result) = extract_line("if [ true ]; then echo fi else; fi");
        let statement = result.unwrap();
        assert_eq!(words(&arena, &statement.then_branch[0]), vec!["echo", "fi", "else"]);
    }

    #[test]
    fn malformed_statements() {
        assert_eq!(extract_line("if 1; then a; fi").1, Err(LogicError::MissingConditionStart("if")));
        assert_eq!(extract_line("if [ ]; then a; fi").1, Err(LogicError::EmptyCondition));
        assert_eq!(extract_line("if [ 1 -eq 1; then a; fi").1, Err(LogicError::InvalidCondition(Op::Separator)));
        assert_eq!(extract_line("if [ 1 -eq 1").1, Err(LogicError::MissingConditionEnd));
        assert_eq!(extract_line("if [ 1 ]; echo a; fi").1, Err(LogicError::MissingThen));
        assert_eq!(extract_line("if [ 1 ]; then fi").1, Err(LogicError::EmptyBody("then")));
        assert_eq!(extract_line("if [ 1 ]; then a;").1, Err(LogicError::MissingFi));
        assert_eq!(extract_line("if [ 1 ]; then a; else b; elif [ 1 ]; then c; fi").1, Err(LogicError::UnexpectedKeyword(Op::Elif)));
        assert_eq!(extract_line("if [ 1 ]; then a; fi && b").1, Err(LogicError::TrailingTokens(Op::And)));
        assert_eq!(extract_line("while [ 1 ]; do a; done").1, Err(LogicError::Unsupported("while")));
    }

    #[test]
    fn split_commands_keeps_blocks_whole() {
        let mut arena = Arena::new(1 << 14);
        let args = parse("a; if [ 1 ]; then b; fi; c;; d", &mut arena).unwrap();
        let parts: Vec<Vec<&str>> = split_commands(args.as_slice())
            .into_iter()
            .map(|r| args.slice(r).values(&arena))
            .collect();
        assert_eq!(
            parts,
            vec![
                vec!["a"],
                vec!["if", "[", "1", "]", ";", "then", "b", ";", "fi"],
                vec!["c"],
                vec!["d"],
            ]
        );
    }

    fn condition(line: &str) -> bool {
        let mut arena = Arena::new(1 << 12);
        let args = parse(line, &mut arena).unwrap();
        evaluate(&args, &arena)
    }

    #[test]
    fn evaluate_comparisons() {
        assert!(condition("1 -eq 1"));
        assert!(condition("1 -ne 2"));
        assert!(condition("1 -lt 2"));
        assert!(condition("2 -le 2"));
        assert!(condition("3 -gt 2"));
        assert!(condition("2 -ge 2"));
        assert!(!condition("2 -lt 1"));
        assert!(condition("abc -eq abc"));
        assert!(!condition("abc -lt abd"));
    }

    #[test]
    fn evaluate_single_values() {
        assert!(condition("true"));
        assert!(!condition("false"));
        assert!(condition("yes"));
        assert!(!condition("0"));
        assert!(!condition("a b"));
    }
}
