//! Word expansion.
//!
//! One left-to-right walk over the parsed [`Args`] rewrites every node that
//! stands for something else: leading assignments are bound and dropped,
//! `~` and globs become paths, `$NAME` becomes its value, `$( ... )` folds
//! to a number and the first word is checked against the alias table.
//! Every node the walk touches comes out as [`Op::Constant`], so running it
//! again over its own output changes nothing.

use glob::MatchOptions;
use nom::{character::complete::i64 as integer, combinator::all_consuming};
use thiserror::Error;

use crate::alias::Aliases;
use crate::arena::{Arena, ArenaError, Str};
use crate::args::{Arg, Args, Op};
use crate::env::{self, Env};
use crate::vars::Vars;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpandError {
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error("math expression: {0}")]
    Math(String),
    #[error("Invalid syntax: found both input and output redirects. Use one direction per command line.")]
    ConflictingRedirections,
    #[error("Invalid syntax: found no filename after redirect operator ('{0}').")]
    MissingTarget(&'static str),
}

/// Borrowed shell tables an expansion reads and writes.
pub struct Expander<'a> {
    pub arena: &'a mut Arena,
    pub vars: &'a mut Vars,
    pub env: &'a Env,
    pub aliases: &'a Aliases,
}

impl<'a> Expander<'a> {
    pub fn run(&mut self, args: &mut Args) -> Result<(), ExpandError> {
        let mut i = 0;
        while i < args.len() {
            let arg = args[i];
            match arg.op {
                Op::Assignment if i == 0 => {
                    self.assign(arg.value)?;
                    args.remove(0);
                    continue;
                }
                Op::Assignment => {
                    demote(args, i);
                }
                Op::HomeExpansion => {
                    i += self.home(args, i)?;
                    continue;
                }
                Op::GlobExpansion => {
                    let pattern = self.arena.get(arg.value).to_string();
                    i += self.glob(args, i, &pattern)?;
                    continue;
                }
                Op::Variable => {
                    i += self.variable(args, i)?;
                    continue;
                }
                Op::MathExpressionStart => self.math(args, i)?,
                _ => {}
            }
            i += 1;
        }
        self.alias(args)?;
        Ok(())
    }

    fn assign(&mut self, assignment: Str) -> Result<(), ExpandError> {
        let text = self.arena.get(assignment);
        if let Some((name, value)) = text.split_once('=') {
            tracing::debug!(name, value, "binding variable");
            self.vars.set(name, value)?;
        }
        Ok(())
    }

    /// `~` and `~/rest` become the home directory. Returns how many nodes now
    /// stand where the home node was.
    fn home(&mut self, args: &mut Args, i: usize) -> Result<usize, ExpandError> {
        let text = self.arena.get(args[i].value).to_string();
        let home = match env::home_get() {
            Some(home) if text == "~" || text.starts_with("~/") => home,
            _ => {
                demote(args, i);
                return Ok(1);
            }
        };
        let expanded = format!("{}{}", home, &text[1..]);
        tracing::trace!(%text, %expanded, "home expansion");
        if expanded.contains(&['*', '?'][..]) {
            return self.glob(args, i, &expanded);
        }
        let value = self.arena.alloc_str(&expanded)?;
        args[i] = Arg::new(Op::Constant, value);
        Ok(1)
    }

    /// Replace the node with every path matching `pattern`. A pattern that
    /// matches nothing, or does not parse, stays as literal text.
    fn glob(&mut self, args: &mut Args, i: usize, pattern: &str) -> Result<usize, ExpandError> {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        };
        let matches: Vec<String> = match glob::glob_with(pattern, options) {
            Ok(paths) => paths
                .filter_map(Result::ok)
                .filter_map(|path| path.to_str().map(str::to_string))
                .collect(),
            Err(err) => {
                tracing::debug!(%pattern, %err, "invalid glob pattern");
                Vec::new()
            }
        };
        if matches.is_empty() {
            let value = self.arena.alloc_str(pattern)?;
            args[i] = Arg::new(Op::Constant, value);
            return Ok(1);
        }
        tracing::debug!(%pattern, count = matches.len(), "glob expansion");
        let mut nodes = Vec::with_capacity(matches.len());
        for path in &matches {
            nodes.push(Arg::new(Op::Constant, self.arena.alloc_str(path)?));
        }
        Ok(args.splice(i, nodes))
    }

    fn variable(&mut self, args: &mut Args, i: usize) -> Result<usize, ExpandError> {
        let name = self.arena.get(args[i].value).trim_start_matches('$').to_string();
        let value = match self.lookup(&name) {
            Some(value) if !value.is_empty() => value,
            _ => {
                tracing::trace!(%name, "variable unset, dropping");
                args.remove(i);
                return Ok(0);
            }
        };
        // Values are split on whitespace only; quotes and `#` stay literal.
        if value.contains(|c: char| c.is_ascii_whitespace()) {
            let mut nodes = Vec::new();
            for word in value.split_ascii_whitespace() {
                nodes.push(Arg::new(Op::Constant, self.arena.alloc_str(word)?));
            }
            if nodes.is_empty() {
                args.remove(i);
                return Ok(0);
            }
            return Ok(args.splice(i, nodes));
        }
        let value = self.arena.alloc_str(&value)?;
        args[i] = Arg::new(Op::Constant, value);
        Ok(1)
    }

    /// `HOME` and `PATH` come from the live process environment; anything
    /// else from shell variables, then the environment snapshot.
    fn lookup(&self, name: &str) -> Option<String> {
        if name == env::HOME || name == env::PATH {
            return std::env::var(name).ok();
        }
        self.vars
            .get(name)
            .or_else(|| self.env.get(name))
            .map(str::to_string)
    }

    /// Fold `$( ... )` at `start` into a single constant.
    fn math(&mut self, args: &mut Args, start: usize) -> Result<(), ExpandError> {
        let end = (start + 1..args.len())
            .find(|&j| args[j].op == Op::MathExpressionEnd)
            .ok_or_else(|| ExpandError::Math("missing ')'".into()))?;

        let mut terms = Vec::with_capacity(end - start);
        for arg in &args.as_slice()[start + 1..end] {
            let term = match arg.op {
                Op::Variable => {
                    let name = self.arena.get(arg.value).trim_start_matches('$');
                    let value = self.lookup(name).unwrap_or_default();
                    Term::Number(number(&value)?)
                }
                Op::Constant => Term::Number(number(self.arena.get(arg.value))?),
                op => Term::Operator(op),
            };
            terms.push(term);
        }
        let result = evaluate(&terms)?;
        tracing::debug!(result, "folded math expression");

        let value = self.arena.alloc_str(&result.to_string())?;
        args.replace_range(start..end + 1, Arg::new(Op::Constant, value));
        Ok(())
    }

    fn alias(&mut self, args: &mut Args) -> Result<(), ExpandError> {
        let Some(first) = args.first().copied() else {
            return Ok(());
        };
        if first.op != Op::Constant {
            return Ok(());
        }
        let word = self.arena.get(first.value);
        if let Some(command) = self.aliases.check(word) {
            tracing::debug!(%word, %command, "alias substitution");
            let value = self.arena.alloc_str(command)?;
            args[0] = Arg::new(Op::Constant, value);
        }
        Ok(())
    }
}

fn demote(args: &mut Args, i: usize) {
    if let Some(arg) = args.get_mut(i) {
        arg.op = Op::Constant;
    }
}

fn number(text: &str) -> Result<i64, ExpandError> {
    all_consuming(integer::<&str, nom::error::Error<&str>>)(text.trim())
        .map(|(_, n)| n)
        .map_err(|_| ExpandError::Math(format!("'{}' is not an integer", text)))
}

#[derive(Debug, Clone, Copy)]
enum Term {
    Number(i64),
    Operator(Op),
}

fn binding_power(op: Op) -> Option<u8> {
    match op {
        Op::Add | Op::Subtract => Some(1),
        Op::Multiply | Op::Divide | Op::Modulo => Some(2),
        Op::Exponentiation => Some(3),
        _ => None,
    }
}

fn apply(op: Op, lhs: i64, rhs: i64) -> Result<i64, ExpandError> {
    let overflow = || ExpandError::Math("integer overflow".into());
    match op {
        Op::Add => lhs.checked_add(rhs).ok_or_else(overflow),
        Op::Subtract => lhs.checked_sub(rhs).ok_or_else(overflow),
        Op::Multiply => lhs.checked_mul(rhs).ok_or_else(overflow),
        Op::Divide | Op::Modulo if rhs == 0 => Err(ExpandError::Math("division by zero".into())),
        Op::Divide => lhs.checked_div(rhs).ok_or_else(overflow),
        Op::Modulo => lhs.checked_rem(rhs).ok_or_else(overflow),
        Op::Exponentiation => {
            let exp = u32::try_from(rhs).map_err(|_| ExpandError::Math("negative exponent".into()))?;
            lhs.checked_pow(exp).ok_or_else(overflow)
        }
        _ => Err(ExpandError::Math(format!("unsupported operator '{}'", op.symbol()))),
    }
}

/// Precedence climbing over an alternating number/operator sequence.
/// `**` is right associative, everything else left associative.
fn evaluate(terms: &[Term]) -> Result<i64, ExpandError> {
    let mut pos = 0;
    let value = climb(terms, &mut pos, 1)?;
    if pos != terms.len() {
        return Err(ExpandError::Math("unexpected trailing input".into()));
    }
    Ok(value)
}

fn climb(terms: &[Term], pos: &mut usize, min_power: u8) -> Result<i64, ExpandError> {
    let mut lhs = match terms.get(*pos) {
        Some(Term::Number(n)) => *n,
        Some(Term::Operator(op)) => {
            return Err(ExpandError::Math(format!("expected a number, found '{}'", op.symbol())))
        }
        None => return Err(ExpandError::Math("expected a number".into())),
    };
    *pos += 1;

    while let Some(Term::Operator(op)) = terms.get(*pos) {
        let op = *op;
        let power = binding_power(op)
            .ok_or_else(|| ExpandError::Math(format!("unsupported operator '{}'", op.symbol())))?;
        if power < min_power {
            break;
        }
        *pos += 1;
        let next_min = if op == Op::Exponentiation { power } else { power + 1 };
        let rhs = climb(terms, pos, next_min)?;
        lhs = apply(op, lhs, rhs)?;
    }
    if let Some(Term::Number(_)) = terms.get(*pos) {
        return Err(ExpandError::Math("missing operator between numbers".into()));
    }
    Ok(lhs)
}
