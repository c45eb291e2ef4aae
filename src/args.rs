//! Opcode-tagged argument lists.
//!
//! The parser produces an [`Args`] list; every later stage (expansion,
//! validation, control flow, the VM) reads and rewrites it in place. The
//! list is index addressed so expansion can splice nodes at any position.

use crate::arena::{Arena, Str};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Never appears on a parsed node.
    None,
    Constant,
    Pipe,
    StdoutRedirection,
    StdoutRedirectionAppend,
    StdinRedirection,
    StdinRedirectionAppend,
    StderrRedirection,
    StderrRedirectionAppend,
    StdoutAndStderrRedirection,
    StdoutAndStderrRedirectionAppend,
    BackgroundJob,
    And,
    Or,
    Separator,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Exponentiation,
    MathExpressionStart,
    MathExpressionEnd,
    Variable,
    Assignment,
    True,
    False,
    HomeExpansion,
    GlobExpansion,
    ConditionStart,
    ConditionEnd,
    If,
    Else,
    Elif,
    Then,
    Fi,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEquals,
    GreaterThan,
    GreaterThanOrEquals,
    While,
    For,
    Do,
    Done,
    In,
}

impl Op {
    pub fn is_redirection(self) -> bool {
        matches!(
            self,
            Op::StdoutRedirection
                | Op::StdoutRedirectionAppend
                | Op::StdinRedirection
                | Op::StdinRedirectionAppend
                | Op::StderrRedirection
                | Op::StderrRedirectionAppend
                | Op::StdoutAndStderrRedirection
                | Op::StdoutAndStderrRedirectionAppend
        )
    }

    /// Operators that end one command and start the next.
    pub fn is_command_boundary(self) -> bool {
        matches!(self, Op::Pipe | Op::And | Op::Or | Op::Separator | Op::BackgroundJob)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Op::Equals
                | Op::NotEquals
                | Op::LessThan
                | Op::LessThanOrEquals
                | Op::GreaterThan
                | Op::GreaterThanOrEquals
        )
    }

    /// Words with a special meaning only inside control flow or conditions.
    pub fn is_keyword(self) -> bool {
        self.is_comparison()
            || matches!(
                self,
                Op::True
                    | Op::False
                    | Op::If
                    | Op::Else
                    | Op::Elif
                    | Op::Then
                    | Op::Fi
                    | Op::While
                    | Op::For
                    | Op::Do
                    | Op::Done
                    | Op::In
                    | Op::ConditionStart
                    | Op::ConditionEnd
            )
    }

    /// Source text of operators with a fixed spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            Op::Pipe => "|",
            Op::StdoutRedirection => ">",
            Op::StdoutRedirectionAppend => ">>",
            Op::StdinRedirection => "<",
            Op::StdinRedirectionAppend => "<<",
            Op::StderrRedirection => "2>",
            Op::StderrRedirectionAppend => "2>>",
            Op::StdoutAndStderrRedirection => "&>",
            Op::StdoutAndStderrRedirectionAppend => "&>>",
            Op::BackgroundJob => "&",
            Op::And => "&&",
            Op::Or => "||",
            Op::Separator => ";",
            Op::Add => "+",
            Op::Subtract => "-",
            Op::Multiply => "*",
            Op::Divide => "/",
            Op::Modulo => "%",
            Op::Exponentiation => "**",
            Op::MathExpressionStart => "$(",
            Op::MathExpressionEnd => ")",
            Op::ConditionStart => "[",
            Op::ConditionEnd => "]",
            _ => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arg {
    pub op: Op,
    pub value: Str,
}

impl Arg {
    pub fn new(op: Op, value: Str) -> Self {
        Arg { op, value }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    args: Vec<Arg>,
}

impl Args {
    pub fn new() -> Self {
        Args::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Args {
            args: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn push(&mut self, arg: Arg) {
        self.args.push(arg);
    }

    /// Insert `arg` at `index`, shifting later nodes right.
    pub fn insert(&mut self, index: usize, arg: Arg) {
        self.args.insert(index, arg);
    }

    pub fn remove(&mut self, index: usize) -> Arg {
        self.args.remove(index)
    }

    /// Replace the node at `index` with `with`, returning how many nodes were inserted.
    pub fn splice(&mut self, index: usize, with: impl IntoIterator<Item = Arg>) -> usize {
        let before = self.args.len();
        self.args.splice(index..=index, with);
        self.args.len() + 1 - before
    }

    /// Collapse the nodes in `range` into the single node `arg`.
    pub fn replace_range(&mut self, range: std::ops::Range<usize>, arg: Arg) {
        self.args.splice(range, std::iter::once(arg));
    }

    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.args.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Arg> {
        self.args.get_mut(index)
    }

    pub fn first(&self) -> Option<&Arg> {
        self.args.first()
    }

    pub fn last(&self) -> Option<&Arg> {
        self.args.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arg> {
        self.args.iter()
    }

    pub fn as_slice(&self) -> &[Arg] {
        &self.args
    }

    /// Split off everything from `index` onward.
    pub fn split_off(&mut self, index: usize) -> Args {
        Args {
            args: self.args.split_off(index.min(self.args.len())),
        }
    }

    /// Copy a sub-range into a new list.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Args {
        Args {
            args: self.args[range].to_vec(),
        }
    }

    pub fn ops(&self) -> Vec<Op> {
        self.args.iter().map(|arg| arg.op).collect()
    }

    pub fn values<'a>(&self, arena: &'a Arena) -> Vec<&'a str> {
        self.args.iter().map(|arg| arena.get(arg.value)).collect()
    }
}

impl std::ops::Index<usize> for Args {
    type Output = Arg;

    fn index(&self, index: usize) -> &Arg {
        &self.args[index]
    }
}

impl std::ops::IndexMut<usize> for Args {
    fn index_mut(&mut self, index: usize) -> &mut Arg {
        &mut self.args[index]
    }
}

impl FromIterator<Arg> for Args {
    fn from_iter<I: IntoIterator<Item = Arg>>(iter: I) -> Self {
        Args {
            args: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Args {
    type Item = &'a Arg;
    type IntoIter = std::slice::Iter<'a, Arg>;

    fn into_iter(self) -> Self::IntoIter {
        self.args.iter()
    }
}
