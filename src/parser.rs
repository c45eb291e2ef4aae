//! Parser for opsh
//!
//! Turns the lexer's token stream into an opcode-tagged [`Args`] list.
//! Adjacent tokens are glued back into words (`X="a b"` is one assignment,
//! `2>>` one operator), and each finished word is classified. Flags picked
//! up while building the word (home, glob, assignment) take priority over
//! the generic keyword/constant classifier.

use thiserror::Error;

use crate::arena::{Arena, ArenaError, StrBuf};
use crate::args::{Arg, Args, Op};
use crate::lexer::{lex, Keyword, LexError, Token, TokenKind, TOKEN_LIMIT};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error("too many arguments: the limit is {0}")]
    TooManyTokens(usize),
    #[error("unterminated math expression: expected ')' to close '$('")]
    UnterminatedMath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Command,
    Math,
}

/// The word currently being assembled.
#[derive(Debug, Default)]
struct Word {
    text: StrBuf,
    parts: usize,
    first: Option<TokenKind>,
    dollar: bool,
    quoted: bool,
    glob: bool,
    home: bool,
}

impl Word {
    fn is_empty(&self) -> bool {
        self.parts == 0
    }
}

fn keyword_op(keyword: Keyword) -> Op {
    match keyword {
        Keyword::If => Op::If,
        Keyword::Fi => Op::Fi,
        Keyword::Do => Op::Do,
        Keyword::In => Op::In,
        Keyword::For => Op::For,
        Keyword::Then => Op::Then,
        Keyword::Else => Op::Else,
        Keyword::Elif => Op::Elif,
        Keyword::Done => Op::Done,
        Keyword::While => Op::While,
        Keyword::True => Op::True,
        Keyword::False => Op::False,
        Keyword::Eq => Op::Equals,
        Keyword::Ne => Op::NotEquals,
        Keyword::Lt => Op::LessThan,
        Keyword::Le => Op::LessThanOrEquals,
        Keyword::Gt => Op::GreaterThan,
        Keyword::Ge => Op::GreaterThanOrEquals,
    }
}

fn is_name(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `name=value` with a valid variable name before the `=`.
pub fn is_assignment(text: &str) -> bool {
    matches!(text.split_once('='), Some((name, _)) if is_name(name))
}

/// Parser state
pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    arena: &'a mut Arena,
    mode: Mode,
    word: Word,
    args: Args,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, arena: &'a mut Arena) -> Self {
        Parser {
            tokens,
            pos: 0,
            arena,
            mode: Mode::Command,
            word: Word::default(),
            args: Args::with_capacity(16),
        }
    }

    /// Peek at the current token without consuming it
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// Consume and return the current token
    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).copied();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consume the next token if it is the operator `c` written right after the previous one.
    fn eat_joined(&mut self, c: char) -> bool {
        match self.peek() {
            Some(t) if t.joined && t.kind == TokenKind::Operator(c) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn next_is_joined(&self) -> bool {
        self.peek().map_or(false, |t| t.joined)
    }

    /// `[` and `]` act as operators only when they stand apart from words.
    fn standalone(&self, token: &Token) -> bool {
        !token.joined
            && self
                .peek()
                .map_or(true, |n| !n.joined || n.kind == TokenKind::Operator(';'))
    }

    pub fn parse(mut self) -> Result<Args, ParseError> {
        while let Some(token) = self.advance() {
            match self.mode {
                Mode::Command => self.command_token(token)?,
                Mode::Math => self.math_token(token)?,
            }
        }
        if self.mode == Mode::Math {
            return Err(ParseError::UnterminatedMath);
        }
        self.flush()?;
        tracing::debug!(count = self.args.len(), "parsed args");
        Ok(self.args)
    }

    fn command_token(&mut self, token: Token) -> Result<(), ParseError> {
        match token.kind {
            TokenKind::Operator('>') if token.joined && self.word_is_stderr_fd() => {
                self.word = Word::default();
                let op = if self.eat_joined('>') {
                    Op::StderrRedirectionAppend
                } else {
                    Op::StderrRedirection
                };
                self.push_op(op)
            }
            TokenKind::Operator(c @ ('|' | '>' | '<' | '&' | ';')) => {
                self.flush()?;
                let op = match c {
                    '|' if self.eat_joined('|') => Op::Or,
                    '|' => Op::Pipe,
                    '&' if self.eat_joined('&') => Op::And,
                    '&' if self.eat_joined('>') => {
                        if self.eat_joined('>') {
                            Op::StdoutAndStderrRedirectionAppend
                        } else {
                            Op::StdoutAndStderrRedirection
                        }
                    }
                    '&' => Op::BackgroundJob,
                    '>' if self.eat_joined('>') => Op::StdoutRedirectionAppend,
                    '>' => Op::StdoutRedirection,
                    '<' if self.eat_joined('<') => Op::StdinRedirectionAppend,
                    '<' => Op::StdinRedirection,
                    _ => Op::Separator,
                };
                self.push_op(op)
            }
            TokenKind::Operator('$') if self.next_is_joined() && self.eat_joined('(') => {
                self.flush()?;
                self.mode = Mode::Math;
                self.push_op(Op::MathExpressionStart)
            }
            TokenKind::Operator(c @ ('[' | ']')) if self.standalone(&token) => {
                self.flush()?;
                self.push_op(if c == '[' { Op::ConditionStart } else { Op::ConditionEnd })
            }
            _ => self.append(token),
        }
    }

    fn math_token(&mut self, token: Token) -> Result<(), ParseError> {
        let op = match token.kind {
            TokenKind::Operator(')') => {
                self.flush()?;
                self.mode = Mode::Command;
                return self.push_op(Op::MathExpressionEnd);
            }
            TokenKind::Operator('+') => Op::Add,
            TokenKind::Operator('%') => Op::Modulo,
            TokenKind::Star if self.next_is_joined() && self.peek().map(|t| t.kind) == Some(TokenKind::Star) => {
                self.pos += 1;
                Op::Exponentiation
            }
            TokenKind::Star => Op::Multiply,
            TokenKind::Constant if self.arena.get(token.value) == "-" => Op::Subtract,
            TokenKind::Constant if self.arena.get(token.value) == "/" => Op::Divide,
            TokenKind::Glob | TokenKind::Constant if self.arena.get(token.value).contains(&['*', '/'][..]) => {
                return self.math_word(token)
            }
            _ => return self.append(token),
        };
        self.flush()?;
        self.push_op(op)
    }

    /// Split a math word such as `2*3` or `6/2` into operands and operators.
    fn math_word(&mut self, token: Token) -> Result<(), ParseError> {
        let text = self.arena.get(token.value).to_string();
        let mut joined = token.joined;
        let mut rest = text.as_str();
        while !rest.is_empty() {
            let end = rest.find(&['*', '/'][..]).unwrap_or(rest.len());
            let (operand, tail) = rest.split_at(end);
            if !operand.is_empty() {
                let value = self.arena.alloc_str(operand)?;
                self.append(Token {
                    kind: TokenKind::Constant,
                    value,
                    joined,
                })?;
            }
            joined = false;
            let (op, len) = if tail.starts_with("**") {
                (Op::Exponentiation, 2)
            } else if tail.starts_with('*') {
                (Op::Multiply, 1)
            } else if tail.starts_with('/') {
                (Op::Divide, 1)
            } else {
                break;
            };
            self.flush()?;
            self.push_op(op)?;
            rest = &tail[len..];
        }
        Ok(())
    }

    fn word_is_stderr_fd(&self) -> bool {
        self.word.parts == 1
            && self.word.first == Some(TokenKind::Number)
            && self.word.text.as_str(self.arena) == "2"
    }

    /// Add a token's text to the current word, starting a new word if it stands apart.
    fn append(&mut self, token: Token) -> Result<(), ParseError> {
        if !token.joined {
            self.flush()?;
        }
        let text = self.arena.get(token.value).to_string();
        let word = &mut self.word;
        if word.parts == 0 {
            word.first = Some(token.kind);
            word.home = token.kind == TokenKind::Home;
            word.dollar = token.kind == TokenKind::Operator('$');
        }
        match token.kind {
            TokenKind::Quoted(_) => word.quoted = true,
            TokenKind::Glob | TokenKind::Star => word.glob = true,
            _ => {}
        }
        word.parts += 1;
        word.text.push_str(self.arena, &text)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ParseError> {
        if self.word.is_empty() {
            return Ok(());
        }
        let word = std::mem::take(&mut self.word);
        let op = {
            let text = word.text.as_str(self.arena);
            if self.mode == Mode::Math {
                if word.dollar && word.parts == 2 && is_name(&text[1..]) {
                    Op::Variable
                } else {
                    Op::Constant
                }
            } else if word.home && !word.quoted {
                Op::HomeExpansion
            } else if word.glob && !word.quoted {
                Op::GlobExpansion
            } else if word.first == Some(TokenKind::Constant) && is_assignment(text) {
                Op::Assignment
            } else if word.dollar && word.parts == 2 && !word.quoted && is_name(&text[1..]) {
                Op::Variable
            } else if let (1, Some(TokenKind::Keyword(keyword))) = (word.parts, word.first) {
                keyword_op(keyword)
            } else {
                Op::Constant
            }
        };
        let mut text = word.text;
        let value = text.finish();
        self.push(Arg::new(op, value))
    }

    fn push_op(&mut self, op: Op) -> Result<(), ParseError> {
        let value = self.arena.alloc_str(op.symbol())?;
        self.push(Arg::new(op, value))
    }

    fn push(&mut self, arg: Arg) -> Result<(), ParseError> {
        if self.args.len() >= TOKEN_LIMIT {
            return Err(ParseError::TooManyTokens(TOKEN_LIMIT));
        }
        self.args.push(arg);
        Ok(())
    }
}

/// Convenience function to lex and parse a line
pub fn parse(line: &str, arena: &mut Arena) -> Result<Args, ParseError> {
    let tokens = lex(line, arena)?;
    Parser::new(tokens, arena).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parsed(line: &str) -> Vec<(Op, String)> {
        let mut arena = Arena::new(1 << 14);
        let args = parse(line, &mut arena).unwrap();
        args.iter()
            .map(|a| (a.op, arena.get(a.value).to_string()))
            .collect()
    }

    fn ops(line: &str) -> Vec<Op> {
        parsed(line).into_iter().map(|(op, _)| op).collect()
    }

    #[test]
    fn parse_simple_command() {
        assert_eq!(
            parsed("ls -la"),
            vec![(Op::Constant, "ls".into()), (Op::Constant, "-la".into())]
        );
    }

    #[test]
    fn parse_pipeline() {
        assert_eq!(
            ops("ls | sort | wc -c"),
            vec![Op::Constant, Op::Pipe, Op::Constant, Op::Pipe, Op::Constant, Op::Constant]
        );
    }

    #[test]
    fn parse_redirections() {
        assert_eq!(
            ops("a > f >> g < h << i 2> j 2>> k &> l &>> m"),
            vec![
                Op::Constant,
                Op::StdoutRedirection,
                Op::Constant,
                Op::StdoutRedirectionAppend,
                Op::Constant,
                Op::StdinRedirection,
                Op::Constant,
                Op::StdinRedirectionAppend,
                Op::Constant,
                Op::StderrRedirection,
                Op::Constant,
                Op::StderrRedirectionAppend,
                Op::Constant,
                Op::StdoutAndStderrRedirection,
                Op::Constant,
                Op::StdoutAndStderrRedirectionAppend,
                Op::Constant,
            ]
        );
    }

    #[test]
    fn two_as_argument_is_not_a_redirect() {
        assert_eq!(
            parsed("echo 2 > out"),
            vec![
                (Op::Constant, "echo".into()),
                (Op::Constant, "2".into()),
                (Op::StdoutRedirection, ">".into()),
                (Op::Constant, "out".into()),
            ]
        );
    }

    #[test]
    fn parse_logic_and_background() {
        assert_eq!(
            ops("a && b || c &"),
            vec![Op::Constant, Op::And, Op::Constant, Op::Or, Op::Constant, Op::BackgroundJob]
        );
    }

    #[test]
    fn parse_variable_and_assignment() {
        assert_eq!(
            parsed("VAR=5 echo $VAR"),
            vec![
                (Op::Assignment, "VAR=5".into()),
                (Op::Constant, "echo".into()),
                (Op::Variable, "$VAR".into()),
            ]
        );
    }

    #[test]
    fn quoted_assignment_value() {
        assert_eq!(parsed("X=\"a b\""), vec![(Op::Assignment, "X=a b".into())]);
    }

    #[test]
    fn equals_without_name_is_constant() {
        assert_eq!(ops("=x 1=2"), vec![Op::Constant, Op::Constant]);
    }

    #[test]
    fn home_and_glob_flags_take_priority() {
        assert_eq!(
            ops("~ ~/x *.rs * \"*.rs\""),
            vec![
                Op::HomeExpansion,
                Op::HomeExpansion,
                Op::GlobExpansion,
                Op::GlobExpansion,
                Op::Constant,
            ]
        );
    }

    #[test]
    fn parse_if_else() {
        assert_eq!(
            ops("if [ 1 -eq 1 ]; then echo yes; else echo no; fi"),
            vec![
                Op::If,
                Op::ConditionStart,
                Op::Constant,
                Op::Equals,
                Op::Constant,
                Op::ConditionEnd,
                Op::Separator,
                Op::Then,
                Op::Constant,
                Op::Constant,
                Op::Separator,
                Op::Else,
                Op::Constant,
                Op::Constant,
                Op::Separator,
                Op::Fi,
            ]
        );
    }

    #[test]
    fn brackets_inside_words_are_literal() {
        assert_eq!(parsed("echo a[1]"), vec![(Op::Constant, "echo".into()), (Op::Constant, "a[1]".into())]);
    }

    #[test]
    fn math_expression() {
        assert_eq!(
            ops("echo $(1 + 2 * 3 ** 2 - 4 / 2 % 3)"),
            vec![
                Op::Constant,
                Op::MathExpressionStart,
                Op::Constant,
                Op::Add,
                Op::Constant,
                Op::Multiply,
                Op::Constant,
                Op::Exponentiation,
                Op::Constant,
                Op::Subtract,
                Op::Constant,
                Op::Divide,
                Op::Constant,
                Op::Modulo,
                Op::Constant,
                Op::MathExpressionEnd,
            ]
        );
    }

    #[test]
    fn math_operators_inside_words_are_split() {
        assert_eq!(
            parsed("$(2*3)"),
            vec![
                (Op::MathExpressionStart, "$(".into()),
                (Op::Constant, "2".into()),
                (Op::Multiply, "*".into()),
                (Op::Constant, "3".into()),
                (Op::MathExpressionEnd, ")".into()),
            ]
        );
        assert_eq!(
            ops("$(2**3 *4 / 2 $N*5 8/2)"),
            vec![
                Op::MathExpressionStart,
                Op::Constant,
                Op::Exponentiation,
                Op::Constant,
                Op::Multiply,
                Op::Constant,
                Op::Divide,
                Op::Constant,
                Op::Variable,
                Op::Multiply,
                Op::Constant,
                Op::Constant,
                Op::Divide,
                Op::Constant,
                Op::MathExpressionEnd,
            ]
        );
    }

    #[test]
    fn unterminated_math_is_an_error() {
        let mut arena = Arena::new(1 << 12);
        assert_eq!(parse("echo $(1 + 2", &mut arena), Err(ParseError::UnterminatedMath));
    }

    #[test]
    fn operator_chars_inside_words_glue() {
        assert_eq!(parsed("chmod +x f%"), vec![
            (Op::Constant, "chmod".into()),
            (Op::Constant, "+x".into()),
            (Op::Constant, "f%".into()),
        ]);
    }

    #[test]
    fn keyword_in_argument_position_stays_tagged() {
        assert_eq!(ops("echo true"), vec![Op::Constant, Op::True]);
    }

    #[test]
    fn empty_quotes_make_an_empty_argument() {
        assert_eq!(parsed("echo \"\""), vec![(Op::Constant, "echo".into()), (Op::Constant, "".into())]);
    }

    #[test]
    fn no_none_opcodes_in_output() {
        let ops = ops("a | b > c && d ; if [ x ] ; then y ; fi &");
        assert!(!ops.contains(&Op::None));
    }
}
