//! Tokenization for opsh
//!
//! The lexer walks a line one character at a time. Quoting and comments are
//! tracked with [`State`]; everything else accumulates into a word buffer
//! that is classified when a delimiter is reached.
//!
//! Single-character operators (`| > < & ; $ ( ) [ ] + %`) are emitted as
//! soon as they are seen. Multi-character operators such as `>>` or `&&`
//! are assembled later by the parser, which uses [`Token::joined`] to know
//! whether two tokens were written next to each other.

use nom::{
    character::complete::{char, digit1},
    combinator::{all_consuming, opt, recognize},
    sequence::pair,
    IResult,
};
use thiserror::Error;

use crate::arena::{Arena, ArenaError, Str, StrBuf};

/// Maximum number of tokens in one line.
pub const TOKEN_LIMIT: usize = 128;
/// Maximum length of one line of input, in bytes.
pub const MAX_INPUT: usize = 4096;

const OPERATOR_CHARS: &[char] = &['|', '>', '<', '&', ';', '$', '(', ')', '[', ']', '+', '%'];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("too many tokens: the limit is {0}")]
    TooManyTokens(usize),
    #[error("unterminated {0} quote")]
    UnterminatedQuote(Quote),
    #[error("input longer than {0} bytes")]
    LineTooLong(usize),
    #[error(transparent)]
    Arena(#[from] ArenaError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quote {
    Single,
    Double,
    Backtick,
}

impl Quote {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '\'' => Some(Quote::Single),
            '"' => Some(Quote::Double),
            '`' => Some(Quote::Backtick),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Quote::Single => '\'',
            Quote::Double => '"',
            Quote::Backtick => '`',
        }
    }
}

impl std::fmt::Display for Quote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Quote::Single => write!(f, "single"),
            Quote::Double => write!(f, "double"),
            Quote::Backtick => write!(f, "backtick"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Fi,
    Do,
    In,
    For,
    Then,
    Else,
    Elif,
    Done,
    While,
    True,
    False,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Keyword {
    /// Match `word` against the fixed keyword tables, shortest first.
    pub fn from_word(word: &str) -> Option<Self> {
        match word.len() {
            2 => match word {
                "if" => Some(Keyword::If),
                "fi" => Some(Keyword::Fi),
                "do" => Some(Keyword::Do),
                "in" => Some(Keyword::In),
                _ => None,
            },
            3 => match word {
                "-eq" => Some(Keyword::Eq),
                "-ne" => Some(Keyword::Ne),
                "-lt" => Some(Keyword::Lt),
                "-le" => Some(Keyword::Le),
                "-gt" => Some(Keyword::Gt),
                "-ge" => Some(Keyword::Ge),
                "for" => Some(Keyword::For),
                _ => None,
            },
            4 => match word {
                "true" => Some(Keyword::True),
                "then" => Some(Keyword::Then),
                "else" => Some(Keyword::Else),
                "elif" => Some(Keyword::Elif),
                "done" => Some(Keyword::Done),
                _ => None,
            },
            5 => match word {
                "false" => Some(Keyword::False),
                "while" => Some(Keyword::While),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// One of the single-character operators.
    Operator(char),
    /// A `*` standing on its own.
    Star,
    Keyword(Keyword),
    Number,
    Constant,
    /// A word containing `*` or `?`.
    Glob,
    /// A word starting with `~`.
    Home,
    /// The contents of a quoted section, quotes removed.
    Quoted(Quote),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: Str,
    /// No whitespace separates this token from the previous one.
    pub joined: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    Quoted(Quote),
    Comment,
}

fn number(input: &str) -> IResult<&str, &str> {
    recognize(pair(opt(char('-')), digit1))(input)
}

/// True for an optionally negative run of ASCII digits.
pub fn is_number(word: &str) -> bool {
    all_consuming(number)(word).is_ok()
}

fn is_delimiter(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Restartable tokenizer. Feed it one or more inputs, then call [`Lexer::finish`].
pub struct Lexer<'a> {
    arena: &'a mut Arena,
    state: State,
    word: StrBuf,
    word_joined: bool,
    glob: bool,
    home: bool,
    quote_joined: bool,
    adjacent: bool,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(arena: &'a mut Arena) -> Self {
        Lexer {
            arena,
            state: State::Normal,
            word: StrBuf::new(),
            word_joined: false,
            glob: false,
            home: false,
            quote_joined: false,
            adjacent: false,
            tokens: Vec::new(),
        }
    }

    /// Tokenize `input`. Its end acts as a word delimiter, so consecutive
    /// inputs behave like words separated by a space.
    pub fn feed(&mut self, input: &str) -> Result<(), LexError> {
        if input.len() > MAX_INPUT {
            return Err(LexError::LineTooLong(MAX_INPUT));
        }
        let mut chars = input.chars().peekable();
        while let Some(c) = chars.next() {
            self.step(c, chars.peek().copied())?;
        }
        match self.state {
            State::Normal => {
                self.flush()?;
                self.adjacent = false;
            }
            State::Quoted(_) => self.word.push(self.arena, ' ')?,
            State::Comment => self.state = State::Normal,
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<Vec<Token>, LexError> {
        if let State::Quoted(quote) = self.state {
            return Err(LexError::UnterminatedQuote(quote));
        }
        self.flush()?;
        Ok(self.tokens)
    }

    fn step(&mut self, c: char, next: Option<char>) -> Result<(), LexError> {
        match self.state {
            State::Comment => {
                if c == '\n' {
                    self.state = State::Normal;
                    self.adjacent = false;
                }
            }
            State::Quoted(quote) => {
                if c == quote.as_char() {
                    let value = self.word.finish();
                    self.state = State::Normal;
                    self.emit(TokenKind::Quoted(quote), value, self.quote_joined)?;
                } else {
                    self.word.push(self.arena, c)?;
                }
            }
            State::Normal => self.step_normal(c, next)?,
        }
        Ok(())
    }

    fn step_normal(&mut self, c: char, next: Option<char>) -> Result<(), LexError> {
        if is_delimiter(c) {
            self.flush()?;
            self.adjacent = false;
            return Ok(());
        }
        if let Some(quote) = Quote::from_char(c) {
            self.flush()?;
            self.quote_joined = self.adjacent;
            self.state = State::Quoted(quote);
            return Ok(());
        }
        if c == '#' && self.word.is_empty() {
            self.state = State::Comment;
            return Ok(());
        }
        if OPERATOR_CHARS.contains(&c) {
            self.flush()?;
            let mut utf8 = [0u8; 4];
            let value = self.arena.alloc_str(c.encode_utf8(&mut utf8))?;
            return self.emit(TokenKind::Operator(c), value, self.adjacent);
        }
        if c == '*' && self.word.is_empty() && next.map_or(true, |n| is_delimiter(n) || n == '*') {
            let value = self.arena.alloc_str("*")?;
            return self.emit(TokenKind::Star, value, self.adjacent);
        }

        if self.word.is_empty() {
            self.word_joined = self.adjacent;
            self.home = c == '~';
        }
        if c == '*' || c == '?' {
            self.glob = true;
        }
        self.word.push(self.arena, c)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LexError> {
        if self.word.is_empty() {
            return Ok(());
        }
        let kind = {
            let text = self.word.as_str(self.arena);
            if self.home {
                TokenKind::Home
            } else if self.glob {
                TokenKind::Glob
            } else if let Some(keyword) = Keyword::from_word(text) {
                TokenKind::Keyword(keyword)
            } else if is_number(text) {
                TokenKind::Number
            } else {
                TokenKind::Constant
            }
        };
        let value = self.word.finish();
        self.glob = false;
        self.home = false;
        self.emit(kind, value, self.word_joined)
    }

    fn emit(&mut self, kind: TokenKind, value: Str, joined: bool) -> Result<(), LexError> {
        if self.tokens.len() >= TOKEN_LIMIT {
            return Err(LexError::TooManyTokens(TOKEN_LIMIT));
        }
        self.tokens.push(Token { kind, value, joined });
        self.adjacent = true;
        Ok(())
    }
}

/// Tokenize a single line.
pub fn lex(line: &str, arena: &mut Arena) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(arena);
    lexer.feed(line)?;
    lexer.finish()
}

/// Rebuild source text from tokens: joined tokens are concatenated, the
/// rest separated by one space.
pub fn rejoin(tokens: &[Token], arena: &Arena) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && !token.joined {
            out.push(' ');
        }
        out.push_str(arena.get(token.value));
    }
    out
}
