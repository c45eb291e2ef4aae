//! opsh - an opcode shell
//!
//! # Overview
//!
//! opsh reads a line, turns it into a flat list of opcode-tagged arguments
//! and runs it on a small process VM. The stages are separate modules so
//! each can be used and tested on its own:
//!
//! ```text
//! line ─ lexer ─ parser ─ syntax ─ expand ─ preprocess ─ vm
//!                  │                  │          │        │
//!                Args         vars/env/alias  Command   fork/exec,
//!                                                       pipes, builtins
//! ```
//!
//! Strings built while handling a line live in a scratch [`Arena`] that is
//! rewound before the next line; variable, environment and alias tables own
//! their own persistent arenas.
//!
//! # Example
//!
//! ```rust
//! use opsh::{CommandResult, Shell};
//!
//! let mut shell = Shell::new();
//! assert_eq!(shell.run_line("GREETING=hello").unwrap(), CommandResult::SuccessContinue);
//! assert_eq!(shell.state.vars.get("GREETING"), Some("hello"));
//! assert_eq!(shell.run_line("| ls").unwrap(), CommandResult::SyntaxError);
//! ```

pub mod alias;
pub mod arena;
pub mod args;
pub mod config;
pub mod env;
pub mod expand;
pub mod lexer;
pub mod logic;
pub mod parser;
pub mod preprocess;
pub mod resolver;
pub mod shell;
pub mod signals;
pub mod syntax;
pub mod vars;
pub mod vm;

pub use alias::Aliases;
pub use arena::{Arena, ArenaError, Str};
pub use args::{Arg, Args, Op};
pub use expand::{ExpandError, Expander};
pub use lexer::{lex, LexError, Token};
pub use parser::{parse, ParseError};
pub use preprocess::{preprocess, Command, PreprocessError, TokenData};
pub use resolver::ExecutableResolver;
pub use shell::{Shell, ShellError, ShellState};
pub use syntax::{validate, SyntaxError};
pub use vars::Vars;
pub use vm::{CommandResult, Vm};
