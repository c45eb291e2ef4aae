//! User defined command aliases.
//!
//! An alias replaces the first word of a line verbatim. Bodies containing
//! whitespace are stored and substituted as a single word; they are not
//! split back into separate arguments.

use std::io::{self, Write};

use thiserror::Error;

use crate::arena::ArenaError;
use crate::vars::Vars;

pub const MAX_ALIASES: usize = 100;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AliasError {
    #[error("could not process alias '{0}': expected name=command")]
    Malformed(String),
    #[error("alias limit of {} reached", MAX_ALIASES)]
    Full,
    #[error(transparent)]
    Arena(#[from] ArenaError),
}

#[derive(Debug, Default)]
pub struct Aliases {
    table: Vars,
}

impl Aliases {
    pub fn new() -> Self {
        Aliases { table: Vars::new() }
    }

    /// The command `word` stands for, if it is an alias.
    pub fn check(&self, word: &str) -> Option<&str> {
        if word.is_empty() {
            return None;
        }
        self.table.get(word)
    }

    /// Add an alias from a `name=command` definition.
    pub fn add(&mut self, definition: &str) -> Result<(), AliasError> {
        match definition.split_once('=') {
            Some((name, command)) if !name.is_empty() && !command.is_empty() => {
                self.add_pair(name.trim(), command.trim())
            }
            _ => Err(AliasError::Malformed(definition.to_string())),
        }
    }

    pub fn add_pair(&mut self, name: &str, command: &str) -> Result<(), AliasError> {
        if !self.table.contains(name) && self.table.len() >= MAX_ALIASES {
            return Err(AliasError::Full);
        }
        tracing::debug!(name, command, "adding alias");
        self.table.set(name, command)?;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.table.remove(name)
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Write every alias as `alias name=command`, sorted by name.
    pub fn print(&self, out: &mut dyn Write) -> io::Result<()> {
        let mut entries: Vec<_> = self.table.iter().collect();
        entries.sort_unstable();
        for (name, command) in entries {
            writeln!(out, "alias {}={}", name, command)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_check() {
        let mut aliases = Aliases::new();
        aliases.add("ll=ls -l").unwrap();
        assert_eq!(aliases.check("ll"), Some("ls -l"));
        assert_eq!(aliases.check("ls"), None);
        assert_eq!(aliases.check(""), None);
    }

    #[test]
    fn malformed_definitions_rejected() {
        let mut aliases = Aliases::new();
        assert!(matches!(aliases.add("=ls"), Err(AliasError::Malformed(_))));
        assert!(matches!(aliases.add("ll="), Err(AliasError::Malformed(_))));
        assert!(matches!(aliases.add("ll"), Err(AliasError::Malformed(_))));
        assert!(aliases.is_empty());
    }

    #[test]
    fn limit_enforced() {
        let mut aliases = Aliases::new();
        for i in 0..MAX_ALIASES {
            aliases.add_pair(&format!("a{i}"), "ls").unwrap();
        }
        assert_eq!(aliases.add_pair("one_more", "ls"), Err(AliasError::Full));
        aliases.add_pair("a0", "pwd").unwrap();
        assert_eq!(aliases.check("a0"), Some("pwd"));
    }

    #[test]
    fn print_is_sorted() {
        let mut aliases = Aliases::new();
        aliases.add("zz=pwd").unwrap();
        aliases.add("aa=ls").unwrap();
        let mut out = Vec::new();
        aliases.print(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "alias aa=ls\nalias zz=pwd\n");
    }

    #[test]
    fn remove_and_clear() {
        let mut aliases = Aliases::new();
        aliases.add("g=git").unwrap();
        aliases.add("v=vim").unwrap();
        assert!(aliases.remove("g"));
        assert_eq!(aliases.len(), 1);
        aliases.clear();
        assert!(aliases.is_empty());
    }
}
