//! rc file loading.
//!
//! The rc file lives at `<config home>/opsh/opshrc` and holds one setting
//! per line:
//!
//! ```text
//! # comments and blank lines are skipped
//! PATH+=/opt/tools/bin
//! ALIAS ll=ls -l
//! EDITOR=vim
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1, take_while},
    character::complete::{char, satisfy, space1},
    combinator::{all_consuming, map, recognize, rest, verify},
    sequence::{pair, preceded, separated_pair},
    IResult,
};
use thiserror::Error;

use crate::alias::AliasError;
use crate::arena::ArenaError;
use crate::env;
use crate::shell::ShellState;

pub const CONFIG_DIR: &str = "opsh";
pub const RC_FILE: &str = "opshrc";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("expected PATH+=dir, ALIAS name=command or NAME=value, found '{0}'")]
    Malformed(String),
    #[error(transparent)]
    Alias(AliasError),
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<AliasError> for ConfigError {
    fn from(err: AliasError) -> Self {
        match err {
            AliasError::Arena(err) => ConfigError::Arena(err),
            other => ConfigError::Alias(other),
        }
    }
}

/// One rc file setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry<'a> {
    PathAppend(&'a str),
    Alias { name: &'a str, command: &'a str },
    Assignment { name: &'a str, value: &'a str },
}

/// `<config home>/opsh`
pub fn config_dir() -> Option<PathBuf> {
    env::config_home_get().map(|home| home.join(CONFIG_DIR))
}

pub fn rc_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(RC_FILE))
}

fn name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

fn value(input: &str) -> IResult<&str, &str> {
    map(rest, unquote)(input)
}

fn path_append(input: &str) -> IResult<&str, Entry<'_>> {
    map(
        preceded(tag("PATH+="), verify(value, |dir: &str| !dir.is_empty())),
        Entry::PathAppend,
    )(input)
}

fn alias(input: &str) -> IResult<&str, Entry<'_>> {
    map(
        preceded(
            pair(alt((tag("ALIAS"), tag("alias"))), space1),
            separated_pair(
                map(take_till1(|c: char| c == '=' || c.is_whitespace()), str::trim),
                char('='),
                verify(value, |command: &str| !command.is_empty()),
            ),
        ),
        |(name, command)| Entry::Alias { name, command },
    )(input)
}

fn assignment(input: &str) -> IResult<&str, Entry<'_>> {
    map(separated_pair(name, char('='), value), |(name, value)| {
        Entry::Assignment { name, value }
    })(input)
}

/// Parse one line. Blank lines and comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Entry<'_>>, ConfigError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    all_consuming(alt((path_append, alias, assignment)))(line)
        .map(|(_, entry)| Some(entry))
        .map_err(|_| ConfigError::Malformed(line.to_string()))
}

pub fn apply(state: &mut ShellState, entry: Entry<'_>) -> Result<(), ConfigError> {
    match entry {
        Entry::PathAppend(dir) => {
            let path = env::path_get();
            let path = if path.is_empty() {
                dir.to_string()
            } else {
                format!("{}:{}", path, dir)
            };
            state.env.export(env::PATH, &path)?;
            state.resolver.sync();
            tracing::debug!(dir, "added to PATH");
        }
        Entry::Alias { name, command } => state.aliases.add_pair(name, command)?,
        Entry::Assignment { name, value } => state.vars.set(name, value)?,
    }
    Ok(())
}

/// Apply every setting in `content`. Bad lines are reported as warnings
/// naming `source` and skipped; only arena exhaustion stops the load.
/// Returns the number of settings applied.
pub fn load_str(state: &mut ShellState, source: &str, content: &str) -> Result<usize, ArenaError> {
    let mut applied = 0;
    for (number, line) in content.lines().enumerate() {
        let result = parse_line(line).and_then(|entry| match entry {
            Some(entry) => apply(state, entry).map(|()| true),
            None => Ok(false),
        });
        match result {
            Ok(true) => applied += 1,
            Ok(false) => {}
            Err(ConfigError::Arena(err)) => return Err(err),
            Err(err) => eprintln!("Warning: {} line {}: {}", source, number + 1, err),
        }
    }
    tracing::debug!(source, applied, "loaded settings");
    Ok(applied)
}

pub fn load_file(state: &mut ShellState, path: &Path) -> Result<usize, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(load_str(state, &path.display().to_string(), &content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_each_kind_of_line() {
        assert_eq!(parse_line("PATH+=/opt/bin").unwrap(), Some(Entry::PathAppend("/opt/bin")));
        assert_eq!(
            parse_line("ALIAS ll=ls -l").unwrap(),
            Some(Entry::Alias {
                name: "ll",
                command: "ls -l"
            })
        );
        assert_eq!(
            parse_line("alias g=git").unwrap(),
            Some(Entry::Alias {
                name: "g",
                command: "git"
            })
        );
        assert_eq!(
            parse_line("EDITOR=\"vim -u NONE\"").unwrap(),
            Some(Entry::Assignment {
                name: "EDITOR",
                value: "vim -u NONE"
            })
        );
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("   # a comment").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(parse_line("PATH+="), Err(ConfigError::Malformed(_))));
        assert!(matches!(parse_line("ALIAS ll"), Err(ConfigError::Malformed(_))));
        assert!(matches!(parse_line("just words"), Err(ConfigError::Malformed(_))));
        assert!(matches!(parse_line("1X=2"), Err(ConfigError::Malformed(_))));
    }

    #[test]
    fn load_applies_good_lines_and_skips_bad_ones() {
        let mut state = ShellState::new();
        let content = "# settings\nALIAS ll=ls -l\nnot a setting\nGREETING=hi\n";
        assert_eq!(load_str(&mut state, "test", content).unwrap(), 2);
        assert_eq!(state.aliases.check("ll"), Some("ls -l"));
        assert_eq!(state.vars.get("GREETING"), Some("hi"));
    }

    #[test]
    fn load_file_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alias k=kubectl").unwrap();
        let mut state = ShellState::new();
        assert_eq!(load_file(&mut state, file.path()).unwrap(), 1);
        assert_eq!(state.aliases.check("k"), Some("kubectl"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = ShellState::new();
        let err = load_file(&mut state, &dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
