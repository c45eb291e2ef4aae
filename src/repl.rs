use opsh::{CommandResult, Shell};
use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper, Result as RlResult};
use std::process::ExitCode;

use crate::rcfile::load_rc;

/// Most PATH entries offered for one completion.
const MAX_PATH_COMPLETIONS: usize = 50;

/// Helper struct for rustyline with command and filename completion
struct OpshHelper {
    files: FilenameCompleter,
    builtins: Vec<&'static str>,
}

impl Helper for OpshHelper {}
impl Hinter for OpshHelper {
    type Hint = String;
}
impl Highlighter for OpshHelper {}
impl Validator for OpshHelper {}

impl Completer for OpshHelper {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, ctx: &Context<'_>) -> RlResult<(usize, Vec<Pair>)> {
        let start = line[..pos]
            .rfind(char::is_whitespace)
            .map(|i| i + 1)
            .unwrap_or(0);
        let prefix = &line[start..pos];

        // Command position: the first word, or the word after an operator.
        let before = line[..start].trim_end();
        let command_position =
            before.is_empty() || before.ends_with(&['|', ';', '&'][..]) || before.ends_with("then");
        if !command_position || prefix.is_empty() || prefix.contains('/') || prefix.starts_with('~') {
            return self.files.complete(line, pos, ctx);
        }

        let pairs = self
            .complete_command(prefix)
            .into_iter()
            .map(|c| Pair {
                display: c.clone(),
                replacement: c,
            })
            .collect();
        Ok((start, pairs))
    }
}

impl OpshHelper {
    fn complete_command(&self, prefix: &str) -> Vec<String> {
        let mut completions: Vec<String> = self
            .builtins
            .iter()
            .filter(|b| b.starts_with(prefix))
            .map(|b| b.to_string())
            .collect();

        let path = opsh::env::path_get();
        let mut found = 0;
        'outer: for dir in path.split(':').filter(|d| !d.is_empty()) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.filter_map(|e| e.ok()) {
                if let Some(name) = entry.file_name().to_str() {
                    if name.starts_with(prefix) {
                        completions.push(name.to_string());
                        found += 1;
                        if found >= MAX_PATH_COMPLETIONS {
                            break 'outer;
                        }
                    }
                }
            }
        }

        completions.sort();
        completions.dedup();
        completions
    }
}

/// `host:cwd opsh> `, with the home directory shown as `~`
fn prompt() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    let cwd = std::env::current_dir()
        .map(|d| d.display().to_string())
        .unwrap_or_else(|_| "?".to_string());
    let cwd = match opsh::env::home_get() {
        Some(home) => match cwd.strip_prefix(&home) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => format!("~{}", rest),
            _ => cwd,
        },
        None => cwd,
    };
    format!("{}:{} opsh> ", host, cwd)
}

/// Run the interactive loop until `exit` or end of input.
pub(crate) fn run_repl(norc: bool) -> RlResult<ExitCode> {
    let mut shell = Shell::new();
    if !norc && !load_rc(&mut shell) {
        return Ok(ExitCode::FAILURE);
    }

    let mut rl: Editor<OpshHelper, DefaultHistory> = Editor::new()?;
    rl.set_helper(Some(OpshHelper {
        files: FilenameCompleter::new(),
        builtins: shell.state.builtins.iter().map(|b| b.name).collect(),
    }));

    loop {
        match rl.readline(&prompt()) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);

                match shell.run_line(trimmed) {
                    Ok(CommandResult::Exit) => return Ok(ExitCode::SUCCESS),
                    Ok(CommandResult::ExitFailure) => return Ok(ExitCode::FAILURE),
                    Ok(result) => tracing::debug!(?result, code = result.code(), "line finished"),
                    Err(e) => {
                        eprintln!("opsh: {}", e);
                        return Ok(ExitCode::FAILURE);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl-C at the prompt drops the line
                continue;
            }
            Err(ReadlineError::Eof) => {
                return Ok(ExitCode::SUCCESS);
            }
            Err(e) => return Err(e),
        }
    }
}
