//! Builtin commands
//!
//! Builtins run inside the shell process. Each receives the staged argv
//! (command name included) and a writer for its output, which is either
//! standard output or the write end of the pipe its stage feeds.

use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use super::jobs;
use super::CommandResult;
use crate::env;
use crate::shell::ShellState;

pub type BuiltinFn = fn(&mut ShellState, &[&str], &mut dyn Write) -> CommandResult;

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub help: &'static str,
    pub func: BuiltinFn,
    pub enabled: bool,
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .finish()
    }
}

const fn builtin(name: &'static str, help: &'static str, func: BuiltinFn) -> Builtin {
    Builtin {
        name,
        help,
        func,
        enabled: true,
    }
}

const DEFAULT_BUILTINS: &[Builtin] = &[
    builtin("exit", "exit the shell", builtin_exit),
    builtin("quit", "exit the shell", builtin_exit),
    builtin("q", "exit the shell", builtin_exit),
    builtin("echo", "echo [-n] [args...]: write arguments to standard output", builtin_echo),
    builtin("cd", "cd [dir | -]: change the working directory", builtin_cd),
    builtin("pwd", "pwd: print the working directory", builtin_pwd),
    builtin("kill", "kill [-signal] pid...: send a signal (default TERM) to processes", builtin_kill),
    builtin("help", "help: list builtin commands", builtin_help),
    builtin("version", "version: print the shell version", builtin_version),
    builtin("alias", "alias [name=command | -p | rm name | delete]: manage aliases", builtin_alias),
    builtin("unalias", "unalias [-a | name...]: remove aliases", builtin_unalias),
    builtin("export", "export [NAME=value | NAME]: set an environment variable", builtin_export),
    builtin("unset", "unset NAME...: remove shell and environment variables", builtin_unset),
    builtin("jobs", "jobs: list background jobs", builtin_jobs),
    builtin("true", "true: succeed", builtin_true),
    builtin("false", "false: fail", builtin_false),
    builtin("enable", "enable [-a | name | -n name]: list, enable or disable builtins", builtin_enable),
    builtin("disable", "disable name...: disable builtins", builtin_disable),
];

/// Table of builtins, each of which can be switched off.
#[derive(Debug, Clone)]
pub struct Builtins {
    table: Vec<Builtin>,
}

impl Default for Builtins {
    fn default() -> Self {
        Self::new()
    }
}

impl Builtins {
    pub fn new() -> Self {
        Builtins {
            table: DEFAULT_BUILTINS.to_vec(),
        }
    }

    /// The enabled builtin called `name`, if any.
    pub fn find(&self, name: &str) -> Option<BuiltinFn> {
        self.table
            .iter()
            .find(|b| b.enabled && b.name == name)
            .map(|b| b.func)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.table.iter_mut().find(|b| b.name == name) {
            Some(b) => {
                b.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Builtin> {
        self.table.iter()
    }
}

/// Turn a write failure into a failed result, reporting it on stderr.
fn written(name: &str, result: std::io::Result<()>) -> CommandResult {
    match result {
        Ok(()) => CommandResult::SuccessContinue,
        Err(err) => {
            eprintln!("opsh: {}: write error: {}", name, err);
            CommandResult::FailedContinue
        }
    }
}

fn builtin_exit(_state: &mut ShellState, _args: &[&str], _out: &mut dyn Write) -> CommandResult {
    CommandResult::Exit
}

fn builtin_echo(_state: &mut ShellState, args: &[&str], out: &mut dyn Write) -> CommandResult {
    let (newline, words) = match args.get(1) {
        Some(&"-n") => (false, &args[2..]),
        _ => (true, args.get(1..).unwrap_or(&[])),
    };
    let mut line = words.join(" ");
    if newline {
        line.push('\n');
    }
    written("echo", out.write_all(line.as_bytes()))
}

fn builtin_cd(state: &mut ShellState, args: &[&str], out: &mut dyn Write) -> CommandResult {
    let target = match args.get(1) {
        None => match env::home_get() {
            Some(home) => PathBuf::from(home),
            None => {
                eprintln!("opsh: cd: HOME not set");
                return CommandResult::FailedContinue;
            }
        },
        Some(&"-") => match std::env::var("OLDPWD") {
            Ok(old) => {
                let _ = writeln!(out, "{}", old);
                PathBuf::from(old)
            }
            Err(_) => {
                eprintln!("opsh: cd: OLDPWD not set");
                return CommandResult::FailedContinue;
            }
        },
        Some(dir) => PathBuf::from(dir),
    };

    let previous = std::env::current_dir().ok();
    if let Err(err) = std::env::set_current_dir(&target) {
        eprintln!("opsh: cd: {}: {}", target.display(), err);
        return CommandResult::FailedContinue;
    }
    tracing::debug!(dir = %target.display(), "changed directory");

    let mut exports = Vec::new();
    if let Some(previous) = previous {
        exports.push(("OLDPWD", previous));
    }
    if let Ok(current) = std::env::current_dir() {
        exports.push(("PWD", current));
    }
    for (key, path) in exports {
        if let Some(path) = path.to_str() {
            if let Err(err) = state.env.export(key, path) {
                eprintln!("opsh: cd: {}", err);
                return CommandResult::ExitFailure;
            }
        }
    }
    CommandResult::SuccessContinue
}

fn builtin_pwd(_state: &mut ShellState, _args: &[&str], out: &mut dyn Write) -> CommandResult {
    match std::env::current_dir() {
        Ok(dir) => written("pwd", writeln!(out, "{}", dir.display())),
        Err(err) => {
            eprintln!("opsh: pwd: {}", err);
            CommandResult::FailedContinue
        }
    }
}

fn parse_signal(spec: &str) -> Option<Signal> {
    if let Ok(number) = spec.parse::<i32>() {
        return Signal::try_from(number).ok();
    }
    let upper = spec.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };
    Signal::from_str(&name).ok()
}

fn builtin_kill(_state: &mut ShellState, args: &[&str], _out: &mut dyn Write) -> CommandResult {
    let mut rest = args.get(1..).unwrap_or(&[]);
    let mut signal = Signal::SIGTERM;
    if let Some(spec) = rest.first().and_then(|a| a.strip_prefix('-')) {
        match parse_signal(spec) {
            Some(s) => signal = s,
            None => {
                eprintln!("opsh: kill: {}: invalid signal specification", spec);
                return CommandResult::FailedContinue;
            }
        }
        rest = &rest[1..];
    }
    if rest.is_empty() {
        eprintln!("opsh: kill: usage: kill [-signal] pid...");
        return CommandResult::FailedContinue;
    }

    let mut result = CommandResult::SuccessContinue;
    for pid in rest {
        match pid.parse::<i32>() {
            Ok(pid) if pid > 0 => {
                if let Err(err) = kill(Pid::from_raw(pid), signal) {
                    eprintln!("opsh: kill: ({}) - {}", pid, err);
                    result = CommandResult::FailedContinue;
                }
            }
            _ => {
                eprintln!("opsh: kill: {}: arguments must be process ids", pid);
                result = CommandResult::FailedContinue;
            }
        }
    }
    result
}

fn builtin_help(state: &mut ShellState, _args: &[&str], out: &mut dyn Write) -> CommandResult {
    let mut text = format!("opsh {}\n\nBuiltin commands:\n", env!("CARGO_PKG_VERSION"));
    for b in state.builtins.iter().filter(|b| b.enabled) {
        text.push_str(&format!("  {:<10} {}\n", b.name, b.help));
    }
    written("help", out.write_all(text.as_bytes()))
}

fn builtin_version(_state: &mut ShellState, _args: &[&str], out: &mut dyn Write) -> CommandResult {
    written("version", writeln!(out, "opsh {}", env!("CARGO_PKG_VERSION")))
}

fn builtin_alias(state: &mut ShellState, args: &[&str], out: &mut dyn Write) -> CommandResult {
    match args.get(1..).unwrap_or(&[]) {
        [] | ["-p"] => written("alias", state.aliases.print(out)),
        ["rm", names @ ..] if !names.is_empty() => remove_aliases(state, names),
        ["delete"] => {
            state.aliases.clear();
            CommandResult::SuccessContinue
        }
        definitions => {
            let definition = definitions.join(" ");
            match state.aliases.add(&definition) {
                Ok(()) => CommandResult::SuccessContinue,
                Err(err) => {
                    eprintln!("opsh: alias: {}", err);
                    CommandResult::FailedContinue
                }
            }
        }
    }
}

fn remove_aliases(state: &mut ShellState, names: &[&str]) -> CommandResult {
    let mut result = CommandResult::SuccessContinue;
    for name in names {
        if !state.aliases.remove(name) {
            eprintln!("opsh: unalias: {}: not found", name);
            result = CommandResult::FailedContinue;
        }
    }
    result
}

fn builtin_unalias(state: &mut ShellState, args: &[&str], _out: &mut dyn Write) -> CommandResult {
    match args.get(1..).unwrap_or(&[]) {
        [] => {
            eprintln!("opsh: unalias: usage: unalias [-a] name...");
            CommandResult::FailedContinue
        }
        ["-a"] => {
            state.aliases.clear();
            CommandResult::SuccessContinue
        }
        names => remove_aliases(state, names),
    }
}

fn builtin_export(state: &mut ShellState, args: &[&str], out: &mut dyn Write) -> CommandResult {
    let definitions = args.get(1..).unwrap_or(&[]);
    if definitions.is_empty() {
        let mut entries: Vec<_> = state.env.iter().collect();
        entries.sort_unstable();
        let text: String = entries
            .into_iter()
            .map(|(key, value)| format!("export {}={}\n", key, value))
            .collect();
        return written("export", out.write_all(text.as_bytes()));
    }

    for definition in definitions {
        let (key, value) = match definition.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => {
                let value = state.vars.get(definition).unwrap_or_default().to_string();
                (definition.to_string(), value)
            }
        };
        if key.is_empty() || key.contains(char::is_whitespace) {
            eprintln!("opsh: export: '{}': not a valid identifier", definition);
            return CommandResult::FailedContinue;
        }
        if let Err(err) = state.env.export(&key, &value) {
            eprintln!("opsh: export: {}", err);
            return CommandResult::ExitFailure;
        }
        if key == env::PATH {
            state.resolver.sync();
        }
    }
    CommandResult::SuccessContinue
}

fn builtin_unset(state: &mut ShellState, args: &[&str], _out: &mut dyn Write) -> CommandResult {
    for name in args.get(1..).unwrap_or(&[]) {
        state.vars.remove(name);
        state.env.unset(name);
    }
    CommandResult::SuccessContinue
}

fn builtin_jobs(state: &mut ShellState, _args: &[&str], out: &mut dyn Write) -> CommandResult {
    let mut text = String::new();
    for (job, status) in state.jobs.reap() {
        text.push_str(&jobs::describe(&job, status));
        text.push('\n');
    }
    let mut listing = Vec::new();
    let listed = state.jobs.print(&mut listing);
    text.push_str(&String::from_utf8_lossy(&listing));
    written("jobs", listed.and_then(|()| out.write_all(text.as_bytes())))
}

fn builtin_true(_state: &mut ShellState, _args: &[&str], _out: &mut dyn Write) -> CommandResult {
    CommandResult::SuccessContinue
}

fn builtin_false(_state: &mut ShellState, _args: &[&str], _out: &mut dyn Write) -> CommandResult {
    CommandResult::Failed(1)
}

fn set_builtins(state: &mut ShellState, names: &[&str], enabled: bool, caller: &str) -> CommandResult {
    let mut result = CommandResult::SuccessContinue;
    for name in names {
        if !state.builtins.set_enabled(name, enabled) {
            eprintln!("opsh: {}: {}: not a shell builtin", caller, name);
            result = CommandResult::FailedContinue;
        }
    }
    result
}

fn builtin_enable(state: &mut ShellState, args: &[&str], out: &mut dyn Write) -> CommandResult {
    match args.get(1..).unwrap_or(&[]) {
        [] | ["-a"] => {
            let text: String = state
                .builtins
                .iter()
                .map(|b| {
                    let flag = if b.enabled { "" } else { "-n " };
                    format!("enable {}{}\n", flag, b.name)
                })
                .collect();
            written("enable", out.write_all(text.as_bytes()))
        }
        ["-n", names @ ..] => set_builtins(state, names, false, "enable"),
        names => set_builtins(state, names, true, "enable"),
    }
}

fn builtin_disable(state: &mut ShellState, args: &[&str], _out: &mut dyn Write) -> CommandResult {
    set_builtins(state, args.get(1..).unwrap_or(&[]), false, "disable")
}
