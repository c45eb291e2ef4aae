use opsh::{CommandResult, Shell};
use std::fs;
use std::process::ExitCode;

use crate::rcfile::load_rc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parsed command-line arguments
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct CliArgs {
    pub(crate) command: Option<String>,
    pub(crate) script: Option<String>,
    pub(crate) help: bool,
    pub(crate) version: bool,
    pub(crate) norc: bool,
}

/// Parse command-line arguments
pub(crate) fn parse_args(args: &[String]) -> CliArgs {
    let mut cli = CliArgs::default();

    let mut i = 1; // Skip program name
    while i < args.len() {
        match args[i].as_str() {
            "--norc" => {
                cli.norc = true;
            }
            "-c" => {
                // Everything after -c is the command
                if i + 1 < args.len() {
                    cli.command = Some(args[i + 1..].join(" "));
                    break;
                }
            }
            "--help" | "-h" => {
                cli.help = true;
            }
            "--version" | "-V" => {
                cli.version = true;
            }
            path => {
                if !path.starts_with('-') && cli.script.is_none() {
                    cli.script = Some(path.to_string());
                }
            }
        }
        i += 1;
    }

    cli
}

pub(crate) fn print_help() {
    println!(
        r#"opsh {} - an opcode shell

USAGE:
    opsh                    Start interactive shell
    opsh -c <command...>    Run one command line and exit with its status
    opsh <script>           Run each line of a script file
    opsh --norc             Do not load the rc file
    opsh --help             Show this help message
    opsh --version          Show version

STARTUP:
    $XDG_CONFIG_HOME/opsh/opshrc (or ~/.config/opsh/opshrc) is loaded first:
        PATH+=/some/dir     Append a directory to PATH
        ALIAS name=command  Define an alias
        NAME=value          Set a shell variable
    OPSH_HOME               Directory used for ~ expansion (default $HOME)
    OPSH_LOG                Log filter, e.g. OPSH_LOG=debug (default warn)

SYNTAX:
    a | b | c               Pipeline
    > >> < << 2> 2>> &> &>> Redirections
    a && b, a || b, a; b    Conditional and sequential execution
    cmd &                   Run in the background
    NAME=value cmd          Bind a variable before the command
    $NAME ~ *.txt           Variable, home and glob expansion
    $( 1 + 2 * 3 )          Integer arithmetic: + - * / % **
    if [ a -eq b ]; then ...; elif [ ... ]; then ...; else ...; fi
                            Comparisons: -eq -ne -lt -le -gt -ge

Type 'help' inside the shell for the builtin commands."#,
        VERSION
    );
}

pub(crate) fn print_version() {
    println!("opsh {}", VERSION);
}

fn new_shell(norc: bool) -> Result<Shell, ExitCode> {
    let mut shell = Shell::new();
    if !norc && !load_rc(&mut shell) {
        return Err(ExitCode::FAILURE);
    }
    Ok(shell)
}

fn exit_code(result: CommandResult) -> ExitCode {
    ExitCode::from(result.exit_status().clamp(0, 255) as u8)
}

/// Run a single command line
pub(crate) fn execute_command(cmd: &str, norc: bool) -> ExitCode {
    let mut shell = match new_shell(norc) {
        Ok(shell) => shell,
        Err(code) => return code,
    };

    match shell.run_line(cmd) {
        Ok(result) => exit_code(result),
        Err(e) => {
            eprintln!("opsh: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Execute a script file
pub(crate) fn execute_script(path: &str, norc: bool) -> ExitCode {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("opsh: could not read {}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let mut shell = match new_shell(norc) {
        Ok(shell) => shell,
        Err(code) => return code,
    };

    match shell.run_lines(&content) {
        Ok(result) => exit_code(result),
        Err(e) => {
            eprintln!("opsh: {}", e);
            ExitCode::FAILURE
        }
    }
}
