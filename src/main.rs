//! opsh - an opcode shell
//!
//! Usage:
//!   opsh              Start interactive shell
//!   opsh -c "cmd"     Execute a single command line
//!   opsh script.sh    Execute a script file

mod cli;
mod rcfile;
mod repl;

use std::env;
use std::process::ExitCode;

use cli::{execute_command, execute_script, parse_args, print_help, print_version};
use tracing_subscriber::EnvFilter;

/// Log filter variable, e.g. `OPSH_LOG=opsh=debug`
const LOG_ENV: &str = "OPSH_LOG";

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_logging();

    if let Err(e) = ctrlc::set_handler(|| {
        opsh::signals::interrupt_foreground();
    }) {
        tracing::warn!(%e, "could not install SIGINT handler");
    }
    opsh::signals::setup_signal_handlers();

    let args: Vec<String> = env::args().collect();
    let cli = parse_args(&args);

    if cli.help {
        print_help();
        return ExitCode::SUCCESS;
    }

    if cli.version {
        print_version();
        return ExitCode::SUCCESS;
    }

    if let Some(cmd) = cli.command {
        return execute_command(&cmd, cli.norc);
    }

    if let Some(script) = cli.script {
        return execute_script(&script, cli.norc);
    }

    match repl::run_repl(cli.norc) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("opsh: line editor error: {}", e);
            ExitCode::FAILURE
        }
    }
}
