//! statash - a Stata command interpreter
//!
//! Usage:
//!   statash              Start interactive REPL
//!   statash -c "cmd"     Execute a single command
//!   statash file.do      Execute a do-file

mod cli;
mod logging;
mod rcfile;
mod repl;
mod terminal;

use statash::signals::install_interrupt_handler;
use statash::{Config, Session};
use std::env;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let cli = cli::parse_args(&args);

    if cli.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }

    if cli.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    logging::init(&config.log_level, cli.trace);
    if let Some(e) = config_error {
        eprintln!("warning: {}; using defaults", e);
    }

    let mut session = Session::with_config(config);
    if session.config().linesize.is_none() {
        session.set_linesize(terminal::terminal_width());
    }
    if let Err(e) = install_interrupt_handler(&session.cancel_token()) {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
    }

    if let Some(cmd) = cli.command {
        return cli::execute_command(&mut session, &cmd);
    }

    if let Some(script) = cli.script {
        return cli::execute_script(&mut session, &script);
    }

    match repl::run_repl(session) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("REPL error: {}", e);
            ExitCode::FAILURE
        }
    }
}
