use crate::terminal::{execute_line, print_rendered, report_error};
use statash::Session;
use std::path::Path;
use std::process::ExitCode;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parsed command-line arguments
pub(crate) struct CliArgs {
    pub(crate) command: Option<String>,
    pub(crate) script: Option<String>,
    pub(crate) help: bool,
    pub(crate) version: bool,
    pub(crate) trace: bool,
}

/// Parse command-line arguments
pub(crate) fn parse_args(args: &[String]) -> CliArgs {
    let mut cli = CliArgs {
        command: None,
        script: None,
        help: false,
        version: false,
        trace: false,
    };

    let mut i = 1; // Skip program name
    while i < args.len() {
        match args[i].as_str() {
            "--trace" => {
                cli.trace = true;
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
                if !path.starts_with('-') {
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
        r#"statash {} - a Stata command interpreter

USAGE:
    statash                 Start interactive REPL
    statash -c <command>    Execute a single command
    statash <file.do>       Execute a do-file
    statash --trace         Log interpreter activity to stderr
    statash --help          Show this help message
    statash --version       Show version

STARTUP:
    ~/.statash/config.toml  Settings (or $STATASH_CONFIG)
    ~/.statash/profile.do   Executed on REPL startup (if exists)
    STATASH_LOG             Log filter, e.g. STATASH_LOG=debug
    STATASH_LINESIZE        Output width
    STATASH_DO_POLICY       abort | continue

EXAMPLES:
    statash -c "use auto, clear"
    statash analysis.do"#,
        VERSION
    );
}

pub(crate) fn print_version() {
    println!("statash {}", VERSION);
}

/// Execute a single command line
pub(crate) fn execute_command(session: &mut Session, cmd: &str) -> ExitCode {
    match execute_line(session, cmd) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(report_error(&e)),
    }
}

/// Execute a do-file, stopping at the first failing line unless the
/// configured policy says otherwise
pub(crate) fn execute_script(session: &mut Session, path: &str) -> ExitCode {
    match session.run_file(Path::new(path), false) {
        Ok(output) => {
            print_rendered(&session.render(&output));
            ExitCode::SUCCESS
        }
        Err(e) => ExitCode::from(report_error(&e)),
    }
}
