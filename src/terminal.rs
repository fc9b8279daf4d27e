use statash::{exit_code, CommandError, Session};

/// Execute a single command line, printing its output
pub(crate) fn execute_line(session: &mut Session, input: &str) -> Result<(), CommandError> {
    let output = session.execute(input)?;
    print_rendered(&session.render(&output));
    Ok(())
}

/// Print anything a failed do-file showed before the error, then the
/// error itself
pub(crate) fn report_error(error: &CommandError) -> u8 {
    if let Some(transcript) = &error.transcript {
        print_rendered(transcript);
    }
    eprintln!("{}", error.report());
    exit_code(error)
}

pub(crate) fn print_rendered(text: &str) {
    if !text.is_empty() {
        println!("{}", text);
    }
}

/// Get terminal width, defaulting to 80
pub(crate) fn terminal_width() -> usize {
    terminal_size::terminal_size()
        .map(|(w, _)| w.0 as usize)
        .unwrap_or(80)
}
