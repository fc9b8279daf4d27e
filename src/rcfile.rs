use statash::config::home_dir;
use statash::script::logical_lines;
use statash::Session;
use std::fs;

/// Run `~/.statash/profile.do` if it exists. Output is discarded and a
/// failing line is reported as a warning without stopping the profile.
pub(crate) fn load_profile(session: &mut Session) {
    let path = match home_dir() {
        Some(dir) => dir.join("profile.do"),
        None => return,
    };

    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return,
    };

    tracing::info!(path = %path.display(), "running profile");
    for line in logical_lines(&content) {
        if let Err(e) = session.execute(&line.text) {
            eprintln!("Warning: {} line {}: {} r({});", path.display(), line.number, e, e.code);
        }
    }
}
