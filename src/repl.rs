use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Editor, Helper, Result as RlResult};
use statash::script::{continues, logical_lines};
use statash::{CommandError, Session, Verb};

use crate::rcfile::load_profile;
use crate::terminal::{execute_line, report_error};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Words that may come before the command name
const PREFIXES: &[&str] = &["by", "bysort", "quietly", "capture", "eststo"];

// ============================================
// StatashHelper: completion of command and variable names
// ============================================

struct StatashHelper {
    verbs: Vec<&'static str>,
    /// Variables in memory, refreshed before each prompt
    variables: Vec<String>,
}

impl Helper for StatashHelper {}

impl Completer for StatashHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let start = line[..pos]
            .rfind(|c: char| c.is_whitespace() || c == ':' || c == '(' || c == ',')
            .map(|i| i + 1)
            .unwrap_or(0);
        let prefix = &line[start..pos];
        if prefix.is_empty() {
            return Ok((start, Vec::new()));
        }

        let completions = if is_command_position(&line[..start]) {
            self.complete_verb(prefix)
        } else {
            self.complete_variable(prefix)
        };

        let pairs = completions
            .into_iter()
            .map(|c| Pair { display: c.clone(), replacement: c })
            .collect();
        Ok((start, pairs))
    }
}

impl StatashHelper {
    fn complete_verb(&self, prefix: &str) -> Vec<String> {
        let mut found: Vec<String> = self
            .verbs
            .iter()
            .chain(PREFIXES)
            .filter(|v| v.starts_with(prefix))
            .map(|v| v.to_string())
            .collect();
        found.sort();
        found.dedup();
        found
    }

    fn complete_variable(&self, prefix: &str) -> Vec<String> {
        self.variables
            .iter()
            .filter(|v| v.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// True when the word being typed is the command name: nothing before it,
/// a prefix ending in `:`, or a bare `quietly`/`capture`
fn is_command_position(before: &str) -> bool {
    let before = before.trim_end();
    before.ends_with(':')
        || before
            .split_whitespace()
            .all(|w| matches!(w, "quietly" | "qui" | "capture" | "cap"))
}

impl Hinter for StatashHelper {
    type Hint = String;
}

impl Highlighter for StatashHelper {}

impl Validator for StatashHelper {}

// ============================================
// REPL main loop
// ============================================

/// `exit` leaves the REPL, refusing while the data has unsaved changes
/// unless `clear` is given
fn exit_request(line: &str) -> Option<bool> {
    let line = line.trim();
    let rest = line.strip_prefix("exit")?;
    let rest = rest.trim();
    if rest.is_empty() {
        return Some(false);
    }
    let options = rest.strip_prefix(',')?.trim();
    Some(options == "clear")
}

pub(crate) fn run_repl(mut session: Session) -> RlResult<()> {
    let mut rl = Editor::new()?;
    rl.set_helper(Some(StatashHelper {
        verbs: Verb::all_names().collect(),
        variables: Vec::new(),
    }));

    load_profile(&mut session);

    let history_path = session.config().history_path();
    if let Some(ref path) = history_path {
        let _ = rl.load_history(path);
    }

    if std::env::var("STATASH_BANNER").is_ok() {
        println!("statash {} - Stata command interpreter", VERSION);
        println!("  Type 'exit' or Ctrl-D to quit");
    }

    // Physical lines of a command continued with `///`
    let mut pending = String::new();

    loop {
        if let Some(helper) = rl.helper_mut() {
            helper.variables = session.data().names().map(str::to_string).collect();
        }

        let prompt = if pending.is_empty() { ". " } else { "> " };
        match rl.readline(prompt) {
            Ok(line) => {
                if !pending.is_empty() {
                    pending.push('\n');
                }
                pending.push_str(&line);
                if continues(&line) {
                    continue;
                }
                let input = std::mem::take(&mut pending);
                if input.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input.as_str());

                if let Some(clear) = exit_request(&input) {
                    if clear || !session.data().is_changed() {
                        break;
                    }
                    report_error(&CommandError::data_changed());
                    continue;
                }

                for command in logical_lines(&input) {
                    if let Err(e) = execute_line(&mut session, &command.text) {
                        report_error(&e);
                        break;
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                pending.clear();
                println!("--Break--");
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    if let Some(ref path) = history_path {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        if let Err(e) = rl.save_history(path) {
            tracing::warn!(error = %e, "could not save history");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_position_follows_prefixes() {
        assert!(is_command_position(""));
        assert!(is_command_position("quietly: "));
        assert!(is_command_position("by g: "));
        assert!(is_command_position("capture "));
        assert!(!is_command_position("summarize "));
    }

    #[test]
    fn exit_needs_clear_to_discard() {
        assert_eq!(exit_request("exit"), Some(false));
        assert_eq!(exit_request("exit, clear"), Some(true));
        assert_eq!(exit_request("exits"), None);
        assert_eq!(exit_request("summarize"), None);
    }

    #[test]
    fn completes_verbs_then_variables() {
        let helper = StatashHelper {
            verbs: vec!["summarize", "sort", "regress"],
            variables: vec!["price".to_string(), "mpg".to_string()],
        };
        assert_eq!(helper.complete_verb("s"), vec!["sort", "summarize"]);
        assert_eq!(helper.complete_variable("pr"), vec!["price"]);
    }
}
