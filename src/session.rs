//! The interpreter session
//!
//! A `Session` owns the dataset, the estimation results and the backends.
//! Every command line goes through [`Session::execute`], which peels off
//! the prefixes (`quietly`, `capture`, `eststo:`, `by:`), snapshots the
//! stores when the command may change them, dispatches, and restores the
//! snapshot if the command fails or is interrupted.

use crate::backend::BackendRegistry;
use crate::codec::CodecRegistry;
use crate::command::{parse_line, Line, Prefix};
use crate::config::{Config, DoPolicy};
use crate::dataset::Dataset;
use crate::dispatch::Verb;
use crate::display::{render, Output};
use crate::error::{CommandError, ErrorKind};
use crate::plot::{JsonPlotBackend, NullPlotBackend, PlotBackend, PlotSpec};
use crate::results::ResultStore;
use crate::script::logical_lines;
use crate::signals::CancelToken;
use std::path::Path;

const DEFAULT_LINESIZE: usize = 80;

pub struct Session {
    pub(crate) data: Dataset,
    pub(crate) results: ResultStore,
    pub(crate) backends: BackendRegistry,
    pub(crate) codecs: CodecRegistry,
    pub(crate) plots: Box<dyn PlotBackend>,
    /// Most recent graph, for `graph export`
    pub(crate) last_graph: Option<PlotSpec>,
    pub(crate) config: Config,
    pub(crate) cancel: CancelToken,
    /// File the data came from, for `save` without a name
    pub(crate) source: Option<String>,
    do_depth: usize,
}

/// Stores as they were before a command, restored if it fails
struct Snapshot {
    data: Dataset,
    results: ResultStore,
    source: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A session with default settings that discards graphs
    pub fn new() -> Self {
        Session {
            data: Dataset::new(),
            results: ResultStore::new(),
            backends: BackendRegistry::with_builtins(),
            codecs: CodecRegistry::with_builtins(),
            plots: Box::new(NullPlotBackend),
            last_graph: None,
            config: Config::default(),
            cancel: CancelToken::new(),
            source: None,
            do_depth: 0,
        }
    }

    /// A session that writes graphs to `config.graph_dir`
    pub fn with_config(config: Config) -> Self {
        let plots = Box::new(JsonPlotBackend::new(config.graph_dir.clone()));
        Session { plots, config, ..Self::new() }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data(&self) -> &Dataset {
        &self.data
    }

    /// Replace the dataset, e.g. one built in memory
    pub fn set_data(&mut self, data: Dataset) {
        self.data = data;
        self.source = None;
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    pub fn backends_mut(&mut self) -> &mut BackendRegistry {
        &mut self.backends
    }

    pub fn codecs_mut(&mut self) -> &mut CodecRegistry {
        &mut self.codecs
    }

    pub fn set_plot_backend(&mut self, backend: Box<dyn PlotBackend>) {
        self.plots = backend;
    }

    /// Token that interrupts the running command when cancelled
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn linesize(&self) -> usize {
        self.config.linesize.unwrap_or(DEFAULT_LINESIZE)
    }

    pub fn set_linesize(&mut self, columns: usize) {
        self.config.linesize = Some(columns.max(20));
    }

    /// Render an output block at the session's line width
    pub fn render(&self, output: &Output) -> String {
        render(output, self.linesize())
    }

    /// Run one command line
    pub fn execute(&mut self, line: &str) -> Result<Output, CommandError> {
        if self.do_depth == 0 && self.cancel.reset() {
            tracing::debug!("cleared stale interrupt");
        }
        let parsed = parse_line(line)?;
        let span = tracing::info_span!("command", verb = %parsed.command.verb);
        let _guard = span.enter();
        self.run_line(&parsed)
    }

    fn run_line(&mut self, line: &Line) -> Result<Output, CommandError> {
        let mut quietly = false;
        let mut capture = false;
        let mut store: Option<Option<&str>> = None;
        let mut by: Option<&Prefix> = None;
        for prefix in &line.prefixes {
            match prefix {
                Prefix::Quietly => quietly = true,
                Prefix::Capture => capture = true,
                Prefix::EstStore { name } => store = Some(name.as_deref()),
                Prefix::By { .. } => by = Some(prefix),
            }
        }

        let verb = Verb::resolve(&line.command.verb);
        if store.is_some() && !verb.is_some_and(Verb::is_estimation) {
            let err = CommandError::parse(format!("eststo: {} is not an estimation command", line.command.verb))
                .with_fragment(line.command.verb.clone());
            return self.finish(Err(err), capture);
        }
        let sorts = matches!(by, Some(Prefix::By { sort: true, .. }));
        let snapshot = (verb.is_some_and(|v| v.spec().mutates) || store.is_some() || sorts).then(|| Snapshot {
            data: self.data.clone(),
            results: self.results.clone(),
            source: self.source.clone(),
        });

        let mut result = self.dispatch(&line.command, by);
        if let (true, Some(name)) = (result.is_ok(), store) {
            result = match self.results.store(name) {
                Ok(stored) if name.is_none() => {
                    result.map(|out| out.then(Output::text(format!("({} stored)", stored))))
                }
                Ok(_) => result,
                Err(e) => Err(e.into()),
            };
        }
        if result.is_err() {
            if let Some(snapshot) = snapshot {
                self.data = snapshot.data;
                self.results = snapshot.results;
                self.source = snapshot.source;
                tracing::debug!("rolled back failed command");
            }
        }
        let result = if quietly { result.map(|_| Output::None) } else { result };
        self.finish(result, capture)
    }

    /// `capture` swallows output and errors, but not an interruption
    fn finish(&self, result: Result<Output, CommandError>, capture: bool) -> Result<Output, CommandError> {
        match result {
            Err(e) if e.kind == ErrorKind::Interrupted => Err(e),
            Err(e) if capture => {
                tracing::debug!(code = e.code, "captured error");
                Ok(Output::None)
            }
            Ok(_) if capture => Ok(Output::None),
            other => other,
        }
    }

    /// Run a do-file. Lines echo as `. command` followed by their output.
    /// A failing line stops the file unless `nostop` is given or the
    /// configured policy is to continue.
    pub fn run_file(&mut self, path: &Path, nostop: bool) -> Result<Output, CommandError> {
        if self.do_depth >= self.config.max_do_depth {
            return Err(CommandError::state(format!(
                "do-files nested too deeply (max_do_depth {})",
                self.config.max_do_depth
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            CommandError::from(e).with_fragment(path.display().to_string())
        })?;
        tracing::info!(path = %path.display(), depth = self.do_depth, "running do-file");

        self.do_depth += 1;
        let result = self.run_script(&text, path, nostop || self.config.do_policy == DoPolicy::Continue);
        self.do_depth -= 1;
        result
    }

    fn run_script(&mut self, text: &str, path: &Path, keep_going: bool) -> Result<Output, CommandError> {
        let mut transcript = Output::None;
        for line in logical_lines(text) {
            if let Err(e) = self.check_cancel() {
                return Err(e.with_transcript(self.render(&transcript)));
            }
            transcript = transcript.then(Output::text(format!(". {}", line.text)));
            match self.execute(&line.text) {
                Ok(out) => transcript = transcript.then(out),
                Err(e) if keep_going && e.kind != ErrorKind::Interrupted => {
                    tracing::warn!(line = line.number, code = e.code, "do-file line failed, continuing");
                    if let Some(inner) = &e.transcript {
                        transcript = transcript.then(Output::text(inner.clone()));
                    }
                    transcript = transcript.then(Output::text(e.report()));
                }
                Err(e) => {
                    let mut shown = self.render(&transcript);
                    if let Some(inner) = &e.transcript {
                        if !inner.is_empty() {
                            shown = if shown.is_empty() { inner.clone() } else { format!("{}\n{}", shown, inner) };
                        }
                    }
                    let message = format!("{}\n(error at line {} of {})", e.message, line.number, path.display());
                    tracing::warn!(line = line.number, code = e.code, "do-file aborted");
                    return Err(CommandError { message, ..e }.with_transcript(shown));
                }
            }
        }
        Ok(transcript)
    }
}

/// Process exit status for a failed command: its return code, wrapped
/// into a byte and never zero
pub fn exit_code(error: &CommandError) -> u8 {
    match (error.code % 256) as u8 {
        0 => 1,
        code => code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Variable;
    use tempfile::TempDir;

    fn session() -> Session {
        let mut s = Session::new();
        s.set_data(
            Dataset::from_variables(vec![
                Variable::numeric("x", vec![Some(1.0), None, Some(3.0), Some(4.0), Some(5.0)]),
                Variable::numeric("y", vec![Some(2.0), Some(4.0), Some(7.0), Some(7.0), Some(11.0)]),
            ])
            .unwrap(),
        );
        s
    }

    #[test]
    fn failed_commands_leave_the_stores_alone() {
        let mut s = session();
        s.execute("quietly regress y x").unwrap();
        let (data, results) = (s.data().clone(), s.results().clone());
        assert!(s.execute("generate z = nosuchvar + 1").is_err());
        assert!(s.execute("replace x = \"text\"").is_err());
        assert!(s.execute("regress y nosuch").is_err());
        assert_eq!(s.data(), &data);
        assert_eq!(s.results(), &results);
    }

    #[test]
    fn quietly_and_capture() {
        let mut s = session();
        assert!(s.execute("quietly summarize x").unwrap().is_none());
        assert!(s.execute("capture frobnicate").unwrap().is_none());
        assert!(s.execute("capture drop nosuch").unwrap().is_none());
        assert_eq!(s.execute("frobnicate").unwrap_err().code, 199);
    }

    #[test]
    fn capture_does_not_hide_interrupts() {
        let mut s = session();
        s.cancel_token().cancel();
        // the stale flag from the prompt is cleared first
        assert!(s.execute("capture summarize x").is_ok());
        let err = s.finish(Err(CommandError::interrupted()), true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Interrupted);
    }

    #[test]
    fn eststo_prefix_stores_after_success() {
        let mut s = session();
        let out = s.execute("eststo: regress y x").unwrap();
        assert!(s.render(&out).ends_with("(est1 stored)"));
        assert!(s.execute("eststo m2: quietly regress y x").unwrap().is_none());
        assert!(s.results().get("m2").is_some());
        assert_eq!(s.execute("eststo m3: summarize x").unwrap_err().code, 198);
        assert!(s.results().get("m3").is_none());
    }

    #[test]
    fn do_file_aborts_at_the_failing_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.do");
        std::fs::write(&path, "generate a = 1\n* comment\ngenerate b = nosuch\ngenerate c = 3\n").unwrap();
        let mut s = session();
        let err = s.execute(&format!("do \"{}\"", path.display())).unwrap_err();
        assert_eq!(err.code, 111);
        assert!(err.message.contains("line 3"), "{}", err.message);
        assert!(err.transcript.unwrap().contains(". generate a = 1"));
        assert!(s.data().position("a").is_some());
        assert!(s.data().position("c").is_none());

        s.execute("drop a").unwrap();
        let out = s.execute(&format!("do \"{}\", nostop", path.display())).unwrap();
        assert!(s.render(&out).contains("r(111);"));
        assert!(s.data().position("c").is_some());
    }

    #[test]
    fn nested_do_files_are_limited() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("self.do");
        std::fs::write(&path, format!("do \"{}\"\n", path.display())).unwrap();
        let mut s = session();
        s.config.max_do_depth = 3;
        let err = s.execute(&format!("do \"{}\"", path.display())).unwrap_err();
        assert_eq!(err.code, 459);
        assert_eq!(s.do_depth, 0);
    }

    #[test]
    fn exit_codes_follow_return_codes() {
        assert_eq!(exit_code(&CommandError::parse("x")), 198);
        assert_eq!(exit_code(&CommandError::new(ErrorKind::Io, 601, "x")), 89);
    }
}
