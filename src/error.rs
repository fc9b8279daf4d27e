//! Command failures as the user sees them
//!
//! Every module error converts into a `CommandError`, which carries a kind
//! from a small taxonomy, the message, the offending fragment if known, and
//! the Stata return code printed after the message as `r(#);`.

use crate::backend::BackendError;
use crate::codec::CodecError;
use crate::command::SyntaxError;
use crate::dataset::DatasetError;
use crate::eval::EvalError;
use crate::export::ExportError;
use crate::parser::ParseError;
use crate::plot::PlotError;
use crate::results::ResultError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The line could not be parsed
    Parse,
    /// A name did not resolve: variable, verb, label, stored result
    Resolution,
    /// The command is not valid in the current state
    State,
    /// A statistical, plotting or file-format backend failed
    Backend,
    Io,
    Interrupted,
}

/// Stata return codes
pub mod rc {
    pub const INTERRUPTED: u16 = 1;
    pub const DATA_CHANGED: u16 = 4;
    pub const NOT_SORTED: u16 = 5;
    pub const VARLIST_REQUIRED: u16 = 100;
    pub const NOT_ALLOWED: u16 = 101;
    pub const TOO_FEW_VARIABLES: u16 = 102;
    pub const TOO_MANY_VARIABLES: u16 = 103;
    pub const TYPE_MISMATCH: u16 = 109;
    pub const ALREADY_DEFINED: u16 = 110;
    pub const NOT_FOUND: u16 = 111;
    pub const SYNTAX: u16 = 198;
    pub const BY_NOT_ALLOWED: u16 = 190;
    pub const UNRECOGNIZED: u16 = 199;
    pub const NO_ESTIMATES: u16 = 301;
    pub const CONVERGENCE: u16 = 430;
    pub const NONINTEGER_WEIGHTS: u16 = 401;
    pub const STATE: u16 = 459;
    pub const FILE_NOT_FOUND: u16 = 601;
    pub const FILE_EXISTS: u16 = 602;
    pub const FILE_OPEN: u16 = 603;
    pub const FILE_FORMAT: u16 = 610;
    pub const NO_OBSERVATIONS: u16 = 2000;
    pub const INSUFFICIENT_OBSERVATIONS: u16 = 2001;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
    /// Offending token or clause
    pub fragment: Option<String>,
    pub code: u16,
    /// Rendered output of the do-file lines that ran before the failure
    pub transcript: Option<String>,
}

impl CommandError {
    pub fn new(kind: ErrorKind, code: u16, message: impl Into<String>) -> Self {
        CommandError { kind, message: message.into(), fragment: None, code, transcript: None }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, rc::SYNTAX, message)
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resolution, rc::NOT_FOUND, message)
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::State, rc::STATE, message)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Backend, rc::SYNTAX, message)
    }

    pub fn interrupted() -> Self {
        Self::new(ErrorKind::Interrupted, rc::INTERRUPTED, "--Break--")
    }

    pub fn unknown_command(verb: &str) -> Self {
        Self::new(ErrorKind::Resolution, rc::UNRECOGNIZED, format!("command {} is unrecognized", verb))
            .with_fragment(verb)
    }

    pub fn option_not_allowed(name: &str) -> Self {
        Self::parse(format!("option {} not allowed", name)).with_fragment(name)
    }

    pub fn data_changed() -> Self {
        Self::new(ErrorKind::State, rc::DATA_CHANGED, "no; dataset in memory has changed since last saved")
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }

    pub fn with_transcript(mut self, transcript: String) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Message and return code the way Stata prints them
    pub fn report(&self) -> String {
        format!("{}\nr({});", self.message, self.code)
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CommandError {}

impl From<SyntaxError> for CommandError {
    fn from(e: SyntaxError) -> Self {
        let fragment = e.fragment.clone();
        CommandError::parse(e.to_string()).with_fragment(fragment)
    }
}

impl From<ParseError> for CommandError {
    fn from(e: ParseError) -> Self {
        CommandError::parse(e.to_string())
    }
}

impl From<DatasetError> for CommandError {
    fn from(e: DatasetError) -> Self {
        let message = e.to_string();
        match e {
            DatasetError::VariableNotFound(name) | DatasetError::LabelNotFound(name) => {
                CommandError::resolution(message).with_fragment(name)
            }
            DatasetError::VariableExists(name) => {
                CommandError::new(ErrorKind::State, rc::ALREADY_DEFINED, message).with_fragment(name)
            }
            DatasetError::InvalidName(name) => CommandError::parse(message).with_fragment(name),
            DatasetError::TypeMismatch(_) => {
                CommandError::new(ErrorKind::Resolution, rc::TYPE_MISMATCH, message)
            }
            DatasetError::Invalid(_) => CommandError::new(ErrorKind::State, rc::SYNTAX, message),
            DatasetError::LengthMismatch { .. }
            | DatasetError::NotUnique { .. }
            | DatasetError::Panel(_)
            | DatasetError::Reshape(_) => CommandError::state(message),
        }
    }
}

impl From<EvalError> for CommandError {
    fn from(e: EvalError) -> Self {
        let message = e.to_string();
        match e {
            EvalError::UnknownVariable(name) => CommandError::resolution(message).with_fragment(name),
            EvalError::TypeMismatch(_) => CommandError::new(ErrorKind::Resolution, rc::TYPE_MISMATCH, message),
            EvalError::UnknownFunction(name) => {
                CommandError::new(ErrorKind::Resolution, rc::NOT_FOUND, message).with_fragment(name)
            }
            EvalError::Arity { name, .. } => CommandError::parse(message).with_fragment(name),
            EvalError::Invalid(_) => CommandError::new(ErrorKind::Resolution, rc::SYNTAX, message),
            EvalError::Dataset(inner) => inner.into(),
        }
    }
}

impl From<CodecError> for CommandError {
    fn from(e: CodecError) -> Self {
        let message = e.to_string();
        match e {
            CodecError::NotFound(path) => CommandError::new(ErrorKind::Io, rc::FILE_NOT_FOUND, message)
                .with_fragment(path.display().to_string()),
            CodecError::Exists(path) => CommandError::new(ErrorKind::Io, rc::FILE_EXISTS, message)
                .with_fragment(path.display().to_string()),
            CodecError::Format { .. } => CommandError::new(ErrorKind::Io, rc::FILE_FORMAT, message),
            CodecError::Unsupported(ext) => CommandError::new(ErrorKind::Io, rc::SYNTAX, message).with_fragment(ext),
            CodecError::NoBackend(ext) => CommandError::backend(message).with_fragment(ext),
            CodecError::Io(_) | CodecError::Csv(_) => CommandError::new(ErrorKind::Io, rc::FILE_OPEN, message),
            CodecError::Dataset(inner) => inner.into(),
        }
    }
}

impl From<BackendError> for CommandError {
    fn from(e: BackendError) -> Self {
        let message = e.to_string();
        let code = match e {
            BackendError::Interrupted => return CommandError::interrupted(),
            BackendError::Unavailable(_) => rc::UNRECOGNIZED,
            BackendError::NoObservations => rc::NO_OBSERVATIONS,
            BackendError::InsufficientObservations => rc::INSUFFICIENT_OBSERVATIONS,
            BackendError::Convergence(_) => rc::CONVERGENCE,
            BackendError::Invalid(_) => rc::SYNTAX,
        };
        CommandError::new(ErrorKind::Backend, code, message)
    }
}

impl From<ResultError> for CommandError {
    fn from(e: ResultError) -> Self {
        let message = e.to_string();
        match e {
            ResultError::NoEstimates => CommandError::new(ErrorKind::State, rc::NO_ESTIMATES, message),
            ResultError::NotFound(name) => CommandError::resolution(message).with_fragment(name),
            ResultError::InvalidName(name) => CommandError::parse(message).with_fragment(name),
        }
    }
}

impl From<ExportError> for CommandError {
    fn from(e: ExportError) -> Self {
        let message = e.to_string();
        match e {
            ExportError::Unsupported(ext) => CommandError::new(ErrorKind::Io, rc::SYNTAX, message).with_fragment(ext),
            ExportError::Io(_) | ExportError::Csv(_) => CommandError::new(ErrorKind::Io, rc::FILE_OPEN, message),
        }
    }
}

impl From<PlotError> for CommandError {
    fn from(e: PlotError) -> Self {
        let message = e.to_string();
        match e {
            PlotError::Io(_) => CommandError::new(ErrorKind::Io, rc::FILE_OPEN, message),
            PlotError::Json(_) | PlotError::Invalid(_) => CommandError::backend(message),
        }
    }
}

impl From<std::io::Error> for CommandError {
    fn from(e: std::io::Error) -> Self {
        let code = if e.kind() == std::io::ErrorKind::NotFound { rc::FILE_NOT_FOUND } else { rc::FILE_OPEN };
        CommandError::new(ErrorKind::Io, code, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_variable_maps_to_111() {
        let e: CommandError = DatasetError::VariableNotFound("z".into()).into();
        assert_eq!(e.kind, ErrorKind::Resolution);
        assert_eq!(e.code, 111);
        assert_eq!(e.fragment.as_deref(), Some("z"));
        assert_eq!(e.report(), "variable z not found\nr(111);");
    }

    #[test]
    fn nested_errors_keep_their_code() {
        let e: CommandError = EvalError::Dataset(DatasetError::TypeMismatch("x".into())).into();
        assert_eq!(e.code, 109);
        let e: CommandError = CodecError::Exists("d.dta".into()).into();
        assert_eq!((e.kind, e.code), (ErrorKind::Io, 602));
    }

    #[test]
    fn backend_break_is_an_interruption() {
        let e: CommandError = BackendError::Interrupted.into();
        assert_eq!(e.kind, ErrorKind::Interrupted);
        assert_eq!(e.code, 1);
        let e: CommandError = CodecError::NoBackend("xlsx".into()).into();
        assert_eq!(e.kind, ErrorKind::Backend);
    }

    #[test]
    fn syntax_errors_are_198() {
        let e: CommandError = crate::command::parse("regress y x, level(").unwrap_err().into();
        assert_eq!((e.kind, e.code), (ErrorKind::Parse, 198));
    }
}
