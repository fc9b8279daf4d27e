//! Dataset file formats
//!
//! A `Codec` reads a whole file into a fresh `Dataset` or writes one out.
//! The `CodecRegistry` picks the codec from the file extension. `.dta` and
//! `.csv` are built in; `.xlsx` has a slot but no codec until one is
//! registered.

mod delimited;
mod dta;

pub use delimited::CsvCodec;
pub use dta::DtaCodec;

use crate::dataset::{Dataset, DatasetError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("file {0} not found")]
    NotFound(PathBuf),
    #[error("file {0} already exists")]
    Exists(PathBuf),
    #[error("{path}: {reason}")]
    Format { path: PathBuf, reason: String },
    #[error("file type .{0} not supported")]
    Unsupported(String),
    #[error("no reader/writer available for .{0} files")]
    NoBackend(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

impl CodecError {
    pub(crate) fn format(path: &Path, reason: impl Into<String>) -> CodecError {
        CodecError::Format { path: path.to_path_buf(), reason: reason.into() }
    }

    /// Map a failed open to `NotFound` when the file is missing
    pub(crate) fn open(path: &Path, err: std::io::Error) -> CodecError {
        if err.kind() == std::io::ErrorKind::NotFound {
            CodecError::NotFound(path.to_path_buf())
        } else {
            CodecError::Io(err)
        }
    }
}

pub trait Codec: Send {
    fn read(&self, path: &Path) -> Result<Dataset, CodecError>;
    fn write(&self, data: &Dataset, path: &Path) -> Result<(), CodecError>;
}

/// Extensions with a known format but no built-in codec
const EXTERNAL_FORMATS: &[&str] = &["xlsx", "xls"];

/// Extension -> codec
pub struct CodecRegistry {
    codecs: HashMap<String, Box<dyn Codec>>,
}

impl CodecRegistry {
    pub fn empty() -> Self {
        CodecRegistry { codecs: HashMap::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("dta", Box::new(DtaCodec));
        registry.register("csv", Box::new(CsvCodec::default()));
        registry
    }

    pub fn register(&mut self, extension: &str, codec: Box<dyn Codec>) {
        self.codecs.insert(extension.to_lowercase(), codec);
    }

    fn resolve(&self, path: &Path) -> Result<&dyn Codec, CodecError> {
        let ext = extension(path);
        match self.codecs.get(&ext) {
            Some(codec) => Ok(codec.as_ref()),
            None if EXTERNAL_FORMATS.contains(&ext.as_str()) => Err(CodecError::NoBackend(ext)),
            None => Err(CodecError::Unsupported(ext)),
        }
    }

    pub fn read(&self, path: &Path) -> Result<Dataset, CodecError> {
        let codec = self.resolve(path)?;
        if !path.exists() {
            return Err(CodecError::NotFound(path.to_path_buf()));
        }
        let data = codec.read(path)?;
        tracing::info!(path = %path.display(), nobs = data.nobs(), nvars = data.nvars(), "loaded dataset");
        Ok(data)
    }

    /// Write `data`; an existing file is only overwritten with `replace`
    pub fn write(&self, data: &Dataset, path: &Path, replace: bool) -> Result<(), CodecError> {
        let codec = self.resolve(path)?;
        if path.exists() && !replace {
            return Err(CodecError::Exists(path.to_path_buf()));
        }
        codec.write(data, path)?;
        tracing::info!(path = %path.display(), nobs = data.nobs(), "saved dataset");
        Ok(())
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

/// File name with `.dta` appended when it has no extension
pub fn dataset_path(name: &str) -> PathBuf {
    let path = PathBuf::from(name);
    if path.extension().is_none() {
        path.with_extension("dta")
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Variable;

    #[test]
    fn dta_extension_is_appended() {
        assert_eq!(dataset_path("auto"), PathBuf::from("auto.dta"));
        assert_eq!(dataset_path("auto.csv"), PathBuf::from("auto.csv"));
    }

    #[test]
    fn xlsx_has_no_builtin_codec() {
        let registry = CodecRegistry::with_builtins();
        let err = registry.read(Path::new("book.xlsx")).unwrap_err();
        assert!(matches!(err, CodecError::NoBackend(_)));
        let err = registry.read(Path::new("data.parquet")).unwrap_err();
        assert!(matches!(err, CodecError::Unsupported(_)));
    }

    #[test]
    fn save_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.dta");
        let data = Dataset::from_variables(vec![Variable::numeric("x", vec![Some(1.0)])]).unwrap();
        let registry = CodecRegistry::with_builtins();
        registry.write(&data, &path, false).unwrap();
        assert!(matches!(registry.write(&data, &path, false), Err(CodecError::Exists(_))));
        registry.write(&data, &path, true).unwrap();
    }

    #[test]
    fn missing_file_is_reported() {
        let registry = CodecRegistry::with_builtins();
        let err = registry.read(Path::new("/nonexistent/nothing.dta")).unwrap_err();
        assert!(matches!(err, CodecError::NotFound(_)));
    }
}
