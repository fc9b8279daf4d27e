//! Interpreter settings (`config.toml`)
//!
//! Looked up at `$STATASH_CONFIG`, else `~/.statash/config.toml`. Every
//! field is optional. `STATASH_LINESIZE` and `STATASH_DO_POLICY` override
//! the file.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid configuration: {0}")]
    Parse(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// What a do-file does when one of its lines fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoPolicy {
    /// Stop at the failing line
    Abort,
    /// Report the error and go on, like `do file, nostop`
    Continue,
}

impl DoPolicy {
    fn parse(text: &str) -> Option<DoPolicy> {
        match text.trim().to_lowercase().as_str() {
            "abort" => Some(DoPolicy::Abort),
            "continue" | "nostop" => Some(DoPolicy::Continue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Output width in columns; `None` follows the terminal
    pub linesize: Option<usize>,
    pub do_policy: DoPolicy,
    pub max_do_depth: usize,
    /// Where graph specifications are written
    pub graph_dir: PathBuf,
    pub history_file: Option<PathBuf>,
    /// Default log filter when neither `STATASH_LOG` nor `RUST_LOG` is set
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            linesize: None,
            do_policy: DoPolicy::Abort,
            max_do_depth: 64,
            graph_dir: PathBuf::from("graphs"),
            history_file: None,
            log_level: "warn".to_string(),
        }
    }
}

/// `~/.statash`
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".statash"))
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Config, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml(&text)
    }

    /// Load the config file if there is one, then apply environment
    /// overrides. A missing file is not an error.
    pub fn load() -> Result<Config, ConfigError> {
        let path = match std::env::var_os("STATASH_CONFIG") {
            Some(p) => Some(PathBuf::from(p)),
            None => home_dir().map(|h| h.join("config.toml")).filter(|p| p.exists()),
        };
        let mut config = match path {
            Some(p) => Self::from_file(&p)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `STATASH_LINESIZE` / `STATASH_DO_POLICY` from `lookup`;
    /// unparsable values are ignored with a warning
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("STATASH_LINESIZE") {
            match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.linesize = Some(n),
                _ => tracing::warn!(value = %v, "ignoring invalid STATASH_LINESIZE"),
            }
        }
        if let Some(v) = lookup("STATASH_DO_POLICY") {
            match DoPolicy::parse(&v) {
                Some(p) => self.do_policy = p,
                None => tracing::warn!(value = %v, "ignoring invalid STATASH_DO_POLICY"),
            }
        }
    }

    /// History file, defaulting to `~/.statash/history`
    pub fn history_path(&self) -> Option<PathBuf> {
        self.history_file
            .clone()
            .or_else(|| home_dir().map(|h| h.join("history")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn fields_are_read() {
        let c = Config::from_toml(
            "linesize = 120\ndo_policy = \"continue\"\nmax_do_depth = 8\ngraph_dir = \"/tmp/g\"\n",
        )
        .unwrap();
        assert_eq!(c.linesize, Some(120));
        assert_eq!(c.do_policy, DoPolicy::Continue);
        assert_eq!(c.max_do_depth, 8);
        assert_eq!(c.graph_dir, PathBuf::from("/tmp/g"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(Config::from_toml("colour = 1"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn environment_overrides_file() {
        let mut c = Config::from_toml("linesize = 100").unwrap();
        c.apply_env(|k| match k {
            "STATASH_LINESIZE" => Some("132".into()),
            "STATASH_DO_POLICY" => Some("bogus".into()),
            _ => None,
        });
        assert_eq!(c.linesize, Some(132));
        assert_eq!(c.do_policy, DoPolicy::Abort);
    }
}
