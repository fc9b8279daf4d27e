//! statash - a Stata command interpreter
//!
//! # Overview
//!
//! statash reads Stata command lines, runs them against an in-memory
//! dataset, and prints Stata-style output. Estimation, file formats and
//! plotting sit behind backend traits; the interpreter itself parses,
//! resolves names, selects observations and keeps the stores consistent.
//!
//! # Core Concepts
//!
//! ## Command lines
//!
//! ```text
//! [prefix:] command [varlist] [=exp] [if exp] [in range] [weight] [using file] [, options]
//! ```
//!
//! Prefixes are `by`/`bysort`, `quietly`, `capture` and `eststo [name]:`.
//! Command names accept Stata's abbreviations (`su`, `reg`, `gen`).
//!
//! ## Missing values
//!
//! Missing is its own value. Arithmetic with missing gives missing, and
//! conditions use three-valued logic: an `if` only keeps observations
//! where the condition is definitely true.
//!
//! ## Failure leaves no trace
//!
//! A command that fails (or is interrupted) leaves the dataset and the
//! stored results exactly as they were.
//!
//! ```text
//! . generate z = nosuch + 1
//! variable nosuch not found
//! r(111);
//! ```
//!
//! # Example
//!
//! ```rust
//! use statash::{Dataset, Session, Variable};
//!
//! let mut session = Session::new();
//! let data = Dataset::from_variables(vec![
//!     Variable::numeric("x", vec![Some(1.0), None, Some(3.0)]),
//! ])
//! .unwrap();
//! session.set_data(data);
//! let out = session.execute("summarize x").unwrap();
//! assert!(session.render(&out).contains("x |"));
//! ```

pub mod ast;
pub mod backend;
pub mod codec;
pub mod command;
pub mod config;
pub mod dataset;
pub mod dispatch;
pub mod display;
pub mod error;
pub mod eval;
pub mod export;
pub mod lexer;
pub mod parser;
pub mod plot;
pub mod results;
pub mod script;
pub mod session;
pub mod signals;
pub mod worker;

// Re-export commonly used items
pub use command::{parse_line, Command, Line, Prefix};
pub use config::Config;
pub use dataset::{Dataset, Variable};
pub use dispatch::Verb;
pub use display::{render, Output};
pub use error::{CommandError, ErrorKind};
pub use session::{exit_code, Session};
pub use signals::CancelToken;
pub use worker::SessionWorker;
