//! CLI-local error type: wraps `tensorset_lib::Error` plus the handful of
//! failure modes that only make sense at the command-line boundary (reading
//! an import file, a bad `clap` value).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Lib(#[from] tensorset_lib::Error),

    #[error("I/O error at {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("{0}")]
    Message(String),
}

pub type CliResult<T> = std::result::Result<T, CliError>;
