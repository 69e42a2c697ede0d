//! Errors surfaced by the `purity` command line.

use purity_checker::ResolveError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("cannot read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot write '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid compilation unit in '{}': {source}", .path.display())]
    Unit {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid toml in '{}': {source}", .path.display())]
    Config {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("unknown rule code '{0}'")]
    UnknownCode(String),
    #[error("cannot serialize report: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl CliError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Resolve(ResolveError::Cancelled { .. }) => 130,
            _ => 2,
        }
    }
}
