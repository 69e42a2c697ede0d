//! Purity CLI library.
//!
//! Shared functionality behind the `purity` binary: configuration, unit
//! loading, and report rendering.

pub mod colors;
pub mod config;
pub mod error;
pub mod report;

use error::CliError;
use purity_checker::CompilationUnit;
use std::path::Path;

/// Read a compilation unit from a JSON file.
pub fn load_unit(path: &Path) -> Result<CompilationUnit, CliError> {
    let src = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    CompilationUnit::from_json(&src).map_err(|source| CliError::Unit {
        path: path.to_path_buf(),
        source,
    })
}
