//! Configuration file parsing for `purity.toml`.
//!
//! Searches the current directory then its ancestors. Command-line flags
//! always win over the file.

use crate::error::CliError;
use purity_checker::{CheckOptions, Strictness};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "purity.toml";

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
pub struct PurityConfig {
    #[serde(default)]
    pub check: CheckSection,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
pub struct CheckSection {
    /// Treat obligations still open at the end of the unit as impure.
    #[serde(default)]
    pub strict: bool,
    /// Worker threads; `0` means one per CPU.
    #[serde(default)]
    pub jobs: Option<usize>,
    /// Fail the run on warnings as well as errors.
    #[serde(default)]
    pub deny_warnings: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct OutputSection {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_color")]
    pub color: bool,
}

impl Default for OutputSection {
    fn default() -> Self {
        OutputSection {
            format: OutputFormat::default(),
            color: default_color(),
        }
    }
}

fn default_color() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl PurityConfig {
    /// Load `purity.toml` from the current directory or the nearest
    /// ancestor that has one. Returns `Default` when no file is found.
    pub fn load() -> Result<Self, CliError> {
        let Ok(cwd) = std::env::current_dir() else {
            return Ok(Self::default());
        };
        Ok(Self::find_and_load(&cwd)?
            .map(|(_path, cfg)| cfg)
            .unwrap_or_default())
    }

    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path).map_err(|source| CliError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| CliError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Walk from `start` up to the filesystem root looking for
    /// `purity.toml`. A file that exists but does not parse is an error.
    pub fn find_and_load(start: &Path) -> Result<Option<(PathBuf, Self)>, CliError> {
        let mut dir = start.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.is_file() {
                let cfg = Self::load_from(&config_path)?;
                return Ok(Some((config_path, cfg)));
            }
            if !dir.pop() {
                return Ok(None);
            }
        }
    }

    /// Parse a TOML string directly.
    pub fn parse(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn default_template() -> &'static str {
        r#"# Purity checker configuration

[check]
strict = false        # open obligations at the end of a unit become impure
# jobs = 0            # worker threads, 0 = one per CPU
deny_warnings = false

[output]
format = "text"       # text | json
color = true
"#
    }
}

/// Command-line values that take precedence over `purity.toml`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Overrides {
    pub strict: bool,
    pub jobs: Option<usize>,
    pub format: Option<OutputFormat>,
    pub no_color: bool,
    pub deny_warnings: bool,
}

/// Effective settings of one `check` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub options: CheckOptions,
    pub format: OutputFormat,
    pub color: bool,
    pub deny_warnings: bool,
}

impl Overrides {
    pub fn apply(&self, config: &PurityConfig) -> Settings {
        let strictness = if self.strict || config.check.strict {
            Strictness::Strict
        } else {
            Strictness::Lenient
        };
        let options = CheckOptions {
            strictness,
            jobs: self.jobs.or(config.check.jobs).unwrap_or(0),
        };
        Settings {
            options,
            format: self.format.unwrap_or(config.output.format),
            color: config.output.color && !self.no_color,
            deny_warnings: self.deny_warnings || config.check.deny_warnings,
        }
    }
}
