//! Purity CLI — command-line front end for the purity checker.

use clap::{Parser as ClapParser, Subcommand};
use purity_checker::checker::error_codes::rule_doc;
use purity_checker::{resolve_with_cancel, CancellationToken, Graph, Rule};
use purity_cli::colors::Palette;
use purity_cli::config::{OutputFormat, Overrides, PurityConfig};
use purity_cli::error::CliError;
use purity_cli::{load_unit, report};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "purity", version, about = "Static purity analysis for compilation units")]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a compilation unit and report verdicts and diagnostics
    Check {
        /// Path to the unit's JSON file
        #[arg()]
        file: PathBuf,

        /// Treat obligations still open at the end of the unit as impure
        #[arg(long)]
        strict: bool,

        /// Worker threads (0 = one per CPU)
        #[arg(long, short)]
        jobs: Option<usize>,

        /// Output format
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        /// Exit with failure on warnings too
        #[arg(long)]
        deny_warnings: bool,

        /// Use this config file instead of searching for purity.toml
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the documentation of a rule code
    Explain {
        /// Rule code, e.g. P0400
        #[arg()]
        code: String,
    },
    /// List every rule code
    Rules,
    /// Print the resolution partitions of a unit
    Graph {
        /// Path to the unit's JSON file
        #[arg()]
        file: PathBuf,
    },
    /// Write a default purity.toml to the current directory
    Init,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Check {
            file,
            strict,
            jobs,
            format,
            no_color,
            deny_warnings,
            config,
        } => {
            let overrides = Overrides {
                strict,
                jobs,
                format,
                no_color,
                deny_warnings,
            };
            cmd_check(&file, &overrides, config.as_deref())
        }
        Commands::Explain { code } => cmd_explain(&code),
        Commands::Rules => cmd_rules(),
        Commands::Graph { file } => cmd_graph(&file),
        Commands::Init => cmd_init(),
    };

    match result {
        Ok(0) => {}
        Ok(status) => std::process::exit(status),
        Err(e) => {
            eprintln!("{} {}", stderr_palette().red("error:"), e);
            std::process::exit(e.exit_code());
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "purity={level},purity_checker={level},purity_cli={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn stdout_palette(enabled: bool) -> Palette {
    Palette::new(enabled && std::io::stdout().is_terminal())
}

fn stderr_palette() -> Palette {
    Palette::new(std::io::stderr().is_terminal())
}

fn cmd_check(file: &Path, overrides: &Overrides, config: Option<&Path>) -> Result<i32, CliError> {
    let config = match config {
        Some(path) => PurityConfig::load_from(path)?,
        None => PurityConfig::load()?,
    };
    let settings = overrides.apply(&config);
    let unit = load_unit(file)?;

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!(error = %e, "cannot install interrupt handler");
    }

    let graph = Graph::build_partial(&unit);
    let res = resolve_with_cancel(&graph, &settings.options, &cancel)?;

    match settings.format {
        OutputFormat::Text => {
            print!(
                "{}",
                report::render_text(&unit, &res, &stdout_palette(settings.color))
            );
        }
        OutputFormat::Json => println!("{}", report::render_json(&unit, &res)?),
    }
    Ok(report::exit_status(&res, settings.deny_warnings))
}

fn cmd_explain(code: &str) -> Result<i32, CliError> {
    let rule = Rule::from_code(code).ok_or_else(|| CliError::UnknownCode(code.to_string()))?;
    let palette = stdout_palette(true);
    println!(
        "{} {} ({}, {})",
        palette.bold(rule.code()),
        rule,
        rule.category(),
        rule.severity()
    );
    println!();
    println!("{}", rule_doc(rule));
    Ok(0)
}

fn cmd_rules() -> Result<i32, CliError> {
    let palette = stdout_palette(true);
    for (code, doc) in purity_checker::all_error_codes() {
        let summary = doc.split(". ").next().unwrap_or(doc).trim_end_matches('.');
        println!("{}  {}", palette.cyan(code), summary);
    }
    Ok(0)
}

fn cmd_graph(file: &Path) -> Result<i32, CliError> {
    let unit = load_unit(file)?;
    let graph = Graph::build_partial(&unit);
    print!("{}", report::render_graph(&graph, &stdout_palette(true)));
    Ok(0)
}

fn cmd_init() -> Result<i32, CliError> {
    let path = PathBuf::from(purity_cli::config::CONFIG_FILE);
    let palette = stdout_palette(true);
    if path.exists() {
        println!("{} already exists, leaving it untouched", path.display());
        return Ok(0);
    }
    std::fs::write(&path, PurityConfig::default_template()).map_err(|source| CliError::Write {
        path: path.clone(),
        source,
    })?;
    println!("{} {}", palette.green("created"), palette.bold(&path.display().to_string()));
    Ok(0)
}
