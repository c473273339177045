//! Release Ready - Release Candidate Check
//!
//! Lints the project, runs the normal and coverage test suites and requires
//! the combined coverage to meet the threshold. Every failing check group is
//! reported on stderr; the process exit status is the number of groups that
//! failed (0 = ready for release).
//!
//! # Usage
//!
//! ```bash
//! # Check using ./deplytils.toml (or built-in defaults)
//! release-ready
//!
//! # Custom config file and threshold
//! release-ready --config ci/deplytils.toml --threshold 95
//!
//! # Skip the linter and run coverage through a specific interpreter
//! release-ready --no-lint --coverage-program "python3 -m coverage"
//!
//! # Verbose logging
//! RUST_LOG=debug release-ready
//! ```
//!
//! # Environment Variables
//!
//! - `DEPLYTILS_CONFIG`: Configuration file path
//! - `DEPLYTILS_COVERAGE_PROGRAM`, `DEPLYTILS_COVERAGE_RCFILE`,
//!   `DEPLYTILS_COVERAGE_THRESHOLD`: Coverage tool overrides
//! - `DEPLYTILS_LINT_ENABLED`, `DEPLYTILS_LINT_PROGRAM`, `DEPLYTILS_LINT_RCFILE`:
//!   Linter overrides
//! - `RUST_LOG`: Log filter (logs go to stderr)

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use deplytils_core::config::{default_config_path, load_config_from_path};
use deplytils_core::{ConfigOverrides, DeplytilsConfig, ReleaseChecker};

/// Release Ready - check that a release candidate passes lint, tests and coverage
#[derive(Parser, Debug)]
#[command(name = "release-ready")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "DEPLYTILS_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Minimum combined coverage percentage
    #[arg(short = 't', long, value_name = "PERCENT")]
    threshold: Option<f64>,

    /// Skip the lint check
    #[arg(long)]
    no_lint: bool,

    /// Coverage tool command (e.g. "python3 -m coverage")
    #[arg(long, value_name = "PROGRAM")]
    coverage_program: Option<String>,
}

impl Args {
    /// Overrides requested on the command line
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(threshold) = self.threshold {
            overrides = overrides.with_threshold(threshold);
        }
        if self.no_lint {
            overrides = overrides.with_lint_enabled(false);
        }
        if let Some(program) = &self.coverage_program {
            overrides = overrides.with_coverage_program(program.clone());
        }
        overrides
    }
}

/// Initialize logging to stderr
fn init_logging() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("release_ready=info".parse()?)
        .add_directive("deplytils_core=info".parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    Ok(())
}

/// Load configuration and apply command-line overrides
fn resolve_config(args: &Args) -> Result<DeplytilsConfig> {
    let path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = load_config_from_path(Some(path.clone()))
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    args.overrides().apply(&mut config);
    config.validate().context("Invalid command-line override")?;

    info!(
        source = %config.source(),
        threshold = config.coverage.threshold,
        lint = config.lint.enabled,
        "Configuration resolved"
    );
    Ok(config)
}

fn run(args: &Args) -> Result<usize> {
    let config = resolve_config(args)?;
    let checker =
        ReleaseChecker::from_config(&config).context("Failed to set up the release check")?;
    checker.run().context("Failed to write check output")
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(failures) => ExitCode::from(u8::try_from(failures).unwrap_or(u8::MAX)),
        Err(e) => {
            error!(error = %e, "Release check could not run");
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
