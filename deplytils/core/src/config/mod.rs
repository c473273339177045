//! TOML Configuration File Support
//!
//! Loads the release-check configuration from `deplytils.toml` in the
//! project directory (or the path given by `DEPLYTILS_CONFIG`).
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [coverage]
//! program = "coverage"
//! rcfile = ".coveragerc"
//! threshold = 95.0
//! data_dir = "."
//!
//! [lint]
//! enabled = true
//! program = "pylint"
//! rcfile = ".pylintrc"
//! root = "."
//! args = ["--jobs=2"]
//! exclude = "local|vendored"
//!
//! [suites.normal]
//! command = ["python3", "-m", "unittest", "discover", "-s", "normal"]
//!
//! [suites.coverage]
//! command = ["python3", "-m", "unittest", "discover", "-s", "coverage_tests"]
//! working_dir = "."
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lint::{DEFAULT_EXCLUDE, DEFAULT_LINT_PROGRAM};
use crate::suite::SuiteCommand;

/// File name looked up in the current directory
pub const CONFIG_FILE_NAME: &str = "deplytils.toml";

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "DEPLYTILS_CONFIG";

/// Linter configuration file used when present and none is configured
pub const DEFAULT_LINT_RCFILE: &str = ".pylintrc";

const DEFAULT_COVERAGE_PROGRAM: &str = "coverage";
const DEFAULT_THRESHOLD: f64 = 100.0;
const DEFAULT_NORMAL_COMMAND: &str =
    "coverage run --branch --rcfile normal/.coveragerc -p -m unittest discover -s normal";
const DEFAULT_COVERAGE_COMMAND: &str = "coverage run --branch --rcfile coverage_tests/.coveragerc -p -m unittest discover -s coverage_tests";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Coverage section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageToml {
    /// Coverage tool executable
    pub program: Option<String>,

    /// Tool configuration file
    pub rcfile: Option<PathBuf>,

    /// Minimum combined percentage
    pub threshold: Option<f64>,

    /// Directory holding the data files
    pub data_dir: Option<PathBuf>,
}

/// Lint section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LintToml {
    /// Whether to lint before testing
    pub enabled: Option<bool>,

    /// Linter executable
    pub program: Option<String>,

    /// Linter configuration file
    pub rcfile: Option<PathBuf>,

    /// Project root to collect files from
    pub root: Option<PathBuf>,

    /// Extra linter arguments
    pub args: Option<Vec<String>>,

    /// File name exclusion regex
    pub exclude: Option<String>,
}

/// Suites section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SuitesToml {
    /// Suite run inside the measured context
    pub normal: Option<SuiteCommand>,

    /// Suite exercising the coverage context itself
    pub coverage: Option<SuiteCommand>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeplytilsToml {
    /// Coverage configuration section
    pub coverage: CoverageToml,

    /// Lint configuration section
    pub lint: LintToml,

    /// Suite configuration section
    pub suites: SuitesToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Coverage settings
#[derive(Clone, Debug, PartialEq)]
pub struct CoverageSettings {
    /// Coverage tool executable
    pub program: String,
    /// Tool configuration file
    pub rcfile: Option<PathBuf>,
    /// Minimum combined percentage
    pub threshold: f64,
    /// Directory holding the data files
    pub data_dir: PathBuf,
}

impl Default for CoverageSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_COVERAGE_PROGRAM.to_string(),
            rcfile: None,
            threshold: DEFAULT_THRESHOLD,
            data_dir: PathBuf::from("."),
        }
    }
}

/// Lint settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LintSettings {
    /// Whether to lint before testing
    pub enabled: bool,
    /// Linter executable
    pub program: String,
    /// Linter configuration file
    pub rcfile: Option<PathBuf>,
    /// Project root
    pub root: PathBuf,
    /// Extra linter arguments
    pub args: Vec<String>,
    /// File name exclusion regex
    pub exclude: String,
}

impl Default for LintSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            program: DEFAULT_LINT_PROGRAM.to_string(),
            rcfile: None,
            root: PathBuf::from("."),
            args: Vec::new(),
            exclude: DEFAULT_EXCLUDE.to_string(),
        }
    }
}

impl LintSettings {
    /// Configured rcfile, else `.pylintrc` under the root if it exists
    #[must_use]
    pub fn effective_rcfile(&self) -> Option<PathBuf> {
        if let Some(rcfile) = &self.rcfile {
            return Some(rcfile.clone());
        }
        let candidate = self.root.join(DEFAULT_LINT_RCFILE);
        candidate.is_file().then_some(candidate)
    }
}

/// Centralized configuration for the release check
#[derive(Clone, Debug)]
pub struct DeplytilsConfig {
    /// Coverage settings
    pub coverage: CoverageSettings,

    /// Lint settings
    pub lint: LintSettings,

    /// Command of the normal suite
    pub normal_suite: SuiteCommand,

    /// Command of the coverage suite
    pub coverage_suite: SuiteCommand,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for DeplytilsConfig {
    fn default() -> Self {
        Self {
            coverage: CoverageSettings::default(),
            lint: LintSettings::default(),
            normal_suite: SuiteCommand::parse(DEFAULT_NORMAL_COMMAND),
            coverage_suite: SuiteCommand::parse(DEFAULT_COVERAGE_COMMAND),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl DeplytilsConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for a threshold outside
    /// `0..=100`, an empty program name or an empty suite command.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.coverage.threshold;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(ConfigError::ValidationError(format!(
                "coverage threshold {threshold} is outside 0..=100"
            )));
        }
        if self.coverage.program.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "coverage program is empty".to_string(),
            ));
        }
        if self.lint.enabled && self.lint.program.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "lint program is empty".to_string(),
            ));
        }
        for (name, suite) in [
            ("normal", &self.normal_suite),
            ("coverage", &self.coverage_suite),
        ] {
            if suite.command.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{name} suite command is empty"
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$DEPLYTILS_CONFIG` if set, otherwise `./deplytils.toml`.
#[must_use]
pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// result fails validation. A missing config file is not an error.
pub fn load_config() -> Result<DeplytilsConfig, ConfigError> {
    load_config_from_path(Some(default_config_path()))
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or the result fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<DeplytilsConfig, ConfigError> {
    let mut config = DeplytilsConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: DeplytilsToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config, config_path);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut DeplytilsConfig, toml: &DeplytilsToml, path: &Path) {
    // Coverage settings
    if let Some(ref program) = toml.coverage.program {
        config.coverage.program = program.clone();
    }
    if toml.coverage.rcfile.is_some() {
        config.coverage.rcfile = toml.coverage.rcfile.clone();
    }
    if let Some(threshold) = toml.coverage.threshold {
        config.coverage.threshold = threshold;
    }
    if let Some(ref dir) = toml.coverage.data_dir {
        config.coverage.data_dir = dir.clone();
    }

    // Lint settings
    if let Some(enabled) = toml.lint.enabled {
        config.lint.enabled = enabled;
    }
    if let Some(ref program) = toml.lint.program {
        config.lint.program = program.clone();
    }
    if toml.lint.rcfile.is_some() {
        config.lint.rcfile = toml.lint.rcfile.clone();
    }
    if let Some(ref root) = toml.lint.root {
        config.lint.root = root.clone();
    }
    if let Some(ref args) = toml.lint.args {
        config.lint.args = args.clone();
    }
    if let Some(ref exclude) = toml.lint.exclude {
        config.lint.exclude = exclude.clone();
    }

    // Suite settings
    if let Some(ref normal) = toml.suites.normal {
        config.normal_suite = normal.clone();
    }
    if let Some(ref coverage) = toml.suites.coverage {
        config.coverage_suite = coverage.clone();
    }

    tracing::debug!(
        path = %path.display(),
        threshold = config.coverage.threshold,
        lint = config.lint.enabled,
        "Applied file configuration"
    );
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut DeplytilsConfig) {
    if let Ok(program) = std::env::var("DEPLYTILS_COVERAGE_PROGRAM") {
        config.coverage.program = program;
        config.source = ConfigSource::Env;
    }
    if let Ok(rcfile) = std::env::var("DEPLYTILS_COVERAGE_RCFILE") {
        config.coverage.rcfile = Some(PathBuf::from(rcfile));
        config.source = ConfigSource::Env;
    }
    if let Ok(threshold) = std::env::var("DEPLYTILS_COVERAGE_THRESHOLD") {
        if let Ok(pct) = threshold.parse::<f64>() {
            config.coverage.threshold = pct;
            config.source = ConfigSource::Env;
        }
    }

    if let Ok(enabled) = std::env::var("DEPLYTILS_LINT_ENABLED") {
        config.lint.enabled = enabled != "0" && enabled.to_lowercase() != "false";
        config.source = ConfigSource::Env;
    }
    if let Ok(program) = std::env::var("DEPLYTILS_LINT_PROGRAM") {
        config.lint.program = program;
        config.source = ConfigSource::Env;
    }
    if let Ok(rcfile) = std::env::var("DEPLYTILS_LINT_RCFILE") {
        config.lint.rcfile = Some(PathBuf::from(rcfile));
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides,
/// then call [`DeplytilsConfig::validate`] again.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Threshold override
    pub threshold: Option<f64>,

    /// Lint enabled override
    pub lint_enabled: Option<bool>,

    /// Coverage program override
    pub coverage_program: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set threshold override
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Set lint enabled override
    #[must_use]
    pub fn with_lint_enabled(mut self, enabled: bool) -> Self {
        self.lint_enabled = Some(enabled);
        self
    }

    /// Set coverage program override
    #[must_use]
    pub fn with_coverage_program(mut self, program: String) -> Self {
        self.coverage_program = Some(program);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut DeplytilsConfig) {
        if self.threshold.is_some() || self.lint_enabled.is_some() || self.coverage_program.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(threshold) = self.threshold {
            config.coverage.threshold = threshold;
        }

        if let Some(enabled) = self.lint_enabled {
            config.lint.enabled = enabled;
        }

        if let Some(ref program) = self.coverage_program {
            config.coverage.program = program.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
