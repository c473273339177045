//! Project-Wide Lint Runs
//!
//! Collects every source file of a project and hands them to an external
//! linter in one invocation. Only files inside packages are collected: a
//! directory's files count if the directory holds the package marker file
//! (`__init__.py` by default), except for the project root, which always
//! counts. Subdirectories are walked either way, so packages below plain
//! directories are still found.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::suite::join_streams;

/// Default linter executable
pub const DEFAULT_LINT_PROGRAM: &str = "pylint";
/// Default package marker file
pub const DEFAULT_PACKAGE_MARKER: &str = "__init__.py";
/// Default source extension
pub const DEFAULT_EXTENSION: &str = "py";
/// Default exclusion pattern, matched against file names
pub const DEFAULT_EXCLUDE: &str = "local";

static DEFAULT_EXCLUDE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_EXCLUDE).expect("default exclude pattern is valid"));

/// Errors raised while collecting or linting files
#[derive(Debug, Error)]
pub enum LintError {
    /// The exclusion pattern is not a valid regex
    #[error("Invalid exclude pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The rejected pattern
        pattern: String,
        /// Regex compile error
        source: regex::Error,
    },

    /// The project root could not be resolved
    #[error("Cannot lint {path}: {source}")]
    Root {
        /// Configured root
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Walking the project tree failed
    #[error("Failed to walk project tree: {0}")]
    Walk(#[from] walkdir::Error),

    /// The linter could not be started
    #[error("Failed to run {program}: {source}")]
    Spawn {
        /// Linter executable
        program: String,
        /// Underlying IO error
        source: std::io::Error,
    },
}

/// Result of one lint run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LintReport {
    /// Files handed to the linter
    pub files: Vec<PathBuf>,
    /// Linter exit code (`None` if killed by a signal)
    pub exit_code: Option<i32>,
    /// Captured linter output (stdout then stderr)
    pub output: String,
}

impl LintReport {
    /// Whether the linter reported no findings
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Anything that can lint a project
pub trait Lint {
    /// Lint the project
    ///
    /// # Errors
    ///
    /// Returns a `LintError` if files cannot be collected or the linter
    /// cannot be started. Findings are reported through `LintReport`.
    fn lint(&self) -> Result<LintReport, LintError>;
}

/// Lints every source file of a project
#[derive(Clone, Debug)]
pub struct ProjectLinter {
    root: PathBuf,
    rcfile: Option<PathBuf>,
    program: String,
    args: Vec<String>,
    package_marker: String,
    extension: String,
    exclude: Regex,
}

impl ProjectLinter {
    /// Create a linter for the project rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            rcfile: None,
            program: DEFAULT_LINT_PROGRAM.to_string(),
            args: Vec::new(),
            package_marker: DEFAULT_PACKAGE_MARKER.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
            exclude: DEFAULT_EXCLUDE_RE.clone(),
        }
    }

    /// Linter config file, passed as `--rcfile=<absolute path>`
    #[must_use]
    pub fn with_rcfile(mut self, rcfile: impl Into<PathBuf>) -> Self {
        self.rcfile = Some(rcfile.into());
        self
    }

    /// Linter executable
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Extra arguments placed before the file list
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// File whose presence marks a directory as a package
    #[must_use]
    pub fn with_package_marker(mut self, marker: impl Into<String>) -> Self {
        self.package_marker = marker.into();
        self
    }

    /// Source file extension, without the dot
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Skip files whose name matches `pattern`
    ///
    /// # Errors
    ///
    /// Returns `LintError::InvalidPattern` if `pattern` is not a valid regex.
    pub fn with_exclude(mut self, pattern: &str) -> Result<Self, LintError> {
        self.exclude = Regex::new(pattern).map_err(|source| LintError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(self)
    }

    /// Project root as configured
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Gather the files to lint, sorted by path
    ///
    /// # Errors
    ///
    /// Returns `LintError::Root` if the root does not exist, or
    /// `LintError::Walk` if a directory cannot be read.
    pub fn collect_files(&self) -> Result<Vec<PathBuf>, LintError> {
        let root = self.root.canonicalize().map_err(|source| LintError::Root {
            path: self.root.clone(),
            source,
        })?;

        let suffix = format!(".{}", self.extension);
        let mut packages: HashMap<PathBuf, bool> = HashMap::new();
        let mut files = Vec::new();

        for entry in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if !name.ends_with(&suffix) || self.exclude.is_match(&name) {
                continue;
            }

            let Some(dir) = entry.path().parent() else {
                continue;
            };
            let in_package = *packages.entry(dir.to_path_buf()).or_insert_with(|| {
                dir == root.as_path() || dir.join(&self.package_marker).is_file()
            });
            if in_package {
                files.push(entry.path().to_path_buf());
            }
        }

        debug!(root = %root.display(), count = files.len(), "Collected files to lint");
        Ok(files)
    }

    /// Build the linter invocation for `files`
    #[must_use]
    pub fn command(&self, files: &[PathBuf]) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(rcfile) = &self.rcfile {
            let rcfile = rcfile.canonicalize().unwrap_or_else(|_| rcfile.clone());
            command.arg(format!("--rcfile={}", rcfile.display()));
        }
        command.args(&self.args).args(files);
        command
    }

    /// Collect files and run the linter over them
    ///
    /// An empty project is clean without running the linter.
    ///
    /// # Errors
    ///
    /// See [`ProjectLinter::collect_files`]; also `LintError::Spawn`.
    pub fn run(&self) -> Result<LintReport, LintError> {
        let files = self.collect_files()?;
        if files.is_empty() {
            info!(root = %self.root.display(), "Nothing to lint");
            return Ok(LintReport {
                files,
                exit_code: Some(0),
                output: String::new(),
            });
        }

        info!(program = %self.program, files = files.len(), "Running linter");
        let output = self
            .command(&files)
            .output()
            .map_err(|source| LintError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let text = join_streams(&output.stdout, &output.stderr);

        let report = LintReport {
            files,
            exit_code: output.status.code(),
            output: text,
        };
        if !report.success() {
            warn!(exit_code = ?report.exit_code, "Linter reported findings");
        }
        Ok(report)
    }
}

impl Lint for ProjectLinter {
    fn lint(&self) -> Result<LintReport, LintError> {
        self.run()
    }
}
