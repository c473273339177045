//! Test Suite Runs
//!
//! Runs a test suite as a subprocess and summarizes its unittest-style
//! output. A suite can be started in the background and joined later, so the
//! release checker can overlap two runs.

use std::fmt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

static RAN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Ran (\d+) tests? in ").expect("ran pattern is valid"));
static COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(failures|errors)=(\d+)").expect("count pattern is valid"));

/// Errors raised while running a suite
#[derive(Debug, Error)]
pub enum SuiteError {
    /// The suite has no command to run
    #[error("Suite {suite} has an empty command")]
    EmptyCommand {
        /// Suite name
        suite: String,
    },

    /// The process could not be started
    #[error("Failed to start {suite} tests ({command}): {source}")]
    Spawn {
        /// Suite name
        suite: String,
        /// Command line
        command: String,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Waiting for the process failed
    #[error("Failed waiting for {suite} tests: {source}")]
    Wait {
        /// Suite name
        suite: String,
        /// Underlying IO error
        source: std::io::Error,
    },
}

/// Summary of one finished test run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestOutcome {
    /// Number of tests run
    pub tests_run: usize,
    /// Number of failed tests
    pub failures: usize,
    /// Number of tests that errored
    pub errors: usize,
    /// Process exit code (`None` if killed by a signal)
    pub exit_code: Option<i32>,
    /// Output lines (stdout then stderr)
    pub output: Vec<String>,
}

impl TestOutcome {
    /// Parse unittest-style output
    ///
    /// Recognizes `Ran N tests in ...` and `FAILED (failures=F, errors=E)`.
    #[must_use]
    pub fn from_output(output: &str, exit_code: Option<i32>) -> Self {
        let mut outcome = Self {
            exit_code,
            output: output.lines().map(str::to_string).collect(),
            ..Self::default()
        };

        for line in &outcome.output {
            if let Some(caps) = RAN_RE.captures(line) {
                outcome.tests_run = caps[1].parse().unwrap_or(0);
            }
            if line.starts_with("FAILED (") {
                for caps in COUNT_RE.captures_iter(line) {
                    let count = caps[2].parse().unwrap_or(0);
                    match &caps[1] {
                        "failures" => outcome.failures = count,
                        _ => outcome.errors = count,
                    }
                }
            }
        }

        outcome
    }

    /// Exited cleanly with no failures or errors
    #[must_use]
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0) && self.failures == 0 && self.errors == 0
    }

    /// The final output line is exactly `OK`
    #[must_use]
    pub fn ends_with_ok(&self) -> bool {
        self.output.last().is_some_and(|line| line.trim_end() == "OK")
    }
}

/// A suite in progress
pub trait PendingSuite: Send {
    /// Block until the suite finishes
    ///
    /// # Errors
    ///
    /// Returns `SuiteError::Wait` if the run could not be joined.
    fn wait(self: Box<Self>) -> Result<TestOutcome, SuiteError>;
}

/// A runnable test suite
pub trait TestSuite: Send {
    /// Human-readable suite name
    fn name(&self) -> &str;

    /// Start the suite without waiting for it
    ///
    /// # Errors
    ///
    /// Returns a `SuiteError` if the suite cannot be started.
    fn start(&self) -> Result<Box<dyn PendingSuite>, SuiteError>;

    /// Run the suite to completion
    ///
    /// # Errors
    ///
    /// See [`TestSuite::start`] and [`PendingSuite::wait`].
    fn run(&self) -> Result<TestOutcome, SuiteError> {
        self.start()?.wait()
    }
}

/// Command line and working directory of a suite
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteCommand {
    /// Program followed by its arguments
    pub command: Vec<String>,
    /// Directory to run in (current directory if unset)
    pub working_dir: Option<PathBuf>,
}

impl SuiteCommand {
    /// Split a whitespace-separated command line
    pub fn parse(line: &str) -> Self {
        Self {
            command: line.split_whitespace().map(str::to_string).collect(),
            working_dir: None,
        }
    }
}

impl fmt::Display for SuiteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command.join(" "))
    }
}

/// Suite run as a subprocess
#[derive(Clone, Debug)]
pub struct CommandSuite {
    name: String,
    command: SuiteCommand,
}

impl CommandSuite {
    /// Create a suite named `name` running `command`
    pub fn new(name: impl Into<String>, command: SuiteCommand) -> Self {
        Self {
            name: name.into(),
            command,
        }
    }

    /// The command this suite runs
    #[must_use]
    pub fn command(&self) -> &SuiteCommand {
        &self.command
    }
}

impl TestSuite for CommandSuite {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<Box<dyn PendingSuite>, SuiteError> {
        let (program, args) =
            self.command
                .command
                .split_first()
                .ok_or_else(|| SuiteError::EmptyCommand {
                    suite: self.name.clone(),
                })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.command.working_dir {
            command.current_dir(dir);
        }

        info!(suite = %self.name, command = %self.command, "Starting test suite");
        let child = command.spawn().map_err(|source| SuiteError::Spawn {
            suite: self.name.clone(),
            command: self.command.to_string(),
            source,
        })?;

        Ok(Box::new(RunningCommand {
            suite: self.name.clone(),
            child,
        }))
    }
}

/// Concatenate captured stdout and stderr, starting stderr on a new line
pub(crate) fn join_streams(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stdout).into_owned();
    if !text.is_empty() && !text.ends_with('\n') && !stderr.is_empty() {
        text.push('\n');
    }
    text.push_str(&String::from_utf8_lossy(stderr));
    text
}

struct RunningCommand {
    suite: String,
    child: Child,
}

impl PendingSuite for RunningCommand {
    fn wait(self: Box<Self>) -> Result<TestOutcome, SuiteError> {
        let Self { suite, child } = *self;
        let output = child
            .wait_with_output()
            .map_err(|source| SuiteError::Wait {
                suite: suite.clone(),
                source,
            })?;

        let text = join_streams(&output.stdout, &output.stderr);
        let outcome = TestOutcome::from_output(&text, output.status.code());
        debug!(
            suite = %suite,
            tests_run = outcome.tests_run,
            failures = outcome.failures,
            errors = outcome.errors,
            exit_code = ?outcome.exit_code,
            "Test suite finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    const PASSING: &str = "..\n\
        ----------------------------------------------------------------------\n\
        Ran 2 tests in 0.001s\n\
        \n\
        OK\n";

    const FAILING: &str = "F.E\n\
        ----------------------------------------------------------------------\n\
        Ran 3 tests in 0.004s\n\
        \n\
        FAILED (failures=1, errors=1)\n";

    #[test]
    fn test_parse_passing_output() {
        let outcome = TestOutcome::from_output(PASSING, Some(0));
        assert_eq!(outcome.tests_run, 2);
        assert_eq!(outcome.failures, 0);
        assert_eq!(outcome.errors, 0);
        assert!(outcome.passed());
        assert!(outcome.ends_with_ok());
    }

    #[test]
    fn test_parse_failing_output() {
        let outcome = TestOutcome::from_output(FAILING, Some(1));
        assert_eq!(outcome.tests_run, 3);
        assert_eq!(outcome.failures, 1);
        assert_eq!(outcome.errors, 1);
        assert!(!outcome.passed());
        assert!(!outcome.ends_with_ok());
    }

    #[test]
    fn test_single_test_and_skips() {
        let outcome = TestOutcome::from_output("Ran 1 test in 0.000s\n\nOK (skipped=1)\n", Some(0));
        assert_eq!(outcome.tests_run, 1);
        assert!(outcome.passed());
        assert!(!outcome.ends_with_ok());
    }

    #[test]
    fn test_crash_without_summary_does_not_pass() {
        let outcome = TestOutcome::from_output("Traceback (most recent call last):\n", Some(1));
        assert_eq!(outcome.tests_run, 0);
        assert!(!outcome.passed());
    }

    #[test]
    fn test_suite_command_parse_and_display() {
        let command = SuiteCommand::parse("coverage run  -p -m unittest");
        assert_eq!(command.command, vec!["coverage", "run", "-p", "-m", "unittest"]);
        assert_eq!(command.to_string(), "coverage run -p -m unittest");
    }

    #[test]
    fn test_empty_command() {
        let suite = CommandSuite::new("normal", SuiteCommand::default());
        assert!(matches!(
            suite.run(),
            Err(SuiteError::EmptyCommand { .. })
        ));
    }

    #[test]
    fn test_missing_program() {
        let suite = CommandSuite::new("normal", SuiteCommand::parse("deplytils-no-such-runner"));
        assert!(matches!(suite.run(), Err(SuiteError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_subprocess() {
        let suite = CommandSuite::new(
            "coverage",
            SuiteCommand {
                command: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "echo 'Ran 4 tests in 0.1s' >&2; echo >&2; echo OK >&2".to_string(),
                ],
                working_dir: None,
            },
        );

        let pending = suite.start().unwrap();
        let outcome = pending.wait().unwrap();
        assert_eq!(outcome.tests_run, 4);
        assert!(outcome.passed());
        assert!(outcome.ends_with_ok());
    }

    #[test]
    fn test_join_streams_separates_unterminated_stdout() {
        assert_eq!(join_streams(b"progress", b"Ran 1 test"), "progress\nRan 1 test");
        assert_eq!(join_streams(b"dots\n", b"Ran 1 test"), "dots\nRan 1 test");
        assert_eq!(join_streams(b"", b"Ran 1 test"), "Ran 1 test");
        assert_eq!(join_streams(b"progress", b""), "progress");
    }

    #[cfg(unix)]
    #[test]
    fn test_stdout_without_newline_keeps_summary_line() {
        let suite = CommandSuite::new(
            "normal",
            SuiteCommand {
                command: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "printf progress; echo 'Ran 2 tests in 0.1s' >&2; echo >&2; echo OK >&2"
                        .to_string(),
                ],
                working_dir: None,
            },
        );

        let outcome = suite.run().unwrap();
        assert_eq!(outcome.output[0], "progress");
        assert_eq!(outcome.tests_run, 2);
        assert!(outcome.passed());
        assert!(outcome.ends_with_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_is_kept() {
        let suite = CommandSuite::new("normal", SuiteCommand::parse("false"));
        let outcome = suite.run().unwrap();
        assert_eq!(outcome.exit_code, Some(1));
        assert!(!outcome.passed());
    }
}
