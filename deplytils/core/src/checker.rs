//! Release Readiness Check
//!
//! Runs every check group a release candidate must pass and counts the
//! groups that failed instead of stopping at the first one:
//!
//! 1. lint (when configured)
//! 2. the normal suite, run inside a coverage context while the coverage
//!    suite runs in the background
//! 3. the coverage suite
//! 4. the combined coverage percentage against the threshold
//!
//! The count becomes the process exit status of `release-ready`.

use std::io::{self, Write};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::DeplytilsConfig;
use crate::context::{CoverageContext, CoverageOptions, NestingDepth};
use crate::gate::check_threshold;
use crate::lint::{Lint, LintError, ProjectLinter};
use crate::measurement::{CoverageTool, MeasurementSession, MockMeasurement};
use crate::suite::{CommandSuite, PendingSuite, SuiteError, TestOutcome, TestSuite};

/// Printed when the normal suite ran nothing
pub const NO_TESTS_MESSAGE: &str = "Did not run any test!";
/// Printed when the linter reported findings
pub const LINT_FAILED_MESSAGE: &str = "Linting did not pass";
/// Printed to the error stream when any group failed
pub const FAILED_SUMMARY: &str = "Not all test groups passed!";
/// Printed to the standard stream when every group passed
pub const SUCCESS_SUMMARY: &str = "Success! All tests passed!";

fn suite_failed_message(suite: &str) -> String {
    format!("Encountered errors and/or failures in {suite} tests")
}

fn coverage_failed_message(threshold: f64) -> String {
    format!("{threshold:.0}% coverage not achieved")
}

/// Orchestrates one release check
pub struct ReleaseChecker {
    combined: Box<dyn MeasurementSession>,
    normal_session: Box<dyn MeasurementSession>,
    linter: Option<Box<dyn Lint>>,
    normal: Box<dyn TestSuite>,
    coverage: Box<dyn TestSuite>,
    threshold: f64,
    depth: Arc<NestingDepth>,
}

impl ReleaseChecker {
    /// Create a checker with no linter and a 100% threshold
    ///
    /// `combined` resets, combines and reports the data of both suites;
    /// `normal_session` measures the normal suite.
    pub fn new(
        combined: Box<dyn MeasurementSession>,
        normal_session: Box<dyn MeasurementSession>,
        normal: Box<dyn TestSuite>,
        coverage: Box<dyn TestSuite>,
    ) -> Self {
        Self {
            combined,
            normal_session,
            linter: None,
            normal,
            coverage,
            threshold: 100.0,
            depth: NestingDepth::global(),
        }
    }

    /// Build a checker from loaded configuration
    ///
    /// # Errors
    ///
    /// Returns `LintError::InvalidPattern` if the lint exclusion pattern does
    /// not compile.
    pub fn from_config(config: &DeplytilsConfig) -> Result<Self, LintError> {
        let tool = coverage_tool(config);
        let mut checker = Self::new(
            Box::new(tool.clone()),
            Box::new(tool),
            Box::new(CommandSuite::new("normal", config.normal_suite.clone())),
            Box::new(CommandSuite::new("coverage", config.coverage_suite.clone())),
        )
        .with_threshold(config.coverage.threshold);

        if config.lint.enabled {
            let lint = &config.lint;
            let mut linter = ProjectLinter::new(&lint.root)
                .with_program(&lint.program)
                .with_args(lint.args.clone())
                .with_exclude(&lint.exclude)?;
            if let Some(rcfile) = lint.effective_rcfile() {
                linter = linter.with_rcfile(rcfile);
            }
            checker = checker.with_linter(Box::new(linter));
        }

        Ok(checker)
    }

    /// Lint before testing
    #[must_use]
    pub fn with_linter(mut self, linter: Box<dyn Lint>) -> Self {
        self.linter = Some(linter);
        self
    }

    /// Minimum combined percentage
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Nesting counter for the normal suite's coverage context
    #[must_use]
    pub fn with_depth(mut self, depth: Arc<NestingDepth>) -> Self {
        self.depth = depth;
        self
    }

    /// Run against the process streams
    ///
    /// # Errors
    ///
    /// Returns an error only if writing to stdout or stderr fails.
    pub fn run(self) -> io::Result<usize> {
        self.run_with(&mut io::stdout().lock(), &mut io::stderr().lock())
    }

    /// Run every group and return the number that failed
    ///
    /// Progress and failures go to `err`; only the success line goes to
    /// `out`.
    ///
    /// # Errors
    ///
    /// Returns an error only if writing to `out` or `err` fails.
    pub fn run_with(mut self, out: &mut dyn Write, err: &mut dyn Write) -> io::Result<usize> {
        let mut failures = 0;

        if let Err(e) = self.combined.erase() {
            warn!(error = %e, "Could not reset coverage data");
            writeln!(err, "Could not reset coverage data: {e}")?;
            failures += 1;
        }

        if let Some(linter) = &self.linter {
            if !lint_passed(linter.as_ref(), err)? {
                writeln!(err, "{LINT_FAILED_MESSAGE}")?;
                failures += 1;
            }
        }

        info!(suite = self.coverage.name(), "Starting background suite");
        let pending = self.coverage.start();

        let normal = self.run_normal_suite(err)?;

        let coverage = match pending {
            Ok(pending) => wait_and_echo(pending, err)?,
            Err(e) => Err(e),
        };

        failures += check_normal(normal, err)?;
        failures += check_coverage_suite(coverage, err)?;

        if !self.combined_coverage_met(err)? {
            writeln!(err, "{}", coverage_failed_message(self.threshold))?;
            failures += 1;
        }

        if failures != 0 {
            warn!(failures, "Release check failed");
            writeln!(err, "{FAILED_SUMMARY}")?;
        } else {
            info!("Release check passed");
            writeln!(out, "{SUCCESS_SUMMARY}")?;
        }
        Ok(failures)
    }

    fn run_normal_suite(
        &mut self,
        err: &mut dyn Write,
    ) -> io::Result<Option<Result<TestOutcome, SuiteError>>> {
        let session = std::mem::replace(
            &mut self.normal_session,
            Box::new(MockMeasurement::default()),
        );
        let options = CoverageOptions::default().with_report(false);
        let context = match CoverageContext::new(options, session, &self.depth) {
            Ok(context) => context,
            Err(e) => {
                writeln!(err, "{e}")?;
                return Ok(None);
            }
        };

        let normal = &self.normal;
        match context.scope(|| normal.run()) {
            Ok((outcome, _)) => {
                if let Ok(outcome) = &outcome {
                    echo(&outcome.output, err)?;
                }
                Ok(Some(outcome))
            }
            Err(e) => {
                writeln!(err, "{e}")?;
                Ok(None)
            }
        }
    }

    fn combined_coverage_met(&mut self, err: &mut dyn Write) -> io::Result<bool> {
        let measured = self
            .combined
            .combine()
            .and_then(|()| self.combined.report(err, false));
        match measured {
            Ok(percentage) => match check_threshold(percentage, self.threshold) {
                Ok(()) => Ok(true),
                Err(below) => {
                    warn!(%below, "Combined coverage below threshold");
                    Ok(false)
                }
            },
            Err(e) => {
                warn!(error = %e, "Combined coverage could not be measured");
                writeln!(err, "{e}")?;
                Ok(false)
            }
        }
    }
}

impl std::fmt::Debug for ReleaseChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseChecker")
            .field("normal", &self.normal.name())
            .field("coverage", &self.coverage.name())
            .field("lint", &self.linter.is_some())
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

fn coverage_tool(config: &DeplytilsConfig) -> CoverageTool {
    let mut words = config.coverage.program.split_whitespace();
    let program = words.next().unwrap_or_default();
    let mut tool = CoverageTool::new(program)
        .with_program_args(words)
        .with_working_dir(&config.coverage.data_dir);
    if let Some(rcfile) = &config.coverage.rcfile {
        tool = tool.with_rcfile(rcfile);
    }
    tool
}

fn lint_passed(linter: &dyn Lint, err: &mut dyn Write) -> io::Result<bool> {
    match linter.lint() {
        Ok(report) => {
            if !report.success() {
                err.write_all(report.output.as_bytes())?;
            }
            Ok(report.success())
        }
        Err(e) => {
            writeln!(err, "{e}")?;
            Ok(false)
        }
    }
}

fn wait_and_echo(
    pending: Box<dyn PendingSuite>,
    err: &mut dyn Write,
) -> io::Result<Result<TestOutcome, SuiteError>> {
    let outcome = pending.wait();
    if let Ok(outcome) = &outcome {
        echo(&outcome.output, err)?;
    }
    Ok(outcome)
}

fn echo(lines: &[String], err: &mut dyn Write) -> io::Result<()> {
    for line in lines {
        writeln!(err, "{line}")?;
    }
    Ok(())
}

/// Count failed normal-suite groups: nothing run, and failures or errors
fn check_normal(
    normal: Option<Result<TestOutcome, SuiteError>>,
    err: &mut dyn Write,
) -> io::Result<usize> {
    let outcome = match normal {
        Some(Ok(outcome)) => outcome,
        Some(Err(e)) => {
            writeln!(err, "{e}")?;
            writeln!(err, "{}", suite_failed_message("normal"))?;
            return Ok(1);
        }
        None => {
            writeln!(err, "{}", suite_failed_message("normal"))?;
            return Ok(1);
        }
    };

    // An empty run may still exit non-zero (unittest uses 5); it counts once
    if outcome.tests_run == 0 {
        writeln!(err, "{NO_TESTS_MESSAGE}")?;
        return Ok(1);
    }
    if !outcome.passed() {
        writeln!(err, "{}", suite_failed_message("normal"))?;
        return Ok(1);
    }
    Ok(0)
}

fn check_coverage_suite(
    coverage: Result<TestOutcome, SuiteError>,
    err: &mut dyn Write,
) -> io::Result<usize> {
    let passed = match coverage {
        Ok(outcome) => outcome.exit_code == Some(0) && outcome.ends_with_ok(),
        Err(e) => {
            writeln!(err, "{e}")?;
            false
        }
    };
    if passed {
        return Ok(0);
    }
    writeln!(err, "{}", suite_failed_message("coverage"))?;
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use crate::lint::LintReport;
    use crate::measurement::MeasurementError;

    struct FixedSuite {
        name: &'static str,
        outcome: TestOutcome,
    }

    struct Finished(TestOutcome);

    impl PendingSuite for Finished {
        fn wait(self: Box<Self>) -> Result<TestOutcome, SuiteError> {
            Ok(self.0)
        }
    }

    impl TestSuite for FixedSuite {
        fn name(&self) -> &str {
            self.name
        }

        fn start(&self) -> Result<Box<dyn PendingSuite>, SuiteError> {
            Ok(Box::new(Finished(self.outcome.clone())))
        }
    }

    fn suite(name: &'static str, output: &str, exit_code: i32) -> Box<dyn TestSuite> {
        Box::new(FixedSuite {
            name,
            outcome: TestOutcome::from_output(output, Some(exit_code)),
        })
    }

    struct FixedLint(bool);

    impl Lint for FixedLint {
        fn lint(&self) -> Result<LintReport, LintError> {
            let (exit_code, output) = if self.0 {
                (0, "")
            } else {
                (16, "C0114: missing docstring\n")
            };
            Ok(LintReport {
                files: Vec::new(),
                exit_code: Some(exit_code),
                output: output.to_string(),
            })
        }
    }

    /// Session recording how often it is erased and combined
    #[derive(Clone, Default)]
    struct CountingSession {
        report: Option<f64>,
        erased: Arc<AtomicUsize>,
        combined: Arc<AtomicUsize>,
    }

    impl MeasurementSession for CountingSession {
        fn start(&mut self) -> Result<(), MeasurementError> {
            Ok(())
        }

        fn stop(&mut self) -> Result<(), MeasurementError> {
            Ok(())
        }

        fn report(&mut self, _out: &mut dyn Write, _quiet: bool) -> Result<f64, MeasurementError> {
            self.report.ok_or(MeasurementError::NoMeasurementData)
        }

        fn html_report(&mut self) -> Result<f64, MeasurementError> {
            self.report.ok_or(MeasurementError::NoMeasurementData)
        }

        fn xml_report(&mut self) -> Result<f64, MeasurementError> {
            self.report.ok_or(MeasurementError::NoMeasurementData)
        }

        fn combine(&mut self) -> Result<(), MeasurementError> {
            self.combined.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn erase(&mut self) -> Result<(), MeasurementError> {
            self.erased.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const PASSING: &str = "..\nRan 2 tests in 0.01s\n\nOK\n";
    const FAILING: &str = "F.\nRan 2 tests in 0.01s\n\nFAILED (failures=1)\n";
    const EMPTY: &str = "\nRan 0 tests in 0.000s\n\nOK\n";

    fn checker(
        combined: f64,
        normal: Box<dyn TestSuite>,
        coverage: Box<dyn TestSuite>,
    ) -> ReleaseChecker {
        ReleaseChecker::new(
            Box::new(MockMeasurement::reporting(combined)),
            Box::new(MockMeasurement::default()),
            normal,
            coverage,
        )
        .with_depth(Arc::new(NestingDepth::new()))
    }

    fn run(checker: ReleaseChecker) -> (usize, String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let failures = checker.run_with(&mut out, &mut err).unwrap();
        (
            failures,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_all_groups_pass() {
        let session = CountingSession {
            report: Some(100.0),
            ..CountingSession::default()
        };
        let checker = ReleaseChecker::new(
            Box::new(session.clone()),
            Box::new(MockMeasurement::default()),
            suite("normal", PASSING, 0),
            suite("coverage", PASSING, 0),
        )
        .with_depth(Arc::new(NestingDepth::new()))
        .with_linter(Box::new(FixedLint(true)));

        let (failures, out, err) = run(checker);
        assert_eq!(failures, 0);
        assert_eq!(out, "Success! All tests passed!\n");
        assert!(!err.contains(FAILED_SUMMARY));
        assert_eq!(session.erased.load(Ordering::SeqCst), 1);
        assert_eq!(session.combined.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_coverage_output_is_echoed_to_err() {
        let (_, _, err) = run(checker(
            100.0,
            suite("normal", PASSING, 0),
            suite("coverage", "coverage-only line\nRan 1 test in 0s\n\nOK\n", 0),
        ));
        assert!(err.contains("coverage-only line\n"));
    }

    #[test]
    fn test_failures_are_counted_not_fatal() {
        let (failures, out, err) = run(
            checker(
                80.0,
                suite("normal", FAILING, 1),
                suite("coverage", "Ran 1 test in 0s\n\nFAILED (errors=1)\n", 1),
            )
            .with_linter(Box::new(FixedLint(false))),
        );

        assert_eq!(failures, 4);
        assert_eq!(out, "");
        assert!(err.contains("C0114: missing docstring"));
        assert!(err.contains(LINT_FAILED_MESSAGE));
        assert!(err.contains("Encountered errors and/or failures in normal tests"));
        assert!(err.contains("Encountered errors and/or failures in coverage tests"));
        assert!(err.contains("100% coverage not achieved"));
        assert!(err.trim_end().ends_with(FAILED_SUMMARY));
    }

    #[test]
    fn test_no_tests_run() {
        let (failures, _, err) = run(checker(
            100.0,
            suite("normal", EMPTY, 0),
            suite("coverage", PASSING, 0),
        ));
        assert_eq!(failures, 1);
        assert!(err.contains(NO_TESTS_MESSAGE));
    }

    #[test]
    fn test_empty_run_with_nonzero_exit_counts_once() {
        let (failures, _, err) = run(checker(
            100.0,
            suite("normal", "\nRan 0 tests in 0.000s\n\nNO TESTS RAN\n", 5),
            suite("coverage", PASSING, 0),
        ));
        assert_eq!(failures, 1);
        assert!(err.contains(NO_TESTS_MESSAGE));
        assert!(!err.contains("Encountered errors and/or failures in normal tests"));
    }

    #[test]
    fn test_coverage_suite_must_end_with_ok() {
        let (failures, _, err) = run(checker(
            100.0,
            suite("normal", PASSING, 0),
            suite("coverage", "Ran 1 test in 0s\n\nOK (skipped=1)\n", 0),
        ));
        assert_eq!(failures, 1);
        assert!(err.contains("Encountered errors and/or failures in coverage tests"));
    }

    #[test]
    fn test_threshold_is_configurable() {
        let (failures, _, _) = run(
            checker(85.0, suite("normal", PASSING, 0), suite("coverage", PASSING, 0))
                .with_threshold(80.0),
        );
        assert_eq!(failures, 0);

        let (failures, _, err) = run(
            checker(79.9, suite("normal", PASSING, 0), suite("coverage", PASSING, 0))
                .with_threshold(80.0),
        );
        assert_eq!(failures, 1);
        assert!(err.contains("80% coverage not achieved"));
    }

    #[test]
    fn test_missing_coverage_data_fails_coverage_group() {
        let checker = ReleaseChecker::new(
            Box::new(MockMeasurement::default()),
            Box::new(MockMeasurement::default()),
            suite("normal", PASSING, 0),
            suite("coverage", PASSING, 0),
        )
        .with_depth(Arc::new(NestingDepth::new()));

        let (failures, _, err) = run(checker);
        assert_eq!(failures, 1);
        assert!(err.contains("No data to report."));
        assert!(err.contains("100% coverage not achieved"));
    }

    #[test]
    fn test_normal_suite_runs_outermost() {
        let depth = Arc::new(NestingDepth::new());
        let (failures, _, _) = run(
            checker(100.0, suite("normal", PASSING, 0), suite("coverage", PASSING, 0))
                .with_depth(Arc::clone(&depth)),
        );
        assert_eq!(failures, 0);
        assert_eq!(depth.current(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_failure_counts_as_group() {
        use crate::suite::SuiteCommand;

        let (failures, _, err) = run(checker(
            100.0,
            suite("normal", PASSING, 0),
            Box::new(CommandSuite::new(
                "coverage",
                SuiteCommand::parse("deplytils-no-such-runner"),
            )),
        ));
        assert_eq!(failures, 1);
        assert!(err.contains("Failed to start coverage tests"));
    }
}
