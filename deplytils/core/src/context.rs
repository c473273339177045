//! Scoped Coverage Measurement
//!
//! [`CoverageContext`] starts a measurement session on `enter`, stops it on
//! `exit` and optionally reports the covered percentage. [`StrictCoverage`]
//! additionally fails when that percentage is below a threshold.
//!
//! # Nesting
//!
//! A coverage tool cannot measure itself. Contexts therefore track how deeply
//! they are nested through a [`NestingDepth`]: only the outermost context
//! uses the real session, inner ones fall back to a [`MockMeasurement`]
//! reporting `CoverageOptions::mock_report`.
//!
//! The depth is passed explicitly. [`NestingDepth::global`] is the single
//! process-wide counter for the outermost orchestration layer; it is atomic,
//! but contexts started concurrently from different threads still race on
//! which one counts as outermost.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::debug;

use crate::gate::{check_threshold, CoverageBelowThreshold};
use crate::measurement::{MeasurementError, MeasurementSession, MockMeasurement, ReportKind};

static GLOBAL_DEPTH: Lazy<Arc<NestingDepth>> = Lazy::new(|| Arc::new(NestingDepth::new()));

/// Errors raised by coverage scopes
#[derive(Debug, Error)]
pub enum CoverageError {
    /// The context was configured or used in an unsupported way
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// Coverage did not meet the threshold
    #[error(transparent)]
    BelowThreshold(#[from] CoverageBelowThreshold),

    /// The session failed to measure or report
    #[error(transparent)]
    Measurement(#[from] MeasurementError),
}

/// Counter of active measurement contexts
#[derive(Debug, Default)]
pub struct NestingDepth {
    depth: AtomicUsize,
}

impl NestingDepth {
    /// A counter with nothing active
    #[must_use]
    pub const fn new() -> Self {
        Self {
            depth: AtomicUsize::new(0),
        }
    }

    /// The process-wide counter
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_DEPTH)
    }

    /// Number of active contexts
    #[must_use]
    pub fn current(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Register one more active context
    ///
    /// The returned token releases the level when dropped.
    #[must_use]
    pub fn acquire(self: &Arc<Self>) -> DepthToken {
        let level = self.depth.fetch_add(1, Ordering::SeqCst);
        DepthToken {
            depth: Arc::clone(self),
            level,
        }
    }
}

/// One held level of a [`NestingDepth`]
#[derive(Debug)]
pub struct DepthToken {
    depth: Arc<NestingDepth>,
    level: usize,
}

impl DepthToken {
    /// Depth at the time of acquisition (0 for the outermost)
    #[must_use]
    pub fn level(&self) -> usize {
        self.level
    }

    /// Whether this token was the first acquired
    #[must_use]
    pub fn is_outermost(&self) -> bool {
        self.level == 0
    }
}

impl Drop for DepthToken {
    fn drop(&mut self) {
        self.depth.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// How a coverage context reports
#[derive(Clone, Debug, PartialEq)]
pub struct CoverageOptions {
    /// Whether to produce a report on exit
    pub report: bool,

    /// Which report to produce
    pub report_kind: ReportKind,

    /// Discard the console report; only valid with `ReportKind::Report`
    pub silent: bool,

    /// Percentage the mock reports when this context is nested
    pub mock_report: Option<f64>,
}

impl Default for CoverageOptions {
    fn default() -> Self {
        Self {
            report: true,
            report_kind: ReportKind::Report,
            silent: true,
            mock_report: None,
        }
    }
}

impl CoverageOptions {
    /// Enable or disable reporting
    #[must_use]
    pub fn with_report(mut self, report: bool) -> Self {
        self.report = report;
        self
    }

    /// Set the report kind
    #[must_use]
    pub fn with_report_kind(mut self, kind: ReportKind) -> Self {
        self.report_kind = kind;
        self
    }

    /// Enable or disable silencing
    #[must_use]
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Set the percentage reported when nested
    #[must_use]
    pub fn with_mock_report(mut self, percentage: f64) -> Self {
        self.mock_report = Some(percentage);
        self
    }

    fn validate(&self) -> Result<(), CoverageError> {
        if self.silent && self.report_kind != ReportKind::Report {
            return Err(CoverageError::ContractViolation(format!(
                "only the console report can be silenced, not the {} report",
                self.report_kind
            )));
        }
        Ok(())
    }
}

/// Start/stop/report scope around a measured run
pub struct CoverageContext {
    options: CoverageOptions,
    session: Box<dyn MeasurementSession>,
    output: Box<dyn Write + Send>,
    mocked: bool,
    token: Option<DepthToken>,
    started: bool,
}

impl CoverageContext {
    /// Create a context, choosing the session by nesting depth
    ///
    /// `real` is used when no other context on `depth` is active; otherwise a
    /// mock reporting `options.mock_report` is used and `real` is dropped.
    ///
    /// # Errors
    ///
    /// Returns `CoverageError::ContractViolation` for `silent` with a report
    /// kind other than `ReportKind::Report`.
    pub fn new(
        options: CoverageOptions,
        real: Box<dyn MeasurementSession>,
        depth: &Arc<NestingDepth>,
    ) -> Result<Self, CoverageError> {
        options.validate()?;

        let token = depth.acquire();
        let mocked = !token.is_outermost();
        let session: Box<dyn MeasurementSession> = if mocked {
            Box::new(MockMeasurement::new(options.mock_report))
        } else {
            real
        };
        debug!(level = token.level(), mocked, "Coverage context created");

        Ok(Self {
            options,
            session,
            output: Box::new(io::stdout()),
            mocked,
            token: Some(token),
            started: false,
        })
    }

    /// Create a context on the process-wide nesting counter
    ///
    /// # Errors
    ///
    /// See [`CoverageContext::new`].
    pub fn with_global_depth(
        options: CoverageOptions,
        real: Box<dyn MeasurementSession>,
    ) -> Result<Self, CoverageError> {
        Self::new(options, real, &NestingDepth::global())
    }

    /// Send the non-silent console report to `output` instead of stdout
    #[must_use]
    pub fn with_report_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = output;
        self
    }

    /// Whether the mock session was chosen
    #[must_use]
    pub fn is_mocked(&self) -> bool {
        self.mocked
    }

    /// Reporting options
    #[must_use]
    pub fn options(&self) -> &CoverageOptions {
        &self.options
    }

    /// Start measuring
    ///
    /// # Errors
    ///
    /// Returns `CoverageError::ContractViolation` if already entered, or the
    /// session's start error.
    pub fn enter(&mut self) -> Result<(), CoverageError> {
        if self.started {
            return Err(CoverageError::ContractViolation(
                "coverage context entered twice".to_string(),
            ));
        }
        self.session.start()?;
        self.started = true;
        Ok(())
    }

    /// Stop measuring, release the nesting level and report if configured
    ///
    /// # Errors
    ///
    /// Returns the session's stop or report error.
    pub fn exit(mut self) -> Result<Option<f64>, CoverageError> {
        let stopped = if self.started {
            self.session.stop()
        } else {
            Ok(())
        };
        self.started = false;
        self.token.take();
        stopped?;

        if !self.options.report {
            return Ok(None);
        }

        let kind = self.options.report_kind;
        let percentage = if self.options.silent {
            self.session.report_as(kind, &mut io::sink(), true)?
        } else {
            self.session.report_as(kind, &mut self.output, false)?
        };
        debug!(percentage, %kind, "Coverage reported");
        Ok(Some(percentage))
    }

    /// Run `body` between `enter` and `exit`
    ///
    /// # Errors
    ///
    /// See [`CoverageContext::enter`] and [`CoverageContext::exit`].
    pub fn scope<R>(mut self, body: impl FnOnce() -> R) -> Result<(R, Option<f64>), CoverageError> {
        self.enter()?;
        let value = body();
        let percentage = self.exit()?;
        Ok((value, percentage))
    }
}

impl std::fmt::Debug for CoverageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverageContext")
            .field("options", &self.options)
            .field("mocked", &self.mocked)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

/// Coverage context that fails below a threshold
#[derive(Debug)]
pub struct StrictCoverage {
    context: CoverageContext,
    threshold: f64,
}

impl StrictCoverage {
    /// Create a strict context
    ///
    /// # Errors
    ///
    /// Returns `CoverageError::ContractViolation` if `options.report` is false
    /// (there would be nothing to compare), or any [`CoverageContext::new`] error.
    pub fn new(
        threshold: f64,
        options: CoverageOptions,
        real: Box<dyn MeasurementSession>,
        depth: &Arc<NestingDepth>,
    ) -> Result<Self, CoverageError> {
        if !options.report {
            return Err(CoverageError::ContractViolation(
                "a strict coverage context must report to compare against its threshold"
                    .to_string(),
            ));
        }
        Ok(Self {
            context: CoverageContext::new(options, real, depth)?,
            threshold,
        })
    }

    /// Create a strict context on the process-wide nesting counter
    ///
    /// # Errors
    ///
    /// See [`StrictCoverage::new`].
    pub fn with_global_depth(
        threshold: f64,
        options: CoverageOptions,
        real: Box<dyn MeasurementSession>,
    ) -> Result<Self, CoverageError> {
        Self::new(threshold, options, real, &NestingDepth::global())
    }

    /// Required minimum percentage
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether the mock session was chosen
    #[must_use]
    pub fn is_mocked(&self) -> bool {
        self.context.is_mocked()
    }

    /// Start measuring
    ///
    /// # Errors
    ///
    /// See [`CoverageContext::enter`].
    pub fn enter(&mut self) -> Result<(), CoverageError> {
        self.context.enter()
    }

    /// Stop, report and compare against the threshold
    ///
    /// # Errors
    ///
    /// Returns `CoverageError::BelowThreshold` when the reported percentage is
    /// below the threshold, or any [`CoverageContext::exit`] error.
    pub fn exit(self) -> Result<f64, CoverageError> {
        let threshold = self.threshold;
        let percentage = self.context.exit()?.ok_or_else(|| {
            CoverageError::ContractViolation("strict coverage produced no report".to_string())
        })?;
        check_threshold(percentage, threshold)?;
        Ok(percentage)
    }

    /// Run `body` between `enter` and `exit`
    ///
    /// # Errors
    ///
    /// See [`StrictCoverage::exit`].
    pub fn scope<R>(mut self, body: impl FnOnce() -> R) -> Result<(R, f64), CoverageError> {
        self.enter()?;
        let value = body();
        let percentage = self.exit()?;
        Ok((value, percentage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_depth() -> (Arc<NestingDepth>, DepthToken) {
        let depth = Arc::new(NestingDepth::new());
        let outer = depth.acquire();
        (depth, outer)
    }

    #[test]
    fn test_depth_tokens_release_on_drop() {
        let depth = Arc::new(NestingDepth::new());
        let first = depth.acquire();
        let second = depth.acquire();
        assert!(first.is_outermost());
        assert_eq!(second.level(), 1);
        assert_eq!(depth.current(), 2);

        drop(second);
        drop(first);
        assert_eq!(depth.current(), 0);
    }

    #[test]
    fn test_outermost_uses_real_session() {
        let depth = Arc::new(NestingDepth::new());
        let context = CoverageContext::new(
            CoverageOptions::default(),
            Box::new(MockMeasurement::reporting(55.0)),
            &depth,
        )
        .unwrap();
        assert!(!context.is_mocked());

        let ((), percentage) = context.scope(|| ()).unwrap();
        assert_eq!(percentage, Some(55.0));
        assert_eq!(depth.current(), 0);
    }

    #[test]
    fn test_nested_uses_mock_session() {
        let (depth, _outer) = nested_depth();
        let context = CoverageContext::new(
            CoverageOptions::default().with_mock_report(12.5),
            Box::new(MockMeasurement::reporting(99.0)),
            &depth,
        )
        .unwrap();
        assert!(context.is_mocked());

        let (_, percentage) = context.scope(|| ()).unwrap();
        assert_eq!(percentage, Some(12.5));
    }

    #[test]
    fn test_dropped_context_releases_depth() {
        let depth = Arc::new(NestingDepth::new());
        {
            let _unused = CoverageContext::new(
                CoverageOptions::default(),
                Box::new(MockMeasurement::default()),
                &depth,
            )
            .unwrap();
            assert_eq!(depth.current(), 1);
        }
        assert_eq!(depth.current(), 0);
    }

    #[test]
    fn test_silent_requires_console_report() {
        let depth = Arc::new(NestingDepth::new());
        let err = CoverageContext::new(
            CoverageOptions::default()
                .with_report_kind(ReportKind::Xml)
                .with_silent(true),
            Box::new(MockMeasurement::default()),
            &depth,
        )
        .unwrap_err();
        assert!(matches!(err, CoverageError::ContractViolation(_)));
        assert_eq!(depth.current(), 0);
    }

    #[test]
    fn test_no_report() {
        let depth = Arc::new(NestingDepth::new());
        let context = CoverageContext::new(
            CoverageOptions::default().with_report(false),
            Box::new(MockMeasurement::default()),
            &depth,
        )
        .unwrap();
        let (value, percentage) = context.scope(|| 7).unwrap();
        assert_eq!(value, 7);
        assert_eq!(percentage, None);
    }

    #[test]
    fn test_report_without_data_fails() {
        let depth = Arc::new(NestingDepth::new());
        let context = CoverageContext::new(
            CoverageOptions::default(),
            Box::new(MockMeasurement::default()),
            &depth,
        )
        .unwrap();
        let err = context.scope(|| ()).unwrap_err();
        assert!(matches!(
            err,
            CoverageError::Measurement(MeasurementError::NoMeasurementData)
        ));
    }

    #[test]
    fn test_enter_twice_is_violation() {
        let depth = Arc::new(NestingDepth::new());
        let mut context = CoverageContext::new(
            CoverageOptions::default().with_report(false),
            Box::new(MockMeasurement::default()),
            &depth,
        )
        .unwrap();
        context.enter().unwrap();
        assert!(matches!(
            context.enter(),
            Err(CoverageError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_strict_meets_threshold() {
        let (depth, _outer) = nested_depth();
        let strict = StrictCoverage::new(
            100.0,
            CoverageOptions::default()
                .with_silent(false)
                .with_mock_report(100.0),
            Box::new(MockMeasurement::default()),
            &depth,
        )
        .unwrap();
        assert!(strict.is_mocked());
        let (_, percentage) = strict.scope(|| ()).unwrap();
        assert_eq!(percentage, 100.0);
    }

    #[test]
    fn test_strict_misses_threshold() {
        let (depth, _outer) = nested_depth();
        let strict = StrictCoverage::new(
            100.0,
            CoverageOptions::default().with_mock_report(80.0),
            Box::new(MockMeasurement::default()),
            &depth,
        )
        .unwrap();
        let err = strict.scope(|| ()).unwrap_err();
        match err {
            CoverageError::BelowThreshold(below) => {
                let message = below.to_string();
                assert!(message.contains("80.00"));
                assert!(message.contains("100.00"));
            }
            other => panic!("expected BelowThreshold, got {other:?}"),
        }
        assert_eq!(depth.current(), 1);
    }

    #[test]
    fn test_strict_requires_report() {
        let depth = Arc::new(NestingDepth::new());
        let err = StrictCoverage::new(
            90.0,
            CoverageOptions::default().with_report(false),
            Box::new(MockMeasurement::default()),
            &depth,
        )
        .unwrap_err();
        assert!(matches!(err, CoverageError::ContractViolation(_)));
    }
}
