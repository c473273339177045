//! Coverage Measurement Sessions
//!
//! A [`MeasurementSession`] brackets a measured run with `start`/`stop` and
//! reports the covered percentage afterwards. Two implementations exist:
//!
//! - [`CoverageTool`]: drives an external coverage command-line tool
//! - [`MockMeasurement`]: returns a fixed percentage, used when sessions nest
//!   (a measurement tool measuring itself produces garbage) and in tests

mod mock;
mod tool;

pub use mock::MockMeasurement;
pub use tool::CoverageTool;

use std::io::Write;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while measuring or reporting coverage
#[derive(Debug, Error)]
pub enum MeasurementError {
    /// A report was requested but nothing has been recorded
    #[error("No data to report.")]
    NoMeasurementData,

    /// The external tool exited unsuccessfully
    #[error("{program} exited with {status}: {stderr}")]
    ToolFailed {
        /// Program that was run
        program: String,
        /// Exit status description
        status: String,
        /// Captured error output
        stderr: String,
    },

    /// The tool's total percentage could not be parsed
    #[error("Could not read a coverage total from output: {output:?}")]
    UnparsableTotal {
        /// Raw tool output
        output: String,
    },

    /// IO failure while running the tool or writing the report
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output format of a coverage report
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    /// Human-readable console table
    #[default]
    Report,
    /// HTML pages
    Html,
    /// XML (Cobertura) file
    Xml,
}

impl std::fmt::Display for ReportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Report => write!(f, "report"),
            Self::Html => write!(f, "html"),
            Self::Xml => write!(f, "xml"),
        }
    }
}

/// A coverage measurement session
///
/// Percentages are floats in `0.0..=100.0`.
pub trait MeasurementSession: Send {
    /// Begin counting executed lines and branches
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn start(&mut self) -> Result<(), MeasurementError>;

    /// Stop counting
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn stop(&mut self) -> Result<(), MeasurementError>;

    /// Write the console report to `out` (unless `quiet`) and return the total
    ///
    /// # Errors
    ///
    /// Returns `MeasurementError::NoMeasurementData` if nothing was recorded.
    fn report(&mut self, out: &mut dyn Write, quiet: bool) -> Result<f64, MeasurementError>;

    /// Produce the HTML report and return the total
    ///
    /// # Errors
    ///
    /// Returns `MeasurementError::NoMeasurementData` if nothing was recorded.
    fn html_report(&mut self) -> Result<f64, MeasurementError>;

    /// Produce the XML report and return the total
    ///
    /// # Errors
    ///
    /// Returns `MeasurementError::NoMeasurementData` if nothing was recorded.
    fn xml_report(&mut self) -> Result<f64, MeasurementError>;

    /// Merge data files from separate runs into one
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn combine(&mut self) -> Result<(), MeasurementError> {
        Ok(())
    }

    /// Remove persisted measurement data
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn erase(&mut self) -> Result<(), MeasurementError> {
        Ok(())
    }

    /// Produce a report of the given kind
    ///
    /// # Errors
    ///
    /// See the individual report methods.
    fn report_as(
        &mut self,
        kind: ReportKind,
        out: &mut dyn Write,
        quiet: bool,
    ) -> Result<f64, MeasurementError> {
        match kind {
            ReportKind::Report => self.report(out, quiet),
            ReportKind::Html => self.html_report(),
            ReportKind::Xml => self.xml_report(),
        }
    }
}

impl<S: MeasurementSession + ?Sized> MeasurementSession for Box<S> {
    fn start(&mut self) -> Result<(), MeasurementError> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<(), MeasurementError> {
        (**self).stop()
    }

    fn report(&mut self, out: &mut dyn Write, quiet: bool) -> Result<f64, MeasurementError> {
        (**self).report(out, quiet)
    }

    fn html_report(&mut self) -> Result<f64, MeasurementError> {
        (**self).html_report()
    }

    fn xml_report(&mut self) -> Result<f64, MeasurementError> {
        (**self).xml_report()
    }

    fn combine(&mut self) -> Result<(), MeasurementError> {
        (**self).combine()
    }

    fn erase(&mut self) -> Result<(), MeasurementError> {
        (**self).erase()
    }
}
