//! Stand-in measurement session

use std::io::Write;

use super::{MeasurementError, MeasurementSession};

/// Measurement session that never measures
///
/// Every report returns the configured percentage, or fails with
/// `NoMeasurementData` when none was configured.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MockMeasurement {
    report_value: Option<f64>,
}

impl MockMeasurement {
    /// Create a mock reporting `report_value`
    #[must_use]
    pub fn new(report_value: Option<f64>) -> Self {
        Self { report_value }
    }

    /// Create a mock reporting `percentage`
    #[must_use]
    pub fn reporting(percentage: f64) -> Self {
        Self::new(Some(percentage))
    }

    /// The configured percentage
    #[must_use]
    pub fn report_value(&self) -> Option<f64> {
        self.report_value
    }

    fn total(&self) -> Result<f64, MeasurementError> {
        self.report_value.ok_or(MeasurementError::NoMeasurementData)
    }
}

impl MeasurementSession for MockMeasurement {
    fn start(&mut self) -> Result<(), MeasurementError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MeasurementError> {
        Ok(())
    }

    fn report(&mut self, _out: &mut dyn Write, _quiet: bool) -> Result<f64, MeasurementError> {
        self.total()
    }

    fn html_report(&mut self) -> Result<f64, MeasurementError> {
        self.total()
    }

    fn xml_report(&mut self) -> Result<f64, MeasurementError> {
        self.total()
    }
}
