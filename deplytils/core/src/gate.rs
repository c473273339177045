//! Coverage threshold gate

use thiserror::Error;

/// Measured coverage fell short of the required minimum
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("{percentage:.2}% does not meet {threshold:.2}% threshold")]
pub struct CoverageBelowThreshold {
    /// Measured percentage
    pub percentage: f64,
    /// Required minimum
    pub threshold: f64,
}

/// Fail if `percentage` is below `threshold`
///
/// # Errors
///
/// Returns `CoverageBelowThreshold` carrying both values when `percentage < threshold`.
pub fn check_threshold(percentage: f64, threshold: f64) -> Result<(), CoverageBelowThreshold> {
    if percentage < threshold {
        return Err(CoverageBelowThreshold {
            percentage,
            threshold,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meets_threshold() {
        assert!(check_threshold(100.0, 100.0).is_ok());
        assert!(check_threshold(99.5, 90.0).is_ok());
        assert!(check_threshold(0.0, 0.0).is_ok());
    }

    #[test]
    fn test_misses_threshold() {
        let err = check_threshold(80.0, 100.0).unwrap_err();
        assert_eq!(err.percentage, 80.0);
        assert_eq!(err.threshold, 100.0);

        let message = err.to_string();
        assert!(message.contains("80.00"));
        assert!(message.contains("100.00"));
        assert_eq!(message, "80.00% does not meet 100.00% threshold");
    }

    #[test]
    fn test_rounds_to_two_places() {
        let err = check_threshold(99.999, 100.0).unwrap_err();
        assert_eq!(err.to_string(), "100.00% does not meet 100.00% threshold");
    }
}
