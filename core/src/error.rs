//! Error types for the navigation filter
//!
//! Every mutating filter entry point returns [`Result`]. Misuse by the caller is reported as
//! [`FilterError::InvalidArgument`] before any state is touched. Numerical corruption detected
//! after an operation (NaN/Inf, orientation norm drift, a non-positive innovation variance) is
//! reported as [`FilterError::InvalidState`], and the filter is left exactly as it was before the
//! call. The filter never attempts to reset or repair its covariance on its own.

use thiserror::Error;

/// Errors raised by [`PseudorangeInsFilter`](crate::kalman::PseudorangeInsFilter) operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    /// The caller supplied an argument outside of the operation's domain (negative time step,
    /// negative variance, zero-length observation vector, non-unit attitude, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation would have left the filter with a non-finite or otherwise corrupted
    /// estimate. The update was rejected and the prior estimate retained.
    #[error("invalid filter state: {0}")]
    InvalidState(&'static str),

    /// A linear solve or small matrix inverse failed.
    #[error("singular matrix: {0}")]
    SingularMatrix(&'static str),
}

/// Result type for filter operations
pub type Result<T> = std::result::Result<T, FilterError>;

/// Reject a variance that is negative or not finite
pub(crate) fn check_variance(name: &str, variance: f32) -> Result<()> {
    if variance.is_finite() && variance >= 0.0 {
        Ok(())
    } else {
        Err(FilterError::InvalidArgument(format!(
            "{name} must be finite and non-negative, got {variance}"
        )))
    }
}

/// Reject an argument containing NaN or infinite components
pub(crate) fn check_finite<T>(name: &str, values: impl IntoIterator<Item = T>) -> Result<()>
where
    T: Copy + Into<f64>,
{
    if values.into_iter().all(|value| value.into().is_finite()) {
        Ok(())
    } else {
        Err(FilterError::InvalidArgument(format!("{name} must be finite")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finiteness_checks() {
        assert!(check_finite("accel", [1.0f32, -2.0, 0.0]).is_ok());
        assert!(check_finite("position", [6378137.0f64, f64::NAN]).is_err());
        assert!(check_finite("gyro", [f32::NEG_INFINITY]).is_err());
    }

    #[test]
    fn variance_checks() {
        assert!(check_variance("variance", 0.0).is_ok());
        assert!(check_variance("variance", 1e-3).is_ok());
        assert!(matches!(
            check_variance("variance", -1.0),
            Err(FilterError::InvalidArgument(_))
        ));
        assert!(check_variance("variance", f32::NAN).is_err());
        assert!(check_variance("variance", f32::INFINITY).is_err());
    }

    #[test]
    fn error_display() {
        let err = FilterError::InvalidState("non-finite covariance");
        assert_eq!(err.to_string(), "invalid filter state: non-finite covariance");
        let err = FilterError::InvalidArgument("dt must be non-negative".to_string());
        assert!(err.to_string().contains("dt must be non-negative"));
    }
}
