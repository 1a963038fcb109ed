//! Filter health checks and consistency metrics
//!
//! The reality checks and [`PseudorangeInsFilter::invariants_met`] guard every mutating filter
//! operation. [`sigma_point_difference`] and [`PseudorangeInsFilter::mahalanobis_distance`]
//! compare the filter against another state, typically a simulated truth, to judge whether the
//! reported covariance is consistent with the actual error (normalized estimation error squared).
//! The scalar error metrics are convenient for reporting.

use crate::linalg::{self, solve_spd};
use crate::quaternion::{angular_distance, log_map, same_hemisphere};
use crate::state::NavState;
use crate::{
    ACCEL_BIAS, ATTITUDE, CLOCK, FilterError, GYRO_BIAS, PseudorangeInsFilter, Result,
    StateDifference, VELOCITY, Vector12,
};

use nalgebra::Vector4;

/// Offset of the position/clock errors within a [`StateDifference`]
const POSITION: usize = 12;

/// Express `point` as an error relative to `mean`
///
/// The result is ordered `[gyro_bias, attitude, velocity, accel_bias, position, clock]`, matching
/// the inertial covariance followed by the position/clock covariance. The attitude error is the
/// logarithm of $q_{mean}^{-1} q_{point}$ after `point` has been moved onto the same hemisphere
/// as `mean`, so `point` and the same state with a negated quaternion give identical results.
pub fn sigma_point_difference(mean: &NavState, point: &NavState) -> StateDifference {
    let aligned = same_hemisphere(&mean.orientation, &point.orientation);
    let attitude = log_map(&(mean.orientation.conjugate() * aligned));

    let mut difference = StateDifference::zeros();
    difference
        .fixed_rows_mut::<3>(GYRO_BIAS)
        .copy_from(&(point.gyro_bias - mean.gyro_bias));
    difference
        .fixed_rows_mut::<3>(ATTITUDE)
        .copy_from(&attitude.cast::<f32>());
    difference
        .fixed_rows_mut::<3>(VELOCITY)
        .copy_from(&(point.velocity - mean.velocity).cast::<f32>());
    difference
        .fixed_rows_mut::<3>(ACCEL_BIAS)
        .copy_from(&(point.accel_bias - mean.accel_bias));
    difference
        .fixed_rows_mut::<3>(POSITION)
        .copy_from(&(point.position - mean.position).cast::<f32>());
    difference[POSITION + CLOCK] = (point.clock_bias - mean.clock_bias) as f32;
    difference
}

impl PseudorangeInsFilter {
    /// True if the mean or either covariance contains a NaN
    pub fn has_nan(&self) -> bool {
        self.state.has_nan() || linalg::has_nan(&self.cov) || linalg::has_nan(&self.pt_cov)
    }

    /// True if the mean or either covariance contains an infinity
    pub fn has_inf(&self) -> bool {
        self.state.has_inf() || linalg::has_inf(&self.cov) || linalg::has_inf(&self.pt_cov)
    }

    pub fn is_real(&self) -> bool {
        !(self.has_nan() || self.has_inf())
    }

    /// Everything is finite and the orientation is within $\sqrt{\epsilon}$ of unit norm
    pub fn invariants_met(&self) -> bool {
        let drift = 1.0 - 1.0 / self.state.orientation.norm();
        self.is_real() && drift.abs() < (f32::EPSILON as f64).sqrt()
    }

    /// Covariance-weighted distance from the filter's mean to `other`
    ///
    /// $$
    /// d = \sqrt{\delta_{12}^T P^{-1} \delta_{12} + \delta_4^T P_{pt}^{-1} \delta_4}
    /// $$
    ///
    /// with $\delta$ from [`sigma_point_difference`]. Both systems are solved rather than
    /// inverted. For a consistent filter, $d^2$ of the true state follows a $\chi^2$
    /// distribution with 16 degrees of freedom.
    ///
    /// # Errors
    /// - [`FilterError::SingularMatrix`] if either covariance is singular
    /// - [`FilterError::InvalidState`] if the quadratic form is negative or not finite
    pub fn mahalanobis_distance(&self, other: &NavState) -> Result<f32> {
        let difference = sigma_point_difference(&self.state, other);
        let inertial: Vector12 = difference.fixed_rows::<12>(0).into_owned();
        let position: Vector4<f32> = difference.fixed_rows::<4>(POSITION).into_owned();

        let weighted_inertial = solve_spd(&self.cov, &inertial)
            .ok_or(FilterError::SingularMatrix("inertial covariance"))?;
        let weighted_position = solve_spd(&self.pt_cov, &position)
            .ok_or(FilterError::SingularMatrix("position/clock covariance"))?;

        let squared = inertial.dot(&weighted_inertial) + position.dot(&weighted_position);
        if !(squared.is_finite() && squared >= 0.0) {
            return Err(FilterError::InvalidState(
                "covariance is not positive definite",
            ));
        }
        Ok(squared.sqrt())
    }

    /// Angle in radians between the filter's attitude and `truth`'s
    pub fn angular_error(&self, truth: &NavState) -> f64 {
        angular_distance(&self.state.orientation, &truth.orientation)
    }

    /// Norm of the gyro bias estimation error in rad/s
    pub fn gyro_bias_error(&self, truth: &NavState) -> f32 {
        (self.state.gyro_bias - truth.gyro_bias).norm()
    }

    /// Norm of the accelerometer bias estimation error in m/s²
    pub fn accel_bias_error(&self, truth: &NavState) -> f32 {
        (self.state.accel_bias - truth.accel_bias).norm()
    }
}
