//! Navigation state mean
//!
//! [`NavState`] is the nonlinear mean the error-state filter linearizes around. Bias estimates and
//! the cached outputs of the last prediction are single precision; attitude, velocity, position,
//! and clock bias are double precision because ECEF coordinates need more than 24 bits of
//! mantissa to resolve centimeters.
//!
//! Corrections estimated by the filter are applied through [`NavState::apply_inertial_correction`]
//! (12 elements, ordered like the inertial covariance) and
//! [`NavState::apply_position_correction`] (4 elements, ordered like the position/clock covariance).
use std::fmt::{self, Display};

use nalgebra::{Quaternion, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::quaternion::{exp_map, incremental_normalized};
use crate::{ACCEL_BIAS, ATTITUDE, GYRO_BIAS, VELOCITY, Vector12};

/// Mean estimate of the navigation state
///
/// `orientation` rotates ECEF vectors into the body frame; its conjugate rotates body vectors
/// into ECEF. It is stored as a plain (non-unit) quaternion so that norm drift remains
/// observable, and is kept within $\sqrt{\epsilon}$ of unit norm by incremental renormalization.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavState {
    /// Gyroscope bias estimate in rad/s
    pub gyro_bias: Vector3<f32>,
    /// Attitude, ECEF to body
    pub orientation: Quaternion<f64>,
    /// ECEF velocity in m/s
    pub velocity: Vector3<f64>,
    /// ECEF position in meters
    pub position: Vector3<f64>,
    /// Accelerometer bias estimate in m/s^2
    pub accel_bias: Vector3<f32>,
    /// Receiver clock offset expressed as an equivalent range in meters
    pub clock_bias: f64,
    /// ECEF inertial acceleration computed by the last prediction (m/s^2)
    pub inertial_accel: Vector3<f32>,
    /// Bias-corrected body rate used by the last prediction (rad/s)
    pub body_rate: Vector3<f32>,
}

impl Default for NavState {
    fn default() -> Self {
        NavState {
            gyro_bias: Vector3::zeros(),
            orientation: Quaternion::identity(),
            velocity: Vector3::zeros(),
            position: Vector3::zeros(),
            accel_bias: Vector3::zeros(),
            clock_bias: 0.0,
            inertial_accel: Vector3::zeros(),
            body_rate: Vector3::zeros(),
        }
    }
}

impl Display for NavState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = &self.orientation;
        write!(
            f,
            "NavState {{ pos: [{:.3}, {:.3}, {:.3}] m, vel: [{:.3}, {:.3}, {:.3}] m/s, q: [{:.6}, {:.6}, {:.6}, {:.6}], clock: {:.3} m, gyro_bias: [{:.2e}, {:.2e}, {:.2e}] rad/s, accel_bias: [{:.2e}, {:.2e}, {:.2e}] m/s^2, accel: [{:.3}, {:.3}, {:.3}] m/s^2, body_rate: [{:.4}, {:.4}, {:.4}] rad/s }}",
            self.position[0],
            self.position[1],
            self.position[2],
            self.velocity[0],
            self.velocity[1],
            self.velocity[2],
            q.w,
            q.i,
            q.j,
            q.k,
            self.clock_bias,
            self.gyro_bias[0],
            self.gyro_bias[1],
            self.gyro_bias[2],
            self.accel_bias[0],
            self.accel_bias[1],
            self.accel_bias[2],
            self.inertial_accel[0],
            self.inertial_accel[1],
            self.inertial_accel[2],
            self.body_rate[0],
            self.body_rate[1],
            self.body_rate[2],
        )
    }
}

impl NavState {
    /// Apply a 12-element inertial error correction
    ///
    /// Biases and velocity are corrected additively. The attitude segment is mapped through the
    /// quaternion exponential and composed on the right of the current orientation, matching the
    /// error definition $q_{true} = q \otimes \exp(\delta\theta)$ used throughout the filter.
    ///
    /// # Returns
    /// The incremental attitude correction quaternion $\exp(\delta\theta)$.
    pub fn apply_inertial_correction(&mut self, update: &Vector12) -> Quaternion<f64> {
        self.gyro_bias += update.fixed_rows::<3>(GYRO_BIAS);
        let correction = exp_map(&update.fixed_rows::<3>(ATTITUDE).into_owned().cast::<f64>());
        self.orientation = incremental_normalized(&(self.orientation * correction));
        self.velocity += update.fixed_rows::<3>(VELOCITY).into_owned().cast::<f64>();
        self.accel_bias += update.fixed_rows::<3>(ACCEL_BIAS);
        correction
    }

    /// Apply a 4-element correction to position (first three) and clock bias (last)
    pub fn apply_position_correction(&mut self, update: &Vector4<f32>) {
        self.position += update.fixed_rows::<3>(0).into_owned().cast::<f64>();
        self.clock_bias += update[3] as f64;
    }

    /// True if any component of the state is NaN
    pub fn has_nan(&self) -> bool {
        self.single_precision().any(|x| x.is_nan()) || self.double_precision().any(|x| x.is_nan())
    }

    /// True if any component of the state is infinite
    pub fn has_inf(&self) -> bool {
        self.single_precision().any(|x| x.is_infinite())
            || self.double_precision().any(|x| x.is_infinite())
    }

    /// True if every component of the state is finite
    pub fn is_real(&self) -> bool {
        !(self.has_nan() || self.has_inf())
    }

    fn single_precision(&self) -> impl Iterator<Item = f32> + '_ {
        self.gyro_bias
            .iter()
            .chain(self.accel_bias.iter())
            .chain(self.inertial_accel.iter())
            .chain(self.body_rate.iter())
            .copied()
    }

    fn double_precision(&self) -> impl Iterator<Item = f64> + '_ {
        self.orientation
            .coords
            .iter()
            .chain(self.velocity.iter())
            .chain(self.position.iter())
            .chain(std::iter::once(&self.clock_bias))
            .copied()
    }
}
