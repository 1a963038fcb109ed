//! Error-state Kalman filter: construction, re-initialization, and prediction
//!
//! [`PseudorangeInsFilter`] owns the mean [`NavState`] and two covariance blocks:
//!
//! - `cov`: 12x12 over the inertial errors `[gyro_bias, attitude, velocity, accel_bias]`
//! - `pt_cov`: 4x4 over `[position, clock_bias]`
//!
//! This module holds the lifecycle and time propagation. Observation updates live in
//! [`measurements`](crate::measurements) and health checks in [`diagnostics`](crate::diagnostics).
//!
//! Every mutating operation is transactional: the mean and both covariance blocks are snapshotted,
//! the operation runs, and if the result fails
//! [`invariants_met`](PseudorangeInsFilter::invariants_met) the snapshot is restored and
//! [`FilterError::InvalidState`] is returned.

use std::fmt::{self, Debug, Display};

use log::{info, trace, warn};
use nalgebra::{Matrix3, Matrix4, Quaternion, Vector3};

use crate::config::FilterConfig;
use crate::earth::{gravity_ecef, vector_to_skew_symmetric};
use crate::error::{FilterError, Result, check_finite, check_variance};
use crate::linalg::{
    add_block, add_diagonal, block, mirror_lower_blocks, sgemm, sgemmm, sgemmm_diagonal, ssyr2k,
    symmetrize,
};
use crate::quaternion::{as_rotation, exp_map, incremental_normalized, to_single};
use crate::state::NavState;
use crate::{ACCEL_BIAS, ATTITUDE, CLOCK, GYRO_BIAS, Matrix12, VELOCITY};

/// GNSS-aided inertial navigation filter
///
/// # Example
///
/// ```rust
/// use gnssins::PseudorangeInsFilter;
/// use gnssins::earth::{EQUATORIAL_RADIUS, STANDARD_GRAVITY};
/// use nalgebra::{Quaternion, Vector3};
///
/// let mut filter = PseudorangeInsFilter::new();
/// filter
///     .init_position(Vector3::new(EQUATORIAL_RADIUS, 0.0, 0.0), &Vector3::repeat(25.0))
///     .unwrap();
/// filter.init_attitude(Quaternion::identity(), &nalgebra::Matrix3::identity()).unwrap();
///
/// // at rest on the equator with the body x axis pointing up
/// let gyro = Vector3::zeros();
/// let accel = Vector3::new(STANDARD_GRAVITY, 0.0, 0.0);
/// filter.predict(&gyro, &accel, 0.01).unwrap();
/// assert!(filter.state().velocity.norm() < 1e-6);
/// ```
#[derive(Clone)]
pub struct PseudorangeInsFilter {
    pub(crate) state: NavState,
    pub(crate) cov: Matrix12,
    pub(crate) pt_cov: Matrix4<f32>,
    pub(crate) config: FilterConfig,
}

impl Debug for PseudorangeInsFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PseudorangeInsFilter")
            .field("state", &self.state)
            .field("cov", &self.cov)
            .field("pt_cov", &self.pt_cov)
            .field("config", &self.config)
            .finish()
    }
}

impl Display for PseudorangeInsFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let position_sigma = (0..3)
            .map(|k| self.pt_cov[(k, k)])
            .sum::<f32>()
            .sqrt();
        let attitude_sigma = (ATTITUDE..ATTITUDE + 3)
            .map(|k| self.cov[(k, k)])
            .sum::<f32>()
            .sqrt();
        write!(
            f,
            "PseudorangeInsFilter {{ {}, position 1-sigma: {:.3} m, attitude 1-sigma: {:.4} rad }}",
            self.state, position_sigma, attitude_sigma
        )
    }
}

impl Default for PseudorangeInsFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn initial_covariance(config: &FilterConfig) -> (Matrix12, Matrix4<f32>) {
    let initial = &config.initial;
    let mut cov = Matrix12::zeros();
    add_diagonal(&mut cov, GYRO_BIAS, &Vector3::repeat(initial.gyro_bias_rms.powi(2)));
    add_diagonal(&mut cov, ATTITUDE, &Vector3::repeat(initial.attitude_variance));
    add_diagonal(&mut cov, VELOCITY, &Vector3::repeat(initial.velocity_variance));
    add_diagonal(&mut cov, ACCEL_BIAS, &Vector3::repeat(initial.accel_bias_rms.powi(2)));

    let mut pt_cov = Matrix4::zeros();
    add_diagonal(&mut pt_cov, 0, &Vector3::repeat(initial.position_rms.powi(2)));
    pt_cov[(CLOCK, CLOCK)] = initial.clock_bias_rms.powi(2);
    (cov, pt_cov)
}

fn check_covariance_block(name: &str, covariance: &Matrix3<f32>) -> Result<Matrix3<f32>> {
    check_finite(name, covariance.iter().copied())?;
    for k in 0..3 {
        check_variance(name, covariance[(k, k)])?;
    }
    Ok(symmetrize(covariance))
}

impl PseudorangeInsFilter {
    /// Create a filter at the identity state with the default configuration
    pub fn new() -> PseudorangeInsFilter {
        PseudorangeInsFilter::from_validated(FilterConfig::default())
    }

    /// Create a filter at the identity state with a validated configuration
    pub fn with_config(config: FilterConfig) -> Result<PseudorangeInsFilter> {
        config.validate()?;
        Ok(PseudorangeInsFilter::from_validated(config))
    }

    fn from_validated(config: FilterConfig) -> PseudorangeInsFilter {
        let (cov, pt_cov) = initial_covariance(&config);
        info!("filter constructed with gravity {} m/s^2", config.gravity);
        PseudorangeInsFilter {
            state: NavState::default(),
            cov,
            pt_cov,
            config,
        }
    }

    /// Current mean estimate
    pub fn state(&self) -> &NavState {
        &self.state
    }

    /// Covariance of the inertial errors `[gyro_bias, attitude, velocity, accel_bias]`
    pub fn cov(&self) -> &Matrix12 {
        &self.cov
    }

    /// Covariance of the position and clock bias errors
    pub fn pt_cov(&self) -> &Matrix4<f32> {
        &self.pt_cov
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Run `operation` against the filter, restoring the prior mean and covariance if it fails
    /// or leaves the filter in a state that violates its invariants.
    pub(crate) fn transaction<T>(
        &mut self,
        name: &'static str,
        operation: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let snapshot = (self.state, self.cov, self.pt_cov);
        let outcome = match operation(self) {
            Ok(value) if self.invariants_met() => Ok(value),
            Ok(_) => Err(FilterError::InvalidState(
                "non-finite estimate or orientation norm drift",
            )),
            Err(err) => Err(err),
        };
        if let Err(err) = &outcome {
            (self.state, self.cov, self.pt_cov) = snapshot;
            warn!("{name} rejected: {err}");
        }
        outcome
    }

    /// Zero every cross-covariance term of the 3-state group at `offset` and set its own block
    ///
    /// `offset` is one of [`GYRO_BIAS`], [`ATTITUDE`], [`VELOCITY`], or [`ACCEL_BIAS`].
    pub fn clear_covariance_block(&mut self, offset: usize, covariance: &Matrix3<f32>) -> Result<()> {
        if offset > ACCEL_BIAS || offset % 3 != 0 {
            return Err(FilterError::InvalidArgument(format!(
                "covariance block offset must be 0, 3, 6 or 9, got {offset}"
            )));
        }
        let covariance = check_covariance_block("covariance block", covariance)?;
        self.transaction("clear_covariance_block", |filter| {
            filter.reset_block(offset, &covariance);
            Ok(())
        })
    }

    fn reset_block(&mut self, offset: usize, covariance: &Matrix3<f32>) {
        self.cov.rows_mut(offset, 3).fill(0.0);
        self.cov.columns_mut(offset, 3).fill(0.0);
        self.cov.fixed_view_mut::<3, 3>(offset, offset).copy_from(covariance);
    }

    /// Reset the attitude to `orientation` (ECEF to body) with the given error covariance
    ///
    /// The quaternion must be within $\sqrt{\epsilon}$ of unit norm; it is normalized before use.
    pub fn init_attitude(&mut self, orientation: Quaternion<f64>, covariance: &Matrix3<f32>) -> Result<()> {
        check_finite("orientation", orientation.coords.iter().copied())?;
        let norm = orientation.norm();
        if (1.0 - norm).abs() >= (f32::EPSILON as f64).sqrt() {
            return Err(FilterError::InvalidArgument(format!(
                "orientation must be a unit quaternion, norm is {norm}"
            )));
        }
        let covariance = check_covariance_block("attitude covariance", covariance)?;
        self.transaction("init_attitude", |filter| {
            filter.state.orientation = orientation / norm;
            filter.reset_block(ATTITUDE, &covariance);
            Ok(())
        })?;
        info!("attitude initialized to {:?}", orientation.coords.as_slice());
        Ok(())
    }

    /// Reset the ECEF velocity with per-axis error variances
    pub fn init_velocity(&mut self, velocity: Vector3<f64>, variance: &Vector3<f32>) -> Result<()> {
        check_finite("velocity", velocity.iter().copied())?;
        self.clear_covariance_block(VELOCITY, &Matrix3::from_diagonal(variance))?;
        self.state.velocity = velocity;
        info!("velocity initialized to {:?}", velocity.as_slice());
        Ok(())
    }

    /// Reset the ECEF position with per-axis error variances
    ///
    /// The position/clock covariance is rebuilt from scratch: the clock variance returns to the
    /// configured initial value.
    pub fn init_position(&mut self, position: Vector3<f64>, variance: &Vector3<f32>) -> Result<()> {
        check_finite("position", position.iter().copied())?;
        for k in 0..3 {
            check_variance("position variance", variance[k])?;
        }
        let clock_variance = self.config.initial.clock_bias_rms.powi(2);
        self.transaction("init_position", |filter| {
            filter.pt_cov = Matrix4::zeros();
            add_diagonal(&mut filter.pt_cov, 0, variance);
            filter.pt_cov[(CLOCK, CLOCK)] = clock_variance;
            filter.state.position = position;
            Ok(())
        })?;
        info!("position initialized to {:?}", position.as_slice());
        Ok(())
    }

    /// Propagate the filter forward by `dt` seconds
    ///
    /// `gyro` (rad/s) and `accel` (m/s²) are raw body-frame samples. The bias-corrected specific
    /// force is rotated into ECEF with the conjugate orientation and the spherical gravity term is
    /// removed, giving the inertial acceleration $a$. The mean is propagated as
    ///
    /// $$
    /// q \leftarrow \exp(\omega\,dt) \otimes q, \quad p \leftarrow p + v\,dt + \tfrac{1}{2} a\,dt^2, \quad v \leftarrow v + a\,dt
    /// $$
    ///
    /// and the covariance as $P \leftarrow A P A^T + Q\,dt$ without ever forming $A$, whose
    /// non-identity blocks are $-dt R$ (gyro bias to attitude and accel bias to velocity) and
    /// $dt [R f]_\times$ (attitude to velocity), with $R$ the body to ECEF rotation. Position
    /// uncertainty grows with the old velocity uncertainty times $dt^2$.
    ///
    /// `dt == 0` is accepted and only renormalizes the orientation.
    ///
    /// # Errors
    /// - [`FilterError::InvalidArgument`] for a negative or non-finite `dt` or non-finite samples
    /// - [`FilterError::InvalidState`] if the propagated filter fails its invariants (the filter
    ///   is left unchanged)
    pub fn predict(&mut self, gyro: &Vector3<f32>, accel: &Vector3<f32>, dt: f32) -> Result<()> {
        if !(dt.is_finite() && dt >= 0.0) {
            return Err(FilterError::InvalidArgument(format!(
                "dt must be finite and non-negative, got {dt}"
            )));
        }
        check_finite("gyro", gyro.iter().copied())?;
        check_finite("accel", accel.iter().copied())?;
        self.transaction("predict", |filter| {
            filter.propagate(gyro, accel, dt);
            Ok(())
        })?;
        trace!(
            "predict dt={dt}: inertial_accel={:?} body_rate={:?}",
            self.state.inertial_accel.as_slice(),
            self.state.body_rate.as_slice()
        );
        Ok(())
    }

    fn propagate(&mut self, gyro: &Vector3<f32>, accel: &Vector3<f32>, dt: f32) {
        let body_to_ecef = as_rotation(&to_single(&self.state.orientation.conjugate()));
        let accel_sensible = accel - self.state.accel_bias;
        let accel_sensible_ecef = body_to_ecef * accel_sensible;
        let inertial_accel =
            accel_sensible_ecef - gravity_ecef(&self.state.position, self.config.gravity);
        let body_rate = gyro - self.state.gyro_bias;

        let dt_r: Matrix3<f32> = body_to_ecef.to_rotation_matrix().into_inner() * -dt;
        let dt_q: Matrix3<f32> = vector_to_skew_symmetric(&-accel_sensible_ecef) * -dt;
        self.propagate_covariance(&dt_r, &dt_q, dt);

        let dt64 = dt as f64;
        let rotation = exp_map(&(body_rate.cast::<f64>() * dt64));
        self.state.orientation = incremental_normalized(&(rotation * self.state.orientation));
        let accel64 = inertial_accel.cast::<f64>();
        self.state.position += self.state.velocity * dt64 + accel64 * (0.5 * dt64 * dt64);
        self.state.velocity += accel64 * dt64;
        self.state.inertial_accel = inertial_accel;
        self.state.body_rate = body_rate;
    }

    fn propagate_covariance(&mut self, dt_r: &Matrix3<f32>, dt_q: &Matrix3<f32>, dt: f32) {
        let p = self.cov;
        let cov = &mut self.cov;

        // gyro bias row
        sgemm(cov, GYRO_BIAS, ATTITUDE, dt_r, &p, GYRO_BIAS, GYRO_BIAS);
        sgemm(cov, GYRO_BIAS, VELOCITY, dt_q, &p, GYRO_BIAS, ATTITUDE);
        sgemm(cov, GYRO_BIAS, VELOCITY, dt_r, &p, GYRO_BIAS, ACCEL_BIAS);

        // attitude row
        sgemmm_diagonal(cov, ATTITUDE, dt_r, &p, GYRO_BIAS);
        ssyr2k(cov, ATTITUDE, ATTITUDE, dt_r, &p, GYRO_BIAS, ATTITUDE);
        let term = dt_r * block(&p, GYRO_BIAS, VELOCITY)
            + dt_r * block(&p, GYRO_BIAS, ATTITUDE) * dt_q.transpose();
        add_block(cov, ATTITUDE, VELOCITY, &term);
        sgemmm(cov, ATTITUDE, VELOCITY, dt_r, &p, GYRO_BIAS, ACCEL_BIAS);
        sgemm(cov, ATTITUDE, VELOCITY, dt_r, &p, ATTITUDE, ACCEL_BIAS);
        sgemm(cov, ATTITUDE, VELOCITY, dt_q, &p, ATTITUDE, ATTITUDE);
        add_block(cov, ATTITUDE, ACCEL_BIAS, &(dt_r * block(&p, GYRO_BIAS, ACCEL_BIAS)));

        // velocity row
        ssyr2k(cov, VELOCITY, VELOCITY, dt_q, &p, ATTITUDE, VELOCITY);
        ssyr2k(cov, VELOCITY, VELOCITY, dt_r, &p, ACCEL_BIAS, VELOCITY);
        let cross = dt_r * (dt_q * block(&p, ATTITUDE, ACCEL_BIAS)).transpose();
        add_block(cov, VELOCITY, VELOCITY, &(cross + cross.transpose()));
        sgemmm_diagonal(cov, VELOCITY, dt_q, &p, ATTITUDE);
        sgemmm_diagonal(cov, VELOCITY, dt_r, &p, ACCEL_BIAS);
        let term = dt_q * block(&p, ATTITUDE, ACCEL_BIAS) + dt_r * block(&p, ACCEL_BIAS, ACCEL_BIAS);
        add_block(cov, VELOCITY, ACCEL_BIAS, &term);

        mirror_lower_blocks(cov);

        let noise = &self.config.process_noise;
        add_diagonal(cov, GYRO_BIAS, &(noise.gyro_stability * dt));
        add_diagonal(cov, ATTITUDE, &(noise.gyro_white * dt));
        add_diagonal(cov, VELOCITY, &(noise.accel_white * dt));
        add_diagonal(cov, ACCEL_BIAS, &(noise.accel_stability * dt));

        let mut position = self.pt_cov.fixed_view_mut::<3, 3>(0, 0);
        position += block(&p, VELOCITY, VELOCITY) * (dt * dt);
        add_diagonal(&mut self.pt_cov, 0, &(noise.accel_white * (0.5 * dt * dt)));
        self.pt_cov[(CLOCK, CLOCK)] += noise.clock_stability * dt;
    }
}
