//! Observation updates for the navigation filter.
//!
//! Four observation types are supported:
//!
//! - **Vector observations** ([`PseudorangeInsFilter::obs_vector`]): a known ECEF reference direction
//!   (sun, star, magnetic field, gravity) sighted in the body frame. Constrains two of the three
//!   attitude degrees of freedom.
//! - **Pseudoranges** ([`PseudorangeInsFilter::obs_gps_pseudorange`]): range to a satellite plus the
//!   receiver clock bias, updating the position/clock covariance.
//! - **Delta-ranges** ([`PseudorangeInsFilter::obs_gps_deltarange`]): magnitude of the velocity
//!   relative to a satellite, updating the inertial covariance.
//! - **Position/velocity reports** ([`PseudorangeInsFilter::obs_gps_pv_report`]): a receiver's own
//!   position and velocity solution with per-axis variances.
//!
//! Every update follows the same Kalman pattern with the innovation taken as measured minus
//! predicted:
//!
//! $$
//! K = P H^T (H P H^T + R)^{-1}, \qquad \delta x \mathrel{+}= K (z - h(x)), \qquad P \mathrel{-}= K H P
//! $$
//!
//! The plain covariance update is used rather than the Joseph form. Multi-row observations are
//! processed either as a sequence of scalar updates (default) or as one small block update
//! (`batch-update` feature); both give the same result up to rounding.
//!
//! Pseudoranges and delta-ranges from one receiver epoch are processed satellite by satellite. The
//! covariance is updated immediately but the correction to the mean is collected in an accumulator
//! and applied once per epoch:
//!
//! ```rust
//! use gnssins::{PositionClockAccumulator, PseudorangeInsFilter};
//! use gnssins::earth::EQUATORIAL_RADIUS;
//! use nalgebra::Vector3;
//!
//! let truth = Vector3::new(EQUATORIAL_RADIUS + 30.0, -20.0, 10.0);
//! let mut filter = PseudorangeInsFilter::new();
//! filter
//!     .init_position(Vector3::new(EQUATORIAL_RADIUS, 0.0, 0.0), &Vector3::repeat(1.0e4))
//!     .unwrap();
//!
//! let satellites = [
//!     Vector3::new(2.6e7, 0.0, 0.0),
//!     Vector3::new(1.5e7, 2.0e7, 0.0),
//!     Vector3::new(1.5e7, 0.0, 2.0e7),
//!     Vector3::new(1.5e7, -1.4e7, -1.4e7),
//! ];
//! let mut accumulator = PositionClockAccumulator::default();
//! for satellite in &satellites {
//!     let range = (satellite - truth).norm();
//!     filter.obs_gps_pseudorange(&mut accumulator, satellite, range, 1.0).unwrap();
//! }
//! filter.apply_pseudorange_batch(accumulator).unwrap();
//! assert!((filter.state().position - truth).norm() < 5.0);
//! ```

use std::fmt::{self, Display};

use log::debug;
use nalgebra::{Quaternion, SMatrix, SVector, Vector2, Vector3, Vector4};

use crate::error::{FilterError, Result, check_finite, check_variance};
use crate::kalman::PseudorangeInsFilter;
use crate::linalg::symmetrize;
use crate::quaternion::{as_rotation, rotation_between, to_single};
use crate::{ATTITUDE, CLOCK, VELOCITY, Vector12};

/// Position and clock corrections collected over one epoch of pseudoranges
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PositionClockAccumulator {
    /// Pending correction `[position (m), clock bias (m)]`
    pub update: Vector4<f32>,
    /// Number of observations folded into `update`
    pub count: usize,
}

impl Display for PositionClockAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PositionClockAccumulator(n: {}, dp: [{:.3}, {:.3}, {:.3}] m, dc: {:.3} m)",
            self.count, self.update[0], self.update[1], self.update[2], self.update[CLOCK]
        )
    }
}

/// Inertial corrections collected over one epoch of delta-ranges
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InertialAccumulator {
    /// Pending correction ordered like the inertial covariance
    pub update: Vector12,
    /// Number of observations folded into `update`
    pub count: usize,
}

impl Display for InertialAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dv = self.update.fixed_rows::<3>(VELOCITY);
        write!(
            f,
            "InertialAccumulator(n: {}, dv: [{:.4}, {:.4}, {:.4}] m/s)",
            self.count, dv[0], dv[1], dv[2]
        )
    }
}

/// Scalar Kalman update against an `N`-state covariance
///
/// `h` is the measurement row and `innovation` is taken with respect to the mean plus the
/// current `update`. Returns the innovation variance.
pub(crate) fn scalar_update<const N: usize>(
    cov: &mut SMatrix<f32, N, N>,
    update: &mut SVector<f32, N>,
    h: &SVector<f32, N>,
    innovation: f32,
    variance: f32,
) -> Result<f32> {
    let ph = *cov * h;
    let innovation_variance = h.dot(&ph) + variance;
    // also catches NaN
    if !(innovation_variance > 0.0) {
        return Err(FilterError::InvalidState("non-positive innovation variance"));
    }
    *update += ph * (innovation / innovation_variance);
    *cov -= ph * ph.transpose() * (1.0 / innovation_variance);
    Ok(innovation_variance)
}

/// Process the rows of an `M`-row observation one at a time
///
/// Each row's innovation is corrected for the part of `update` accumulated by the earlier rows,
/// which makes the sequence equivalent to [`batch_update`].
pub(crate) fn sequential_update<const N: usize, const M: usize>(
    cov: &mut SMatrix<f32, N, N>,
    update: &mut SVector<f32, N>,
    h: &SMatrix<f32, M, N>,
    innovation: &SVector<f32, M>,
    variance: &SVector<f32, M>,
) -> Result<()> {
    let start = *update;
    for m in 0..M {
        let row = h.row(m).transpose();
        let residual = innovation[m] - row.dot(&(*update - start));
        scalar_update(cov, update, &row, residual, variance[m])?;
    }
    Ok(())
}

/// Process an `M`-row observation as one block update with an `M`x`M` inverse
pub(crate) fn batch_update<const N: usize, const M: usize>(
    cov: &mut SMatrix<f32, N, N>,
    update: &mut SVector<f32, N>,
    h: &SMatrix<f32, M, N>,
    innovation: &SVector<f32, M>,
    variance: &SVector<f32, M>,
) -> Result<()> {
    let ph = *cov * h.transpose();
    let s = h * ph + SMatrix::<f32, M, M>::from_diagonal(variance);
    if !s.diagonal().iter().all(|d| *d > 0.0) {
        return Err(FilterError::InvalidState("non-positive innovation variance"));
    }
    let s_inv = s
        .try_inverse()
        .ok_or(FilterError::SingularMatrix("innovation covariance"))?;
    let gain = ph * s_inv;
    *update += gain * innovation;
    *cov = symmetrize(&(*cov - gain * ph.transpose()));
    Ok(())
}

fn block_update<const N: usize, const M: usize>(
    cov: &mut SMatrix<f32, N, N>,
    update: &mut SVector<f32, N>,
    h: &SMatrix<f32, M, N>,
    innovation: &SVector<f32, M>,
    variance: &SVector<f32, M>,
) -> Result<()> {
    if cfg!(feature = "batch-update") {
        batch_update(cov, update, h, innovation, variance)
    } else {
        sequential_update(cov, update, h, innovation, variance)
    }
}

/// Orthonormal basis of the plane perpendicular to unit vector `reference`
///
/// The first column is perpendicular to the residual rotation, the second is aligned with it.
/// A residual too small to define a direction, or one (anti)parallel to the reference, falls
/// back to the world x axis, or the y axis when the reference is close to x.
pub(crate) fn tangent_basis(
    reference: &Vector3<f32>,
    residual: &Vector3<f32>,
) -> (Vector3<f32>, Vector3<f32>) {
    let tolerance = (f32::EPSILON * 1e3).sqrt();
    let direction = residual
        .try_normalize(tolerance)
        .filter(|dir| {
            (reference - dir).norm() > tolerance && reference.cross(dir).norm() > tolerance
        })
        .unwrap_or_else(|| {
            if reference.dot(&Vector3::x()).abs() < 0.707 {
                Vector3::x()
            } else {
                Vector3::y()
            }
        });
    let first = reference.cross(&direction).normalize();
    let second = -reference.cross(&first);
    (first, second)
}

fn unit_vector(name: &str, v: &Vector3<f32>) -> Result<Vector3<f32>> {
    check_finite(name, v.iter().copied())?;
    v.try_normalize(f32::EPSILON)
        .ok_or_else(|| FilterError::InvalidArgument(format!("{name} must have non-zero length")))
}

impl PseudorangeInsFilter {
    /// Update attitude from a sighting of a known direction
    ///
    /// `reference` is the direction in ECEF and `observed` the same direction measured in the body
    /// frame; neither needs to be normalized. `variance` is the per-axis angular variance (rad²)
    /// of the sighting.
    ///
    /// The observed vector is rotated into ECEF with the conjugate orientation and the residual
    /// is the rotation vector carrying the reference onto it. Only the two components of the
    /// residual perpendicular to the reference are observable, so the update has two rows
    /// against the attitude columns of the inertial covariance.
    pub fn obs_vector(
        &mut self,
        reference: &Vector3<f32>,
        observed: &Vector3<f32>,
        variance: f32,
    ) -> Result<()> {
        let reference = unit_vector("reference vector", reference)?;
        let observed = unit_vector("observed vector", observed)?;
        check_variance("vector observation variance", variance)?;
        self.transaction("obs_vector", |filter| {
            let body_to_ecef = as_rotation(&to_single(&filter.state.orientation.conjugate()));
            let observed_ecef = body_to_ecef * observed;
            let residual = rotation_between(&reference, &observed_ecef);
            let (first, second) = tangent_basis(&reference, &residual);

            let mut h = SMatrix::<f32, 2, 12>::zeros();
            h.fixed_view_mut::<1, 3>(0, ATTITUDE).copy_from(&first.transpose());
            h.fixed_view_mut::<1, 3>(1, ATTITUDE).copy_from(&second.transpose());
            let innovation = Vector2::new(first.dot(&residual), second.dot(&residual));

            let mut update = Vector12::zeros();
            block_update(
                &mut filter.cov,
                &mut update,
                &h,
                &innovation,
                &Vector2::repeat(variance),
            )?;
            filter.state.apply_inertial_correction(&update);
            debug!(
                "vector observation: residual angle {:.6} rad, correction {:?}",
                residual.norm(),
                update.fixed_rows::<3>(ATTITUDE).as_slice()
            );
            Ok(())
        })
    }

    /// Fold one satellite pseudorange into `accumulator` and update the position/clock covariance
    ///
    /// The predicted measurement is the range from the accumulated position estimate to
    /// `satellite_position` plus the accumulated clock bias. The mean is not changed until
    /// [`apply_pseudorange_batch`](Self::apply_pseudorange_batch). On error neither the filter nor
    /// the accumulator changes.
    pub fn obs_gps_pseudorange(
        &mut self,
        accumulator: &mut PositionClockAccumulator,
        satellite_position: &Vector3<f64>,
        pseudorange: f64,
        variance: f32,
    ) -> Result<()> {
        check_finite("satellite position", satellite_position.iter().copied())?;
        check_finite("pseudorange", [pseudorange])?;
        check_variance("pseudorange variance", variance)?;
        let mut update = accumulator.update;
        self.transaction("obs_gps_pseudorange", |filter| {
            let receiver =
                filter.state.position + update.fixed_rows::<3>(0).into_owned().cast::<f64>();
            let line_of_sight = receiver - satellite_position;
            let range = line_of_sight.norm();
            if range <= 0.0 {
                return Err(FilterError::InvalidArgument(
                    "satellite position coincides with the receiver".to_string(),
                ));
            }
            let predicted = range + filter.state.clock_bias + update[CLOCK] as f64;
            let innovation = (pseudorange - predicted) as f32;

            let direction = (line_of_sight / range).cast::<f32>();
            let h = Vector4::new(direction[0], direction[1], direction[2], 1.0);
            let innovation_variance =
                scalar_update(&mut filter.pt_cov, &mut update, &h, innovation, variance)?;
            debug!("pseudorange innovation {innovation:.3} m, variance {innovation_variance:.3} m^2");
            Ok(())
        })?;
        accumulator.update = update;
        accumulator.count += 1;
        Ok(())
    }

    /// Fold one satellite delta-range into `accumulator` and update the inertial covariance
    ///
    /// The delta-range is modeled as the magnitude of the receiver velocity relative to
    /// `satellite_velocity`. The mean is not changed until
    /// [`apply_deltarange_batch`](Self::apply_deltarange_batch).
    pub fn obs_gps_deltarange(
        &mut self,
        accumulator: &mut InertialAccumulator,
        satellite_velocity: &Vector3<f64>,
        deltarange: f64,
        variance: f32,
    ) -> Result<()> {
        check_finite("satellite velocity", satellite_velocity.iter().copied())?;
        check_finite("delta-range", [deltarange])?;
        check_variance("delta-range variance", variance)?;
        let mut update = accumulator.update;
        self.transaction("obs_gps_deltarange", |filter| {
            let relative = filter.state.velocity
                + update.fixed_rows::<3>(VELOCITY).into_owned().cast::<f64>()
                - satellite_velocity;
            let speed = relative.norm();
            if speed <= 0.0 {
                return Err(FilterError::InvalidArgument(
                    "satellite velocity equals the receiver velocity".to_string(),
                ));
            }
            let innovation = (deltarange - speed) as f32;

            let mut h = Vector12::zeros();
            h.fixed_rows_mut::<3>(VELOCITY)
                .copy_from(&(relative / speed).cast::<f32>());
            let innovation_variance =
                scalar_update(&mut filter.cov, &mut update, &h, innovation, variance)?;
            debug!("delta-range innovation {innovation:.4} m/s, variance {innovation_variance:.4}");
            Ok(())
        })?;
        accumulator.update = update;
        accumulator.count += 1;
        Ok(())
    }

    /// Apply the position and clock corrections collected over a pseudorange epoch
    pub fn apply_pseudorange_batch(&mut self, accumulator: PositionClockAccumulator) -> Result<()> {
        check_finite("pseudorange accumulator", accumulator.update.iter().copied())?;
        self.transaction("apply_pseudorange_batch", |filter| {
            filter.state.apply_position_correction(&accumulator.update);
            Ok(())
        })?;
        debug!("applied {accumulator}");
        Ok(())
    }

    /// Apply the inertial corrections collected over a delta-range epoch
    ///
    /// Returns the attitude correction quaternion.
    pub fn apply_deltarange_batch(&mut self, accumulator: InertialAccumulator) -> Result<Quaternion<f64>> {
        check_finite("delta-range accumulator", accumulator.update.iter().copied())?;
        let correction = self.transaction("apply_deltarange_batch", |filter| {
            Ok(filter.state.apply_inertial_correction(&accumulator.update))
        })?;
        debug!("applied {accumulator}");
        Ok(correction)
    }

    /// Update from a receiver's position and velocity solution
    ///
    /// Each axis of `position` (ECEF, m) and `velocity` (ECEF, m/s) is an independent observation
    /// with the matching diagonal variance. Position updates the position/clock covariance and
    /// velocity the inertial covariance; both corrections are applied to the mean once at the end.
    pub fn obs_gps_pv_report(
        &mut self,
        position: &Vector3<f64>,
        velocity: &Vector3<f64>,
        position_variance: &Vector3<f32>,
        velocity_variance: &Vector3<f32>,
    ) -> Result<()> {
        check_finite("reported position", position.iter().copied())?;
        check_finite("reported velocity", velocity.iter().copied())?;
        for k in 0..3 {
            check_variance("position variance", position_variance[k])?;
            check_variance("velocity variance", velocity_variance[k])?;
        }
        self.transaction("obs_gps_pv_report", |filter| {
            let position_residual = (position - filter.state.position).cast::<f32>();
            let mut h_position = SMatrix::<f32, 3, 4>::zeros();
            h_position.fixed_view_mut::<3, 3>(0, 0).fill_with_identity();
            let mut position_update = Vector4::zeros();
            block_update(
                &mut filter.pt_cov,
                &mut position_update,
                &h_position,
                &position_residual,
                position_variance,
            )?;

            let velocity_residual = (velocity - filter.state.velocity).cast::<f32>();
            let mut h_velocity = SMatrix::<f32, 3, 12>::zeros();
            h_velocity.fixed_view_mut::<3, 3>(0, VELOCITY).fill_with_identity();
            let mut inertial_update = Vector12::zeros();
            block_update(
                &mut filter.cov,
                &mut inertial_update,
                &h_velocity,
                &velocity_residual,
                velocity_variance,
            )?;

            filter.state.apply_position_correction(&position_update);
            filter.state.apply_inertial_correction(&inertial_update);
            debug!(
                "pv report: position residual {:.3} m, velocity residual {:.4} m/s",
                position_residual.norm(),
                velocity_residual.norm()
            );
            Ok(())
        })
    }
}
