//! GNSS-aided inertial navigation filter
//!
//! This crate provides an error-state (indirect) extended Kalman filter that fuses gyroscope and accelerometer
//! samples with GPS-class pseudorange and delta-range observations, reference-vector sightings, and pre-fused
//! position/velocity reports. The filter estimates attitude, velocity, position, receiver clock bias, and the
//! gyroscope and accelerometer biases of a vehicle navigating in the Earth-Centered Earth-Fixed (ECEF) frame.
//! All matrices have small fixed dimensions (12x12, 4x4 and smaller), so every operation runs without heap
//! allocation and the filter is suitable for real-time use on constrained processors.
//!
//! The crate does not read sensors, decode receiver messages, or compute a receiver's own navigation solution.
//! Those are inputs to the filter. Measurement variances are supplied by the caller's sensor model.
//!
//! Primarily built off of the following crate dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the fixed-size linear algebra and quaternions.
//! - [`serde`](https://crates.io/crates/serde): Serialization of the state, configuration, and event stream.
//! - [`thiserror`](https://crates.io/crates/thiserror): The typed error channel of every filter operation.
//! - [`log`](https://crates.io/crates/log): Diagnostic logging; bring your own logger implementation.
//!
//! The crate is organized into the following modules:
//! - [config]: Initial uncertainty and process noise configuration with JSON, YAML, and TOML I/O.
//! - [diagnostics]: Finiteness and invariant checks, sigma point differences, Mahalanobis distance.
//! - [earth]: Earth constants, the spherical gravity model, and the skew-symmetric helper.
//! - [error]: The [`FilterError`] type returned by every fallible operation.
//! - [kalman]: The [`PseudorangeInsFilter`] itself: construction, re-initialization, and prediction.
//! - [linalg]: 3x3 block helpers used to propagate the covariance without forming the transition matrix.
//! - [measurements]: Observation updaters and the deferred-application accumulators.
//! - [messages]: A time-ordered event enum for driving the filter from a recorded stream.
//! - [quaternion]: Exponential and logarithm maps and incremental renormalization.
//! - [state]: The [`NavState`] mean and the application of estimated corrections.
//!
//! ## State and error definitions
//!
//! The mean state is held as a nonlinear [`NavState`] while the filter estimates a small correction to it. The
//! correction is split into two groups with independent covariance matrices:
//!
//! $$
//! \delta x_{inertial} = [\delta b_g, \delta\theta, \delta v, \delta b_a] \in \mathbb{R}^{12}, \qquad
//! \delta x_{position} = [\delta p, \delta c] \in \mathbb{R}^{4}
//! $$
//!
//! where $\delta b_g$ and $\delta b_a$ are the gyroscope and accelerometer bias errors, $\delta\theta$ is the
//! attitude error in the tangent space of the orientation quaternion ($q_{true} = q \otimes \exp(\delta\theta)$),
//! $\delta v$ and $\delta p$ are the ECEF velocity and position errors, and $\delta c$ is the clock bias error in
//! meters. Position and clock errors are large in magnitude and only weakly coupled to the inertial errors over a
//! single step, so they are propagated as a separate 4x4 block instead of one 16x16 matrix.
//!
//! The offsets of each group within the 12-element inertial vector are exported as [`GYRO_BIAS`], [`ATTITUDE`],
//! [`VELOCITY`], and [`ACCEL_BIAS`].
//!
//! ## Prediction
//!
//! Given gyroscope and accelerometer samples $\omega_m$ and $f_m$ over a step $t$, the body rate and the ECEF
//! inertial acceleration are
//!
//! $$
//! \omega = \omega_m - b_g, \qquad a = \bar{q} \left( f_m - b_a \right) q - g(p)
//! $$
//!
//! with $g(p)$ the spherical Earth gravity term of [`earth::gravity_ecef`]. The mean is propagated with
//!
//! $$
//! q(+) = \exp(\omega t) \otimes q(-), \quad p(+) = p(-) + v(-) t + \tfrac{1}{2} a t^2, \quad v(+) = v(-) + a t
//! $$
//!
//! and the covariance with $P \leftarrow A P A^T + Q t$ where $A$ is identity plus the coupling blocks
//! $-tR$ (gyro bias to attitude, accelerometer bias to velocity) and $t [R f]_\times$ (attitude to velocity).
//!
//! ## Observations
//!
//! Each observation computes an innovation as the measured value minus the value predicted from the current
//! mean, a Kalman gain against the relevant covariance, and a correction. Pseudoranges and delta-ranges are
//! accumulated across a batch of satellites and applied to the mean once. See [measurements] for details.
//!
//! ## Cargo features
//!
//! - `batch-update`: process the two axes of a vector observation and the three axes of each half of a
//!   position/velocity report as small block updates instead of sequential scalar updates. Both variants give
//!   the same result up to floating-point rounding.
pub mod config;
pub mod diagnostics;
pub mod earth;
pub mod error;
pub mod kalman;
pub mod linalg;
pub mod measurements;
pub mod messages;
pub mod quaternion;
pub mod state;

use nalgebra::{SMatrix, SVector};

pub use config::{FilterConfig, InitialUncertainty, ProcessNoise};
pub use diagnostics::sigma_point_difference;
pub use error::{FilterError, Result};
pub use kalman::PseudorangeInsFilter;
pub use measurements::{InertialAccumulator, PositionClockAccumulator};
pub use messages::Event;
pub use state::NavState;

/// Inertial error vector: gyro bias, attitude, velocity, accelerometer bias
pub type Vector12 = SVector<f32, 12>;
/// Covariance of the inertial error vector
pub type Matrix12 = SMatrix<f32, 12, 12>;
/// Full error vector: the inertial errors followed by position and clock errors
pub type StateDifference = SVector<f32, 16>;

/// Offset of the gyroscope bias errors in the inertial error vector
pub const GYRO_BIAS: usize = 0;
/// Offset of the attitude errors in the inertial error vector
pub const ATTITUDE: usize = 3;
/// Offset of the velocity errors in the inertial error vector
pub const VELOCITY: usize = 6;
/// Offset of the accelerometer bias errors in the inertial error vector
pub const ACCEL_BIAS: usize = 9;
/// Index of the clock bias error in the position/clock error vector
pub const CLOCK: usize = 3;
