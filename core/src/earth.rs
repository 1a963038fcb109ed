//! Earth-related constants and functions
//!
//! The filter works entirely in the Earth-centered Earth-fixed (ECEF) frame and uses the
//! simplest gravity model that is still useful for a GNSS-aided INS: a spherical Earth whose
//! gravitational acceleration has a constant magnitude and points at the Earth's center. The
//! residual error of this model (latitude and altitude dependence, centrifugal terms) is small
//! compared to the accelerometer bias uncertainty the filter estimates anyway.
//!
//! # Coordinate Systems
//! ECEF is a right-handed Cartesian frame with its origin at the Earth's center, the z-axis
//! through the north pole, and the x-axis through the intersection of the equator and the prime
//! meridian. The body frame is the IMU's own right-handed frame. The rotation rate of ECEF with
//! respect to inertial space is neglected over a single integration step.
use nalgebra::{Matrix3, Vector3};

/// Standard gravitational acceleration in $m/s^2$, the default magnitude of the gravity model
pub const STANDARD_GRAVITY: f32 = 9.80665;
/// Earth's mean radius in meters
pub const MEAN_RADIUS: f64 = 6371000.0; // meters
/// Earth's equatorial radius in meters
pub const EQUATORIAL_RADIUS: f64 = 6378137.0; // meters
/// Speed of light in m/s, relating receiver clock offsets to equivalent ranges
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Convert a three-element vector to a skew-symmetric (cross product) matrix
///
/// $$
/// x = \begin{bmatrix} a \\\\ b \\\\ c \end{bmatrix} \rightarrow X = \begin{bmatrix} 0 & -c & b \\\\ c & 0 & -a \\\\ -b & a & 0 \end{bmatrix}
/// $$
///
/// such that `X * y == x.cross(&y)`.
///
/// # Example
/// ```rust
/// use nalgebra::Vector3;
/// use gnssins::earth;
/// let v: Vector3<f32> = Vector3::new(1.0, 2.0, 3.0);
/// let skew = earth::vector_to_skew_symmetric(&v);
/// assert_eq!(skew * Vector3::x(), v.cross(&Vector3::x()));
/// ```
pub fn vector_to_skew_symmetric(v: &Vector3<f32>) -> Matrix3<f32> {
    let mut skew: Matrix3<f32> = Matrix3::zeros();
    skew[(0, 1)] = -v[2];
    skew[(0, 2)] = v[1];
    skew[(1, 0)] = v[2];
    skew[(1, 2)] = -v[0];
    skew[(2, 0)] = -v[1];
    skew[(2, 1)] = v[0];
    skew
}

/// Spherical-Earth gravity term in the ECEF frame
///
/// Returns the radially outward unit vector at `position` scaled by `gravity`. This is the
/// quantity an accelerometer at rest reports (rotated into ECEF), so subtracting it from the
/// sensed specific force yields the inertial acceleration. At the Earth's center the direction
/// is undefined and the zero vector is returned.
///
/// # Example
/// ```rust
/// use nalgebra::Vector3;
/// use gnssins::earth;
/// let g = earth::gravity_ecef(&Vector3::new(0.0, 0.0, earth::MEAN_RADIUS), earth::STANDARD_GRAVITY);
/// assert!((g - Vector3::new(0.0, 0.0, earth::STANDARD_GRAVITY)).norm() < 1e-5);
/// ```
pub fn gravity_ecef(position: &Vector3<f64>, gravity: f32) -> Vector3<f32> {
    position
        .cast::<f32>()
        .try_normalize(0.0)
        .map(|up| up * gravity)
        .unwrap_or_else(Vector3::zeros)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn skew_symmetric_is_cross_product() {
        let v = Vector3::new(0.3, -1.2, 2.5);
        let w = Vector3::new(-4.0, 0.5, 1.0);
        let skew = vector_to_skew_symmetric(&v);
        let expected = v.cross(&w);
        let actual = skew * w;
        for i in 0..3 {
            assert_approx_eq!(actual[i], expected[i], 1e-6);
        }
        assert_eq!(skew.transpose(), -skew);
    }

    #[test]
    fn gravity_points_outward() {
        let position = Vector3::new(EQUATORIAL_RADIUS, 0.0, 0.0);
        let g = gravity_ecef(&position, STANDARD_GRAVITY);
        assert_approx_eq!(g[0], STANDARD_GRAVITY, 1e-6);
        assert_approx_eq!(g[1], 0.0, 1e-6);
        assert_approx_eq!(g[2], 0.0, 1e-6);

        let position = Vector3::new(1.0, 1.0, 0.0) * MEAN_RADIUS;
        let g = gravity_ecef(&position, 10.0);
        assert_approx_eq!(g.norm(), 10.0, 1e-5);
        assert_approx_eq!(g[0], g[1], 1e-6);
    }

    #[test]
    fn gravity_at_origin_is_zero() {
        let g = gravity_ecef(&Vector3::zeros(), STANDARD_GRAVITY);
        assert_eq!(g, Vector3::zeros());
    }
}
