//! Quaternion exponential/logarithm maps and normalization helpers
//!
//! The filter stores its attitude as a (nearly) unit quaternion and expresses attitude error as
//! a 3-vector in the tangent space. The two are related by the exponential map
//!
//! $$
//! \exp(\theta) = \begin{bmatrix} \cos(|\theta|/2) \\\\ \sin(|\theta|/2) \, \theta / |\theta| \end{bmatrix}
//! $$
//!
//! and its inverse, the logarithm map. `q` and `-q` describe the same rotation, but the
//! logarithm of the two differs (one has angle $\alpha$, the other $2\pi - \alpha$). The
//! logarithm here deliberately does *not* fold the two together: callers comparing two
//! attitudes must bring them onto the same hemisphere first, see [`same_hemisphere`].
//!
//! The orientation quaternion is never renormalized with a square root. After every
//! composition with a small correction it is passed through [`incremental_normalized`], a
//! first-order Newton step toward unit norm.
use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// Below this rotation angle the series expansions of `sin(x)/x` are used.
const SMALL_ANGLE: f64 = 1e-6;

/// Exponential map from a rotation vector (axis times angle, radians) to a unit quaternion
///
/// # Example
/// ```rust
/// use nalgebra::Vector3;
/// use gnssins::quaternion::{exp_map, log_map};
/// let theta = Vector3::new(0.1, -0.2, 0.3);
/// let back = log_map(&exp_map(&theta));
/// assert!((back - theta).norm() < 1e-12);
/// ```
pub fn exp_map(rotation: &Vector3<f64>) -> Quaternion<f64> {
    let angle = rotation.norm();
    let half = 0.5 * angle;
    // sin(angle / 2) / angle
    let scale = if angle < SMALL_ANGLE {
        0.5 - angle * angle / 48.0
    } else {
        half.sin() / angle
    };
    Quaternion::from_parts(half.cos(), rotation * scale)
}

/// Logarithm map from a unit quaternion to a rotation vector (axis times angle, radians)
///
/// The returned angle lies in $[0, 2\pi)$; for quaternions with a negative scalar part the
/// result is the "long way around" representative. Use [`same_hemisphere`] first when the
/// shortest rotation is wanted.
pub fn log_map(q: &Quaternion<f64>) -> Vector3<f64> {
    let imag = q.imag();
    let sin_half = imag.norm();
    if sin_half == 0.0 {
        return Vector3::zeros();
    }
    if sin_half < SMALL_ANGLE && q.w > 0.0 {
        // angle / sin(angle / 2) -> 2 / cos(angle / 2)
        return imag * (2.0 / q.w);
    }
    let angle = 2.0 * sin_half.atan2(q.w);
    imag * (angle / sin_half)
}

/// First-order renormalization of a nearly-unit quaternion
///
/// Equivalent to one Newton iteration of $q / \sqrt{|q|^2}$ around $|q| = 1$, which removes
/// the drift introduced by composing with small corrections without paying for a square root.
pub fn incremental_normalized(q: &Quaternion<f64>) -> Quaternion<f64> {
    q * (0.5 * (3.0 - q.norm_squared()))
}

/// Return `q` or `-q`, whichever lies on the same hemisphere as `reference`
///
/// Both represent the same rotation, but covariance-weighted differences between attitudes are
/// only meaningful for the representative nearer to the reference.
pub fn same_hemisphere(reference: &Quaternion<f64>, q: &Quaternion<f64>) -> Quaternion<f64> {
    if reference.coords.dot(&q.coords) < 0.0 {
        -q
    } else {
        *q
    }
}

/// Rotation vector of the shortest rotation carrying unit vector `from` onto unit vector `to`
///
/// For anti-parallel inputs the rotation is by $\pi$ about an axis perpendicular to `from`,
/// chosen from the world x or y axis, whichever is further from `from`.
pub fn rotation_between(from: &Vector3<f32>, to: &Vector3<f32>) -> Vector3<f32> {
    let axis = from.cross(to);
    let sin_angle = axis.norm();
    let cos_angle = from.dot(to);
    if sin_angle > f32::EPSILON {
        axis * (sin_angle.atan2(cos_angle) / sin_angle)
    } else if cos_angle >= 0.0 {
        Vector3::zeros()
    } else {
        let helper = if from.dot(&Vector3::x()).abs() < 0.707 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        from.cross(&helper).normalize() * std::f32::consts::PI
    }
}

/// Angle in radians of the smallest rotation between two attitudes
pub fn angular_distance(a: &Quaternion<f64>, b: &Quaternion<f64>) -> f64 {
    let delta = a.conjugate() * b;
    2.0 * delta.imag().norm().atan2(delta.w.abs())
}

/// Narrow a double precision quaternion to single precision
pub fn to_single(q: &Quaternion<f64>) -> Quaternion<f32> {
    Quaternion::from(q.coords.cast::<f32>())
}

/// View a nearly-unit quaternion as a rotation without renormalizing it
///
/// The filter keeps its orientation within $\sqrt{\epsilon}$ of unit norm, so rotating with it
/// directly is accurate to single precision.
pub fn as_rotation(q: &Quaternion<f32>) -> UnitQuaternion<f32> {
    UnitQuaternion::new_unchecked(*q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn exp_matches_axis_angle() {
        let theta = Vector3::new(0.0, 0.0, FRAC_PI_2);
        let q = exp_map(&theta);
        let expected = UnitQuaternion::from_scaled_axis(theta);
        assert_approx_eq!(q.w, expected.w, 1e-12);
        assert_approx_eq!(q.k, expected.k, 1e-12);
        assert_approx_eq!(q.norm(), 1.0, 1e-12);
    }

    #[test]
    fn exp_small_angle() {
        let theta = Vector3::new(1e-9, -2e-9, 3e-9);
        let q = exp_map(&theta);
        assert_approx_eq!(q.w, 1.0, 1e-15);
        assert_approx_eq!(q.i, 0.5e-9, 1e-18);
        let back = log_map(&q);
        assert_approx_eq!(back[1], -2e-9, 1e-18);
    }

    #[test]
    fn log_inverts_exp() {
        for theta in [
            Vector3::new(0.3, 0.2, -0.1),
            Vector3::new(-2.0, 1.0, 0.5),
            Vector3::new(0.0, 3.0, 0.0),
        ] {
            let back = log_map(&exp_map(&theta));
            assert!((back - theta).norm() < 1e-12, "{theta:?} -> {back:?}");
        }
        assert_eq!(log_map(&Quaternion::identity()), Vector3::zeros());
    }

    #[test]
    fn log_of_negated_quaternion_is_long_way_around() {
        let theta = Vector3::new(0.0, 0.5, 0.0);
        let q = exp_map(&theta);
        let long = log_map(&-q);
        assert_approx_eq!(long.norm(), 2.0 * PI - 0.5, 1e-12);
        let aligned = same_hemisphere(&Quaternion::identity(), &-q);
        assert!((log_map(&aligned) - theta).norm() < 1e-12);
    }

    #[test]
    fn incremental_normalization_converges() {
        let q = Quaternion::new(1.001, 0.002, -0.003, 0.0004);
        let n1 = incremental_normalized(&q);
        assert!((n1.norm() - 1.0).abs() < (q.norm() - 1.0).abs());
        let n2 = incremental_normalized(&n1);
        assert_approx_eq!(n2.norm(), 1.0, 1e-10);
    }

    #[test]
    fn rotation_between_vectors() {
        let from = Vector3::<f32>::x();
        let to = Vector3::<f32>::y();
        let r = rotation_between(&from, &to);
        assert_approx_eq!(r[2], std::f32::consts::FRAC_PI_2, 1e-6);
        let rotated = UnitQuaternion::from_scaled_axis(r) * from;
        assert!((rotated - to).norm() < 1e-6);

        assert_eq!(rotation_between(&from, &from), Vector3::zeros());

        let flipped = rotation_between(&from, &-from);
        assert_approx_eq!(flipped.norm(), std::f32::consts::PI, 1e-6);
        assert_approx_eq!(flipped.dot(&from), 0.0, 1e-6);
    }

    #[test]
    fn angular_distance_ignores_sign() {
        let a = exp_map(&Vector3::new(0.1, 0.0, 0.0));
        let b = exp_map(&Vector3::new(0.4, 0.0, 0.0));
        assert_approx_eq!(angular_distance(&a, &b), 0.3, 1e-12);
        assert_approx_eq!(angular_distance(&a, &-b), 0.3, 1e-12);
    }
}
