//! Block linear algebra helpers for the error-state covariance.
//!
//! The 12-state transition matrix is mostly identity with a handful of 3x3 blocks, so the
//! product A·P·Aᵀ is evaluated block by block instead of as two dense 12x12 multiplications.
//! The helpers below add one term of that expansion into a 3x3 block of the destination,
//! always reading from an unmodified copy of the old covariance.
//!
//! Block helpers (all accumulate, `+=`):
//!     - ssyr2k():  dst[i,j] += M·src[r,c] + src[c,r]·Mᵀ
//!     - sgemmm():  dst[i,j] += M·src[r,c]·Mᵀ
//!     - sgemm():   dst[i,j] += src[r,c]·Mᵀ
//!
//! plus symmetry, diagonal and finiteness utilities shared by the filter and the updaters.

use nalgebra::{Cholesky, Const, DimMin, Matrix3, SMatrix, Vector3};

/// 3x3 view of `src` with its upper-left corner at `(row, col)`
#[inline]
pub fn block(src: &SMatrix<f32, 12, 12>, row: usize, col: usize) -> Matrix3<f32> {
    src.fixed_view::<3, 3>(row, col).into_owned()
}

/// Add `value` to the 3x3 block of `dst` at `(row, col)`
#[inline]
pub fn add_block(dst: &mut SMatrix<f32, 12, 12>, row: usize, col: usize, value: &Matrix3<f32>) {
    let mut view = dst.fixed_view_mut::<3, 3>(row, col);
    view += value;
}

/// Symmetric rank-2k block update: `dst[i,j] += M·src[r,c] + src[c,r]·Mᵀ`
pub fn ssyr2k(
    dst: &mut SMatrix<f32, 12, 12>,
    i: usize,
    j: usize,
    m: &Matrix3<f32>,
    src: &SMatrix<f32, 12, 12>,
    r: usize,
    c: usize,
) {
    let term = m * block(src, r, c) + block(src, c, r) * m.transpose();
    add_block(dst, i, j, &term);
}

/// Congruence block update: `dst[i,j] += M·src[r,c]·Mᵀ`
pub fn sgemmm(
    dst: &mut SMatrix<f32, 12, 12>,
    i: usize,
    j: usize,
    m: &Matrix3<f32>,
    src: &SMatrix<f32, 12, 12>,
    r: usize,
    c: usize,
) {
    let term = m * block(src, r, c) * m.transpose();
    add_block(dst, i, j, &term);
}

/// Congruence update of a diagonal block: `dst[i,i] += M·src[r,r]·Mᵀ`
#[inline]
pub fn sgemmm_diagonal(
    dst: &mut SMatrix<f32, 12, 12>,
    i: usize,
    m: &Matrix3<f32>,
    src: &SMatrix<f32, 12, 12>,
    r: usize,
) {
    sgemmm(dst, i, i, m, src, r, r);
}

/// Right-multiplied block update: `dst[i,j] += src[r,c]·Mᵀ`
pub fn sgemm(
    dst: &mut SMatrix<f32, 12, 12>,
    i: usize,
    j: usize,
    m: &Matrix3<f32>,
    src: &SMatrix<f32, 12, 12>,
    r: usize,
    c: usize,
) {
    let term = block(src, r, c) * m.transpose();
    add_block(dst, i, j, &term);
}

/// Overwrite every block below the block diagonal with the transpose of its mirror image
pub fn mirror_lower_blocks(m: &mut SMatrix<f32, 12, 12>) {
    for row in (3..12).step_by(3) {
        for col in (0..row).step_by(3) {
            let upper = block(m, col, row).transpose();
            m.fixed_view_mut::<3, 3>(row, col).copy_from(&upper);
        }
    }
}

/// Add `values` to the three diagonal entries starting at `offset`
#[inline]
pub fn add_diagonal<const N: usize>(m: &mut SMatrix<f32, N, N>, offset: usize, values: &Vector3<f32>) {
    for k in 0..3 {
        m[(offset + k, offset + k)] += values[k];
    }
}

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
#[inline]
pub fn symmetrize<const N: usize>(m: &SMatrix<f32, N, N>) -> SMatrix<f32, N, N> {
    (m + m.transpose()) * 0.5
}

/// Solve `A x = b` for a symmetric positive definite `A`
///
/// Cholesky is tried first; an indefinite but non-singular `A` (round-off in a nearly
/// singular covariance) falls back to LU. Returns `None` only when `A` is singular.
pub fn solve_spd<const N: usize>(
    a: &SMatrix<f32, N, N>,
    b: &SMatrix<f32, N, 1>,
) -> Option<SMatrix<f32, N, 1>>
where
    Const<N>: DimMin<Const<N>, Output = Const<N>>,
{
    if let Some(ch) = Cholesky::new(symmetrize(a)) {
        return Some(ch.solve(b));
    }
    a.lu().solve(b)
}

/// True if any element of the matrix is NaN
pub fn has_nan<const R: usize, const C: usize>(m: &SMatrix<f32, R, C>) -> bool {
    m.iter().any(|x| x.is_nan())
}

/// True if any element of the matrix is infinite
pub fn has_inf<const R: usize, const C: usize>(m: &SMatrix<f32, R, C>) -> bool {
    m.iter().any(|x| x.is_infinite())
}

/* =============================== Tests ==================================== */

#[cfg(test)]
mod tests {
    use super::*;

    fn max_abs_diff<const R: usize, const C: usize>(
        a: &SMatrix<f32, R, C>,
        b: &SMatrix<f32, R, C>,
    ) -> f32 {
        (a - b).abs().max()
    }

    fn sample_covariance() -> SMatrix<f32, 12, 12> {
        let a = SMatrix::<f32, 12, 12>::from_fn(|r, c| ((r * 7 + c * 3) % 11) as f32 * 0.1 - 0.4);
        a * a.transpose() + SMatrix::<f32, 12, 12>::identity()
    }

    fn sample_block(seed: f32) -> Matrix3<f32> {
        Matrix3::from_fn(|r, c| seed * (r as f32 + 1.0) - 0.3 * c as f32)
    }

    #[test]
    fn t_ssyr2k() {
        let src = sample_covariance();
        let m = sample_block(0.2);
        let mut dst = SMatrix::<f32, 12, 12>::zeros();
        ssyr2k(&mut dst, 3, 6, &m, &src, 0, 9);
        let expected = m * block(&src, 0, 9) + block(&src, 9, 0) * m.transpose();
        assert!(max_abs_diff(&block(&dst, 3, 6), &expected) < 1e-6);
        // nothing outside the destination block is touched
        assert_eq!(block(&dst, 0, 0), Matrix3::zeros());
    }

    #[test]
    fn t_sgemmm_and_sgemm() {
        let src = sample_covariance();
        let m = sample_block(-0.5);
        let mut dst = src;
        sgemmm_diagonal(&mut dst, 6, &m, &src, 3);
        let expected = block(&src, 6, 6) + m * block(&src, 3, 3) * m.transpose();
        assert!(max_abs_diff(&block(&dst, 6, 6), &expected) < 1e-5);

        let mut dst = src;
        sgemm(&mut dst, 0, 3, &m, &src, 0, 0);
        let expected = block(&src, 0, 3) + block(&src, 0, 0) * m.transpose();
        assert!(max_abs_diff(&block(&dst, 0, 3), &expected) < 1e-5);
    }

    #[test]
    fn t_mirror_lower_blocks() {
        let mut m = SMatrix::<f32, 12, 12>::from_fn(|r, c| if r <= c { (r * 12 + c) as f32 } else { -1.0 });
        // diagonal blocks have garbage below their own diagonal; those are kept
        mirror_lower_blocks(&mut m);
        for row in 0..12 {
            for col in 0..12 {
                if row / 3 > col / 3 {
                    assert_eq!(m[(row, col)], m[(col, row)]);
                }
            }
        }
        assert_eq!(m[(1, 0)], -1.0);
    }

    #[test]
    fn t_add_diagonal() {
        let mut m = SMatrix::<f32, 4, 4>::identity();
        add_diagonal(&mut m, 1, &Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(m[(0, 0)], 1.0);
        assert_eq!(m[(1, 1)], 2.0);
        assert_eq!(m[(3, 3)], 4.0);
        assert_eq!(m[(1, 2)], 0.0);
    }

    #[test]
    fn t_solve_spd() {
        let a = sample_covariance();
        let x = SMatrix::<f32, 12, 1>::from_fn(|r, _| r as f32 - 5.0);
        let b = a * x;
        let solved = solve_spd(&a, &b).expect("SPD system is solvable");
        assert!(max_abs_diff(&solved, &x) < 1e-3);

        let singular = SMatrix::<f32, 4, 4>::zeros();
        assert!(solve_spd(&singular, &SMatrix::<f32, 4, 1>::zeros()).is_none());
    }

    #[test]
    fn t_solve_indefinite_uses_lu() {
        let a = SMatrix::<f32, 4, 4>::from_diagonal(&nalgebra::Vector4::new(2.0, -1.0, 4.0, 0.5));
        let b = SMatrix::<f32, 4, 1>::new(2.0, 3.0, -8.0, 1.0);
        let solved = solve_spd(&a, &b).expect("non-singular system is solvable");
        assert!(max_abs_diff(&solved, &SMatrix::<f32, 4, 1>::new(1.0, -3.0, -2.0, 2.0)) < 1e-6);
    }

    #[test]
    fn t_finiteness() {
        let mut m = SMatrix::<f32, 4, 4>::identity();
        assert!(!has_nan(&m) && !has_inf(&m));
        m[(2, 3)] = f32::NAN;
        assert!(has_nan(&m));
        assert!(!has_inf(&m));
        m[(2, 3)] = f32::NEG_INFINITY;
        assert!(has_inf(&m));
    }
}
