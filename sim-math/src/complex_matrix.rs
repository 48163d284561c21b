//! Complex matrix inversion using nalgebra
//!
//! Band separation needs the inverse of a small complex mixing matrix. Square
//! systems are inverted exactly, over-determined ones get the SVD
//! pseudo-inverse (least squares solution). Both paths reject matrices whose
//! singular values show they cannot separate the requested components.

use nalgebra::DMatrix;
use num_complex::Complex64;

use crate::MathError;

/// Ratio of smallest to largest singular value below which a matrix is
/// treated as rank deficient
const RANK_EPSILON: f64 = 1e-10;

/// Estimate the 2-norm condition number (largest / smallest singular value).
fn condition_number(matrix: &DMatrix<Complex64>) -> f64 {
    let singular = matrix.clone().singular_values();
    let max = singular.iter().cloned().fold(0.0_f64, f64::max);
    let min = singular.iter().cloned().fold(f64::INFINITY, f64::min);

    if min <= 0.0 || !min.is_finite() {
        f64::INFINITY
    } else {
        max / min
    }
}

fn check_rank(matrix: &DMatrix<Complex64>) -> Result<(), MathError> {
    let condition = condition_number(matrix);
    if !condition.is_finite() || condition * RANK_EPSILON > 1.0 {
        return Err(MathError::RankDeficient { condition });
    }
    Ok(())
}

/// Invert a square complex matrix.
///
/// # Errors
/// * `MathError::NotSquare` - If the matrix is not square
/// * `MathError::RankDeficient` - If the matrix is numerically singular
/// * `MathError::Singular` - If LU inversion fails
pub fn invert(matrix: &DMatrix<Complex64>) -> Result<DMatrix<Complex64>, MathError> {
    let (rows, cols) = matrix.shape();
    if rows != cols {
        return Err(MathError::NotSquare { rows, cols });
    }

    check_rank(matrix)?;

    matrix.clone().try_inverse().ok_or(MathError::Singular)
}

/// Least-squares pseudo-inverse of an over-determined (rows >= cols) matrix.
///
/// The result has shape `cols x rows`, so that `pinv * matrix` is the
/// `cols x cols` identity.
///
/// # Errors
/// * `MathError::Underdetermined` - If the matrix has more columns than rows
/// * `MathError::RankDeficient` - If the columns are not linearly independent
/// * `MathError::SvdFailed` - If the decomposition did not produce U / V^T
pub fn pseudo_inverse(matrix: &DMatrix<Complex64>) -> Result<DMatrix<Complex64>, MathError> {
    let (rows, cols) = matrix.shape();
    if cols > rows {
        return Err(MathError::Underdetermined { rows, cols });
    }

    check_rank(matrix)?;

    let svd = matrix.clone().svd(true, true);
    svd.pseudo_inverse(RANK_EPSILON)
        .map_err(|_| MathError::SvdFailed)
}

/// Invert a mixing matrix: exact inverse when square, pseudo-inverse otherwise.
pub fn unmixing_matrix(matrix: &DMatrix<Complex64>) -> Result<DMatrix<Complex64>, MathError> {
    if matrix.nrows() == matrix.ncols() {
        invert(matrix)
    } else {
        pseudo_inverse(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn phase_matrix(rows: usize) -> DMatrix<Complex64> {
        DMatrix::from_fn(rows, 3, |p, c| {
            let phase = 2.0 * PI * p as f64 / rows as f64;
            match c {
                0 => Complex64::new(1.0, 0.0),
                1 => Complex64::from_polar(0.5, phase),
                _ => Complex64::from_polar(0.5, -phase),
            }
        })
    }

    fn assert_identity(m: &DMatrix<Complex64>) {
        for r in 0..m.nrows() {
            for c in 0..m.ncols() {
                let expected = if r == c { 1.0 } else { 0.0 };
                assert_relative_eq!(m[(r, c)].re, expected, epsilon = 1e-10);
                assert_relative_eq!(m[(r, c)].im, 0.0, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_invert_square_phase_matrix() {
        let m = phase_matrix(3);
        let inv = invert(&m).unwrap();
        assert_identity(&(&inv * &m));
    }

    #[test]
    fn test_pseudo_inverse_overdetermined() {
        let m = phase_matrix(5);
        let pinv = pseudo_inverse(&m).unwrap();
        assert_eq!(pinv.shape(), (3, 5));
        assert_identity(&(&pinv * &m));
    }

    #[test]
    fn test_not_square() {
        let m = phase_matrix(4);
        assert_eq!(invert(&m), Err(MathError::NotSquare { rows: 4, cols: 3 }));
    }

    #[test]
    fn test_underdetermined() {
        let m = DMatrix::from_element(2, 3, Complex64::new(1.0, 0.0));
        assert!(matches!(
            pseudo_inverse(&m),
            Err(MathError::Underdetermined { rows: 2, cols: 3 })
        ));
    }

    #[test]
    fn test_degenerate_phases_rejected() {
        // All phase steps identical: the +/- columns cannot be separated
        let m = DMatrix::from_fn(3, 3, |_, c| match c {
            0 => Complex64::new(1.0, 0.0),
            1 => Complex64::from_polar(0.5, 0.3),
            _ => Complex64::from_polar(0.5, -0.3),
        });
        assert!(matches!(
            unmixing_matrix(&m),
            Err(MathError::RankDeficient { .. })
        ));
    }
}
