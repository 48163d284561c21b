//! Linear interpolation over sampled tables.
//!
//! Two flavours are provided:
//!
//! - **Validated interpolation** over arbitrary sorted abscissae ([`interp`]),
//!   with error reporting for malformed input
//! - **Uniform-grid lookup** ([`lerp_uniform`], [`bilerp_uniform`]) where the
//!   sample position is given directly in index units. These are the hot path
//!   of OTF evaluation and return `None` outside the table instead of erroring.

use std::ops::{Add, Mul};

use ndarray::ArrayView2;

use crate::MathError;

/// Performs linear interpolation on 1D data using binary search.
///
/// # Arguments
///
/// * `x` - The x-coordinate at which to interpolate
/// * `xs` - Array of x-coordinates (must be sorted in ascending order)
/// * `ys` - Array of corresponding y-values (must match length of xs)
///
/// # Returns
///
/// * `Ok(f64)` - The interpolated y-value at position x
/// * `Err(MathError)` - If the input is malformed or x is outside the range
///
/// # Examples
///
/// ```rust
/// use sim_math::interp::interp;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let x_coords = vec![0.0, 1.0, 2.0, 3.0];
/// let y_values = vec![0.0, 1.0, 4.0, 9.0];
///
/// let result = interp(1.5, &x_coords, &y_values)?;
/// assert_eq!(result, 2.5);
///
/// let exact = interp(2.0, &x_coords, &y_values)?;
/// assert_eq!(exact, 4.0);
/// # Ok(())
/// # }
/// ```
pub fn interp(x: f64, xs: &[f64], ys: &[f64]) -> Result<f64, MathError> {
    if xs.len() != ys.len() {
        return Err(MathError::MismatchedLengths);
    }

    if xs.len() < 2 {
        return Err(MathError::InsufficientData);
    }

    if xs.windows(2).any(|w| w[1] <= w[0]) {
        return Err(MathError::UnsortedData);
    }

    let min_x = xs[0];
    let max_x = xs[xs.len() - 1];

    if !(min_x..=max_x).contains(&x) {
        return Err(MathError::OutOfBounds(x, min_x, max_x));
    }

    // Sorted and finite at this point, so total_cmp agrees with partial_cmp
    let idx = match xs.binary_search_by(|probe| probe.total_cmp(&x)) {
        Ok(exact_idx) => return Ok(ys[exact_idx]),
        Err(insert_idx) => insert_idx,
    };

    let (x1, x2) = (xs[idx - 1], xs[idx]);
    let (y1, y2) = (ys[idx - 1], ys[idx]);

    let t = (x - x1) / (x2 - x1);
    Ok(y1 + t * (y2 - y1))
}

/// Linearly interpolate a uniformly sampled table at a fractional index.
///
/// `pos` is measured in sample units: `pos = 1.25` lies a quarter of the way
/// from sample 1 to sample 2. Returns `None` for negative positions, NaN, or
/// positions past the last sample.
///
/// Works for any sample type that supports scaling by `f64`, which covers both
/// `f64` and `Complex<f64>`.
pub fn lerp_uniform<T>(samples: &[T], pos: f64) -> Option<T>
where
    T: Copy + Add<Output = T> + Mul<f64, Output = T>,
{
    if samples.is_empty() || pos.is_nan() || pos < 0.0 {
        return None;
    }

    let last = (samples.len() - 1) as f64;
    if pos > last {
        return None;
    }

    let lower = pos.floor() as usize;
    if lower as f64 == last {
        return Some(samples[lower]);
    }

    let t = pos - lower as f64;
    Some(samples[lower] * (1.0 - t) + samples[lower + 1] * t)
}

/// Bilinearly interpolate a uniformly sampled 2D table.
///
/// `row_pos` indexes axis 0 and `col_pos` axis 1, both in sample units.
/// Returns `None` when either coordinate falls outside the table.
pub fn bilerp_uniform<T>(table: ArrayView2<T>, row_pos: f64, col_pos: f64) -> Option<T>
where
    T: Copy + Add<Output = T> + Mul<f64, Output = T>,
{
    let (rows, cols) = table.dim();
    if rows == 0 || cols == 0 || row_pos.is_nan() || col_pos.is_nan() {
        return None;
    }
    if row_pos < 0.0 || col_pos < 0.0 {
        return None;
    }

    let (last_r, last_c) = ((rows - 1) as f64, (cols - 1) as f64);
    if row_pos > last_r || col_pos > last_c {
        return None;
    }

    let r0 = (row_pos.floor() as usize).min(rows.saturating_sub(2));
    let c0 = (col_pos.floor() as usize).min(cols.saturating_sub(2));
    let r1 = (r0 + 1).min(rows - 1);
    let c1 = (c0 + 1).min(cols - 1);

    let tr = if r1 == r0 { 0.0 } else { row_pos - r0 as f64 };
    let tc = if c1 == c0 { 0.0 } else { col_pos - c0 as f64 };

    let top = table[[r0, c0]] * (1.0 - tc) + table[[r0, c1]] * tc;
    let bottom = table[[r1, c0]] * (1.0 - tc) + table[[r1, c1]] * tc;
    Some(top * (1.0 - tr) + bottom * tr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use num_complex::Complex64;

    #[test]
    fn test_exact_match() {
        let xs = vec![1.0, 2.0, 3.0, 4.0];
        let ys = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(interp(2.0, &xs, &ys).unwrap(), 20.0);
    }

    #[test]
    fn test_linear_interpolation() {
        let xs = vec![1.0, 2.0, 3.0];
        let ys = vec![10.0, 20.0, 30.0];
        assert_eq!(interp(1.5, &xs, &ys).unwrap(), 15.0);
        assert_eq!(interp(2.5, &xs, &ys).unwrap(), 25.0);
    }

    #[test]
    fn test_out_of_bounds() {
        let xs = vec![1.0, 2.0, 3.0];
        let ys = vec![10.0, 20.0, 30.0];
        assert!(matches!(
            interp(0.5, &xs, &ys),
            Err(MathError::OutOfBounds(_, _, _))
        ));
        assert!(matches!(
            interp(3.5, &xs, &ys),
            Err(MathError::OutOfBounds(_, _, _))
        ));
    }

    #[test]
    fn test_malformed_input() {
        assert_eq!(
            interp(1.5, &[1.0, 2.0, 3.0], &[10.0, 20.0]),
            Err(MathError::MismatchedLengths)
        );
        assert_eq!(
            interp(1.0, &[1.0], &[10.0]),
            Err(MathError::InsufficientData)
        );
        assert_eq!(
            interp(1.5, &[2.0, 1.0, 3.0], &[20.0, 10.0, 30.0]),
            Err(MathError::UnsortedData)
        );
    }

    #[test]
    fn test_lerp_uniform_between_samples() {
        let table = [0.0, 2.0, 6.0];
        assert_relative_eq!(lerp_uniform(&table, 0.25).unwrap(), 0.5);
        assert_relative_eq!(lerp_uniform(&table, 1.5).unwrap(), 4.0);
        assert_eq!(lerp_uniform(&table, 2.0), Some(6.0));
    }

    #[test]
    fn test_lerp_uniform_outside_table() {
        let table = [1.0, 2.0];
        assert_eq!(lerp_uniform(&table, -0.1), None);
        assert_eq!(lerp_uniform(&table, 1.01), None);
        assert_eq!(lerp_uniform(&table, f64::NAN), None);
        assert_eq!(lerp_uniform::<f64>(&[], 0.0), None);
    }

    #[test]
    fn test_lerp_uniform_complex() {
        let table = [Complex64::new(0.0, 0.0), Complex64::new(2.0, -4.0)];
        let v = lerp_uniform(&table, 0.5).unwrap();
        assert_relative_eq!(v.re, 1.0);
        assert_relative_eq!(v.im, -2.0);
    }

    #[test]
    fn test_bilerp_uniform() {
        let table = array![[0.0, 1.0], [2.0, 3.0]];
        assert_relative_eq!(bilerp_uniform(table.view(), 0.5, 0.5).unwrap(), 1.5);
        assert_relative_eq!(bilerp_uniform(table.view(), 1.0, 0.0).unwrap(), 2.0);
        assert_relative_eq!(bilerp_uniform(table.view(), 0.0, 1.0).unwrap(), 1.0);
        assert_eq!(bilerp_uniform(table.view(), 1.5, 0.0), None);
    }

    #[test]
    fn test_bilerp_single_row() {
        let table = array![[0.0, 10.0, 20.0]];
        assert_relative_eq!(bilerp_uniform(table.view(), 0.0, 1.5).unwrap(), 15.0);
    }
}
