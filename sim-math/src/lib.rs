//! sim-math - Numeric helpers for structured illumination reconstruction
//!
//! This crate provides the dimension-free numerical building blocks used by
//! the reconstruction engine:
//!
//! - **Interpolation** - Validated 1D linear interpolation and uniform-grid
//!   linear/bilinear lookup of real or complex sample tables
//! - **Complex matrices** - Exact inversion and SVD pseudo-inversion of complex
//!   mixing matrices with degeneracy detection
//!
//! # Example
//!
//! ```
//! use sim_math::interp::lerp_uniform;
//!
//! let table = [0.0, 1.0, 4.0];
//! assert_eq!(lerp_uniform(&table, 1.5), Some(2.5));
//! assert_eq!(lerp_uniform(&table, 2.5), None);
//! ```

pub mod complex_matrix;
pub mod interp;

use thiserror::Error;

pub use complex_matrix::{invert, pseudo_inverse, unmixing_matrix};
pub use interp::{bilerp_uniform, interp, lerp_uniform};

/// Errors produced by the interpolation and matrix helpers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Value {0} is out of bounds for interpolation range [{1}, {2}]")]
    OutOfBounds(f64, f64, f64),
    #[error("Input vectors must have at least 2 points")]
    InsufficientData,
    #[error("Input vectors must have the same length")]
    MismatchedLengths,
    #[error("X values must be sorted in ascending order")]
    UnsortedData,
    #[error("matrix is not square: {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
    #[error("matrix has more columns than rows: {rows}x{cols}")]
    Underdetermined { rows: usize, cols: usize },
    #[error("singular matrix")]
    Singular,
    #[error("rank deficient matrix: condition estimate {condition:.3e}")]
    RankDeficient { condition: f64 },
    #[error("SVD decomposition failed to produce U or V^T matrices")]
    SvdFailed,
}
