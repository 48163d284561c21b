//! Error taxonomy for the reconstruction engine.
//!
//! Hard errors (configuration, dimensions, parameters, state, degenerate
//! matrices) propagate from the leaf component up to the orchestrator, which
//! aborts the current estimation or reconstruction. Weak parameter fits are
//! not errors; see [`crate::param::fit::FitQuality`].

use sim_math::MathError;
use thiserror::Error;

/// Errors that can occur during parameter estimation and reconstruction
#[derive(Error, Debug)]
pub enum SimError {
    /// Persisted parameters are missing or incomplete
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Image, band or frame counts do not match
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// An argument is outside its valid range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// An operation was requested before its prerequisites were set up
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A matrix needed for band separation cannot be inverted
    #[error("Numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    #[error("Math error: {0}")]
    Math(#[from] MathError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Convenience alias used throughout the crate
pub type SimResult<T> = Result<T, SimError>;

/// Fail with [`SimError::DimensionMismatch`] unless two shapes agree
pub(crate) fn check_same_shape(what: &str, a: &[usize], b: &[usize]) -> SimResult<()> {
    if a != b {
        return Err(SimError::DimensionMismatch(format!(
            "{what}: shape {a:?} does not match {b:?}"
        )));
    }
    Ok(())
}
