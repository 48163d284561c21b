//! Band separation
//!
//! Every raw phase frame is a linear mix of the `2 * bands - 1` frequency
//! components: the DC band plus a `+` and `-` component per higher band.
//! Frame `p` sees band `j` with phase `j * phase_p`, so the mixing matrix row
//! is `[f0, f1 e^{i phi}, f1 e^{-i phi}, f2 e^{2i phi}, ...]`. Inverting that
//! matrix (exactly when square, least squares when over-determined) unmixes
//! the components.
//!
//! Components are numbered `0` (DC), `2j - 1` (`+` of band `j`) and `2j`
//! (`-` of band `j`).

use std::f64::consts::PI;

use nalgebra::DMatrix;
use ndarray::Dimension;
use num_complex::Complex64;
use sim_math::{unmixing_matrix, MathError};

use crate::error::{check_same_shape, SimError, SimResult};
use crate::parallel::map_indices;
use crate::vector::Spectrum;

/// Phases of the raw frames of one direction
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseSet {
    /// `offset + 2 pi p / phases`
    Equidistant { offset: f64 },
    /// One absolute phase per frame
    Explicit(Vec<f64>),
}

impl PhaseSet {
    /// # Errors
    /// * `SimError::InvalidParameter` - If an explicit set has the wrong length
    pub fn phases(&self, nr_phases: usize) -> SimResult<Vec<f64>> {
        match self {
            PhaseSet::Equidistant { offset } => Ok((0..nr_phases)
                .map(|p| offset + 2.0 * PI * p as f64 / nr_phases as f64)
                .collect()),
            PhaseSet::Explicit(phases) if phases.len() == nr_phases => Ok(phases.clone()),
            PhaseSet::Explicit(phases) => Err(SimError::InvalidParameter(format!(
                "{} explicit phases for {nr_phases} frames",
                phases.len()
            ))),
        }
    }
}

/// Cosine-expansion factors `[1, 0.5, 0.5, ...]`
pub fn default_band_factors(bands: usize) -> Vec<f64> {
    (0..bands).map(|b| if b == 0 { 1.0 } else { 0.5 }).collect()
}

/// Per-band frame phases: row `j - 1` holds `j * phase_p` for band `j`.
pub fn phases_per_band(phases: &[f64], bands: usize) -> Vec<Vec<f64>> {
    (1..bands)
        .map(|j| phases.iter().map(|p| p * j as f64).collect())
        .collect()
}

/// Band a component belongs to
pub fn component_band(component: usize) -> usize {
    (component + 1) / 2
}

/// Shift direction of a component: 0 for DC, +1 for `+`, -1 for `-`
pub fn component_sign(component: usize) -> f64 {
    match component {
        0 => 0.0,
        c if c % 2 == 1 => 1.0,
        _ => -1.0,
    }
}

/// Build the unmixing matrix, shape `(2 * bands - 1) x phases`.
///
/// # Arguments
/// * `phases_per_band` - `bands - 1` rows, each holding one phase per frame
/// * `bands` - Number of bands including DC
/// * `factors` - Per-band scale of the mixing matrix columns
///
/// # Errors
/// * `SimError::InvalidParameter` - If the phase rows do not match the band
///   count or there are too few phases
/// * `SimError::NumericalDegeneracy` - If the phases cannot separate the bands
pub fn create_separation_matrix(
    phases_per_band: &[Vec<f64>],
    bands: usize,
    factors: &[f64],
) -> SimResult<DMatrix<Complex64>> {
    if bands < 2 || phases_per_band.len() != bands - 1 {
        return Err(SimError::InvalidParameter(format!(
            "{} phase rows for {bands} bands",
            phases_per_band.len()
        )));
    }
    if factors.len() != bands {
        return Err(SimError::InvalidParameter(format!(
            "{} band factors for {bands} bands",
            factors.len()
        )));
    }
    let nr_phases = phases_per_band[0].len();
    if phases_per_band.iter().any(|row| row.len() != nr_phases) {
        return Err(SimError::InvalidParameter(
            "every band needs the same number of phases".to_string(),
        ));
    }
    let components = 2 * bands - 1;
    if nr_phases < components {
        return Err(SimError::InvalidParameter(format!(
            "{nr_phases} phases cannot separate {components} components"
        )));
    }

    let mixing = DMatrix::from_fn(nr_phases, components, |p, c| {
        if c == 0 {
            return Complex64::new(factors[0], 0.0);
        }
        let band = component_band(c);
        let phase = phases_per_band[band - 1][p] * component_sign(c);
        Complex64::from_polar(factors[band], phase)
    });

    unmixing_matrix(&mixing).map_err(|e| match e {
        MathError::RankDeficient { condition } => SimError::NumericalDegeneracy(format!(
            "separation matrix is rank deficient (condition {condition:.3e})"
        )),
        MathError::Singular | MathError::SvdFailed => {
            SimError::NumericalDegeneracy(format!("separation matrix cannot be inverted: {e}"))
        }
        other => SimError::Math(other),
    })
}

/// Separate raw phase spectra into `2 * bands - 1` components.
///
/// # Errors
/// * `SimError::DimensionMismatch` - If the frame count or shapes disagree
/// * Errors of [`create_separation_matrix`]
pub fn separate_bands<D: Dimension>(
    raw: &[Spectrum<D>],
    phases: &PhaseSet,
    bands: usize,
    factors: &[f64],
) -> SimResult<Vec<Spectrum<D>>> {
    let first = raw.first().ok_or_else(|| {
        SimError::DimensionMismatch("no raw spectra to separate".to_string())
    })?;
    for frame in raw.iter().skip(1) {
        check_same_shape("raw phase spectrum", frame.shape(), first.shape())?;
    }

    let frame_phases = phases.phases(raw.len())?;
    let matrix = create_separation_matrix(&phases_per_band(&frame_phases, bands), bands, factors)?;

    let components = map_indices(matrix.nrows(), |c| {
        let mut out = Spectrum::<D>::zeros(first.raw_dim());
        for (p, frame) in raw.iter().enumerate() {
            out.scaled_add(matrix[(c, p)], frame);
        }
        out
    });
    Ok(components)
}

/// [`separate_bands`] with equidistant phases starting at `offset`.
pub fn separate_bands_equidistant<D: Dimension>(
    raw: &[Spectrum<D>],
    offset: f64,
    bands: usize,
    factors: &[f64],
) -> SimResult<Vec<Spectrum<D>>> {
    separate_bands(raw, &PhaseSet::Equidistant { offset }, bands, factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn component(seed: f64) -> Array2<Complex64> {
        Array2::from_shape_fn((6, 6), |(y, x)| {
            Complex64::new((x as f64 * seed).sin(), (y as f64 + seed).cos())
        })
    }

    /// Mix components the way the illumination does
    fn mix(components: &[Array2<Complex64>], phases: &[f64], factors: &[f64]) -> Vec<Array2<Complex64>> {
        phases
            .iter()
            .map(|&phi| {
                let mut frame = components[0].mapv(|v| v * factors[0]);
                for c in 1..components.len() {
                    let band = component_band(c);
                    let coef = Complex64::from_polar(
                        factors[band],
                        component_sign(c) * band as f64 * phi,
                    );
                    frame.scaled_add(coef, &components[c]);
                }
                frame
            })
            .collect()
    }

    fn assert_recovered(found: &[Array2<Complex64>], expected: &[Array2<Complex64>]) {
        assert_eq!(found.len(), expected.len());
        for (f, e) in found.iter().zip(expected) {
            for (a, b) in f.iter().zip(e.iter()) {
                assert_relative_eq!(a.re, b.re, epsilon = 1e-9);
                assert_relative_eq!(a.im, b.im, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_square_round_trip() {
        let comps: Vec<_> = (0..5).map(|i| component(0.3 + i as f64)).collect();
        let factors = default_band_factors(3);
        let offset = 0.4;
        let phases = PhaseSet::Equidistant { offset }.phases(5).unwrap();
        let raw = mix(&comps, &phases, &factors);

        let separated = separate_bands_equidistant(&raw, offset, 3, &factors).unwrap();
        assert_recovered(&separated, &comps);
    }

    #[test]
    fn test_overdetermined_round_trip_explicit_phases() {
        let comps: Vec<_> = (0..3).map(|i| component(1.1 * i as f64 + 0.2)).collect();
        let factors = [1.0, 0.7];
        let phases = vec![0.1, 1.3, 2.2, 3.9, 5.0];
        let raw = mix(&comps, &phases, &factors);

        let separated = separate_bands(&raw, &PhaseSet::Explicit(phases), 2, &factors).unwrap();
        assert_recovered(&separated, &comps);
    }

    #[test]
    fn test_too_few_phases() {
        let rows = phases_per_band(&[0.0, 1.0, 2.0, 3.0], 3);
        assert!(matches!(
            create_separation_matrix(&rows, 3, &default_band_factors(3)),
            Err(SimError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_degenerate_phases() {
        let rows = phases_per_band(&[0.5, 0.5, 0.5], 2);
        assert!(matches!(
            create_separation_matrix(&rows, 2, &default_band_factors(2)),
            Err(SimError::NumericalDegeneracy(_))
        ));
    }

    #[test]
    fn test_mismatched_frames() {
        let raw = vec![Array2::<Complex64>::zeros((4, 4)), Array2::zeros((4, 5)), Array2::zeros((4, 4))];
        assert!(matches!(
            separate_bands_equidistant(&raw, 0.0, 2, &default_band_factors(2)),
            Err(SimError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_component_numbering() {
        assert_eq!(component_band(0), 0);
        assert_eq!(component_band(1), 1);
        assert_eq!(component_band(4), 2);
        assert_eq!(component_sign(3), 1.0);
        assert_eq!(component_sign(4), -1.0);
    }
}
