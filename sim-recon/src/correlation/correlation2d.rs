//! 2D band correlation
//!
//! Thin wrappers over the shared core with DC exclusion enabled.

use ndarray::{Array2, Ix2};
use num_complex::Complex64;

use super::{
    auto_correlation_generic, common_region_generic, correlation_spectrum, fit_peak_generic,
    get_peak_generic, locate_peak_plane, CorrelationTrace, Peak,
};
use crate::error::SimResult;
use crate::otf::OtfModel;

/// Restrict two bands to their common, sufficiently weighted region.
///
/// # Arguments
/// * `band0`, `band1` - Spectra of the reference and the shifted band
/// * `bn0`, `bn1` - OTF band indices of the two spectra
/// * `kx`, `ky` - Shift of band 1 relative to band 0 in frequency pixels
/// * `dist` - DC exclusion radius relative to `hypot(kx, ky)`
/// * `weight_limit` - Minimum OTF magnitude kept
/// * `divide_by_otf` - Divide surviving samples by their OTF
#[allow(clippy::too_many_arguments)]
pub fn common_region(
    band0: &Array2<Complex64>,
    band1: &Array2<Complex64>,
    bn0: usize,
    bn1: usize,
    otf: &impl OtfModel<Ix2>,
    kx: f64,
    ky: f64,
    dist: f64,
    weight_limit: f64,
    divide_by_otf: bool,
) -> SimResult<(Array2<Complex64>, Array2<Complex64>)> {
    common_region_generic(
        band0,
        band1,
        bn0,
        bn1,
        otf,
        kx,
        ky,
        dist,
        weight_limit,
        divide_by_otf,
        true,
    )
}

/// Strongest pixel at radius `> k_min`, in signed coordinates.
pub fn locate_peak(vec: &Array2<Complex64>, k_min: f64) -> SimResult<Peak> {
    locate_peak_plane(vec, k_min)
}

/// Cross-correlation spectrum of `band1` against `band0`
pub fn cross_correlation(
    band0: &Array2<Complex64>,
    band1: &Array2<Complex64>,
) -> SimResult<Array2<Complex64>> {
    correlation_spectrum(band0, band1)
}

/// Refine a coarse shift to sub-pixel precision.
#[allow(clippy::too_many_arguments)]
pub fn fit_peak(
    band0: &Array2<Complex64>,
    band1: &Array2<Complex64>,
    bn0: usize,
    bn1: usize,
    otf: &impl OtfModel<Ix2>,
    kx0: f64,
    ky0: f64,
    weight_limit: f64,
    search_radius: f64,
    trace: Option<&mut CorrelationTrace>,
) -> SimResult<Peak> {
    fit_peak_generic(
        band0,
        band1,
        bn0,
        bn1,
        otf,
        kx0,
        ky0,
        weight_limit,
        search_radius,
        true,
        trace,
    )
}

/// Correlation at a fixed shift: `modulation * e^{i phase}`.
#[allow(clippy::too_many_arguments)]
pub fn get_peak(
    band0: &Array2<Complex64>,
    band1: &Array2<Complex64>,
    bn0: usize,
    bn1: usize,
    otf: &impl OtfModel<Ix2>,
    kx: f64,
    ky: f64,
    weight_limit: f64,
) -> SimResult<Complex64> {
    get_peak_generic(band0, band1, bn0, bn1, otf, kx, ky, weight_limit, true)
}

/// Absolute phase of a single raw spectrum (Wicker).
pub fn auto_correlation(
    img: &Array2<Complex64>,
    otf: &impl OtfModel<Ix2>,
    kx: f64,
    ky: f64,
) -> SimResult<Complex64> {
    auto_correlation_generic(img, otf, kx, ky)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otf::OtfProvider;
    use crate::vector::{FftDirection, SimDimension};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const SIZE: usize = 64;

    fn otf() -> OtfProvider {
        let mut otf = OtfProvider::from_estimate(1.4, 525.0, 0.7).unwrap();
        // Cutoff spans 28 frequency pixels
        let cutoff = OtfModel::<Ix2>::cutoff(&otf);
        otf.set_pixel_size(cutoff / 28.0).unwrap();
        otf
    }

    /// Random object spectrum band-limited by the OTF, plus a copy moved by
    /// `(kx, ky)` and scaled by `m e^{i phase}`
    fn band_pair(kx: f64, ky: f64, m: f64, phase: f64) -> (Array2<Complex64>, Array2<Complex64>) {
        let otf = otf();
        let mut rng = StdRng::seed_from_u64(7);
        let object = Array2::from_shape_fn((SIZE, SIZE), |_| rng.random::<f64>());

        let mut spatial = object.mapv(|v| Complex64::new(v, 0.0));
        let mut b0 = spatial.clone();
        Ix2::fft(&mut b0, FftDirection::Forward);

        Ix2::fourier_shift(&mut spatial, kx, ky);
        let mut b1 = spatial;
        Ix2::fft(&mut b1, FftDirection::Forward);
        b1.mapv_inplace(|v| v * Complex64::from_polar(m, phase));

        let mut ones0 = Array2::from_elem((SIZE, SIZE), Complex64::new(1.0, 0.0));
        otf.write_otf_vector(&mut ones0, 0, 0.0, 0.0).unwrap();
        b0.zip_mut_with(&ones0, |a, o| *a *= o);
        b1.zip_mut_with(&ones0, |a, o| *a *= o);
        (b0, b1)
    }

    #[test]
    fn test_auto_correlation_recovers_frame_phases() {
        use crate::algorithm::sim2d::prepare_input;
        use crate::synthetic::{generate_2d, SyntheticConfig};
        use std::f64::consts::PI;

        let config = SyntheticConfig {
            count: 512,
            ..SyntheticConfig::default()
        };
        let data = generate_2d(&config).unwrap();
        let mut param = data.param.clone();
        param.set_fade_border(15);
        let mut otf = OtfProvider::from_estimate(config.na, config.emission_nm, config.curvature).unwrap();
        param.configure_otf(&mut otf).unwrap();
        let input = prepare_input(&data.frames, &param).unwrap();

        let phases = param.nr_phases();
        for (raw, truth) in input.iter().zip(&data.patterns) {
            // First band sits at half the outer shift
            let (kx, ky) = (truth.shift.0 / 2.0, truth.shift.1 / 2.0);
            for (p, frame) in raw.iter().enumerate() {
                let measured = auto_correlation(frame, &otf, kx, ky).unwrap().arg();
                let expected = truth.phase_offset + 2.0 * PI * p as f64 / phases as f64;
                let d = (measured - expected).rem_euclid(2.0 * PI);
                let err = d.min(2.0 * PI - d);
                assert!(err < 0.15, "phase {p}: measured {measured:.3}, expected {expected:.3}");
            }
        }
    }

    #[test]
    fn test_locate_peak_exact_pixel() {
        let (b0, b1) = band_pair(12.0, -7.0, 1.0, 0.0);
        let corr = cross_correlation(&b0, &b1).unwrap();
        let peak = locate_peak(&corr, 5.0).unwrap();
        assert_eq!((peak.x, peak.y), (12.0, -7.0));
    }

    #[test]
    fn test_fit_peak_sub_pixel() {
        let (kx, ky) = (11.37, -6.82);
        let (b0, b1) = band_pair(kx, ky, 0.8, 0.5);
        let mut trace = CorrelationTrace::default();
        let peak = fit_peak(&b0, &b1, 0, 1, &otf(), 11.0, -7.0, 0.05, 2.5, Some(&mut trace)).unwrap();
        assert!((peak.x - kx).abs() < 0.05, "x {} vs {kx}", peak.x);
        assert!((peak.y - ky).abs() < 0.05, "y {} vs {ky}", peak.y);
        assert_eq!(trace.rounds.len(), 3);
        assert_relative_eq!(trace.rounds[1].search_radius, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_get_peak_modulation_and_phase() {
        let (b0, b1) = band_pair(10.0, 4.0, 0.6, -1.1);
        let c = get_peak(&b0, &b1, 0, 1, &otf(), 10.0, 4.0, 0.05).unwrap();
        assert_relative_eq!(c.norm(), 0.6, epsilon = 1e-6);
        assert_relative_eq!(c.arg(), -1.1, epsilon = 1e-6);
    }

    #[test]
    fn test_common_region_mirrors_dc_disks() {
        let ones = Array2::from_elem((SIZE, SIZE), Complex64::new(1.0, 0.0));
        let (b0, b1) = common_region(&ones, &ones, 0, 1, &otf(), 10.0, 0.0, 0.3, 0.01, false).unwrap();
        // Disk radius 3 around DC and the shift partner
        assert_eq!(b0[[0, 0]].re, 0.0);
        assert_eq!(b0[[0, SIZE - 10]].re, 0.0);
        assert_eq!(b1[[0, 10]].re, 0.0);
        assert_eq!(b0[[0, 5]].re, 1.0);
        assert_eq!(b1[[0, 5]].re, 1.0);
        // Same number of samples survive in both
        let n0 = b0.iter().filter(|v| v.re != 0.0).count();
        let n1 = b1.iter().filter(|v| v.re != 0.0).count();
        assert_eq!(n0, n1);
    }
}
