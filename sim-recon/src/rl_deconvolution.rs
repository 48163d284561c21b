//! Richardson-Lucy deconvolution
//!
//! Fixed iteration count, multiplicative update
//! `est *= (obs / (est * psf)) (*) psf` with convolutions done as OTF products
//! in frequency space. The OTF raster must have the shape of the image.

use log::debug;
use ndarray::Array;
use num_complex::Complex64;

use crate::error::{check_same_shape, SimResult};
use crate::otf::OtfModel;
use crate::param::SimParam;
use crate::vector::{FftDirection, SimDimension, Spectrum};

/// Convolution results below this are treated as zero
const RATIO_EPS: f64 = 1e-10;

fn convolve<D: SimDimension>(data: &Array<f64, D>, otf: &Spectrum<D>, conjugate: bool) -> Array<f64, D> {
    let mut spec = data.mapv(|v| Complex64::new(v, 0.0));
    D::fft(&mut spec, FftDirection::Forward);
    if conjugate {
        spec.zip_mut_with(otf, |s, o| *s *= o.conj());
    } else {
        spec.zip_mut_with(otf, |s, o| *s *= *o);
    }
    D::fft(&mut spec, FftDirection::Inverse);
    spec.mapv(|v| v.re)
}

/// Run `steps` Richardson-Lucy iterations on `img` in place.
///
/// With `input_in_freq_space`, `img` holds a spectrum and is returned as a
/// spectrum; otherwise it holds spatial data in its real part. Negative
/// input values are clipped to zero before the first iteration.
///
/// Returns the relative change `|est_n - est_{n-1}| / |est_{n-1}|` of every
/// iteration.
///
/// # Errors
/// * `SimError::DimensionMismatch` - If the OTF raster and image differ in shape
pub fn deconvolve<D: SimDimension>(
    img: &mut Spectrum<D>,
    otf: &Spectrum<D>,
    steps: usize,
    input_in_freq_space: bool,
) -> SimResult<Vec<f64>> {
    check_same_shape("RL OTF raster", otf.shape(), img.shape())?;

    if input_in_freq_space {
        D::fft(img, FftDirection::Inverse);
    }
    let observed = img.mapv(|v| v.re.max(0.0));
    let mut estimate = observed.clone();
    let mut residuals = Vec::with_capacity(steps);

    for step in 0..steps {
        let blurred = convolve(&estimate, otf, false);
        let mut ratio = observed.clone();
        ratio.zip_mut_with(&blurred, |o, b| {
            *o = if *b > RATIO_EPS { *o / *b } else { 0.0 };
        });
        let correction = convolve(&ratio, otf, true);

        let mut change = 0.0;
        let mut norm = 0.0;
        estimate.zip_mut_with(&correction, |e, c| {
            let next = *e * c.max(0.0);
            change += (next - *e).powi(2);
            norm += e.powi(2);
            *e = next;
        });
        let residual = if norm > 0.0 { (change / norm).sqrt() } else { 0.0 };
        debug!("RL iteration {step}: relative change {residual:.3e}");
        residuals.push(residual);
    }

    img.zip_mut_with(&estimate, |v, e| *v = Complex64::new(*e, 0.0));
    if input_in_freq_space {
        D::fft(img, FftDirection::Forward);
    }
    Ok(residuals)
}

/// Band-0 OTF raster at native size, used to deconvolve raw frames.
pub fn input_otf<D: SimDimension, O: OtfModel<D> + ?Sized>(
    param: &SimParam,
    otf: &O,
) -> SimResult<Spectrum<D>> {
    let mut raster = Spectrum::<D>::zeros(D::native_shape(param)?);
    otf.write_otf_vector(&mut raster, 0, 0.0, 0.0)?;
    Ok(raster)
}

/// Effective OTF of the combined spectrum on the oversized grid.
///
/// Sums the OTF of every component at the position it lands after shifting
/// (band 0 once per direction, higher bands at `-/+ shift`) and normalises
/// the DC value to one.
pub fn effective_otf<D: SimDimension, O: OtfModel<D> + ?Sized>(
    param: &SimParam,
    otf: &O,
) -> SimResult<Spectrum<D>> {
    let shape = D::native_shape(param)?.lateral_scaled(2);
    let mut sum = Spectrum::<D>::zeros(shape);
    let mut scratch = Spectrum::<D>::zeros(shape);

    for dir in param.dirs() {
        otf.write_otf_vector(&mut scratch, 0, 0.0, 0.0)?;
        sum += &scratch;
        for band in 1..param.nr_bands() {
            for sign in [-1.0, 1.0] {
                otf.write_otf_vector(&mut scratch, band, sign * dir.px(band), sign * dir.py(band))?;
                sum += &scratch;
            }
        }
    }

    let dc = sum.first().map_or(0.0, |v| v.norm());
    if dc > 0.0 {
        sum.mapv_inplace(|v| v / dc);
    }
    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otf::OtfProvider;
    use approx::assert_relative_eq;
    use ndarray::{Array2, Array3, Ix2};

    fn blob(h: usize, w: usize) -> Array2<f64> {
        Array2::from_shape_fn((h, w), |(y, x)| {
            let dy = y as f64 - h as f64 / 2.0;
            let dx = x as f64 - w as f64 / 2.0;
            (-(dx * dx + dy * dy) / 18.0).exp() + 0.1
        })
    }

    #[test]
    fn test_identity_otf_keeps_input() {
        let input = blob(16, 16);
        let mut img = input.mapv(|v| Complex64::new(v, 0.0));
        let ones = Array2::from_elem((16, 16), Complex64::new(1.0, 0.0));
        let residuals = deconvolve(&mut img, &ones, 5, false).unwrap();
        assert_eq!(residuals.len(), 5);
        for (a, b) in img.iter().zip(input.iter()) {
            assert_relative_eq!(a.re, b, epsilon = 1e-9);
        }
        assert!(residuals.iter().all(|&r| r < 1e-9));
    }

    #[test]
    fn test_frequency_space_round_trip_3d() {
        let input = Array3::from_shape_fn((4, 8, 8), |(z, y, x)| 1.0 + (z + y + x) as f64 * 0.1);
        let mut spec = input.mapv(|v| Complex64::new(v, 0.0));
        ndarray::Ix3::fft(&mut spec, FftDirection::Forward);
        let ones = Array3::from_elem((4, 8, 8), Complex64::new(1.0, 0.0));
        deconvolve(&mut spec, &ones, 3, true).unwrap();
        ndarray::Ix3::fft(&mut spec, FftDirection::Inverse);
        for (a, b) in spec.iter().zip(input.iter()) {
            assert_relative_eq!(a.re, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_negative_input_clipped() {
        let mut img = Array2::from_elem((8, 8), Complex64::new(-1.0, 0.0));
        img[[2, 2]] = Complex64::new(4.0, 0.0);
        let ones = Array2::from_elem((8, 8), Complex64::new(1.0, 0.0));
        deconvolve(&mut img, &ones, 1, false).unwrap();
        assert_eq!(img[[0, 0]].re, 0.0);
        assert_relative_eq!(img[[2, 2]].re, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sharpens_blurred_blob() {
        let mut param = SimParam::new_2d(2, 1, 3, 32, 0.08).unwrap();
        param.dir_mut(0).unwrap().set_shift(6.0, 0.0);
        let mut otf = OtfProvider::from_estimate(1.4, 525.0, 0.9).unwrap();
        param.configure_otf(&mut otf).unwrap();
        let raster = input_otf::<Ix2, _>(&param, &otf).unwrap();

        let truth = blob(32, 32).mapv(|v| (v - 0.1).max(0.0).powi(4));
        let blurred = convolve(&truth, &raster, false);
        let mut img = blurred.mapv(|v| Complex64::new(v, 0.0));
        let residuals = deconvolve(&mut img, &raster, 10, false).unwrap();

        let peak_before = blurred[[16, 16]];
        assert!(img[[16, 16]].re > peak_before);
        assert!(residuals.last().unwrap() < &residuals[0]);
    }

    #[test]
    fn test_effective_otf_normalised() {
        let mut param = SimParam::new_2d(3, 2, 5, 32, 0.08).unwrap();
        param.dir_mut(0).unwrap().set_shift(8.0, 0.0);
        param.dir_mut(1).unwrap().set_shift(0.0, 8.0);
        let mut otf = OtfProvider::from_estimate(1.4, 525.0, 0.7).unwrap();
        param.configure_otf(&mut otf).unwrap();
        let eff = effective_otf::<Ix2, _>(&param, &otf).unwrap();
        assert_eq!(eff.dim(), (64, 64));
        assert_relative_eq!(eff[[0, 0]].re, 1.0, epsilon = 1e-12);
        // Support reaches past the widefield cutoff along the pattern
        let cutoff = otf.cutoff_pixels().unwrap();
        let x = (cutoff + 4.0).round() as usize;
        assert!(eff[[0, x]].re > 0.0);
    }
}
