//! Numeric helpers shared by estimation and reconstruction.
//!
//! Spectral helpers are generic over [`SimDimension`]; the real-image
//! helpers (border fade, background, clip/scale) operate on single 2D frames,
//! which is the form raw data arrives in for both the 2D and 3D pipelines.

use ndarray::Array2;
use num_complex::Complex64;
use sim_math::interp;

use crate::error::{SimError, SimResult};
use crate::vector::{signed_freq, FftDirection, SimDimension, Spectrum};

/// Place `src` into the larger zero-padded `dst`, keeping signed frequencies.
pub fn paste_freq<D: SimDimension>(src: &Spectrum<D>, dst: &mut Spectrum<D>) -> SimResult<()> {
    D::paste_freq(src, dst)
}

/// Sub-pixel Fourier shift of a spectrum in place: content at frequency `f`
/// moves to `f + (kx, ky)`.
pub fn fourier_shift<D: SimDimension>(spectrum: &mut Spectrum<D>, kx: f64, ky: f64) {
    D::fft(spectrum, FftDirection::Inverse);
    D::fourier_shift(spectrum, kx, ky);
    D::fft(spectrum, FftDirection::Forward);
}

/// `|v|^2` of every sample
pub fn power_spectrum<D: SimDimension>(spectrum: &Spectrum<D>) -> ndarray::Array<f64, D> {
    spectrum.mapv(|v| v.norm_sqr())
}

/// `ln(1 + |v|)` of every sample, the usual display scaling
pub fn log_power_spectrum<D: SimDimension>(spectrum: &Spectrum<D>) -> ndarray::Array<f64, D> {
    spectrum.mapv(|v| v.norm().ln_1p())
}

/// Real part of the inverse FFT of a copy of `spectrum`
pub fn spatial<D: SimDimension>(spectrum: &Spectrum<D>) -> ndarray::Array<f64, D> {
    let mut data = spectrum.clone();
    D::fft(&mut data, FftDirection::Inverse);
    data.mapv(|v| v.re)
}

/// Move DC from the corner to the center (and back, for even sizes).
pub fn swap_quadrants<T: Clone>(image: &Array2<T>) -> Array2<T> {
    let (h, w) = image.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        image[[(y + h / 2) % h, (x + w / 2) % w]].clone()
    })
}

/// Fade a border of `px` pixels to zero with a squared-sine profile.
///
/// # Errors
/// * `SimError::InvalidParameter` - If the border is wider than half the image
pub fn fade_border_cos(image: &mut Array2<f64>, px: usize) -> SimResult<()> {
    if px == 0 {
        return Ok(());
    }
    let (h, w) = image.dim();
    if 2 * px > h || 2 * px > w {
        return Err(SimError::InvalidParameter(format!(
            "border fade of {px} px does not fit a {w}x{h} image"
        )));
    }

    let weight = |i: usize, n: usize| -> f64 {
        let edge = i.min(n - 1 - i);
        if edge >= px {
            1.0
        } else {
            let s = (std::f64::consts::FRAC_PI_2 * edge as f64 / px as f64).sin();
            s * s
        }
    };

    for ((y, x), v) in image.indexed_iter_mut() {
        *v *= weight(y, h) * weight(x, w);
    }
    Ok(())
}

/// Subtract a constant background and clamp at zero.
pub fn subtract_background(image: &mut Array2<f64>, level: f64) {
    image.mapv_inplace(|v| (v - level).max(0.0));
}

/// Background estimate as the given percentile (0..=100) of the pixel values,
/// linearly interpolated between ranks.
///
/// # Errors
/// * `SimError::InvalidParameter` - If the percentile is out of range or the
///   image is empty
pub fn estimate_background(image: &Array2<f64>, percentile: f64) -> SimResult<f64> {
    if !(0.0..=100.0).contains(&percentile) {
        return Err(SimError::InvalidParameter(format!(
            "percentile {percentile} outside [0, 100]"
        )));
    }
    if image.is_empty() {
        return Err(SimError::InvalidParameter(
            "cannot estimate background of an empty image".to_string(),
        ));
    }

    let mut values: Vec<f64> = image.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return Err(SimError::InvalidParameter(
            "image contains no finite values".to_string(),
        ));
    }
    values.sort_by(|a, b| a.total_cmp(b));
    if values.len() == 1 {
        return Ok(values[0]);
    }
    let ranks: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let rank = (percentile / 100.0) * (values.len() - 1) as f64;
    Ok(interp(rank, &ranks, &values)?)
}

/// Optionally clip negatives to zero and/or rescale to `[0, 1]`.
pub fn clip_scale(image: &mut Array2<f64>, clip: bool, scale: bool) {
    if clip {
        image.mapv_inplace(|v| v.max(0.0));
    }
    if scale {
        let min = image.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = image.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;
        if range > 0.0 && range.is_finite() {
            image.mapv_inplace(|v| (v - min) / range);
        } else {
            image.fill(0.0);
        }
    }
}

/// Gaussian notch around lateral DC: `1 - strength * exp(-r^2 / (2 sigma^2))`
/// with `sigma = fwhm_px / 2.355`.
pub fn dampen_dc<D: SimDimension>(spectrum: &mut Spectrum<D>, strength: f64, fwhm_px: f64) {
    if strength <= 0.0 || fwhm_px <= 0.0 {
        return;
    }
    let (w, h) = spectrum.raw_dim().lateral_size();
    let sigma = fwhm_px / 2.355;
    let denom = 2.0 * sigma * sigma;

    D::for_each_row_mut(spectrum, |_, y, mut row| {
        let fy = signed_freq(y, h);
        for (x, v) in row.iter_mut().enumerate() {
            let fx = signed_freq(x, w);
            let damp = 1.0 - strength * (-(fx * fx + fy * fy) / denom).exp();
            *v *= damp;
        }
    });
}

/// Sum of `|v|^2` over a spectrum
pub fn energy<D: SimDimension>(spectrum: &Spectrum<D>) -> f64 {
    spectrum.iter().map(Complex64::norm_sqr).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{fft_real_2d, to_complex};
    use approx::assert_relative_eq;
    use ndarray::Ix2;

    #[test]
    fn test_spatial_inverts_forward_fft() {
        let image = Array2::from_shape_fn((8, 8), |(y, x)| (x + 2 * y) as f64);
        let spectrum = fft_real_2d(&image);
        let back = spatial(&spectrum);
        for (a, b) in back.iter().zip(image.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_fourier_shift_spectrum_integer_step() {
        let mut spectrum = Array2::<Complex64>::zeros((16, 16));
        spectrum[[0, 0]] = Complex64::new(4.0, 0.0);
        fourier_shift(&mut spectrum, 2.0, 1.0);
        assert_relative_eq!(spectrum[[1, 2]].norm(), 4.0, epsilon = 1e-10);
        assert!(spectrum[[0, 0]].norm() < 1e-10);
    }

    #[test]
    fn test_swap_quadrants_moves_dc_to_center() {
        let mut image = Array2::<f64>::zeros((4, 6));
        image[[0, 0]] = 1.0;
        let swapped = swap_quadrants(&image);
        assert_eq!(swapped[[2, 3]], 1.0);
        assert_eq!(swap_quadrants(&swapped), image);
    }

    #[test]
    fn test_fade_border_profile() {
        let mut image = Array2::<f64>::ones((32, 32));
        fade_border_cos(&mut image, 4).unwrap();
        assert_eq!(image[[0, 16]], 0.0);
        assert_eq!(image[[16, 16]], 1.0);
        assert!(image[[2, 16]] > 0.0 && image[[2, 16]] < 1.0);
        assert_relative_eq!(image[[2, 16]], 0.5, epsilon = 1e-12);

        let mut small = Array2::<f64>::ones((6, 6));
        assert!(fade_border_cos(&mut small, 4).is_err());
    }

    #[test]
    fn test_background_percentile_and_subtract() {
        let mut image = Array2::from_shape_fn((10, 10), |(y, x)| (y * 10 + x) as f64);
        assert_eq!(estimate_background(&image, 0.0).unwrap(), 0.0);
        assert_eq!(estimate_background(&image, 100.0).unwrap(), 99.0);
        assert_relative_eq!(estimate_background(&image, 50.0).unwrap(), 49.5);
        assert!(estimate_background(&image, 101.0).is_err());

        subtract_background(&mut image, 50.0);
        assert_eq!(image[[0, 0]], 0.0);
        assert_eq!(image[[9, 9]], 49.0);
    }

    #[test]
    fn test_clip_scale_range() {
        let mut image = Array2::from_shape_vec((2, 2), vec![-1.0, 0.0, 2.0, 4.0]).unwrap();
        clip_scale(&mut image, true, true);
        assert_eq!(image[[0, 0]], 0.0);
        assert_eq!(image[[1, 1]], 1.0);
        assert_relative_eq!(image[[1, 0]], 0.5);
    }

    #[test]
    fn test_dampen_dc_notch() {
        let mut spectrum = to_complex(&Array2::<f64>::ones((32, 32)));
        dampen_dc::<Ix2>(&mut spectrum, 0.9, 4.0);
        assert_relative_eq!(spectrum[[0, 0]].re, 0.1, epsilon = 1e-12);
        assert!(spectrum[[16, 16]].re > 0.999);
        // Symmetric in signed coordinates
        assert_relative_eq!(spectrum[[0, 2]].re, spectrum[[0, 30]].re, epsilon = 1e-12);
    }
}
