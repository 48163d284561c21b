//! Optical transfer function models.
//!
//! [`OtfProvider`] holds a radially sampled 2D OTF, [`OtfProvider3D`] a
//! lateral x axial table. Both store immutable base samples; attenuation is a
//! derived view recomputed whenever its parameters change. Raster operations
//! (writing, multiplying, masking at a sub-pixel center) are shared through
//! the [`OtfModel`] trait so the reconstruction pipeline and Wiener filter can
//! be written once for both dimensionalities.

pub mod otf2d;
pub mod otf3d;

use ndarray::Array;
use num_complex::Complex64;

use crate::error::{SimError, SimResult};
use crate::vector::{signed_freq, SimDimension, Spectrum};

pub use otf2d::OtfProvider;
pub use otf3d::OtfProvider3D;

/// Conversion between FWHM and the standard deviation of a Gaussian
const FWHM_TO_SIGMA: f64 = 2.355;

/// Diffraction-limited OTF of an aberration-free circular pupil.
///
/// `d` is the frequency normalized to the cutoff; values outside `[0, 1]`
/// give zero.
pub fn ideal_otf(d: f64) -> f64 {
    if !(0.0..=1.0).contains(&d) {
        return 0.0;
    }
    (2.0 / std::f64::consts::PI) * (d.acos() - d * (1.0 - d * d).sqrt())
}

/// Gaussian notch factor `1 - strength * exp(-dist^2 / (2 sigma^2))`.
pub fn attenuation_factor(dist: f64, strength: f64, fwhm: f64) -> f64 {
    let sigma = fwhm / FWHM_TO_SIGMA;
    1.0 - strength * (-(dist * dist) / (2.0 * sigma * sigma)).exp()
}

/// Validated attenuation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attenuation {
    pub strength: f64,
    /// Full width at half maximum in cycles/micron
    pub fwhm: f64,
}

impl Attenuation {
    /// # Errors
    /// * `SimError::InvalidParameter` - Unless `0 <= strength < 1` and `fwhm > 0`
    pub fn new(strength: f64, fwhm: f64) -> SimResult<Self> {
        if !(0.0..1.0).contains(&strength) {
            return Err(SimError::InvalidParameter(format!(
                "attenuation strength {strength} outside [0, 1)"
            )));
        }
        if !fwhm.is_finite() || fwhm <= 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "attenuation FWHM {fwhm} must be positive"
            )));
        }
        Ok(Self { strength, fwhm })
    }

    pub fn factor(&self, dist: f64) -> f64 {
        attenuation_factor(dist, self.strength, self.fwhm)
    }
}

/// What a raster pass does with the OTF value at each pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RasterOp {
    Write,
    MultiplyConj,
    Mask,
}

/// OTF evaluation and rasterization on spectra of dimensionality `D`.
///
/// Implementors supply the point evaluation [`OtfModel::otf_at`]; the raster
/// operations are provided on top of it. Raster centers `(kx, ky)` are in
/// frequency pixels of the target buffer using the signed wrap-around
/// convention; the lateral frequency spacing of a pixel is the provider's
/// pixel size, which is identical for the native and the 2x oversized grid.
pub trait OtfModel<D: SimDimension>: Sync {
    /// Number of bands stored
    fn bands(&self) -> usize;

    /// Lateral cutoff in cycles/micron
    fn cutoff(&self) -> f64;

    /// Lateral cycles/micron of one frequency pixel, if set
    fn pixel_size(&self) -> Option<f64>;

    /// Whether raster operations apply the attenuation view
    fn attenuation_enabled(&self) -> bool;

    /// OTF value at a lateral distance (cycles/micron) and a signed axial
    /// frequency pixel. 2D models ignore the axial coordinate.
    fn otf_at(&self, band: usize, lateral: f64, axial_px: f64, use_attenuation: bool) -> Complex64;

    /// Lateral cutoff expressed in frequency pixels
    ///
    /// # Errors
    /// * `SimError::InvalidState` - If the pixel size has not been set
    fn cutoff_pixels(&self) -> SimResult<f64> {
        Ok(self.cutoff() / require_pixel_size(self.pixel_size())?)
    }

    /// Overwrite `vec` with the OTF centered at `(kx, ky)`.
    fn write_otf_vector(&self, vec: &mut Spectrum<D>, band: usize, kx: f64, ky: f64) -> SimResult<()> {
        rasterize::<D, Self>(self, vec, band, kx, ky, RasterOp::Write)
    }

    /// Multiply `vec` by the conjugate OTF centered at `(kx, ky)`.
    fn apply_otf(&self, vec: &mut Spectrum<D>, band: usize, kx: f64, ky: f64) -> SimResult<()> {
        rasterize::<D, Self>(self, vec, band, kx, ky, RasterOp::MultiplyConj)
    }

    /// Zero every sample outside the OTF support centered at `(kx, ky)`.
    fn mask_otf(&self, vec: &mut Spectrum<D>, band: usize, kx: f64, ky: f64) -> SimResult<()> {
        rasterize::<D, Self>(self, vec, band, kx, ky, RasterOp::Mask)
    }

    /// Accumulate `|OTF|^2` centered at `(kx, ky)` into `acc`.
    fn add_otf_power(
        &self,
        acc: &mut Array<f64, D>,
        band: usize,
        kx: f64,
        ky: f64,
        use_attenuation: bool,
    ) -> SimResult<()> {
        let cpp = raster_setup::<D, Self>(self, band)?;
        let (w, h) = acc.raw_dim().lateral_size();
        let depth = axial_len(&acc.raw_dim());

        D::for_each_row_mut(acc, |z, y, mut row| {
            let kz = signed_freq(z, depth);
            let dy = signed_freq(y, h) - ky;
            for (x, v) in row.iter_mut().enumerate() {
                let dx = signed_freq(x, w) - kx;
                let val = self.otf_at(band, dx.hypot(dy) * cpp, kz, use_attenuation);
                *v += val.norm_sqr();
            }
        });
        Ok(())
    }

    /// Overwrite `vec` with the apodization `ideal(f / (cutoff * factor))^bend`.
    ///
    /// Only the lateral frequency enters; 3D stacks get the same profile on
    /// every axial plane.
    fn write_apo_vector(&self, vec: &mut Spectrum<D>, bend: f64, cutoff_factor: f64) -> SimResult<()> {
        let cpp = require_pixel_size(self.pixel_size())?;
        if cutoff_factor.is_nan() || cutoff_factor <= 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "apodization cutoff factor {cutoff_factor} must be positive"
            )));
        }
        let limit = self.cutoff() * cutoff_factor;
        let (w, h) = vec.raw_dim().lateral_size();

        D::for_each_row_mut(vec, |_, y, mut row| {
            let fy = signed_freq(y, h);
            for (x, v) in row.iter_mut().enumerate() {
                let f = signed_freq(x, w).hypot(fy) * cpp;
                *v = Complex64::new(ideal_otf(f / limit).powf(bend), 0.0);
            }
        });
        Ok(())
    }
}

fn require_pixel_size(pixel_size: Option<f64>) -> SimResult<f64> {
    pixel_size.ok_or_else(|| {
        SimError::InvalidState("OTF pixel size must be set before rasterizing".to_string())
    })
}

fn raster_setup<D: SimDimension, O: OtfModel<D> + ?Sized>(otf: &O, band: usize) -> SimResult<f64> {
    if band >= otf.bands() {
        return Err(SimError::InvalidParameter(format!(
            "band {band} out of range, OTF has {} bands",
            otf.bands()
        )));
    }
    require_pixel_size(otf.pixel_size())
}

fn axial_len<D: SimDimension>(dim: &D) -> usize {
    if dim.ndim() == 3 {
        dim.slice()[0]
    } else {
        1
    }
}

fn rasterize<D: SimDimension, O: OtfModel<D> + ?Sized>(
    otf: &O,
    vec: &mut Spectrum<D>,
    band: usize,
    kx: f64,
    ky: f64,
    op: RasterOp,
) -> SimResult<()> {
    let cpp = raster_setup::<D, O>(otf, band)?;
    let (w, h) = vec.raw_dim().lateral_size();
    let depth = axial_len(&vec.raw_dim());
    let use_attenuation = otf.attenuation_enabled();

    D::for_each_row_mut(vec, |z, y, mut row| {
        let kz = signed_freq(z, depth);
        let dy = signed_freq(y, h) - ky;
        for (x, v) in row.iter_mut().enumerate() {
            let dx = signed_freq(x, w) - kx;
            let lateral = dx.hypot(dy) * cpp;
            match op {
                RasterOp::Write => *v = otf.otf_at(band, lateral, kz, use_attenuation),
                RasterOp::MultiplyConj => {
                    *v *= otf.otf_at(band, lateral, kz, use_attenuation).conj()
                }
                RasterOp::Mask => {
                    if otf.otf_at(band, lateral, kz, false).norm_sqr() == 0.0 {
                        *v = Complex64::new(0.0, 0.0);
                    }
                }
            }
        }
    });
    Ok(())
}
