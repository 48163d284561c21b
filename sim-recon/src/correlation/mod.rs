//! Correlation-based pattern parameter estimation.
//!
//! The illumination wavevector shows up as the shift between the DC band and
//! a higher band. It is located coarsely as the strongest peak of their
//! cross-correlation spectrum and then refined by a shrinking grid search
//! that evaluates the normalized cross-correlation at sub-pixel shifts. The
//! complex correlation at the final shift gives the pattern phase (argument)
//! and modulation depth (magnitude).
//!
//! The dimension-generic core lives here; [`correlation2d`] and
//! [`correlation3d`] expose the variants used by the pipelines.

pub mod correlation2d;
pub mod correlation3d;

use log::debug;
use ndarray::{Array2, Axis};
use num_complex::Complex64;

use crate::error::{SimError, SimResult};
use crate::otf::OtfModel;
use crate::parallel::map_indices;
use crate::vector::{signed_freq, FftDirection, SimDimension, Spectrum};

/// Refinement rounds of [`fit_peak_generic`]
pub const FIT_ROUNDS: usize = 3;

/// Candidates per axis of the refinement grid
pub const GRID_SIZE: usize = 10;

/// Search radius factor applied after every round
pub const SEARCH_SHRINK: f64 = 0.2;

/// DC exclusion radius (relative to the shift length) while fitting
const FIT_DC_DIST: f64 = 0.15;

/// DC exclusion radius (relative to the shift length) for the final readout
const PEAK_DC_DIST: f64 = 0.05;

/// A located correlation peak in signed frequency-pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub x: f64,
    pub y: f64,
    pub magnitude: f64,
    pub phase: f64,
}

impl Peak {
    fn from_value(x: f64, y: f64, value: Complex64) -> Self {
        Self {
            x,
            y,
            magnitude: value.norm(),
            phase: value.arg(),
        }
    }

    pub fn value(&self) -> Complex64 {
        Complex64::from_polar(self.magnitude, self.phase)
    }
}

/// One round of the refinement grid search
#[derive(Debug, Clone)]
pub struct TraceRound {
    pub center: (f64, f64),
    pub search_radius: f64,
    /// Correlation of every candidate, indexed `[[iy, ix]]`
    pub grid: Array2<Complex64>,
    pub best: Peak,
}

/// Optional record of every grid evaluated by a fit
#[derive(Debug, Clone, Default)]
pub struct CorrelationTrace {
    pub rounds: Vec<TraceRound>,
}

/// Masked copies of two bands restricted to the frequencies both see.
///
/// Zeroes every sample where either band's own-position or shift-position
/// OTF magnitude is below `weight_limit`. With `exclude_dc`, disks of radius
/// `dist * |k|` are removed around DC and around the shifted DC of each band
/// (mirrored for band 1, so the pair maps onto itself under the shift).
#[allow(clippy::too_many_arguments)]
pub(crate) fn common_region_generic<D: SimDimension, O: OtfModel<D> + ?Sized>(
    band0: &Spectrum<D>,
    band1: &Spectrum<D>,
    bn0: usize,
    bn1: usize,
    otf: &O,
    kx: f64,
    ky: f64,
    dist: f64,
    weight_limit: f64,
    divide_by_otf: bool,
    exclude_dc: bool,
) -> SimResult<(Spectrum<D>, Spectrum<D>)> {
    if band0.shape() != band1.shape() {
        return Err(SimError::DimensionMismatch(format!(
            "bands {:?} and {:?} differ in shape",
            band0.shape(),
            band1.shape()
        )));
    }
    if bn0 >= otf.bands() || bn1 >= otf.bands() {
        return Err(SimError::InvalidParameter(format!(
            "bands {bn0}/{bn1} out of range, OTF has {} bands",
            otf.bands()
        )));
    }
    let cpp = otf.pixel_size().ok_or_else(|| {
        SimError::InvalidState("OTF pixel size must be set before correlating".to_string())
    })?;

    let dim = band0.raw_dim();
    let (w, h) = dim.lateral_size();
    let depth = band0.len() / (w * h);
    let dc_radius = dist * kx.hypot(ky);
    let zero = Complex64::new(0.0, 0.0);

    let mask = |vec: &mut Spectrum<D>, band: usize, sx: f64, sy: f64| {
        D::for_each_row_mut(vec, |z, y, mut row| {
            let kz = signed_freq(z, depth);
            let fy = signed_freq(y, h);
            for (x, v) in row.iter_mut().enumerate() {
                let fx = signed_freq(x, w);
                let r_own = fx.hypot(fy);
                let r_shift = (fx - sx).hypot(fy - sy);
                let own = otf.otf_at(band, r_own * cpp, kz, false).norm();
                let shifted = otf.otf_at(band, r_shift * cpp, kz, false).norm();

                if own < weight_limit || shifted < weight_limit {
                    *v = zero;
                } else if exclude_dc && (r_own < dc_radius || r_shift < dc_radius) {
                    *v = zero;
                } else if divide_by_otf {
                    *v /= own;
                }
            }
        });
    };

    let mut b0 = band0.clone();
    let mut b1 = band1.clone();
    // band 0 overlaps where band 1 lands after moving back by -k; band 1
    // where band 0 lands after moving by +k
    mask(&mut b0, bn0, -kx, -ky);
    mask(&mut b1, bn1, kx, ky);
    Ok((b0, b1))
}

/// Maximum-magnitude pixel of a 2D spectrum outside radius `k_min`.
pub(crate) fn locate_peak_plane(vec: &Array2<Complex64>, k_min: f64) -> SimResult<Peak> {
    let (h, w) = vec.dim();
    let mut best: Option<(f64, f64, Complex64)> = None;
    for ((y, x), v) in vec.indexed_iter() {
        let (fx, fy) = (signed_freq(x, w), signed_freq(y, h));
        if fx.hypot(fy) <= k_min {
            continue;
        }
        if best.map_or(true, |(_, _, b)| v.norm_sqr() > b.norm_sqr()) {
            best = Some((fx, fy, *v));
        }
    }
    best.map(|(x, y, v)| Peak::from_value(x, y, v))
        .ok_or_else(|| {
            SimError::InvalidParameter(format!(
                "no frequency outside k_min = {k_min} in a {w}x{h} spectrum"
            ))
        })
}

/// Spatial-domain product `s1 * conj(s0)` summed over the axial axis, plus
/// the energy of `s0`.
fn lateral_correlation_product<D: SimDimension>(
    mut s0: Spectrum<D>,
    mut s1: Spectrum<D>,
) -> SimResult<(Array2<Complex64>, f64)> {
    D::fft(&mut s0, FftDirection::Inverse);
    D::fft(&mut s1, FftDirection::Inverse);
    let energy: f64 = s0.iter().map(Complex64::norm_sqr).sum();

    let (w, h) = s0.raw_dim().lateral_size();
    let planes = s0.len() / (w * h);
    s1.zip_mut_with(&s0, |a, b| *a *= b.conj());
    let product = s1
        .into_shape_with_order((planes, h, w))
        .map_err(|e| SimError::DimensionMismatch(format!("cannot flatten spectrum: {e}")))?
        .sum_axis(Axis(0));
    Ok((product, energy))
}

/// `sum product(x, y) * exp(-2 pi i (kx x / w + ky y / h)) / energy`
fn correlate_at(product: &Array2<Complex64>, energy: f64, kx: f64, ky: f64) -> Complex64 {
    let (h, w) = product.dim();
    let ramp_x: Vec<Complex64> = (0..w)
        .map(|x| Complex64::from_polar(1.0, -2.0 * std::f64::consts::PI * kx * x as f64 / w as f64))
        .collect();
    let mut sum = Complex64::new(0.0, 0.0);
    for (y, row) in product.outer_iter().enumerate() {
        let ey = Complex64::from_polar(1.0, -2.0 * std::f64::consts::PI * ky * y as f64 / h as f64);
        let row_sum: Complex64 = row.iter().zip(&ramp_x).map(|(p, ex)| p * ex).sum();
        sum += ey * row_sum;
    }
    if energy > 0.0 {
        sum / energy
    } else {
        Complex64::new(0.0, 0.0)
    }
}

/// Shrinking grid search for the sub-pixel shift between two bands.
#[allow(clippy::too_many_arguments)]
pub(crate) fn fit_peak_generic<D: SimDimension, O: OtfModel<D> + ?Sized>(
    band0: &Spectrum<D>,
    band1: &Spectrum<D>,
    bn0: usize,
    bn1: usize,
    otf: &O,
    kx0: f64,
    ky0: f64,
    weight_limit: f64,
    search_radius: f64,
    exclude_dc: bool,
    mut trace: Option<&mut CorrelationTrace>,
) -> SimResult<Peak> {
    let (mut kx, mut ky) = (kx0, ky0);
    let mut search = search_radius;
    let mut best = Peak::from_value(kx, ky, Complex64::new(0.0, 0.0));
    let half = (GRID_SIZE as f64 - 1.0) / 2.0;

    for round in 0..FIT_ROUNDS {
        let (b0, b1) = common_region_generic(
            band0,
            band1,
            bn0,
            bn1,
            otf,
            kx,
            ky,
            FIT_DC_DIST,
            weight_limit,
            false,
            exclude_dc,
        )?;
        let (product, energy) = lateral_correlation_product(b0, b1)?;
        if energy <= 0.0 {
            return Err(SimError::InvalidParameter(
                "no common region left between the bands".to_string(),
            ));
        }

        let (cx, cy, step) = (kx, ky, search / half);
        let values = map_indices(GRID_SIZE * GRID_SIZE, |idx| {
            let (ix, iy) = (idx % GRID_SIZE, idx / GRID_SIZE);
            let px = cx + (ix as f64 - half) * step;
            let py = cy + (iy as f64 - half) * step;
            (px, py, correlate_at(&product, energy, px, py))
        });

        let grid = Array2::from_shape_fn((GRID_SIZE, GRID_SIZE), |(iy, ix)| {
            values[iy * GRID_SIZE + ix].2
        });
        if let Some(&(px, py, v)) = values
            .iter()
            .max_by(|a, b| a.2.norm_sqr().total_cmp(&b.2.norm_sqr()))
        {
            best = Peak::from_value(px, py, v);
        }

        debug!(
            "fit round {round}: center ({cx:.3}, {cy:.3}) radius {search:.4} -> ({:.3}, {:.3}) |c| = {:.4}",
            best.x, best.y, best.magnitude
        );
        if let Some(trace) = trace.as_deref_mut() {
            trace.rounds.push(TraceRound {
                center: (cx, cy),
                search_radius: search,
                grid,
                best,
            });
        }

        kx = best.x;
        ky = best.y;
        search *= SEARCH_SHRINK;
    }
    Ok(best)
}

/// Complex correlation of band 1 shifted back by `(kx, ky)` against band 0.
///
/// Both bands are divided by their OTF on the common region, so the
/// magnitude is the modulation depth and the argument the phase offset.
#[allow(clippy::too_many_arguments)]
pub(crate) fn get_peak_generic<D: SimDimension, O: OtfModel<D> + ?Sized>(
    band0: &Spectrum<D>,
    band1: &Spectrum<D>,
    bn0: usize,
    bn1: usize,
    otf: &O,
    kx: f64,
    ky: f64,
    weight_limit: f64,
    exclude_dc: bool,
) -> SimResult<Complex64> {
    let (b0, b1) = common_region_generic(
        band0,
        band1,
        bn0,
        bn1,
        otf,
        kx,
        ky,
        PEAK_DC_DIST,
        weight_limit,
        true,
        exclude_dc,
    )?;
    let (product, energy) = lateral_correlation_product(b0, b1)?;
    Ok(correlate_at(&product, energy, kx, ky))
}

/// Wicker auto-correlation of a single raw spectrum at `(kx, ky)`.
///
/// The spectrum is weighted with the conjugate band-0 OTF and correlated with
/// a copy of itself moved by `-k`; the argument of the result estimates the
/// absolute pattern phase of that frame.
pub(crate) fn auto_correlation_generic<D: SimDimension, O: OtfModel<D> + ?Sized>(
    img: &Spectrum<D>,
    otf: &O,
    kx: f64,
    ky: f64,
) -> SimResult<Complex64> {
    let mut weighted = img.clone();
    otf.apply_otf(&mut weighted, 0, 0.0, 0.0)?;
    let (product, energy) = lateral_correlation_product(weighted.clone(), weighted)?;
    Ok(correlate_at(&product, energy, kx, ky))
}

/// Cross-correlation spectrum `FFT(ifft(b1) * conj(ifft(b0)))`; its peak
/// sits at the shift of band 1 relative to band 0.
pub(crate) fn correlation_spectrum<D: SimDimension>(
    band0: &Spectrum<D>,
    band1: &Spectrum<D>,
) -> SimResult<Spectrum<D>> {
    if band0.shape() != band1.shape() {
        return Err(SimError::DimensionMismatch(
            "correlated bands differ in shape".to_string(),
        ));
    }
    let mut s0 = band0.clone();
    let mut s1 = band1.clone();
    D::fft(&mut s0, FftDirection::Inverse);
    D::fft(&mut s1, FftDirection::Inverse);
    s1.zip_mut_with(&s0, |a, b| *a *= b.conj());
    D::fft(&mut s1, FftDirection::Forward);
    Ok(s1)
}
