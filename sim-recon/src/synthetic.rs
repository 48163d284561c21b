//! Synthetic structured-illumination datasets.
//!
//! Ground truth is drawn on a grid with twice the lateral sampling of the
//! camera so that the illuminated object's spectrum (object bandwidth plus
//! pattern frequency) does not alias. Each frame is
//! `crop(OTF * FFT(object * illumination))`, transformed back at native
//! sampling, and optionally photon-noise corrupted.

use std::f64::consts::PI;

use log::{debug, info};
use ndarray::{Array2, Array3, Axis, Ix2, Ix3};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};

use crate::error::{SimError, SimResult};
use crate::otf::{OtfModel, OtfProvider, OtfProvider3D};
use crate::param::{ImgSeq, SimParam};
use crate::vector::{signed_freq, to_complex, wrap_index, FftDirection, SimDimension, Spectrum};

/// Kind of ground-truth structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    /// Sub-resolution point emitters
    Beads,
    /// Thin curved lines
    Filaments,
    /// Large smooth blobs
    Blobs,
}

/// Parameters of a synthetic acquisition
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Native lateral size in pixels
    pub size: usize,
    /// Native pixel size in microns
    pub pxl_size: f64,
    /// Number of planes; 1 generates 2D data
    pub depth: usize,
    pub pxl_size_z: f64,
    pub bands: usize,
    pub dirs: usize,
    pub phases: usize,
    pub na: f64,
    pub emission_nm: f64,
    pub curvature: f64,
    pub refractive_index: f64,
    /// Modulation depth of every non-DC band
    pub modulation: f64,
    /// Outer-band shift length as a fraction of the OTF cutoff
    pub shift_fraction: f64,
    /// Angle of the first direction in radians
    pub angle_offset: f64,
    /// Pattern phase of the first frame of every direction
    pub phase_offset: f64,
    pub sample: Sample,
    /// Number of structures drawn
    pub count: usize,
    /// Mean photon count scaling of the brightest pixel; `None` is noise-free
    pub photons: Option<f64>,
    pub seed: u64,
    pub img_seq: ImgSeq,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            size: 256,
            pxl_size: 0.08,
            depth: 1,
            pxl_size_z: 0.125,
            bands: 3,
            dirs: 3,
            phases: 5,
            na: 1.4,
            emission_nm: 525.0,
            curvature: 0.7,
            refractive_index: 1.518,
            modulation: 1.0,
            shift_fraction: 0.9,
            angle_offset: 0.3,
            phase_offset: 0.4,
            sample: Sample::Beads,
            count: 400,
            photons: None,
            seed: 42,
            img_seq: ImgSeq::Paz,
        }
    }
}

/// True pattern of one direction
#[derive(Debug, Clone, PartialEq)]
pub struct TruePattern {
    /// Outer-band shift in native frequency pixels
    pub shift: (f64, f64),
    pub phase_offset: f64,
    /// Per band, entry 0 is DC
    pub modulations: Vec<f64>,
}

/// Generated frames plus the parameters that produced them
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    /// Raw frames in `img_seq` order
    pub frames: Vec<Array2<f64>>,
    pub patterns: Vec<TruePattern>,
    /// Geometry of the acquisition; pattern fields left at defaults
    pub param: SimParam,
}

impl SyntheticDataset {
    /// [`SyntheticDataset::param`] with the true pattern of every direction
    pub fn true_param(&self) -> SimResult<SimParam> {
        let mut param = self.param.clone();
        for (d, pattern) in self.patterns.iter().enumerate() {
            let dir = param.dir_mut(d)?;
            dir.set_shift(pattern.shift.0, pattern.shift.1);
            dir.set_phase_offset(pattern.phase_offset);
            for (band, &m) in pattern.modulations.iter().enumerate().skip(1) {
                dir.set_modulation(band, m)?;
            }
        }
        Ok(param)
    }
}

impl SyntheticConfig {
    pub fn is_3d(&self) -> bool {
        self.depth > 1
    }

    /// Geometry-only [`SimParam`] matching this acquisition
    pub fn sim_param(&self) -> SimResult<SimParam> {
        let mut param = if self.is_3d() {
            SimParam::new_3d(
                self.bands,
                self.dirs,
                self.phases,
                self.size,
                self.pxl_size,
                self.depth,
                self.pxl_size_z,
            )?
        } else {
            SimParam::new_2d(self.bands, self.dirs, self.phases, self.size, self.pxl_size)?
        };
        param.set_img_seq(self.img_seq);
        Ok(param)
    }

    /// Frequency pixels of the pattern and phase of every direction
    pub fn patterns(&self, cutoff_px: f64) -> Vec<TruePattern> {
        let k = self.shift_fraction * cutoff_px;
        (0..self.dirs)
            .map(|a| {
                let angle = self.angle_offset + PI * a as f64 / self.dirs as f64;
                let mut modulations = vec![self.modulation; self.bands];
                modulations[0] = 1.0;
                TruePattern {
                    shift: (k * angle.cos(), k * angle.sin()),
                    phase_offset: self.phase_offset,
                    modulations,
                }
            })
            .collect()
    }
}

fn stamp_gaussian(image: &mut Array2<f64>, cx: f64, cy: f64, sigma: f64, amplitude: f64) {
    let (h, w) = image.dim();
    let reach = 4.0 * sigma;
    let x0 = (cx - reach).max(0.0) as usize;
    let x1 = ((cx + reach).ceil() as usize).min(w - 1);
    let y0 = (cy - reach).max(0.0) as usize;
    let y1 = ((cy + reach).ceil() as usize).min(h - 1);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            image[[y, x]] += amplitude * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
        }
    }
}

/// Ground truth on a `size x size` grid, structures kept clear of the edges
pub fn draw_sample(sample: Sample, count: usize, size: usize, rng: &mut StdRng) -> Array2<f64> {
    let mut image = Array2::<f64>::zeros((size, size));
    let margin = 0.1 * size as f64;
    let span = size as f64 - 2.0 * margin;

    for _ in 0..count {
        let cx = margin + rng.random::<f64>() * span;
        let cy = margin + rng.random::<f64>() * span;
        let amplitude = 0.5 + 0.5 * rng.random::<f64>();
        match sample {
            Sample::Beads => stamp_gaussian(&mut image, cx, cy, 0.8, amplitude),
            Sample::Blobs => {
                let sigma = 4.0 + 6.0 * rng.random::<f64>();
                stamp_gaussian(&mut image, cx, cy, sigma, amplitude);
            }
            Sample::Filaments => {
                let length = 0.05 * size as f64 + rng.random::<f64>() * 0.2 * size as f64;
                let mut angle = rng.random::<f64>() * 2.0 * PI;
                let bend = (rng.random::<f64>() - 0.5) * 0.02;
                let (mut x, mut y) = (cx, cy);
                let mut travelled = 0.0;
                while travelled < length {
                    if x < margin || y < margin || x > size as f64 - margin || y > size as f64 - margin {
                        break;
                    }
                    stamp_gaussian(&mut image, x, y, 0.7, 0.3 * amplitude);
                    x += 0.5 * angle.cos();
                    y += 0.5 * angle.sin();
                    angle += bend;
                    travelled += 0.5;
                }
            }
        }
    }
    image
}

/// Keep the signed frequencies of a larger spectrum that fit `dst`.
fn crop_freq<D: SimDimension>(src: &Spectrum<D>, dst: &mut Spectrum<D>) -> SimResult<()> {
    let (sw, sh) = src.raw_dim().lateral_size();
    let (dw, dh) = dst.raw_dim().lateral_size();
    if dw > sw || dh > sh {
        return Err(SimError::DimensionMismatch(format!(
            "cannot crop {sw}x{sh} spectrum to larger {dw}x{dh}"
        )));
    }
    let planes = src.len() / (sw * sh);
    let src = src
        .view()
        .into_shape_with_order((planes, sh, sw))
        .map_err(|e| SimError::DimensionMismatch(format!("cannot view spectrum: {e}")))?;
    D::for_each_row_mut(dst, |z, y, mut row| {
        let sy = wrap_index(signed_freq(y, dh) as i64, sh);
        for (x, v) in row.iter_mut().enumerate() {
            let sx = wrap_index(signed_freq(x, dw) as i64, sw);
            *v = src[[z, sy, sx]];
        }
    });
    Ok(())
}

fn illumination(pattern: &TruePattern, bands: usize, phase: f64, fine: usize) -> Array2<f64> {
    let outer = (bands - 1) as f64;
    let (kx, ky) = pattern.shift;
    Array2::from_shape_fn((fine, fine), |(y, x)| {
        let arg = 2.0 * PI * (kx * x as f64 + ky * y as f64) / fine as f64;
        1.0 + (1..bands)
            .map(|j| {
                let j = j as f64;
                pattern.modulations[j as usize] * (arg * j / outer + j * phase).cos()
            })
            .sum::<f64>()
    })
}

fn add_noise(frame: &mut Array2<f64>, photons: Option<f64>, scale: f64, rng: &mut StdRng) -> SimResult<()> {
    let Some(photons) = photons else {
        return Ok(());
    };
    let gain = photons / scale;
    for v in frame.iter_mut() {
        let lambda = (*v * gain).max(0.0);
        *v = if lambda > 0.0 {
            Poisson::new(lambda)
                .map_err(|e| SimError::InvalidParameter(format!("photon rate {lambda}: {e}")))?
                .sample(rng)
        } else {
            0.0
        };
    }
    Ok(())
}

/// Generate a 2D dataset.
///
/// # Errors
/// * `SimError::InvalidParameter` - Invalid geometry or optics
pub fn generate_2d(config: &SyntheticConfig) -> SimResult<SyntheticDataset> {
    if config.is_3d() {
        return Err(SimError::InvalidParameter(
            "use generate_3d for stacks".to_string(),
        ));
    }
    let param = config.sim_param()?;
    let mut otf = OtfProvider::from_estimate(config.na, config.emission_nm, config.curvature)?
        .with_bands(config.bands)?;
    otf.set_pixel_size(param.cycles_per_micron())?;
    let patterns = config.patterns(otf.cutoff_pixels()?);

    let size = config.size;
    let fine = 2 * size;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let object = draw_sample(config.sample, config.count, fine, &mut rng);

    let mut fine_otf = Spectrum::<Ix2>::zeros((fine, fine));
    otf.write_otf_vector(&mut fine_otf, 0, 0.0, 0.0)?;

    let mut frames = vec![Array2::<f64>::zeros((size, size)); param.frame_count()];
    for (a, pattern) in patterns.iter().enumerate() {
        for p in 0..config.phases {
            let phase = pattern.phase_offset + 2.0 * PI * p as f64 / config.phases as f64;
            let lit = &object * &illumination(pattern, config.bands, phase, fine);
            let mut spec = to_complex(&lit);
            Ix2::fft(&mut spec, FftDirection::Forward);
            spec.zip_mut_with(&fine_otf, |s, o| *s *= *o);

            let mut native = Spectrum::<Ix2>::zeros((size, size));
            crop_freq(&spec, &mut native)?;
            Ix2::fft(&mut native, FftDirection::Inverse);
            // Undo the sample-count change of the crop
            frames[config.img_seq.calc_pos(p, a, 0, config.phases, config.dirs, 1)] =
                native.mapv(|v| v.re / 4.0);
        }
    }

    let peak = frames
        .iter()
        .flat_map(|f| f.iter())
        .fold(0.0f64, |m, &v| m.max(v));
    for frame in frames.iter_mut() {
        add_noise(frame, config.photons, peak.max(f64::MIN_POSITIVE), &mut rng)?;
    }

    info!(
        "Generated {} synthetic {:?} frames at {size}x{size}",
        frames.len(),
        config.sample
    );
    for (a, p) in patterns.iter().enumerate() {
        debug!("direction {a}: true shift ({:.3}, {:.3})", p.shift.0, p.shift.1);
    }
    Ok(SyntheticDataset {
        frames,
        patterns,
        param,
    })
}

/// Generate a 3D dataset of `depth` planes per (direction, phase).
///
/// The pattern is laterally modulated and constant along z.
pub fn generate_3d(config: &SyntheticConfig) -> SimResult<SyntheticDataset> {
    if !config.is_3d() {
        return Err(SimError::InvalidParameter(
            "use generate_2d for single planes".to_string(),
        ));
    }
    let param = config.sim_param()?;
    let mut otf = OtfProvider3D::from_estimate(
        config.na,
        config.emission_nm,
        config.curvature,
        config.refractive_index,
    )?;
    param.configure_otf_3d(&mut otf)?;
    let patterns = config.patterns(otf.cutoff_pixels()?);

    let (size, depth) = (config.size, config.depth);
    let fine = 2 * size;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut object = Array3::<f64>::zeros((depth, fine, fine));
    let per_plane = (config.count / depth).max(1);
    for (z, mut plane) in object.axis_iter_mut(Axis(0)).enumerate() {
        let drawn = draw_sample(config.sample, per_plane, fine, &mut rng);
        plane.assign(&drawn);
        debug!("plane {z}: {per_plane} structures");
    }

    let mut fine_otf = Spectrum::<Ix3>::zeros((depth, fine, fine));
    otf.write_otf_vector(&mut fine_otf, 0, 0.0, 0.0)?;

    let mut frames = vec![Array2::<f64>::zeros((size, size)); param.frame_count()];
    for (a, pattern) in patterns.iter().enumerate() {
        for p in 0..config.phases {
            let phase = pattern.phase_offset + 2.0 * PI * p as f64 / config.phases as f64;
            let light = illumination(pattern, config.bands, phase, fine);
            let mut spec = object.mapv(|v| Complex64::new(v, 0.0));
            for mut plane in spec.axis_iter_mut(Axis(0)) {
                plane.zip_mut_with(&light, |s, l| *s *= *l);
            }
            Ix3::fft(&mut spec, FftDirection::Forward);
            spec.zip_mut_with(&fine_otf, |s, o| *s *= *o);

            let mut native = Spectrum::<Ix3>::zeros((depth, size, size));
            crop_freq(&spec, &mut native)?;
            Ix3::fft(&mut native, FftDirection::Inverse);
            for z in 0..depth {
                let idx = config
                    .img_seq
                    .calc_pos(p, a, z, config.phases, config.dirs, depth);
                frames[idx] = native.index_axis(Axis(0), z).mapv(|v| v.re / 4.0);
            }
        }
    }

    let peak = frames
        .iter()
        .flat_map(|f| f.iter())
        .fold(0.0f64, |m, &v| m.max(v));
    for frame in frames.iter_mut() {
        add_noise(frame, config.photons, peak.max(f64::MIN_POSITIVE), &mut rng)?;
    }
    info!(
        "Generated {} synthetic 3D frames at {size}x{size}x{depth}",
        frames.len()
    );
    Ok(SyntheticDataset {
        frames,
        patterns,
        param,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn small() -> SyntheticConfig {
        SyntheticConfig {
            size: 32,
            count: 20,
            ..SyntheticConfig::default()
        }
    }

    #[test]
    fn test_crop_keeps_low_frequencies() {
        let mut big = Spectrum::<Ix2>::zeros((8, 8));
        big[[0, 1]] = Complex64::new(1.0, 0.0);
        big[[7, 7]] = Complex64::new(2.0, 0.0); // (-1, -1)
        big[[4, 4]] = Complex64::new(5.0, 0.0); // outside the small grid
        let mut small = Spectrum::<Ix2>::zeros((4, 4));
        crop_freq(&big, &mut small).unwrap();
        assert_eq!(small[[0, 1]].re, 1.0);
        assert_eq!(small[[3, 3]].re, 2.0);
        assert_eq!(small.iter().map(|v| v.re).sum::<f64>(), 3.0);
    }

    #[test]
    fn test_illumination_mean_is_one() {
        let pattern = TruePattern {
            shift: (4.0, 2.0),
            phase_offset: 0.0,
            modulations: vec![1.0, 0.8, 0.8],
        };
        let light = illumination(&pattern, 3, 0.3, 32);
        assert_relative_eq!(light.mean().unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_generate_2d_layout_and_seed() {
        let config = small();
        let a = generate_2d(&config).unwrap();
        let b = generate_2d(&config).unwrap();
        assert_eq!(a.frames.len(), 15);
        assert_eq!(a.frames[0].dim(), (32, 32));
        assert_eq!(a.frames[3], b.frames[3]);
        assert_eq!(a.patterns.len(), 3);
        let k = a.patterns[1].shift.0.hypot(a.patterns[1].shift.1);
        assert_relative_eq!(k, a.patterns[0].shift.0.hypot(a.patterns[0].shift.1), epsilon = 1e-12);
    }

    #[test]
    fn test_true_param_carries_patterns() {
        let config = SyntheticConfig {
            modulation: 0.8,
            ..small()
        };
        let data = generate_2d(&config).unwrap();
        let param = data.true_param().unwrap();
        for (dir, pattern) in param.dirs().zip(&data.patterns) {
            assert_eq!(dir.shift(), pattern.shift);
            assert_eq!(dir.phase_offset(), config.phase_offset);
            assert_relative_eq!(dir.modulation(2), 0.8, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_photon_noise_is_integral() {
        let config = SyntheticConfig {
            photons: Some(200.0),
            ..small()
        };
        let data = generate_2d(&config).unwrap();
        assert!(data.frames[0].iter().all(|v| v.fract() == 0.0 && *v >= 0.0));
    }

    #[test]
    fn test_generate_3d_shapes() {
        let config = SyntheticConfig {
            size: 16,
            depth: 4,
            bands: 2,
            phases: 3,
            dirs: 2,
            count: 8,
            na: 1.2,
            refractive_index: 1.33,
            ..SyntheticConfig::default()
        };
        let data = generate_3d(&config).unwrap();
        assert_eq!(data.frames.len(), 2 * 3 * 4);
        assert!(data.param.is_3d());
        assert!(generate_2d(&config).is_err());
    }
}
