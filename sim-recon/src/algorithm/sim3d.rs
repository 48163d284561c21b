//! 3D structured illumination on z-stacks.
//!
//! Every (direction, phase) pair is a stack of `depth` planes. The pattern is
//! assumed laterally modulated only, so the estimate (shift, phase,
//! modulation) is shared by all planes.

use log::debug;
use ndarray::{Array2, Array3, Axis, Ix3};
use num_complex::Complex64;

use super::sim2d::log_result;
use super::{run_reconstruction as run_generic, ProgressSink, ReconstructionOutput};
use crate::band_separation::{default_band_factors, separate_bands_equidistant};
use crate::correlation::correlation3d::{
    auto_correlation, cross_correlation, fit_peak, get_peak, locate_peak,
};
use crate::error::{check_same_shape, SimError, SimResult};
use crate::otf::{OtfModel, OtfProvider3D};
use crate::param::{FitQuality, ParameterEstimationResult, SimParam};
use crate::sim_utils::{dampen_dc, fade_border_cos, subtract_background};
use crate::vector::fft_real_3d;

/// How far the 3D estimation searches for the pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeakSearch3d {
    /// Coarse peak search followed by refinement
    #[default]
    Find,
    /// Refine the shift already stored in the parameters
    Refine,
    /// Keep the stored shift; only measure phase and modulation
    NoRefine,
}

/// Options for 3D pattern estimation
#[derive(Debug, Clone)]
pub struct EstimationOptions3d {
    pub search: PeakSearch3d,
    /// Fit on the `kz = 0` plane with the projected OTF
    pub project: bool,
    pub weight_limit: f64,
    /// Initial refinement radius for [`PeakSearch3d::Find`]
    pub search_radius: f64,
    /// Refinement radius for [`PeakSearch3d::Refine`]
    pub refine_radius: f64,
    pub k_min_factor: f64,
    pub dampen_strength: f64,
    pub dampen_fwhm_factor: f64,
    /// Measure the absolute phase of every stack by auto-correlation
    pub wicker_phases: bool,
}

impl Default for EstimationOptions3d {
    fn default() -> Self {
        Self {
            search: PeakSearch3d::Find,
            project: true,
            weight_limit: 0.05,
            search_radius: 2.5,
            refine_radius: 0.5,
            k_min_factor: 0.5,
            dampen_strength: 0.99,
            dampen_fwhm_factor: 0.15,
            wicker_phases: false,
        }
    }
}

/// Assemble per-(direction, phase) z-stacks, remove background, fade borders
/// and transform.
///
/// # Errors
/// * `SimError::InvalidState` - If `param` is not 3D
/// * `SimError::DimensionMismatch` - Wrong frame count or frame size
pub fn prepare_input(frames: &[Array2<f64>], param: &SimParam) -> SimResult<Vec<Vec<Array3<Complex64>>>> {
    if !param.is_3d() {
        return Err(SimError::InvalidState(
            "2D parameters need sim2d::prepare_input".to_string(),
        ));
    }
    if frames.len() != param.frame_count() {
        return Err(SimError::DimensionMismatch(format!(
            "{} frames given, expected {} ({} directions x {} phases x {} planes)",
            frames.len(),
            param.frame_count(),
            param.nr_dirs(),
            param.nr_phases(),
            param.depth()
        )));
    }
    let (size, depth) = (param.img_size(), param.depth());
    let (phases, dirs) = (param.nr_phases(), param.nr_dirs());
    let seq = param.img_seq();

    let mut input = Vec::with_capacity(dirs);
    for a in 0..dirs {
        let mut per_phase = Vec::with_capacity(phases);
        for p in 0..phases {
            let mut stack = Array3::<f64>::zeros((depth, size, size));
            for (z, mut plane) in stack.axis_iter_mut(Axis(0)).enumerate() {
                let frame = &frames[seq.calc_pos(p, a, z, phases, dirs, depth)];
                check_same_shape("raw frame", frame.shape(), &[size, size])?;
                let mut img = frame.clone();
                if param.background() > 0.0 {
                    subtract_background(&mut img, param.background());
                }
                fade_border_cos(&mut img, param.fade_border())?;
                plane.assign(&img);
            }
            per_phase.push(fft_real_3d(&stack));
        }
        input.push(per_phase);
    }
    Ok(input)
}

/// Estimate shift, phase and modulation of every direction from z-stacks.
///
/// Mirrors the 2D estimation without DC exclusion in the common region.
pub fn estimate_parameters(
    param: &SimParam,
    otf: &OtfProvider3D,
    input: &[Vec<Array3<Complex64>>],
    options: &EstimationOptions3d,
    progress: &dyn ProgressSink,
) -> SimResult<Vec<ParameterEstimationResult>> {
    if input.len() != param.nr_dirs() {
        return Err(SimError::DimensionMismatch(format!(
            "{} directions of input, parameters describe {}",
            input.len(),
            param.nr_dirs()
        )));
    }
    let bands = param.nr_bands();
    let cutoff = otf.cutoff_pixels()?;
    let factors = default_band_factors(bands);
    let hb = 2 * bands - 3;
    let outer = bands - 1;
    progress.set_total(param.nr_dirs() as u64);

    let mut results = Vec::with_capacity(param.nr_dirs());
    for (d, raw) in input.iter().enumerate() {
        let sep = separate_bands_equidistant(raw, 0.0, bands, &factors)?;
        let stored = param.dir(d)?.shift();

        let shift = match options.search {
            PeakSearch3d::NoRefine => stored,
            PeakSearch3d::Refine | PeakSearch3d::Find => {
                let (start, radius) = if options.search == PeakSearch3d::Find {
                    let mut damped0 = sep[0].clone();
                    let mut damped_hb = sep[hb].clone();
                    let fwhm = options.dampen_fwhm_factor * cutoff;
                    dampen_dc::<Ix3>(&mut damped0, options.dampen_strength, fwhm);
                    dampen_dc::<Ix3>(&mut damped_hb, options.dampen_strength, fwhm);
                    let corr = cross_correlation(&damped0, &damped_hb)?;
                    let coarse = locate_peak(&corr, options.k_min_factor * cutoff)?;
                    debug!("direction {d}: coarse 3D peak ({:.1}, {:.1})", coarse.x, coarse.y);
                    ((coarse.x, coarse.y), options.search_radius)
                } else {
                    (stored, options.refine_radius)
                };
                let peak = fit_peak(
                    &sep[0],
                    &sep[hb],
                    0,
                    outer,
                    otf,
                    start.0,
                    start.1,
                    options.weight_limit,
                    radius,
                    options.project,
                    None,
                )?;
                (peak.x, peak.y)
            }
        };

        let mut raw_modulations = vec![1.0; bands];
        let mut phase_offset = 0.0;
        for band in 1..bands {
            let scale = band as f64 / outer as f64;
            let c = get_peak(
                &sep[0],
                &sep[2 * band - 1],
                0,
                outer,
                otf,
                shift.0 * scale,
                shift.1 * scale,
                options.weight_limit,
            )?;
            raw_modulations[band] = c.norm();
            if band == 1 {
                phase_offset = c.arg();
            }
        }

        let explicit_phases = if options.wicker_phases {
            let k = (shift.0 / outer as f64, shift.1 / outer as f64);
            let phases = raw
                .iter()
                .map(|stack| auto_correlation(stack, otf, k.0, k.1).map(|c| c.arg()))
                .collect::<SimResult<Vec<f64>>>()?;
            Some(phases)
        } else {
            None
        };

        let range = param.modulation_range();
        let result = ParameterEstimationResult {
            direction: d,
            shift,
            phase_offset,
            modulations: raw_modulations
                .iter()
                .enumerate()
                .map(|(band, &m)| if band == 0 { m } else { range.clamp(m) })
                .collect(),
            quality: raw_modulations
                .iter()
                .enumerate()
                .map(|(band, &m)| if band == 0 { FitQuality::Good } else { FitQuality::classify(m) })
                .collect(),
            raw_modulations,
            explicit_phases,
        };
        log_result(&result);
        results.push(result);
        progress.advance(1);
    }
    progress.finish("3D estimation done");
    Ok(results)
}

/// [`estimate_parameters`], then merge every result into `param`.
pub fn estimate_and_apply(
    param: &mut SimParam,
    otf: &OtfProvider3D,
    input: &[Vec<Array3<Complex64>>],
    options: &EstimationOptions3d,
    progress: &dyn ProgressSink,
) -> SimResult<Vec<ParameterEstimationResult>> {
    let results = estimate_parameters(param, otf, input, options, progress)?;
    for result in &results {
        param.apply_estimate(result)?;
    }
    Ok(results)
}

/// Reconstruct prepared z-stacks: 2x lateral, native axial sampling.
pub fn run_reconstruction(
    param: &SimParam,
    otf: &OtfProvider3D,
    input: &[Vec<Array3<Complex64>>],
    progress: &dyn ProgressSink,
) -> SimResult<ReconstructionOutput<Ix3>> {
    run_generic::<Ix3, OtfProvider3D>(param, otf, input, progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ImgSeq;

    fn param() -> SimParam {
        SimParam::new_3d(2, 2, 3, 16, 0.08, 4, 0.125).unwrap()
    }

    #[test]
    fn test_prepare_stacks_by_sequence() {
        let mut param = param();
        param.set_img_seq(ImgSeq::Pza);
        let frames: Vec<Array2<f64>> = (0..param.frame_count())
            .map(|i| Array2::from_elem((16, 16), i as f64))
            .collect();
        let input = prepare_input(&frames, &param).unwrap();
        assert_eq!(input.len(), 2);
        assert_eq!(input[1][2].dim(), (4, 16, 16));
        // PZA: pha + z * pha_max + ang * pha_max * z_max, summed over z
        let expected: f64 = (0..4).map(|z| (2 + z * 3 + 3 * 4) as f64).sum::<f64>() * 256.0;
        assert!((input[1][2][[0, 0, 0]].re - expected).abs() < 1e-6);
    }

    #[test]
    fn test_prepare_rejects_2d_param() {
        let flat = SimParam::new_2d(2, 2, 3, 16, 0.08).unwrap();
        let frames = vec![Array2::<f64>::zeros((16, 16)); 6];
        assert!(matches!(
            prepare_input(&frames, &flat),
            Err(SimError::InvalidState(_))
        ));
    }
}
