//! 2D structured illumination: raw frame preparation, pattern estimation and
//! reconstruction.

use log::{debug, info, warn};
use ndarray::{Array2, Ix2};
use num_complex::Complex64;

use super::{run_reconstruction as run_generic, ProgressSink, ReconstructionOutput};
use crate::band_separation::{default_band_factors, separate_bands_equidistant};
use crate::correlation::correlation2d::{
    auto_correlation, cross_correlation, fit_peak, get_peak, locate_peak,
};
use crate::correlation::CorrelationTrace;
use crate::error::{check_same_shape, SimError, SimResult};
use crate::otf::{OtfModel, OtfProvider};
use crate::param::{FitQuality, ParameterEstimationResult, SimParam};
use crate::sim_utils::{dampen_dc, fade_border_cos, subtract_background};
use crate::vector::fft_real_2d;

/// Options for correlation-based pattern estimation
#[derive(Debug, Clone)]
pub struct EstimationOptions {
    /// Minimum OTF magnitude inside the common region
    pub weight_limit: f64,
    /// Initial radius of the refinement grid, in frequency pixels
    pub search_radius: f64,
    /// Coarse peaks closer than this fraction of the cutoff are ignored
    pub k_min_factor: f64,
    /// Strength of the DC notch applied before the coarse search
    pub dampen_strength: f64,
    /// FWHM of that notch as a fraction of the cutoff
    pub dampen_fwhm_factor: f64,
    /// Also measure absolute per-frame phases (Wicker auto-correlation)
    pub wicker_phases: bool,
    /// Keep the refinement grids of every direction
    pub trace: bool,
}

impl Default for EstimationOptions {
    fn default() -> Self {
        Self {
            weight_limit: 0.05,
            search_radius: 2.5,
            k_min_factor: 0.5,
            dampen_strength: 0.99,
            dampen_fwhm_factor: 0.15,
            wicker_phases: false,
            trace: false,
        }
    }
}

/// Estimates of every direction, plus fit traces when requested
#[derive(Debug, Clone, Default)]
pub struct Estimation {
    pub results: Vec<ParameterEstimationResult>,
    pub traces: Vec<CorrelationTrace>,
}

/// Order raw frames by direction and phase, remove background, fade borders
/// and transform.
///
/// Returns `input[dir][phase]` spectra.
///
/// # Errors
/// * `SimError::DimensionMismatch` - Wrong frame count or frame size
pub fn prepare_input(frames: &[Array2<f64>], param: &SimParam) -> SimResult<Vec<Vec<Array2<Complex64>>>> {
    if param.is_3d() {
        return Err(SimError::InvalidState(
            "3D parameters need sim3d::prepare_input".to_string(),
        ));
    }
    if frames.len() != param.frame_count() {
        return Err(SimError::DimensionMismatch(format!(
            "{} frames given, expected {} ({} directions x {} phases)",
            frames.len(),
            param.frame_count(),
            param.nr_dirs(),
            param.nr_phases()
        )));
    }
    let size = param.img_size();
    let seq = param.img_seq();
    (0..param.nr_dirs())
        .map(|a| {
            (0..param.nr_phases())
                .map(|p| {
                    let idx = seq.calc_pos(p, a, 0, param.nr_phases(), param.nr_dirs(), 1);
                    let frame = &frames[idx];
                    check_same_shape("raw frame", frame.shape(), &[size, size])?;
                    let mut img = frame.clone();
                    if param.background() > 0.0 {
                        subtract_background(&mut img, param.background());
                    }
                    fade_border_cos(&mut img, param.fade_border())?;
                    Ok(fft_real_2d(&img))
                })
                .collect::<SimResult<Vec<_>>>()
        })
        .collect()
}

/// Estimate shift, phase and modulation of every direction.
///
/// Per direction: separate with equidistant phases from zero, damp DC, take
/// the strongest cross-correlation peak between band 0 and the outermost
/// `+` component, refine it, then read phase and modulations at the band
/// positions. Phases come from the lowest band; with two bands the low and
/// high components coincide.
///
/// # Errors
/// * `SimError::DimensionMismatch` - If the input layout does not match `param`
/// * `SimError::InvalidState` - If the OTF pixel size is unset
/// * `SimError::NumericalDegeneracy` - If the phases cannot be separated
pub fn estimate_parameters(
    param: &SimParam,
    otf: &OtfProvider,
    input: &[Vec<Array2<Complex64>>],
    options: &EstimationOptions,
    progress: &dyn ProgressSink,
) -> SimResult<Estimation> {
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
    let lb = 1;
    let outer = bands - 1;
    progress.set_total(param.nr_dirs() as u64);

    let mut estimation = Estimation::default();
    for (d, raw) in input.iter().enumerate() {
        let sep = separate_bands_equidistant(raw, 0.0, bands, &factors)?;

        let mut damped0 = sep[0].clone();
        let mut damped_hb = sep[hb].clone();
        dampen_dc::<Ix2>(&mut damped0, options.dampen_strength, options.dampen_fwhm_factor * cutoff);
        dampen_dc::<Ix2>(&mut damped_hb, options.dampen_strength, options.dampen_fwhm_factor * cutoff);
        let corr = cross_correlation(&damped0, &damped_hb)?;
        let coarse = locate_peak(&corr, options.k_min_factor * cutoff)?;
        debug!("direction {d}: coarse peak ({:.1}, {:.1})", coarse.x, coarse.y);

        let mut trace = CorrelationTrace::default();
        let peak = fit_peak(
            &sep[0],
            &sep[hb],
            0,
            outer,
            otf,
            coarse.x,
            coarse.y,
            options.weight_limit,
            options.search_radius,
            options.trace.then_some(&mut trace),
        )?;

        let mut raw_modulations = vec![1.0; bands];
        let mut phase_offset = 0.0;
        for band in 1..bands {
            let scale = band as f64 / outer as f64;
            // The high band's OTF index is used for every band
            let c = get_peak(
                &sep[0],
                &sep[2 * band - 1],
                0,
                outer,
                otf,
                peak.x * scale,
                peak.y * scale,
                options.weight_limit,
            )?;
            raw_modulations[band] = c.norm();
            if 2 * band - 1 == lb {
                phase_offset = c.arg();
            }
        }

        let range = param.modulation_range();
        let modulations: Vec<f64> = raw_modulations
            .iter()
            .enumerate()
            .map(|(band, &m)| if band == 0 { m } else { range.clamp(m) })
            .collect();
        let quality: Vec<FitQuality> = raw_modulations
            .iter()
            .enumerate()
            .map(|(band, &m)| if band == 0 { FitQuality::Good } else { FitQuality::classify(m) })
            .collect();

        let explicit_phases = if options.wicker_phases {
            let shift = (peak.x / outer as f64, peak.y / outer as f64);
            let phases = raw
                .iter()
                .map(|frame| auto_correlation(frame, otf, shift.0, shift.1).map(|c| c.arg()))
                .collect::<SimResult<Vec<f64>>>()?;
            Some(phases)
        } else {
            None
        };

        let result = ParameterEstimationResult {
            direction: d,
            shift: (peak.x, peak.y),
            phase_offset,
            raw_modulations,
            modulations,
            quality,
            explicit_phases,
        };
        log_result(&result);
        estimation.results.push(result);
        if options.trace {
            estimation.traces.push(trace);
        }
        progress.advance(1);
    }
    progress.finish("estimation done");
    Ok(estimation)
}

pub(crate) fn log_result(result: &ParameterEstimationResult) {
    info!(
        "direction {}: shift ({:.3}, {:.3}) |k| {:.3} angle {:.2} deg, phase {:.3}, modulations {:?}",
        result.direction,
        result.shift.0,
        result.shift.1,
        result.shift_length(),
        result.angle().to_degrees(),
        result.phase_offset,
        result.modulations
    );
    for (band, (&raw, quality)) in result
        .raw_modulations
        .iter()
        .zip(&result.quality)
        .enumerate()
        .skip(1)
    {
        if quality.is_weak() {
            warn!(
                "direction {} band {band}: {quality} fit, modulation {raw:.3} clamped to {:.3}",
                result.direction, result.modulations[band]
            );
        } else if raw != result.modulations[band] {
            warn!(
                "direction {} band {band}: modulation {raw:.3} clamped to {:.3}",
                result.direction, result.modulations[band]
            );
        }
    }
}

/// [`estimate_parameters`], then merge every result into `param`.
pub fn estimate_and_apply(
    param: &mut SimParam,
    otf: &OtfProvider,
    input: &[Vec<Array2<Complex64>>],
    options: &EstimationOptions,
    progress: &dyn ProgressSink,
) -> SimResult<Estimation> {
    let estimation = estimate_parameters(param, otf, input, options, progress)?;
    for result in &estimation.results {
        param.apply_estimate(result)?;
    }
    Ok(estimation)
}

/// Reconstruct prepared 2D input with the parameters in `param`.
pub fn run_reconstruction(
    param: &SimParam,
    otf: &OtfProvider,
    input: &[Vec<Array2<Complex64>>],
    progress: &dyn ProgressSink,
) -> SimResult<ReconstructionOutput<Ix2>> {
    run_generic::<Ix2, OtfProvider>(param, otf, input, progress)
}
