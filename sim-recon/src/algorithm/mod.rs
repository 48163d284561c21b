//! Estimation and reconstruction pipelines.
//!
//! The 2D and 3D pipelines differ only in how raw frames are assembled and
//! how the pattern is estimated; band combination, filtering and
//! apodization are shared by [`run_reconstruction`], generic over the
//! spectrum dimensionality.

pub mod sim2d;
pub mod sim3d;

use std::fmt;

use indicatif::ProgressBar;
use log::{debug, info};
use ndarray::Array;

use crate::band_separation::{component_band, component_sign, separate_bands};
use crate::error::{check_same_shape, SimError, SimResult};
use crate::otf::OtfModel;
use crate::param::{FilterPlan, OutputFilter, SimParam};
use crate::rl_deconvolution::{deconvolve, effective_otf, input_otf};
use crate::sim_utils::{fourier_shift, paste_freq};
use crate::vector::{FftDirection, SimDimension, Spectrum};
use crate::wiener::WienerFilter;

/// Stages of one reconstruction, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReconstructionStage {
    Raw,
    Separated,
    Shifted,
    Filtered,
    Apodized,
    Spatial,
}

impl ReconstructionStage {
    pub fn next(self) -> Option<Self> {
        use ReconstructionStage::*;
        match self {
            Raw => Some(Separated),
            Separated => Some(Shifted),
            Shifted => Some(Filtered),
            Filtered => Some(Apodized),
            Apodized => Some(Spatial),
            Spatial => None,
        }
    }
}

impl fmt::Display for ReconstructionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconstructionStage::Raw => "raw",
            ReconstructionStage::Separated => "separated",
            ReconstructionStage::Shifted => "shifted",
            ReconstructionStage::Filtered => "filtered",
            ReconstructionStage::Apodized => "apodized",
            ReconstructionStage::Spatial => "spatial",
        };
        f.write_str(s)
    }
}

/// Tracks the stage of a reconstruction; stages can only move forward one
/// at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineState {
    stage: ReconstructionStage,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            stage: ReconstructionStage::Raw,
        }
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> ReconstructionStage {
        self.stage
    }

    /// # Errors
    /// * `SimError::InvalidState` - Unless `to` directly follows the current stage
    pub fn advance(&mut self, to: ReconstructionStage) -> SimResult<()> {
        if self.stage.next() != Some(to) {
            return Err(SimError::InvalidState(format!(
                "cannot move from {} to {to}",
                self.stage
            )));
        }
        debug!("reconstruction stage {} -> {to}", self.stage);
        self.stage = to;
        Ok(())
    }
}

/// Receiver for coarse progress of long-running pipeline calls
pub trait ProgressSink: Sync {
    fn set_total(&self, total: u64);
    fn advance(&self, steps: u64);
    fn finish(&self, message: &str);
}

/// Discards all progress
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn set_total(&self, _total: u64) {}
    fn advance(&self, _steps: u64) {}
    fn finish(&self, _message: &str) {}
}

impl ProgressSink for ProgressBar {
    fn set_total(&self, total: u64) {
        self.set_length(total);
    }

    fn advance(&self, steps: u64) {
        self.inc(steps);
    }

    fn finish(&self, message: &str) {
        self.finish_with_message(message.to_string());
    }
}

/// Result of a reconstruction
#[derive(Debug, Clone)]
pub struct ReconstructionOutput<D: SimDimension> {
    /// Filtered, apodized spectrum on the 2x laterally oversized grid
    pub spectrum: Spectrum<D>,
    /// Real part of the inverse FFT of `spectrum`
    pub image: Array<f64, D>,
    /// Wiener-filtered widefield image at native resolution
    pub widefield: Array<f64, D>,
    pub stage: ReconstructionStage,
}

/// Widefield Wiener parameter when the plan has none of its own
const WIDEFIELD_WIENER_PARAM: f64 = 0.05;

fn widefield_wiener_param(filter: &FilterPlan) -> f64 {
    match filter {
        FilterPlan::Wiener { wiener_param } | FilterPlan::RlInput { wiener_param, .. } => {
            *wiener_param
        }
        _ => WIDEFIELD_WIENER_PARAM,
    }
}

fn validate_input<D: SimDimension>(param: &SimParam, input: &[Vec<Spectrum<D>>]) -> SimResult<D> {
    let native = D::native_shape(param)?;
    if input.len() != param.nr_dirs() {
        return Err(SimError::DimensionMismatch(format!(
            "{} directions of input, parameters describe {}",
            input.len(),
            param.nr_dirs()
        )));
    }
    for (d, frames) in input.iter().enumerate() {
        if frames.len() != param.nr_phases() {
            return Err(SimError::DimensionMismatch(format!(
                "direction {d} has {} phase spectra, expected {}",
                frames.len(),
                param.nr_phases()
            )));
        }
        for frame in frames {
            check_same_shape("raw spectrum", frame.shape(), native.slice())?;
        }
    }
    Ok(native)
}

/// Combine the raw spectra of all directions into one super-resolved image.
///
/// `input[dir][phase]` holds the forward FFT of each raw frame (or z-stack).
/// Band separation uses factors `[1, 0.5 * m_1, ...]` so the separated
/// components are normalized to the object's scale.
///
/// # Errors
/// * `SimError::DimensionMismatch` - If the input layout does not match `param`
/// * `SimError::NumericalDegeneracy` - If a direction's phases cannot be separated
/// * Errors of the OTF raster operations
pub fn run_reconstruction<D, O>(
    param: &SimParam,
    otf: &O,
    input: &[Vec<Spectrum<D>>],
    progress: &dyn ProgressSink,
) -> SimResult<ReconstructionOutput<D>>
where
    D: SimDimension,
    O: OtfModel<D> + ?Sized,
{
    let native = validate_input(param, input)?;
    let oversized = native.lateral_scaled(2);
    let filter = param.filter();
    let output_filter = filter.output_filter();
    let wiener_output = matches!(output_filter, OutputFilter::Wiener(_));
    let mut state = PipelineState::new();

    info!(
        "Reconstructing {} directions x {} phases, {} bands, filter {:?}",
        param.nr_dirs(),
        param.nr_phases(),
        param.nr_bands(),
        filter
    );
    progress.set_total((param.nr_dirs() * (param.nr_components() + 1) + 3) as u64);

    let rl_raster = match filter.rl_input_iterations() {
        Some(_) => Some(input_otf::<D, O>(param, otf)?),
        None => None,
    };

    // Separate every direction
    let mut separated = Vec::with_capacity(param.nr_dirs());
    let mut widefield = Spectrum::<D>::zeros(native);
    for (d, frames) in input.iter().enumerate() {
        let dir = param.dir(d)?;
        let cleaned;
        let frames: &[Spectrum<D>] = match (filter.rl_input_iterations(), &rl_raster) {
            (Some(steps), Some(raster)) => {
                let mut deconvolved = frames.clone();
                for frame in deconvolved.iter_mut() {
                    deconvolve(frame, raster, steps, true)?;
                }
                cleaned = deconvolved;
                &cleaned
            }
            _ => frames,
        };

        let mut factors = vec![1.0; param.nr_bands()];
        for (band, f) in factors.iter_mut().enumerate().skip(1) {
            *f = 0.5 * dir.modulation(band);
        }
        let components = separate_bands(frames, &dir.phase_set(), param.nr_bands(), &factors)?;
        widefield += &components[0];
        separated.push(components);
        progress.advance(1);
    }
    state.advance(ReconstructionStage::Separated)?;

    // Move every component into place on the oversized grid
    let mut combined = Spectrum::<D>::zeros(oversized);
    for (d, components) in separated.into_iter().enumerate() {
        let dir = param.dir(d)?;
        for (c, mut comp) in components.into_iter().enumerate() {
            let band = component_band(c);
            let sign = component_sign(c);
            let (kx, ky) = (-sign * dir.px(band), -sign * dir.py(band));

            if wiener_output && param.otf_before_shift() {
                otf.apply_otf(&mut comp, band, 0.0, 0.0)?;
            }
            let mut shifted = Spectrum::<D>::zeros(oversized);
            paste_freq(&comp, &mut shifted)?;
            if c != 0 {
                fourier_shift(&mut shifted, kx, ky);
            }
            if wiener_output {
                if !param.otf_before_shift() {
                    otf.apply_otf(&mut shifted, band, kx, ky)?;
                }
            } else {
                otf.mask_otf(&mut shifted, band, kx, ky)?;
            }
            combined += &shifted;
            progress.advance(1);
        }
    }
    state.advance(ReconstructionStage::Shifted)?;

    let wiener = WienerFilter::new(param, otf)?;
    match output_filter {
        OutputFilter::Wiener(w) => {
            let den = wiener.denominator(w);
            combined.zip_mut_with(&den, |v, d| *v *= *d);
        }
        OutputFilter::RichardsonLucy(steps) => {
            let eff = effective_otf::<D, O>(param, otf)?;
            let residuals = deconvolve(&mut combined, &eff, steps, true)?;
            if let Some(last) = residuals.last() {
                debug!("RL output finished after {steps} iterations, change {last:.3e}");
            }
        }
    }
    progress.advance(1);
    state.advance(ReconstructionStage::Filtered)?;

    let mut apo = Spectrum::<D>::zeros(oversized);
    otf.write_apo_vector(&mut apo, param.apo_bend(), param.apo_cutoff())?;
    combined.zip_mut_with(&apo, |v, a| *v *= a.re);
    progress.advance(1);
    state.advance(ReconstructionStage::Apodized)?;

    let mut image = combined.clone();
    D::fft(&mut image, FftDirection::Inverse);
    let mut image = image.mapv(|v| v.re);
    state.advance(ReconstructionStage::Spatial)?;

    // Widefield: mean DC band, Wiener-filtered at native size
    widefield.mapv_inplace(|v| v / param.nr_dirs() as f64);
    otf.apply_otf(&mut widefield, 0, 0.0, 0.0)?;
    let wf_den = wiener.widefield_denominator(widefield_wiener_param(&filter))?;
    widefield.zip_mut_with(&wf_den, |v, d| *v *= *d);
    D::fft(&mut widefield, FftDirection::Inverse);
    let mut widefield = widefield.mapv(|v| v.re);

    if param.clip_output() {
        image.mapv_inplace(|v| v.max(0.0));
        widefield.mapv_inplace(|v| v.max(0.0));
    }
    progress.advance(1);
    progress.finish("reconstruction done");

    Ok(ReconstructionOutput {
        spectrum: combined,
        image,
        widefield,
        stage: state.stage(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_advance_in_order() {
        let mut state = PipelineState::new();
        assert_eq!(state.stage(), ReconstructionStage::Raw);
        assert!(matches!(
            state.advance(ReconstructionStage::Shifted),
            Err(SimError::InvalidState(_))
        ));
        for stage in [
            ReconstructionStage::Separated,
            ReconstructionStage::Shifted,
            ReconstructionStage::Filtered,
            ReconstructionStage::Apodized,
            ReconstructionStage::Spatial,
        ] {
            state.advance(stage).unwrap();
        }
        assert_eq!(state.stage(), ReconstructionStage::Spatial);
        assert!(state.advance(ReconstructionStage::Raw).is_err());
    }

    #[test]
    fn test_widefield_param_falls_back() {
        assert_eq!(
            widefield_wiener_param(&FilterPlan::RlInput {
                iterations: 3,
                wiener_param: 0.2
            }),
            0.2
        );
        assert_eq!(
            widefield_wiener_param(&FilterPlan::RlOutput { iterations: 5 }),
            WIDEFIELD_WIENER_PARAM
        );
    }
}
