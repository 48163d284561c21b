//! Reconstruction parameters
//!
//! [`SimParam`] has a fixed shape (bands, directions, phases) chosen at
//! construction. Its per-direction [`Dir`] records are written by parameter
//! estimation through [`SimParam::apply_estimate`] and read by the
//! reconstruction pipelines.

pub mod fit;
pub mod img_seq;

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::band_separation::PhaseSet;
use crate::error::{SimError, SimResult};
use crate::otf::{Attenuation, OtfProvider, OtfProvider3D};
pub use fit::{FitQuality, ParameterEstimationResult};
pub use img_seq::ImgSeq;

/// Filter applied when combining bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum FilterPlan {
    /// Wiener-filter the combined spectrum
    Wiener { wiener_param: f64 },
    /// Richardson-Lucy on every raw frame, then Wiener
    RlInput { iterations: usize, wiener_param: f64 },
    /// Richardson-Lucy on the combined spectrum
    RlOutput { iterations: usize },
    /// Richardson-Lucy on the raw frames and on the combined spectrum
    RlBoth { iterations: usize },
}

/// Filter used on the combined spectrum
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFilter {
    Wiener(f64),
    RichardsonLucy(usize),
}

impl FilterPlan {
    /// Iterations of RL to run on each raw frame, if any
    pub fn rl_input_iterations(&self) -> Option<usize> {
        match self {
            FilterPlan::RlInput { iterations, .. } | FilterPlan::RlBoth { iterations } => {
                Some(*iterations)
            }
            _ => None,
        }
    }

    pub fn output_filter(&self) -> OutputFilter {
        match self {
            FilterPlan::Wiener { wiener_param } | FilterPlan::RlInput { wiener_param, .. } => {
                OutputFilter::Wiener(*wiener_param)
            }
            FilterPlan::RlOutput { iterations } | FilterPlan::RlBoth { iterations } => {
                OutputFilter::RichardsonLucy(*iterations)
            }
        }
    }

    fn validate(&self) -> SimResult<()> {
        let (iterations, wiener) = match *self {
            FilterPlan::Wiener { wiener_param } => (None, Some(wiener_param)),
            FilterPlan::RlInput {
                iterations,
                wiener_param,
            } => (Some(iterations), Some(wiener_param)),
            FilterPlan::RlOutput { iterations } | FilterPlan::RlBoth { iterations } => {
                (Some(iterations), None)
            }
        };
        if iterations == Some(0) {
            return Err(SimError::InvalidParameter(
                "Richardson-Lucy needs at least one iteration".to_string(),
            ));
        }
        if let Some(w) = wiener {
            if !w.is_finite() || w <= 0.0 {
                return Err(SimError::InvalidParameter(format!(
                    "Wiener parameter {w} must be positive"
                )));
            }
        }
        Ok(())
    }
}

impl Default for FilterPlan {
    fn default() -> Self {
        FilterPlan::Wiener { wiener_param: 0.05 }
    }
}

/// Valid range for estimated modulation depths
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModulationRange {
    pub low: f64,
    pub high: f64,
}

impl ModulationRange {
    pub fn new(low: f64, high: f64) -> SimResult<Self> {
        if !(low.is_finite() && high.is_finite()) || low < 0.0 || low > high {
            return Err(SimError::InvalidParameter(format!(
                "invalid modulation range [{low}, {high}]"
            )));
        }
        Ok(Self { low, high })
    }

    pub fn clamp(&self, modulation: f64) -> f64 {
        modulation.clamp(self.low, self.high)
    }
}

impl Default for ModulationRange {
    fn default() -> Self {
        Self {
            low: 0.15,
            high: 1.0,
        }
    }
}

/// Pattern parameters of one illumination direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Dir {
    nr_bands: usize,
    nr_phases: usize,
    px: f64,
    py: f64,
    phase_offset: f64,
    explicit_phases: Option<Vec<f64>>,
    modulations: Vec<f64>,
    range: ModulationRange,
}

impl Dir {
    fn new(nr_bands: usize, nr_phases: usize, range: ModulationRange) -> Self {
        Self {
            nr_bands,
            nr_phases,
            px: 0.0,
            py: 0.0,
            phase_offset: 0.0,
            explicit_phases: None,
            modulations: vec![1.0; nr_bands],
            range,
        }
    }

    /// Shift of `band` in frequency pixels: the outer-band vector scaled by
    /// `band / (bands - 1)`
    pub fn px(&self, band: usize) -> f64 {
        self.px * band as f64 / (self.nr_bands - 1) as f64
    }

    pub fn py(&self, band: usize) -> f64 {
        self.py * band as f64 / (self.nr_bands - 1) as f64
    }

    /// Outer-band shift vector
    pub fn shift(&self) -> (f64, f64) {
        (self.px, self.py)
    }

    pub fn set_shift(&mut self, px: f64, py: f64) {
        self.px = px;
        self.py = py;
    }

    pub fn phase_offset(&self) -> f64 {
        self.phase_offset
    }

    pub fn set_phase_offset(&mut self, offset: f64) {
        self.phase_offset = offset;
    }

    /// Phase of every frame: explicit if set, else `offset + 2 pi p / phases`
    pub fn phases(&self) -> Vec<f64> {
        match &self.explicit_phases {
            Some(phases) => phases.clone(),
            None => (0..self.nr_phases)
                .map(|p| self.phase_offset + 2.0 * PI * p as f64 / self.nr_phases as f64)
                .collect(),
        }
    }

    pub fn has_explicit_phases(&self) -> bool {
        self.explicit_phases.is_some()
    }

    pub fn phase_set(&self) -> PhaseSet {
        match &self.explicit_phases {
            Some(phases) => PhaseSet::Explicit(phases.clone()),
            None => PhaseSet::Equidistant {
                offset: self.phase_offset,
            },
        }
    }

    /// # Errors
    /// * `SimError::DimensionMismatch` - If the array length is not the
    ///   phase count
    pub fn set_phases_explicit(&mut self, phases: Vec<f64>) -> SimResult<()> {
        if phases.len() != self.nr_phases {
            return Err(SimError::DimensionMismatch(format!(
                "{} explicit phases given, direction has {} phases",
                phases.len(),
                self.nr_phases
            )));
        }
        self.explicit_phases = Some(phases);
        Ok(())
    }

    pub fn clear_explicit_phases(&mut self) {
        self.explicit_phases = None;
    }

    pub fn modulation(&self, band: usize) -> f64 {
        self.modulations.get(band).copied().unwrap_or(0.0)
    }

    pub fn modulations(&self) -> &[f64] {
        &self.modulations
    }

    /// Set the modulation of a non-DC band, clamped into the configured range.
    ///
    /// Returns the stored (clamped) value.
    pub fn set_modulation(&mut self, band: usize, modulation: f64) -> SimResult<f64> {
        if band == 0 || band >= self.nr_bands {
            return Err(SimError::InvalidParameter(format!(
                "cannot set modulation of band {band}, valid bands are 1..{}",
                self.nr_bands
            )));
        }
        let clamped = self.range.clamp(modulation);
        self.modulations[band] = clamped;
        Ok(clamped)
    }
}

/// Geometry, filter configuration and per-direction pattern parameters of
/// one reconstruction session.
#[derive(Debug, Clone, PartialEq)]
pub struct SimParam {
    nr_bands: usize,
    nr_dirs: usize,
    nr_phases: usize,
    img_size: usize,
    pxl_size: f64,
    depth: usize,
    pxl_size_z: Option<f64>,
    img_seq: ImgSeq,
    filter: FilterPlan,
    apo_cutoff: f64,
    apo_bend: f64,
    otf_before_shift: bool,
    attenuation: Option<Attenuation>,
    range: ModulationRange,
    background: f64,
    fade_border: usize,
    clip_output: bool,
    dirs: Vec<Dir>,
}

impl SimParam {
    /// Parameters for square 2D images of `size` pixels at `pxl_size` microns.
    ///
    /// # Errors
    /// * `SimError::InvalidParameter` - Fewer than two bands, no directions,
    ///   `phases < 2 * bands - 1`, or a non-positive size
    pub fn new_2d(
        bands: usize,
        dirs: usize,
        phases: usize,
        size: usize,
        pxl_size: f64,
    ) -> SimResult<Self> {
        if bands < 2 {
            return Err(SimError::InvalidParameter(format!(
                "need at least 2 bands, got {bands}"
            )));
        }
        if dirs == 0 {
            return Err(SimError::InvalidParameter(
                "need at least one direction".to_string(),
            ));
        }
        if phases < 2 * bands - 1 {
            return Err(SimError::InvalidParameter(format!(
                "{phases} phases cannot separate {} components of {bands} bands",
                2 * bands - 1
            )));
        }
        if size < 8 || size % 2 != 0 {
            return Err(SimError::InvalidParameter(format!(
                "image size {size} must be even and at least 8"
            )));
        }
        if !pxl_size.is_finite() || pxl_size <= 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "pixel size {pxl_size} must be positive"
            )));
        }

        let range = ModulationRange::default();
        Ok(Self {
            nr_bands: bands,
            nr_dirs: dirs,
            nr_phases: phases,
            img_size: size,
            pxl_size,
            depth: 1,
            pxl_size_z: None,
            img_seq: ImgSeq::default(),
            filter: FilterPlan::default(),
            apo_cutoff: 2.0,
            apo_bend: 0.9,
            otf_before_shift: true,
            attenuation: None,
            range,
            background: 0.0,
            fade_border: 0,
            clip_output: true,
            dirs: (0..dirs).map(|_| Dir::new(bands, phases, range)).collect(),
        })
    }

    /// Parameters for 3D stacks of `depth` planes spaced `pxl_size_z` microns.
    pub fn new_3d(
        bands: usize,
        dirs: usize,
        phases: usize,
        size: usize,
        pxl_size: f64,
        depth: usize,
        pxl_size_z: f64,
    ) -> SimResult<Self> {
        let mut param = Self::new_2d(bands, dirs, phases, size, pxl_size)?;
        if depth < 2 {
            return Err(SimError::InvalidParameter(format!(
                "3D stacks need at least 2 planes, got {depth}"
            )));
        }
        if !pxl_size_z.is_finite() || pxl_size_z <= 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "axial pixel size {pxl_size_z} must be positive"
            )));
        }
        param.depth = depth;
        param.pxl_size_z = Some(pxl_size_z);
        Ok(param)
    }

    pub fn nr_bands(&self) -> usize {
        self.nr_bands
    }

    pub fn nr_dirs(&self) -> usize {
        self.nr_dirs
    }

    pub fn nr_phases(&self) -> usize {
        self.nr_phases
    }

    /// Number of separated components, `2 * bands - 1`
    pub fn nr_components(&self) -> usize {
        2 * self.nr_bands - 1
    }

    /// Lateral size (width and height) of a raw frame
    pub fn img_size(&self) -> usize {
        self.img_size
    }

    pub fn pxl_size(&self) -> f64 {
        self.pxl_size
    }

    /// Number of z-planes (1 for 2D)
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn pxl_size_z(&self) -> Option<f64> {
        self.pxl_size_z
    }

    pub fn is_3d(&self) -> bool {
        self.pxl_size_z.is_some()
    }

    /// Lateral cycles/micron of one frequency pixel
    pub fn cycles_per_micron(&self) -> f64 {
        1.0 / (self.img_size as f64 * self.pxl_size)
    }

    /// Axial cycles/micron of one frequency pixel
    pub fn cycles_per_micron_z(&self) -> Option<f64> {
        self.pxl_size_z
            .map(|dz| 1.0 / (self.depth as f64 * dz))
    }

    /// Total number of raw frames
    pub fn frame_count(&self) -> usize {
        self.nr_dirs * self.nr_phases * self.depth
    }

    pub fn img_seq(&self) -> ImgSeq {
        self.img_seq
    }

    pub fn set_img_seq(&mut self, seq: ImgSeq) {
        self.img_seq = seq;
    }

    pub fn filter(&self) -> FilterPlan {
        self.filter
    }

    pub fn set_filter(&mut self, filter: FilterPlan) -> SimResult<()> {
        filter.validate()?;
        self.filter = filter;
        Ok(())
    }

    pub fn apo_cutoff(&self) -> f64 {
        self.apo_cutoff
    }

    pub fn apo_bend(&self) -> f64 {
        self.apo_bend
    }

    /// Apodization cutoff (relative to the OTF cutoff) and bend exponent
    pub fn set_apodization(&mut self, cutoff: f64, bend: f64) -> SimResult<()> {
        if !cutoff.is_finite() || cutoff <= 0.0 || !bend.is_finite() || bend < 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "invalid apodization cutoff {cutoff} / bend {bend}"
            )));
        }
        self.apo_cutoff = cutoff;
        self.apo_bend = bend;
        Ok(())
    }

    pub fn otf_before_shift(&self) -> bool {
        self.otf_before_shift
    }

    pub fn set_otf_before_shift(&mut self, before: bool) {
        self.otf_before_shift = before;
    }

    pub fn attenuation(&self) -> Option<Attenuation> {
        self.attenuation
    }

    pub fn set_attenuation(&mut self, attenuation: Option<Attenuation>) {
        self.attenuation = attenuation;
    }

    pub fn modulation_range(&self) -> ModulationRange {
        self.range
    }

    /// Change the clamp range; stored modulations are re-clamped.
    pub fn set_modulation_range(&mut self, range: ModulationRange) {
        self.range = range;
        for dir in &mut self.dirs {
            dir.range = range;
            for m in dir.modulations.iter_mut().skip(1) {
                *m = range.clamp(*m);
            }
        }
    }

    pub fn background(&self) -> f64 {
        self.background
    }

    pub fn set_background(&mut self, level: f64) {
        self.background = level.max(0.0);
    }

    pub fn fade_border(&self) -> usize {
        self.fade_border
    }

    pub fn set_fade_border(&mut self, px: usize) {
        self.fade_border = px;
    }

    pub fn clip_output(&self) -> bool {
        self.clip_output
    }

    pub fn set_clip_output(&mut self, clip: bool) {
        self.clip_output = clip;
    }

    /// # Errors
    /// * `SimError::InvalidParameter` - If `i` is not a direction index
    pub fn dir(&self, i: usize) -> SimResult<&Dir> {
        self.dirs.get(i).ok_or_else(|| self.dir_error(i))
    }

    pub fn dir_mut(&mut self, i: usize) -> SimResult<&mut Dir> {
        let err = self.dir_error(i);
        self.dirs.get_mut(i).ok_or(err)
    }

    pub fn dirs(&self) -> impl Iterator<Item = &Dir> {
        self.dirs.iter()
    }

    fn dir_error(&self, i: usize) -> SimError {
        SimError::InvalidParameter(format!(
            "direction {i} out of range, have {}",
            self.nr_dirs
        ))
    }

    /// Merge one estimation result into its direction.
    ///
    /// # Errors
    /// * `SimError::InvalidParameter` - Unknown direction
    /// * `SimError::DimensionMismatch` - Band or phase counts do not match
    pub fn apply_estimate(&mut self, result: &ParameterEstimationResult) -> SimResult<()> {
        if result.modulations.len() != self.nr_bands {
            return Err(SimError::DimensionMismatch(format!(
                "estimate carries {} modulations, expected {}",
                result.modulations.len(),
                self.nr_bands
            )));
        }
        let dir = self.dir_mut(result.direction)?;
        dir.set_shift(result.shift.0, result.shift.1);
        dir.set_phase_offset(result.phase_offset);
        for (band, &m) in result.modulations.iter().enumerate().skip(1) {
            dir.set_modulation(band, m)?;
        }
        match &result.explicit_phases {
            Some(phases) => dir.set_phases_explicit(phases.clone())?,
            None => dir.clear_explicit_phases(),
        }
        Ok(())
    }

    /// Give a 2D OTF this session's pixel size and attenuation.
    pub fn configure_otf(&self, otf: &mut OtfProvider) -> SimResult<()> {
        otf.set_pixel_size(self.cycles_per_micron())?;
        if let Some(att) = self.attenuation {
            otf.set_attenuation(att.strength, att.fwhm)?;
        }
        otf.set_attenuation_enabled(self.attenuation.is_some())?;
        Ok(())
    }

    /// Give a 3D OTF this session's lateral and axial pixel sizes and
    /// attenuation.
    ///
    /// # Errors
    /// * `SimError::InvalidState` - If the parameters are not 3D
    pub fn configure_otf_3d(&self, otf: &mut OtfProvider3D) -> SimResult<()> {
        let axial = self.cycles_per_micron_z().ok_or_else(|| {
            SimError::InvalidState("2D parameters cannot configure a 3D OTF".to_string())
        })?;
        otf.set_pixel_size(self.cycles_per_micron(), axial)?;
        if let Some(att) = self.attenuation {
            otf.set_attenuation(att.strength, att.fwhm)?;
        }
        otf.set_attenuation_enabled(self.attenuation.is_some())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_shape_invariants() {
        assert!(SimParam::new_2d(3, 3, 5, 256, 0.08).is_ok());
        assert!(SimParam::new_2d(3, 3, 4, 256, 0.08).is_err());
        assert!(SimParam::new_2d(1, 3, 5, 256, 0.08).is_err());
        assert!(SimParam::new_2d(2, 0, 3, 256, 0.08).is_err());
        assert!(SimParam::new_2d(2, 3, 3, 255, 0.08).is_err());
        assert!(SimParam::new_3d(3, 3, 5, 128, 0.08, 1, 0.125).is_err());
    }

    #[test]
    fn test_band_shift_scaling() {
        let mut param = SimParam::new_2d(3, 3, 5, 256, 0.08).unwrap();
        param.dir_mut(1).unwrap().set_shift(80.0, -40.0);
        let dir = param.dir(1).unwrap();
        assert_eq!(dir.px(0), 0.0);
        assert_eq!(dir.px(1), 40.0);
        assert_eq!(dir.py(2), -40.0);
    }

    #[test]
    fn test_equidistant_and_explicit_phases() {
        let mut param = SimParam::new_2d(2, 1, 4, 64, 0.1).unwrap();
        let dir = param.dir_mut(0).unwrap();
        dir.set_phase_offset(0.5);
        let phases = dir.phases();
        assert_relative_eq!(phases[0], 0.5);
        assert_relative_eq!(phases[2], 0.5 + PI, epsilon = 1e-12);
        assert!(matches!(dir.phase_set(), PhaseSet::Equidistant { .. }));

        assert!(dir.set_phases_explicit(vec![0.0; 3]).is_err());
        dir.set_phases_explicit(vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(dir.phases()[3], 3.0);
        assert!(matches!(dir.phase_set(), PhaseSet::Explicit(_)));
    }

    #[test]
    fn test_modulation_clamping() {
        let mut param = SimParam::new_2d(3, 1, 5, 64, 0.1).unwrap();
        let dir = param.dir_mut(0).unwrap();
        assert_eq!(dir.set_modulation(1, 1.3).unwrap(), 1.0);
        assert_eq!(dir.set_modulation(2, 0.01).unwrap(), 0.15);
        assert!(dir.set_modulation(0, 0.5).is_err());
        assert!(dir.set_modulation(3, 0.5).is_err());
        assert_eq!(dir.modulation(0), 1.0);

        param.set_modulation_range(ModulationRange::new(0.2, 0.9).unwrap());
        assert_eq!(param.dir(0).unwrap().modulation(1), 0.9);
        assert_eq!(param.dir(0).unwrap().modulation(2), 0.2);
    }

    #[test]
    fn test_apply_estimate() {
        let mut param = SimParam::new_2d(3, 2, 5, 64, 0.1).unwrap();
        let result = ParameterEstimationResult {
            direction: 1,
            shift: (20.5, -3.25),
            phase_offset: 1.2,
            raw_modulations: vec![1.0, 0.6, 1.4],
            modulations: vec![1.0, 0.6, 1.4],
            quality: vec![FitQuality::Good; 3],
            explicit_phases: None,
        };
        param.apply_estimate(&result).unwrap();
        let dir = param.dir(1).unwrap();
        assert_eq!(dir.shift(), (20.5, -3.25));
        assert_eq!(dir.modulation(2), 1.0);
        assert_eq!(dir.phase_offset(), 1.2);

        let bad = ParameterEstimationResult {
            direction: 5,
            ..result
        };
        assert!(param.apply_estimate(&bad).is_err());
    }

    #[test]
    fn test_filter_plan_helpers() {
        let plan = FilterPlan::RlInput {
            iterations: 5,
            wiener_param: 0.1,
        };
        assert_eq!(plan.rl_input_iterations(), Some(5));
        assert_eq!(plan.output_filter(), OutputFilter::Wiener(0.1));
        assert_eq!(
            FilterPlan::RlBoth { iterations: 7 }.output_filter(),
            OutputFilter::RichardsonLucy(7)
        );
        assert_eq!(FilterPlan::default().rl_input_iterations(), None);

        let mut param = SimParam::new_2d(2, 1, 3, 64, 0.1).unwrap();
        assert!(param.set_filter(FilterPlan::RlOutput { iterations: 0 }).is_err());
        assert!(param.set_filter(FilterPlan::Wiener { wiener_param: -1.0 }).is_err());
    }

    #[test]
    fn test_filter_plan_serde_tag() {
        let json = serde_json::to_string(&FilterPlan::RlOutput { iterations: 3 }).unwrap();
        assert_eq!(json, r#"{"style":"rl_output","iterations":3}"#);
    }

    #[test]
    fn test_cycles_per_micron() {
        let param = SimParam::new_3d(3, 3, 5, 256, 0.08, 16, 0.125).unwrap();
        assert_relative_eq!(param.cycles_per_micron(), 1.0 / 20.48);
        assert_relative_eq!(param.cycles_per_micron_z().unwrap(), 0.5);
        assert_eq!(param.frame_count(), 3 * 5 * 16);
    }
}
