//! Radially symmetric 2D OTF
//!
//! The OTF is tabulated per band on a uniform radial grid running from zero
//! frequency to the cutoff `2 NA / lambda`. Evaluation between samples is
//! linear; anything at or beyond the cutoff is exactly zero.

use log::debug;
use ndarray::Ix2;
use num_complex::Complex64;
use sim_math::lerp_uniform;

use super::{ideal_otf, Attenuation, OtfModel};
use crate::config::OtfRecord;
use crate::error::{SimError, SimResult};

/// Number of radial samples in an estimated OTF table
pub const ESTIMATE_SAMPLES: usize = 512;

/// Default band count of an estimated OTF (three-beam SIM)
pub const DEFAULT_BANDS: usize = 3;

#[derive(Debug, Clone)]
struct AttenuationView {
    params: Attenuation,
    samples: Vec<Vec<Complex64>>,
}

/// Radially sampled per-band OTF with an optional attenuation view.
#[derive(Debug, Clone)]
pub struct OtfProvider {
    na: f64,
    emission_nm: f64,
    cutoff: f64,
    /// cycles/micron between adjacent table samples
    sample_spacing: f64,
    samples: Vec<Vec<Complex64>>,
    attenuation: Option<AttenuationView>,
    attenuation_enabled: bool,
    /// cycles/micron of one frequency pixel of the image grid
    pixel_size: Option<f64>,
}

/// Cutoff frequency in cycles/micron for a given NA and wavelength in nm
pub fn cutoff_frequency(na: f64, emission_nm: f64) -> f64 {
    1000.0 / (emission_nm / na / 2.0)
}

fn validate_optics(na: f64, emission_nm: f64) -> SimResult<()> {
    if !na.is_finite() || na <= 0.0 {
        return Err(SimError::InvalidParameter(format!("NA {na} must be positive")));
    }
    if !emission_nm.is_finite() || emission_nm <= 0.0 {
        return Err(SimError::InvalidParameter(format!(
            "emission wavelength {emission_nm} nm must be positive"
        )));
    }
    Ok(())
}

impl OtfProvider {
    /// Estimate an OTF from the physical parameters.
    ///
    /// Each sample is `ideal(v) * curvature^v` for the normalized radius
    /// `v in [0, 1]`; the table is replicated for [`DEFAULT_BANDS`] bands.
    ///
    /// # Arguments
    /// * `na` - Numerical aperture of the objective
    /// * `emission_nm` - Emission wavelength in nanometers
    /// * `curvature` - Attenuation of high frequencies, in `[0, 1]`
    ///
    /// # Errors
    /// * `SimError::InvalidParameter` - If any argument is out of range
    pub fn from_estimate(na: f64, emission_nm: f64, curvature: f64) -> SimResult<Self> {
        validate_optics(na, emission_nm)?;
        if !(0.0..=1.0).contains(&curvature) {
            return Err(SimError::InvalidParameter(format!(
                "curvature factor {curvature} outside [0, 1]"
            )));
        }

        let cutoff = cutoff_frequency(na, emission_nm);
        let last = (ESTIMATE_SAMPLES - 1) as f64;
        let table: Vec<Complex64> = (0..ESTIMATE_SAMPLES)
            .map(|i| {
                let v = i as f64 / last;
                Complex64::new(ideal_otf(v) * curvature.powf(v), 0.0)
            })
            .collect();

        debug!(
            "Estimated OTF: NA {na}, {emission_nm} nm, cutoff {cutoff:.3} cycles/um, curvature {curvature}"
        );

        Ok(Self {
            na,
            emission_nm,
            cutoff,
            sample_spacing: cutoff / last,
            samples: vec![table; DEFAULT_BANDS],
            attenuation: None,
            attenuation_enabled: false,
            pixel_size: None,
        })
    }

    /// Build from measured per-band samples.
    ///
    /// # Errors
    /// * `SimError::InvalidParameter` - On bad optics, spacing, or empty tables
    /// * `SimError::DimensionMismatch` - If the bands differ in length
    pub fn from_samples(
        na: f64,
        emission_nm: f64,
        sample_spacing: f64,
        samples: Vec<Vec<Complex64>>,
    ) -> SimResult<Self> {
        validate_optics(na, emission_nm)?;
        if !sample_spacing.is_finite() || sample_spacing <= 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "sample spacing {sample_spacing} must be positive"
            )));
        }
        let len = samples.first().map(Vec::len).unwrap_or(0);
        if samples.is_empty() || len < 2 {
            return Err(SimError::InvalidParameter(
                "OTF needs at least one band of two or more samples".to_string(),
            ));
        }
        if samples.iter().any(|b| b.len() != len) {
            return Err(SimError::DimensionMismatch(
                "all OTF bands must have the same sample count".to_string(),
            ));
        }

        let cutoff = cutoff_frequency(na, emission_nm).min(sample_spacing * (len - 1) as f64);
        Ok(Self {
            na,
            emission_nm,
            cutoff,
            sample_spacing,
            samples,
            attenuation: None,
            attenuation_enabled: false,
            pixel_size: None,
        })
    }

    /// Load a measured OTF from a persisted record.
    ///
    /// # Errors
    /// * `SimError::Configuration` - If the record is incomplete or describes
    ///   a 3D table
    pub fn load_from_config(record: &OtfRecord) -> SimResult<Self> {
        if record.samples_axial.is_some() {
            return Err(SimError::Configuration(
                "OTF record has an axial axis; load it as a 3D OTF".to_string(),
            ));
        }
        let samples = record.band_tables(record.samples_lateral)?;
        Self::from_samples(
            record.na,
            record.emission_nm,
            record.cycles_per_micron_lateral,
            samples,
        )
    }

    /// Persistable form of the base samples
    pub fn to_record(&self) -> OtfRecord {
        OtfRecord::from_tables(
            self.na,
            self.emission_nm,
            self.sample_spacing,
            &self.samples,
            None,
        )
    }

    /// Replace the band count, replicating band 0 (or truncating).
    pub fn with_bands(mut self, bands: usize) -> SimResult<Self> {
        if bands == 0 {
            return Err(SimError::InvalidParameter("OTF needs at least one band".to_string()));
        }
        let base = self.samples[0].clone();
        self.samples.resize(bands, base);
        if let Some(params) = self.attenuation.as_ref().map(|view| view.params) {
            self.set_attenuation(params.strength, params.fwhm)?;
        }
        Ok(self)
    }

    /// Evaluate the OTF of `band` at `freq` cycles/micron.
    ///
    /// # Errors
    /// * `SimError::InvalidParameter` - On negative frequency or a band out of range
    pub fn get_otf_val(&self, band: usize, freq: f64, use_attenuation: bool) -> SimResult<Complex64> {
        if band >= self.samples.len() {
            return Err(SimError::InvalidParameter(format!(
                "band {band} out of range, OTF has {} bands",
                self.samples.len()
            )));
        }
        if freq.is_nan() || freq < 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "OTF frequency {freq} must be non-negative"
            )));
        }
        Ok(self.value(band, freq, use_attenuation))
    }

    /// Unchecked evaluation; zero outside the table.
    fn value(&self, band: usize, freq: f64, use_attenuation: bool) -> Complex64 {
        if freq >= self.cutoff {
            return Complex64::new(0.0, 0.0);
        }
        let table = match (&self.attenuation, use_attenuation) {
            (Some(view), true) => &view.samples[band],
            _ => &self.samples[band],
        };
        lerp_uniform(table, freq / self.sample_spacing).unwrap_or(Complex64::new(0.0, 0.0))
    }

    /// Set the notch attenuation and recompute the attenuated view.
    ///
    /// # Errors
    /// * `SimError::InvalidParameter` - Unless `0 <= strength < 1` and `fwhm > 0`
    pub fn set_attenuation(&mut self, strength: f64, fwhm: f64) -> SimResult<()> {
        let params = Attenuation::new(strength, fwhm)?;
        let spacing = self.sample_spacing;
        let samples = self
            .samples
            .iter()
            .map(|band| {
                band.iter()
                    .enumerate()
                    .map(|(i, v)| v * params.factor(i as f64 * spacing))
                    .collect()
            })
            .collect();
        self.attenuation = Some(AttenuationView { params, samples });
        Ok(())
    }

    /// Attenuation factor at `dist` cycles/micron (1 when none is configured)
    pub fn attenuation_factor(&self, dist: f64) -> f64 {
        self.attenuation
            .as_ref()
            .map_or(1.0, |view| view.params.factor(dist))
    }

    pub fn attenuation(&self) -> Option<Attenuation> {
        self.attenuation.as_ref().map(|view| view.params)
    }

    /// Switch the attenuation view on or off for raster operations.
    ///
    /// # Errors
    /// * `SimError::InvalidState` - Enabling before [`Self::set_attenuation`]
    pub fn set_attenuation_enabled(&mut self, enabled: bool) -> SimResult<()> {
        if enabled && self.attenuation.is_none() {
            return Err(SimError::InvalidState(
                "attenuation enabled before it was configured".to_string(),
            ));
        }
        self.attenuation_enabled = enabled;
        Ok(())
    }

    /// Set the frequency spacing of one image pixel in cycles/micron.
    pub fn set_pixel_size(&mut self, cycles_per_micron: f64) -> SimResult<()> {
        if !cycles_per_micron.is_finite() || cycles_per_micron <= 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "pixel size {cycles_per_micron} cycles/um must be positive"
            )));
        }
        self.pixel_size = Some(cycles_per_micron);
        Ok(())
    }

    pub fn na(&self) -> f64 {
        self.na
    }

    pub fn emission_nm(&self) -> f64 {
        self.emission_nm
    }

    pub fn sample_spacing(&self) -> f64 {
        self.sample_spacing
    }

    /// Base samples of one band
    pub fn samples(&self, band: usize) -> Option<&[Complex64]> {
        self.samples.get(band).map(Vec::as_slice)
    }

    /// Assemble from already checked parts (used by the 3D projection).
    pub(crate) fn from_parts(
        na: f64,
        emission_nm: f64,
        cutoff: f64,
        sample_spacing: f64,
        samples: Vec<Vec<Complex64>>,
    ) -> Self {
        Self {
            na,
            emission_nm,
            cutoff,
            sample_spacing,
            samples,
            attenuation: None,
            attenuation_enabled: false,
            pixel_size: None,
        }
    }
}

impl OtfModel<Ix2> for OtfProvider {
    fn bands(&self) -> usize {
        self.samples.len()
    }

    fn cutoff(&self) -> f64 {
        self.cutoff
    }

    fn pixel_size(&self) -> Option<f64> {
        self.pixel_size
    }

    fn attenuation_enabled(&self) -> bool {
        self.attenuation_enabled
    }

    fn otf_at(&self, band: usize, lateral: f64, _axial_px: f64, use_attenuation: bool) -> Complex64 {
        self.value(band, lateral, use_attenuation)
    }
}
