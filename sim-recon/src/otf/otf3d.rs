//! Lateral x axial 3D OTF
//!
//! Each band is a table indexed `[axial, lateral]` covering `|kz|` from zero to
//! the axial cutoff and lateral frequency from zero to the lateral cutoff, and
//! is evaluated by bilinear interpolation. The OTF is symmetric in `kz`.

use log::debug;
use ndarray::{Array2, Ix3};
use num_complex::Complex64;
use sim_math::bilerp_uniform;

use super::otf2d::cutoff_frequency;
use super::{ideal_otf, Attenuation, OtfModel, OtfProvider};
use crate::config::OtfRecord;
use crate::error::{SimError, SimResult};

/// Lateral samples of an estimated 3D table
pub const ESTIMATE_LATERAL_SAMPLES: usize = 256;

/// Axial samples of an estimated 3D table
pub const ESTIMATE_AXIAL_SAMPLES: usize = 128;

/// Axial cutoff in cycles/micron: `(n - sqrt(n^2 - NA^2)) / (lambda / 1000)`
pub fn axial_cutoff_frequency(na: f64, emission_nm: f64, refractive_index: f64) -> f64 {
    (refractive_index - (refractive_index.powi(2) - na.powi(2)).sqrt()) / (emission_nm / 1000.0)
}

/// Per-band lateral x axial OTF tables
#[derive(Debug, Clone)]
pub struct OtfProvider3D {
    na: f64,
    emission_nm: f64,
    refractive_index: f64,
    cutoff_lateral: f64,
    cutoff_axial: f64,
    spacing_lateral: f64,
    spacing_axial: f64,
    samples: Vec<Array2<Complex64>>,
    attenuation: Option<(Attenuation, Vec<Array2<Complex64>>)>,
    attenuation_enabled: bool,
    pixel_size: Option<(f64, f64)>,
}

impl OtfProvider3D {
    /// Estimate a 3D OTF.
    ///
    /// Laterally every axial plane follows `ideal(v) * curvature^v`; the
    /// axial support at normalized lateral radius `v` is
    /// `4 * axial_cutoff * v * (1 - v)` with a triangular profile, so `kz = 0`
    /// carries the full 2D estimate. All bands share the table.
    ///
    /// # Errors
    /// * `SimError::InvalidParameter` - If an argument is out of range or
    ///   `NA >= refractive_index`
    pub fn from_estimate(
        na: f64,
        emission_nm: f64,
        curvature: f64,
        refractive_index: f64,
    ) -> SimResult<Self> {
        if !(0.0..=1.0).contains(&curvature) {
            return Err(SimError::InvalidParameter(format!(
                "curvature factor {curvature} outside [0, 1]"
            )));
        }
        if na <= 0.0 || emission_nm <= 0.0 || refractive_index <= na {
            return Err(SimError::InvalidParameter(format!(
                "invalid optics: NA {na}, {emission_nm} nm, refractive index {refractive_index}"
            )));
        }

        let cutoff_lateral = cutoff_frequency(na, emission_nm);
        let cutoff_axial = axial_cutoff_frequency(na, emission_nm, refractive_index);
        let last_lat = (ESTIMATE_LATERAL_SAMPLES - 1) as f64;
        let last_ax = (ESTIMATE_AXIAL_SAMPLES - 1) as f64;
        let spacing_lateral = cutoff_lateral / last_lat;
        let spacing_axial = cutoff_axial / last_ax;

        let table = Array2::from_shape_fn(
            (ESTIMATE_AXIAL_SAMPLES, ESTIMATE_LATERAL_SAMPLES),
            |(a, l)| {
                let v = l as f64 / last_lat;
                let lateral = ideal_otf(v) * curvature.powf(v);
                let kz = a as f64 * spacing_axial;
                let support = 4.0 * cutoff_axial * v * (1.0 - v);
                let profile = if a == 0 {
                    1.0
                } else if support > 0.0 {
                    (1.0 - kz / support).max(0.0)
                } else {
                    0.0
                };
                Complex64::new(lateral * profile, 0.0)
            },
        );

        debug!(
            "Estimated 3D OTF: lateral cutoff {cutoff_lateral:.3}, axial cutoff {cutoff_axial:.3} cycles/um"
        );

        Ok(Self {
            na,
            emission_nm,
            refractive_index,
            cutoff_lateral,
            cutoff_axial,
            spacing_lateral,
            spacing_axial,
            samples: vec![table; super::otf2d::DEFAULT_BANDS],
            attenuation: None,
            attenuation_enabled: false,
            pixel_size: None,
        })
    }

    /// Load measured samples from a record with both lateral and axial axes.
    ///
    /// # Errors
    /// * `SimError::Configuration` - If the axial description is missing or
    ///   the sample arrays do not match the declared counts
    pub fn load_from_config(record: &OtfRecord) -> SimResult<Self> {
        let (axial, spacing_axial) = match (record.samples_axial, record.cycles_per_micron_axial) {
            (Some(n), Some(c)) if n >= 2 && c > 0.0 => (n, c),
            _ => {
                return Err(SimError::Configuration(
                    "3D OTF record needs axial sample count and spacing".to_string(),
                ))
            }
        };
        let lateral = record.samples_lateral;
        if lateral < 2 || record.cycles_per_micron_lateral <= 0.0 {
            return Err(SimError::Configuration(
                "3D OTF record needs lateral sample count and spacing".to_string(),
            ));
        }
        let refractive_index = record.refractive_index.unwrap_or(1.518);

        let samples = record
            .band_tables(lateral * axial)?
            .into_iter()
            .map(|flat| {
                Array2::from_shape_vec((axial, lateral), flat)
                    .map_err(|e| SimError::Configuration(format!("bad OTF table shape: {e}")))
            })
            .collect::<SimResult<Vec<_>>>()?;

        let spacing_lateral = record.cycles_per_micron_lateral;
        Ok(Self {
            na: record.na,
            emission_nm: record.emission_nm,
            refractive_index,
            cutoff_lateral: cutoff_frequency(record.na, record.emission_nm)
                .min(spacing_lateral * (lateral - 1) as f64),
            cutoff_axial: spacing_axial * (axial - 1) as f64,
            spacing_lateral,
            spacing_axial,
            samples,
            attenuation: None,
            attenuation_enabled: false,
            pixel_size: None,
        })
    }

    pub fn to_record(&self) -> OtfRecord {
        let flat: Vec<Vec<Complex64>> = self
            .samples
            .iter()
            .map(|t| t.iter().copied().collect())
            .collect();
        let mut record = OtfRecord::from_tables(
            self.na,
            self.emission_nm,
            self.spacing_lateral,
            &flat,
            Some((self.samples[0].nrows(), self.spacing_axial)),
        );
        record.samples_lateral = self.samples[0].ncols();
        record.refractive_index = Some(self.refractive_index);
        record
    }

    /// Evaluate at a lateral and axial frequency in cycles/micron.
    ///
    /// # Errors
    /// * `SimError::InvalidParameter` - On negative lateral frequency or a band
    ///   out of range
    pub fn get_otf_val(
        &self,
        band: usize,
        lateral: f64,
        axial: f64,
        use_attenuation: bool,
    ) -> SimResult<Complex64> {
        if band >= self.samples.len() {
            return Err(SimError::InvalidParameter(format!(
                "band {band} out of range, OTF has {} bands",
                self.samples.len()
            )));
        }
        if lateral.is_nan() || lateral < 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "OTF frequency {lateral} must be non-negative"
            )));
        }
        Ok(self.value(band, lateral, axial.abs(), use_attenuation))
    }

    fn value(&self, band: usize, lateral: f64, axial: f64, use_attenuation: bool) -> Complex64 {
        let zero = Complex64::new(0.0, 0.0);
        if lateral >= self.cutoff_lateral || axial >= self.cutoff_axial {
            return zero;
        }
        let table = match (&self.attenuation, use_attenuation) {
            (Some((_, view)), true) => &view[band],
            _ => &self.samples[band],
        };
        bilerp_uniform(
            table.view(),
            axial / self.spacing_axial,
            lateral / self.spacing_lateral,
        )
        .unwrap_or(zero)
    }

    /// Lateral-only notch attenuation
    pub fn set_attenuation(&mut self, strength: f64, fwhm: f64) -> SimResult<()> {
        let params = Attenuation::new(strength, fwhm)?;
        let spacing = self.spacing_lateral;
        let view = self
            .samples
            .iter()
            .map(|t| {
                let mut att = t.clone();
                for ((_, l), v) in att.indexed_iter_mut() {
                    *v *= params.factor(l as f64 * spacing);
                }
                att
            })
            .collect();
        self.attenuation = Some((params, view));
        Ok(())
    }

    pub fn attenuation_factor(&self, dist: f64) -> f64 {
        self.attenuation
            .as_ref()
            .map_or(1.0, |(params, _)| params.factor(dist))
    }

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

    /// Set lateral and axial cycles/micron per frequency pixel.
    pub fn set_pixel_size(&mut self, lateral: f64, axial: f64) -> SimResult<()> {
        if !lateral.is_finite() || !axial.is_finite() || lateral <= 0.0 || axial <= 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "pixel sizes {lateral}, {axial} cycles/um must be positive"
            )));
        }
        self.pixel_size = Some((lateral, axial));
        Ok(())
    }

    pub fn cutoff_axial(&self) -> f64 {
        self.cutoff_axial
    }

    pub fn na(&self) -> f64 {
        self.na
    }

    /// The `kz = 0` plane as a 2D OTF, carrying pixel size and attenuation.
    pub fn projected(&self) -> SimResult<OtfProvider> {
        let tables = self
            .samples
            .iter()
            .map(|t| t.row(0).to_vec())
            .collect();
        let mut otf = OtfProvider::from_parts(
            self.na,
            self.emission_nm,
            self.cutoff_lateral,
            self.spacing_lateral,
            tables,
        );
        if let Some((lateral, _)) = self.pixel_size {
            otf.set_pixel_size(lateral)?;
        }
        if let Some((params, _)) = &self.attenuation {
            otf.set_attenuation(params.strength, params.fwhm)?;
            otf.set_attenuation_enabled(self.attenuation_enabled)?;
        }
        Ok(otf)
    }
}

impl OtfModel<Ix3> for OtfProvider3D {
    fn bands(&self) -> usize {
        self.samples.len()
    }

    fn cutoff(&self) -> f64 {
        self.cutoff_lateral
    }

    fn pixel_size(&self) -> Option<f64> {
        self.pixel_size.map(|(lateral, _)| lateral)
    }

    fn attenuation_enabled(&self) -> bool {
        self.attenuation_enabled
    }

    fn otf_at(&self, band: usize, lateral: f64, axial_px: f64, use_attenuation: bool) -> Complex64 {
        let axial_cpp = self.pixel_size.map_or(0.0, |(_, axial)| axial);
        self.value(band, lateral, (axial_px * axial_cpp).abs(), use_attenuation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn test_otf() -> OtfProvider3D {
        OtfProvider3D::from_estimate(1.2, 525.0, 0.8, 1.33).unwrap()
    }

    #[test]
    fn test_axial_cutoff_formula() {
        let expected = (1.33 - (1.33f64 * 1.33 - 1.2 * 1.2).sqrt()) / 0.525;
        assert_relative_eq!(test_otf().cutoff_axial(), expected, epsilon = 1e-12);
        assert!(OtfProvider3D::from_estimate(1.4, 525.0, 0.8, 1.33).is_err());
    }

    #[test]
    fn test_kz_zero_matches_2d_estimate() {
        let otf3 = test_otf();
        let otf2 = OtfProvider::from_estimate(1.2, 525.0, 0.8).unwrap();
        for f in [0.0, 0.7, 1.9, 3.3] {
            let a = otf3.get_otf_val(0, f, 0.0, false).unwrap().re;
            let b = otf2.get_otf_val(0, f, false).unwrap().re;
            assert_relative_eq!(a, b, epsilon = 2e-3);
        }
    }

    #[test]
    fn test_axial_support_shape() {
        let otf = test_otf();
        let cutoff = OtfModel::<Ix3>::cutoff(&otf);
        let ax = otf.cutoff_axial();
        // Widest axial support at half the lateral cutoff, none at the edge
        let mid = otf.get_otf_val(0, 0.5 * cutoff, 0.5 * ax, false).unwrap().re;
        assert!(mid > 0.0);
        assert_eq!(otf.get_otf_val(0, 0.5 * cutoff, ax, false).unwrap().re, 0.0);
        let near_edge = otf.get_otf_val(0, 0.95 * cutoff, 0.5 * ax, false).unwrap().re;
        assert_eq!(near_edge, 0.0);
        // Symmetric in kz
        assert_eq!(
            otf.get_otf_val(1, 1.0, 0.2, false).unwrap(),
            otf.get_otf_val(1, 1.0, -0.2, false).unwrap()
        );
    }

    #[test]
    fn test_projection_keeps_settings() {
        let mut otf = test_otf();
        otf.set_pixel_size(0.05, 0.1).unwrap();
        assert!(otf.set_attenuation_enabled(true).is_err());
        otf.set_attenuation(0.9, 0.3).unwrap();
        otf.set_attenuation_enabled(true).unwrap();

        let flat = otf.projected().unwrap();
        assert_eq!(OtfModel::<ndarray::Ix2>::pixel_size(&flat), Some(0.05));
        assert!(OtfModel::<ndarray::Ix2>::attenuation_enabled(&flat));
        assert_relative_eq!(flat.attenuation_factor(0.0), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_raster_axial_planes() {
        let mut otf = test_otf();
        let cutoff = OtfModel::<Ix3>::cutoff(&otf);
        otf.set_pixel_size(cutoff / 8.0, otf.cutoff_axial() / 4.0).unwrap();

        let mut vec = Array3::<Complex64>::zeros((8, 32, 32));
        otf.write_otf_vector(&mut vec, 0, 0.0, 0.0).unwrap();
        assert_relative_eq!(vec[[0, 0, 0]].re, 1.0, epsilon = 1e-12);
        // kz = -4 sits exactly at the axial cutoff
        assert_eq!(vec[[4, 0, 4]].re, 0.0);
        assert!(vec[[1, 0, 4]].re > 0.0);
        assert_eq!(vec[[1, 0, 4]], vec[[7, 0, 4]]);
    }

    #[test]
    fn test_record_round_trip() {
        let otf = test_otf();
        let record = otf.to_record();
        let loaded = OtfProvider3D::load_from_config(&record).unwrap();
        let a = loaded.get_otf_val(2, 1.3, 0.4, false).unwrap();
        let b = otf.get_otf_val(2, 1.3, 0.4, false).unwrap();
        assert_relative_eq!(a.re, b.re, epsilon = 1e-12);
        assert!(OtfProvider::load_from_config(&record).is_err());
    }
}
