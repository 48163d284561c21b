//! Persisted parameter and OTF records (JSON)
//!
//! Records are plain serde structs. Converting a record into the live types
//! validates completeness and reports [`SimError::Configuration`] for
//! anything missing or inconsistent.

use std::path::Path;

use num_complex::Complex64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::otf::Attenuation;
use crate::param::{FilterPlan, ImgSeq, ModulationRange, SimParam};

/// Write any record as pretty-printed JSON
pub fn save_to_file<T: Serialize>(record: &T, path: &Path) -> SimResult<()> {
    let json = serde_json::to_string_pretty(record)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Read a JSON record
pub fn load_from_file<T: DeserializeOwned>(path: &Path) -> SimResult<T> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Measured OTF samples.
///
/// `values` holds one entry per band; each is the flattened sample table
/// (`[axial][lateral]` order for 3D) as `[re, im]` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtfRecord {
    pub bands: usize,
    pub samples_lateral: usize,
    pub cycles_per_micron_lateral: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples_axial: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycles_per_micron_axial: Option<f64>,
    pub na: f64,
    pub emission_nm: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refractive_index: Option<f64>,
    pub values: Vec<Vec<[f64; 2]>>,
}

impl OtfRecord {
    pub(crate) fn from_tables(
        na: f64,
        emission_nm: f64,
        spacing_lateral: f64,
        tables: &[Vec<Complex64>],
        axial: Option<(usize, f64)>,
    ) -> Self {
        let len = tables.first().map_or(0, Vec::len);
        let samples_lateral = match axial {
            Some((n, _)) if n > 0 => len / n,
            _ => len,
        };
        Self {
            bands: tables.len(),
            samples_lateral,
            cycles_per_micron_lateral: spacing_lateral,
            samples_axial: axial.map(|(n, _)| n),
            cycles_per_micron_axial: axial.map(|(_, c)| c),
            na,
            emission_nm,
            refractive_index: None,
            values: tables
                .iter()
                .map(|t| t.iter().map(|v| [v.re, v.im]).collect())
                .collect(),
        }
    }

    /// Per-band complex tables, each checked to hold `expected_len` samples.
    ///
    /// # Errors
    /// * `SimError::Configuration` - If the band count or a table length is off
    pub fn band_tables(&self, expected_len: usize) -> SimResult<Vec<Vec<Complex64>>> {
        if self.bands == 0 || self.values.len() != self.bands {
            return Err(SimError::Configuration(format!(
                "OTF record declares {} bands but holds {}",
                self.bands,
                self.values.len()
            )));
        }
        self.values
            .iter()
            .enumerate()
            .map(|(band, table)| {
                if table.len() != expected_len {
                    return Err(SimError::Configuration(format!(
                        "OTF band {band} has {} samples, expected {expected_len}",
                        table.len()
                    )));
                }
                Ok(table.iter().map(|[re, im]| Complex64::new(*re, *im)).collect())
            })
            .collect()
    }
}

/// Fitted pattern parameters of one direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirRecord {
    /// Outer-band shift vector in frequency pixels
    pub shift: [f64; 2],
    pub phase_offset: f64,
    /// Modulation of bands `1..bands`
    pub modulations: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phases: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttenuationRecord {
    pub strength: f64,
    pub fwhm: f64,
}

fn default_apo_cutoff() -> f64 {
    2.0
}

fn default_apo_bend() -> f64 {
    0.9
}

fn default_true() -> bool {
    true
}

fn default_modulation_range() -> [f64; 2] {
    let range = ModulationRange::default();
    [range.low, range.high]
}

/// Everything needed to reproduce a reconstruction without re-estimating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimParamRecord {
    pub nr_bands: usize,
    pub nr_dirs: usize,
    pub nr_phases: usize,
    #[serde(default)]
    pub img_seq: ImgSeq,
    pub img_size: usize,
    pub pxl_size_micron: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pxl_size_z_micron: Option<f64>,
    #[serde(default)]
    pub filter: FilterPlan,
    #[serde(default = "default_apo_cutoff")]
    pub apo_cutoff: f64,
    #[serde(default = "default_apo_bend")]
    pub apo_bend: f64,
    #[serde(default = "default_true")]
    pub otf_before_shift: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attenuation: Option<AttenuationRecord>,
    #[serde(default = "default_modulation_range")]
    pub modulation_range: [f64; 2],
    #[serde(default)]
    pub background: f64,
    #[serde(default)]
    pub fade_border_px: usize,
    #[serde(default = "default_true")]
    pub clip_output: bool,
    pub dirs: Vec<DirRecord>,
}

impl SimParamRecord {
    pub fn from_param(param: &SimParam) -> Self {
        let range = param.modulation_range();
        Self {
            nr_bands: param.nr_bands(),
            nr_dirs: param.nr_dirs(),
            nr_phases: param.nr_phases(),
            img_seq: param.img_seq(),
            img_size: param.img_size(),
            pxl_size_micron: param.pxl_size(),
            depth: param.is_3d().then_some(param.depth()),
            pxl_size_z_micron: param.pxl_size_z(),
            filter: param.filter(),
            apo_cutoff: param.apo_cutoff(),
            apo_bend: param.apo_bend(),
            otf_before_shift: param.otf_before_shift(),
            attenuation: param.attenuation().map(|a| AttenuationRecord {
                strength: a.strength,
                fwhm: a.fwhm,
            }),
            modulation_range: [range.low, range.high],
            background: param.background(),
            fade_border_px: param.fade_border(),
            clip_output: param.clip_output(),
            dirs: param
                .dirs()
                .map(|dir| DirRecord {
                    shift: [dir.shift().0, dir.shift().1],
                    phase_offset: dir.phase_offset(),
                    modulations: dir.modulations()[1..].to_vec(),
                    phases: dir.has_explicit_phases().then(|| dir.phases()),
                })
                .collect(),
        }
    }

    /// Build and validate the live parameter set.
    ///
    /// # Errors
    /// * `SimError::Configuration` - If directions, modulations, phases or the
    ///   3D description are incomplete or inconsistent
    pub fn to_param(&self) -> SimResult<SimParam> {
        let config_err = |e: SimError| SimError::Configuration(e.to_string());

        let mut param = match (self.depth, self.pxl_size_z_micron) {
            (Some(depth), Some(dz)) => SimParam::new_3d(
                self.nr_bands,
                self.nr_dirs,
                self.nr_phases,
                self.img_size,
                self.pxl_size_micron,
                depth,
                dz,
            ),
            (None, None) => SimParam::new_2d(
                self.nr_bands,
                self.nr_dirs,
                self.nr_phases,
                self.img_size,
                self.pxl_size_micron,
            ),
            _ => {
                return Err(SimError::Configuration(
                    "3D parameters need both depth and axial pixel size".to_string(),
                ))
            }
        }
        .map_err(config_err)?;

        if self.dirs.len() != self.nr_dirs {
            return Err(SimError::Configuration(format!(
                "record lists {} directions, expected {}",
                self.dirs.len(),
                self.nr_dirs
            )));
        }

        param.set_img_seq(self.img_seq);
        param.set_filter(self.filter).map_err(config_err)?;
        param
            .set_apodization(self.apo_cutoff, self.apo_bend)
            .map_err(config_err)?;
        param.set_otf_before_shift(self.otf_before_shift);
        if let Some(att) = &self.attenuation {
            let att = Attenuation::new(att.strength, att.fwhm).map_err(config_err)?;
            param.set_attenuation(Some(att));
        }
        let [low, high] = self.modulation_range;
        param.set_modulation_range(ModulationRange::new(low, high).map_err(config_err)?);
        param.set_background(self.background);
        param.set_fade_border(self.fade_border_px);
        param.set_clip_output(self.clip_output);

        for (i, record) in self.dirs.iter().enumerate() {
            if record.modulations.len() != self.nr_bands - 1 {
                return Err(SimError::Configuration(format!(
                    "direction {i} has {} modulations, expected {}",
                    record.modulations.len(),
                    self.nr_bands - 1
                )));
            }
            let dir = param.dir_mut(i)?;
            dir.set_shift(record.shift[0], record.shift[1]);
            dir.set_phase_offset(record.phase_offset);
            for (band, &m) in record.modulations.iter().enumerate() {
                dir.set_modulation(band + 1, m).map_err(config_err)?;
            }
            if let Some(phases) = &record.phases {
                dir.set_phases_explicit(phases.clone()).map_err(config_err)?;
            }
        }
        Ok(param)
    }
}
