//! Raw frame ordering conventions
//!
//! A raw dataset is a flat list of frames; the convention names the nesting
//! order of phase (P), angle (A) and z-plane (Z), fastest index first.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Frame index convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImgSeq {
    /// phase fastest, then angle, then z
    #[default]
    Paz,
    /// phase fastest, then z, then angle
    Pza,
    /// z fastest, then angle, then phase
    Zap,
}

impl ImgSeq {
    /// Linear frame index of (phase, angle, z).
    pub fn calc_pos(
        &self,
        pha: usize,
        ang: usize,
        z: usize,
        pha_max: usize,
        ang_max: usize,
        z_max: usize,
    ) -> usize {
        match self {
            ImgSeq::Paz => pha + ang * pha_max + z * pha_max * ang_max,
            ImgSeq::Pza => pha + z * pha_max + ang * pha_max * z_max,
            ImgSeq::Zap => z + ang * z_max + pha * z_max * ang_max,
        }
    }

    /// Linear frame index of (phase, angle, z) in time point `t`.
    #[allow(clippy::too_many_arguments)]
    pub fn calc_pos_t(
        &self,
        pha: usize,
        ang: usize,
        z: usize,
        t: usize,
        pha_max: usize,
        ang_max: usize,
        z_max: usize,
    ) -> usize {
        self.calc_pos(pha, ang, z, pha_max, ang_max, z_max) + pha_max * z_max * ang_max * t
    }

    pub fn name(&self) -> &'static str {
        match self {
            ImgSeq::Paz => "paz",
            ImgSeq::Pza => "pza",
            ImgSeq::Zap => "zap",
        }
    }
}

impl fmt::Display for ImgSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ImgSeq {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "paz" => Ok(ImgSeq::Paz),
            "pza" => Ok(ImgSeq::Pza),
            "zap" => Ok(ImgSeq::Zap),
            other => Err(SimError::InvalidParameter(format!(
                "unknown frame sequence '{other}', expected paz, pza or zap"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ImgSeq; 3] = [ImgSeq::Paz, ImgSeq::Pza, ImgSeq::Zap];

    #[test]
    fn test_boundary_indices() {
        let (p, a, z) = (5, 3, 7);
        for seq in ALL {
            assert_eq!(seq.calc_pos(0, 0, 0, p, a, z), 0);
            assert_eq!(seq.calc_pos(p - 1, a - 1, z - 1, p, a, z), p * a * z - 1);
        }
    }

    #[test]
    fn test_documented_formulas() {
        assert_eq!(ImgSeq::Paz.calc_pos(2, 1, 3, 5, 3, 4), 2 + 5 + 3 * 15);
        assert_eq!(ImgSeq::Pza.calc_pos(2, 1, 3, 5, 3, 4), 2 + 3 * 5 + 5 * 4);
        assert_eq!(ImgSeq::Zap.calc_pos(2, 1, 3, 5, 3, 4), 3 + 4 + 2 * 12);
    }

    #[test]
    fn test_every_frame_hit_once() {
        let (p, a, z) = (3, 2, 4);
        for seq in ALL {
            let mut seen = vec![false; p * a * z];
            for pha in 0..p {
                for ang in 0..a {
                    for zz in 0..z {
                        let pos = seq.calc_pos(pha, ang, zz, p, a, z);
                        assert!(!seen[pos], "{seq} hits {pos} twice");
                        seen[pos] = true;
                    }
                }
            }
        }
    }

    #[test]
    fn test_time_offset() {
        let base = ImgSeq::Zap.calc_pos(1, 1, 1, 3, 3, 2);
        assert_eq!(ImgSeq::Zap.calc_pos_t(1, 1, 1, 2, 3, 3, 2), base + 2 * 18);
        assert_eq!(ImgSeq::Paz.calc_pos_t(2, 2, 1, 1, 3, 3, 2), 2 * 18 - 1);
    }

    #[test]
    fn test_parse_and_serde() {
        assert_eq!("PZA".parse::<ImgSeq>().unwrap(), ImgSeq::Pza);
        assert!("pap".parse::<ImgSeq>().is_err());
        let json = serde_json::to_string(&ImgSeq::Zap).unwrap();
        assert_eq!(json, "\"zap\"");
        let back: ImgSeq = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ImgSeq::Zap);
    }
}
