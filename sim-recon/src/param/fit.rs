//! Parameter estimation results and fit quality

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of an estimated modulation depth.
///
/// A weak fit is reported, never raised as an error: the modulation is
/// clamped into the configured range and reconstruction continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FitQuality {
    NoFit,
    VeryLow,
    Weak,
    Usable,
    Good,
}

impl FitQuality {
    pub fn classify(modulation: f64) -> Self {
        if modulation >= 0.7 {
            FitQuality::Good
        } else if modulation >= 0.5 {
            FitQuality::Usable
        } else if modulation >= 0.3 {
            FitQuality::Weak
        } else if modulation >= 0.1 {
            FitQuality::VeryLow
        } else {
            FitQuality::NoFit
        }
    }

    /// True for fits that should be looked at before trusting the result
    pub fn is_weak(&self) -> bool {
        *self <= FitQuality::Weak
    }
}

impl fmt::Display for FitQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FitQuality::Good => "good",
            FitQuality::Usable => "usable",
            FitQuality::Weak => "weak",
            FitQuality::VeryLow => "very low",
            FitQuality::NoFit => "no fit",
        };
        f.write_str(s)
    }
}

/// Estimated pattern parameters of one direction.
///
/// Per-band vectors are indexed by band; entry 0 is the DC band (modulation
/// 1.0, quality `Good`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEstimationResult {
    pub direction: usize,
    /// Outer-band shift vector in frequency pixels
    pub shift: (f64, f64),
    /// Global phase offset in radians
    pub phase_offset: f64,
    /// Measured modulations before clamping
    pub raw_modulations: Vec<f64>,
    /// Modulations after clamping into the configured range
    pub modulations: Vec<f64>,
    pub quality: Vec<FitQuality>,
    /// Absolute per-frame phases, when measured
    pub explicit_phases: Option<Vec<f64>>,
}

impl ParameterEstimationResult {
    /// Worst quality over the non-DC bands
    pub fn worst_quality(&self) -> FitQuality {
        self.quality
            .iter()
            .skip(1)
            .copied()
            .min()
            .unwrap_or(FitQuality::Good)
    }

    /// Length of the outer-band shift vector
    pub fn shift_length(&self) -> f64 {
        self.shift.0.hypot(self.shift.1)
    }

    /// Pattern angle in radians
    pub fn angle(&self) -> f64 {
        self.shift.1.atan2(self.shift.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        assert_eq!(FitQuality::classify(0.95), FitQuality::Good);
        assert_eq!(FitQuality::classify(0.7), FitQuality::Good);
        assert_eq!(FitQuality::classify(0.55), FitQuality::Usable);
        assert_eq!(FitQuality::classify(0.3), FitQuality::Weak);
        assert_eq!(FitQuality::classify(0.12), FitQuality::VeryLow);
        assert_eq!(FitQuality::classify(0.01), FitQuality::NoFit);
        assert!(FitQuality::Weak.is_weak());
        assert!(!FitQuality::Usable.is_weak());
    }

    #[test]
    fn test_worst_quality_skips_dc() {
        let result = ParameterEstimationResult {
            direction: 0,
            shift: (3.0, 4.0),
            phase_offset: 0.0,
            raw_modulations: vec![1.0, 0.8, 0.4],
            modulations: vec![1.0, 0.8, 0.4],
            quality: vec![FitQuality::Good, FitQuality::Good, FitQuality::Weak],
            explicit_phases: None,
        };
        assert_eq!(result.worst_quality(), FitQuality::Weak);
        assert_eq!(result.shift_length(), 5.0);
    }
}
