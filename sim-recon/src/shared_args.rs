//! Command line arguments shared by the binaries.

use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use crate::error::{SimError, SimResult};
use crate::param::FilterPlan;

/// Optics used when no measured OTF is given
#[derive(Debug, Clone, Args)]
pub struct OpticsArgs {
    /// Numerical aperture of the objective
    #[arg(long, default_value_t = 1.4)]
    pub na: f64,

    /// Emission wavelength in nanometers
    #[arg(long, default_value_t = 525.0)]
    pub emission_nm: f64,

    /// High-frequency attenuation of the estimated OTF, in [0, 1]
    #[arg(long, default_value_t = 0.7)]
    pub curvature: f64,

    /// Immersion refractive index (3D only)
    #[arg(long, default_value_t = 1.518)]
    pub refractive_index: f64,
}

/// Filter applied when combining bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FilterStyle {
    /// Wiener filter on the combined spectrum
    Wiener,
    /// Richardson-Lucy on raw frames, then Wiener
    RlInput,
    /// Richardson-Lucy on the combined spectrum
    RlOutput,
    /// Richardson-Lucy on raw frames and on the combined spectrum
    RlBoth,
}

impl std::fmt::Display for FilterStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterStyle::Wiener => write!(f, "wiener"),
            FilterStyle::RlInput => write!(f, "rl-input"),
            FilterStyle::RlOutput => write!(f, "rl-output"),
            FilterStyle::RlBoth => write!(f, "rl-both"),
        }
    }
}

impl FilterStyle {
    pub fn to_plan(self, wiener_param: f64, iterations: usize) -> FilterPlan {
        match self {
            FilterStyle::Wiener => FilterPlan::Wiener { wiener_param },
            FilterStyle::RlInput => FilterPlan::RlInput {
                iterations,
                wiener_param,
            },
            FilterStyle::RlOutput => FilterPlan::RlOutput { iterations },
            FilterStyle::RlBoth => FilterPlan::RlBoth { iterations },
        }
    }
}

/// Size the global rayon pool; 0 keeps rayon's default.
pub fn init_threads(threads: usize) -> SimResult<()> {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| SimError::InvalidState(format!("thread pool: {e}")))?;
    }
    info!("Using {} worker threads", rayon::current_num_threads());
    Ok(())
}

/// Progress bar in the style used by every binary
pub fn progress_bar(message: &str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("=>-"));
    }
    bar.set_message(message.to_string());
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_style_plans() {
        assert_eq!(
            FilterStyle::RlInput.to_plan(0.1, 4),
            FilterPlan::RlInput {
                iterations: 4,
                wiener_param: 0.1
            }
        );
        assert_eq!(FilterStyle::RlBoth.to_plan(0.1, 4), FilterPlan::RlBoth { iterations: 4 });
        assert_eq!(FilterStyle::RlOutput.to_string(), "rl-output");
    }
}
