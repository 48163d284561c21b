//! sim-recon - Structured illumination microscopy reconstruction
//!
//! Turns a set of raw frames, taken under a sinusoidal illumination pattern
//! at several directions and phases, into an image with up to twice the
//! lateral resolution of the widefield microscope.
//!
//! - **OTF models** - Estimated or measured 2D and 3D optical transfer
//!   functions, rastered onto spectra at arbitrary sub-pixel centers
//! - **Band separation** - Unmixing of the phase-shifted frames into the
//!   spectral bands of the illumination
//! - **Pattern estimation** - Cross-correlation of bands to recover shift,
//!   phase and modulation of every direction
//! - **Reconstruction** - Band shifting, Wiener or Richardson-Lucy filtering,
//!   apodization
//! - **Synthetic data** - Simulated acquisitions for tests and benchmarks
//!
//! # Example
//!
//! ```no_run
//! use sim_recon::algorithm::{sim2d, NoProgress};
//! use sim_recon::synthetic::{generate_2d, SyntheticConfig};
//! use sim_recon::OtfProvider;
//!
//! let data = generate_2d(&SyntheticConfig::default())?;
//! let mut param = data.param.clone();
//! let mut otf = OtfProvider::from_estimate(1.4, 525.0, 0.7)?;
//! param.configure_otf(&mut otf)?;
//!
//! let input = sim2d::prepare_input(&data.frames, &param)?;
//! sim2d::estimate_and_apply(&mut param, &otf, &input, &Default::default(), &NoProgress)?;
//! let result = sim2d::run_reconstruction(&param, &otf, &input, &NoProgress)?;
//! assert_eq!(result.image.dim(), (512, 512));
//! # Ok::<(), sim_recon::SimError>(())
//! ```

pub mod algorithm;
pub mod band_separation;
pub mod config;
pub mod correlation;
pub mod error;
pub mod io;
pub mod otf;
pub mod parallel;
pub mod param;
pub mod rl_deconvolution;
pub mod shared_args;
pub mod sim_utils;
pub mod synthetic;
pub mod vector;
pub mod wiener;

pub use error::{SimError, SimResult};
pub use otf::{OtfModel, OtfProvider, OtfProvider3D};
pub use param::{FilterPlan, ImgSeq, SimParam};
pub use vector::{SimDimension, Spectrum};
