//! Reconstruct a super-resolved image from a directory of raw SIM frames.
//!
//! Usage:
//! ```
//! cargo run --release --bin sim_reconstruct -- frames/ --bands 3 --dirs 3 --phases 5 \
//!     --pxl-size 0.08 --output recon.png
//! ```

use std::path::{Path, PathBuf};

use clap::Parser;
use log::{info, warn};
use ndarray::{Array2, Axis};
use sim_recon::algorithm::{sim2d, sim3d, ReconstructionOutput};
use sim_recon::config::{load_from_file, save_to_file, OtfRecord, SimParamRecord};
use sim_recon::io::{load_frames, save_png16};
use sim_recon::shared_args::{init_threads, progress_bar, FilterStyle, OpticsArgs};
use sim_recon::{ImgSeq, OtfModel, OtfProvider, OtfProvider3D, SimDimension, SimError, SimParam, SimResult};

/// Command line arguments for reconstruction
#[derive(Parser, Debug)]
#[command(author, version, about = "Structured illumination reconstruction", long_about = None)]
struct Args {
    /// Directory of raw frames, read in lexical order
    input: PathBuf,

    /// Output image; 3D results get one file per plane
    #[arg(short, long, default_value = "reconstruction.png")]
    output: PathBuf,

    /// Also write the filtered widefield image here
    #[arg(long)]
    widefield: Option<PathBuf>,

    /// Load parameters from JSON instead of the geometry options
    #[arg(long)]
    param: Option<PathBuf>,

    /// Write the final parameters as JSON
    #[arg(long)]
    save_param: Option<PathBuf>,

    /// Measured OTF as JSON; estimated from the optics otherwise
    #[arg(long)]
    otf: Option<PathBuf>,

    #[command(flatten)]
    optics: OpticsArgs,

    #[arg(long, default_value_t = 3)]
    bands: usize,

    #[arg(long, default_value_t = 3)]
    dirs: usize,

    #[arg(long, default_value_t = 5)]
    phases: usize,

    /// Lateral pixel size in microns
    #[arg(long, default_value_t = 0.08)]
    pxl_size: f64,

    /// Planes per stack; more than one selects 3D reconstruction
    #[arg(long, default_value_t = 1)]
    depth: usize,

    /// Axial pixel size in microns
    #[arg(long, default_value_t = 0.125)]
    pxl_size_z: f64,

    /// Frame ordering (paz, pza, zap)
    #[arg(long, default_value_t = ImgSeq::Paz)]
    img_seq: ImgSeq,

    #[arg(long, default_value_t = FilterStyle::Wiener)]
    filter: FilterStyle,

    #[arg(long, default_value_t = 0.05)]
    wiener_param: f64,

    /// Richardson-Lucy iterations for the RL filter styles
    #[arg(long, default_value_t = 5)]
    rl_iterations: usize,

    #[arg(long, default_value_t = 2.0)]
    apo_cutoff: f64,

    #[arg(long, default_value_t = 0.9)]
    apo_bend: f64,

    /// Constant camera background subtracted from every frame
    #[arg(long, default_value_t = 0.0)]
    background: f64,

    /// Width of the cosine edge fade in pixels
    #[arg(long, default_value_t = 15)]
    fade_border: usize,

    /// Use the shifts, phases and modulations from --param as they are
    #[arg(long)]
    skip_estimation: bool,

    /// Measure every frame's absolute phase instead of assuming even steps
    #[arg(long)]
    wicker_phases: bool,

    /// Stretch output to the full 16-bit range
    #[arg(long)]
    scale: bool,

    /// Worker threads
    #[arg(long, default_value_t = num_cpus::get())]
    threads: usize,
}

fn build_param(args: &Args, frame_size: usize) -> SimResult<SimParam> {
    let mut param = match &args.param {
        Some(path) => load_from_file::<SimParamRecord>(path)?.to_param()?,
        None if args.depth > 1 => SimParam::new_3d(
            args.bands,
            args.dirs,
            args.phases,
            frame_size,
            args.pxl_size,
            args.depth,
            args.pxl_size_z,
        )?,
        None => SimParam::new_2d(args.bands, args.dirs, args.phases, frame_size, args.pxl_size)?,
    };
    if args.param.is_none() {
        param.set_img_seq(args.img_seq);
        param.set_filter(args.filter.to_plan(args.wiener_param, args.rl_iterations))?;
        param.set_apodization(args.apo_cutoff, args.apo_bend)?;
        param.set_background(args.background);
        param.set_fade_border(args.fade_border);
    }
    if param.img_size() != frame_size {
        return Err(SimError::DimensionMismatch(format!(
            "frames are {frame_size} px, parameters describe {} px",
            param.img_size()
        )));
    }
    Ok(param)
}

fn plane_path(output: &Path, z: usize) -> PathBuf {
    let stem = output.file_stem().and_then(|s| s.to_str()).unwrap_or("reconstruction");
    output.with_file_name(format!("{stem}_z{z:03}.png"))
}

fn save_output<D: SimDimension>(
    result: &ReconstructionOutput<D>,
    args: &Args,
    clip: bool,
) -> SimResult<()> {
    let split_planes = |data: &ndarray::Array<f64, D>| -> SimResult<Vec<Array2<f64>>> {
        let dyn_view = data.view().into_dyn();
        match dyn_view.ndim() {
            2 => Ok(vec![dyn_view
                .into_dimensionality::<ndarray::Ix2>()
                .map_err(|e| SimError::DimensionMismatch(e.to_string()))?
                .to_owned()]),
            _ => Ok(dyn_view
                .into_dimensionality::<ndarray::Ix3>()
                .map_err(|e| SimError::DimensionMismatch(e.to_string()))?
                .axis_iter(Axis(0))
                .map(|p| p.to_owned())
                .collect()),
        }
    };

    let write_all = |data: &ndarray::Array<f64, D>, path: &Path| -> SimResult<()> {
        let planes = split_planes(data)?;
        if planes.len() == 1 {
            save_png16(&planes[0], path, clip, args.scale)?;
            info!("Wrote {}", path.display());
        } else {
            for (z, plane) in planes.iter().enumerate() {
                save_png16(plane, &plane_path(path, z), clip, args.scale)?;
            }
            info!("Wrote {} planes next to {}", planes.len(), path.display());
        }
        Ok(())
    };

    write_all(&result.image, &args.output)?;
    if let Some(path) = &args.widefield {
        write_all(&result.widefield, path)?;
    }
    Ok(())
}

fn run(args: Args) -> SimResult<()> {
    init_threads(args.threads)?;

    let frames = load_frames(&args.input)?;
    let (height, width) = frames[0].dim();
    if height != width {
        return Err(SimError::DimensionMismatch(format!(
            "frames must be square, got {width}x{height}"
        )));
    }
    let mut param = build_param(&args, width)?;
    info!(
        "{} frames, {} bands, {} directions, {} phases, {}",
        frames.len(),
        param.nr_bands(),
        param.nr_dirs(),
        param.nr_phases(),
        if param.is_3d() { "3D" } else { "2D" }
    );
    let estimate = !(args.skip_estimation && args.param.is_some());
    if args.skip_estimation && args.param.is_none() {
        warn!("--skip-estimation needs --param; estimating anyway");
    }

    if param.is_3d() {
        let mut otf = match &args.otf {
            Some(path) => OtfProvider3D::load_from_config(&load_from_file::<OtfRecord>(path)?)?,
            None => OtfProvider3D::from_estimate(
                args.optics.na,
                args.optics.emission_nm,
                args.optics.curvature,
                args.optics.refractive_index,
            )?,
        };
        param.configure_otf_3d(&mut otf)?;
        info!("Cutoff {:.1} frequency pixels", OtfModel::<ndarray::Ix3>::cutoff_pixels(&otf)?);

        let input = sim3d::prepare_input(&frames, &param)?;
        if estimate {
            let bar = progress_bar("estimating");
            let options = sim3d::EstimationOptions3d {
                wicker_phases: args.wicker_phases,
                ..Default::default()
            };
            sim3d::estimate_and_apply(&mut param, &otf, &input, &options, &bar)?;
        }
        let bar = progress_bar("reconstructing");
        let result = sim3d::run_reconstruction(&param, &otf, &input, &bar)?;
        save_output(&result, &args, param.clip_output())?;
    } else {
        let mut otf = match &args.otf {
            Some(path) => OtfProvider::load_from_config(&load_from_file::<OtfRecord>(path)?)?,
            None => OtfProvider::from_estimate(
                args.optics.na,
                args.optics.emission_nm,
                args.optics.curvature,
            )?
            .with_bands(param.nr_bands())?,
        };
        param.configure_otf(&mut otf)?;
        info!("Cutoff {:.1} frequency pixels", OtfModel::<ndarray::Ix2>::cutoff_pixels(&otf)?);

        let input = sim2d::prepare_input(&frames, &param)?;
        if estimate {
            let bar = progress_bar("estimating");
            let options = sim2d::EstimationOptions {
                wicker_phases: args.wicker_phases,
                ..Default::default()
            };
            sim2d::estimate_and_apply(&mut param, &otf, &input, &options, &bar)?;
        }
        let bar = progress_bar("reconstructing");
        let result = sim2d::run_reconstruction(&param, &otf, &input, &bar)?;
        save_output(&result, &args, param.clip_output())?;
    }

    if let Some(path) = &args.save_param {
        save_to_file(&SimParamRecord::from_param(&param), path)?;
        info!("Saved parameters to {}", path.display());
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Reconstruction failed: {e}");
        std::process::exit(1);
    }
}
