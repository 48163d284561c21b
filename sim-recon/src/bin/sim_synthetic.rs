//! Generate a synthetic SIM acquisition and check parameter recovery.
//!
//! With `--output-dir`, writes `frame_NNNN.png` in acquisition order plus
//! `truth.json`, a parameter file carrying the true pattern that
//! `sim_reconstruct --param` accepts. With `--verify`, runs the estimation
//! on the generated frames and reports its error against the true pattern.
//!
//! Usage:
//! ```
//! cargo run --release --bin sim_synthetic -- --output-dir frames/ --sample filaments --verify
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use log::info;
use sim_recon::algorithm::{sim2d, sim3d};
use sim_recon::config::{save_to_file, SimParamRecord};
use sim_recon::io::save_png16;
use sim_recon::shared_args::{init_threads, progress_bar, OpticsArgs};
use sim_recon::synthetic::{generate_2d, generate_3d, Sample, SyntheticConfig, SyntheticDataset};
use sim_recon::{ImgSeq, OtfProvider, OtfProvider3D, SimResult};

/// Brightest value of a noise-free dataset once quantized
const NOISE_FREE_PEAK: f64 = 60000.0;

/// Ground truth structure to draw
#[derive(Debug, Clone, Copy, ValueEnum)]
enum SampleArg {
    Beads,
    Filaments,
    Blobs,
}

impl From<SampleArg> for Sample {
    fn from(arg: SampleArg) -> Self {
        match arg {
            SampleArg::Beads => Sample::Beads,
            SampleArg::Filaments => Sample::Filaments,
            SampleArg::Blobs => Sample::Blobs,
        }
    }
}

/// Command line arguments for synthetic data generation
#[derive(Parser, Debug)]
#[command(author, version, about = "Synthetic structured illumination data", long_about = None)]
struct Args {
    /// Directory for frames and truth.json
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Estimate the pattern from the frames and report the error
    #[arg(long)]
    verify: bool,

    #[command(flatten)]
    optics: OpticsArgs,

    #[arg(long, default_value_t = 256)]
    size: usize,

    #[arg(long, default_value_t = 0.08)]
    pxl_size: f64,

    #[arg(long, default_value_t = 1)]
    depth: usize,

    #[arg(long, default_value_t = 0.125)]
    pxl_size_z: f64,

    #[arg(long, default_value_t = 3)]
    bands: usize,

    #[arg(long, default_value_t = 3)]
    dirs: usize,

    #[arg(long, default_value_t = 5)]
    phases: usize,

    /// Modulation depth of the non-DC bands
    #[arg(long, default_value_t = 1.0)]
    modulation: f64,

    /// Pattern frequency as a fraction of the OTF cutoff
    #[arg(long, default_value_t = 0.9)]
    shift_fraction: f64,

    #[arg(long, value_enum, default_value_t = SampleArg::Beads)]
    sample: SampleArg,

    /// Number of structures drawn
    #[arg(long, default_value_t = 400)]
    count: usize,

    /// Photon count of the brightest pixel; noise-free when omitted
    #[arg(long)]
    photons: Option<f64>,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Frame ordering (paz, pza, zap)
    #[arg(long, default_value_t = ImgSeq::Paz)]
    img_seq: ImgSeq,

    /// Worker threads
    #[arg(long, default_value_t = num_cpus::get())]
    threads: usize,
}

fn write_dataset(data: &SyntheticDataset, dir: &Path, noise_free: bool) -> SimResult<()> {
    std::fs::create_dir_all(dir)?;
    // Noise-free frames share one gain so they survive 16-bit quantization
    let gain = if noise_free {
        let peak = data
            .frames
            .iter()
            .flat_map(|f| f.iter())
            .fold(0.0f64, |m, &v| m.max(v));
        if peak > 0.0 {
            NOISE_FREE_PEAK / peak
        } else {
            1.0
        }
    } else {
        1.0
    };
    for (i, frame) in data.frames.iter().enumerate() {
        let path = dir.join(format!("frame_{i:04}.png"));
        save_png16(&frame.mapv(|v| v * gain), &path, true, false)?;
    }
    let truth = dir.join("truth.json");
    save_to_file(&SimParamRecord::from_param(&data.true_param()?), &truth)?;
    info!(
        "Wrote {} frames and {} to {}",
        data.frames.len(),
        truth.display(),
        dir.display()
    );
    Ok(())
}

fn verify(data: &SyntheticDataset, config: &SyntheticConfig) -> SimResult<()> {
    let mut param = data.param.clone();
    param.set_fade_border(config.size / 16);
    let results = if config.is_3d() {
        let mut otf = OtfProvider3D::from_estimate(
            config.na,
            config.emission_nm,
            config.curvature,
            config.refractive_index,
        )?;
        param.configure_otf_3d(&mut otf)?;
        let input = sim3d::prepare_input(&data.frames, &param)?;
        let bar = progress_bar("estimating");
        sim3d::estimate_parameters(&param, &otf, &input, &Default::default(), &bar)?
    } else {
        let mut otf = OtfProvider::from_estimate(config.na, config.emission_nm, config.curvature)?
            .with_bands(config.bands)?;
        param.configure_otf(&mut otf)?;
        let input = sim2d::prepare_input(&data.frames, &param)?;
        let bar = progress_bar("estimating");
        sim2d::estimate_parameters(&param, &otf, &input, &Default::default(), &bar)?.results
    };

    for (result, truth) in results.iter().zip(&data.patterns) {
        let k = truth.shift.0.hypot(truth.shift.1);
        let err = (result.shift.0 - truth.shift.0).hypot(result.shift.1 - truth.shift.1);
        let worst_modulation = result
            .raw_modulations
            .iter()
            .zip(&truth.modulations)
            .skip(1)
            .map(|(m, t)| (m - t).abs())
            .fold(0.0f64, f64::max);
        println!(
            "direction {}: shift error {err:.4} px ({:.3} %), modulation error {worst_modulation:.4}, phase {:.3} (true {:.3})",
            result.direction,
            100.0 * err / k,
            result.phase_offset,
            truth.phase_offset
        );
    }
    Ok(())
}

fn run(args: Args) -> SimResult<()> {
    init_threads(args.threads)?;
    let config = SyntheticConfig {
        size: args.size,
        pxl_size: args.pxl_size,
        depth: args.depth,
        pxl_size_z: args.pxl_size_z,
        bands: args.bands,
        dirs: args.dirs,
        phases: args.phases,
        na: args.optics.na,
        emission_nm: args.optics.emission_nm,
        curvature: args.optics.curvature,
        refractive_index: args.optics.refractive_index,
        modulation: args.modulation,
        shift_fraction: args.shift_fraction,
        sample: args.sample.into(),
        count: args.count,
        photons: args.photons,
        seed: args.seed,
        img_seq: args.img_seq,
        ..SyntheticConfig::default()
    };
    let data = if config.is_3d() {
        generate_3d(&config)?
    } else {
        generate_2d(&config)?
    };

    if let Some(dir) = &args.output_dir {
        write_dataset(&data, dir, args.photons.is_none())?;
    }
    if args.verify {
        verify(&data, &config)?;
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Generation failed: {e}");
        std::process::exit(1);
    }
}
