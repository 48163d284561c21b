//! Full 2D pipeline on synthetic data: estimate the pattern, reconstruct,
//! and check that the result reaches past the widefield cutoff.

use approx::assert_abs_diff_eq;
use ndarray::Array2;
use num_complex::Complex64;
use sim_recon::algorithm::sim2d::{self, EstimationOptions};
use sim_recon::algorithm::{NoProgress, ReconstructionStage};
use sim_recon::synthetic::{generate_2d, SyntheticConfig, SyntheticDataset};
use sim_recon::vector::signed_freq;
use sim_recon::{FilterPlan, OtfModel, OtfProvider, SimParam};

fn dataset(size: usize) -> SyntheticDataset {
    let config = SyntheticConfig {
        size,
        count: size * 2,
        ..SyntheticConfig::default()
    };
    generate_2d(&config).expect("synthetic dataset")
}

fn otf_for(param: &SimParam) -> OtfProvider {
    let mut otf = OtfProvider::from_estimate(1.4, 525.0, 0.7).unwrap();
    param.configure_otf(&mut otf).unwrap();
    otf
}

/// Largest signed radius holding anything above `rel * max`
fn support_radius(spectrum: &Array2<Complex64>, rel: f64) -> f64 {
    let (h, w) = spectrum.dim();
    let max = spectrum.iter().map(|v| v.norm()).fold(0.0, f64::max);
    spectrum
        .indexed_iter()
        .filter(|(_, v)| v.norm() > rel * max)
        .map(|((y, x), _)| signed_freq(x, w).hypot(signed_freq(y, h)))
        .fold(0.0, f64::max)
}

fn angle_diff(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(2.0 * std::f64::consts::PI);
    d.min(2.0 * std::f64::consts::PI - d)
}

fn estimate_and_check(size: usize) {
    let data = dataset(size);
    let mut param = data.param.clone();
    param.set_fade_border(15);
    let otf = otf_for(&param);

    let input = sim2d::prepare_input(&data.frames, &param).unwrap();
    let estimation =
        sim2d::estimate_and_apply(&mut param, &otf, &input, &Default::default(), &NoProgress)
            .unwrap();
    assert_eq!(estimation.results.len(), 3);

    for (d, truth) in data.patterns.iter().enumerate() {
        let (px, py) = param.dir(d).unwrap().shift();
        let k = truth.shift.0.hypot(truth.shift.1);
        let err = (px - truth.shift.0).hypot(py - truth.shift.1);
        assert!(
            err < 0.01 * k,
            "direction {d}: estimated ({px:.3}, {py:.3}), true ({:.3}, {:.3})",
            truth.shift.0,
            truth.shift.1
        );

        let result = &estimation.results[d];
        for band in 1..3 {
            assert_abs_diff_eq!(result.raw_modulations[band], 1.0, epsilon = 0.05);
        }
        assert!(angle_diff(result.phase_offset, truth.phase_offset) < 0.1);
    }

    let cutoff = OtfModel::<ndarray::Ix2>::cutoff_pixels(&otf).unwrap();
    for before_shift in [true, false] {
        param.set_otf_before_shift(before_shift);
        let output = sim2d::run_reconstruction(&param, &otf, &input, &NoProgress).unwrap();
        assert_eq!(output.stage, ReconstructionStage::Spatial);
        assert_eq!(output.image.dim(), (2 * size, 2 * size));
        assert_eq!(output.widefield.dim(), (size, size));
        assert!(output.image.iter().all(|v| v.is_finite() && *v >= 0.0));

        let ratio = support_radius(&output.spectrum, 1e-9) / cutoff;
        assert!(
            (1.7..=2.05).contains(&ratio),
            "otf before shift {before_shift}: reconstructed support reaches {ratio:.2} x cutoff"
        );
    }
}

#[test]
fn test_estimate_and_reconstruct_256() {
    estimate_and_check(256);
}

#[test]
fn test_estimate_and_reconstruct_512() {
    estimate_and_check(512);
}

#[test]
fn test_wicker_phases_per_frame() {
    let data = dataset(256);
    let mut param = data.param.clone();
    param.set_fade_border(15);
    let otf = otf_for(&param);
    let input = sim2d::prepare_input(&data.frames, &param).unwrap();

    let options = EstimationOptions {
        wicker_phases: true,
        ..Default::default()
    };
    let estimation = sim2d::estimate_and_apply(&mut param, &otf, &input, &options, &NoProgress).unwrap();

    let phases = param.nr_phases();
    for (d, truth) in data.patterns.iter().enumerate() {
        let measured = estimation.results[d]
            .explicit_phases
            .as_ref()
            .expect("per-frame phases");
        assert_eq!(measured.len(), phases);
        for (p, &phase) in measured.iter().enumerate() {
            let expected = truth.phase_offset + 2.0 * std::f64::consts::PI * p as f64 / phases as f64;
            assert!(
                angle_diff(phase, expected) < 0.15,
                "direction {d} phase {p}: {phase:.3} vs {expected:.3}"
            );
        }
        let dir = param.dir(d).unwrap();
        assert!(dir.has_explicit_phases());
        assert_eq!(&dir.phases(), measured);
    }

    let output = sim2d::run_reconstruction(&param, &otf, &input, &NoProgress).unwrap();
    assert!(output.image.iter().all(|v| v.is_finite() && *v >= 0.0));
}

#[test]
fn test_true_parameters_with_richardson_lucy_output() {
    let data = dataset(128);
    let mut param = data.true_param().unwrap();
    param.set_fade_border(10);
    param.set_filter(FilterPlan::RlOutput { iterations: 3 }).unwrap();
    let otf = otf_for(&param);

    let input = sim2d::prepare_input(&data.frames, &param).unwrap();
    let output = sim2d::run_reconstruction(&param, &otf, &input, &NoProgress).unwrap();
    assert_eq!(output.image.dim(), (256, 256));
    assert!(output.image.iter().all(|v| v.is_finite() && *v >= 0.0));
    assert!(output.image.sum() > 0.0);
}

#[test]
fn test_reconstruction_rejects_wrong_direction_count() {
    let data = dataset(64);
    let param = data.param.clone();
    let otf = otf_for(&param);
    let mut input = sim2d::prepare_input(&data.frames, &param).unwrap();
    input.pop();
    assert!(sim2d::run_reconstruction(&param, &otf, &input, &NoProgress).is_err());
}
