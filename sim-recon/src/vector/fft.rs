//! N-dimensional FFT built from cached rustfft plans.
//!
//! Transforms run one axis at a time: every 1D lane along the axis is copied
//! into a contiguous buffer, transformed, and written back, with lanes spread
//! over the worker pool. Forward transforms are unnormalized; inverse
//! transforms divide by the total element count so that a forward/inverse
//! pair is the identity.

use std::sync::{Arc, Mutex};

use ndarray::{Array, Axis, Dimension};
use num_complex::Complex64;
use once_cell::sync::Lazy;
use rustfft::{Fft, FftPlanner};

use crate::parallel::for_each_lane_mut;

/// Transform direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftDirection {
    Forward,
    Inverse,
}

static PLANNER: Lazy<Mutex<FftPlanner<f64>>> = Lazy::new(|| Mutex::new(FftPlanner::new()));

fn plan(len: usize, direction: FftDirection) -> Arc<dyn Fft<f64>> {
    // A poisoned planner is still a valid plan cache
    let mut planner = PLANNER
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    match direction {
        FftDirection::Forward => planner.plan_fft_forward(len),
        FftDirection::Inverse => planner.plan_fft_inverse(len),
    }
}

/// Unnormalized 1D FFT of every lane along `axis`
pub fn fft_axis<D: Dimension>(data: &mut Array<Complex64, D>, axis: Axis, direction: FftDirection) {
    let len = data.len_of(axis);
    if len < 2 {
        return;
    }

    let fft = plan(len, direction);
    for_each_lane_mut(data, axis, |mut lane| {
        let mut buffer: Vec<Complex64> = lane.to_vec();
        fft.process(&mut buffer);
        lane.iter_mut()
            .zip(buffer)
            .for_each(|(dst, src)| *dst = src);
    });
}

/// Full N-dimensional FFT over all axes.
///
/// The inverse direction is normalized by the number of elements.
pub fn fft_nd<D: Dimension>(data: &mut Array<Complex64, D>, direction: FftDirection) {
    for axis in (0..data.ndim()).rev() {
        fft_axis(data, Axis(axis), direction);
    }

    if direction == FftDirection::Inverse && !data.is_empty() {
        let scale = 1.0 / data.len() as f64;
        data.mapv_inplace(|v| v * scale);
    }
}
