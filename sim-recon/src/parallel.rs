//! Parallel processing utilities for spectra and images
//!
//! Every helper here splits work into pieces that write to disjoint output
//! locations (rows, z-planes, FFT lanes, correlation-grid cells) and runs them
//! on the rayon worker pool. When a helper is invoked from inside a rayon
//! worker it runs serially instead, so nested parallel regions are flattened
//! and the outer loop keeps the pool busy.

use ndarray::{Array, ArrayViewMut, ArrayViewMut1, Axis, Dimension, RemoveAxis, Zip};
use rayon::prelude::*;

/// True when called from inside a rayon worker thread
pub fn in_parallel_region() -> bool {
    rayon::current_thread_index().is_some()
}

/// Process every outer slab of an array (rows of a 2D array, z-planes of a 3D
/// array) with its index.
///
/// # Arguments
/// * `array` - The array to process in place
/// * `processor` - Closure receiving the slab index and a mutable view of it
pub fn for_each_outer_mut<A, D, F>(array: &mut Array<A, D>, processor: F)
where
    A: Send + Sync,
    D: Dimension + RemoveAxis,
    F: Fn(usize, ArrayViewMut<A, D::Smaller>) + Sync + Send,
{
    if in_parallel_region() || array.len_of(Axis(0)) < 2 {
        array
            .axis_iter_mut(Axis(0))
            .enumerate()
            .for_each(|(idx, slab)| processor(idx, slab));
    } else {
        array
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(idx, slab)| processor(idx, slab));
    }
}

/// Process every 1D lane of an array along `axis` (used by the FFT passes).
pub fn for_each_lane_mut<A, D, F>(array: &mut Array<A, D>, axis: Axis, processor: F)
where
    A: Send + Sync,
    D: Dimension,
    F: Fn(ArrayViewMut1<A>) + Sync + Send,
{
    let lanes = Zip::from(array.lanes_mut(axis));
    if in_parallel_region() {
        lanes.for_each(processor);
    } else {
        lanes.par_for_each(processor);
    }
}

/// Evaluate `f` for every index in `0..count`, preserving order.
///
/// The results are collected only after all evaluations have finished, so
/// callers can reduce them (e.g. locate a maximum) safely.
pub fn map_indices<T, F>(count: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    if in_parallel_region() {
        (0..count).map(f).collect()
    } else {
        (0..count).into_par_iter().map(f).collect()
    }
}
