//! Dimension-generic spectral vectors.
//!
//! Spectra and images are plain ndarray arrays: `Array2` indexed `[[y, x]]`
//! for 2D data and `Array3` indexed `[[z, y, x]]` for 3D stacks. The
//! [`SimDimension`] trait supplies the few operations whose layout depends on
//! dimensionality (FFT over all axes, lateral Fourier shift, zero-padded
//! paste into an oversized buffer) so that the reconstruction pipeline can be
//! written once for both.
//!
//! Frequency coordinates use the centered wrap-around convention: index
//! `i < n/2` is frequency `i`, every other index is `i - n`.

pub mod fft;

use std::f64::consts::PI;

use ndarray::{
    Array, Array2, Array3, ArrayView2, ArrayViewMut1, ArrayViewMut2, Dimension, Ix2, Ix3,
    RemoveAxis,
};
use num_complex::Complex64;

use crate::error::{SimError, SimResult};
use crate::parallel::for_each_outer_mut;
use crate::param::SimParam;
pub use fft::FftDirection;

/// Complex spectrum or spatial image of dimensionality `D`
pub type Spectrum<D> = Array<Complex64, D>;

/// Signed frequency of index `idx` on an axis of length `n`
#[inline]
pub fn signed_freq(idx: usize, n: usize) -> f64 {
    if idx < n / 2 {
        idx as f64
    } else {
        idx as f64 - n as f64
    }
}

/// Array index of a signed frequency on an axis of length `n`
#[inline]
pub fn wrap_index(freq: i64, n: usize) -> usize {
    freq.rem_euclid(n as i64) as usize
}

/// Lift a real array into the complex domain
pub fn to_complex<D: Dimension>(real: &Array<f64, D>) -> Spectrum<D> {
    real.mapv(|v| Complex64::new(v, 0.0))
}

/// Real part of a complex array
pub fn real_part<D: Dimension>(data: &Spectrum<D>) -> Array<f64, D> {
    data.mapv(|v| v.re)
}

/// Operations that depend on the layout of 2D versus 3D spectra.
pub trait SimDimension: Dimension + RemoveAxis + Copy {
    /// Lateral size as (width, height)
    fn lateral_size(&self) -> (usize, usize);

    /// Same shape with both lateral axes scaled by `factor`
    fn lateral_scaled(&self, factor: usize) -> Self;

    /// Shape of one raw spectrum described by `param`
    ///
    /// # Errors
    /// * `SimError::InvalidState` - If `param` has the wrong dimensionality
    fn native_shape(param: &SimParam) -> SimResult<Self>;

    /// In-place FFT over every axis (inverse is normalized)
    fn fft(data: &mut Spectrum<Self>, direction: FftDirection) {
        fft::fft_nd(data, direction);
    }

    /// Multiply spatial-domain data by `exp(2*pi*i*(kx*x/w + ky*y/h))`.
    ///
    /// After a forward FFT the spectral content has moved by `(+kx, +ky)`
    /// frequency pixels; sub-pixel values interpolate.
    fn fourier_shift(data: &mut Spectrum<Self>, kx: f64, ky: f64);

    /// Copy a spectrum into a laterally larger buffer, keeping every sample at
    /// its signed frequency and zeroing everything else.
    fn paste_freq(src: &Spectrum<Self>, dst: &mut Spectrum<Self>) -> SimResult<()>;

    /// Visit every lateral row with its (z, y) position, rows in parallel.
    ///
    /// 2D data reports `z = 0`.
    fn for_each_row_mut<A, F>(data: &mut Array<A, Self>, f: F)
    where
        A: Send + Sync,
        F: Fn(usize, usize, ArrayViewMut1<A>) + Sync + Send;
}

fn phase_ramp(k: f64, n: usize) -> Vec<Complex64> {
    (0..n)
        .map(|i| Complex64::from_polar(1.0, 2.0 * PI * k * i as f64 / n as f64))
        .collect()
}

fn shift_plane(mut plane: ArrayViewMut2<Complex64>, ramp_x: &[Complex64], ramp_y: &[Complex64]) {
    for (mut row, fy) in plane.outer_iter_mut().zip(ramp_y) {
        row.iter_mut()
            .zip(ramp_x)
            .for_each(|(v, fx)| *v *= fy * fx);
    }
}

fn paste_plane(src: ArrayView2<Complex64>, mut dst: ArrayViewMut2<Complex64>) {
    let (sh, sw) = src.dim();
    let (dh, dw) = dst.dim();
    dst.fill(Complex64::new(0.0, 0.0));
    for y in 0..sh {
        let ty = wrap_index(signed_freq(y, sh) as i64, dh);
        for x in 0..sw {
            let tx = wrap_index(signed_freq(x, sw) as i64, dw);
            dst[[ty, tx]] = src[[y, x]];
        }
    }
}

impl SimDimension for Ix2 {
    fn lateral_size(&self) -> (usize, usize) {
        (self[1], self[0])
    }

    fn lateral_scaled(&self, factor: usize) -> Self {
        Ix2(self[0] * factor, self[1] * factor)
    }

    fn native_shape(param: &SimParam) -> SimResult<Self> {
        if param.is_3d() {
            return Err(SimError::InvalidState(
                "3D parameters describe stacks, not planes".to_string(),
            ));
        }
        Ok(Ix2(param.img_size(), param.img_size()))
    }

    fn fourier_shift(data: &mut Spectrum<Self>, kx: f64, ky: f64) {
        let (h, w) = data.dim();
        let ramp_x = phase_ramp(kx, w);
        let ramp_y = phase_ramp(ky, h);
        for_each_outer_mut(data, |y, mut row| {
            let fy = ramp_y[y];
            row.iter_mut()
                .zip(&ramp_x)
                .for_each(|(v, fx)| *v *= fy * fx);
        });
    }

    fn paste_freq(src: &Spectrum<Self>, dst: &mut Spectrum<Self>) -> SimResult<()> {
        let (sh, sw) = src.dim();
        let (dh, dw) = dst.dim();
        if dh < sh || dw < sw {
            return Err(SimError::DimensionMismatch(format!(
                "cannot paste {sw}x{sh} spectrum into smaller {dw}x{dh} buffer"
            )));
        }
        paste_plane(src.view(), dst.view_mut());
        Ok(())
    }

    fn for_each_row_mut<A, F>(data: &mut Array<A, Self>, f: F)
    where
        A: Send + Sync,
        F: Fn(usize, usize, ArrayViewMut1<A>) + Sync + Send,
    {
        for_each_outer_mut(data, |y, row| f(0, y, row));
    }
}

impl SimDimension for Ix3 {
    fn lateral_size(&self) -> (usize, usize) {
        (self[2], self[1])
    }

    fn lateral_scaled(&self, factor: usize) -> Self {
        Ix3(self[0], self[1] * factor, self[2] * factor)
    }

    fn native_shape(param: &SimParam) -> SimResult<Self> {
        if !param.is_3d() {
            return Err(SimError::InvalidState(
                "2D parameters have no axial dimension".to_string(),
            ));
        }
        Ok(Ix3(param.depth(), param.img_size(), param.img_size()))
    }

    fn fourier_shift(data: &mut Spectrum<Self>, kx: f64, ky: f64) {
        let (_, h, w) = data.dim();
        let ramp_x = phase_ramp(kx, w);
        let ramp_y = phase_ramp(ky, h);
        for_each_outer_mut(data, |_, plane| shift_plane(plane, &ramp_x, &ramp_y));
    }

    fn paste_freq(src: &Spectrum<Self>, dst: &mut Spectrum<Self>) -> SimResult<()> {
        let (sd, sh, sw) = src.dim();
        let (dd, dh, dw) = dst.dim();
        if sd != dd {
            return Err(SimError::DimensionMismatch(format!(
                "axial size {sd} does not match target axial size {dd}"
            )));
        }
        if dh < sh || dw < sw {
            return Err(SimError::DimensionMismatch(format!(
                "cannot paste {sw}x{sh} spectrum into smaller {dw}x{dh} buffer"
            )));
        }
        for (src_plane, dst_plane) in src.outer_iter().zip(dst.outer_iter_mut()) {
            paste_plane(src_plane, dst_plane);
        }
        Ok(())
    }

    fn for_each_row_mut<A, F>(data: &mut Array<A, Self>, f: F)
    where
        A: Send + Sync,
        F: Fn(usize, usize, ArrayViewMut1<A>) + Sync + Send,
    {
        for_each_outer_mut(data, |z, mut plane| {
            for (y, row) in plane.outer_iter_mut().enumerate() {
                f(z, y, row);
            }
        });
    }
}

/// Forward FFT of a copy of a real 2D image
pub fn fft_real_2d(image: &Array2<f64>) -> Array2<Complex64> {
    let mut data = to_complex(image);
    Ix2::fft(&mut data, FftDirection::Forward);
    data
}

/// Forward FFT of a copy of a real 3D stack
pub fn fft_real_3d(stack: &Array3<f64>) -> Array3<Complex64> {
    let mut data = to_complex(stack);
    Ix3::fft(&mut data, FftDirection::Forward);
    data
}
