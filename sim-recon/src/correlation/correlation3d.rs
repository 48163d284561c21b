//! 3D band correlation
//!
//! The 3D common region only applies the OTF weight limit; unlike 2D it does
//! not cut disks around DC. The coarse search can be run on the `kz = 0`
//! plane with the projected OTF, which is much cheaper than correlating full
//! stacks.

use ndarray::{Array2, Array3, Axis, Ix3};
use num_complex::Complex64;

use super::{
    auto_correlation_generic, common_region_generic, correlation_spectrum, fit_peak_generic,
    get_peak_generic, locate_peak_plane, CorrelationTrace, Peak,
};
use crate::error::SimResult;
use crate::otf::{OtfModel, OtfProvider3D};

/// 3D common region (weight limit only)
#[allow(clippy::too_many_arguments)]
pub fn common_region(
    band0: &Array3<Complex64>,
    band1: &Array3<Complex64>,
    bn0: usize,
    bn1: usize,
    otf: &impl OtfModel<Ix3>,
    kx: f64,
    ky: f64,
    weight_limit: f64,
    divide_by_otf: bool,
) -> SimResult<(Array3<Complex64>, Array3<Complex64>)> {
    common_region_generic(
        band0,
        band1,
        bn0,
        bn1,
        otf,
        kx,
        ky,
        0.0,
        weight_limit,
        divide_by_otf,
        false,
    )
}

/// The `kz = 0` plane of a 3D spectrum
pub fn kz0_plane(vec: &Array3<Complex64>) -> Array2<Complex64> {
    vec.index_axis(Axis(0), 0).to_owned()
}

/// Strongest lateral peak of the `kz = 0` plane at radius `> k_min`.
pub fn locate_peak(vec: &Array3<Complex64>, k_min: f64) -> SimResult<Peak> {
    locate_peak_plane(&kz0_plane(vec), k_min)
}

pub fn cross_correlation(
    band0: &Array3<Complex64>,
    band1: &Array3<Complex64>,
) -> SimResult<Array3<Complex64>> {
    correlation_spectrum(band0, band1)
}

/// Refine a lateral shift between two 3D bands.
///
/// With `project`, bands are reduced to their `kz = 0` planes and fitted
/// with the projected 2D OTF.
#[allow(clippy::too_many_arguments)]
pub fn fit_peak(
    band0: &Array3<Complex64>,
    band1: &Array3<Complex64>,
    bn0: usize,
    bn1: usize,
    otf: &OtfProvider3D,
    kx0: f64,
    ky0: f64,
    weight_limit: f64,
    search_radius: f64,
    project: bool,
    trace: Option<&mut CorrelationTrace>,
) -> SimResult<Peak> {
    if project {
        let flat = otf.projected()?;
        return fit_peak_generic(
            &kz0_plane(band0),
            &kz0_plane(band1),
            bn0,
            bn1,
            &flat,
            kx0,
            ky0,
            weight_limit,
            search_radius,
            false,
            trace,
        );
    }
    fit_peak_generic(
        band0,
        band1,
        bn0,
        bn1,
        otf,
        kx0,
        ky0,
        weight_limit,
        search_radius,
        false,
        trace,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn get_peak(
    band0: &Array3<Complex64>,
    band1: &Array3<Complex64>,
    bn0: usize,
    bn1: usize,
    otf: &impl OtfModel<Ix3>,
    kx: f64,
    ky: f64,
    weight_limit: f64,
) -> SimResult<Complex64> {
    get_peak_generic(band0, band1, bn0, bn1, otf, kx, ky, weight_limit, false)
}

pub fn auto_correlation(
    img: &Array3<Complex64>,
    otf: &impl OtfModel<Ix3>,
    kx: f64,
    ky: f64,
) -> SimResult<Complex64> {
    auto_correlation_generic(img, otf, kx, ky)
}
