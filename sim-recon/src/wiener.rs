//! Generalized Wiener filter denominators.
//!
//! Every shifted band component `c` carries its own shifted OTF, so the
//! filtered spectrum is `sum conj(OTF_c) S_c / (sum |OTF_c|^2 + w^2)`. This
//! module accumulates `sum |OTF_c|^2` on the 2x laterally oversized grid and
//! turns it into `1 / (acc + w^2)`.

use log::debug;
use ndarray::Array;

use crate::error::{SimError, SimResult};
use crate::otf::OtfModel;
use crate::param::SimParam;
use crate::vector::SimDimension;

/// OTF power sums over every direction and band of one parameter set.
pub struct WienerFilter<'a, D: SimDimension, O: OtfModel<D> + ?Sized> {
    param: &'a SimParam,
    otf: &'a O,
    native: D,
    acc: Array<f64, D>,
}

impl<'a, D: SimDimension, O: OtfModel<D> + ?Sized> WienerFilter<'a, D, O> {
    /// Build the full accumulator for all directions of `param`.
    ///
    /// # Errors
    /// * `SimError::InvalidParameter` - If the OTF has fewer bands than `param`
    /// * `SimError::InvalidState` - If the OTF pixel size is unset or the
    ///   dimensionality does not match
    pub fn new(param: &'a SimParam, otf: &'a O) -> SimResult<Self> {
        if otf.bands() < param.nr_bands() {
            return Err(SimError::InvalidParameter(format!(
                "OTF has {} bands, reconstruction needs {}",
                otf.bands(),
                param.nr_bands()
            )));
        }
        let native = D::native_shape(param)?;
        let mut filter = Self {
            param,
            otf,
            native,
            acc: Array::zeros(native),
        };
        let mut acc = Array::zeros(native.lateral_scaled(2));
        for dir in 0..param.nr_dirs() {
            for band in 0..param.nr_bands() {
                filter.add_wiener_denominator(&mut acc, dir, band, otf.attenuation_enabled())?;
            }
        }
        filter.acc = acc;
        debug!(
            "Wiener accumulator over {} directions x {} bands",
            param.nr_dirs(),
            param.nr_bands()
        );
        Ok(filter)
    }

    /// Add the OTF power of one band of one direction to `acc`.
    ///
    /// Band 0 is a single unshifted component; every other band contributes
    /// its `+` and `-` component at `-shift` and `+shift`, where the shifted
    /// bands land after moving back into place.
    pub fn add_wiener_denominator(
        &self,
        acc: &mut Array<f64, D>,
        dir: usize,
        band: usize,
        use_attenuation: bool,
    ) -> SimResult<()> {
        if band >= self.param.nr_bands() {
            return Err(SimError::InvalidParameter(format!(
                "band {band} out of range, reconstruction uses {}",
                self.param.nr_bands()
            )));
        }
        let d = self.param.dir(dir)?;
        if band == 0 {
            return self.otf.add_otf_power(acc, 0, 0.0, 0.0, use_attenuation);
        }
        let (kx, ky) = (d.px(band), d.py(band));
        self.otf.add_otf_power(acc, band, -kx, -ky, use_attenuation)?;
        self.otf.add_otf_power(acc, band, kx, ky, use_attenuation)
    }

    /// Raw `sum |OTF|^2` on the oversized grid
    pub fn accumulator(&self) -> &Array<f64, D> {
        &self.acc
    }

    /// `1 / (acc + w^2)` on the oversized grid
    pub fn denominator(&self, wiener_param: f64) -> Array<f64, D> {
        invert(&self.acc, wiener_param)
    }

    /// Band-0-only denominator at native size, for the widefield image.
    pub fn widefield_denominator(&self, wiener_param: f64) -> SimResult<Array<f64, D>> {
        let mut acc = Array::zeros(self.native);
        self.otf
            .add_otf_power(&mut acc, 0, 0.0, 0.0, self.otf.attenuation_enabled())?;
        Ok(invert(&acc, wiener_param))
    }

    /// Denominator over a subset of directions and bands `0..=max_band`.
    ///
    /// # Errors
    /// * `SimError::InvalidParameter` - Unknown direction or band
    pub fn intermediate_denominator(
        &self,
        dirs: &[usize],
        max_band: usize,
        wiener_param: f64,
    ) -> SimResult<Array<f64, D>> {
        let mut acc = Array::zeros(self.native.lateral_scaled(2));
        for &dir in dirs {
            for band in 0..=max_band {
                self.add_wiener_denominator(&mut acc, dir, band, self.otf.attenuation_enabled())?;
            }
        }
        Ok(invert(&acc, wiener_param))
    }
}

fn invert<D: SimDimension>(acc: &Array<f64, D>, wiener_param: f64) -> Array<f64, D> {
    let w2 = wiener_param * wiener_param;
    acc.mapv(|v| {
        let d = v + w2;
        if d > 0.0 {
            1.0 / d
        } else {
            0.0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otf::{OtfProvider, OtfProvider3D};
    use crate::vector::signed_freq;
    use approx::assert_relative_eq;
    use ndarray::{Ix2, Ix3};

    fn setup() -> (SimParam, OtfProvider) {
        let mut param = SimParam::new_2d(3, 2, 5, 32, 0.08).unwrap();
        param.dir_mut(0).unwrap().set_shift(10.0, 2.0);
        param.dir_mut(1).unwrap().set_shift(-3.0, 9.0);
        let mut otf = OtfProvider::from_estimate(1.4, 525.0, 0.7).unwrap();
        param.configure_otf(&mut otf).unwrap();
        (param, otf)
    }

    #[test]
    fn test_denominator_inverts_sum() {
        let (param, otf) = setup();
        let filter = WienerFilter::<Ix2, _>::new(&param, &otf).unwrap();
        let w = 0.05;
        let den = filter.denominator(w);
        assert_eq!(den.dim(), (64, 64));
        for (d, a) in den.iter().zip(filter.accumulator().iter()) {
            assert_relative_eq!(d * (a + w * w), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_dc_sums_one_per_direction() {
        let (param, otf) = setup();
        let filter = WienerFilter::<Ix2, _>::new(&param, &otf).unwrap();
        let acc = filter.accumulator();
        let mut expected = 0.0;
        for dir in param.dirs() {
            expected += 1.0;
            for band in 1..3 {
                let r = dir.px(band).hypot(dir.py(band)) * param.cycles_per_micron();
                expected += 2.0 * otf.get_otf_val(band, r, false).unwrap().norm_sqr();
            }
        }
        assert_relative_eq!(acc[[0, 0]], expected, epsilon = 1e-9);
    }

    #[test]
    fn test_intermediate_subset() {
        let (param, otf) = setup();
        let filter = WienerFilter::<Ix2, _>::new(&param, &otf).unwrap();
        let full = filter.intermediate_denominator(&[0, 1], 2, 0.1).unwrap();
        let den = filter.denominator(0.1);
        for (a, b) in full.iter().zip(den.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
        let dc_only = filter.intermediate_denominator(&[0], 0, 0.1).unwrap();
        // Only the unshifted band contributes at the outer shift of dir 0
        let (h, w) = dc_only.dim();
        let y = (0..h).find(|&y| signed_freq(y, h) == -2.0).unwrap();
        let x = (0..w).find(|&x| signed_freq(x, w) == -10.0).unwrap();
        let r = 10.0f64.hypot(2.0) * param.cycles_per_micron();
        let expected = 1.0 / (otf.get_otf_val(0, r, false).unwrap().norm_sqr() + 0.01);
        assert_relative_eq!(dc_only[[y, x]], expected, epsilon = 1e-9);
        assert!(filter.intermediate_denominator(&[5], 0, 0.1).is_err());
    }

    #[test]
    fn test_widefield_native_size() {
        let (param, otf) = setup();
        let filter = WienerFilter::<Ix2, _>::new(&param, &otf).unwrap();
        let wf = filter.widefield_denominator(0.2).unwrap();
        assert_eq!(wf.dim(), (32, 32));
        assert_relative_eq!(wf[[0, 0]], 1.0 / 1.04, epsilon = 1e-12);
    }

    #[test]
    fn test_3d_shape_and_dimension_checks() {
        let mut param = SimParam::new_3d(3, 1, 5, 16, 0.08, 4, 0.125).unwrap();
        param.dir_mut(0).unwrap().set_shift(5.0, 0.0);
        let mut otf = OtfProvider3D::from_estimate(1.2, 525.0, 0.8, 1.33).unwrap();
        param.configure_otf_3d(&mut otf).unwrap();
        let filter = WienerFilter::<Ix3, _>::new(&param, &otf).unwrap();
        assert_eq!(filter.denominator(0.05).dim(), (4, 32, 32));

        let (_, otf2) = setup();
        assert!(matches!(
            WienerFilter::<Ix2, _>::new(&param, &otf2),
            Err(SimError::InvalidState(_))
        ));
    }
}
