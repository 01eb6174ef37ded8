//! Single-node reference transform over the full 3D array.
//!
//! This is the ground truth the distributed path is validated against, so
//! it shares the [`ScalarFft`] kernel (and its planner) with the engine:
//! identical sign convention, identical unscaled inverse, identical
//! explicit normalization.
//!
//! Layout is row-major (x, y, z) with z fastest. The forward transform maps
//! (X, Y, Z) reals to (X, Y, Z/2 + 1) complex bins: real-to-complex along
//! the z pencils first, then full complex passes along y and x.

use std::sync::Arc;

use crate::error::Result;
use crate::fft::{irfft_pencil_with, lane_with, rfft_pencil_with, FftError, ScalarFft};
use crate::num::Complex64;
use crate::split::GlobalShape;

pub struct Rcfft3 {
    shape: GlobalShape,
    tw_x: Arc<[Complex64]>,
    tw_y: Arc<[Complex64]>,
    tw_z: Arc<[Complex64]>,
    lane: Vec<Complex64>,
    spectrum: Vec<Complex64>,
}

impl Rcfft3 {
    /// Plans all three axis lengths on `fft` (so its planner carries the
    /// same wisdom as the distributed engine's) and keeps the tables.
    pub fn new(shape: GlobalShape, fft: &ScalarFft<f64>) -> Self {
        let tw_x = fft.twiddles(shape.x);
        let tw_y = fft.twiddles(shape.y);
        let tw_z = fft.twiddles(shape.z);
        let lane_len = shape.x.max(shape.y).max(shape.z);
        Self {
            shape,
            tw_x,
            tw_y,
            tw_z,
            lane: vec![Complex64::zero(); lane_len],
            spectrum: vec![Complex64::zero(); shape.complex_len()],
        }
    }

    pub fn forward(&mut self, f: &[f64], g: &mut [Complex64]) -> Result<()> {
        self.forward_impl(f, g, false)
    }

    /// Frequency-shifted forward: the input is modulated by `(-1)^(x+y)`
    /// before transforming, centering the x/y spectrum.
    pub fn forward0(&mut self, f: &[f64], g: &mut [Complex64]) -> Result<()> {
        self.forward_impl(f, g, true)
    }

    pub fn backward(&mut self, g: &[Complex64], f: &mut [f64]) -> Result<()> {
        self.backward_impl(g, f, false)
    }

    /// Inverse of [`Rcfft3::forward0`], still unscaled.
    pub fn backward0(&mut self, g: &[Complex64], f: &mut [f64]) -> Result<()> {
        self.backward_impl(g, f, true)
    }

    /// Scales a real array by `1/(X*Y*Z)` so that
    /// `normalize(backward(forward(f)))` recovers `f`.
    pub fn normalize(&self, f: &mut [f64]) {
        let s = 1.0 / self.shape.real_len() as f64;
        for v in f.iter_mut() {
            *v *= s;
        }
    }

    fn forward_impl(&mut self, f: &[f64], g: &mut [Complex64], shift: bool) -> Result<()> {
        let GlobalShape { x, y, z } = self.shape;
        let zp = self.shape.complex_depth();
        if f.len() != self.shape.real_len() || g.len() != self.shape.complex_len() {
            return Err(FftError::MismatchedLengths.into());
        }
        for i in 0..x {
            for j in 0..y {
                let scale = shift_scale(shift, i + j);
                let src = &f[(i * y + j) * z..][..z];
                let dst = &mut g[(i * y + j) * zp..][..zp];
                rfft_pencil_with(src, scale, dst, &self.tw_z, &mut self.lane);
            }
        }
        for i in 0..x {
            for k in 0..zp {
                lane_with(g, i * y * zp + k, zp, y, &self.tw_y, false, &mut self.lane);
            }
        }
        for j in 0..y {
            for k in 0..zp {
                lane_with(g, j * zp + k, y * zp, x, &self.tw_x, false, &mut self.lane);
            }
        }
        Ok(())
    }

    fn backward_impl(&mut self, g: &[Complex64], f: &mut [f64], shift: bool) -> Result<()> {
        let GlobalShape { x, y, z } = self.shape;
        let zp = self.shape.complex_depth();
        if f.len() != self.shape.real_len() || g.len() != self.shape.complex_len() {
            return Err(FftError::MismatchedLengths.into());
        }
        let tw_x = self.tw_x.clone();
        let tw_y = self.tw_y.clone();
        let tw_z = self.tw_z.clone();
        let Self {
            spectrum, lane, ..
        } = self;
        spectrum.copy_from_slice(g);
        for j in 0..y {
            for k in 0..zp {
                lane_with(spectrum, j * zp + k, y * zp, x, &tw_x, true, lane);
            }
        }
        for i in 0..x {
            for k in 0..zp {
                lane_with(spectrum, i * y * zp + k, zp, y, &tw_y, true, lane);
            }
        }
        for i in 0..x {
            for j in 0..y {
                let scale = shift_scale(shift, i + j);
                let src = &spectrum[(i * y + j) * zp..][..zp];
                let dst = &mut f[(i * y + j) * z..][..z];
                irfft_pencil_with(src, scale, dst, &tw_z, lane);
            }
        }
        Ok(())
    }
}

#[inline]
fn shift_scale(shift: bool, parity: usize) -> f64 {
    if shift && parity % 2 == 1 {
        -1.0
    } else {
        1.0
    }
}
