//! 1D FFT kernel and planner.
//!
//! The transforms here follow the unscaled convention: `fft` applies
//! `e^{-2 pi i}`, `ifft` applies `e^{+2 pi i}` and performs **no** `1/n`
//! scaling. Normalization is always an explicit, separate step so that a
//! forward/backward round trip can be validated with the same convention on
//! the single-node and distributed paths.
//!
//! Power-of-two lengths take the iterative radix-2 path; other lengths fall
//! back to direct evaluation, which is plenty for a harness that transforms
//! each length a handful of times.

use core::cell::RefCell;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::num::{Complex, Float};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftError {
    EmptyInput,
    MismatchedLengths,
}

impl core::fmt::Display for FftError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FftError::EmptyInput => write!(f, "empty input"),
            FftError::MismatchedLengths => write!(f, "mismatched buffer lengths"),
        }
    }
}

impl std::error::Error for FftError {}

/// Caches one twiddle table per transform length.
///
/// The set of planned lengths is the planner's "wisdom": exporting it and
/// re-planning on another rank reproduces the same tables, so only the
/// lengths themselves ever travel between ranks.
pub struct FftPlanner<T: Float> {
    cache: HashMap<usize, Arc<[Complex<T>]>>,
}

impl<T: Float> FftPlanner<T> {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// Twiddle table for length `n`: the first `n/2` roots `e^{-2 pi i k/n}`
    /// for powers of two, all `n` roots otherwise.
    pub fn plan(&mut self, n: usize) -> Arc<[Complex<T>]> {
        if let Some(table) = self.cache.get(&n) {
            return table.clone();
        }
        let table = build_twiddles(n);
        self.cache.insert(n, table.clone());
        table
    }

    pub fn is_planned(&self, n: usize) -> bool {
        self.cache.contains_key(&n)
    }

    /// Planned lengths in ascending order.
    pub fn planned_sizes(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self.cache.keys().copied().collect();
        sizes.sort_unstable();
        sizes
    }
}

impl<T: Float> Default for FftPlanner<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn build_twiddles<T: Float>(n: usize) -> Arc<[Complex<T>]> {
    let count = if n.is_power_of_two() {
        (n / 2).max(1)
    } else {
        n
    };
    let step = -(T::one() + T::one()) * T::pi() / T::from_usize(n.max(1));
    (0..count)
        .map(|k| Complex::expi(step * T::from_usize(k)))
        .collect()
}

/// Serial FFT dispatcher with an interior planner.
pub struct ScalarFft<T: Float> {
    planner: RefCell<FftPlanner<T>>,
}

impl<T: Float> Default for ScalarFft<T> {
    fn default() -> Self {
        Self {
            planner: RefCell::new(FftPlanner::new()),
        }
    }
}

impl<T: Float> ScalarFft<T> {
    pub fn with_planner(planner: FftPlanner<T>) -> Self {
        Self {
            planner: RefCell::new(planner),
        }
    }

    /// Plans `n`, returning the cached twiddle table.
    pub fn twiddles(&self, n: usize) -> Arc<[Complex<T>]> {
        self.planner.borrow_mut().plan(n)
    }

    pub fn plan(&self, n: usize) {
        self.planner.borrow_mut().plan(n);
    }

    pub fn planned_sizes(&self) -> Vec<usize> {
        self.planner.borrow().planned_sizes()
    }

    /// In-place forward transform, unscaled.
    pub fn fft(&self, data: &mut [Complex<T>]) -> Result<(), FftError> {
        self.transform(data, false)
    }

    /// In-place inverse transform, unscaled.
    pub fn ifft(&self, data: &mut [Complex<T>]) -> Result<(), FftError> {
        self.transform(data, true)
    }

    fn transform(&self, data: &mut [Complex<T>], inverse: bool) -> Result<(), FftError> {
        if data.is_empty() {
            return Err(FftError::EmptyInput);
        }
        let tw = self.twiddles(data.len());
        fft_with_twiddles(data, &tw, inverse);
        Ok(())
    }

    /// Transforms the length-`n` lane `data[offset + t*stride]`, gathering it
    /// through `scratch`.
    pub fn fft_lane(
        &self,
        data: &mut [Complex<T>],
        offset: usize,
        stride: usize,
        n: usize,
        scratch: &mut [Complex<T>],
    ) -> Result<(), FftError> {
        self.lane(data, offset, stride, n, scratch, false)
    }

    pub fn ifft_lane(
        &self,
        data: &mut [Complex<T>],
        offset: usize,
        stride: usize,
        n: usize,
        scratch: &mut [Complex<T>],
    ) -> Result<(), FftError> {
        self.lane(data, offset, stride, n, scratch, true)
    }

    fn lane(
        &self,
        data: &mut [Complex<T>],
        offset: usize,
        stride: usize,
        n: usize,
        scratch: &mut [Complex<T>],
        inverse: bool,
    ) -> Result<(), FftError> {
        if n == 0 {
            return Err(FftError::EmptyInput);
        }
        if stride == 0 || scratch.len() < n || offset + (n - 1) * stride >= data.len() {
            return Err(FftError::MismatchedLengths);
        }
        let tw = self.twiddles(n);
        lane_with(data, offset, stride, n, &tw, inverse, scratch);
        Ok(())
    }

    /// Real-to-half-complex transform of one pencil. `src` holds `z` reals,
    /// `dst` receives the `z/2 + 1` non-redundant bins. Every input sample is
    /// multiplied by `scale` on the way in (the frequency-shift hook).
    pub fn rfft_pencil(
        &self,
        src: &[T],
        scale: T,
        dst: &mut [Complex<T>],
        scratch: &mut [Complex<T>],
    ) -> Result<(), FftError> {
        let z = src.len();
        if z == 0 {
            return Err(FftError::EmptyInput);
        }
        if dst.len() != z / 2 + 1 || scratch.len() < z {
            return Err(FftError::MismatchedLengths);
        }
        let tw = self.twiddles(z);
        rfft_pencil_with(src, scale, dst, &tw, scratch);
        Ok(())
    }

    /// Half-complex-to-real inverse of one pencil, unscaled apart from the
    /// per-sample `scale` applied on the way out.
    pub fn irfft_pencil(
        &self,
        src: &[Complex<T>],
        scale: T,
        dst: &mut [T],
        scratch: &mut [Complex<T>],
    ) -> Result<(), FftError> {
        let z = dst.len();
        if z == 0 {
            return Err(FftError::EmptyInput);
        }
        if src.len() != z / 2 + 1 || scratch.len() < z {
            return Err(FftError::MismatchedLengths);
        }
        let tw = self.twiddles(z);
        irfft_pencil_with(src, scale, dst, &tw, scratch);
        Ok(())
    }
}

/// In-place transform against a pre-built twiddle table for `data.len()`.
///
/// Callers guarantee the table matches the length (the public wrappers and
/// the engine both plan up front).
pub(crate) fn fft_with_twiddles<T: Float>(data: &mut [Complex<T>], tw: &[Complex<T>], inverse: bool) {
    let n = data.len();
    if n <= 1 {
        return;
    }
    if n.is_power_of_two() {
        debug_assert_eq!(tw.len(), n / 2);
        fft_radix2(data, tw, inverse);
    } else {
        debug_assert_eq!(tw.len(), n);
        dft_direct(data, tw, inverse);
    }
}

fn fft_radix2<T: Float>(data: &mut [Complex<T>], tw: &[Complex<T>], inverse: bool) {
    let n = data.len();
    // Bit-reversal permutation.
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            data.swap(i, j);
        }
    }
    let mut len = 2usize;
    while len <= n {
        let half = len / 2;
        let step = n / len;
        for start in (0..n).step_by(len) {
            for k in 0..half {
                let mut w = tw[k * step];
                if inverse {
                    w = w.conj();
                }
                let u = data[start + k];
                let v = data[start + k + half] * w;
                data[start + k] = u + v;
                data[start + k + half] = u - v;
            }
        }
        len <<= 1;
    }
}

fn dft_direct<T: Float>(data: &mut [Complex<T>], tw: &[Complex<T>], inverse: bool) {
    let n = data.len();
    let mut out = vec![Complex::<T>::zero(); n];
    for (k, slot) in out.iter_mut().enumerate() {
        let mut acc = Complex::<T>::zero();
        let mut idx = 0usize;
        for &sample in data.iter() {
            let mut w = tw[idx];
            if inverse {
                w = w.conj();
            }
            acc = acc + sample * w;
            idx += k;
            if idx >= n {
                idx -= n;
            }
        }
        *slot = acc;
    }
    data.copy_from_slice(&out);
}

pub(crate) fn lane_with<T: Float>(
    data: &mut [Complex<T>],
    offset: usize,
    stride: usize,
    n: usize,
    tw: &[Complex<T>],
    inverse: bool,
    scratch: &mut [Complex<T>],
) {
    debug_assert!(stride >= 1 && scratch.len() >= n);
    debug_assert!(offset + (n - 1) * stride < data.len());
    for t in 0..n {
        scratch[t] = data[offset + t * stride];
    }
    fft_with_twiddles(&mut scratch[..n], tw, inverse);
    for t in 0..n {
        data[offset + t * stride] = scratch[t];
    }
}

pub(crate) fn rfft_pencil_with<T: Float>(
    src: &[T],
    scale: T,
    dst: &mut [Complex<T>],
    tw: &[Complex<T>],
    scratch: &mut [Complex<T>],
) {
    let z = src.len();
    debug_assert!(dst.len() == z / 2 + 1 && scratch.len() >= z);
    for (slot, &v) in scratch[..z].iter_mut().zip(src.iter()) {
        *slot = Complex::new(v * scale, T::zero());
    }
    fft_with_twiddles(&mut scratch[..z], tw, false);
    dst.copy_from_slice(&scratch[..z / 2 + 1]);
}

pub(crate) fn irfft_pencil_with<T: Float>(
    src: &[Complex<T>],
    scale: T,
    dst: &mut [T],
    tw: &[Complex<T>],
    scratch: &mut [Complex<T>],
) {
    let z = dst.len();
    let zp = z / 2 + 1;
    debug_assert!(src.len() == zp && scratch.len() >= z);
    scratch[..zp].copy_from_slice(src);
    // Rebuild the redundant upper bins from Hermitian symmetry.
    for k in zp..z {
        scratch[k] = src[z - k].conj();
    }
    fft_with_twiddles(&mut scratch[..z], tw, true);
    for (slot, &v) in dst.iter_mut().zip(scratch[..z].iter()) {
        *slot = v.re * scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::num::Complex64;

    fn assert_close(a: Complex64, b: Complex64, eps: f64) {
        assert!((a.re - b.re).abs() < eps, "re: {} vs {}", a.re, b.re);
        assert!((a.im - b.im).abs() < eps, "im: {} vs {}", a.im, b.im);
    }

    #[test]
    fn impulse_is_flat() {
        let fft = ScalarFft::<f64>::default();
        let mut data = vec![Complex64::zero(); 8];
        data[0] = Complex64::new(1.0, 0.0);
        fft.fft(&mut data).unwrap();
        for c in &data {
            assert_close(*c, Complex64::new(1.0, 0.0), 1e-12);
        }
    }

    #[test]
    fn dc_bin_is_sum() {
        let fft = ScalarFft::<f64>::default();
        let mut data: Vec<Complex64> = (0..16).map(|i| Complex64::new(i as f64, 0.0)).collect();
        let sum: f64 = (0..16).map(|i| i as f64).sum();
        fft.fft(&mut data).unwrap();
        assert_close(data[0], Complex64::new(sum, 0.0), 1e-9);
    }

    #[test]
    fn unscaled_round_trip() {
        let fft = ScalarFft::<f64>::default();
        let orig: Vec<Complex64> = (0..32)
            .map(|i| Complex64::new((i as f64 * 0.37).sin(), (i as f64 * 0.21).cos()))
            .collect();
        let mut data = orig.clone();
        fft.fft(&mut data).unwrap();
        fft.ifft(&mut data).unwrap();
        // Inverse is unscaled, so the round trip gains a factor of n.
        let n = data.len() as f64;
        for (a, b) in data.iter().zip(orig.iter()) {
            assert_close(a.scale(1.0 / n), *b, 1e-10);
        }
    }

    #[test]
    fn non_pow2_matches_brute_force() {
        let fft = ScalarFft::<f64>::default();
        let orig: Vec<Complex64> = (0..12)
            .map(|i| Complex64::new(1.0 + i as f64, (i as f64).sin()))
            .collect();
        let mut data = orig.clone();
        fft.fft(&mut data).unwrap();
        let n = orig.len();
        for k in 0..n {
            let mut acc = Complex64::zero();
            for (j, &s) in orig.iter().enumerate() {
                let theta = -2.0 * core::f64::consts::PI * (j * k) as f64 / n as f64;
                acc = acc + s * Complex64::expi(theta);
            }
            assert_close(data[k], acc, 1e-9);
        }
        let mut back = data.clone();
        fft.ifft(&mut back).unwrap();
        for (a, b) in back.iter().zip(orig.iter()) {
            assert_close(a.scale(1.0 / n as f64), *b, 1e-10);
        }
    }

    #[test]
    fn lane_matches_contiguous() {
        let fft = ScalarFft::<f64>::default();
        let n = 8;
        let stride = 3;
        let mut strided = vec![Complex64::zero(); n * stride];
        let mut packed: Vec<Complex64> = Vec::new();
        for t in 0..n {
            let v = Complex64::new(t as f64 + 0.5, -(t as f64));
            strided[t * stride] = v;
            packed.push(v);
        }
        let mut scratch = vec![Complex64::zero(); n];
        fft.fft_lane(&mut strided, 0, stride, n, &mut scratch).unwrap();
        fft.fft(&mut packed).unwrap();
        for t in 0..n {
            assert_close(strided[t * stride], packed[t], 1e-10);
        }
    }

    #[test]
    fn rfft_pencil_round_trip() {
        let fft = ScalarFft::<f64>::default();
        for z in [1usize, 2, 4, 6, 8, 9] {
            let src: Vec<f64> = (0..z).map(|k| (k as f64 + 1.0) * 0.7).collect();
            let zp = z / 2 + 1;
            let mut freq = vec![Complex64::zero(); zp];
            let mut scratch = vec![Complex64::zero(); z];
            fft.rfft_pencil(&src, 1.0, &mut freq, &mut scratch).unwrap();
            // First bin is the plain sum.
            let sum: f64 = src.iter().sum();
            assert!((freq[0].re - sum).abs() < 1e-9, "z={z}");
            assert!(freq[0].im.abs() < 1e-9);
            let mut back = vec![0.0f64; z];
            fft.irfft_pencil(&freq, 1.0 / z as f64, &mut back, &mut scratch)
                .unwrap();
            for (a, b) in back.iter().zip(src.iter()) {
                assert!((a - b).abs() < 1e-10, "z={z}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn rejects_bad_shapes() {
        let fft = ScalarFft::<f64>::default();
        let mut empty: Vec<Complex64> = Vec::new();
        assert_eq!(fft.fft(&mut empty), Err(FftError::EmptyInput));
        let src = [1.0f64; 4];
        let mut wrong = vec![Complex64::zero(); 4];
        let mut scratch = vec![Complex64::zero(); 4];
        assert_eq!(
            fft.rfft_pencil(&src, 1.0, &mut wrong, &mut scratch),
            Err(FftError::MismatchedLengths)
        );
    }

    #[test]
    fn planner_records_sizes() {
        let fft = ScalarFft::<f64>::default();
        fft.plan(8);
        fft.plan(4);
        fft.plan(8);
        fft.plan(6);
        assert_eq!(fft.planned_sizes(), vec![4, 6, 8]);
    }
}
