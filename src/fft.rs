// Copyright 2024 Mikael Lund
//
// Licensed under the Apache license, version 2.0 (the "license");
// you may not use this file except in compliance with the license.
// You may obtain a copy of the license at
//
//     http://www.apache.org/licenses/license-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the license is distributed on an "as is" basis,
// without warranties or conditions of any kind, either express or implied.
// See the license for the specific language governing permissions and
// limitations under the license.

//! Three dimensional complex FFT on row-major lattice data.
//!
//! The transform is separable: lines along z are contiguous and transformed in
//! place, lines along y are gathered per x-slab, and lines along x are
//! transformed on a transposed copy. Each pass is spread over the rayon pool.

use rayon::prelude::*;
use rustfft::{num_complex::Complex64, Fft, FftPlanner};
use std::sync::Arc;

/// Forward and inverse 3D FFT plans for one lattice shape
pub struct Fft3 {
    shape: [usize; 3],
    forward: [Arc<dyn Fft<f64>>; 3],
    inverse: [Arc<dyn Fft<f64>>; 3],
}

impl std::fmt::Debug for Fft3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft3").field("shape", &self.shape).finish()
    }
}

impl Fft3 {
    pub fn new(shape: [usize; 3]) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let forward = shape.map(|n| planner.plan_fft_forward(n));
        let inverse = shape.map(|n| planner.plan_fft_inverse(n));
        Self {
            shape,
            forward,
            inverse,
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unnormalized forward transform, in place
    pub fn forward(&self, data: &mut [Complex64]) {
        self.transform(data, &self.forward);
    }

    /// Inverse transform including the 1/N normalization, in place
    pub fn inverse(&self, data: &mut [Complex64]) {
        self.transform(data, &self.inverse);
        let scale = 1.0 / self.len() as f64;
        data.par_iter_mut().for_each(|v| *v *= scale);
    }

    fn transform(&self, data: &mut [Complex64], plans: &[Arc<dyn Fft<f64>>; 3]) {
        assert_eq!(data.len(), self.len(), "data does not match FFT shape");
        let [nx, ny, nz] = self.shape;
        let slab = ny * nz;

        // z: contiguous lines; rustfft processes consecutive lines in one call
        let plan = &plans[2];
        data.par_chunks_mut(slab).for_each_init(
            || vec![Complex64::default(); plan.get_inplace_scratch_len()],
            |scratch, lines| plan.process_with_scratch(lines, scratch),
        );

        // y: stride nz inside each x-slab
        let plan = &plans[1];
        data.par_chunks_mut(slab).for_each(|plane| {
            let mut line = vec![Complex64::default(); ny];
            let mut scratch = vec![Complex64::default(); plan.get_inplace_scratch_len()];
            for k in 0..nz {
                for (j, value) in line.iter_mut().enumerate() {
                    *value = plane[j * nz + k];
                }
                plan.process_with_scratch(&mut line, &mut scratch);
                for (j, value) in line.iter().enumerate() {
                    plane[j * nz + k] = *value;
                }
            }
        });

        // x: stride ny * nz; transform on a transposed copy
        let plan = &plans[0];
        let source: &[Complex64] = data;
        let mut transposed: Vec<Complex64> = (0..slab)
            .into_par_iter()
            .flat_map_iter(|m| (0..nx).map(move |i| source[i * slab + m]))
            .collect();
        transposed.par_chunks_mut(nx * nz).for_each_init(
            || vec![Complex64::default(); plan.get_inplace_scratch_len()],
            |scratch, lines| plan.process_with_scratch(lines, scratch),
        );
        data.par_chunks_mut(slab)
            .enumerate()
            .for_each(|(i, slab_out)| {
                slab_out
                    .iter_mut()
                    .enumerate()
                    .for_each(|(m, value)| *value = transposed[m * nx + i]);
            });
    }
}

/// Complex buffer with `real` as real part and `imag` as imaginary part
pub fn pack_complex(real: &[f64], imag: &[f64]) -> Vec<Complex64> {
    real.par_iter()
        .zip(imag.par_iter())
        .map(|(re, im)| Complex64::new(*re, *im))
        .collect()
}

/// Complex buffer from a real field
pub fn to_complex(real: &[f64]) -> Vec<Complex64> {
    real.par_iter().map(|re| Complex64::new(*re, 0.0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    /// Naive O(N²) DFT for comparison
    fn dft(data: &[Complex64], [nx, ny, nz]: [usize; 3]) -> Vec<Complex64> {
        let mut out = vec![Complex64::default(); data.len()];
        for (u, v, w) in itertools::iproduct!(0..nx, 0..ny, 0..nz) {
            let mut sum = Complex64::default();
            for (i, j, k) in itertools::iproduct!(0..nx, 0..ny, 0..nz) {
                let phase = -2.0
                    * PI
                    * ((u * i) as f64 / nx as f64
                        + (v * j) as f64 / ny as f64
                        + (w * k) as f64 / nz as f64);
                sum += data[(i * ny + j) * nz + k] * Complex64::from_polar(1.0, phase);
            }
            out[(u * ny + v) * nz + w] = sum;
        }
        out
    }

    fn sample_data(n: usize) -> Vec<Complex64> {
        (0..n)
            .map(|i| Complex64::new((i as f64 * 0.37).sin(), (i as f64 * 0.11).cos()))
            .collect()
    }

    #[test]
    fn test_against_naive_dft() {
        let shape = [3, 4, 5];
        let fft = Fft3::new(shape);
        let input = sample_data(fft.len());
        let mut data = input.clone();
        fft.forward(&mut data);
        for (a, b) in data.iter().zip(dft(&input, shape)) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-9);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_inverse_restores_input() {
        let fft = Fft3::new([6, 5, 8]);
        let input = sample_data(fft.len());
        let mut data = input.clone();
        fft.forward(&mut data);
        fft.inverse(&mut data);
        for (a, b) in data.iter().zip(&input) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-12);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_correlation_shifts_impulse() {
        // corr(t) = Σ A(x) B(x - t): an impulse in A at x0 and in B at 0 peaks at t = x0
        let shape = [4, 6, 5];
        let fft = Fft3::new(shape);
        let n = fft.len();
        let index = |i: usize, j: usize, k: usize| (i * shape[1] + j) * shape[2] + k;
        let mut a = vec![0.0; n];
        let mut b = vec![0.0; n];
        a[index(2, 3, 1)] = 1.0;
        b[0] = 1.0;
        let mut fa = to_complex(&a);
        let mut fb = to_complex(&b);
        fft.forward(&mut fa);
        fft.forward(&mut fb);
        let mut product: Vec<_> = fa.iter().zip(&fb).map(|(x, y)| x * y.conj()).collect();
        fft.inverse(&mut product);
        for (i, value) in product.iter().enumerate() {
            let expected = if i == index(2, 3, 1) { 1.0 } else { 0.0 };
            assert_relative_eq!(value.re, expected, epsilon = 1e-12);
        }
    }
}
