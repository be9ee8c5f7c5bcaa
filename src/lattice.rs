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

//! Voxel lattice and scalar fields defined on it.
//!
//! All fields of a run share one [`Lattice`]. Cells are addressed either by
//! `[i, j, k]` or by the linear index `(i * ny + j) * nz + k`. The lattice is
//! periodic as seen by the correlation engine; [`Lattice::wrap`] maps signed
//! offsets onto it.

use crate::{
    error::{Result, ScanError},
    Vector3,
};
use get_size::GetSize;
use num_traits::Zero;

/// Rectangular lattice with isotropic spacing
#[derive(Debug, Clone, PartialEq)]
pub struct Lattice {
    /// World position of cell `[0, 0, 0]` (Å)
    origin: Vector3,
    /// Voxel spacing (Å)
    spacing: f64,
    /// Number of cells along x, y, z
    shape: [usize; 3],
}

impl Lattice {
    pub fn new(origin: Vector3, spacing: f64, shape: [usize; 3]) -> Result<Self> {
        if !(spacing > 0.0 && spacing.is_finite()) {
            return Err(ScanError::input(format!(
                "voxel spacing must be positive, got {spacing}"
            )));
        }
        if shape.contains(&0) {
            return Err(ScanError::input(format!(
                "lattice has zero extent: {shape:?}"
            )));
        }
        Ok(Self {
            origin,
            spacing,
            shape,
        })
    }

    /// Lattice enclosing the box `[min, max]` plus `margin` on every side
    ///
    /// Each dimension is rounded up to a 5-smooth number which keeps the FFTs fast.
    pub fn enclosing(min: &Vector3, max: &Vector3, spacing: f64, margin: f64) -> Result<Self> {
        if !(spacing > 0.0) {
            return Err(ScanError::input(format!(
                "voxel spacing must be positive, got {spacing}"
            )));
        }
        let origin = min - Vector3::repeat(margin);
        let extent = max - min + Vector3::repeat(2.0 * margin);
        if extent.iter().any(|e| !e.is_finite() || *e < 0.0) {
            return Err(ScanError::input("degenerate bounding box"));
        }
        let cells = |length: f64| next_fast_len((length / spacing).ceil() as usize + 1);
        Self::new(
            origin,
            spacing,
            [cells(extent.x), cells(extent.y), cells(extent.z)],
        )
    }

    pub fn origin(&self) -> &Vector3 {
        &self.origin
    }

    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Volume of a single voxel (Å³)
    pub fn voxel_volume(&self) -> f64 {
        self.spacing.powi(3)
    }

    #[inline]
    pub fn index(&self, [i, j, k]: [usize; 3]) -> usize {
        (i * self.shape[1] + j) * self.shape[2] + k
    }

    #[inline]
    pub fn unravel(&self, index: usize) -> [usize; 3] {
        let k = index % self.shape[2];
        let ij = index / self.shape[2];
        [ij / self.shape[1], ij % self.shape[1], k]
    }

    /// World position of a cell center
    #[inline]
    pub fn position(&self, [i, j, k]: [usize; 3]) -> Vector3 {
        self.origin + Vector3::new(i as f64, j as f64, k as f64) * self.spacing
    }

    /// Nearest cell to a world position, if inside the lattice
    pub fn cell_of(&self, pos: &Vector3) -> Option<[usize; 3]> {
        let rel = (pos - self.origin) / self.spacing;
        let mut cell = [0; 3];
        for (axis, c) in cell.iter_mut().enumerate() {
            let n = rel[axis].round();
            if n < 0.0 || n >= self.shape[axis] as f64 {
                return None;
            }
            *c = n as usize;
        }
        Some(cell)
    }

    /// Map a signed cell offset onto the periodic lattice
    #[inline]
    pub fn wrap(&self, offset: [i64; 3]) -> [usize; 3] {
        let w = |o: i64, n: usize| o.rem_euclid(n as i64) as usize;
        [
            w(offset[0], self.shape[0]),
            w(offset[1], self.shape[1]),
            w(offset[2], self.shape[2]),
        ]
    }

    /// Inclusive range of cells along `axis` whose centers may lie within `radius` of `center`
    fn axis_range(&self, center: &Vector3, radius: f64, axis: usize) -> Option<(usize, usize)> {
        let lo = ((center[axis] - radius - self.origin[axis]) / self.spacing).ceil();
        let hi = ((center[axis] + radius - self.origin[axis]) / self.spacing).floor();
        let lo = lo.max(0.0);
        let hi = hi.min(self.shape[axis] as f64 - 1.0);
        (lo <= hi).then_some((lo as usize, hi as usize))
    }

    /// Visit all cells whose centers lie within `[r_min, r_max]` of `center`
    ///
    /// Cells outside the lattice are skipped; the callback receives the linear
    /// index and the distance.
    pub fn for_each_in_shell(
        &self,
        center: &Vector3,
        r_min: f64,
        r_max: f64,
        mut func: impl FnMut(usize, f64),
    ) {
        let (Some(xr), Some(yr), Some(zr)) = (
            self.axis_range(center, r_max, 0),
            self.axis_range(center, r_max, 1),
            self.axis_range(center, r_max, 2),
        ) else {
            return;
        };
        let (r_min2, r_max2) = (r_min * r_min, r_max * r_max);
        for i in xr.0..=xr.1 {
            for j in yr.0..=yr.1 {
                for k in zr.0..=zr.1 {
                    let d2 = (self.position([i, j, k]) - center).norm_squared();
                    if d2 >= r_min2 && d2 <= r_max2 {
                        func(self.index([i, j, k]), d2.sqrt());
                    }
                }
            }
        }
    }

    /// Visit all offsets `o` (in cells) with `|o * spacing - center| <= radius`
    ///
    /// Used for fields in the moving frame where the reference point sits on cell
    /// `[0, 0, 0]`; offsets are wrapped by the caller.
    pub fn for_each_offset_in_sphere(
        &self,
        center: &Vector3,
        radius: f64,
        mut func: impl FnMut([i64; 3]),
    ) {
        let s = self.spacing;
        let lo = |axis: usize| ((center[axis] - radius) / s).ceil() as i64;
        let hi = |axis: usize| ((center[axis] + radius) / s).floor() as i64;
        let r2 = radius * radius;
        for i in lo(0)..=hi(0) {
            for j in lo(1)..=hi(1) {
                for k in lo(2)..=hi(2) {
                    let p = Vector3::new(i as f64, j as f64, k as f64) * s;
                    if (p - center).norm_squared() <= r2 {
                        func([i, j, k]);
                    }
                }
            }
        }
    }
}

/// Smallest integer `>= n` with no prime factors other than 2, 3 and 5
///
/// ~~~
/// assert_eq!(dockscan::lattice::next_fast_len(7), 8);
/// assert_eq!(dockscan::lattice::next_fast_len(49), 50);
/// assert_eq!(dockscan::lattice::next_fast_len(97), 100);
/// ~~~
pub fn next_fast_len(n: usize) -> usize {
    let is_smooth = |mut m: usize| {
        for p in [2, 3, 5] {
            while m % p == 0 {
                m /= p;
            }
        }
        m == 1
    };
    (n.max(1)..).find(|&m| is_smooth(m)).unwrap_or(n)
}

/// The lattice owns no heap memory
fn lattice_heap_size(_: &Lattice) -> usize {
    0
}

/// Scalar field on a lattice
#[derive(Debug, Clone, PartialEq, GetSize)]
pub struct Grid<T: GetSize> {
    #[get_size(size_fn = lattice_heap_size)]
    lattice: Lattice,
    data: Vec<T>,
}

impl<T: GetSize + Clone> Grid<T> {
    /// Grid with all cells set to `value`
    pub fn filled(lattice: &Lattice, value: T) -> Self {
        Self {
            lattice: lattice.clone(),
            data: vec![value; lattice.len()],
        }
    }

    pub fn from_vec(lattice: &Lattice, data: Vec<T>) -> Result<Self> {
        if data.len() != lattice.len() {
            return Err(ScanError::input(format!(
                "grid data has {} values, lattice has {} cells",
                data.len(),
                lattice.len()
            )));
        }
        Ok(Self {
            lattice: lattice.clone(),
            data,
        })
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn get(&self, cell: [usize; 3]) -> &T {
        &self.data[self.lattice.index(cell)]
    }

    pub fn get_mut(&mut self, cell: [usize; 3]) -> &mut T {
        let index = self.lattice.index(cell);
        &mut self.data[index]
    }
}

impl<T: GetSize + Clone + Zero> Grid<T> {
    pub fn zeros(lattice: &Lattice) -> Self {
        Self::filled(lattice, T::zero())
    }
}

impl Grid<f64> {
    /// Set all cells whose centers lie within `radius` of `center` to `value`
    pub fn mark_sphere(&mut self, center: &Vector3, radius: f64, value: f64) {
        let data = &mut self.data;
        self.lattice
            .for_each_in_shell(center, 0.0, radius, |index, _| data[index] = value);
    }

    /// Add `value` to all cells whose centers lie within `[r_min, r_max]` of `center`
    pub fn add_shell(&mut self, center: &Vector3, r_min: f64, r_max: f64, value: f64) {
        let data = &mut self.data;
        self.lattice
            .for_each_in_shell(center, r_min, r_max, |index, _| data[index] += value);
    }

    /// Set cells of a sphere given relative to the reference cell `[0, 0, 0]`, wrapping around
    pub fn mark_sphere_wrapped(&mut self, center: &Vector3, radius: f64, value: f64) {
        let lattice = &self.lattice;
        let data = &mut self.data;
        lattice.for_each_offset_in_sphere(center, radius, |offset| {
            data[lattice.index(lattice.wrap(offset))] = value;
        });
    }

    /// Sum of all cell values
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Number of cells with a value above `threshold`
    pub fn count_above(&self, threshold: f64) -> usize {
        self.data.iter().filter(|v| **v > threshold).count()
    }
}
