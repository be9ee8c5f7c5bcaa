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

//! Exhaustive, near-uniform sampling of orientation space, SO(3).
//!
//! An orientation is described by the direction of the body z-axis,
//! taken from the vertices of an icosphere, and a spin ψ about that axis.
//! Each (vertex, spin) pair is visited exactly once and weighted by the
//! solid angle of its vertex times the spin interval, so that the weights
//! add up to [`ROTATIONAL_VOLUME`].

use crate::{
    error::{Result, ScanError},
    icosphere::{extract_vertices, make_icosphere, vertex_areas},
    Matrix3, UnitQuaternion, Vector3,
};
use itertools::Itertools;
use iter_num_tools::lin_space;
use std::f64::consts::PI;

/// Sum of all rotation weights: 4π (directions) × 2π (spin) / 2
pub const ROTATIONAL_VOLUME: f64 = 4.0 * PI * PI;

/// Rotation matrix with its sampling weight
#[derive(Debug, Clone, PartialEq)]
pub struct Rotation {
    pub matrix: Matrix3,
    /// Orientational volume represented by this rotation
    pub weight: f64,
}

impl Rotation {
    pub fn new(matrix: Matrix3, weight: f64) -> Self {
        Self { matrix, weight }
    }

    /// Identity carrying the full rotational volume; useful for translational scans only
    pub fn identity() -> Self {
        Self::new(Matrix3::identity(), ROTATIONAL_VOLUME)
    }
}

/// Quaternion turning the z-axis onto `direction`
///
/// The antiparallel case is a half turn about x.
fn z_axis_to(direction: &Vector3) -> UnitQuaternion {
    UnitQuaternion::rotation_between(&Vector3::z(), direction).unwrap_or_else(|| {
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI)
    })
}

/// Near-uniform rotations with an angular spacing of about `angle` degrees
///
/// The first rotation is exactly the identity.
///
/// ~~~
/// let rotations = dockscan::sample_rotations(90.0).unwrap();
/// assert_eq!(rotations[0].matrix, dockscan::Matrix3::identity());
/// let total: f64 = rotations.iter().map(|r| r.weight).sum();
/// approx::assert_relative_eq!(total, dockscan::ROTATIONAL_VOLUME, epsilon = 1e-3);
/// ~~~
pub fn sample_rotations(angle: f64) -> Result<Vec<Rotation>> {
    if !(angle > 0.0 && angle <= 180.0) {
        return Err(ScanError::Sampling { angle });
    }
    let resolution = angle.to_radians();
    let min_points = (4.0 * PI / (resolution * resolution)).round().max(1.0) as usize;
    let icosphere = make_icosphere(min_points)?;
    let areas = vertex_areas(&icosphere);
    let mut vertices = extract_vertices(&icosphere);

    // Turn the sphere so that the first vertex coincides with the z-axis
    let align = z_axis_to(&vertices[0]).inverse();
    vertices
        .iter_mut()
        .for_each(|v| *v = align.transform_vector(v).normalize());

    let n_spin = (2.0 * PI / resolution).ceil().max(1.0) as usize;
    let spin_step = 2.0 * PI / n_spin as f64;
    let spin_angles = lin_space(0.0..2.0 * PI, n_spin).collect_vec();

    let rotations = vertices
        .iter()
        .zip(areas.iter())
        .enumerate()
        .cartesian_product(spin_angles.iter().enumerate())
        .map(|((i, (direction, area)), (spin, psi))| {
            let tilt = if i == 0 {
                UnitQuaternion::identity()
            } else {
                z_axis_to(direction)
            };
            let q = tilt * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), *psi);
            let matrix = if i == 0 && spin == 0 {
                Matrix3::identity()
            } else {
                q.to_rotation_matrix().into_inner()
            };
            Rotation::new(matrix, area * spin_step / 2.0)
        })
        .collect_vec();

    debug!(
        "{} rotations: {} directions × {} spins ({:.1}° apart)",
        rotations.len(),
        vertices.len(),
        n_spin,
        angle
    );
    Ok(rotations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_invalid_angles() {
        for angle in [0.0, -10.0, 180.1, f64::NAN] {
            assert!(matches!(
                sample_rotations(angle),
                Err(ScanError::Sampling { .. })
            ));
        }
        assert!(sample_rotations(180.0).is_ok());
    }

    #[test]
    fn test_rotations_are_proper_and_weighted() {
        let rotations = sample_rotations(30.0).unwrap();
        assert_eq!(rotations[0].matrix, Matrix3::identity());
        for rotation in &rotations {
            let m = &rotation.matrix;
            assert_relative_eq!(m * m.transpose(), Matrix3::identity(), epsilon = 1e-10);
            assert_relative_eq!(m.determinant(), 1.0, epsilon = 1e-10);
            assert!(rotation.weight > 0.0);
        }
        let total: f64 = rotations.iter().map(|r| r.weight).sum();
        assert_relative_eq!(total, ROTATIONAL_VOLUME, epsilon = 1e-3);
    }

    #[test]
    fn test_rotations_are_distinct() {
        let rotations = sample_rotations(45.0).unwrap();
        for (a, b) in rotations.iter().tuple_combinations() {
            assert!((a.matrix - b.matrix).norm() > 1e-3);
        }
    }

    #[test]
    fn test_finer_spacing_gives_more_rotations() {
        let counts = [90.0, 45.0, 30.0, 15.0]
            .iter()
            .map(|angle| sample_rotations(*angle).unwrap().len())
            .collect_vec();
        assert!(counts.windows(2).all(|w| w[0] < w[1]), "{counts:?}");
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(sample_rotations(40.0).unwrap(), sample_rotations(40.0).unwrap());
    }
}
