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

use std::f64::consts::PI;

use crate::{
    error::{Result, ScanError},
    IcoSphere, Vector3,
};
use glam::f32::Vec3A;
use hexasphere::AdjacencyBuilder;

/// Surface area of a unit sphere.
pub const UNIT_SPHERE_AREA: f64 = 4.0 * PI;

/// Make icosphere with at least `min_points` surface points (vertices).
///
/// This is done by iteratively subdividing the faces of an icosahedron
/// until at least `min_points` vertices are achieved.
/// The number of vertices on the icosphere is _N_ = 10 × (_n_divisions_ + 1)² + 2
/// whereby 0, 1, 2, ... subdivisions give 12, 42, 92, ... vertices, respectively.
///
/// ## Further reading
///
/// - <https://en.wikipedia.org/wiki/Loop_subdivision_surface>
/// - <https://danielsieger.com/blog/2021/03/27/generating-spheres.html>
pub fn make_icosphere(min_points: usize) -> Result<IcoSphere> {
    let points_per_division = |n_div: usize| 10 * (n_div + 1) * (n_div + 1) + 2;
    let n_divisions = (0..200)
        .find(|n_div| points_per_division(*n_div) >= min_points)
        .ok_or_else(|| ScanError::input(format!("too many vertices requested: {min_points}")))?;

    debug!(
        "Creating icosphere with {} divisions, {} vertices",
        n_divisions,
        points_per_division(n_divisions)
    );

    Ok(IcoSphere::new(n_divisions, |_| ()))
}

/// Make icosphere vertices as 3D vectors
///
/// ## Examples
/// ~~~
/// let vertices = dockscan::make_icosphere_vertices(20).unwrap();
/// assert_eq!(vertices.len(), 42);
/// ~~~
pub fn make_icosphere_vertices(min_points: usize) -> Result<Vec<Vector3>> {
    let icosphere = make_icosphere(min_points)?;
    Ok(extract_vertices(&icosphere))
}

/// Get the icosphere vertices as a vector of 3D vectors.
pub fn extract_vertices(icosphere: &IcoSphere) -> Vec<Vector3> {
    icosphere
        .raw_points()
        .iter()
        .map(|p| Vector3::new(p.x as f64, p.y as f64, p.z as f64))
        .collect()
}

/// Solid angle represented by each vertex of the icosphere
///
/// Every spherical face contributes one third of its area to each of its
/// three vertices, so the areas add up to 4π.
pub fn vertex_areas(icosphere: &IcoSphere) -> Vec<f64> {
    let indices = icosphere.get_all_indices();
    let vertices = icosphere.raw_points();
    let mut adjency = AdjacencyBuilder::new(vertices.len());
    adjency.add_indices(&indices);

    let areas: Vec<f64> = adjency
        .finish()
        .iter()
        .enumerate()
        .map(|(i, neighbors)| {
            // Ring of faces around vertex i, including the one closing the ring
            let n = neighbors.len();
            let area: f64 = (0..n)
                .map(|j| {
                    spherical_face_area(
                        &vertices[i],
                        &vertices[neighbors[j]],
                        &vertices[neighbors[(j + 1) % n]],
                    )
                })
                .sum();
            area / 3.0
        })
        .collect();

    let total_area = areas.iter().sum::<f64>();
    if !approx::relative_eq!(total_area, UNIT_SPHERE_AREA, epsilon = 1e-4) {
        warn!("Icosphere vertex areas sum to {total_area:.6}, expected 4π");
    }
    areas
}

/// Calculate the spherical face area of a triangle defined by three vertices
/// See <https://en.wikipedia.org/wiki/Spherical_trigonometry>
#[allow(non_snake_case)]
fn spherical_face_area(a: &Vec3A, b: &Vec3A, c: &Vec3A) -> f64 {
    let angle = |u: &Vec3A, v: &Vec3A, w: &Vec3A| {
        let vu = *u - *v * v.dot(*u);
        let vw = *w - *v * v.dot(*w);
        vu.angle_between(vw) as f64
    };
    let A = angle(b, a, c);
    let B = angle(c, b, a);
    let C = angle(a, c, b);
    A + B + C - PI // Spherical excess
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_icosphere() {
        assert_eq!(make_icosphere_vertices(1).unwrap().len(), 12);
        assert_eq!(make_icosphere_vertices(13).unwrap().len(), 42);
        assert_eq!(make_icosphere_vertices(43).unwrap().len(), 92);
        assert!(make_icosphere_vertices(10_000_000).is_err());

        let points = make_icosphere_vertices(1000).unwrap();
        assert_eq!(points.len(), 1002);
        let mut center = Vector3::zeros();
        for point in points {
            assert_relative_eq!(point.norm(), 1.0, epsilon = 1e-6);
            center += point;
        }
        assert_relative_eq!(center.norm(), 0.0, epsilon = 1e-1);
    }

    #[test]
    fn test_vertex_areas() {
        // icosahedron: all vertices equivalent
        let areas = vertex_areas(&make_icosphere(1).unwrap());
        for area in &areas {
            assert_relative_eq!(*area, UNIT_SPHERE_AREA / 12.0, epsilon = 1e-5);
        }
        let areas = vertex_areas(&make_icosphere(92).unwrap());
        assert_relative_eq!(areas.iter().sum::<f64>(), UNIT_SPHERE_AREA, epsilon = 1e-4);
        let ideal = UNIT_SPHERE_AREA / areas.len() as f64;
        let min = areas.iter().cloned().fold(f64::INFINITY, f64::min) / ideal;
        let max = areas.iter().cloned().fold(0.0, f64::max) / ideal;
        assert_relative_eq!(min, 0.7996549501752724, epsilon = 1e-5);
        assert_relative_eq!(max, 1.053539416842339, epsilon = 1e-4);
    }

    #[test]
    fn test_spherical_face_area() {
        // Equilateral triangle on the unit sphere (1/8 of a unit sphere)
        let [a, b, c] = [
            Vec3A::new(1.0, 0.0, 0.0),
            Vec3A::new(0.0, 1.0, 0.0),
            Vec3A::new(0.0, 0.0, 1.0),
        ];
        assert_relative_eq!(spherical_face_area(&a, &b, &c), 0.5 * PI, epsilon = 1e-6);
    }
}
