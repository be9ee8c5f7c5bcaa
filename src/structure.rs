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

use crate::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Residue identifier: chain and residue sequence number
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResidueId {
    pub chain: String,
    pub number: i32,
}

impl ResidueId {
    pub fn new(chain: impl Into<String>, number: i32) -> Self {
        Self {
            chain: chain.into(),
            number,
        }
    }
}

impl fmt::Display for ResidueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.chain, self.number)
    }
}

/// Rigid molecule stored as a structure of arrays
#[derive(Debug, Clone, Default)]
pub struct Structure {
    /// Particle positions (Å)
    pub pos: Vec<Vector3>,
    /// Van der Waals radii (Å)
    pub radii: Vec<f64>,
    /// Atom names, e.g. "CA"
    pub names: Vec<String>,
    /// Residue each atom belongs to
    pub residues: Vec<ResidueId>,
}

impl Structure {
    /// Append a single atom
    pub fn push(&mut self, pos: Vector3, radius: f64, name: &str, residue: ResidueId) {
        self.pos.push(pos);
        self.radii.push(radius);
        self.names.push(name.to_string());
        self.residues.push(residue);
    }

    pub fn len(&self) -> usize {
        self.pos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pos.is_empty()
    }

    /// Geometric center of all atoms
    pub fn center(&self) -> Vector3 {
        if self.is_empty() {
            return Vector3::zeros();
        }
        self.pos.iter().sum::<Vector3>() / self.len() as f64
    }

    /// Axis aligned bounding box of the atoms, each inflated by its radius plus `padding`
    pub fn bounding_box(&self, padding: f64) -> (Vector3, Vector3) {
        let mut min = Vector3::repeat(f64::INFINITY);
        let mut max = Vector3::repeat(f64::NEG_INFINITY);
        for (pos, radius) in self.pos.iter().zip(&self.radii) {
            let r = Vector3::repeat(radius + padding);
            min = min.inf(&(pos - r));
            max = max.sup(&(pos + r));
        }
        (min, max)
    }

    /// Largest distance from `origin` to any atom surface
    pub fn extent_from(&self, origin: &Vector3) -> f64 {
        self.pos
            .iter()
            .zip(&self.radii)
            .map(|(pos, radius)| (pos - origin).norm() + radius)
            .fold(0.0, f64::max)
    }

    /// Index of the atom matching chain, residue number and atom name
    pub fn find_atom(&self, chain: &str, number: i32, name: &str) -> Option<usize> {
        (0..self.len()).find(|&i| {
            self.residues[i].chain == chain
                && self.residues[i].number == number
                && self.names[i] == name
        })
    }

    /// Positions relative to the center, rotated by `rotation`
    pub fn rotated_about_center(&self, rotation: &Matrix3) -> Vec<Vector3> {
        let center = self.center();
        self.pos.iter().map(|p| rotation * (p - center)).collect()
    }
}

/// Van der Waals radius (Å) from element symbol (Bondi 1964); unknown elements get 1.8 Å
pub fn vdw_radius(element: &str) -> f64 {
    match element.to_ascii_uppercase().as_str() {
        "H" => 1.20,
        "C" => 1.70,
        "N" => 1.55,
        "O" => 1.52,
        "F" => 1.47,
        "P" => 1.80,
        "S" => 1.80,
        "CL" => 1.75,
        "SE" => 1.90,
        "BR" => 1.85,
        "I" => 1.98,
        "MG" => 1.73,
        "NA" => 2.27,
        "K" => 2.75,
        "ZN" => 1.39,
        "FE" => 1.94,
        "CA" => 2.31,
        _ => 1.80,
    }
}
