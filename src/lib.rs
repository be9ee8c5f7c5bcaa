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

//! Exhaustive six dimensional search of the relative pose of two rigid molecules,
//! counting for every non-clashing, interacting complex how many distance
//! restraints it satisfies.
//!
//! The scanning molecule (ligand) is rotated through a near-uniform set of
//! orientations and, for each orientation, every integer translation on a
//! voxel lattice is scored at once using FFT accelerated correlations.

pub mod accumulator;
pub mod backend;
pub mod config;
pub mod consistency;
pub mod error;
pub mod fft;
mod icosphere;
pub mod interactions;
pub mod lattice;
pub mod mrc;
pub mod pdb;
pub mod pose;
pub mod report;
pub mod restraint;
pub mod rotations;
pub mod scan;
pub mod structure;
pub mod tables;
pub mod volumes;

pub use config::{BackendKind, ScanParams};
pub use error::{Result, ScanError};
pub use icosphere::*;
pub use lattice::{Grid, Lattice};
pub use restraint::Restraint;
pub use rotations::{sample_rotations, Rotation, ROTATIONAL_VOLUME};
pub use scan::{ScanResults, Scanner};
pub use structure::{ResidueId, Structure};

extern crate pretty_env_logger;
#[macro_use]
extern crate log;

extern crate flate2;

pub type IcoSphere = hexasphere::Subdivided<(), hexasphere::shapes::IcoSphereBase>;
pub type Matrix3 = nalgebra::Matrix3<f64>;
pub type Vector3 = nalgebra::Vector3<f64>;
pub type UnitQuaternion = nalgebra::UnitQuaternion<f64>;
