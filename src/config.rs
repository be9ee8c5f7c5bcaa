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

//! Run parameters, loadable from YAML.

use crate::{
    error::{Result, ScanError},
    structure::ResidueId,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which correlation back end to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Multi-core FFT correlation
    #[default]
    Fft,
    /// Direct summation over ligand voxels (reference; slow for large ligands)
    Direct,
    /// Accelerator (wgpu); requires the `gpu` feature
    Gpu,
}

/// Parameters for a restraint consistency scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanParams {
    /// Rotational sampling interval (degrees)
    pub angle: f64,
    /// Lattice voxel spacing (Å)
    pub voxel_spacing: f64,
    /// Thickness of the receptor interaction shell (Å)
    pub interaction_radius: f64,
    /// Maximum allowed clash volume (Å³)
    pub max_clash_volume: f64,
    /// Minimum required interaction volume (Å³)
    pub min_interaction_volume: f64,
    /// Restraint fields above this value count as satisfied
    pub restraint_epsilon: f64,
    /// Extra lattice margin around the receptor (Å); never smaller than the ligand extent
    pub margin: Option<f64>,
    /// Consistency cutoffs for which occupancy maps are accumulated
    pub occupancy_cutoffs: Vec<usize>,
    /// Accumulate residue interaction tallies
    pub interaction_analysis: bool,
    /// Lowest consistency level included in the interaction analysis (default: R - 1)
    pub interaction_cutoff: Option<usize>,
    /// Atom-atom distance counted as an interaction (Å)
    pub interaction_distance: f64,
    /// Receptor residues analyzed for interactions (empty: all)
    pub receptor_selection: Vec<ResidueId>,
    /// Ligand residues analyzed for interactions (empty: all)
    pub ligand_selection: Vec<ResidueId>,
    /// Number of worker threads (default: all logical cores)
    pub workers: Option<usize>,
    /// Correlation back end
    pub backend: BackendKind,
    /// Upper bound for the dry-run memory estimate (MiB)
    pub memory_limit_mb: f64,
    /// Show progress bars
    pub progress: bool,
    /// Directory receiving the consistency map of every rotation, `rotation_{n}.mrc`
    pub save_rotation_maps: Option<PathBuf>,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            angle: 20.0,
            voxel_spacing: 2.0,
            interaction_radius: 3.0,
            max_clash_volume: 200.0,
            min_interaction_volume: 300.0,
            restraint_epsilon: 0.5,
            margin: None,
            occupancy_cutoffs: Vec::new(),
            interaction_analysis: false,
            interaction_cutoff: None,
            interaction_distance: 3.0,
            receptor_selection: Vec::new(),
            ligand_selection: Vec::new(),
            workers: None,
            backend: BackendKind::default(),
            memory_limit_mb: 8192.0,
            progress: false,
            save_rotation_maps: None,
        }
    }
}

impl ScanParams {
    /// Load parameters from a YAML file; missing keys take their default values
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let params: Self = serde_yaml::from_reader(file).map_err(|err| {
            ScanError::input(format!("{}: {err}", path.as_ref().display()))
        })?;
        params.validate()?;
        Ok(params)
    }

    /// Reject parameters that would make the lattice or thresholds meaningless
    ///
    /// The rotational interval is checked by the rotation sampler.
    pub fn validate(&self) -> Result<()> {
        let positive = |value: f64, what: &str| {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(ScanError::input(format!("{what} must be positive, got {value}")))
            }
        };
        positive(self.voxel_spacing, "voxel spacing")?;
        positive(self.interaction_distance, "interaction distance")?;
        positive(self.memory_limit_mb, "memory limit")?;
        if !(self.interaction_radius >= 0.0) {
            return Err(ScanError::input("interaction radius must be non-negative"));
        }
        if !(self.max_clash_volume >= 0.0) || !(self.min_interaction_volume >= 0.0) {
            return Err(ScanError::input("volume thresholds must be non-negative"));
        }
        if !self.restraint_epsilon.is_finite() || self.restraint_epsilon < 0.0 {
            return Err(ScanError::input("restraint epsilon must be non-negative"));
        }
        if self.margin.is_some_and(|m| !(m >= 0.0)) {
            return Err(ScanError::input("lattice margin must be non-negative"));
        }
        if self.workers == Some(0) {
            return Err(ScanError::input("at least one worker is required"));
        }
        Ok(())
    }

    /// Maximum clash volume expressed in voxels
    pub fn max_clash_voxels(&self) -> f64 {
        self.max_clash_volume / self.voxel_spacing.powi(3)
    }

    /// Minimum interaction volume expressed in voxels
    pub fn min_interaction_voxels(&self) -> f64 {
        self.min_interaction_volume / self.voxel_spacing.powi(3)
    }

    /// Number of worker threads to use
    pub fn n_workers(&self) -> usize {
        self.workers.unwrap_or_else(rayon::current_num_threads)
    }
}
