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

//! Direct summation backend.
//!
//! Every translation gathers the receptor fields under the non-zero ligand
//! voxels, `corr(t) = Σ_o B(o)·A(t + o)`. The cost scales with the ligand
//! volume, so this is mainly a reference for the FFT backend.

use super::{check_lattice, CorrelationBackend, Correlations};
use crate::{error::Result, lattice::Lattice, pose::PoseFields, volumes::FixedVolumes};
use rayon::prelude::*;

/// Sparse gather backend operating on the receptor core and shell
#[derive(Debug, Clone)]
pub struct DirectBackend {
    lattice: Lattice,
    core: Vec<f64>,
    shell: Vec<f64>,
}

impl DirectBackend {
    pub fn new(volumes: &FixedVolumes) -> Self {
        Self {
            lattice: volumes.lattice().clone(),
            core: volumes.core.data().to_vec(),
            shell: volumes.shell.data().to_vec(),
        }
    }
}

impl CorrelationBackend for DirectBackend {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn correlate(&self, pose: &PoseFields) -> Result<Correlations> {
        check_lattice(self.name(), &self.lattice, pose)?;
        let [nx, ny, nz] = self.lattice.shape();
        let weights: Vec<([usize; 3], f64)> = pose
            .core_cells
            .iter()
            .map(|cell| (*cell, *pose.core.get(*cell)))
            .collect();
        let (clash, interaction) = (0..self.lattice.len())
            .into_par_iter()
            .map(|index| {
                let [i, j, k] = self.lattice.unravel(index);
                weights
                    .iter()
                    .fold((0.0, 0.0), |(clash, interaction), ([oi, oj, ok], w)| {
                        let cell = self
                            .lattice
                            .index([(i + oi) % nx, (j + oj) % ny, (k + ok) % nz]);
                        (clash + w * self.core[cell], interaction + w * self.shell[cell])
                    })
            })
            .unzip();
        Ok(Correlations { clash, interaction })
    }
}
