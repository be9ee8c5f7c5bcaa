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

//! Validity of translations and restraint consistency.
//!
//! A translation is *valid* when the clash volume does not exceed the allowed
//! maximum and the interaction volume reaches the required minimum. For valid
//! translations the satisfied restraints are collected in a bitmask whose
//! population count is the consistency.

use crate::{backend::Correlations, config::ScanParams, lattice::Grid, restraint::MAX_RESTRAINTS};
use rayon::prelude::*;

/// Bitmask of satisfied restraints; bit `i` is restraint `i`
pub type RestraintMask = u64;

/// Number of satisfied restraints in a mask
#[inline]
pub fn consistency(mask: RestraintMask) -> usize {
    mask.count_ones() as usize
}

/// Thresholds for valid, restraint-satisfying translations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Criteria {
    /// Largest allowed clash volume (voxels)
    pub max_clash: f64,
    /// Smallest required interaction volume (voxels)
    pub min_interaction: f64,
    /// Restraint fields strictly above this value count as satisfied
    pub epsilon: f64,
}

impl Criteria {
    pub fn from_params(params: &ScanParams) -> Self {
        Self {
            max_clash: params.max_clash_voxels(),
            min_interaction: params.min_interaction_voxels(),
            epsilon: params.restraint_epsilon,
        }
    }

    #[inline]
    pub fn is_valid(&self, clash: f64, interaction: f64) -> bool {
        clash <= self.max_clash && interaction >= self.min_interaction
    }

    /// Satisfied restraints at linear cell `index`
    #[inline]
    pub fn satisfied(&self, restraints: &[Grid<f64>], index: usize) -> RestraintMask {
        restraints
            .iter()
            .enumerate()
            .filter(|(_, field)| field.data()[index] > self.epsilon)
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }
}

/// Classify every translation of one orientation
///
/// Returns `None` for invalid translations and the mask of satisfied
/// restraints otherwise.
pub fn classify(
    criteria: &Criteria,
    correlations: &Correlations,
    restraints: &[Grid<f64>],
) -> Vec<Option<RestraintMask>> {
    debug_assert!(restraints.len() <= MAX_RESTRAINTS);
    correlations
        .clash
        .par_iter()
        .zip(correlations.interaction.par_iter())
        .enumerate()
        .map(|(index, (clash, interaction))| {
            criteria
                .is_valid(*clash, *interaction)
                .then(|| criteria.satisfied(restraints, index))
        })
        .collect()
}
