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

//! Global statistics of a finished scan.
//!
//! All counts are weighted by the rotational weight of the sampled
//! orientation, so that they measure a volume in 6D pose space (in voxels × rad³).

use average::Variance;
use itertools::Itertools;
use itertools_num::ItertoolsNum;
use serde::Serialize;

/// Weighted number of valid complexes per consistency level `0..=R`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessibleComplexes {
    pub counts: Vec<f64>,
}

impl AccessibleComplexes {
    pub fn n_restraints(&self) -> usize {
        self.counts.len().saturating_sub(1)
    }

    /// Total weighted volume of valid complexes
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Weighted number of complexes satisfying `n` or more restraints, for `n = 0..=R`
    ///
    /// ~~~
    /// use dockscan::tables::AccessibleComplexes;
    /// let table = AccessibleComplexes { counts: vec![5.0, 3.0, 1.0] };
    /// assert_eq!(table.at_least(), vec![9.0, 4.0, 1.0]);
    /// ~~~
    pub fn at_least(&self) -> Vec<f64> {
        let mut reversed = self.counts.iter().rev().copied().cumsum().collect_vec();
        reversed.reverse();
        reversed
    }

    /// Highest consistency level reached by any complex
    pub fn max_consistency(&self) -> Option<usize> {
        self.counts.iter().rposition(|c| *c > 0.0)
    }
}

/// Weighted violation counts, `counts[restraint][consistency]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViolationTable {
    pub counts: Vec<Vec<f64>>,
}

impl ViolationTable {
    /// Build from a flat, row-major `R × (R + 1)` array
    pub fn from_flat(n_restraints: usize, flat: &[f64]) -> Self {
        Self {
            counts: flat
                .chunks(n_restraints + 1)
                .take(n_restraints)
                .map(|row| row.to_vec())
                .collect(),
        }
    }

    pub fn n_restraints(&self) -> usize {
        self.counts.len()
    }

    /// Total violation weight of each restraint over all consistency levels
    pub fn totals(&self) -> Vec<f64> {
        self.counts.iter().map(|row| row.iter().sum()).collect()
    }

    /// Fraction of complexes at each level that violate each restraint
    ///
    /// Levels without accessible complexes give zero.
    pub fn fractions(&self, accessible: &AccessibleComplexes) -> Vec<Vec<f64>> {
        self.counts
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&accessible.counts)
                    .map(|(v, total)| if *total > 0.0 { v / total } else { 0.0 })
                    .collect()
            })
            .collect()
    }

    /// Z-scores of the violation fractions across restraints, per consistency level
    ///
    /// `z[i][c] = (f[i][c] - mean_c) / sd_c`; levels with no spread (or fewer than
    /// two restraints) give zero. A large positive score marks a restraint that is
    /// violated more often than the others, i.e. a likely false positive.
    pub fn z_scores(&self, accessible: &AccessibleComplexes) -> Vec<Vec<f64>> {
        let fractions = self.fractions(accessible);
        let n_levels = accessible.counts.len();
        let mut z = vec![vec![0.0; n_levels]; self.n_restraints()];
        for level in 0..n_levels {
            let stats: Variance = fractions.iter().map(|row| row[level]).collect();
            let sd = stats.sample_variance().sqrt();
            if self.n_restraints() < 2 || !(sd > 0.0) {
                continue;
            }
            for (row, f) in z.iter_mut().zip(&fractions) {
                row[level] = (f[level] - stats.mean()) / sd;
            }
        }
        z
    }

    /// One Z-score per restraint: the average over levels that have complexes
    /// and are below the maximum consistency (where every restraint is satisfied)
    pub fn combined_z_scores(&self, accessible: &AccessibleComplexes) -> Vec<f64> {
        let z = self.z_scores(accessible);
        let levels = (0..accessible.counts.len())
            .filter(|&c| c < self.n_restraints() && accessible.counts[c] > 0.0)
            .collect_vec();
        z.iter()
            .map(|row| {
                if levels.is_empty() {
                    0.0
                } else {
                    levels.iter().map(|&c| row[c]).sum::<f64>() / levels.len() as f64
                }
            })
            .collect()
    }
}

/// Weighted count of complexes for each combination of satisfied restraints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestraintSets {
    pub n_restraints: usize,
    /// Indexed by bitmask; bit `i` set if restraint `i` is satisfied
    pub counts: Vec<f64>,
}

impl RestraintSets {
    /// Non-empty combinations ordered by consistency, then by mask
    pub fn nonzero(&self) -> Vec<(u64, f64)> {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0.0)
            .map(|(mask, count)| (mask as u64, *count))
            .sorted_by_key(|(mask, _)| (mask.count_ones(), *mask))
            .collect()
    }

    /// Flags of a mask as a string such as `1 0 1`, restraint 0 first
    pub fn flags(&self, mask: u64) -> String {
        (0..self.n_restraints)
            .map(|i| if mask & (1 << i) != 0 { "1" } else { "0" })
            .join(" ")
    }
}
