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

//! Running statistics over (rotation × translation) samples.
//!
//! Each worker folds its rotations into a private [`Accumulator`]; the partial
//! accumulators are combined with [`Accumulator::merge`], which takes the
//! maximum for the consistency grid and sums everything else. The merge is
//! associative and commutative, so the result does not depend on how rotations
//! are distributed over workers.

use crate::{
    consistency::{consistency, RestraintMask},
    error::{NumericalWarning, Result, ScanError},
    interactions::{ContactIndex, InteractionTally},
    pose::PoseFields,
    rotations::ROTATIONAL_VOLUME,
};
use get_size::GetSize;

/// Restraint combinations are tabulated up to this many restraints (2^16 entries)
pub const MAX_SET_RESTRAINTS: usize = 16;

/// Relative tolerance for sums that depend on summation order
pub const SUM_TOLERANCE: f64 = 1e-9;

/// Relative tolerance for the summed rotation weights; vertex areas are computed in single precision
pub const WEIGHT_TOLERANCE: f64 = 1e-4;

/// Partial or complete statistics of a scan
#[derive(Debug, Clone, PartialEq, GetSize)]
pub struct Accumulator {
    pub(crate) n_restraints: usize,
    /// Highest consistency per cell; -1 where no valid pose was found
    pub(crate) consistency: Vec<i32>,
    /// Weight per consistency level, `0..=R`
    pub(crate) accessible: Vec<f64>,
    /// Violation weight, row-major `[restraint][consistency]`
    pub(crate) violations: Vec<f64>,
    /// Weight per satisfied-restraint bitmask
    pub(crate) restraint_sets: Option<Vec<f64>>,
    pub(crate) occupancy_cutoffs: Vec<usize>,
    /// One grid per occupancy cutoff
    pub(crate) occupancy: Vec<Vec<f64>>,
    pub(crate) interactions: Option<InteractionTally>,
    pub(crate) interaction_cutoff: usize,
    /// Number of rotations folded in
    pub(crate) n_rotations: usize,
    /// Summed weight of the rotations folded in
    pub(crate) total_weight: f64,
}

impl Accumulator {
    pub fn new(n_cells: usize, n_restraints: usize, occupancy_cutoffs: &[usize]) -> Self {
        let n_levels = n_restraints + 1;
        Self {
            n_restraints,
            consistency: vec![-1; n_cells],
            accessible: vec![0.0; n_levels],
            violations: vec![0.0; n_restraints * n_levels],
            restraint_sets: (n_restraints <= MAX_SET_RESTRAINTS)
                .then(|| vec![0.0; 1 << n_restraints]),
            occupancy_cutoffs: occupancy_cutoffs.to_vec(),
            occupancy: vec![vec![0.0; n_cells]; occupancy_cutoffs.len()],
            interactions: None,
            interaction_cutoff: 0,
            n_rotations: 0,
            total_weight: 0.0,
        }
    }

    /// Enable the interaction analysis for consistency levels `>= cutoff`
    pub fn with_interactions(mut self, tally: InteractionTally, cutoff: usize) -> Self {
        self.interactions = Some(tally);
        self.interaction_cutoff = cutoff;
        self
    }

    pub fn n_cells(&self) -> usize {
        self.consistency.len()
    }

    pub fn n_rotations(&self) -> usize {
        self.n_rotations
    }

    /// Fold the classified translations of one rotation
    ///
    /// `masks[t]` is `None` for invalid translations.
    pub fn fold(
        &mut self,
        pose: &PoseFields,
        masks: &[Option<RestraintMask>],
        contacts: Option<&ContactIndex>,
    ) {
        debug_assert_eq!(masks.len(), self.n_cells());
        let weight = pose.weight;
        let n_levels = self.n_restraints + 1;
        for (index, mask) in masks.iter().enumerate() {
            let Some(mask) = *mask else {
                continue;
            };
            let c = consistency(mask);
            self.accessible[c] += weight;
            for i in (0..self.n_restraints).filter(|i| mask & (1 << i) == 0) {
                self.violations[i * n_levels + c] += weight;
            }
            let best = &mut self.consistency[index];
            *best = (*best).max(c as i32);
            if let Some(sets) = self.restraint_sets.as_mut() {
                sets[mask as usize] += weight;
            }
            for (cutoff, grid) in self.occupancy_cutoffs.iter().zip(&mut self.occupancy) {
                if c >= *cutoff {
                    grid[index] += weight;
                }
            }
            if let (Some(tally), Some(contacts)) = (self.interactions.as_mut(), contacts) {
                if c >= self.interaction_cutoff {
                    contacts.for_each_contact(index, &pose.selected_atoms, |r, l| {
                        tally.add(r, l, c, weight)
                    });
                }
            }
        }
        self.n_rotations += 1;
        self.total_weight += weight;
    }

    /// Combine two partial accumulators
    pub fn merge(mut self, other: Self) -> Result<Self> {
        if self.n_restraints != other.n_restraints
            || self.n_cells() != other.n_cells()
            || self.occupancy_cutoffs != other.occupancy_cutoffs
        {
            return Err(ScanError::input("cannot merge accumulators of different layout"));
        }
        let add = |a: &mut Vec<f64>, b: &[f64]| a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
        self.consistency
            .iter_mut()
            .zip(&other.consistency)
            .for_each(|(a, b)| *a = (*a).max(*b));
        add(&mut self.accessible, &other.accessible);
        add(&mut self.violations, &other.violations);
        if let (Some(a), Some(b)) = (self.restraint_sets.as_mut(), &other.restraint_sets) {
            add(a, b);
        }
        for (a, b) in self.occupancy.iter_mut().zip(&other.occupancy) {
            add(a, b);
        }
        if let (Some(a), Some(b)) = (self.interactions.as_mut(), &other.interactions) {
            a.merge(b);
        }
        self.n_rotations += other.n_rotations;
        self.total_weight += other.total_weight;
        Ok(self)
    }

    /// Total weight of valid samples with consistency `>= cutoff`
    pub fn weight_at_least(&self, cutoff: usize) -> f64 {
        self.accessible.iter().skip(cutoff).sum()
    }

    /// Summed weight of the rotations folded in
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Cross-check the redundant sums; mismatches beyond [`SUM_TOLERANCE`] are reported
    ///
    /// - every sample at level `c` violates exactly `R - c` restraints
    /// - the restraint-set table and occupancy grids hold the same weight as the levels they cover
    /// - the valid weight cannot exceed the number of cells times the rotation weight
    /// - the rotation weights add up to [`ROTATIONAL_VOLUME`] if `complete`, and never exceed it
    pub fn check(&self, complete: bool) -> Vec<NumericalWarning> {
        let mut warnings = Vec::new();
        let mut compare = |quantity: String, expected: f64, actual: f64| {
            if (expected - actual).abs() > SUM_TOLERANCE * expected.abs().max(1.0) {
                warnings.push(NumericalWarning {
                    quantity,
                    expected,
                    actual,
                });
            }
        };
        let n_levels = self.n_restraints + 1;
        for c in 0..n_levels {
            let violated: f64 = (0..self.n_restraints)
                .map(|i| self.violations[i * n_levels + c])
                .sum();
            let expected = (self.n_restraints - c) as f64 * self.accessible[c];
            compare(format!("violations at consistency {c}"), expected, violated);
        }
        let total: f64 = self.accessible.iter().sum();
        if let Some(sets) = &self.restraint_sets {
            compare("restraint sets".to_string(), total, sets.iter().sum());
        }
        for (cutoff, grid) in self.occupancy_cutoffs.iter().zip(&self.occupancy) {
            compare(
                format!("occupancy for consistency >= {cutoff}"),
                self.weight_at_least(*cutoff),
                grid.iter().sum(),
            );
        }
        let bound = self.n_cells() as f64 * self.total_weight;
        if total > bound * (1.0 + SUM_TOLERANCE) {
            warnings.push(NumericalWarning {
                quantity: "valid weight bound (cells × rotation weight)".to_string(),
                expected: bound,
                actual: total,
            });
        }
        let excess = self.total_weight - ROTATIONAL_VOLUME;
        if excess > WEIGHT_TOLERANCE * ROTATIONAL_VOLUME
            || (complete && excess.abs() > WEIGHT_TOLERANCE * ROTATIONAL_VOLUME)
        {
            warnings.push(NumericalWarning {
                quantity: "rotational volume".to_string(),
                expected: ROTATIONAL_VOLUME,
                actual: self.total_weight,
            });
        }
        for warning in &warnings {
            warn!("Numerical inconsistency: {warning}");
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lattice::Grid, Lattice, Matrix3, Vector3};
    use approx::assert_relative_eq;

    fn pose(weight: f64) -> PoseFields {
        let lattice = Lattice::new(Vector3::zeros(), 1.0, [1, 1, 4]).unwrap();
        PoseFields {
            rotation: Matrix3::identity(),
            weight,
            core: Grid::zeros(&lattice),
            core_cells: vec![],
            restraints: vec![],
            selected_atoms: vec![],
        }
    }

    #[test]
    fn test_fold() {
        let mut acc = Accumulator::new(4, 2, &[1, 2]);
        acc.fold(&pose(0.5), &[None, Some(0b00), Some(0b01), Some(0b11)], None);
        assert_eq!(acc.consistency, vec![-1, 0, 1, 2]);
        assert_eq!(acc.accessible, vec![0.5, 0.5, 0.5]);
        // restraint 0 is violated at level 0; restraint 1 at levels 0 and 1
        assert_eq!(acc.violations, vec![0.5, 0.0, 0.0, 0.5, 0.5, 0.0]);
        assert_eq!(acc.restraint_sets, Some(vec![0.5, 0.5, 0.0, 0.5]));
        assert_eq!(acc.occupancy[0], vec![0.0, 0.0, 0.5, 0.5]);
        assert_eq!(acc.occupancy[1], vec![0.0, 0.0, 0.0, 0.5]);
        assert_relative_eq!(acc.weight_at_least(1), 1.0);
        assert!(acc.check(false).is_empty());
    }

    #[test]
    fn test_merge_is_order_independent() {
        let masks_a = [Some(0b01), None, Some(0b11), Some(0b00)];
        let masks_b = [Some(0b10), Some(0b10), None, Some(0b00)];
        let fold = |first: (&[Option<u64>], f64), second: (&[Option<u64>], f64)| {
            let mut a = Accumulator::new(4, 2, &[1]);
            a.fold(&pose(first.1), first.0, None);
            let mut b = Accumulator::new(4, 2, &[1]);
            b.fold(&pose(second.1), second.0, None);
            a.merge(b).unwrap()
        };
        let ab = fold((&masks_a[..], 0.25), (&masks_b[..], 0.75));
        let ba = fold((&masks_b[..], 0.75), (&masks_a[..], 0.25));
        assert_eq!(ab, ba);
        assert_eq!(ab.consistency, vec![1, 1, 2, 0]);
        assert_eq!(ab.n_rotations(), 2);
        assert!(ab.check(false).is_empty());

        let mut sequential = Accumulator::new(4, 2, &[1]);
        sequential.fold(&pose(0.25), &masks_a, None);
        sequential.fold(&pose(0.75), &masks_b, None);
        assert_eq!(sequential, ab);
    }

    #[test]
    fn test_merge_rejects_other_layout() {
        let a = Accumulator::new(4, 2, &[]);
        let b = Accumulator::new(4, 3, &[]);
        assert!(a.merge(b).is_err());
    }

    #[test]
    fn test_check_flags_inconsistency() {
        let mut acc = Accumulator::new(4, 1, &[]);
        acc.fold(&pose(1.0), &[Some(0), Some(1), None, None], None);
        assert!(acc.check(false).is_empty());
        acc.violations[0] += 0.5;
        let warnings = acc.check(false);
        assert_eq!(warnings.len(), 1);
        assert_relative_eq!(warnings[0].actual, 1.5);
    }

    #[test]
    fn test_rotation_weight_checks() {
        let mut acc = Accumulator::new(4, 1, &[]);
        acc.fold(&pose(1.0), &[Some(0), Some(1), None, None], None);
        assert!(acc.check(false).is_empty());
        // a partial set cannot stand for the whole orientation space
        let warnings = acc.check(true);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].quantity, "rotational volume");

        let mut acc = Accumulator::new(4, 1, &[]);
        let full = pose(ROTATIONAL_VOLUME);
        acc.fold(&full, &[Some(0); 4], None);
        assert!(acc.check(true).is_empty());
        // the same orientations counted twice
        let twice = acc.clone().merge(acc).unwrap();
        assert_relative_eq!(twice.total_weight(), 2.0 * ROTATIONAL_VOLUME);
        let warnings = twice.check(false);
        assert_eq!(warnings.len(), 1);
        assert_relative_eq!(warnings[0].actual, 2.0 * ROTATIONAL_VOLUME);
    }

    #[test]
    fn test_valid_weight_bounded_by_cells() {
        let mut acc = Accumulator::new(2, 0, &[]);
        acc.fold(&pose(0.5), &[Some(0), Some(0)], None);
        assert!(acc.check(false).is_empty());
        acc.accessible[0] += 0.5;
        if let Some(sets) = acc.restraint_sets.as_mut() {
            sets[0] += 0.5;
        }
        let warnings = acc.check(false);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].quantity.starts_with("valid weight bound"));
        assert_relative_eq!(warnings[0].expected, 1.0);
    }

    #[test]
    fn test_no_restraint_sets_for_many_restraints() {
        let acc = Accumulator::new(1, MAX_SET_RESTRAINTS + 1, &[]);
        assert!(acc.restraint_sets.is_none());
        assert!(acc.get_heap_size() > 0);
    }
}
