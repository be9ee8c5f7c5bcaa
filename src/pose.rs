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

//! Fields of the scanning molecule for a single orientation.
//!
//! The ligand reference point is its geometric center. A translation `t`
//! places that point on the center of lattice cell `t`.

use crate::{
    lattice::{Grid, Lattice},
    restraint::Restraint,
    rotations::Rotation,
    structure::Structure,
    Matrix3, Vector3,
};

/// Ligand fields rebuilt for every rotation
#[derive(Debug, Clone, PartialEq)]
pub struct PoseFields {
    pub rotation: Matrix3,
    pub weight: f64,
    /// Rotated ligand core with the reference point on cell `[0, 0, 0]`, wrapped
    pub core: Grid<f64>,
    /// Non-zero cells of `core`
    pub core_cells: Vec<[usize; 3]>,
    /// Per restraint: number of satisfied atom pairs for each translation
    pub restraints: Vec<Grid<f64>>,
    /// Rotated ligand atoms selected for interaction analysis, relative to the reference point
    pub selected_atoms: Vec<Vector3>,
}

/// Atom pair of a restraint: receptor position and ligand position relative to the reference point
type RestraintPair = (Vector3, Vector3);

/// Builds [`PoseFields`] for any rotation of the ligand
#[derive(Debug, Clone)]
pub struct PoseFieldBuilder {
    lattice: Lattice,
    /// Ligand positions relative to its center
    ligand: Vec<Vector3>,
    radii: Vec<f64>,
    pairs: Vec<Vec<RestraintPair>>,
    bounds: Vec<(f64, f64)>,
    selection: Vec<usize>,
}

impl PoseFieldBuilder {
    /// `selection` lists ligand atoms followed through the interaction analysis
    pub fn new(
        lattice: &Lattice,
        receptor: &Structure,
        ligand: &Structure,
        restraints: &[Restraint],
        selection: Vec<usize>,
    ) -> Self {
        let center = ligand.center();
        let relative = |i: usize| ligand.pos[i] - center;
        let pairs = restraints
            .iter()
            .map(|r| {
                itertools::iproduct!(&r.receptor_atoms, &r.ligand_atoms)
                    .map(|(&i, &j)| (receptor.pos[i], relative(j)))
                    .collect()
            })
            .collect();
        Self {
            lattice: lattice.clone(),
            ligand: (0..ligand.len()).map(relative).collect(),
            radii: ligand.radii.clone(),
            pairs,
            bounds: restraints
                .iter()
                .map(|r| (r.min_distance, r.max_distance))
                .collect(),
            selection,
        }
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    pub fn n_restraints(&self) -> usize {
        self.bounds.len()
    }

    /// Ligand atom indices followed through the interaction analysis
    pub fn selection(&self) -> &[usize] {
        &self.selection
    }

    pub fn build(&self, rotation: &Rotation) -> PoseFields {
        let matrix = &rotation.matrix;
        let core = self.core(matrix);
        let core_cells = core
            .data()
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > 0.0)
            .map(|(index, _)| self.lattice.unravel(index))
            .collect();
        PoseFields {
            rotation: *matrix,
            weight: rotation.weight,
            core,
            core_cells,
            restraints: self.restraint_fields(matrix),
            selected_atoms: self
                .selection
                .iter()
                .map(|&i| matrix * self.ligand[i])
                .collect(),
        }
    }

    fn core(&self, matrix: &Matrix3) -> Grid<f64> {
        let mut core: Grid<f64> = Grid::zeros(&self.lattice);
        for (pos, radius) in self.ligand.iter().zip(&self.radii) {
            core.mark_sphere_wrapped(&(matrix * pos), *radius, 1.0);
        }
        core
    }

    /// Translations placing a ligand atom within the bounds of its receptor partner
    ///
    /// For the pair (a, b) these are the cells within `[min, max]` of `a - R·b`.
    fn restraint_fields(&self, matrix: &Matrix3) -> Vec<Grid<f64>> {
        self.pairs
            .iter()
            .zip(&self.bounds)
            .map(|(pairs, (min, max))| {
                let mut field: Grid<f64> = Grid::zeros(&self.lattice);
                for (receptor_pos, ligand_pos) in pairs {
                    field.add_shell(&(receptor_pos - matrix * ligand_pos), *min, *max, 1.0);
                }
                field
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::ResidueId;
    use approx::assert_relative_eq;

    fn setup() -> (Lattice, Structure, Structure) {
        let lattice = Lattice::new(Vector3::repeat(-10.0), 1.0, [21, 21, 21]).unwrap();
        let mut receptor = Structure::default();
        receptor.push(Vector3::zeros(), 1.5, "CA", ResidueId::new("A", 1));
        let mut ligand = Structure::default();
        ligand.push(Vector3::new(1.0, 0.0, 0.0), 1.0, "CA", ResidueId::new("B", 1));
        ligand.push(Vector3::new(-1.0, 0.0, 0.0), 1.0, "CB", ResidueId::new("B", 1));
        (lattice, receptor, ligand)
    }

    #[test]
    fn test_core_in_moving_frame() {
        let (lattice, receptor, ligand) = setup();
        let builder = PoseFieldBuilder::new(&lattice, &receptor, &ligand, &[], vec![0]);
        let fields = builder.build(&Rotation::identity());
        assert_eq!(fields.core_cells.len(), fields.core.count_above(0.5));
        assert_relative_eq!(*fields.core.get([1, 0, 0]), 1.0);
        assert_relative_eq!(*fields.core.get([20, 0, 0]), 1.0); // x = -1 wraps
        assert_relative_eq!(*fields.core.get([0, 0, 0]), 1.0);
        assert_relative_eq!(*fields.core.get([3, 0, 0]), 0.0);
        assert_relative_eq!(fields.selected_atoms[0], Vector3::new(1.0, 0.0, 0.0));
        assert!(fields.restraints.is_empty());
    }

    #[test]
    fn test_identical_rotations_give_identical_fields() {
        let (lattice, receptor, ligand) = setup();
        let restraints = [Restraint::new(0, 0, 3.0, 5.0)];
        let builder = PoseFieldBuilder::new(&lattice, &receptor, &ligand, &restraints, vec![]);
        let rotation = crate::rotations::sample_rotations(60.0).unwrap()[7].clone();
        assert_eq!(builder.build(&rotation), builder.build(&rotation));
    }

    #[test]
    fn test_restraint_field_in_translation_space() {
        let (lattice, receptor, ligand) = setup();
        let restraints = [Restraint::new(0, 0, 3.0, 5.0)];
        let builder = PoseFieldBuilder::new(&lattice, &receptor, &ligand, &restraints, vec![]);
        let field = &builder.build(&Rotation::identity()).restraints[0];
        // the restrained ligand atom sits at t + (1, 0, 0)
        for index in 0..lattice.len() {
            let t = lattice.position(lattice.unravel(index));
            let distance = (t + Vector3::x()).norm();
            let expected = if (3.0..=5.0).contains(&distance) { 1.0 } else { 0.0 };
            assert_relative_eq!(field.data()[index], expected);
        }
    }

    #[test]
    fn test_ambiguous_restraint_counts_pairs() {
        let (lattice, receptor, ligand) = setup();
        let restraints = [Restraint::ambiguous(vec![0], vec![0, 1], 0.5, 2.5)];
        let builder = PoseFieldBuilder::new(&lattice, &receptor, &ligand, &restraints, vec![]);
        let field = &builder.build(&Rotation::identity()).restraints[0];
        // at t = 0 both ligand atoms are 1 Å from the receptor atom
        assert_relative_eq!(*field.get([10, 10, 10]), 2.0);
        // at t = (2, 0, 0) only the second atom (at x = 1) is within bounds
        assert_relative_eq!(*field.get([12, 10, 10]), 1.0);
    }
}
