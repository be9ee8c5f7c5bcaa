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

//! Residue interaction analysis.
//!
//! For every valid pose at or above the interaction cutoff, selected ligand
//! atoms are matched against selected receptor atoms within the interaction
//! distance. Candidate receptor atoms are looked up through a per-cell index
//! and confirmed by their exact distance.

use crate::{
    error::{Result, ScanError},
    lattice::Lattice,
    structure::{ResidueId, Structure},
    Vector3,
};
use get_size::GetSize;
use itertools::Itertools;
use serde::Serialize;

/// Atoms and residues taking part in the interaction analysis
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionSelection {
    pub receptor_residues: Vec<ResidueId>,
    pub ligand_residues: Vec<ResidueId>,
    /// (atom index, residue slot) in the receptor
    receptor_atoms: Vec<(usize, usize)>,
    /// (atom index, residue slot) in the ligand
    ligand_atoms: Vec<(usize, usize)>,
}

/// Atoms of the requested residues; all residues when `requested` is empty
fn select(
    structure: &Structure,
    requested: &[ResidueId],
    what: &str,
) -> Result<(Vec<ResidueId>, Vec<(usize, usize)>)> {
    let residues = if requested.is_empty() {
        structure.residues.iter().unique().cloned().collect_vec()
    } else {
        if let Some(missing) = requested.iter().find(|r| !structure.residues.contains(r)) {
            return Err(ScanError::input(format!("{what} residue {missing} not found")));
        }
        requested.iter().unique().cloned().collect_vec()
    };
    let atoms = structure
        .residues
        .iter()
        .enumerate()
        .filter_map(|(atom, residue)| {
            residues
                .iter()
                .position(|r| r == residue)
                .map(|slot| (atom, slot))
        })
        .collect();
    Ok((residues, atoms))
}

impl InteractionSelection {
    pub fn new(
        receptor: &Structure,
        ligand: &Structure,
        receptor_selection: &[ResidueId],
        ligand_selection: &[ResidueId],
    ) -> Result<Self> {
        let (receptor_residues, receptor_atoms) =
            select(receptor, receptor_selection, "receptor")?;
        let (ligand_residues, ligand_atoms) = select(ligand, ligand_selection, "ligand")?;
        debug!(
            "Interaction analysis: {} receptor residues ({} atoms), {} ligand residues ({} atoms)",
            receptor_residues.len(),
            receptor_atoms.len(),
            ligand_residues.len(),
            ligand_atoms.len()
        );
        Ok(Self {
            receptor_residues,
            ligand_residues,
            receptor_atoms,
            ligand_atoms,
        })
    }

    /// Ligand atom indices in the order used by the pose fields
    pub fn ligand_atom_indices(&self) -> Vec<usize> {
        self.ligand_atoms.iter().map(|(atom, _)| *atom).collect()
    }
}

/// Receptor atoms near each lattice cell, stored in compressed rows
#[derive(Debug, Clone)]
pub struct ContactIndex {
    lattice: Lattice,
    distance: f64,
    /// Positions and residue slots of the selected receptor atoms
    atoms: Vec<(Vector3, usize)>,
    /// `row_start[cell]..row_start[cell + 1]` indexes `members`
    row_start: Vec<u32>,
    members: Vec<u32>,
    /// Ligand residue slot of each selected ligand atom
    ligand_slots: Vec<usize>,
}

impl ContactIndex {
    /// Every receptor atom within `distance` of a point is listed in the cell nearest that point
    pub fn new(
        lattice: &Lattice,
        receptor: &Structure,
        selection: &InteractionSelection,
        distance: f64,
    ) -> Self {
        let atoms = selection
            .receptor_atoms
            .iter()
            .map(|(atom, slot)| (receptor.pos[*atom], *slot))
            .collect_vec();
        // nearest-cell rounding moves a point by at most half a voxel diagonal
        let reach = distance + 0.5 * 3f64.sqrt() * lattice.spacing();

        let mut counts = vec![0u32; lattice.len() + 1];
        for (pos, _) in &atoms {
            lattice.for_each_in_shell(pos, 0.0, reach, |cell, _| counts[cell + 1] += 1);
        }
        let row_start = counts
            .iter()
            .scan(0u32, |sum, n| {
                *sum += n;
                Some(*sum)
            })
            .collect_vec();
        let mut fill = row_start.clone();
        let mut members = vec![0u32; *row_start.last().unwrap_or(&0) as usize];
        for (i, (pos, _)) in atoms.iter().enumerate() {
            lattice.for_each_in_shell(pos, 0.0, reach, |cell, _| {
                members[fill[cell] as usize] = i as u32;
                fill[cell] += 1;
            });
        }
        trace!("Contact index with {} entries", members.len());
        Self {
            lattice: lattice.clone(),
            distance,
            atoms,
            row_start,
            members,
            ligand_slots: selection.ligand_atoms.iter().map(|(_, slot)| *slot).collect(),
        }
    }

    fn candidates(&self, cell: usize) -> &[u32] {
        let (start, end) = (self.row_start[cell], self.row_start[cell + 1]);
        &self.members[start as usize..end as usize]
    }

    /// Visit all (receptor slot, ligand slot) contacts for the ligand reference
    /// point on cell `translation` and rotated ligand atoms `ligand_atoms`
    pub fn for_each_contact(
        &self,
        translation: usize,
        ligand_atoms: &[Vector3],
        mut func: impl FnMut(usize, usize),
    ) {
        let origin = self.lattice.position(self.lattice.unravel(translation));
        let cutoff2 = self.distance * self.distance;
        for (rel, ligand_slot) in ligand_atoms.iter().zip(&self.ligand_slots) {
            let pos = origin + rel;
            let Some(cell) = self.lattice.cell_of(&pos) else {
                continue;
            };
            for &member in self.candidates(self.lattice.index(cell)) {
                let (receptor_pos, receptor_slot) = &self.atoms[member as usize];
                if (receptor_pos - pos).norm_squared() <= cutoff2 {
                    func(*receptor_slot, *ligand_slot);
                }
            }
        }
    }
}

/// Weighted contact counts per residue and consistency level
#[derive(Debug, Clone, PartialEq, GetSize)]
pub struct InteractionTally {
    n_levels: usize,
    /// `[residue][consistency]`, row-major
    receptor: Vec<f64>,
    ligand: Vec<f64>,
}

impl InteractionTally {
    pub fn new(n_receptor_residues: usize, n_ligand_residues: usize, n_levels: usize) -> Self {
        Self {
            n_levels,
            receptor: vec![0.0; n_receptor_residues * n_levels],
            ligand: vec![0.0; n_ligand_residues * n_levels],
        }
    }

    #[inline]
    pub fn add(&mut self, receptor_slot: usize, ligand_slot: usize, consistency: usize, weight: f64) {
        self.receptor[receptor_slot * self.n_levels + consistency] += weight;
        self.ligand[ligand_slot * self.n_levels + consistency] += weight;
    }

    pub fn merge(&mut self, other: &Self) {
        self.receptor
            .iter_mut()
            .zip(&other.receptor)
            .for_each(|(a, b)| *a += b);
        self.ligand
            .iter_mut()
            .zip(&other.ligand)
            .for_each(|(a, b)| *a += b);
    }

    /// Expected contacts per complex: counts divided by the accessible weight at each level
    ///
    /// Levels below `cutoff` or without accessible complexes are reported as zero.
    pub fn normalize(
        &self,
        selection: &InteractionSelection,
        accessible: &[f64],
        cutoff: usize,
    ) -> ResidueInteractions {
        let rows = |data: &[f64], residues: &[ResidueId]| {
            data.chunks(self.n_levels)
                .zip(residues)
                .map(|(row, residue)| ResidueRow {
                    residue: residue.clone(),
                    per_consistency: row
                        .iter()
                        .zip(accessible)
                        .enumerate()
                        .map(|(level, (count, total))| {
                            if level >= cutoff && *total > 0.0 {
                                count / total
                            } else {
                                0.0
                            }
                        })
                        .collect(),
                })
                .collect::<Vec<_>>()
        };
        ResidueInteractions {
            cutoff,
            receptor: rows(&self.receptor, &selection.receptor_residues),
            ligand: rows(&self.ligand, &selection.ligand_residues),
        }
    }
}

/// Average number of contacts a residue makes in complexes of a given consistency
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResidueRow {
    pub residue: ResidueId,
    /// Indexed by consistency level
    pub per_consistency: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResidueInteractions {
    /// Lowest consistency level included
    pub cutoff: usize,
    pub receptor: Vec<ResidueRow>,
    pub ligand: Vec<ResidueRow>,
}
