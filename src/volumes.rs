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

//! Fixed-frame fields of the receptor.

use crate::{
    config::ScanParams,
    error::{Result, ScanError},
    lattice::{Grid, Lattice},
    structure::Structure,
};

/// Lattice for a scan of `ligand` around `receptor`
///
/// The receptor box is padded by the interaction range and by a margin of at
/// least the ligand extent plus one voxel so that circular correlations never
/// wrap ligand density onto the receptor.
pub fn scan_lattice(
    receptor: &Structure,
    ligand: &Structure,
    params: &ScanParams,
) -> Result<Lattice> {
    if receptor.is_empty() || ligand.is_empty() {
        return Err(ScanError::input("receptor and ligand must contain atoms"));
    }
    let padding = params.interaction_radius.max(params.interaction_distance);
    let (min, max) = receptor.bounding_box(padding);
    let ligand_extent = ligand.extent_from(&ligand.center());
    let margin = params
        .margin
        .unwrap_or(0.0)
        .max(ligand_extent + params.voxel_spacing);
    let lattice = Lattice::enclosing(&min, &max, params.voxel_spacing, margin)?;
    debug!(
        "Lattice {:?} at {:.1} Å spacing; ligand extent {:.1} Å, margin {:.1} Å",
        lattice.shape(),
        lattice.spacing(),
        ligand_extent,
        margin
    );
    Ok(lattice)
}

/// Receptor exclusion core and interaction shell on the scan lattice
#[derive(Debug, Clone)]
pub struct FixedVolumes {
    /// 1 inside any receptor van der Waals sphere
    pub core: Grid<f64>,
    /// 1 within `interaction_radius` of the core surface, excluding the core
    pub shell: Grid<f64>,
}

impl FixedVolumes {
    pub fn new(receptor: &Structure, lattice: &Lattice, interaction_radius: f64) -> Self {
        let mut core: Grid<f64> = Grid::zeros(lattice);
        let mut dilated: Grid<f64> = Grid::zeros(lattice);
        for (pos, radius) in receptor.pos.iter().zip(&receptor.radii) {
            core.mark_sphere(pos, *radius, 1.0);
            dilated.mark_sphere(pos, radius + interaction_radius, 1.0);
        }
        let mut shell = dilated;
        shell
            .data_mut()
            .iter_mut()
            .zip(core.data())
            .for_each(|(s, c)| *s -= c);
        trace!(
            "Receptor core {} voxels, interaction shell {} voxels",
            core.count_above(0.5),
            shell.count_above(0.5)
        );
        Self { core, shell }
    }

    pub fn lattice(&self) -> &Lattice {
        self.core.lattice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{structure::ResidueId, Vector3};
    use approx::assert_relative_eq;

    fn atom(x: f64) -> Structure {
        let mut s = Structure::default();
        s.push(Vector3::new(x, 0.0, 0.0), 2.0, "CA", ResidueId::new("A", 1));
        s
    }

    #[test]
    fn test_lattice_margin() {
        let params = ScanParams {
            voxel_spacing: 1.0,
            ..Default::default()
        };
        let lattice = scan_lattice(&atom(0.0), &atom(0.0), &params).unwrap();
        // receptor box ±(2 + 3), margin 2 + 1
        assert_relative_eq!(lattice.origin().x, -8.0);
        assert!(lattice.shape().iter().all(|n| *n >= 17));
        assert!(scan_lattice(&Structure::default(), &atom(0.0), &params).is_err());
    }

    #[test]
    fn test_core_and_shell_are_disjoint() {
        let lattice = Lattice::new(Vector3::repeat(-6.0), 1.0, [13, 13, 13]).unwrap();
        let volumes = FixedVolumes::new(&atom(0.0), &lattice, 2.0);
        for (c, s) in volumes.core.data().iter().zip(volumes.shell.data()) {
            assert!(*c == 0.0 || *s == 0.0);
            assert!(*c == 0.0 || *c == 1.0);
            assert!(*s == 0.0 || *s == 1.0);
        }
        assert_relative_eq!(*volumes.core.get([6, 6, 6]), 1.0);
        assert_relative_eq!(*volumes.shell.get([9, 6, 6]), 1.0);
        assert_relative_eq!(*volumes.shell.get([6, 6, 6]), 0.0);
        assert_relative_eq!(*volumes.shell.get([11, 6, 6]), 0.0);
    }
}
