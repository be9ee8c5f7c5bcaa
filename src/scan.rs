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

//! Driver for the exhaustive rotation × translation search.

use crate::{
    accumulator::Accumulator,
    backend::{make_backend, CorrelationBackend},
    config::ScanParams,
    consistency::{classify, consistency, Criteria, RestraintMask},
    error::{NumericalWarning, Result, ScanError},
    interactions::{ContactIndex, InteractionSelection, InteractionTally, ResidueInteractions},
    lattice::{Grid, Lattice},
    mrc::write_mrc_file,
    pose::PoseFieldBuilder,
    restraint::{validate_restraints, Restraint},
    rotations::{sample_rotations, Rotation},
    structure::Structure,
    tables::{AccessibleComplexes, RestraintSets, ViolationTable},
    volumes::{scan_lattice, FixedVolumes},
};
use get_size::GetSize;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::time::Instant;

/// Rotations per accelerator submission
const GPU_BATCH_SIZE: usize = 8;

/// Rough memory need of a scan (MiB)
///
/// Counts the receptor volumes and spectrum, and per worker the accumulator,
/// the fields of one pose, the correlation buffers and the restraint masks.
pub fn estimate_memory_mb(
    lattice: &Lattice,
    n_restraints: usize,
    n_occupancy: usize,
    n_workers: usize,
) -> f64 {
    let n = lattice.len() as f64;
    let fixed = n * (2.0 * 8.0 + 16.0);
    let accumulator = n * (4.0 + 8.0 * n_occupancy as f64);
    let pose = n * 8.0 * (1 + n_restraints) as f64;
    let buffers = n * (16.0 + 16.0 + 16.0);
    (fixed + n_workers as f64 * (accumulator + pose + buffers)) / f64::powi(1024.0, 2)
}

/// Occupancy of the ligand reference point among complexes of a minimum consistency
#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyMap {
    pub cutoff: usize,
    /// Fraction of the weight at consistency `>= cutoff` found in each cell; sums to one
    pub grid: Grid<f64>,
}

/// Everything a completed scan produces
#[derive(Debug, Clone)]
pub struct ScanResults {
    pub n_rotations: usize,
    pub accessible: AccessibleComplexes,
    pub violations: ViolationTable,
    /// `[restraint][consistency]`
    pub z_scores: Vec<Vec<f64>>,
    /// One score per restraint, averaged over consistency levels
    pub combined_z_scores: Vec<f64>,
    /// Highest consistency per translation of the ligand reference point; -1 if never valid
    pub consistency: Grid<i32>,
    pub occupancy: Vec<OccupancyMap>,
    pub interactions: Option<ResidueInteractions>,
    /// Absent for more than 16 restraints
    pub restraint_sets: Option<RestraintSets>,
    pub warnings: Vec<NumericalWarning>,
}

impl ScanResults {
    pub fn n_restraints(&self) -> usize {
        self.accessible.n_restraints()
    }

    pub fn lattice(&self) -> &Lattice {
        self.consistency.lattice()
    }

    /// `complete` is set when `acc` holds every sampled rotation exactly once
    fn new(
        acc: Accumulator,
        lattice: &Lattice,
        selection: Option<&InteractionSelection>,
        complete: bool,
    ) -> Result<Self> {
        let warnings = acc.check(complete);
        let n_restraints = acc.n_restraints;
        let accessible = AccessibleComplexes {
            counts: acc.accessible.clone(),
        };
        let violations = ViolationTable::from_flat(n_restraints, &acc.violations);
        let occupancy = acc
            .occupancy_cutoffs
            .iter()
            .zip(&acc.occupancy)
            .map(|(cutoff, data)| {
                let total = acc.weight_at_least(*cutoff);
                let scale = if total > 0.0 { 1.0 / total } else { 0.0 };
                let data = data.iter().map(|w| w * scale).collect();
                Ok(OccupancyMap {
                    cutoff: *cutoff,
                    grid: Grid::from_vec(lattice, data)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let interactions = acc
            .interactions
            .as_ref()
            .zip(selection)
            .map(|(tally, selection)| {
                tally.normalize(selection, &acc.accessible, acc.interaction_cutoff)
            });
        Ok(Self {
            n_rotations: acc.n_rotations,
            z_scores: violations.z_scores(&accessible),
            combined_z_scores: violations.combined_z_scores(&accessible),
            restraint_sets: acc.restraint_sets.map(|counts| RestraintSets {
                n_restraints,
                counts,
            }),
            consistency: Grid::from_vec(lattice, acc.consistency)?,
            accessible,
            violations,
            occupancy,
            interactions,
            warnings,
        })
    }
}

/// Optional residue interaction analysis
struct InteractionAnalysis {
    selection: InteractionSelection,
    contacts: ContactIndex,
    cutoff: usize,
}

/// A prepared scan of one ligand around one receptor
///
/// All inputs are validated, the lattice is sized and the receptor volumes are
/// transferred to the back end when the scanner is created; [`Scanner::run`]
/// then only processes rotations.
pub struct Scanner {
    params: ScanParams,
    rotations: Vec<Rotation>,
    builder: PoseFieldBuilder,
    backend: Box<dyn CorrelationBackend>,
    criteria: Criteria,
    interactions: Option<InteractionAnalysis>,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("lattice", self.builder.lattice())
            .field("rotations", &self.rotations.len())
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Scanner {
    pub fn new(
        receptor: &Structure,
        ligand: &Structure,
        restraints: &[Restraint],
        params: &ScanParams,
    ) -> Result<Self> {
        params.validate()?;
        validate_restraints(restraints, receptor, ligand)?;
        let n_restraints = restraints.len();
        if let Some(cutoff) = params.occupancy_cutoffs.iter().find(|c| **c > n_restraints) {
            return Err(ScanError::input(format!(
                "occupancy cutoff {cutoff} exceeds the number of restraints ({n_restraints})"
            )));
        }
        let interaction_cutoff = params
            .interaction_cutoff
            .unwrap_or(n_restraints.saturating_sub(1));
        if interaction_cutoff > n_restraints {
            return Err(ScanError::input(format!(
                "interaction cutoff {interaction_cutoff} exceeds the number of restraints ({n_restraints})"
            )));
        }
        let rotations = sample_rotations(params.angle)?;
        let lattice = scan_lattice(receptor, ligand, params)?;

        let required_mb = estimate_memory_mb(
            &lattice,
            n_restraints,
            params.occupancy_cutoffs.len(),
            params.n_workers(),
        );
        info!(
            "Scan: {} rotations x {} translations {:?}, {} restraints (~{:.1} MiB)",
            rotations.len(),
            lattice.len(),
            lattice.shape(),
            n_restraints,
            required_mb
        );
        if required_mb > params.memory_limit_mb {
            return Err(ScanError::ResourceExhaustion {
                shape: lattice.shape(),
                required_mb,
                limit_mb: params.memory_limit_mb,
            });
        }

        if let Some(directory) = &params.save_rotation_maps {
            std::fs::create_dir_all(directory)?;
        }
        let volumes = FixedVolumes::new(receptor, &lattice, params.interaction_radius);
        let interactions = if params.interaction_analysis {
            let selection = InteractionSelection::new(
                receptor,
                ligand,
                &params.receptor_selection,
                &params.ligand_selection,
            )?;
            let contacts =
                ContactIndex::new(&lattice, receptor, &selection, params.interaction_distance);
            Some(InteractionAnalysis {
                selection,
                contacts,
                cutoff: interaction_cutoff,
            })
        } else {
            None
        };
        let selected_atoms = interactions
            .as_ref()
            .map(|analysis| analysis.selection.ligand_atom_indices())
            .unwrap_or_default();
        let builder = PoseFieldBuilder::new(&lattice, receptor, ligand, restraints, selected_atoms);
        let backend = make_backend(params.backend, &volumes)?;

        Ok(Self {
            params: params.clone(),
            rotations,
            builder,
            backend,
            criteria: Criteria::from_params(params),
            interactions,
        })
    }

    pub fn lattice(&self) -> &Lattice {
        self.builder.lattice()
    }

    /// Rotations sampled from the configured angular interval
    pub fn rotations(&self) -> &[Rotation] {
        &self.rotations
    }

    /// Scan all sampled rotations
    pub fn run(&self) -> Result<ScanResults> {
        self.scan(&self.rotations, true)
    }

    /// Scan a given set of rotations
    pub fn run_rotations(&self, rotations: &[Rotation]) -> Result<ScanResults> {
        self.scan(rotations, false)
    }

    fn scan(&self, rotations: &[Rotation], complete: bool) -> Result<ScanResults> {
        let start = Instant::now();
        let progress = self.progress_bar(rotations.len());
        let acc = if self.backend.prefers_batch() {
            self.scan_batched(rotations, &progress)?
        } else {
            self.scan_parallel(rotations, &progress)?
        };
        progress.finish_and_clear();
        info!(
            "Scanned {} rotations in {:.1} s",
            acc.n_rotations(),
            start.elapsed().as_secs_f64()
        );
        ScanResults::new(
            acc,
            self.lattice(),
            self.interactions.as_ref().map(|a| &a.selection),
            complete,
        )
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.params.progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} rotations ({eta})",
        ) {
            bar.set_style(style);
        }
        bar
    }

    fn new_accumulator(&self) -> Accumulator {
        let acc = Accumulator::new(
            self.lattice().len(),
            self.builder.n_restraints(),
            &self.params.occupancy_cutoffs,
        );
        match &self.interactions {
            Some(analysis) => acc.with_interactions(
                InteractionTally::new(
                    analysis.selection.receptor_residues.len(),
                    analysis.selection.ligand_residues.len(),
                    self.builder.n_restraints() + 1,
                ),
                analysis.cutoff,
            ),
            None => acc,
        }
    }

    fn contacts(&self) -> Option<&ContactIndex> {
        self.interactions.as_ref().map(|a| &a.contacts)
    }

    /// Write the consistency of each translation of rotation `index`; -1 where invalid
    fn save_rotation_map(&self, index: usize, masks: &[Option<RestraintMask>]) -> Result<()> {
        let Some(directory) = &self.params.save_rotation_maps else {
            return Ok(());
        };
        let data = masks
            .iter()
            .map(|mask| mask.map_or(-1, |mask| consistency(mask) as i32))
            .collect();
        let grid = Grid::from_vec(self.lattice(), data)?;
        write_mrc_file(&grid, directory.join(format!("rotation_{index}.mrc")))
    }

    /// Correlate, classify and fold a single rotation
    fn process(&self, index: usize, rotation: &Rotation, acc: &mut Accumulator) -> Result<()> {
        let pose = self.builder.build(rotation);
        let correlations = self.backend.correlate(&pose)?;
        let masks = classify(&self.criteria, &correlations, &pose.restraints);
        self.save_rotation_map(index, &masks)?;
        acc.fold(&pose, &masks, self.contacts());
        Ok(())
    }

    /// One contiguous chunk of rotations per worker, each folded into its own accumulator
    fn scan_parallel(&self, rotations: &[Rotation], progress: &ProgressBar) -> Result<Accumulator> {
        let n_workers = self.params.n_workers().clamp(1, rotations.len().max(1));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_workers)
            .build()
            .map_err(std::io::Error::other)?;
        let chunk_size = rotations.len().div_ceil(n_workers).max(1);
        debug!(
            "{} workers with up to {} rotations each; accumulator {:.1} MiB",
            n_workers,
            chunk_size,
            self.new_accumulator().get_size() as f64 / f64::powi(1024.0, 2)
        );
        pool.install(|| {
            rotations
                .par_chunks(chunk_size)
                .enumerate()
                .map(|(i, chunk)| {
                    let mut acc = self.new_accumulator();
                    for (j, rotation) in chunk.iter().enumerate() {
                        self.process(i * chunk_size + j, rotation, &mut acc)?;
                        progress.inc(1);
                    }
                    Ok::<_, ScanError>(acc)
                })
                .try_reduce_with(Accumulator::merge)
        })
        .unwrap_or_else(|| Ok(self.new_accumulator()))
    }

    /// Rotations submitted in batches, one at a time
    fn scan_batched(&self, rotations: &[Rotation], progress: &ProgressBar) -> Result<Accumulator> {
        let mut acc = self.new_accumulator();
        for (i, batch) in rotations.chunks(GPU_BATCH_SIZE).enumerate() {
            let poses: Vec<_> = batch.par_iter().map(|r| self.builder.build(r)).collect();
            let correlations = self.backend.correlate_batch(&poses)?;
            for (j, (pose, correlations)) in poses.iter().zip(&correlations).enumerate() {
                let masks = classify(&self.criteria, correlations, &pose.restraints);
                self.save_rotation_map(i * GPU_BATCH_SIZE + j, &masks)?;
                acc.fold(pose, &masks, self.contacts());
            }
            progress.inc(batch.len() as u64);
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::BackendKind, structure::ResidueId, Vector3, ROTATIONAL_VOLUME};
    use approx::assert_relative_eq;
    use lazy_static::lazy_static;
    use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

    /// Thresholds that accept every translation
    fn unfiltered() -> ScanParams {
        ScanParams {
            max_clash_volume: f64::INFINITY,
            min_interaction_volume: 0.0,
            ..Default::default()
        }
    }

    fn single_atom(chain: &str, pos: Vector3) -> Structure {
        let mut s = Structure::default();
        s.push(pos, 1.5, "CA", ResidueId::new(chain, 1));
        s
    }

    /// Five receptor atoms in an L and a three atom ligand, 1.5 Å spacing
    fn small_system() -> (Structure, Structure) {
        let mut receptor = Structure::default();
        for (i, pos) in [
            [0.0, 0.0, 0.0],
            [3.0, 0.0, 0.0],
            [6.0, 0.0, 0.0],
            [6.0, 3.0, 0.0],
            [6.0, 6.0, 1.0],
        ]
        .iter()
        .enumerate()
        {
            receptor.push(
                Vector3::from(*pos),
                1.8,
                "CA",
                ResidueId::new("A", i as i32 + 1),
            );
        }
        let mut ligand = Structure::default();
        for (i, pos) in [[0.0, 0.0, 0.0], [2.5, 0.5, 0.0], [2.0, 3.0, 0.5]]
            .iter()
            .enumerate()
        {
            ligand.push(
                Vector3::from(*pos),
                1.6,
                "CA",
                ResidueId::new("B", i as i32 + 1),
            );
        }
        (receptor, ligand)
    }

    lazy_static! {
        static ref SMALL_SYSTEM: (Structure, Structure) = small_system();
    }

    fn small_params() -> ScanParams {
        ScanParams {
            angle: 90.0,
            voxel_spacing: 1.5,
            interaction_radius: 3.0,
            max_clash_volume: 10.0,
            min_interaction_volume: 20.0,
            margin: Some(8.0),
            occupancy_cutoffs: vec![1, 2],
            ..Default::default()
        }
    }

    fn small_restraints() -> Vec<Restraint> {
        vec![
            Restraint::new(0, 0, 3.0, 9.0),
            Restraint::new(4, 2, 2.0, 8.0),
            Restraint::ambiguous(vec![1, 2], vec![1], 0.5, 6.0),
        ]
    }

    #[test]
    fn test_single_restraint_shell() {
        let receptor = single_atom("A", Vector3::zeros());
        let ligand = single_atom("B", Vector3::new(15.0, 0.0, 0.0));
        let restraints = [Restraint::new(0, 0, 10.0, 20.0)];
        let params = ScanParams {
            margin: Some(25.0),
            ..unfiltered()
        };
        let scanner = Scanner::new(&receptor, &ligand, &restraints, &params).unwrap();
        let results = scanner.run_rotations(&[Rotation::identity()]).unwrap();
        let lattice = results.lattice().clone();
        let mut n_shell = 0;
        for (index, c) in results.consistency.data().iter().enumerate() {
            let d2 = (lattice.position(lattice.unravel(index)) - receptor.pos[0]).norm_squared();
            let expected = i32::from((100.0..=400.0).contains(&d2));
            assert_eq!(*c, expected);
            n_shell += expected as usize;
        }
        assert!(n_shell > 0);
        assert_relative_eq!(
            results.accessible.counts[1],
            n_shell as f64 * ROTATIONAL_VOLUME,
            max_relative = 1e-12
        );
        assert_eq!(results.accessible.max_consistency(), Some(1));
    }

    #[test]
    fn test_unreachable_restraint() {
        let receptor = single_atom("A", Vector3::zeros());
        let ligand = single_atom("B", Vector3::zeros());
        let restraints = [Restraint::new(0, 0, 25.0, 30.0)];
        let params = ScanParams {
            margin: Some(5.0),
            ..unfiltered()
        };
        let results = Scanner::new(&receptor, &ligand, &restraints, &params)
            .unwrap()
            .run_rotations(&[Rotation::identity()])
            .unwrap();
        assert!(results.accessible.total() > 0.0);
        assert_eq!(results.accessible.counts[1], 0.0);
        assert!(results.consistency.data().iter().all(|c| *c == 0));
    }

    #[test]
    fn test_mutually_exclusive_restraints() {
        let (receptor, ligand) = &*SMALL_SYSTEM;
        let restraints = [Restraint::new(0, 0, 0.5, 5.0), Restraint::new(0, 0, 10.0, 15.0)];
        let params = ScanParams {
            margin: Some(16.0),
            ..small_params()
        };
        let results = Scanner::new(&receptor, &ligand, &restraints, &params)
            .unwrap()
            .run()
            .unwrap();
        assert!(results.accessible.counts[1] > 0.0);
        assert_eq!(results.accessible.counts[2], 0.0);
        assert!(results.consistency.data().iter().all(|c| *c <= 1));
        assert!(results.warnings.is_empty());
    }

    #[test]
    fn test_satisfiable_everywhere() {
        let (receptor, ligand) = &*SMALL_SYSTEM;
        // two ligand atoms per restraint so that no cell sits on every pair center
        let restraints = [
            Restraint::ambiguous(vec![0], vec![0, 1], 0.1, 1000.0),
            Restraint::ambiguous(vec![2], vec![1, 2], 0.1, 1000.0),
        ];
        let params = ScanParams {
            angle: 90.0,
            ..unfiltered()
        };
        let scanner = Scanner::new(&receptor, &ligand, &restraints, &params).unwrap();
        let results = scanner.run().unwrap();
        assert!(results.consistency.data().iter().all(|c| *c == 2));
        let n_cells = scanner.lattice().len() as f64;
        let weight: f64 = scanner.rotations().iter().map(|r| r.weight).sum();
        // every sample is valid, so the total is the full 6D volume
        assert_relative_eq!(results.accessible.total(), n_cells * weight, max_relative = 1e-9);
        assert_relative_eq!(results.accessible.counts[2], results.accessible.total());
        assert_eq!(results.n_rotations, scanner.rotations().len());
    }

    #[test]
    fn test_filtered_scan_statistics() {
        let (receptor, ligand) = &*SMALL_SYSTEM;
        let results = Scanner::new(&receptor, &ligand, &small_restraints(), &small_params())
            .unwrap()
            .run()
            .unwrap();
        assert!(results.warnings.is_empty());
        assert!(results.accessible.total() > 0.0);
        let data = results.consistency.data();
        assert!(data.iter().all(|c| (-1..=3).contains(c)));
        assert!(data.contains(&-1));

        // consistent with the accessible table
        let sets = results.restraint_sets.as_ref().unwrap();
        assert_relative_eq!(
            sets.counts.iter().sum::<f64>(),
            results.accessible.total(),
            max_relative = 1e-9
        );
        for map in &results.occupancy {
            if results.accessible.at_least()[map.cutoff] > 0.0 {
                assert_relative_eq!(map.grid.sum(), 1.0, max_relative = 1e-9);
            }
        }
        for level in 0..=3 {
            let mean = results.z_scores.iter().map(|row| row[level]).sum::<f64>() / 3.0;
            assert_relative_eq!(mean, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rotation_order_invariance() {
        let (receptor, ligand) = &*SMALL_SYSTEM;
        let scanner =
            Scanner::new(&receptor, &ligand, &small_restraints(), &small_params()).unwrap();
        let reference = scanner.run().unwrap();
        let mut shuffled = scanner.rotations().to_vec();
        shuffled.shuffle(&mut StdRng::seed_from_u64(17));
        let results = scanner.run_rotations(&shuffled).unwrap();
        assert_eq!(results.consistency, reference.consistency);
        for (a, b) in results.accessible.counts.iter().zip(&reference.accessible.counts) {
            assert_relative_eq!(a, b, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_repeated_rotations_are_flagged() {
        let (receptor, ligand) = &*SMALL_SYSTEM;
        let scanner =
            Scanner::new(&receptor, &ligand, &small_restraints(), &small_params()).unwrap();
        assert!(scanner.run().unwrap().warnings.is_empty());
        let twice = [scanner.rotations(), scanner.rotations()].concat();
        let results = scanner.run_rotations(&twice).unwrap();
        let warning = results
            .warnings
            .iter()
            .find(|w| w.quantity == "rotational volume")
            .unwrap();
        assert_relative_eq!(warning.actual, 2.0 * ROTATIONAL_VOLUME, max_relative = 1e-3);
    }

    #[test]
    fn test_consistency_grid_grows_with_rotations() {
        let (receptor, ligand) = &*SMALL_SYSTEM;
        let scanner =
            Scanner::new(&receptor, &ligand, &small_restraints(), &small_params()).unwrap();
        let rotations = scanner.rotations();
        let partial = scanner.run_rotations(&rotations[..5]).unwrap();
        let full = scanner.run_rotations(rotations).unwrap();
        for (a, b) in partial.consistency.data().iter().zip(full.consistency.data()) {
            assert!(a <= b);
        }
    }

    #[test]
    fn test_backends_and_workers_agree() {
        let (receptor, ligand) = &*SMALL_SYSTEM;
        let run = |backend: BackendKind, workers: usize| {
            let params = ScanParams {
                backend,
                workers: Some(workers),
                ..small_params()
            };
            Scanner::new(&receptor, &ligand, &small_restraints(), &params)
                .unwrap()
                .run()
                .unwrap()
        };
        let reference = run(BackendKind::Fft, 1);
        for other in [run(BackendKind::Fft, 3), run(BackendKind::Direct, 2)] {
            assert_eq!(other.consistency, reference.consistency);
            for (a, b) in other.accessible.counts.iter().zip(&reference.accessible.counts) {
                assert_relative_eq!(a, b, max_relative = 1e-9);
            }
        }
    }

    #[test]
    fn test_violations_independent_of_other_restraints() {
        let (receptor, ligand) = &*SMALL_SYSTEM;
        let restraints = small_restraints();
        let params = ScanParams {
            occupancy_cutoffs: vec![],
            ..small_params()
        };
        let run = |restraints: &[Restraint]| {
            Scanner::new(&receptor, &ligand, restraints, &params)
                .unwrap()
                .run()
                .unwrap()
        };
        let alone = run(&restraints[..1]);
        let together = run(&restraints);
        assert_relative_eq!(
            alone.violations.totals()[0],
            together.violations.totals()[0],
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_interaction_analysis() {
        let (receptor, ligand) = &*SMALL_SYSTEM;
        let params = ScanParams {
            interaction_analysis: true,
            interaction_cutoff: Some(0),
            interaction_distance: 4.0,
            ..small_params()
        };
        let results = Scanner::new(&receptor, &ligand, &small_restraints(), &params)
            .unwrap()
            .run()
            .unwrap();
        let interactions = results.interactions.unwrap();
        assert_eq!(interactions.receptor.len(), 5);
        assert_eq!(interactions.ligand.len(), 3);
        assert!(interactions
            .receptor
            .iter()
            .any(|row| row.per_consistency.iter().any(|v| *v > 0.0)));
    }

    #[test]
    fn test_rotation_maps() {
        let (receptor, ligand) = &*SMALL_SYSTEM;
        let directory =
            std::env::temp_dir().join(format!("dockscan-rotations-{}", std::process::id()));
        let params = ScanParams {
            save_rotation_maps: Some(directory.clone()),
            workers: Some(2),
            ..small_params()
        };
        let scanner = Scanner::new(&receptor, &ligand, &small_restraints(), &params).unwrap();
        let results = scanner.run_rotations(&scanner.rotations()[..3]).unwrap();
        let maps: Vec<_> = (0..3)
            .map(|n| {
                crate::mrc::read_mrc_file(directory.join(format!("rotation_{n}.mrc"))).unwrap()
            })
            .collect();
        assert!(!directory.join("rotation_3.mrc").exists());
        // the consistency grid is the maximum over the rotations
        for (index, c) in results.consistency.data().iter().enumerate() {
            let best = maps.iter().map(|m| m.data()[index]).fold(-1.0, f64::max);
            assert_eq!(best, *c as f64);
        }
        std::fs::remove_dir_all(&directory).unwrap();
    }

    #[test]
    fn test_rejected_setups() {
        let (receptor, ligand) = &*SMALL_SYSTEM;
        let tiny = ScanParams {
            memory_limit_mb: 1e-6,
            ..small_params()
        };
        assert!(matches!(
            Scanner::new(&receptor, &ligand, &small_restraints(), &tiny),
            Err(ScanError::ResourceExhaustion { .. })
        ));
        let bad_angle = ScanParams {
            angle: 0.0,
            ..small_params()
        };
        assert!(matches!(
            Scanner::new(&receptor, &ligand, &small_restraints(), &bad_angle),
            Err(ScanError::Sampling { .. })
        ));
        let bad_cutoff = ScanParams {
            occupancy_cutoffs: vec![4],
            ..small_params()
        };
        assert!(Scanner::new(&receptor, &ligand, &small_restraints(), &bad_cutoff).is_err());
        let bad_atom = [Restraint::new(99, 0, 1.0, 5.0)];
        assert!(Scanner::new(&receptor, &ligand, &bad_atom, &small_params()).is_err());
        assert!(Scanner::new(&Structure::default(), &ligand, &[], &small_params()).is_err());
    }

    #[test]
    fn test_memory_estimate_scales_with_workers() {
        let lattice = Lattice::new(Vector3::zeros(), 1.0, [64, 64, 64]).unwrap();
        let one = estimate_memory_mb(&lattice, 4, 1, 1);
        let four = estimate_memory_mb(&lattice, 4, 1, 4);
        assert!(four > 3.0 * one);
        assert!(one > 0.0);
    }
}
