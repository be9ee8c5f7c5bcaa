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

//! Text tables, volumetric maps and a JSON summary of a finished scan.

use crate::{
    config::ScanParams,
    error::NumericalWarning,
    interactions::ResidueRow,
    mrc::write_mrc_file,
    scan::ScanResults,
    tables::RestraintSets,
};
use anyhow::Context;
use flate2::{write::GzEncoder, Compression};
use nu_ansi_term::Color::{Red, Yellow};
use rgb::RGB8;
use serde::Serialize;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};
use textplots::{Chart, ColorPlot, Shape};

/// Open a file for writing, gzip compressed if the name ends in `.gz`
pub fn open_compressed(path: &Path) -> std::io::Result<Box<dyn Write>> {
    let file = BufWriter::new(File::create(path)?);
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzEncoder::new(file, Compression::default())))
    } else {
        Ok(Box::new(file))
    }
}

/// Weighted number of complexes per consistency level, and satisfying at least that many
pub fn write_accessible(results: &ScanResults, mut out: impl Write) -> std::io::Result<()> {
    writeln!(out, "# consistency accessible at_least")?;
    let at_least = results.accessible.at_least();
    for (n, (count, cumulative)) in results.accessible.counts.iter().zip(&at_least).enumerate() {
        writeln!(out, "{n} {count:.0} {cumulative:.0}")?;
    }
    Ok(())
}

/// Violation fraction and Z-score of each restraint, one row per restraint
pub fn write_violations(results: &ScanResults, mut out: impl Write) -> std::io::Result<()> {
    let fractions = results.violations.fractions(&results.accessible);
    let n_levels = results.accessible.counts.len();
    write!(out, "# restraint")?;
    (0..n_levels).try_for_each(|c| write!(out, " f{c}"))?;
    (0..n_levels).try_for_each(|c| write!(out, " z{c}"))?;
    writeln!(out, " z")?;
    for (i, (f, z)) in fractions.iter().zip(&results.z_scores).enumerate() {
        write!(out, "{}", i + 1)?;
        f.iter().try_for_each(|v| write!(out, " {v:.3}"))?;
        z.iter().try_for_each(|v| write!(out, " {v:.2}"))?;
        writeln!(out, " {:.2}", results.combined_z_scores[i])?;
    }
    Ok(())
}

/// Satisfied restraint combinations grouped by consistency level
pub fn write_restraint_sets(sets: &RestraintSets, mut out: impl Write) -> std::io::Result<()> {
    let nonzero = sets.nonzero();
    for level in 0..=sets.n_restraints as u32 {
        for (mask, count) in nonzero.iter().filter(|(mask, _)| mask.count_ones() == level) {
            writeln!(out, "{} {count:.0}", sets.flags(*mask))?;
        }
        writeln!(out, "{}", "#".repeat(30))?;
    }
    Ok(())
}

/// Average residue contacts per complex for consistency levels from `cutoff` and up
pub fn write_residue_rows(
    rows: &[ResidueRow],
    cutoff: usize,
    mut out: impl Write,
) -> std::io::Result<()> {
    let n_levels = rows.first().map(|row| row.per_consistency.len()).unwrap_or(0);
    write!(out, "# residue")?;
    (cutoff..n_levels).try_for_each(|c| write!(out, " c{c}"))?;
    writeln!(out)?;
    for row in rows {
        write!(out, "{}", row.residue)?;
        row.per_consistency
            .iter()
            .skip(cutoff)
            .try_for_each(|v| write!(out, " {v:.3}"))?;
        writeln!(out)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct LatticeSummary {
    origin: [f64; 3],
    spacing: f64,
    shape: [usize; 3],
}

/// Machine readable digest of a scan
#[derive(Serialize)]
struct Summary<'a> {
    n_restraints: usize,
    n_rotations: usize,
    lattice: LatticeSummary,
    accessible: &'a [f64],
    at_least: Vec<f64>,
    max_consistency: Option<usize>,
    violation_fractions: Vec<Vec<f64>>,
    z_scores: &'a [Vec<f64>],
    combined_z_scores: &'a [f64],
    warnings: &'a [NumericalWarning],
}

pub fn write_summary(results: &ScanResults, out: impl Write) -> serde_json::Result<()> {
    let lattice = results.lattice();
    let origin = lattice.origin();
    let summary = Summary {
        n_restraints: results.n_restraints(),
        n_rotations: results.n_rotations,
        lattice: LatticeSummary {
            origin: [origin.x, origin.y, origin.z],
            spacing: lattice.spacing(),
            shape: lattice.shape(),
        },
        accessible: &results.accessible.counts,
        at_least: results.accessible.at_least(),
        max_consistency: results.accessible.max_consistency(),
        violation_fractions: results.violations.fractions(&results.accessible),
        z_scores: &results.z_scores,
        combined_z_scores: &results.combined_z_scores,
        warnings: &results.warnings,
    };
    serde_json::to_writer_pretty(out, &summary)
}

/// Write all tables and maps of a scan into `directory`
pub fn write_results(results: &ScanResults, directory: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(directory)
        .with_context(|| format!("creating {}", directory.display()))?;
    let create = |name: &str| -> anyhow::Result<Box<dyn Write>> {
        let path = directory.join(name);
        open_compressed(&path).with_context(|| format!("creating {}", path.display()))
    };

    write_accessible(results, create("accessible_complexes.txt")?)?;
    write_violations(results, create("violations.txt")?)?;
    write_summary(results, create("summary.json")?)?;
    if let Some(sets) = &results.restraint_sets {
        write_restraint_sets(sets, create("restraint_sets.txt")?)?;
    }
    if let Some(interactions) = &results.interactions {
        write_residue_rows(
            &interactions.receptor,
            interactions.cutoff,
            create("receptor_interactions.txt")?,
        )?;
        write_residue_rows(
            &interactions.ligand,
            interactions.cutoff,
            create("ligand_interactions.txt")?,
        )?;
    }
    write_mrc_file(&results.consistency, directory.join("consistency.mrc"))?;
    for map in &results.occupancy {
        write_mrc_file(&map.grid, directory.join(format!("occupancy_{}.mrc", map.cutoff)))?;
    }
    info!("Results written to {}", directory.display());
    Ok(())
}

/// Record the command line and the effective parameters of a run
///
/// The parameters are written as YAML and can be passed back with `--config`.
pub fn write_run_log(
    params: &ScanParams,
    command: &str,
    mut out: impl Write,
) -> anyhow::Result<()> {
    writeln!(
        out,
        "# {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )?;
    writeln!(out, "# {command}")?;
    serde_yaml::to_writer(&mut out, params)?;
    out.flush()?;
    Ok(())
}

/// Log the main tables and plot the accessible complexes in the terminal
pub fn log_results(results: &ScanResults) {
    let at_least = results.accessible.at_least();
    let total = results.accessible.total();
    info!("Accessible complexes (consistency: weighted count, fraction satisfying at least as many)");
    for (n, (count, cumulative)) in results.accessible.counts.iter().zip(&at_least).enumerate() {
        let fraction = if total > 0.0 { cumulative / total } else { 0.0 };
        info!("  {n:>2}: {count:>12.3e} {fraction:>8.4}");
    }
    for (i, z) in results.combined_z_scores.iter().enumerate() {
        let line = format!("  restraint {:>2}: Z = {z:>6.2}", i + 1);
        if *z > 1.0 {
            info!("{} (likely false positive)", Red.bold().paint(line));
        } else {
            info!("{line}");
        }
    }
    for warning in &results.warnings {
        warn!("{warning}");
    }

    let n_levels = at_least.len();
    if n_levels < 2 || total <= 0.0 || log::max_level() < log::Level::Info {
        return;
    }
    info!(
        "Plot: {} of complexes satisfying at least n restraints",
        Yellow.bold().paint("fraction")
    );
    const YELLOW: RGB8 = RGB8::new(255, 255, 0);
    let data: Vec<(f32, f32)> = at_least
        .iter()
        .enumerate()
        .map(|(n, cumulative)| (n as f32, (cumulative / total) as f32))
        .collect();
    Chart::new(100, 50, 0.0, (n_levels - 1) as f32)
        .linecolorplot(&Shape::Lines(&data), YELLOW)
        .nice();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lattice::{Grid, Lattice},
        structure::ResidueId,
        tables::{AccessibleComplexes, ViolationTable},
        Vector3,
    };

    fn results() -> ScanResults {
        let lattice = Lattice::new(Vector3::zeros(), 1.0, [2, 2, 2]).unwrap();
        let accessible = AccessibleComplexes {
            counts: vec![4.0, 3.0, 1.0],
        };
        let violations = ViolationTable::from_flat(2, &[4.0, 2.0, 0.0, 4.0, 1.0, 0.0]);
        ScanResults {
            n_rotations: 1,
            z_scores: violations.z_scores(&accessible),
            combined_z_scores: violations.combined_z_scores(&accessible),
            accessible,
            violations,
            consistency: Grid::from_vec(&lattice, vec![-1, 0, 1, 2, 2, 1, 0, -1]).unwrap(),
            occupancy: vec![],
            interactions: None,
            restraint_sets: Some(RestraintSets {
                n_restraints: 2,
                counts: vec![4.0, 1.0, 2.0, 1.0],
            }),
            warnings: vec![],
        }
    }

    #[test]
    fn test_accessible_table() {
        let mut out = Vec::new();
        write_accessible(&results(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().nth(1), Some("0 4 8"));
        assert_eq!(text.lines().last(), Some("2 1 1"));
    }

    #[test]
    fn test_restraint_sets_table() {
        let mut out = Vec::new();
        write_restraint_sets(results().restraint_sets.as_ref().unwrap(), &mut out).unwrap();
        let lines: Vec<_> = String::from_utf8(out).unwrap().lines().map(String::from).collect();
        assert_eq!(lines[0], "0 0 4");
        assert_eq!(lines[2], "1 0 1");
        assert_eq!(lines[3], "0 1 2");
        assert_eq!(lines.iter().filter(|l| l.starts_with('#')).count(), 3);
    }

    #[test]
    fn test_violations_and_residues() {
        let mut out = Vec::new();
        write_violations(&results(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(1).unwrap().starts_with("1 1.000 0.667 0.000"));

        let rows = vec![ResidueRow {
            residue: ResidueId::new("A", 7),
            per_consistency: vec![0.0, 0.25, 1.5],
        }];
        let mut out = Vec::new();
        write_residue_rows(&rows, 1, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "# residue c1 c2\nA7 0.250 1.500\n");
    }

    #[test]
    fn test_summary_json() {
        let mut out = Vec::new();
        write_summary(&results(), &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["n_restraints"], 2);
        assert_eq!(value["max_consistency"], 2);
        assert_eq!(value["lattice"]["shape"][0], 2);
    }

    #[test]
    fn test_run_log_reloads_as_config() {
        let params = ScanParams {
            angle: 15.0,
            occupancy_cutoffs: vec![1, 3],
            ..Default::default()
        };
        let mut out = Vec::new();
        write_run_log(&params, "dockscan scan a.pdb b.pdb r.txt -a 15", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().nth(1), Some("# dockscan scan a.pdb b.pdb r.txt -a 15"));
        let reloaded: ScanParams = serde_yaml::from_str(&text).unwrap();
        assert_eq!(reloaded, params);
    }

    #[test]
    fn test_write_results() {
        let directory = std::env::temp_dir().join(format!("dockscan-report-{}", std::process::id()));
        write_results(&results(), &directory).unwrap();
        for name in [
            "accessible_complexes.txt",
            "violations.txt",
            "summary.json",
            "restraint_sets.txt",
            "consistency.mrc",
        ] {
            assert!(directory.join(name).exists(), "{name} missing");
        }
        let map = crate::mrc::read_mrc_file(directory.join("consistency.mrc")).unwrap();
        assert_eq!(map.data()[3], 2.0);
        std::fs::remove_dir_all(&directory).unwrap();
    }
}
