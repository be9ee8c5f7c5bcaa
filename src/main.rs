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

#[macro_use]
extern crate log;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dockscan::{
    pdb::read_pdb_file,
    report::{log_results, open_compressed, write_results, write_run_log},
    restraint::parse_restraints,
    BackendKind, ScanParams, Scanner,
};
use std::{fs::File, io::BufReader, path::PathBuf};

#[derive(Debug, Parser)]
#[command(version, about = "Information content of distance restraints between two rigid molecules")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase verbosity (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scan all rigid-body poses of the ligand around the receptor
    Scan(ScanArgs),
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// Fixed molecule (PDB)
    receptor: PathBuf,
    /// Scanning molecule (PDB)
    ligand: PathBuf,
    /// Restraints, one per line: `chain resi name chain resi name mindis maxdis`;
    /// alternative atoms on either side are separated by `|`
    restraints: PathBuf,
    /// YAML file with scan parameters
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Rotational sampling interval (degrees)
    #[arg(short, long)]
    angle: Option<f64>,
    /// Voxel spacing (Å)
    #[arg(short = 's', long)]
    voxel_spacing: Option<f64>,
    /// Maximum clash volume (Å³)
    #[arg(long)]
    max_clash: Option<f64>,
    /// Minimum interaction volume (Å³)
    #[arg(long)]
    min_interaction: Option<f64>,
    /// Consistency cutoffs for occupancy maps
    #[arg(long, value_delimiter = ',')]
    occupancy: Vec<usize>,
    /// Analyze residue interactions
    #[arg(short, long)]
    interaction: bool,
    /// Correlation backend
    #[arg(short, long, value_enum)]
    backend: Option<BackendKind>,
    /// Number of worker threads
    #[arg(short = 'j', long)]
    workers: Option<usize>,
    /// Output directory
    #[arg(short, long, default_value = "dockscan-results")]
    output: PathBuf,
    /// Also write the consistency map of every rotation to the output directory
    #[arg(long)]
    save: bool,
}

fn do_scan(args: &ScanArgs) -> anyhow::Result<()> {
    let ScanArgs {
        receptor,
        ligand,
        restraints,
        config,
        angle,
        voxel_spacing,
        max_clash,
        min_interaction,
        occupancy,
        interaction,
        backend,
        workers,
        output,
        save,
    } = args;

    let mut params = match config {
        Some(path) => ScanParams::from_yaml_file(path)?,
        None => ScanParams::default(),
    };
    params.angle = angle.unwrap_or(params.angle);
    params.voxel_spacing = voxel_spacing.unwrap_or(params.voxel_spacing);
    params.max_clash_volume = max_clash.unwrap_or(params.max_clash_volume);
    params.min_interaction_volume = min_interaction.unwrap_or(params.min_interaction_volume);
    params.backend = backend.unwrap_or(params.backend);
    params.workers = workers.or(params.workers);
    params.interaction_analysis |= *interaction;
    if !occupancy.is_empty() {
        params.occupancy_cutoffs.clone_from(occupancy);
    }
    params.progress = true;
    if *save {
        params.save_rotation_maps = Some(output.clone());
    }

    std::fs::create_dir_all(output).with_context(|| format!("creating {}", output.display()))?;
    let log_path = output.join("dockscan.log");
    let command = std::env::args().collect::<Vec<_>>().join(" ");
    write_run_log(&params, &command, open_compressed(&log_path)?)
        .with_context(|| format!("writing {}", log_path.display()))?;

    let receptor = read_pdb_file(receptor)?;
    let ligand = read_pdb_file(ligand)?;
    info!("Receptor: {} atoms; ligand: {} atoms", receptor.len(), ligand.len());
    let file = File::open(restraints).with_context(|| format!("opening {}", restraints.display()))?;
    let restraints = parse_restraints(BufReader::new(file), &receptor, &ligand)?;
    info!("Read {} restraints", restraints.len());

    let scanner = Scanner::new(&receptor, &ligand, &restraints, &params)?;
    let results = scanner.run()?;
    log_results(&results);
    write_results(&results, output)?;
    Ok(())
}

fn main() {
    if let Err(err) = do_main() {
        eprintln!("Error: {}", &err);
        std::process::exit(1);
    }
}

fn do_main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if std::env::var("RUST_LOG").is_err() {
        let level = match cli.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };
        std::env::set_var("RUST_LOG", level);
    }
    pretty_env_logger::init();

    match &cli.command {
        Commands::Scan(args) => do_scan(args),
    }
}
