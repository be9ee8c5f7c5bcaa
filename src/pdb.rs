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

//! Minimal fixed-column PDB reader (ATOM/HETATM records of the first model only).

use crate::{
    error::{Result, ScanError},
    structure::{vdw_radius, ResidueId, Structure},
    Vector3,
};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

/// Read a structure from a PDB file
pub fn read_pdb_file(path: impl AsRef<Path>) -> Result<Structure> {
    let file = File::open(path.as_ref())?;
    let structure = read_pdb(BufReader::new(file))?;
    info!(
        "Read {} atoms from {}",
        structure.len(),
        path.as_ref().display()
    );
    Ok(structure)
}

/// Read ATOM and HETATM records; hydrogens are kept, alternate locations other than 'A' are skipped
pub fn read_pdb<R: BufRead>(reader: R) -> Result<Structure> {
    let mut structure = Structure::default();
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.starts_with("ENDMDL") {
            break;
        }
        if !(line.starts_with("ATOM") || line.starts_with("HETATM")) {
            continue;
        }
        parse_atom_record(&line, line_number + 1, &mut structure)?;
    }
    if structure.is_empty() {
        return Err(ScanError::input("no ATOM/HETATM records found"));
    }
    Ok(structure)
}

fn parse_atom_record(line: &str, line_number: usize, structure: &mut Structure) -> Result<()> {
    let parse_error = |message: &str| ScanError::Parse {
        line: line_number,
        message: message.to_string(),
    };
    if line.len() < 54 {
        return Err(parse_error("ATOM record shorter than 54 columns"));
    }
    // columns are byte offsets; a multibyte character may straddle a boundary
    let column = |range: std::ops::Range<usize>| {
        line.get(range.clone()).ok_or_else(|| {
            parse_error(&format!(
                "non-ASCII text in columns {}-{}",
                range.start + 1,
                range.end
            ))
        })
    };
    let altloc = column(16..17)?;
    if !matches!(altloc, " " | "A") {
        return Ok(());
    }
    let name = column(12..16)?.trim();
    let chain = column(21..22)?.trim();
    let number = column(22..26)?
        .trim()
        .parse::<i32>()
        .map_err(|_| parse_error("invalid residue number"))?;
    let coord = |range: std::ops::Range<usize>| {
        column(range)?
            .trim()
            .parse::<f64>()
            .map_err(|_| parse_error("invalid coordinate"))
    };
    let pos = Vector3::new(coord(30..38)?, coord(38..46)?, coord(46..54)?);
    let element = line
        .get(76..78)
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| element_from_name(name));
    structure.push(pos, vdw_radius(&element), name, ResidueId::new(chain, number));
    Ok(())
}

/// Guess the element from the atom name (first alphabetic character)
fn element_from_name(name: &str) -> String {
    name.chars()
        .find(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_string())
        .unwrap_or_default()
}
