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

//! Distance restraints between the fixed (receptor) and the scanning (ligand) molecule.

use crate::{
    error::{Result, ScanError},
    structure::Structure,
};
use itertools::Itertools;
use std::io::BufRead;

/// Largest number of restraints; satisfied restraints are tracked as a 64-bit mask
pub const MAX_RESTRAINTS: usize = 64;

/// Distance restraint between receptor atom(s) and ligand atom(s)
///
/// When several atoms are given on either side the restraint is *ambiguous*:
/// it is satisfied if any receptor–ligand atom pair lies within the bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Restraint {
    /// Atom indices in the receptor
    pub receptor_atoms: Vec<usize>,
    /// Atom indices in the ligand
    pub ligand_atoms: Vec<usize>,
    /// Minimum distance (Å), inclusive
    pub min_distance: f64,
    /// Maximum distance (Å), inclusive
    pub max_distance: f64,
}

impl Restraint {
    /// Restraint between a single receptor atom and a single ligand atom
    pub fn new(receptor_atom: usize, ligand_atom: usize, min_distance: f64, max_distance: f64) -> Self {
        Self::ambiguous(vec![receptor_atom], vec![ligand_atom], min_distance, max_distance)
    }

    pub fn ambiguous(
        receptor_atoms: Vec<usize>,
        ligand_atoms: Vec<usize>,
        min_distance: f64,
        max_distance: f64,
    ) -> Self {
        Self {
            receptor_atoms,
            ligand_atoms,
            min_distance,
            max_distance,
        }
    }

    /// Check bounds and that all atom references resolve in the two structures
    pub fn validate(&self, receptor: &Structure, ligand: &Structure) -> Result<()> {
        if !(self.min_distance > 0.0 && self.max_distance > 0.0) {
            return Err(ScanError::input(format!(
                "restraint bounds must be positive, got [{}, {}]",
                self.min_distance, self.max_distance
            )));
        }
        if self.min_distance > self.max_distance {
            return Err(ScanError::input(format!(
                "restraint minimum distance {} exceeds maximum {}",
                self.min_distance, self.max_distance
            )));
        }
        if self.receptor_atoms.is_empty() || self.ligand_atoms.is_empty() {
            return Err(ScanError::input("restraint without atoms"));
        }
        let check = |atoms: &[usize], structure: &Structure, what: &str| {
            match atoms.iter().find(|&&i| i >= structure.len()) {
                Some(i) => Err(ScanError::input(format!(
                    "{what} atom index {i} out of range ({} atoms)",
                    structure.len()
                ))),
                None => Ok(()),
            }
        };
        check(&self.receptor_atoms, receptor, "receptor")?;
        check(&self.ligand_atoms, ligand, "ligand")
    }
}

/// Validate a complete restraint set before any computation starts
pub fn validate_restraints(
    restraints: &[Restraint],
    receptor: &Structure,
    ligand: &Structure,
) -> Result<()> {
    if restraints.len() > MAX_RESTRAINTS {
        return Err(ScanError::input(format!(
            "at most {MAX_RESTRAINTS} restraints are supported, got {}",
            restraints.len()
        )));
    }
    restraints
        .iter()
        .try_for_each(|r| r.validate(receptor, ligand))
}

/// Parse restraints, one per line, resolving atoms in the receptor and ligand
///
/// Format: `chain resi name chain resi name mindis maxdis` where the first atom
/// belongs to the receptor. Either side may list alternative atoms separated by
/// `|`, which makes the restraint ambiguous. Empty lines and text after `#` are
/// ignored.
///
/// ~~~
/// use dockscan::{restraint::parse_restraints, Structure, ResidueId, Vector3};
/// let mut receptor = Structure::default();
/// receptor.push(Vector3::zeros(), 1.7, "CA", ResidueId::new("A", 18));
/// let mut ligand = Structure::default();
/// ligand.push(Vector3::zeros(), 1.7, "CB", ResidueId::new("B", 27));
/// let text = "A 18 CA B 27 CB 10.0 16.0 # crosslink\n";
/// let restraints = parse_restraints(text.as_bytes(), &receptor, &ligand).unwrap();
/// assert_eq!(restraints.len(), 1);
/// assert_eq!(restraints[0].max_distance, 16.0);
/// ~~~
pub fn parse_restraints<R: BufRead>(
    reader: R,
    receptor: &Structure,
    ligand: &Structure,
) -> Result<Vec<Restraint>> {
    let mut restraints = Vec::new();
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        let content = line.split('#').next().unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }
        let restraint = parse_line(content, line_number + 1, receptor, ligand)?;
        restraint.validate(receptor, ligand)?;
        restraints.push(restraint);
    }
    info!("Parsed {} restraints", restraints.len());
    Ok(restraints)
}

fn parse_line(
    content: &str,
    line: usize,
    receptor: &Structure,
    ligand: &Structure,
) -> Result<Restraint> {
    let parse_error = |message: String| ScanError::Parse { line, message };
    let fields = content.split_whitespace().collect_vec();
    let [atoms @ .., min_distance, max_distance] = fields.as_slice() else {
        return Err(parse_error(format!(
            "expected atoms and two distances, found {} fields",
            fields.len()
        )));
    };
    let number = |s: &str| {
        s.parse::<i32>()
            .map_err(|_| parse_error(format!("invalid residue number '{s}'")))
    };
    let distance = |s: &str| {
        s.parse::<f64>()
            .map_err(|_| parse_error(format!("invalid distance '{s}'")))
    };

    // `chain resi name` triples; `|` joins alternatives into one selection
    let mut selections: Vec<Vec<(&str, i32, &str)>> = vec![Vec::new()];
    let mut tokens = atoms.iter().copied().peekable();
    while tokens.peek().is_some() {
        let (Some(chain), Some(resi), Some(name)) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(parse_error(
                "incomplete atom; expected chain, residue number and name".to_string(),
            ));
        };
        if let Some(selection) = selections.last_mut() {
            selection.push((chain, number(resi)?, name));
        }
        if tokens.next_if_eq(&"|").is_some() {
            if tokens.peek().is_none() {
                return Err(parse_error("dangling '|'".to_string()));
            }
        } else if tokens.peek().is_some() {
            selections.push(Vec::new());
        }
    }
    let [receptor_selection, ligand_selection] = selections.as_slice() else {
        return Err(parse_error(format!(
            "expected a receptor and a ligand selection, found {}",
            selections.len()
        )));
    };

    let resolve = |structure: &Structure, selection: &[(&str, i32, &str)], what: &str| {
        selection
            .iter()
            .map(|&(chain, resi, name)| {
                structure.find_atom(chain, resi, name).ok_or_else(|| {
                    ScanError::input(format!(
                        "line {line}: {what} atom {chain} {resi} {name} not found"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()
    };
    Ok(Restraint::ambiguous(
        resolve(receptor, receptor_selection, "receptor")?,
        resolve(ligand, ligand_selection, "ligand")?,
        distance(*min_distance)?,
        distance(*max_distance)?,
    ))
}
