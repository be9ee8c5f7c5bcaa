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

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanError>;

/// Errors raised while setting up or running a scan.
///
/// Everything except `Backend` is reported before the first rotation is processed.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Malformed restraint, structure or lattice parameter
    #[error("Invalid input: {0}")]
    Input(String),

    /// Rotational sampling interval outside (0, 180] degrees
    #[error("Invalid rotational sampling interval: {angle}° (must be in (0, 180])")]
    Sampling { angle: f64 },

    /// The dry-run size check predicts more memory than allowed
    #[error("Lattice {shape:?} needs ~{required_mb:.0} MiB which exceeds the limit of {limit_mb:.0} MiB")]
    ResourceExhaustion {
        shape: [usize; 3],
        required_mb: f64,
        limit_mb: f64,
    },

    /// Correlation back end failure; aborts the whole run
    #[error("Correlation backend '{backend}' failed: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    pub(crate) fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }
}

/// Non-fatal numerical inconsistency detected after the search
///
/// The run still completes; the warning is logged and handed to the reporting layer.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct NumericalWarning {
    /// What was compared
    pub quantity: String,
    pub expected: f64,
    pub actual: f64,
}

impl std::fmt::Display for NumericalWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} mismatch: expected {:.6e}, got {:.6e}",
            self.quantity, self.expected, self.actual
        )
    }
}
