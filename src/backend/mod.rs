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

//! Backend abstraction for translational correlations.
//!
//! For a rotated ligand, a backend computes for every lattice translation `t`
//! the overlap of the ligand core with the receptor core (clash) and with the
//! receptor interaction shell (interaction):
//!
//! `corr(t) = Σ_x A(x)·B(x − t)`
//!
//! Implementations are the FFT backend (default), a direct summation over ligand
//! voxels, and a wgpu compute shader behind the `gpu` feature.

mod cpu;
mod direct;
#[cfg(feature = "gpu")]
mod gpu;

pub use cpu::FftBackend;
pub use direct::DirectBackend;
#[cfg(feature = "gpu")]
pub use gpu::GpuBackend;

use crate::{
    config::BackendKind,
    error::{Result, ScanError},
    lattice::Lattice,
    pose::PoseFields,
    volumes::FixedVolumes,
};

/// Clash and interaction volume (in voxels) for every translation
#[derive(Debug, Clone, PartialEq)]
pub struct Correlations {
    pub clash: Vec<f64>,
    pub interaction: Vec<f64>,
}

/// Backend trait for correlating the rotated ligand with the fixed receptor volumes.
///
/// - `FftBackend`: frequency domain products with rayon parallel transforms
/// - `DirectBackend`: sparse gather over the ligand core; reference implementation
/// - `GpuBackend`: sparse gather in a wgpu compute shader
pub trait CorrelationBackend: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    /// Correlate a single orientation
    fn correlate(&self, pose: &PoseFields) -> Result<Correlations>;

    /// Correlate several orientations.
    ///
    /// Default implementation calls `correlate` for each pose; the accelerator
    /// encodes the whole batch into one submission.
    fn correlate_batch(&self, poses: &[PoseFields]) -> Result<Vec<Correlations>> {
        poses.iter().map(|pose| self.correlate(pose)).collect()
    }

    /// Returns true if this backend wants rotations fed sequentially in batches.
    ///
    /// The accelerator returns true; CPU backends are parallelized over rotations
    /// by the caller.
    fn prefers_batch(&self) -> bool {
        false
    }
}

/// Check that a pose lives on the lattice the backend was built for
fn check_lattice(backend: &'static str, expected: &Lattice, pose: &PoseFields) -> Result<()> {
    if pose.core.lattice().shape() != expected.shape() {
        return Err(ScanError::Backend {
            backend,
            message: format!(
                "pose lattice {:?} differs from receptor lattice {:?}",
                pose.core.lattice().shape(),
                expected.shape()
            ),
        });
    }
    Ok(())
}

/// Construct the requested backend for the given receptor volumes
pub fn make_backend(
    kind: BackendKind,
    volumes: &FixedVolumes,
) -> Result<Box<dyn CorrelationBackend>> {
    let backend: Box<dyn CorrelationBackend> = match kind {
        BackendKind::Fft => Box::new(FftBackend::new(volumes)),
        BackendKind::Direct => Box::new(DirectBackend::new(volumes)),
        #[cfg(feature = "gpu")]
        BackendKind::Gpu => Box::new(GpuBackend::new(volumes)?),
        #[cfg(not(feature = "gpu"))]
        BackendKind::Gpu => {
            return Err(ScanError::Backend {
                backend: "gpu",
                message: "dockscan was compiled without the `gpu` feature".to_string(),
            })
        }
    };
    info!("Using {} correlation backend", backend.name());
    Ok(backend)
}
