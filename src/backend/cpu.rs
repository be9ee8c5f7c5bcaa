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

//! CPU backend using three dimensional FFTs.

use super::{check_lattice, CorrelationBackend, Correlations};
use crate::{
    error::Result,
    fft::{pack_complex, to_complex, Fft3},
    lattice::Lattice,
    pose::PoseFields,
    volumes::FixedVolumes,
};
use rayon::prelude::*;
use rustfft::num_complex::Complex64;

/// FFT correlation backend.
///
/// The receptor core and shell are packed into a single complex field,
/// `core + i·shell`, and transformed once. Per rotation the ligand core is
/// transformed forward, multiplied by the conjugate, and transformed back:
/// the real part is the clash and the imaginary part the interaction volume.
#[derive(Debug)]
pub struct FftBackend {
    lattice: Lattice,
    fft: Fft3,
    /// Spectrum of `core + i·shell`
    spectrum: Vec<Complex64>,
}

impl FftBackend {
    pub fn new(volumes: &FixedVolumes) -> Self {
        let lattice = volumes.lattice().clone();
        let fft = Fft3::new(lattice.shape());
        let mut spectrum = pack_complex(volumes.core.data(), volumes.shell.data());
        fft.forward(&mut spectrum);
        debug!("FFT backend ready for lattice {:?}", lattice.shape());
        Self {
            lattice,
            fft,
            spectrum,
        }
    }
}

impl CorrelationBackend for FftBackend {
    fn name(&self) -> &'static str {
        "fft"
    }

    fn correlate(&self, pose: &PoseFields) -> Result<Correlations> {
        check_lattice(self.name(), &self.lattice, pose)?;
        let mut work = to_complex(pose.core.data());
        self.fft.forward(&mut work);
        work.par_iter_mut()
            .zip(self.spectrum.par_iter())
            .for_each(|(ligand, receptor)| *ligand = receptor * ligand.conj());
        self.fft.inverse(&mut work);
        // Correlations of indicator fields are integral; rounding removes transform noise
        let (clash, interaction) = work.par_iter().map(|v| (v.re.round(), v.im.round())).unzip();
        Ok(Correlations { clash, interaction })
    }
}
