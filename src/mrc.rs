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

//! MRC-2014 volumetric maps (mode 2, 32-bit float, little endian).
//!
//! Grids are written with z as the fastest axis, matching the lattice memory
//! layout, and the axis order is recorded in MAPC/MAPR/MAPS. Files ending in
//! `.gz` are compressed on the fly.

use crate::{
    error::{Result, ScanError},
    lattice::{Grid, Lattice},
    Vector3,
};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use get_size::GetSize;
use num_traits::NumCast;
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

const HEADER_SIZE: usize = 1024;
const MODE_FLOAT: i32 = 2;

/// The part of the 1024 byte MRC header that is read and written
#[derive(Debug, Clone, PartialEq)]
pub struct MrcHeader {
    /// Number of columns, rows and sections
    pub dims: [i32; 3],
    pub mode: i32,
    pub start: [i32; 3],
    /// Sampling along x, y, z
    pub sampling: [i32; 3],
    /// Cell lengths along x, y, z (Å)
    pub cell: [f32; 3],
    /// Axis (1 = x, 2 = y, 3 = z) for columns, rows and sections
    pub axes: [i32; 3],
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub rms: f32,
    pub origin: [f32; 3],
}

impl MrcHeader {
    fn from_lattice(lattice: &Lattice, data: &[f32]) -> Self {
        let [nx, ny, nz] = lattice.shape().map(|n| n as i32);
        let n = data.len().max(1) as f64;
        let mean = data.iter().map(|v| *v as f64).sum::<f64>() / n;
        let rms = (data.iter().map(|v| (*v as f64 - mean).powi(2)).sum::<f64>() / n).sqrt();
        let spacing = lattice.spacing() as f32;
        let origin = lattice.origin();
        Self {
            dims: [nz, ny, nx],
            mode: MODE_FLOAT,
            start: [0; 3],
            sampling: [nx, ny, nz],
            cell: [nx as f32 * spacing, ny as f32 * spacing, nz as f32 * spacing],
            axes: [3, 2, 1],
            min: data.iter().cloned().fold(f32::INFINITY, f32::min),
            max: data.iter().cloned().fold(f32::NEG_INFINITY, f32::max),
            mean: mean as f32,
            rms: rms as f32,
            origin: [origin.x as f32, origin.y as f32, origin.z as f32],
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut words = [0u32; HEADER_SIZE / 4];
        let mut set_i32 = |word: usize, value: i32| words[word - 1] = value as u32;
        (0..3).for_each(|i| set_i32(1 + i, self.dims[i]));
        set_i32(4, self.mode);
        (0..3).for_each(|i| set_i32(5 + i, self.start[i]));
        (0..3).for_each(|i| set_i32(8 + i, self.sampling[i]));
        (0..3).for_each(|i| set_i32(17 + i, self.axes[i]));
        set_i32(23, 1); // space group
        set_i32(28, 20140); // NVERSION
        let mut set_f32 = |word: usize, value: f32| words[word - 1] = value.to_bits();
        (0..3).for_each(|i| set_f32(11 + i, self.cell[i]));
        (0..3).for_each(|i| set_f32(14 + i, 90.0));
        set_f32(20, self.min);
        set_f32(21, self.max);
        set_f32(22, self.mean);
        (0..3).for_each(|i| set_f32(50 + i, self.origin[i]));
        set_f32(55, self.rms);
        words[52] = u32::from_le_bytes(*b"MAP ");
        words[53] = u32::from_le_bytes([0x44, 0x44, 0x00, 0x00]); // little endian stamp
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let word = |i: usize| {
            let offset = 4 * (i - 1);
            [bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]
        };
        let int = |i: usize| i32::from_le_bytes(word(i));
        let float = |i: usize| f32::from_le_bytes(word(i));
        if word(53) != *b"MAP " {
            return Err(ScanError::input("not an MRC file (missing MAP stamp)"));
        }
        if word(54)[0] != 0x44 {
            return Err(ScanError::input("only little endian MRC files are supported"));
        }
        let header = Self {
            dims: [int(1), int(2), int(3)],
            mode: int(4),
            start: [int(5), int(6), int(7)],
            sampling: [int(8), int(9), int(10)],
            cell: [float(11), float(12), float(13)],
            axes: [int(17), int(18), int(19)],
            min: float(20),
            max: float(21),
            mean: float(22),
            rms: float(55),
            origin: [float(50), float(51), float(52)],
        };
        if header.mode != MODE_FLOAT {
            return Err(ScanError::input(format!(
                "unsupported MRC mode {}; only mode 2 is supported",
                header.mode
            )));
        }
        let mut sorted = header.axes;
        sorted.sort_unstable();
        if sorted != [1, 2, 3] || header.dims.iter().any(|n| *n <= 0) {
            return Err(ScanError::input(format!(
                "invalid MRC axes {:?} or dimensions {:?}",
                header.axes, header.dims
            )));
        }
        Ok(header)
    }

    /// Lattice described by the header, assuming isotropic sampling along x
    fn lattice(&self) -> Result<Lattice> {
        let mut shape = [0usize; 3];
        for (n, axis) in self.dims.iter().zip(self.axes) {
            shape[(axis - 1) as usize] = *n as usize;
        }
        let sampling = if self.sampling[0] > 0 {
            self.sampling[0]
        } else {
            shape[0] as i32
        };
        let spacing = (self.cell[0] / sampling as f32) as f64;
        // start is given per column/row/section
        let mut start = [0.0; 3];
        for (s, axis) in self.start.iter().zip(self.axes) {
            start[(axis - 1) as usize] = *s as f64;
        }
        let origin = Vector3::new(
            self.origin[0] as f64 + start[0] * spacing,
            self.origin[1] as f64 + start[1] * spacing,
            self.origin[2] as f64 + start[2] * spacing,
        );
        Lattice::new(origin, spacing, shape)
    }
}

/// Write a grid as an MRC map
pub fn write_mrc<T, W>(grid: &Grid<T>, mut writer: W) -> Result<()>
where
    T: GetSize + Clone + NumCast + Copy,
    W: Write,
{
    let data: Vec<f32> = grid
        .data()
        .iter()
        .map(|v| <f32 as NumCast>::from(*v).unwrap_or(f32::NAN))
        .collect();
    let header = MrcHeader::from_lattice(grid.lattice(), &data);
    writer.write_all(&header.to_bytes())?;
    for value in &data {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Read an MRC map into a grid
pub fn read_mrc<R: Read>(mut reader: R) -> Result<Grid<f64>> {
    let mut bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut bytes)?;
    let header = MrcHeader::from_bytes(&bytes)?;
    let lattice = header.lattice()?;

    // Skip the extended header
    let n_extended = i32::from_le_bytes([bytes[92], bytes[93], bytes[94], bytes[95]]);
    if n_extended > 0 {
        std::io::copy(&mut (&mut reader).take(n_extended as u64), &mut std::io::sink())?;
    }

    let [nc, nr, ns] = header.dims.map(|n| n as usize);
    let axes = header.axes.map(|a| (a - 1) as usize);
    let mut raw = vec![0u8; 4 * nc * nr * ns];
    reader.read_exact(&mut raw)?;
    let mut data = vec![0.0; lattice.len()];
    let mut values = raw
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64);
    for s in 0..ns {
        for r in 0..nr {
            for c in 0..nc {
                let mut cell = [0usize; 3];
                cell[axes[0]] = c;
                cell[axes[1]] = r;
                cell[axes[2]] = s;
                data[lattice.index(cell)] = values.next().unwrap_or_default();
            }
        }
    }
    Grid::from_vec(&lattice, data)
}

/// Write a grid to `path`, gzip compressed if the name ends in `.gz`
pub fn write_mrc_file<T>(grid: &Grid<T>, path: impl AsRef<Path>) -> Result<()>
where
    T: GetSize + Clone + NumCast + Copy,
{
    let path = path.as_ref();
    let file = BufWriter::new(File::create(path)?);
    if path.extension().is_some_and(|ext| ext == "gz") {
        let mut encoder = GzEncoder::new(file, Compression::default());
        write_mrc(grid, &mut encoder)?;
        encoder.finish()?;
        Ok(())
    } else {
        write_mrc(grid, file)
    }
}

/// Read a grid from `path`, decompressing `.gz` files
pub fn read_mrc_file(path: impl AsRef<Path>) -> Result<Grid<f64>> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path)?);
    if path.extension().is_some_and(|ext| ext == "gz") {
        read_mrc(GzDecoder::new(file))
    } else {
        read_mrc(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Cursor;

    fn sample_grid() -> Grid<i32> {
        let lattice = Lattice::new(Vector3::new(-3.5, 1.0, 20.25), 1.5, [3, 4, 5]).unwrap();
        let data = (0..lattice.len() as i32).map(|i| i % 7 - 1).collect();
        Grid::from_vec(&lattice, data).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let grid = sample_grid();
        let mut buffer = Vec::new();
        write_mrc(&grid, &mut buffer).unwrap();
        assert_eq!(buffer.len(), HEADER_SIZE + 4 * grid.lattice().len());
        let read = read_mrc(Cursor::new(buffer)).unwrap();
        assert_eq!(read.lattice().shape(), grid.lattice().shape());
        assert_relative_eq!(read.lattice().spacing(), 1.5, epsilon = 1e-6);
        assert_relative_eq!(*read.lattice().origin(), *grid.lattice().origin(), epsilon = 1e-5);
        for (a, b) in read.data().iter().zip(grid.data()) {
            assert_relative_eq!(*a, *b as f64);
        }
    }

    #[test]
    fn test_header_statistics() {
        let grid = sample_grid();
        let mut buffer = Vec::new();
        write_mrc(&grid, &mut buffer).unwrap();
        let header = MrcHeader::from_bytes(buffer[..HEADER_SIZE].try_into().unwrap()).unwrap();
        assert_eq!(header.dims, [5, 4, 3]);
        assert_eq!(header.axes, [3, 2, 1]);
        assert_relative_eq!(header.min, -1.0);
        assert_relative_eq!(header.max, 5.0);
    }

    #[test]
    fn test_standard_axis_order() {
        // x fastest, as written by most other programs
        let lattice = Lattice::new(Vector3::zeros(), 2.0, [2, 3, 4]).unwrap();
        let mut header = MrcHeader::from_lattice(&lattice, &[0.0]);
        header.dims = [2, 3, 4];
        header.axes = [1, 2, 3];
        let mut buffer = header.to_bytes();
        let mut expected = Grid::<f64>::zeros(&lattice);
        let mut value = 0.0;
        for k in 0..4 {
            for j in 0..3 {
                for i in 0..2 {
                    buffer.extend((value as f32).to_le_bytes());
                    *expected.get_mut([i, j, k]) = value;
                    value += 1.0;
                }
            }
        }
        let read = read_mrc(Cursor::new(buffer)).unwrap();
        assert_eq!(read, expected);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(read_mrc(Cursor::new(vec![0u8; 2048])).is_err());
        assert!(read_mrc(Cursor::new(vec![0u8; 10])).is_err());
    }

    #[test]
    fn test_gzip_file() {
        let grid = sample_grid();
        let path = std::env::temp_dir().join(format!("dockscan-test-{}.mrc.gz", std::process::id()));
        write_mrc_file(&grid, &path).unwrap();
        let read = read_mrc_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(read.data().len(), grid.data().len());
        assert_relative_eq!(read.data()[10], grid.data()[10] as f64);
    }
}
