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

//! GPU backend using wgpu compute shaders.

use super::{check_lattice, CorrelationBackend, Correlations};
use crate::{
    error::{Result, ScanError},
    lattice::Lattice,
    pose::PoseFields,
    volumes::FixedVolumes,
};
use bytemuck::{Pod, Zeroable};
use std::sync::{mpsc, Arc, Mutex};
use wgpu::util::DeviceExt;

/// Invocations per workgroup; must match `@workgroup_size` in the shader
const WORKGROUP_SIZE: u32 = 64;

/// GPU-compatible uniform parameters.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct GpuParams {
    nx: u32,
    ny: u32,
    nz: u32,
    n_offsets: u32,
    stride: u32,
    _pad: [u32; 3], // Padding to 32 bytes
}

fn backend_error(message: impl std::fmt::Display) -> ScanError {
    ScanError::Backend {
        backend: "gpu",
        message: message.to_string(),
    }
}

/// GPU backend gathering receptor fields under the ligand voxels.
///
/// The receptor core and shell are uploaded once (as f32; correlations of
/// indicator fields stay exact up to 2²⁴ voxels). Each rotation uploads the
/// sparse ligand core and reads back one `(clash, interaction)` pair per cell;
/// a batch of rotations is encoded into a single submission.
pub struct GpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    // Constant buffers (uploaded once)
    core_buffer: wgpu::Buffer,
    shell_buffer: wgpu::Buffer,
    /// Uniforms shared by all poses; `n_offsets` is set per dispatch
    params: GpuParams,
    lattice: Lattice,
    /// Workgroups along x; larger lattices spill into y
    groups: (u32, u32),
    // Mutex for serializing GPU submissions (wgpu doesn't handle concurrent submissions well)
    submit_lock: Mutex<()>,
}

impl GpuBackend {
    /// Create a new GPU backend for the given receptor volumes.
    ///
    /// Fails with `ResourceExhaustion` if the lattice exceeds the device's storage buffer limit.
    pub fn new(volumes: &FixedVolumes) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| backend_error("failed to find a suitable GPU adapter"))?;

        info!("Using GPU adapter: {:?}", adapter.get_info().name);

        let lattice = volumes.lattice().clone();
        let n_cells = lattice.len();
        let limits = adapter.limits();
        let output_bytes = (n_cells * 2 * std::mem::size_of::<f32>()) as u64;
        if output_bytes > limits.max_storage_buffer_binding_size as u64
            || output_bytes > limits.max_buffer_size
        {
            return Err(ScanError::ResourceExhaustion {
                shape: lattice.shape(),
                required_mb: output_bytes as f64 / f64::powi(1024.0, 2),
                limit_mb: limits.max_storage_buffer_binding_size as f64 / f64::powi(1024.0, 2),
            });
        }

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("dockscan GPU"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(backend_error)?;

        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Correlation Compute Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/correlate.wgsl").into()),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Correlation Bind Group Layout"),
            entries: &[
                storage(0, true),  // receptor core
                storage(1, true),  // receptor shell
                storage(2, true),  // ligand offsets
                storage(3, false), // (clash, interaction) output
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Correlation Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Correlation Compute Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let to_f32 = |data: &[f64]| data.iter().map(|v| *v as f32).collect::<Vec<f32>>();
        let core_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Receptor Core"),
            contents: bytemuck::cast_slice(&to_f32(volumes.core.data())),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let shell_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Receptor Shell"),
            contents: bytemuck::cast_slice(&to_f32(volumes.shell.data())),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let total_groups = (n_cells as u32).div_ceil(WORKGROUP_SIZE);
        let max_groups = limits.max_compute_workgroups_per_dimension.max(1);
        let groups = (
            total_groups.min(max_groups),
            total_groups.div_ceil(max_groups),
        );
        let [nx, ny, nz] = lattice.shape().map(|n| n as u32);
        let params = GpuParams {
            nx,
            ny,
            nz,
            n_offsets: 0,
            stride: groups.0 * WORKGROUP_SIZE,
            _pad: [0; 3],
        };
        info!(
            "GPU backend initialized: lattice {:?}, {} workgroups",
            lattice.shape(),
            total_groups
        );

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            core_buffer,
            shell_buffer,
            params,
            lattice,
            groups,
            submit_lock: Mutex::new(()),
        })
    }

    /// Buffers and bind group for one pose; returns the output and staging buffers
    fn bind_pose(&self, pose: &PoseFields) -> (wgpu::BindGroup, wgpu::Buffer, wgpu::Buffer) {
        let mut offsets: Vec<[u32; 4]> = pose
            .core_cells
            .iter()
            .map(|cell| {
                let w = *pose.core.get(*cell) as f32;
                [cell[0] as u32, cell[1] as u32, cell[2] as u32, w.to_bits()]
            })
            .collect();
        let params = GpuParams {
            n_offsets: offsets.len() as u32,
            ..self.params
        };
        if offsets.is_empty() {
            offsets.push([0; 4]); // zero-sized bindings are not allowed
        }

        let offset_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Ligand Offsets"),
                contents: bytemuck::cast_slice(&offsets),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Uniforms"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let output_size = self.output_size();
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Correlation Output"),
            size: output_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging"),
            size: output_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Correlation Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.core_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.shell_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: offset_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });
        (bind_group, output_buffer, staging_buffer)
    }

    /// Interleaved `(clash, interaction)` output size in bytes
    fn output_size(&self) -> u64 {
        (self.lattice.len() * 2 * std::mem::size_of::<f32>()) as u64
    }

    /// Run the shader for all poses in one submission and read back the interleaved outputs
    fn dispatch_batch(&self, poses: &[PoseFields]) -> Result<Vec<Vec<f32>>> {
        let _guard = self
            .submit_lock
            .lock()
            .map_err(|_| backend_error("GPU submission lock poisoned"))?;

        let bound: Vec<_> = poses.iter().map(|pose| self.bind_pose(pose)).collect();
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Compute Encoder"),
            });
        for (bind_group, output_buffer, staging_buffer) in &bound {
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Correlation Compute Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(self.groups.0, self.groups.1, 1);
            }
            encoder.copy_buffer_to_buffer(output_buffer, 0, staging_buffer, 0, self.output_size());
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        // Read back results
        let (sender, receiver) = mpsc::channel();
        for (i, (_, _, staging_buffer)) in bound.iter().enumerate() {
            let sender = sender.clone();
            staging_buffer
                .slice(..)
                .map_async(wgpu::MapMode::Read, move |result| {
                    let _ = sender.send((i, result));
                });
        }
        self.device.poll(wgpu::Maintain::Wait);
        for _ in 0..bound.len() {
            let (_, result) = receiver.recv().map_err(backend_error)?;
            result.map_err(backend_error)?;
        }

        bound
            .iter()
            .map(|(_, _, staging_buffer)| {
                let slice = staging_buffer.slice(..);
                let data = slice.get_mapped_range();
                let values: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
                drop(data);
                staging_buffer.unmap();
                Ok(values)
            })
            .collect()
    }
}

impl CorrelationBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn correlate(&self, pose: &PoseFields) -> Result<Correlations> {
        self.correlate_batch(std::slice::from_ref(pose))?
            .pop()
            .ok_or_else(|| backend_error("no output for pose"))
    }

    fn correlate_batch(&self, poses: &[PoseFields]) -> Result<Vec<Correlations>> {
        for pose in poses {
            check_lattice(self.name(), &self.lattice, pose)?;
        }
        let outputs = self.dispatch_batch(poses)?;
        if outputs.len() != poses.len() {
            return Err(backend_error("missing outputs in batch"));
        }
        Ok(outputs
            .into_iter()
            .map(|values| {
                let (clash, interaction) = values
                    .chunks_exact(2)
                    .map(|pair| (pair[0].round() as f64, pair[1].round() as f64))
                    .unzip();
                Correlations { clash, interaction }
            })
            .collect())
    }

    fn prefers_batch(&self) -> bool {
        true
    }
}
