//! wgpu compute backend

use std::sync::mpsc;

use glam::Vec3;
use wgpu::util::DeviceExt;

use crate::buffers::DeviceBuffers;
use crate::device::{
    dispatch_grid, BufferKind, ComputeDevice, DeviceBuffer, PARAMS_BINDING,
};
use crate::error::{SimResult, SimulationError};
use crate::params::KernelParams;

/// Kernel program shipped with the crate (`integrate` and `commit` entry points)
pub const ATTRACTOR_SHADER: &str = include_str!("shaders/attractor.wgsl");

/// A storage buffer. Destroyed when dropped, even if a dispatch still references it;
/// wgpu defers the actual free until the GPU is done with it.
pub struct GpuBuffer {
    buffer: wgpu::Buffer,
    kind: BufferKind,
    len: u32,
}

impl GpuBuffer {
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

impl DeviceBuffer for GpuBuffer {
    fn kind(&self) -> BufferKind {
        self.kind
    }

    fn len(&self) -> u32 {
        self.len
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.buffer.destroy();
    }
}

pub struct GpuKernel {
    entry_point: String,
    pipeline: wgpu::ComputePipeline,
    bind_group: Option<wgpu::BindGroup>,
}

/// Copy of the result buffer on its way to the host
pub struct GpuReadback {
    staging: wgpu::Buffer,
    size: u64,
    submission: wgpu::SubmissionIndex,
    rx: mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>,
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,

    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    params_buffer: wgpu::Buffer,
    max_workgroups_per_dimension: u32,

    // Unmapped staging buffers ready for reuse
    free_staging: Vec<wgpu::Buffer>,
}

impl WgpuDevice {
    /// Request a headless adapter and device (no surface)
    pub fn request() -> SimResult<Self> {
        pollster::block_on(Self::request_async())
    }

    pub async fn request_async() -> SimResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| SimulationError::execution("adapter request", e.to_string()))?;

        let adapter_name = adapter.get_info().name;
        log::info!("Using GPU: {}", adapter_name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Attractor Device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| SimulationError::execution("device request", e.to_string()))?;

        Self::new(device, queue, adapter_name)
    }

    /// Wrap an existing device with the built-in kernel program
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, adapter_name: String) -> SimResult<Self> {
        Self::with_shader_source(device, queue, adapter_name, ATTRACTOR_SHADER)
    }

    /// Wrap an existing device with a custom WGSL program. The program must use
    /// the bind group layout of `attractor.wgsl`.
    pub fn with_shader_source(
        device: wgpu::Device,
        queue: wgpu::Queue,
        adapter_name: String,
        source: &str,
    ) -> SimResult<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Attractor Compute Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(SimulationError::execution("shader compilation", e.to_string()));
        }
        log::debug!("Shader loaded");

        let storage_entry = |kind: BufferKind| wgpu::BindGroupLayoutEntry {
            binding: kind.binding(),
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage {
                    read_only: kind.read_only(),
                },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let mut entries: Vec<wgpu::BindGroupLayoutEntry> =
            BufferKind::ALL.into_iter().map(storage_entry).collect();
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: PARAMS_BINDING,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Attractor Bind Group Layout"),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Attractor Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Kernel Params Buffer"),
            contents: bytemuck::cast_slice(&[<KernelParams as bytemuck::Zeroable>::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let max_workgroups_per_dimension = device.limits().max_compute_workgroups_per_dimension;

        Ok(Self {
            device,
            queue,
            adapter_name,
            shader,
            bind_group_layout,
            pipeline_layout,
            params_buffer,
            max_workgroups_per_dimension,
            free_staging: Vec::new(),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn staging_buffer(&mut self, size: u64) -> wgpu::Buffer {
        if let Some(index) = self.free_staging.iter().position(|b| b.size() == size) {
            return self.free_staging.swap_remove(index);
        }
        log::debug!("Creating readback staging buffer ({} bytes)", size);
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Result Readback Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }
}

impl ComputeDevice for WgpuDevice {
    type Buffer = GpuBuffer;
    type Kernel = GpuKernel;
    type Readback = GpuReadback;

    fn name(&self) -> String {
        format!("GPU ({})", self.adapter_name)
    }

    fn load_kernel(&mut self, entry_point: &str) -> SimResult<GpuKernel> {
        // wgpu has no entry point lookup; a pipeline for a missing entry fails validation
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&self.pipeline_layout),
                module: &self.shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            });
        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            log::warn!("Failed to create pipeline for `{}`: {}", entry_point, e);
            return Err(SimulationError::KernelNotFound {
                entry_point: entry_point.to_string(),
            });
        }

        Ok(GpuKernel {
            entry_point: entry_point.to_string(),
            pipeline,
            bind_group: None,
        })
    }

    fn create_buffer(&mut self, kind: BufferKind, count: u32) -> SimResult<GpuBuffer> {
        let size = count as u64 * kind.element_size();
        let limits = self.device.limits();
        if size > limits.max_buffer_size || size > limits.max_storage_buffer_binding_size as u64 {
            return Err(SimulationError::DeviceAllocationFailed {
                buffer: kind.label(),
                bytes: size,
                reason: format!(
                    "exceeds device limit of {} bytes",
                    limits
                        .max_buffer_size
                        .min(limits.max_storage_buffer_binding_size as u64)
                ),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(kind.label()),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(SimulationError::DeviceAllocationFailed {
                buffer: kind.label(),
                bytes: size,
                reason: e.to_string(),
            });
        }

        Ok(GpuBuffer {
            buffer,
            kind,
            len: count,
        })
    }

    fn upload(&mut self, buffer: &GpuBuffer, bytes: &[u8]) -> SimResult<()> {
        if bytes.len() as u64 != buffer.byte_size() {
            return Err(SimulationError::execution(
                "upload",
                format!(
                    "{} buffer holds {} bytes, got {}",
                    buffer.kind.label(),
                    buffer.byte_size(),
                    bytes.len()
                ),
            ));
        }
        self.queue.write_buffer(&buffer.buffer, 0, bytes);
        Ok(())
    }

    fn bind(&mut self, kernel: &mut GpuKernel, buffers: &DeviceBuffers<GpuBuffer>) -> SimResult<()> {
        let mut entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .map(|b| wgpu::BindGroupEntry {
                binding: b.kind.binding(),
                resource: b.buffer.as_entire_binding(),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: PARAMS_BINDING,
            resource: self.params_buffer.as_entire_binding(),
        });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.entry_point.as_str()),
            layout: &self.bind_group_layout,
            entries: &entries,
        });
        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(SimulationError::execution("bind", e.to_string()));
        }

        kernel.bind_group = Some(bind_group);
        Ok(())
    }

    fn write_params(&mut self, params: &KernelParams) -> SimResult<()> {
        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::cast_slice(&[*params]));
        Ok(())
    }

    fn dispatch(&mut self, kernel: &GpuKernel, count: u32) -> SimResult<()> {
        let bind_group = kernel.bind_group.as_ref().ok_or_else(|| {
            SimulationError::execution(
                "dispatch",
                format!("kernel `{}` has no buffers bound", kernel.entry_point),
            )
        })?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Attractor Dispatch Encoder"),
            });
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.entry_point.as_str()),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&kernel.pipeline);
            compute_pass.set_bind_group(0, bind_group, &[]);
            let (x, y) = dispatch_grid(count, self.max_workgroups_per_dimension);
            compute_pass.dispatch_workgroups(x, y, 1);
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(SimulationError::execution("dispatch", e.to_string()));
        }
        Ok(())
    }

    fn begin_readback(&mut self, buffer: &GpuBuffer) -> SimResult<GpuReadback> {
        let size = buffer.byte_size();
        let staging = self.staging_buffer(size);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Result Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, size);
        let submission = self.queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = mpsc::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        Ok(GpuReadback {
            staging,
            size,
            submission,
            rx,
        })
    }

    fn finish_readback(&mut self, readback: GpuReadback, out: &mut [Vec3]) -> SimResult<()> {
        let GpuReadback {
            staging,
            size,
            submission,
            rx,
        } = readback;

        if size != std::mem::size_of_val(out) as u64 {
            return Err(SimulationError::execution(
                "readback",
                format!(
                    "readback holds {} bytes, destination holds {}",
                    size,
                    std::mem::size_of_val(out)
                ),
            ));
        }

        // Waits for the copy's submission only, not for work submitted after it
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(submission),
                timeout: None,
            })
            .map_err(|e| SimulationError::execution("readback", e.to_string()))?;

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SimulationError::execution("readback", e.to_string())),
            Err(_) => {
                return Err(SimulationError::execution(
                    "readback",
                    "map callback dropped before completing",
                ))
            }
        }

        {
            let data = staging.slice(..).get_mapped_range();
            bytemuck::cast_slice_mut::<Vec3, u8>(out).copy_from_slice(&data);
        }
        staging.unmap();
        self.free_staging.push(staging);
        Ok(())
    }
}
