//! Compute device abstraction
//!
//! The driver only talks to the device through [`ComputeDevice`]. Buffer and
//! kernel handles are owned values: dropping a buffer handle releases its device
//! memory, so a half-built buffer set cleans up after itself.

use glam::Vec3;

use crate::buffers::DeviceBuffers;
use crate::error::SimResult;
use crate::params::KernelParams;

/// The five per-ball device arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Acceleration,
    Velocity,
    Position,
    Mass,
    Result,
}

impl BufferKind {
    pub const ALL: [BufferKind; 5] = [
        BufferKind::Acceleration,
        BufferKind::Velocity,
        BufferKind::Position,
        BufferKind::Mass,
        BufferKind::Result,
    ];

    /// Bytes per element; elements are tightly packed (no vec4 padding)
    pub const fn element_size(self) -> u64 {
        match self {
            BufferKind::Mass => 4,
            _ => 12,
        }
    }

    /// f32 components per element
    pub const fn components(self) -> usize {
        (self.element_size() / 4) as usize
    }

    /// Binding slot in the kernels' bind group (see `attractor.wgsl`)
    pub const fn binding(self) -> u32 {
        match self {
            BufferKind::Acceleration => 0,
            BufferKind::Velocity => 1,
            BufferKind::Position => 2,
            BufferKind::Mass => 3,
            BufferKind::Result => 4,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            BufferKind::Acceleration => "Acceleration",
            BufferKind::Velocity => "Velocity",
            BufferKind::Position => "Position",
            BufferKind::Mass => "Mass",
            BufferKind::Result => "Result",
        }
    }

    pub const fn read_only(self) -> bool {
        matches!(self, BufferKind::Mass)
    }
}

/// Binding slot of the uniform parameter block
pub const PARAMS_BINDING: u32 = 5;

/// Threads per workgroup; must match `@workgroup_size` in `attractor.wgsl`
pub const WORKGROUP_SIZE: u32 = 64;

pub fn workgroup_count(ball_count: u32) -> u32 {
    ball_count.div_ceil(WORKGROUP_SIZE)
}

/// Workgroup grid covering `ball_count` threads. Groups beyond
/// `max_per_dimension` wrap into y; the kernels rebuild the flat index as
/// `gid.x + gid.y * num_workgroups.x * WORKGROUP_SIZE`.
pub fn dispatch_grid(ball_count: u32, max_per_dimension: u32) -> (u32, u32) {
    let groups = workgroup_count(ball_count);
    let max = max_per_dimension.max(1);
    if groups <= max {
        (groups, 1)
    } else {
        (max, groups.div_ceil(max))
    }
}

/// An owned device allocation
pub trait DeviceBuffer {
    fn kind(&self) -> BufferKind;

    /// Element count
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn byte_size(&self) -> u64 {
        self.len() as u64 * self.kind().element_size()
    }
}

/// A compute backend able to run the integration and commit kernels.
///
/// Ordering contract: operations take effect on the device in the order they
/// are issued. A readback begun after a dispatch observes that dispatch's writes.
pub trait ComputeDevice {
    type Buffer: DeviceBuffer;
    type Kernel;
    /// An in-flight device-to-host copy
    type Readback;

    /// Human-readable backend name for logs
    fn name(&self) -> String;

    /// Resolve a kernel entry point
    fn load_kernel(&mut self, entry_point: &str) -> SimResult<Self::Kernel>;

    /// Allocate a buffer of `count` elements
    fn create_buffer(&mut self, kind: BufferKind, count: u32) -> SimResult<Self::Buffer>;

    /// Overwrite a whole buffer; `bytes.len()` must equal its byte size
    fn upload(&mut self, buffer: &Self::Buffer, bytes: &[u8]) -> SimResult<()>;

    /// Bind every buffer of the set to the kernel's slots
    fn bind(
        &mut self,
        kernel: &mut Self::Kernel,
        buffers: &DeviceBuffers<Self::Buffer>,
    ) -> SimResult<()>;

    /// Replace the uniform parameter block seen by subsequent dispatches
    fn write_params(&mut self, params: &KernelParams) -> SimResult<()>;

    /// Run `kernel` once per index in `0..count`
    fn dispatch(&mut self, kernel: &Self::Kernel, count: u32) -> SimResult<()>;

    /// Start copying a vec3 buffer back to the host. Does not block.
    fn begin_readback(&mut self, buffer: &Self::Buffer) -> SimResult<Self::Readback>;

    /// Wait for `readback` and copy its contents into `out`.
    /// `out` is untouched unless the whole readback completed.
    fn finish_readback(&mut self, readback: Self::Readback, out: &mut [Vec3]) -> SimResult<()>;
}
