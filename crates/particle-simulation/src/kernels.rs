//! The two kernels and their buffer bindings

use crate::buffers::DeviceBuffers;
use crate::config::KernelEntryPoints;
use crate::device::{BufferKind, ComputeDevice};
use crate::error::SimResult;

/// Integration and commit kernels
pub struct KernelSet<K> {
    /// Applies forces and writes the next position into `result`
    pub integrate: K,
    /// Copies `result` into `position`
    pub commit: K,
}

impl<K> KernelSet<K> {
    /// Resolve both entry points. Fails with `KernelNotFound` if either is missing.
    pub fn resolve<D>(device: &mut D, entry_points: &KernelEntryPoints) -> SimResult<Self>
    where
        D: ComputeDevice<Kernel = K>,
    {
        let integrate = device.load_kernel(&entry_points.integrate)?;
        let commit = device.load_kernel(&entry_points.commit)?;
        log::debug!(
            "Resolved kernels `{}` and `{}`",
            entry_points.integrate,
            entry_points.commit
        );
        Ok(Self { integrate, commit })
    }

    /// Bind every buffer of the set to both kernels' slots
    pub fn bind<D>(&mut self, device: &mut D, buffers: &DeviceBuffers<D::Buffer>) -> SimResult<()>
    where
        D: ComputeDevice<Kernel = K>,
    {
        device.bind(&mut self.integrate, buffers)?;
        device.bind(&mut self.commit, buffers)?;
        log::debug!("Bound {} buffers to both kernels", BufferKind::ALL.len());
        Ok(())
    }
}
