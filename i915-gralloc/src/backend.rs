//! The entry points a host buffer manager dispatches through.
//!
//! A host loads one backend per DRM device. The backend is created from an open
//! [`KernelDevice`], after which the host plans, allocates, imports and maps buffers through the
//! [`Backend`] trait. Dropping the backend releases the device once every buffer created from it
//! is gone.

use crate::{
    buffer::{self, Buffer, BufferMetadata, BufferRequest, ImportInfo, Mapping},
    combination::Combinations,
    config::DeviceConfig,
    device::Device,
    format::DrmFormat,
    kernel::KernelDevice,
    modifier::Modifier,
    usage::MapFlags,
    KernelError, Validated,
};
use std::sync::Arc;

/// The operations of a buffer allocation backend.
pub trait Backend: Send + Sync {
    /// Returns the name of the kernel driver the backend drives.
    fn name(&self) -> &'static str;

    /// Returns the (format, usage, modifier) combinations that the backend can allocate.
    fn combinations(&self) -> &Combinations;

    /// Plans the layout of a buffer.
    fn compute_metadata(
        &self,
        request: &BufferRequest,
    ) -> Result<BufferMetadata, Validated<KernelError>>;

    /// Allocates the buffer object for a planned buffer.
    fn create_from_metadata(
        &self,
        metadata: BufferMetadata,
    ) -> Result<Buffer, Validated<KernelError>>;

    /// Adopts a buffer that was shared as dma-bufs.
    fn import(&self, import_info: &ImportInfo<'_>) -> Result<Buffer, Validated<KernelError>>;

    /// Maps `buffer` for CPU access.
    fn map<'a>(
        &self,
        buffer: &'a Buffer,
        flags: MapFlags,
    ) -> Result<Mapping<'a>, Validated<KernelError>>;

    /// Prepares `mapping` for CPU access.
    fn invalidate(&self, mapping: &Mapping<'_>) -> Result<(), KernelError>;

    /// Makes the CPU writes through `mapping` visible to the GPU.
    fn flush(&self, mapping: &Mapping<'_>) -> Result<(), KernelError>;

    /// Returns the number of planes of a buffer with `format` and `modifier`.
    fn num_planes_from_modifier(&self, format: DrmFormat, modifier: Modifier) -> usize;

    /// Returns whether the driver has `feature`.
    fn is_feature_supported(&self, feature: DriverFeature) -> bool;
}

/// A driver feature that a host can query with [`Backend::is_feature_supported`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DriverFeature {
    /// The GPU is a discrete GPU with its own memory.
    I915Dgpu,
}

/// The backend for GPUs driven by the i915 kernel driver.
#[derive(Debug)]
pub struct I915Backend {
    device: Arc<Device>,
}

impl I915Backend {
    /// Probes the GPU behind `kernel` and creates a backend for it.
    pub fn new(
        kernel: Arc<dyn KernelDevice>,
        config: DeviceConfig,
    ) -> Result<I915Backend, Validated<KernelError>> {
        let device = Device::new(kernel, config)?;

        Ok(I915Backend { device })
    }

    /// Returns the probed device.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Backend for I915Backend {
    #[inline]
    fn name(&self) -> &'static str {
        "i915"
    }

    #[inline]
    fn combinations(&self) -> &Combinations {
        self.device.combinations()
    }

    fn compute_metadata(
        &self,
        request: &BufferRequest,
    ) -> Result<BufferMetadata, Validated<KernelError>> {
        Ok(BufferMetadata::compute(&self.device, request)?)
    }

    fn create_from_metadata(
        &self,
        metadata: BufferMetadata,
    ) -> Result<Buffer, Validated<KernelError>> {
        Buffer::from_metadata(self.device.clone(), metadata)
    }

    fn import(&self, import_info: &ImportInfo<'_>) -> Result<Buffer, Validated<KernelError>> {
        Buffer::import(self.device.clone(), import_info)
    }

    fn map<'a>(
        &self,
        buffer: &'a Buffer,
        flags: MapFlags,
    ) -> Result<Mapping<'a>, Validated<KernelError>> {
        buffer.map(flags)
    }

    fn invalidate(&self, mapping: &Mapping<'_>) -> Result<(), KernelError> {
        mapping.invalidate()
    }

    fn flush(&self, mapping: &Mapping<'_>) -> Result<(), KernelError> {
        mapping.flush()
    }

    #[inline]
    fn num_planes_from_modifier(&self, format: DrmFormat, modifier: Modifier) -> usize {
        buffer::num_planes_from_modifier(format, modifier)
    }

    fn is_feature_supported(&self, feature: DriverFeature) -> bool {
        match feature {
            DriverFeature::I915Dgpu => self.device.has_local_mem(),
        }
    }
}
