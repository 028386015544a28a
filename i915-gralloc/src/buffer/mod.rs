//! Buffers and their layout.
//!
//! A buffer goes through the following steps:
//!
//! 1. A [`BufferRequest`] is planned into [`BufferMetadata`] by
//!    [`BufferMetadata::compute`]. This chooses the modifier of the buffer, and the offset,
//!    stride and size of each of its planes.
//! 2. The metadata is allocated with [`Buffer::from_metadata`], which creates the kernel buffer
//!    object. Alternatively, an existing buffer shared as dma-bufs is adopted with
//!    [`Buffer::import`].
//! 3. The buffer is mapped for CPU access, zero or more times, with [`Buffer::map`].
//!
//! The metadata of a buffer never changes once it has been planned. Dropping a `Buffer`
//! releases its kernel handles.

pub use self::{
    import::ImportInfo,
    mapping::{CachingMode, Mapping},
};
use crate::{
    device::Device,
    format::DrmFormat,
    modifier::{Modifier, Tiling},
    usage::BufferUsage,
    DeviceSize, NonExhaustive, MAX_PLANES,
};
use log::error;
use smallvec::SmallVec;
use std::sync::Arc;

mod import;
mod layout;
mod mapping;

/// Parameters to plan a buffer.
#[derive(Clone, Debug)]
pub struct BufferRequest {
    /// The width of the buffer in pixels.
    ///
    /// The default value is `0`, which must be overridden.
    pub width: u32,

    /// The height of the buffer in pixels.
    ///
    /// The default value is `0`, which must be overridden.
    pub height: u32,

    /// The pixel format of the buffer.
    ///
    /// The default value is [`DrmFormat::NONE`], which must be overridden.
    pub format: DrmFormat,

    /// How the buffer is going to be used.
    ///
    /// The default value is empty, which must be overridden.
    pub usage: BufferUsage,

    /// The modifiers that the client can handle.
    ///
    /// If `Some`, the modifier of the buffer is the most preferred modifier of the device that
    /// is also in this list. If `None`, the modifier is chosen from the combinations of the
    /// device.
    ///
    /// The default value is `None`.
    pub modifiers: Option<Vec<Modifier>>,

    pub _ne: NonExhaustive,
}

impl Default for BufferRequest {
    #[inline]
    fn default() -> Self {
        BufferRequest {
            width: 0,
            height: 0,
            format: DrmFormat::NONE,
            usage: BufferUsage::empty(),
            modifiers: None,
            _ne: NonExhaustive(()),
        }
    }
}

/// The planned layout of a buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferMetadata {
    width: u32,
    height: u32,
    format: DrmFormat,
    usage: BufferUsage,
    tiling: Tiling,
    modifier: Modifier,
    num_planes: usize,
    strides: [u32; MAX_PLANES],
    offsets: [DeviceSize; MAX_PLANES],
    sizes: [DeviceSize; MAX_PLANES],
    total_size: DeviceSize,
}

impl BufferMetadata {
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn format(&self) -> DrmFormat {
        self.format
    }

    /// Returns the usage the buffer was planned for.
    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Returns the kernel tiling mode, which follows from the modifier.
    #[inline]
    pub fn tiling(&self) -> Tiling {
        self.tiling
    }

    #[inline]
    pub fn modifier(&self) -> Modifier {
        self.modifier
    }

    /// Returns the number of planes. Compressed buffers have one more plane than their format,
    /// holding the control surface.
    #[inline]
    pub fn num_planes(&self) -> usize {
        self.num_planes
    }

    /// Returns the stride in bytes of each plane.
    #[inline]
    pub fn strides(&self) -> &[u32] {
        &self.strides[..self.num_planes]
    }

    /// Returns the offset in bytes of each plane from the start of the buffer object.
    #[inline]
    pub fn offsets(&self) -> &[DeviceSize] {
        &self.offsets[..self.num_planes]
    }

    /// Returns the size in bytes of each plane.
    #[inline]
    pub fn sizes(&self) -> &[DeviceSize] {
        &self.sizes[..self.num_planes]
    }

    /// Returns the size in bytes of the whole buffer object. This is a multiple of the page size
    /// for planned buffers.
    #[inline]
    pub fn total_size(&self) -> DeviceSize {
        self.total_size
    }
}

/// Returns the number of planes of a buffer with `format` and `modifier`.
///
/// This is the plane count of the format, except for compressed modifiers where the control
/// surface is an extra plane next to the single plane of the format.
pub fn num_planes_from_modifier(format: DrmFormat, modifier: Modifier) -> usize {
    if modifier.is_ccs() {
        2
    } else {
        format.num_planes()
    }
}

/// A buffer object, allocated or imported.
#[derive(Debug)]
pub struct Buffer {
    device: Arc<Device>,
    metadata: BufferMetadata,
    handles: SmallVec<[u32; MAX_PLANES]>,
}

impl Buffer {
    /// Wraps kernel handles that are owned from now on.
    pub(crate) fn new(
        device: Arc<Device>,
        metadata: BufferMetadata,
        handles: SmallVec<[u32; MAX_PLANES]>,
    ) -> Buffer {
        debug_assert_eq!(handles.len(), metadata.num_planes());

        Buffer {
            device,
            metadata,
            handles,
        }
    }

    /// Returns the device the buffer belongs to.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn metadata(&self) -> &BufferMetadata {
        &self.metadata
    }

    /// Returns the kernel handle of each plane.
    ///
    /// Allocated buffers have the same handle for every plane.
    #[inline]
    pub fn handles(&self) -> &[u32] {
        &self.handles
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        close_handles(&self.device, &self.handles);
    }
}

/// Closes each distinct handle of `handles` once.
pub(crate) fn close_handles(device: &Device, handles: &[u32]) {
    for (i, &handle) in handles.iter().enumerate() {
        if handles[..i].contains(&handle) {
            continue;
        }

        if let Err(err) = device.kernel().gem_close(handle) {
            error!("{} (handle {})", err, handle);
        }
    }
}
