use super::{close_handles, num_planes_from_modifier, Buffer, BufferMetadata};
use crate::{
    device::Device,
    format::DrmFormat,
    modifier::{Modifier, Tiling},
    usage::BufferUsage,
    DeviceSize, KernelError, NonExhaustive, Validated, ValidationError, MAX_PLANES,
};
use log::error;
use smallvec::SmallVec;
use std::{os::fd::BorrowedFd, sync::Arc};

/// Parameters to import a buffer that was shared as dma-bufs.
#[derive(Clone, Debug)]
pub struct ImportInfo<'a> {
    /// The width of the buffer in pixels.
    ///
    /// The default value is `0`.
    pub width: u32,

    /// The height of the buffer in pixels.
    ///
    /// The default value is `0`.
    pub height: u32,

    /// The pixel format of the buffer.
    ///
    /// There is no default value.
    pub format: DrmFormat,

    /// The modifier the buffer was allocated with.
    ///
    /// There is no default value.
    pub modifier: Modifier,

    /// How the buffer is going to be used.
    ///
    /// The default value is empty.
    pub usage: BufferUsage,

    /// The tiling mode of the buffer, used on generations where the kernel doesn't track it.
    ///
    /// The default value is [`Tiling::None`].
    pub tiling: Tiling,

    /// The dma-buf of each plane. Planes that share a buffer object repeat its dma-buf.
    ///
    /// The default value is empty, which must be overridden.
    pub fds: SmallVec<[BorrowedFd<'a>; MAX_PLANES]>,

    /// The stride in bytes of each plane.
    ///
    /// The default value is `0` for every plane.
    pub strides: [u32; MAX_PLANES],

    /// The offset in bytes of each plane within its dma-buf.
    ///
    /// The default value is `0` for every plane.
    pub offsets: [DeviceSize; MAX_PLANES],

    /// The size in bytes of each plane, or `0` to extend the plane to the offset of the next
    /// one, or to the end of its dma-buf for the last one.
    ///
    /// The default value is `0` for every plane.
    pub sizes: [DeviceSize; MAX_PLANES],

    pub _ne: NonExhaustive,
}

impl<'a> ImportInfo<'a> {
    /// Returns an `ImportInfo` with the specified `format` and `modifier`.
    #[inline]
    pub fn new(format: DrmFormat, modifier: Modifier) -> Self {
        ImportInfo {
            width: 0,
            height: 0,
            format,
            modifier,
            usage: BufferUsage::empty(),
            tiling: Tiling::None,
            fds: SmallVec::new(),
            strides: [0; MAX_PLANES],
            offsets: [0; MAX_PLANES],
            sizes: [0; MAX_PLANES],
            _ne: NonExhaustive(()),
        }
    }

    /// Returns an `ImportInfo` that describes `metadata`, given the dma-buf of each plane.
    pub fn from_metadata(
        metadata: &BufferMetadata,
        fds: impl IntoIterator<Item = BorrowedFd<'a>>,
    ) -> Self {
        let mut strides = [0; MAX_PLANES];
        let mut offsets = [0; MAX_PLANES];
        let mut sizes = [0; MAX_PLANES];
        strides[..metadata.num_planes()].copy_from_slice(metadata.strides());
        offsets[..metadata.num_planes()].copy_from_slice(metadata.offsets());
        sizes[..metadata.num_planes()].copy_from_slice(metadata.sizes());

        ImportInfo {
            width: metadata.width(),
            height: metadata.height(),
            usage: metadata.usage(),
            tiling: metadata.tiling(),
            fds: fds.into_iter().collect(),
            strides,
            offsets,
            sizes,
            ..ImportInfo::new(metadata.format(), metadata.modifier())
        }
    }

    fn validate(&self, num_planes: usize) -> Result<(), Box<ValidationError>> {
        if num_planes == 0 {
            return Err(ValidationError::new(
                "format",
                format!("{:?} is not a known format", self.format),
            ));
        }

        if self.fds.len() != num_planes {
            return Err(ValidationError::new(
                "fds",
                format!(
                    "a buffer of format {:?} with modifier {:?} has {} planes, but {} dma-bufs \
                    were given",
                    self.format,
                    self.modifier,
                    num_planes,
                    self.fds.len(),
                ),
            ));
        }

        Ok(())
    }
}

impl Buffer {
    /// Adopts a buffer that another process or device shared as dma-bufs.
    ///
    /// The number of planes follows from the format and modifier. Each plane spans up to the
    /// offset of the next plane, or to the end of its dma-buf for the last one. Its size is
    /// taken from `import_info.sizes` when given, and is the whole span otherwise. The total
    /// size is the sum of the spans, so importing the dma-buf of an allocated buffer with
    /// [`ImportInfo::from_metadata`] reproduces its metadata. On generations with fences, the tiling mode is read back from the kernel rather than
    /// taken from `import_info`.
    pub fn import(
        device: Arc<Device>,
        import_info: &ImportInfo<'_>,
    ) -> Result<Buffer, Validated<KernelError>> {
        let num_planes = num_planes_from_modifier(import_info.format, import_info.modifier);
        import_info
            .validate(num_planes)
            .map_err(|err| err.add_context("import_info"))?;

        let mut handles = SmallVec::<[u32; MAX_PLANES]>::new();

        match import_planes(&device, import_info, num_planes, &mut handles) {
            Ok(metadata) => Ok(Buffer::new(device, metadata, handles)),
            Err(err) => {
                close_handles(&device, &handles);

                Err(err)
            }
        }
    }
}

fn import_planes(
    device: &Device,
    import_info: &ImportInfo<'_>,
    num_planes: usize,
    handles: &mut SmallVec<[u32; MAX_PLANES]>,
) -> Result<BufferMetadata, Validated<KernelError>> {
    let kernel = device.kernel();
    let offsets = &import_info.offsets[..num_planes];
    let mut sizes = [0; MAX_PLANES];
    let mut total_size: DeviceSize = 0;

    for (plane, &fd) in import_info.fds.iter().enumerate() {
        let handle = kernel
            .prime_fd_to_handle(fd)
            .inspect_err(|err| error!("{}", err))?;
        handles.push(handle);

        let dmabuf_size = kernel.dmabuf_size(fd)?;
        let offset = offsets[plane];
        let end = match offsets.get(plane + 1) {
            Some(&next) if next != 0 => next,
            _ => dmabuf_size,
        };

        if offset > end || end > dmabuf_size {
            return Err(ValidationError::new(
                format!("import_info.offsets[{}]", plane),
                format!(
                    "plane {} ends at {}, beyond the dma-buf of {} bytes: buffer size is too \
                    large",
                    plane, end, dmabuf_size,
                ),
            )
            .into());
        }

        let span = end - offset;
        let size = match import_info.sizes[plane] {
            0 => span,
            size => size,
        };

        if size > span {
            return Err(ValidationError::new(
                format!("import_info.sizes[{}]", plane),
                format!(
                    "plane {} is {} bytes, but only {} bytes are left before the next plane or \
                    the end of its dma-buf: buffer size is too large",
                    plane, size, span,
                ),
            )
            .into());
        }

        sizes[plane] = size;
        total_size += span;
    }

    let tiling = if device.has_tiling_fence() {
        let raw = kernel
            .get_tiling(handles[0])
            .inspect_err(|err| error!("{}", err))?;

        Tiling::try_from(raw).map_err(|_| {
            ValidationError::new(
                "tiling",
                format!("the kernel reported the unknown tiling mode {}", raw),
            )
        })?
    } else {
        import_info.tiling
    };

    let mut strides = [0; MAX_PLANES];
    let mut plane_offsets = [0; MAX_PLANES];
    strides[..num_planes].copy_from_slice(&import_info.strides[..num_planes]);
    plane_offsets[..num_planes].copy_from_slice(offsets);

    Ok(BufferMetadata {
        width: import_info.width,
        height: import_info.height,
        format: import_info.format,
        usage: import_info.usage,
        tiling,
        modifier: import_info.modifier,
        num_planes,
        strides,
        offsets: plane_offsets,
        sizes,
        total_size,
    })
}
