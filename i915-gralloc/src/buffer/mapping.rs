use super::Buffer;
use crate::{
    kernel::{GemDomains, GemMmapFlags, MmapOffsetMode},
    modifier::Tiling,
    usage::{BufferUsage, MapFlags},
    KernelError, Validated, ValidationError,
};
use log::error;
use std::{ffi::c_void, ptr::NonNull};

/// The CPU caching of a mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CachingMode {
    WriteCombined,
    WriteBack,
}

impl CachingMode {
    /// Returns the caching mode for mapping a buffer with `usage`.
    ///
    /// Scan-out buffers are written by the CPU and read by the display, so they are mapped
    /// write-combined, unless a performance-sensitive CPU reader needs them cached.
    pub fn select(usage: BufferUsage) -> CachingMode {
        let cached_readers = BufferUsage::RENDERSCRIPT
            | BufferUsage::CAMERA_READ
            | BufferUsage::CAMERA_WRITE
            | BufferUsage::SW_READ_OFTEN;

        if usage.intersects(BufferUsage::SCANOUT) && !usage.intersects(cached_readers) {
            CachingMode::WriteCombined
        } else {
            CachingMode::WriteBack
        }
    }

    fn mmap_offset_mode(self) -> MmapOffsetMode {
        match self {
            CachingMode::WriteCombined => MmapOffsetMode::Wc,
            CachingMode::WriteBack => MmapOffsetMode::Wb,
        }
    }

    fn gem_mmap_flags(self) -> GemMmapFlags {
        match self {
            CachingMode::WriteCombined => GemMmapFlags::WC,
            CachingMode::WriteBack => GemMmapFlags::empty(),
        }
    }
}

impl Buffer {
    /// Maps the whole buffer into the address space of the process.
    ///
    /// Compressed buffers can't be mapped. The caching of the mapping follows from the usage
    /// of the buffer, see [`CachingMode::select`].
    pub fn map(&self, flags: MapFlags) -> Result<Mapping<'_>, Validated<KernelError>> {
        let metadata = self.metadata();

        if metadata.modifier().is_ccs() {
            return Err(ValidationError::new(
                "modifier",
                format!(
                    "buffers with modifier {:?} can't be mapped",
                    metadata.modifier(),
                ),
            )
            .into());
        }

        let len = usize::try_from(metadata.total_size()).map_err(|_| {
            ValidationError::new("total_size", "doesn't fit in the address space")
        })?;
        let ptr = self
            .map_object(len, flags)
            .inspect_err(|err| error!("mapping the buffer failed: {}", err))?;

        Ok(Mapping {
            buffer: self,
            ptr,
            len,
            flags,
        })
    }

    fn map_object(&self, len: usize, flags: MapFlags) -> Result<NonNull<c_void>, KernelError> {
        let device = self.device();
        let kernel = device.kernel();
        let handle = self.handles()[0];
        let caching = CachingMode::select(self.metadata().usage());

        if device.has_mmap_offset() {
            let offset = if device.has_local_mem() {
                // Objects in local memory have a fixed caching mode. Older kernels don't know
                // about it.
                kernel
                    .gem_mmap_offset(handle, MmapOffsetMode::Fixed)
                    .or_else(|_| kernel.gem_mmap_offset(handle, caching.mmap_offset_mode()))?
            } else {
                kernel.gem_mmap_offset(handle, caching.mmap_offset_mode())?
            };

            return kernel.mmap(offset, len, MapFlags::READ | MapFlags::WRITE);
        }

        let size = self.metadata().total_size();

        // The legacy mmap ioctl maps the backing shmem file and returns the address directly.
        if self.metadata().tiling() == Tiling::None {
            return kernel.gem_mmap(handle, size, caching.gem_mmap_flags());
        }

        match kernel.gem_mmap_gtt(handle) {
            Ok(offset) => kernel.mmap(offset, len, flags),
            Err(err) => {
                error!("{}, falling back to the mmap ioctl", err);

                kernel.gem_mmap(handle, size, caching.gem_mmap_flags())
            }
        }
    }
}

/// A CPU mapping of a [`Buffer`].
///
/// The mapping covers the total size of the buffer, and is unmapped when dropped.
#[derive(Debug)]
pub struct Mapping<'a> {
    buffer: &'a Buffer,
    ptr: NonNull<c_void>,
    len: usize,
    flags: MapFlags,
}

impl<'a> Mapping<'a> {
    /// Returns the address of the start of the buffer.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<c_void> {
        self.ptr
    }

    /// Returns the length of the mapping in bytes, which is the total size of the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn map_flags(&self) -> MapFlags {
        self.flags
    }

    #[inline]
    pub fn buffer(&self) -> &'a Buffer {
        self.buffer
    }

    /// Moves the buffer to the CPU domain, so that CPU reads see what the GPU wrote.
    ///
    /// Linear buffers move to the CPU domain and tiled buffers to the GTT domain. If the mapping
    /// is writable, the buffer is also marked as about to be written by the CPU.
    pub fn invalidate(&self) -> Result<(), KernelError> {
        let buffer = self.buffer;
        let device = buffer.device();

        // DG2 keeps no CPU domain.
        if device.gen_x10() == 125 {
            return Ok(());
        }

        let domain = if buffer.metadata().tiling() == Tiling::None {
            GemDomains::CPU
        } else {
            GemDomains::GTT
        };
        let write_domain = if self.flags.intersects(MapFlags::WRITE) {
            domain
        } else {
            GemDomains::empty()
        };

        device
            .kernel()
            .gem_set_domain(buffer.handles()[0], domain, write_domain)
            .inspect_err(|err| error!("{}", err))
    }

    /// Makes CPU writes visible to the GPU.
    ///
    /// Without a shared last-level cache, the CPU caches of linear buffers are written back
    /// explicitly. Tiled buffers are mapped through the GTT, which is not cached.
    pub fn flush(&self) -> Result<(), KernelError> {
        let buffer = self.buffer;

        if !buffer.device().has_llc() && buffer.metadata().tiling() == Tiling::None {
            clflush(self.ptr.cast(), self.len);
        }

        Ok(())
    }
}

impl Drop for Mapping<'_> {
    fn drop(&mut self) {
        let kernel = self.buffer.device().kernel();

        if let Err(err) = unsafe { kernel.munmap(self.ptr, self.len) } {
            error!("{}", err);
        }
    }
}

/// Writes back and invalidates the cache lines that cover `len` bytes from `ptr`.
fn clflush(ptr: NonNull<u8>, len: usize) {
    #[cfg(target_arch = "x86_64")]
    {
        use std::arch::x86_64::{_mm_clflush, _mm_mfence};

        const CACHELINE_SIZE: usize = 64;

        let start = ptr.as_ptr() as usize & !(CACHELINE_SIZE - 1);
        let end = ptr.as_ptr() as usize + len;

        unsafe { _mm_mfence() };

        for line in (start..end).step_by(CACHELINE_SIZE) {
            // SAFETY: `line` is in a cache line that overlaps the mapping.
            unsafe { _mm_clflush(line as *const u8) };
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = (ptr, len);
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::{BufferMetadata, BufferRequest},
        format::DrmFormat,
        kernel::mock::{self, Call, MockConfig, MockKernel},
        modifier::Modifier,
        Device,
    };
    use std::sync::Arc;

    fn buffer(
        device: &Arc<Device>,
        format: DrmFormat,
        usage: BufferUsage,
        modifiers: Option<Vec<Modifier>>,
    ) -> Buffer {
        let metadata = BufferMetadata::compute(
            device,
            &BufferRequest {
                width: 128,
                height: 64,
                format,
                usage,
                modifiers,
                ..Default::default()
            },
        )
        .unwrap();

        Buffer::from_metadata(device.clone(), metadata).unwrap()
    }

    fn mmap_offset_calls(kernel: &MockKernel) -> Vec<Call> {
        kernel.calls_matching(|call| matches!(call, Call::GemMmapOffset { .. }))
    }

    #[test]
    fn caching_mode() {
        assert_eq!(
            CachingMode::select(BufferUsage::SCANOUT | BufferUsage::SW_WRITE_OFTEN),
            CachingMode::WriteCombined,
        );
        assert_eq!(
            CachingMode::select(BufferUsage::SCANOUT | BufferUsage::SW_READ_OFTEN),
            CachingMode::WriteBack,
        );
        assert_eq!(
            CachingMode::select(BufferUsage::SCANOUT | BufferUsage::CAMERA_WRITE),
            CachingMode::WriteBack,
        );
        assert_eq!(
            CachingMode::select(BufferUsage::SCANOUT | BufferUsage::RENDERSCRIPT),
            CachingMode::WriteBack,
        );
        assert_eq!(
            CachingMode::select(BufferUsage::SW_WRITE_OFTEN),
            CachingMode::WriteBack,
        );
    }

    #[test]
    fn mmap_offset_on_integrated() {
        let (kernel, device) = mock::gen12();
        let buffer = buffer(
            &device,
            DrmFormat::XRGB8888,
            BufferUsage::SCANOUT | BufferUsage::SW_WRITE_OFTEN,
            None,
        );
        let handle = buffer.handles()[0];
        let total_size = buffer.metadata().total_size() as usize;

        let mapping = buffer.map(MapFlags::WRITE).unwrap();
        assert_eq!(mapping.len(), total_size);
        assert_eq!(
            mmap_offset_calls(&kernel),
            [Call::GemMmapOffset {
                handle,
                mode: MmapOffsetMode::Wc,
            }],
        );
        assert_eq!(
            kernel.calls_matching(|call| matches!(call, Call::Mmap { .. })),
            [Call::Mmap {
                offset: u64::from(handle) << 32,
                len: total_size,
                access: MapFlags::READ | MapFlags::WRITE,
            }],
        );

        drop(mapping);
        assert_eq!(
            kernel.calls_matching(|call| matches!(call, Call::Munmap { .. })),
            [Call::Munmap { len: total_size }],
        );
        assert_eq!(kernel.live_mapping_count(), 0);
    }

    #[test]
    fn mmap_offset_fixed_on_discrete() {
        let (kernel, device) = mock::dg2();
        let buffer = buffer(&device, DrmFormat::XRGB8888, BufferUsage::SW_READ_OFTEN, None);
        let handle = buffer.handles()[0];

        let _mapping = buffer.map(MapFlags::READ).unwrap();
        assert_eq!(
            mmap_offset_calls(&kernel),
            [Call::GemMmapOffset {
                handle,
                mode: MmapOffsetMode::Fixed,
            }],
        );
    }

    #[test]
    fn fixed_mode_falls_back_once() {
        let (kernel, device) = mock::dg2();
        kernel.fail(
            |call| {
                matches!(
                    call,
                    Call::GemMmapOffset {
                        mode: MmapOffsetMode::Fixed,
                        ..
                    }
                )
            },
            libc::EINVAL,
        );
        let buffer = buffer(&device, DrmFormat::XRGB8888, BufferUsage::SW_READ_OFTEN, None);
        let handle = buffer.handles()[0];

        let _mapping = buffer.map(MapFlags::READ).unwrap();
        assert_eq!(
            mmap_offset_calls(&kernel),
            [
                Call::GemMmapOffset {
                    handle,
                    mode: MmapOffsetMode::Fixed,
                },
                Call::GemMmapOffset {
                    handle,
                    mode: MmapOffsetMode::Wb,
                },
            ],
        );
    }

    #[test]
    fn mmap_offset_failure() {
        let (kernel, device) = mock::gen12();
        kernel.fail(|call| matches!(call, Call::GemMmapOffset { .. }), libc::ENODEV);
        let buffer = buffer(&device, DrmFormat::XRGB8888, BufferUsage::SW_READ_OFTEN, None);

        let err = buffer.map(MapFlags::READ).unwrap_err();
        assert_eq!(err.errno(), libc::ENODEV);
        assert_eq!(mmap_offset_calls(&kernel).len(), 1);
        assert_eq!(kernel.live_mapping_count(), 0);
    }

    #[test]
    fn compressed_buffers_are_not_mappable() {
        let (kernel, device) = mock::gen12();
        let buffer = buffer(
            &device,
            DrmFormat::XRGB8888,
            BufferUsage::RENDERING,
            Some(vec![Modifier::YTiledGen12RcCcs]),
        );

        let err = buffer.map(MapFlags::READ).unwrap_err();
        assert!(err.is_validation_error());
        assert!(kernel.calls_matching(|call| matches!(call, Call::Mmap { .. })).is_empty());
    }

    fn legacy_device() -> (Arc<MockKernel>, Arc<Device>) {
        mock::device(
            MockConfig {
                has_llc: Some(0),
                mmap_gtt_version: Some(3),
                ..MockConfig::new(0x5912)
            },
            mock::device_config(),
        )
    }

    #[test]
    fn legacy_linear_mapping() {
        let (kernel, device) = legacy_device();
        let buffer = buffer(
            &device,
            DrmFormat::XRGB8888,
            BufferUsage::SCANOUT | BufferUsage::SW_WRITE_RARELY,
            None,
        );
        let handle = buffer.handles()[0];
        let size = buffer.metadata().total_size();

        let _mapping = buffer.map(MapFlags::WRITE).unwrap();
        assert_eq!(
            kernel.calls_matching(|call| matches!(call, Call::GemMmap { .. })),
            [Call::GemMmap {
                handle,
                size,
                flags: GemMmapFlags::WC,
            }],
        );
        assert!(kernel.calls_matching(|call| matches!(call, Call::Mmap { .. })).is_empty());
    }

    #[test]
    fn legacy_tiled_mapping_uses_gtt() {
        let (kernel, device) = legacy_device();
        let buffer = buffer(&device, DrmFormat::XRGB8888, BufferUsage::RENDERING, None);
        assert_ne!(buffer.metadata().tiling(), Tiling::None);
        let handle = buffer.handles()[0];

        let _mapping = buffer.map(MapFlags::READ).unwrap();
        assert_eq!(
            kernel.calls_matching(|call| matches!(call, Call::Mmap { .. })),
            [Call::Mmap {
                offset: u64::from(handle) << 32,
                len: buffer.metadata().total_size() as usize,
                access: MapFlags::READ,
            }],
        );
    }

    #[test]
    fn gtt_failure_falls_back_to_mmap_ioctl() {
        let (kernel, device) = legacy_device();
        kernel.fail(|call| matches!(call, Call::GemMmapGtt { .. }), libc::ENODEV);
        let buffer = buffer(&device, DrmFormat::XRGB8888, BufferUsage::RENDERING, None);

        let mapping = buffer.map(MapFlags::READ).unwrap();
        assert_eq!(
            kernel
                .calls_matching(|call| matches!(call, Call::GemMmap { .. }))
                .len(),
            1,
        );
        assert!(kernel.calls_matching(|call| matches!(call, Call::Mmap { .. })).is_empty());
        assert_eq!(mapping.len(), buffer.metadata().total_size() as usize);
    }

    #[test]
    fn invalidate_domains() {
        let (kernel, device) = mock::gen12();

        let linear = buffer(&device, DrmFormat::XRGB8888, BufferUsage::SW_READ_OFTEN, None);
        let mapping = linear.map(MapFlags::READ | MapFlags::WRITE).unwrap();
        mapping.invalidate().unwrap();

        let tiled = buffer(&device, DrmFormat::XRGB8888, BufferUsage::RENDERING, None);
        let tiled_mapping = tiled.map(MapFlags::READ).unwrap();
        tiled_mapping.invalidate().unwrap();

        assert_eq!(
            kernel.calls_matching(|call| matches!(call, Call::GemSetDomain { .. })),
            [
                Call::GemSetDomain {
                    handle: linear.handles()[0],
                    read_domains: GemDomains::CPU,
                    write_domain: GemDomains::CPU,
                },
                Call::GemSetDomain {
                    handle: tiled.handles()[0],
                    read_domains: GemDomains::GTT,
                    write_domain: GemDomains::empty(),
                },
            ],
        );
    }

    #[test]
    fn invalidate_is_a_no_op_on_dg2() {
        let (kernel, device) = mock::dg2();
        let buffer = buffer(&device, DrmFormat::XRGB8888, BufferUsage::SW_READ_OFTEN, None);

        buffer.map(MapFlags::READ).unwrap().invalidate().unwrap();
        assert!(kernel
            .calls_matching(|call| matches!(call, Call::GemSetDomain { .. }))
            .is_empty());
    }

    #[test]
    fn invalidate_failure() {
        let (kernel, device) = mock::gen12();
        kernel.fail(|call| matches!(call, Call::GemSetDomain { .. }), libc::EIO);
        let buffer = buffer(&device, DrmFormat::XRGB8888, BufferUsage::SW_READ_OFTEN, None);

        let mapping = buffer.map(MapFlags::READ).unwrap();
        assert_eq!(mapping.invalidate().unwrap_err().errno, libc::EIO);
    }

    #[test]
    fn flush_keeps_contents() {
        let (_, device) = legacy_device();
        let buffer = buffer(&device, DrmFormat::R8, BufferUsage::SW_WRITE_OFTEN, None);
        let mapping = buffer.map(MapFlags::WRITE).unwrap();
        let bytes = mapping.as_ptr().cast::<u8>();

        unsafe { bytes.as_ptr().write_bytes(0xa5, mapping.len()) };
        mapping.flush().unwrap();

        assert_eq!(unsafe { bytes.as_ptr().add(mapping.len() - 1).read() }, 0xa5);
    }

    #[test]
    fn every_mapping_is_unmapped() {
        let (kernel, device) = mock::gen12();
        let buffer = buffer(&device, DrmFormat::ABGR8888, BufferUsage::SW_READ_OFTEN, None);

        let first = buffer.map(MapFlags::READ).unwrap();
        let second = buffer.map(MapFlags::READ | MapFlags::WRITE).unwrap();
        assert_eq!(kernel.live_mapping_count(), 2);
        assert_ne!(first.as_ptr(), second.as_ptr());

        drop(first);
        drop(second);
        assert_eq!(kernel.live_mapping_count(), 0);
    }
}
