//! Communication with the kernel graphics driver.
//!
//! Every transaction the backend issues goes through the [`KernelDevice`] trait. The methods
//! take and return plain Rust values; encoding them into the i915 uAPI structures is the job of
//! the implementation. [`DrmFile`] is the implementation over an open DRM device node.
//!
//! Errors carry the errno the kernel reported, so that the host sees exactly what the kernel
//! said.

pub use self::drm::DrmFile;
use crate::{
    macros::{drm_bitflags, drm_enum},
    memory::{MemoryClassInstance, MemoryRegion},
    modifier::Tiling,
    usage::MapFlags,
    DeviceSize, KernelError,
};
use std::{ffi::c_void, fmt::Debug, os::fd::BorrowedFd, ptr::NonNull};

mod drm;
#[cfg(test)]
pub(crate) mod mock;
pub(crate) mod uapi;

/// The channel to the kernel graphics driver.
///
/// Implementations must be usable from several threads at once. The kernel serializes
/// transactions on the same buffer object.
pub trait KernelDevice: Debug + Send + Sync {
    /// `DRM_IOCTL_I915_GETPARAM`
    fn get_param(&self, param: Param) -> Result<i32, KernelError>;

    /// `DRM_IOCTL_I915_QUERY` for the memory regions, in the schema of `abi`.
    fn query_memory_regions(&self, abi: KernelAbi) -> Result<Vec<MemoryRegion>, KernelError>;

    /// `DRM_IOCTL_GET_CAP`
    fn get_cap(&self, cap: DrmCap) -> Result<u64, KernelError>;

    /// `DRM_IOCTL_I915_GEM_CREATE`, returning the new handle.
    fn gem_create(&self, size: DeviceSize) -> Result<u32, KernelError>;

    /// `DRM_IOCTL_I915_GEM_CREATE_EXT` with a memory regions extension, returning the new
    /// handle.
    fn gem_create_ext(
        &self,
        size: DeviceSize,
        regions: &[MemoryClassInstance],
        flags: CreateExtFlags,
    ) -> Result<u32, KernelError>;

    /// `PRELIM_DRM_IOCTL_I915_GEM_CREATE_EXT` with a memory regions set-param extension,
    /// returning the new handle.
    fn prelim_gem_create_ext(
        &self,
        size: DeviceSize,
        regions: &[MemoryClassInstance],
    ) -> Result<u32, KernelError>;

    /// `DRM_IOCTL_I915_GEM_SET_TILING`
    fn set_tiling(&self, handle: u32, tiling: Tiling, stride: u32) -> Result<(), KernelError>;

    /// `DRM_IOCTL_I915_GEM_GET_TILING`, returning the raw tiling mode.
    fn get_tiling(&self, handle: u32) -> Result<u32, KernelError>;

    /// `DRM_IOCTL_I915_GEM_MMAP`. The kernel maps the object itself and returns the address.
    fn gem_mmap(
        &self,
        handle: u32,
        size: DeviceSize,
        flags: GemMmapFlags,
    ) -> Result<NonNull<c_void>, KernelError>;

    /// `DRM_IOCTL_I915_GEM_MMAP_GTT`, returning the fake offset to pass to [`mmap`].
    ///
    /// [`mmap`]: KernelDevice::mmap
    fn gem_mmap_gtt(&self, handle: u32) -> Result<u64, KernelError>;

    /// `DRM_IOCTL_I915_GEM_MMAP_OFFSET`, returning the fake offset to pass to [`mmap`].
    ///
    /// [`mmap`]: KernelDevice::mmap
    fn gem_mmap_offset(&self, handle: u32, mode: MmapOffsetMode) -> Result<u64, KernelError>;

    /// `DRM_IOCTL_I915_GEM_SET_DOMAIN`
    fn gem_set_domain(
        &self,
        handle: u32,
        read_domains: GemDomains,
        write_domain: GemDomains,
    ) -> Result<(), KernelError>;

    /// `DRM_IOCTL_GEM_CLOSE`
    fn gem_close(&self, handle: u32) -> Result<(), KernelError>;

    /// `DRM_IOCTL_PRIME_FD_TO_HANDLE`, returning the handle of the imported dma-buf.
    fn prime_fd_to_handle(&self, fd: BorrowedFd<'_>) -> Result<u32, KernelError>;

    /// Returns the size of the dma-buf `fd`.
    fn dmabuf_size(&self, fd: BorrowedFd<'_>) -> Result<DeviceSize, KernelError>;

    /// Maps `len` bytes of the device at the fake `offset`, shared.
    fn mmap(
        &self,
        offset: u64,
        len: usize,
        access: MapFlags,
    ) -> Result<NonNull<c_void>, KernelError>;

    /// Unmaps a range returned by [`mmap`] or [`gem_mmap`].
    ///
    /// # Safety
    ///
    /// - `ptr` and `len` must describe a whole mapping returned by this device.
    /// - Nothing may access the range afterwards.
    ///
    /// [`mmap`]: KernelDevice::mmap
    /// [`gem_mmap`]: KernelDevice::gem_mmap
    unsafe fn munmap(&self, ptr: NonNull<c_void>, len: usize) -> Result<(), KernelError>;
}

/// The flavor of the kernel uAPI for memory regions and extended object creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelAbi {
    /// The vendor-maintained ABI that preceded the upstream one.
    Prelim,

    /// The upstream ABI.
    Upstream,
}

drm_enum! {
    /// A parameter that can be read with `DRM_IOCTL_I915_GETPARAM`.
    Param = i32;

    /// `I915_PARAM_CHIPSET_ID`
    ChipsetId = 4,

    /// `I915_PARAM_HAS_LLC`
    HasLlc = 17,

    /// `I915_PARAM_MMAP_GTT_VERSION`
    MmapGttVersion = 40,
}

drm_enum! {
    /// A capability that can be read with `DRM_IOCTL_GET_CAP`.
    DrmCap = u64;

    /// `DRM_CAP_CURSOR_WIDTH`
    CursorWidth = 8,

    /// `DRM_CAP_CURSOR_HEIGHT`
    CursorHeight = 9,
}

drm_enum! {
    /// The caching mode of a mapping obtained through `DRM_IOCTL_I915_GEM_MMAP_OFFSET`.
    MmapOffsetMode = u64;

    Gtt = 0,

    /// Write-combined.
    Wc = 1,

    /// Write-back.
    Wb = 2,

    /// Uncached.
    Uc = 3,

    /// The mode is fixed by the kernel depending on the placement of the object. The only mode
    /// that discrete GPUs accept.
    Fixed = 4,
}

drm_bitflags! {
    /// Flags for `DRM_IOCTL_I915_GEM_CREATE_EXT`.
    CreateExtFlags = u32;

    /// The object must stay CPU-accessible when it is placed in device-local memory.
    NEEDS_CPU_ACCESS = 1 << 0,
}

drm_bitflags! {
    /// Flags for `DRM_IOCTL_I915_GEM_MMAP`.
    GemMmapFlags = u64;

    /// Map the object write-combined.
    WC = 1 << 0,
}

drm_bitflags! {
    /// Cache domains of a buffer object.
    GemDomains = u32;

    CPU = 0x01,
    GTT = 0x40,
}
