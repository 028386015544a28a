use super::{
    uapi::*,
    CreateExtFlags, DrmCap, GemDomains, GemMmapFlags, KernelAbi, KernelDevice, MmapOffsetMode,
    Param,
};
use crate::{
    memory::{MemoryClassInstance, MemoryRegion},
    modifier::Tiling,
    usage::MapFlags,
    DeviceSize, KernelError,
};
use bytemuck::Pod;
use std::{
    ffi::c_void,
    fs::{File, OpenOptions},
    io,
    mem::size_of,
    os::fd::{AsRawFd, BorrowedFd, OwnedFd},
    path::Path,
    ptr::{self, NonNull},
};

/// An open DRM device node of an i915 GPU.
#[derive(Debug)]
pub struct DrmFile {
    fd: OwnedFd,
}

impl DrmFile {
    /// Opens the device node at `path`, usually a render node such as `/dev/dri/renderD128`.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        // The standard library always opens files with `O_CLOEXEC`.
        let file: File = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(DrmFile { fd: file.into() })
    }

    /// Wraps a device node that is already open.
    #[inline]
    pub fn from_fd(fd: OwnedFd) -> Self {
        DrmFile { fd }
    }

    /// Issues an ioctl, restarting it when it is interrupted.
    ///
    /// # Safety
    ///
    /// - `arg` must be the argument structure of `request`.
    /// - Every pointer embedded in `arg` must be valid for the kernel to access as `request`
    ///   specifies.
    unsafe fn ioctl<T: Pod>(
        &self,
        request: u32,
        name: &'static str,
        arg: &mut T,
    ) -> Result<(), KernelError> {
        loop {
            let ret = unsafe {
                libc::ioctl(self.fd.as_raw_fd(), request as _, ptr::from_mut(arg))
            };

            if ret == 0 {
                return Ok(());
            }

            let err = KernelError::last_os_error(name);

            if err.errno != libc::EINTR && err.errno != libc::EAGAIN {
                return Err(err);
            }
        }
    }

    fn query_item(&self, query_id: u64) -> Result<Vec<u8>, KernelError> {
        const NAME: &str = "DRM_IOCTL_I915_QUERY";

        let mut item = drm_i915_query_item {
            query_id,
            ..Default::default()
        };
        let mut query = drm_i915_query {
            num_items: 1,
            items_ptr: ptr::from_mut(&mut item) as u64,
            ..Default::default()
        };

        // The first call only reports the length of the data.
        unsafe { self.ioctl(DRM_IOCTL_I915_QUERY, NAME, &mut query) }?;

        let len = usize::try_from(item.length)
            .ok()
            .filter(|&len| len > 0)
            .ok_or_else(|| KernelError::new(NAME, query_item_errno(item.length)))?;
        let mut data = vec![0u8; len];
        item.data_ptr = data.as_mut_ptr() as u64;
        query.items_ptr = ptr::from_mut(&mut item) as u64;

        unsafe { self.ioctl(DRM_IOCTL_I915_QUERY, NAME, &mut query) }?;

        if item.length <= 0 {
            return Err(KernelError::new(NAME, query_item_errno(item.length)));
        }

        data.truncate(item.length as usize);

        Ok(data)
    }
}

fn query_item_errno(length: i32) -> i32 {
    if length < 0 {
        -length
    } else {
        libc::EINVAL
    }
}

/// Parses the data of a memory regions query.
pub(crate) fn parse_memory_regions(data: &[u8]) -> Vec<MemoryRegion> {
    const HEADER: usize = size_of::<drm_i915_query_memory_regions>();
    const INFO: usize = size_of::<drm_i915_memory_region_info>();

    let Some(header) = data.get(..HEADER) else {
        return Vec::new();
    };
    let header: drm_i915_query_memory_regions = bytemuck::pod_read_unaligned(header);

    data[HEADER..]
        .chunks_exact(INFO)
        .take(header.num_regions as usize)
        .map(|chunk| {
            let info: drm_i915_memory_region_info = bytemuck::pod_read_unaligned(chunk);

            MemoryRegion {
                region: MemoryClassInstance {
                    class: info.region.memory_class,
                    instance: info.region.memory_instance,
                },
                probed_size: info.probed_size,
            }
        })
        .collect()
}

fn to_uapi_regions(regions: &[MemoryClassInstance]) -> Vec<drm_i915_gem_memory_class_instance> {
    regions
        .iter()
        .map(|region| drm_i915_gem_memory_class_instance {
            memory_class: region.class,
            memory_instance: region.instance,
        })
        .collect()
}

impl KernelDevice for DrmFile {
    fn get_param(&self, param: Param) -> Result<i32, KernelError> {
        // No parameter uses the sign bit.
        let mut value: i32 = -1;
        let mut arg = drm_i915_getparam {
            param: param.raw(),
            value: ptr::from_mut(&mut value) as u64,
            ..Default::default()
        };

        unsafe { self.ioctl(DRM_IOCTL_I915_GETPARAM, "DRM_IOCTL_I915_GETPARAM", &mut arg) }?;

        Ok(value)
    }

    fn query_memory_regions(&self, abi: KernelAbi) -> Result<Vec<MemoryRegion>, KernelError> {
        let query_id = match abi {
            KernelAbi::Prelim => PRELIM_DRM_I915_QUERY_MEMORY_REGIONS,
            KernelAbi::Upstream => DRM_I915_QUERY_MEMORY_REGIONS,
        };

        self.query_item(query_id)
            .map(|data| parse_memory_regions(&data))
    }

    fn get_cap(&self, cap: DrmCap) -> Result<u64, KernelError> {
        let mut arg = drm_get_cap {
            capability: cap.raw(),
            value: 0,
        };

        unsafe { self.ioctl(DRM_IOCTL_GET_CAP, "DRM_IOCTL_GET_CAP", &mut arg) }?;

        Ok(arg.value)
    }

    fn gem_create(&self, size: DeviceSize) -> Result<u32, KernelError> {
        let mut arg = drm_i915_gem_create {
            size,
            ..Default::default()
        };

        unsafe { self.ioctl(DRM_IOCTL_I915_GEM_CREATE, "DRM_IOCTL_I915_GEM_CREATE", &mut arg) }?;

        Ok(arg.handle)
    }

    fn gem_create_ext(
        &self,
        size: DeviceSize,
        regions: &[MemoryClassInstance],
        flags: CreateExtFlags,
    ) -> Result<u32, KernelError> {
        let mut regions = to_uapi_regions(regions);
        let mut ext_regions = drm_i915_gem_create_ext_memory_regions {
            base: i915_user_extension {
                name: I915_GEM_CREATE_EXT_MEMORY_REGIONS,
                ..Default::default()
            },
            num_regions: regions.len() as u32,
            regions: regions.as_mut_ptr() as u64,
            ..Default::default()
        };
        let mut arg = drm_i915_gem_create_ext {
            size,
            flags: flags.bits(),
            extensions: ptr::from_mut(&mut ext_regions) as u64,
            ..Default::default()
        };

        unsafe {
            self.ioctl(
                DRM_IOCTL_I915_GEM_CREATE_EXT,
                "DRM_IOCTL_I915_GEM_CREATE_EXT",
                &mut arg,
            )
        }?;

        Ok(arg.handle)
    }

    fn prelim_gem_create_ext(
        &self,
        size: DeviceSize,
        regions: &[MemoryClassInstance],
    ) -> Result<u32, KernelError> {
        let mut regions = to_uapi_regions(regions);
        let mut setparam = prelim_drm_i915_gem_create_ext_setparam {
            base: i915_user_extension {
                name: PRELIM_I915_GEM_CREATE_EXT_SETPARAM,
                ..Default::default()
            },
            param: prelim_drm_i915_gem_object_param {
                size: regions.len() as u32,
                param: PRELIM_I915_OBJECT_PARAM | PRELIM_I915_PARAM_MEMORY_REGIONS,
                data: regions.as_mut_ptr() as u64,
                ..Default::default()
            },
        };
        let mut arg = prelim_drm_i915_gem_create_ext {
            size,
            extensions: ptr::from_mut(&mut setparam) as u64,
            ..Default::default()
        };

        unsafe {
            self.ioctl(
                PRELIM_DRM_IOCTL_I915_GEM_CREATE_EXT,
                "PRELIM_DRM_IOCTL_I915_GEM_CREATE_EXT",
                &mut arg,
            )
        }?;

        Ok(arg.handle)
    }

    fn set_tiling(&self, handle: u32, tiling: Tiling, stride: u32) -> Result<(), KernelError> {
        let mut arg = drm_i915_gem_set_tiling {
            handle,
            tiling_mode: tiling.raw(),
            stride,
            ..Default::default()
        };

        unsafe {
            self.ioctl(
                DRM_IOCTL_I915_GEM_SET_TILING,
                "DRM_IOCTL_I915_GEM_SET_TILING",
                &mut arg,
            )
        }
    }

    fn get_tiling(&self, handle: u32) -> Result<u32, KernelError> {
        let mut arg = drm_i915_gem_get_tiling {
            handle,
            ..Default::default()
        };

        unsafe {
            self.ioctl(
                DRM_IOCTL_I915_GEM_GET_TILING,
                "DRM_IOCTL_I915_GEM_GET_TILING",
                &mut arg,
            )
        }?;

        Ok(arg.tiling_mode)
    }

    fn gem_mmap(
        &self,
        handle: u32,
        size: DeviceSize,
        flags: GemMmapFlags,
    ) -> Result<NonNull<c_void>, KernelError> {
        const NAME: &str = "DRM_IOCTL_I915_GEM_MMAP";

        let mut arg = drm_i915_gem_mmap {
            handle,
            offset: 0,
            size,
            flags: flags.bits(),
            ..Default::default()
        };

        unsafe { self.ioctl(DRM_IOCTL_I915_GEM_MMAP, NAME, &mut arg) }?;

        NonNull::new(arg.addr_ptr as *mut c_void).ok_or(KernelError::new(NAME, libc::EFAULT))
    }

    fn gem_mmap_gtt(&self, handle: u32) -> Result<u64, KernelError> {
        let mut arg = drm_i915_gem_mmap_gtt {
            handle,
            ..Default::default()
        };

        unsafe {
            self.ioctl(
                DRM_IOCTL_I915_GEM_MMAP_GTT,
                "DRM_IOCTL_I915_GEM_MMAP_GTT",
                &mut arg,
            )
        }?;

        Ok(arg.offset)
    }

    fn gem_mmap_offset(&self, handle: u32, mode: MmapOffsetMode) -> Result<u64, KernelError> {
        let mut arg = drm_i915_gem_mmap_offset {
            handle,
            flags: mode.raw(),
            ..Default::default()
        };

        unsafe {
            self.ioctl(
                DRM_IOCTL_I915_GEM_MMAP_OFFSET,
                "DRM_IOCTL_I915_GEM_MMAP_OFFSET",
                &mut arg,
            )
        }?;

        Ok(arg.offset)
    }

    fn gem_set_domain(
        &self,
        handle: u32,
        read_domains: GemDomains,
        write_domain: GemDomains,
    ) -> Result<(), KernelError> {
        let mut arg = drm_i915_gem_set_domain {
            handle,
            read_domains: read_domains.bits(),
            write_domain: write_domain.bits(),
        };

        unsafe {
            self.ioctl(
                DRM_IOCTL_I915_GEM_SET_DOMAIN,
                "DRM_IOCTL_I915_GEM_SET_DOMAIN",
                &mut arg,
            )
        }
    }

    fn gem_close(&self, handle: u32) -> Result<(), KernelError> {
        let mut arg = drm_gem_close { handle, pad: 0 };

        unsafe { self.ioctl(DRM_IOCTL_GEM_CLOSE, "DRM_IOCTL_GEM_CLOSE", &mut arg) }
    }

    fn prime_fd_to_handle(&self, fd: BorrowedFd<'_>) -> Result<u32, KernelError> {
        let mut arg = drm_prime_handle {
            fd: fd.as_raw_fd(),
            ..Default::default()
        };

        unsafe {
            self.ioctl(
                DRM_IOCTL_PRIME_FD_TO_HANDLE,
                "DRM_IOCTL_PRIME_FD_TO_HANDLE",
                &mut arg,
            )
        }?;

        Ok(arg.handle)
    }

    fn dmabuf_size(&self, fd: BorrowedFd<'_>) -> Result<DeviceSize, KernelError> {
        let end = unsafe { libc::lseek(fd.as_raw_fd(), 0, libc::SEEK_END) };

        if end < 0 {
            return Err(KernelError::last_os_error("lseek"));
        }

        if unsafe { libc::lseek(fd.as_raw_fd(), 0, libc::SEEK_SET) } < 0 {
            return Err(KernelError::last_os_error("lseek"));
        }

        Ok(end as DeviceSize)
    }

    fn mmap(
        &self,
        offset: u64,
        len: usize,
        access: MapFlags,
    ) -> Result<NonNull<c_void>, KernelError> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                access.to_prot(),
                libc::MAP_SHARED,
                self.fd.as_raw_fd(),
                offset as libc::off_t,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(KernelError::last_os_error("mmap"));
        }

        NonNull::new(ptr).ok_or(KernelError::new("mmap", libc::EFAULT))
    }

    unsafe fn munmap(&self, ptr: NonNull<c_void>, len: usize) -> Result<(), KernelError> {
        if unsafe { libc::munmap(ptr.as_ptr(), len) } != 0 {
            return Err(KernelError::last_os_error("munmap"));
        }

        Ok(())
    }
}
