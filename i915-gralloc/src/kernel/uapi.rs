//! Structures and request codes of the DRM and i915 uAPI (`drm.h`, `i915_drm.h`, and the
//! prelim additions of `i915_drm_prelim.h`).

#![allow(dead_code, non_camel_case_types)]

use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

const DRM_IOCTL_BASE: u32 = b'd' as u32;
const DRM_COMMAND_BASE: u8 = 0x40;

const IOC_WRITE: u32 = 0x1;
const IOC_READ: u32 = 0x2;

const fn drm_ioc<T>(dir: u32, nr: u8) -> u32 {
    let size = size_of::<T>() as u32;
    (nr as u32) | (DRM_IOCTL_BASE << 8) | (size << 16) | (dir << 30)
}

const fn drm_iow<T>(nr: u8) -> u32 {
    drm_ioc::<T>(IOC_WRITE, nr)
}

const fn drm_iowr<T>(nr: u8) -> u32 {
    drm_ioc::<T>(IOC_READ | IOC_WRITE, nr)
}

pub(crate) const DRM_IOCTL_GEM_CLOSE: u32 = drm_iow::<drm_gem_close>(0x09);
pub(crate) const DRM_IOCTL_GET_CAP: u32 = drm_iowr::<drm_get_cap>(0x0c);
pub(crate) const DRM_IOCTL_PRIME_FD_TO_HANDLE: u32 = drm_iowr::<drm_prime_handle>(0x2e);

pub(crate) const DRM_IOCTL_I915_GETPARAM: u32 =
    drm_iowr::<drm_i915_getparam>(DRM_COMMAND_BASE + 0x06);
pub(crate) const DRM_IOCTL_I915_GEM_CREATE: u32 =
    drm_iowr::<drm_i915_gem_create>(DRM_COMMAND_BASE + 0x1b);
pub(crate) const DRM_IOCTL_I915_GEM_MMAP: u32 =
    drm_iowr::<drm_i915_gem_mmap>(DRM_COMMAND_BASE + 0x1e);
pub(crate) const DRM_IOCTL_I915_GEM_SET_DOMAIN: u32 =
    drm_iow::<drm_i915_gem_set_domain>(DRM_COMMAND_BASE + 0x1f);
pub(crate) const DRM_IOCTL_I915_GEM_SET_TILING: u32 =
    drm_iowr::<drm_i915_gem_set_tiling>(DRM_COMMAND_BASE + 0x21);
pub(crate) const DRM_IOCTL_I915_GEM_GET_TILING: u32 =
    drm_iowr::<drm_i915_gem_get_tiling>(DRM_COMMAND_BASE + 0x22);
pub(crate) const DRM_IOCTL_I915_GEM_MMAP_GTT: u32 =
    drm_iowr::<drm_i915_gem_mmap_gtt>(DRM_COMMAND_BASE + 0x24);
pub(crate) const DRM_IOCTL_I915_GEM_MMAP_OFFSET: u32 =
    drm_iowr::<drm_i915_gem_mmap_offset>(DRM_COMMAND_BASE + 0x24);
pub(crate) const DRM_IOCTL_I915_QUERY: u32 = drm_iowr::<drm_i915_query>(DRM_COMMAND_BASE + 0x39);
pub(crate) const DRM_IOCTL_I915_GEM_CREATE_EXT: u32 =
    drm_iowr::<drm_i915_gem_create_ext>(DRM_COMMAND_BASE + 0x3c);
pub(crate) const PRELIM_DRM_IOCTL_I915_GEM_CREATE_EXT: u32 =
    drm_iowr::<prelim_drm_i915_gem_create_ext>(DRM_COMMAND_BASE + 0x5c);

pub(crate) const DRM_I915_QUERY_MEMORY_REGIONS: u64 = 4;
const PRELIM_I915_QUERY: u64 = 1 << 16;
pub(crate) const PRELIM_DRM_I915_QUERY_MEMORY_REGIONS: u64 = PRELIM_I915_QUERY | 4;

pub(crate) const I915_GEM_CREATE_EXT_MEMORY_REGIONS: u32 = 0;

const PRELIM_I915_USER_EXT: u32 = 1 << 16;
pub(crate) const PRELIM_I915_GEM_CREATE_EXT_SETPARAM: u32 = PRELIM_I915_USER_EXT | 1;

pub(crate) const PRELIM_I915_OBJECT_PARAM: u64 = 1 << 48;
pub(crate) const PRELIM_I915_PARAM_MEMORY_REGIONS: u64 = (1 << 16) | 0x1;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_gem_close {
    pub(crate) handle: u32,
    pub(crate) pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_get_cap {
    pub(crate) capability: u64,
    pub(crate) value: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_prime_handle {
    pub(crate) handle: u32,
    pub(crate) flags: u32,
    pub(crate) fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_i915_getparam {
    pub(crate) param: i32,
    pub(crate) pad: u32,
    /// Pointer to an `i32` that receives the value.
    pub(crate) value: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_i915_gem_create {
    pub(crate) size: u64,
    pub(crate) handle: u32,
    pub(crate) pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_i915_gem_create_ext {
    pub(crate) size: u64,
    pub(crate) handle: u32,
    pub(crate) flags: u32,
    pub(crate) extensions: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct i915_user_extension {
    pub(crate) next_extension: u64,
    pub(crate) name: u32,
    pub(crate) flags: u32,
    pub(crate) rsvd: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_i915_gem_memory_class_instance {
    pub(crate) memory_class: u16,
    pub(crate) memory_instance: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_i915_gem_create_ext_memory_regions {
    pub(crate) base: i915_user_extension,
    pub(crate) pad: u32,
    pub(crate) num_regions: u32,
    /// Pointer to an array of `drm_i915_gem_memory_class_instance`.
    pub(crate) regions: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct prelim_drm_i915_gem_object_param {
    pub(crate) handle: u32,
    pub(crate) size: u32,
    pub(crate) param: u64,
    pub(crate) data: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct prelim_drm_i915_gem_create_ext_setparam {
    pub(crate) base: i915_user_extension,
    pub(crate) param: prelim_drm_i915_gem_object_param,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct prelim_drm_i915_gem_create_ext {
    pub(crate) size: u64,
    pub(crate) handle: u32,
    pub(crate) pad: u32,
    pub(crate) extensions: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_i915_gem_mmap {
    pub(crate) handle: u32,
    pub(crate) pad: u32,
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) addr_ptr: u64,
    pub(crate) flags: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_i915_gem_mmap_gtt {
    pub(crate) handle: u32,
    pub(crate) pad: u32,
    pub(crate) offset: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_i915_gem_mmap_offset {
    pub(crate) handle: u32,
    pub(crate) pad: u32,
    pub(crate) offset: u64,
    pub(crate) flags: u64,
    pub(crate) extensions: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_i915_gem_set_domain {
    pub(crate) handle: u32,
    pub(crate) read_domains: u32,
    pub(crate) write_domain: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_i915_gem_set_tiling {
    pub(crate) handle: u32,
    pub(crate) tiling_mode: u32,
    pub(crate) stride: u32,
    pub(crate) swizzle_mode: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_i915_gem_get_tiling {
    pub(crate) handle: u32,
    pub(crate) tiling_mode: u32,
    pub(crate) swizzle_mode: u32,
    pub(crate) phys_swizzle_mode: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_i915_query {
    pub(crate) num_items: u32,
    pub(crate) flags: u32,
    /// Pointer to an array of `drm_i915_query_item`.
    pub(crate) items_ptr: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_i915_query_item {
    pub(crate) query_id: u64,
    /// Set to 0 to ask the kernel for the size of the data. Negative on error.
    pub(crate) length: i32,
    pub(crate) flags: u32,
    pub(crate) data_ptr: u64,
}

/// Header of the memory regions query data, followed by `num_regions`
/// `drm_i915_memory_region_info`.
///
/// The prelim query uses the same layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_i915_query_memory_regions {
    pub(crate) num_regions: u32,
    pub(crate) rsvd: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub(crate) struct drm_i915_memory_region_info {
    pub(crate) region: drm_i915_gem_memory_class_instance,
    pub(crate) rsvd0: u32,
    pub(crate) probed_size: u64,
    pub(crate) unallocated_size: u64,
    pub(crate) rsvd1: [u64; 8],
}
