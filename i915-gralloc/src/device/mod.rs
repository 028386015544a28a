//! The probed description of an i915 GPU.
//!
//! A [`Device`] is created once per device node by probing the kernel driver: the generation of
//! the GPU, whether it shares the last-level cache with the CPU, its memory regions, the flavor
//! of the kernel uAPI, and the cursor size the display supports. From this, the tiling modifiers
//! that the generation supports and the table of supported (format, usage) combinations are
//! derived.
//!
//! Nothing in a `Device` changes after it has been created, so it can be shared by all the
//! threads that allocate buffers.
//!
//! # Examples
//!
//! ```no_run
//! use i915_gralloc::{kernel::DrmFile, Device, DeviceConfig};
//! use std::sync::Arc;
//!
//! let kernel = Arc::new(DrmFile::open("/dev/dri/renderD128").unwrap());
//! let device = Device::new(kernel, DeviceConfig::default()).unwrap();
//!
//! println!("graphics version {}", device.graphics_version());
//! ```

pub use self::info::GpuInfo;
use crate::{
    combination::{self, Combinations},
    config::{self, DeviceConfig},
    kernel::{DrmCap, KernelAbi, KernelDevice, Param},
    memory::{MemoryClass, MemoryClassInstance, MemoryRegion},
    modifier::ModifierOrder,
    DeviceSize, KernelError, Validated, ValidationError,
};
use log::{error, info, trace};
use std::sync::Arc;

mod info;

const DEFAULT_CURSOR_WIDTH: u64 = 64;
const DEFAULT_CURSOR_HEIGHT: u64 = 64;

/// A probed i915 GPU.
#[derive(Debug)]
pub struct Device {
    kernel: Arc<dyn KernelDevice>,
    device_id: u16,
    info: GpuInfo,

    has_llc: bool,
    has_mmap_offset: bool,
    has_hw_protection: bool,
    force_mem_local: bool,

    kernel_abi: KernelAbi,
    sys: MemoryRegion,
    vram: Option<MemoryRegion>,

    cursor_width: u64,
    cursor_height: u64,
    page_size: DeviceSize,

    compression: bool,
    linear_align_256: bool,

    modifier_order: ModifierOrder,
    combinations: Combinations,
}

impl Device {
    /// Probes the GPU behind `kernel`.
    ///
    /// The chipset id, the LLC flag and the mmap GTT version are mandatory; if any of them can't
    /// be read, or the chipset id is unknown, a validation error is returned. Missing memory
    /// region information is not an error: the device is then treated as having system memory
    /// only.
    pub fn new(
        kernel: Arc<dyn KernelDevice>,
        config: DeviceConfig,
    ) -> Result<Arc<Device>, Validated<KernelError>> {
        let device_id = mandatory_param(&*kernel, Param::ChipsetId, "I915_PARAM_CHIPSET_ID")?;
        let info = u16::try_from(device_id)
            .ok()
            .and_then(|device_id| GpuInfo::from_device_id(device_id).map(|info| (device_id, info)));
        let Some((device_id, info)) = info else {
            error!("failed to get device info for chipset id {:#06x}", device_id);

            return Err(ValidationError::new(
                "device_id",
                format!("{:#06x} is not a known i915 device", device_id),
            )
            .into());
        };

        let has_llc = mandatory_param(&*kernel, Param::HasLlc, "I915_PARAM_HAS_LLC")? > 0;
        let has_mmap_offset =
            mandatory_param(&*kernel, Param::MmapGttVersion, "I915_PARAM_MMAP_GTT_VERSION")? >= 4;

        let (kernel_abi, regions) = query_memory_regions(&*kernel);
        let (sys, vram) = classify_regions(&regions);

        let force_mem_local = vram.is_some() && config::force_mem_local(&*config.properties);

        if force_mem_local {
            info!("forcing allocations to local memory");
        }

        let has_hw_protection = info.graphics_version >= 12;
        let (cursor_width, cursor_height) = cursor_extent(&*kernel);
        let modifier_order = ModifierOrder::for_generation(info.graphics_version, info.gen_x10());

        let mut combinations = Combinations::new();
        combination::register_i915(&mut combinations, &info, has_hw_protection, &config);
        trace!("registered {} combinations", combinations.len());

        Ok(Arc::new(Device {
            kernel,
            device_id,
            info,
            has_llc,
            has_mmap_offset,
            has_hw_protection,
            force_mem_local,
            kernel_abi,
            sys,
            vram,
            cursor_width,
            cursor_height,
            page_size: system_page_size(),
            compression: config.compression,
            linear_align_256: config.linear_align_256,
            modifier_order,
            combinations,
        }))
    }

    /// Returns the channel to the kernel driver.
    #[inline]
    pub fn kernel(&self) -> &Arc<dyn KernelDevice> {
        &self.kernel
    }

    /// Returns the PCI device id.
    #[inline]
    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    #[inline]
    pub fn info(&self) -> &GpuInfo {
        &self.info
    }

    #[inline]
    pub fn graphics_version(&self) -> u32 {
        self.info.graphics_version
    }

    #[inline]
    pub fn sub_version(&self) -> u32 {
        self.info.sub_version
    }

    /// Returns `graphics_version * 10 + sub_version`.
    #[inline]
    pub fn gen_x10(&self) -> u32 {
        self.info.gen_x10()
    }

    #[inline]
    pub fn is_xelpd(&self) -> bool {
        self.info.is_xelpd
    }

    /// Returns whether the generation supports 4-tiling.
    #[inline]
    pub fn has_tile4(&self) -> bool {
        self.gen_x10() >= 125
    }

    /// Returns whether buffer objects have a fence register, and thus a kernel tiling mode.
    ///
    /// Xe-HPG and Xe-LPG have no fences; their tiling can't be set or queried.
    #[inline]
    pub fn has_tiling_fence(&self) -> bool {
        self.gen_x10() != 125 && self.graphics_version() != 14
    }

    /// Returns whether the GPU shares the last-level cache with the CPU.
    #[inline]
    pub fn has_llc(&self) -> bool {
        self.has_llc
    }

    /// Returns whether the kernel supports `DRM_IOCTL_I915_GEM_MMAP_OFFSET`.
    #[inline]
    pub fn has_mmap_offset(&self) -> bool {
        self.has_mmap_offset
    }

    /// Returns whether the GPU has device-local memory.
    #[inline]
    pub fn has_local_mem(&self) -> bool {
        self.vram.is_some()
    }

    #[inline]
    pub fn has_hw_protection(&self) -> bool {
        self.has_hw_protection
    }

    /// Returns whether the `sys.icr.gralloc.force_mem` property asks for buffers to be placed
    /// in local memory.
    #[inline]
    pub fn force_mem_local(&self) -> bool {
        self.force_mem_local
    }

    #[inline]
    pub fn kernel_abi(&self) -> KernelAbi {
        self.kernel_abi
    }

    /// Returns the system memory region.
    #[inline]
    pub fn sys(&self) -> &MemoryRegion {
        &self.sys
    }

    /// Returns the device-local memory region, if there is one.
    #[inline]
    pub fn vram(&self) -> Option<&MemoryRegion> {
        self.vram.as_ref()
    }

    /// Returns the largest cursor the display supports, as `[width, height]`.
    #[inline]
    pub fn cursor_extent(&self) -> [u64; 2] {
        [self.cursor_width, self.cursor_height]
    }

    #[inline]
    pub fn page_size(&self) -> DeviceSize {
        self.page_size
    }

    /// Returns whether the host allows compressed buffers.
    #[inline]
    pub fn compression(&self) -> bool {
        self.compression
    }

    #[inline]
    pub fn linear_align_256(&self) -> bool {
        self.linear_align_256
    }

    /// Returns the modifiers that the generation supports, most preferred first.
    #[inline]
    pub fn modifier_order(&self) -> &ModifierOrder {
        &self.modifier_order
    }

    /// Returns the supported (format, usage) combinations.
    #[inline]
    pub fn combinations(&self) -> &Combinations {
        &self.combinations
    }
}

fn mandatory_param(
    kernel: &dyn KernelDevice,
    param: Param,
    name: &'static str,
) -> Result<i32, Box<ValidationError>> {
    kernel.get_param(param).map_err(|err| {
        error!("failed to get {}: {}", name, err);

        ValidationError::new(name, "could not be queried from the kernel")
    })
}

/// Reads the memory regions, preferring the prelim schema.
fn query_memory_regions(kernel: &dyn KernelDevice) -> (KernelAbi, Vec<MemoryRegion>) {
    match kernel.query_memory_regions(KernelAbi::Prelim) {
        Ok(regions) if !regions.is_empty() => {
            info!("kernel supports prelim");

            return (KernelAbi::Prelim, regions);
        }
        Ok(_) => {}
        Err(err) => error!("failed to query prelim memory regions: {}", err),
    }

    let regions = kernel
        .query_memory_regions(KernelAbi::Upstream)
        .unwrap_or_else(|err| {
            error!("failed to query memory regions: {}", err);

            Vec::new()
        });

    (KernelAbi::Upstream, regions)
}

fn classify_regions(regions: &[MemoryRegion]) -> (MemoryRegion, Option<MemoryRegion>) {
    let mut sys = MemoryRegion {
        region: MemoryClassInstance {
            class: MemoryClass::System.raw(),
            instance: 0,
        },
        probed_size: 0,
    };
    let mut vram = None;

    for region in regions {
        match region.memory_class() {
            Some(MemoryClass::System) => sys = *region,
            Some(MemoryClass::Device) => vram = Some(*region).filter(|vram| vram.probed_size > 0),
            None => {}
        }
    }

    (sys, vram)
}

fn cursor_extent(kernel: &dyn KernelDevice) -> (u64, u64) {
    let mut width = 0;
    let mut height = 0;

    match kernel.get_cap(DrmCap::CursorWidth) {
        Ok(value) => {
            width = value;

            match kernel.get_cap(DrmCap::CursorHeight) {
                Ok(value) => height = value,
                Err(_) => info!("cannot get cursor height"),
            }
        }
        Err(_) => info!("cannot get cursor width"),
    }

    if width == 0 {
        width = DEFAULT_CURSOR_WIDTH;
    }

    if height == 0 {
        height = DEFAULT_CURSOR_HEIGHT;
    }

    (width, height)
}

fn system_page_size() -> DeviceSize {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    DeviceSize::try_from(page_size)
        .ok()
        .filter(|page_size| page_size.is_power_of_two())
        .unwrap_or(4096)
}
