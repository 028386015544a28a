//! An in-memory kernel for tests.

use super::{
    CreateExtFlags, DrmCap, GemDomains, GemMmapFlags, KernelAbi, KernelDevice, MmapOffsetMode,
    Param,
};
use crate::{
    config::{DeviceConfig, StaticProperties, FORCE_MEM_PROPERTY},
    device::Device,
    memory::{MemoryClassInstance, MemoryRegion},
    modifier::Tiling,
    usage::MapFlags,
    DeviceSize, KernelError,
};
use foldhash::HashMap;
use parking_lot::Mutex;
use std::{
    alloc::{self, Layout},
    ffi::c_void,
    os::fd::{AsRawFd, BorrowedFd, RawFd},
    ptr::NonNull,
    sync::Arc,
};

/// A transaction that was issued to a `MockKernel`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    GetParam(Param),
    QueryMemoryRegions(KernelAbi),
    GetCap(DrmCap),
    GemCreate {
        size: DeviceSize,
    },
    GemCreateExt {
        size: DeviceSize,
        regions: Vec<MemoryClassInstance>,
        flags: CreateExtFlags,
    },
    PrelimGemCreateExt {
        size: DeviceSize,
        regions: Vec<MemoryClassInstance>,
    },
    SetTiling {
        handle: u32,
        tiling: Tiling,
        stride: u32,
    },
    GetTiling {
        handle: u32,
    },
    GemMmap {
        handle: u32,
        size: DeviceSize,
        flags: GemMmapFlags,
    },
    GemMmapGtt {
        handle: u32,
    },
    GemMmapOffset {
        handle: u32,
        mode: MmapOffsetMode,
    },
    GemSetDomain {
        handle: u32,
        read_domains: GemDomains,
        write_domain: GemDomains,
    },
    GemClose {
        handle: u32,
    },
    PrimeFdToHandle {
        fd: RawFd,
    },
    DmabufSize {
        fd: RawFd,
    },
    Mmap {
        offset: u64,
        len: usize,
        access: MapFlags,
    },
    Munmap {
        len: usize,
    },
}

/// The memory region query schema the mock kernel answers.
#[derive(Clone, Debug, Default)]
pub(crate) enum MockRegions {
    /// Neither query is supported.
    #[default]
    None,
    Upstream(Vec<MemoryRegion>),
    Prelim(Vec<MemoryRegion>),
}

/// What a `MockKernel` reports when it is probed.
#[derive(Clone, Debug)]
pub(crate) struct MockConfig {
    pub(crate) chipset_id: Option<i32>,
    pub(crate) has_llc: Option<i32>,
    pub(crate) mmap_gtt_version: Option<i32>,
    pub(crate) regions: MockRegions,
    pub(crate) cursor: Option<(u64, u64)>,
}

impl MockConfig {
    pub(crate) fn new(chipset_id: u16) -> Self {
        MockConfig {
            chipset_id: Some(chipset_id.into()),
            has_llc: Some(1),
            mmap_gtt_version: Some(4),
            regions: MockRegions::None,
            cursor: None,
        }
    }
}

type Matcher = fn(&Call) -> bool;

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<Call>,
    failures: Vec<(Matcher, i32)>,
    next_handle: u32,
    open_handles: HashMap<u32, u32>,
    tiling: HashMap<u32, u32>,
    prime_handles: HashMap<RawFd, u32>,
    dmabuf_sizes: HashMap<RawFd, DeviceSize>,
    mappings: HashMap<usize, Layout>,
}

/// A `KernelDevice` that keeps buffer objects in memory.
///
/// Mappings are backed by heap allocations, so that tests can read and write them.
#[derive(Debug)]
pub(crate) struct MockKernel {
    config: MockConfig,
    state: Mutex<MockState>,
}

impl MockKernel {
    pub(crate) fn new(config: MockConfig) -> Self {
        MockKernel {
            config,
            state: Mutex::new(MockState {
                next_handle: 1,
                ..Default::default()
            }),
        }
    }

    /// Makes every later transaction that `matcher` accepts fail with `errno`.
    pub(crate) fn fail(&self, matcher: Matcher, errno: i32) {
        self.state.lock().failures.push((matcher, errno));
    }

    /// Sets what `dmabuf_size` and `get_tiling` report for the dma-buf `fd`.
    pub(crate) fn add_dmabuf(&self, fd: RawFd, size: DeviceSize, tiling: Tiling) {
        let mut state = self.state.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.prime_handles.insert(fd, handle);
        state.dmabuf_sizes.insert(fd, size);
        state.tiling.insert(handle, tiling.raw());
    }

    /// Returns the transactions issued so far that `matcher` accepts.
    pub(crate) fn calls_matching(&self, matcher: Matcher) -> Vec<Call> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| matcher(call))
            .cloned()
            .collect()
    }

    pub(crate) fn open_handle_count(&self) -> usize {
        self.state.lock().open_handles.len()
    }

    pub(crate) fn live_mapping_count(&self) -> usize {
        self.state.lock().mappings.len()
    }

    pub(crate) fn tiling_of(&self, handle: u32) -> Option<u32> {
        self.state.lock().tiling.get(&handle).copied()
    }

    fn issue(&self, name: &'static str, call: Call) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        let failure = state
            .failures
            .iter()
            .find(|(matcher, _)| matcher(&call))
            .map(|&(_, errno)| errno);
        state.calls.push(call);

        match failure {
            Some(errno) => Err(KernelError::new(name, errno)),
            None => Ok(()),
        }
    }

    fn new_handle(&self) -> u32 {
        let mut state = self.state.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        *state.open_handles.entry(handle).or_default() += 1;

        handle
    }

    fn allocate(&self, name: &'static str, len: usize) -> Result<NonNull<c_void>, KernelError> {
        let layout =
            Layout::from_size_align(len.max(1), 4096).map_err(|_| KernelError::new(name, libc::EINVAL))?;
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
            .ok_or(KernelError::new(name, libc::ENOMEM))?;
        self.state.lock().mappings.insert(ptr.as_ptr() as usize, layout);

        Ok(ptr.cast())
    }
}

impl Drop for MockKernel {
    fn drop(&mut self) {
        for (&addr, &layout) in self.state.get_mut().mappings.iter() {
            unsafe { alloc::dealloc(addr as *mut u8, layout) };
        }
    }
}

impl KernelDevice for MockKernel {
    fn get_param(&self, param: Param) -> Result<i32, KernelError> {
        const NAME: &str = "DRM_IOCTL_I915_GETPARAM";

        self.issue(NAME, Call::GetParam(param))?;

        let value = match param {
            Param::ChipsetId => self.config.chipset_id,
            Param::HasLlc => self.config.has_llc,
            Param::MmapGttVersion => self.config.mmap_gtt_version,
        };

        value.ok_or(KernelError::new(NAME, libc::EINVAL))
    }

    fn query_memory_regions(&self, abi: KernelAbi) -> Result<Vec<MemoryRegion>, KernelError> {
        const NAME: &str = "DRM_IOCTL_I915_QUERY";

        self.issue(NAME, Call::QueryMemoryRegions(abi))?;

        match (&self.config.regions, abi) {
            (MockRegions::Upstream(regions), KernelAbi::Upstream)
            | (MockRegions::Prelim(regions), KernelAbi::Prelim) => Ok(regions.clone()),
            _ => Err(KernelError::new(NAME, libc::EINVAL)),
        }
    }

    fn get_cap(&self, cap: DrmCap) -> Result<u64, KernelError> {
        const NAME: &str = "DRM_IOCTL_GET_CAP";

        self.issue(NAME, Call::GetCap(cap))?;

        let (width, height) = self
            .config
            .cursor
            .ok_or(KernelError::new(NAME, libc::EINVAL))?;

        Ok(match cap {
            DrmCap::CursorWidth => width,
            DrmCap::CursorHeight => height,
        })
    }

    fn gem_create(&self, size: DeviceSize) -> Result<u32, KernelError> {
        self.issue("DRM_IOCTL_I915_GEM_CREATE", Call::GemCreate { size })?;

        Ok(self.new_handle())
    }

    fn gem_create_ext(
        &self,
        size: DeviceSize,
        regions: &[MemoryClassInstance],
        flags: CreateExtFlags,
    ) -> Result<u32, KernelError> {
        self.issue(
            "DRM_IOCTL_I915_GEM_CREATE_EXT",
            Call::GemCreateExt {
                size,
                regions: regions.to_vec(),
                flags,
            },
        )?;

        Ok(self.new_handle())
    }

    fn prelim_gem_create_ext(
        &self,
        size: DeviceSize,
        regions: &[MemoryClassInstance],
    ) -> Result<u32, KernelError> {
        self.issue(
            "PRELIM_DRM_IOCTL_I915_GEM_CREATE_EXT",
            Call::PrelimGemCreateExt {
                size,
                regions: regions.to_vec(),
            },
        )?;

        Ok(self.new_handle())
    }

    fn set_tiling(&self, handle: u32, tiling: Tiling, stride: u32) -> Result<(), KernelError> {
        self.issue(
            "DRM_IOCTL_I915_GEM_SET_TILING",
            Call::SetTiling {
                handle,
                tiling,
                stride,
            },
        )?;
        self.state.lock().tiling.insert(handle, tiling.raw());

        Ok(())
    }

    fn get_tiling(&self, handle: u32) -> Result<u32, KernelError> {
        self.issue("DRM_IOCTL_I915_GEM_GET_TILING", Call::GetTiling { handle })?;

        Ok(self.tiling_of(handle).unwrap_or(0))
    }

    fn gem_mmap(
        &self,
        handle: u32,
        size: DeviceSize,
        flags: GemMmapFlags,
    ) -> Result<NonNull<c_void>, KernelError> {
        const NAME: &str = "DRM_IOCTL_I915_GEM_MMAP";

        self.issue(NAME, Call::GemMmap { handle, size, flags })?;

        self.allocate(NAME, size as usize)
    }

    fn gem_mmap_gtt(&self, handle: u32) -> Result<u64, KernelError> {
        self.issue("DRM_IOCTL_I915_GEM_MMAP_GTT", Call::GemMmapGtt { handle })?;

        Ok(u64::from(handle) << 32)
    }

    fn gem_mmap_offset(&self, handle: u32, mode: MmapOffsetMode) -> Result<u64, KernelError> {
        self.issue(
            "DRM_IOCTL_I915_GEM_MMAP_OFFSET",
            Call::GemMmapOffset { handle, mode },
        )?;

        Ok(u64::from(handle) << 32)
    }

    fn gem_set_domain(
        &self,
        handle: u32,
        read_domains: GemDomains,
        write_domain: GemDomains,
    ) -> Result<(), KernelError> {
        self.issue(
            "DRM_IOCTL_I915_GEM_SET_DOMAIN",
            Call::GemSetDomain {
                handle,
                read_domains,
                write_domain,
            },
        )
    }

    fn gem_close(&self, handle: u32) -> Result<(), KernelError> {
        const NAME: &str = "DRM_IOCTL_GEM_CLOSE";

        self.issue(NAME, Call::GemClose { handle })?;

        let mut state = self.state.lock();
        let count = state
            .open_handles
            .get_mut(&handle)
            .ok_or(KernelError::new(NAME, libc::EINVAL))?;
        *count -= 1;

        if *count == 0 {
            state.open_handles.remove(&handle);
        }

        Ok(())
    }

    fn prime_fd_to_handle(&self, fd: BorrowedFd<'_>) -> Result<u32, KernelError> {
        const NAME: &str = "DRM_IOCTL_PRIME_FD_TO_HANDLE";

        let fd = fd.as_raw_fd();
        self.issue(NAME, Call::PrimeFdToHandle { fd })?;

        let mut state = self.state.lock();
        let handle = *state
            .prime_handles
            .get(&fd)
            .ok_or(KernelError::new(NAME, libc::EBADF))?;

        // Importing the same dma-buf again yields the same handle, which still needs a single
        // close.
        state.open_handles.entry(handle).or_insert(1);

        Ok(handle)
    }

    fn dmabuf_size(&self, fd: BorrowedFd<'_>) -> Result<DeviceSize, KernelError> {
        const NAME: &str = "lseek";

        let fd = fd.as_raw_fd();
        self.issue(NAME, Call::DmabufSize { fd })?;

        self.state
            .lock()
            .dmabuf_sizes
            .get(&fd)
            .copied()
            .ok_or(KernelError::new(NAME, libc::EBADF))
    }

    fn mmap(
        &self,
        offset: u64,
        len: usize,
        access: MapFlags,
    ) -> Result<NonNull<c_void>, KernelError> {
        const NAME: &str = "mmap";

        self.issue(NAME, Call::Mmap {
            offset,
            len,
            access,
        })?;

        self.allocate(NAME, len)
    }

    unsafe fn munmap(&self, ptr: NonNull<c_void>, len: usize) -> Result<(), KernelError> {
        const NAME: &str = "munmap";

        self.issue(NAME, Call::Munmap { len })?;

        let layout = self
            .state
            .lock()
            .mappings
            .remove(&(ptr.as_ptr() as usize))
            .ok_or(KernelError::new(NAME, libc::EINVAL))?;

        if layout.size() != len.max(1) {
            return Err(KernelError::new(NAME, libc::EINVAL));
        }

        unsafe { alloc::dealloc(ptr.as_ptr().cast(), layout) };

        Ok(())
    }
}

pub(crate) const SYSTEM_REGION: MemoryRegion = MemoryRegion {
    region: MemoryClassInstance {
        class: 0,
        instance: 0,
    },
    probed_size: 16 << 30,
};

pub(crate) const VRAM_REGION: MemoryRegion = MemoryRegion {
    region: MemoryClassInstance {
        class: 1,
        instance: 0,
    },
    probed_size: 8 << 30,
};

/// Returns a config whose properties don't depend on the environment.
pub(crate) fn device_config() -> DeviceConfig {
    DeviceConfig {
        properties: Arc::new(StaticProperties::new().with(FORCE_MEM_PROPERTY, "system")),
        ..Default::default()
    }
}

pub(crate) fn device(config: MockConfig, device_config: DeviceConfig) -> (Arc<MockKernel>, Arc<Device>) {
    let kernel = Arc::new(MockKernel::new(config));
    let device = Device::new(kernel.clone(), device_config).unwrap();

    (kernel, device)
}

/// Tiger Lake, with LLC and without local memory.
pub(crate) fn gen12() -> (Arc<MockKernel>, Arc<Device>) {
    device(MockConfig::new(0x9A49), device_config())
}

/// Kaby Lake.
pub(crate) fn gen9() -> (Arc<MockKernel>, Arc<Device>) {
    device(MockConfig::new(0x5912), device_config())
}

/// A DG2 discrete GPU on an upstream kernel.
pub(crate) fn dg2() -> (Arc<MockKernel>, Arc<Device>) {
    device(
        MockConfig {
            has_llc: Some(0),
            regions: MockRegions::Upstream(vec![SYSTEM_REGION, VRAM_REGION]),
            ..MockConfig::new(0x56A0)
        },
        device_config(),
    )
}

/// Meteor Lake.
pub(crate) fn mtl() -> (Arc<MockKernel>, Arc<Device>) {
    device(
        MockConfig {
            regions: MockRegions::Upstream(vec![SYSTEM_REGION]),
            ..MockConfig::new(0x7D55)
        },
        device_config(),
    )
}
