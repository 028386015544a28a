//! Placement of buffer objects in system memory or device-local memory.
//!
//! Integrated GPUs only have system memory. Discrete GPUs also have device-local memory (VRAM),
//! which is where buffers that the CPU doesn't touch should live. The [`Heap`] of a buffer is
//! chosen from its usage when it is allocated, and translated into the list of memory regions
//! that the kernel may place the buffer object in.
//!
//! Two kernel ABIs exist for this, see [`KernelAbi`]. On a prelim kernel the placement is
//! decided once per device by the `sys.icr.gralloc.force_mem` property.

use crate::{
    buffer::{Buffer, BufferMetadata},
    device::Device,
    kernel::{CreateExtFlags, KernelAbi},
    macros::drm_enum,
    usage::BufferUsage,
    DeviceSize, KernelError, Validated,
};
use log::{debug, error};
use smallvec::SmallVec;
use std::sync::Arc;

/// The size alignment that the kernel requires for objects created with memory regions.
const CREATE_EXT_SIZE_ALIGNMENT: DeviceSize = 0x10000;

drm_enum! {
    /// The kind of memory of a memory region.
    MemoryClass = u16;

    /// `I915_MEMORY_CLASS_SYSTEM`
    System = 0,

    /// `I915_MEMORY_CLASS_DEVICE`
    Device = 1,
}

/// Identifies a memory region to the kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MemoryClassInstance {
    pub class: u16,
    pub instance: u16,
}

/// A memory region reported by the kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MemoryRegion {
    pub region: MemoryClassInstance,

    /// The size of the region in bytes.
    pub probed_size: DeviceSize,
}

impl MemoryRegion {
    /// Returns the class of the region, or `None` if the kernel reported a class that this
    /// backend doesn't know about.
    #[inline]
    pub fn memory_class(&self) -> Option<MemoryClass> {
        MemoryClass::try_from(self.region.class).ok()
    }
}

/// Where a buffer object should be placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Heap {
    /// System memory only.
    SystemMemory,

    /// Device-local memory only.
    DeviceLocal,

    /// Device-local memory, falling back to system memory when it is full. The buffer stays
    /// CPU-accessible.
    DeviceLocalPreferred,
}

impl Heap {
    /// Returns the heap that a buffer with the given usage is placed in.
    ///
    /// Buffers that the CPU accesses, and all buffers on devices without local memory, are
    /// placed in system memory.
    #[inline]
    pub fn select(device: &Device, usage: BufferUsage) -> Heap {
        Self::select_with_policy(device, usage, AllocationPolicy::Default)
    }

    /// Returns the heap that a buffer with the given usage is placed in, following `policy`.
    pub fn select_with_policy(
        device: &Device,
        usage: BufferUsage,
        policy: AllocationPolicy,
    ) -> Heap {
        if usage.wants_cpu_access() || !device.has_local_mem() {
            return Heap::SystemMemory;
        }

        match policy {
            AllocationPolicy::Default => Heap::DeviceLocalPreferred,
            AllocationPolicy::DeviceLocalOnly => Heap::DeviceLocal,
        }
    }

    /// Returns the memory regions of the heap on `device`, in order of preference.
    pub(crate) fn regions(self, device: &Device) -> SmallVec<[MemoryClassInstance; 2]> {
        let mut regions = SmallVec::new();

        if matches!(self, Heap::DeviceLocal | Heap::DeviceLocalPreferred) {
            regions.extend(device.vram().map(|vram| vram.region));
        }

        if matches!(self, Heap::SystemMemory | Heap::DeviceLocalPreferred) {
            regions.push(device.sys().region);
        }

        regions
    }
}

/// Caller policy for the placement of a buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AllocationPolicy {
    /// Prefer device-local memory for buffers that the CPU doesn't access.
    #[default]
    Default,

    /// Require device-local memory for buffers that the CPU doesn't access.
    DeviceLocalOnly,
}

impl Buffer {
    /// Allocates a buffer object for a planned buffer.
    #[inline]
    pub fn from_metadata(
        device: Arc<Device>,
        metadata: BufferMetadata,
    ) -> Result<Buffer, Validated<KernelError>> {
        Self::from_metadata_with_policy(device, metadata, AllocationPolicy::Default)
    }

    /// Allocates a buffer object for a planned buffer, placing it following `policy`.
    ///
    /// Every plane of the buffer refers to the same buffer object. On generations that have
    /// fences, the tiling mode of the object is set as well.
    pub fn from_metadata_with_policy(
        device: Arc<Device>,
        metadata: BufferMetadata,
        policy: AllocationPolicy,
    ) -> Result<Buffer, Validated<KernelError>> {
        let heap = Heap::select_with_policy(&device, metadata.usage(), policy);
        let handle = create_object(&device, &metadata, heap)?;

        if device.has_tiling_fence() {
            if let Err(err) =
                device
                    .kernel()
                    .set_tiling(handle, metadata.tiling(), metadata.strides()[0])
            {
                error!(
                    "{} (tiling {:?}, stride {})",
                    err,
                    metadata.tiling(),
                    metadata.strides()[0],
                );

                if let Err(close_err) = device.kernel().gem_close(handle) {
                    error!("{}", close_err);
                }

                return Err(err.into());
            }
        }

        let handles = SmallVec::from_elem(handle, metadata.num_planes());

        Ok(Buffer::new(device, metadata, handles))
    }
}

fn create_object(
    device: &Device,
    metadata: &BufferMetadata,
    heap: Heap,
) -> Result<u32, KernelError> {
    let kernel = device.kernel();
    let total_size = metadata.total_size();

    // Objects in system memory don't need memory regions.
    if heap == Heap::SystemMemory {
        return kernel.gem_create(total_size).inspect_err(|err| {
            error!("{} (size {})", err, total_size);
        });
    }

    let size = crate::align_up(total_size, CREATE_EXT_SIZE_ALIGNMENT);

    let result = match device.kernel_abi() {
        KernelAbi::Upstream => {
            let regions = heap.regions(device);
            let flags = if heap == Heap::DeviceLocalPreferred {
                CreateExtFlags::NEEDS_CPU_ACCESS
            } else {
                CreateExtFlags::empty()
            };

            kernel.gem_create_ext(size, &regions, flags)
        }
        KernelAbi::Prelim => {
            let regions = if device.force_mem_local() {
                Heap::DeviceLocalPreferred.regions(device)
            } else {
                Heap::SystemMemory.regions(device)
            };

            kernel.prelim_gem_create_ext(size, &regions)
        }
    };

    match &result {
        Ok(handle) => debug!("created object {} in {:?} (size {})", handle, heap, size),
        Err(err) => error!("{} (size {})", err, size),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::BufferRequest,
        format::DrmFormat,
        kernel::mock::{self, Call, MockConfig, MockRegions},
        modifier::Tiling,
    };

    fn request(format: DrmFormat, usage: BufferUsage) -> BufferRequest {
        BufferRequest {
            width: 256,
            height: 256,
            format,
            usage,
            ..Default::default()
        }
    }

    #[test]
    fn system_heap_for_cpu_access() {
        let (_, device) = mock::dg2();

        for usage in [
            BufferUsage::SW_READ_OFTEN,
            BufferUsage::SW_READ_RARELY | BufferUsage::TEXTURE,
            BufferUsage::SW_WRITE_OFTEN | BufferUsage::RENDERING,
            BufferUsage::SW_WRITE_RARELY,
        ] {
            assert_eq!(Heap::select(&device, usage), Heap::SystemMemory);
        }

        assert_eq!(
            Heap::select(&device, BufferUsage::RENDERING),
            Heap::DeviceLocalPreferred,
        );
        assert_eq!(
            Heap::select_with_policy(
                &device,
                BufferUsage::RENDERING,
                AllocationPolicy::DeviceLocalOnly,
            ),
            Heap::DeviceLocal,
        );
    }

    #[test]
    fn system_heap_without_local_mem() {
        let (_, device) = mock::gen12();

        assert!(!device.has_local_mem());
        assert_eq!(
            Heap::select(&device, BufferUsage::RENDERING),
            Heap::SystemMemory,
        );
        assert_eq!(
            Heap::select_with_policy(
                &device,
                BufferUsage::RENDERING,
                AllocationPolicy::DeviceLocalOnly,
            ),
            Heap::SystemMemory,
        );
    }

    #[test]
    fn plain_create_uses_exact_size() {
        let (kernel, device) = mock::gen12();
        let metadata = BufferMetadata::compute(
            &device,
            &request(DrmFormat::ARGB8888, BufferUsage::SW_READ_OFTEN),
        )
        .unwrap();
        let total_size = metadata.total_size();
        let buffer = Buffer::from_metadata(device, metadata).unwrap();

        assert_eq!(
            kernel.calls_matching(|call| matches!(call, Call::GemCreate { .. })),
            [Call::GemCreate { size: total_size }],
        );
        assert_eq!(buffer.handles(), &[1]);
        assert_eq!(kernel.open_handle_count(), 1);

        drop(buffer);
        assert_eq!(kernel.open_handle_count(), 0);
    }

    #[test]
    fn upstream_local_preferred() {
        let (kernel, device) = mock::dg2();
        let metadata =
            BufferMetadata::compute(&device, &request(DrmFormat::XRGB8888, BufferUsage::RENDERING))
                .unwrap();
        let total_size = metadata.total_size();
        let _buffer = Buffer::from_metadata(device, metadata).unwrap();

        assert_eq!(
            kernel.calls_matching(|call| matches!(call, Call::GemCreateExt { .. })),
            [Call::GemCreateExt {
                size: crate::align_up(total_size, 0x10000),
                regions: vec![mock::VRAM_REGION.region, mock::SYSTEM_REGION.region],
                flags: CreateExtFlags::NEEDS_CPU_ACCESS,
            }],
        );
    }

    #[test]
    fn upstream_local_only() {
        let (kernel, device) = mock::dg2();
        let metadata =
            BufferMetadata::compute(&device, &request(DrmFormat::XRGB8888, BufferUsage::RENDERING))
                .unwrap();
        let _buffer = Buffer::from_metadata_with_policy(
            device,
            metadata,
            AllocationPolicy::DeviceLocalOnly,
        )
        .unwrap();

        let calls = kernel.calls_matching(|call| matches!(call, Call::GemCreateExt { .. }));
        let Call::GemCreateExt { regions, flags, .. } = &calls[0] else {
            unreachable!();
        };
        assert_eq!(regions, &[mock::VRAM_REGION.region]);
        assert!(flags.is_empty());
    }

    #[test]
    fn upstream_sw_usage_uses_plain_create() {
        let (kernel, device) = mock::dg2();
        let metadata = BufferMetadata::compute(
            &device,
            &request(
                DrmFormat::XRGB8888,
                BufferUsage::RENDERING | BufferUsage::SW_WRITE_OFTEN,
            ),
        )
        .unwrap();
        let _buffer = Buffer::from_metadata(device, metadata).unwrap();

        assert_eq!(
            kernel
                .calls_matching(|call| matches!(call, Call::GemCreateExt { .. }))
                .len(),
            0,
        );
        assert_eq!(
            kernel
                .calls_matching(|call| matches!(call, Call::GemCreate { .. }))
                .len(),
            1,
        );
    }

    #[test]
    fn prelim_regions_follow_force_mem() {
        for (property, expected) in [
            ("local", vec![mock::VRAM_REGION.region, mock::SYSTEM_REGION.region]),
            ("system", vec![mock::SYSTEM_REGION.region]),
        ] {
            let config = crate::config::DeviceConfig {
                properties: Arc::new(
                    crate::config::StaticProperties::new()
                        .with(crate::config::FORCE_MEM_PROPERTY, property),
                ),
                ..Default::default()
            };
            let (kernel, device) = mock::device(
                MockConfig {
                    has_llc: Some(0),
                    regions: MockRegions::Prelim(vec![mock::SYSTEM_REGION, mock::VRAM_REGION]),
                    ..MockConfig::new(0x56A0)
                },
                config,
            );
            assert_eq!(device.kernel_abi(), KernelAbi::Prelim);

            let metadata = BufferMetadata::compute(
                &device,
                &request(DrmFormat::ABGR8888, BufferUsage::TEXTURE),
            )
            .unwrap();
            let total_size = metadata.total_size();
            let _buffer = Buffer::from_metadata(device, metadata).unwrap();

            assert_eq!(
                kernel.calls_matching(|call| matches!(call, Call::PrelimGemCreateExt { .. })),
                [Call::PrelimGemCreateExt {
                    size: crate::align_up(total_size, 0x10000),
                    regions: expected,
                }],
            );
        }
    }

    #[test]
    fn create_failure_preserves_errno() {
        let (kernel, device) = mock::gen12();
        kernel.fail(|call| matches!(call, Call::GemCreate { .. }), libc::ENOMEM);

        let metadata =
            BufferMetadata::compute(&device, &request(DrmFormat::R8, BufferUsage::TEXTURE))
                .unwrap();
        let err = Buffer::from_metadata(device, metadata).unwrap_err();

        assert_eq!(err.errno(), libc::ENOMEM);
        assert_eq!(kernel.open_handle_count(), 0);
    }

    #[test]
    fn tiling_fence() {
        let (kernel, device) = mock::gen12();
        let metadata = BufferMetadata::compute(
            &device,
            &request(DrmFormat::XRGB8888, BufferUsage::RENDERING),
        )
        .unwrap();
        let tiling = metadata.tiling();
        let stride = metadata.strides()[0];
        let buffer = Buffer::from_metadata(device, metadata).unwrap();

        assert_eq!(tiling, Tiling::Y);
        assert_eq!(
            kernel.calls_matching(|call| matches!(call, Call::SetTiling { .. })),
            [Call::SetTiling {
                handle: buffer.handles()[0],
                tiling,
                stride,
            }],
        );
    }

    #[test]
    fn no_tiling_fence_on_tile4_generations() {
        for (kernel, device) in [mock::dg2(), mock::mtl()] {
            let metadata = BufferMetadata::compute(
                &device,
                &request(DrmFormat::XRGB8888, BufferUsage::RENDERING),
            )
            .unwrap();
            let _buffer = Buffer::from_metadata(device, metadata).unwrap();

            assert!(kernel
                .calls_matching(|call| matches!(call, Call::SetTiling { .. }))
                .is_empty());
        }
    }

    #[test]
    fn tiling_fence_failure_closes_object() {
        let (kernel, device) = mock::gen12();
        kernel.fail(|call| matches!(call, Call::SetTiling { .. }), libc::EINVAL);

        let metadata = BufferMetadata::compute(
            &device,
            &request(DrmFormat::XRGB8888, BufferUsage::RENDERING),
        )
        .unwrap();
        let err = Buffer::from_metadata(device, metadata).unwrap_err();

        assert_eq!(err.errno(), libc::EINVAL);
        assert!(!err.is_validation_error());
        assert_eq!(kernel.open_handle_count(), 0);
        assert_eq!(
            kernel.calls_matching(|call| matches!(call, Call::GemClose { .. })),
            [Call::GemClose { handle: 1 }],
        );
    }
}
