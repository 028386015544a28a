//! How a buffer is going to be used.

use crate::macros::drm_bitflags;

drm_bitflags! {
    /// Describes how a buffer is going to be used. This is **not** just an optimization.
    ///
    /// The bit values are the ones used by the host buffer manager.
    BufferUsage
    impl {
        /// All software access flags, plus front-buffer rendering.
        pub const SW_MASK: Self = Self::SW_READ_OFTEN
            .union(Self::SW_READ_RARELY)
            .union(Self::SW_WRITE_OFTEN)
            .union(Self::SW_WRITE_RARELY)
            .union(Self::FRONT_RENDERING);

        /// The usages a renderable buffer supports.
        pub const RENDER_MASK: Self = Self::LINEAR
            .union(Self::RENDERING)
            .union(Self::RENDERSCRIPT)
            .union(Self::SW_READ_OFTEN)
            .union(Self::SW_WRITE_OFTEN)
            .union(Self::SW_READ_RARELY)
            .union(Self::SW_WRITE_RARELY)
            .union(Self::TEXTURE)
            .union(Self::FRONT_RENDERING);

        /// The usages a sampled-only buffer supports.
        pub const TEXTURE_MASK: Self = Self::LINEAR
            .union(Self::RENDERSCRIPT)
            .union(Self::SW_READ_OFTEN)
            .union(Self::SW_WRITE_OFTEN)
            .union(Self::SW_READ_RARELY)
            .union(Self::SW_WRITE_RARELY)
            .union(Self::TEXTURE);

        pub const CAMERA_MASK: Self = Self::CAMERA_READ
            .union(Self::SCANOUT)
            .union(Self::CAMERA_WRITE);

        /// Usages by hardware blocks other than the GPU.
        pub const NON_GPU_HW: Self = Self::SCANOUT
            .union(Self::CAMERA_WRITE)
            .union(Self::CAMERA_READ)
            .union(Self::HW_VIDEO_ENCODER)
            .union(Self::HW_VIDEO_DECODER)
            .union(Self::SENSOR_DIRECT_DATA);

        /// Returns whether the CPU is going to read or write the buffer.
        #[inline]
        pub const fn wants_cpu_access(self) -> bool {
            self.intersects(
                Self::SW_READ_OFTEN
                    .union(Self::SW_READ_RARELY)
                    .union(Self::SW_WRITE_OFTEN)
                    .union(Self::SW_WRITE_RARELY),
            )
        }
    }
    = u64;

    /// The buffer is going to be scanned out by the display engine.
    SCANOUT = 1 << 0,

    /// The buffer is going to be used as a hardware cursor.
    CURSOR = 1 << 1,

    /// The buffer is going to be rendered to.
    RENDERING = 1 << 2,

    /// The buffer must be laid out linearly.
    LINEAR = 1 << 3,

    /// The buffer is going to be sampled from.
    TEXTURE = 1 << 4,

    /// The camera writes to the buffer.
    CAMERA_WRITE = 1 << 5,

    /// The camera reads from the buffer, for example a reprocessing input.
    CAMERA_READ = 1 << 6,

    /// The buffer holds protected content.
    PROTECTED = 1 << 7,

    /// The CPU reads the buffer often, so reads should be cached.
    SW_READ_OFTEN = 1 << 8,

    /// The CPU reads the buffer occasionally.
    SW_READ_RARELY = 1 << 9,

    /// The CPU writes the buffer often.
    SW_WRITE_OFTEN = 1 << 10,

    /// The CPU writes the buffer occasionally.
    SW_WRITE_RARELY = 1 << 11,

    /// The hardware video decoder writes to the buffer.
    HW_VIDEO_DECODER = 1 << 12,

    /// The hardware video encoder reads from the buffer.
    HW_VIDEO_ENCODER = 1 << 13,

    /// The buffer is rendered to while it is being scanned out.
    FRONT_RENDERING = 1 << 16,

    /// RenderScript kernels access the buffer through the CPU.
    RENDERSCRIPT = 1 << 17,

    /// The buffer is going to be used as a GPU data buffer, not as an image.
    GPU_DATA_BUFFER = 1 << 18,

    /// Sensors write their events to the buffer directly.
    SENSOR_DIRECT_DATA = 1 << 19,
}

drm_bitflags! {
    /// The kind of CPU access requested when mapping a buffer.
    MapFlags = u32;

    /// The mapping is readable.
    READ = 1 << 0,

    /// The mapping is writable.
    WRITE = 1 << 1,
}

impl MapFlags {
    /// Returns the `mmap` protection bits for `self`.
    pub(crate) fn to_prot(self) -> libc::c_int {
        let mut prot = libc::PROT_NONE;

        if self.intersects(MapFlags::READ) {
            prot |= libc::PROT_READ;
        }

        if self.intersects(MapFlags::WRITE) {
            prot |= libc::PROT_WRITE;
        }

        prot
    }
}
