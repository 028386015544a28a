//! Pixel formats and their default plane geometry.
//!
//! Formats are identified by [fourcc](https://en.wikipedia.org/wiki/FourCC) codes, as in
//! `drm_fourcc.h`. For every supported format, [`DrmFormat::planar_layout`] describes how many
//! planes it has, and how each plane is subsampled. The default strides and heights derived from
//! this are what the planner starts from before applying the tiling alignments.

use std::fmt;

const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    a as u32 | (b as u32) << 8 | (c as u32) << 16 | (d as u32) << 24
}

/// A fourcc format identifier.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct DrmFormat(pub u32);

impl DrmFormat {
    pub const NONE: Self = Self(0);

    pub const R8: Self = Self(fourcc(b'R', b'8', b' ', b' '));
    pub const R16: Self = Self(fourcc(b'R', b'1', b'6', b' '));

    pub const RGB565: Self = Self(fourcc(b'R', b'G', b'1', b'6'));
    pub const BGR888: Self = Self(fourcc(b'B', b'G', b'2', b'4'));
    pub const RGB888: Self = Self(fourcc(b'R', b'G', b'2', b'4'));

    pub const XRGB8888: Self = Self(fourcc(b'X', b'R', b'2', b'4'));
    pub const XBGR8888: Self = Self(fourcc(b'X', b'B', b'2', b'4'));
    pub const ARGB8888: Self = Self(fourcc(b'A', b'R', b'2', b'4'));
    pub const ABGR8888: Self = Self(fourcc(b'A', b'B', b'2', b'4'));

    pub const XRGB2101010: Self = Self(fourcc(b'X', b'R', b'3', b'0'));
    pub const XBGR2101010: Self = Self(fourcc(b'X', b'B', b'3', b'0'));
    pub const ARGB2101010: Self = Self(fourcc(b'A', b'R', b'3', b'0'));
    pub const ABGR2101010: Self = Self(fourcc(b'A', b'B', b'3', b'0'));

    pub const ABGR16161616F: Self = Self(fourcc(b'A', b'B', b'4', b'H'));

    pub const YUYV: Self = Self(fourcc(b'Y', b'U', b'Y', b'V'));
    pub const YVYU: Self = Self(fourcc(b'Y', b'V', b'Y', b'U'));
    pub const UYVY: Self = Self(fourcc(b'U', b'Y', b'V', b'Y'));
    pub const VYUY: Self = Self(fourcc(b'V', b'Y', b'U', b'Y'));

    pub const NV12: Self = Self(fourcc(b'N', b'V', b'1', b'2'));
    pub const NV21: Self = Self(fourcc(b'N', b'V', b'2', b'1'));
    pub const NV16: Self = Self(fourcc(b'N', b'V', b'1', b'6'));
    pub const P010: Self = Self(fourcc(b'P', b'0', b'1', b'0'));
    pub const P016: Self = Self(fourcc(b'P', b'0', b'1', b'6'));

    pub const YUV420: Self = Self(fourcc(b'Y', b'U', b'1', b'2'));
    pub const YVU420: Self = Self(fourcc(b'Y', b'V', b'1', b'2'));
    pub const YUV422: Self = Self(fourcc(b'Y', b'U', b'1', b'6'));
    pub const YUV444: Self = Self(fourcc(b'Y', b'U', b'2', b'4'));

    /// Android's `HAL_PIXEL_FORMAT_YV12`: YVU 4:2:0 whose chroma stride is
    /// `align(luma_stride / 2, 16)`.
    pub const YVU420_ANDROID: Self = Self(fourcc(b'9', b'9', b'9', b'7'));

    /// Intel media NV12 that is always Y-tiled (or 4-tiled) by the producer.
    pub const NV12_Y_TILED_INTEL: Self = Self(fourcc(b'9', b'9', b'9', b'6'));

    /// Intel media P010 that is always Y-tiled (or 4-tiled) by the producer.
    pub const P010_INTEL: Self = Self(fourcc(b'9', b'9', b'9', b'5'));

    /// Constructs a format identifier using a fourcc byte sequence.
    #[inline(always)]
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> DrmFormat {
        DrmFormat(fourcc(a, b, c, d))
    }

    /// Returns the fourcc code as a sequence of bytes.
    #[inline(always)]
    pub const fn to_bytes(self) -> [u8; 4] {
        let f = self.0;
        [f as u8, (f >> 8) as u8, (f >> 16) as u8, (f >> 24) as u8]
    }

    /// Returns the planar layout of the format, or `None` if the format is not known.
    pub fn planar_layout(self) -> Option<&'static PlanarLayout> {
        Some(match self {
            Self::R8 => &PACKED_1BPP,
            Self::R16 | Self::RGB565 | Self::YUYV | Self::YVYU | Self::UYVY | Self::VYUY => {
                &PACKED_2BPP
            }
            Self::BGR888 | Self::RGB888 => &PACKED_3BPP,
            Self::ABGR2101010
            | Self::ABGR8888
            | Self::XBGR2101010
            | Self::XBGR8888
            | Self::ARGB2101010
            | Self::ARGB8888
            | Self::XRGB2101010
            | Self::XRGB8888 => &PACKED_4BPP,
            Self::ABGR16161616F => &PACKED_8BPP,
            Self::NV12 | Self::NV21 | Self::NV12_Y_TILED_INTEL => &BIPLANAR_YUV420,
            Self::P010 | Self::P016 | Self::P010_INTEL => &BIPLANAR_YUV420_2BPP,
            Self::NV16 => &BIPLANAR_YUV422,
            Self::YUV420 | Self::YVU420 | Self::YVU420_ANDROID => &TRIPLANAR_YUV420,
            Self::YUV422 => &TRIPLANAR_YUV422,
            Self::YUV444 => &TRIPLANAR_YUV444,
            _ => return None,
        })
    }

    /// Returns the number of planes of the format, or 0 if the format is not known.
    #[inline]
    pub fn num_planes(self) -> usize {
        self.planar_layout().map_or(0, |layout| layout.num_planes)
    }

    /// Returns the minimum stride in bytes of `plane` for a buffer `width` pixels wide.
    ///
    /// Returns `None` if the format is not known, doesn't have that plane, or if the stride
    /// doesn't fit in a `u32`.
    pub fn stride_from_format(self, width: u32, plane: usize) -> Option<u32> {
        let layout = self.planar_layout()?;

        if plane >= layout.num_planes {
            return None;
        }

        let plane_width = width.div_ceil(layout.horizontal_subsampling[plane]);
        let stride = plane_width.checked_mul(layout.bytes_per_pixel[plane])?;

        // The stride of Android YV12 buffers must be aligned to 16 bytes (see
        // <system/graphics.h>).
        if self == Self::YVU420_ANDROID {
            if plane == 0 {
                crate::checked_align_up_u32(stride, 32)
            } else {
                crate::checked_align_up_u32(stride, 16)
            }
        } else {
            Some(stride)
        }
    }

    /// Returns the number of rows of `plane` for a buffer `height` pixels tall.
    ///
    /// Returns 0 if the format is not known or doesn't have that plane.
    pub fn height_from_format(self, height: u32, plane: usize) -> u32 {
        match self.planar_layout() {
            Some(layout) if plane < layout.num_planes => {
                height.div_ceil(layout.vertical_subsampling[plane])
            }
            _ => 0,
        }
    }

    /// Returns the size in bytes of `plane` when its rows are `stride` bytes apart.
    #[inline]
    pub fn size_from_format(self, stride: u32, height: u32, plane: usize) -> u64 {
        stride as u64 * self.height_from_format(height, plane) as u64
    }

    /// Returns the stride of `plane` when the stride of plane 0 is `stride`.
    pub(crate) fn subsample_stride(self, stride: u32, plane: usize) -> u32 {
        if plane != 0 && matches!(self, Self::YVU420 | Self::YVU420_ANDROID) {
            stride.div_ceil(2)
        } else {
            stride
        }
    }
}

impl From<u32> for DrmFormat {
    #[inline]
    fn from(u: u32) -> DrmFormat {
        DrmFormat(u)
    }
}

impl From<DrmFormat> for u32 {
    #[inline]
    fn from(f: DrmFormat) -> u32 {
        f.0
    }
}

impl fmt::Debug for DrmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.to_bytes();
        if b.iter().all(|c| c.is_ascii_graphic() || *c == b' ') {
            write!(
                f,
                "DrmFormat({}{}{}{})",
                b[0] as char, b[1] as char, b[2] as char, b[3] as char
            )
        } else {
            write!(f, "DrmFormat({:#010x})", self.0)
        }
    }
}

/// Planar properties of a `DrmFormat`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PlanarLayout {
    pub num_planes: usize,
    pub horizontal_subsampling: [u32; 3],
    pub vertical_subsampling: [u32; 3],
    pub bytes_per_pixel: [u32; 3],
}

static PACKED_1BPP: PlanarLayout = PlanarLayout {
    num_planes: 1,
    horizontal_subsampling: [1, 0, 0],
    vertical_subsampling: [1, 0, 0],
    bytes_per_pixel: [1, 0, 0],
};

static PACKED_2BPP: PlanarLayout = PlanarLayout {
    num_planes: 1,
    horizontal_subsampling: [1, 0, 0],
    vertical_subsampling: [1, 0, 0],
    bytes_per_pixel: [2, 0, 0],
};

static PACKED_3BPP: PlanarLayout = PlanarLayout {
    num_planes: 1,
    horizontal_subsampling: [1, 0, 0],
    vertical_subsampling: [1, 0, 0],
    bytes_per_pixel: [3, 0, 0],
};

static PACKED_4BPP: PlanarLayout = PlanarLayout {
    num_planes: 1,
    horizontal_subsampling: [1, 0, 0],
    vertical_subsampling: [1, 0, 0],
    bytes_per_pixel: [4, 0, 0],
};

static PACKED_8BPP: PlanarLayout = PlanarLayout {
    num_planes: 1,
    horizontal_subsampling: [1, 0, 0],
    vertical_subsampling: [1, 0, 0],
    bytes_per_pixel: [8, 0, 0],
};

static BIPLANAR_YUV420: PlanarLayout = PlanarLayout {
    num_planes: 2,
    horizontal_subsampling: [1, 2, 0],
    vertical_subsampling: [1, 2, 0],
    bytes_per_pixel: [1, 2, 0],
};

static BIPLANAR_YUV420_2BPP: PlanarLayout = PlanarLayout {
    num_planes: 2,
    horizontal_subsampling: [1, 2, 0],
    vertical_subsampling: [1, 2, 0],
    bytes_per_pixel: [2, 4, 0],
};

static BIPLANAR_YUV422: PlanarLayout = PlanarLayout {
    num_planes: 2,
    horizontal_subsampling: [1, 2, 0],
    vertical_subsampling: [1, 1, 0],
    bytes_per_pixel: [1, 2, 0],
};

static TRIPLANAR_YUV420: PlanarLayout = PlanarLayout {
    num_planes: 3,
    horizontal_subsampling: [1, 2, 2],
    vertical_subsampling: [1, 2, 2],
    bytes_per_pixel: [1, 1, 1],
};

static TRIPLANAR_YUV422: PlanarLayout = PlanarLayout {
    num_planes: 3,
    horizontal_subsampling: [1, 2, 2],
    vertical_subsampling: [1, 1, 1],
    bytes_per_pixel: [1, 1, 1],
};

static TRIPLANAR_YUV444: PlanarLayout = PlanarLayout {
    num_planes: 3,
    horizontal_subsampling: [1, 1, 1],
    vertical_subsampling: [1, 1, 1],
    bytes_per_pixel: [1, 1, 1],
};
