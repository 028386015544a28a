//! The table of supported (format, usage) combinations.
//!
//! Each [`Combination`] says that buffers of a format can be allocated for a set of usages with
//! a given modifier. A format usually has several combinations, one per tiling, and the
//! [priority](FormatMetadata::priority) decides which one is used when the client doesn't ask
//! for specific modifiers: of the combinations that support all of the requested usages, the
//! one with the highest priority wins.
//!
//! The table of a device is filled once, when the device is probed, by [`register_i915`].

use crate::{
    config::{DeviceConfig, GpuGroupType},
    device::GpuInfo,
    format::DrmFormat,
    modifier::{Modifier, Tiling},
    usage::BufferUsage,
};
use foldhash::HashMap;
use log::debug;
use smallvec::SmallVec;
use std::slice;

/// How buffers of a combination are laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FormatMetadata {
    pub tiling: Tiling,

    /// Combinations with a higher priority are preferred.
    pub priority: u32,

    pub modifier: Modifier,
}

impl FormatMetadata {
    pub const LINEAR: FormatMetadata = FormatMetadata {
        tiling: Tiling::None,
        priority: 1,
        modifier: Modifier::Linear,
    };

    pub const X_TILED: FormatMetadata = FormatMetadata {
        tiling: Tiling::X,
        priority: 2,
        modifier: Modifier::XTiled,
    };

    pub const Y_TILED: FormatMetadata = FormatMetadata {
        tiling: Tiling::Y,
        priority: 3,
        modifier: Modifier::YTiled,
    };

    pub const TILED_4: FormatMetadata = FormatMetadata {
        tiling: Tiling::Tile4,
        priority: 3,
        modifier: Modifier::Tiled4,
    };

    #[inline]
    fn same_layout(&self, other: &FormatMetadata) -> bool {
        self.tiling == other.tiling && self.modifier == other.modifier
    }
}

/// A format that can be allocated for a set of usages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Combination {
    pub format: DrmFormat,
    pub metadata: FormatMetadata,
    pub usage: BufferUsage,
}

/// A table of combinations, indexed by format.
#[derive(Clone, Debug, Default)]
pub struct Combinations {
    entries: Vec<Combination>,
    by_format: HashMap<DrmFormat, SmallVec<[usize; 4]>>,
}

impl Combinations {
    /// Returns an empty table.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a combination.
    pub fn add(&mut self, format: DrmFormat, metadata: &FormatMetadata, usage: BufferUsage) {
        let index = self.entries.len();
        self.entries.push(Combination {
            format,
            metadata: *metadata,
            usage,
        });
        self.by_format.entry(format).or_default().push(index);
    }

    /// Adds the same combination for each of `formats`.
    pub fn add_many(&mut self, formats: &[DrmFormat], metadata: &FormatMetadata, usage: BufferUsage) {
        for &format in formats {
            self.add(format, metadata, usage);
        }
    }

    /// Adds `usage` to the combinations of `format` that have the tiling and modifier of
    /// `metadata`.
    ///
    /// Nothing happens if there is no such combination.
    pub fn modify(&mut self, format: DrmFormat, metadata: &FormatMetadata, usage: BufferUsage) {
        let Some(indices) = self.by_format.get(&format) else {
            return;
        };

        for &index in indices {
            let entry = &mut self.entries[index];

            if entry.metadata.same_layout(metadata) {
                entry.usage |= usage;
            }
        }
    }

    /// Allows linear `XRGB8888` and `ARGB8888` buffers to be scanned out, as a primary plane or
    /// as a cursor.
    pub fn modify_linear(&mut self) {
        for format in [DrmFormat::XRGB8888, DrmFormat::ARGB8888] {
            self.modify(
                format,
                &FormatMetadata::LINEAR,
                BufferUsage::CURSOR | BufferUsage::SCANOUT,
            );
        }
    }

    /// Returns the combination to use for a buffer of `format` with `usage`.
    ///
    /// This is the combination with the highest priority among those that support every
    /// requested usage. When several share that priority, the first one added wins.
    pub fn find(&self, format: DrmFormat, usage: BufferUsage) -> Option<&Combination> {
        if format == DrmFormat::NONE || usage.is_empty() {
            return None;
        }

        let mut best: Option<&Combination> = None;

        for &index in self.by_format.get(&format)? {
            let entry = &self.entries[index];

            if !entry.usage.contains(usage) {
                continue;
            }

            if best.map_or(true, |best| best.metadata.priority < entry.metadata.priority) {
                best = Some(entry);
            }
        }

        best
    }

    /// Returns whether some combination of `format` supports `usage`.
    #[inline]
    pub fn is_supported(&self, format: DrmFormat, usage: BufferUsage) -> bool {
        self.find(format, usage).is_some()
    }

    /// Returns an iterator over all combinations, in the order they were added.
    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, Combination> {
        self.entries.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a Combinations {
    type Item = &'a Combination;
    type IntoIter = slice::Iter<'a, Combination>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

const SCANOUT_RENDER_FORMATS: &[DrmFormat] = &[
    DrmFormat::ABGR2101010,
    DrmFormat::ABGR8888,
    DrmFormat::ARGB2101010,
    DrmFormat::ARGB8888,
    DrmFormat::RGB565,
    DrmFormat::XBGR2101010,
    DrmFormat::XBGR8888,
    DrmFormat::XRGB2101010,
    DrmFormat::XRGB8888,
];

const RENDER_FORMATS: &[DrmFormat] = &[DrmFormat::ABGR16161616F];

const TEXTURE_ONLY_FORMATS: &[DrmFormat] = &[
    DrmFormat::R8,
    DrmFormat::NV12,
    DrmFormat::P010,
    DrmFormat::YVU420,
    DrmFormat::YVU420_ANDROID,
    DrmFormat::YUYV,
];

/// Formats that media and camera pipelines produce.
const LINEAR_SOURCE_FORMATS: &[DrmFormat] = &[
    DrmFormat::R16,
    DrmFormat::NV16,
    DrmFormat::YUV420,
    DrmFormat::YUV422,
    DrmFormat::YUV444,
    DrmFormat::NV21,
    DrmFormat::P010,
];

/// Intel-specific formats that only hardware blocks produce and consume.
const SOURCE_FORMATS: &[DrmFormat] = &[DrmFormat::P010_INTEL, DrmFormat::NV12_Y_TILED_INTEL];

/// Usages that require a linear layout.
const LINEAR_USAGE: BufferUsage = BufferUsage::RENDERSCRIPT
    .union(BufferUsage::LINEAR)
    .union(BufferUsage::SW_READ_OFTEN)
    .union(BufferUsage::SW_WRITE_OFTEN)
    .union(BufferUsage::SW_READ_RARELY)
    .union(BufferUsage::SW_WRITE_RARELY);

const CAMERA_USAGE: BufferUsage = BufferUsage::CAMERA_READ.union(BufferUsage::CAMERA_WRITE);

/// Fills `combinations` with what an i915 GPU of generation `info` supports.
///
/// Three strata are added: linear, then X-tiled, then either 4-tiled (Xe-HPG and newer) or
/// Y-tiled. In some multi-GPU topologies, given by `config.gpu_group`, the last stratum is
/// left out so that buffers shared between the GPUs stay linear or X-tiled.
pub fn register_i915(
    combinations: &mut Combinations,
    info: &GpuInfo,
    has_hw_protection: bool,
    config: &DeviceConfig,
) {
    let scanout_and_render = BufferUsage::RENDER_MASK | BufferUsage::SCANOUT;
    let render = BufferUsage::RENDER_MASK;
    let texture_only = BufferUsage::TEXTURE_MASK;

    // Protected buffers also need to be scanned out.
    let hw_protected = if has_hw_protection {
        BufferUsage::PROTECTED | BufferUsage::SCANOUT
    } else {
        BufferUsage::empty()
    };

    let linear = &FormatMetadata::LINEAR;

    combinations.add_many(SCANOUT_RENDER_FORMATS, linear, scanout_and_render);
    combinations.add_many(RENDER_FORMATS, linear, render);
    combinations.add_many(TEXTURE_ONLY_FORMATS, linear, texture_only);

    combinations.modify_linear();

    // The camera ISP only outputs NV12.
    combinations.modify(
        DrmFormat::NV12,
        linear,
        CAMERA_USAGE
            | BufferUsage::SCANOUT
            | BufferUsage::HW_VIDEO_DECODER
            | BufferUsage::HW_VIDEO_ENCODER
            | hw_protected,
    );

    combinations.add(DrmFormat::BGR888, linear, BufferUsage::SW_MASK);
    combinations.modify(DrmFormat::ABGR2101010, linear, BufferUsage::SW_MASK);
    combinations.add(DrmFormat::RGB888, linear, BufferUsage::SW_MASK);

    // R8 backs blobs: JPEG snapshots, codec bitstreams and sensor data.
    combinations.modify(
        DrmFormat::R8,
        linear,
        CAMERA_USAGE
            | BufferUsage::HW_VIDEO_DECODER
            | BufferUsage::HW_VIDEO_ENCODER
            | BufferUsage::GPU_DATA_BUFFER
            | BufferUsage::SENSOR_DIRECT_DATA,
    );
    combinations.modify(
        DrmFormat::ABGR8888,
        linear,
        BufferUsage::CURSOR | BufferUsage::SCANOUT,
    );

    for format in [
        DrmFormat::NV12,
        DrmFormat::YUYV,
        DrmFormat::VYUY,
        DrmFormat::UYVY,
        DrmFormat::YVYU,
    ] {
        combinations.modify(
            format,
            linear,
            BufferUsage::RENDERING | BufferUsage::TEXTURE | BufferUsage::CAMERA_MASK,
        );
    }

    combinations.modify(
        DrmFormat::YVU420_ANDROID,
        linear,
        BufferUsage::TEXTURE | BufferUsage::CAMERA_MASK,
    );
    combinations.add_many(
        LINEAR_SOURCE_FORMATS,
        linear,
        texture_only | BufferUsage::CAMERA_MASK,
    );

    let render_not_linear = render.difference(LINEAR_USAGE | CAMERA_USAGE);
    let scanout_and_render_not_linear = render_not_linear | BufferUsage::SCANOUT;
    let texture_video = texture_only.difference(
        BufferUsage::RENDERSCRIPT
            | BufferUsage::SW_WRITE_OFTEN
            | BufferUsage::SW_READ_OFTEN
            | BufferUsage::LINEAR,
    );

    let x_tiled = &FormatMetadata::X_TILED;

    combinations.add_many(RENDER_FORMATS, x_tiled, render_not_linear);
    combinations.add_many(SCANOUT_RENDER_FORMATS, x_tiled, scanout_and_render_not_linear);
    combinations.add_many(
        LINEAR_SOURCE_FORMATS,
        x_tiled,
        texture_video | BufferUsage::CAMERA_MASK,
    );

    let gpu_group = config.gpu_group;

    if info.gen_x10() >= 125 {
        // With another GPU in the group, the dGPU only renders to X-tiled buffers.
        if info.gen_x10() == 125
            && gpu_group
                .intersects(GpuGroupType::HAS_INTEL_IGPU | GpuGroupType::HAS_VIRTIO_GPU_BLOB)
        {
            debug!("skipping 4-tiled combinations for GPU group {:?}", gpu_group);
            return;
        }

        let tiled_4 = &FormatMetadata::TILED_4;
        let (nv12_usage, p010_usage) = if config.scanout_4_tiled {
            let usage = BufferUsage::TEXTURE
                | BufferUsage::HW_VIDEO_DECODER
                | BufferUsage::SCANOUT
                | hw_protected;

            (usage, usage)
        } else {
            let usage = BufferUsage::TEXTURE | BufferUsage::HW_VIDEO_DECODER;

            (usage, usage)
        };

        combinations.add(DrmFormat::NV12, tiled_4, nv12_usage);
        combinations.add(DrmFormat::P010, tiled_4, p010_usage);
        combinations.add(DrmFormat::P010_INTEL, tiled_4, p010_usage);
        combinations.add_many(RENDER_FORMATS, tiled_4, render_not_linear);
        combinations.add_many(SCANOUT_RENDER_FORMATS, tiled_4, render_not_linear);
        combinations.add_many(
            SOURCE_FORMATS,
            tiled_4,
            texture_only | BufferUsage::NON_GPU_HW,
        );
    } else {
        if gpu_group.intersects(
            GpuGroupType::HAS_INTEL_DGPU | GpuGroupType::HAS_VIRTIO_GPU_BLOB_P2P,
        ) {
            debug!("skipping Y-tiled combinations for GPU group {:?}", gpu_group);
            return;
        }

        let y_tiled = &FormatMetadata::Y_TILED;
        let (nv12_usage, p010_usage) = if config.scanout_y_tiled {
            let usage = BufferUsage::TEXTURE | BufferUsage::HW_VIDEO_DECODER | hw_protected;
            let p010_scanout = if info.graphics_version >= 11 {
                BufferUsage::SCANOUT
            } else {
                BufferUsage::empty()
            };

            (usage | BufferUsage::SCANOUT, usage | p010_scanout)
        } else {
            let usage = BufferUsage::TEXTURE | BufferUsage::HW_VIDEO_DECODER;

            (usage, usage)
        };

        combinations.add(DrmFormat::NV12, y_tiled, nv12_usage);
        combinations.add(DrmFormat::P010, y_tiled, p010_usage);
        combinations.add(DrmFormat::P010_INTEL, y_tiled, p010_usage);
        combinations.add_many(RENDER_FORMATS, y_tiled, render_not_linear);
        combinations.add_many(SCANOUT_RENDER_FORMATS, y_tiled, scanout_and_render_not_linear);
        combinations.add_many(
            SOURCE_FORMATS,
            y_tiled,
            texture_only | BufferUsage::NON_GPU_HW,
        );
    }
}
