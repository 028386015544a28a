use super::{num_planes_from_modifier, BufferMetadata, BufferRequest};
use crate::{
    align_up, checked_align_up, checked_align_up_u32,
    device::Device,
    format::DrmFormat,
    modifier::{Modifier, Tiling},
    usage::BufferUsage,
    DeviceSize, ValidationError, MAX_PLANES,
};
use log::debug;

/// The widest buffer that generations before Gen11 can Y-tile.
const MAX_Y_TILED_WIDTH_GEN9: u32 = 4096;

/// The size alignment of the main surface of Gen12 and MTL compressed buffers.
const CCS_MAIN_SURFACE_ALIGNMENT: DeviceSize = 0x10000;

/// One byte of a Gen12 or MTL aux surface covers 256 bytes of the main surface.
const CCS_AUX_RATIO: DeviceSize = 256;

/// The largest buffer that can be planned. Anything bigger couldn't be mapped.
const MAX_BUFFER_SIZE: DeviceSize = isize::MAX as DeviceSize;

const Y_TILE_WIDTH: u32 = 128;
const Y_TILE_HEIGHT: u32 = 32;
const Y_TILE_SIZE: u32 = 4096;

impl BufferMetadata {
    /// Plans the layout of a buffer on `device`.
    ///
    /// The modifier is chosen first, and may be overridden by the restrictions of the hardware.
    /// The plane layout then follows from the modifier.
    pub fn compute(
        device: &Device,
        request: &BufferRequest,
    ) -> Result<BufferMetadata, Box<ValidationError>> {
        let &BufferRequest {
            width,
            height,
            format,
            usage,
            ref modifiers,
            _ne: _,
        } = request;

        if width == 0 || height == 0 {
            return Err(ValidationError::new(
                "width, height",
                "the buffer must not be empty",
            ));
        }

        if format.num_planes() == 0 {
            return Err(ValidationError::new(
                "format",
                format!("{:?} is not a known format", format),
            ));
        }

        let modifier = select_modifier(device, request)?;
        let modifier = apply_overrides(device, width, format, modifiers.as_deref(), modifier);
        let tiling = modifier.tiling();

        if usage.intersects(BufferUsage::SCANOUT) {
            debug!(
                "using tiling {:?} for scan-out buffer, modifier {:#x}",
                tiling,
                modifier.raw(),
            );
        }

        let mut metadata = BufferMetadata {
            width,
            height,
            format,
            usage,
            tiling,
            modifier,
            num_planes: num_planes_from_modifier(format, modifier),
            strides: [0; MAX_PLANES],
            offsets: [0; MAX_PLANES],
            sizes: [0; MAX_PLANES],
            total_size: 0,
        };

        let laid_out = if format == DrmFormat::YVU420_ANDROID {
            metadata.layout_android_yv12(device)
        } else {
            match modifier {
                Modifier::YTiledCcs => metadata.layout_y_tiled_ccs(device),
                Modifier::YTiledGen12RcCcs | Modifier::Tiled4MtlRcCcs => {
                    metadata.layout_rc_ccs(device)
                }
                _ => metadata.layout_planes(device),
            }
        };

        match laid_out {
            Some(()) if metadata.total_size <= MAX_BUFFER_SIZE => Ok(metadata),
            _ => Err(ValidationError::new(
                "width, height",
                "the buffer is too large",
            )),
        }
    }

    /// Android YV12 only needs to be usable as a linear texture. Its chroma strides must be
    /// `align(y_stride / 2, 16)`, which aligning the luma stride to 32 guarantees.
    fn layout_android_yv12(&mut self, device: &Device) -> Option<()> {
        let stride = checked_align_up_u32(self.width, 32)?;
        let mut offset: DeviceSize = 0;

        for plane in 0..self.num_planes {
            let plane_stride = self.format.subsample_stride(stride, plane);

            self.strides[plane] = plane_stride;
            self.sizes[plane] = self.format.size_from_format(plane_stride, self.height, plane);
            self.offsets[plane] = offset;
            offset = offset.checked_add(self.sizes[plane])?;
        }

        self.total_size = checked_align_up(offset, device.page_size())?;

        Some(())
    }

    /// Every 32x16 Y tiles of the main surface need one tile of control surface.
    fn layout_y_tiled_ccs(&mut self, device: &Device) -> Option<()> {
        let stride = self.format.stride_from_format(self.width, 0)?;
        let tiles_w = stride.div_ceil(Y_TILE_WIDTH);
        let tiles_h = self.height.div_ceil(Y_TILE_HEIGHT);
        let main_size = DeviceSize::from(tiles_w)
            .checked_mul(DeviceSize::from(tiles_h))?
            .checked_mul(DeviceSize::from(Y_TILE_SIZE))?;

        self.strides[0] = tiles_w.checked_mul(Y_TILE_WIDTH)?;
        self.sizes[0] = main_size;
        self.offsets[0] = 0;

        // The main surface is a whole number of tiles, so the control surface starts 4 KiB
        // aligned.
        let ccs_tiles_w = tiles_w.div_ceil(32);
        let ccs_tiles_h = tiles_h.div_ceil(16);

        self.strides[1] = ccs_tiles_w * Y_TILE_WIDTH;
        self.sizes[1] = DeviceSize::from(ccs_tiles_w)
            * DeviceSize::from(ccs_tiles_h)
            * DeviceSize::from(Y_TILE_SIZE);
        self.offsets[1] = main_size;

        let total_size = main_size.checked_add(self.sizes[1])?;
        self.total_size = checked_align_up(total_size, device.page_size())?;

        Some(())
    }

    /// Gen12 and MTL render compression. A cache line of the linear aux surface holds the
    /// state of 4 tiles, so the main stride is a multiple of 4 tiles.
    fn layout_rc_ccs(&mut self, device: &Device) -> Option<()> {
        let stride = self.format.stride_from_format(self.width, 0)?;
        let height = self.format.height_from_format(self.height, 0);
        let mut stride = checked_align_up_u32(stride, 512)?;
        let mut height = checked_align_up_u32(height, 32)?;

        if self.modifier == Modifier::Tiled4MtlRcCcs {
            stride = checked_align_up_u32(stride, 256)?;
        } else if device.is_xelpd() && stride > 1 {
            stride = stride.checked_next_power_of_two()?;
            height = checked_align_up_u32(height, 128)?;
        }

        let main_size = checked_align_up(
            DeviceSize::from(stride) * DeviceSize::from(height),
            CCS_MAIN_SURFACE_ALIGNMENT,
        )?;

        self.strides[0] = stride;
        self.sizes[0] = main_size;
        self.offsets[0] = 0;

        self.strides[1] = stride / 8;
        self.sizes[1] = align_up(main_size / CCS_AUX_RATIO, device.page_size());
        self.offsets[1] = main_size;

        self.total_size = main_size.checked_add(self.sizes[1])?;

        Some(())
    }

    fn layout_planes(&mut self, device: &Device) -> Option<()> {
        let page_size = device.page_size();
        let mut offset: DeviceSize = 0;

        for plane in 0..self.num_planes {
            let mut stride = self.format.stride_from_format(self.width, plane)?;
            let mut height = self.format.height_from_format(self.height, plane);

            if self.tiling != Tiling::None {
                debug_assert!(crate::is_aligned(offset, page_size));
            }

            let (horizontal, vertical) = dimension_alignment(device, self.format, self.tiling, height);

            height = checked_align_up_u32(height, vertical)?;

            // R8 buffers are often blobs, whose stride is their size.
            if self.format != DrmFormat::R8 {
                stride = checked_align_up_u32(stride, horizontal)?;
            }

            if needs_lcu_alignment(device, self.format, plane) {
                height = checked_align_up_u32(height, 64)?;
            }

            self.strides[plane] = stride;
            self.sizes[plane] = DeviceSize::from(stride) * DeviceSize::from(height);
            self.offsets[plane] = offset;
            offset = offset.checked_add(self.sizes[plane])?;
        }

        self.total_size = checked_align_up(offset, page_size)?;

        Some(())
    }
}

fn select_modifier(
    device: &Device,
    request: &BufferRequest,
) -> Result<Modifier, Box<ValidationError>> {
    match &request.modifiers {
        Some(modifiers) => device.modifier_order().pick(modifiers).ok_or_else(|| {
            ValidationError::new(
                "modifiers",
                "none of the modifiers are supported by the device",
            )
        }),
        None => device
            .combinations()
            .find(request.format, request.usage)
            .map(|combination| combination.metadata.modifier)
            .ok_or_else(|| {
                ValidationError::new(
                    "format, usage",
                    format!(
                        "{:?} is not supported for usage {:?}",
                        request.format, request.usage,
                    ),
                )
            }),
    }
}

/// Replaces `modifier` when the hardware or the host can't use it for this buffer.
fn apply_overrides(
    device: &Device,
    width: u32,
    format: DrmFormat,
    client: Option<&[Modifier]>,
    mut modifier: Modifier,
) -> Modifier {
    let available = |modifier: Modifier| match client {
        Some(client) => client.contains(&modifier),
        None => device.modifier_order().contains(modifier),
    };
    let fallback = |preferred: Modifier| {
        if available(preferred) {
            preferred
        } else {
            Modifier::Linear
        }
    };

    // Before Gen11, only linear and X-tiled buffers can be wider than 4096. Video decoding
    // needs Y-tiled NV12 and P010 anyway.
    if device.graphics_version() < 11
        && width > MAX_Y_TILED_WIDTH_GEN9
        && !matches!(format, DrmFormat::NV12 | DrmFormat::P010)
        && !matches!(modifier, Modifier::XTiled | Modifier::Linear)
    {
        let replacement = fallback(Modifier::XTiled);
        debug!(
            "{} wide buffer can't use modifier {:?}, using {:?}",
            width, modifier, replacement,
        );
        modifier = replacement;
    }

    if !device.compression() && modifier.is_ccs() {
        let replacement = match modifier {
            Modifier::Tiled4MtlRcCcs => fallback(Modifier::Tiled4),
            _ => fallback(Modifier::YTiled),
        };
        debug!(
            "compression is disabled, using {:?} instead of {:?}",
            replacement, modifier,
        );
        modifier = replacement;
    }

    // Gen8 and earlier can't scan out tiled ARGB8888.
    if device.graphics_version() <= 8 && format == DrmFormat::ARGB8888 {
        modifier = Modifier::Linear;
    }

    if format == DrmFormat::YVU420_ANDROID {
        modifier = Modifier::Linear;
    }

    modifier
}

/// Returns the `(horizontal, vertical)` alignment of the stride and height of a plane.
///
/// Every tiling mode has its own alignment, so the 4x4 default of Xe-HPG and newer never
/// applies.
fn dimension_alignment(
    device: &Device,
    format: DrmFormat,
    tiling: Tiling,
    height: u32,
) -> (u32, u32) {
    match tiling {
        // The GPU doesn't need alignment for linear buffers, but libva wants 16-byte strides
        // and heights in multiples of 4, and rows are started on a cache line.
        Tiling::None => {
            let horizontal = if device.linear_align_256() { 256 } else { 64 };

            // A one-row R8 buffer is a linear 1D blob; only 2D surfaces need 4 rows.
            let vertical = if format == DrmFormat::R8 && height == 1 {
                1
            } else {
                4
            };

            (horizontal, vertical)
        }
        Tiling::X => (512, 8),
        Tiling::Y | Tiling::Tile4 => (Y_TILE_WIDTH, Y_TILE_HEIGHT),
    }
}

/// Returns whether the chroma plane of a video format is aligned to the largest coded unit, as
/// gmmlib does.
fn needs_lcu_alignment(device: &Device, format: DrmFormat, plane: usize) -> bool {
    matches!(format, DrmFormat::NV12 | DrmFormat::P010 | DrmFormat::P016)
        && matches!(device.graphics_version(), 11 | 12)
        && plane == 1
}
