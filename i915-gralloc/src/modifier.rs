//! Format modifiers and the tiling modes they imply.
//!
//! A modifier is a 64-bit token that describes the memory layout of a buffer beyond its pixel
//! format: whether it is linear or tiled, with which tile shape, and whether it carries a
//! compression control surface. Each generation of hardware supports a subset of the modifiers,
//! ranked by preference in a [`ModifierOrder`].

use crate::macros::drm_enum;
use smallvec::SmallVec;

const fn intel_modifier(val: u64) -> u64 {
    (0x01 << 56) | val
}

drm_enum! {
    /// A format modifier that this backend understands.
    Modifier
    impl {
        /// Converts a raw modifier into a `Modifier`, returning `None` for modifiers this
        /// backend doesn't know about.
        #[inline]
        pub fn from_raw(raw: u64) -> Option<Self> {
            Self::try_from(raw).ok()
        }

        /// Returns the tiling mode that buffers with this modifier are laid out with.
        #[inline]
        pub const fn tiling(self) -> Tiling {
            match self {
                Self::Linear => Tiling::None,
                Self::XTiled => Tiling::X,
                Self::YTiled
                | Self::YTiledCcs
                | Self::YfTiled
                | Self::YfTiledCcs
                | Self::YTiledGen12RcCcs => Tiling::Y,
                Self::Tiled4 | Self::Tiled4MtlRcCcs => Tiling::Tile4,
            }
        }

        /// Returns whether buffers with this modifier carry a compression control surface.
        ///
        /// Compressed buffers have an auxiliary plane, and can't be mapped.
        #[inline]
        pub const fn is_ccs(self) -> bool {
            matches!(
                self,
                Self::YTiledCcs | Self::YTiledGen12RcCcs | Self::Tiled4MtlRcCcs,
            )
        }
    }
    = u64;

    /// `DRM_FORMAT_MOD_LINEAR`
    Linear = 0,

    /// `I915_FORMAT_MOD_X_TILED`
    XTiled = intel_modifier(1),

    /// `I915_FORMAT_MOD_Y_TILED`
    YTiled = intel_modifier(2),

    /// `I915_FORMAT_MOD_Yf_TILED`
    YfTiled = intel_modifier(3),

    /// `I915_FORMAT_MOD_Y_TILED_CCS`
    YTiledCcs = intel_modifier(4),

    /// `I915_FORMAT_MOD_Yf_TILED_CCS`
    YfTiledCcs = intel_modifier(5),

    /// `I915_FORMAT_MOD_Y_TILED_GEN12_RC_CCS`
    YTiledGen12RcCcs = intel_modifier(6),

    /// `I915_FORMAT_MOD_4_TILED`
    Tiled4 = intel_modifier(9),

    /// `I915_FORMAT_MOD_4_TILED_MTL_RC_CCS`
    Tiled4MtlRcCcs = intel_modifier(13),
}

drm_enum! {
    /// The kernel tiling mode of a buffer object.
    Tiling = u32;

    /// `I915_TILING_NONE`
    None = 0,

    /// `I915_TILING_X`
    X = 1,

    /// `I915_TILING_Y`
    Y = 2,

    /// `I915_TILING_4`
    Tile4 = 9,
}

/// The modifiers a hardware generation supports, from most to least preferred.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModifierOrder {
    order: SmallVec<[Modifier; 4]>,
}

impl ModifierOrder {
    /// Returns the order for the given graphics version, where `gen_x10` is
    /// `graphics_version * 10 + sub_version`.
    pub fn for_generation(graphics_version: u32, gen_x10: u32) -> Self {
        let order: &[Modifier] = if gen_x10 >= 125 {
            &[
                Modifier::Tiled4MtlRcCcs,
                Modifier::Tiled4,
                Modifier::XTiled,
                Modifier::Linear,
            ]
        } else if graphics_version == 12 {
            &[
                Modifier::YTiledGen12RcCcs,
                Modifier::YTiled,
                Modifier::XTiled,
                Modifier::Linear,
            ]
        } else if graphics_version == 11 {
            &[Modifier::YTiled, Modifier::XTiled, Modifier::Linear]
        } else {
            &[
                Modifier::YTiledCcs,
                Modifier::YTiled,
                Modifier::XTiled,
                Modifier::Linear,
            ]
        };

        ModifierOrder {
            order: SmallVec::from_slice(order),
        }
    }

    /// Returns the modifiers, most preferred first.
    #[inline]
    pub fn as_slice(&self) -> &[Modifier] {
        &self.order
    }

    #[inline]
    pub fn contains(&self, modifier: Modifier) -> bool {
        self.order.contains(&modifier)
    }

    /// Returns the most preferred modifier that also appears in `client`.
    pub fn pick(&self, client: &[Modifier]) -> Option<Modifier> {
        self.order
            .iter()
            .copied()
            .find(|modifier| client.contains(modifier))
    }
}
