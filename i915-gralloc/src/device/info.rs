//! The generation of Intel GPUs, by PCI device id.

/// Generation information of an Intel GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuInfo {
    /// The major graphics IP version, for example 12 for Tiger Lake.
    pub graphics_version: u32,

    /// The minor graphics IP version, for example 5 for DG2 (Xe-HPG, version 12.5).
    pub sub_version: u32,

    /// Whether the display engine is Xe-LPD or newer.
    pub is_xelpd: bool,
}

impl GpuInfo {
    const fn new(graphics_version: u32, sub_version: u32, is_xelpd: bool) -> Self {
        GpuInfo {
            graphics_version,
            sub_version,
            is_xelpd,
        }
    }

    /// Looks up the GPU with the given PCI device id.
    pub fn from_device_id(device_id: u16) -> Option<Self> {
        FAMILIES
            .iter()
            .find(|(_, ids)| ids.contains(&device_id))
            .map(|&(info, _)| info)
    }

    /// Returns `graphics_version * 10 + sub_version`.
    #[inline]
    pub const fn gen_x10(&self) -> u32 {
        self.graphics_version * 10 + self.sub_version
    }
}

const GEN8: GpuInfo = GpuInfo::new(8, 0, false);
const GEN9: GpuInfo = GpuInfo::new(9, 0, false);
const GEN11: GpuInfo = GpuInfo::new(11, 0, false);
const GEN12: GpuInfo = GpuInfo::new(12, 0, false);
const GEN12_XELPD: GpuInfo = GpuInfo::new(12, 0, true);
const XE_HPG: GpuInfo = GpuInfo::new(12, 5, false);
const XE_LPG: GpuInfo = GpuInfo::new(14, 0, true);

static FAMILIES: &[(GpuInfo, &[u16])] = &[
    // Broadwell
    (
        GEN8,
        &[
            0x1602, 0x1606, 0x160a, 0x160b, 0x160d, 0x160e, 0x1612, 0x1616, 0x161a, 0x161b,
            0x161d, 0x161e, 0x1622, 0x1626, 0x162a, 0x162b, 0x162d, 0x162e,
        ],
    ),
    // Cherryview
    (GEN8, &[0x22b0, 0x22b1, 0x22b2, 0x22b3]),
    // Skylake
    (
        GEN9,
        &[
            0x1902, 0x1906, 0x190a, 0x190b, 0x190e, 0x1912, 0x1913, 0x1915, 0x1916, 0x1917,
            0x191a, 0x191b, 0x191d, 0x191e, 0x1921, 0x1923, 0x1926, 0x1927, 0x192a, 0x192b,
            0x192d, 0x1932, 0x193a, 0x193b, 0x193d,
        ],
    ),
    // Broxton, Apollo Lake and Gemini Lake
    (GEN9, &[0x0a84, 0x1a84, 0x1a85, 0x5a84, 0x5a85, 0x3184, 0x3185]),
    // Kaby Lake
    (
        GEN9,
        &[
            0x5902, 0x5906, 0x5908, 0x590a, 0x590b, 0x590e, 0x5912, 0x5913, 0x5915, 0x5916,
            0x5917, 0x591a, 0x591b, 0x591c, 0x591d, 0x591e, 0x5921, 0x5923, 0x5926, 0x5927,
            0x593b, 0x87c0, 0x87ca,
        ],
    ),
    // Coffee Lake and Comet Lake
    (
        GEN9,
        &[
            0x3e90, 0x3e91, 0x3e92, 0x3e93, 0x3e94, 0x3e96, 0x3e98, 0x3e99, 0x3e9a, 0x3e9b,
            0x3e9c, 0x3ea0, 0x3ea1, 0x3ea2, 0x3ea3, 0x3ea4, 0x3ea5, 0x3ea6, 0x3ea7, 0x3ea8,
            0x3ea9, 0x9b21, 0x9b41, 0x9ba2, 0x9ba4, 0x9ba5, 0x9ba8, 0x9baa, 0x9bac, 0x9bc2,
            0x9bc4, 0x9bc5, 0x9bc6, 0x9bc8, 0x9bca, 0x9bcc, 0x9be6, 0x9bf6,
        ],
    ),
    // Ice Lake
    (
        GEN11,
        &[
            0x8a50, 0x8a51, 0x8a52, 0x8a53, 0x8a54, 0x8a56, 0x8a57, 0x8a58, 0x8a59, 0x8a5a,
            0x8a5b, 0x8a5c, 0x8a5d, 0x8a71,
        ],
    ),
    // Elkhart Lake and Jasper Lake
    (
        GEN11,
        &[
            0x4500, 0x4541, 0x4551, 0x4555, 0x4557, 0x4571, 0x4e51, 0x4e55, 0x4e57, 0x4e61,
            0x4e71,
        ],
    ),
    // Tiger Lake
    (
        GEN12,
        &[
            0x9a40, 0x9a49, 0x9a59, 0x9a60, 0x9a68, 0x9a70, 0x9a78, 0x9ac0, 0x9ac9, 0x9ad9,
            0x9af8,
        ],
    ),
    // Rocket Lake
    (GEN12, &[0x4c80, 0x4c8a, 0x4c8b, 0x4c8c, 0x4c90, 0x4c9a]),
    // DG1
    (GEN12, &[0x4905, 0x4906, 0x4907, 0x4908, 0x4909]),
    // Alder Lake S and Raptor Lake S
    (
        GEN12,
        &[
            0x4680, 0x4682, 0x4688, 0x468a, 0x468b, 0x4690, 0x4692, 0x4693, 0xa780, 0xa781,
            0xa782, 0xa783, 0xa788, 0xa789, 0xa78a, 0xa78b,
        ],
    ),
    // Alder Lake P, Alder Lake N and Raptor Lake P
    (
        GEN12_XELPD,
        &[
            0x46a0, 0x46a1, 0x46a2, 0x46a3, 0x46a6, 0x46a8, 0x46aa, 0x462a, 0x4626, 0x4628,
            0x46b0, 0x46b1, 0x46b2, 0x46b3, 0x46c0, 0x46c1, 0x46c2, 0x46c3, 0x46d0, 0x46d1,
            0x46d2, 0xa720, 0xa721, 0xa7a0, 0xa7a1, 0xa7a8, 0xa7a9,
        ],
    ),
    // DG2 and Arctic Sound-M
    (
        XE_HPG,
        &[
            0x5690, 0x5691, 0x5692, 0x5693, 0x5694, 0x5695, 0x5696, 0x5697, 0x56a0, 0x56a1,
            0x56a2, 0x56a3, 0x56a4, 0x56a5, 0x56a6, 0x56b0, 0x56b1, 0x56b2, 0x56b3, 0x56ba,
            0x56bb, 0x56bc, 0x56bd, 0x56c0, 0x56c1,
        ],
    ),
    // Meteor Lake
    (
        XE_LPG,
        &[
            0x7d40, 0x7d41, 0x7d45, 0x7d51, 0x7d55, 0x7d60, 0x7d67, 0x7dd1, 0x7dd5,
        ],
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup() {
        assert_eq!(GpuInfo::from_device_id(0x9a49), Some(GEN12));
        assert_eq!(GpuInfo::from_device_id(0x5912), Some(GEN9));
        assert_eq!(GpuInfo::from_device_id(0x46a6), Some(GEN12_XELPD));
        assert_eq!(GpuInfo::from_device_id(0x56a0).map(|info| info.gen_x10()), Some(125));
        assert_eq!(GpuInfo::from_device_id(0x7d55).map(|info| info.gen_x10()), Some(140));
        assert_eq!(GpuInfo::from_device_id(0x1616).map(|info| info.graphics_version), Some(8));
        assert_eq!(GpuInfo::from_device_id(0x0000), None);
    }

    #[test]
    fn ids_are_unique() {
        let mut ids: Vec<u16> = FAMILIES.iter().flat_map(|(_, ids)| ids.iter().copied()).collect();
        let count = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), count);
    }
}
