//! Parameters that the host hands to the backend when it is created.

use crate::{macros::drm_bitflags, NonExhaustive};
use foldhash::HashMap;
use std::{env, fmt::Debug, sync::Arc};

/// The name of the process property that forces device-local allocations.
pub const FORCE_MEM_PROPERTY: &str = "sys.icr.gralloc.force_mem";

/// Parameters to create a new `Device`.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// Register Y-tiled NV12 and P010 buffers as scan-out capable.
    ///
    /// The default value is `true` if the `scanout-y-tiled` feature is enabled.
    pub scanout_y_tiled: bool,

    /// Register 4-tiled NV12 and P010 buffers as scan-out capable.
    ///
    /// The default value is `true` if the `scanout-4-tiled` feature is enabled.
    pub scanout_4_tiled: bool,

    /// Align the stride of linear buffers to 256 bytes instead of 64, so that they can be
    /// imported by amdgpu.
    ///
    /// The default value is `true` if the `linear-align-256` feature is enabled.
    pub linear_align_256: bool,

    /// The kinds of GPUs present in the system, as seen by the host.
    ///
    /// The default value is empty.
    pub gpu_group: GpuGroupType,

    /// Whether the host allows compressed buffers.
    ///
    /// The default value is `true`.
    pub compression: bool,

    /// Where process properties are read from.
    ///
    /// The default value is [`EnvProperties`].
    pub properties: Arc<dyn PropertySource>,

    pub _ne: NonExhaustive,
}

impl Default for DeviceConfig {
    #[inline]
    fn default() -> Self {
        DeviceConfig {
            scanout_y_tiled: cfg!(feature = "scanout-y-tiled"),
            scanout_4_tiled: cfg!(feature = "scanout-4-tiled"),
            linear_align_256: cfg!(feature = "linear-align-256"),
            gpu_group: GpuGroupType::empty(),
            compression: true,
            properties: Arc::new(EnvProperties),
            _ne: NonExhaustive(()),
        }
    }
}

drm_bitflags! {
    /// The kinds of GPUs that share the system with this one.
    GpuGroupType = u32;

    /// An Intel integrated GPU is present.
    HAS_INTEL_IGPU = 1 << 0,

    /// An Intel discrete GPU is present.
    HAS_INTEL_DGPU = 1 << 1,

    /// A virtio GPU with blob resources is present.
    HAS_VIRTIO_GPU_BLOB = 1 << 2,

    /// A virtio GPU with blob resources that supports peer-to-peer transfers is present.
    HAS_VIRTIO_GPU_BLOB_P2P = 1 << 3,
}

/// A source of process-wide properties, such as Android system properties.
pub trait PropertySource: Debug + Send + Sync {
    /// Returns the value of the property `key`, or `None` if it isn't set.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads properties from environment variables.
///
/// The variable for a property is its key with dots replaced by underscores, upper-cased.
/// `sys.icr.gralloc.force_mem` is read from `SYS_ICR_GRALLOC_FORCE_MEM`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvProperties;

impl EnvProperties {
    fn variable_name(key: &str) -> String {
        key.chars()
            .map(|c| match c {
                '.' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect()
    }
}

impl PropertySource for EnvProperties {
    fn get(&self, key: &str) -> Option<String> {
        env::var(Self::variable_name(key)).ok()
    }
}

/// A fixed set of properties.
#[derive(Clone, Debug, Default)]
pub struct StaticProperties {
    values: HashMap<String, String>,
}

impl StaticProperties {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the property `key` to `value`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl PropertySource for StaticProperties {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Returns whether the properties ask for buffers to be placed in device-local memory.
///
/// An unset or empty property counts as `"local"`.
pub(crate) fn force_mem_local(properties: &dyn PropertySource) -> bool {
    properties
        .get(FORCE_MEM_PROPERTY)
        .filter(|value| !value.is_empty())
        .map_or(true, |value| value == "local")
}
