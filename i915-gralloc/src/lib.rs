//! Buffer allocation backend for Intel i915 GPUs, for gralloc-style buffer managers.
//!
//! # Brief summary
//!
//! - A [`KernelDevice`](crate::kernel::KernelDevice) is the channel to the kernel graphics
//!   driver. [`DrmFile`](crate::kernel::DrmFile) is the implementation backed by an open DRM
//!   render node.
//!
//! - The [`Device`](crate::device::Device) is created by probing a `KernelDevice` once. It
//!   records the GPU generation, its caches and memory regions, the kernel uAPI flavor, and the
//!   table of supported (format, usage, modifier) [combinations](crate::combination).
//!
//! - For every requested buffer, [`BufferMetadata::compute`](crate::buffer::BufferMetadata::compute)
//!   plans the layout: the tiling [`Modifier`](crate::modifier::Modifier), and per-plane
//!   strides, offsets and sizes.
//!
//! - [`Buffer::from_metadata`](crate::buffer::Buffer::from_metadata) turns a plan into a kernel
//!   allocation placed in system memory or VRAM, and [`Buffer::import`](crate::buffer::Buffer::import)
//!   adopts a buffer that was shared as dma-buf file descriptors.
//!
//! - [`Buffer::map`](crate::buffer::Buffer::map) creates a CPU [`Mapping`](crate::buffer::Mapping)
//!   with the right caching mode. Its `invalidate` and `flush` methods move the buffer between
//!   the CPU and GPU domains.
//!
//! - [`I915Backend`](crate::backend::I915Backend) wraps all of the above behind the
//!   [`Backend`](crate::backend::Backend) trait that a host buffer manager dispatches through.

use std::{
    borrow::Cow,
    error::Error,
    fmt::{Debug, Display, Error as FmtError, Formatter},
    io,
};

pub use self::{
    backend::{Backend, DriverFeature, I915Backend},
    buffer::{Buffer, BufferMetadata, BufferRequest, ImportInfo, Mapping},
    config::DeviceConfig,
    device::Device,
    format::DrmFormat,
    modifier::{Modifier, Tiling},
    usage::{BufferUsage, MapFlags},
};

mod macros;

pub mod backend;
pub mod buffer;
pub mod combination;
pub mod config;
pub mod device;
pub mod format;
pub mod kernel;
pub mod memory;
pub mod modifier;
pub mod usage;

/// Represents memory size and offset values of a buffer object.
pub type DeviceSize = u64;

/// The maximum number of planes a buffer can have.
pub const MAX_PLANES: usize = 4;

/// A kernel transaction that failed.
///
/// The errno reported by the kernel is preserved so that it can be handed back to the host
/// unchanged.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelError {
    /// The name of the transaction, for example `DRM_IOCTL_I915_GEM_CREATE`.
    pub request: &'static str,

    /// The errno the transaction failed with.
    pub errno: i32,
}

impl KernelError {
    #[inline]
    pub(crate) const fn new(request: &'static str, errno: i32) -> Self {
        KernelError { request, errno }
    }

    /// Builds a `KernelError` from the calling thread's current `errno`.
    #[inline]
    pub(crate) fn last_os_error(request: &'static str) -> Self {
        let errno = io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::EIO);

        KernelError { request, errno }
    }
}

impl Debug for KernelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{} failed with errno {}", self.request, self.errno)
    }
}

impl Display for KernelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "{} failed: {}",
            self.request,
            io::Error::from_raw_os_error(self.errno),
        )
    }
}

impl Error for KernelError {}

impl From<KernelError> for io::Error {
    #[inline]
    fn from(err: KernelError) -> Self {
        io::Error::from_raw_os_error(err.errno)
    }
}

/// A wrapper for error types of functions that can return validation errors.
#[derive(Clone)]
pub enum Validated<E> {
    /// A non-validation error occurred.
    Error(E),

    /// A validation error occurred.
    ValidationError(Box<ValidationError>),
}

impl<E> Validated<E> {
    /// Maps the inner `Error` value using the provided function, or does nothing if the value is
    /// `ValidationError`.
    #[inline]
    pub fn map<F>(self, f: impl FnOnce(E) -> F) -> Validated<F> {
        match self {
            Self::Error(err) => Validated::Error(f(err)),
            Self::ValidationError(err) => Validated::ValidationError(err),
        }
    }

    /// Returns the inner `Error` value, or panics if it contains `ValidationError`.
    #[inline(always)]
    #[track_caller]
    pub fn unwrap(self) -> E {
        match self {
            Self::Error(err) => err,
            Self::ValidationError(err) => {
                panic!(
                    "called `Validated::unwrap` on a `ValidationError` value: {:?}",
                    err
                )
            }
        }
    }

    /// Returns the inner `ValidationError`, or panics if it contains `Error`.
    #[inline(always)]
    #[track_caller]
    pub fn unwrap_validation(self) -> Box<ValidationError>
    where
        E: Debug,
    {
        match self {
            Self::Error(err) => {
                panic!(
                    "called `Validated::unwrap_validation` on an `Error` value: {:?}",
                    err
                )
            }
            Self::ValidationError(err) => err,
        }
    }

    /// Returns whether the value is a `ValidationError`.
    #[inline]
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::ValidationError(_))
    }
}

impl Validated<KernelError> {
    /// Returns the errno that a host expecting C-style error codes should see.
    ///
    /// Validation errors are reported as `EINVAL`.
    #[inline]
    pub fn errno(&self) -> i32 {
        match self {
            Self::Error(err) => err.errno,
            Self::ValidationError(_) => libc::EINVAL,
        }
    }
}

impl<E> Error for Validated<E>
where
    E: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Error(err) => Some(err),
            Self::ValidationError(err) => Some(err),
        }
    }
}

impl<E> Display for Validated<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Error(err) => Display::fmt(err, f),
            Self::ValidationError(err) => Display::fmt(err, f),
        }
    }
}

impl<E> Debug for Validated<E>
where
    E: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Error(err) => write!(f, "a non-validation error occurred: {:?}", err),
            Self::ValidationError(err) => write!(f, "a validation error occurred: {:?}", err),
        }
    }
}

impl<E> From<Box<ValidationError>> for Validated<E> {
    #[inline]
    fn from(err: Box<ValidationError>) -> Self {
        Self::ValidationError(err)
    }
}

impl From<KernelError> for Validated<KernelError> {
    #[inline]
    fn from(err: KernelError) -> Self {
        Self::Error(err)
    }
}

/// The arguments or the state of the device don't allow an operation to be performed.
///
/// This is the invalid-argument condition of the backend. The host sees it as `EINVAL`.
#[derive(Clone, Default)]
pub struct ValidationError {
    /// The context in which the problem exists, for example the name of an argument.
    pub context: Cow<'static, str>,

    /// A description of the problem.
    pub problem: Cow<'static, str>,
}

impl ValidationError {
    #[inline]
    pub(crate) fn new(
        context: impl Into<Cow<'static, str>>,
        problem: impl Into<Cow<'static, str>>,
    ) -> Box<Self> {
        Box::new(ValidationError {
            context: context.into(),
            problem: problem.into(),
        })
    }

    pub(crate) fn add_context(mut self: Box<Self>, context: impl Into<Cow<'static, str>>) -> Box<Self> {
        if self.context.is_empty() {
            self.context = context.into();
        } else {
            self.context = format!("{}.{}", context.into(), self.context).into();
        }

        self
    }
}

impl Debug for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        if self.context.is_empty() {
            write!(f, "{}", self.problem)
        } else {
            write!(f, "{}: {}", self.context, self.problem)
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        Debug::fmt(self, f)
    }
}

impl Error for ValidationError {}

/// A helper type for non-exhaustive structs.
///
/// This type cannot be constructed outside this crate. Structures with a field of this type can
/// only be constructed by calling a constructor function or `Default::default()`. The effect is
/// similar to the standard Rust `#[non_exhaustive]` attribute, except that it does not prevent
/// update syntax from being used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NonExhaustive(pub(crate) ());

/// Rounds `val` up to the nearest multiple of `alignment`, which must be a power of two.
#[inline]
pub(crate) const fn align_up(val: DeviceSize, alignment: DeviceSize) -> DeviceSize {
    align_down(val + alignment - 1, alignment)
}

#[inline]
pub(crate) const fn align_down(val: DeviceSize, alignment: DeviceSize) -> DeviceSize {
    debug_assert!(alignment.is_power_of_two());

    val & !(alignment - 1)
}

#[inline]
pub(crate) const fn is_aligned(val: DeviceSize, alignment: DeviceSize) -> bool {
    val & (alignment - 1) == 0
}

/// Rounds `val` up to the nearest multiple of `alignment`, which must be a power of two.
///
/// Returns `None` if the result doesn't fit in a `DeviceSize`.
#[inline]
pub(crate) const fn checked_align_up(val: DeviceSize, alignment: DeviceSize) -> Option<DeviceSize> {
    debug_assert!(alignment.is_power_of_two());

    match val.checked_add(alignment - 1) {
        Some(val) => Some(val & !(alignment - 1)),
        None => None,
    }
}

/// `checked_align_up` for 32-bit strides and heights.
///
/// Returns `None` if the result doesn't fit in a `u32`.
#[inline]
pub(crate) const fn checked_align_up_u32(val: u32, alignment: u32) -> Option<u32> {
    debug_assert!(alignment.is_power_of_two());

    match val.checked_add(alignment - 1) {
        Some(val) => Some(val & !(alignment - 1)),
        None => None,
    }
}
