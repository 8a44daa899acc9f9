//! Vulkan handle wrapper.

use ash::vk::{self, Handle};
use std::fmt;

type Destroyer<T> = Box<dyn FnOnce(T) + Send + Sync>;

/// A Vulkan handle paired with an optional destroyer.
///
/// Wrappers used as lookup keys carry no destroyer and never destroy the
/// handle. When a destroyer is present it runs exactly once, on drop or
/// [`reset`](Self::reset), and only for a non-null handle.
pub struct VulkanHandle<T: Handle + Copy> {
    handle: T,
    destroyer: Option<Destroyer<T>>,
}

impl<T: Handle + Copy> VulkanHandle<T> {
    /// Wrap a handle without taking ownership of it.
    pub fn new(handle: T) -> Self {
        Self {
            handle,
            destroyer: None,
        }
    }

    /// Wrap a handle that is destroyed by `destroyer` when the wrapper goes away.
    pub fn with_destroyer(handle: T, destroyer: impl FnOnce(T) + Send + Sync + 'static) -> Self {
        Self {
            handle,
            destroyer: Some(Box::new(destroyer)),
        }
    }

    /// A wrapper around the null handle.
    pub fn null() -> Self {
        Self::new(T::from_raw(0))
    }

    pub fn get(&self) -> T {
        self.handle
    }

    pub fn is_valid(&self) -> bool {
        self.handle.as_raw() != 0
    }

    /// Whether dropping this wrapper destroys the handle.
    pub fn owns_handle(&self) -> bool {
        self.destroyer.is_some()
    }

    /// Destroy the handle now and leave the wrapper null.
    pub fn reset(&mut self) {
        let handle = std::mem::replace(&mut self.handle, T::from_raw(0));
        if let Some(destroyer) = self.destroyer.take() {
            if handle.as_raw() != 0 {
                destroyer(handle);
            }
        }
    }

    /// Give up ownership: return the handle without destroying it.
    pub fn release(mut self) -> T {
        self.destroyer = None;
        std::mem::replace(&mut self.handle, T::from_raw(0))
    }
}

impl<T: Handle + Copy> Drop for VulkanHandle<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: Handle + Copy> Default for VulkanHandle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: Handle + Copy> From<T> for VulkanHandle<T> {
    fn from(handle: T) -> Self {
        Self::new(handle)
    }
}

impl<T: Handle + Copy> PartialEq for VulkanHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.handle.as_raw() == other.handle.as_raw()
    }
}

impl<T: Handle + Copy> Eq for VulkanHandle<T> {}

impl<T: Handle + Copy> fmt::Debug for VulkanHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanHandle")
            .field("type", &T::TYPE)
            .field("raw", &format_args!("0x{:x}", self.handle.as_raw()))
            .field("owned", &self.destroyer.is_some())
            .finish()
    }
}

/// Key wrapper for the null instance used by loader-level lookups.
pub(crate) fn null_instance() -> VulkanHandle<vk::Instance> {
    VulkanHandle::null()
}
