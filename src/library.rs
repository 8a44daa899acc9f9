//! Native library handles.
//!
//! This module wraps the platform dynamic loader (`dlopen`/`dlsym`) to open a
//! shared library, or the current process image, and look up exported
//! symbols by name. A failed lookup is an absent address rather than an
//! error, since a missing symbol means a missing capability.

use crate::{Error, Result};
use std::ffi::{CStr, CString, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr::NonNull;
use tracing::{debug, trace};

/// Platform default name of the Vulkan loader library.
#[cfg(target_os = "android")]
pub const DEFAULT_LIBRARY: &str = "libvulkan.so";

/// Platform default name of the Vulkan loader library.
#[cfg(target_os = "macos")]
pub const DEFAULT_LIBRARY: &str = "libvulkan.1.dylib";

/// Platform default name of the Vulkan loader library.
#[cfg(not(any(target_os = "android", target_os = "macos")))]
pub const DEFAULT_LIBRARY: &str = "libvulkan.so.1";

/// An open native library.
///
/// The handle is closed when the value is dropped.
pub struct NativeLibrary {
    handle: NonNull<c_void>,
    name: String,
}

// SAFETY: dlopen handles are process-global and dlsym/dlclose are threadsafe.
unsafe impl Send for NativeLibrary {}
unsafe impl Sync for NativeLibrary {}

impl NativeLibrary {
    /// Open the shared library at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<NativeLibrary> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| Error::LibraryOpen {
            path: name.clone(),
            reason: "path contains null byte".to_string(),
        })?;
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        Self::from_raw(handle, name)
    }

    /// Open the image of the current process.
    ///
    /// Symbols linked into the executable, or into libraries it already
    /// loaded globally, are visible through this handle.
    pub fn current_process() -> Result<NativeLibrary> {
        let handle = unsafe { libc::dlopen(std::ptr::null(), libc::RTLD_NOW) };
        Self::from_raw(handle, "<current process>".to_string())
    }

    fn from_raw(handle: *mut c_void, name: String) -> Result<NativeLibrary> {
        match NonNull::new(handle) {
            Some(handle) => {
                debug!("Opened {} for symbol resolution", name);
                Ok(Self { handle, name })
            }
            None => Err(Error::LibraryOpen {
                path: name,
                reason: last_dl_error(),
            }),
        }
    }

    /// Name the library was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an exported symbol.
    ///
    /// Returns `None` if the symbol is not exported or the name contains an
    /// interior null byte.
    pub fn resolve(&self, symbol: &str) -> Option<NonNull<c_void>> {
        let c_symbol = CString::new(symbol).ok()?;
        let addr = unsafe { libc::dlsym(self.handle.as_ptr(), c_symbol.as_ptr()) };
        trace!("Resolved {} in {} to {:p}", symbol, self.name, addr);
        NonNull::new(addr)
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle.as_ptr());
        }
    }
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .finish()
    }
}

fn last_dl_error() -> String {
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        "unknown dynamic loader error".to_string()
    } else {
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}
