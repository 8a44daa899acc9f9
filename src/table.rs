//! The Vulkan proc table.
//!
//! A [`ProcTable`] is built in three steps, one per tier:
//!
//! 1. Construction opens the loader library (or takes an injected
//!    `vkGetInstanceProcAddr`) and resolves the loader-level procs.
//! 2. [`ProcTable::setup_instance_procs`] resolves instance-level procs once
//!    an instance exists.
//! 3. [`ProcTable::setup_device_procs`] resolves device-level procs through
//!    `vkGetDeviceProcAddr` once a device exists.
//!
//! Each tier either resolves all of its mandatory procs or is left untouched.
//! The table keys lookups by one instance and one device, set once.

use crate::handle::{self, VulkanHandle};
use crate::library::{self, NativeLibrary};
use crate::platform::BuildProfile;
use crate::procs::{DeviceProcs, InstanceProcs, LoaderProcs, resolve_procs};
use crate::sync::{self, QueueSync};
use crate::{Error, Result, Tier};
use ash::vk;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use tracing::{debug, error, trace, warn};

type VoidFn = unsafe extern "system" fn();

#[cfg(feature = "link-static")]
#[link(name = "vulkan")]
unsafe extern "system" {
    fn vkGetInstanceProcAddr(
        instance: vk::Instance,
        p_name: *const std::ffi::c_char,
    ) -> vk::PFN_vkVoidFunction;
}

/// Configuration for building a [`ProcTable`].
pub struct ProcTableBuilder {
    library_path: Option<PathBuf>,
    get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    profile: BuildProfile,
}

impl ProcTableBuilder {
    pub fn new() -> Self {
        Self {
            library_path: None,
            get_instance_proc_addr: None,
            profile: BuildProfile::current(),
        }
    }

    /// Load the loader library from `path` instead of the platform default.
    pub fn library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    /// Use an already resolved `vkGetInstanceProcAddr` and open no library.
    ///
    /// Takes precedence over [`library_path`](Self::library_path).
    pub fn get_instance_proc_addr(mut self, proc_addr: vk::PFN_vkGetInstanceProcAddr) -> Self {
        self.get_instance_proc_addr = Some(proc_addr);
        self
    }

    /// Override which platform procs are mandatory. Defaults to the build
    /// configuration.
    pub fn profile(mut self, profile: BuildProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Build the table and resolve the loader-level procs.
    ///
    /// Never fails: check [`ProcTable::has_acquired_mandatory_procs`] and
    /// [`ProcTable::bootstrap_error`].
    pub fn build(self) -> ProcTable {
        let mut table = ProcTable {
            library: None,
            get_instance_proc_addr: None,
            acquired_mandatory_procs: false,
            bootstrap_error: None,
            profile: self.profile,
            loader: LoaderProcs::default(),
            instance_procs: InstanceProcs::default(),
            device_procs: DeviceProcs::default(),
            instance: VulkanHandle::null(),
            device: VulkanHandle::null(),
        };

        let result = match self.get_instance_proc_addr {
            Some(proc_addr) => {
                table.get_instance_proc_addr = Some(proc_addr);
                table.setup_loader_procs()
            }
            None => {
                let path = self
                    .library_path
                    .unwrap_or_else(|| PathBuf::from(library::DEFAULT_LIBRARY));
                table.bootstrap(&path)
            }
        };

        match result {
            Ok(()) => {
                debug!("Acquired mandatory Vulkan loader procs");
                table.acquired_mandatory_procs = true;
            }
            Err(e) => table.bootstrap_error = Some(e),
        }
        table
    }
}

impl Default for ProcTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolved Vulkan function pointers for one instance and one device.
#[derive(Debug)]
pub struct ProcTable {
    library: Option<NativeLibrary>,
    get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    acquired_mandatory_procs: bool,
    bootstrap_error: Option<Error>,
    profile: BuildProfile,
    loader: LoaderProcs,
    instance_procs: InstanceProcs,
    device_procs: DeviceProcs,
    instance: VulkanHandle<vk::Instance>,
    device: VulkanHandle<vk::Device>,
}

impl ProcTable {
    /// Load the platform default Vulkan library.
    pub fn new() -> Self {
        ProcTableBuilder::new().build()
    }

    /// Load the Vulkan library at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        ProcTableBuilder::new().library_path(path).build()
    }

    /// Use an already resolved `vkGetInstanceProcAddr`.
    pub fn with_get_instance_proc_addr(proc_addr: vk::PFN_vkGetInstanceProcAddr) -> Self {
        ProcTableBuilder::new()
            .get_instance_proc_addr(proc_addr)
            .build()
    }

    pub fn builder() -> ProcTableBuilder {
        ProcTableBuilder::new()
    }

    pub fn has_acquired_mandatory_procs(&self) -> bool {
        self.acquired_mandatory_procs
    }

    /// Why construction did not acquire the mandatory procs, if it did not.
    pub fn bootstrap_error(&self) -> Option<&Error> {
        self.bootstrap_error.as_ref()
    }

    /// Both the instance and the device tier are set up.
    pub fn is_valid(&self) -> bool {
        self.instance.is_valid() && self.device.is_valid()
    }

    pub fn are_instance_procs_setup(&self) -> bool {
        self.instance.is_valid()
    }

    pub fn are_device_procs_setup(&self) -> bool {
        self.device.is_valid()
    }

    pub fn profile(&self) -> &BuildProfile {
        &self.profile
    }

    pub fn get_instance_proc_addr(&self) -> Option<vk::PFN_vkGetInstanceProcAddr> {
        self.get_instance_proc_addr
    }

    pub fn loader(&self) -> &LoaderProcs {
        &self.loader
    }

    pub fn instance_procs(&self) -> &InstanceProcs {
        &self.instance_procs
    }

    pub fn device_procs(&self) -> &DeviceProcs {
        &self.device_procs
    }

    /// Instance the instance tier was resolved for, null until set up.
    pub fn instance_handle(&self) -> &VulkanHandle<vk::Instance> {
        &self.instance
    }

    /// Device the device tier was resolved for, null until set up.
    pub fn device_handle(&self) -> &VulkanHandle<vk::Device> {
        &self.device
    }

    fn bootstrap(&mut self, path: &Path) -> Result<()> {
        self.open_library_handle(path)?;
        self.setup_get_instance_proc_addr()?;
        self.setup_loader_procs()
    }

    fn open_library_handle(&mut self, path: &Path) -> Result<()> {
        #[cfg(feature = "link-static")]
        let library = NativeLibrary::current_process();
        #[cfg(not(feature = "link-static"))]
        let library = NativeLibrary::open(path);

        match library {
            Ok(library) => {
                self.library = Some(library);
                Ok(())
            }
            Err(e) => {
                error!("Could not open Vulkan library handle: {}", path.display());
                Err(e)
            }
        }
    }

    fn setup_get_instance_proc_addr(&mut self) -> Result<()> {
        if self.library.is_none() {
            return Ok(());
        }
        self.get_instance_proc_addr = self.native_get_instance_proc_addr();
        if self.get_instance_proc_addr.is_none() {
            warn!("Could not acquire vkGetInstanceProcAddr");
            return Err(Error::MissingEntryPoint("vkGetInstanceProcAddr"));
        }
        Ok(())
    }

    #[cfg(feature = "link-static")]
    fn native_get_instance_proc_addr(&self) -> Option<vk::PFN_vkGetInstanceProcAddr> {
        self.get_instance_proc_addr.or(Some(vkGetInstanceProcAddr))
    }

    #[cfg(not(feature = "link-static"))]
    fn native_get_instance_proc_addr(&self) -> Option<vk::PFN_vkGetInstanceProcAddr> {
        if self.get_instance_proc_addr.is_some() {
            return self.get_instance_proc_addr;
        }
        let addr = self.library.as_ref()?.resolve("vkGetInstanceProcAddr")?;
        // SAFETY: the loader exports vkGetInstanceProcAddr with this signature.
        Some(unsafe {
            std::mem::transmute::<*mut std::ffi::c_void, vk::PFN_vkGetInstanceProcAddr>(addr.as_ptr())
        })
    }

    fn setup_loader_procs(&mut self) -> Result<()> {
        let null_instance = handle::null_instance();
        let resolved = resolve_procs(LoaderProcs::DESCRIPTORS, Tier::Loader, &self.profile, |name| {
            self.acquire_instance_proc(name, &null_instance)
        })
        .into_result(Tier::Loader)?;
        self.loader = LoaderProcs::from_resolved(&resolved);
        Ok(())
    }

    /// Resolve the instance-level procs for `instance`.
    ///
    /// Fails with every unresolved mandatory name, leaving the instance tier
    /// unset. Debug report procs are optional; check
    /// [`InstanceProcs::has_debug_report`] before use.
    pub fn setup_instance_procs(&mut self, instance: &VulkanHandle<vk::Instance>) -> Result<()> {
        if self.instance.is_valid() {
            return Err(Error::AlreadySetUp(Tier::Instance));
        }
        if !instance.is_valid() {
            return Err(Error::NullHandle(Tier::Instance));
        }
        if self.get_instance_proc_addr.is_none() {
            return Err(Error::MissingEntryPoint("vkGetInstanceProcAddr"));
        }

        let resolved = resolve_procs(
            InstanceProcs::DESCRIPTORS,
            Tier::Instance,
            &self.profile,
            |name| self.acquire_instance_proc(name, instance),
        )
        .into_result(Tier::Instance)?;

        self.instance_procs = InstanceProcs::from_resolved(&resolved);
        self.instance = VulkanHandle::new(instance.get());
        debug!(
            "Set up {} instance procs, debug report available: {}",
            self.instance_procs.resolved_count(),
            self.instance_procs.has_debug_report()
        );
        Ok(())
    }

    /// Resolve the device-level procs for `device`.
    ///
    /// Requires the instance tier. Fails with every unresolved mandatory
    /// name, leaving the device tier unset.
    pub fn setup_device_procs(&mut self, device: &VulkanHandle<vk::Device>) -> Result<()> {
        if self.device.is_valid() {
            return Err(Error::AlreadySetUp(Tier::Device));
        }
        if !device.is_valid() {
            return Err(Error::NullHandle(Tier::Device));
        }
        if self.instance_procs.get_device_proc_addr.is_none() {
            return Err(Error::InstanceNotSetUp);
        }

        let resolved = resolve_procs(
            DeviceProcs::DESCRIPTORS,
            Tier::Device,
            &self.profile,
            |name| self.acquire_device_proc(name, device),
        )
        .into_result(Tier::Device)?;

        self.device_procs = DeviceProcs::from_resolved(&resolved);
        self.device = VulkanHandle::new(device.get());
        debug!("Set up {} device procs", self.device_procs.resolved_count());
        Ok(())
    }

    /// Look up `name` through `vkGetInstanceProcAddr`.
    ///
    /// A null `instance` is accepted, for procs that exist before any
    /// instance does.
    pub fn acquire_instance_proc(
        &self,
        name: &str,
        instance: &VulkanHandle<vk::Instance>,
    ) -> vk::PFN_vkVoidFunction {
        let get_instance_proc_addr = self.get_instance_proc_addr?;
        let c_name = CString::new(name).ok()?;
        let addr = unsafe { get_instance_proc_addr(instance.get(), c_name.as_ptr()) };
        trace!("vkGetInstanceProcAddr({}) -> {}", name, addr.is_some());
        addr
    }

    /// Look up `name` through `vkGetDeviceProcAddr`.
    ///
    /// Absent if `device` is null or the instance tier is not set up.
    pub fn acquire_device_proc(
        &self,
        name: &str,
        device: &VulkanHandle<vk::Device>,
    ) -> vk::PFN_vkVoidFunction {
        if !device.is_valid() {
            return None;
        }
        let get_device_proc_addr = self.instance_procs.get_device_proc_addr?;
        let c_name = CString::new(name).ok()?;
        let addr = unsafe { get_device_proc_addr(device.get(), c_name.as_ptr()) };
        trace!("vkGetDeviceProcAddr({}) -> {}", name, addr.is_some());
        addr
    }

    /// Threadsafe replacement for `vkQueueSubmit` of `device`.
    ///
    /// Registers the real proc with [`QueueSync::global`] and returns
    /// [`sync::queue_submit_threadsafe`]. Absent if the device is null, the
    /// resolvers are unset, or the device has no `vkQueueSubmit`.
    pub fn acquire_threadsafe_queue_submit(
        &self,
        device: &VulkanHandle<vk::Device>,
    ) -> vk::PFN_vkVoidFunction {
        let real = self.real_queue_submit(device)?;
        QueueSync::global().register_queue_submit(real);
        let shim: vk::PFN_vkQueueSubmit = sync::queue_submit_threadsafe;
        Some(unsafe { std::mem::transmute::<vk::PFN_vkQueueSubmit, VoidFn>(shim) })
    }

    /// Threadsafe replacement for `vkQueueWaitIdle` of `device`.
    ///
    /// Shares its mutex with [`acquire_threadsafe_queue_submit`](Self::acquire_threadsafe_queue_submit).
    pub fn acquire_threadsafe_queue_wait_idle(
        &self,
        device: &VulkanHandle<vk::Device>,
    ) -> vk::PFN_vkVoidFunction {
        let real = self.real_queue_wait_idle(device)?;
        QueueSync::global().register_queue_wait_idle(real);
        let shim: vk::PFN_vkQueueWaitIdle = sync::queue_wait_idle_threadsafe;
        Some(unsafe { std::mem::transmute::<vk::PFN_vkQueueWaitIdle, VoidFn>(shim) })
    }

    /// Register the real queue procs of `device` with a caller-owned context.
    pub fn bind_queue_sync(&self, sync: &QueueSync, device: &VulkanHandle<vk::Device>) -> Result<()> {
        if !device.is_valid() {
            return Err(Error::NullHandle(Tier::Device));
        }
        if self.instance_procs.get_device_proc_addr.is_none() {
            return Err(Error::InstanceNotSetUp);
        }
        let submit = self.real_queue_submit(device);
        let wait_idle = self.real_queue_wait_idle(device);
        match (submit, wait_idle) {
            (Some(submit), Some(wait_idle)) => {
                sync.register_queue_submit(submit);
                sync.register_queue_wait_idle(wait_idle);
                Ok(())
            }
            (submit, wait_idle) => {
                let mut names = Vec::new();
                if submit.is_none() {
                    names.push("vkQueueSubmit");
                }
                if wait_idle.is_none() {
                    names.push("vkQueueWaitIdle");
                }
                Err(Error::MissingProcs {
                    tier: Tier::Device,
                    names,
                })
            }
        }
    }

    fn real_queue_submit(&self, device: &VulkanHandle<vk::Device>) -> Option<vk::PFN_vkQueueSubmit> {
        if self.get_instance_proc_addr.is_none() {
            return None;
        }
        let addr = self.acquire_device_proc("vkQueueSubmit", device)?;
        // SAFETY: vkQueueSubmit has this signature.
        Some(unsafe { std::mem::transmute::<VoidFn, vk::PFN_vkQueueSubmit>(addr) })
    }

    fn real_queue_wait_idle(
        &self,
        device: &VulkanHandle<vk::Device>,
    ) -> Option<vk::PFN_vkQueueWaitIdle> {
        if self.get_instance_proc_addr.is_none() {
            return None;
        }
        let addr = self.acquire_device_proc("vkQueueWaitIdle", device)?;
        // SAFETY: vkQueueWaitIdle has this signature.
        Some(unsafe { std::mem::transmute::<VoidFn, vk::PFN_vkQueueWaitIdle>(addr) })
    }
}

impl Default for ProcTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use ash::vk::Handle;
    use std::ffi::{CStr, c_char};

    unsafe extern "system" fn stub() {}

    // Resolves everything except Android surface creation.
    unsafe extern "system" fn no_android_surface(
        _instance: vk::Instance,
        p_name: *const c_char,
    ) -> vk::PFN_vkVoidFunction {
        let name = unsafe { CStr::from_ptr(p_name) };
        if name == c"vkCreateAndroidSurfaceKHR" {
            None
        } else {
            Some(stub as VoidFn)
        }
    }

    unsafe extern "system" fn resolves_nothing(
        _instance: vk::Instance,
        _p_name: *const c_char,
    ) -> vk::PFN_vkVoidFunction {
        None
    }

    #[test]
    fn injected_entry_point_skips_library() {
        let table = ProcTable::with_get_instance_proc_addr(no_android_surface);
        assert!(table.has_acquired_mandatory_procs());
        assert!(table.bootstrap_error().is_none());
        assert!(table.library.is_none());
        assert_eq!(table.loader().resolved_count(), 3);
    }

    #[test]
    fn unresolvable_loader_procs_are_reported() {
        let table = ProcTable::with_get_instance_proc_addr(resolves_nothing);
        assert!(!table.has_acquired_mandatory_procs());
        match table.bootstrap_error() {
            Some(Error::MissingProcs { tier, names }) => {
                assert_eq!(*tier, Tier::Loader);
                assert_eq!(names.len(), 3);
            }
            other => panic!("unexpected bootstrap result: {other:?}"),
        }
    }

    #[test]
    fn android_profile_requires_surface_procs() {
        let mut table = ProcTable::builder()
            .get_instance_proc_addr(no_android_surface)
            .profile(BuildProfile::generic().with_platform(Platform::Android))
            .build();
        let instance = VulkanHandle::new(vk::Instance::from_raw(0x1000));
        let err = table.setup_instance_procs(&instance).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingProcs { tier: Tier::Instance, ref names } if names == &["vkCreateAndroidSurfaceKHR"]
        ));
        assert!(!table.are_instance_procs_setup());
        assert!(table.instance_procs().create_device.is_none());
    }

    #[test]
    fn generic_profile_ignores_android_surface() {
        let mut table = ProcTable::builder()
            .get_instance_proc_addr(no_android_surface)
            .profile(BuildProfile::generic())
            .build();
        let instance = VulkanHandle::new(vk::Instance::from_raw(0x1000));
        table.setup_instance_procs(&instance).unwrap();
        assert!(table.are_instance_procs_setup());
        assert!(table.instance_procs().create_android_surface_khr.is_none());
    }
}
