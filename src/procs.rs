//! Proc descriptors and typed function tables.
//!
//! Every tier is declared once as a list of procs. The declaration produces
//! both the descriptor list that drives acquisition (name, fallback alias and
//! requirement of each proc) and a struct holding one strongly-typed
//! `Option<vk::PFN_*>` field per proc, where `None` means unavailable.

use crate::platform::{BuildProfile, Platform};
use crate::{Error, Result, Tier};
use ash::vk;
use std::collections::HashMap;
use tracing::{trace, warn};

/// How a failure to resolve a proc affects its tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// The tier fails if the proc does not resolve.
    Mandatory,
    /// Resolved best-effort; callers check for presence before use.
    Optional,
    /// Mandatory when building for the platform, skipped otherwise.
    Platform(Platform),
}

/// A proc to resolve by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcDescriptor {
    /// Primary name, and the slot the resolved address is stored under.
    pub name: &'static str,

    /// Alias tried when the primary name does not resolve.
    pub fallback: Option<&'static str>,

    pub requirement: Requirement,
}

const MANDATORY: Requirement = Requirement::Mandatory;
const OPTIONAL: Requirement = Requirement::Optional;
const ANDROID: Requirement = Requirement::Platform(Platform::Android);
const FUCHSIA: Requirement = Requirement::Platform(Platform::Fuchsia);

type VoidFn = unsafe extern "system" fn();

/// Addresses resolved for one tier, keyed by primary name.
#[derive(Default)]
pub(crate) struct ResolvedProcs {
    slots: HashMap<&'static str, VoidFn>,
    missing: Vec<&'static str>,
}

impl ResolvedProcs {
    pub(crate) fn get(&self, name: &str) -> Option<VoidFn> {
        self.slots.get(name).copied()
    }

    /// Fail with every unresolved mandatory name, or hand back the slots.
    pub(crate) fn into_result(self, tier: Tier) -> Result<Self> {
        if self.missing.is_empty() {
            Ok(self)
        } else {
            warn!("Could not acquire {} {} procs", self.missing.len(), tier);
            Err(Error::MissingProcs {
                tier,
                names: self.missing,
            })
        }
    }
}

/// Resolve `descriptors` through `resolve`.
///
/// All descriptors are attempted so the result carries the full list of
/// unresolved mandatory names.
pub(crate) fn resolve_procs(
    descriptors: &[ProcDescriptor],
    tier: Tier,
    profile: &BuildProfile,
    mut resolve: impl FnMut(&str) -> vk::PFN_vkVoidFunction,
) -> ResolvedProcs {
    let mut resolved = ResolvedProcs::default();
    for desc in descriptors {
        let mandatory = match desc.requirement {
            Requirement::Mandatory => true,
            Requirement::Optional => false,
            Requirement::Platform(platform) => {
                if !profile.requires(platform, tier) {
                    continue;
                }
                true
            }
        };

        let mut addr = resolve(desc.name);
        if addr.is_none() {
            if let Some(alias) = desc.fallback {
                addr = resolve(alias);
                if addr.is_some() {
                    trace!("Resolved {} through alias {}", desc.name, alias);
                }
            }
        }

        match addr {
            Some(addr) => {
                resolved.slots.insert(desc.name, addr);
            }
            None if mandatory => {
                warn!("Could not acquire mandatory proc {}", desc.name);
                resolved.missing.push(desc.name);
            }
            None => trace!("Optional proc {} is unavailable", desc.name),
        }
    }
    resolved
}

macro_rules! proc_table {
    (@fallback) => { None };
    (@fallback $alias:literal) => { Some($alias) };
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident: $pfn:ident = $proc:literal $(or $alias:literal)?, $req:expr;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name {
            $(
                $(#[$field_meta])*
                pub $field: Option<vk::$pfn>,
            )*
        }

        impl $name {
            /// Procs of this tier in acquisition order.
            pub const DESCRIPTORS: &'static [ProcDescriptor] = &[
                $(
                    ProcDescriptor {
                        name: $proc,
                        fallback: proc_table!(@fallback $($alias)?),
                        requirement: $req,
                    },
                )*
            ];

            pub(crate) fn from_resolved(resolved: &ResolvedProcs) -> Self {
                Self {
                    $(
                        // SAFETY: the loader returned this address for the
                        // named proc, whose signature is `vk::$pfn`.
                        $field: resolved
                            .get($proc)
                            .map(|addr| unsafe { std::mem::transmute::<VoidFn, vk::$pfn>(addr) }),
                    )*
                }
            }

            /// Number of procs that resolved.
            pub fn resolved_count(&self) -> usize {
                [$(self.$field.is_some()),*].iter().filter(|resolved| **resolved).count()
            }
        }
    };
}

proc_table! {
    /// Procs usable before an instance exists.
    pub struct LoaderProcs {
        create_instance: PFN_vkCreateInstance = "vkCreateInstance", MANDATORY;
        enumerate_instance_extension_properties: PFN_vkEnumerateInstanceExtensionProperties =
            "vkEnumerateInstanceExtensionProperties", MANDATORY;
        enumerate_instance_layer_properties: PFN_vkEnumerateInstanceLayerProperties =
            "vkEnumerateInstanceLayerProperties", MANDATORY;
    }
}

proc_table! {
    /// Procs resolved against an instance.
    pub struct InstanceProcs {
        create_device: PFN_vkCreateDevice = "vkCreateDevice", MANDATORY;
        destroy_device: PFN_vkDestroyDevice = "vkDestroyDevice", MANDATORY;
        destroy_instance: PFN_vkDestroyInstance = "vkDestroyInstance", MANDATORY;
        enumerate_device_layer_properties: PFN_vkEnumerateDeviceLayerProperties =
            "vkEnumerateDeviceLayerProperties", MANDATORY;
        enumerate_physical_devices: PFN_vkEnumeratePhysicalDevices =
            "vkEnumeratePhysicalDevices", MANDATORY;
        get_device_proc_addr: PFN_vkGetDeviceProcAddr = "vkGetDeviceProcAddr", MANDATORY;
        get_physical_device_features: PFN_vkGetPhysicalDeviceFeatures =
            "vkGetPhysicalDeviceFeatures", MANDATORY;
        get_physical_device_queue_family_properties: PFN_vkGetPhysicalDeviceQueueFamilyProperties =
            "vkGetPhysicalDeviceQueueFamilyProperties", MANDATORY;
        get_physical_device_properties: PFN_vkGetPhysicalDeviceProperties =
            "vkGetPhysicalDeviceProperties", MANDATORY;
        get_physical_device_memory_properties: PFN_vkGetPhysicalDeviceMemoryProperties =
            "vkGetPhysicalDeviceMemoryProperties", MANDATORY;
        get_physical_device_memory_properties2: PFN_vkGetPhysicalDeviceMemoryProperties2 =
            "vkGetPhysicalDeviceMemoryProperties2" or "vkGetPhysicalDeviceMemoryProperties2KHR", MANDATORY;

        get_physical_device_surface_capabilities_khr: PFN_vkGetPhysicalDeviceSurfaceCapabilitiesKHR =
            "vkGetPhysicalDeviceSurfaceCapabilitiesKHR", ANDROID;
        get_physical_device_surface_formats_khr: PFN_vkGetPhysicalDeviceSurfaceFormatsKHR =
            "vkGetPhysicalDeviceSurfaceFormatsKHR", ANDROID;
        get_physical_device_surface_present_modes_khr: PFN_vkGetPhysicalDeviceSurfacePresentModesKHR =
            "vkGetPhysicalDeviceSurfacePresentModesKHR", ANDROID;
        get_physical_device_surface_support_khr: PFN_vkGetPhysicalDeviceSurfaceSupportKHR =
            "vkGetPhysicalDeviceSurfaceSupportKHR", ANDROID;
        destroy_surface_khr: PFN_vkDestroySurfaceKHR = "vkDestroySurfaceKHR", ANDROID;
        create_android_surface_khr: PFN_vkCreateAndroidSurfaceKHR =
            "vkCreateAndroidSurfaceKHR", ANDROID;

        /// Only present when the debug report extension is available.
        create_debug_report_callback_ext: PFN_vkCreateDebugReportCallbackEXT =
            "vkCreateDebugReportCallbackEXT", OPTIONAL;
        /// Only present when the debug report extension is available.
        destroy_debug_report_callback_ext: PFN_vkDestroyDebugReportCallbackEXT =
            "vkDestroyDebugReportCallbackEXT", OPTIONAL;
    }
}

impl InstanceProcs {
    /// Both debug report hooks resolved.
    pub fn has_debug_report(&self) -> bool {
        self.create_debug_report_callback_ext.is_some()
            && self.destroy_debug_report_callback_ext.is_some()
    }
}

proc_table! {
    /// Procs resolved against a device through `vkGetDeviceProcAddr`.
    pub struct DeviceProcs {
        allocate_command_buffers: PFN_vkAllocateCommandBuffers = "vkAllocateCommandBuffers", MANDATORY;
        allocate_memory: PFN_vkAllocateMemory = "vkAllocateMemory", MANDATORY;
        begin_command_buffer: PFN_vkBeginCommandBuffer = "vkBeginCommandBuffer", MANDATORY;
        bind_image_memory: PFN_vkBindImageMemory = "vkBindImageMemory", MANDATORY;
        cmd_pipeline_barrier: PFN_vkCmdPipelineBarrier = "vkCmdPipelineBarrier", MANDATORY;
        create_command_pool: PFN_vkCreateCommandPool = "vkCreateCommandPool", MANDATORY;
        create_fence: PFN_vkCreateFence = "vkCreateFence", MANDATORY;
        create_image: PFN_vkCreateImage = "vkCreateImage", MANDATORY;
        create_semaphore: PFN_vkCreateSemaphore = "vkCreateSemaphore", MANDATORY;
        destroy_command_pool: PFN_vkDestroyCommandPool = "vkDestroyCommandPool", MANDATORY;
        destroy_fence: PFN_vkDestroyFence = "vkDestroyFence", MANDATORY;
        destroy_image: PFN_vkDestroyImage = "vkDestroyImage", MANDATORY;
        destroy_semaphore: PFN_vkDestroySemaphore = "vkDestroySemaphore", MANDATORY;
        device_wait_idle: PFN_vkDeviceWaitIdle = "vkDeviceWaitIdle", MANDATORY;
        end_command_buffer: PFN_vkEndCommandBuffer = "vkEndCommandBuffer", MANDATORY;
        free_command_buffers: PFN_vkFreeCommandBuffers = "vkFreeCommandBuffers", MANDATORY;
        free_memory: PFN_vkFreeMemory = "vkFreeMemory", MANDATORY;
        get_device_queue: PFN_vkGetDeviceQueue = "vkGetDeviceQueue", MANDATORY;
        get_image_memory_requirements: PFN_vkGetImageMemoryRequirements =
            "vkGetImageMemoryRequirements", MANDATORY;
        /// Not threadsafe; see [`crate::sync`].
        queue_submit: PFN_vkQueueSubmit = "vkQueueSubmit", MANDATORY;
        /// Not threadsafe; see [`crate::sync`].
        queue_wait_idle: PFN_vkQueueWaitIdle = "vkQueueWaitIdle", MANDATORY;
        reset_command_buffer: PFN_vkResetCommandBuffer = "vkResetCommandBuffer", MANDATORY;
        reset_fences: PFN_vkResetFences = "vkResetFences", MANDATORY;
        wait_for_fences: PFN_vkWaitForFences = "vkWaitForFences", MANDATORY;
        map_memory: PFN_vkMapMemory = "vkMapMemory", MANDATORY;
        unmap_memory: PFN_vkUnmapMemory = "vkUnmapMemory", MANDATORY;
        flush_mapped_memory_ranges: PFN_vkFlushMappedMemoryRanges =
            "vkFlushMappedMemoryRanges", MANDATORY;
        invalidate_mapped_memory_ranges: PFN_vkInvalidateMappedMemoryRanges =
            "vkInvalidateMappedMemoryRanges", MANDATORY;
        bind_buffer_memory: PFN_vkBindBufferMemory = "vkBindBufferMemory", MANDATORY;
        get_buffer_memory_requirements: PFN_vkGetBufferMemoryRequirements =
            "vkGetBufferMemoryRequirements", MANDATORY;
        create_buffer: PFN_vkCreateBuffer = "vkCreateBuffer", MANDATORY;
        destroy_buffer: PFN_vkDestroyBuffer = "vkDestroyBuffer", MANDATORY;
        cmd_copy_buffer: PFN_vkCmdCopyBuffer = "vkCmdCopyBuffer", MANDATORY;

        get_buffer_memory_requirements2: PFN_vkGetBufferMemoryRequirements2 =
            "vkGetBufferMemoryRequirements2" or "vkGetBufferMemoryRequirements2KHR", MANDATORY;
        get_image_memory_requirements2: PFN_vkGetImageMemoryRequirements2 =
            "vkGetImageMemoryRequirements2" or "vkGetImageMemoryRequirements2KHR", MANDATORY;
        bind_buffer_memory2: PFN_vkBindBufferMemory2 =
            "vkBindBufferMemory2" or "vkBindBufferMemory2KHR", MANDATORY;
        bind_image_memory2: PFN_vkBindImageMemory2 =
            "vkBindImageMemory2" or "vkBindImageMemory2KHR", MANDATORY;

        acquire_next_image_khr: PFN_vkAcquireNextImageKHR = "vkAcquireNextImageKHR", ANDROID;
        create_swapchain_khr: PFN_vkCreateSwapchainKHR = "vkCreateSwapchainKHR", ANDROID;
        destroy_swapchain_khr: PFN_vkDestroySwapchainKHR = "vkDestroySwapchainKHR", ANDROID;
        get_swapchain_images_khr: PFN_vkGetSwapchainImagesKHR = "vkGetSwapchainImagesKHR", ANDROID;
        queue_present_khr: PFN_vkQueuePresentKHR = "vkQueuePresentKHR", ANDROID;

        import_semaphore_zircon_handle_fuchsia: PFN_vkImportSemaphoreZirconHandleFUCHSIA =
            "vkImportSemaphoreZirconHandleFUCHSIA", FUCHSIA;
        get_semaphore_zircon_handle_fuchsia: PFN_vkGetSemaphoreZirconHandleFUCHSIA =
            "vkGetSemaphoreZirconHandleFUCHSIA", FUCHSIA;
        get_memory_zircon_handle_fuchsia: PFN_vkGetMemoryZirconHandleFUCHSIA =
            "vkGetMemoryZirconHandleFUCHSIA", FUCHSIA;
        create_buffer_collection_fuchsia: PFN_vkCreateBufferCollectionFUCHSIA =
            "vkCreateBufferCollectionFUCHSIA", FUCHSIA;
        destroy_buffer_collection_fuchsia: PFN_vkDestroyBufferCollectionFUCHSIA =
            "vkDestroyBufferCollectionFUCHSIA", FUCHSIA;
        set_buffer_collection_image_constraints_fuchsia: PFN_vkSetBufferCollectionImageConstraintsFUCHSIA =
            "vkSetBufferCollectionImageConstraintsFUCHSIA", FUCHSIA;
        get_buffer_collection_properties_fuchsia: PFN_vkGetBufferCollectionPropertiesFUCHSIA =
            "vkGetBufferCollectionPropertiesFUCHSIA", FUCHSIA;
    }
}
