//! Vulkan procs - a runtime entry point loader for Vulkan.
//!
//! The crate opens the Vulkan loader library (or accepts an already resolved
//! `vkGetInstanceProcAddr`), and resolves function pointers in three tiers:
//! loader-level procs usable before any instance exists, instance-level procs
//! and device-level procs. Mandatory procs either all resolve or the tier is
//! not set up; optional procs degrade gracefully.
//!
//! # Modules
//!
//! - [`library`] - Native library handles and symbol lookup
//! - [`handle`] - Vulkan handle wrapper with optional destroyer
//! - [`procs`] - Proc descriptors and the typed per-tier function tables
//! - [`platform`] - Build profile and platform extension requirements
//! - [`table`] - The proc table and its tiered acquisition
//! - [`sync`] - Threadsafe shims for `vkQueueSubmit` and `vkQueueWaitIdle`
//!
//! # Error Handling
//!
//! All fallible operations use the consolidated [`Error`] type.

use std::fmt;

pub mod handle;
pub mod library;
pub mod platform;
pub mod procs;
pub mod sync;
pub mod table;

pub use ash::vk;

pub use handle::VulkanHandle;
pub use library::NativeLibrary;
pub use platform::{BuildProfile, Platform};
pub use procs::{DeviceProcs, InstanceProcs, LoaderProcs, ProcDescriptor, Requirement};
pub use sync::QueueSync;
pub use table::{ProcTable, ProcTableBuilder};

/// Consolidated error type for all proc table operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not open Vulkan library handle {path}: {reason}")]
    LibraryOpen { path: String, reason: String },

    #[error("could not acquire {0}")]
    MissingEntryPoint(&'static str),

    #[error("missing mandatory {tier} procs: {}", .names.join(", "))]
    MissingProcs {
        tier: Tier,
        names: Vec<&'static str>,
    },

    #[error("{0} handle is null")]
    NullHandle(Tier),

    #[error("{0} procs are already set up")]
    AlreadySetUp(Tier),

    #[error("instance procs must be set up before device procs")]
    InstanceNotSetUp,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Resolution tier of a proc.
///
/// Loader procs are resolved with a null instance, instance procs with the
/// instance handle, and device procs through `vkGetDeviceProcAddr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Loader,
    Instance,
    Device,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Loader => "loader",
            Tier::Instance => "instance",
            Tier::Device => "device",
        };
        f.write_str(name)
    }
}
