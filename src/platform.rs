//! Build profile and platform extension requirements.
//!
//! Which extension procs are mandatory depends on the platform the crate is
//! built for. The decision is made once, from the build configuration, into a
//! [`BuildProfile`]; the acquisition code only asks the profile whether a
//! platform-tagged proc is required for a given tier.

use crate::Tier;

/// Platform families with their own mandatory extension procs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Surface, swapchain and Android surface creation procs.
    Android,
    /// Zircon semaphore/memory handle and buffer collection procs.
    Fuchsia,
}

impl Platform {
    /// Platform family of the build target, if it has extension requirements.
    pub const fn current() -> Option<Platform> {
        if cfg!(target_os = "android") {
            Some(Platform::Android)
        } else if cfg!(target_os = "fuchsia") {
            Some(Platform::Fuchsia)
        } else {
            None
        }
    }
}

/// Build configuration that decides which platform procs are mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildProfile {
    /// Platform family whose extension procs are required.
    pub platform: Option<Platform>,

    /// Exclude platform swapchain procs from the device tier.
    pub test_procs: bool,
}

impl BuildProfile {
    pub const fn current() -> Self {
        Self {
            platform: Platform::current(),
            test_procs: cfg!(feature = "test-procs"),
        }
    }

    /// A profile with no platform extension requirements.
    pub const fn generic() -> Self {
        Self {
            platform: None,
            test_procs: false,
        }
    }

    pub const fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub const fn with_test_procs(mut self, test_procs: bool) -> Self {
        self.test_procs = test_procs;
        self
    }

    /// Whether procs tagged with `platform` are mandatory in `tier`.
    ///
    /// Device-tier swapchain procs are skipped under `test_procs`; the
    /// instance-tier surface procs are not.
    pub fn requires(&self, platform: Platform, tier: Tier) -> bool {
        if self.platform != Some(platform) {
            return false;
        }
        !(tier == Tier::Device && self.test_procs)
    }
}

impl Default for BuildProfile {
    fn default() -> Self {
        Self::current()
    }
}
