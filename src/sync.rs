//! Threadsafe shims for `vkQueueSubmit` and `vkQueueWaitIdle`.
//!
//! Vulkan requires external synchronization of a queue for submission and
//! wait-idle. A [`QueueSync`] stores the real function pointers and funnels
//! both calls through one mutex, so they may be issued from any thread.
//!
//! The C-ABI shims ([`queue_submit_threadsafe`], [`queue_wait_idle_threadsafe`])
//! cannot carry state, so they forward through the process-wide
//! [`QueueSync::global`]. It holds one real pointer per operation, which
//! fits one device per process. Code that drives several devices should own
//! one `QueueSync` per device and call [`QueueSync::queue_submit`] and
//! [`QueueSync::queue_wait_idle`] directly.

use ash::vk;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::error;

static GLOBAL: QueueSync = QueueSync::new();

/// Mutex and real function pointers for the two queue operations.
pub struct QueueSync {
    lock: Mutex<()>,
    queue_submit: AtomicPtr<()>,
    queue_wait_idle: AtomicPtr<()>,
}

impl QueueSync {
    pub const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            queue_submit: AtomicPtr::new(std::ptr::null_mut()),
            queue_wait_idle: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// The context backing the C-ABI shims.
    pub fn global() -> &'static QueueSync {
        &GLOBAL
    }

    /// Store the real `vkQueueSubmit`.
    ///
    /// Registering a different pointer than a previous registration is a
    /// programming error and panics in debug builds.
    pub fn register_queue_submit(&self, real: vk::PFN_vkQueueSubmit) {
        register(&self.queue_submit, real as *mut (), "vkQueueSubmit");
    }

    /// Store the real `vkQueueWaitIdle`.
    ///
    /// Same single-pointer rule as [`register_queue_submit`](Self::register_queue_submit).
    pub fn register_queue_wait_idle(&self, real: vk::PFN_vkQueueWaitIdle) {
        register(&self.queue_wait_idle, real as *mut (), "vkQueueWaitIdle");
    }

    pub fn has_queue_submit(&self) -> bool {
        !self.queue_submit.load(Ordering::Acquire).is_null()
    }

    pub fn has_queue_wait_idle(&self) -> bool {
        !self.queue_wait_idle.load(Ordering::Acquire).is_null()
    }

    /// Call the real `vkQueueSubmit` under the queue mutex.
    ///
    /// Returns `VK_ERROR_INITIALIZATION_FAILED` if nothing is registered.
    ///
    /// # Safety
    ///
    /// Arguments must satisfy the `vkQueueSubmit` contract.
    pub unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submit_count: u32,
        p_submits: *const vk::SubmitInfo<'_>,
        fence: vk::Fence,
    ) -> vk::Result {
        let _guard = self.lock();
        let ptr = self.queue_submit.load(Ordering::Acquire);
        if ptr.is_null() {
            error!("vkQueueSubmit shim called before a device registered it");
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        }
        // SAFETY: only ever stored from a `vk::PFN_vkQueueSubmit`.
        let real = unsafe { std::mem::transmute::<*mut (), vk::PFN_vkQueueSubmit>(ptr) };
        unsafe { real(queue, submit_count, p_submits, fence) }
    }

    /// Call the real `vkQueueWaitIdle` under the queue mutex.
    ///
    /// Returns `VK_ERROR_INITIALIZATION_FAILED` if nothing is registered.
    ///
    /// # Safety
    ///
    /// `queue` must be a queue of the device the pointer was resolved for.
    pub unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> vk::Result {
        let _guard = self.lock();
        let ptr = self.queue_wait_idle.load(Ordering::Acquire);
        if ptr.is_null() {
            error!("vkQueueWaitIdle shim called before a device registered it");
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        }
        // SAFETY: only ever stored from a `vk::PFN_vkQueueWaitIdle`.
        let real = unsafe { std::mem::transmute::<*mut (), vk::PFN_vkQueueWaitIdle>(ptr) };
        unsafe { real(queue) }
    }

    // A panic in a previous holder leaves nothing to repair.
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for QueueSync {
    fn default() -> Self {
        Self::new()
    }
}

fn register(slot: &AtomicPtr<()>, real: *mut (), name: &str) {
    let previous = slot.swap(real, Ordering::AcqRel);
    debug_assert!(
        previous.is_null() || previous == real,
        "conflicting {name} registered: {previous:p} then {real:p}"
    );
}

/// `vkQueueSubmit` replacement that serializes through [`QueueSync::global`].
///
/// # Safety
///
/// Same contract as `vkQueueSubmit`.
pub unsafe extern "system" fn queue_submit_threadsafe(
    queue: vk::Queue,
    submit_count: u32,
    p_submits: *const vk::SubmitInfo<'_>,
    fence: vk::Fence,
) -> vk::Result {
    unsafe { GLOBAL.queue_submit(queue, submit_count, p_submits, fence) }
}

/// `vkQueueWaitIdle` replacement that serializes through [`QueueSync::global`].
///
/// # Safety
///
/// Same contract as `vkQueueWaitIdle`.
pub unsafe extern "system" fn queue_wait_idle_threadsafe(queue: vk::Queue) -> vk::Result {
    unsafe { GLOBAL.queue_wait_idle(queue) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize};
    use std::time::Duration;

    static SUBMIT_QUEUE: AtomicU64 = AtomicU64::new(0);
    static SUBMIT_COUNT: AtomicU32 = AtomicU32::new(0);
    static SUBMIT_FENCE: AtomicU64 = AtomicU64::new(0);

    unsafe extern "system" fn recording_submit(
        queue: vk::Queue,
        submit_count: u32,
        _p_submits: *const vk::SubmitInfo<'_>,
        fence: vk::Fence,
    ) -> vk::Result {
        SUBMIT_QUEUE.store(queue.as_raw(), Ordering::SeqCst);
        SUBMIT_COUNT.store(submit_count, Ordering::SeqCst);
        SUBMIT_FENCE.store(fence.as_raw(), Ordering::SeqCst);
        vk::Result::TIMEOUT
    }

    unsafe extern "system" fn other_submit(
        _queue: vk::Queue,
        _submit_count: u32,
        _p_submits: *const vk::SubmitInfo<'_>,
        _fence: vk::Fence,
    ) -> vk::Result {
        vk::Result::SUCCESS
    }

    unsafe extern "system" fn device_lost_wait_idle(_queue: vk::Queue) -> vk::Result {
        vk::Result::ERROR_DEVICE_LOST
    }

    static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);
    static OVERLAPS: AtomicUsize = AtomicUsize::new(0);

    fn enter_exclusive() {
        if IN_FLIGHT.fetch_add(1, Ordering::SeqCst) != 0 {
            OVERLAPS.fetch_add(1, Ordering::SeqCst);
        }
        std::thread::sleep(Duration::from_micros(200));
        IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
    }

    unsafe extern "system" fn exclusive_submit(
        _queue: vk::Queue,
        _submit_count: u32,
        _p_submits: *const vk::SubmitInfo<'_>,
        _fence: vk::Fence,
    ) -> vk::Result {
        enter_exclusive();
        vk::Result::SUCCESS
    }

    unsafe extern "system" fn exclusive_wait_idle(_queue: vk::Queue) -> vk::Result {
        enter_exclusive();
        vk::Result::SUCCESS
    }

    #[test]
    fn forwards_arguments_and_result() {
        let sync = QueueSync::new();
        sync.register_queue_submit(recording_submit);
        let result = unsafe {
            sync.queue_submit(
                vk::Queue::from_raw(0xabc),
                3,
                std::ptr::null(),
                vk::Fence::from_raw(0xdef),
            )
        };
        assert_eq!(result, vk::Result::TIMEOUT);
        assert_eq!(SUBMIT_QUEUE.load(Ordering::SeqCst), 0xabc);
        assert_eq!(SUBMIT_COUNT.load(Ordering::SeqCst), 3);
        assert_eq!(SUBMIT_FENCE.load(Ordering::SeqCst), 0xdef);
    }

    #[test]
    fn wait_idle_propagates_errors() {
        let sync = QueueSync::new();
        sync.register_queue_wait_idle(device_lost_wait_idle);
        let result = unsafe { sync.queue_wait_idle(vk::Queue::from_raw(1)) };
        assert_eq!(result, vk::Result::ERROR_DEVICE_LOST);
    }

    #[test]
    fn same_pointer_registers_twice() {
        let sync = QueueSync::new();
        sync.register_queue_submit(other_submit);
        sync.register_queue_submit(other_submit);
        assert!(sync.has_queue_submit());
        assert!(!sync.has_queue_wait_idle());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "conflicting vkQueueSubmit")]
    fn conflicting_pointer_panics_in_debug() {
        let sync = QueueSync::new();
        sync.register_queue_submit(other_submit);
        sync.register_queue_submit(recording_submit);
    }

    #[test]
    fn unregistered_calls_fail_cleanly() {
        let sync = QueueSync::new();
        let submit = unsafe {
            sync.queue_submit(vk::Queue::null(), 0, std::ptr::null(), vk::Fence::null())
        };
        let wait = unsafe { sync.queue_wait_idle(vk::Queue::null()) };
        assert_eq!(submit, vk::Result::ERROR_INITIALIZATION_FAILED);
        assert_eq!(wait, vk::Result::ERROR_INITIALIZATION_FAILED);
    }

    #[test]
    fn submit_and_wait_idle_are_mutually_exclusive() {
        let sync = QueueSync::new();
        sync.register_queue_submit(exclusive_submit);
        sync.register_queue_wait_idle(exclusive_wait_idle);
        std::thread::scope(|scope| {
            for i in 0..8 {
                let sync = &sync;
                scope.spawn(move || {
                    for _ in 0..25 {
                        let queue = vk::Queue::from_raw(1);
                        unsafe {
                            let _ = if i % 2 == 0 {
                                sync.queue_submit(queue, 1, std::ptr::null(), vk::Fence::null())
                            } else {
                                sync.queue_wait_idle(queue)
                            };
                        }
                    }
                });
            }
        });
        assert_eq!(OVERLAPS.load(Ordering::SeqCst), 0);
    }
}
