//! Fake Vulkan loader for driving a proc table without a driver.
//!
//! `fake_get_instance_proc_addr` resolves every name to a stub, except
//! `vkGetDeviceProcAddr` and the two queue procs, which resolve to the fakes
//! below. Names passed to [`deny`] resolve to null on the calling thread.
//! With a null instance only loader-level names resolve, like a real loader.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::ffi::{CStr, c_char};
use tracing_subscriber::EnvFilter;
use vulkan_procs::vk::{self, Handle};
use vulkan_procs::VulkanHandle;

pub const INSTANCE: u64 = 0x1000;
pub const DEVICE: u64 = 0x2000;
pub const LOST_QUEUE: u64 = 0xdead;

type VoidFn = unsafe extern "system" fn();

thread_local! {
    static DENIED: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
    static LAST_SUBMIT: Cell<Option<(u64, u32, u64)>> = const { Cell::new(None) };
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Forget names denied by an earlier test on this thread.
pub fn reset() {
    DENIED.with(|denied| denied.borrow_mut().clear());
    LAST_SUBMIT.with(|last| last.set(None));
}

/// Make `names` unresolvable for the rest of the current test.
pub fn deny(names: &[&'static str]) {
    DENIED.with(|denied| denied.borrow_mut().extend_from_slice(names));
}

/// Arguments of the last `vkQueueSubmit` that reached the fake on this thread.
pub fn last_submit() -> Option<(u64, u32, u64)> {
    LAST_SUBMIT.with(Cell::get)
}

pub fn instance() -> VulkanHandle<vk::Instance> {
    VulkanHandle::new(vk::Instance::from_raw(INSTANCE))
}

pub fn device() -> VulkanHandle<vk::Device> {
    VulkanHandle::new(vk::Device::from_raw(DEVICE))
}

fn is_denied(name: &str) -> bool {
    DENIED.with(|denied| denied.borrow().iter().any(|denied| *denied == name))
}

unsafe extern "system" fn stub() {}

pub unsafe extern "system" fn fake_queue_submit(
    queue: vk::Queue,
    submit_count: u32,
    _p_submits: *const vk::SubmitInfo<'_>,
    fence: vk::Fence,
) -> vk::Result {
    LAST_SUBMIT.with(|last| last.set(Some((queue.as_raw(), submit_count, fence.as_raw()))));
    vk::Result::NOT_READY
}

pub unsafe extern "system" fn fake_queue_wait_idle(queue: vk::Queue) -> vk::Result {
    if queue.as_raw() == LOST_QUEUE {
        vk::Result::ERROR_DEVICE_LOST
    } else {
        vk::Result::SUCCESS
    }
}

pub unsafe extern "system" fn fake_get_device_proc_addr(
    device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    let name = unsafe { CStr::from_ptr(p_name) }.to_str().ok()?;
    if device.as_raw() == 0 || is_denied(name) {
        return None;
    }
    let addr = match name {
        "vkQueueSubmit" => unsafe {
            std::mem::transmute::<vk::PFN_vkQueueSubmit, VoidFn>(fake_queue_submit)
        },
        "vkQueueWaitIdle" => unsafe {
            std::mem::transmute::<vk::PFN_vkQueueWaitIdle, VoidFn>(fake_queue_wait_idle)
        },
        _ => stub as VoidFn,
    };
    Some(addr)
}

pub unsafe extern "system" fn fake_get_instance_proc_addr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    let name = unsafe { CStr::from_ptr(p_name) }.to_str().ok()?;
    if is_denied(name) {
        return None;
    }
    let loader_level = matches!(
        name,
        "vkCreateInstance"
            | "vkEnumerateInstanceExtensionProperties"
            | "vkEnumerateInstanceLayerProperties"
            | "vkGetInstanceProcAddr"
    );
    if instance.as_raw() == 0 && !loader_level {
        return None;
    }
    let addr = match name {
        "vkGetDeviceProcAddr" => unsafe {
            std::mem::transmute::<vk::PFN_vkGetDeviceProcAddr, VoidFn>(fake_get_device_proc_addr)
        },
        _ => stub as VoidFn,
    };
    Some(addr)
}
