//! C ABI hook table handed to the IPC transport.
//!
//! The transport calls these functions through [`EventLoopHooks`] instead of
//! its own event loop. Callback hooks work on the cell alone and are valid from
//! any thread. `callback_schedule` and the timer hooks go through the installed
//! [`EventLoopBridge`](super::EventLoopBridge); timer hooks must be called on the
//! host loop thread.
//!
//! Null handles are ignored. A post the host loop refuses is fatal: it is
//! logged and the process aborts, since the callback would otherwise never run.

use std::ffi::{c_uint, c_void};
use std::ptr::{self, NonNull};

use crate::callback::{CallbackCell, CallbackFunc, DestroyNotify};
use crate::error::BridgeError;
use crate::handle::SharedCallbackHandle;
use crate::timer::{SourceFunc, TimerId};

/// Header of every callback handed to the transport.
#[repr(C)]
#[derive(Debug)]
pub struct EventLoopCallback {
    pub eventloop: *const EventLoopHooks,
}

/// Header of every timeout handed to the transport.
#[repr(C)]
#[derive(Debug)]
pub struct EventLoopTimeout {
    pub eventloop: *const EventLoopHooks,
}

/// Function table the transport drives its deferred work through.
#[repr(C)]
#[derive(Debug)]
pub struct EventLoopHooks {
    pub timeout_add: unsafe extern "C" fn(
        interval_ms: c_uint,
        function: Option<SourceFunc>,
        user_data: *mut c_void,
    ) -> *mut EventLoopTimeout,
    pub timeout_remove: unsafe extern "C" fn(timeout: *mut EventLoopTimeout),
    pub callback_new: unsafe extern "C" fn(
        function: Option<CallbackFunc>,
        user_data: *mut c_void,
        cleanup: Option<DestroyNotify>,
    ) -> *mut EventLoopCallback,
    pub callback_ref: unsafe extern "C" fn(callback: *mut EventLoopCallback),
    pub callback_unref: unsafe extern "C" fn(callback: *mut EventLoopCallback),
    pub callback_schedule: unsafe extern "C" fn(callback: *mut EventLoopCallback),
    pub callback_cancel: unsafe extern "C" fn(callback: *mut EventLoopCallback),
    pub cleanup: unsafe extern "C" fn(),
}

/// The one hook table. Every callback and timeout header points here.
pub static HOOKS: EventLoopHooks = EventLoopHooks {
    timeout_add,
    timeout_remove,
    callback_new,
    callback_ref,
    callback_unref,
    callback_schedule,
    callback_cancel,
    cleanup,
};

fn fatal(hook: &str, err: &BridgeError) -> ! {
    tracing::error!("{hook}: {err}, aborting");
    std::process::abort()
}

/// The header is the first field of the `#[repr(C)]` cell, so the addresses match.
fn cell_from(callback: *mut EventLoopCallback) -> Option<NonNull<CallbackCell>> {
    NonNull::new(callback.cast::<CallbackCell>())
}

// ─── Timers ──────────────────────────────────────────────────────────

unsafe extern "C" fn timeout_add(
    interval_ms: c_uint,
    function: Option<SourceFunc>,
    user_data: *mut c_void,
) -> *mut EventLoopTimeout {
    let Some(function) = function else {
        tracing::warn!("timeout_add: null function");
        return ptr::null_mut();
    };
    let added = unsafe {
        super::with_instance(|bridge| bridge.timers().add(interval_ms, function, user_data))
    };
    match added {
        Some(Ok(id)) => id.as_ptr().cast(),
        Some(Err(err)) => fatal("timeout_add", &err),
        None => fatal("timeout_add", &BridgeError::NotInstalled),
    }
}

unsafe extern "C" fn timeout_remove(timeout: *mut EventLoopTimeout) {
    if timeout.is_null() {
        return;
    }
    let id = TimerId::from_ptr(timeout.cast_const().cast());
    if unsafe { super::with_instance(|b| b.timers().remove(id)) }.is_none() {
        tracing::debug!(?id, "timeout_remove: bridge already torn down");
    }
}

// ─── Callbacks ───────────────────────────────────────────────────────

unsafe extern "C" fn callback_new(
    function: Option<CallbackFunc>,
    user_data: *mut c_void,
    cleanup: Option<DestroyNotify>,
) -> *mut EventLoopCallback {
    CallbackCell::create(function, user_data, cleanup)
        .cast::<EventLoopCallback>()
        .as_ptr()
}

unsafe extern "C" fn callback_ref(callback: *mut EventLoopCallback) {
    if let Some(cell) = cell_from(callback) {
        unsafe { CallbackCell::retain(cell) };
    }
}

unsafe extern "C" fn callback_unref(callback: *mut EventLoopCallback) {
    if let Some(cell) = cell_from(callback) {
        unsafe { CallbackCell::release(cell) };
    }
}

unsafe extern "C" fn callback_schedule(callback: *mut EventLoopCallback) {
    let Some(cell) = cell_from(callback) else {
        return;
    };
    // The caller keeps its own reference; the handle adds the in-transit one.
    let handle = unsafe { SharedCallbackHandle::from_raw(cell.as_ptr()) };
    match unsafe { super::with_instance(|b| b.schedule(handle)) } {
        Some(Ok(())) => {}
        Some(Err(err)) => fatal("callback_schedule", &err),
        None => fatal("callback_schedule", &BridgeError::NotInstalled),
    }
}

unsafe extern "C" fn callback_cancel(callback: *mut EventLoopCallback) {
    if let Some(cell) = cell_from(callback) {
        unsafe { cell.as_ref() }.cancel();
    }
}

// ─── Shutdown ────────────────────────────────────────────────────────

unsafe extern "C" fn cleanup() {
    if !super::teardown() {
        tracing::debug!("cleanup: no event loop bridge installed");
    }
}
