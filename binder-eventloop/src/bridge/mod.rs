//! Process-wide bridge instance.
//!
//! The hook table has no context argument, so the hooks find their
//! [`EventLoopBridge`] through a single process-wide pointer. It is set once by
//! [`install`] and cleared once by [`teardown`]. Reads take no lock: the caller
//! guarantees that no hook is running while the bridge is torn down, which is
//! what the transport's shutdown sequence provides.

pub mod hooks;
pub mod integration;

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

pub use hooks::{EventLoopCallback, EventLoopHooks, EventLoopTimeout, HOOKS};
pub use integration::EventLoopBridge;

use crate::error::BridgeError;

static INSTANCE: AtomicPtr<EventLoopBridge> = AtomicPtr::new(ptr::null_mut());

/// Make `bridge` the process-wide instance and return the hook table for the
/// transport.
///
/// Fails with [`BridgeError::AlreadyInstalled`] if another bridge is installed;
/// the rejected bridge is torn down.
pub fn install(bridge: EventLoopBridge) -> Result<&'static EventLoopHooks, BridgeError> {
    let raw = Box::into_raw(Box::new(bridge));
    if INSTANCE
        .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        // Safety: `raw` was never published.
        drop(unsafe { Box::from_raw(raw) });
        tracing::warn!("event loop bridge already installed, rejecting second install");
        return Err(BridgeError::AlreadyInstalled);
    }
    tracing::debug!("event loop bridge installed");
    Ok(&HOOKS)
}

/// Tear down and free the installed bridge. Returns false if none was installed.
///
/// No hook may be running or called concurrently with this.
pub fn teardown() -> bool {
    let raw = INSTANCE.swap(ptr::null_mut(), Ordering::AcqRel);
    if raw.is_null() {
        return false;
    }
    // Safety: `raw` came from `install` and the swap made us its only owner.
    drop(unsafe { Box::from_raw(raw) });
    true
}

/// Whether a bridge is currently installed.
pub fn is_installed() -> bool {
    !INSTANCE.load(Ordering::Acquire).is_null()
}

/// Run `f` against the installed bridge, if any.
///
/// # Safety
///
/// Must not race with [`teardown`].
pub(crate) unsafe fn with_instance<R>(f: impl FnOnce(&EventLoopBridge) -> R) -> Option<R> {
    let raw = INSTANCE.load(Ordering::Acquire);
    // Safety: non-null pointers stay valid until `teardown`, which the caller
    // keeps from running concurrently.
    unsafe { raw.as_ref() }.map(f)
}
