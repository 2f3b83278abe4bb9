//! Event-loop bridge between an IPC transport and a single-threaded host loop.
//!
//! The transport drives timers and deferred callbacks through a table of C
//! function pointers ([`EventLoopHooks`]). This crate implements that table on top
//! of a [`HostLoop`]: callbacks scheduled from any thread are posted to the host
//! loop and invoked there at most once, and every callback's cleanup runs exactly
//! once whether it was invoked, canceled or simply dropped.
//!
//! Startup calls [`register`] once, hands the returned table to the transport and
//! then drives the host loop. The transport's `cleanup` hook tears the bridge down.

pub mod bridge;
pub mod callback;
pub mod config;
pub mod error;
pub mod handle;
pub mod host;
pub mod timer;

pub use bridge::{EventLoopBridge, EventLoopHooks};
pub use callback::{CallbackCell, CallbackFunc, CallbackState, DestroyNotify};
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use handle::SharedCallbackHandle;
pub use host::HostLoop;
pub use timer::{SOURCE_CONTINUE, SOURCE_REMOVE, SourceFunc, TimerAdapter, TimerId};

/// Install the process-wide bridge on `host`, configured from the environment.
///
/// Must be called exactly once before the transport uses its event loop. The
/// returned table is what the transport should be given.
pub fn register(host: &HostLoop) -> Result<&'static EventLoopHooks, BridgeError> {
    register_with_config(host, BridgeConfig::from_env()?)
}

/// Like [`register`], with an explicit configuration.
pub fn register_with_config(
    host: &HostLoop,
    config: BridgeConfig,
) -> Result<&'static EventLoopHooks, BridgeError> {
    if bridge::is_installed() {
        return Err(BridgeError::AlreadyInstalled);
    }
    bridge::install(EventLoopBridge::new(host, config))
}
