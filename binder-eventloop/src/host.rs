//! HostLoop — the single-threaded loop that fires timers and drains callbacks.
//!
//! Backed by a tokio current-thread runtime. Whichever thread drives the loop
//! through [`HostLoop::run_until`] or [`HostLoop::run_for`] is the host loop
//! thread; every task spawned through [`HostLoop::handle`] runs there and only
//! while the loop is being driven.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::BridgeError;

/// Single-threaded loop driven by the caller's thread.
pub struct HostLoop {
    runtime: Runtime,
}

impl HostLoop {
    /// Build the loop. Nothing runs until a thread drives it.
    pub fn new() -> Result<Self, BridgeError> {
        let runtime = Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(BridgeError::Runtime)?;
        Ok(Self { runtime })
    }

    /// Spawn handle usable from any thread. Spawned work still runs on the host
    /// loop thread.
    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    /// Drive the loop on the calling thread until `future` completes.
    ///
    /// Must not be called from inside a task already running on this loop.
    pub fn run_until<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Drive the loop on the calling thread for `duration` of wall-clock time.
    pub fn run_for(&self, duration: Duration) {
        self.runtime.block_on(tokio::time::sleep(duration));
    }
}
