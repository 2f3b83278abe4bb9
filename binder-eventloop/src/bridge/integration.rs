//! EventLoopBridge — posts callbacks onto the host loop and owns its timers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::AbortHandle;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::handle::SharedCallbackHandle;
use crate::host::HostLoop;
use crate::timer::TimerAdapter;

/// Routes scheduled callbacks and timers onto one [`HostLoop`].
///
/// `schedule` may be called from any thread. Callbacks are delivered to a drain
/// task on the host loop in the order they were posted, which keeps the order
/// of callbacks scheduled from any single thread.
pub struct EventLoopBridge {
    queue: UnboundedSender<SharedCallbackHandle>,
    drain: AbortHandle,
    timers: TimerAdapter,
    in_flight: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    backlog_warn_threshold: usize,
}

impl EventLoopBridge {
    /// Start the drain task on `host`. Timers added through [`Self::timers`] run
    /// on the same loop.
    pub fn new(host: &HostLoop, config: BridgeConfig) -> Self {
        let (queue, pending) = mpsc::unbounded_channel();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let drain = host
            .handle()
            .spawn(drain(
                pending,
                config.effective_drain_budget(),
                Arc::clone(&in_flight),
                Arc::clone(&closed),
            ))
            .abort_handle();
        tracing::debug!(?config, "event loop bridge started");

        Self {
            queue,
            drain,
            timers: TimerAdapter::new(host.handle(), &config),
            in_flight,
            closed,
            backlog_warn_threshold: config.backlog_warn_threshold,
        }
    }

    /// Post a callback to the host loop. Never runs it inline.
    ///
    /// The handle travels with the post and keeps the cell alive until the drain
    /// task has invoked it. Scheduling an empty handle does nothing.
    pub fn schedule(&self, handle: SharedCallbackHandle) -> Result<(), BridgeError> {
        if handle.is_empty() {
            return Ok(());
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::LoopClosed);
        }
        let depth = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        if self.queue.send(handle).is_err() {
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
            return Err(BridgeError::LoopClosed);
        }
        if depth == self.backlog_warn_threshold {
            tracing::warn!(depth, "host loop is falling behind on scheduled callbacks");
        }
        Ok(())
    }

    /// Timers running on this bridge's host loop.
    pub fn timers(&self) -> &TimerAdapter {
        &self.timers
    }

    /// Callbacks posted but not yet drained. Always 0 after teardown.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Whether [`Self::teardown`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop draining and stop every timer. Idempotent.
    ///
    /// Callbacks still queued are never invoked: they are dropped together with
    /// the drain task, and each cell's cleanup runs once its last reference goes.
    /// A drain pass that is already running, for example because a callback
    /// called teardown, stops before the next callback.
    pub fn teardown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let queued = self.in_flight.swap(0, Ordering::Relaxed);
        self.drain.abort();
        self.timers.shutdown();
        tracing::debug!(queued, "event loop bridge torn down");
    }
}

impl Drop for EventLoopBridge {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn drain(
    mut pending: UnboundedReceiver<SharedCallbackHandle>,
    budget: usize,
    in_flight: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
) {
    let mut streak = 0;
    while let Some(handle) = pending.recv().await {
        if closed.load(Ordering::Acquire) {
            break;
        }
        // Teardown zeroes the counter, possibly from another thread.
        let _ = in_flight.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            n.checked_sub(1)
        });
        handle.invoke();
        drop(handle);

        streak += 1;
        if streak == budget {
            streak = 0;
            tokio::task::yield_now().await;
        }
    }
    tracing::debug!("callback queue closed");
}
