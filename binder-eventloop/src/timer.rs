//! TimerAdapter — millisecond timeouts driven by the host loop.
//!
//! Each timer is a task on the host loop that calls a plain C function every
//! interval. The function's return value decides whether it keeps going:
//! [`SOURCE_REMOVE`] stops the timer and frees its entry without any further
//! call from the transport. An interval of zero fires once per loop turn.
//!
//! Timers are created, fired and removed on the host loop thread only.

use std::ffi::{c_int, c_void};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{Instant, Interval};

use crate::bridge::hooks::{EventLoopHooks, EventLoopTimeout, HOOKS};
use crate::config::{BridgeConfig, MissedTicks};
use crate::error::BridgeError;

/// C signature of a timer function. Returns [`SOURCE_CONTINUE`] or [`SOURCE_REMOVE`].
pub type SourceFunc = unsafe extern "C" fn(user_data: *mut c_void) -> c_int;

/// Keep the timer running.
pub const SOURCE_CONTINUE: c_int = 1;
/// Stop the timer and release it.
pub const SOURCE_REMOVE: c_int = 0;

/// Identity of a live timer: the address of its [`TimerEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(usize);

impl TimerId {
    /// Identity of the entry at `entry`. Does not dereference it.
    pub fn from_ptr(entry: *const TimerEntry) -> Self {
        Self(entry as usize)
    }

    /// Entry address, valid only while the timer is live.
    pub fn as_ptr(self) -> *mut TimerEntry {
        self.0 as *mut TimerEntry
    }
}

/// One running timer. `#[repr(C)]` with the transport-visible header first.
#[repr(C)]
pub struct TimerEntry {
    header: EventLoopTimeout,
    function: SourceFunc,
    user_data: *mut c_void,
    interval: Duration,
}

// Safety: an entry is owned by its timer task, which only ever runs on the host
// loop thread; it merely travels to that thread once, at spawn time.
unsafe impl Send for TimerEntry {}

impl TimerEntry {
    fn new(interval: Duration, function: SourceFunc, user_data: *mut c_void) -> Self {
        Self {
            header: EventLoopTimeout {
                eventloop: &HOOKS,
            },
            function,
            user_data,
            interval,
        }
    }

    /// Hook table recorded in the transport-visible header.
    pub fn eventloop(&self) -> *const EventLoopHooks {
        self.header.eventloop
    }

    /// Time between calls; zero means once per loop turn.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Call the function once. Returns whether the timer should keep running.
    fn fire(&self) -> bool {
        // Safety: the transport supplied `function` together with `user_data`.
        unsafe { (self.function)(self.user_data) != SOURCE_REMOVE }
    }
}

/// Live timers. The slot is empty between `add` reserving the id and storing the
/// task's abort handle.
type LiveTimers = DashMap<TimerId, Option<AbortHandle>>;

/// Timers for one host loop.
pub struct TimerAdapter {
    runtime: Handle,
    live: Arc<LiveTimers>,
    missed_ticks: MissedTicks,
    closed: AtomicBool,
}

impl TimerAdapter {
    /// Timers will run as tasks on the loop behind `runtime`.
    pub fn new(runtime: Handle, config: &BridgeConfig) -> Self {
        Self {
            runtime,
            live: Arc::new(DashMap::new()),
            missed_ticks: config.missed_ticks,
            closed: AtomicBool::new(false),
        }
    }

    /// Start a timer firing every `interval_ms` milliseconds.
    ///
    /// The first call happens one interval from now. Meant to be called on the
    /// host loop thread; from any other thread the timer still runs there.
    ///
    /// Fails with [`BridgeError::LoopClosed`] after [`TimerAdapter::shutdown`] or
    /// once the host loop itself is gone.
    pub fn add(
        &self,
        interval_ms: u32,
        function: SourceFunc,
        user_data: *mut c_void,
    ) -> Result<TimerId, BridgeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::LoopClosed);
        }
        let interval = Duration::from_millis(u64::from(interval_ms));
        let entry = Box::new(TimerEntry::new(interval, function, user_data));
        let id = TimerId::from_ptr(&*entry);

        // Reserve the id before the task can run so it finds itself live.
        self.live.insert(id, None);
        let task = self.runtime.spawn(run_timer(
            entry,
            id,
            Arc::clone(&self.live),
            self.missed_ticks,
        ));
        // A runtime that has shut down cancels new tasks on the spot. A task that
        // actually ran (only possible off the host thread) removed its own entry.
        if task.is_finished() && self.live.remove(&id).is_some() {
            return Err(BridgeError::LoopClosed);
        }
        if let Some(mut slot) = self.live.get_mut(&id) {
            *slot = Some(task.abort_handle());
        }
        tracing::trace!(?id, interval_ms, "timer added");
        Ok(id)
    }

    /// Stop a timer before it fires again. Returns false for unknown or
    /// already finished timers.
    pub fn remove(&self, id: TimerId) -> bool {
        match self.live.remove(&id) {
            Some((_, task)) => {
                // An empty slot means the task is not stored yet; it sees the
                // missing entry and stops before firing.
                if let Some(task) = task {
                    task.abort();
                }
                tracing::trace!(?id, "timer removed");
                true
            }
            None => {
                tracing::warn!(?id, "timeout_remove: unknown timer");
                false
            }
        }
    }

    /// Number of timers still running.
    pub fn active(&self) -> usize {
        self.live.len()
    }

    /// Stop every live timer and refuse new ones.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let ids: Vec<TimerId> = self.live.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, Some(task))) = self.live.remove(&id) {
                task.abort();
            }
        }
        if !self.live.is_empty() {
            tracing::warn!(left = self.live.len(), "timers added during shutdown");
        }
    }
}

fn ticker(interval: Duration, missed_ticks: MissedTicks) -> Option<Interval> {
    if interval.is_zero() {
        return None;
    }
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(missed_ticks.into());
    Some(ticker)
}

async fn run_timer(
    entry: Box<TimerEntry>,
    id: TimerId,
    live: Arc<LiveTimers>,
    missed_ticks: MissedTicks,
) {
    let mut ticker = ticker(entry.interval, missed_ticks);
    loop {
        match ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => tokio::task::yield_now().await,
        }
        // The function may have removed its own timer and still asked to continue.
        if !live.contains_key(&id) {
            return;
        }
        if !entry.fire() {
            break;
        }
    }
    live.remove(&id);
    tracing::trace!(?id, "timer removed itself");
}
