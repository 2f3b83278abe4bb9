//! CallbackCell — one scheduled unit of work with exactly-once cleanup.
//!
//! A cell moves through these states:
//!
//! ```text
//! PENDING --invoke (wins CAS)--> INVOKED    function runs, then cleanup
//! PENDING --cancel (wins CAS)--> CANCELED   cleanup only
//! PENDING --last reference dropped-->       cleanup runs from Drop
//! ```
//!
//! INVOKED and CANCELED are terminal. Whoever loses the CAS does nothing.
//!
//! Two independent atomics carry the state: the status byte decides whether the
//! function runs, and the cleanup pointer is taken with a single swap so that
//! exactly one of {invoke, cancel, drop} ever sees it non-null. No lock is held
//! while either the function or the cleanup runs, so both may re-enter the hooks.
//!
//! The reference count is the strong count of an [`Arc`]. The transport only ever
//! sees the pointer produced by [`Arc::into_raw`]; [`CallbackCell::retain`] and
//! [`CallbackCell::release`] adjust the count through it.

use std::ffi::c_void;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use crate::bridge::hooks::{EventLoopCallback, EventLoopHooks, HOOKS};

/// C signature of the scheduled function.
pub type CallbackFunc = unsafe extern "C" fn(user_data: *mut c_void);

/// C signature of the cleanup run once the cell is finished with its user data.
pub type DestroyNotify = unsafe extern "C" fn(user_data: *mut c_void);

const PENDING: u8 = 0;
const INVOKED: u8 = 1;
const CANCELED: u8 = 2;

/// Observable status of a [`CallbackCell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackState {
    Pending,
    Invoked,
    Canceled,
}

/// Shared, atomically reference-counted unit of work.
///
/// Layout is `#[repr(C)]` with the transport-visible header first, so a
/// `*mut EventLoopCallback` handed out by the hooks and a `*const CallbackCell`
/// are the same address.
#[repr(C)]
pub struct CallbackCell {
    header: EventLoopCallback,
    state: AtomicU8,
    function: Option<CallbackFunc>,
    cleanup: AtomicPtr<()>,
    user_data: *mut c_void,
}

// Safety: the only non-thread-safe fields are the header's pointer to the
// immutable static hook table and `user_data`, which the cell never
// dereferences. The transport that supplied `user_data` guarantees it may be
// used from whichever thread ends up running the function or the cleanup.
unsafe impl Send for CallbackCell {}
unsafe impl Sync for CallbackCell {}

impl CallbackCell {
    pub(crate) fn new(
        function: Option<CallbackFunc>,
        user_data: *mut c_void,
        cleanup: Option<DestroyNotify>,
    ) -> Self {
        Self {
            header: EventLoopCallback {
                eventloop: &HOOKS,
            },
            state: AtomicU8::new(PENDING),
            function,
            cleanup: AtomicPtr::new(cleanup.map_or(ptr::null_mut(), |f| f as *mut ())),
            user_data,
        }
    }

    /// Allocate a PENDING cell and return the caller's single reference.
    pub fn create(
        function: Option<CallbackFunc>,
        user_data: *mut c_void,
        cleanup: Option<DestroyNotify>,
    ) -> NonNull<CallbackCell> {
        let raw = Arc::into_raw(Arc::new(Self::new(function, user_data, cleanup)));
        tracing::trace!(cell = ?raw, "callback created");
        // Safety: Arc::into_raw never returns null.
        unsafe { NonNull::new_unchecked(raw.cast_mut()) }
    }

    /// Add one reference.
    ///
    /// # Safety
    ///
    /// `cell` must come from [`CallbackCell::create`] (or
    /// [`SharedCallbackHandle::into_raw`](crate::handle::SharedCallbackHandle::into_raw))
    /// and the caller must currently own a reference to it.
    pub unsafe fn retain(cell: NonNull<CallbackCell>) {
        unsafe { Arc::increment_strong_count(cell.as_ptr().cast_const()) };
    }

    /// Drop one reference, destroying the cell when it was the last.
    ///
    /// Destroying a cell that is still PENDING runs its cleanup.
    ///
    /// # Safety
    ///
    /// Same as [`CallbackCell::retain`]; the reference given up here must not be
    /// used again.
    pub unsafe fn release(cell: NonNull<CallbackCell>) {
        unsafe { Arc::decrement_strong_count(cell.as_ptr().cast_const()) };
    }

    /// Run the function if the cell is still PENDING.
    ///
    /// Returns whether this call won the transition. The cleanup runs right after
    /// the function, on the same thread.
    pub fn invoke(&self) -> bool {
        if self
            .state
            .compare_exchange(PENDING, INVOKED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!(cell = ?ptr::from_ref(self), "invoke lost the race, ignoring");
            return false;
        }
        if let Some(function) = self.function {
            // Safety: the transport supplied `function` together with `user_data`.
            unsafe { function(self.user_data) };
        }
        self.finalize();
        true
    }

    /// Skip the function and run the cleanup if the cell is still PENDING.
    ///
    /// Returns whether this call won the transition.
    pub fn cancel(&self) -> bool {
        if self
            .state
            .compare_exchange(PENDING, CANCELED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        tracing::trace!(cell = ?ptr::from_ref(self), "callback canceled");
        self.finalize();
        true
    }

    /// Hook table recorded in the transport-visible header.
    pub fn eventloop(&self) -> *const EventLoopHooks {
        self.header.eventloop
    }

    /// Current status; a snapshot that another thread may change right after.
    pub fn state(&self) -> CallbackState {
        match self.state.load(Ordering::Acquire) {
            PENDING => CallbackState::Pending,
            INVOKED => CallbackState::Invoked,
            _ => CallbackState::Canceled,
        }
    }

    /// Take the cleanup and run it if nobody else got there first.
    fn finalize(&self) {
        let cleanup = self.cleanup.swap(ptr::null_mut(), Ordering::AcqRel);
        if cleanup.is_null() {
            return;
        }
        // Safety: the pointer was produced from a `DestroyNotify` in `new` and the
        // swap above hands it to exactly one caller.
        let cleanup = unsafe { std::mem::transmute::<*mut (), DestroyNotify>(cleanup) };
        unsafe { cleanup(self.user_data) };
    }
}

impl Drop for CallbackCell {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl fmt::Debug for CallbackCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackCell")
            .field("state", &self.state())
            .field("user_data", &self.user_data)
            .finish()
    }
}
