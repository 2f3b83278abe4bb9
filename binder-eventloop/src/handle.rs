//! SharedCallbackHandle — an owned reference to a [`CallbackCell`] that can
//! travel through a queue by value.
//!
//! While a handle sits in the host loop's queue it keeps the cell alive, so the
//! transport may drop its own reference right after scheduling.

use std::ffi::c_void;
use std::fmt;
use std::ptr;
use std::sync::Arc;

use crate::callback::{CallbackCell, CallbackFunc, CallbackState, DestroyNotify};

/// Strong reference to a callback cell, or nothing.
///
/// Cloning retains, dropping releases. `clone_from` is assignment: it releases
/// the old cell before retaining the new one, and does nothing when both sides
/// already point at the same cell.
#[derive(Default)]
pub struct SharedCallbackHandle {
    cell: Option<Arc<CallbackCell>>,
}

impl SharedCallbackHandle {
    /// Create a new PENDING cell owned by this handle.
    pub fn new(
        function: Option<CallbackFunc>,
        user_data: *mut c_void,
        cleanup: Option<DestroyNotify>,
    ) -> Self {
        Self {
            cell: Some(Arc::new(CallbackCell::new(function, user_data, cleanup))),
        }
    }

    /// Take an additional reference to a cell held by someone else.
    ///
    /// A null `cell` yields an empty handle.
    ///
    /// # Safety
    ///
    /// A non-null `cell` must come from [`CallbackCell::create`] or
    /// [`SharedCallbackHandle::into_raw`] and still be alive.
    pub unsafe fn from_raw(cell: *const CallbackCell) -> Self {
        if cell.is_null() {
            return Self::default();
        }
        // Safety: the caller holds a reference, so the count is at least one.
        let cell = unsafe {
            Arc::increment_strong_count(cell);
            Arc::from_raw(cell)
        };
        Self { cell: Some(cell) }
    }

    /// Give this handle's reference away as a raw pointer (null when empty).
    pub fn into_raw(self) -> *const CallbackCell {
        self.cell.map_or(ptr::null(), Arc::into_raw)
    }

    /// Whether the handle holds no cell.
    pub fn is_empty(&self) -> bool {
        self.cell.is_none()
    }

    /// Address of the cell without touching the count; null when empty.
    pub fn as_ptr(&self) -> *const CallbackCell {
        self.cell.as_ref().map_or(ptr::null(), Arc::as_ptr)
    }

    /// Borrow the cell, if any.
    pub fn cell(&self) -> Option<&CallbackCell> {
        self.cell.as_deref()
    }

    /// Number of live references to the cell, including this one. 0 when empty.
    pub fn ref_count(&self) -> usize {
        self.cell.as_ref().map_or(0, Arc::strong_count)
    }

    /// Status of the cell, or `None` when empty.
    pub fn state(&self) -> Option<CallbackState> {
        self.cell().map(CallbackCell::state)
    }

    /// See [`CallbackCell::invoke`]. An empty handle does nothing.
    pub fn invoke(&self) -> bool {
        self.cell().is_some_and(CallbackCell::invoke)
    }

    /// See [`CallbackCell::cancel`]. An empty handle does nothing.
    pub fn cancel(&self) -> bool {
        self.cell().is_some_and(CallbackCell::cancel)
    }

    /// Whether both handles refer to the same cell (two empty handles count as equal).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        ptr::eq(self.as_ptr(), other.as_ptr())
    }
}

impl Clone for SharedCallbackHandle {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        if !self.ptr_eq(source) {
            self.cell.clone_from(&source.cell);
        }
    }
}

impl fmt::Debug for SharedCallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCallbackHandle")
            .field("cell", &self.as_ptr())
            .field("state", &self.state())
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    unsafe extern "C" fn bump(user_data: *mut c_void) {
        let counter = unsafe { &*user_data.cast::<AtomicUsize>() };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn user_data(counter: &AtomicUsize) -> *mut c_void {
        ptr::from_ref(counter).cast_mut().cast()
    }

    #[test]
    fn test_null_gives_empty_handle() {
        let handle = unsafe { SharedCallbackHandle::from_raw(ptr::null()) };
        assert!(handle.is_empty());
        assert_eq!(handle.ref_count(), 0);
        assert!(!handle.invoke());
        assert!(!handle.cancel());
        assert!(handle.into_raw().is_null());
    }

    #[test]
    fn test_from_raw_takes_extra_reference() {
        let cleanups = AtomicUsize::new(0);
        let raw = CallbackCell::create(None, user_data(&cleanups), Some(bump));

        let handle = unsafe { SharedCallbackHandle::from_raw(raw.as_ptr()) };
        assert_eq!(handle.ref_count(), 2);

        unsafe { CallbackCell::release(raw) };
        assert_eq!(handle.ref_count(), 1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);

        drop(handle);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clone_and_drop_adjust_count() {
        let handle = SharedCallbackHandle::new(None, ptr::null_mut(), None);
        let copy = handle.clone();
        assert!(copy.ptr_eq(&handle));
        assert_eq!(handle.ref_count(), 2);
        drop(copy);
        assert_eq!(handle.ref_count(), 1);
    }

    #[test]
    fn test_assignment_moves_reference() {
        let first_cleanups = AtomicUsize::new(0);
        let first = SharedCallbackHandle::new(None, user_data(&first_cleanups), Some(bump));
        let second = SharedCallbackHandle::new(None, ptr::null_mut(), None);

        let mut slot = first.clone();
        assert_eq!(first.ref_count(), 2);

        slot.clone_from(&second);
        assert_eq!(first.ref_count(), 1);
        assert_eq!(second.ref_count(), 2);
        assert!(slot.ptr_eq(&second));

        // Same cell on both sides: no change
        slot.clone_from(&second);
        assert_eq!(second.ref_count(), 2);

        drop(first);
        assert_eq!(first_cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_into_raw_round_trip_keeps_one_reference() {
        let handle = SharedCallbackHandle::new(None, ptr::null_mut(), None);
        let raw = handle.into_raw();
        let again = unsafe { SharedCallbackHandle::from_raw(raw) };
        assert_eq!(again.ref_count(), 2);
        unsafe { CallbackCell::release(std::ptr::NonNull::new(raw.cast_mut()).unwrap()) };
        assert_eq!(again.ref_count(), 1);
    }

    #[test]
    fn test_handle_invoke_and_cancel() {
        let calls = AtomicUsize::new(0);
        let handle = SharedCallbackHandle::new(Some(bump), user_data(&calls), None);
        assert!(handle.cancel());
        assert!(!handle.invoke());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(handle.state(), Some(CallbackState::Canceled));
    }
}
