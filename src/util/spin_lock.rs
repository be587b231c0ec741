//! Bare metal spinlock using atomic memory operations.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// Protects a `T` from concurrent or reentrant access.
///
/// Like the standard library's `Mutex`, minus the operating system: locking
/// is best-effort and may fail, and there is no way to block. Intended for
/// sharing state between the mainline and interrupt handlers, where a failed
/// `try_lock` in a handler is not bad luck but a priority-discipline bug,
/// which is why the handlers in this firmware `expect` the guard rather than
/// retry.
#[derive(Debug)]
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    contents: UnsafeCell<T>,
}

unsafe impl<T: Send + ?Sized> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(contents: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            contents: UnsafeCell::new(contents),
        }
    }
}

impl<T: ?Sized + Send> SpinLock<T> {
    /// Attempts to take the lock, returning a guard on success and `None` if
    /// someone else holds it.
    pub fn try_lock(&self) -> Option<SpinLockGuard<T>> {
        if self.locked.swap(true, Ordering::Acquire) {
            // Old value of `true`: the cell was already locked.
            None
        } else {
            // We observed the false->true transition, so nobody else can have
            // a guard; handing out one exclusive reference is sound until it
            // drops and releases the flag.
            Some(SpinLockGuard {
                locked: &self.locked,
                contents: unsafe { &mut *self.contents.get() },
            })
        }
    }
}

#[must_use = "if dropped, the spinlock will immediately unlock"]
#[derive(Debug)]
pub struct SpinLockGuard<'a, T: ?Sized> {
    locked: &'a AtomicBool,
    contents: &'a mut T,
}

impl<'a, T: ?Sized> core::ops::Deref for SpinLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.contents
    }
}

impl<'a, T: ?Sized> core::ops::DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.contents
    }
}

impl<'a, T: ?Sized> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.locked.store(false, Ordering::Release);
    }
}
