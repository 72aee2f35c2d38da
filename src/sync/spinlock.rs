//! A spinning mutual-exclusion primitive.
//!
//! Every per-resource mutex in the crate (the cache lock, the frame-table
//! lock, the swap-bitmap lock, the per-inode locks, the coarse file-system
//! lock) is a [`SpinLock`]. The data can only be reached through the guard
//! returned from [`lock`] and [`try_lock`], which guarantees that it is only
//! ever accessed while the lock is held.
//!
//! The guard releases the lock when it goes out of scope. Call sites that
//! want the release to be visible in the control flow use
//! [`SpinLockGuard::unlock`], which consumes the guard.
//!
//! [`lock`]: SpinLock::lock
//! [`try_lock`]: SpinLock::try_lock

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};
use crossbeam_utils::Backoff;

/// The lock could not be acquired at this time because the operation would
/// otherwise block.
#[derive(Debug)]
pub struct WouldBlock;

/// A mutual exclusion primitive useful for protecting shared data.
///
/// This spinlock will busy-wait (with exponential backoff) until the lock
/// becomes available. Holders are expected to keep critical sections short;
/// the only sanctioned long holds are the ones the design calls out, such as
/// the write-behind worker scanning the cache.
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes this spinlock, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires the lock, spinning until it is available.
    ///
    /// Upon returning, the calling thread is the only holder. A guard is
    /// returned to allow scoped access to the data; the lock is released
    /// when the guard is dropped or explicitly [`unlock`]ed.
    ///
    /// [`unlock`]: SpinLockGuard::unlock
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let backoff = Backoff::new();
        while self.locked.swap(true, Ordering::Acquire) {
            backoff.snooze();
        }
        SpinLockGuard { lock: self }
    }

    /// Attempts to acquire this lock without blocking.
    ///
    /// # Errors
    /// Returns [`WouldBlock`] if the lock is already held.
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        if self.locked.swap(true, Ordering::Acquire) {
            Err(WouldBlock)
        } else {
            Ok(SpinLockGuard { lock: self })
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

/// A scoped guard of a [`SpinLock`].
///
/// The data protected by the lock can be accessed through this guard.
/// Dropping the guard releases the lock; [`unlock`] does the same while
/// making the release explicit at the call site.
///
/// [`unlock`]: Self::unlock
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    lock: &'a SpinLock<T>,
}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the underlying [`SpinLock`], consuming the guard.
    #[inline]
    pub fn unlock(self) {
        drop(self)
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
