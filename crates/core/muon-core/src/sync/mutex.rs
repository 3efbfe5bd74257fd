//! Blocking mutex built on the counting [`Semaphore`].
//!
//! Each heap instance owns exactly one of these; it guards all mutation
//! of the heap's bins and chunk headers. The lock blocks cooperatively
//! and must not be taken from interrupt context. Acquisition is not
//! re-entrant: locking a mutex the caller already holds deadlocks.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use super::semaphore::{Semaphore, SemaphorePermit};

/// A mutual-exclusion lock: a binary [`Semaphore`] plus the data it
/// protects.
pub struct Mutex<T> {
    sem: Semaphore,
    value: UnsafeCell<T>,
}

// SAFETY: The inner value is only reachable through a guard, and the
// semaphore admits one guard at a time.
unsafe impl<T: Send> Send for Mutex<T> {}
// SAFETY: Same as above — exclusive access is enforced by the semaphore.
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new mutex protecting `value`.
    pub const fn new(value: T) -> Self {
        Self {
            sem: Semaphore::new(1),
            value: UnsafeCell::new(value),
        }
    }

    /// Locks the mutex, blocking the calling task until it is free.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            lock: self,
            _permit: self.sem.acquire(),
        }
    }

    /// Tries to lock the mutex without blocking.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.sem.try_acquire().map(|permit| MutexGuard {
            lock: self,
            _permit: permit,
        })
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// No locking is needed: `&mut self` guarantees exclusive access.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

/// RAII guard granting access to the data behind a [`Mutex`].
///
/// The lock is released when the guard is dropped.
pub struct MutexGuard<'a, T> {
    lock: &'a Mutex<T>,
    _permit: SemaphorePermit<'a>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The permit guarantees exclusive access for the guard's
        // lifetime.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: Same as `deref` — the permit is exclusive.
        unsafe { &mut *self.lock.value.get() }
    }
}
