//! Counting semaphore.
//!
//! [`Semaphore`] limits concurrent access to a resource. Tasks acquire
//! permits before proceeding and release them when done. The blocking
//! [`acquire`](Semaphore::acquire) waits cooperatively: each failed
//! attempt yields through the hook registered by the scheduler, so a
//! waiter gives up the CPU instead of burning it. There is no timeout on
//! acquisition — a blocked caller waits until a permit is released.

use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

/// The signature of the yield hook invoked while waiting for a permit.
pub type YieldFn = fn();

fn spin_yield() {
    core::hint::spin_loop();
}

static YIELD_FN: AtomicPtr<()> = AtomicPtr::new(spin_yield as *mut ());

/// Registers the scheduler's cooperative yield function.
///
/// Before registration, waiters fall back to a spin hint. The scheduler
/// installs a real block-and-reschedule here at boot.
///
/// # Safety
///
/// The provided function must be safe to call from any task context and
/// must eventually return. Uses `Release` ordering so subsequent loads
/// see the new function.
pub unsafe fn set_yield_fn(f: YieldFn) {
    YIELD_FN.store(f as *mut (), Ordering::Release);
}

#[inline]
fn yield_now() {
    let ptr = YIELD_FN.load(Ordering::Acquire);
    // SAFETY: Only valid `YieldFn` pointers (or the initial `spin_yield`)
    // are ever stored into YIELD_FN.
    let f: YieldFn = unsafe { core::mem::transmute(ptr) };
    f();
}

/// A counting semaphore.
///
/// Controls access to a resource with a fixed number of permits.
/// Acquiring a permit decrements the count; releasing increments it.
///
/// # Example
///
/// ```ignore
/// static SEM: Semaphore = Semaphore::new(1); // binary lock
///
/// fn critical_section() {
///     let _permit = SEM.acquire();
///     // ... exclusive access ...
///     // permit is released on drop
/// }
/// ```
pub struct Semaphore {
    permits: AtomicU32,
}

impl Semaphore {
    /// Creates a new semaphore with the given number of permits.
    pub const fn new(permits: u32) -> Self {
        Self {
            permits: AtomicU32::new(permits),
        }
    }

    /// Acquires a permit, blocking the calling task until one is
    /// available.
    ///
    /// Waiting is cooperative (yield hook), not a hard spin. Must not be
    /// called from interrupt context.
    pub fn acquire(&self) -> SemaphorePermit<'_> {
        loop {
            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            yield_now();
        }
    }

    /// Tries to acquire a permit without blocking.
    ///
    /// Returns `Some(permit)` if a permit was available, `None` otherwise.
    pub fn try_acquire(&self) -> Option<SemaphorePermit<'_>> {
        loop {
            let current = self.permits.load(Ordering::Relaxed);
            if current == 0 {
                return None;
            }
            if self
                .permits
                .compare_exchange_weak(current, current - 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Some(SemaphorePermit { sem: self });
            }
        }
    }

    /// Returns the number of currently available permits.
    pub fn available_permits(&self) -> u32 {
        self.permits.load(Ordering::Relaxed)
    }

    /// Releases a permit back to the semaphore.
    ///
    /// Called automatically by [`SemaphorePermit::drop`].
    fn release(&self) {
        self.permits.fetch_add(1, Ordering::Release);
    }
}

/// RAII permit that releases back to the [`Semaphore`] on drop.
pub struct SemaphorePermit<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.sem.release();
    }
}
