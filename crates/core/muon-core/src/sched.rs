//! Current-task identity hook.
//!
//! The allocator's accounting layer attributes each allocation to the
//! task that requested it, but the scheduler lives outside the
//! host-testable crates. The scheduler registers its provider function
//! here at boot; until it does, every caller is attributed to
//! [`TaskId::KERNEL`].

use core::sync::atomic::{AtomicPtr, Ordering};

use crate::id::TaskId;

/// The signature of the current-task provider function.
pub type CurrentTaskFn = fn() -> TaskId;

fn kernel_task() -> TaskId {
    TaskId::KERNEL
}

static CURRENT_TASK_FN: AtomicPtr<()> = AtomicPtr::new(kernel_task as *mut ());

/// Registers the scheduler's current-task provider.
///
/// # Safety
///
/// The provided function must be safe to call from any task context and
/// must not allocate (it runs on the allocation path). May be called
/// more than once. Uses `Release` ordering so subsequent loads see the
/// new function.
pub unsafe fn set_current_task_fn(f: CurrentTaskFn) {
    CURRENT_TASK_FN.store(f as *mut (), Ordering::Release);
}

/// Returns the identity of the currently running task.
///
/// Falls back to [`TaskId::KERNEL`] before the scheduler registers a
/// provider.
#[inline]
pub fn current_task() -> TaskId {
    let ptr = CURRENT_TASK_FN.load(Ordering::Acquire);
    // SAFETY: Only valid `CurrentTaskFn` pointers (or the initial
    // `kernel_task`) are ever stored into CURRENT_TASK_FN.
    let f: CurrentTaskFn = unsafe { core::mem::transmute(ptr) };
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_kernel_task() {
        assert_eq!(current_task(), TaskId::KERNEL);
    }

    #[test]
    fn registered_provider_is_used() {
        // Registers a provider that returns the same identity as the
        // default so concurrently running tests observe no change.
        fn provider() -> TaskId {
            TaskId::KERNEL
        }
        unsafe { set_current_task_fn(provider) };
        assert_eq!(current_task(), TaskId::KERNEL);
    }
}
