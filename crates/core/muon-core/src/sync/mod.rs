//! Synchronization primitives for the kernel.
//!
//! Provides the counting [`Semaphore`] and the [`Mutex`] built on top of
//! it. Both block the calling task cooperatively through the registered
//! yield hook and are therefore unusable from interrupt context.

mod mutex;
mod semaphore;

pub use mutex::{Mutex, MutexGuard};
pub use semaphore::{Semaphore, SemaphorePermit, set_yield_fn};
