//! Kernel heap management for the Muon RTOS.
//!
//! Implements a segregated-fit heap over one or more statically-bounded
//! raw memory regions registered at boot:
//!
//! - [`chunk`] — the in-band header carried by every chunk of heap
//!   memory (size, allocated flag, preceding-chunk size).
//! - [`bins`] — the free-chunk registry: size-classed, ascending-order
//!   doubly-linked bins.
//! - [`region`] — a registered raw extent bounded by permanent guard
//!   chunks; all offset-checked raw memory access lives here.
//! - [`heap`] — the allocator itself: allocate / release / resize with
//!   best-fit search, splitting, and boundary coalescing under a
//!   per-heap semaphore lock.
//! - [`router`] — the boot-populated table mapping an address back to
//!   its owning heap.
//! - [`accounting`] — optional per-task allocation tracking and usage
//!   counters, selected as a type-level policy on [`Heap`].
//!
//! Everything here is host-testable: the crate is `no_std` for kernel
//! builds while the test suite runs with `cargo test` against buffers
//! from the host allocator.

#![cfg_attr(not(test), no_std)]

pub mod accounting;
pub mod bins;
pub mod chunk;
pub mod error;
pub mod heap;
pub mod region;
pub mod router;

pub use accounting::{
    Accounting, FreeCheck, OwnerUsage, SnapshotMode, TaskAccounting, Untracked, UsageSnapshot,
};
pub use chunk::{GRANULE, HEADER_SIZE, MIN_CHUNK_SIZE, padded_size};
pub use error::MemError;
pub use heap::{Heap, MAX_REGIONS, RegionExtent, TrackedHeap};
pub use router::{AddressRouter, RouteEntry};
