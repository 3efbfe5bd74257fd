//! Core types and synchronization primitives for the Muon kernel.
//!
//! This crate contains host-testable abstractions shared by the kernel
//! subsystems: type-safe identifiers, the current-task hook the memory
//! accounting layer uses to attribute allocations, and the blocking
//! synchronization primitives built on a counting semaphore.
//!
//! By living outside the kernel crate, these types can be tested with
//! `cargo test` on the host without a kernel target.

#![cfg_attr(not(test), no_std)]

pub mod id;
pub mod sched;
pub mod sync;
