//! Type-safe identifiers for kernel resources.
//!
//! These newtypes prevent accidental mixing of task identifiers and heap
//! handles at compile time.

use core::fmt;

/// Task identifier, attributed to allocations by the accounting layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TaskId(u32);

impl TaskId {
    /// Identity used before the scheduler is up and for kernel-internal
    /// allocations that belong to no task.
    pub const KERNEL: Self = Self(0);

    /// Creates a new `TaskId`.
    pub const fn new(val: u32) -> Self {
        Self(val)
    }

    /// Returns the raw `u32` value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Heap instance handle, used by the address router to name the owning
/// heap without holding a reference to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HeapId(u32);

impl HeapId {
    /// The kernel heap.
    pub const KERNEL: Self = Self(0);

    /// Creates a new `HeapId`.
    pub const fn new(val: u32) -> Self {
        Self(val)
    }

    /// Returns the raw `u32` value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for HeapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_roundtrip() {
        let id = TaskId::new(42);
        assert_eq!(id.as_u32(), 42);
    }

    #[test]
    fn task_id_display() {
        let id = TaskId::new(7);
        assert_eq!(format!("{id}"), "7");
    }

    #[test]
    fn task_id_ordering() {
        assert!(TaskId::new(1) < TaskId::new(2));
    }

    #[test]
    fn kernel_task_is_zero() {
        assert_eq!(TaskId::KERNEL.as_u32(), 0);
    }

    #[test]
    fn heap_id_roundtrip() {
        let id = HeapId::new(3);
        assert_eq!(id.as_u32(), 3);
    }

    #[test]
    fn heap_id_equality() {
        assert_eq!(HeapId::new(1), HeapId::new(1));
        assert_ne!(HeapId::new(1), HeapId::new(2));
    }
}
