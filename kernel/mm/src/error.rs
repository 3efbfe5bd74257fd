//! Error taxonomy for the heap subsystem.

use core::fmt;

/// Errors from heap operations.
///
/// Allocation failures are always returned to the caller, never retried
/// internally — retry policy belongs to the caller. Detected metadata
/// corruption is not represented here: it is fatal and panics, since
/// continuing after corruption risks silently spreading it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// No bin holds a sufficiently large free chunk, or the padded
    /// request exceeds the maximum encodable chunk size. Recoverable —
    /// the caller decides the fallback.
    OutOfMemory,
    /// A release or resize was given an address this heap does not
    /// currently track as allocated.
    InvalidPointer,
    /// A boot-time table (region table, router table) is at capacity.
    RegionExhausted,
    /// A registered extent is too small to hold the guard chunks plus
    /// one minimal allocatable chunk.
    RegionTooSmall,
    /// The accounting record table is full. Never surfaced by allocate
    /// or release — tracking degrades instead (see
    /// [`UsageSnapshot::degraded`](crate::accounting::UsageSnapshot)).
    AccountingTableFull,
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::InvalidPointer => write!(f, "pointer is not a live allocation of this heap"),
            Self::RegionExhausted => write!(f, "region table full"),
            Self::RegionTooSmall => write!(f, "region too small for guard chunks"),
            Self::AccountingTableFull => write!(f, "accounting record table full"),
        }
    }
}
