//! Per-task allocation accounting.
//!
//! Tracking is a type-level policy on [`Heap`](crate::heap::Heap): the
//! zero-cost [`Untracked`] default compiles every hook to a no-op, while
//! [`TaskAccounting`] keeps a bounded record table plus running
//! current/peak byte counters. Running out of record slots is not an
//! allocation failure — the table goes *degraded* (sticky, reported in
//! every later snapshot) and allocations keep succeeding untracked.
//!
//! All hooks are called with the heap lock held, so implementations
//! need no synchronization of their own.

use bitflags::bitflags;
use muon_core::id::TaskId;
use planck_noalloc::vec::ArrayVec;

/// Maximum distinct owners reported in one snapshot.
const MAX_SNAPSHOT_OWNERS: usize = 16;

bitflags! {
    /// Selects what a [`UsageSnapshot`] is populated with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SnapshotMode: u8 {
        /// Heap-wide current and peak byte counters.
        const TOTALS = 1 << 0;
        /// Per-owner aggregation over the live record table.
        const PER_OWNER = 1 << 1;
    }
}

/// Live bytes and allocation count attributed to one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerUsage {
    /// The owning task.
    pub owner: TaskId,
    /// Sum of chunk payload bytes currently held by this owner.
    pub bytes: u64,
    /// Number of live allocations held by this owner.
    pub allocations: u32,
}

/// Point-in-time view of a heap's accounting state.
#[derive(Debug, Default)]
pub struct UsageSnapshot {
    /// Bytes currently allocated, chunk padding included.
    pub current_bytes: u64,
    /// High-water mark of `current_bytes` since heap creation.
    pub peak_bytes: u64,
    /// True once the record table has ever overflowed. Per-owner data
    /// is incomplete from that point on; the totals stay exact.
    pub degraded: bool,
    /// Per-owner breakdown; empty unless
    /// [`SnapshotMode::PER_OWNER`] was requested.
    pub per_owner: ArrayVec<OwnerUsage, MAX_SNAPSHOT_OWNERS>,
    /// True when the snapshot had more distinct owners than fit in
    /// `per_owner`.
    pub owners_truncated: bool,
}

/// Outcome of the accounting-side presence check on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeCheck {
    /// A matching record was found and retired.
    Tracked,
    /// This policy keeps no records; nothing to verify.
    Untracked,
    /// No record found, but records have been dropped since the table
    /// overflowed — absence proves nothing.
    Unverifiable,
    /// No record found and the table is complete: this address was
    /// never handed out. The release must be refused.
    Unknown,
}

/// Accounting hooks invoked by the heap under its lock.
pub trait Accounting {
    /// Records a fresh allocation of `size` chunk bytes at `payload`.
    fn on_alloc(&mut self, owner: TaskId, payload: usize, size: u32);

    /// Checks and retires the record for the allocation at `payload`.
    ///
    /// Called before the heap mutates any metadata, so a refusing
    /// [`FreeCheck::Unknown`] leaves the heap untouched.
    fn on_free(&mut self, payload: usize, size: u32) -> FreeCheck;

    /// Rewrites the record for an allocation whose address or chunk
    /// size changed.
    fn on_resize(&mut self, old_payload: usize, new_payload: usize, new_size: u32);

    /// Produces a usage snapshot per `mode`.
    fn snapshot(&self, mode: SnapshotMode) -> UsageSnapshot;
}

/// The default policy: no tracking, no overhead.
#[derive(Debug, Default)]
pub struct Untracked;

impl Accounting for Untracked {
    fn on_alloc(&mut self, _owner: TaskId, _payload: usize, _size: u32) {}

    fn on_free(&mut self, _payload: usize, _size: u32) -> FreeCheck {
        FreeCheck::Untracked
    }

    fn on_resize(&mut self, _old_payload: usize, _new_payload: usize, _new_size: u32) {}

    fn snapshot(&self, _mode: SnapshotMode) -> UsageSnapshot {
        UsageSnapshot::default()
    }
}

#[derive(Debug, Clone, Copy)]
struct AllocRecord {
    payload: usize,
    size: u32,
    owner: TaskId,
}

/// Bounded-table tracking: one record per live allocation, up to `N`,
/// plus exact heap-wide current/peak counters.
#[derive(Debug)]
pub struct TaskAccounting<const N: usize> {
    records: ArrayVec<AllocRecord, N>,
    current: u64,
    peak: u64,
    degraded: bool,
}

impl<const N: usize> TaskAccounting<N> {
    /// Creates an empty record table.
    pub const fn new() -> Self {
        Self {
            records: ArrayVec::new(),
            current: 0,
            peak: 0,
            degraded: false,
        }
    }

    fn find(&self, payload: usize) -> Option<usize> {
        self.records.iter().position(|r| r.payload == payload)
    }
}

impl<const N: usize> Default for TaskAccounting<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Accounting for TaskAccounting<N> {
    fn on_alloc(&mut self, owner: TaskId, payload: usize, size: u32) {
        self.current += u64::from(size);
        self.peak = self.peak.max(self.current);
        let record = AllocRecord {
            payload,
            size,
            owner,
        };
        if self.records.try_push(record).is_err() {
            // Totals stay exact; only per-owner attribution is lost.
            self.degraded = true;
        }
    }

    fn on_free(&mut self, payload: usize, size: u32) -> FreeCheck {
        if let Some(idx) = self.find(payload) {
            let record = self.records.swap_remove(idx);
            debug_assert_eq!(record.size, size);
            self.current = self.current.saturating_sub(u64::from(record.size));
            FreeCheck::Tracked
        } else if self.degraded {
            self.current = self.current.saturating_sub(u64::from(size));
            FreeCheck::Unverifiable
        } else {
            FreeCheck::Unknown
        }
    }

    fn on_resize(&mut self, old_payload: usize, new_payload: usize, new_size: u32) {
        if let Some(idx) = self.find(old_payload) {
            let old_size = self.records[idx].size;
            self.records[idx].payload = new_payload;
            self.records[idx].size = new_size;
            self.current = self.current - u64::from(old_size) + u64::from(new_size);
        } else {
            // Untracked since a table overflow; keep the totals moving.
            self.current = self.current.saturating_add(u64::from(new_size));
        }
        self.peak = self.peak.max(self.current);
    }

    fn snapshot(&self, mode: SnapshotMode) -> UsageSnapshot {
        let mut snap = UsageSnapshot {
            degraded: self.degraded,
            ..UsageSnapshot::default()
        };
        if mode.contains(SnapshotMode::TOTALS) {
            snap.current_bytes = self.current;
            snap.peak_bytes = self.peak;
        }
        if mode.contains(SnapshotMode::PER_OWNER) {
            for record in self.records.iter() {
                if let Some(entry) = snap
                    .per_owner
                    .iter_mut()
                    .find(|e| e.owner == record.owner)
                {
                    entry.bytes += u64::from(record.size);
                    entry.allocations += 1;
                } else {
                    let fresh = OwnerUsage {
                        owner: record.owner,
                        bytes: u64::from(record.size),
                        allocations: 1,
                    };
                    if snap.per_owner.try_push(fresh).is_err() {
                        snap.owners_truncated = true;
                    }
                }
            }
        }
        snap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untracked_is_inert() {
        let mut a = Untracked;
        a.on_alloc(TaskId::KERNEL, 0x1000, 64);
        assert_eq!(a.on_free(0x1000, 64), FreeCheck::Untracked);
        let snap = a.snapshot(SnapshotMode::all());
        assert_eq!(snap.current_bytes, 0);
        assert!(!snap.degraded);
    }

    #[test]
    fn counters_track_alloc_and_free() {
        let mut a = TaskAccounting::<8>::new();
        a.on_alloc(TaskId::KERNEL, 0x1000, 64);
        a.on_alloc(TaskId::new(7), 0x2000, 128);
        let snap = a.snapshot(SnapshotMode::TOTALS);
        assert_eq!(snap.current_bytes, 192);
        assert_eq!(snap.peak_bytes, 192);

        assert_eq!(a.on_free(0x1000, 64), FreeCheck::Tracked);
        let snap = a.snapshot(SnapshotMode::TOTALS);
        assert_eq!(snap.current_bytes, 128);
        // Peak is a high-water mark, it does not drop.
        assert_eq!(snap.peak_bytes, 192);
    }

    #[test]
    fn unknown_address_is_refused_while_table_complete() {
        let mut a = TaskAccounting::<8>::new();
        a.on_alloc(TaskId::KERNEL, 0x1000, 64);
        assert_eq!(a.on_free(0x9999, 32), FreeCheck::Unknown);
        // The refused free must not disturb the counters.
        assert_eq!(a.snapshot(SnapshotMode::TOTALS).current_bytes, 64);
    }

    #[test]
    fn overflow_degrades_instead_of_failing() {
        let mut a = TaskAccounting::<2>::new();
        a.on_alloc(TaskId::KERNEL, 0x1000, 32);
        a.on_alloc(TaskId::KERNEL, 0x2000, 32);
        a.on_alloc(TaskId::KERNEL, 0x3000, 32);
        let snap = a.snapshot(SnapshotMode::TOTALS);
        assert!(snap.degraded);
        // Totals stay exact even though the third record was dropped.
        assert_eq!(snap.current_bytes, 96);

        // The untracked third allocation frees as unverifiable, not as
        // an error.
        assert_eq!(a.on_free(0x3000, 32), FreeCheck::Unverifiable);
        assert_eq!(a.snapshot(SnapshotMode::TOTALS).current_bytes, 64);
        // Degradation is sticky.
        assert!(a.snapshot(SnapshotMode::TOTALS).degraded);
    }

    #[test]
    fn per_owner_breakdown() {
        let mut a = TaskAccounting::<8>::new();
        let t1 = TaskId::new(1);
        let t2 = TaskId::new(2);
        a.on_alloc(t1, 0x1000, 64);
        a.on_alloc(t1, 0x2000, 64);
        a.on_alloc(t2, 0x3000, 256);

        let snap = a.snapshot(SnapshotMode::PER_OWNER);
        let usage_of = |owner| {
            snap.per_owner
                .iter()
                .find(|e| e.owner == owner)
                .copied()
                .unwrap()
        };
        assert_eq!(usage_of(t1).bytes, 128);
        assert_eq!(usage_of(t1).allocations, 2);
        assert_eq!(usage_of(t2).bytes, 256);
        assert_eq!(usage_of(t2).allocations, 1);
        // PER_OWNER alone leaves totals at zero.
        assert_eq!(snap.current_bytes, 0);
    }

    #[test]
    fn resize_rewrites_record_in_place() {
        let mut a = TaskAccounting::<4>::new();
        a.on_alloc(TaskId::KERNEL, 0x1000, 64);
        a.on_resize(0x1000, 0x5000, 256);
        let snap = a.snapshot(SnapshotMode::TOTALS);
        assert_eq!(snap.current_bytes, 256);
        assert_eq!(snap.peak_bytes, 256);
        // The old address is gone, the new one frees cleanly.
        assert_eq!(a.on_free(0x1000, 64), FreeCheck::Unknown);
        assert_eq!(a.on_free(0x5000, 256), FreeCheck::Tracked);
        assert_eq!(a.snapshot(SnapshotMode::TOTALS).current_bytes, 0);
    }
}
