//! Address-to-heap routing.
//!
//! Systems with more than one heap (general-purpose plus DMA-capable,
//! say) need to map a bare pointer back to the heap that issued it
//! before releasing or resizing. [`AddressRouter`] is a bounded table
//! of non-overlapping address ranges, each tagged with a heap handle,
//! kept sorted by base so lookup is a binary search.
//!
//! The table follows a publish-once discipline: it is built with
//! `&mut self` during boot, before any concurrent lookups exist, and is
//! immutable afterwards — [`route`](AddressRouter::route) takes `&self`
//! and needs no locking.

use planck_noalloc::vec::ArrayVec;

use crate::error::MemError;

/// One routed range: `[base, base + len)` belongs to `heap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry<H> {
    /// Base address of the range.
    pub base: usize,
    /// Length of the range in bytes.
    pub len: usize,
    /// Handle of the owning heap — typically a `&'static Heap` or a
    /// small id.
    pub heap: H,
}

/// A sorted, bounded routing table over at most `N` ranges.
#[derive(Debug)]
pub struct AddressRouter<H, const N: usize> {
    entries: ArrayVec<RouteEntry<H>, N>,
}

impl<H, const N: usize> Default for AddressRouter<H, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H, const N: usize> AddressRouter<H, N> {
    /// Creates an empty router.
    pub const fn new() -> Self {
        Self {
            entries: ArrayVec::new(),
        }
    }

    /// Number of registered ranges.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no ranges are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers a range, keeping the table sorted by base address.
    ///
    /// Fails with [`MemError::RegionExhausted`] when the table is full.
    /// A range overlapping an existing entry is a boot configuration
    /// error and panics.
    pub fn register(&mut self, base: usize, len: usize, heap: H) -> Result<(), MemError> {
        assert!(len > 0, "empty route range");
        if self.entries.is_full() {
            return Err(MemError::RegionExhausted);
        }
        let at = self.entries.as_slice().partition_point(|e| e.base < base);
        if at > 0 {
            let before = &self.entries[at - 1];
            assert!(before.base + before.len <= base, "overlapping route ranges");
        }
        if at < self.entries.len() {
            assert!(base + len <= self.entries[at].base, "overlapping route ranges");
        }
        self.entries.insert(at, RouteEntry { base, len, heap });
        Ok(())
    }

    /// The registered ranges in ascending base order.
    pub fn entries(&self) -> &[RouteEntry<H>] {
        self.entries.as_slice()
    }
}

impl<H: Copy, const N: usize> AddressRouter<H, N> {
    /// Finds the heap owning `addr`, if any range covers it.
    pub fn route(&self, addr: usize) -> Option<H> {
        let entries = self.entries.as_slice();
        let idx = entries.partition_point(|e| e.base <= addr);
        if idx == 0 {
            return None;
        }
        let entry = &entries[idx - 1];
        (addr - entry.base < entry.len).then_some(entry.heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_to_covering_range() {
        let mut router: AddressRouter<u8, 4> = AddressRouter::new();
        router.register(0x1000, 0x1000, 1).unwrap();
        router.register(0x8000, 0x2000, 2).unwrap();

        assert_eq!(router.route(0x1000), Some(1));
        assert_eq!(router.route(0x1FFF), Some(1));
        assert_eq!(router.route(0x2000), None);
        assert_eq!(router.route(0x9123), Some(2));
        assert_eq!(router.route(0x0FFF), None);
        assert_eq!(router.route(0xA000), None);
    }

    #[test]
    fn registration_order_does_not_matter() {
        let mut router: AddressRouter<u8, 4> = AddressRouter::new();
        router.register(0x8000, 0x1000, 2).unwrap();
        router.register(0x1000, 0x1000, 1).unwrap();
        router.register(0x4000, 0x1000, 3).unwrap();

        let bases: Vec<usize> = router.entries().iter().map(|e| e.base).collect();
        assert_eq!(bases, vec![0x1000, 0x4000, 0x8000]);
        assert_eq!(router.route(0x4800), Some(3));
    }

    #[test]
    fn capacity_is_enforced() {
        let mut router: AddressRouter<u8, 2> = AddressRouter::new();
        router.register(0x1000, 0x100, 1).unwrap();
        router.register(0x2000, 0x100, 2).unwrap();
        assert_eq!(
            router.register(0x3000, 0x100, 3),
            Err(MemError::RegionExhausted)
        );
    }

    #[test]
    #[should_panic(expected = "overlapping route ranges")]
    fn overlap_panics() {
        let mut router: AddressRouter<u8, 4> = AddressRouter::new();
        router.register(0x1000, 0x1000, 1).unwrap();
        let _ = router.register(0x1800, 0x1000, 2);
    }

    #[test]
    fn adjacent_ranges_are_fine() {
        let mut router: AddressRouter<u8, 4> = AddressRouter::new();
        router.register(0x1000, 0x1000, 1).unwrap();
        router.register(0x2000, 0x1000, 2).unwrap();
        assert_eq!(router.route(0x1FFF), Some(1));
        assert_eq!(router.route(0x2000), Some(2));
    }

    #[test]
    fn routes_heap_references() {
        use crate::heap::Heap;
        use crate::region::test_support::TestExtent;

        let mem = TestExtent::new(4096);
        let heap = Heap::new();
        unsafe { heap.add_region(mem.ptr(), mem.len()) }.unwrap();

        let mut router: AddressRouter<&Heap, 4> = AddressRouter::new();
        router
            .register(mem.ptr().addr(), mem.len(), &heap)
            .unwrap();

        let p = heap.allocate(64).unwrap();
        let owner = router.route(p.addr()).unwrap();
        assert!(unsafe { owner.release(p) }.is_ok());
    }
}
