//! The segregated-fit heap allocator.
//!
//! A [`Heap`] owns up to [`MAX_REGIONS`] registered memory regions, one
//! shared [`BinSet`] spanning all of them, and an [`Accounting`] policy.
//! All three live behind a single blocking [`Mutex`]; every operation
//! runs as one critical section, so chunk headers and bin links are
//! never observable in a half-updated state.
//!
//! Allocation is best-fit: the request is padded to a chunk size, the
//! bins yield the tightest free chunk, and any remainder of at least
//! [`MIN_CHUNK_SIZE`] is split off and re-binned. Release coalesces
//! with both physical neighbors before re-binning; the guard chunks at
//! the region edges keep that neighbor arithmetic branch-free. Resize
//! prefers in-place shrink or grow (absorbing a free right neighbor)
//! and falls back to allocate-copy-release.
//!
//! Failures the caller can act on come back as [`MemError`]. Detected
//! metadata corruption — neighbor size links that disagree — panics
//! instead: continuing would let the corruption spread.

use muon_core::id::TaskId;
use muon_core::sched::current_task;
use muon_core::sync::Mutex;
use planck_noalloc::vec::ArrayVec;

use crate::accounting::{Accounting, FreeCheck, SnapshotMode, TaskAccounting, Untracked, UsageSnapshot};
use crate::bins::BinSet;
use crate::chunk::{
    ChunkHeader, ChunkRef, GRANULE, HEADER_SIZE, MIN_CHUNK_SIZE, PackedPreceding, padded_size,
};
use crate::error::MemError;
use crate::region::Region;

/// Maximum regions one heap can span. Sized for boot-time memory maps,
/// not general use.
pub const MAX_REGIONS: usize = 4;

/// A heap with per-task accounting using an `N`-entry record table.
pub type TrackedHeap<const N: usize> = Heap<TaskAccounting<N>>;

/// Describes one registered region, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionExtent {
    /// Aligned base address of the region.
    pub base: usize,
    /// Aligned length in bytes, guard chunks included.
    pub len: usize,
}

struct HeapInner<A> {
    regions: ArrayVec<Region, MAX_REGIONS>,
    bins: BinSet,
    accounting: A,
}

/// A lockable, multi-region, segregated-fit heap.
pub struct Heap<A = Untracked> {
    inner: Mutex<HeapInner<A>>,
}

impl Heap<Untracked> {
    /// Creates an empty untracked heap. Usable once a region has been
    /// registered with [`add_region`](Self::add_region).
    pub const fn new() -> Self {
        Self::new_with(Untracked)
    }
}

impl Default for Heap<Untracked> {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a payload pointer to the chunk it belongs to, searching all
/// registered regions.
fn locate(regions: &[Region], ptr: *mut u8) -> Option<ChunkRef> {
    regions.iter().enumerate().find_map(|(i, r)| {
        r.offset_of_payload(ptr).map(|offset| ChunkRef {
            region: i as u32,
            offset,
        })
    })
}

/// Reads the header at `offset` and checks that it describes a live
/// allocated chunk: allocated flag set, size and preceding-size
/// plausible for this region. Returns `None` otherwise — the pointer
/// the caller mapped here was never handed out by this heap (or was
/// already released).
fn live_header(region: &Region, offset: u32) -> Option<ChunkHeader> {
    let h = region.read_header(offset);
    if !h.preceding.is_allocated() {
        return None;
    }
    if h.size % GRANULE != 0 || h.size < MIN_CHUNK_SIZE {
        return None;
    }
    if u64::from(offset) + u64::from(h.size) > u64::from(region.len() - HEADER_SIZE) {
        return None;
    }
    let prec = h.preceding.size();
    if prec % GRANULE != 0 || prec == 0 || prec > offset {
        return None;
    }
    Some(h)
}

impl<A: Accounting> Heap<A> {
    /// Creates an empty heap with the given accounting policy.
    pub const fn new_with(accounting: A) -> Self {
        Self {
            inner: Mutex::new(HeapInner {
                regions: ArrayVec::new(),
                bins: BinSet::new(),
                accounting,
            }),
        }
    }

    /// Registers `[base, base + len)` as heap memory.
    ///
    /// The extent is aligned inward, fenced with guard chunks, and its
    /// free interior entered into the bins. Fails with
    /// [`MemError::RegionExhausted`] when the region table is full and
    /// [`MemError::RegionTooSmall`] when the aligned extent cannot hold
    /// the guards plus one minimal chunk.
    ///
    /// # Safety
    ///
    /// The extent must be valid for reads and writes, not in use by
    /// anything else, and must remain so for the heap's lifetime.
    pub unsafe fn add_region(&self, base: *mut u8, len: usize) -> Result<(), MemError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.regions.is_full() {
            return Err(MemError::RegionExhausted);
        }
        // SAFETY: Forwarded from the caller's contract.
        let region = unsafe { Region::init(base, len) }?;
        let index = inner.regions.len() as u32;
        inner.regions.push(region);
        inner.bins.insert(
            inner.regions.as_slice(),
            ChunkRef {
                region: index,
                offset: crate::region::FIRST_CHUNK_OFFSET,
            },
        );
        Ok(())
    }

    /// Allocates `size` bytes for the current task.
    ///
    /// Returns a granule-aligned pointer to at least `size` usable
    /// bytes, or [`MemError::OutOfMemory`] when no free chunk fits.
    pub fn allocate(&self, size: usize) -> Result<*mut u8, MemError> {
        self.allocate_as(current_task(), size)
    }

    /// Allocates `size` bytes attributed to `owner`.
    pub fn allocate_as(&self, owner: TaskId, size: usize) -> Result<*mut u8, MemError> {
        let padded = padded_size(size).ok_or(MemError::OutOfMemory)?;
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let chunk = inner
            .bins
            .find_at_least(inner.regions.as_slice(), padded)
            .ok_or(MemError::OutOfMemory)?;
        inner.bins.remove(inner.regions.as_slice(), chunk);

        let region = &inner.regions[chunk.region as usize];
        let header = region.read_header(chunk.offset);
        debug_assert!(!header.preceding.is_allocated());

        let taken = if header.size - padded >= MIN_CHUNK_SIZE {
            // Split: keep `padded` bytes, re-bin the tail.
            region.write_header(
                chunk.offset,
                ChunkHeader {
                    size: padded,
                    preceding: PackedPreceding::pack(header.preceding.size(), true),
                },
            );
            let remainder = header.size - padded;
            let rem_off = chunk.offset + padded;
            region.write_header(
                rem_off,
                ChunkHeader {
                    size: remainder,
                    preceding: PackedPreceding::pack(padded, false),
                },
            );
            let next_off = rem_off + remainder;
            let next = region.read_header(next_off);
            region.write_header(
                next_off,
                ChunkHeader {
                    size: next.size,
                    preceding: PackedPreceding::pack(remainder, next.preceding.is_allocated()),
                },
            );
            inner.bins.insert(
                inner.regions.as_slice(),
                ChunkRef {
                    region: chunk.region,
                    offset: rem_off,
                },
            );
            padded
        } else {
            // Remainder too small to stand alone; the allocation keeps
            // the slack.
            region.write_header(
                chunk.offset,
                ChunkHeader {
                    size: header.size,
                    preceding: PackedPreceding::pack(header.preceding.size(), true),
                },
            );
            header.size
        };

        let payload = inner.regions[chunk.region as usize].payload_ptr(chunk.offset);
        inner.accounting.on_alloc(owner, payload.addr(), taken);
        Ok(payload)
    }

    /// Releases an allocation, coalescing it with any free neighbors.
    ///
    /// Pointers the heap never handed out, already-released pointers,
    /// and pointers into the middle of an allocation are refused with
    /// [`MemError::InvalidPointer`] without touching any metadata.
    ///
    /// # Safety
    ///
    /// The allocation must not be accessed after this call.
    pub unsafe fn release(&self, ptr: *mut u8) -> Result<(), MemError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let chunk = locate(inner.regions.as_slice(), ptr).ok_or(MemError::InvalidPointer)?;
        let region = &inner.regions[chunk.region as usize];
        let header = live_header(region, chunk.offset).ok_or(MemError::InvalidPointer)?;

        match inner.accounting.on_free(ptr.addr(), header.size) {
            FreeCheck::Unknown => return Err(MemError::InvalidPointer),
            FreeCheck::Tracked | FreeCheck::Untracked | FreeCheck::Unverifiable => {}
        }

        let mut off = chunk.offset;
        let mut size = header.size;
        let mut preceding = header.preceding.size();

        let left_off = off - preceding;
        let left = region.read_header(left_off);
        if !left.preceding.is_allocated() {
            assert_eq!(left.size, preceding, "chunk size links corrupted");
            inner.bins.remove(
                inner.regions.as_slice(),
                ChunkRef {
                    region: chunk.region,
                    offset: left_off,
                },
            );
            off = left_off;
            size += left.size;
            preceding = left.preceding.size();
        }

        let right_off = chunk.offset + header.size;
        let right = region.read_header(right_off);
        assert_eq!(right.preceding.size(), header.size, "chunk size links corrupted");
        if !right.preceding.is_allocated() {
            inner.bins.remove(
                inner.regions.as_slice(),
                ChunkRef {
                    region: chunk.region,
                    offset: right_off,
                },
            );
            size += right.size;
        }

        region.write_header(
            off,
            ChunkHeader {
                size,
                preceding: PackedPreceding::pack(preceding, false),
            },
        );
        let next_off = off + size;
        let next = region.read_header(next_off);
        region.write_header(
            next_off,
            ChunkHeader {
                size: next.size,
                preceding: PackedPreceding::pack(size, next.preceding.is_allocated()),
            },
        );
        inner.bins.insert(
            inner.regions.as_slice(),
            ChunkRef {
                region: chunk.region,
                offset: off,
            },
        );
        Ok(())
    }

    /// Resizes an allocation to `new_size` bytes, preserving contents
    /// up to the smaller of the old and new sizes.
    ///
    /// Shrinks in place; grows in place when the right physical
    /// neighbor is a large enough free chunk; otherwise allocates a new
    /// chunk, copies, and releases the old one — in which case the
    /// returned pointer differs and the old one is dead.
    ///
    /// # Safety
    ///
    /// On success the old pointer must no longer be accessed unless it
    /// is the one returned.
    pub unsafe fn resize(&self, ptr: *mut u8, new_size: usize) -> Result<*mut u8, MemError> {
        let padded = padded_size(new_size).ok_or(MemError::OutOfMemory)?;
        let old_payload_len;
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;

            let chunk = locate(inner.regions.as_slice(), ptr).ok_or(MemError::InvalidPointer)?;
            let region = &inner.regions[chunk.region as usize];
            let header = live_header(region, chunk.offset).ok_or(MemError::InvalidPointer)?;
            let old = header.size;

            if padded == old {
                return Ok(ptr);
            }

            if padded < old {
                let remainder = old - padded;
                if remainder < MIN_CHUNK_SIZE {
                    // Not enough cut off to stand alone as a chunk.
                    return Ok(ptr);
                }
                region.write_header(
                    chunk.offset,
                    ChunkHeader {
                        size: padded,
                        preceding: header.preceding,
                    },
                );
                // The cut-off tail merges with a free right neighbor.
                let mut tail = remainder;
                let right_off = chunk.offset + old;
                let right = region.read_header(right_off);
                assert_eq!(right.preceding.size(), old, "chunk size links corrupted");
                if !right.preceding.is_allocated() {
                    inner.bins.remove(
                        inner.regions.as_slice(),
                        ChunkRef {
                            region: chunk.region,
                            offset: right_off,
                        },
                    );
                    tail += right.size;
                }
                let tail_off = chunk.offset + padded;
                region.write_header(
                    tail_off,
                    ChunkHeader {
                        size: tail,
                        preceding: PackedPreceding::pack(padded, false),
                    },
                );
                let next_off = tail_off + tail;
                let next = region.read_header(next_off);
                region.write_header(
                    next_off,
                    ChunkHeader {
                        size: next.size,
                        preceding: PackedPreceding::pack(tail, next.preceding.is_allocated()),
                    },
                );
                inner.bins.insert(
                    inner.regions.as_slice(),
                    ChunkRef {
                        region: chunk.region,
                        offset: tail_off,
                    },
                );
                inner.accounting.on_resize(ptr.addr(), ptr.addr(), padded);
                return Ok(ptr);
            }

            // Grow in place if the right neighbor is free and closes
            // the gap.
            let right_off = chunk.offset + old;
            let right = region.read_header(right_off);
            assert_eq!(right.preceding.size(), old, "chunk size links corrupted");
            if !right.preceding.is_allocated() && old + right.size >= padded {
                inner.bins.remove(
                    inner.regions.as_slice(),
                    ChunkRef {
                        region: chunk.region,
                        offset: right_off,
                    },
                );
                let combined = old + right.size;
                let new_chunk_size = if combined - padded >= MIN_CHUNK_SIZE {
                    let tail_off = chunk.offset + padded;
                    region.write_header(
                        tail_off,
                        ChunkHeader {
                            size: combined - padded,
                            preceding: PackedPreceding::pack(padded, false),
                        },
                    );
                    inner.bins.insert(
                        inner.regions.as_slice(),
                        ChunkRef {
                            region: chunk.region,
                            offset: tail_off,
                        },
                    );
                    padded
                } else {
                    combined
                };
                region.write_header(
                    chunk.offset,
                    ChunkHeader {
                        size: new_chunk_size,
                        preceding: header.preceding,
                    },
                );
                let next_off = chunk.offset + combined;
                let next = region.read_header(next_off);
                let tail = combined - new_chunk_size;
                let next_prec = if tail == 0 { new_chunk_size } else { tail };
                region.write_header(
                    next_off,
                    ChunkHeader {
                        size: next.size,
                        preceding: PackedPreceding::pack(next_prec, next.preceding.is_allocated()),
                    },
                );
                inner
                    .accounting
                    .on_resize(ptr.addr(), ptr.addr(), new_chunk_size);
                return Ok(ptr);
            }

            old_payload_len = (old - HEADER_SIZE) as usize;
            // Fall through to the move path with the lock dropped:
            // allocate and release re-take it.
        }

        let new_ptr = self.allocate(new_size)?;
        let copy = old_payload_len.min(new_size);
        // SAFETY: Both pointers address live, disjoint chunks of at
        // least `copy` payload bytes.
        unsafe { core::ptr::copy_nonoverlapping(ptr, new_ptr, copy) };
        // SAFETY: `ptr` was validated above and is abandoned per this
        // function's contract.
        unsafe { self.release(ptr) }?;
        Ok(new_ptr)
    }

    /// Whether `addr` lies inside one of this heap's regions.
    pub fn owns(&self, addr: usize) -> bool {
        self.inner.lock().regions.iter().any(|r| r.contains(addr))
    }

    /// The registered regions, post-alignment.
    pub fn extents(&self) -> ArrayVec<RegionExtent, MAX_REGIONS> {
        let guard = self.inner.lock();
        let mut out = ArrayVec::new();
        for r in guard.regions.iter() {
            out.push(RegionExtent {
                base: r.base_addr(),
                len: r.len() as usize,
            });
        }
        out
    }

    /// Accounting snapshot per `mode`.
    pub fn snapshot(&self, mode: SnapshotMode) -> UsageSnapshot {
        self.inner.lock().accounting.snapshot(mode)
    }

    /// Shorthand for a totals-only snapshot.
    pub fn usage(&self) -> UsageSnapshot {
        self.snapshot(SnapshotMode::TOTALS)
    }
}
