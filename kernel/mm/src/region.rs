//! A registered raw memory extent, bounded by guard chunks.
//!
//! All raw pointer arithmetic in the heap lives in this module. The rest
//! of the allocator manipulates chunks purely as granule-aligned byte
//! offsets into a [`Region`]; every read or write of in-band metadata
//! goes through the checked accessors here, which assert alignment and
//! bounds before touching memory. A bad offset is metadata corruption
//! and panics rather than wandering out of the extent.
//!
//! Layout after [`Region::init`]:
//!
//! ```text
//! offset 0         8                    len-8      len
//!        | guard   | initial free chunk | guard    |
//! ```
//!
//! The guard chunks are zero-payload and permanently marked allocated,
//! so boundary coalescing needs no first/last special cases: a chunk's
//! physical neighbors always exist and always have valid headers.

use core::ptr;

use crate::chunk::{
    ChunkHeader, FreeLinks, GRANULE, HEADER_SIZE, LINKS_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE,
    PackedPreceding,
};
use crate::error::MemError;

/// Offset of the first real chunk, just past the low guard.
pub(crate) const FIRST_CHUNK_OFFSET: u32 = HEADER_SIZE;

/// Smallest usable extent: two guards plus one minimal chunk.
const MIN_REGION_LEN: u32 = 2 * HEADER_SIZE + MIN_CHUNK_SIZE;

/// One registered extent of raw heap memory.
#[derive(Debug)]
pub(crate) struct Region {
    base: *mut u8,
    len: u32,
}

// SAFETY: A region is handed exclusively to one heap at registration
// and only ever touched under that heap's lock.
unsafe impl Send for Region {}

impl Region {
    /// Claims `[base, base + len)` as heap memory: aligns the bounds
    /// inward to the granule, writes the two guard headers and the
    /// initial free chunk header, and returns the region.
    ///
    /// The initial free chunk sits at [`FIRST_CHUNK_OFFSET`]; the caller
    /// is expected to enter it into the free-chunk registry.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be valid for reads and writes, unused by
    /// anything else, and must stay so for the lifetime of the heap.
    pub unsafe fn init(base: *mut u8, len: usize) -> Result<Self, MemError> {
        let granule = GRANULE as usize;
        let aligned = base
            .addr()
            .checked_add(granule - 1)
            .ok_or(MemError::RegionTooSmall)?
            & !(granule - 1);
        let skipped = aligned - base.addr();
        let mut usable = len.saturating_sub(skipped) & !(granule - 1);
        // The initial free chunk's size must stay encodable in 31 bits.
        let cap = (MAX_CHUNK_SIZE + 2 * HEADER_SIZE) as usize;
        if usable > cap {
            usable = cap;
        }
        if usable < MIN_REGION_LEN as usize {
            return Err(MemError::RegionTooSmall);
        }

        let region = Self {
            base: base.wrapping_add(skipped),
            len: usable as u32,
        };
        let free_size = region.len - 2 * HEADER_SIZE;

        region.write_header(
            0,
            ChunkHeader {
                size: HEADER_SIZE,
                preceding: PackedPreceding::pack(0, true),
            },
        );
        region.write_header(
            FIRST_CHUNK_OFFSET,
            ChunkHeader {
                size: free_size,
                preceding: PackedPreceding::pack(HEADER_SIZE, false),
            },
        );
        region.write_header(
            region.len - HEADER_SIZE,
            ChunkHeader {
                size: HEADER_SIZE,
                preceding: PackedPreceding::pack(free_size, true),
            },
        );
        Ok(region)
    }

    /// Total aligned length of the extent, guards included.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Base address of the extent.
    pub fn base_addr(&self) -> usize {
        self.base.addr()
    }

    /// Whether `addr` falls inside this extent.
    pub fn contains(&self, addr: usize) -> bool {
        let base = self.base.addr();
        addr >= base && addr < base + self.len as usize
    }

    fn check_header_offset(&self, offset: u32) {
        assert!(
            offset % GRANULE == 0 && offset + HEADER_SIZE <= self.len,
            "chunk offset {offset:#x} out of bounds for region of {:#x} bytes",
            self.len
        );
    }

    /// Reads the chunk header at `offset`.
    pub fn read_header(&self, offset: u32) -> ChunkHeader {
        self.check_header_offset(offset);
        // SAFETY: Offset checked above; the extent is valid per `init`'s
        // contract and ChunkHeader alignment divides the granule.
        unsafe { ptr::read(self.base.add(offset as usize).cast::<ChunkHeader>()) }
    }

    /// Writes the chunk header at `offset`.
    pub fn write_header(&self, offset: u32, header: ChunkHeader) {
        self.check_header_offset(offset);
        // SAFETY: Same as `read_header`.
        unsafe { ptr::write(self.base.add(offset as usize).cast::<ChunkHeader>(), header) }
    }

    fn check_links_offset(&self, at: u32) {
        assert!(
            at % GRANULE == 0 && at >= HEADER_SIZE && at + LINKS_SIZE <= self.len,
            "free links offset {at:#x} out of bounds for region of {:#x} bytes",
            self.len
        );
    }

    /// Reads the free-list links stored in the payload of the free chunk
    /// whose header is at `offset`.
    pub fn read_links(&self, offset: u32) -> FreeLinks {
        let at = offset + HEADER_SIZE;
        self.check_links_offset(at);
        // SAFETY: Offset checked; links live at a granule-aligned offset
        // inside the extent.
        unsafe { ptr::read(self.base.add(at as usize).cast::<FreeLinks>()) }
    }

    /// Writes the free-list links into the payload of the free chunk
    /// whose header is at `offset`.
    pub fn write_links(&self, offset: u32, links: FreeLinks) {
        let at = offset + HEADER_SIZE;
        self.check_links_offset(at);
        // SAFETY: Same as `read_links`.
        unsafe { ptr::write(self.base.add(at as usize).cast::<FreeLinks>(), links) }
    }

    /// Pointer to the payload of the chunk whose header is at `offset`.
    pub fn payload_ptr(&self, offset: u32) -> *mut u8 {
        self.check_header_offset(offset);
        self.base.wrapping_add((offset + HEADER_SIZE) as usize)
    }

    /// Maps a payload pointer back to its chunk's header offset.
    ///
    /// Returns `None` for pointers outside the extent, misaligned
    /// pointers, or pointers into the guard area — those can never be
    /// payloads this region handed out.
    pub fn offset_of_payload(&self, ptr: *mut u8) -> Option<u32> {
        let addr = ptr.addr();
        let base = self.base.addr();
        if addr < base || addr >= base + self.len as usize {
            return None;
        }
        let rel = (addr - base) as u32;
        if rel % GRANULE != 0 || rel < FIRST_CHUNK_OFFSET + HEADER_SIZE {
            return None;
        }
        Some(rel - HEADER_SIZE)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::alloc::{Layout, alloc_zeroed, dealloc};

    /// A page-aligned zeroed buffer standing in for a raw boot extent.
    pub struct TestExtent {
        ptr: *mut u8,
        layout: Layout,
    }

    impl TestExtent {
        pub fn new(len: usize) -> Self {
            let layout = Layout::from_size_align(len, 4096).unwrap();
            // SAFETY: Layout is non-zero and valid.
            let ptr = unsafe { alloc_zeroed(layout) };
            assert!(!ptr.is_null());
            Self { ptr, layout }
        }

        pub fn ptr(&self) -> *mut u8 {
            self.ptr
        }

        pub fn len(&self) -> usize {
            self.layout.size()
        }
    }

    impl Drop for TestExtent {
        fn drop(&mut self) {
            // SAFETY: Allocated with this exact layout in `new`.
            unsafe { dealloc(self.ptr, self.layout) };
        }
    }
}
