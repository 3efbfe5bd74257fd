//! In-band chunk metadata.
//!
//! Every chunk of heap memory — allocated or free — starts with a
//! [`ChunkHeader`]: its own total size and a [`PackedPreceding`] word
//! carrying the size of the physically preceding chunk plus this chunk's
//! allocated flag. Adjacent chunks therefore satisfy
//! `following.preceding.size() == chunk.size`, which is what makes O(1)
//! backward coalescing possible without any external index.
//!
//! Free chunks additionally carry a [`FreeLinks`] pair right after the
//! header: intrusive forward/back links into their size-class bin.
//! Chunks are identified by a [`ChunkRef`] — a region index plus a byte
//! offset into that region — never by raw pointers, so every access can
//! be bounds-checked against the region length first.

/// Alignment granule. All chunk sizes and payload addresses are
/// multiples of this.
pub const GRANULE: u32 = 8;

/// Size of the in-band [`ChunkHeader`] (one granule).
pub const HEADER_SIZE: u32 = 8;

/// Size of the intrusive free-list links stored in a free chunk's
/// payload area.
pub(crate) const LINKS_SIZE: u32 = 16;

/// Smallest chunk that can exist: header plus free-list links. Also the
/// splitting threshold — a remainder below this stays with the
/// allocation instead of becoming a free chunk.
pub const MIN_CHUNK_SIZE: u32 = HEADER_SIZE + LINKS_SIZE;

/// High bit of the preceding-size word: "this chunk is allocated".
const ALLOC_BIT: u32 = 1 << 31;

/// Largest encodable chunk size. The high bit is reserved for the
/// allocated flag, so sizes are confined to 31 bits.
pub(crate) const MAX_CHUNK_SIZE: u32 = ALLOC_BIT - GRANULE;

/// Pads a requested payload size up to a legal chunk size: header
/// overhead added, rounded up to the granule, floored at
/// [`MIN_CHUNK_SIZE`].
///
/// Returns `None` when the padded size would exceed the maximum
/// encodable chunk size — oversized requests are rejected here, at the
/// API boundary, never signalled via corrupt headers.
#[must_use]
pub fn padded_size(requested: usize) -> Option<u32> {
    let granule = GRANULE as usize;
    let total = requested.checked_add(HEADER_SIZE as usize)?;
    let padded = total.checked_add(granule - 1)? & !(granule - 1);
    let padded = padded.max(MIN_CHUNK_SIZE as usize);
    if padded > MAX_CHUNK_SIZE as usize {
        None
    } else {
        Some(padded as u32)
    }
}

/// The preceding-size word: a tagged integer packing the size of the
/// physically preceding chunk (low 31 bits) with this chunk's allocated
/// flag (high bit).
///
/// The bit trick is confined to this type; everything else goes through
/// [`pack`](Self::pack) / [`size`](Self::size) /
/// [`is_allocated`](Self::is_allocated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct PackedPreceding(u32);

impl PackedPreceding {
    /// Packs a preceding-chunk size and an allocated flag into one word.
    pub fn pack(preceding_size: u32, allocated: bool) -> Self {
        debug_assert!(preceding_size <= MAX_CHUNK_SIZE);
        Self(preceding_size | if allocated { ALLOC_BIT } else { 0 })
    }

    /// Size of the physically preceding chunk.
    pub fn size(self) -> u32 {
        self.0 & !ALLOC_BIT
    }

    /// Whether the chunk carrying this word is allocated.
    pub fn is_allocated(self) -> bool {
        self.0 & ALLOC_BIT != 0
    }
}

/// The header written at the start of every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub(crate) struct ChunkHeader {
    /// Total chunk size, header included. Always a granule multiple,
    /// never zero.
    pub size: u32,
    /// Preceding-chunk size plus this chunk's allocated flag.
    pub preceding: PackedPreceding,
}

/// Identifies a chunk as a byte offset within one of a heap's regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkRef {
    /// Index into the heap's region table.
    pub region: u32,
    /// Byte offset of the chunk header from the region base.
    pub offset: u32,
}

impl ChunkRef {
    const NONE_BITS: u64 = u64::MAX;

    /// Packs the reference into the u64 stored in-band by [`FreeLinks`].
    fn to_bits(self) -> u64 {
        (u64::from(self.region) << 32) | u64::from(self.offset)
    }

    fn from_bits(bits: u64) -> Option<Self> {
        if bits == Self::NONE_BITS {
            None
        } else {
            Some(Self {
                region: (bits >> 32) as u32,
                offset: bits as u32,
            })
        }
    }

    fn opt_to_bits(opt: Option<Self>) -> u64 {
        opt.map_or(Self::NONE_BITS, Self::to_bits)
    }
}

/// Intrusive bin links stored in the payload area of a free chunk.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) struct FreeLinks {
    next_bits: u64,
    prev_bits: u64,
}

impl FreeLinks {
    /// Builds links from optional neighbor references.
    pub fn new(next: Option<ChunkRef>, prev: Option<ChunkRef>) -> Self {
        Self {
            next_bits: ChunkRef::opt_to_bits(next),
            prev_bits: ChunkRef::opt_to_bits(prev),
        }
    }

    /// The next (larger-or-equal) chunk in the bin, if any.
    pub fn next(self) -> Option<ChunkRef> {
        ChunkRef::from_bits(self.next_bits)
    }

    /// The previous (smaller-or-equal) chunk in the bin, if any.
    pub fn prev(self) -> Option<ChunkRef> {
        ChunkRef::from_bits(self.prev_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_roundtrip_free() {
        let p = PackedPreceding::pack(128, false);
        assert_eq!(p.size(), 128);
        assert!(!p.is_allocated());
    }

    #[test]
    fn pack_roundtrip_allocated() {
        let p = PackedPreceding::pack(MAX_CHUNK_SIZE, true);
        assert_eq!(p.size(), MAX_CHUNK_SIZE);
        assert!(p.is_allocated());
    }

    #[test]
    fn alloc_flag_does_not_disturb_size() {
        let free = PackedPreceding::pack(4096, false);
        let taken = PackedPreceding::pack(4096, true);
        assert_eq!(free.size(), taken.size());
        assert_ne!(free, taken);
    }

    #[test]
    fn padded_size_rounds_to_granule() {
        // 17 + 8 header = 25 → 32.
        assert_eq!(padded_size(17), Some(32));
        // Exact multiple stays put.
        assert_eq!(padded_size(24), Some(32));
        assert_eq!(padded_size(56), Some(64));
    }

    #[test]
    fn padded_size_floors_at_min_chunk() {
        assert_eq!(padded_size(1), Some(MIN_CHUNK_SIZE));
        assert_eq!(padded_size(8), Some(MIN_CHUNK_SIZE));
        assert_eq!(padded_size(16), Some(MIN_CHUNK_SIZE));
    }

    #[test]
    fn padded_size_rejects_oversized() {
        assert_eq!(padded_size(usize::MAX), None);
        assert_eq!(padded_size(MAX_CHUNK_SIZE as usize), None);
        // Largest request that still fits.
        let largest = (MAX_CHUNK_SIZE - HEADER_SIZE) as usize;
        assert_eq!(padded_size(largest), Some(MAX_CHUNK_SIZE));
    }

    #[test]
    fn chunk_ref_bits_roundtrip() {
        let r = ChunkRef {
            region: 3,
            offset: 0x1000,
        };
        assert_eq!(ChunkRef::from_bits(r.to_bits()), Some(r));
        assert_eq!(ChunkRef::from_bits(ChunkRef::NONE_BITS), None);
    }

    #[test]
    fn free_links_roundtrip() {
        let a = ChunkRef {
            region: 0,
            offset: 8,
        };
        let b = ChunkRef {
            region: 1,
            offset: 64,
        };
        let links = FreeLinks::new(Some(a), Some(b));
        assert_eq!(links.next(), Some(a));
        assert_eq!(links.prev(), Some(b));

        let ends = FreeLinks::new(None, None);
        assert_eq!(ends.next(), None);
        assert_eq!(ends.prev(), None);
    }

    #[test]
    fn header_is_one_granule() {
        assert_eq!(core::mem::size_of::<ChunkHeader>(), HEADER_SIZE as usize);
        assert_eq!(core::mem::size_of::<FreeLinks>(), LINKS_SIZE as usize);
    }
}
