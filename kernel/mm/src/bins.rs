//! Size-classed free-chunk bins.
//!
//! Free chunks are kept in [`NUM_BINS`] doubly-linked lists threaded
//! through the chunks' own payload areas (see
//! [`FreeLinks`](crate::chunk::FreeLinks)). Small sizes get one bin per
//! granule step; from [`SMALL_BIN_LIMIT`] upward each bin covers a
//! doubling power-of-two range, and a final bin collects everything of
//! a mebibyte or more. Within a bin chunks are sorted by ascending
//! size, so a forward scan stopping at the first large-enough chunk is
//! a best-fit search over that bin — and any chunk in a later bin is
//! guaranteed big enough, so later bins are taken by the head.

use crate::chunk::{ChunkRef, FreeLinks, GRANULE};
use crate::region::Region;

/// Sizes below this get an exact-size bin per granule step.
pub(crate) const SMALL_BIN_LIMIT: u32 = 256;

const SMALL_BINS: usize = (SMALL_BIN_LIMIT / GRANULE) as usize;

/// Doubling ranges from 256 B up to 1 MiB.
const DOUBLING_BINS: usize = 12;

/// Chunks of 1 MiB and above all share the last bin.
const TOP_BIN_LOG: u32 = 20;

/// Total bin count, the catch-all top bin included.
pub(crate) const NUM_BINS: usize = SMALL_BINS + DOUBLING_BINS + 1;

/// Maps a chunk size to its bin.
pub(crate) fn bin_index(size: u32) -> usize {
    if size < SMALL_BIN_LIMIT {
        (size / GRANULE) as usize
    } else {
        let log = 31 - size.leading_zeros();
        if log >= TOP_BIN_LOG {
            NUM_BINS - 1
        } else {
            SMALL_BINS + (log as usize - SMALL_BIN_LIMIT.trailing_zeros() as usize)
        }
    }
}

/// The bin head table. All link storage is in-band in the free chunks
/// themselves; this struct only holds the heads.
pub(crate) struct BinSet {
    heads: [Option<ChunkRef>; NUM_BINS],
}

impl BinSet {
    pub const fn new() -> Self {
        Self {
            heads: [None; NUM_BINS],
        }
    }

    fn size_of(regions: &[Region], chunk: ChunkRef) -> u32 {
        regions[chunk.region as usize].read_header(chunk.offset).size
    }

    fn links_of(regions: &[Region], chunk: ChunkRef) -> FreeLinks {
        regions[chunk.region as usize].read_links(chunk.offset)
    }

    fn set_links(regions: &[Region], chunk: ChunkRef, links: FreeLinks) {
        regions[chunk.region as usize].write_links(chunk.offset, links);
    }

    /// Inserts a free chunk into its bin, keeping the bin sorted by
    /// ascending size. The chunk's header must already carry its final
    /// size; its link words are overwritten here.
    pub fn insert(&mut self, regions: &[Region], chunk: ChunkRef) {
        let size = Self::size_of(regions, chunk);
        let bin = bin_index(size);

        let mut prev: Option<ChunkRef> = None;
        let mut cursor = self.heads[bin];
        while let Some(node) = cursor {
            if Self::size_of(regions, node) >= size {
                break;
            }
            prev = Some(node);
            cursor = Self::links_of(regions, node).next();
        }

        Self::set_links(regions, chunk, FreeLinks::new(cursor, prev));
        match prev {
            None => self.heads[bin] = Some(chunk),
            Some(p) => {
                let pl = Self::links_of(regions, p);
                Self::set_links(regions, p, FreeLinks::new(Some(chunk), pl.prev()));
            }
        }
        if let Some(n) = cursor {
            let nl = Self::links_of(regions, n);
            Self::set_links(regions, n, FreeLinks::new(nl.next(), Some(chunk)));
        }
    }

    /// Unlinks a free chunk from its bin.
    ///
    /// Panics if the chunk claims to be a bin head but the head table
    /// disagrees: that means the in-band links no longer match the bin
    /// table, and the heap metadata cannot be trusted.
    pub fn remove(&mut self, regions: &[Region], chunk: ChunkRef) {
        let size = Self::size_of(regions, chunk);
        let bin = bin_index(size);
        let links = Self::links_of(regions, chunk);

        match links.prev() {
            None => {
                assert_eq!(
                    self.heads[bin],
                    Some(chunk),
                    "free chunk links desynchronized from bin heads"
                );
                self.heads[bin] = links.next();
            }
            Some(p) => {
                let pl = Self::links_of(regions, p);
                Self::set_links(regions, p, FreeLinks::new(links.next(), pl.prev()));
            }
        }
        if let Some(n) = links.next() {
            let nl = Self::links_of(regions, n);
            Self::set_links(regions, n, FreeLinks::new(nl.next(), links.prev()));
        }
    }

    /// Finds the best-fitting free chunk of at least `size` bytes
    /// without unlinking it.
    ///
    /// Scans the home bin forward (ascending order makes the first hit
    /// the tightest fit), then falls through to the head of the next
    /// non-empty larger bin — every chunk there is big enough, and the
    /// head is that bin's smallest.
    pub fn find_at_least(&self, regions: &[Region], size: u32) -> Option<ChunkRef> {
        let start = bin_index(size);

        let mut cursor = self.heads[start];
        while let Some(node) = cursor {
            if Self::size_of(regions, node) >= size {
                return Some(node);
            }
            cursor = Self::links_of(regions, node).next();
        }

        self.heads[start + 1..].iter().copied().flatten().next()
    }

    #[cfg(test)]
    fn bin_sizes(&self, regions: &[Region], bin: usize) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cursor = self.heads[bin];
        while let Some(node) = cursor {
            out.push(Self::size_of(regions, node));
            cursor = Self::links_of(regions, node).next();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkHeader, PackedPreceding};
    use crate::region::test_support::TestExtent;

    #[test]
    fn bin_index_small_sizes_step_by_granule() {
        assert_eq!(bin_index(24), 3);
        assert_eq!(bin_index(32), 4);
        assert_eq!(bin_index(248), 31);
    }

    #[test]
    fn bin_index_doubling_ranges() {
        assert_eq!(bin_index(256), SMALL_BINS);
        assert_eq!(bin_index(511), SMALL_BINS);
        assert_eq!(bin_index(512), SMALL_BINS + 1);
        assert_eq!(bin_index(1 << 19), SMALL_BINS + 11);
        assert_eq!(bin_index((1 << 20) - 8), SMALL_BINS + 11);
    }

    #[test]
    fn bin_index_top_bin_catches_everything_above() {
        assert_eq!(bin_index(1 << 20), NUM_BINS - 1);
        assert_eq!(bin_index(1 << 24), NUM_BINS - 1);
        assert_eq!(bin_index(u32::MAX >> 1), NUM_BINS - 1);
    }

    /// Writes a fake free chunk header at `offset` so bin operations can
    /// read its size. Links are left for the BinSet to fill in.
    fn fake_free(region: &Region, offset: u32, size: u32) -> ChunkRef {
        region.write_header(
            offset,
            ChunkHeader {
                size,
                preceding: PackedPreceding::pack(0, false),
            },
        );
        ChunkRef { region: 0, offset }
    }

    fn setup() -> (TestExtent, Vec<Region>) {
        let mem = TestExtent::new(64 * 1024);
        let region = unsafe { Region::init(mem.ptr(), mem.len()) }.unwrap();
        (mem, vec![region])
    }

    #[test]
    fn insert_keeps_ascending_order() {
        let (_mem, regions) = setup();
        let mut bins = BinSet::new();
        // Same bin (sizes < 256 share a bin only when equal; use the
        // 512..1024 doubling bin to get mixed sizes together).
        let a = fake_free(&regions[0], 64, 768);
        let b = fake_free(&regions[0], 1024, 520);
        let c = fake_free(&regions[0], 2048, 640);
        bins.insert(&regions, a);
        bins.insert(&regions, b);
        bins.insert(&regions, c);
        assert_eq!(bins.bin_sizes(&regions, bin_index(520)), vec![520, 640, 768]);
    }

    #[test]
    fn find_prefers_tightest_fit_in_home_bin() {
        let (_mem, regions) = setup();
        let mut bins = BinSet::new();
        let small = fake_free(&regions[0], 64, 520);
        let big = fake_free(&regions[0], 1024, 768);
        bins.insert(&regions, big);
        bins.insert(&regions, small);
        assert_eq!(bins.find_at_least(&regions, 600), Some(big));
        assert_eq!(bins.find_at_least(&regions, 520), Some(small));
    }

    #[test]
    fn find_falls_through_to_larger_bin() {
        let (_mem, regions) = setup();
        let mut bins = BinSet::new();
        let big = fake_free(&regions[0], 64, 4096);
        bins.insert(&regions, big);
        // Home bin for 32 is empty; the 4 KiB chunk must be found.
        assert_eq!(bins.find_at_least(&regions, 32), Some(big));
    }

    #[test]
    fn find_reports_exhaustion() {
        let (_mem, regions) = setup();
        let mut bins = BinSet::new();
        let only = fake_free(&regions[0], 64, 64);
        bins.insert(&regions, only);
        assert_eq!(bins.find_at_least(&regions, 128), None);
    }

    #[test]
    fn remove_head_middle_and_tail() {
        let (_mem, regions) = setup();
        let mut bins = BinSet::new();
        let a = fake_free(&regions[0], 64, 520);
        let b = fake_free(&regions[0], 1024, 640);
        let c = fake_free(&regions[0], 2048, 768);
        bins.insert(&regions, a);
        bins.insert(&regions, b);
        bins.insert(&regions, c);

        let bin = bin_index(520);
        bins.remove(&regions, b);
        assert_eq!(bins.bin_sizes(&regions, bin), vec![520, 768]);
        bins.remove(&regions, a);
        assert_eq!(bins.bin_sizes(&regions, bin), vec![768]);
        bins.remove(&regions, c);
        assert_eq!(bins.bin_sizes(&regions, bin), Vec::<u32>::new());
    }

    #[test]
    fn equal_sizes_coexist_in_one_bin() {
        let (_mem, regions) = setup();
        let mut bins = BinSet::new();
        let a = fake_free(&regions[0], 64, 32);
        let b = fake_free(&regions[0], 1024, 32);
        bins.insert(&regions, a);
        bins.insert(&regions, b);
        assert_eq!(bins.bin_sizes(&regions, bin_index(32)), vec![32, 32]);
        bins.remove(&regions, a);
        assert_eq!(bins.find_at_least(&regions, 32), Some(b));
    }
}
