//! Guest-PC interval bookkeeping for cache invalidation.
//!
//! Every emitted block registers the guest address interval it was
//! translated from. Invalidation queries collect the location descriptors
//! of all blocks overlapping the given ranges and drops their intervals.

use crate::loc::LocationDescriptor;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

/// An interval map from block start address to (inclusive end, blocks).
#[derive(Default)]
pub struct BlockRanges {
    entries: BTreeMap<u64, Vec<(u64, LocationDescriptor)>>,
}

impl BlockRanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a block covering `range` of the guest PC space.
    pub fn add_range(&mut self, range: RangeInclusive<u64>, location: LocationDescriptor) {
        let (start, end) = (*range.start(), *range.end());
        debug_assert!(start <= end);
        self.entries.entry(start).or_default().push((end, location));
    }

    /// Removes and returns every block overlapping any of `ranges`.
    pub fn invalidate_ranges(&mut self, ranges: &[RangeInclusive<u64>]) -> Vec<LocationDescriptor> {
        let mut invalidated = Vec::new();
        for range in ranges {
            let (lo, hi) = (*range.start(), *range.end());
            // Any entry starting at or below `hi` may overlap; filter by its
            // recorded end.
            let starts: Vec<u64> = self.entries.range(..=hi).map(|(&s, _)| s).collect();
            for start in starts {
                let blocks = self.entries.get_mut(&start).unwrap();
                blocks.retain(|&(end, location)| {
                    if end >= lo {
                        invalidated.push(location);
                        false
                    } else {
                        true
                    }
                });
                if blocks.is_empty() {
                    self.entries.remove(&start);
                }
            }
        }
        invalidated
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(n: u64) -> LocationDescriptor {
        LocationDescriptor::new(n)
    }

    #[test]
    fn overlapping_blocks_are_invalidated() {
        let mut ranges = BlockRanges::new();
        ranges.add_range(0x1000..=0x100f, loc(1));
        ranges.add_range(0x2000..=0x200f, loc(2));
        ranges.add_range(0x1008..=0x1017, loc(3));

        let hit = ranges.invalidate_ranges(&[0x100c..=0x100c]);
        assert_eq!(hit.len(), 2);
        assert!(hit.contains(&loc(1)) && hit.contains(&loc(3)));

        // Already removed; a second invalidation finds nothing.
        assert!(ranges.invalidate_ranges(&[0x1000..=0x1fff]).is_empty());
        assert_eq!(ranges.invalidate_ranges(&[0x0..=0xffff_ffff]), vec![loc(2)]);
    }

    #[test]
    fn non_overlapping_blocks_survive() {
        let mut ranges = BlockRanges::new();
        ranges.add_range(0x3000..=0x300f, loc(1));
        assert!(ranges.invalidate_ranges(&[0x3010..=0x4000]).is_empty());
        assert!(ranges.invalidate_ranges(&[0x2000..=0x2fff]).is_empty());
        assert_eq!(ranges.invalidate_ranges(&[0x300f..=0x300f]), vec![loc(1)]);
    }
}
