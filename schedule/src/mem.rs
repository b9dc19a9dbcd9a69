//! Byte ranges of cache memory and free-list arithmetic.

use std::fmt;

use tracing::trace;

/// A half-open range of bytes within the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct MemRange {
    pub begin: usize,
    pub end: usize,
}

impl MemRange {
    pub fn new(begin: usize, end: usize) -> Self {
        Self { begin, end }
    }

    pub fn size(&self) -> usize {
        self.end - self.begin
    }

    pub fn overlaps(&self, other: MemRange) -> bool {
        self.begin < other.end && other.begin < self.end
    }
}

impl fmt::Display for MemRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} - {})", self.begin, self.end)
    }
}

/// True iff `range` overlaps any element of `ranges`.
pub(crate) fn overlaps_any(range: MemRange, ranges: &[MemRange]) -> bool {
    ranges.iter().any(|r| range.overlaps(*r))
}

/// Remove `sub` from every range in the list, keeping the list a set of
/// pairwise-disjoint intervals. A range split by `sub` becomes two.
pub(crate) fn subtract_range(sub: MemRange, ranges: &mut Vec<MemRange>) {
    trace!(sub = %sub, "subtracting range");
    let mut result = Vec::with_capacity(ranges.len() + 1);
    for range in ranges.drain(..) {
        if !sub.overlaps(range) {
            result.push(range);
        } else if sub.begin <= range.begin {
            // Chunk off the low side, or swallow the range entirely.
            if sub.end < range.end {
                result.push(MemRange::new(sub.end, range.end));
            }
        } else if range.end < sub.end {
            // Chunk off the high side.
            result.push(MemRange::new(range.begin, sub.begin));
        } else {
            // Split the range.
            result.push(MemRange::new(range.begin, sub.begin));
            result.push(MemRange::new(sub.end, range.end));
        }
    }
    *ranges = result;
}

/// Round `size` up to the next multiple of `alignment`.
pub(crate) fn align_up(size: usize, alignment: usize) -> usize {
    size.div_ceil(alignment) * alignment
}
