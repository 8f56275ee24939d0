//! A sub-allocator handing out aligned ranges from one address span.
//!
//! `RangePool` owns a span of addresses and serves sub-ranges of it:
//! [`take`](RangePool::take) claims an aligned range with a first-fit search
//! over the free extents, [`give_back`](RangePool::give_back) returns a
//! previously claimed range. Freed ranges merge with adjacent free extents,
//! so releasing everything restores the pool to a single extent covering the
//! whole span.
//!
//! # Features
//!
//! - **First-fit with alignment**: claims are placed at the lowest address
//!   satisfying the requested power-of-two alignment
//! - **Validated returns**: the pool records outstanding claims; returning a
//!   range that was never handed out, or with the wrong size, is a checked
//!   error rather than silent free-list corruption
//! - **Automatic merging**: returned ranges coalesce with adjacent free
//!   extents
//! - **No-std support**: only needs `alloc`
//!
//! # Examples
//!
//! ```
//! use range_pool::RangePool;
//!
//! let mut pool = RangePool::new(0x1000..0x5000).unwrap();
//!
//! // Claim 0x1000 bytes aligned to 0x1000.
//! let first = pool.take(0x1000, 12).unwrap();
//! assert_eq!(first, 0x1000);
//!
//! let second = pool.take(0x1000, 12).unwrap();
//! assert_eq!(second, 0x2000);
//!
//! // Returning the first range makes it available again.
//! pool.give_back(first, 0x1000).unwrap();
//! assert_eq!(pool.take(0x1000, 12), Some(0x1000));
//! ```
//!
//! # Performance
//!
//! - Take: O(n) first-fit scan plus O(n) ordered insert, where n is the
//!   number of extents
//! - Give back: O(log n) lookup plus O(n) ordered insert
//! - Memory: two heap-allocated extent lists, growing with fragmentation

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{collections::TryReserveError, vec::Vec};
use core::ops::Range;

use snafu::{OptionExt as _, Snafu, ensure};

/// Extent-list capacity reserved up front so a fresh pool does not allocate
/// on the first few operations.
const INITIAL_EXTENTS: usize = 8;

/// Error returned by [`RangePool::give_back`] for a range the pool never
/// handed out in that exact shape.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum GiveBackError {
    /// No outstanding claim starts at the given address.
    #[snafu(display("no outstanding claim at {start:#x}"))]
    NotTaken {
        /// Start address passed to `give_back`.
        start: usize,
    },
    /// A claim starts at the given address, but with a different size.
    #[snafu(display("claim at {start:#x} has size {expected:#x}, not {size:#x}"))]
    SizeMismatch {
        /// Start address passed to `give_back`.
        start: usize,
        /// Size passed to `give_back`.
        size: usize,
        /// Size the range was actually claimed with.
        expected: usize,
    },
}

/// An allocator over one address span.
///
/// Free extents are kept sorted by start address, disjoint and non-adjacent;
/// outstanding claims are kept sorted as well. Together the two lists always
/// partition the span, so
/// [`free_bytes`](Self::free_bytes)` + `[`outstanding_bytes`](Self::outstanding_bytes)
/// equals the span length at all times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePool {
    span: Range<usize>,
    free: Vec<Range<usize>>,
    taken: Vec<Range<usize>>,
}

impl RangePool {
    /// Creates a pool with the whole `span` free.
    ///
    /// Fails if the initial bookkeeping capacity cannot be allocated.
    ///
    /// # Panics
    ///
    /// Panics if `span.start > span.end`.
    ///
    /// # Examples
    ///
    /// ```
    /// use range_pool::RangePool;
    ///
    /// let pool = RangePool::new(0x1000..0x3000).unwrap();
    /// assert_eq!(pool.free_bytes(), 0x2000);
    /// ```
    pub fn new(span: Range<usize>) -> Result<Self, TryReserveError> {
        assert!(span.start <= span.end, "invalid span: {span:?}");
        let mut free = Vec::new();
        free.try_reserve(INITIAL_EXTENTS)?;
        let mut taken = Vec::new();
        taken.try_reserve(INITIAL_EXTENTS)?;
        if !span.is_empty() {
            free.push(span.clone());
        }
        Ok(Self { span, free, taken })
    }

    /// Claims `size` bytes aligned to `1 << align_order` bytes.
    ///
    /// The claim is placed first-fit: the lowest suitably aligned position
    /// within the lowest free extent that can hold it. Returns `None` when no
    /// free extent satisfies both size and alignment; exhaustion is not an
    /// error, callers decide whether to retry later.
    ///
    /// A `size` of zero always returns `None`.
    ///
    /// # Examples
    ///
    /// ```
    /// use range_pool::RangePool;
    ///
    /// let mut pool = RangePool::new(0x100..0x1100).unwrap();
    ///
    /// // 0x100 is not 4 KiB aligned; the claim lands at 0x1000.
    /// assert_eq!(pool.take(0x100, 12), Some(0x1000));
    /// // Too big for what is left.
    /// assert_eq!(pool.take(0x2000, 0), None);
    /// ```
    pub fn take(&mut self, size: usize, align_order: u32) -> Option<usize> {
        if size == 0 || align_order >= usize::BITS {
            return None;
        }
        let align = 1_usize << align_order;
        let (index, start) = self.free.iter().enumerate().find_map(|(index, extent)| {
            let start = extent.start.checked_next_multiple_of(align)?;
            let end = start.checked_add(size)?;
            (end <= extent.end).then_some((index, start))
        })?;

        let extent = self.free.remove(index);
        let end = start + size;
        if end < extent.end {
            self.free.insert(index, end..extent.end);
        }
        if extent.start < start {
            self.free.insert(index, extent.start..start);
        }

        let slot = self.taken.partition_point(|taken| taken.start < start);
        self.taken.insert(slot, start..end);
        Some(start)
    }

    /// Returns a range previously claimed with [`take`](Self::take).
    ///
    /// `start` and `size` must match the claim exactly; anything else,
    /// including a second return of the same range, is rejected and leaves
    /// the pool untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use range_pool::{GiveBackError, RangePool};
    ///
    /// let mut pool = RangePool::new(0..0x4000).unwrap();
    /// let start = pool.take(0x2000, 0).unwrap();
    ///
    /// assert_eq!(pool.give_back(start, 0x2000), Ok(()));
    /// assert_eq!(
    ///     pool.give_back(start, 0x2000),
    ///     Err(GiveBackError::NotTaken { start })
    /// );
    /// ```
    pub fn give_back(&mut self, start: usize, size: usize) -> Result<(), GiveBackError> {
        let index = self
            .taken
            .binary_search_by(|taken| taken.start.cmp(&start))
            .ok()
            .context(NotTakenSnafu { start })?;
        let expected = self.taken[index].len();
        ensure!(expected == size, SizeMismatchSnafu { start, size, expected });
        let range = self.taken.remove(index);
        self.insert_free(range);
        Ok(())
    }

    /// Inserts `range` into the free list, merging with adjacent extents.
    ///
    /// `range` never overlaps an existing free extent: the free and taken
    /// lists partition the span, and `range` was just removed from the taken
    /// list.
    fn insert_free(&mut self, mut range: Range<usize>) {
        let mut index = self.free.partition_point(|free| free.start < range.start);
        if index > 0 && self.free[index - 1].end == range.start {
            index -= 1;
            range.start = self.free[index].start;
            self.free.remove(index);
        }
        if index < self.free.len() && self.free[index].start == range.end {
            range.end = self.free[index].end;
            self.free.remove(index);
        }
        self.free.insert(index, range);
    }

    /// Returns the span this pool allocates from.
    #[must_use]
    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }

    /// Returns the free extents, sorted by start address.
    #[must_use]
    pub fn free_extents(&self) -> &[Range<usize>] {
        self.free.as_slice()
    }

    /// Total bytes currently free.
    ///
    /// # Examples
    ///
    /// ```
    /// use range_pool::RangePool;
    ///
    /// let mut pool = RangePool::new(0..0x4000).unwrap();
    /// let start = pool.take(0x1000, 0).unwrap();
    /// assert_eq!(pool.free_bytes(), 0x3000);
    /// assert_eq!(pool.outstanding_bytes(), 0x1000);
    ///
    /// pool.give_back(start, 0x1000).unwrap();
    /// assert_eq!(pool.free_bytes(), 0x4000);
    /// ```
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.free.iter().map(|extent| extent.len()).sum()
    }

    /// Total bytes in outstanding claims.
    #[must_use]
    pub fn outstanding_bytes(&self) -> usize {
        self.taken.iter().map(|claim| claim.len()).sum()
    }

    /// Returns `true` if there are no outstanding claims.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.taken.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_is_first_fit() {
        let mut pool = RangePool::new(0x1000..0x9000).unwrap();
        assert_eq!(pool.take(0x1000, 0), Some(0x1000));
        assert_eq!(pool.take(0x2000, 0), Some(0x2000));
        assert_eq!(pool.take(0x1000, 0), Some(0x4000));
    }

    #[test]
    fn take_honors_alignment() {
        let mut pool = RangePool::new(0x1800..0x9000).unwrap();
        let start = pool.take(0x1000, 13).unwrap();
        assert_eq!(start % 0x2000, 0);
        assert_eq!(start, 0x2000);
    }

    #[test]
    fn aligned_take_splits_extent() {
        let mut pool = RangePool::new(0x1800..0x4000).unwrap();
        assert_eq!(pool.take(0x1000, 13), Some(0x2000));
        assert_eq!(pool.free_extents(), &[0x1800..0x2000, 0x3000..0x4000]);
    }

    #[test]
    fn take_skips_extent_too_small_for_alignment() {
        let mut pool = RangePool::new(0x1000..0x8000).unwrap();
        // Leave two free extents: 0x1000..0x2000 and 0x3000..0x8000.
        let hole = pool.take(0x1000, 12).unwrap();
        assert_eq!(hole, 0x1000);
        let blocker = pool.take(0x1000, 13).unwrap();
        assert_eq!(blocker, 0x2000);
        pool.give_back(hole, 0x1000).unwrap();
        // The first extent has room but cannot satisfy order-13 alignment
        // for 0x1000 bytes; first fit moves on to the second extent.
        assert_eq!(pool.take(0x1000, 13), Some(0x4000));
    }

    #[test]
    fn take_exhausted_returns_none() {
        let mut pool = RangePool::new(0..0x2000).unwrap();
        assert_eq!(pool.take(0x2000, 0), Some(0));
        assert_eq!(pool.take(1, 0), None);
    }

    #[test]
    fn take_zero_size_returns_none() {
        let mut pool = RangePool::new(0..0x2000).unwrap();
        assert_eq!(pool.take(0, 0), None);
        assert_eq!(pool.free_bytes(), 0x2000);
    }

    #[test]
    fn take_huge_alignment_returns_none() {
        let mut pool = RangePool::new(0x1000..0x2000).unwrap();
        assert_eq!(pool.take(0x100, usize::BITS - 1), None);
        assert_eq!(pool.take(0x100, usize::BITS), None);
    }

    #[test]
    fn take_from_empty_span_returns_none() {
        let mut pool = RangePool::new(0x1000..0x1000).unwrap();
        assert_eq!(pool.take(1, 0), None);
    }

    #[test]
    #[should_panic(expected = "invalid span")]
    fn new_rejects_reversed_span() {
        #[expect(clippy::reversed_empty_ranges)]
        let _ = RangePool::new(0x2000..0x1000);
    }

    #[test]
    #[expect(clippy::single_range_in_vec_init)]
    fn give_back_merges_with_neighbors() {
        let mut pool = RangePool::new(0..0x3000).unwrap();
        let a = pool.take(0x1000, 0).unwrap();
        let b = pool.take(0x1000, 0).unwrap();
        let c = pool.take(0x1000, 0).unwrap();
        pool.give_back(a, 0x1000).unwrap();
        pool.give_back(c, 0x1000).unwrap();
        assert_eq!(pool.free_extents(), &[0..0x1000, 0x2000..0x3000]);
        pool.give_back(b, 0x1000).unwrap();
        assert_eq!(pool.free_extents(), &[0..0x3000]);
    }

    #[test]
    fn round_trip_reuses_same_range() {
        let mut pool = RangePool::new(0x4000..0x8000).unwrap();
        let start = pool.take(0x2000, 0).unwrap();
        pool.give_back(start, 0x2000).unwrap();
        assert_eq!(pool.take(0x2000, 0), Some(start));
    }

    #[test]
    fn give_back_rejects_unknown_range() {
        let mut pool = RangePool::new(0..0x4000).unwrap();
        let _ = pool.take(0x1000, 0).unwrap();
        assert_eq!(
            pool.give_back(0x2000, 0x1000),
            Err(GiveBackError::NotTaken { start: 0x2000 })
        );
    }

    #[test]
    fn give_back_rejects_double_free() {
        let mut pool = RangePool::new(0..0x4000).unwrap();
        let start = pool.take(0x1000, 0).unwrap();
        pool.give_back(start, 0x1000).unwrap();
        assert_eq!(
            pool.give_back(start, 0x1000),
            Err(GiveBackError::NotTaken { start })
        );
    }

    #[test]
    fn give_back_rejects_wrong_size() {
        let mut pool = RangePool::new(0..0x4000).unwrap();
        let start = pool.take(0x2000, 0).unwrap();
        assert_eq!(
            pool.give_back(start, 0x1000),
            Err(GiveBackError::SizeMismatch {
                start,
                size: 0x1000,
                expected: 0x2000,
            })
        );
        // The claim is still outstanding and can be returned correctly.
        assert_eq!(pool.outstanding_bytes(), 0x2000);
        pool.give_back(start, 0x2000).unwrap();
        assert!(pool.is_idle());
    }

    #[test]
    fn free_plus_outstanding_equals_span() {
        let mut pool = RangePool::new(0x1000..0x11000).unwrap();
        let span_len = pool.span().len();
        let mut claims = Vec::new();
        for order in [12, 13, 12, 14] {
            let start = pool.take(0x1000, order).unwrap();
            claims.push(start);
            assert_eq!(pool.free_bytes() + pool.outstanding_bytes(), span_len);
        }
        for start in claims {
            pool.give_back(start, 0x1000).unwrap();
            assert_eq!(pool.free_bytes() + pool.outstanding_bytes(), span_len);
        }
        assert_eq!(pool.free_bytes(), span_len);
        assert!(pool.is_idle());
    }
}
