//! Services the host system provides to the allocator.
//!
//! The allocator does not own physical memory. The page-level memory manager
//! owns it and exposes the classification and migration primitives here; the
//! boot-time reservation subsystem owns the address space before dynamic
//! allocation exists. Both are modeled as traits so the core stays
//! independent of any particular kernel.

use snafu::Snafu;

/// How ranges claimed from a region must be prepared before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationClass {
    /// The backing memory is already exclusively reclaimable; claimed ranges
    /// are handed out directly.
    Movable,
    /// The backing memory may still hold unrelated content, organized in
    /// granule-sized units. Claiming a range requires evicting that content
    /// first, and freeing returns the pages to general circulation.
    NeedsEviction,
}

/// The page-level memory manager the allocator is embedded in.
///
/// All methods take physical byte addresses. Implementations are queried and
/// invoked under the allocator's own serialization, never concurrently for
/// overlapping ranges.
pub trait MemoryManager {
    /// Determines the allocation class of `[start, start + size)`.
    ///
    /// The whole range must exist, lie in one uniform memory-region class,
    /// and every granule in it must carry the same allocation-class tag
    /// consistent with that memory-region class. Any inconsistency is an
    /// error: the range is not safe to allocate from.
    fn classify_range(&self, start: usize, size: usize) -> Result<AllocationClass, ClassifyError>;

    /// Marks the granules covering `[start, start + size)` as belonging to
    /// the contiguous allocator's allocation class.
    ///
    /// The range is granule-aligned and was reserved before the memory
    /// manager took ownership of free memory.
    fn mark_contiguous_range(&self, start: usize, size: usize);

    /// Relocates all unrelated content out of `[start, start + size)`,
    /// leaving the range exclusively owned by the caller.
    ///
    /// May block while waiting on reclaim. Returns an error if any occupant
    /// cannot be moved; the range is then still shared and must not be used.
    fn evict_range(&self, start: usize, size: usize) -> Result<(), EvictError>;

    /// Returns `count` pages at `start` to general circulation, undoing a
    /// successful [`evict_range`](Self::evict_range).
    fn release_range(&self, start: usize, count: usize);
}

/// The boot-time physical-memory reservation subsystem.
///
/// Only usable during early boot, while the subsystem still owns unclaimed
/// physical address space.
pub trait BootMemory {
    /// Reserves `size` bytes aligned to `align`.
    ///
    /// A non-zero `hint` requests exactly that placement; `hint == 0` lets
    /// the subsystem pick one.
    fn reserve(&self, hint: usize, size: usize, align: usize) -> Result<usize, BootReserveError>;

    /// Releases a reservation made by [`reserve`](Self::reserve).
    fn unreserve(&self, start: usize, size: usize);
}

/// Why a range could not be classified.
#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyError {
    /// A page frame in the range does not exist.
    #[snafu(display("page frame {pfn:#x} does not exist"))]
    MissingPage { pfn: usize },
    /// The range crosses into a different memory-region class.
    #[snafu(display("page frame {pfn:#x} lies in a different memory-region class"))]
    MixedRegionClass { pfn: usize },
    /// A granule in the range carries an inconsistent allocation-class tag.
    #[snafu(display("granule at {start:#x} carries an inconsistent allocation class"))]
    MixedAllocationClass { start: usize },
}

/// Why eviction left a range shared.
#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
pub enum EvictError {
    /// The range holds content that cannot be relocated.
    #[snafu(display("unmovable content at page frame {pfn:#x}"))]
    Unmovable { pfn: usize },
    /// Not enough free memory elsewhere to relocate the occupants into.
    #[snafu(display("out of memory relocating occupants"))]
    OutOfMemory,
}

/// Why a boot-time reservation failed.
#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
pub enum BootReserveError {
    /// The hinted range is already reserved.
    #[snafu(display("range {start:#x}+{size:#x} is already reserved"))]
    Busy { start: usize, size: usize },
    /// No suitably aligned free range of the requested size exists.
    #[snafu(display("no free range of {size:#x} bytes"))]
    Exhausted { size: usize },
}
