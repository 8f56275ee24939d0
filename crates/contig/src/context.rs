//! Allocation contexts and the allocate/free engine.
//!
//! A [`Context`] wraps one physical range with its allocation class and a
//! [`RangePool`] serving sub-ranges of it. Allocation claims a sub-range from
//! the pool and, for [`AllocationClass::NeedsEviction`] contexts, evicts
//! whatever unrelated content currently occupies it; freeing reverses both
//! steps. Every pool mutation and every eviction happens under the
//! subsystem-wide lock owned by [`Contig`].

use alloc::collections::TryReserveError;
use core::ops::Range;

use log::{debug, trace};
use range_pool::{GiveBackError, RangePool};
use snafu::{Location, OptionExt as _, ResultExt as _, Snafu, ensure};
use spin::Mutex;

use crate::{
    host::{AllocationClass, ClassifyError, EvictError, MemoryManager},
    layout::{Align as _, PAGE_SHIFT, PAGE_SIZE},
    registrar::Contig,
};

/// A region wrapped for contiguous allocation.
///
/// Created over a page-aligned range once the subsystem is activated.
/// Callers share a context by reference; the pool inside is never exposed.
/// Dropping the context destroys it; all allocations must have been freed
/// first (a precondition, only checked by a `debug_assert!`).
#[derive(Debug)]
pub struct Context<'c, M> {
    system: &'c Contig<M>,
    manager: &'c M,
    class: AllocationClass,
    span: Range<usize>,
    pool: Mutex<RangePool>,
}

/// A contiguous physical range, exclusively owned by the caller until
/// returned with [`Context::free`].
#[must_use = "the range stays claimed until returned with Context::free"]
#[derive(Debug, PartialEq, Eq)]
pub struct ContigRange {
    pub(crate) start: usize,
    pub(crate) count: usize,
}

impl ContigRange {
    /// Physical start address. Aligned to the order requested at allocation.
    #[must_use]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Length in pages.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Length in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.count << PAGE_SHIFT
    }
}

/// Error returned by [`Context::new`].
#[derive(Debug, Snafu)]
pub enum CreateError {
    /// The context size is zero.
    #[snafu(display("context size must not be zero"))]
    InvalidSize {
        #[snafu(implicit)]
        location: Location,
    },
    /// Start or size is not page-aligned.
    #[snafu(display("context {start:#x}+{size:#x} is not page-aligned"))]
    Misaligned {
        start: usize,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// The range wraps the address space.
    #[snafu(display("context {start:#x}+{size:#x} wraps the address space"))]
    Overflow {
        start: usize,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// [`Contig::activate`] has not run yet.
    #[snafu(display("the contiguous allocator is not activated"))]
    NotActivated {
        #[snafu(implicit)]
        location: Location,
    },
    /// The range overlaps a live context or crosses a registered region
    /// boundary.
    #[snafu(display("range {start:#x}+{size:#x} is already claimed or crosses a region boundary"))]
    Busy {
        start: usize,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// The range is not uniform enough to allocate from.
    #[snafu(display("range cannot be classified: {source}"))]
    Classify {
        source: ClassifyError,
        #[snafu(implicit)]
        location: Location,
    },
    /// The context's bookkeeping could not be allocated.
    #[snafu(display("failed to allocate context bookkeeping: {source}"))]
    Bookkeeping {
        source: TryReserveError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Error returned by [`Context::allocate`].
#[derive(Debug, Snafu)]
pub enum AllocError {
    /// The page count is zero.
    #[snafu(display("allocation page count must not be zero"))]
    ZeroCount {
        #[snafu(implicit)]
        location: Location,
    },
    /// The page count does not fit the address space.
    #[snafu(display("{count} pages exceed the addressable range"))]
    TooLarge {
        count: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// No free extent satisfies the size and alignment. Retry policy is the
    /// caller's concern.
    #[snafu(display("no free extent of {count} pages at order-{order} alignment"))]
    Exhausted {
        count: usize,
        order: u32,
        #[snafu(implicit)]
        location: Location,
    },
    /// Eviction could not clear the claimed range; the pool has been
    /// restored as if the call never happened.
    #[snafu(display("failed to evict occupants of {start:#x}+{size:#x}: {source}"))]
    Evict {
        start: usize,
        size: usize,
        source: EvictError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Error returned by [`Context::free`] for a range this context never
/// handed out in that exact shape.
#[derive(Debug, Snafu)]
#[snafu(display("freed range is not an outstanding allocation of this context: {source}"))]
pub struct FreeError {
    source: GiveBackError,
    #[snafu(implicit)]
    location: Location,
}

impl<'c, M> Context<'c, M>
where
    M: MemoryManager,
{
    /// Creates a context over `[start, start + size)`.
    ///
    /// The range must be page-aligned, classifiable as one uniform
    /// allocation class by the memory manager, and disjoint from every live
    /// context. The full span starts out free.
    pub fn new(system: &'c Contig<M>, start: usize, size: usize) -> Result<Self, CreateError> {
        debug!("context over {start:#x}+{size:#x}");
        ensure!(size != 0, InvalidSizeSnafu);
        ensure!(
            start.is_page_aligned() && size.is_page_aligned(),
            MisalignedSnafu { start, size }
        );
        let end = start
            .checked_add(size)
            .context(OverflowSnafu { start, size })?;
        let manager = system.installed_manager().context(NotActivatedSnafu)?;

        let span = start..end;
        ensure!(system.claim_span(span.clone()), BusySnafu { start, size });
        let class = match manager.classify_range(start, size) {
            Ok(class) => class,
            Err(source) => {
                system.release_span(&span);
                return Err(source).context(ClassifySnafu);
            }
        };
        let pool = match RangePool::new(span.clone()) {
            Ok(pool) => pool,
            Err(source) => {
                system.release_span(&span);
                return Err(source).context(BookkeepingSnafu);
            }
        };
        trace!("context over {start:#x}+{size:#x} classified {class:?}");
        Ok(Self {
            system,
            manager,
            class,
            span,
            pool: Mutex::new(pool),
        })
    }

    /// Allocates `count` contiguous pages aligned to `2^order` pages.
    ///
    /// Claims a sub-range from the pool and, when the context's class
    /// requires it, evicts unrelated occupants before handing the range out.
    /// May block while eviction waits on reclaim. A failed call leaves the
    /// pool exactly as it was.
    pub fn allocate(&self, count: usize, order: u32) -> Result<ContigRange, AllocError> {
        debug!("allocate({count} pages, order {order})");
        ensure!(count != 0, ZeroCountSnafu);
        let size = count
            .checked_mul(PAGE_SIZE)
            .context(TooLargeSnafu { count })?;

        let _serialized = self.system.alloc_lock.lock();
        let mut pool = self.pool.lock();
        let start = pool
            .take(size, order.saturating_add(PAGE_SHIFT))
            .context(ExhaustedSnafu { count, order })?;
        if self.class == AllocationClass::NeedsEviction {
            if let Err(source) = self.manager.evict_range(start, size) {
                pool.give_back(start, size)
                    .expect("range was just taken from this pool");
                return Err(source).context(EvictSnafu { start, size });
            }
        }
        trace!("allocate: returning {start:#x}");
        Ok(ContigRange { start, count })
    }

    /// Returns a range obtained from [`allocate`](Self::allocate).
    ///
    /// For [`AllocationClass::NeedsEviction`] contexts the pages also go
    /// back to general circulation. Returning a range to a context that does
    /// not hold it outstanding is a checked error and changes nothing.
    pub fn free(&self, range: ContigRange) -> Result<(), FreeError> {
        let ContigRange { start, count } = range;
        debug!("free({start:#x}, {count} pages)");
        let size = count << PAGE_SHIFT;

        let _serialized = self.system.alloc_lock.lock();
        self.pool.lock().give_back(start, size).context(FreeSnafu)?;
        if self.class == AllocationClass::NeedsEviction {
            self.manager.release_range(start, count);
        }
        Ok(())
    }

    /// The allocation class the range was classified as.
    #[must_use]
    pub fn allocation_class(&self) -> AllocationClass {
        self.class
    }

    /// The physical range this context allocates from.
    #[must_use]
    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }
}

impl<M> Drop for Context<'_, M> {
    fn drop(&mut self) {
        let pool = self.pool.get_mut();
        debug_assert!(
            pool.is_idle(),
            "context dropped with outstanding allocations"
        );
        self.system.release_span(&self.span);
    }
}
