//! Region registration and the process-wide allocator state.
//!
//! Physical ranges become eligible for contiguous allocation in two phases.
//! Platform code registers regions during early boot, before the memory
//! manager's classification machinery exists; those registrations are queued
//! in a small fixed buffer. A late-boot initialization step then installs the
//! memory manager ([`Contig::activate`]), drains the queue, and from that
//! point on registrations apply immediately.

use alloc::vec::Vec;
use core::{mem, ops::Range};

use arrayvec::ArrayVec;
use log::debug;
use snafu::{Location, OptionExt as _, ResultExt as _, Snafu, ensure};
use spin::{Mutex, Once};

use crate::{
    host::{BootMemory, BootReserveError, MemoryManager},
    layout::{Align as _, GRANULE_SIZE},
};

/// Regions that can be registered before [`Contig::activate`].
pub const PENDING_CAPACITY: usize = 8;

/// A physical range registered for contiguous allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    start: usize,
    size: usize,
}

impl Region {
    fn range(&self) -> Range<usize> {
        self.start..self.start + self.size
    }
}

#[derive(Debug)]
struct State {
    /// Regions registered before activation, drained exactly once.
    pending: ArrayVec<Region, PENDING_CAPACITY>,
    /// Every region whose granules have been marked.
    regions: Vec<Region>,
    /// Spans claimed by live contexts.
    claimed: Vec<Range<usize>>,
}

/// The contiguous-allocation subsystem.
///
/// One instance exists per process, typically in a `static`; it is
/// constructed once at boot and never torn down. It owns the
/// pending-registration queue, the installed memory manager, and the lock
/// that serializes allocation across every [`Context`](crate::Context).
#[derive(Debug)]
pub struct Contig<M> {
    manager: Once<M>,
    state: Mutex<State>,
    /// Serializes pool mutation and eviction across every context. Eviction
    /// manipulates shared memory-manager bookkeeping that must not be
    /// touched from two contexts at once. Always acquired before a context's
    /// pool mutex.
    pub(crate) alloc_lock: Mutex<()>,
}

/// Error returned by [`Contig::register_region`].
#[derive(Debug, Snafu)]
pub enum RegisterError {
    /// The region size is zero.
    #[snafu(display("region size must not be zero"))]
    InvalidSize {
        #[snafu(implicit)]
        location: Location,
    },
    /// Start or size is not a multiple of the granule.
    #[snafu(display("region {start:#x}+{size:#x} is not aligned to the {GRANULE_SIZE:#x}-byte granule"))]
    Misaligned {
        start: usize,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// The region wraps the address space.
    #[snafu(display("region {start:#x}+{size:#x} wraps the address space"))]
    Overflow {
        start: usize,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// The pending-registration queue is full. A hard boot-time failure:
    /// either raise [`PENDING_CAPACITY`] or register fewer early regions.
    #[snafu(display("pending-registration queue is full ({PENDING_CAPACITY} regions)"))]
    QueueFull {
        #[snafu(implicit)]
        location: Location,
    },
}

/// Error returned by [`Contig::reserve`].
#[derive(Debug, Snafu)]
pub enum ReserveError {
    /// The requested size is zero.
    #[snafu(display("reservation size must not be zero"))]
    ZeroSize {
        #[snafu(implicit)]
        location: Location,
    },
    /// The granule-aligned reservation does not fit the address space.
    #[snafu(display("granule-aligned reservation {hint:#x}+{size:#x} wraps the address space"))]
    ReservationOverflow {
        hint: usize,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// The boot reservation subsystem could not provide the range.
    #[snafu(display("boot reservation failed: {source}"))]
    BootReserve {
        source: BootReserveError,
        #[snafu(implicit)]
        location: Location,
    },
    /// The reserved range could not be registered; the reservation has been
    /// released.
    #[snafu(display("failed to register reserved region: {source}"))]
    RegisterReserved {
        source: RegisterError,
        #[snafu(implicit)]
        location: Location,
    },
}

impl<M> Contig<M>
where
    M: MemoryManager,
{
    /// Creates a not-yet-activated subsystem, suitable for a `static`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            manager: Once::new(),
            state: Mutex::new(State {
                pending: ArrayVec::new_const(),
                regions: Vec::new(),
                claimed: Vec::new(),
            }),
            alloc_lock: Mutex::new(()),
        }
    }

    /// Registers `[start, start + size)` for contiguous allocation.
    ///
    /// Both `start` and `size` must be granule-aligned, and the range must
    /// have been reserved already (for example with [`reserve`](Self::reserve)
    /// or directly through the boot reservation subsystem). Before
    /// [`activate`](Self::activate) the request is queued; afterwards the
    /// range's granules are handed to the memory manager immediately.
    ///
    /// Registering a region twice is a caller error and is not detected.
    pub fn register_region(&self, start: usize, size: usize) -> Result<(), RegisterError> {
        debug!("register_region({start:#x}+{size:#x})");
        ensure!(size != 0, InvalidSizeSnafu);
        ensure!(
            start.is_granule_aligned() && size.is_granule_aligned(),
            MisalignedSnafu { start, size }
        );
        ensure!(start.checked_add(size).is_some(), OverflowSnafu { start, size });

        let region = Region { start, size };
        let mut state = self.state.lock();
        match self.manager.get() {
            Some(manager) => {
                manager.mark_contiguous_range(start, size);
                state.regions.push(region);
            }
            None => {
                ensure!(state.pending.try_push(region).is_ok(), QueueFullSnafu);
            }
        }
        Ok(())
    }

    /// Installs the memory manager and replays every queued registration.
    ///
    /// This is the one-shot, irreversible transition out of the early-boot
    /// phase; it must run during serialized boot initialization, after the
    /// memory manager's classification machinery is up.
    ///
    /// # Panics
    ///
    /// Panics if called a second time.
    pub fn activate(&self, manager: M) -> &M {
        assert!(
            self.manager.get().is_none(),
            "contiguous allocator is already activated"
        );
        let manager = self.manager.call_once(|| manager);
        let mut state = self.state.lock();
        let pending = mem::take(&mut state.pending);
        debug!("activate: replaying {} queued region(s)", pending.len());
        for region in pending {
            manager.mark_contiguous_range(region.start, region.size);
            state.regions.push(region);
        }
        manager
    }

    /// Carves a granule-aligned range out of the boot reservation subsystem
    /// and registers it, returning its start address.
    ///
    /// `hint_start` and `size` are aligned up to the granule. A non-zero
    /// hint requests exactly that placement; zero lets the subsystem pick.
    /// On registration failure the reservation is released before the error
    /// is returned.
    pub fn reserve<B>(
        &self,
        boot: &B,
        hint_start: usize,
        size: usize,
    ) -> Result<usize, ReserveError>
    where
        B: BootMemory,
    {
        debug!("reserve({hint_start:#x}+{size:#x})");
        ensure!(size != 0, ZeroSizeSnafu);
        let hint = hint_start
            .checked_align_up(GRANULE_SIZE)
            .context(ReservationOverflowSnafu { hint: hint_start, size })?;
        let size = size
            .checked_align_up(GRANULE_SIZE)
            .context(ReservationOverflowSnafu { hint, size })?;

        let start = boot.reserve(hint, size, GRANULE_SIZE).context(BootReserveSnafu)?;
        if start.checked_add(size).is_none() {
            boot.unreserve(start, size);
            return ReservationOverflowSnafu { hint: start, size }.fail();
        }
        if let Err(source) = self.register_region(start, size) {
            boot.unreserve(start, size);
            return Err(source).context(RegisterReservedSnafu);
        }
        debug!("reserve: placed region at {start:#x}");
        Ok(start)
    }
}

impl<M> Contig<M> {
    pub(crate) fn installed_manager(&self) -> Option<&M> {
        self.manager.get()
    }

    /// Claims `span` for a new context. The claim is rejected unless the
    /// span is disjoint from every live context's span and either lies
    /// within a single registered region or overlaps none (memory that was
    /// never registered is movable-class and carries no region record).
    pub(crate) fn claim_span(&self, span: Range<usize>) -> bool {
        let mut state = self.state.lock();
        if state.claimed.iter().any(|claimed| overlaps(claimed, &span)) {
            return false;
        }
        if let Some(region) = state
            .regions
            .iter()
            .find(|region| overlaps(&region.range(), &span))
        {
            let range = region.range();
            if !(range.start <= span.start && span.end <= range.end) {
                return false;
            }
        }
        state.claimed.push(span);
        true
    }

    pub(crate) fn release_span(&self, span: &Range<usize>) {
        let mut state = self.state.lock();
        if let Some(index) = state.claimed.iter().position(|claimed| claimed == span) {
            state.claimed.swap_remove(index);
        }
    }
}

impl<M> Default for Contig<M>
where
    M: MemoryManager,
{
    fn default() -> Self {
        Self::new()
    }
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}
