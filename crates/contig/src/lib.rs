//! Contiguous physical-memory allocation.
//!
//! Makes it possible for device drivers to allocate big physically
//! contiguous chunks of memory long after the system has booted.
//!
//! # Why it is needed
//!
//! Devices without scatter-gather or IO-map support (cameras, video codecs,
//! display pipelines) need a single physical address range to operate, and
//! often a large one (a full-HD frame is several megabytes). General-purpose
//! allocators cannot provide that once memory has fragmented, and statically
//! carving a range out for each device wastes it whenever the device is
//! idle.
//!
//! The approach here is to set ranges aside at boot but keep them useful:
//! the host memory manager may fill them with content it can relocate (page
//! cache, for instance), and when a driver asks for a chunk the occupants
//! are migrated out of the way. That eviction step is the host's
//! [`MemoryManager::evict_range`]; this crate supplies everything around it:
//! region registration, the per-region range pool, and the serialized
//! allocate/free engine.
//!
//! # Boot-time integration
//!
//! Registration runs in two phases. Platform code calls
//! [`Contig::reserve`] (or [`Contig::register_region`] for ranges it
//! reserved itself) while the boot reservation subsystem is still
//! operational. At that point the memory manager's classification machinery
//! does not exist, so requests are queued in a small fixed buffer. Once the
//! memory manager is up, a single [`Contig::activate`] call installs it and
//! replays the queue. Contexts can be created from then on; the dynamic
//! allocator must also be available, since a context allocates its own
//! bookkeeping.
//!
//! # Driver usage
//!
//! Drivers never touch regions directly. They hold a shared reference to a
//! [`Context`] and call [`Context::allocate`] and [`Context::free`] on it;
//! the returned [`ContigRange`] is theirs exclusively until freed. Handle
//! management, user-space mapping and descriptor bookkeeping on top of the
//! range are the driver's own business.
//!
//! # Examples
//!
//! ```
//! use contig::{AllocationClass, ClassifyError, Contig, Context, EvictError, MemoryManager};
//!
//! // A host whose memory is all generically movable: no eviction needed.
//! struct AllMovable;
//!
//! impl MemoryManager for AllMovable {
//!     fn classify_range(
//!         &self,
//!         _start: usize,
//!         _size: usize,
//!     ) -> Result<AllocationClass, ClassifyError> {
//!         Ok(AllocationClass::Movable)
//!     }
//!     fn mark_contiguous_range(&self, _start: usize, _size: usize) {}
//!     fn evict_range(&self, _start: usize, _size: usize) -> Result<(), EvictError> {
//!         Ok(())
//!     }
//!     fn release_range(&self, _start: usize, _count: usize) {}
//! }
//!
//! static CONTIG: Contig<AllMovable> = Contig::new();
//!
//! CONTIG.activate(AllMovable);
//! let ctx = Context::new(&CONTIG, 0x1000_0000, 64 * contig::PAGE_SIZE).unwrap();
//!
//! let range = ctx.allocate(16, 2).unwrap();
//! assert_eq!(range.start(), 0x1000_0000);
//! assert_eq!(range.count(), 16);
//! ctx.free(range).unwrap();
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod context;
pub mod host;
pub mod layout;
pub mod registrar;

#[cfg(test)]
mod test_host;

pub use self::{
    context::{AllocError, ContigRange, Context, CreateError, FreeError},
    host::{
        AllocationClass, BootMemory, BootReserveError, ClassifyError, EvictError, MemoryManager,
    },
    layout::{Align, GRANULE_PAGES, GRANULE_PAGE_ORDER, GRANULE_SIZE, PAGE_SHIFT, PAGE_SIZE},
    registrar::{Contig, PENDING_CAPACITY, RegisterError, ReserveError},
};
