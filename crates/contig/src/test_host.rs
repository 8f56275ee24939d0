//! Host-side mocks shared by the unit tests.

use std::{iter, ops::Range, sync::Mutex, vec::Vec};

use crate::{
    host::{
        AllocationClass, BootMemory, BootReserveError, ClassifyError, EvictError, MemoryManager,
    },
    layout::PAGE_SHIFT,
};

/// Memory manager that records every call.
///
/// A range classifies as `Movable` when it lies inside one of the configured
/// `movable` ranges, as `NeedsEviction` when it lies inside one marked range,
/// and fails to classify otherwise.
#[derive(Debug, Default)]
pub(crate) struct MockManager {
    pub(crate) movable: Vec<Range<usize>>,
    pub(crate) marked: Mutex<Vec<Range<usize>>>,
    pub(crate) evict_failures: Mutex<Vec<Range<usize>>>,
    pub(crate) evicted: Mutex<Vec<Range<usize>>>,
    pub(crate) released: Mutex<Vec<(usize, usize)>>,
}

impl MockManager {
    pub(crate) fn movable_over(range: Range<usize>) -> Self {
        Self {
            movable: iter::once(range).collect(),
            ..Self::default()
        }
    }
}

impl MemoryManager for MockManager {
    fn classify_range(&self, start: usize, size: usize) -> Result<AllocationClass, ClassifyError> {
        let range = start..start + size;
        if self.movable.iter().any(|movable| covers(movable, &range)) {
            return Ok(AllocationClass::Movable);
        }
        if self.marked.lock().unwrap().iter().any(|marked| covers(marked, &range)) {
            return Ok(AllocationClass::NeedsEviction);
        }
        Err(ClassifyError::MixedAllocationClass { start })
    }

    fn mark_contiguous_range(&self, start: usize, size: usize) {
        self.marked.lock().unwrap().push(start..start + size);
    }

    fn evict_range(&self, start: usize, size: usize) -> Result<(), EvictError> {
        let range = start..start + size;
        if self
            .evict_failures
            .lock()
            .unwrap()
            .iter()
            .any(|failure| overlaps(failure, &range))
        {
            return Err(EvictError::Unmovable {
                pfn: start >> PAGE_SHIFT,
            });
        }
        self.evicted.lock().unwrap().push(range);
        Ok(())
    }

    fn release_range(&self, start: usize, count: usize) {
        self.released.lock().unwrap().push((start, count));
    }
}

/// Boot reservation subsystem with a bump cursor for hintless requests.
#[derive(Debug)]
pub(crate) struct MockBoot {
    pub(crate) reserved: Mutex<Vec<Range<usize>>>,
    cursor: Mutex<usize>,
}

impl MockBoot {
    pub(crate) fn new(base: usize) -> Self {
        Self {
            reserved: Mutex::new(Vec::new()),
            cursor: Mutex::new(base),
        }
    }
}

impl BootMemory for MockBoot {
    fn reserve(&self, hint: usize, size: usize, align: usize) -> Result<usize, BootReserveError> {
        let mut reserved = self.reserved.lock().unwrap();
        let start = if hint == 0 {
            let mut cursor = self.cursor.lock().unwrap();
            let start = cursor.next_multiple_of(align);
            *cursor = start + size;
            start
        } else {
            hint
        };
        let range = start..start + size;
        if reserved.iter().any(|taken| overlaps(taken, &range)) {
            return Err(BootReserveError::Busy { start, size });
        }
        reserved.push(range);
        Ok(start)
    }

    fn unreserve(&self, start: usize, size: usize) {
        let mut reserved = self.reserved.lock().unwrap();
        if let Some(index) = reserved.iter().position(|taken| *taken == (start..start + size)) {
            reserved.swap_remove(index);
        }
    }
}

fn covers(outer: &Range<usize>, inner: &Range<usize>) -> bool {
    outer.start <= inner.start && inner.end <= outer.end
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}
