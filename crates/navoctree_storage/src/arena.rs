//! The monotonic (bump) allocator that backs the octree by default.
//!
//! Mirrors `Windows/MonotonicAllocator.hpp`'s split between
//! `MonotonicAllocatorState` (the shared bump cursor over one
//! [`crate::vmem::ReservedVirtualMemory`] region) and `MonotonicAllocator<T>`
//! (a thin, per-element-type handle onto that state, carrying its *own*,
//! unshared free list).

use crate::handle::Handle;
use crate::traits::NodeAllocator;
use crate::vmem::{ReservedVirtualMemory, VmError};
use std::cell::Cell;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::rc::Rc;

const DEFAULT_GRANULARITY: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("requested capacity does not fit in a 32-bit offset handle")]
    CapacityTooLarge,
    #[error("element type is smaller than a free-list node and cannot be pooled")]
    ElementTooSmall,
    #[error(transparent)]
    Vm(#[from] VmError),
}

/// The shared bump-allocation state behind every `MonotonicAllocator<T>`
/// that was constructed from (or cloned/rebound from) the same arena.
struct ArenaState {
    region: ReservedVirtualMemory,
    base: usize,
    cursor: usize,    // bytes committed-and-used, relative to base
    committed: usize, // bytes committed, relative to base
    granularity: usize,
}

impl ArenaState {
    fn reserve(bytes: usize, granularity: usize) -> Result<Self, ArenaError> {
        let mut region = ReservedVirtualMemory::new();
        region.reserve(bytes.max(granularity))?;
        let base = region.base();
        Ok(Self { region, base, cursor: 0, committed: 0, granularity })
    }

    /// Bump-allocates `size` bytes aligned to `align`, committing more
    /// pages on overflow. Returns the byte offset from `base`.
    fn bump(&mut self, size: usize, align: usize) -> Result<usize, ArenaError> {
        loop {
            let aligned = (self.cursor + align - 1) / align * align;
            if self.committed >= aligned && self.committed - aligned >= size {
                self.cursor = aligned + size;
                return Ok(aligned);
            }
            self.region.commit(self.granularity)?;
            self.committed = self.region.current_end() - self.base;
        }
    }

    fn total_reserved_bytes(&self) -> usize {
        self.region.limit() - self.base
    }
}

/// A bump allocator for `T`, backed by one shared [`ArenaState`].
///
/// Cheap to `Clone` (an `Rc` bump), but each clone still keeps its *own*
/// free list: only the backing memory is shared, matching the original's
/// separation of `shared_ptr<MonotonicAllocatorState>` from the per-instance
/// `FreeNode* nextFree`.
pub struct MonotonicAllocator<T> {
    state: Rc<std::cell::RefCell<ArenaState>>,
    base: usize,
    free_head: Cell<Handle>,
    _marker: PhantomData<T>,
}

impl<T> Clone for MonotonicAllocator<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
            base: self.base,
            free_head: Cell::new(self.free_head.get()),
            _marker: PhantomData,
        }
    }
}

struct FreeNode {
    next: Handle,
}

impl<T> MonotonicAllocator<T> {
    /// Reserves `capacity` elements' worth of virtual memory (clamped to a
    /// 16 MiB minimum), committing nothing until the first allocation.
    pub fn new(capacity: usize) -> Result<Self, ArenaError> {
        Self::with_capacity_bytes(capacity.saturating_mul(size_of::<T>()))
    }

    pub(crate) fn with_capacity_bytes(bytes: usize) -> Result<Self, ArenaError> {
        if bytes / size_of::<T>().max(1) >= u32::MAX as usize {
            return Err(ArenaError::CapacityTooLarge);
        }
        let mut state = ArenaState::reserve(bytes, DEFAULT_GRANULARITY)?;
        // Burn the sentinel element at offset 0 so a real allocation never
        // lands there; handle 0 is permanently reserved for "null".
        state.bump(size_of::<T>().max(1), align_of::<T>().max(1))?;
        let base = state.base;
        Ok(Self {
            state: Rc::new(std::cell::RefCell::new(state)),
            base,
            free_head: Cell::new(Handle::NULL),
            _marker: PhantomData,
        })
    }

    /// Total bytes reserved for this arena (used by `clone::<U>` to size a
    /// fresh, independent arena with "the same capacity").
    pub fn total_reserved_bytes(&self) -> usize {
        self.state.borrow().total_reserved_bytes()
    }

    /// Two allocators are equal iff they share the same backing arena.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Produces a fresh allocator for element type `U`, with its own
    /// independent storage reserved at the same total byte capacity as this
    /// arena. Used when the octree needs a differently-typed sibling
    /// allocator that shares policy (granularity, handle width) but not
    /// state.
    pub fn clone_sibling<U>(&self) -> Result<MonotonicAllocator<U>, ArenaError> {
        MonotonicAllocator::<U>::with_capacity_bytes(self.total_reserved_bytes())
    }
}

impl<T> NodeAllocator<T> for MonotonicAllocator<T> {
    fn allocate(&self, n: usize) -> *mut T {
        assert!(n >= 1, "allocate(0) is not meaningful");
        if n == 1 {
            let head = self.free_head.get();
            if !head.is_null() {
                let p = self.resolve(head);
                // SAFETY: `head` was pushed by a prior `deallocate(_, 1)`,
                // which wrote a valid FreeNode at this address.
                let next = unsafe { (*(p as *const FreeNode)).next };
                self.free_head.set(next);
                return p;
            }
        }
        let size = size_of::<T>().checked_mul(n).expect("allocation size overflow");
        let align = align_of::<T>();
        let offset = self
            .state
            .borrow_mut()
            .bump(size, align)
            .expect("arena exhausted");
        (self.base + offset) as *mut T
    }

    fn deallocate(&self, p: *mut T, n: usize) {
        if n != 1 {
            // No general free; only size-1 deallocations are pooled.
            return;
        }
        assert!(
            size_of::<T>() >= size_of::<FreeNode>(),
            "element type is too small to host a free-list node"
        );
        let handle = self.translate(p);
        // SAFETY: `p` is a valid, currently-unused allocation of size
        // size_of::<T>() >= size_of::<FreeNode>(), asserted above.
        unsafe {
            (p as *mut FreeNode).write(FreeNode { next: self.free_head.get() });
        }
        self.free_head.set(handle);
    }

    fn translate(&self, p: *mut T) -> Handle {
        if p.is_null() {
            return Handle::NULL;
        }
        let offset = (p as usize - self.base) / size_of::<T>();
        Handle(offset as u32)
    }

    fn resolve(&self, h: Handle) -> *mut T {
        if h.is_null() {
            return std::ptr::null_mut();
        }
        (self.base + h.0 as usize * size_of::<T>()) as *mut T
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    struct Node {
        a: u64,
        b: u64,
    }

    #[test]
    fn handle_round_trips() {
        let arena = MonotonicAllocator::<Node>::new(64).unwrap();
        let p = arena.allocate(1);
        unsafe { arena.construct(p, Node { a: 1, b: 2 }) };
        let h = arena.translate(p);
        assert!(!h.is_null());
        assert_eq!(arena.resolve(h), p);
        unsafe { arena.destroy(p) };
    }

    #[test]
    fn null_handle_resolves_to_null() {
        let arena = MonotonicAllocator::<Node>::new(64).unwrap();
        assert!(arena.resolve(Handle::NULL).is_null());
        assert_eq!(arena.translate(std::ptr::null_mut()), Handle::NULL);
    }

    #[test]
    fn single_element_dealloc_is_reused() {
        let arena = MonotonicAllocator::<Node>::new(64).unwrap();
        let p1 = arena.allocate(1);
        arena.deallocate(p1, 1);
        let p2 = arena.allocate(1);
        assert_eq!(p1, p2);
    }

    #[test]
    fn bump_allocation_never_returns_offset_zero() {
        let arena = MonotonicAllocator::<Node>::new(64).unwrap();
        let p = arena.allocate(1);
        assert!(!arena.translate(p).is_null());
    }

    #[test]
    fn clone_sibling_has_independent_storage() {
        let arena = MonotonicAllocator::<Node>::new(64).unwrap();
        let sibling = arena.clone_sibling::<Node>().unwrap();
        assert!(!arena.shares_storage_with(&sibling));
    }

    #[test]
    fn rc_clone_shares_storage_and_cursor() {
        let arena = MonotonicAllocator::<Node>::new(64).unwrap();
        let clone = arena.clone();
        assert!(arena.shares_storage_with(&clone));
        let p1 = arena.allocate(1);
        let p2 = clone.allocate(1);
        assert_ne!(p1, p2, "shared cursor must not hand out the same address twice");
    }

    #[test]
    fn capacity_exceeding_u32_handle_range_is_rejected() {
        let err = MonotonicAllocator::<Node>::new(u32::MAX as usize);
        assert!(matches!(err, Err(ArenaError::CapacityTooLarge)));
    }
}
