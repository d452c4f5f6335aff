//! The plain system-heap allocator, corresponding to the original's
//! `makePathGraph` (a bare `std::allocator<void>`-backed octree) as opposed
//! to `makePathGraphWithMemoryPool`'s arena.
//!
//! Every allocation request (a single root node, or a contiguous 8-element
//! child block) gets its own boxed slice, kept alive in `blocks` for the
//! lifetime of the allocator; a table resize (`blocks` or `slots` growing)
//! never moves that memory, so resolved pointers stay valid — unlike a flat
//! `Vec<T>`, which would invalidate them on reallocation. Only size-1
//! allocations are ever recycled through the free list, matching
//! `MonotonicAllocator`'s "no general multi-element free" policy: an
//! 8-block backing a subtree that gets destroyed is never reclaimed, just
//! leaked until the allocator itself drops.

use crate::handle::Handle;
use crate::traits::NodeAllocator;
use std::cell::RefCell;
use std::mem::MaybeUninit;

pub struct HeapAllocator<T> {
    /// One entry per handle; `slots[0]` is the permanently-null sentinel.
    slots: RefCell<Vec<*mut T>>,
    /// Handle indices available for a size-1 `allocate`.
    free: RefCell<Vec<u32>>,
    /// Owns every block ever allocated so `slots`' pointers stay valid.
    blocks: RefCell<Vec<Box<[MaybeUninit<T>]>>>,
}

impl<T> Default for HeapAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HeapAllocator<T> {
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(vec![std::ptr::null_mut()]),
            free: RefCell::new(Vec::new()),
            blocks: RefCell::new(Vec::new()),
        }
    }
}

impl<T> NodeAllocator<T> for HeapAllocator<T> {
    fn allocate(&self, n: usize) -> *mut T {
        assert!(n >= 1, "allocate(0) is not meaningful");
        if n == 1 {
            if let Some(index) = self.free.borrow_mut().pop() {
                return self.slots.borrow()[index as usize];
            }
        }

        let block: Box<[MaybeUninit<T>]> = (0..n).map(|_| MaybeUninit::uninit()).collect();
        let base = block.as_ptr() as *mut T;
        {
            let mut slots = self.slots.borrow_mut();
            debug_assert!(slots.len() + n < u32::MAX as usize, "heap allocator exceeded u32 handle range");
            for i in 0..n {
                // SAFETY: `base` points at `n` contiguous, live elements of
                // `block`, which this allocator now owns for its own lifetime.
                slots.push(unsafe { base.add(i) });
            }
        }
        self.blocks.borrow_mut().push(block);
        base
    }

    fn deallocate(&self, p: *mut T, n: usize) {
        if p.is_null() || n != 1 {
            // No general free; only size-1 deallocations are pooled, same as
            // `MonotonicAllocator`.
            return;
        }
        let handle = self.translate(p);
        self.free.borrow_mut().push(handle.raw());
    }

    fn translate(&self, p: *mut T) -> Handle {
        if p.is_null() {
            return Handle::NULL;
        }
        let slots = self.slots.borrow();
        for (index, &s) in slots.iter().enumerate() {
            if s == p {
                return Handle::from_raw(index as u32);
            }
        }
        panic!("pointer was not allocated by this HeapAllocator");
    }

    fn resolve(&self, h: Handle) -> *mut T {
        if h.is_null() {
            return std::ptr::null_mut();
        }
        self.slots.borrow()[h.raw() as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_round_trips() {
        let alloc = HeapAllocator::<u64>::new();
        let p = alloc.allocate(1);
        unsafe { alloc.construct(p, 42) };
        let h = alloc.translate(p);
        assert!(!h.is_null());
        assert_eq!(alloc.resolve(h), p);
        unsafe { alloc.destroy(p) };
        alloc.deallocate(p, 1);
    }

    #[test]
    fn null_handle_resolves_to_null() {
        let alloc = HeapAllocator::<u64>::new();
        assert!(alloc.resolve(Handle::NULL).is_null());
    }

    #[test]
    fn freed_slot_is_reused() {
        let alloc = HeapAllocator::<u64>::new();
        let p1 = alloc.allocate(1);
        let h1 = alloc.translate(p1);
        alloc.deallocate(p1, 1);
        let p2 = alloc.allocate(1);
        let h2 = alloc.translate(p2);
        assert_eq!(h1, h2);
    }

    #[test]
    fn eight_element_block_is_contiguous() {
        let alloc = HeapAllocator::<u64>::new();
        let base = alloc.allocate(8);
        for k in 0..8u64 {
            let p = unsafe { base.add(k as usize) };
            unsafe { alloc.construct(p, k) };
            let h = alloc.translate(p);
            assert_eq!(alloc.resolve(h), p);
        }
    }

    #[test]
    fn freeing_a_block_does_not_affect_sibling_handles() {
        let alloc = HeapAllocator::<u64>::new();
        let a = alloc.allocate(1);
        unsafe { alloc.construct(a, 1) };
        let base = alloc.allocate(8);
        unsafe { alloc.construct(base, 2) };
        // Only size-1 deallocation is meaningful; an 8-block no-ops.
        alloc.deallocate(base, 8);
        assert_eq!(unsafe { *alloc.resolve(alloc.translate(a)) }, 1);
    }
}
