//! A reserve-then-commit region of OS virtual memory.
//!
//! `reserve` stakes out an address range without committing any physical
//! pages to it; `commit` grows the usable prefix of that range one chunk at
//! a time. This is what lets [`crate::arena::MonotonicAllocator`] hand out
//! stable addresses up front while only paying for the pages it actually
//! uses.

use std::ffi::c_void;

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("memory already reserved; ReservedVirtualMemory cannot be reused")]
    AlreadyReserved,
    #[error("mmap failed: {0}")]
    Reserve(#[source] std::io::Error),
    #[error("mprotect failed: {0}")]
    Commit(#[source] std::io::Error),
    #[error("commit of {requested} bytes exceeds remaining reservation of {remaining} bytes")]
    Exhausted { requested: usize, remaining: usize },
}

/// An OS-backed reservation, uncommitted beyond `current_end`.
///
/// Move-assignable, never `Clone`: there is exactly one owner of the mapping
/// and it is released on drop.
#[derive(Debug, Default)]
pub struct ReservedVirtualMemory {
    base: usize,
    pub(crate) current_end: usize,
    limit: usize,
    page_size: usize,
}

fn round_up(value: usize, granularity: usize) -> usize {
    ((value - 1) / granularity + 1) * granularity
}

impl ReservedVirtualMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn current_end(&self) -> usize {
        self.current_end
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Reserves `bytes` (rounded up to the OS allocation granularity)
    /// without committing any of it. May only be called once per instance.
    pub fn reserve(&mut self, bytes: usize) -> Result<(), VmError> {
        if self.base != 0 {
            return Err(VmError::AlreadyReserved);
        }

        let page_size = page_size();
        // On the platforms we target, allocation granularity equals page
        // size; the original distinguishes them only for a Windows backend
        // (64 KiB allocation granularity vs 4 KiB pages), which this crate
        // does not implement (see SPEC_FULL.md / DESIGN.md).
        let granularity = page_size;
        let rounded = round_up(bytes, granularity);

        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                rounded,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(VmError::Reserve(std::io::Error::last_os_error()));
        }

        self.page_size = page_size;
        self.base = addr as usize;
        self.current_end = self.base;
        self.limit = self.base + rounded;
        Ok(())
    }

    /// Commits the next `bytes` (rounded up to a page) of the reservation,
    /// making them readable/writable.
    pub fn commit(&mut self, bytes: usize) -> Result<(), VmError> {
        let rounded = round_up(bytes, self.page_size);
        let remaining = self.limit - self.current_end;
        if rounded > remaining {
            return Err(VmError::Exhausted { requested: rounded, remaining });
        }

        let addr = self.current_end as *mut c_void;
        let rc = unsafe { libc::mprotect(addr, rounded, libc::PROT_READ | libc::PROT_WRITE) };
        if rc != 0 {
            return Err(VmError::Commit(std::io::Error::last_os_error()));
        }

        self.current_end += rounded;
        Ok(())
    }
}

impl Drop for ReservedVirtualMemory {
    fn drop(&mut self) {
        if self.base != 0 {
            unsafe {
                libc::munmap(self.base as *mut c_void, self.limit - self.base);
            }
        }
    }
}

fn page_size() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n <= 0 {
        4096
    } else {
        n as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_commit_grows_current_end() {
        let mut mem = ReservedVirtualMemory::new();
        mem.reserve(4 * 1024 * 1024).unwrap();
        assert_eq!(mem.current_end(), mem.base());
        mem.commit(4096).unwrap();
        assert!(mem.current_end() > mem.base());
        assert!(mem.current_end() <= mem.limit());
    }

    #[test]
    fn double_reserve_fails() {
        let mut mem = ReservedVirtualMemory::new();
        mem.reserve(4096).unwrap();
        assert!(matches!(mem.reserve(4096), Err(VmError::AlreadyReserved)));
    }

    #[test]
    fn commit_beyond_reservation_fails() {
        let mut mem = ReservedVirtualMemory::new();
        mem.reserve(4096).unwrap();
        let huge = mem.limit() - mem.base() + mem.page_size + 1;
        assert!(matches!(mem.commit(huge), Err(VmError::Exhausted { .. })));
    }
}
