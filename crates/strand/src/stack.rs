//! Per-frame stack allocation
//!
//! Each frame owns one mmap'd region: a PROT_NONE guard page at the
//! low end, then the usable stack. Stacks grow down, so an overflow
//! walks into the guard page and faults instead of corrupting the
//! neighbouring allocation.
//!
//! ```text
//! base                                        base + total
//! │ guard page (PROT_NONE) │ usable stack (RW)            │
//!                          └── grows down ◄───────────────┘
//! ```

use strand_aio::sys;
use strand_core::{Error, Result};

/// Page granularity assumed for guard placement and rounding.
pub const PAGE_SIZE: usize = 4096;

/// One guard page below the stack.
const GUARD_SIZE: usize = PAGE_SIZE;

/// An owned, guard-paged frame stack.
pub struct Stack {
    base: *mut u8,
    total: usize,
}

impl Stack {
    /// Map a stack with at least `size` usable bytes (rounded up to
    /// page granularity, minimum one page).
    pub fn new(size: usize) -> Result<Self> {
        let usable = size.max(PAGE_SIZE).next_multiple_of(PAGE_SIZE);
        let total = usable + GUARD_SIZE;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(Error::Unexpected(sys::last_errno()));
        }
        let base = base as *mut u8;

        // Everything above the guard page becomes the usable stack.
        let ret = unsafe {
            libc::mprotect(
                base.add(GUARD_SIZE) as *mut libc::c_void,
                usable,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if ret != 0 {
            let errno = sys::last_errno();
            unsafe { libc::munmap(base as *mut libc::c_void, total) };
            return Err(Error::Unexpected(errno));
        }

        Ok(Self { base, total })
    }

    /// High end of the mapping; the initial stack pointer.
    #[inline]
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.add(self.total) }
    }

    /// Usable bytes between guard page and top.
    #[inline]
    pub fn usable(&self) -> usize {
        self.total - GUARD_SIZE
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.base as *mut libc::c_void, self.total) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding_and_minimum() {
        let s = Stack::new(1).unwrap();
        assert_eq!(s.usable(), PAGE_SIZE);

        let s = Stack::new(16 * 1024 + 1).unwrap();
        assert_eq!(s.usable(), 16 * 1024 + PAGE_SIZE);
    }

    #[test]
    fn test_top_is_writable() {
        let s = Stack::new(16 * 1024).unwrap();
        unsafe {
            // Touch the highest and lowest usable bytes.
            *s.top().sub(1) = 0xAA;
            *s.top().sub(s.usable()) = 0x55;
            assert_eq!(*s.top().sub(1), 0xAA);
        }
    }

    #[test]
    fn test_top_is_aligned_enough() {
        let s = Stack::new(8 * 1024).unwrap();
        // mmap returns page-aligned memory, so the top is too.
        assert_eq!(s.top() as usize % PAGE_SIZE, 0);
    }
}
