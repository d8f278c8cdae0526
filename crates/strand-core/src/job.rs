//! AIO job record
//!
//! A [`Job`] describes one pending I/O operation: the tagged operation,
//! the target descriptor, the completion context routing back to the
//! task table, and an optional submit timestamp used by the busy-loop
//! backend for per-operation timeouts.
//!
//! Buffer fields are raw pointers into the suspended frame's stack.
//! This is sound by construction: the owning frame is parked in
//! `waiting` state for the whole lifetime of the job, so the buffer
//! cannot move or be reused until the completion is delivered.

use core::fmt;
use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::time::Instant;

use crate::caps::Caps;
use crate::id::TaskId;

/// Owned socket address storage.
///
/// Kept behind a `Box` inside [`Op`] so the pointer handed to the
/// kernel stays valid while the job moves between internal queues.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct SockAddr {
    pub storage: libc::sockaddr_storage,
    pub len: libc::socklen_t,
}

impl SockAddr {
    /// Zeroed storage for the kernel to fill in (accept)
    pub fn zeroed() -> Self {
        Self {
            storage: unsafe { std::mem::zeroed() },
            len: std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
        }
    }

    /// Wrap an already-encoded address (connect, bind)
    ///
    /// # Safety
    ///
    /// `len` bytes starting at `addr` must be a valid sockaddr encoding.
    pub unsafe fn from_raw(addr: *const libc::sockaddr, len: libc::socklen_t) -> Self {
        let mut out = Self::zeroed();
        std::ptr::copy_nonoverlapping(
            addr as *const u8,
            &mut out.storage as *mut _ as *mut u8,
            len as usize,
        );
        out.len = len;
        out
    }

    #[inline]
    pub fn as_ptr(&self) -> *const libc::sockaddr {
        &self.storage as *const _ as *const libc::sockaddr
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut libc::sockaddr {
        &mut self.storage as *mut _ as *mut libc::sockaddr
    }

    /// Address family of the stored address
    #[inline]
    pub fn family(&self) -> libc::sa_family_t {
        self.storage.ss_family
    }
}

impl fmt::Debug for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SockAddr(family={}, len={})", self.storage.ss_family, self.len)
    }
}

/// Tagged I/O operation.
///
/// `Clone` lets a rejected submission (`QueueFull`) be retried after a
/// yield without rebuilding the operation at the call site.
#[derive(Debug, Clone)]
pub enum Op {
    Accept { fd: RawFd, addr: Box<SockAddr> },
    Connect { fd: RawFd, addr: Box<SockAddr> },
    Recv { fd: RawFd, buf: *mut u8, len: usize },
    Send { fd: RawFd, buf: *const u8, len: usize },
    Close { fd: RawFd },
    Open { path: CString, flags: i32, mode: libc::mode_t },
    Read { fd: RawFd, buf: *mut u8, len: usize, offset: u64 },
    Write { fd: RawFd, buf: *const u8, len: usize, offset: u64 },
    Timer { deadline: Instant },
}

impl Op {
    /// The capability bit a backend must advertise to queue this op
    pub fn required_cap(&self) -> Caps {
        match self {
            Op::Accept { .. } => Caps::ACCEPT,
            Op::Connect { .. } => Caps::CONNECT,
            Op::Recv { .. } => Caps::RECV,
            Op::Send { .. } => Caps::SEND,
            Op::Close { .. } => Caps::CLOSE,
            Op::Open { .. } => Caps::OPEN,
            Op::Read { .. } => Caps::READ,
            Op::Write { .. } => Caps::WRITE,
            Op::Timer { .. } => Caps::TIMER,
        }
    }

    /// Short operation name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Op::Accept { .. } => "accept",
            Op::Connect { .. } => "connect",
            Op::Recv { .. } => "recv",
            Op::Send { .. } => "send",
            Op::Close { .. } => "close",
            Op::Open { .. } => "open",
            Op::Read { .. } => "read",
            Op::Write { .. } => "write",
            Op::Timer { .. } => "timer",
        }
    }
}

/// One pending I/O job
#[derive(Debug)]
pub struct Job {
    /// Completion context: the waiting slot's index in the task table
    pub ctx: TaskId,
    /// The operation to perform
    pub op: Op,
    /// Stamped by `submit()` on the busy-loop backend; drives the
    /// per-operation timeout
    pub submitted_at: Option<Instant>,
}

impl Job {
    pub fn new(ctx: TaskId, op: Op) -> Self {
        Self {
            ctx,
            op,
            submitted_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_caps() {
        let op = Op::Close { fd: 3 };
        assert_eq!(op.required_cap(), Caps::CLOSE);
        let op = Op::Timer {
            deadline: Instant::now(),
        };
        assert_eq!(op.required_cap(), Caps::TIMER);
    }

    #[test]
    fn test_sockaddr_roundtrip() {
        let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_port = 8080u16.to_be();
        let sa = unsafe {
            SockAddr::from_raw(
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        assert_eq!(sa.family(), libc::AF_INET as libc::sa_family_t);
        assert_eq!(sa.len as usize, std::mem::size_of::<libc::sockaddr_in>());
    }
}
