//! Backend capability bitset
//!
//! A backend advertises which operations it completes through the
//! kernel. The I/O surface queries this before queueing a job; a
//! missing bit routes the operation through the non-blocking
//! syscall + yield fallback instead.

use bitflags::bitflags;

bitflags! {
    /// Operations a backend completes through the kernel
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Caps: u16 {
        const ACCEPT  = 1 << 0;
        const CONNECT = 1 << 1;
        const RECV    = 1 << 2;
        const SEND    = 1 << 3;
        const CLOSE   = 1 << 4;
        const OPEN    = 1 << 5;
        const READ    = 1 << 6;
        const WRITE   = 1 << 7;
        const TIMER   = 1 << 8;
    }
}

impl Caps {
    /// Capability set of a backend that accelerates nothing
    pub const NONE: Caps = Caps::empty();

    /// The socket-readiness subset (what an epoll engine supports natively)
    pub const READINESS: Caps = Caps::ACCEPT
        .union(Caps::CONNECT)
        .union(Caps::RECV)
        .union(Caps::SEND);
}
