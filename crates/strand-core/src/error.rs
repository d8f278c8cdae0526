//! Error taxonomy for the runtime
//!
//! Syscall failures are classified once, at the lowest layer that sees
//! the errno. `WouldBlock` (`EAGAIN`/`EINPROGRESS`) is deliberately not
//! representable here: it drives the non-blocking retry loops and never
//! reaches user code.

use core::fmt;

/// Result type for runtime operations
pub type Result<T> = core::result::Result<T, Error>;

/// Errors surfaced to user frames by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Peer-driven orderly or abortive termination (reset, broken pipe).
    /// Callers typically treat this as end-of-stream.
    Closed,

    /// Operation exceeded the configured per-operation deadline
    /// (synthesized by the busy-loop backend only)
    Timeout,

    /// accept() on a socket that is not listening
    NotListening,

    /// Descriptor is not a socket
    NotASocket,

    /// Operation not supported by the socket/file kind
    OperationNotSupported,

    /// Per-process file descriptor quota exhausted (EMFILE)
    ProcessFdQuotaExceeded,

    /// System-wide file descriptor quota exhausted (ENFILE)
    SystemFdQuotaExceeded,

    /// Runtime or backend capacity exhausted; drain before retrying
    QueueFull,

    /// Unclassified OS failure, carrying the original errno
    Unexpected(i32),
}

impl Error {
    /// Classify a raw errno value.
    ///
    /// Context-free mapping: call sites with more context (e.g. `accept`
    /// seeing `EINVAL`) refine the result themselves.
    pub fn from_errno(errno: i32) -> Error {
        match errno {
            libc::ECONNRESET | libc::ECONNABORTED | libc::EPIPE | libc::ENOTCONN => Error::Closed,
            libc::ETIMEDOUT => Error::Timeout,
            libc::ENOTSOCK => Error::NotASocket,
            libc::EOPNOTSUPP => Error::OperationNotSupported,
            libc::EMFILE => Error::ProcessFdQuotaExceeded,
            libc::ENFILE => Error::SystemFdQuotaExceeded,
            e => Error::Unexpected(e),
        }
    }

    /// Classify a negative syscall return (`-errno` convention used in
    /// completion records)
    #[inline]
    pub fn from_neg(ret: i64) -> Error {
        Error::from_errno(-ret as i32)
    }

    /// True for the peer-close class
    #[inline]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Closed => write!(f, "connection closed by peer"),
            Error::Timeout => write!(f, "operation timed out"),
            Error::NotListening => write!(f, "socket is not listening"),
            Error::NotASocket => write!(f, "descriptor is not a socket"),
            Error::OperationNotSupported => write!(f, "operation not supported"),
            Error::ProcessFdQuotaExceeded => write!(f, "process file descriptor quota exceeded"),
            Error::SystemFdQuotaExceeded => write!(f, "system file descriptor quota exceeded"),
            Error::QueueFull => write!(f, "submission queue full"),
            Error::Unexpected(errno) => {
                write!(f, "{}", std::io::Error::from_raw_os_error(*errno))
            }
        }
    }
}

impl std::error::Error for Error {}
