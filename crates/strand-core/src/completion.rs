//! Completion record
//!
//! The (context, result) pair a backend hands back to the scheduler.
//! The context is the waiting slot's [`TaskId`]; the result is the
//! tagged outcome the resumed frame reads out of its slot.

use std::os::unix::io::RawFd;

use crate::error::{Error, Result};
use crate::id::TaskId;
use crate::job::SockAddr;

/// Tagged outcome of a completed AIO job
#[derive(Debug, Clone, Copy)]
pub enum CompletionResult {
    /// A new connected endpoint (accept outcome)
    Socket { fd: RawFd, addr: SockAddr },
    /// Signed count: bytes read/written, or `-errno` for a soft error
    Value(i64),
    /// The operation exceeded the configured per-operation deadline
    Timeout,
    /// A file handle (open outcome)
    Fd(RawFd),
    /// Void completion (close, connect, fired timer)
    Void,
}

impl CompletionResult {
    /// True when the result carries a soft error (`-errno` value)
    #[inline]
    pub fn is_soft_error(&self) -> bool {
        matches!(self, CompletionResult::Value(v) if *v < 0)
    }

    /// Decode a count-carrying completion (recv/send/read/write).
    pub fn into_value(self) -> Result<i64> {
        match self {
            CompletionResult::Value(v) if v >= 0 => Ok(v),
            CompletionResult::Value(v) => Err(Error::from_neg(v)),
            CompletionResult::Timeout => Err(Error::Timeout),
            other => Err(other.wrong_variant()),
        }
    }

    /// Decode a void completion (close/connect/fired timer).
    pub fn into_void(self) -> Result<()> {
        match self {
            CompletionResult::Void => Ok(()),
            CompletionResult::Value(v) if v < 0 => Err(Error::from_neg(v)),
            CompletionResult::Value(_) => Ok(()),
            CompletionResult::Timeout => Err(Error::Timeout),
            other => Err(other.wrong_variant()),
        }
    }

    /// Decode an open completion.
    pub fn into_fd(self) -> Result<RawFd> {
        match self {
            CompletionResult::Fd(fd) => Ok(fd),
            CompletionResult::Value(v) if v < 0 => Err(Error::from_neg(v)),
            CompletionResult::Timeout => Err(Error::Timeout),
            other => Err(other.wrong_variant()),
        }
    }

    /// A completion variant the operation cannot legally produce.
    fn wrong_variant(self) -> Error {
        debug_assert!(false, "mismatched completion variant: {:?}", self);
        Error::Unexpected(libc::EIO)
    }
}

/// A completion as delivered by `Backend::reap`.
///
/// Reaped completions are borrowed from a backend-owned buffer; the
/// scheduler copies the result out before the next `reap` overwrites
/// it, which is why the record is `Copy`.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    /// Routes back to exactly one live task slot in `waiting` state
    pub ctx: TaskId,
    pub result: CompletionResult,
}

impl Completion {
    pub fn new(ctx: TaskId, result: CompletionResult) -> Self {
        Self { ctx, result }
    }
}
