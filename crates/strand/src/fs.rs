//! File surface
//!
//! Positional file I/O keyed by (fd, offset): `read`/`write` map to
//! pread/pwrite, so frames sharing a descriptor never race on a file
//! cursor. On backends without file capabilities the operations fall
//! back to the non-blocking syscall loop, which for regular files
//! completes on the first attempt.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

use strand_core::{Error, Op, Result};

use crate::runtime::Runtime;

/// An open file descriptor.
#[derive(Debug)]
pub struct File {
    fd: RawFd,
    /// Wrapped descriptors (stdout etc.) are not closed on drop.
    owned: bool,
}

impl File {
    /// Offset value meaning "the descriptor's current position".
    ///
    /// Required for non-seekable descriptors (pipes, terminals), where
    /// positional reads fail with `ESPIPE`.
    pub const OFFSET_CURRENT: u64 = u64::MAX;

    /// Open `path` read-only, suspending the frame until done.
    pub fn open(rt: &Runtime, path: impl AsRef<Path>) -> Result<File> {
        Self::open_with(rt, path.as_ref(), libc::O_RDONLY, 0)
    }

    /// Create (or truncate) `path` for writing.
    pub fn create(rt: &Runtime, path: impl AsRef<Path>) -> Result<File> {
        Self::open_with(
            rt,
            path.as_ref(),
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
            0o644,
        )
    }

    fn open_with(rt: &Runtime, path: &Path, flags: i32, mode: libc::mode_t) -> Result<File> {
        let path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| Error::Unexpected(libc::EINVAL))?;
        let fd = rt.io_run(Op::Open { path, flags, mode })?.into_fd()?;
        Ok(File { fd, owned: true })
    }

    /// Wrap an inherited descriptor (stdout, a pipe). The descriptor
    /// is not closed when the handle drops.
    pub fn from_raw(fd: RawFd) -> File {
        File { fd, owned: false }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Read up to `buf.len()` bytes at `offset`. `Ok(0)` is
    /// end-of-file.
    pub fn read(&self, rt: &Runtime, buf: &mut [u8], offset: u64) -> Result<usize> {
        let result = rt.io_run(Op::Read {
            fd: self.fd,
            buf: buf.as_mut_ptr(),
            len: buf.len(),
            offset,
        })?;
        result.into_value().map(|v| v as usize)
    }

    /// Write up to `buf.len()` bytes at `offset`.
    pub fn write(&self, rt: &Runtime, buf: &[u8], offset: u64) -> Result<usize> {
        let result = rt.io_run(Op::Write {
            fd: self.fd,
            buf: buf.as_ptr(),
            len: buf.len(),
            offset,
        })?;
        result.into_value().map(|v| v as usize)
    }

    /// Close through the runtime, suspending until done. Wrapped
    /// descriptors are released without closing.
    pub fn close(self, rt: &Runtime) -> Result<()> {
        let (fd, owned) = (self.fd, self.owned);
        std::mem::forget(self);
        if !owned {
            return Ok(());
        }
        rt.io_run(Op::Close { fd })?.into_void()
    }

    /// Synchronous close, safe from any context.
    pub fn close_blocking(self) {
        let (fd, owned) = (self.fd, self.owned);
        std::mem::forget(self);
        if owned {
            unsafe { libc::close(fd) };
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.owned && self.fd >= 0 {
            unsafe { libc::close(self.fd) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_does_not_own() {
        // Dropping a wrapper around stdout must not close it.
        let f = File::from_raw(1);
        assert_eq!(f.fd(), 1);
        drop(f);
        let err = unsafe { libc::fcntl(1, libc::F_GETFD) };
        assert!(err >= 0, "stdout was closed by a borrowed File");
    }
}
