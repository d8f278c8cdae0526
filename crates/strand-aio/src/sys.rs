//! Non-blocking syscall attempts
//!
//! One attempt = one non-blocking syscall against a job's operation.
//! `None` means the kernel said try again (`EAGAIN`/`EINPROGRESS`/...);
//! `Some(result)` is a finished completion, with hard errors encoded as
//! `Value(-errno)` so the busy-loop backend, the readiness backend, and
//! the capability fallback all classify failures the same way.

use std::time::Instant;

use strand_core::{CompletionResult, Op};

/// Read the calling thread's errno.
#[cfg(target_os = "linux")]
#[inline]
pub fn last_errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

#[cfg(not(target_os = "linux"))]
#[inline]
pub fn last_errno() -> i32 {
    unsafe { *libc::__error() }
}

/// Attempt `op` once without blocking.
///
/// Returns `None` when the operation would block and should be retried
/// later. `accept` treats a connection that died between the kernel
/// queue and our `accept4` (`ECONNABORTED`/`ECONNRESET`) as retriable,
/// not as an error.
pub fn attempt(op: &mut Op) -> Option<CompletionResult> {
    match op {
        // ── Network ──
        Op::Accept { fd, addr } => {
            let ret = unsafe {
                libc::accept4(
                    *fd,
                    addr.as_mut_ptr(),
                    &mut addr.len,
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            };
            if ret >= 0 {
                return Some(CompletionResult::Socket {
                    fd: ret,
                    addr: **addr,
                });
            }
            match last_errno() {
                libc::EAGAIN => None,
                // The queued connection was torn down before we got to
                // it; wait for the next one.
                libc::ECONNABORTED | libc::ECONNRESET => {
                    addr.len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
                    None
                }
                e => Some(CompletionResult::Value(-(e as i64))),
            }
        }

        Op::Connect { fd, addr } => {
            let ret = unsafe { libc::connect(*fd, addr.as_ptr(), addr.len) };
            if ret == 0 {
                return Some(CompletionResult::Void);
            }
            match last_errno() {
                // First call parks the handshake; later calls report
                // progress until the socket is connected.
                libc::EINPROGRESS | libc::EALREADY | libc::EAGAIN => None,
                libc::EISCONN => Some(CompletionResult::Void),
                e => Some(CompletionResult::Value(-(e as i64))),
            }
        }

        Op::Recv { fd, buf, len } => {
            let ret = unsafe { libc::recv(*fd, *buf as *mut libc::c_void, *len, 0) };
            finish_count(ret)
        }

        Op::Send { fd, buf, len } => {
            // MSG_NOSIGNAL so a dead peer surfaces as EPIPE instead of
            // killing the process.
            let ret =
                unsafe { libc::send(*fd, *buf as *const libc::c_void, *len, libc::MSG_NOSIGNAL) };
            finish_count(ret)
        }

        Op::Close { fd } => {
            let ret = unsafe { libc::close(*fd) };
            if ret == 0 {
                Some(CompletionResult::Void)
            } else {
                match last_errno() {
                    // The descriptor is gone either way.
                    libc::EINTR => Some(CompletionResult::Void),
                    e => Some(CompletionResult::Value(-(e as i64))),
                }
            }
        }

        // ── Files ──
        Op::Open { path, flags, mode } => {
            let ret =
                unsafe { libc::open(path.as_ptr(), *flags | libc::O_CLOEXEC, *mode as libc::c_uint) };
            if ret >= 0 {
                Some(CompletionResult::Fd(ret))
            } else {
                Some(CompletionResult::Value(-(last_errno() as i64)))
            }
        }

        // offset == u64::MAX means "current position" (pipes,
        // terminals, inherited descriptors), same convention io_uring
        // uses for -1.
        Op::Read { fd, buf, len, offset } => {
            let ret = if *offset == u64::MAX {
                unsafe { libc::read(*fd, *buf as *mut libc::c_void, *len) }
            } else {
                unsafe { libc::pread(*fd, *buf as *mut libc::c_void, *len, *offset as libc::off_t) }
            };
            finish_count(ret)
        }

        Op::Write { fd, buf, len, offset } => {
            let ret = if *offset == u64::MAX {
                unsafe { libc::write(*fd, *buf as *const libc::c_void, *len) }
            } else {
                unsafe {
                    libc::pwrite(*fd, *buf as *const libc::c_void, *len, *offset as libc::off_t)
                }
            };
            finish_count(ret)
        }

        // ── Timers ──
        Op::Timer { deadline } => {
            if Instant::now() >= *deadline {
                Some(CompletionResult::Void)
            } else {
                None
            }
        }
    }
}

/// Fold a count-returning syscall result into a completion.
#[inline]
fn finish_count(ret: libc::ssize_t) -> Option<CompletionResult> {
    if ret >= 0 {
        return Some(CompletionResult::Value(ret as i64));
    }
    match last_errno() {
        libc::EAGAIN | libc::EINTR => None,
        e => Some(CompletionResult::Value(-(e as i64))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::os::unix::io::RawFd;

    fn pipe_nonblocking() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        assert_eq!(ret, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn test_recv_on_non_socket_reports_enotsock() {
        let (r, w) = pipe_nonblocking();
        let mut buf = [0u8; 16];
        let mut op = Op::Recv {
            fd: r,
            buf: buf.as_mut_ptr(),
            len: buf.len(),
        };
        match attempt(&mut op) {
            Some(CompletionResult::Value(v)) => assert_eq!(-v as i32, libc::ENOTSOCK),
            other => panic!("expected ENOTSOCK, got {:?}", other),
        }
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn test_open_missing_file_reports_enoent() {
        let path = CString::new("/definitely/not/a/real/file").unwrap();
        let mut op = Op::Open {
            path,
            flags: libc::O_RDONLY,
            mode: 0,
        };
        match attempt(&mut op) {
            Some(CompletionResult::Value(v)) => assert_eq!(-v as i32, libc::ENOENT),
            other => panic!("expected ENOENT, got {:?}", other),
        }
    }

    #[test]
    fn test_timer_fires_only_after_deadline() {
        let mut op = Op::Timer {
            deadline: Instant::now() + std::time::Duration::from_millis(20),
        };
        assert!(attempt(&mut op).is_none());
        std::thread::sleep(std::time::Duration::from_millis(25));
        assert!(matches!(attempt(&mut op), Some(CompletionResult::Void)));
    }

    #[test]
    fn test_close_completes() {
        let (r, w) = pipe_nonblocking();
        let mut op = Op::Close { fd: w };
        assert!(matches!(attempt(&mut op), Some(CompletionResult::Void)));
        unsafe { libc::close(r) };
    }
}
