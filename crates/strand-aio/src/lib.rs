//! # strand-aio
//!
//! Pluggable AIO backends for the strand runtime.
//!
//! A backend accepts jobs (`queue_*`), flushes them to the kernel
//! (`submit`), and hands back completions (`reap`). Three variants:
//!
//! - [`busy::BusyBackend`] — portable fallback driving non-blocking
//!   syscalls from a FIFO scan loop; the only variant that synthesizes
//!   per-operation timeouts.
//! - [`poll::PollBackend`] — epoll readiness reactor (Linux). Performs
//!   the syscall when the kernel reports the descriptor ready.
//! - [`uring::UringBackend`] — io_uring completion queue (Linux).
//!   Broadest capability set.
//!
//! The runtime selects one at construction ([`create`]) and abstracts
//! over the rest through the [`Backend`] trait; operations a backend
//! does not advertise in its capability set are handled by the I/O
//! surface's non-blocking-syscall + yield fallback instead.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::str::FromStr;
use std::time::{Duration, Instant};

use strand_core::{Caps, Completion, Job, Op, Result, SockAddr, TaskId};

pub mod busy;
pub mod sys;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod poll;
        pub mod uring;
    }
}

#[cfg(not(unix))]
compile_error!("strand-aio supports Unix targets only");

/// Sizing and timeout knobs shared by all backend variants.
#[derive(Debug, Clone)]
pub struct AioConfig {
    /// Cap on jobs queued + in flight; exceeding it makes `queue_*`
    /// fail with `QueueFull`
    pub jobs_max: usize,
    /// Max completions returned by a single `reap`
    pub reap_max: usize,
    /// Per-operation timeout; honored by the busy-loop variant only
    pub op_timeout: Option<Duration>,
}

impl Default for AioConfig {
    fn default() -> Self {
        Self {
            jobs_max: 1024,
            reap_max: 256,
            op_timeout: None,
        }
    }
}

/// How long a single `reap` may block waiting for the first completion
/// before returning an empty slice and letting the scheduler tick.
pub const REAP_WAIT: Duration = Duration::from_millis(100);

/// An AIO engine.
///
/// # Buffer contract
///
/// The `queue_recv`/`queue_send`/`queue_read`/`queue_write` buffers are
/// raw pointers owned by the caller. They must stay valid and unaliased
/// until the completion carrying the same `ctx` has been reaped. The
/// runtime guarantees this by parking the owning frame in `waiting`
/// state for the lifetime of the job.
pub trait Backend {
    /// Which operations this backend completes through the kernel
    fn caps(&self) -> Caps;

    /// Queue a fully-formed job. Non-blocking; fails with `QueueFull`
    /// when the in-flight cap is reached.
    fn queue(&mut self, job: Job) -> Result<()>;

    /// Flush queued jobs to the kernel (or stamp submit timestamps on
    /// the busy-loop variant). Idempotent when nothing is queued.
    fn submit(&mut self) -> Result<()>;

    /// Wait up to [`REAP_WAIT`] for completions.
    ///
    /// Returns a slice borrowed from a backend-owned buffer, valid
    /// until the next call. Returns an empty slice immediately when no
    /// jobs are in flight.
    fn reap(&mut self) -> Result<&[Completion]>;

    // ── Typed queue helpers ──

    fn queue_accept(&mut self, ctx: TaskId, fd: RawFd) -> Result<()> {
        self.queue(Job::new(
            ctx,
            Op::Accept {
                fd,
                addr: Box::new(SockAddr::zeroed()),
            },
        ))
    }

    fn queue_connect(&mut self, ctx: TaskId, fd: RawFd, addr: SockAddr) -> Result<()> {
        self.queue(Job::new(
            ctx,
            Op::Connect {
                fd,
                addr: Box::new(addr),
            },
        ))
    }

    fn queue_recv(&mut self, ctx: TaskId, fd: RawFd, buf: *mut u8, len: usize) -> Result<()> {
        self.queue(Job::new(ctx, Op::Recv { fd, buf, len }))
    }

    fn queue_send(&mut self, ctx: TaskId, fd: RawFd, buf: *const u8, len: usize) -> Result<()> {
        self.queue(Job::new(ctx, Op::Send { fd, buf, len }))
    }

    fn queue_close(&mut self, ctx: TaskId, fd: RawFd) -> Result<()> {
        self.queue(Job::new(ctx, Op::Close { fd }))
    }

    fn queue_open(
        &mut self,
        ctx: TaskId,
        path: CString,
        flags: i32,
        mode: libc::mode_t,
    ) -> Result<()> {
        self.queue(Job::new(ctx, Op::Open { path, flags, mode }))
    }

    fn queue_read(
        &mut self,
        ctx: TaskId,
        fd: RawFd,
        buf: *mut u8,
        len: usize,
        offset: u64,
    ) -> Result<()> {
        self.queue(Job::new(ctx, Op::Read { fd, buf, len, offset }))
    }

    fn queue_write(
        &mut self,
        ctx: TaskId,
        fd: RawFd,
        buf: *const u8,
        len: usize,
        offset: u64,
    ) -> Result<()> {
        self.queue(Job::new(ctx, Op::Write { fd, buf, len, offset }))
    }

    fn queue_timer(&mut self, ctx: TaskId, ms: u64) -> Result<()> {
        self.queue(Job::new(
            ctx,
            Op::Timer {
                deadline: Instant::now() + Duration::from_millis(ms),
            },
        ))
    }
}

/// Backend selection.
///
/// `Auto` is platform-driven: io_uring where the kernel offers it, then
/// epoll, then the busy-loop. The explicit variants exist so
/// capability-dependent behavior is testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Auto,
    Busy,
    #[cfg(target_os = "linux")]
    Poll,
    #[cfg(target_os = "linux")]
    Uring,
}

impl FromStr for BackendKind {
    type Err = ();

    fn from_str(s: &str) -> core::result::Result<Self, ()> {
        match s {
            "auto" => Ok(BackendKind::Auto),
            "busy" => Ok(BackendKind::Busy),
            #[cfg(target_os = "linux")]
            "poll" => Ok(BackendKind::Poll),
            #[cfg(target_os = "linux")]
            "uring" => Ok(BackendKind::Uring),
            _ => Err(()),
        }
    }
}

/// Construct the backend for this runtime instance.
pub fn create(kind: BackendKind, cfg: &AioConfig) -> Result<Box<dyn Backend>> {
    match kind {
        BackendKind::Busy => Ok(Box::new(busy::BusyBackend::new(cfg))),
        #[cfg(target_os = "linux")]
        BackendKind::Poll => Ok(Box::new(poll::PollBackend::new(cfg)?)),
        #[cfg(target_os = "linux")]
        BackendKind::Uring => Ok(Box::new(uring::UringBackend::new(cfg)?)),
        BackendKind::Auto => {
            #[cfg(target_os = "linux")]
            {
                match uring::UringBackend::new(cfg) {
                    Ok(b) => return Ok(Box::new(b)),
                    Err(e) => log::debug!("io_uring unavailable ({}), trying epoll", e),
                }
                match poll::PollBackend::new(cfg) {
                    Ok(b) => return Ok(Box::new(b)),
                    Err(e) => log::debug!("epoll unavailable ({}), using busy-loop", e),
                }
            }
            Ok(Box::new(busy::BusyBackend::new(cfg)))
        }
    }
}
