//! Completion backend (io_uring)
//!
//! Submits SQE-style entries and reads CQE-style completions directly.
//! No SQPOLL, no fixed files, no fixed buffers: plain
//! `io_uring_enter()` submission, which works on any kernel with
//! io_uring support. Advertises the broadest capability set.
//!
//! The `user_data` word on every SQE carries the job's completion
//! context; an in-flight table keyed by that word owns the job (and
//! with it the path/address storage the kernel reads) until the CQE
//! arrives.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use io_uring::{opcode, types, IoUring};

use strand_core::{Caps, Completion, CompletionResult, Error, Job, Op, Result, SpscRing, TaskId};

use crate::{AioConfig, Backend, REAP_WAIT};

/// One submitted job awaiting its CQE.
struct Inflight {
    job: Job,
    /// Keeps the timespec a Timeout SQE points at alive until the CQE.
    _ts: Option<Box<types::Timespec>>,
}

/// io_uring-based AIO engine.
pub struct UringBackend {
    ring: IoUring,
    /// Hand-off between `queue_*` and `submit`
    queued: SpscRing<Job>,
    inflight: HashMap<u64, Inflight>,
    completions: Vec<Completion>,
    jobs_max: usize,
    reap_max: usize,
}

impl UringBackend {
    pub fn new(cfg: &AioConfig) -> Result<Self> {
        let entries = cfg.jobs_max.next_power_of_two().max(8) as u32;
        let ring = IoUring::builder()
            .build(entries)
            .map_err(|e| Error::Unexpected(e.raw_os_error().unwrap_or(libc::EIO)))?;
        let ring_cap = cfg.jobs_max.next_power_of_two().max(2);
        Ok(Self {
            ring,
            queued: SpscRing::with_capacity(ring_cap).expect("jobs_max rounded to power of two"),
            inflight: HashMap::with_capacity(cfg.jobs_max),
            completions: Vec::with_capacity(cfg.reap_max),
            jobs_max: cfg.jobs_max,
            reap_max: cfg.reap_max,
        })
    }

    /// Number of jobs queued or in flight.
    pub fn in_flight(&self) -> usize {
        self.queued.len() + self.inflight.len()
    }

    /// Translate a job into an SQE.
    ///
    /// The returned entry holds raw pointers into the job's owned
    /// storage (address box, path bytes) or the suspended frame's
    /// buffers; both outlive the CQE by construction.
    fn build_sqe(job: &mut Job) -> (io_uring::squeue::Entry, Option<Box<types::Timespec>>) {
        let user_data = job.ctx.as_ctx();
        let mut ts_keepalive = None;

        let sqe = match &mut job.op {
            Op::Accept { fd, addr } => opcode::Accept::new(
                types::Fd(*fd),
                addr.as_mut_ptr(),
                &mut addr.len as *mut libc::socklen_t,
            )
            .flags(libc::SOCK_CLOEXEC)
            .build(),

            Op::Connect { fd, addr } => {
                opcode::Connect::new(types::Fd(*fd), addr.as_ptr(), addr.len).build()
            }

            Op::Recv { fd, buf, len } => {
                opcode::Recv::new(types::Fd(*fd), *buf, *len as u32).build()
            }

            Op::Send { fd, buf, len } => opcode::Send::new(types::Fd(*fd), *buf, *len as u32)
                .flags(libc::MSG_NOSIGNAL)
                .build(),

            Op::Close { fd } => opcode::Close::new(types::Fd(*fd)).build(),

            Op::Open { path, flags, mode } => {
                opcode::OpenAt::new(types::Fd(libc::AT_FDCWD), path.as_ptr())
                    .flags(*flags | libc::O_CLOEXEC)
                    .mode(*mode)
                    .build()
            }

            Op::Read { fd, buf, len, offset } => {
                opcode::Read::new(types::Fd(*fd), *buf, *len as u32)
                    .offset(*offset)
                    .build()
            }

            Op::Write { fd, buf, len, offset } => {
                opcode::Write::new(types::Fd(*fd), *buf, *len as u32)
                    .offset(*offset)
                    .build()
            }

            Op::Timer { deadline } => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let ts = Box::new(
                    types::Timespec::new()
                        .sec(remaining.as_secs())
                        .nsec(remaining.subsec_nanos()),
                );
                let sqe = opcode::Timeout::new(&*ts as *const types::Timespec).build();
                ts_keepalive = Some(ts);
                sqe
            }
        };

        (sqe.user_data(user_data), ts_keepalive)
    }

    /// Fold a CQE back into the typed completion its op kind implies.
    fn translate(op: &Op, res: i32) -> CompletionResult {
        match op {
            Op::Accept { addr, .. } if res >= 0 => CompletionResult::Socket {
                fd: res,
                addr: **addr,
            },
            Op::Open { .. } if res >= 0 => CompletionResult::Fd(res),
            Op::Connect { .. } | Op::Close { .. } if res == 0 => CompletionResult::Void,
            // A pure timeout SQE fires as -ETIME; that is the normal
            // completion for a timer job, not an error.
            Op::Timer { .. } if res == -libc::ETIME || res == 0 => CompletionResult::Void,
            _ => CompletionResult::Value(res as i64),
        }
    }

    /// Drain available CQEs into the completion buffer, up to reap_max.
    fn drain_cqes(&mut self) {
        let cq = self.ring.completion();
        for cqe in cq {
            if self.completions.len() >= self.reap_max {
                break;
            }
            let ctx = cqe.user_data();
            match self.inflight.remove(&ctx) {
                Some(inflight) => {
                    let result = Self::translate(&inflight.job.op, cqe.result());
                    self.completions
                        .push(Completion::new(TaskId::from_ctx(ctx), result));
                }
                None => {
                    log::warn!("cqe with unknown user_data {}", ctx);
                }
            }
        }
    }
}

impl Backend for UringBackend {
    fn caps(&self) -> Caps {
        Caps::all()
    }

    fn queue(&mut self, job: Job) -> Result<()> {
        if self.in_flight() >= self.jobs_max {
            return Err(Error::QueueFull);
        }
        self.queued.push(job).map_err(|_| Error::QueueFull)
    }

    fn submit(&mut self) -> Result<()> {
        let mut pushed = 0usize;
        while let Some(mut job) = self.queued.pop() {
            let (sqe, ts) = Self::build_sqe(&mut job);
            loop {
                let res = unsafe { self.ring.submission().push(&sqe) };
                match res {
                    Ok(()) => break,
                    Err(_) => {
                        // SQ full: hand what we have to the kernel and
                        // retry the push against the freed slots.
                        self.ring
                            .submit()
                            .map_err(|e| Error::Unexpected(e.raw_os_error().unwrap_or(libc::EIO)))?;
                    }
                }
            }
            self.inflight.insert(job.ctx.as_ctx(), Inflight { job, _ts: ts });
            pushed += 1;
        }

        if pushed > 0 {
            self.ring
                .submit()
                .map_err(|e| Error::Unexpected(e.raw_os_error().unwrap_or(libc::EIO)))?;
        }
        Ok(())
    }

    fn reap(&mut self) -> Result<&[Completion]> {
        self.completions.clear();
        if self.inflight.is_empty() {
            return Ok(&self.completions);
        }

        self.drain_cqes();
        if !self.completions.is_empty() {
            return Ok(&self.completions);
        }

        // Block for the first CQE, bounded by the reap timeout.
        let ts = timespec_from(REAP_WAIT);
        let args = types::SubmitArgs::new().timespec(&ts);
        match self.ring.submitter().submit_with_args(1, &args) {
            Ok(_) => {}
            Err(e) => match e.raw_os_error() {
                Some(libc::ETIME) | Some(libc::EINTR) | Some(libc::EBUSY) => {}
                _ => return Err(Error::Unexpected(e.raw_os_error().unwrap_or(libc::EIO))),
            },
        }

        self.drain_cqes();
        Ok(&self.completions)
    }
}

impl Drop for UringBackend {
    fn drop(&mut self) {
        // Drain whatever already completed so the kernel side is quiet
        // before the ring fd closes.
        for _ in self.ring.completion() {}
        if !self.inflight.is_empty() {
            log::debug!("dropping uring backend with {} jobs in flight", self.inflight.len());
        }
    }
}

fn timespec_from(d: Duration) -> types::Timespec {
    types::Timespec::new().sec(d.as_secs()).nsec(d.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::RawFd;
    use std::time::Instant;

    fn cfg() -> AioConfig {
        AioConfig {
            jobs_max: 8,
            reap_max: 16,
            op_timeout: None,
        }
    }

    /// io_uring may be unavailable (old kernel, seccomp); skip quietly.
    fn backend() -> Option<UringBackend> {
        UringBackend::new(&cfg()).ok()
    }

    fn socketpair_nonblocking() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        let ret = unsafe {
            libc::socketpair(
                libc::AF_UNIX,
                libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                0,
                fds.as_mut_ptr(),
            )
        };
        assert_eq!(ret, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn test_timer_fires_as_void() {
        let Some(mut b) = backend() else { return };
        b.queue_timer(TaskId::new(5), 5).unwrap();
        b.submit().unwrap();

        let start = Instant::now();
        loop {
            let comps = b.reap().unwrap();
            if !comps.is_empty() {
                assert_eq!(comps[0].ctx, TaskId::new(5));
                assert!(matches!(comps[0].result, CompletionResult::Void));
                break;
            }
            assert!(start.elapsed() < Duration::from_secs(2), "timer never fired");
        }
        assert_eq!(b.in_flight(), 0);
    }

    #[test]
    fn test_recv_roundtrip() {
        let Some(mut b) = backend() else { return };
        let (a, peer) = socketpair_nonblocking();

        let mut buf = [0u8; 8];
        b.queue_recv(TaskId::new(1), a, buf.as_mut_ptr(), buf.len())
            .unwrap();
        b.submit().unwrap();

        let sent = unsafe { libc::send(peer, b"ring".as_ptr() as *const _, 4, 0) };
        assert_eq!(sent, 4);

        let start = Instant::now();
        loop {
            let comps = b.reap().unwrap();
            if !comps.is_empty() {
                assert!(matches!(comps[0].result, CompletionResult::Value(4)));
                assert_eq!(&buf[..4], b"ring");
                break;
            }
            assert!(start.elapsed() < Duration::from_secs(2), "recv never completed");
        }

        unsafe {
            libc::close(a);
            libc::close(peer);
        }
    }

    #[test]
    fn test_queue_full_at_jobs_max() {
        let Some(mut b) = backend() else { return };
        for i in 0..8 {
            b.queue_timer(TaskId::new(i), 1000).unwrap();
        }
        assert_eq!(b.queue_timer(TaskId::new(99), 1000), Err(Error::QueueFull));
    }
}
