//! Readiness backend (epoll)
//!
//! Registers socket descriptors with epoll and performs the actual
//! syscall once the kernel reports readiness. Level-triggered, so a
//! socket that stays ready keeps being reported until its job drains.
//!
//! Capability set is the readiness subset: accept/connect/recv/send.
//! File, close, and timer operations are not advertised; the I/O
//! surface routes those through its non-blocking fallback instead.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Instant;

use strand_core::{Caps, Completion, CompletionResult, Error, Job, Op, Result, SpscRing};

use crate::{sys, AioConfig, Backend, REAP_WAIT};

/// Readiness bits a job waits for.
fn interest_of(op: &Op) -> u32 {
    match op {
        Op::Accept { .. } | Op::Recv { .. } => libc::EPOLLIN as u32,
        Op::Connect { .. } | Op::Send { .. } => libc::EPOLLOUT as u32,
        // Rejected at queue time.
        _ => 0,
    }
}

/// Per-descriptor registration state. Several jobs may wait on one
/// descriptor (e.g. full-duplex recv + send from two frames); epoll
/// carries the union of their interests.
struct FdEntry {
    tokens: Vec<usize>,
    interests: u32,
}

/// epoll-based AIO engine.
pub struct PollBackend {
    epfd: RawFd,
    /// Hand-off between `queue_*` and `submit`
    queued: SpscRing<Job>,
    /// Token-indexed jobs waiting for readiness
    pending: Vec<Option<Job>>,
    /// LIFO free list of pending tokens
    free: Vec<usize>,
    pending_count: usize,
    by_fd: HashMap<RawFd, FdEntry>,
    /// Jobs that completed during registration (connect refused,
    /// socket already readable); drained by the next `reap`
    ready: Vec<Completion>,
    events: Vec<libc::epoll_event>,
    completions: Vec<Completion>,
    jobs_max: usize,
    reap_max: usize,
}

impl PollBackend {
    pub fn new(cfg: &AioConfig) -> Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(Error::from_errno(sys::last_errno()));
        }
        let ring_cap = cfg.jobs_max.next_power_of_two().max(2);
        Ok(Self {
            epfd,
            queued: SpscRing::with_capacity(ring_cap).expect("jobs_max rounded to power of two"),
            pending: Vec::new(),
            free: Vec::new(),
            pending_count: 0,
            by_fd: HashMap::new(),
            ready: Vec::new(),
            events: vec![unsafe { std::mem::zeroed() }; cfg.reap_max.max(16)],
            completions: Vec::with_capacity(cfg.reap_max),
            jobs_max: cfg.jobs_max,
            reap_max: cfg.reap_max,
        })
    }

    /// Number of jobs queued or in flight.
    pub fn in_flight(&self) -> usize {
        self.queued.len() + self.pending_count + self.ready.len()
    }

    fn fd_of(op: &Op) -> RawFd {
        match op {
            Op::Accept { fd, .. }
            | Op::Connect { fd, .. }
            | Op::Recv { fd, .. }
            | Op::Send { fd, .. } => *fd,
            _ => -1,
        }
    }

    /// Register one job with epoll, attempting it once first so
    /// connects get initiated and already-ready sockets complete
    /// without a wait.
    fn register(&mut self, mut job: Job) -> Result<()> {
        if let Some(result) = sys::attempt(&mut job.op) {
            self.ready.push(Completion::new(job.ctx, result));
            return Ok(());
        }

        let fd = Self::fd_of(&job.op);
        let want = interest_of(&job.op);

        let token = match self.free.pop() {
            Some(t) => {
                self.pending[t] = Some(job);
                t
            }
            None => {
                self.pending.push(Some(job));
                self.pending.len() - 1
            }
        };
        self.pending_count += 1;

        let entry = self.by_fd.entry(fd).or_insert(FdEntry {
            tokens: Vec::new(),
            interests: 0,
        });
        let is_new = entry.tokens.is_empty();
        entry.tokens.push(token);
        entry.interests |= want;

        let mut ev = libc::epoll_event {
            events: entry.interests,
            u64: fd as u64,
        };
        let op = if is_new {
            libc::EPOLL_CTL_ADD
        } else {
            libc::EPOLL_CTL_MOD
        };
        if unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) } < 0 {
            let errno = sys::last_errno();
            log::warn!("epoll_ctl failed for fd {}: errno {}", fd, errno);
            // Unwind the registration and fail the job instead of
            // wedging it forever.
            self.drop_token(fd, token);
            let job = self.pending[token].take().expect("job present");
            self.free.push(token);
            self.pending_count -= 1;
            self.ready
                .push(Completion::new(job.ctx, CompletionResult::Value(-(errno as i64))));
        }
        Ok(())
    }

    /// Remove a token's registration, updating or deleting the epoll
    /// entry for its descriptor.
    fn drop_token(&mut self, fd: RawFd, token: usize) {
        let remaining = match self.by_fd.get_mut(&fd) {
            Some(entry) => {
                entry.tokens.retain(|t| *t != token);
                entry.tokens.clone()
            }
            None => return,
        };

        if remaining.is_empty() {
            self.by_fd.remove(&fd);
            unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
            return;
        }

        let interests = remaining
            .iter()
            .filter_map(|t| self.pending[*t].as_ref())
            .fold(0u32, |acc, j| acc | interest_of(&j.op));
        if let Some(entry) = self.by_fd.get_mut(&fd) {
            entry.interests = interests;
        }
        let mut ev = libc::epoll_event {
            events: interests,
            u64: fd as u64,
        };
        unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut ev) };
    }

    /// Drive every job parked on a now-ready descriptor.
    fn handle_ready(&mut self, fd: RawFd, revents: u32) {
        let tokens = match self.by_fd.get(&fd) {
            Some(entry) => entry.tokens.clone(),
            None => return,
        };
        let hard = revents & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0;

        for token in tokens {
            if self.completions.len() >= self.reap_max {
                return;
            }
            let job = match self.pending[token].as_mut() {
                Some(j) => j,
                None => continue,
            };
            if !hard && revents & interest_of(&job.op) == 0 {
                continue;
            }
            if let Some(result) = sys::attempt(&mut job.op) {
                let job = self.pending[token].take().expect("job present");
                self.free.push(token);
                self.pending_count -= 1;
                self.completions.push(Completion::new(job.ctx, result));
                self.drop_token(fd, token);
            }
            // Still not ready: level-triggered epoll will report again.
        }
    }
}

impl Backend for PollBackend {
    fn caps(&self) -> Caps {
        Caps::READINESS
    }

    fn queue(&mut self, job: Job) -> Result<()> {
        if interest_of(&job.op) == 0 {
            return Err(Error::OperationNotSupported);
        }
        if self.in_flight() >= self.jobs_max {
            return Err(Error::QueueFull);
        }
        self.queued.push(job).map_err(|_| Error::QueueFull)
    }

    fn submit(&mut self) -> Result<()> {
        while let Some(job) = self.queued.pop() {
            self.register(job)?;
        }
        Ok(())
    }

    fn reap(&mut self) -> Result<&[Completion]> {
        self.completions.clear();
        self.completions.append(&mut self.ready);

        if !self.completions.is_empty() || self.pending_count == 0 {
            return Ok(&self.completions);
        }

        let deadline = Instant::now() + REAP_WAIT;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(&self.completions);
            }
            let timeout_ms = (deadline - now).as_millis().max(1) as i32;

            let n = unsafe {
                libc::epoll_wait(
                    self.epfd,
                    self.events.as_mut_ptr(),
                    self.events.len() as i32,
                    timeout_ms,
                )
            };
            if n < 0 {
                match sys::last_errno() {
                    libc::EINTR => continue,
                    e => return Err(Error::from_errno(e)),
                }
            }

            for i in 0..n as usize {
                let ev = self.events[i];
                self.handle_ready(ev.u64 as RawFd, ev.events);
            }

            if !self.completions.is_empty() {
                return Ok(&self.completions);
            }
        }
    }
}

impl Drop for PollBackend {
    fn drop(&mut self) {
        unsafe { libc::close(self.epfd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::TaskId;

    fn cfg() -> AioConfig {
        AioConfig {
            jobs_max: 8,
            reap_max: 16,
            op_timeout: None,
        }
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
    fn test_caps_are_readiness_subset() {
        let b = PollBackend::new(&cfg()).unwrap();
        assert_eq!(b.caps(), Caps::READINESS);
    }

    #[test]
    fn test_unsupported_op_rejected_at_queue() {
        let mut b = PollBackend::new(&cfg()).unwrap();
        assert_eq!(
            b.queue_timer(TaskId::new(0), 10),
            Err(Error::OperationNotSupported)
        );
        assert_eq!(
            b.queue_close(TaskId::new(0), 1),
            Err(Error::OperationNotSupported)
        );
    }

    #[test]
    fn test_recv_completes_on_readiness() {
        let (a, peer) = socketpair_nonblocking();
        let mut b = PollBackend::new(&cfg()).unwrap();

        let mut buf = [0u8; 8];
        b.queue_recv(TaskId::new(1), a, buf.as_mut_ptr(), buf.len())
            .unwrap();
        b.submit().unwrap();

        // No data yet: reap times out empty.
        assert!(b.reap().unwrap().is_empty());

        let sent = unsafe { libc::send(peer, b"ok".as_ptr() as *const _, 2, 0) };
        assert_eq!(sent, 2);

        let comps = b.reap().unwrap();
        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0].ctx, TaskId::new(1));
        assert!(matches!(comps[0].result, CompletionResult::Value(2)));
        assert_eq!(&buf[..2], b"ok");
        assert_eq!(b.in_flight(), 0);

        unsafe {
            libc::close(a);
            libc::close(peer);
        }
    }

    #[test]
    fn test_already_ready_socket_completes_without_wait() {
        let (a, peer) = socketpair_nonblocking();
        let sent = unsafe { libc::send(peer, b"x".as_ptr() as *const _, 1, 0) };
        assert_eq!(sent, 1);

        let mut b = PollBackend::new(&cfg()).unwrap();
        let mut buf = [0u8; 8];
        b.queue_recv(TaskId::new(2), a, buf.as_mut_ptr(), buf.len())
            .unwrap();
        b.submit().unwrap();

        let start = Instant::now();
        let comps = b.reap().unwrap();
        assert_eq!(comps.len(), 1);
        assert!(matches!(comps[0].result, CompletionResult::Value(1)));
        assert!(start.elapsed() < REAP_WAIT);

        unsafe {
            libc::close(a);
            libc::close(peer);
        }
    }

    #[test]
    fn test_duplex_jobs_share_descriptor() {
        let (a, peer) = socketpair_nonblocking();
        let mut b = PollBackend::new(&cfg()).unwrap();

        // Send side is immediately writable; recv side waits.
        let mut rbuf = [0u8; 8];
        b.queue_recv(TaskId::new(1), a, rbuf.as_mut_ptr(), rbuf.len())
            .unwrap();
        b.queue_send(TaskId::new(2), a, b"yo".as_ptr(), 2).unwrap();
        b.submit().unwrap();

        let comps = b.reap().unwrap();
        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0].ctx, TaskId::new(2));

        // Echo the bytes back so the recv job finishes too.
        let mut tmp = [0u8; 8];
        let n = unsafe { libc::recv(peer, tmp.as_mut_ptr() as *mut _, tmp.len(), 0) };
        assert_eq!(n, 2);
        let sent = unsafe { libc::send(peer, tmp.as_ptr() as *const _, 2, 0) };
        assert_eq!(sent, 2);

        let comps = b.reap().unwrap();
        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0].ctx, TaskId::new(1));
        assert_eq!(&rbuf[..2], b"yo");

        unsafe {
            libc::close(a);
            libc::close(peer);
        }
    }
}
