//! Busy-loop backend
//!
//! The portable fallback: every operation is driven by non-blocking
//! syscalls from a FIFO scan loop, no kernel queue involved. This is
//! also the only variant that synthesizes per-operation timeouts:
//! each job is stamped at `submit()` and reaped as `Timeout` once
//! `now - submit_time` reaches the configured deadline.
//!
//! `close` is exempt from the timeout: a timed-out close would leak
//! the descriptor with no safe way to retry, and close completes on
//! the next scan pass anyway. Timer jobs are likewise exempt; their
//! own deadline governs them.

use std::time::{Duration, Instant};

use strand_core::{Caps, Completion, CompletionResult, Error, Job, Op, Result, SpscRing};

use crate::{sys, AioConfig, Backend, REAP_WAIT};

/// Sleep between scan passes so a drained system does not hard-spin.
const SCAN_IDLE: Duration = Duration::from_micros(50);

/// Busy-polling AIO engine.
pub struct BusyBackend {
    /// Hand-off between `queue_*` and `submit`
    queued: SpscRing<Job>,
    /// Submitted jobs, scanned FIFO by `reap`
    pending: Vec<Job>,
    /// Completion buffer lent out by `reap`
    completions: Vec<Completion>,
    jobs_max: usize,
    reap_max: usize,
    op_timeout: Option<Duration>,
}

impl BusyBackend {
    pub fn new(cfg: &AioConfig) -> Self {
        let ring_cap = cfg.jobs_max.next_power_of_two().max(2);
        Self {
            queued: SpscRing::with_capacity(ring_cap).expect("jobs_max rounded to power of two"),
            pending: Vec::with_capacity(cfg.jobs_max),
            completions: Vec::with_capacity(cfg.reap_max),
            jobs_max: cfg.jobs_max,
            reap_max: cfg.reap_max,
            op_timeout: cfg.op_timeout,
        }
    }

    /// Number of jobs queued or in flight.
    pub fn in_flight(&self) -> usize {
        self.queued.len() + self.pending.len()
    }

    /// One scan over the pending list. Appends completions, compacts
    /// the list via swap-remove. Returns once `reap_max` is reached.
    fn scan(&mut self) {
        let now = Instant::now();
        let mut i = 0;
        while i < self.pending.len() {
            if self.completions.len() >= self.reap_max {
                return;
            }

            // Timeout synthesis. `close` never times out, and a timer
            // is governed by its own deadline, not the operation cap.
            if let (Some(t_op), Some(submitted)) =
                (self.op_timeout, self.pending[i].submitted_at)
            {
                let timeable =
                    !matches!(self.pending[i].op, Op::Close { .. } | Op::Timer { .. });
                if timeable && now.duration_since(submitted) >= t_op {
                    let job = self.pending.swap_remove(i);
                    log::debug!("busy: {} job for {} timed out", job.op.name(), job.ctx);
                    self.completions
                        .push(Completion::new(job.ctx, CompletionResult::Timeout));
                    continue;
                }
            }

            match sys::attempt(&mut self.pending[i].op) {
                Some(result) => {
                    let job = self.pending.swap_remove(i);
                    self.completions.push(Completion::new(job.ctx, result));
                }
                None => i += 1,
            }
        }
    }
}

impl Backend for BusyBackend {
    fn caps(&self) -> Caps {
        // Every operation is handled by the scan loop itself, so the
        // I/O surface never needs its own fallback here.
        Caps::all()
    }

    fn queue(&mut self, job: Job) -> Result<()> {
        if self.in_flight() >= self.jobs_max {
            return Err(Error::QueueFull);
        }
        self.queued.push(job).map_err(|_| Error::QueueFull)
    }

    fn submit(&mut self) -> Result<()> {
        let now = Instant::now();
        while let Some(mut job) = self.queued.pop() {
            job.submitted_at = Some(now);
            self.pending.push(job);
        }
        Ok(())
    }

    fn reap(&mut self) -> Result<&[Completion]> {
        self.completions.clear();
        if self.pending.is_empty() {
            return Ok(&self.completions);
        }

        let deadline = Instant::now() + REAP_WAIT;
        loop {
            self.scan();
            if !self.completions.is_empty() || Instant::now() >= deadline {
                return Ok(&self.completions);
            }
            std::thread::sleep(SCAN_IDLE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::TaskId;
    use std::os::unix::io::RawFd;

    fn cfg(jobs_max: usize, op_timeout: Option<Duration>) -> AioConfig {
        AioConfig {
            jobs_max,
            reap_max: 16,
            op_timeout,
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
    fn test_queue_full_at_jobs_max() {
        let mut b = BusyBackend::new(&cfg(2, None));
        b.queue_timer(TaskId::new(0), 1000).unwrap();
        b.queue_timer(TaskId::new(1), 1000).unwrap();
        assert_eq!(b.queue_timer(TaskId::new(2), 1000), Err(Error::QueueFull));

        // Submitted jobs still count against the cap.
        b.submit().unwrap();
        assert_eq!(b.queue_timer(TaskId::new(2), 1000), Err(Error::QueueFull));
    }

    #[test]
    fn test_timer_completes_as_void() {
        let mut b = BusyBackend::new(&cfg(8, None));
        b.queue_timer(TaskId::new(3), 10).unwrap();
        b.submit().unwrap();

        let start = Instant::now();
        loop {
            let comps = b.reap().unwrap();
            if !comps.is_empty() {
                assert_eq!(comps.len(), 1);
                assert_eq!(comps[0].ctx, TaskId::new(3));
                assert!(matches!(comps[0].result, CompletionResult::Void));
                break;
            }
            assert!(start.elapsed() < Duration::from_secs(2), "timer never fired");
        }
        assert_eq!(b.in_flight(), 0);
    }

    #[test]
    fn test_recv_parks_until_peer_sends() {
        let (a, b_fd) = socketpair_nonblocking();
        let mut b = BusyBackend::new(&cfg(8, None));

        let mut buf = [0u8; 8];
        b.queue_recv(TaskId::new(1), a, buf.as_mut_ptr(), buf.len())
            .unwrap();
        b.submit().unwrap();

        // Nothing to read yet: reap returns empty after its wait.
        assert!(b.reap().unwrap().is_empty());

        let sent = unsafe { libc::send(b_fd, b"hi".as_ptr() as *const _, 2, 0) };
        assert_eq!(sent, 2);

        let comps = b.reap().unwrap();
        assert_eq!(comps.len(), 1);
        assert!(matches!(comps[0].result, CompletionResult::Value(2)));
        assert_eq!(&buf[..2], b"hi");

        unsafe {
            libc::close(a);
            libc::close(b_fd);
        }
    }

    #[test]
    fn test_never_completing_op_reaps_as_timeout() {
        let (a, b_fd) = socketpair_nonblocking();
        let mut b = BusyBackend::new(&cfg(8, Some(Duration::from_millis(30))));

        // Peer never sends: the recv can only finish via the deadline.
        let mut buf = [0u8; 8];
        b.queue_recv(TaskId::new(9), a, buf.as_mut_ptr(), buf.len())
            .unwrap();
        b.submit().unwrap();

        let start = Instant::now();
        let comps = loop {
            let comps = b.reap().unwrap();
            if !comps.is_empty() {
                break comps;
            }
        };
        assert!(matches!(comps[0].result, CompletionResult::Timeout));
        // Within ms_operation_max plus scheduling slack.
        assert!(start.elapsed() < Duration::from_millis(500));

        unsafe {
            libc::close(a);
            libc::close(b_fd);
        }
    }

    #[test]
    fn test_close_is_exempt_from_timeout() {
        let (a, b_fd) = socketpair_nonblocking();
        let mut b = BusyBackend::new(&cfg(8, Some(Duration::from_millis(1))));

        b.queue_close(TaskId::new(4), a).unwrap();
        b.submit().unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let comps = b.reap().unwrap();
        assert_eq!(comps.len(), 1);
        assert!(matches!(comps[0].result, CompletionResult::Void));

        unsafe { libc::close(b_fd) };
    }

    #[test]
    fn test_reap_without_jobs_returns_immediately() {
        let mut b = BusyBackend::new(&cfg(8, None));
        let start = Instant::now();
        assert!(b.reap().unwrap().is_empty());
        assert!(start.elapsed() < REAP_WAIT);
    }
}
