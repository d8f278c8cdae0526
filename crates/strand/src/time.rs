//! Timer surface
//!
//! `Timer::delay` parks the calling frame for a duration. Backends
//! with the timer capability complete it through the kernel; the rest
//! degrade to a clock-check yield loop, so a delaying frame still
//! costs no OS-thread sleep.

use std::time::{Duration, Instant};

use strand_core::{Op, Result};

use crate::runtime::Runtime;

pub struct Timer;

impl Timer {
    /// Suspend the calling frame for at least `duration`.
    pub fn delay(rt: &Runtime, duration: Duration) -> Result<()> {
        rt.io_run(Op::Timer {
            deadline: Instant::now() + duration,
        })?
        .into_void()
    }
}
