//! Runtime configuration
//!
//! Plain options struct with builder-style setters, compile-time
//! defaults, and runtime environment overrides.
//!
//! # Configuration priority (highest wins)
//!
//! 1. Builder setters
//! 2. Environment variables (`STRAND_*`)
//! 3. Library defaults

use std::str::FromStr;
use std::time::Duration;

use strand_aio::{AioConfig, BackendKind};
use strand_core::env::{env_get, env_get_opt};
use strand_core::{Error, Result};

/// Compile-time defaults.
pub mod defaults {
    /// Task slots preallocated at construction
    pub const SIZE_TASKS_INITIAL: usize = 64;
    /// Hard cap on task slots (`grow` pooling stops here)
    pub const SIZE_TASKS_MAX: usize = 4096;
    /// Cap on AIO jobs queued + in flight
    pub const SIZE_AIO_JOBS_MAX: usize = 1024;
    /// Max completions per reap
    pub const SIZE_AIO_REAP_MAX: usize = 256;
    /// Stack size for the entry frame
    pub const SIZE_STACK_DEFAULT: usize = 64 * 1024;
}

/// Thread-mode selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Threading {
    /// One runtime on the calling thread
    #[default]
    Single,
    /// One independent runtime per pool thread
    Auto,
}

impl FromStr for Threading {
    type Err = ();

    fn from_str(s: &str) -> core::result::Result<Self, ()> {
        match s {
            "single" => Ok(Threading::Single),
            "auto" => Ok(Threading::Auto),
            _ => Err(()),
        }
    }
}

/// Task-slot pooling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pooling {
    /// Fixed at `size_tasks_initial`
    Static,
    /// Grow on demand up to `size_tasks_max`
    #[default]
    Grow,
}

impl FromStr for Pooling {
    type Err = ();

    fn from_str(s: &str) -> core::result::Result<Self, ()> {
        match s {
            "static" => Ok(Pooling::Static),
            "grow" => Ok(Pooling::Grow),
            _ => Err(()),
        }
    }
}

/// Runtime construction options.
///
/// Use `from_env()` to start from the defaults with any `STRAND_*`
/// environment overrides applied, then refine programmatically:
///
/// ```ignore
/// let opts = RuntimeOptions::from_env()
///     .threading(Threading::Auto)
///     .size_aio_jobs_max(256);
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Thread mode
    pub threading: Threading,
    /// Pool threads in `auto` mode; 0 means one per available core
    pub pool_threads: usize,
    /// Task-slot pooling policy
    pub pooling: Pooling,
    /// Task slots preallocated at construction
    pub size_tasks_initial: usize,
    /// Hard cap on task slots
    pub size_tasks_max: usize,
    /// Cap on AIO jobs queued + in flight
    pub size_aio_jobs_max: usize,
    /// Max completions per reap
    pub size_aio_reap_max: usize,
    /// Per-operation timeout in milliseconds (busy-loop backend only)
    pub ms_operation_max: Option<u64>,
    /// Stack size for the entry frame
    pub size_stack_default: usize,
    /// Backend selection; `Auto` is platform-driven
    pub backend: BackendKind,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RuntimeOptions {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `STRAND_THREADING` - `single` | `auto`
    /// - `STRAND_POOL_THREADS` - pool threads in auto mode
    /// - `STRAND_POOLING` - `static` | `grow`
    /// - `STRAND_SIZE_TASKS_INITIAL` - preallocated task slots
    /// - `STRAND_SIZE_TASKS_MAX` - task slot cap
    /// - `STRAND_SIZE_AIO_JOBS_MAX` - in-flight job cap
    /// - `STRAND_SIZE_AIO_REAP_MAX` - completions per reap
    /// - `STRAND_MS_OPERATION_MAX` - per-op timeout in ms
    /// - `STRAND_SIZE_STACK_DEFAULT` - entry-frame stack size
    /// - `STRAND_BACKEND` - `auto` | `busy` | `poll` | `uring`
    pub fn from_env() -> Self {
        Self {
            threading: env_get_opt("STRAND_THREADING").unwrap_or_default(),
            pool_threads: env_get("STRAND_POOL_THREADS", 0),
            pooling: env_get_opt("STRAND_POOLING").unwrap_or_default(),
            size_tasks_initial: env_get("STRAND_SIZE_TASKS_INITIAL", defaults::SIZE_TASKS_INITIAL),
            size_tasks_max: env_get("STRAND_SIZE_TASKS_MAX", defaults::SIZE_TASKS_MAX),
            size_aio_jobs_max: env_get("STRAND_SIZE_AIO_JOBS_MAX", defaults::SIZE_AIO_JOBS_MAX),
            size_aio_reap_max: env_get("STRAND_SIZE_AIO_REAP_MAX", defaults::SIZE_AIO_REAP_MAX),
            ms_operation_max: env_get_opt("STRAND_MS_OPERATION_MAX"),
            size_stack_default: env_get("STRAND_SIZE_STACK_DEFAULT", defaults::SIZE_STACK_DEFAULT),
            backend: env_get_opt("STRAND_BACKEND").unwrap_or_default(),
        }
    }

    // ── Builder-style setters ──

    pub fn threading(mut self, v: Threading) -> Self {
        self.threading = v;
        self
    }

    pub fn pool_threads(mut self, v: usize) -> Self {
        self.pool_threads = v;
        self
    }

    pub fn pooling(mut self, v: Pooling) -> Self {
        self.pooling = v;
        self
    }

    pub fn size_tasks_initial(mut self, v: usize) -> Self {
        self.size_tasks_initial = v;
        self
    }

    pub fn size_tasks_max(mut self, v: usize) -> Self {
        self.size_tasks_max = v;
        self
    }

    pub fn size_aio_jobs_max(mut self, v: usize) -> Self {
        self.size_aio_jobs_max = v;
        self
    }

    pub fn size_aio_reap_max(mut self, v: usize) -> Self {
        self.size_aio_reap_max = v;
        self
    }

    pub fn ms_operation_max(mut self, v: u64) -> Self {
        self.ms_operation_max = Some(v);
        self
    }

    pub fn size_stack_default(mut self, v: usize) -> Self {
        self.size_stack_default = v;
        self
    }

    pub fn backend(mut self, v: BackendKind) -> Self {
        self.backend = v;
        self
    }

    /// Reject configurations the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.size_tasks_initial == 0
            || self.size_tasks_max < self.size_tasks_initial
            || self.size_aio_jobs_max == 0
            || self.size_aio_reap_max == 0
        {
            return Err(Error::Unexpected(libc::EINVAL));
        }
        Ok(())
    }

    /// The backend-facing slice of these options.
    pub(crate) fn aio_config(&self) -> AioConfig {
        AioConfig {
            jobs_max: self.size_aio_jobs_max,
            reap_max: self.size_aio_reap_max,
            op_timeout: self.ms_operation_max.map(Duration::from_millis),
        }
    }

    /// Pool width for `auto` mode.
    pub(crate) fn effective_pool_threads(&self) -> usize {
        if self.pool_threads > 0 {
            self.pool_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let opts = RuntimeOptions::from_env();
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        let opts = RuntimeOptions::from_env().size_tasks_initial(0);
        assert!(opts.validate().is_err());

        let opts = RuntimeOptions::from_env()
            .size_tasks_initial(100)
            .size_tasks_max(10);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("auto".parse::<Threading>(), Ok(Threading::Auto));
        assert_eq!("static".parse::<Pooling>(), Ok(Pooling::Static));
        assert!("bogus".parse::<Threading>().is_err());
    }

    #[test]
    fn test_builder_chain() {
        let opts = RuntimeOptions::from_env()
            .threading(Threading::Auto)
            .size_aio_jobs_max(1)
            .ms_operation_max(250);
        assert_eq!(opts.threading, Threading::Auto);
        assert_eq!(opts.size_aio_jobs_max, 1);
        assert_eq!(opts.aio_config().op_timeout, Some(Duration::from_millis(250)));
    }
}
