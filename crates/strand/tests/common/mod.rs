//! Shared helpers for the end-to-end suites.

use strand::{BackendKind, Runtime, RuntimeOptions};

/// Every backend this host can actually construct.
///
/// io_uring may be missing (old kernel, seccomp); it is probed rather
/// than assumed so the suite passes everywhere.
pub fn backends() -> Vec<BackendKind> {
    let mut kinds = vec![BackendKind::Busy];
    #[cfg(target_os = "linux")]
    {
        kinds.push(BackendKind::Poll);
        if Runtime::new(opts(BackendKind::Uring)).is_ok() {
            kinds.push(BackendKind::Uring);
        }
    }
    kinds
}

pub fn opts(backend: BackendKind) -> RuntimeOptions {
    RuntimeOptions::from_env().backend(backend)
}

pub const STACK: usize = 64 * 1024;
