//! Thread-local active-frame bookkeeping
//!
//! The context switch needs two anchors that cannot travel through
//! function arguments: where the scheduler's registers live (to switch
//! back to on yield) and where the running frame's registers live (to
//! save into). Both are set around each resume and cleared after.
//!
//! The runtime pointer is set for the duration of `run` so frame entry
//! functions can find their runtime without it being captured at spawn
//! time (the runtime value may move between `spawn` and `run`).

use std::cell::Cell;

use strand_core::TaskId;

use crate::arch::{self, Context};

thread_local! {
    static RUNTIME: Cell<*const ()> = const { Cell::new(std::ptr::null()) };
    static SCHED_CTX: Cell<*mut Context> = const { Cell::new(std::ptr::null_mut()) };
    static FRAME_CTX: Cell<*mut Context> = const { Cell::new(std::ptr::null_mut()) };
    static CURRENT: Cell<TaskId> = const { Cell::new(TaskId::NONE) };
}

/// Install the runtime driving this thread's scheduler loop.
pub(crate) fn set_runtime(rt: *const ()) {
    RUNTIME.with(|c| c.set(rt));
}

pub(crate) fn clear_runtime() {
    RUNTIME.with(|c| c.set(std::ptr::null()));
}

/// The runtime whose `run` loop is active on this thread.
pub(crate) fn runtime() -> *const () {
    RUNTIME.with(|c| c.get())
}

/// Mark `id` as the running frame and record both context anchors.
pub(crate) fn enter_frame(id: TaskId, frame_ctx: *mut Context, sched_ctx: *mut Context) {
    CURRENT.with(|c| c.set(id));
    FRAME_CTX.with(|c| c.set(frame_ctx));
    SCHED_CTX.with(|c| c.set(sched_ctx));
}

pub(crate) fn exit_frame() {
    CURRENT.with(|c| c.set(TaskId::NONE));
    FRAME_CTX.with(|c| c.set(std::ptr::null_mut()));
    SCHED_CTX.with(|c| c.set(std::ptr::null_mut()));
}

/// The task id of the frame currently executing on this thread.
pub(crate) fn current() -> TaskId {
    CURRENT.with(|c| c.get())
}

/// Whether this code is running inside a frame.
pub fn in_frame() -> bool {
    !current().is_none()
}

/// Suspend the running frame: save its registers and resume the
/// scheduler loop. Returns when the scheduler next resumes the frame.
///
/// The caller must have parked its slot in the state the scheduler
/// should observe (runnable for a plain yield, waiting for io_await,
/// dead on finish) before calling.
pub(crate) fn switch_to_scheduler() {
    let frame_ctx = FRAME_CTX.with(|c| c.get());
    let sched_ctx = SCHED_CTX.with(|c| c.get());
    debug_assert!(!frame_ctx.is_null() && !sched_ctx.is_null());
    unsafe { arch::switch_context(frame_ctx, sched_ctx) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_in_frame_by_default() {
        assert!(!in_frame());
        assert!(current().is_none());
        assert!(runtime().is_null());
    }
}
