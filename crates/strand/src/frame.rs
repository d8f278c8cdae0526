//! Frame substrate
//!
//! A frame is a stackful coroutine: an owned guard-paged stack plus the
//! callee-saved register context it suspends with. Frames live in a
//! `Box` inside their task slot so the context memory never moves while
//! the frame is suspended.
//!
//! A frame's entry closure runs to completion on the frame's own
//! stack. When it returns, the frame marks its slot dead and switches
//! back to the scheduler for the last time; the scheduler then frees
//! the stack and recycles the slot.

use std::panic::{catch_unwind, AssertUnwindSafe};

use strand_core::Result;

use crate::arch::{self, Context};
use crate::runtime::Runtime;
use crate::stack::Stack;
use crate::tls;

/// The spawned closure, boxed for the trip through the register file.
pub(crate) type EntryCell = Box<dyn FnOnce(&Runtime)>;

/// A stackful cooperative task.
pub struct Frame {
    ctx: Context,
    stack: Stack,
    entry_arg: *mut EntryCell,
    started: bool,
}

impl Frame {
    /// Allocate a stack of `stack_size` usable bytes and arrange for
    /// the first resume to run `cell`.
    pub(crate) fn new(stack_size: usize, cell: EntryCell) -> Result<Frame> {
        let stack = Stack::new(stack_size)?;
        let entry_arg = Box::into_raw(Box::new(cell));

        let mut frame = Frame {
            ctx: Context::zeroed(),
            stack,
            entry_arg,
            started: false,
        };
        unsafe {
            arch::init_context(
                &mut frame.ctx,
                frame.stack.top(),
                frame_entry as usize,
                entry_arg as usize,
            );
        }
        Ok(frame)
    }

    /// Where this frame's registers are saved while suspended.
    ///
    /// The pointer is stable because frames are boxed in their slot.
    pub(crate) fn ctx_ptr(&mut self) -> *mut Context {
        &mut self.ctx
    }

    /// Switch from the scheduler into this frame. Returns when the
    /// frame yields, parks, or finishes.
    ///
    /// # Safety
    ///
    /// Must be called with TLS anchors installed (`tls::enter_frame`)
    /// and `sched_ctx` pointing at live memory that outlives the
    /// switch.
    pub(crate) unsafe fn resume(&mut self, sched_ctx: *mut Context) {
        self.started = true;
        arch::switch_context(sched_ctx, &mut self.ctx);
    }

    /// Usable stack bytes.
    pub fn stack_size(&self) -> usize {
        self.stack.usable()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        // A frame that never ran still owns its boxed closure; the
        // first resume hands that ownership to frame_entry.
        if !self.started {
            unsafe { drop(Box::from_raw(self.entry_arg)) };
        }
    }
}

/// Runs on the frame's own stack, called by the arch trampoline.
///
/// Never returns: the closure's natural return marks the slot dead and
/// switches back to the scheduler, which frees this stack.
extern "C" fn frame_entry(arg: usize) {
    let cell: Box<EntryCell> = unsafe { Box::from_raw(arg as *mut EntryCell) };

    let rt = tls::runtime() as *const Runtime;
    debug_assert!(!rt.is_null(), "frame resumed outside a runtime loop");
    let rt = unsafe { &*rt };

    // A panic must not unwind into the trampoline's assembly frame.
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (cell)(rt))) {
        let msg = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("<non-string panic payload>");
        log::error!("frame {} panicked: {}; aborting runtime", tls::current(), msg);
        std::process::abort();
    }

    rt.finish_current();
    unreachable!("finished frame was resumed");
}
