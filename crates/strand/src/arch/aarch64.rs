//! aarch64 context switching
//!
//! Saves the AAPCS64 callee-saved set: x19-x28, fp, lr, sp, and the
//! low halves of v8-v15 (d8-d15).

use std::arch::naked_asm;

/// Callee-saved register state of a suspended frame.
///
/// Field order is load-bearing: the assembly below addresses these by
/// fixed offset.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub sp: u64,  // 0x00
    pub pc: u64,  // 0x08
    pub x19: u64, // 0x10
    pub x20: u64, // 0x18
    pub x21: u64, // 0x20
    pub x22: u64, // 0x28
    pub x23: u64, // 0x30
    pub x24: u64, // 0x38
    pub x25: u64, // 0x40
    pub x26: u64, // 0x48
    pub x27: u64, // 0x50
    pub x28: u64, // 0x58
    pub fp: u64,  // 0x60 (x29)
    pub lr: u64,  // 0x68 (x30)
    pub d8: u64,  // 0x70
    pub d9: u64,  // 0x78
    pub d10: u64, // 0x80
    pub d11: u64, // 0x88
    pub d12: u64, // 0x90
    pub d13: u64, // 0x98
    pub d14: u64, // 0xa0
    pub d15: u64, // 0xa8
}

impl Context {
    pub const fn zeroed() -> Self {
        Self {
            sp: 0,
            pc: 0,
            x19: 0,
            x20: 0,
            x21: 0,
            x22: 0,
            x23: 0,
            x24: 0,
            x25: 0,
            x26: 0,
            x27: 0,
            x28: 0,
            fp: 0,
            lr: 0,
            d8: 0,
            d9: 0,
            d10: 0,
            d11: 0,
            d12: 0,
            d13: 0,
            d14: 0,
            d15: 0,
        }
    }
}

/// Initialize a fresh frame's context.
///
/// The first switch into this context branches to the entry trampoline
/// with `entry_fn` in x19 and `entry_arg` in x20; sp stays 16-byte
/// aligned as AAPCS64 requires.
///
/// # Safety
///
/// `ctx` must point to valid Context memory. `stack_top` must be the
/// high end of a live stack mapping.
pub unsafe fn init_context(ctx: *mut Context, stack_top: *mut u8, entry_fn: usize, entry_arg: usize) {
    let sp = (stack_top as usize) & !0xF;

    let ctx = &mut *ctx;
    *ctx = Context::zeroed();
    ctx.sp = sp as u64;
    ctx.pc = entry_trampoline as usize as u64;
    ctx.x19 = entry_fn as u64;
    ctx.x20 = entry_arg as u64;
}

/// First instructions a fresh frame executes: call entry_fn(entry_arg).
#[unsafe(naked)]
unsafe extern "C" fn entry_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        "brk #0x1",
    );
}

/// Save callee-saved registers into `save`, restore from `load`.
///
/// A context written by this function resumes at the `1:` label, whose
/// `ret` branches to the restored lr, the original caller of
/// `switch_context`.
///
/// # Safety
///
/// Both pointers must reference valid Context memory; `load` must hold
/// either a context written by this function or one prepared by
/// `init_context`.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_save: *mut Context, _load: *const Context) {
    naked_asm!(
        // Save into old context (x0)
        "mov x9, sp",
        "adr x10, 1f",
        "stp x9, x10, [x0, #0x00]",
        "stp x19, x20, [x0, #0x10]",
        "stp x21, x22, [x0, #0x20]",
        "stp x23, x24, [x0, #0x30]",
        "stp x25, x26, [x0, #0x40]",
        "stp x27, x28, [x0, #0x50]",
        "stp x29, x30, [x0, #0x60]",
        "stp d8, d9, [x0, #0x70]",
        "stp d10, d11, [x0, #0x80]",
        "stp d12, d13, [x0, #0x90]",
        "stp d14, d15, [x0, #0xa0]",
        // Restore from new context (x1)
        "ldp x9, x10, [x1, #0x00]",
        "ldp x19, x20, [x1, #0x10]",
        "ldp x21, x22, [x1, #0x20]",
        "ldp x23, x24, [x1, #0x30]",
        "ldp x25, x26, [x1, #0x40]",
        "ldp x27, x28, [x1, #0x50]",
        "ldp x29, x30, [x1, #0x60]",
        "ldp d8, d9, [x1, #0x70]",
        "ldp d10, d11, [x1, #0x80]",
        "ldp d12, d13, [x1, #0x90]",
        "ldp d14, d15, [x1, #0xa0]",
        "mov sp, x9",
        "br x10",
        // Resume point for saved contexts
        "1:",
        "ret",
    );
}
