//! x86_64 context switching
//!
//! Inline naked-function assembly, stable since Rust 1.88.

use std::arch::naked_asm;

/// Callee-saved register state of a suspended frame.
///
/// Field order is load-bearing: the assembly below addresses these by
/// fixed offset.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub rsp: u64, // 0x00
    pub rip: u64, // 0x08
    pub rbx: u64, // 0x10
    pub rbp: u64, // 0x18
    pub r12: u64, // 0x20
    pub r13: u64, // 0x28
    pub r14: u64, // 0x30
    pub r15: u64, // 0x38
}

impl Context {
    pub const fn zeroed() -> Self {
        Self {
            rsp: 0,
            rip: 0,
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
        }
    }
}

/// Initialize a fresh frame's context.
///
/// The first switch into this context jumps to the entry trampoline
/// with `entry_fn` in r12 and `entry_arg` in r13.
///
/// # Safety
///
/// `ctx` must point to valid Context memory. `stack_top` must be the
/// high end of a live stack mapping.
pub unsafe fn init_context(ctx: *mut Context, stack_top: *mut u8, entry_fn: usize, entry_arg: usize) {
    // 16-byte aligned at the trampoline, so the `call` inside it leaves
    // rsp ≡ 8 (mod 16) at the entry function, per the System V ABI.
    let sp = (stack_top as usize) & !0xF;

    let ctx = &mut *ctx;
    ctx.rsp = sp as u64;
    ctx.rip = entry_trampoline as usize as u64;
    ctx.rbx = 0;
    ctx.rbp = 0;
    ctx.r12 = entry_fn as u64;
    ctx.r13 = entry_arg as u64;
    ctx.r14 = 0;
    ctx.r15 = 0;
}

/// First instructions a fresh frame executes: call entry_fn(entry_arg).
///
/// The entry function diverts back to the scheduler when the frame
/// finishes, so falling through is a bug trap.
#[unsafe(naked)]
unsafe extern "C" fn entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "ud2",
    );
}

/// Save callee-saved registers into `save`, restore from `load`.
///
/// A context written by this function resumes at the `1:` label, which
/// returns to the original caller of `switch_context` via the return
/// address still sitting on the restored stack.
///
/// # Safety
///
/// Both pointers must reference valid Context memory; `load` must hold
/// either a context written by this function or one prepared by
/// `init_context`.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_save: *mut Context, _load: *const Context) {
    naked_asm!(
        // Save into old context (rdi)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        // Restore from new context (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        // Resume point for saved contexts
        "1:",
        "ret",
    );
}
