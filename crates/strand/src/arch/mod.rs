//! Architecture-specific context switching
//!
//! Each architecture module provides:
//! - [`Context`]: the callee-saved register set a suspended frame keeps
//! - `init_context`: set up a fresh frame so the first switch lands in
//!   the entry trampoline
//! - `switch_context`: save into one context, restore from another
//!
//! Only callee-saved state is preserved across a voluntary switch;
//! everything else is dead at a call boundary by the platform ABI.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use x86_64::{Context, init_context, switch_context};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use aarch64::{Context, init_context, switch_context};
    } else {
        compile_error!("unsupported architecture: strand needs x86_64 or aarch64");
    }
}
