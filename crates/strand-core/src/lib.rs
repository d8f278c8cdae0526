//! # strand-core
//!
//! Leaf types shared by the strand runtime and its AIO backends:
//!
//! - Task identifiers ([`TaskId`])
//! - The error taxonomy ([`Error`]) and errno classification
//! - AIO job and completion records ([`Job`], [`Completion`])
//! - The backend capability bitset ([`Caps`])
//! - The SPSC submission ring ([`SpscRing`])
//! - Environment-variable configuration helpers

pub mod caps;
pub mod completion;
pub mod env;
pub mod error;
pub mod id;
pub mod job;
pub mod ring;

// Re-exports
pub use caps::Caps;
pub use completion::{Completion, CompletionResult};
pub use error::{Error, Result};
pub use id::TaskId;
pub use job::{Job, Op, SockAddr};
pub use ring::{RingFull, SpscRing};
