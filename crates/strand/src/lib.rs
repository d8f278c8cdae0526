//! # strand
//!
//! Stackful cooperative I/O runtime.
//!
//! User code runs in **frames**: lightweight stackful coroutines whose
//! code reads as straight-line blocking I/O. Under the hood every I/O
//! method submits a job to a pluggable AIO backend (busy-loop, epoll,
//! or io_uring), parks the frame, and resumes it when the completion
//! arrives.
//!
//! ## Quick start
//!
//! ```ignore
//! use strand::{Runtime, RuntimeOptions, Socket, Endpoint};
//!
//! fn serve(rt: &strand::Runtime, port: u16) {
//!     let listener = Socket::init(&Endpoint::tcp("0.0.0.0", port)).unwrap();
//!     listener.bind().unwrap();
//!     listener.listen(128).unwrap();
//!     while !rt.is_stopping() {
//!         let conn = listener.accept(rt).unwrap();
//!         rt.spawn(16 * 1024, move |rt| {
//!             let mut buf = [0u8; 512];
//!             let n = conn.recv(rt, &mut buf).unwrap();
//!             conn.send(rt, &buf[..n]).unwrap();
//!             conn.close(rt).unwrap();
//!         })
//!         .unwrap();
//!     }
//! }
//!
//! fn main() {
//!     let rt = Runtime::new(RuntimeOptions::from_env()).unwrap();
//!     rt.entry(8080u16, serve).unwrap();
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                     User frames                        │
//! │        Socket / File / Timer, straight-line I/O        │
//! └────────────────────────────────────────────────────────┘
//!                            │ io_await / yield
//!                            ▼
//! ┌────────────────────────────────────────────────────────┐
//! │              Scheduler + task table                    │
//! │   runnable FIFO → resume → submit → reap → dispatch    │
//! └────────────────────────────────────────────────────────┘
//!                            │ queue_* / submit / reap
//!                            ▼
//! ┌────────────────────────────────────────────────────────┐
//! │                    AIO backend                         │
//! │          busy-loop │ epoll │ io_uring                  │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Scheduling is single-threaded cooperative per runtime instance; the
//! `auto` threading mode launches one independent runtime per pool
//! thread, and instances share nothing.

pub mod arch;
pub mod config;
pub mod frame;
pub mod fs;
pub mod net;
pub mod runtime;
pub mod stack;
pub mod time;
pub mod tls;

// Re-exports
pub use config::{Pooling, RuntimeOptions, Threading};
pub use fs::File;
pub use net::{Endpoint, Socket, SocketKind};
pub use runtime::Runtime;
pub use time::Timer;

pub use strand_aio::BackendKind;
pub use strand_core::{Caps, Error, Result};

#[cfg(not(unix))]
compile_error!("strand supports Unix targets only");
