//! Host-side invocation of the capwatch worker binary.
//!
//! A host application (tray app, scheduler daemon, test harness) does
//! not link the scraping core; it spawns the worker as a short-lived
//! subprocess and interprets its exit code and single-object JSON
//! envelopes. This crate owns that boundary: argv construction, hard
//! timeouts with guaranteed child termination, and envelope decoding
//! with a strict separation between "the worker failed" and "the
//! worker violated the protocol".

pub mod invoke;
pub mod process;

pub use invoke::{Invocation, InvokeError, Invoker, WorkerCommand};
pub use process::pid_is_alive;
