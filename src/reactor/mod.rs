//! Event-driven I/O dispatcher.
//!
//! The reactor blocks on the OS readiness primitive, dispatches readiness to
//! registered handlers, fires due timers, and drains continuations posted by
//! worker threads.

pub mod reactor;
pub use reactor::{Reactor, MAX_EVENTS};
