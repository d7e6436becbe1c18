//! A single-threaded, event-driven I/O dispatcher with a cross-thread worker
//! pool.
//!
//! One reactor thread multiplexes readiness events from many connected
//! endpoints; blocking or CPU-bound work is fanned out to a fixed set of
//! background workers and folded back onto the reactor thread through a
//! completion inbox and a kernel wake-up channel. The crate consists of:
//!
//! - [`reactor`]: The readiness loop, handler registry, timer wheel and
//!   completion inbox
//! - [`handler`]: The polymorphic contract between the reactor and per-handle
//!   logic
//! - [`net`]: The listening acceptor and the reference echo connection
//! - [`worker`]: The background worker pool and its blocking task queue
//! - [`task`]: The work item passed to the pool
//! - [`timer`]: Deadline-ordered timers

pub mod handler;
pub mod net;
pub mod reactor;
pub mod task;
pub mod timer;
pub mod worker;

pub use handler::EventHandler;
pub use net::{AcceptorHandler, EchoConnection};
pub use reactor::{Reactor, MAX_EVENTS};
pub use task::Task;
pub use timer::TimerId;
pub use worker::WorkerPool;
