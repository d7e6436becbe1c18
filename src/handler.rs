//! The contract between the reactor and per-handle logic.

use std::io;
use std::sync::Arc;

use mio::{Registry, Token};

use crate::reactor::Reactor;

/// Per-handle event callbacks, implemented by acceptors and connections.
///
/// A handler owns exactly one OS handle and is identified by the [`Token`]
/// derived from it. The reactor keeps handlers in its registry as
/// `Arc<dyn EventHandler>`; the `Arc<Self>` receivers let a handler clone
/// itself into closures that must keep it alive across a worker-thread hop,
/// so the handler cannot be destroyed before an in-flight continuation that
/// still references it has run.
///
/// Readiness is edge-triggered: `on_readable` is delivered once per
/// transition to ready, so implementations must drain their handle until it
/// reports [`io::ErrorKind::WouldBlock`] or events will be lost.
pub trait EventHandler: Send + Sync {
    /// The token under which this handler is registered, derived from its
    /// handle's current fd value.
    fn token(&self) -> Token;

    /// Subscribes the handler's I/O source for read readiness. Called by
    /// [`Reactor::register`](crate::Reactor::register).
    fn register_source(&self, registry: &Registry) -> io::Result<()>;

    /// Unsubscribes the handler's I/O source and shuts it down. Called by
    /// [`Reactor::unregister`](crate::Reactor::unregister).
    fn deregister_source(&self, registry: &Registry);

    /// The handle became readable.
    fn on_readable(self: Arc<Self>, reactor: &mut Reactor);

    /// The handle became writable. Never delivered by the current reactor,
    /// which does not subscribe write interest.
    fn on_writable(self: Arc<Self>, _reactor: &mut Reactor) {}
}
