//! TCP handlers for the reactor: the listening acceptor and the reference
//! newline-framed echo connection.
//!
//! Both types own their socket behind a mutex so a handler can be shared
//! between the reactor's registry and continuations hopping back from worker
//! threads. Only the reactor thread ever takes these locks, so they are
//! uncontended in practice.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex};

use metrics::counter;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::handler::EventHandler;
use crate::reactor::Reactor;

/// Size of the stack buffer each receive drains into.
const RECV_CHUNK: usize = 4096;

/// Listen backlog for the acceptor socket.
const LISTEN_BACKLOG: i32 = 128;

/// Prefix prepended to every echoed request.
const RESPONSE_PREFIX: &[u8] = b"Async ";

/// Accepts connections on a listening socket and installs an
/// [`EchoConnection`] for each one.
pub struct AcceptorHandler {
    listener: Mutex<TcpListener>,
    token: Token,
}

impl AcceptorHandler {
    /// Binds a non-blocking listener on `addr` with `SO_REUSEADDR` and a
    /// backlog of [`LISTEN_BACKLOG`] entries.
    ///
    /// The socket is assembled by hand because mio's own `bind` hardcodes its
    /// backlog.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;

        let listener = TcpListener::from_std(socket.into());
        let token = Token(listener.as_raw_fd() as usize);
        log::info!("listening on {}", listener.local_addr()?);
        Ok(Self {
            listener: Mutex::new(listener),
            token,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.lock().unwrap().local_addr()
    }
}

impl EventHandler for AcceptorHandler {
    fn token(&self) -> Token {
        self.token
    }

    fn register_source(&self, registry: &Registry) -> io::Result<()> {
        let mut listener = self.listener.lock().unwrap();
        registry.register(&mut *listener, self.token, Interest::READABLE)
    }

    fn deregister_source(&self, registry: &Registry) {
        let mut listener = self.listener.lock().unwrap();
        if let Err(err) = registry.deregister(&mut *listener) {
            log::debug!("listener deregister failed: {err}");
        }
    }

    /// Accepts until the listener reports `WouldBlock` (readiness is
    /// edge-triggered, so a single notification may cover several pending
    /// connections). Accepted sockets come back non-blocking already.
    fn on_readable(self: Arc<Self>, reactor: &mut Reactor) {
        loop {
            let accepted = self.listener.lock().unwrap().accept();
            match accepted {
                Ok((stream, peer)) => {
                    counter!("reflow_connections_accepted_total").increment(1);
                    log::debug!("accepted connection from {peer}");
                    let connection = Arc::new(EchoConnection::new(stream));
                    if let Err(err) = reactor.register(connection) {
                        log::warn!("dropping connection from {peer}: {err}");
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    // Transient resource exhaustion (EMFILE and friends) ends
                    // this batch; the acceptor itself stays registered.
                    log::error!("accept failed: {err}");
                    break;
                }
            }
        }
    }
}

struct ConnectionState {
    stream: TcpStream,
    /// Bytes received since the last dispatched request.
    buffer: Vec<u8>,
    bytes_read: u64,
}

/// The reference connection handler: reads newline-terminated requests and
/// echoes each one back as `"Async " + request`, with the response bytes
/// produced on a worker thread.
///
/// The response write happens in a task continuation that holds a strong
/// reference to this handler, so the handler (and its socket) outlive any
/// in-flight background work. If the connection was unregistered while the
/// task was in flight, the write fails on the shut-down socket and the error
/// is swallowed.
pub struct EchoConnection {
    state: Mutex<ConnectionState>,
    token: Token,
}

impl EchoConnection {
    pub fn new(stream: TcpStream) -> Self {
        let token = Token(stream.as_raw_fd() as usize);
        Self {
            state: Mutex::new(ConnectionState {
                stream,
                buffer: Vec::new(),
                bytes_read: 0,
            }),
            token,
        }
    }

    fn send_response(&self, response: &[u8]) {
        let state = self.state.lock().unwrap();
        if let Err(err) = (&state.stream).write_all(response) {
            log::debug!(
                "connection {:?}: dropping {}-byte response: {err}",
                self.token,
                response.len()
            );
        }
    }
}

impl EventHandler for EchoConnection {
    fn token(&self) -> Token {
        self.token
    }

    fn register_source(&self, registry: &Registry) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        registry.register(&mut state.stream, self.token, Interest::READABLE)
    }

    fn deregister_source(&self, registry: &Registry) {
        let mut state = self.state.lock().unwrap();
        if let Err(err) = registry.deregister(&mut state.stream) {
            log::debug!("connection {:?}: deregister failed: {err}", self.token);
        }
        // The fd itself closes when the last Arc reference drops; shutting
        // down here makes writes from stale continuations fail immediately.
        let _ = state.stream.shutdown(Shutdown::Both);
    }

    /// Drains the socket until `WouldBlock`. Each chunk containing a newline
    /// dispatches the accumulated request to the worker pool and clears the
    /// accumulation buffer, so every request is answered with exactly its own
    /// bytes.
    fn on_readable(self: Arc<Self>, reactor: &mut Reactor) {
        let mut state = self.state.lock().unwrap();
        let mut chunk = [0u8; RECV_CHUNK];
        loop {
            match (&state.stream).read(&mut chunk) {
                Ok(0) => {
                    log::debug!(
                        "connection {:?}: peer closed after {} bytes",
                        self.token,
                        state.bytes_read
                    );
                    drop(state);
                    reactor.unregister(self.token);
                    return;
                }
                Ok(n) => {
                    state.bytes_read += n as u64;
                    state.buffer.extend_from_slice(&chunk[..n]);
                    if chunk[..n].contains(&b'\n') {
                        let request = std::mem::take(&mut state.buffer);
                        let this = Arc::clone(&self);
                        reactor.submit_task(
                            move || {
                                let mut response =
                                    Vec::with_capacity(RESPONSE_PREFIX.len() + request.len());
                                response.extend_from_slice(RESPONSE_PREFIX);
                                response.extend_from_slice(&request);
                                response
                            },
                            move |_reactor, response: Vec<u8>| this.send_response(&response),
                        );
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::warn!("connection {:?}: recv failed: {err}", self.token);
                    drop(state);
                    reactor.unregister(self.token);
                    return;
                }
            }
        }
    }
}
