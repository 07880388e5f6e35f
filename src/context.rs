//! Execution context glue.
//!
//! The listener and every session run as tasks on a tokio runtime that the
//! caller owns. `ExecutionContext` is the handle they are given: it binds
//! listening sockets against the runtime's reactor and spawns tasks onto it.
//! Nothing here assumes a particular runtime flavor.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Listen backlog handed to the kernel.
const LISTEN_BACKLOG: i32 = 1024;

/// Cloneable handle to the runtime that drives listeners and sessions.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    handle: Handle,
}

impl ExecutionContext {
    /// Wrap an existing runtime handle.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Context for the runtime the caller is currently running on.
    pub fn current() -> io::Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    /// Create a listening socket bound to a loopback endpoint.
    pub fn bind(&self, addr: SocketAddr) -> io::Result<TcpListener> {
        if !addr.ip().is_loopback() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to bind non-loopback address {addr}"),
            ));
        }

        let listener = create_listener(addr)?;

        // Registration with the reactor needs the runtime entered.
        let _guard = self.handle.enter();
        TcpListener::from_std(listener)
    }

    /// Schedule a task on the runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
