//! Accept loop.
//!
//! A [`Listener`] owns the listening socket through a spawned accept task.
//! The task keeps exactly one accept outstanding; each accepted connection
//! is moved into a new [`Session`] running on its own task, and the next
//! accept is issued right away. Any accept error, including the
//! cancellation produced by [`Listener::close`], ends the loop.

use crate::context::ExecutionContext;
use crate::diagnostics::{Diagnostics, Notice};
use crate::session::{Session, MAX_BUFFER_SIZE};
use std::io;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a running accept loop.
///
/// Dropping the handle closes the listener. Sessions that were already
/// accepted keep running.
pub struct Listener {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<io::Error>>,
}

impl Listener {
    /// Bind `addr` and start accepting connections on `context`.
    ///
    /// Every accepted connection gets a session with a `buffer_size` byte
    /// buffer, which must hold between 1 and [`MAX_BUFFER_SIZE`] bytes.
    /// Notices from the listener and its sessions go to `diagnostics`.
    pub fn start(
        context: &ExecutionContext,
        addr: SocketAddr,
        buffer_size: usize,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> io::Result<Self> {
        if buffer_size == 0 || buffer_size > MAX_BUFFER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("session buffer size {buffer_size} out of range"),
            ));
        }

        let listener = context.bind(addr)?;
        let local_addr = listener.local_addr()?;
        diagnostics.notice(Notice::Listening { addr: local_addr });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_loop = AcceptLoop {
            listener,
            context: context.clone(),
            buffer_size,
            diagnostics,
            shutdown: shutdown_rx,
        };
        let task = context.spawn(accept_loop.run());

        Ok(Self {
            local_addr,
            shutdown,
            task: Some(task),
        })
    }

    /// Address the listening socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cancel the outstanding accept. Idempotent.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for the accept loop to end and return the error that ended it.
    ///
    /// Once this returns the listening socket has been released.
    pub async fn stopped(mut self) -> io::Error {
        match self.task.take() {
            Some(task) => task
                .await
                .unwrap_or_else(|e| io::Error::new(io::ErrorKind::Other, e)),
            None => closed_error(),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}

/// State owned by the accept task.
struct AcceptLoop {
    listener: TcpListener,
    context: ExecutionContext,
    buffer_size: usize,
    diagnostics: Arc<dyn Diagnostics>,
    shutdown: watch::Receiver<bool>,
}

impl AcceptLoop {
    async fn run(mut self) -> io::Error {
        loop {
            let result = tokio::select! {
                result = self.listener.accept() => result,
                // A dropped sender means the handle is gone, which also closes.
                _ = self.shutdown.changed() => Err(closed_error()),
            };

            if let ControlFlow::Break(error) = self.on_accept_complete(result) {
                // Returning drops `self.listener`, releasing the socket.
                return error;
            }
        }
    }

    fn on_accept_complete(
        &self,
        result: io::Result<(TcpStream, SocketAddr)>,
    ) -> ControlFlow<io::Error> {
        match result {
            Ok((stream, peer)) => {
                self.diagnostics.notice(Notice::Accepted { peer });
                let session = Session::new(
                    stream,
                    peer,
                    self.buffer_size,
                    Arc::clone(&self.diagnostics),
                );
                self.context.spawn(session.run());
                ControlFlow::Continue(())
            }
            Err(error) => {
                self.diagnostics
                    .notice(Notice::AcceptFailed { error: &error });
                ControlFlow::Break(error)
            }
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "listener closed")
}
