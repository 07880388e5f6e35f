//! Per-connection echo session.
//!
//! A session owns one connected stream and one fixed-capacity buffer. It
//! alternates strictly between a single read and the write-back of exactly
//! the bytes that read produced:
//!
//! ```text
//! Reading ──n > 0──▶ Writing ──all n bytes written──▶ Reading
//!    │                  │
//!    └─ EOF / error ─▶ Closed ◀─ error ─┘
//! ```
//!
//! The stream is dropped, and with it the socket, when `run` returns.

use crate::diagnostics::{Diagnostics, Notice};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default session buffer capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Largest accepted session buffer capacity.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next chunk from the peer.
    Reading,
    /// Echoing the last chunk back.
    Writing {
        /// Bytes of the buffer already written.
        written: usize,
    },
    /// Terminal state; the stream is released once `run` returns.
    Closed,
}

/// Why a session ended.
#[derive(Debug)]
pub enum Termination {
    /// The peer shut down its side (zero-length read).
    PeerShutdown,
    /// A read failed.
    ReadFailed(io::Error),
    /// A write failed.
    WriteFailed(io::Error),
}

/// Echo loop over one connection.
pub struct Session<S> {
    stream: S,
    peer: SocketAddr,
    buffer: BytesMut,
    capacity: usize,
    state: SessionState,
    diagnostics: Arc<dyn Diagnostics>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Take ownership of a connected stream. The session starts in `Reading`.
    ///
    /// The buffer is allocated on the first read, on the session's own task.
    pub fn new(
        stream: S,
        peer: SocketAddr,
        capacity: usize,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        Self {
            stream,
            peer,
            buffer: BytesMut::new(),
            capacity,
            state: SessionState::Reading,
            diagnostics,
        }
    }

    /// Current state; `Closed` once the connection has ended.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until the connection ends.
    pub async fn run(mut self) -> Termination {
        // Every step that closes the session breaks with its reason.
        loop {
            let step = if let SessionState::Writing { .. } = self.state {
                self.start_write().await
            } else {
                self.start_read().await
            };
            if let ControlFlow::Break(termination) = step {
                break termination;
            }
        }
    }

    /// Read up to `capacity` bytes, then hand the chunk to the write side.
    async fn start_read(&mut self) -> ControlFlow<Termination> {
        self.buffer.clear();
        self.buffer.resize(self.capacity, 0);

        match self.stream.read(&mut self.buffer[..]).await {
            Ok(0) => {
                self.buffer.clear();
                self.diagnostics
                    .notice(Notice::PeerShutdown { peer: self.peer });
                self.close();
                ControlFlow::Break(Termination::PeerShutdown)
            }
            Ok(n) => {
                self.buffer.truncate(n);
                self.diagnostics.notice(Notice::Read {
                    peer: self.peer,
                    len: n,
                });
                self.state = SessionState::Writing { written: 0 };
                ControlFlow::Continue(())
            }
            Err(error) => {
                self.diagnostics.notice(Notice::ReadFailed {
                    peer: self.peer,
                    error: &error,
                });
                self.close();
                ControlFlow::Break(Termination::ReadFailed(error))
            }
        }
    }

    /// Write the whole buffer back, continuing after partial writes.
    async fn start_write(&mut self) -> ControlFlow<Termination> {
        while let SessionState::Writing { written } = self.state {
            if written == self.buffer.len() {
                break;
            }

            match self.stream.write(&self.buffer[written..]).await {
                Ok(0) => {
                    return self.write_failed(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "peer accepted no bytes",
                    ))
                }
                Ok(n) => {
                    self.state = SessionState::Writing {
                        written: written + n,
                    }
                }
                Err(error) => return self.write_failed(error),
            }
        }

        self.diagnostics.notice(Notice::Wrote {
            peer: self.peer,
            len: self.buffer.len(),
        });
        self.state = SessionState::Reading;
        ControlFlow::Continue(())
    }

    fn write_failed(&mut self, error: io::Error) -> ControlFlow<Termination> {
        self.diagnostics.notice(Notice::WriteFailed {
            peer: self.peer,
            error: &error,
        });
        self.close();
        ControlFlow::Break(Termination::WriteFailed(error))
    }

    fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}
