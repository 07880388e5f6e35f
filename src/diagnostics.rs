//! Diagnostics sink.
//!
//! Listeners and sessions never log directly. They report each significant
//! transition as a [`Notice`] to the sink they were constructed with, one
//! notice per transition. [`TracingDiagnostics`] forwards notices to
//! `tracing`, which is what the server binary installs.

use std::io;
use std::net::SocketAddr;
use tracing::{debug, info, trace};

/// A transition worth reporting.
#[derive(Debug)]
pub enum Notice<'a> {
    /// The listener bound its socket and is about to accept.
    Listening { addr: SocketAddr },
    /// An accept completed with a new connection.
    Accepted { peer: SocketAddr },
    /// An accept failed; the accept loop stops after this notice.
    AcceptFailed { error: &'a io::Error },
    /// A read completed with `len > 0` bytes.
    Read { peer: SocketAddr, len: usize },
    /// A read returned zero bytes.
    PeerShutdown { peer: SocketAddr },
    /// A read failed.
    ReadFailed {
        peer: SocketAddr,
        error: &'a io::Error,
    },
    /// All `len` bytes of the last read were written back.
    Wrote { peer: SocketAddr, len: usize },
    /// A write failed.
    WriteFailed {
        peer: SocketAddr,
        error: &'a io::Error,
    },
}

/// Receiver of notices. Shared by every task of a server.
pub trait Diagnostics: Send + Sync + 'static {
    fn notice(&self, notice: Notice<'_>);
}

/// Forwards notices to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn notice(&self, notice: Notice<'_>) {
        match notice {
            Notice::Listening { addr } => info!(address = %addr, "Server listening"),
            Notice::Accepted { peer } => debug!(peer = %peer, "New connection"),
            Notice::AcceptFailed { error } => {
                info!(error = %error, "Accept failed, no longer accepting connections")
            }
            Notice::Read { peer, len } => trace!(peer = %peer, len, "Read complete"),
            Notice::PeerShutdown { peer } => debug!(peer = %peer, "Connection closed by client"),
            Notice::ReadFailed { peer, error } => {
                debug!(peer = %peer, error = %error, "Read failed, closing connection")
            }
            Notice::Wrote { peer, len } => trace!(peer = %peer, len, "Write complete"),
            Notice::WriteFailed { peer, error } => {
                debug!(peer = %peer, error = %error, "Write failed, closing connection")
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use super::{Diagnostics, Notice};
    use std::io;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Owned copy of a [`Notice`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Recorded {
        Listening(SocketAddr),
        Accepted(SocketAddr),
        AcceptFailed(io::ErrorKind),
        Read(SocketAddr, usize),
        PeerShutdown(SocketAddr),
        ReadFailed(SocketAddr, io::ErrorKind),
        Wrote(SocketAddr, usize),
        WriteFailed(SocketAddr, io::ErrorKind),
    }

    impl Recorded {
        fn ends_session(&self) -> bool {
            matches!(
                self,
                Recorded::PeerShutdown(_) | Recorded::ReadFailed(..) | Recorded::WriteFailed(..)
            )
        }
    }

    /// Sink that keeps every notice for later inspection.
    #[derive(Debug, Default)]
    pub struct RecordingDiagnostics {
        notices: Mutex<Vec<Recorded>>,
    }

    impl RecordingDiagnostics {
        pub fn notices(&self) -> Vec<Recorded> {
            self.notices.lock().unwrap().clone()
        }

        /// Sessions accepted but not yet terminated.
        pub fn active_sessions(&self) -> usize {
            let notices = self.notices.lock().unwrap();
            let accepted = notices
                .iter()
                .filter(|n| matches!(n, Recorded::Accepted(_)))
                .count();
            let ended = notices.iter().filter(|n| n.ends_session()).count();
            accepted.saturating_sub(ended)
        }

        pub fn accepted(&self) -> usize {
            self.notices
                .lock()
                .unwrap()
                .iter()
                .filter(|n| matches!(n, Recorded::Accepted(_)))
                .count()
        }

        /// Poll until `active_sessions() == expected`, panicking after five seconds.
        pub async fn wait_for_active(&self, expected: usize) {
            let wait = async {
                while self.active_sessions() != expected {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            };
            tokio::time::timeout(Duration::from_secs(5), wait)
                .await
                .unwrap_or_else(|_| {
                    panic!(
                        "expected {expected} active sessions, have {}",
                        self.active_sessions()
                    )
                });
        }
    }

    impl Diagnostics for RecordingDiagnostics {
        fn notice(&self, notice: Notice<'_>) {
            let recorded = match notice {
                Notice::Listening { addr } => Recorded::Listening(addr),
                Notice::Accepted { peer } => Recorded::Accepted(peer),
                Notice::AcceptFailed { error } => Recorded::AcceptFailed(error.kind()),
                Notice::Read { peer, len } => Recorded::Read(peer, len),
                Notice::PeerShutdown { peer } => Recorded::PeerShutdown(peer),
                Notice::ReadFailed { peer, error } => Recorded::ReadFailed(peer, error.kind()),
                Notice::Wrote { peer, len } => Recorded::Wrote(peer, len),
                Notice::WriteFailed { peer, error } => Recorded::WriteFailed(peer, error.kind()),
            };
            self.notices.lock().unwrap().push(recorded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::recording::{Recorded, RecordingDiagnostics};
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_active_session_count() {
        let sink = RecordingDiagnostics::default();
        let a: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:1001".parse().unwrap();
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);

        sink.notice(Notice::Accepted { peer: a });
        sink.notice(Notice::Accepted { peer: b });
        assert_eq!(sink.active_sessions(), 2);

        sink.notice(Notice::Read { peer: a, len: 3 });
        sink.notice(Notice::PeerShutdown { peer: a });
        sink.notice(Notice::ReadFailed {
            peer: b,
            error: &reset,
        });
        assert_eq!(sink.active_sessions(), 0);
        assert_eq!(sink.accepted(), 2);
        assert_eq!(sink.notices()[3], Recorded::PeerShutdown(a));
    }

    /// Captures formatted log lines for assertions.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn line_containing(&self, message: &str) -> String {
            let output = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
            output
                .lines()
                .find(|line| line.contains(message))
                .unwrap_or_else(|| panic!("no line with {message:?} in:\n{output}"))
                .to_string()
        }
    }

    #[test]
    fn test_tracing_sink_levels_and_fields() {
        let peer: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        let error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone");
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .without_time()
            .with_target(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let sink = TracingDiagnostics;
            sink.notice(Notice::Listening { addr: peer });
            sink.notice(Notice::Accepted { peer });
            sink.notice(Notice::Read { peer, len: 7 });
            sink.notice(Notice::Wrote { peer, len: 7 });
            sink.notice(Notice::WriteFailed { peer, error: &error });
            sink.notice(Notice::AcceptFailed { error: &error });
        });

        let line = captured.line_containing("Server listening");
        assert!(line.contains("INFO") && line.contains("address=127.0.0.1:1000"));

        let line = captured.line_containing("New connection");
        assert!(line.contains("DEBUG") && line.contains("peer=127.0.0.1:1000"));

        let line = captured.line_containing("Read complete");
        assert!(line.contains("TRACE") && line.contains("len=7"));

        let line = captured.line_containing("Write complete");
        assert!(line.contains("TRACE") && line.contains("len=7"));

        let line = captured.line_containing("Write failed");
        assert!(line.contains("DEBUG") && line.contains("error=pipe gone"));

        let line = captured.line_containing("Accept failed");
        assert!(line.contains("INFO") && line.contains("error=pipe gone"));
    }
}
