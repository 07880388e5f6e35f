//! loopback-echo: an asynchronous TCP echo server.
//!
//! A [`Listener`] accepts connections on a loopback endpoint and hands each
//! one to a [`Session`], which reads a chunk, writes the same bytes back and
//! repeats until the peer goes away. Both run on an injected
//! [`ExecutionContext`] and report what they do to a [`Diagnostics`] sink.

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod listener;
pub mod session;

pub use context::ExecutionContext;
pub use diagnostics::{Diagnostics, Notice, TracingDiagnostics};
pub use listener::Listener;
pub use session::{
    Session, SessionState, Termination, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE,
};
