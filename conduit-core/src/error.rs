//! Error types for conduit-core.
//!
//! Per the error taxonomy in SPEC_FULL.md §9: setup failures are raised
//! synchronously to the caller; everything that happens once a [`Channel`]
//! is live (would-block, peer-closed, unexpected I/O errors, host callback
//! faults) is funneled into a channel shutdown and reported only through
//! the [`AsyncLogger`](crate::logger::AsyncLogger) — it never becomes a
//! `Result::Err` that the host has to handle per read/write tick.
//!
//! [`Channel`]: crate::channel::Channel

use std::io;
use thiserror::Error;

/// Errors raised synchronously by setup and lifecycle operations:
/// address resolution, socket creation, bind, listen, non-blocking
/// configuration, and misuse after teardown.
#[derive(Error, Debug)]
pub enum SetupError {
    /// Name resolution or address parsing failed.
    #[error("address resolution failed: {0}")]
    Resolve(String),

    /// Socket creation, bind, or listen failed.
    #[error("bind failed: {0}")]
    Bind(#[source] io::Error),

    /// `connect()` failed with a non-recoverable error.
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    /// Setting a socket option (`TCP_NODELAY`, `SO_REUSEADDR`, ...) failed.
    #[error("failed to set socket option {option}: {source}")]
    SocketOption {
        option: &'static str,
        #[source]
        source: io::Error,
    },

    /// The endpoint was already active when `bind_and_listen`/`connect`
    /// was called again.
    #[error("endpoint is already active")]
    AlreadyActive,

    /// An operation was attempted on an unknown client descriptor.
    #[error("unknown client descriptor: {0}")]
    UnknownClient(std::os::unix::io::RawFd),

    /// An operation was attempted after the owning `Handler` was torn down.
    #[error("handler no longer active")]
    HandlerInactive,

    /// An operation was attempted on an endpoint that has been destroyed.
    #[error("endpoint no longer active")]
    EndpointInactive,
}

/// Result alias for setup/lifecycle operations.
pub type SetupResult<T> = std::result::Result<T, SetupError>;

/// A fault raised by [`AsyncLogger::fmt_throw_error`](crate::logger::AsyncLogger::fmt_throw_error).
///
/// This is the Rust analogue of the original library's
/// `fmtThrowError`, which logs at `Error` level and then throws with the
/// same text. Kept as a distinct type from [`SetupError`] because it
/// carries no structured cause, only the formatted message that was
/// already written to the log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct FaultError(pub String);
