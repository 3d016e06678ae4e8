//! Low-level socket option helpers shared by server and client endpoints.
//!
//! These wrap `socket2::Socket` calls applied to a `std::net` socket via its
//! raw file descriptor, the same technique the teacher crate used for
//! `TCP_NODELAY` — extended here to the full set of options
//! [`EndpointConfig`](crate::config::EndpointConfig) exposes.
//!
//! # Safety
//!
//! This module uses unsafe code to view a `std::net` socket as a
//! `socket2::Socket` without taking ownership of its file descriptor. The
//! unsafe operations are encapsulated and safe to call from the public API.

use crate::error::SetupError;
use std::io;
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, FromRawFd};

fn borrow(stream: &TcpStream) -> socket2::Socket {
    // SAFETY: `from_raw_fd` normally takes ownership of the descriptor;
    // `std::mem::forget`ing the wrapper below ensures we never close it out
    // from under the `TcpStream` we borrowed it from.
    unsafe { socket2::Socket::from_raw_fd(stream.as_raw_fd()) }
}

fn apply<F>(stream: &TcpStream, option: &'static str, f: F) -> Result<(), SetupError>
where
    F: FnOnce(&socket2::Socket) -> io::Result<()>,
{
    let sock = borrow(stream);
    let result = f(&sock).map_err(|source| SetupError::SocketOption { option, source });
    std::mem::forget(sock);
    result
}

/// Disable Nagle's algorithm for lower per-message latency.
pub fn set_no_delay(stream: &TcpStream, enabled: bool) -> Result<(), SetupError> {
    apply(stream, "TCP_NODELAY", |sock| sock.set_nodelay(enabled))
}

/// Enable periodic keepalive probes on an idle connection.
pub fn set_keep_alive(stream: &TcpStream, enabled: bool) -> Result<(), SetupError> {
    let keepalive = socket2::TcpKeepalive::new();
    apply(stream, "SO_KEEPALIVE", |sock| {
        if enabled {
            sock.set_tcp_keepalive(&keepalive)
        } else {
            sock.set_keepalive(false)
        }
    })
}

/// Allow a bound listening socket's address to be reused immediately after
/// close, without waiting out `TIME_WAIT`.
pub fn set_reuse_addr(listener: &socket2::Socket, enabled: bool) -> Result<(), SetupError> {
    listener
        .set_reuse_address(enabled)
        .map_err(|source| SetupError::SocketOption {
            option: "SO_REUSEADDR",
            source,
        })
}

/// Allow multiple listening sockets to bind the same port, for
/// process-level load balancing.
#[cfg(unix)]
pub fn set_reuse_port(listener: &socket2::Socket, enabled: bool) -> Result<(), SetupError> {
    listener
        .set_reuse_port(enabled)
        .map_err(|source| SetupError::SocketOption {
            option: "SO_REUSEPORT",
            source,
        })
}
