//! # Conduit
//!
//! A thread-based TCP socket library: no async runtime, no event loop —
//! a small pool of OS threads ticks every live connection's non-blocking
//! socket, dispatching reads to your callbacks and draining queued writes.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use conduit::{EndpointConfig, Handler, Message};
//!
//! let handler = Handler::new(None);
//! let (_id, server) = handler.create_server_endpoint(EndpointConfig::default()).unwrap();
//!
//! server.on_message(|channel, msg| {
//!     channel.queue_write(msg.clone());
//! });
//!
//! server.bind_and_listen(9000).unwrap();
//! # let _ = handler;
//! ```
//!
//! ## Architecture
//!
//! - [`Message`] — an owned, deep-copyable byte buffer
//! - [`Channel`] — one live TCP connection, ticked by worker threads
//! - [`ServerEndpoint`] / [`ClientEndpoint`] — own a connection's accept
//!   loop or outbound connect, plus the channel(s) it produces
//! - [`Handler`] — owns the shared log pipeline and work-queue thread pool,
//!   and the registry of endpoints it created
//! - [`AsyncLogger`] — off-thread structured log records, fanned out to
//!   subscribers
//!
//! ## Safety
//!
//! `unsafe` code is isolated to `conduit-core::tcp` (borrowing a raw
//! socket descriptor to apply options) and `conduit-core::event` (the
//! documented bound-method callback lifetime contract). Everything else in
//! this crate and its core are safe Rust.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

pub use conduit_core::channel::{Channel, ChannelState, ListenEvent};
pub use conduit_core::config::EndpointConfig;
pub use conduit_core::endpoint::{ClientEndpoint, ConnectEvent, ServerEndpoint};
pub use conduit_core::error::{FaultError, SetupError, SetupResult};
pub use conduit_core::event::{CallbackId, EventCallback, UnorderedEventCallback};
pub use conduit_core::handler::{EndpointId, Handler};
pub use conduit_core::logger::{AsyncLogger, LogLevel, LogProducer, LogRecord};
pub use conduit_core::message::Message;

/// Development helper: initialize tracing subscriber when `RUST_LOG` is set.
pub mod dev_tracing;
