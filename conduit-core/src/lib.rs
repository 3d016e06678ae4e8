//! Conduit Core
//!
//! Thread-based TCP socket kernel: no async runtime, no event loop —
//! plain OS threads ticking over non-blocking sockets.
//!
//! - Owned byte buffers passed through queues and callbacks (`message`)
//! - Segmented byte FIFO used for partial-write bookkeeping (`stream_queue`)
//! - Off-thread log pipeline (`logger`)
//! - Identity-addressable multi-subscriber callbacks (`event`)
//! - A single live TCP connection (`channel`)
//! - Server/client connection ownership and worker-pool scheduling (`endpoint`)
//! - Endpoint registry and shared work-queue thread pool (`handler`)
//! - Error types (`error`)
//! - Endpoint configuration (`config`)
//! - Socket option helpers (`tcp`)
//!
//! # Safety
//!
//! This crate contains a small, documented amount of unsafe code: viewing a
//! `std::net::TcpStream` as a `socket2::Socket` to set options without
//! taking ownership of the descriptor (`tcp`), and dereferencing a raw
//! instance pointer inside a bound-method callback whose lifetime contract
//! the caller must uphold (`event`).
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::needless_pass_by_ref_mut)]
#![allow(clippy::match_same_arms)]

pub mod channel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod handler;
pub mod logger;
pub mod message;
pub mod stream_queue;
pub mod tcp;

/// A small prelude to make downstream crates ergonomic.
pub mod prelude {
    pub use crate::channel::{Channel, ChannelState, ListenEvent};
    pub use crate::config::EndpointConfig;
    pub use crate::endpoint::{ClientEndpoint, ConnectEvent, ServerEndpoint};
    pub use crate::error::{FaultError, SetupError, SetupResult};
    pub use crate::event::{CallbackId, EventCallback, UnorderedEventCallback};
    pub use crate::handler::{EndpointId, Handler};
    pub use crate::logger::{AsyncLogger, LogLevel, LogProducer, LogRecord};
    pub use crate::message::Message;
}
