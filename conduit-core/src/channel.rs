//! A single live TCP connection (C5): one socket, one inbound dispatch
//! path, one outbound queue.
//!
//! `Channel` owns no threads. Per spec.md §5, I/O runs as ticks driven by
//! an [`Endpoint`](crate::endpoint::Endpoint)'s worker-pool threads, each
//! of which calls [`read_data`](Channel::read_data) or
//! [`handle_write_queue`](Channel::handle_write_queue) and moves on rather
//! than blocking. Two `parking_lot::Mutex`es gate each direction: a worker
//! that can't acquire a channel's claim (because another worker already
//! holds it) simply skips that channel this tick, which is how one
//! channel's I/O is kept to at most one thread at a time without a
//! dedicated thread per channel.
//!
//! Grounded on the original library's per-socket `readThreadLoop`/
//! `writeThreadLoop` pair (`Socket.cpp`): same split between inbound
//! dispatch and outbound draining, reimplemented as non-blocking ticks
//! instead of blocking threads.

use crate::event::EventCallback;
use crate::logger::{LogLevel, LogProducer};
use crate::message::Message;
use crate::stream_queue::StreamQueue;
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use tracing::trace;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const STATE_ACTIVE: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_RECLAIMED: u8 = 2;

/// Lifecycle state of a [`Channel`]. Transitions only move forward:
/// `Active -> Closing -> Reclaimed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Active,
    Closing,
    Reclaimed,
}

impl From<u8> for ChannelState {
    fn from(raw: u8) -> Self {
        match raw {
            STATE_ACTIVE => Self::Active,
            STATE_CLOSING => Self::Closing,
            _ => Self::Reclaimed,
        }
    }
}

/// One dispatched inbound read: the channel it arrived on and the bytes
/// received in a single `recv`. Delivered once per successful read, never
/// batched, per the canonical listen-callback signature.
#[derive(Clone)]
pub struct ListenEvent {
    pub channel: Arc<Channel>,
    pub message: Message,
}

pub struct Channel {
    client_descriptor: RawFd,
    stream: TcpStream,
    state: AtomicU8,
    read_claim: Mutex<()>,
    write_claim: Mutex<()>,
    outbound_tx: flume::Sender<Message>,
    outbound_rx: flume::Receiver<Message>,
    pending_write: Mutex<StreamQueue>,
    last_activity: Mutex<Instant>,
    buffer_size: usize,
    listen_callback: Arc<EventCallback<ListenEvent>>,
}

impl Channel {
    /// Wrap an already-connected stream as a new, active channel.
    ///
    /// `buffer_size` bounds the size of a single `recv`/`send` call, not
    /// the total amount of data a channel may hold — outbound data that
    /// doesn't fit in one `send` is kept in the internal pending-write
    /// queue across ticks.
    pub(crate) fn new(
        stream: TcpStream,
        buffer_size: usize,
        listen_callback: Arc<EventCallback<ListenEvent>>,
    ) -> io::Result<Arc<Self>> {
        stream.set_nonblocking(true)?;
        let client_descriptor = stream.as_raw_fd();
        let (outbound_tx, outbound_rx) = flume::unbounded();

        Ok(Arc::new(Self {
            client_descriptor,
            stream,
            state: AtomicU8::new(STATE_ACTIVE),
            read_claim: Mutex::new(()),
            write_claim: Mutex::new(()),
            outbound_tx,
            outbound_rx,
            pending_write: Mutex::new(StreamQueue::new()),
            last_activity: Mutex::new(Instant::now()),
            buffer_size: buffer_size.max(1),
            listen_callback,
        }))
    }

    /// The raw socket descriptor, used as the key in an endpoint's channel map.
    #[must_use]
    pub fn client_descriptor(&self) -> RawFd {
        self.client_descriptor
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        ChannelState::from(self.state.load(Ordering::Acquire))
    }

    /// True while the channel is still accepting reads and writes.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == ChannelState::Active
    }

    /// Time elapsed since the last successful read or write.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// The remote address of the connected peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying socket no longer has a valid peer
    /// (e.g. after the connection has been torn down).
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// The local address this channel is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying socket query fails.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    /// Enqueue a message for a future write tick. Always safe to call from
    /// any thread; silently drops empty messages.
    ///
    /// Use [`write_now`](Self::write_now) instead when calling from the
    /// thread currently running this channel's write tick, to skip the
    /// round trip through the queue.
    pub fn queue_write(&self, msg: Message) {
        if msg.is_empty() {
            return;
        }
        let _ = self.outbound_tx.send(msg);
    }

    /// Write a message to the socket immediately, without going through
    /// the outbound queue.
    ///
    /// Caller must already be the thread processing this channel's write
    /// tick (i.e. called from within, or synchronized with,
    /// [`handle_write_queue`](Self::handle_write_queue)) — calling this
    /// concurrently with another thread's write is a data race on the
    /// socket. Any unsent remainder on a partial write, or the whole
    /// message on `WouldBlock`, falls back to [`queue_write`](Self::queue_write).
    pub fn write_now(&self, msg: Message, log: &LogProducer) -> bool {
        if msg.is_empty() {
            return true;
        }
        if !self.is_active() {
            return false;
        }
        match (&self.stream).write(msg.as_slice()) {
            Ok(n) if n == msg.len() => {
                *self.last_activity.lock() = Instant::now();
                true
            }
            Ok(n) => {
                self.queue_write(msg.substr(n, msg.len() - n));
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.queue_write(msg);
                true
            }
            Err(e) => {
                log.log(LogLevel::Warn, "channel", format!("write failed: {e}"));
                self.queue_shutdown();
                false
            }
        }
    }

    /// Attempt one non-blocking `recv` and, on success, dispatch a
    /// [`ListenEvent`] to the endpoint's listen callback.
    ///
    /// Returns `true` only when a read actually made progress (bytes were
    /// received and dispatched). Returns `false` if another thread
    /// currently holds the read claim, if the channel is no longer active,
    /// if there was nothing to read (`WouldBlock`), or if the peer closed
    /// the connection or the read failed (either of which also queues a
    /// shutdown) — callers use this to decide whether to keep ticking or
    /// back off.
    pub fn read_data(self: &Arc<Self>, log: &LogProducer) -> bool {
        let Some(_claim) = self.read_claim.try_lock() else {
            return false;
        };
        if !self.is_active() {
            return false;
        }

        let mut buf = vec![0u8; self.buffer_size];
        match (&self.stream).read(&mut buf) {
            Ok(0) => {
                log.log(LogLevel::Debug, "channel", "peer closed connection");
                self.queue_shutdown();
                false
            }
            Ok(n) => {
                *self.last_activity.lock() = Instant::now();
                trace!(fd = self.client_descriptor, bytes = n, "read_data dispatched");
                let message = Message::from_slice(&buf[..n]);
                self.listen_callback.invoke_with_error_handler(
                    ListenEvent {
                        channel: Arc::clone(self),
                        message,
                    },
                    |payload| {
                        let reason = payload
                            .downcast_ref::<&str>()
                            .map(|s| (*s).to_string())
                            .or_else(|| payload.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "listener panicked".to_string());
                        log.log(LogLevel::Debug, "channel", format!("message listener panicked: {reason}"));
                    },
                );
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => {
                log.log(LogLevel::Warn, "channel", format!("read failed: {e}"));
                self.queue_shutdown();
                false
            }
        }
    }

    /// Number of messages bulk-dequeued from the outbound channel per tick,
    /// before the per-tick `send` is attempted.
    const WRITE_BATCH: usize = 10;
    /// How long a tick with an empty pending-write buffer waits for the
    /// first message to arrive on the outbound queue before giving up.
    const WRITE_BATCH_TIMEOUT: Duration = Duration::from_micros(500);

    /// Bulk-dequeue up to [`WRITE_BATCH`] messages from the outbound queue
    /// into the pending-write buffer, then attempt one non-blocking `send`
    /// of up to `buffer_size` bytes from the front of that buffer.
    ///
    /// Runs in both `Active` and `Closing` state, so that whatever was
    /// already queued keeps draining after [`queue_shutdown`](Self::queue_shutdown)
    /// — only a reclaimed channel refuses to send. Returns `true` only when
    /// a send actually made progress. Returns `false` if another thread
    /// currently holds the write claim, the channel has been reclaimed,
    /// there was nothing queued to send (including a bulk-dequeue that
    /// timed out empty), or the send would block — callers use this to
    /// decide whether to keep ticking or back off.
    pub fn handle_write_queue(self: &Arc<Self>, log: &LogProducer) -> bool {
        let Some(_claim) = self.write_claim.try_lock() else {
            return false;
        };
        if self.state() == ChannelState::Reclaimed {
            return false;
        }

        let mut pending = self.pending_write.lock();
        let mut dequeued = 0usize;
        if pending.is_empty() {
            match self.outbound_rx.recv_timeout(Self::WRITE_BATCH_TIMEOUT) {
                Ok(msg) => {
                    pending.enqueue_message(msg);
                    dequeued += 1;
                }
                Err(_) => return false,
            }
        }
        while dequeued < Self::WRITE_BATCH {
            match self.outbound_rx.try_recv() {
                Ok(msg) => {
                    pending.enqueue_message(msg);
                    dequeued += 1;
                }
                Err(_) => break,
            }
        }
        if pending.is_empty() {
            return false;
        }

        let chunk = pending.peek(self.buffer_size);
        match (&self.stream).write(&chunk) {
            Ok(0) => false,
            Ok(n) => {
                pending.dequeue(n);
                *self.last_activity.lock() = Instant::now();
                trace!(fd = self.client_descriptor, bytes = n, "handle_write_queue drained");
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => {
                log.log(LogLevel::Warn, "channel", format!("write failed: {e}"));
                drop(pending);
                self.queue_shutdown();
                false
            }
        }
    }

    /// True if there is unsent data for this channel: either bytes still
    /// sitting in the pending-write buffer from a previous tick, or
    /// messages not yet pulled off the outbound queue. Used by an
    /// [`Endpoint`](crate::endpoint::Endpoint)'s shutdown path to decide
    /// whether a bounded final drain is still making progress.
    #[must_use]
    pub fn has_queued_writes(&self) -> bool {
        !self.outbound_rx.is_empty() || !self.pending_write.lock().is_empty()
    }

    /// Move the channel into `Closing`. Idempotent and callable from any
    /// thread; does nothing once the channel has already left `Active`.
    pub fn queue_shutdown(&self) {
        let _ = self.state.compare_exchange(
            STATE_ACTIVE,
            STATE_CLOSING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.state.store(STATE_RECLAIMED, Ordering::Release);
        // Block until no in-flight read/write tick is touching the socket.
        // Any worker that currently holds a claim will release it quickly
        // (ticks never block); once both are free the underlying
        // `TcpStream`'s own `Drop` closes the descriptor.
        let _read = self.read_claim.lock();
        let _write = self.write_claim.lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn logger() -> LogProducer {
        crate::logger::AsyncLogger::new().producer()
    }

    #[test]
    fn read_data_dispatches_one_message_per_recv() {
        let (mut client, server) = connected_pair();
        let received: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
        let received2 = received.clone();

        let callback: Arc<EventCallback<ListenEvent>> = Arc::new(EventCallback::new());
        callback.add_closure(move |event: ListenEvent| {
            received2.lock().unwrap().push(event.message.as_slice().to_vec());
        });

        let channel = Channel::new(server, 64, callback).unwrap();
        client.write_all(b"hello").unwrap();

        let log = logger();
        // Retry a few times since the peer write may not be visible yet.
        for _ in 0..50 {
            if channel.read_data(&log) && !received.lock().unwrap().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(received.lock().unwrap().as_slice(), [b"hello".to_vec()]);
    }

    #[test]
    fn queue_write_then_handle_write_queue_delivers_bytes() {
        let (mut client, server) = connected_pair();
        let callback: Arc<EventCallback<ListenEvent>> = Arc::new(EventCallback::new());
        let channel = Channel::new(server, 64, callback).unwrap();
        let log = logger();

        channel.queue_write(Message::from_str("world"));
        for _ in 0..50 {
            if channel.handle_write_queue(&log) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        let mut buf = [0u8; 5];
        client.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn read_data_returns_false_when_there_is_nothing_to_read() {
        let (_client, server) = connected_pair();
        let callback: Arc<EventCallback<ListenEvent>> = Arc::new(EventCallback::new());
        let channel = Channel::new(server, 64, callback).unwrap();
        let log = logger();

        assert!(!channel.read_data(&log));
    }

    #[test]
    fn handle_write_queue_returns_false_when_nothing_is_queued() {
        let (_client, server) = connected_pair();
        let callback: Arc<EventCallback<ListenEvent>> = Arc::new(EventCallback::new());
        let channel = Channel::new(server, 64, callback).unwrap();
        let log = logger();

        assert!(!channel.handle_write_queue(&log));
        assert!(!channel.has_queued_writes());
    }

    #[test]
    fn handle_write_queue_keeps_draining_after_shutdown_is_queued() {
        let (mut client, server) = connected_pair();
        let callback: Arc<EventCallback<ListenEvent>> = Arc::new(EventCallback::new());
        let channel = Channel::new(server, 64, callback).unwrap();
        let log = logger();

        channel.queue_write(Message::from_str("world"));
        channel.queue_shutdown();
        assert_eq!(channel.state(), ChannelState::Closing);
        assert!(channel.has_queued_writes());

        for _ in 0..50 {
            if channel.handle_write_queue(&log) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        let mut buf = [0u8; 5];
        client.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"world");
        assert!(!channel.has_queued_writes());
    }

    #[test]
    fn peer_close_queues_shutdown_and_read_data_stops_dispatching() {
        let (client, server) = connected_pair();
        let callback: Arc<EventCallback<ListenEvent>> = Arc::new(EventCallback::new());
        let channel = Channel::new(server, 64, callback).unwrap();
        drop(client);

        let log = logger();
        for _ in 0..50 {
            channel.read_data(&log);
            if channel.state() == ChannelState::Closing {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(channel.state(), ChannelState::Closing);
    }

    #[test]
    fn queue_shutdown_is_idempotent() {
        let (_client, server) = connected_pair();
        let callback: Arc<EventCallback<ListenEvent>> = Arc::new(EventCallback::new());
        let channel = Channel::new(server, 64, callback).unwrap();
        channel.queue_shutdown();
        channel.queue_shutdown();
        assert_eq!(channel.state(), ChannelState::Closing);
    }

    #[test]
    fn read_data_yields_to_a_thread_already_holding_the_read_claim() {
        let (mut client, server) = connected_pair();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let callback: Arc<EventCallback<ListenEvent>> = Arc::new(EventCallback::new());
        callback.add_closure(move |_: ListenEvent| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        let channel = Channel::new(server, 64, callback).unwrap();
        client.write_all(b"x").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let log = logger();
        let held = channel.read_claim.try_lock().expect("claim free before first use");
        assert!(!channel.read_data(&log));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        drop(held);

        assert!(channel.read_data(&log));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
