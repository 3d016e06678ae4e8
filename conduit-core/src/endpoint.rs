//! Connection ownership and scheduling (C6): [`ServerEndpoint`] accepts
//! inbound connections, [`ClientEndpoint`] owns a single outbound one. Both
//! drive their [`Channel`]s with a small pool of OS threads that tick
//! every channel in the map rather than blocking per-connection — per
//! spec.md §5, there is no cooperative runtime here, only preemptive
//! threads racing to claim work via `Channel`'s try-locks.
//!
//! Grounded on `ServerSocket.cpp`/`ClientSocket.cpp` (accept loop, connect,
//! `queueWork`-dispatched connect callbacks, `closeClient`/`close` teardown
//! order) and `SocketHandler.cpp` (thread pool shape, reused here as the
//! read/write/reaper worker pools instead of a single generic pool).

use crate::channel::{Channel, ListenEvent};
use crate::config::EndpointConfig;
use crate::error::{SetupError, SetupResult};
use crate::event::{CallbackId, EventCallback};
use crate::logger::LogLevel;
use crate::logger::LogProducer;
use crate::message::Message;
use crate::tcp;
use hashbrown::HashMap;
use parking_lot::RwLock;
use socket2::{Domain, Socket as RawSocket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A unit of deferred work, queued onto a [`Handler`](crate::handler::Handler)'s
/// pool rather than run inline on the accept/reaper thread that discovered it.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

/// A connect or disconnect notification: the channel involved and whether
/// it just connected (`true`) or just disconnected (`false`).
#[derive(Clone)]
pub struct ConnectEvent {
    pub channel: Arc<Channel>,
    pub connected: bool,
}

const TICK_IDLE_SLEEP: Duration = Duration::from_millis(2);
const REAP_INTERVAL: Duration = Duration::from_millis(20);
/// Listen backlog, per spec.md §6's configuration table.
const LISTEN_BACKLOG: i32 = 10;
/// Bound on how long a graceful shutdown waits for already-queued writes
/// to drain before tearing down channels unconditionally.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

fn resolve_one(host: &str, port: u16) -> SetupResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| SetupError::Resolve(e.to_string()))?
        .next()
        .ok_or_else(|| SetupError::Resolve(format!("no addresses for {host}:{port}")))
}

/// Keep ticking a single channel's write side until it has nothing left
/// queued, or `timeout` elapses — whichever comes first.
fn drain_channel(channel: &Channel, log: &LogProducer, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while channel.has_queued_writes() {
        channel.handle_write_queue(log);
        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(Duration::from_micros(500));
    }
}

fn apply_connection_options(stream: &TcpStream, config: &EndpointConfig) -> SetupResult<()> {
    if config.no_delay {
        tcp::set_no_delay(stream, true)?;
    }
    if config.keep_alive {
        tcp::set_keep_alive(stream, true)?;
    }
    Ok(())
}

/// Accepts inbound TCP connections and fans each one out to the registered
/// listen/connect callbacks.
pub struct ServerEndpoint {
    config: EndpointConfig,
    log: LogProducer,
    work_tx: flume::Sender<WorkItem>,
    active: AtomicBool,
    channels: RwLock<HashMap<RawFd, Arc<Channel>>>,
    listen_callback: Arc<EventCallback<ListenEvent>>,
    connect_callback: Arc<EventCallback<ConnectEvent>>,
    threads: RwLock<Vec<JoinHandle<()>>>,
}

impl ServerEndpoint {
    /// Construct an inactive server endpoint. Call
    /// [`bind_and_listen`](Self::bind_and_listen) to start accepting
    /// connections.
    #[must_use]
    pub fn new(config: EndpointConfig, log: LogProducer, work_tx: flume::Sender<WorkItem>) -> Self {
        Self {
            config,
            log,
            work_tx,
            active: AtomicBool::new(false),
            channels: RwLock::new(HashMap::new()),
            listen_callback: Arc::new(EventCallback::new()),
            connect_callback: Arc::new(EventCallback::new()),
            threads: RwLock::new(Vec::new()),
        }
    }

    /// True while this endpoint is bound and its worker threads running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Number of currently connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Descriptors of every currently connected client, in no particular
    /// order. Useful for broadcast-style writes via [`write`](Self::write).
    #[must_use]
    pub fn client_descriptors(&self) -> Vec<RawFd> {
        self.channels.read().keys().copied().collect()
    }

    /// Register a closure invoked once per successful read on any channel
    /// this endpoint owns.
    pub fn on_message<F>(&self, f: F) -> CallbackId
    where
        F: Fn(&Channel, &Message) + Send + Sync + 'static,
    {
        self.listen_callback
            .add_closure(move |event: ListenEvent| f(&event.channel, &event.message))
    }

    /// Register a closure invoked when a client connects or disconnects.
    pub fn on_connect<F>(&self, f: F) -> CallbackId
    where
        F: Fn(&Channel, bool) + Send + Sync + 'static,
    {
        self.connect_callback
            .add_closure(move |event: ConnectEvent| f(&event.channel, event.connected))
    }

    /// Write a message to a specific connected client.
    ///
    /// Slower than calling [`Channel::queue_write`] directly on a channel
    /// you already have, because this additionally takes the channel-map
    /// read lock to find it.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::UnknownClient`] if no channel with that
    /// descriptor is currently connected.
    pub fn write(&self, client: RawFd, msg: Message) -> SetupResult<()> {
        let channels = self.channels.read();
        let channel = channels
            .get(&client)
            .ok_or(SetupError::UnknownClient(client))?;
        channel.queue_write(msg);
        Ok(())
    }

    /// Forcefully disconnect a specific client.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::UnknownClient`] if no channel with that
    /// descriptor is currently connected.
    pub fn close_client(&self, client: RawFd) -> SetupResult<()> {
        let channels = self.channels.read();
        let channel = channels
            .get(&client)
            .ok_or(SetupError::UnknownClient(client))?;
        channel.queue_shutdown();
        Ok(())
    }

    /// Bind to `port` on all interfaces and start accepting connections.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::AlreadyActive`] if already bound, or a bind
    /// failure wrapping the underlying I/O error.
    pub fn bind_and_listen(self: &Arc<Self>, port: u16) -> SetupResult<()> {
        if self.active.swap(true, Ordering::AcqRel) {
            self.active.store(true, Ordering::Release);
            return Err(SetupError::AlreadyActive);
        }

        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let raw = RawSocket::new(Domain::IPV4, Type::STREAM, None).map_err(SetupError::Bind)?;
        tcp::set_reuse_addr(&raw, self.config.reuse_addr)?;
        #[cfg(unix)]
        tcp::set_reuse_port(&raw, self.config.reuse_port)?;
        raw.bind(&addr.into()).map_err(SetupError::Bind)?;
        raw.listen(LISTEN_BACKLOG).map_err(SetupError::Bind)?;
        raw.set_nonblocking(true).map_err(SetupError::Bind)?;
        let listener: TcpListener = raw.into();
        debug!(port, "server endpoint bound and listening");

        self.spawn_accept_thread(listener);
        self.spawn_worker_threads();
        self.spawn_reaper_thread();

        Ok(())
    }

    fn spawn_accept_thread(self: &Arc<Self>, listener: TcpListener) {
        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("accept".into())
            .spawn(move || {
                while this.is_active() {
                    match listener.accept() {
                        Ok((stream, _addr)) => this.on_accepted(stream),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(TICK_IDLE_SLEEP);
                        }
                        Err(e) => {
                            this.log.log(LogLevel::Warn, "server", format!("accept failed: {e}"));
                        }
                    }
                }
            })
            .expect("failed to spawn accept thread");
        self.threads.write().push(handle);
    }

    fn on_accepted(self: &Arc<Self>, stream: TcpStream) {
        if let Err(e) = apply_connection_options(&stream, &self.config) {
            self.log.log(LogLevel::Warn, "server", format!("{e}"));
        }
        let channel = match Channel::new(stream, self.config.buffer_size, Arc::clone(&self.listen_callback)) {
            Ok(channel) => channel,
            Err(e) => {
                self.log.log(LogLevel::Warn, "server", format!("failed to wrap accepted socket: {e}"));
                return;
            }
        };
        let fd = channel.client_descriptor();
        trace!(fd, "accepted new client connection");
        self.channels.write().insert(fd, Arc::clone(&channel));

        if !self.connect_callback.is_empty() {
            let connect_callback = Arc::clone(&self.connect_callback);
            let _ = self.work_tx.send(Box::new(move || {
                connect_callback.invoke(ConnectEvent { channel, connected: true });
            }));
        }
    }

    fn spawn_worker_threads(self: &Arc<Self>) {
        for i in 0..self.config.worker_thread_count {
            let this = Arc::clone(self);
            let handle = thread::Builder::new()
                .name(format!("read-worker-{i}"))
                .spawn(move || {
                    while this.is_active() {
                        let channels: Vec<_> = this.channels.read().values().cloned().collect();
                        let mut did_work = false;
                        for channel in channels {
                            did_work |= channel.read_data(&this.log);
                        }
                        if !did_work {
                            thread::sleep(TICK_IDLE_SLEEP);
                        }
                    }
                })
                .expect("failed to spawn read worker thread");
            self.threads.write().push(handle);

            let this = Arc::clone(self);
            let handle = thread::Builder::new()
                .name(format!("write-worker-{i}"))
                .spawn(move || {
                    while this.is_active() {
                        let channels: Vec<_> = this.channels.read().values().cloned().collect();
                        let mut did_work = false;
                        for channel in channels {
                            did_work |= channel.handle_write_queue(&this.log);
                        }
                        if !did_work {
                            thread::sleep(TICK_IDLE_SLEEP);
                        }
                    }
                })
                .expect("failed to spawn write worker thread");
            self.threads.write().push(handle);
        }
    }

    fn spawn_reaper_thread(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("reaper".into())
            .spawn(move || {
                while this.is_active() {
                    thread::sleep(REAP_INTERVAL);
                    let dead: Vec<RawFd> = this
                        .channels
                        .read()
                        .iter()
                        .filter(|(_, ch)| !ch.is_active())
                        .map(|(fd, _)| *fd)
                        .collect();

                    for fd in dead {
                        let removed = this.channels.write().remove(&fd);
                        if let Some(channel) = removed {
                            debug!(fd, "reaping closed channel");
                            if !this.connect_callback.is_empty() {
                                let connect_callback = Arc::clone(&this.connect_callback);
                                let _ = this.work_tx.send(Box::new(move || {
                                    connect_callback.invoke(ConnectEvent { channel, connected: false });
                                }));
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn reaper thread");
        self.threads.write().push(handle);
    }

    /// Stop accepting new connections, give already-queued writes a bounded
    /// window to drain, tear down every live channel, and join all worker
    /// threads. Safe to call more than once.
    pub fn notify_stop(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.drain_channels(SHUTDOWN_DRAIN_TIMEOUT);
        self.channels.write().clear();
        for handle in self.threads.write().drain(..) {
            let _ = handle.join();
        }
    }

    /// Keep ticking every channel's write side until none of them have
    /// anything left queued, or `timeout` elapses — whichever comes first.
    /// Called once the endpoint has stopped accepting new work, so the
    /// background read/write workers are winding down; this drives the
    /// final ticks itself rather than relying on them.
    fn drain_channels(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            let channels: Vec<_> = self.channels.read().values().cloned().collect();
            let still_pending = channels.iter().any(|c| c.has_queued_writes());
            for channel in &channels {
                if channel.has_queued_writes() {
                    channel.handle_write_queue(&self.log);
                }
            }
            if !still_pending || Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_micros(500));
        }
    }
}

impl Drop for ServerEndpoint {
    fn drop(&mut self) {
        self.notify_stop();
    }
}

/// Owns a single outbound TCP connection.
pub struct ClientEndpoint {
    config: EndpointConfig,
    log: LogProducer,
    work_tx: flume::Sender<WorkItem>,
    active: AtomicBool,
    connected_once: AtomicBool,
    channel: RwLock<Option<Arc<Channel>>>,
    listen_callback: Arc<EventCallback<ListenEvent>>,
    connect_callback: Arc<EventCallback<ConnectEvent>>,
    threads: RwLock<Vec<JoinHandle<()>>>,
}

impl ClientEndpoint {
    /// Construct a disconnected client endpoint. Call
    /// [`connect`](Self::connect) to establish the connection.
    #[must_use]
    pub fn new(config: EndpointConfig, log: LogProducer, work_tx: flume::Sender<WorkItem>) -> Self {
        Self {
            config,
            log,
            work_tx,
            active: AtomicBool::new(false),
            connected_once: AtomicBool::new(false),
            channel: RwLock::new(None),
            listen_callback: Arc::new(EventCallback::new()),
            connect_callback: Arc::new(EventCallback::new()),
            threads: RwLock::new(Vec::new()),
        }
    }

    /// True while the connection is live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Register a closure invoked once per successful read.
    pub fn on_message<F>(&self, f: F) -> CallbackId
    where
        F: Fn(&Channel, &Message) + Send + Sync + 'static,
    {
        self.listen_callback
            .add_closure(move |event: ListenEvent| f(&event.channel, &event.message))
    }

    /// Register a closure invoked on connect and disconnect.
    pub fn on_connect<F>(&self, f: F) -> CallbackId
    where
        F: Fn(&Channel, bool) + Send + Sync + 'static,
    {
        self.connect_callback
            .add_closure(move |event: ConnectEvent| f(&event.channel, event.connected))
    }

    /// Queue a message for delivery to the server.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::EndpointInactive`] if not currently connected.
    pub fn write(&self, msg: Message) -> SetupResult<()> {
        let guard = self.channel.read();
        let channel = guard.as_ref().ok_or(SetupError::EndpointInactive)?;
        channel.queue_write(msg);
        Ok(())
    }

    /// Connect to `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::AlreadyActive`] if already connected, or
    /// [`SetupError::Connect`]/[`SetupError::Resolve`] on failure.
    pub fn connect(self: &Arc<Self>, host: &str, port: u16) -> SetupResult<()> {
        if self.active.swap(true, Ordering::AcqRel) {
            self.active.store(true, Ordering::Release);
            return Err(SetupError::AlreadyActive);
        }

        let addr = resolve_one(host, port).map_err(|e| {
            self.active.store(false, Ordering::Release);
            e
        })?;

        let stream = TcpStream::connect(addr).map_err(|e| {
            self.active.store(false, Ordering::Release);
            SetupError::Connect(e)
        })?;

        if let Err(e) = apply_connection_options(&stream, &self.config) {
            self.active.store(false, Ordering::Release);
            return Err(e);
        }

        let channel = Channel::new(stream, self.config.buffer_size, Arc::clone(&self.listen_callback))
            .map_err(|e| {
                self.active.store(false, Ordering::Release);
                SetupError::Connect(e)
            })?;

        *self.channel.write() = Some(Arc::clone(&channel));
        self.connected_once.store(true, Ordering::Release);
        self.spawn_worker_threads();

        if !self.connect_callback.is_empty() {
            let connect_callback = Arc::clone(&self.connect_callback);
            let _ = self.work_tx.send(Box::new(move || {
                connect_callback.invoke(ConnectEvent { channel, connected: true });
            }));
        }

        Ok(())
    }

    fn spawn_worker_threads(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let read_handle = thread::Builder::new()
            .name("read-worker-0".into())
            .spawn(move || {
                while this.is_active() {
                    let active_channel = this.channel.read().clone();
                    let Some(channel) = active_channel else { break };
                    if !channel.read_data(&this.log) && !channel.is_active() {
                        this.disconnect();
                        break;
                    }
                    thread::sleep(TICK_IDLE_SLEEP);
                }
            })
            .expect("failed to spawn read worker thread");

        let this = Arc::clone(self);
        let write_handle = thread::Builder::new()
            .name("write-worker-0".into())
            .spawn(move || {
                while this.is_active() {
                    let active_channel = this.channel.read().clone();
                    let Some(channel) = active_channel else { break };
                    channel.handle_write_queue(&this.log);
                    thread::sleep(TICK_IDLE_SLEEP);
                }
            })
            .expect("failed to spawn write worker thread");

        let mut threads = self.threads.write();
        threads.push(read_handle);
        threads.push(write_handle);
    }

    /// Mark the connection gone and fire the disconnect callback, without
    /// joining the worker threads. Safe to call from a worker thread itself
    /// (on peer-initiated close) as well as from [`close`](Self::close).
    /// Idempotent: only the first caller after a successful `connect` does
    /// anything.
    fn disconnect(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let channel = self.channel.write().take();
        if let Some(channel) = channel {
            if self.connected_once.load(Ordering::Acquire) && !self.connect_callback.is_empty() {
                self.connect_callback.invoke(ConnectEvent { channel, connected: false });
            }
        }
    }

    /// Disconnect (if still connected) and join the read/write worker
    /// threads. Safe to call more than once; the disconnect callback only
    /// fires if `connect` previously succeeded and no prior disconnect (by
    /// the peer, or by an earlier `close`) has already fired it.
    pub fn close(&self) {
        if let Some(channel) = self.channel.read().clone() {
            drain_channel(&channel, &self.log, SHUTDOWN_DRAIN_TIMEOUT);
        }
        self.disconnect();
        for handle in self.threads.write().drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ClientEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}
