//! Endpoint registry and shared work-queue thread pool (C7).
//!
//! A `Handler` is the one thing a host application owns directly: it holds
//! the single [`AsyncLogger`] and its drain thread, a pool of worker
//! threads that run connect/disconnect callbacks off the accept/reaper
//! threads that discovered them, and the registry of endpoints it created.
//! Unlike the original's `getCommonSocketHandler()`, there is no
//! process-wide singleton here — a host constructs as many `Handler`s as it
//! needs and owns their lifetime like any other value.
//!
//! Grounded on `SocketHandler.cpp`'s thread pool (`threadLoop` pulling off
//! a work queue with a timed wait, one try/catch per work item logging at
//! `Debug` on panic) and its `createServerSocket`/`createClientSocket`/
//! `destroySocket` registry API.

use crate::config::EndpointConfig;
use crate::endpoint::{ClientEndpoint, ServerEndpoint, WorkItem};
use crate::logger::{AsyncLogger, LogLevel};
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Opaque id returned by [`Handler::create_server_endpoint`] and
/// [`Handler::create_client_endpoint`], used to later
/// [`destroy_endpoint`](Handler::destroy_endpoint) it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(u64);

enum AnyEndpoint {
    Server(Arc<ServerEndpoint>),
    Client(Arc<ClientEndpoint>),
}

/// Owns the shared log pipeline, a work-queue thread pool, and every
/// endpoint it has created.
pub struct Handler {
    logger: Arc<AsyncLogger>,
    log_thread: RwLock<Option<JoinHandle<()>>>,
    work_tx: flume::Sender<WorkItem>,
    pool: RwLock<Vec<JoinHandle<()>>>,
    active: AtomicBool,
    next_id: AtomicU64,
    endpoints: RwLock<HashMap<EndpointId, AnyEndpoint>>,
}

impl Handler {
    /// Start a handler with `worker_count` work-queue threads (defaults to
    /// the number of logical CPUs when `None`), plus one dedicated log
    /// drain thread.
    #[must_use]
    pub fn new(worker_count: Option<usize>) -> Arc<Self> {
        let logger = Arc::new(AsyncLogger::new());
        let logger_for_thread = Arc::clone(&logger);
        let log_thread = thread::Builder::new()
            .name("log-drain".into())
            .spawn(move || logger_for_thread.drain_forever())
            .expect("failed to spawn log drain thread");

        let (work_tx, work_rx) = flume::unbounded::<WorkItem>();
        let handler = Arc::new(Self {
            logger,
            log_thread: RwLock::new(Some(log_thread)),
            work_tx,
            pool: RwLock::new(Vec::new()),
            active: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            endpoints: RwLock::new(HashMap::new()),
        });

        let count = worker_count.unwrap_or_else(num_cpus::get).max(1);
        let mut pool = Vec::with_capacity(count);
        for i in 0..count {
            let rx = work_rx.clone();
            let log = handler.logger.producer();
            let join = thread::Builder::new()
                .name(format!("work-pool-{i}"))
                .spawn(move || {
                    while let Ok(item) = rx.recv() {
                        if let Err(payload) = panic::catch_unwind(panic::AssertUnwindSafe(item)) {
                            let message = payload
                                .downcast_ref::<&str>()
                                .map(|s| (*s).to_string())
                                .or_else(|| payload.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "work item panicked".to_string());
                            log.log(LogLevel::Debug, "handler", format!("work item panicked: {message}"));
                        }
                    }
                })
                .expect("failed to spawn work-pool thread");
            pool.push(join);
        }
        *handler.pool.write() = pool;
        debug!(worker_count = count, "handler work pool started");

        handler
    }

    /// True while the handler has not yet been shut down.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Number of endpoints currently registered.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().len()
    }

    /// Enable or disable `Debug`-level log records process-wide.
    pub fn set_debug_enabled(&self, enabled: bool) {
        crate::logger::set_debug_enabled(enabled);
    }

    /// Register a closure invoked for every dispatched log record.
    pub fn add_log_subscriber<F>(&self, f: F) -> crate::event::CallbackId
    where
        F: Fn(crate::logger::LogRecord) + Send + Sync + 'static,
    {
        self.logger.add_subscriber(f)
    }

    /// Dispatch a one-shot task onto the shared work-pool, the same pool
    /// that runs connect/disconnect callbacks off the accept/reaper
    /// threads that discovered them. Use this to marshal host work onto a
    /// managed thread instead of running it inline on a caller's own
    /// thread (e.g. from inside a listen callback).
    pub fn queue_work<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.work_tx.send(Box::new(f));
    }

    /// Create, but do not yet bind, a server endpoint. Call
    /// [`ServerEndpoint::bind_and_listen`] on the returned handle.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::HandlerInactive`] if this handler has already
    /// been shut down.
    pub fn create_server_endpoint(
        self: &Arc<Self>,
        config: EndpointConfig,
    ) -> crate::error::SetupResult<(EndpointId, Arc<ServerEndpoint>)> {
        if !self.is_active() {
            return Err(crate::error::SetupError::HandlerInactive);
        }
        let endpoint = Arc::new(ServerEndpoint::new(config, self.logger.producer(), self.work_tx.clone()));
        let id = EndpointId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.endpoints.write().insert(id, AnyEndpoint::Server(Arc::clone(&endpoint)));
        Ok((id, endpoint))
    }

    /// Create, but do not yet connect, a client endpoint. Call
    /// [`ClientEndpoint::connect`] on the returned handle.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::HandlerInactive`] if this handler has already
    /// been shut down.
    pub fn create_client_endpoint(
        self: &Arc<Self>,
        config: EndpointConfig,
    ) -> crate::error::SetupResult<(EndpointId, Arc<ClientEndpoint>)> {
        if !self.is_active() {
            return Err(crate::error::SetupError::HandlerInactive);
        }
        let endpoint = Arc::new(ClientEndpoint::new(config, self.logger.producer(), self.work_tx.clone()));
        let id = EndpointId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.endpoints.write().insert(id, AnyEndpoint::Client(Arc::clone(&endpoint)));
        Ok((id, endpoint))
    }

    /// Tear down a previously created endpoint, releasing the handler's
    /// reference to it. Any other `Arc` clones the host still holds keep
    /// working until they are dropped too. Returns `true` if an endpoint
    /// with this id was found.
    pub fn destroy_endpoint(&self, id: EndpointId) -> bool {
        let removed = self.endpoints.write().remove(&id);
        match removed {
            Some(AnyEndpoint::Server(server)) => {
                server.notify_stop();
                true
            }
            Some(AnyEndpoint::Client(client)) => {
                client.close();
                true
            }
            None => false,
        }
    }

    /// Shut down every endpoint, drain and stop the logger, and join every
    /// pool thread. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!("handler shutting down");
        for (_, endpoint) in self.endpoints.write().drain() {
            match endpoint {
                AnyEndpoint::Server(server) => server.notify_stop(),
                AnyEndpoint::Client(client) => client.close(),
            }
        }
        // Dropping `work_tx` would require consuming `self`; instead we rely
        // on every worker exiting once `recv` fails, which happens once this
        // handler (the last owner of `work_tx`) is dropped. Until then, the
        // pool threads sit idle in `recv`, which is cheap.
        self.logger.stop();
        if let Some(handle) = self.log_thread.write().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Handler {
    fn drop(&mut self) {
        self.shutdown();
        // Each pool thread is blocked in `rx.recv()`; dropping the handles
        // here detaches rather than joins, since `work_tx` (the last sender)
        // is only dropped once this function returns and `self`'s remaining
        // fields are torn down, unblocking `recv` with `Disconnected` after
        // we've already stopped waiting.
        self.pool.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn handler_starts_active_with_no_endpoints() {
        let handler = Handler::new(Some(1));
        assert!(handler.is_active());
        assert_eq!(handler.endpoint_count(), 0);
    }

    #[test]
    fn create_and_destroy_server_endpoint_updates_the_registry() {
        let handler = Handler::new(Some(1));
        let (id, _server) = handler.create_server_endpoint(EndpointConfig::default()).unwrap();
        assert_eq!(handler.endpoint_count(), 1);
        assert!(handler.destroy_endpoint(id));
        assert_eq!(handler.endpoint_count(), 0);
    }

    #[test]
    fn destroying_an_unknown_id_is_a_no_op() {
        let handler = Handler::new(Some(1));
        let bogus = EndpointId(999);
        assert!(!handler.destroy_endpoint(bogus));
    }

    #[test]
    fn shutdown_prevents_new_endpoints() {
        let handler = Handler::new(Some(1));
        handler.shutdown();
        assert!(!handler.is_active());
        let result = handler.create_server_endpoint(EndpointConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn work_pool_survives_a_panicking_item() {
        let handler = Handler::new(Some(2));
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();

        handler.queue_work(|| panic!("boom"));
        handler.queue_work(move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        });

        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        while std::time::Instant::now() < deadline && counter.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queue_work_dispatches_onto_a_pool_thread() {
        let handler = Handler::new(Some(1));
        let seen: Arc<Mutex<Option<std::thread::ThreadId>>> = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        let caller_thread = std::thread::current().id();

        handler.queue_work(move || {
            *seen2.lock().unwrap() = Some(std::thread::current().id());
        });

        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        while std::time::Instant::now() < deadline && seen.lock().unwrap().is_none() {
            thread::sleep(Duration::from_millis(5));
        }

        let ran_on = seen.lock().unwrap().expect("work item ran");
        assert_ne!(ran_on, caller_thread);
    }
}
