//! Asynchronous, off-thread log pipeline (C3).
//!
//! Producers (read/write worker ticks, the accept loop, host code) call
//! [`AsyncLogger::log`] or the `Error`-raising [`AsyncLogger::fmt_throw_error`]
//! from whatever thread they're running on. The call never blocks on I/O:
//! it pushes a [`LogRecord`] onto an unbounded `flume` queue and returns. A
//! single drain thread owned by the [`Handler`](crate::handler::Handler)
//! pulls records in batches and fans them out to subscribers registered via
//! [`UnorderedEventCallback`].
//!
//! `Debug` records are filtered at the producer, before the record is ever
//! built or queued, by a process-wide [`AtomicBool`] — matching the
//! original's `DebugEnabled` flag, which lived on the logger instance but
//! is promoted here to a single process-wide switch since `conduit`
//! applications run exactly one `AsyncLogger`.

use crate::event::UnorderedEventCallback;
use crate::error::FaultError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Severity of a log record, ordered least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        })
    }
}

/// A single queued log entry.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: LogLevel,
    pub tag: Arc<str>,
    pub text: Arc<str>,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.level, self.tag, self.text)
    }
}

/// Process-wide gate for `Debug`-level records, consulted by producers
/// before a record is built. Starts disabled, matching the original's
/// default-constructed `bool DebugEnabled`.
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Enable or disable `Debug`-level log records process-wide.
pub fn set_debug_enabled(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::Relaxed);
}

/// True if `Debug`-level log records are currently enabled.
#[must_use]
pub fn debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// A producer-side handle for enqueueing log records without repeatedly
/// paying the cost of locating the shared sender — the Rust analogue of
/// the original's `moodycamel::ProducerToken`, since `flume`'s sender is
/// already cheaply cloneable and internally amortizes contention the same
/// way a producer token does.
#[derive(Clone)]
pub struct LogProducer {
    sender: flume::Sender<LogRecord>,
}

impl LogProducer {
    /// Queue a record at the given level, subject to the `Debug` gate.
    pub fn log(&self, level: LogLevel, tag: &str, text: impl fmt::Display) {
        if level == LogLevel::Debug && !debug_enabled() {
            return;
        }
        let record = LogRecord {
            level,
            tag: Arc::from(tag),
            text: Arc::from(text.to_string()),
        };
        // The queue is unbounded, so `send` never actually blocks; this
        // matches the retry-until-enqueued contract of the original, which
        // slept 10ms between attempts against its bounded queue.
        let _ = self.sender.send(record);
    }
}

/// The async log pipeline: an MPSC queue of [`LogRecord`]s plus the
/// subscriber list a drain thread dispatches them to.
pub struct AsyncLogger {
    sender: flume::Sender<LogRecord>,
    receiver: flume::Receiver<LogRecord>,
    subscribers: UnorderedEventCallback<LogRecord>,
    stopped: AtomicBool,
}

impl Default for AsyncLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncLogger {
    /// Create a new, empty logger. Call [`drain_forever`](Self::drain_forever)
    /// on a dedicated thread to start dispatching records.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            sender,
            receiver,
            subscribers: UnorderedEventCallback::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Obtain a cheaply-cloneable producer handle.
    #[must_use]
    pub fn producer(&self) -> LogProducer {
        LogProducer {
            sender: self.sender.clone(),
        }
    }

    /// Queue a record directly on the logger, without a [`LogProducer`].
    pub fn log(&self, level: LogLevel, tag: &str, text: impl fmt::Display) {
        self.producer().log(level, tag, text);
    }

    /// Log at `Error` level, then return a [`FaultError`] carrying the same
    /// text — the Rust analogue of the original's `fmtThrowError`, which
    /// logged and then threw. Callers propagate the returned error with
    /// `?` instead of unwinding.
    pub fn fmt_throw_error(&self, tag: &str, text: impl fmt::Display) -> FaultError {
        let rendered = text.to_string();
        self.log(LogLevel::Error, tag, &rendered);
        FaultError(rendered)
    }

    /// Register a subscriber invoked for every dispatched record. Returns
    /// a closure id usable with [`remove_subscriber`](Self::remove_subscriber).
    pub fn add_subscriber<F>(&self, f: F) -> crate::event::CallbackId
    where
        F: Fn(LogRecord) + Send + Sync + 'static,
    {
        self.subscribers.add_closure(f)
    }

    /// Remove a previously registered subscriber.
    pub fn remove_subscriber(&self, id: crate::event::CallbackId) {
        self.subscribers.remove_closure(id);
    }

    /// Drain records in batches of up to 20, dispatching each to every
    /// subscriber, until [`stop`](Self::stop) is called and the queue runs
    /// dry. Intended to run on its own thread for the lifetime of the
    /// owning [`Handler`](crate::handler::Handler).
    pub fn drain_forever(&self) {
        const BATCH: usize = 20;
        const IDLE_TIMEOUT: Duration = Duration::from_millis(100);

        loop {
            let first = match self.receiver.recv_timeout(IDLE_TIMEOUT) {
                Ok(record) => record,
                Err(flume::RecvTimeoutError::Timeout) => {
                    if self.stopped.load(Ordering::Acquire) {
                        return;
                    }
                    continue;
                }
                Err(flume::RecvTimeoutError::Disconnected) => return,
            };

            let mut batch = Vec::with_capacity(BATCH);
            batch.push(first);
            while batch.len() < BATCH {
                match self.receiver.try_recv() {
                    Ok(record) => batch.push(record),
                    Err(_) => break,
                }
            }

            for record in batch {
                self.subscribers.invoke_with_error_handler(record, |payload| {
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "log subscriber panicked".to_string());
                    // Nowhere left to log this: the drain thread is the
                    // only consumer of the log pipeline. Fall back to
                    // stderr so it isn't silently swallowed.
                    eprintln!("[ERROR] logger: log subscriber panicked: {reason}");
                });
            }

            if self.stopped.load(Ordering::Acquire) && self.receiver.is_empty() {
                return;
            }
        }
    }

    /// Signal the drain thread to exit once the queue is empty.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
