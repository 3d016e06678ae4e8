//! Endpoint configuration.
//!
//! Mirrors the teacher crate's builder-style `SocketOptions`: every field
//! has a sensible default and a `with_*` setter that consumes and returns
//! `self`, so configuration reads as a chain at the call site.

/// Configuration shared by [`ServerEndpoint`](crate::endpoint::ServerEndpoint)
/// and [`ClientEndpoint`](crate::endpoint::ClientEndpoint).
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Upper bound on the size of a single `recv`/`send` syscall per
    /// channel tick. Default: 512 bytes.
    pub buffer_size: usize,

    /// Whether to set `TCP_NODELAY` on accepted/connected sockets. Must be
    /// decided before `bind_and_listen`/`connect` is called — changing it
    /// afterwards has no effect on sockets already established.
    /// Default: `false`.
    pub no_delay: bool,

    /// Number of OS threads in the read/write worker pool driving this
    /// endpoint's channels. Default: 2.
    pub worker_thread_count: usize,

    /// Whether to set `SO_REUSEADDR` on a server's listening socket.
    /// Default: `true`.
    pub reuse_addr: bool,

    /// Whether to set `SO_REUSEPORT` on a server's listening socket, to
    /// allow multiple processes to load-balance the same port. Default:
    /// `false`.
    pub reuse_port: bool,

    /// Whether to enable `SO_KEEPALIVE` on accepted/connected sockets.
    /// Default: `false`.
    pub keep_alive: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            buffer_size: 512,
            no_delay: false,
            worker_thread_count: 2,
            reuse_addr: true,
            reuse_port: false,
            keep_alive: false,
        }
    }
}

impl EndpointConfig {
    /// Create a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-tick read/write buffer size.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Enable or disable `TCP_NODELAY`.
    #[must_use]
    pub fn with_no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = enabled;
        self
    }

    /// Set the worker-pool thread count.
    #[must_use]
    pub fn with_worker_thread_count(mut self, count: usize) -> Self {
        self.worker_thread_count = count.max(1);
        self
    }

    /// Enable or disable `SO_REUSEADDR`.
    #[must_use]
    pub fn with_reuse_addr(mut self, enabled: bool) -> Self {
        self.reuse_addr = enabled;
        self
    }

    /// Enable or disable `SO_REUSEPORT`.
    #[must_use]
    pub fn with_reuse_port(mut self, enabled: bool) -> Self {
        self.reuse_port = enabled;
        self
    }

    /// Enable or disable `SO_KEEPALIVE`.
    #[must_use]
    pub fn with_keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EndpointConfig::default();
        assert_eq!(cfg.buffer_size, 512);
        assert!(!cfg.no_delay);
        assert_eq!(cfg.worker_thread_count, 2);
        assert!(cfg.reuse_addr);
        assert!(!cfg.reuse_port);
        assert!(!cfg.keep_alive);
    }

    #[test]
    fn builder_chain_overrides_defaults() {
        let cfg = EndpointConfig::new()
            .with_buffer_size(4096)
            .with_no_delay(true)
            .with_worker_thread_count(8)
            .with_keep_alive(true);

        assert_eq!(cfg.buffer_size, 4096);
        assert!(cfg.no_delay);
        assert_eq!(cfg.worker_thread_count, 8);
        assert!(cfg.keep_alive);
    }

    #[test]
    fn worker_thread_count_is_clamped_to_at_least_one() {
        let cfg = EndpointConfig::new().with_worker_thread_count(0);
        assert_eq!(cfg.worker_thread_count, 1);
    }
}
