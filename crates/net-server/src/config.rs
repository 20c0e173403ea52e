use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default SMPP-style length prefix width, in bytes.
pub const DEFAULT_HEADER_SIZE: u8 = 4;
pub const DEFAULT_MAX_BODY_BYTES: u32 = 1024 * 1024;
pub const DEFAULT_PORT: u16 = 12509;
pub const DEFAULT_ASYNC_POLL_BOUND: Duration = Duration::from_millis(500);
pub const DEFAULT_EVENTS_CAPACITY: usize = 128;

/// Runtime parameters for a [`crate::Server`].
///
/// Built once via [`ServerConfig::builder`] and consumed by value into
/// `Server::start` — there is no way to mutate a running server's
/// configuration, which is the point: handler registration and framing
/// limits are fixed for the lifetime of the reactor.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub(crate) bind_addr: SocketAddr,
    pub(crate) header_size: u8,
    pub(crate) max_body_bytes: u32,
    pub(crate) async_poll_bound: Duration,
    pub(crate) events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            header_size: DEFAULT_HEADER_SIZE,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            async_poll_bound: DEFAULT_ASYNC_POLL_BOUND,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    pub fn header_size(&self) -> u8 {
        self.header_size
    }

    pub fn max_body_bytes(&self) -> u32 {
        self.max_body_bytes
    }

    pub fn async_poll_bound(&self) -> Duration {
        self.async_poll_bound
    }

    pub fn events_capacity(&self) -> usize {
        self.events_capacity
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfigBuilder {
    inner: ServerConfigOverrides,
}

#[derive(Debug, Clone, Default)]
struct ServerConfigOverrides {
    bind_addr: Option<SocketAddr>,
    header_size: Option<u8>,
    max_body_bytes: Option<u32>,
    async_poll_bound: Option<Duration>,
    events_capacity: Option<usize>,
}

impl ServerConfigBuilder {
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.inner.bind_addr = Some(addr);
        self
    }

    pub fn header_size(mut self, size: u8) -> Self {
        self.inner.header_size = Some(size);
        self
    }

    pub fn max_body_bytes(mut self, max: u32) -> Self {
        self.inner.max_body_bytes = Some(max);
        self
    }

    pub fn async_poll_bound(mut self, bound: Duration) -> Self {
        self.inner.async_poll_bound = Some(bound);
        self
    }

    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.inner.events_capacity = Some(capacity);
        self
    }

    /// Validates and freezes the configuration.
    ///
    /// # Panics
    /// Panics if `header_size` is zero or wider than 4 bytes, or if
    /// `max_body_bytes` is zero — `HeaderReader` can only left-pad a
    /// 1-4 byte prefix into a `u32`, and a zero-size body makes the
    /// framing engine unable to ever complete a frame.
    pub fn build(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        let header_size = self.inner.header_size.unwrap_or(defaults.header_size);
        let max_body_bytes = self.inner.max_body_bytes.unwrap_or(defaults.max_body_bytes);
        assert!(header_size > 0, "header_size must be non-zero");
        assert!(header_size <= 4, "header_size must be at most 4 bytes");
        assert!(max_body_bytes > 0, "max_body_bytes must be non-zero");

        ServerConfig {
            bind_addr: self.inner.bind_addr.unwrap_or(defaults.bind_addr),
            header_size,
            max_body_bytes,
            async_poll_bound: self.inner.async_poll_bound.unwrap_or(defaults.async_poll_bound),
            events_capacity: self.inner.events_capacity.unwrap_or(defaults.events_capacity),
        }
    }
}
