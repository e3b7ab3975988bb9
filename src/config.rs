//! Construction-time configuration for the event loop.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default heartbeat period.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(60);

/// Event loop configuration.
///
/// Built with [`Config::new`] and the `with_*` methods, then handed to
/// [`EventLoop::bind`](crate::EventLoop::bind), which validates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Listening address, e.g. `"0.0.0.0:8080"`.
    pub address: String,

    /// Opaque transport context (for example a TLS acceptor name).
    ///
    /// TLS termination is left to an outer layer, so `bind` rejects any value.
    /// Default: None
    pub transport: Option<String>,

    /// Period after which every open connection receives an idle notification.
    ///
    /// Default: 60 seconds
    pub idle_interval: Duration,

    /// Upper bound on a single socket read, in bytes.
    ///
    /// A frame larger than one read is never reassembled.
    /// Default: 64 KB (65536)
    pub max_packet_size: usize,

    /// Largest declared payload length accepted by the decoder.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_payload_size: usize,

    /// Maximum size of the upgrade request in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,

    /// How long an accepted socket may stay silent before its upgrade
    /// request arrives. Expired sockets are closed without a response.
    ///
    /// Default: 2 seconds
    pub handshake_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            transport: None,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            max_packet_size: 64 * 1024,
            max_payload_size: 16 * 1024 * 1024,
            max_handshake_size: 8192,
            handshake_timeout: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Create a configuration listening on `address` with default limits.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Set the idle notification period.
    #[must_use]
    pub const fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    /// Set the per-read size bound.
    #[must_use]
    pub const fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Set the declared payload length cap.
    #[must_use]
    pub const fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Set the upgrade request size limit.
    #[must_use]
    pub const fn with_max_handshake_size(mut self, size: usize) -> Self {
        self.max_handshake_size = size;
        self
    }

    /// Set the pending handshake deadline.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the transport context.
    #[must_use]
    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = Some(transport.into());
        self
    }

    /// Check the configuration before binding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a transport context, a zero idle interval
    /// or handshake timeout, or a packet size too small to hold a frame header.
    pub fn validate(&self) -> Result<()> {
        if let Some(transport) = &self.transport {
            return Err(Error::Config(format!(
                "transport context {transport:?} is not supported; terminate TLS upstream"
            )));
        }
        if self.idle_interval.is_zero() {
            return Err(Error::Config("idle interval must be non-zero".into()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(Error::Config("handshake timeout must be non-zero".into()));
        }
        if self.max_packet_size < 2 {
            return Err(Error::Config(format!(
                "max packet size {} cannot hold a frame header",
                self.max_packet_size
            )));
        }
        Ok(())
    }
}
