//! Gateway configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Gateway configuration options
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Interval between keep-alive pings; a ping unanswered for this long
    /// ends the session
    pub keep_alive_interval: Duration,

    /// Outbound buffer of each sink, in messages
    pub sink_buffer_size: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8081)),
            max_connections: 0, // Unlimited
            keep_alive_interval: Duration::from_secs(30),
            sink_buffer_size: 100,
            tcp_nodelay: true,
        }
    }
}

impl GatewayConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set keep-alive interval
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set per-sink buffer size (at least one message)
    pub fn sink_buffer_size(mut self, size: usize) -> Self {
        self.sink_buffer_size = size.max(1);
        self
    }
}
