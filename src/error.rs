//! Error types for the fan-out gateway

use thiserror::Error;

use crate::registry::RegistryError;
use crate::session::route::RouteError;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Socket level failure (bind, accept)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or framing failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Request path did not resolve to an endpoint
    #[error("Routing error: {0}")]
    Route(#[from] RouteError),

    /// Sink registration failure
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
