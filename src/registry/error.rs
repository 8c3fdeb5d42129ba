//! Registry error types

use thiserror::Error;

use super::message::SinkId;

/// Error type for sink registration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A sink with the same identity is already registered
    #[error("Sink already registered: {0}")]
    DuplicateSink(SinkId),
}
