//! Message and identifier types for sink routing
//!
//! Messages reach this layer already encoded; the gateway only moves
//! opaque payloads from the registry to the wire.

use bytes::Bytes;

/// Subscription id used by the `/firehose` endpoint when none is given
pub const FIREHOSE_SUBSCRIPTION: &str = "firehose";

/// Identity of a single sink, stable for the lifetime of its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(pub u64);

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

/// An encoded envelope on its way to a subscriber
///
/// Cheap to clone: the payload is reference counted, so fan-out to many
/// sinks shares one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: Bytes,
}

impl Message {
    /// Wrap an encoded payload
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Encoded payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Consume the message, returning its payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl From<Bytes> for Message {
    fn from(payload: Bytes) -> Self {
        Self::new(payload)
    }
}

impl From<Vec<u8>> for Message {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl From<&'static str> for Message {
    fn from(payload: &'static str) -> Self {
        Self::new(Bytes::from_static(payload.as_bytes()))
    }
}
