//! Registrar interface consumed by the gateway
//!
//! The gateway never looks inside a registrar: it hands over a freshly
//! created [`SinkHandle`], later asks for it to be removed by identity, and
//! fetches replay buffers. [`SinkRegistry`](super::SinkRegistry) is the
//! in-process implementation; anything else (a sharded store, a registry
//! backed by another service) can be plugged in by implementing this trait.

use std::future::Future;

use super::message::{Message, SinkId};
use super::sink::SinkHandle;

/// Registration backend for live and replay endpoints
///
/// Every `unregister_*` call must be idempotent: it returns `true` only
/// when it actually removed and closed a sink.
pub trait SinkManager: Send + Sync + 'static {
    /// Register a sink streaming the logs of one application
    fn register_sink(&self, app_id: &str, sink: SinkHandle) -> impl Future<Output = bool> + Send;

    /// Remove and close a previously registered application sink
    fn unregister_sink(&self, app_id: &str, id: SinkId) -> impl Future<Output = bool> + Send;

    /// Add a sink to the broadcast group of a firehose subscription
    fn register_firehose_sink(
        &self,
        subscription_id: &str,
        sink: SinkHandle,
    ) -> impl Future<Output = bool> + Send;

    /// Remove and close a firehose sink
    fn unregister_firehose_sink(
        &self,
        subscription_id: &str,
        id: SinkId,
    ) -> impl Future<Output = bool> + Send;

    /// Buffered recent messages of an application, oldest first
    fn recent_logs_for(&self, app_id: &str) -> impl Future<Output = Vec<Message>> + Send;
}
