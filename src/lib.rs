//! WebSocket fan-out gateway for log and metric streams
//!
//! Ingested messages are routed by application id to every sink streaming
//! that application, and round-robin to one member of each firehose
//! subscription. Consumers connect over WebSocket:
//!
//! - `/apps/{app_id}/stream` receives every message of one application
//! - `/apps/{app_id}/recentlogs` replays the buffered recent messages, then closes
//! - `/firehose` and `/firehose/{subscription_id}` share the full stream
//!   among the connected members of a subscription
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use log_fanout::{Gateway, GatewayConfig, Message, SinkRegistry};
//!
//! # async fn run() -> log_fanout::Result<()> {
//! let registry = Arc::new(SinkRegistry::new());
//! let gateway = Gateway::bind(GatewayConfig::default(), Arc::clone(&registry)).await?;
//!
//! tokio::spawn(async move {
//!     registry.dispatch("my-app", Message::from("hello")).await;
//! });
//!
//! gateway.run().await
//! # }
//! ```

pub mod error;
pub mod registry;
pub mod server;
pub mod session;

pub use error::{Error, Result};
pub use registry::{
    BackpressurePolicy, DispatchReport, Message, RegistryConfig, SinkHandle, SinkId, SinkManager,
    SinkRegistry,
};
pub use server::{Gateway, GatewayConfig, GatewayHandle};
pub use session::{Route, Termination};
