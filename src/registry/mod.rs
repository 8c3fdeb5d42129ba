//! Sink registry for log fan-out
//!
//! The registry owns every live [`SinkHandle`] and routes ingested messages
//! to them. Application streams receive every message of their application;
//! firehose subscriptions are served by a [`BroadcastGroup`] that hands each
//! message to one member at a time.
//!
//! # Architecture
//!
//! ```text
//!                         Arc<SinkRegistry>
//!              ┌──────────────────────────────────────┐
//!              │ apps: HashMap<AppId, AppEntry {      │
//!              │   sinks, recent ring buffer }>       │
//!              │ firehoses: HashMap<SubId,            │
//!              │   Arc<BroadcastGroup>>               │
//!              └──────────────────┬───────────────────┘
//!                                 │ dispatch(app_id, msg)
//!         ┌───────────────────────┼───────────────────────┐
//!         │ every app sink        │ one member per group  │
//!         ▼                       ▼                       ▼
//!   [App session]          [Firehose session]      [Firehose session]
//!   rx.recv()              rx.recv()               rx.recv()
//!         │                       │                       │
//!         └──────────────► WebSocket binary frame ◄───────┘
//! ```
//!
//! A handle is held by exactly one registrar at a time. Closing it (on
//! unregister, eviction or drain) is what tells its session to finish.

pub mod config;
pub mod entry;
pub mod error;
pub mod group;
pub mod manager;
pub mod message;
pub mod sink;
pub mod store;

pub use config::{BackpressurePolicy, RegistryConfig};
pub use entry::AppEntry;
pub use error::RegistryError;
pub use group::{BroadcastGroup, BroadcastOutcome};
pub use manager::SinkManager;
pub use message::{Message, SinkId, FIREHOSE_SUBSCRIPTION};
pub use sink::{SendFailure, SinkHandle};
pub use store::{DispatchReport, SinkRegistry};
