//! Gateway sessions
//!
//! A session owns one accepted socket for its whole life: it resolves the
//! request path, upgrades to WebSocket, registers a sink and streams until
//! something ends it.

pub mod connection;
pub mod guard;
pub mod keepalive;
pub mod route;
pub mod state;

pub use connection::Connection;
pub use guard::{Deregistration, Registrar};
pub use keepalive::KeepAlive;
pub use route::{Route, RouteError};
pub use state::{SessionPhase, SessionState, Termination};
