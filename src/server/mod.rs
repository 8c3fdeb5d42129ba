//! WebSocket gateway server

pub mod config;
pub mod control;
pub mod listener;

pub use config::GatewayConfig;
pub use control::GatewayHandle;
pub use listener::Gateway;
