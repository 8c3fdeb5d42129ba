//! Gateway listener
//!
//! Handles the TCP accept loop and spawns one session per connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::error::Result;
use crate::registry::SinkManager;
use crate::server::config::GatewayConfig;
use crate::server::control::{signalled, GatewayHandle};
use crate::session::Connection;

/// WebSocket fan-out gateway
pub struct Gateway<M: SinkManager> {
    config: GatewayConfig,
    manager: Arc<M>,
    listener: TcpListener,
    local_addr: SocketAddr,
    handle: GatewayHandle,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<M: SinkManager> Gateway<M> {
    /// Bind the listening socket
    ///
    /// The gateway does not accept anything until [`Gateway::run`].
    pub async fn bind(config: GatewayConfig, manager: Arc<M>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Ok(Self {
            config,
            manager,
            listener,
            local_addr,
            handle: GatewayHandle::new(),
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        })
    }

    /// Address actually bound, useful with port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for stopping the gateway from another task
    pub fn handle(&self) -> GatewayHandle {
        self.handle.clone()
    }

    pub fn manager(&self) -> &Arc<M> {
        &self.manager
    }

    /// Accept connections until stopped
    ///
    /// Returns once [`GatewayHandle::stop`] or [`GatewayHandle::shutdown`]
    /// is called. The listening socket is closed on return; sessions already
    /// running keep going unless shutdown was requested.
    pub async fn run(self) -> Result<()> {
        tracing::info!(addr = %self.local_addr, "Log fan-out gateway listening");

        let mut stop = self.handle.stop_signal();
        tokio::select! {
            _ = signalled(&mut stop) => {
                tracing::info!(addr = %self.local_addr, "Gateway stopped accepting connections");
            }
            _ = self.accept_loop() => {}
        }

        Ok(())
    }

    async fn accept_loop(&self) {
        loop {
            match self.listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let mut connection = Connection::new(
            session_id,
            peer_addr,
            &self.config,
            Arc::clone(&self.manager),
            self.handle.shutdown_signal(),
        );

        tokio::spawn(async move {
            let _permit = permit;

            if let Err(e) = connection.run(socket).await {
                tracing::debug!(
                    session_id = session_id,
                    error = %e,
                    "Connection error"
                );
            }

            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }
}
