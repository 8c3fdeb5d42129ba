//! Per-connection gateway session
//!
//! Drives one accepted socket through routing, the WebSocket upgrade,
//! registration and streaming. Streaming waits on four things at once:
//!
//! - inbound frames, read only to notice a close, an error, or a pong
//! - the sink's outbound channel, written to the socket as binary frames
//! - the keep-alive ticker
//! - the gateway's shutdown signal
//!
//! Whichever resolves first decides the [`Termination`]; the sink is then
//! deregistered before the close frame goes out.
//!
//! A write that cannot complete within one keep-alive interval counts as a
//! dead peer, and every write also yields to the shutdown signal, so a
//! consumer that stops reading its socket cannot pin its session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{
    Callback, ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use crate::error::{Error, Result};
use crate::registry::{Message, RegistryError, SinkHandle, SinkId, SinkManager};
use crate::server::config::GatewayConfig;
use crate::server::control::signalled;

use super::guard::{Deregistration, Registrar};
use super::keepalive::KeepAlive;
use super::route::{Route, RouteError};
use super::state::{SessionState, Termination};

/// Upper bound on the closing handshake of a finished session
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// One gateway connection
pub struct Connection<M: SinkManager> {
    state: SessionState,
    keep_alive_interval: Duration,
    sink_buffer_size: usize,
    manager: Arc<M>,
    shutdown: watch::Receiver<bool>,
}

impl<M: SinkManager> Connection<M> {
    /// Create a session for an accepted connection
    pub fn new(
        session_id: u64,
        peer_addr: SocketAddr,
        config: &GatewayConfig,
        manager: Arc<M>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            state: SessionState::new(session_id, peer_addr),
            keep_alive_interval: config.keep_alive_interval,
            sink_buffer_size: config.sink_buffer_size,
            manager,
            shutdown,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Upgrade the socket and serve the resolved endpoint
    ///
    /// Routing happens inside the handshake so that a bad path is answered
    /// with a plain HTTP error and never upgraded.
    pub async fn run(&mut self, socket: TcpStream) -> Result<Option<Termination>> {
        let mut resolved = None;
        let handshake = tokio_tungstenite::accept_hdr_async(
            socket,
            RouteCallback {
                resolved: &mut resolved,
            },
        )
        .await;

        let (ws, route) = match (handshake, resolved) {
            (_, Some(Err(e))) => {
                self.state.reject();
                self.log_rejection(&e);
                return Err(Error::Route(e));
            }
            (Err(e), _) => {
                self.state.reject();
                tracing::debug!(
                    session_id = self.state.id,
                    peer = %self.state.peer_addr,
                    error = %e,
                    "WebSocket upgrade failed"
                );
                return Err(Error::WebSocket(e));
            }
            (Ok(ws), Some(Ok(route))) => (ws, route),
            (Ok(_), None) => {
                self.state.reject();
                return Err(Error::WebSocket(WsError::ConnectionClosed));
            }
        };

        let (write, read) = ws.split();
        self.serve(route, write, read).await
    }

    /// Serve an endpoint over an already upgraded transport
    ///
    /// Returns the termination cause for streaming endpoints and `None`
    /// for a replay.
    pub async fn serve<W, R>(
        &mut self,
        route: Route,
        mut write: W,
        mut read: R,
    ) -> Result<Option<Termination>>
    where
        W: Sink<WsMessage, Error = WsError> + Unpin + Send,
        R: Stream<Item = std::result::Result<WsMessage, WsError>> + Unpin + Send,
    {
        self.state.resolve_route(route.clone());
        self.state.upgrade();

        match route {
            Route::RecentLogs { app_id } => {
                self.replay(&app_id, &mut write).await;
                Ok(None)
            }
            Route::Stream { app_id } => {
                tracing::debug!(session_id = self.state.id, app_id = %app_id, "Requesting a sink for app");
                self.stream(Registrar::App(app_id), &mut write, &mut read)
                    .await
                    .map(Some)
            }
            Route::Firehose { subscription_id } => {
                tracing::debug!(
                    session_id = self.state.id,
                    subscription = %subscription_id,
                    "Requesting a firehose sink"
                );
                self.stream(Registrar::Firehose(subscription_id), &mut write, &mut read)
                    .await
                    .map(Some)
            }
        }
    }

    async fn replay<W>(&mut self, app_id: &str, write: &mut W)
    where
        W: Sink<WsMessage, Error = WsError> + Unpin + Send,
    {
        let messages = self.manager.recent_logs_for(app_id).await;
        tracing::debug!(
            session_id = self.state.id,
            app_id = %app_id,
            count = messages.len(),
            "Sending recent logs"
        );

        for message in messages {
            let sent = send_bounded(
                write,
                binary(message),
                self.keep_alive_interval,
                &mut self.shutdown,
            )
            .await;
            if let Err(reason) = sent {
                tracing::debug!(
                    session_id = self.state.id,
                    reason = ?reason,
                    "Failed to send recent log, giving up"
                );
                break;
            }
            self.state.messages_sent += 1;
        }

        self.state.deregister();
        close(write, CloseCode::Normal, "", self.keep_alive_interval).await;
    }

    async fn stream<W, R>(
        &mut self,
        registrar: Registrar,
        write: &mut W,
        read: &mut R,
    ) -> Result<Termination>
    where
        W: Sink<WsMessage, Error = WsError> + Unpin + Send,
        R: Stream<Item = std::result::Result<WsMessage, WsError>> + Unpin + Send,
    {
        let sink_id = SinkId(self.state.id);
        let (sink, outbound) = SinkHandle::channel(sink_id, self.sink_buffer_size);

        if !registrar.register(self.manager.as_ref(), sink).await {
            self.state.reject();
            tracing::warn!(
                session_id = self.state.id,
                registrar = ?registrar,
                "Sink already connected, closing"
            );
            close(write, CloseCode::Policy, "already connected", self.keep_alive_interval).await;
            return Err(RegistryError::DuplicateSink(sink_id).into());
        }

        let mut deregistration = Deregistration::new(Arc::clone(&self.manager), registrar, sink_id);
        self.state.register();
        self.state.start_streaming();

        let termination = pump(
            write,
            read,
            outbound,
            KeepAlive::new(self.keep_alive_interval),
            &mut self.shutdown,
            &mut self.state.messages_sent,
        )
        .await;

        self.state.terminate(termination);
        deregistration.release().await;
        self.state.deregister();

        tracing::debug!(
            session_id = self.state.id,
            reason = ?termination,
            messages = self.state.messages_sent,
            duration_ms = self.state.duration().as_millis() as u64,
            "Sink session ended"
        );

        close(write, CloseCode::Normal, "", self.keep_alive_interval).await;
        Ok(termination)
    }

    fn log_rejection(&self, error: &RouteError) {
        match error {
            RouteError::NotFound(path) => {
                tracing::debug!(session_id = self.state.id, path = %path, "Rejected unknown path");
            }
            RouteError::MissingAppId { .. } | RouteError::MissingSubscriptionId => {
                tracing::warn!(
                    peer = %self.state.peer_addr,
                    error = %error,
                    "Did not accept sink connection with invalid id"
                );
            }
        }
    }
}

/// Resolves the route during the handshake and answers bad paths
struct RouteCallback<'a> {
    resolved: &'a mut Option<std::result::Result<Route, RouteError>>,
}

impl Callback for RouteCallback<'_> {
    fn on_request(
        self,
        request: &Request,
        response: Response,
    ) -> std::result::Result<Response, ErrorResponse> {
        let resolved = Route::resolve(request.uri().path());
        let result = match &resolved {
            Ok(_) => Ok(response),
            Err(e) => Err(error_response(e)),
        };
        *self.resolved = Some(resolved);
        result
    }
}

fn error_response(error: &RouteError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(error.to_string()));
    *response.status_mut() =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Basic"));
    response
}

async fn pump<W, R>(
    write: &mut W,
    read: &mut R,
    mut outbound: mpsc::Receiver<Message>,
    mut keep_alive: KeepAlive,
    shutdown: &mut watch::Receiver<bool>,
    sent: &mut u64,
) -> Termination
where
    W: Sink<WsMessage, Error = WsError> + Unpin + Send,
    R: Stream<Item = std::result::Result<WsMessage, WsError>> + Unpin + Send,
{
    let interval = keep_alive.interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Close(_))) | None => return Termination::PeerClosed,
                Some(Ok(_)) => keep_alive.acknowledge(),
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Read failed");
                    return Termination::ReadError;
                }
            },

            message = outbound.recv() => match message {
                Some(message) => {
                    if let Err(reason) = send_bounded(write, binary(message), interval, shutdown).await {
                        return reason;
                    }
                    *sent += 1;
                }
                None => return Termination::SinkClosed,
            },

            _ = ticker.tick() => {
                if !keep_alive.should_ping() {
                    tracing::debug!(
                        outstanding_ms = keep_alive.outstanding().map_or(0, |d| d.as_millis() as u64),
                        "Keep-alive expired"
                    );
                    return Termination::KeepAliveTimeout;
                }
                let payload = keep_alive.ping_sent();
                if let Err(reason) = send_bounded(write, WsMessage::Ping(payload), interval, shutdown).await {
                    return reason;
                }
            },

            _ = signalled(shutdown) => return Termination::Shutdown,
        }
    }
}

/// Write one frame, giving up after `limit` or on shutdown
async fn send_bounded<W>(
    write: &mut W,
    frame: WsMessage,
    limit: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> std::result::Result<(), Termination>
where
    W: Sink<WsMessage, Error = WsError> + Unpin + Send,
{
    tokio::select! {
        sent = tokio::time::timeout(limit, write.send(frame)) => match sent {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Write failed");
                Err(Termination::WriteError)
            }
            Err(_) => {
                tracing::debug!(limit_ms = limit.as_millis() as u64, "Write stalled, peer not reading");
                Err(Termination::KeepAliveTimeout)
            }
        },
        _ = signalled(shutdown) => Err(Termination::Shutdown),
    }
}

fn binary(message: Message) -> WsMessage {
    WsMessage::Binary(Vec::from(message.into_payload()))
}

/// Best-effort close frame followed by closing the sink
///
/// Bounded by the smaller of `limit` and [`CLOSE_GRACE`].
async fn close<W>(write: &mut W, code: CloseCode, reason: &'static str, limit: Duration)
where
    W: Sink<WsMessage, Error = WsError> + Unpin + Send,
{
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let closing = async {
        if let Err(e) = write.send(WsMessage::Close(Some(frame))).await {
            tracing::trace!(error = %e, "Close frame not sent");
        }
        if let Err(e) = write.close().await {
            tracing::trace!(error = %e, "Transport close failed");
        }
    };
    if tokio::time::timeout(limit.min(CLOSE_GRACE), closing).await.is_err() {
        tracing::trace!("Close handshake timed out");
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::net::{IpAddr, Ipv4Addr};
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    use futures_util::stream;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::WebSocketStream;

    use super::*;
    use crate::registry::SinkRegistry;
    use crate::session::state::SessionPhase;

    /// Registry wrapper counting effective removals
    #[derive(Default)]
    struct CountingRegistry {
        inner: SinkRegistry,
        removals: AtomicUsize,
    }

    impl SinkManager for CountingRegistry {
        async fn register_sink(&self, app_id: &str, sink: SinkHandle) -> bool {
            self.inner.register_sink(app_id, sink).await
        }

        async fn unregister_sink(&self, app_id: &str, id: SinkId) -> bool {
            let removed = self.inner.unregister_sink(app_id, id).await;
            if removed {
                self.removals.fetch_add(1, Ordering::SeqCst);
            }
            removed
        }

        async fn register_firehose_sink(&self, subscription_id: &str, sink: SinkHandle) -> bool {
            self.inner.register_firehose_sink(subscription_id, sink).await
        }

        async fn unregister_firehose_sink(&self, subscription_id: &str, id: SinkId) -> bool {
            let removed = self.inner.unregister_firehose_sink(subscription_id, id).await;
            if removed {
                self.removals.fetch_add(1, Ordering::SeqCst);
            }
            removed
        }

        async fn recent_logs_for(&self, app_id: &str) -> Vec<Message> {
            self.inner.recent_logs_for(app_id).await
        }
    }

    /// Transport whose writes always fail
    struct BrokenPipe;

    impl Sink<WsMessage> for BrokenPipe {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), WsError>> {
            Poll::Ready(Err(WsError::ConnectionClosed))
        }

        fn start_send(self: Pin<&mut Self>, _item: WsMessage) -> std::result::Result<(), WsError> {
            Err(WsError::ConnectionClosed)
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), WsError>> {
            Poll::Ready(Err(WsError::ConnectionClosed))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Transport of a peer that stopped reading: never ready for a frame
    struct StalledPipe;

    impl Sink<WsMessage> for StalledPipe {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), WsError>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: WsMessage) -> std::result::Result<(), WsError> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), WsError>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), WsError>> {
            Poll::Pending
        }
    }

    type ServerWrite = futures_util::stream::SplitSink<WebSocketStream<DuplexStream>, WsMessage>;
    type ServerRead = futures_util::stream::SplitStream<WebSocketStream<DuplexStream>>;

    async fn ws_pair() -> (ServerWrite, ServerRead, WebSocketStream<DuplexStream>) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let (write, read) = server.split();
        (write, read, client)
    }

    fn accept_all() -> impl Sink<WsMessage, Error = WsError> + Unpin + Send {
        futures_util::sink::drain().sink_map_err(|never: Infallible| -> WsError { match never {} })
    }

    fn never_reads() -> impl Stream<Item = std::result::Result<WsMessage, WsError>> + Unpin + Send {
        stream::pending()
    }

    fn connection<M: SinkManager>(
        manager: &Arc<M>,
        keep_alive: Duration,
    ) -> (Connection<M>, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = GatewayConfig::default().keep_alive_interval(keep_alive);
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 50000);
        let conn = Connection::new(7, peer, &config, Arc::clone(manager), shutdown_rx);
        (conn, shutdown_tx)
    }

    async fn wait_for<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn stream_route() -> Route {
        Route::Stream {
            app_id: "app".into(),
        }
    }

    #[tokio::test]
    async fn test_streams_until_peer_closes() {
        let registry = Arc::new(CountingRegistry::default());
        let (mut conn, _shutdown) = connection(&registry, Duration::from_secs(30));
        let (write, read, mut client) = ws_pair().await;

        let session = tokio::spawn(async move {
            let result = conn.serve(stream_route(), write, read).await;
            (conn, result)
        });

        let inner = Arc::clone(&registry);
        wait_for(|| {
            let inner = Arc::clone(&inner);
            async move { inner.inner.sink_count("app").await == 1 }
        })
        .await;

        registry.inner.dispatch("app", Message::from("log line")).await;
        let frame = client.next().await.unwrap().unwrap();
        assert_eq!(frame, WsMessage::Binary(b"log line".to_vec()));

        client.close(None).await.unwrap();

        let (conn, result) = session.await.unwrap();
        assert_eq!(result.unwrap(), Some(Termination::PeerClosed));
        assert_eq!(conn.state().phase, SessionPhase::Deregistered);
        assert_eq!(conn.state().messages_sent, 1);
        assert_eq!(registry.inner.sink_count("app").await, 0);
        assert_eq!(registry.removals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keep_alive_timeout_deregisters() {
        let registry = Arc::new(CountingRegistry::default());
        let (mut conn, _shutdown) = connection(&registry, Duration::from_millis(20));

        let result = conn
            .serve(stream_route(), accept_all(), never_reads())
            .await
            .unwrap();

        assert_eq!(result, Some(Termination::KeepAliveTimeout));
        assert_eq!(conn.state().phase, SessionPhase::Deregistered);
        assert_eq!(registry.inner.sink_count("app").await, 0);
        assert_eq!(registry.removals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pong_keeps_session_alive() {
        let registry = Arc::new(CountingRegistry::default());
        let (mut conn, shutdown) = connection(&registry, Duration::from_millis(40));
        let (write, read, mut client) = ws_pair().await;

        let session = tokio::spawn(async move {
            let result = conn.serve(stream_route(), write, read).await;
            (conn, result)
        });

        // Reading lets the client answer pings; survive several intervals
        let reader = tokio::spawn(async move {
            while let Some(Ok(_)) = client.next().await {}
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!session.is_finished());

        shutdown.send_replace(true);
        let (_, result) = session.await.unwrap();
        assert_eq!(result.unwrap(), Some(Termination::Shutdown));
        assert_eq!(registry.removals.load(Ordering::SeqCst), 1);
        reader.abort();
    }

    #[tokio::test]
    async fn test_write_error_deregisters() {
        let registry = Arc::new(CountingRegistry::default());
        let (mut conn, _shutdown) = connection(&registry, Duration::from_secs(30));

        let inner = Arc::clone(&registry);
        let ingest = tokio::spawn(async move {
            wait_for(|| {
                let inner = Arc::clone(&inner);
                async move { inner.inner.sink_count("app").await == 1 }
            })
            .await;
            inner.inner.dispatch("app", Message::from("doomed")).await;
        });

        let result = conn
            .serve(stream_route(), BrokenPipe, never_reads())
            .await
            .unwrap();
        ingest.await.unwrap();

        assert_eq!(result, Some(Termination::WriteError));
        assert_eq!(registry.inner.sink_count("app").await, 0);
        assert_eq!(registry.removals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stalled_writer_hits_keep_alive() {
        let registry = Arc::new(CountingRegistry::default());
        let (mut conn, _shutdown) = connection(&registry, Duration::from_millis(20));

        let inner = Arc::clone(&registry);
        let ingest = tokio::spawn(async move {
            wait_for(|| {
                let inner = Arc::clone(&inner);
                async move { inner.inner.sink_count("app").await == 1 }
            })
            .await;
            inner.inner.dispatch("app", Message::from("never written")).await;
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            conn.serve(stream_route(), StalledPipe, never_reads()),
        )
        .await
        .expect("stalled session never ended")
        .unwrap();
        ingest.await.unwrap();

        assert_eq!(result, Some(Termination::KeepAliveTimeout));
        assert_eq!(conn.state().phase, SessionPhase::Deregistered);
        assert_eq!(registry.inner.sink_count("app").await, 0);
        assert_eq!(registry.removals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_stalled_write() {
        let registry = Arc::new(CountingRegistry::default());
        let (mut conn, shutdown) = connection(&registry, Duration::from_secs(30));

        let inner = Arc::clone(&registry);
        let ingest = tokio::spawn(async move {
            wait_for(|| {
                let inner = Arc::clone(&inner);
                async move { inner.inner.firehose_sink_count("pool").await == 1 }
            })
            .await;
            inner.inner.dispatch("app", Message::from("stuck")).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.send_replace(true);
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            conn.serve(
                Route::Firehose {
                    subscription_id: "pool".into(),
                },
                StalledPipe,
                never_reads(),
            ),
        )
        .await
        .expect("shutdown did not reach a stalled session")
        .unwrap();
        ingest.await.unwrap();

        assert_eq!(result, Some(Termination::Shutdown));
        assert_eq!(registry.inner.firehose_sink_count("pool").await, 0);
        assert_eq!(registry.removals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_already_signalled() {
        let registry = Arc::new(CountingRegistry::default());
        let (mut conn, shutdown) = connection(&registry, Duration::from_secs(30));
        shutdown.send_replace(true);

        let result = conn
            .serve(
                Route::Firehose {
                    subscription_id: "pool".into(),
                },
                accept_all(),
                never_reads(),
            )
            .await
            .unwrap();

        assert_eq!(result, Some(Termination::Shutdown));
        assert_eq!(registry.inner.firehose_sink_count("pool").await, 0);
        assert_eq!(registry.removals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drained_group_ends_session() {
        let registry = Arc::new(CountingRegistry::default());
        let (mut conn, _shutdown) = connection(&registry, Duration::from_secs(30));

        let inner = Arc::clone(&registry);
        let drain = tokio::spawn(async move {
            wait_for(|| {
                let inner = Arc::clone(&inner);
                async move { inner.inner.firehose_sink_count("pool").await == 1 }
            })
            .await;
            inner.inner.shutdown().await
        });

        let result = conn
            .serve(
                Route::Firehose {
                    subscription_id: "pool".into(),
                },
                accept_all(),
                never_reads(),
            )
            .await
            .unwrap();

        assert_eq!(drain.await.unwrap(), 1);
        assert_eq!(result, Some(Termination::SinkClosed));
        assert_eq!(conn.state().phase, SessionPhase::Deregistered);
        // The drain already removed it; the session's own removal is a no-op
        assert_eq!(registry.removals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_racing_causes_deregister_once() {
        let registry = Arc::new(CountingRegistry::default());
        let (mut conn, shutdown) = connection(&registry, Duration::from_millis(10));
        let (write, read, mut client) = ws_pair().await;

        let session = tokio::spawn(async move {
            let result = conn.serve(stream_route(), write, read).await;
            (conn, result)
        });

        let inner = Arc::clone(&registry);
        wait_for(|| {
            let inner = Arc::clone(&inner);
            async move { inner.inner.sink_count("app").await == 1 }
        })
        .await;

        // Peer close, shutdown and keep-alive expiry all land together
        let _ = client.close(None).await;
        shutdown.send_replace(true);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let (conn, result) = session.await.unwrap();
        assert!(result.unwrap().is_some());
        assert_eq!(conn.state().phase, SessionPhase::Deregistered);
        assert_eq!(registry.removals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replay_sends_buffer_in_order() {
        let registry = Arc::new(CountingRegistry::default());
        for payload in ["first", "second", "third"] {
            registry.inner.dispatch("app", Message::from(payload)).await;
        }
        let (mut conn, _shutdown) = connection(&registry, Duration::from_secs(30));
        let (write, read, mut client) = ws_pair().await;

        let result = conn
            .serve(
                Route::RecentLogs {
                    app_id: "app".into(),
                },
                write,
                read,
            )
            .await
            .unwrap();
        assert_eq!(result, None);

        for expected in ["first", "second", "third"] {
            let frame = client.next().await.unwrap().unwrap();
            assert_eq!(frame, WsMessage::Binary(expected.as_bytes().to_vec()));
        }
        assert!(matches!(
            client.next().await,
            Some(Ok(WsMessage::Close(_))) | None
        ));

        assert_eq!(conn.state().phase, SessionPhase::Deregistered);
        assert_eq!(conn.state().messages_sent, 3);
        assert_eq!(registry.inner.sink_count("app").await, 0);
        assert_eq!(registry.removals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_sink_is_rejected() {
        let registry = Arc::new(CountingRegistry::default());
        let (existing, _rx) = SinkHandle::channel(SinkId(7), 4);
        assert!(registry.register_sink("app", existing).await);

        let (mut conn, _shutdown) = connection(&registry, Duration::from_secs(30));
        let (write, read, mut client) = ws_pair().await;

        let result = conn.serve(stream_route(), write, read).await;

        assert!(matches!(
            result,
            Err(Error::Registry(RegistryError::DuplicateSink(SinkId(7))))
        ));
        assert_eq!(conn.state().phase, SessionPhase::Rejected);
        match client.next().await {
            Some(Ok(WsMessage::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Policy),
            other => panic!("expected close frame, got {other:?}"),
        }
        // The first sink is untouched
        assert_eq!(registry.inner.sink_count("app").await, 1);
    }

    #[test]
    fn test_error_response_for_missing_app_id() {
        let response = error_response(&RouteError::MissingAppId { endpoint: "stream" });

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic"
        );
        assert_eq!(
            response.body().as_deref(),
            Some("App ID missing. Make request to /apps/APP_ID/stream")
        );
    }

    #[test]
    fn test_error_response_for_unknown_path() {
        let response = error_response(&RouteError::NotFound("/nope".into()));

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body().as_deref(), Some("Resource Not Found. /nope"));
    }
}
