//! Session state machine
//!
//! Tracks one gateway connection from accept to deregistration.
//!
//! ```text
//! Accepted ─► RouteResolved ─► Upgraded ─► Registered ─► Streaming ─► Deregistered
//!     │              │             │            │
//!     └──────────────┴─────────────┴────────────┴──► Rejected
//! ```
//!
//! Replay connections go `Upgraded ─► Deregistered` directly: they are
//! never registered anywhere.

use std::net::SocketAddr;
use std::time::Instant;

use super::route::Route;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// TCP connected, request not yet read
    Accepted,
    /// Request path mapped to an endpoint
    RouteResolved,
    /// WebSocket handshake complete
    Upgraded,
    /// Sink handed to its registrar
    Registered,
    /// Pumping messages and keep-alives
    Streaming,
    /// Sink removed from its registrar; terminal
    Deregistered,
    /// Refused before anything was registered; terminal
    Rejected,
}

/// Why a streaming session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Peer sent a close frame or the stream ended
    PeerClosed,
    /// Reading from the transport failed
    ReadError,
    /// Writing to the transport failed
    WriteError,
    /// A keep-alive ping went unanswered for a full interval
    KeepAliveTimeout,
    /// The registrar closed the sink (eviction, drain)
    SinkClosed,
    /// The gateway asked every session to end
    Shutdown,
}

/// State of one gateway session
#[derive(Debug)]
pub struct SessionState {
    /// Unique session id, also the sink identity
    pub id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: SessionPhase,

    /// Resolved endpoint
    pub route: Option<Route>,

    /// Connection start time
    pub connected_at: Instant,

    /// Time the sink started streaming
    pub streaming_since: Option<Instant>,

    /// Why streaming ended
    pub termination: Option<Termination>,

    /// Messages written to the transport
    pub messages_sent: u64,
}

impl SessionState {
    /// Create a new session state
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: SessionPhase::Accepted,
            route: None,
            connected_at: Instant::now(),
            streaming_since: None,
            termination: None,
            messages_sent: 0,
        }
    }

    /// Record the endpoint the request path resolved to
    pub fn resolve_route(&mut self, route: Route) {
        if self.phase == SessionPhase::Accepted {
            self.route = Some(route);
            self.phase = SessionPhase::RouteResolved;
        }
    }

    /// Complete the transport upgrade
    pub fn upgrade(&mut self) {
        if self.phase == SessionPhase::RouteResolved {
            self.phase = SessionPhase::Upgraded;
        }
    }

    /// Sink accepted by its registrar
    pub fn register(&mut self) {
        if self.phase == SessionPhase::Upgraded {
            self.phase = SessionPhase::Registered;
        }
    }

    /// Start pumping messages
    pub fn start_streaming(&mut self) {
        if self.phase == SessionPhase::Registered {
            self.phase = SessionPhase::Streaming;
            self.streaming_since = Some(Instant::now());
        }
    }

    /// Record why streaming stopped
    pub fn terminate(&mut self, reason: Termination) {
        if self.termination.is_none() {
            self.termination = Some(reason);
        }
    }

    /// Session finished after holding resources
    pub fn deregister(&mut self) {
        if !self.is_finished() {
            self.phase = SessionPhase::Deregistered;
        }
    }

    /// Session refused before registration
    pub fn reject(&mut self) {
        if matches!(
            self.phase,
            SessionPhase::Accepted | SessionPhase::RouteResolved | SessionPhase::Upgraded
        ) {
            self.phase = SessionPhase::Rejected;
        }
    }

    /// Whether the session reached a terminal phase
    pub fn is_finished(&self) -> bool {
        matches!(
            self.phase,
            SessionPhase::Deregistered | SessionPhase::Rejected
        )
    }

    /// Get session duration
    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}
