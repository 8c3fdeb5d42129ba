//! Keep-alive tracking
//!
//! On every tick the session sends a ping unless the previous one is still
//! unanswered, in which case the peer is declared dead. Any inbound frame
//! counts as an answer; well-behaved clients reply with a pong.

use std::time::{Duration, Instant};

/// Ping/acknowledge bookkeeping for one session
#[derive(Debug)]
pub struct KeepAlive {
    interval: Duration,
    awaiting_since: Option<Instant>,
    pings_sent: u64,
}

impl KeepAlive {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            awaiting_since: None,
            pings_sent: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Called on each tick; `false` means the previous ping went unanswered
    pub fn should_ping(&self) -> bool {
        self.awaiting_since.is_none()
    }

    /// Record that a ping was written
    pub fn ping_sent(&mut self) -> Vec<u8> {
        self.pings_sent += 1;
        self.awaiting_since = Some(Instant::now());
        self.pings_sent.to_be_bytes().to_vec()
    }

    /// Record any sign of life from the peer
    pub fn acknowledge(&mut self) {
        self.awaiting_since = None;
    }

    /// How long the current ping has been outstanding
    pub fn outstanding(&self) -> Option<Duration> {
        self.awaiting_since.map(|t| t.elapsed())
    }
}
