//! Per-application registry entry
//!
//! Holds the live sinks streaming one application's logs and the bounded
//! replay buffer served by the recent-logs endpoint.

use std::collections::VecDeque;

use super::message::{Message, SinkId};
use super::sink::{SendFailure, SinkHandle};

/// Sinks and recent messages of a single application
#[derive(Debug)]
pub struct AppEntry {
    sinks: Vec<SinkHandle>,
    recent: VecDeque<Message>,
    recent_capacity: usize,
}

impl AppEntry {
    pub(super) fn new(recent_capacity: usize) -> Self {
        Self {
            sinks: Vec::new(),
            recent: VecDeque::with_capacity(recent_capacity.min(1024)),
            recent_capacity,
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub(super) fn add_sink(&mut self, sink: SinkHandle) -> bool {
        if self.sinks.iter().any(|s| s.id() == sink.id()) {
            return false;
        }
        self.sinks.push(sink);
        true
    }

    pub(super) fn remove_sink(&mut self, id: SinkId) -> bool {
        match self.sinks.iter().position(|s| s.id() == id) {
            Some(index) => {
                let mut sink = self.sinks.remove(index);
                sink.close();
                true
            }
            None => false,
        }
    }

    pub(super) fn close_all(&mut self) -> usize {
        let count = self.sinks.len();
        for mut sink in self.sinks.drain(..) {
            sink.close();
        }
        count
    }

    /// Record a message for replay, evicting the oldest when full
    pub(super) fn remember(&mut self, message: Message) {
        if self.recent_capacity == 0 {
            return;
        }
        while self.recent.len() >= self.recent_capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(message);
    }

    /// Hand a message to every live sink without waiting
    ///
    /// Returns the number of sinks that accepted it. A full sink misses the
    /// message; a closed one is left for its session to unregister. A sink
    /// is reported once when it fills up and once when it drains, not for
    /// every message it misses.
    pub(super) fn deliver(&self, app_id: &str, message: &Message) -> usize {
        let mut delivered = 0;
        for sink in &self.sinks {
            match sink.try_send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    if sink.mark_saturated(false) {
                        tracing::debug!(app_id = %app_id, sink = %sink.id(), "Sink drained, delivery resumed");
                    }
                }
                Err(SendFailure::Full) => {
                    if sink.mark_saturated(true) {
                        tracing::warn!(
                            app_id = %app_id,
                            sink = %sink.id(),
                            "Sink buffer full, dropping messages until it drains"
                        );
                    }
                }
                Err(SendFailure::Closed) => {}
            }
        }
        delivered
    }

    pub(super) fn recent(&self) -> Vec<Message> {
        self.recent.iter().cloned().collect()
    }

    pub(super) fn is_idle(&self) -> bool {
        self.sinks.is_empty() && self.recent.is_empty()
    }
}
