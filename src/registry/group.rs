//! Round-robin broadcast group
//!
//! A firehose subscription is served by a pool of sinks. Each message is
//! handed to exactly one member, rotating through the members in insertion
//! order, so the pool shares the load of the full stream.
//!
//! Membership changes and broadcasts take the same exclusive lock: a
//! broadcast always sees a complete membership snapshot and advances the
//! cursor atomically with its delivery. The cursor is not fixed up on
//! removal; `broadcast` wraps it back to the first member whenever it has
//! run past the end of a shrunken group.

use tokio::sync::RwLock;

use super::config::BackpressurePolicy;
use super::message::{Message, SinkId};
use super::sink::SinkHandle;

/// Result of a single `broadcast` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// The message was handed to this sink
    Delivered(SinkId),
    /// The selected sink could not accept the message and was removed
    Evicted(SinkId),
    /// The group has no members; the message was dropped
    NoSubscribers,
}

#[derive(Debug, Default)]
struct Members {
    sinks: Vec<SinkHandle>,
    last_used: usize,
    /// Set once the group was taken out of its registry; refuses new members
    retired: bool,
}

/// Concurrency-safe pool of sinks sharing one message stream
#[derive(Debug, Default)]
pub struct BroadcastGroup {
    members: RwLock<Members>,
    policy: BackpressurePolicy,
}

impl BroadcastGroup {
    /// Create an empty group
    pub fn new(policy: BackpressurePolicy) -> Self {
        Self {
            members: RwLock::new(Members::default()),
            policy,
        }
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Add a sink to the group
    ///
    /// Fails without touching the group if a sink with the same identity is
    /// already a member; the rejected handle is dropped, which closes its
    /// channel.
    pub async fn add(&self, sink: SinkHandle) -> bool {
        self.join(sink).await.unwrap_or(false)
    }

    /// Like [`add`](Self::add), but a retired group hands the sink back
    pub(crate) async fn join(&self, sink: SinkHandle) -> Result<bool, SinkHandle> {
        let mut members = self.members.write().await;

        if members.retired {
            return Err(sink);
        }
        if members.sinks.iter().any(|s| s.id() == sink.id()) {
            tracing::debug!(sink = %sink.id(), "Duplicate sink rejected");
            return Ok(false);
        }

        members.sinks.push(sink);
        Ok(true)
    }

    /// Retire the group if it is empty and nobody holds its lock
    ///
    /// Never waits, so it is safe to call with a registry lock held.
    pub(crate) fn try_retire(&self) -> bool {
        match self.members.try_write() {
            Ok(mut members) if members.sinks.is_empty() => {
                members.retired = true;
                true
            }
            _ => false,
        }
    }

    /// Retire the group and close every member
    pub(crate) async fn retire_and_drain(&self) -> usize {
        self.members.write().await.retired = true;
        self.drain_all().await
    }

    /// Close and remove the sink with the given identity
    ///
    /// Remaining members keep their relative order.
    pub async fn remove(&self, id: SinkId) -> bool {
        let mut members = self.members.write().await;

        match members.sinks.iter().position(|s| s.id() == id) {
            Some(index) => {
                let mut sink = members.sinks.remove(index);
                sink.close();
                true
            }
            None => false,
        }
    }

    /// Close and remove every member, returning how many were removed
    pub async fn drain_all(&self) -> usize {
        let mut members = self.members.write().await;
        let drained = std::mem::take(&mut members.sinks);
        members.last_used = 0;

        let count = drained.len();
        for mut sink in drained {
            sink.close();
        }
        count
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.sinks.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.sinks.len()
    }

    /// Hand a message to the next member in rotation
    ///
    /// Under [`BackpressurePolicy::Block`] this waits, with the group lock
    /// held, until the selected sink has buffer space. Every other broadcast
    /// and every add/remove on this group waits with it. Under
    /// [`BackpressurePolicy::Evict`] a full sink is removed instead. In
    /// both modes a sink whose receiver is gone is removed.
    pub async fn broadcast(&self, message: Message) -> BroadcastOutcome {
        let mut members = self.members.write().await;

        if members.sinks.is_empty() {
            return BroadcastOutcome::NoSubscribers;
        }
        if members.last_used >= members.sinks.len() {
            members.last_used = 0;
        }

        let index = members.last_used;
        let sink = &members.sinks[index];
        let id = sink.id();
        let result = match self.policy {
            BackpressurePolicy::Block => sink.send(message).await,
            BackpressurePolicy::Evict => sink.try_send(message),
        };

        match result {
            Ok(()) => {
                members.last_used += 1;
                BroadcastOutcome::Delivered(id)
            }
            Err(failure) => {
                // The next member shifts into `index`, so the cursor stays put.
                let mut evicted = members.sinks.remove(index);
                evicted.close();
                tracing::warn!(sink = %id, reason = ?failure, "Sink evicted from broadcast group");
                BroadcastOutcome::Evicted(id)
            }
        }
    }
}
