//! In-process sink registry
//!
//! Routes ingested messages to the sinks interested in them and keeps the
//! per-application replay buffers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::config::RegistryConfig;
use super::entry::AppEntry;
use super::group::{BroadcastGroup, BroadcastOutcome};
use super::manager::SinkManager;
use super::message::{Message, SinkId};
use super::sink::SinkHandle;

/// Summary of one `dispatch` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Application sinks that accepted the message
    pub app_deliveries: usize,
    /// Firehose groups that handed the message to a member
    pub firehose_deliveries: usize,
    /// Firehose sinks evicted while dispatching
    pub evicted: usize,
}

/// Central registry for application sinks and firehose groups
///
/// Thread-safe via `RwLock`. The firehose map lock is only held to look up,
/// insert or prune a group, never across a group operation: a member
/// stalling its own group must not hold up any other subscription. A pruned
/// group is retired first, so a registration racing the prune retries
/// against a fresh group instead of joining an orphan.
pub struct SinkRegistry {
    /// Application id to live sinks and replay buffer
    apps: RwLock<HashMap<String, AppEntry>>,

    /// Subscription id to its broadcast group
    firehoses: RwLock<HashMap<String, Arc<BroadcastGroup>>>,

    /// Configuration
    config: RegistryConfig,
}

impl SinkRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            apps: RwLock::new(HashMap::new()),
            firehoses: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Route one ingested message
    ///
    /// The message is remembered for replay, offered to every sink of
    /// `app_id`, and broadcast once into every firehose group. Firehose
    /// delivery follows the groups' backpressure policy and may wait on a
    /// slow consumer.
    pub async fn dispatch(&self, app_id: &str, message: Message) -> DispatchReport {
        let mut report = DispatchReport::default();

        {
            let mut apps = self.apps.write().await;
            let entry = apps
                .entry(app_id.to_string())
                .or_insert_with(|| AppEntry::new(self.config.recent_log_capacity));
            entry.remember(message.clone());
            report.app_deliveries = entry.deliver(app_id, &message);
        }

        let groups: Vec<(String, Arc<BroadcastGroup>)> = {
            let firehoses = self.firehoses.read().await;
            firehoses
                .iter()
                .map(|(id, group)| (id.clone(), Arc::clone(group)))
                .collect()
        };

        for (subscription_id, group) in groups {
            match group.broadcast(message.clone()).await {
                BroadcastOutcome::Delivered(_) => report.firehose_deliveries += 1,
                BroadcastOutcome::Evicted(sink) => {
                    report.evicted += 1;
                    tracing::debug!(
                        subscription = %subscription_id,
                        sink = %sink,
                        "Firehose sink evicted during dispatch"
                    );
                }
                BroadcastOutcome::NoSubscribers => {}
            }
        }

        report
    }

    /// Number of live sinks for an application
    pub async fn sink_count(&self, app_id: &str) -> usize {
        let apps = self.apps.read().await;
        apps.get(app_id).map_or(0, AppEntry::sink_count)
    }

    /// Number of members in a firehose subscription's group
    pub async fn firehose_sink_count(&self, subscription_id: &str) -> usize {
        let group = {
            let firehoses = self.firehoses.read().await;
            firehoses.get(subscription_id).cloned()
        };
        match group {
            Some(group) => group.len().await,
            None => 0,
        }
    }

    /// Close every sink and drain every firehose group
    ///
    /// Replay buffers survive. Returns the number of sinks closed.
    pub async fn shutdown(&self) -> usize {
        let mut closed = 0;

        {
            let mut apps = self.apps.write().await;
            for entry in apps.values_mut() {
                closed += entry.close_all();
            }
        }

        let groups: Vec<Arc<BroadcastGroup>> = {
            let mut firehoses = self.firehoses.write().await;
            firehoses.drain().map(|(_, group)| group).collect()
        };
        for group in groups {
            closed += group.retire_and_drain().await;
        }

        tracing::info!(sinks = closed, "Sink registry shut down");
        closed
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkManager for SinkRegistry {
    async fn register_sink(&self, app_id: &str, sink: SinkHandle) -> bool {
        let id = sink.id();
        let mut apps = self.apps.write().await;
        let entry = apps
            .entry(app_id.to_string())
            .or_insert_with(|| AppEntry::new(self.config.recent_log_capacity));

        let added = entry.add_sink(sink);
        if added {
            tracing::info!(
                app_id = %app_id,
                sink = %id,
                sinks = entry.sink_count(),
                "Sink registered"
            );
        }
        added
    }

    async fn unregister_sink(&self, app_id: &str, id: SinkId) -> bool {
        let mut apps = self.apps.write().await;
        let Some(entry) = apps.get_mut(app_id) else {
            return false;
        };

        let removed = entry.remove_sink(id);
        if removed {
            tracing::info!(
                app_id = %app_id,
                sink = %id,
                sinks = entry.sink_count(),
                "Sink unregistered"
            );
        }
        if entry.is_idle() {
            apps.remove(app_id);
        }
        removed
    }

    async fn register_firehose_sink(&self, subscription_id: &str, sink: SinkHandle) -> bool {
        let id = sink.id();
        let mut sink = sink;

        loop {
            let group = {
                let mut firehoses = self.firehoses.write().await;
                let group = firehoses
                    .entry(subscription_id.to_string())
                    .or_insert_with(|| Arc::new(BroadcastGroup::new(self.config.backpressure)));
                Arc::clone(group)
            };

            match group.join(sink).await {
                Ok(added) => {
                    if added {
                        tracing::info!(subscription = %subscription_id, sink = %id, "Firehose sink registered");
                    }
                    return added;
                }
                // Pruned between lookup and join
                Err(returned) => sink = returned,
            }
        }
    }

    async fn unregister_firehose_sink(&self, subscription_id: &str, id: SinkId) -> bool {
        let group = {
            let firehoses = self.firehoses.read().await;
            match firehoses.get(subscription_id) {
                Some(group) => Arc::clone(group),
                None => return false,
            }
        };

        let removed = group.remove(id).await;
        if removed {
            tracing::info!(subscription = %subscription_id, sink = %id, "Firehose sink unregistered");
        }

        let mut firehoses = self.firehoses.write().await;
        let current = firehoses
            .get(subscription_id)
            .is_some_and(|current| Arc::ptr_eq(current, &group));
        if current && group.try_retire() {
            firehoses.remove(subscription_id);
        }
        removed
    }

    async fn recent_logs_for(&self, app_id: &str) -> Vec<Message> {
        let apps = self.apps.read().await;
        apps.get(app_id).map(AppEntry::recent).unwrap_or_default()
    }
}
