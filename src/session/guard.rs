//! Scoped deregistration
//!
//! A [`Deregistration`] is created the moment a registrar accepts a sink.
//! Whatever ends the session, the sink is removed exactly once: either by
//! an explicit [`Deregistration::release`] on the normal exit path, or from
//! `Drop` when the session future is dropped or unwinds.

use std::sync::Arc;

use crate::registry::{SinkHandle, SinkId, SinkManager};

/// Where a sink is registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registrar {
    /// Per-application sink list
    App(String),
    /// Broadcast group of a firehose subscription
    Firehose(String),
}

impl Registrar {
    pub(crate) async fn register<M: SinkManager>(
        &self,
        manager: &M,
        sink: SinkHandle,
    ) -> bool {
        match self {
            Registrar::App(app_id) => manager.register_sink(app_id, sink).await,
            Registrar::Firehose(subscription_id) => {
                manager.register_firehose_sink(subscription_id, sink).await
            }
        }
    }

    pub(crate) async fn unregister<M: SinkManager>(&self, manager: &M, id: SinkId) -> bool {
        match self {
            Registrar::App(app_id) => manager.unregister_sink(app_id, id).await,
            Registrar::Firehose(subscription_id) => {
                manager.unregister_firehose_sink(subscription_id, id).await
            }
        }
    }
}

/// Pending removal of one registered sink
pub struct Deregistration<M: SinkManager> {
    manager: Arc<M>,
    pending: Option<(Registrar, SinkId)>,
}

impl<M: SinkManager> Deregistration<M> {
    pub fn new(manager: Arc<M>, registrar: Registrar, id: SinkId) -> Self {
        Self {
            manager,
            pending: Some((registrar, id)),
        }
    }

    /// Whether the sink is still registered through this guard
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Remove the sink now
    ///
    /// Returns whether the registrar still held it. Later calls, and the
    /// eventual drop, do nothing.
    pub async fn release(&mut self) -> bool {
        match self.pending.take() {
            Some((registrar, id)) => registrar.unregister(self.manager.as_ref(), id).await,
            None => false,
        }
    }
}

impl<M: SinkManager> Drop for Deregistration<M> {
    fn drop(&mut self) {
        let Some((registrar, id)) = self.pending.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::debug!(sink = %id, registrar = ?registrar, "Deregistering sink from drop");
                let manager = Arc::clone(&self.manager);
                runtime.spawn(async move {
                    registrar.unregister(manager.as_ref(), id).await;
                });
            }
            Err(_) => {
                tracing::warn!(sink = %id, registrar = ?registrar, "No runtime to deregister sink");
            }
        }
    }
}
