//! Registry configuration

/// What `BroadcastGroup::broadcast` does when the selected sink cannot
/// accept a message right away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// Wait for buffer space while holding the group lock.
    ///
    /// A stalled consumer stalls every broadcast into its group until it
    /// drains or disconnects.
    #[default]
    Block,
    /// Evict the selected sink when its buffer is full; the message is dropped.
    Evict,
}

/// Configuration for the sink registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Messages retained per application for replay
    pub recent_log_capacity: usize,

    /// Backpressure behavior of firehose groups
    pub backpressure: BackpressurePolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            recent_log_capacity: 100,
            backpressure: BackpressurePolicy::Block,
        }
    }
}

impl RegistryConfig {
    /// Set the per-application replay buffer size
    pub fn recent_log_capacity(mut self, capacity: usize) -> Self {
        self.recent_log_capacity = capacity;
        self
    }

    /// Set the firehose backpressure policy
    pub fn backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure = policy;
        self
    }
}
