//! Configuration for the sync engine.

use entisync_core::{DeferredEntityPolicy, FilterPolicy};

/// Configuration applied to every run of a [`SyncEngine`](crate::SyncEngine).
///
/// Policies set here are the defaults placed on root contexts; a caller can
/// still override them per context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deferred entity policy for root contexts.
    pub deferred_policy: DeferredEntityPolicy,
    /// Filter policy for root contexts.
    pub filter_policy: FilterPolicy,
    /// Resolve independent placeholder groups on scoped worker threads.
    pub parallel_resolution: bool,
    /// Upper bound on resolution passes in one `resolve` call.
    pub max_resolution_passes: u32,
    /// Allow `READ` to be synthesized from `READ_LIST` for entity types
    /// that opt in.
    pub synthesize_read: bool,
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            deferred_policy: DeferredEntityPolicy::ResolveLate,
            filter_policy: FilterPolicy::ThrowException,
            parallel_resolution: false,
            max_resolution_passes: 16,
            synthesize_read: true,
        }
    }

    /// Sets the default deferred entity policy.
    pub fn with_deferred_policy(mut self, policy: DeferredEntityPolicy) -> Self {
        self.deferred_policy = policy;
        self
    }

    /// Sets the default filter policy.
    pub fn with_filter_policy(mut self, policy: FilterPolicy) -> Self {
        self.filter_policy = policy;
        self
    }

    /// Enables or disables parallel group resolution.
    pub fn with_parallel_resolution(mut self, enabled: bool) -> Self {
        self.parallel_resolution = enabled;
        self
    }

    /// Sets the maximum number of resolution passes.
    ///
    /// A pass resolves everything outstanding; entities built during a
    /// pass may defer more, which the next pass picks up. Zero is treated
    /// as one.
    pub fn with_max_resolution_passes(mut self, passes: u32) -> Self {
        self.max_resolution_passes = passes.max(1);
        self
    }

    /// Enables or disables `READ` synthesis.
    pub fn with_synthesize_read(mut self, enabled: bool) -> Self {
        self.synthesize_read = enabled;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
