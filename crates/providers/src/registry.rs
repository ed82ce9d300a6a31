//! A named catalogue of configured model backends plus their failover
//! chains (spec §4.3 wraps "a primary model backend plus ordered
//! alternates"). Concrete backend construction is external; this registry
//! only holds what's been registered.

use std::collections::HashMap;
use std::sync::Arc;

use rt_domain::FailoverConfig;

use crate::orchestrator::FailoverOrchestrator;
use crate::traits::ModelBackend;

/// Holds one [`FailoverOrchestrator`] per logical chain name (e.g. the
/// default chain, or a per-capability chain the caller wires up).
#[derive(Default)]
pub struct BackendRegistry {
    chains: HashMap<String, Arc<FailoverOrchestrator>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named failover chain: `backends[0]` is primary, the
    /// rest are ordered fallbacks.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        backends: Vec<Arc<dyn ModelBackend>>,
        config: FailoverConfig,
    ) {
        self.chains.insert(
            name.into(),
            Arc::new(FailoverOrchestrator::new(backends, config)),
        );
    }

    pub fn get(&self, name: &str) -> Option<Arc<FailoverOrchestrator>> {
        self.chains.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.chains.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }
}
