//! Plugin registry (spec §4.6): observers registered in order, snapshot-
//! then-iterate under a read lock, each call wrapped in a panic guard.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::RwLock;
use rt_domain::AgentEvent;

/// An in-process observer of the event stream. Unlike [`crate::sink::Sink`]
/// this is synchronous — plugins are expected to do lightweight work
/// (counters, forwarding to a channel) and never block the emitter.
pub trait Plugin: Send + Sync {
    fn on_event(&self, event: &AgentEvent);
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        self.plugins.write().push(plugin);
    }

    pub fn clear(&self) {
        self.plugins.write().clear();
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }

    /// Snapshot the plugin list under the read lock, then dispatch without
    /// holding it — a plugin that re-enters the registry (e.g. to
    /// register another plugin) can't deadlock.
    pub fn emit(&self, event: &AgentEvent) {
        let snapshot: Vec<Arc<dyn Plugin>> = self.plugins.read().clone();
        for plugin in snapshot {
            if std::panic::catch_unwind(AssertUnwindSafe(move || plugin.on_event(event))).is_err() {
                tracing::warn!("plugin panicked while handling an event");
            }
        }
    }
}

/// A [`crate::sink::Sink`] that forwards every event to the registry.
pub struct PluginSink {
    registry: Arc<PluginRegistry>,
}

impl PluginSink {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl crate::sink::Sink for PluginSink {
    async fn emit(&self, event: AgentEvent) {
        self.registry.emit(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_domain::{EventType, SCHEMA_VERSION};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPlugin(Arc<AtomicUsize>);
    impl Plugin for CountingPlugin {
        fn on_event(&self, _event: &AgentEvent) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct PanickingPlugin;
    impl Plugin for PanickingPlugin {
        fn on_event(&self, _event: &AgentEvent) {
            panic!("boom");
        }
    }

    fn event() -> AgentEvent {
        AgentEvent {
            version: SCHEMA_VERSION,
            event_type: EventType::IterStarted,
            time: chrono::Utc::now(),
            sequence: 0,
            run_id: "r".into(),
            turn_index: 0,
            iter_index: 0,
            payload: None,
        }
    }

    #[test]
    fn one_panicking_plugin_does_not_stop_the_rest() {
        let registry = PluginRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        registry.register(Arc::new(PanickingPlugin));
        registry.register(Arc::new(CountingPlugin(count.clone())));
        registry.emit(&event());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn clear_resets_the_registry() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(PanickingPlugin));
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }
}
