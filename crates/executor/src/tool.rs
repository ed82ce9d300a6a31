//! The tool contract the executor drives. Individual tool implementations
//! are external collaborators (spec §1); this crate only defines the
//! interface and a simple in-memory catalogue for wiring them up.

use std::collections::HashMap;
use std::sync::Arc;

use rt_domain::{ToolCall, ToolErrorKind, ToolResult};

/// One callable tool. Implementations own their own side effects (file IO,
/// subprocess, network); the executor only manages concurrency, timeouts,
/// and retries around the call. A typed [`ToolErrorKind`] lets the
/// executor classify retryability; panics are caught by the executor
/// itself and never need to surface here.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, call: &ToolCall) -> Result<ToolResult, ToolErrorKind>;
}

/// A name → tool lookup table handed to [`crate::parallel::ParallelExecutor`].
#[derive(Default, Clone)]
pub struct ToolCatalogue {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}
