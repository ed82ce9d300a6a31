//! The model-backend contract and the failover orchestrator that sits in
//! front of it (spec §4 components 1 and 4). Concrete vendor HTTP clients
//! are external collaborators and are not implemented in this workspace.

pub mod circuit;
pub mod orchestrator;
pub mod registry;
pub mod traits;

pub use circuit::ProviderState;
pub use orchestrator::{FailoverOrchestrator, OrchestratorMetrics};
pub use registry::BackendRegistry;
pub use traits::{ChatRequest, ChatResponse, ModelBackend, ModelCapabilities, StreamChunk};
