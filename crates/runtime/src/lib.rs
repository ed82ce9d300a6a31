//! The agentic conversation loop: wires a failover-orchestrated model
//! backend, a parallel tool executor, and the event pipeline into the
//! `init → stream → execute_tools → continue → (stream|complete)` cycle.
//!
//! This crate owns the parts of the loop that have no natural home in
//! `rt-domain`/`rt-providers`/`rt-executor`/`rt-events`: cancellation,
//! per-session serialization, tool-name policy, human-in-the-loop
//! approval, context compaction, the async job bridge, and the `Runtime`
//! that drives all of it. `memory_store` ships reference implementations
//! of the external collaborator traits for tests and the CLI demo.

pub mod approval;
pub mod cancel;
pub mod compaction;
pub mod jobs;
pub mod memory_store;
pub mod policy;
pub mod runs;
pub mod runtime;
pub mod session_lock;
pub mod state;

pub use approval::{ApprovalDecision, ApprovalInfo, ApprovalStore, AwaitOutcome};
pub use cancel::{CancelRegistry, CancelToken, Cause};
pub use compaction::{compaction_boundary, CompactionManager, FlushDecision};
pub use jobs::JobQueue;
pub use memory_store::{InMemoryJobStore, InMemorySessionStore, SinglePrimaryBranchStore};
pub use policy::{Decision, ToolPolicy};
pub use runs::{RunRecord, RunRegistry, RunStatus};
pub use runtime::{RunContext, RunHandle, Runtime, RuntimeBuilder};
pub use session_lock::SessionLockMap;
pub use state::{LoopPhase, LoopState};
