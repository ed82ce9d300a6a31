//! Shared domain types for the agentic conversation runtime: the data
//! model, the event schema, configuration, error taxonomy, tool-name
//! policy matching, and the external-collaborator trait contracts.
//!
//! Every other `rt-*` crate depends on this one and nothing else in the
//! workspace depends back on them — this is the bottom of the stack.

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod policy;
pub mod session;
pub mod stats;

pub use config::{
    BackpressureConfig, CompactionConfig, Config, ConfigIssue, ConfigSeverity, ExecutorConfig,
    FailoverConfig, LoopConfig, ResultGuardConfig, ToolOverride,
};
pub use error::{
    Error, LoopError, Phase, ProviderError, ProviderErrorClass, Result, RunErrorCause,
    ToolErrorKind,
};
pub use event::{
    AgentEvent, ContextPayload, ErrorPayload, EventPayload, EventType, StreamPayload,
    ToolPayload, SCHEMA_VERSION,
};
pub use message::{
    Artifact, Attachment, Direction, Message, Role, ToolCall, ToolDefinition, ToolResult,
};
pub use policy::{glob_match, AliasResolver, NoAliases, PatternSet};
pub use session::{
    ApiKeyResolver, BranchStore, JobStatus, JobStore, NoKeys, NoSteering, Session, SessionStore,
    SteeringItem, SteeringQueue,
};
pub use stats::RunStats;
