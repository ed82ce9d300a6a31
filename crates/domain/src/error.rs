//! Error taxonomy shared across every `rt-*` crate (spec §7).

use std::time::Duration;

/// Errors a tool execution can fail with.
///
/// The retryable set is `{Timeout, Network, RateLimit}` — see
/// [`ToolErrorKind::is_retryable`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolErrorKind {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("timeout")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("rate limited")]
    RateLimit,
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("tool panicked: {0}")]
    Panic(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl ToolErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ToolErrorKind::Timeout | ToolErrorKind::Network(_) | ToolErrorKind::RateLimit
        )
    }
}

/// A loop-phase-tagged error that terminates a run (spec §7 "Loop errors").
#[derive(thiserror::Error, Debug, Clone)]
#[error("loop error in phase {phase} (iteration {iteration}): {cause}")]
pub struct LoopError {
    pub phase: Phase,
    pub iteration: u32,
    pub cause: String,
}

/// The phases of the loop state machine (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Stream,
    ExecuteTools,
    Continue,
    Complete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Init => "init",
            Phase::Stream => "stream",
            Phase::ExecuteTools => "execute_tools",
            Phase::Continue => "continue",
            Phase::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

/// Terminal run-level error causes (spec §7 "Run errors").
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RunErrorCause {
    #[error("maximum iterations reached")]
    MaxIterations,
    #[error("maximum tool calls reached")]
    MaxToolCalls,
    #[error("no model backend available")]
    NoProvider,
    #[error("run cancelled")]
    ContextCancelled,
    #[error("run timed out")]
    ContextTimedOut,
    #[error("output backpressure exceeded")]
    Backpressure,
    #[error("{0}")]
    Other(String),
}

/// Classification used by the failover orchestrator (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorClass {
    RateLimit,
    Timeout,
    Auth,
    Billing,
    ModelUnavailable,
    ServerError,
    InvalidRequest,
    Unknown,
}

impl ProviderErrorClass {
    /// Classes that always trigger failover regardless of retry budget.
    pub fn always_failover(&self) -> bool {
        matches!(
            self,
            ProviderErrorClass::Billing
                | ProviderErrorClass::Auth
                | ProviderErrorClass::ModelUnavailable
        )
    }
}

/// Top-level error for the model-backend/failover path.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ProviderError {
    #[error("provider {provider}: {message}")]
    Backend {
        provider: String,
        message: String,
        class: ProviderErrorClass,
    },
    #[error("provider {provider} timed out after {0:?}", .elapsed)]
    Timeout { provider: String, elapsed: Duration },
    #[error("all providers exhausted for this request")]
    Exhausted,
    #[error("circuit open for provider {0}")]
    CircuitOpen(String),
}

impl ProviderError {
    pub fn class(&self) -> ProviderErrorClass {
        match self {
            ProviderError::Backend { class, .. } => *class,
            ProviderError::Timeout { .. } => ProviderErrorClass::Timeout,
            ProviderError::Exhausted | ProviderError::CircuitOpen(_) => {
                ProviderErrorClass::Unknown
            }
        }
    }
}

/// Umbrella error type for ambient plumbing (config/io/json) shared by all crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config: {0}")]
    Config(String),
    #[error(transparent)]
    Loop(#[from] LoopError),
    #[error("run error: {0}")]
    Run(#[from] RunErrorCause),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
