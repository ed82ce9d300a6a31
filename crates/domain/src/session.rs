//! External collaborator contracts (spec §1 "treated as external
//! collaborators with minimal interface contracts", §9 design notes).
//!
//! The loop consumes these through narrow traits; concrete implementations
//! (a real database-backed session store, a production job queue, a
//! telephony steering bridge) live outside this workspace. `rt-runtime`
//! ships small in-memory reference implementations for tests and the CLI
//! demo.

use async_trait::async_trait;

use crate::error::Result;
use crate::message::{Message, ToolCall};

/// Session identity (spec §3 "Session").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub channel: String,
    pub channel_id: String,
}

/// Append-only message persistence. The loop never updates a message in
/// place — only appends (spec §6 "Persistence contract").
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_recent(&self, session_id: &str, cap: usize) -> Result<Vec<Message>>;
    async fn append(&self, session_id: &str, message: Message) -> Result<()>;
}

/// Optional branch store. When present, the loop resolves a primary branch
/// at init and scopes all persistence to it.
#[async_trait]
pub trait BranchStore: Send + Sync {
    /// Ensure a primary branch exists for `session_id`, returning its ID.
    async fn ensure_primary_branch(&self, session_id: &str) -> Result<String>;
}

/// Status of an asynchronously-dispatched tool job (spec §4.1 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Fire-and-record store for async-dispatched tool jobs. The run itself
/// never awaits a job's completion — only records that it was queued.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, call: &ToolCall) -> Result<String>;
    async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<()>;
}

/// One item read from the steering/interjection mailbox between phases
/// (spec §9: "a bounded mailbox the core reads from, never writes").
#[derive(Debug, Clone)]
pub enum SteeringItem {
    /// Append as a new user turn and loop once more after `complete`.
    Followup(String),
    /// Inject mid-run; `skip_remaining_tools` short-circuits the current
    /// execute-tools batch.
    Interject {
        content: String,
        skip_remaining_tools: bool,
    },
}

/// A bounded mailbox of externally-injected steering messages, polled by
/// the loop between phases. Never written to by the core.
pub trait SteeringQueue: Send + Sync {
    /// Drain all currently-queued items (non-blocking).
    fn drain(&self) -> Vec<SteeringItem>;
}

/// A [`SteeringQueue`] with nothing queued, ever.
pub struct NoSteering;
impl SteeringQueue for NoSteering {
    fn drain(&self) -> Vec<SteeringItem> {
        Vec::new()
    }
}

/// Resolves the API key/credential used to authenticate a model-backend
/// request. Consumed once per stream phase (spec §4.1).
pub trait ApiKeyResolver: Send + Sync {
    fn resolve(&self, provider: &str) -> Option<String>;
}

/// An [`ApiKeyResolver`] that always returns `None` (unauthenticated / local
/// backend).
pub struct NoKeys;
impl ApiKeyResolver for NoKeys {
    fn resolve(&self, _provider: &str) -> Option<String> {
        None
    }
}
