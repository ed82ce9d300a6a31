//! Small in-memory reference implementations of the external-collaborator
//! traits (spec session.rs doc comment: "`rt-runtime` ships small in-memory
//! reference implementations for tests and the CLI demo"). Not meant for
//! production use — no persistence across process restarts, no sharding.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use rt_domain::{BranchStore, JobStatus, JobStore, Message, Result, SessionStore, ToolCall};

/// An in-process, per-session append-only message log.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Vec<Message>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load_recent(&self, session_id: &str, cap: usize) -> Result<Vec<Message>> {
        let sessions = self.sessions.lock();
        let messages = sessions.get(session_id).cloned().unwrap_or_default();
        let start = messages.len().saturating_sub(cap);
        Ok(messages[start..].to_vec())
    }

    async fn append(&self, session_id: &str, message: Message) -> Result<()> {
        self.sessions
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .push(message);
        Ok(())
    }
}

/// Every session has exactly one branch, named after the session itself.
#[derive(Default)]
pub struct SinglePrimaryBranchStore;

#[async_trait]
impl BranchStore for SinglePrimaryBranchStore {
    async fn ensure_primary_branch(&self, session_id: &str) -> Result<String> {
        Ok(format!("{session_id}::primary"))
    }
}

/// Job bookkeeping with no execution side effects of its own — pairs with
/// [`crate::jobs::JobQueue`], which drives the actual work.
#[derive(Default)]
pub struct InMemoryJobStore {
    statuses: Mutex<HashMap<String, JobStatus>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.statuses.lock().get(job_id).copied()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, _call: &ToolCall) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.statuses.lock().insert(id.clone(), JobStatus::Queued);
        Ok(id)
    }

    async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        self.statuses.lock().insert(job_id.to_string(), status);
        Ok(())
    }
}
