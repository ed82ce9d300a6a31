//! Pending-approval store for gated tool calls (spec §4.1 step 3: a
//! `Pending` decision suspends the iteration until a decision arrives out
//! of band — an operator approving or denying via some external surface).
//!
//! Adapted from the teacher's oneshot-channel approval queue: each pending
//! call gets a one-shot receiver the loop worker awaits, and a handle the
//! external caller resolves by ID.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum ApprovalDecision {
    Approved,
    Denied { reason: Option<String> },
}

struct PendingApproval {
    call_id: String,
    tool_name: String,
    run_id: String,
    created_at: DateTime<Utc>,
    respond: oneshot::Sender<ApprovalDecision>,
}

/// Snapshot of a pending approval, safe to hand to an external caller (an
/// admin UI, a CLI prompt) without exposing the response channel.
#[derive(Debug, Clone)]
pub struct ApprovalInfo {
    pub id: Uuid,
    pub call_id: String,
    pub tool_name: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
}

/// An approval request's outcome after awaiting a decision or timing out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwaitOutcome {
    Approved,
    Denied(Option<String>),
    TimedOut,
}

pub struct ApprovalStore {
    pending: RwLock<HashMap<Uuid, PendingApproval>>,
    timeout: Duration,
}

impl ApprovalStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Register a pending call and return its ID plus a receiver the loop
    /// worker awaits (with the store's timeout applied).
    pub fn insert(
        &self,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        run_id: impl Into<String>,
    ) -> (Uuid, oneshot::Receiver<ApprovalDecision>) {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        self.pending.write().insert(
            id,
            PendingApproval {
                call_id: call_id.into(),
                tool_name: tool_name.into(),
                run_id: run_id.into(),
                created_at: Utc::now(),
                respond: tx,
            },
        );
        (id, rx)
    }

    pub fn approve(&self, id: Uuid) -> bool {
        if let Some(entry) = self.pending.write().remove(&id) {
            entry.respond.send(ApprovalDecision::Approved).ok();
            true
        } else {
            false
        }
    }

    pub fn deny(&self, id: Uuid, reason: Option<String>) -> bool {
        if let Some(entry) = self.pending.write().remove(&id) {
            entry.respond.send(ApprovalDecision::Denied { reason }).ok();
            true
        } else {
            false
        }
    }

    /// Drop entries older than the store's timeout; their receivers observe
    /// a closed channel, which the waiter treats as a denial.
    pub fn remove_expired(&self) -> usize {
        let now = Utc::now();
        let timeout = self.timeout;
        let mut pending = self.pending.write();
        let before = pending.len();
        pending.retain(|_, entry| {
            now.signed_duration_since(entry.created_at).to_std().unwrap_or_default() < timeout
        });
        before - pending.len()
    }

    pub fn list_pending(&self) -> Vec<ApprovalInfo> {
        self.pending
            .read()
            .iter()
            .map(|(id, entry)| ApprovalInfo {
                id: *id,
                call_id: entry.call_id.clone(),
                tool_name: entry.tool_name.clone(),
                run_id: entry.run_id.clone(),
                created_at: entry.created_at,
            })
            .collect()
    }

    /// Wait for a decision on `rx`, treating a closed channel (expiry, or a
    /// dropped store) as a denial.
    pub async fn await_decision(
        &self,
        rx: oneshot::Receiver<ApprovalDecision>,
    ) -> AwaitOutcome {
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(ApprovalDecision::Approved)) => AwaitOutcome::Approved,
            Ok(Ok(ApprovalDecision::Denied { reason })) => AwaitOutcome::Denied(reason),
            Ok(Err(_)) => AwaitOutcome::Denied(None),
            Err(_) => AwaitOutcome::TimedOut,
        }
    }
}
