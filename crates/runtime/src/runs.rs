//! In-memory run registry (spec §9 supplemented feature): tracks run
//! metadata — status, token/cost accounting, a compact preview — apart
//! from the strict `AgentEvent` stream, for dashboard-style "what's
//! running" queries without replaying the trace.
//!
//! Adapted from the teacher's `runtime::runs::RunStore`, dropping its
//! JSONL persistence and SSE broadcast channels (the event pipeline's
//! `TraceWriter`/`Sink`s already own those concerns here) and keeping
//! only the bounded in-memory ring plus its O(1) id index.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

const MAX_RUNS_IN_MEMORY: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: String,
    pub session_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub tool_calls: u32,
    pub input_preview: String,
    pub error: Option<String>,
}

impl RunRecord {
    pub fn new(run_id: impl Into<String>, session_id: impl Into<String>, input_preview: &str) -> Self {
        Self {
            run_id: run_id.into(),
            session_id: session_id.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            input_tokens: 0,
            output_tokens: 0,
            tool_calls: 0,
            input_preview: truncate(input_preview, 200),
            error: None,
        }
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }
}

struct Inner {
    runs: VecDeque<RunRecord>,
    index: HashMap<String, usize>,
    base_seq: usize,
}

impl Inner {
    fn new() -> Self {
        Self {
            runs: VecDeque::new(),
            index: HashMap::new(),
            base_seq: 0,
        }
    }

    fn deque_idx(&self, seq: usize) -> usize {
        seq - self.base_seq
    }

    fn get_mut(&mut self, run_id: &str) -> Option<&mut RunRecord> {
        let seq = *self.index.get(run_id)?;
        let idx = self.deque_idx(seq);
        self.runs.get_mut(idx)
    }
}

/// A bounded, query-by-id registry of run metadata.
pub struct RunRegistry {
    inner: RwLock<Inner>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::new()),
        }
    }

    pub fn insert(&self, record: RunRecord) {
        let mut inner = self.inner.write();
        let seq = inner.base_seq + inner.runs.len();
        inner.index.insert(record.run_id.clone(), seq);
        inner.runs.push_back(record);
        if inner.runs.len() > MAX_RUNS_IN_MEMORY {
            if let Some(evicted) = inner.runs.pop_front() {
                inner.index.remove(&evicted.run_id);
                inner.base_seq += 1;
            }
        }
    }

    pub fn update<F: FnOnce(&mut RunRecord)>(&self, run_id: &str, f: F) -> bool {
        let mut inner = self.inner.write();
        if let Some(record) = inner.get_mut(run_id) {
            f(record);
            true
        } else {
            false
        }
    }

    pub fn get(&self, run_id: &str) -> Option<RunRecord> {
        let inner = self.inner.read();
        let seq = *inner.index.get(run_id)?;
        let idx = inner.deque_idx(seq);
        inner.runs.get(idx).cloned()
    }

    pub fn list_active(&self) -> Vec<RunRecord> {
        self.inner
            .read()
            .runs
            .iter()
            .filter(|r| r.status == RunStatus::Running)
            .cloned()
            .collect()
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_round_trips() {
        let registry = RunRegistry::new();
        registry.insert(RunRecord::new("r1", "s1", "hello world"));
        let record = registry.get("r1").unwrap();
        assert_eq!(record.session_id, "s1");
        assert_eq!(record.status, RunStatus::Running);
    }

    #[test]
    fn update_mutates_in_place() {
        let registry = RunRegistry::new();
        registry.insert(RunRecord::new("r1", "s1", "hi"));
        assert!(registry.update("r1", |r| r.finish(RunStatus::Completed)));
        let record = registry.get("r1").unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert!(record.ended_at.is_some());
    }

    #[test]
    fn update_unknown_run_returns_false() {
        let registry = RunRegistry::new();
        assert!(!registry.update("missing", |r| r.finish(RunStatus::Completed)));
    }

    #[test]
    fn list_active_excludes_terminal_runs() {
        let registry = RunRegistry::new();
        registry.insert(RunRecord::new("r1", "s1", "hi"));
        registry.insert(RunRecord::new("r2", "s1", "hi"));
        registry.update("r2", |r| r.finish(RunStatus::Completed));
        let active = registry.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].run_id, "r1");
    }

    #[test]
    fn preview_truncates_long_input() {
        let long = "a".repeat(300);
        let record = RunRecord::new("r1", "s1", &long);
        assert!(record.input_preview.ends_with("..."));
        assert!(record.input_preview.chars().count() <= 203);
    }

    #[test]
    fn ring_evicts_oldest_beyond_capacity() {
        let registry = RunRegistry::new();
        for i in 0..(MAX_RUNS_IN_MEMORY + 5) {
            registry.insert(RunRecord::new(format!("r{i}"), "s1", "hi"));
        }
        assert!(registry.get("r0").is_none());
        assert!(registry.get(&format!("r{}", MAX_RUNS_IN_MEMORY + 4)).is_some());
    }
}
