//! `LoopState` (spec §3): the internal, per-run state the worker owns
//! exclusively. Created at loop entry, destroyed at the terminal event —
//! never shared across runs, never touched outside the owning worker task.

use rt_domain::{Error, LoopError, Phase, ToolCall, ToolResult};

/// Current position of a run in the `init → stream → execute_tools →
/// continue → (stream|complete)` cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Init,
    Stream,
    ExecuteTools,
    Continue,
    Complete,
}

impl From<LoopPhase> for Phase {
    fn from(phase: LoopPhase) -> Self {
        match phase {
            LoopPhase::Init => Phase::Init,
            LoopPhase::Stream => Phase::Stream,
            LoopPhase::ExecuteTools => Phase::ExecuteTools,
            LoopPhase::Continue => Phase::Continue,
            LoopPhase::Complete => Phase::Complete,
        }
    }
}

/// The state a single run's worker carries between phases.
pub struct LoopState {
    pub phase: LoopPhase,
    pub iteration: u32,
    pub total_tool_calls: u32,
    pub assistant_text: String,
    pub pending_tool_calls: Vec<ToolCall>,
    pub last_tool_results: Vec<ToolResult>,
    pub branch_id: Option<String>,
    pub assistant_message_id: Option<String>,
    pub last_error: Option<Error>,
}

impl LoopState {
    pub fn new() -> Self {
        Self {
            phase: LoopPhase::Init,
            iteration: 0,
            total_tool_calls: 0,
            assistant_text: String::new(),
            pending_tool_calls: Vec::new(),
            last_tool_results: Vec::new(),
            branch_id: None,
            assistant_message_id: None,
            last_error: None,
        }
    }

    pub fn enter(&mut self, phase: LoopPhase) {
        self.phase = phase;
    }

    /// Record `count` newly-issued tool calls against the per-run ceiling,
    /// failing with a `LoopError` tagged to the current phase/iteration
    /// when it would be exceeded (spec §4.1 "Guard phase").
    pub fn record_tool_calls(&mut self, count: u32, max_tool_calls: u32) -> Result<(), Error> {
        if max_tool_calls > 0 && self.total_tool_calls + count > max_tool_calls {
            return Err(Error::Loop(LoopError {
                phase: self.phase.into(),
                iteration: self.iteration,
                cause: "max_tool_calls exceeded".to_string(),
            }));
        }
        self.total_tool_calls += count;
        Ok(())
    }

    /// Reset per-iteration accumulators at the start of the continue phase
    /// (spec §4.1 "Continue phase": "Clear accumulated text and pending
    /// lists. Increment iteration.").
    pub fn advance_iteration(&mut self) {
        self.assistant_text.clear();
        self.pending_tool_calls.clear();
        self.last_tool_results.clear();
        self.iteration += 1;
    }
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_tool_calls_accumulates_until_ceiling() {
        let mut state = LoopState::new();
        state.record_tool_calls(2, 5).unwrap();
        state.record_tool_calls(2, 5).unwrap();
        assert_eq!(state.total_tool_calls, 4);
        assert!(state.record_tool_calls(2, 5).is_err());
    }

    #[test]
    fn zero_max_tool_calls_means_unlimited() {
        let mut state = LoopState::new();
        state.record_tool_calls(1000, 0).unwrap();
        assert_eq!(state.total_tool_calls, 1000);
    }

    #[test]
    fn advance_iteration_clears_accumulators() {
        let mut state = LoopState::new();
        state.assistant_text.push_str("hello");
        state.pending_tool_calls.push(ToolCall {
            call_id: "c1".into(),
            tool_name: "t".into(),
            arguments: serde_json::json!({}),
        });
        state.advance_iteration();
        assert!(state.assistant_text.is_empty());
        assert!(state.pending_tool_calls.is_empty());
        assert_eq!(state.iteration, 1);
    }
}
