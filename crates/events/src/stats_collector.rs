//! The stats collector (spec §4.4): a sink that reduces the event stream
//! into a [`RunStats`] snapshot, copied out to avoid shared-state races.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use rt_domain::{EventPayload, EventType, RunStats};

use crate::sink::Sink;

struct State {
    stats: RunStats,
    model_start: Option<Instant>,
    tool_starts: HashMap<String, Instant>,
}

pub struct StatsCollector {
    state: Mutex<State>,
}

impl StatsCollector {
    pub fn new(started_at: chrono::DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(State {
                stats: RunStats::new(started_at),
                model_start: None,
                tool_starts: HashMap::new(),
            }),
        }
    }

    /// A snapshot taken by copy, per spec ("Snapshot is taken by copy to
    /// avoid shared-state races").
    pub fn snapshot(&self) -> RunStats {
        self.state.lock().stats.clone()
    }
}

#[async_trait::async_trait]
impl Sink for StatsCollector {
    async fn emit(&self, event: rt_domain::AgentEvent) {
        let mut state = self.state.lock();
        let now = Instant::now();
        match event.event_type {
            EventType::IterStarted => {
                state.stats.iterations += 1;
                state.model_start = Some(now);
            }
            EventType::ModelCompleted => {
                if let Some(EventPayload::Stream(s)) = &event.payload {
                    state.stats.input_tokens += s.input_tokens.unwrap_or(0) as u64;
                    state.stats.output_tokens += s.output_tokens.unwrap_or(0) as u64;
                }
                if let Some(start) = state.model_start.take() {
                    state.stats.model_wall_time_ms += now.duration_since(start).as_millis() as u64;
                }
            }
            EventType::ToolStarted => {
                state.stats.tool_calls += 1;
                if let Some(EventPayload::Tool(t)) = &event.payload {
                    state.tool_starts.insert(t.call_id.clone(), now);
                }
            }
            EventType::ToolFinished => {
                if let Some(EventPayload::Tool(t)) = &event.payload {
                    if let Some(start) = state.tool_starts.remove(&t.call_id) {
                        state.stats.tool_wall_time_ms += now.duration_since(start).as_millis() as u64;
                    }
                    if t.is_error.unwrap_or(false) {
                        state.stats.errors += 1;
                    }
                }
            }
            EventType::ToolTimedOut => {
                state.stats.tool_timeouts += 1;
                state.stats.errors += 1;
                if let Some(EventPayload::Tool(t)) = &event.payload {
                    state.tool_starts.remove(&t.call_id);
                }
            }
            EventType::ContextPacked => {
                if let Some(EventPayload::Context(c)) = &event.payload {
                    state.stats.context_packs += 1;
                    state.stats.dropped_items += c.dropped_items as u32;
                }
            }
            EventType::RunCancelled => {
                state.stats.cancelled = true;
                state.stats.errors += 1;
            }
            EventType::RunTimedOut => {
                state.stats.timed_out = true;
                state.stats.errors += 1;
            }
            EventType::RunError => {
                state.stats.errors += 1;
            }
            EventType::RunFinished => {
                let finished_at = Utc::now();
                state.stats.finished_at = Some(finished_at);
                let started = state.stats.started_at;
                state.stats.total_wall_time_ms =
                    (finished_at - started).num_milliseconds().max(0) as u64;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_domain::{ErrorPayload, StreamPayload, ToolPayload, AgentEvent, SCHEMA_VERSION};

    fn base_event(event_type: EventType, payload: Option<EventPayload>) -> AgentEvent {
        AgentEvent {
            version: SCHEMA_VERSION,
            event_type,
            time: Utc::now(),
            sequence: 0,
            run_id: "r".into(),
            turn_index: 0,
            iter_index: 0,
            payload,
        }
    }

    #[tokio::test]
    async fn reduces_iteration_and_token_counts() {
        let collector = StatsCollector::new(Utc::now());
        collector.emit(base_event(EventType::IterStarted, None)).await;
        collector
            .emit(base_event(
                EventType::ModelCompleted,
                Some(EventPayload::Stream(StreamPayload {
                    text: None,
                    input_tokens: Some(10),
                    output_tokens: Some(20),
                })),
            ))
            .await;
        let snap = collector.snapshot();
        assert_eq!(snap.iterations, 1);
        assert_eq!(snap.input_tokens, 10);
        assert_eq!(snap.output_tokens, 20);
    }

    #[tokio::test]
    async fn tool_timeout_increments_timeout_and_error_counts() {
        let collector = StatsCollector::new(Utc::now());
        collector
            .emit(base_event(
                EventType::ToolStarted,
                Some(EventPayload::Tool(ToolPayload {
                    call_id: "tc-1".into(),
                    ..Default::default()
                })),
            ))
            .await;
        collector
            .emit(base_event(
                EventType::ToolTimedOut,
                Some(EventPayload::Tool(ToolPayload {
                    call_id: "tc-1".into(),
                    ..Default::default()
                })),
            ))
            .await;
        let snap = collector.snapshot();
        assert_eq!(snap.tool_timeouts, 1);
        assert_eq!(snap.errors, 1);
    }

    #[tokio::test]
    async fn run_cancelled_sets_flag_and_error() {
        let collector = StatsCollector::new(Utc::now());
        collector
            .emit(base_event(
                EventType::RunError,
                Some(EventPayload::Error(ErrorPayload {
                    code: "x".into(),
                    message: "y".into(),
                })),
            ))
            .await;
        collector.emit(base_event(EventType::RunCancelled, None)).await;
        let snap = collector.snapshot();
        assert!(snap.cancelled);
        assert_eq!(snap.errors, 2);
    }
}
