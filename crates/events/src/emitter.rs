//! The event emitter (spec §4.4): owns the monotonic per-run sequence
//! counter and stamps schema version, turn/iter indices, and timestamp
//! onto every event before handing it to a sink.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rt_domain::{AgentEvent, EventPayload, EventType, SCHEMA_VERSION};

use crate::sink::{NoopSink, Sink};

/// Builds and forwards [`AgentEvent`]s for one run. Cheap to clone (all
/// state is behind atomics/Arc) so every phase of the loop can hold one.
#[derive(Clone)]
pub struct Emitter {
    run_id: String,
    sequence: Arc<AtomicU64>,
    turn_index: Arc<AtomicU32>,
    iter_index: Arc<AtomicU32>,
    sink: Arc<dyn Sink>,
}

impl Emitter {
    pub fn new(run_id: impl Into<String>, sink: Arc<dyn Sink>) -> Self {
        Self {
            run_id: run_id.into(),
            sequence: Arc::new(AtomicU64::new(0)),
            turn_index: Arc::new(AtomicU32::new(0)),
            iter_index: Arc::new(AtomicU32::new(0)),
            sink,
        }
    }

    /// An emitter that discards every event (tests, dry runs).
    pub fn noop(run_id: impl Into<String>) -> Self {
        Self::new(run_id, Arc::new(NoopSink))
    }

    pub fn set_turn_index(&self, turn_index: u32) {
        self.turn_index.store(turn_index, Ordering::Relaxed);
    }

    pub fn set_iter_index(&self, iter_index: u32) {
        self.iter_index.store(iter_index, Ordering::Relaxed);
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Build and dispatch one event, consuming the next sequence number.
    pub async fn emit(&self, event_type: EventType, payload: Option<EventPayload>) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let event = AgentEvent {
            version: SCHEMA_VERSION,
            event_type,
            time: Utc::now(),
            sequence,
            run_id: self.run_id.clone(),
            turn_index: self.turn_index.load(Ordering::Relaxed),
            iter_index: self.iter_index.load(Ordering::Relaxed),
            payload,
        };
        self.sink.emit(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CallbackSink;
    use std::sync::Mutex;

    #[tokio::test]
    async fn sequence_is_strictly_increasing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let sink = CallbackSink::new(move |event: &AgentEvent| {
            seen2.lock().unwrap().push(event.sequence);
        });
        let emitter = Emitter::new("run-1", Arc::new(sink));
        for _ in 0..5 {
            emitter.emit(EventType::IterStarted, None).await;
        }
        let sequences = seen.lock().unwrap().clone();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }
}
