//! The loop state machine (spec §4.1): the `Runtime` wires the failover
//! orchestrator, the parallel executor, the event pipeline, and the
//! external session/job/branch/steering collaborators into the
//! `init → stream → execute_tools → continue → (stream|complete)` cycle.
//!
//! Grounded in the teacher's `runtime::turn::run_turn`/`run_turn_inner`
//! shape (spawn a detached worker, stream chunks, assemble tool calls,
//! dispatch a batch, loop), generalized from the teacher's HTTP/SSE
//! `TurnEvent` to the domain's closed `AgentEvent` schema and from a
//! single backend to the failover-orchestrated chain.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rt_domain::{
    AgentEvent, ApiKeyResolver, BackpressureConfig, BranchStore, Direction, Error, EventPayload,
    EventType, JobStore, LoopConfig, Message, NoKeys, NoSteering, Role, RunErrorCause, Session,
    SessionStore, SteeringItem, SteeringQueue, StreamPayload, ToolCall, ToolDefinition,
    ToolPayload, ToolResult,
};
use rt_events::{
    BackpressureSink, ChannelSink, Emitter, MultiSink, PluginRegistry, PluginSink, ResultGuard,
    Sink, StatsCollector,
};
use rt_executor::ParallelExecutor;
use rt_providers::{ChatRequest, FailoverOrchestrator, StreamChunk};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::approval::{ApprovalStore, AwaitOutcome};
use crate::cancel::{CancelRegistry, CancelToken, Cause};
use crate::jobs::JobQueue;
use crate::policy::{Decision, ToolPolicy};
use crate::runs::{RunRecord, RunRegistry, RunStatus as RegistryStatus};
use crate::session_lock::SessionLockMap;
use crate::state::{LoopPhase, LoopState};

/// Context supplied per run: overrides the token carries in from the
/// caller (spec §9: "an explicit propagation token that carries deadline,
/// cancellation cause, and bag-of-values overrides").
pub struct RunContext {
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub provider_id: String,
    pub elevated: bool,
    pub max_wall_time_ms: Option<u64>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            system_prompt: None,
            model: None,
            tools: Vec::new(),
            provider_id: String::new(),
            elevated: false,
            max_wall_time_ms: None,
        }
    }
}

/// The collaborators a `Runtime` is built from (spec §1 "external
/// collaborators"). Only `session_store` and `executor`/`backend` are
/// mandatory; everything else degrades to a no-op.
pub struct RuntimeBuilder {
    backend: Arc<FailoverOrchestrator>,
    executor: Arc<ParallelExecutor>,
    session_store: Arc<dyn SessionStore>,
    branch_store: Option<Arc<dyn BranchStore>>,
    job_store: Option<Arc<dyn JobStore>>,
    steering: Arc<dyn SteeringQueue>,
    api_keys: Arc<dyn ApiKeyResolver>,
    config: LoopConfig,
    backpressure: BackpressureConfig,
    plugins: Arc<PluginRegistry>,
    extra_sinks: Vec<Arc<dyn Sink>>,
}

impl RuntimeBuilder {
    pub fn new(
        backend: Arc<FailoverOrchestrator>,
        executor: Arc<ParallelExecutor>,
        session_store: Arc<dyn SessionStore>,
        config: LoopConfig,
    ) -> Self {
        Self {
            backend,
            executor,
            session_store,
            branch_store: None,
            job_store: None,
            steering: Arc::new(NoSteering),
            api_keys: Arc::new(NoKeys),
            config,
            backpressure: BackpressureConfig::default(),
            plugins: Arc::new(PluginRegistry::new()),
            extra_sinks: Vec::new(),
        }
    }

    /// Sizes the two-lane sink `Runtime::run` builds when
    /// `LoopConfig::enable_backpressure` is set (spec §4.5).
    pub fn with_backpressure_config(mut self, config: BackpressureConfig) -> Self {
        self.backpressure = config;
        self
    }

    pub fn with_branch_store(mut self, store: Arc<dyn BranchStore>) -> Self {
        self.branch_store = Some(store);
        self
    }

    pub fn with_job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    pub fn with_steering(mut self, queue: Arc<dyn SteeringQueue>) -> Self {
        self.steering = queue;
        self
    }

    pub fn with_api_keys(mut self, resolver: Arc<dyn ApiKeyResolver>) -> Self {
        self.api_keys = resolver;
        self
    }

    pub fn with_plugins(mut self, plugins: Arc<PluginRegistry>) -> Self {
        self.plugins = plugins;
        self
    }

    /// An additional sink wired into every run's `MultiSink` alongside the
    /// plugin sink and the output channel — a trace writer, typically.
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.extra_sinks.push(sink);
        self
    }

    pub fn build(self) -> Runtime {
        let job_queue = self.job_store.clone().map(|store| {
            Arc::new(JobQueue::new(
                self.config.max_concurrent_jobs,
                self.executor.clone(),
                store,
            ))
        });
        Runtime {
            backend: self.backend,
            executor: self.executor,
            session_store: self.session_store,
            branch_store: self.branch_store,
            job_store: self.job_store,
            job_queue,
            steering: self.steering,
            api_keys: self.api_keys,
            config: self.config,
            backpressure: self.backpressure,
            plugins: self.plugins,
            extra_sinks: self.extra_sinks,
            cancel_registry: Arc::new(CancelRegistry::new()),
            session_locks: Arc::new(SessionLockMap::new()),
            approvals: Arc::new(ApprovalStore::new(Duration::from_secs(300))),
            runs: Arc::new(RunRegistry::new()),
        }
    }
}

/// One run's output: the caller's channel of events plus its assigned ID.
pub struct RunHandle {
    pub run_id: String,
    pub events: mpsc::Receiver<AgentEvent>,
}

pub struct Runtime {
    backend: Arc<FailoverOrchestrator>,
    executor: Arc<ParallelExecutor>,
    session_store: Arc<dyn SessionStore>,
    branch_store: Option<Arc<dyn BranchStore>>,
    job_store: Option<Arc<dyn JobStore>>,
    job_queue: Option<Arc<JobQueue>>,
    steering: Arc<dyn SteeringQueue>,
    api_keys: Arc<dyn ApiKeyResolver>,
    config: LoopConfig,
    backpressure: BackpressureConfig,
    plugins: Arc<PluginRegistry>,
    extra_sinks: Vec<Arc<dyn Sink>>,
    cancel_registry: Arc<CancelRegistry>,
    session_locks: Arc<SessionLockMap>,
    approvals: Arc<ApprovalStore>,
    runs: Arc<RunRegistry>,
}

impl Runtime {
    pub fn cancel(&self, run_id: &str) -> bool {
        self.cancel_registry.cancel(run_id)
    }

    /// Resolve a pending tool approval from outside the worker that raised
    /// it (an admin UI, a CLI prompt).
    pub fn approve_tool(&self, id: uuid::Uuid) -> bool {
        self.approvals.approve(id)
    }

    pub fn deny_tool(&self, id: uuid::Uuid, reason: Option<String>) -> bool {
        self.approvals.deny(id, reason)
    }

    pub fn pending_approvals(&self) -> Vec<crate::approval::ApprovalInfo> {
        self.approvals.list_pending()
    }

    pub fn executor_metrics(&self) -> rt_executor::ExecutorMetricsSnapshot {
        self.executor.metrics()
    }

    pub fn orchestrator_metrics(&self) -> rt_providers::OrchestratorMetrics {
        self.backend.metrics()
    }

    /// Snapshot of every run the registry still considers running — a
    /// dashboard-style query independent of the event stream.
    pub fn active_runs(&self) -> Vec<RunRecord> {
        self.runs.list_active()
    }

    pub fn run_status(&self, run_id: &str) -> Option<RunRecord> {
        self.runs.get(run_id)
    }

    /// Entry point (spec §4.1 "Entry contract"): validates preconditions
    /// synchronously, then starts a detached worker and returns its run ID
    /// plus a receiver of events.
    pub fn run(self: &Arc<Self>, session: Session, message: Message, ctx: RunContext) -> Result<RunHandle, Error> {
        if message.content.trim().is_empty() && message.tool_calls.is_empty() {
            return Err(Error::Other("empty inbound message".to_string()));
        }

        let run_id = Uuid::new_v4().to_string();
        let cancel_token = self.cancel_registry.register(&run_id);
        self.runs
            .insert(RunRecord::new(run_id.clone(), session.id.clone(), &message.content));

        let stats = Arc::new(StatsCollector::new(chrono::Utc::now()));
        // spec §4.5: terminal/lifecycle events are delivered even when the
        // output stream is full; only the streaming lanes may drop.
        let (event_sink, rx): (Arc<dyn Sink>, mpsc::Receiver<AgentEvent>) =
            if self.config.enable_backpressure {
                let (sink, rx) =
                    BackpressureSink::new(self.backpressure.high_pri_buffer, self.backpressure.low_pri_buffer);
                (sink as Arc<dyn Sink>, rx)
            } else {
                let (sink, rx) = ChannelSink::new(256);
                (Arc::new(sink), rx)
            };
        let mut sinks: Vec<Arc<dyn Sink>> = vec![
            Arc::new(PluginSink::new(self.plugins.clone())),
            stats.clone(),
            event_sink,
        ];
        sinks.extend(self.extra_sinks.iter().cloned());
        let emitter = Emitter::new(run_id.clone(), Arc::new(MultiSink::new(sinks)));

        if let Some(wall_time) = self.wall_time_budget(&ctx) {
            let token = cancel_token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(wall_time).await;
                token.expire();
            });
        }

        let this = self.clone();
        let handle_run_id = run_id.clone();
        tokio::spawn(async move {
            this.drive(run_id, session, message, ctx, emitter, cancel_token, stats).await;
        });

        Ok(RunHandle {
            run_id: handle_run_id,
            events: rx,
        })
    }

    fn wall_time_budget(&self, ctx: &RunContext) -> Option<Duration> {
        let ms = ctx.max_wall_time_ms.unwrap_or(self.config.max_wall_time_ms);
        if ms == 0 {
            None
        } else {
            Some(Duration::from_millis(ms))
        }
    }

    async fn drive(
        self: Arc<Self>,
        run_id: String,
        session: Session,
        message: Message,
        ctx: RunContext,
        emitter: Emitter,
        cancel: CancelToken,
        stats: Arc<StatsCollector>,
    ) {
        let _session_permit = self.session_locks.acquire(&session.id).await;
        let result = self.drive_inner(&run_id, &session, message, &ctx, &emitter, &cancel, &stats).await;
        self.cancel_registry.remove(&run_id);

        let final_status = match (&result, cancel.cause()) {
            (Ok(_), Some(Cause::Cancelled)) => RegistryStatus::Cancelled,
            (Ok(_), Some(Cause::TimedOut)) => RegistryStatus::TimedOut,
            (Ok(_), None) => RegistryStatus::Completed,
            (Err(_), _) => RegistryStatus::Failed,
        };
        let snapshot = stats.snapshot();
        self.runs.update(&run_id, |record| {
            record.input_tokens = snapshot.input_tokens as u32;
            record.output_tokens = snapshot.output_tokens as u32;
            record.tool_calls = snapshot.tool_calls;
            record.finish(final_status);
            if let Err(err) = &result {
                record.error = Some(err.to_string());
            }
        });

        if let Err(err) = result {
            emitter
                .emit(
                    EventType::RunError,
                    Some(EventPayload::Error(rt_domain::ErrorPayload {
                        code: "run_error".to_string(),
                        message: err.to_string(),
                    })),
                )
                .await;
        }
    }

    async fn drive_inner(
        &self,
        run_id: &str,
        session: &Session,
        message: Message,
        ctx: &RunContext,
        emitter: &Emitter,
        cancel: &CancelToken,
        stats: &Arc<StatsCollector>,
    ) -> Result<(), Error> {
        emitter.emit(EventType::RunStarted, None).await;

        let mut state = LoopState::new();

        // ── Init phase ──────────────────────────────────────────────
        state.enter(LoopPhase::Init);
        let branch_id = if let Some(branch_store) = &self.branch_store {
            Some(branch_store.ensure_primary_branch(&session.id).await?)
        } else {
            None
        };
        state.branch_id = branch_id.clone();

        let mut history = self.session_store.load_recent(&session.id, self.config.history_cap).await?;
        repair_transcript(&mut history);

        let inbound = message.with_branch(branch_id.clone());
        self.session_store.append(&session.id, inbound.clone()).await?;
        history.push(inbound);

        let policy = ToolPolicy::new(&self.config);

        loop {
            if cancel.is_done() {
                return self.emit_cancellation(emitter, cancel).await;
            }

            state.enter(LoopPhase::Stream);
            emitter.set_iter_index(state.iteration);
            emitter.emit(EventType::IterStarted, None).await;

            // ── Stream phase ────────────────────────────────────────
            // Policy check (spec §4.1 step 2): a denied tool is never even
            // offered to the model, independent of the per-call approval
            // gate applied once it actually requests one.
            let filtered_tools: Vec<ToolDefinition> = ctx
                .tools
                .iter()
                .filter(|tool| policy.classify(&tool.name) != Decision::Denied)
                .cloned()
                .collect();
            let request = ChatRequest {
                system_prompt: ctx.system_prompt.clone(),
                messages: history.clone(),
                tools: filtered_tools,
                max_tokens: Some(self.config.max_tokens),
                temperature: None,
                model: ctx.model.clone(),
            };
            let _api_key = self.api_keys.resolve(&ctx.provider_id);

            let mut stream = self.backend.stream(request).await?;
            let mut assistant_text = String::new();
            let mut pending_tool_calls: Vec<ToolCall> = Vec::new();

            while let Some(chunk) = stream.next().await {
                if cancel.is_done() {
                    return self.emit_cancellation(emitter, cancel).await;
                }
                match chunk? {
                    StreamChunk::Text(text) => {
                        assistant_text.push_str(&text);
                        if assistant_text.len() > self.config.max_response_text_size {
                            return Err(Error::Run(RunErrorCause::Other(
                                "response text exceeded max size".to_string(),
                            )));
                        }
                        emitter
                            .emit(
                                EventType::ModelDelta,
                                Some(EventPayload::Stream(StreamPayload {
                                    text: Some(text),
                                    ..Default::default()
                                })),
                            )
                            .await;
                    }
                    StreamChunk::ThinkingStart => {
                        emitter.emit(EventType::ThinkingStart, None).await;
                    }
                    StreamChunk::Thinking(text) => {
                        emitter
                            .emit(
                                EventType::ThinkingDelta,
                                Some(EventPayload::Stream(StreamPayload {
                                    text: Some(text),
                                    ..Default::default()
                                })),
                            )
                            .await;
                    }
                    StreamChunk::ThinkingEnd => {
                        emitter.emit(EventType::ThinkingEnd, None).await;
                    }
                    StreamChunk::ToolCall(call) => {
                        pending_tool_calls.push(call);
                        if pending_tool_calls.len() > self.config.max_tool_calls_per_iteration {
                            return Err(Error::Run(RunErrorCause::Other(
                                "tool calls per iteration exceeded".to_string(),
                            )));
                        }
                    }
                    StreamChunk::Done { input_tokens, output_tokens, .. } => {
                        emitter
                            .emit(
                                EventType::ModelCompleted,
                                Some(EventPayload::Stream(StreamPayload {
                                    text: None,
                                    input_tokens: Some(input_tokens),
                                    output_tokens: Some(output_tokens),
                                })),
                            )
                            .await;
                    }
                }
            }

            // ── Guard phase ─────────────────────────────────────────
            if state.iteration >= self.config.max_iterations {
                return Err(Error::Run(RunErrorCause::MaxIterations));
            }
            state.record_tool_calls(pending_tool_calls.len() as u32, self.config.max_tool_calls)?;
            state.assistant_text = assistant_text;
            state.pending_tool_calls = pending_tool_calls;

            let assistant_message = Message::new(Role::Assistant, Direction::Outbound, state.assistant_text.clone())
                .with_tool_calls(state.pending_tool_calls.clone())
                .with_branch(branch_id.clone());

            if state.pending_tool_calls.is_empty() {
                self.session_store.append(&session.id, assistant_message.clone()).await?;
                history.push(assistant_message);
                state.enter(LoopPhase::Complete);
                return self.complete(stats, emitter).await;
            }

            // ── Execute-tools phase ─────────────────────────────────
            state.enter(LoopPhase::ExecuteTools);
            let tool_results = self
                .execute_tools(run_id, &state.pending_tool_calls, ctx, &policy, emitter)
                .await;
            state.last_tool_results = tool_results.clone();

            // ── Continue phase ──────────────────────────────────────
            state.enter(LoopPhase::Continue);
            self.session_store.append(&session.id, assistant_message.clone()).await?;
            history.push(assistant_message);

            let tool_message = Message::new(Role::Tool, Direction::Inbound, String::new())
                .with_tool_results(tool_results)
                .with_branch(branch_id.clone());
            self.session_store.append(&session.id, tool_message.clone()).await?;
            history.push(tool_message);

            let _ = self.steering.drain();
            state.advance_iteration();
        }
    }

    async fn execute_tools(
        &self,
        run_id: &str,
        calls: &[ToolCall],
        ctx: &RunContext,
        policy: &ToolPolicy<'_>,
        emitter: &Emitter,
    ) -> Vec<ToolResult> {
        let mut results = vec![None; calls.len()];
        let mut eligible: Vec<(usize, ToolCall)> = Vec::new();

        for (idx, call) in calls.iter().enumerate() {
            emitter
                .emit(EventType::ToolRequested, Some(EventPayload::Tool(ToolPayload::requested(call))))
                .await;

            let decision = policy.resolve(&call.tool_name, ctx.elevated);
            match decision {
                Decision::Denied => {
                    let result = ToolResult::err(call.call_id.clone(), format!("tool not allowed: {}", call.tool_name));
                    emitter
                        .emit(EventType::ToolDenied, Some(EventPayload::Tool(ToolPayload::finished(&call.call_id, &result))))
                        .await;
                    results[idx] = Some(result);
                    continue;
                }
                Decision::Pending => {
                    let (_id, rx) = self.approvals.insert(call.call_id.clone(), call.tool_name.clone(), run_id.to_string());
                    emitter
                        .emit(
                            EventType::ToolApprovalRequired,
                            Some(EventPayload::Tool(ToolPayload::requested(call))),
                        )
                        .await;
                    match self.approvals.await_decision(rx).await {
                        AwaitOutcome::Approved => {}
                        AwaitOutcome::Denied(reason) => {
                            let message = reason.unwrap_or_else(|| format!("tool denied: {}", call.tool_name));
                            let result = ToolResult::err(call.call_id.clone(), message);
                            emitter
                                .emit(EventType::ToolDenied, Some(EventPayload::Tool(ToolPayload::finished(&call.call_id, &result))))
                                .await;
                            results[idx] = Some(result);
                            continue;
                        }
                        AwaitOutcome::TimedOut => {
                            let result = ToolResult::err(call.call_id.clone(), "approval timed out".to_string());
                            emitter
                                .emit(EventType::ToolDenied, Some(EventPayload::Tool(ToolPayload::finished(&call.call_id, &result))))
                                .await;
                            results[idx] = Some(result);
                            continue;
                        }
                    }
                }
                Decision::Allowed => {}
            }

            if policy.is_async(&call.tool_name) {
                if let Some(job_queue) = &self.job_queue {
                    match job_queue.dispatch(call.clone()).await {
                        Ok(job_id) => {
                            let content = serde_json::json!({ "job_id": job_id, "status": "queued" }).to_string();
                            results[idx] = Some(ToolResult::ok(call.call_id.clone(), content));
                        }
                        Err(err) => {
                            results[idx] = Some(ToolResult::err(call.call_id.clone(), err.to_string()));
                        }
                    }
                    continue;
                }
            }

            emitter
                .emit(EventType::ToolStarted, Some(EventPayload::Tool(ToolPayload::requested(call))))
                .await;
            eligible.push((idx, call.clone()));
        }

        if !eligible.is_empty() {
            let calls_batch: Vec<ToolCall> = eligible.iter().map(|(_, c)| c.clone()).collect();
            let outcomes = self.executor.execute_all(calls_batch, None).await;
            let guard = ResultGuard::new(&self.config.result_guard);

            for ((idx, call), outcome) in eligible.into_iter().zip(outcomes) {
                let guarded = guard.apply(&call.tool_name, &outcome.result);
                let event_type = if outcome.timed_out {
                    EventType::ToolTimedOut
                } else if guarded.is_error {
                    EventType::ToolFailed
                } else {
                    EventType::ToolFinished
                };
                emitter
                    .emit(event_type, Some(EventPayload::Tool(ToolPayload::finished(&call.call_id, &guarded))))
                    .await;
                results[idx] = Some(guarded);
            }
        }

        results.into_iter().map(|r| r.unwrap_or_else(|| ToolResult::err("unknown", "tool result missing"))).collect()
    }

    async fn complete(&self, stats: &Arc<StatsCollector>, emitter: &Emitter) -> Result<(), Error> {
        let followups = self.steering.drain();
        let has_followup = followups.iter().any(|item| matches!(item, SteeringItem::Followup(_)));
        if has_followup {
            // A full re-entrant loop over follow-ups is a caller-level
            // concern (spec §9: the steering queue is polled, never owned,
            // by the core); this runtime surfaces the drained items via
            // `iter.finished` and lets the caller re-invoke `run` for the
            // next turn rather than recursing here.
            tracing::debug!(count = followups.len(), "steering follow-ups drained at completion");
        }

        emitter.emit(EventType::IterFinished, None).await;
        emitter
            .emit(EventType::RunFinished, Some(EventPayload::Stats(Box::new(stats.snapshot()))))
            .await;
        Ok(())
    }

    async fn emit_cancellation(&self, emitter: &Emitter, cancel: &CancelToken) -> Result<(), Error> {
        match cancel.cause() {
            Some(Cause::TimedOut) => emitter.emit(EventType::RunTimedOut, None).await,
            _ => emitter.emit(EventType::RunCancelled, None).await,
        }
        Ok(())
    }
}

/// Strip a transcript's unmatched tool-call/tool-result pairs so every
/// backend request is well-formed (spec §4.1 "Init phase": "a tool-call in
/// an assistant message without a matching tool-result in the next
/// message, or vice versa, is stripped").
fn repair_transcript(history: &mut Vec<Message>) {
    let mut repaired = Vec::with_capacity(history.len());
    let mut i = 0;
    while i < history.len() {
        let message = &history[i];
        if message.role == Role::Assistant && !message.tool_calls.is_empty() {
            let has_matching_results = history
                .get(i + 1)
                .map(|next| {
                    next.role == Role::Tool
                        && message
                            .tool_calls
                            .iter()
                            .all(|call| next.tool_results.iter().any(|r| r.call_id == call.call_id))
                })
                .unwrap_or(false);
            if !has_matching_results {
                let mut stripped = message.clone();
                stripped.tool_calls.clear();
                repaired.push(stripped);
                i += 1;
                continue;
            }
        }
        if message.role == Role::Tool && !message.tool_results.is_empty() {
            let prev_has_matching_calls = i > 0
                && history[i - 1].role == Role::Assistant
                && message
                    .tool_results
                    .iter()
                    .all(|result| history[i - 1].tool_calls.iter().any(|c| c.call_id == result.call_id));
            if !prev_has_matching_calls {
                i += 1;
                continue;
            }
        }
        repaired.push(message.clone());
        i += 1;
    }
    *history = repaired;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream::{self, BoxStream};
    use parking_lot::Mutex;
    use rt_domain::{ExecutorConfig, FailoverConfig, ToolErrorKind};
    use rt_executor::tool::{Tool, ToolCatalogue};
    use rt_providers::ModelCapabilities;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedBackend {
        turns: Mutex<std::collections::VecDeque<Vec<rt_providers::StreamChunk>>>,
        delay: Duration,
    }

    impl ScriptedBackend {
        fn new(turns: Vec<Vec<StreamChunk>>) -> Self {
            Self {
                turns: Mutex::new(turns.into_iter().collect()),
                delay: Duration::ZERO,
            }
        }

        /// Sleeps before yielding each turn's chunks, so a wall-time budget
        /// set shorter than `delay` reliably expires mid-stream.
        fn with_delay(turns: Vec<Vec<StreamChunk>>, delay: Duration) -> Self {
            Self {
                turns: Mutex::new(turns.into_iter().collect()),
                delay,
            }
        }
    }

    #[async_trait::async_trait]
    impl rt_providers::ModelBackend for ScriptedBackend {
        async fn stream(&self, _req: ChatRequest) -> rt_domain::Result<BoxStream<'static, rt_domain::Result<StreamChunk>>> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let chunks = self.turns.lock().pop_front().unwrap_or_default();
            let results: Vec<rt_domain::Result<StreamChunk>> = chunks.into_iter().map(Ok).collect();
            Ok(Box::pin(stream::iter(results)))
        }

        fn capabilities(&self) -> ModelCapabilities {
            ModelCapabilities::default()
        }

        fn id(&self) -> &str {
            "scripted"
        }
    }

    struct EchoTool(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        async fn call(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolErrorKind> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(ToolResult::ok(call.call_id.clone(), "echoed"))
        }
    }

    fn test_runtime(backend: ScriptedBackend, calls: Arc<AtomicUsize>) -> Arc<Runtime> {
        test_runtime_with_config(backend, calls, LoopConfig::default())
    }

    fn test_runtime_with_config(backend: ScriptedBackend, calls: Arc<AtomicUsize>, config: LoopConfig) -> Arc<Runtime> {
        let orchestrator = Arc::new(FailoverOrchestrator::new(
            vec![Arc::new(backend) as Arc<dyn rt_providers::ModelBackend>],
            FailoverConfig::default(),
        ));
        let mut catalogue = ToolCatalogue::new();
        catalogue.register(Arc::new(EchoTool(calls)));
        let executor = Arc::new(ParallelExecutor::new(catalogue, ExecutorConfig::default()));
        let session_store = Arc::new(crate::memory_store::InMemorySessionStore::new());
        Arc::new(RuntimeBuilder::new(orchestrator, executor, session_store, config).build())
    }

    async fn drain(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn run_completes_without_tool_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = ScriptedBackend::new(vec![vec![
            StreamChunk::Text("hello there".to_string()),
            StreamChunk::Done {
                input_tokens: 5,
                output_tokens: 3,
                finish_reason: Some("stop".to_string()),
            },
        ]]);
        let runtime = test_runtime(backend, calls);
        let session = Session {
            id: "s1".to_string(),
            agent_id: "a1".to_string(),
            channel: "test".to_string(),
            channel_id: "t1".to_string(),
        };
        let handle = runtime.run(session, Message::user("hi"), RunContext::default()).unwrap();
        let events = drain(handle.events).await;
        assert!(events.iter().any(|e| e.event_type == EventType::RunStarted));
        let finished = events.iter().find(|e| e.event_type == EventType::RunFinished);
        assert!(finished.is_some());
        assert!(matches!(finished.unwrap().payload, Some(EventPayload::Stats(_))));

        let record = runtime.run_status(&handle.run_id).unwrap();
        assert_eq!(record.status, crate::runs::RunStatus::Completed);
    }

    #[tokio::test]
    async fn run_dispatches_tool_call_then_completes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = ScriptedBackend::new(vec![
            vec![
                StreamChunk::ToolCall(ToolCall {
                    call_id: "c1".into(),
                    tool_name: "echo".into(),
                    arguments: serde_json::json!({}),
                }),
                StreamChunk::Done {
                    input_tokens: 1,
                    output_tokens: 1,
                    finish_reason: None,
                },
            ],
            vec![
                StreamChunk::Text("done".to_string()),
                StreamChunk::Done {
                    input_tokens: 1,
                    output_tokens: 1,
                    finish_reason: Some("stop".to_string()),
                },
            ],
        ]);
        let runtime = test_runtime(backend, calls.clone());
        let session = Session {
            id: "s2".to_string(),
            agent_id: "a1".to_string(),
            channel: "test".to_string(),
            channel_id: "t1".to_string(),
        };
        let handle = runtime.run(session, Message::user("run echo"), RunContext::default()).unwrap();
        let events = drain(handle.events).await;
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!(events.iter().any(|e| e.event_type == EventType::ToolFinished));
        assert!(events.iter().any(|e| e.event_type == EventType::RunFinished));
    }

    #[tokio::test]
    async fn empty_message_is_rejected_synchronously() {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = ScriptedBackend::new(vec![]);
        let runtime = test_runtime(backend, calls);
        let session = Session {
            id: "s3".to_string(),
            agent_id: "a1".to_string(),
            channel: "test".to_string(),
            channel_id: "t1".to_string(),
        };
        let result = runtime.run(session, Message::user(""), RunContext::default());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancel_before_completion_emits_run_cancelled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = ScriptedBackend::new(vec![vec![
            StreamChunk::Text("partial".to_string()),
            StreamChunk::Done {
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: None,
            },
        ]]);
        let runtime = test_runtime(backend, calls);
        let session = Session {
            id: "s4".to_string(),
            agent_id: "a1".to_string(),
            channel: "test".to_string(),
            channel_id: "t1".to_string(),
        };
        let handle = runtime.run(session, Message::user("hi"), RunContext::default()).unwrap();
        runtime.cancel(&handle.run_id);
        let events = drain(handle.events).await;
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::RunCancelled || e.event_type == EventType::RunFinished));
    }

    #[tokio::test]
    async fn max_iterations_exceeded_emits_run_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = ScriptedBackend::new(vec![
            vec![
                StreamChunk::ToolCall(ToolCall {
                    call_id: "c1".into(),
                    tool_name: "echo".into(),
                    arguments: serde_json::json!({}),
                }),
                StreamChunk::Done {
                    input_tokens: 1,
                    output_tokens: 1,
                    finish_reason: None,
                },
            ],
            vec![
                StreamChunk::Text("still going".to_string()),
                StreamChunk::Done {
                    input_tokens: 1,
                    output_tokens: 1,
                    finish_reason: None,
                },
            ],
        ]);
        let mut config = LoopConfig::default();
        config.max_iterations = 1;
        let runtime = test_runtime_with_config(backend, calls, config);
        let session = Session {
            id: "s5".to_string(),
            agent_id: "a1".to_string(),
            channel: "test".to_string(),
            channel_id: "t1".to_string(),
        };
        let handle = runtime.run(session, Message::user("go"), RunContext::default()).unwrap();
        let events = drain(handle.events).await;
        assert!(events.iter().any(|e| e.event_type == EventType::RunError));

        let record = runtime.run_status(&handle.run_id).unwrap();
        assert_eq!(record.status, crate::runs::RunStatus::Failed);
    }

    #[tokio::test]
    async fn wall_time_budget_exceeded_emits_run_timed_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = ScriptedBackend::with_delay(
            vec![vec![
                StreamChunk::Text("too slow".to_string()),
                StreamChunk::Done {
                    input_tokens: 1,
                    output_tokens: 1,
                    finish_reason: Some("stop".to_string()),
                },
            ]],
            Duration::from_millis(200),
        );
        let runtime = test_runtime(backend, calls);
        let session = Session {
            id: "s6".to_string(),
            agent_id: "a1".to_string(),
            channel: "test".to_string(),
            channel_id: "t1".to_string(),
        };
        let ctx = RunContext {
            max_wall_time_ms: Some(10),
            ..RunContext::default()
        };
        let handle = runtime.run(session, Message::user("hi"), ctx).unwrap();
        let events = drain(handle.events).await;
        assert!(events.iter().any(|e| e.event_type == EventType::RunTimedOut));

        let record = runtime.run_status(&handle.run_id).unwrap();
        assert_eq!(record.status, crate::runs::RunStatus::TimedOut);
    }

    #[tokio::test]
    async fn denied_tool_is_filtered_from_stream_request_and_from_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = ScriptedBackend::new(vec![
            vec![
                StreamChunk::ToolCall(ToolCall {
                    call_id: "c1".into(),
                    tool_name: "echo".into(),
                    arguments: serde_json::json!({}),
                }),
                StreamChunk::Done {
                    input_tokens: 1,
                    output_tokens: 1,
                    finish_reason: None,
                },
            ],
            vec![
                StreamChunk::Text("done".to_string()),
                StreamChunk::Done {
                    input_tokens: 1,
                    output_tokens: 1,
                    finish_reason: Some("stop".to_string()),
                },
            ],
        ]);
        let mut config = LoopConfig::default();
        config.denied_tools = rt_domain::PatternSet(vec!["echo".to_string()]);
        let runtime = test_runtime_with_config(backend, calls.clone(), config);
        let session = Session {
            id: "s7".to_string(),
            agent_id: "a1".to_string(),
            channel: "test".to_string(),
            channel_id: "t1".to_string(),
        };
        let ctx = RunContext {
            tools: vec![rt_domain::ToolDefinition {
                name: "echo".to_string(),
                description: "echoes".to_string(),
                parameters: serde_json::json!({}),
            }],
            ..RunContext::default()
        };
        let handle = runtime.run(session, Message::user("run echo"), ctx).unwrap();
        let events = drain(handle.events).await;
        assert_eq!(calls.load(Ordering::Relaxed), 0, "denied tool must never reach the executor");
        assert!(events.iter().any(|e| e.event_type == EventType::ToolDenied));
        assert!(events.iter().any(|e| e.event_type == EventType::RunFinished));
    }

    #[test]
    fn repair_transcript_strips_unmatched_tool_call() {
        let mut history = vec![
            Message::user("hi"),
            Message::new(Role::Assistant, Direction::Outbound, "".to_string()).with_tool_calls(vec![ToolCall {
                call_id: "orphan".into(),
                tool_name: "echo".into(),
                arguments: serde_json::json!({}),
            }]),
        ];
        repair_transcript(&mut history);
        assert!(history[1].tool_calls.is_empty());
    }

    #[test]
    fn repair_transcript_keeps_matched_pair() {
        let call = ToolCall {
            call_id: "c1".into(),
            tool_name: "echo".into(),
            arguments: serde_json::json!({}),
        };
        let mut history = vec![
            Message::user("hi"),
            Message::new(Role::Assistant, Direction::Outbound, "".to_string()).with_tool_calls(vec![call.clone()]),
            Message::new(Role::Tool, Direction::Inbound, "".to_string())
                .with_tool_results(vec![ToolResult::ok("c1", "ok")]),
        ];
        repair_transcript(&mut history);
        assert_eq!(history[1].tool_calls.len(), 1);
        assert_eq!(history[2].tool_results.len(), 1);
    }
}

