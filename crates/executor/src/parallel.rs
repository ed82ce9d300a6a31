//! The parallel tool executor (spec §4 component 2, "Bounded-concurrency
//! tool dispatch with per-tool policy"): a process-wide semaphore,
//! per-tool timeout/retry/backoff, panic isolation, and a retryable-error
//! classification shared with the failover orchestrator's taxonomy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use rt_domain::{ExecutorConfig, ToolCall, ToolErrorKind, ToolResult};
use tokio::sync::Semaphore;

use crate::tool::ToolCatalogue;

/// The outcome of executing one [`ToolCall`], including bookkeeping the
/// runtime needs for stats and event payloads.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call_id: String,
    pub result: ToolResult,
    pub attempts: u32,
    pub duration_ms: u64,
    pub timed_out: bool,
}

/// Accumulated counters for a [`ParallelExecutor`] (spec §4.2
/// observability: calls, successes, failures, timeouts, retries, p50/p95
/// latency bins).
#[derive(Debug, Default)]
pub struct ExecutorMetrics {
    pub calls: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub timeouts: AtomicU64,
    pub retries: AtomicU64,
    pub panics: AtomicU64,
    latencies_ms: Mutex<Vec<u64>>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorMetricsSnapshot {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub retries: u64,
    pub panics: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
}

impl ExecutorMetrics {
    fn record_latency(&self, duration_ms: u64) {
        self.latencies_ms.lock().push(duration_ms);
    }

    fn snapshot(&self) -> ExecutorMetricsSnapshot {
        let mut samples = self.latencies_ms.lock().clone();
        samples.sort_unstable();
        ExecutorMetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            p50_latency_ms: percentile(&samples, 0.50),
            p95_latency_ms: percentile(&samples, 0.95),
        }
    }
}

/// Nearest-rank percentile over already-sorted samples (spec §4.2 "p50/p95
/// latency bins"). Empty input reports 0 rather than panicking.
fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((pct * sorted.len() as f64).ceil() as usize)
        .saturating_sub(1)
        .min(sorted.len() - 1);
    sorted[rank]
}

/// Runs a batch of tool calls under a shared semaphore, applying each
/// tool's timeout/retry/backoff overrides, and isolating panics so one
/// misbehaving tool never takes down the batch.
pub struct ParallelExecutor {
    catalogue: ToolCatalogue,
    config: ExecutorConfig,
    semaphore: Arc<Semaphore>,
    metrics: Arc<ExecutorMetrics>,
}

/// Effectively unbounded: tokio's semaphore rejects `usize::MAX` outright,
/// so this is the largest permit count it accepts.
const UNBOUNDED_PERMITS: usize = usize::MAX >> 4;

impl ParallelExecutor {
    pub fn new(catalogue: ToolCatalogue, config: ExecutorConfig) -> Self {
        let permits = if config.enable_backpressure {
            config.resolved_concurrency()
        } else {
            UNBOUNDED_PERMITS
        };
        Self {
            catalogue,
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
            metrics: Arc::new(ExecutorMetrics::default()),
        }
    }

    pub fn metrics(&self) -> ExecutorMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Execute every call concurrently (bounded by the semaphore) and
    /// return outcomes in the *original* call order, regardless of
    /// completion order — the loop persists tool results positionally.
    /// `on_complete`, if given, is invoked as each call finishes (in
    /// completion order) so the caller can emit `tool.finished` events
    /// live rather than waiting for the whole batch.
    pub async fn execute_all(
        &self,
        calls: Vec<ToolCall>,
        on_complete: Option<Arc<dyn Fn(usize, &ToolOutcome) + Send + Sync>>,
    ) -> Vec<ToolOutcome> {
        let n = calls.len();
        let indexed_results: Arc<Mutex<Vec<Option<ToolOutcome>>>> =
            Arc::new(Mutex::new((0..n).map(|_| None).collect()));

        let tasks = calls.into_iter().enumerate().map(|(index, call)| {
            let catalogue = self.catalogue.clone();
            let semaphore = self.semaphore.clone();
            let config = self.config.clone();
            let metrics = self.metrics.clone();
            let results = indexed_results.clone();
            let on_complete = on_complete.clone();

            async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let outcome = execute_one(&catalogue, &call, &config, &metrics).await;
                if let Some(cb) = &on_complete {
                    cb(index, &outcome);
                }
                results.lock()[index] = Some(outcome);
            }
        });

        let concurrency = if self.config.enable_backpressure {
            self.config.resolved_concurrency().max(1)
        } else {
            UNBOUNDED_PERMITS
        };
        stream::iter(tasks)
            .buffer_unordered(concurrency)
            .collect::<Vec<()>>()
            .await;

        Arc::try_unwrap(indexed_results)
            .map(|m| m.into_inner())
            .unwrap_or_else(|arc| arc.lock().clone())
            .into_iter()
            .map(|o| o.expect("every index is filled exactly once"))
            .collect()
    }

    /// Execute a single call outside of a batch (used by async-dispatched
    /// "fire and record" jobs, spec §4.1 step 4).
    pub async fn execute_one(&self, call: &ToolCall) -> ToolOutcome {
        let _permit = self.semaphore.acquire().await.expect("semaphore closed");
        execute_one(&self.catalogue, call, &self.config, &self.metrics).await
    }
}

async fn execute_one(
    catalogue: &ToolCatalogue,
    call: &ToolCall,
    config: &ExecutorConfig,
    metrics: &ExecutorMetrics,
) -> ToolOutcome {
    metrics.calls.fetch_add(1, Ordering::Relaxed);
    let start = Instant::now();

    let overrides = config.per_tool.get(&call.tool_name);
    let timeout_ms = overrides
        .and_then(|o| o.timeout_ms)
        .unwrap_or(config.per_tool_timeout_ms);
    let max_retries = overrides
        .and_then(|o| o.retries)
        .unwrap_or(config.default_retries);
    let mut backoff_ms = overrides
        .and_then(|o| o.retry_backoff_ms)
        .unwrap_or(config.retry_backoff_ms);
    let max_backoff_ms = config.max_retry_backoff_ms;

    let Some(tool) = catalogue.get(&call.tool_name) else {
        metrics.failures.fetch_add(1, Ordering::Relaxed);
        return ToolOutcome {
            call_id: call.call_id.clone(),
            result: ToolResult::err(
                call.call_id.clone(),
                format!("tool not found: {}", call.tool_name),
            ),
            attempts: 0,
            duration_ms: start.elapsed().as_millis() as u64,
            timed_out: false,
        };
    };

    let mut attempts = 0u32;
    let mut timed_out = false;
    loop {
        attempts += 1;
        let call_fut = run_with_panic_isolation(tool.clone(), call.clone());
        let outcome = match tokio::time::timeout(Duration::from_millis(timeout_ms), call_fut).await
        {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(kind))) => Err(kind),
            Ok(Err(panic_msg)) => {
                metrics.panics.fetch_add(1, Ordering::Relaxed);
                Err(ToolErrorKind::Panic(panic_msg))
            }
            Err(_) => {
                timed_out = true;
                Err(ToolErrorKind::Timeout)
            }
        };

        match outcome {
            Ok(result) => {
                metrics.successes.fetch_add(1, Ordering::Relaxed);
                let duration_ms = start.elapsed().as_millis() as u64;
                metrics.record_latency(duration_ms);
                return ToolOutcome {
                    call_id: call.call_id.clone(),
                    result,
                    attempts,
                    duration_ms,
                    timed_out: false,
                };
            }
            Err(kind) => {
                if kind.is_retryable() && attempts <= max_retries {
                    metrics.retries.fetch_add(1, Ordering::Relaxed);
                    if timed_out {
                        metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                        timed_out = false;
                    }
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = std::cmp::min(backoff_ms * 2, max_backoff_ms);
                    continue;
                }
                if kind == ToolErrorKind::Timeout {
                    metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                }
                metrics.failures.fetch_add(1, Ordering::Relaxed);
                let duration_ms = start.elapsed().as_millis() as u64;
                metrics.record_latency(duration_ms);
                return ToolOutcome {
                    call_id: call.call_id.clone(),
                    result: ToolResult::err(call.call_id.clone(), kind.to_string()),
                    attempts,
                    duration_ms,
                    timed_out: kind == ToolErrorKind::Timeout,
                };
            }
        }
    }
}

/// Run a tool call inside `tokio::spawn` so a panic inside the tool
/// surfaces as a `JoinError` instead of unwinding through the executor.
async fn run_with_panic_isolation(
    tool: Arc<dyn crate::tool::Tool>,
    call: ToolCall,
) -> Result<Result<ToolResult, ToolErrorKind>, String> {
    tokio::spawn(async move { tool.call(&call).await })
        .await
        .map_err(|join_err| {
            join_err
                .try_into_panic()
                .ok()
                .and_then(|p| p.downcast_ref::<&str>().map(|s| s.to_string()))
                .unwrap_or_else(|| "tool panicked".to_string())
        })
}
