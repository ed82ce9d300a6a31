//! The failover orchestrator (spec §4.3): wraps a primary model backend
//! plus ordered alternates, retries within a backend up to its budget,
//! and fails over across backends on classified, non-retryable errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rt_domain::{Error, FailoverConfig, ProviderError, ProviderErrorClass, Result};

use crate::circuit::ProviderState;
use crate::traits::{ChatRequest, ModelBackend, StreamChunk};
use futures_util::stream::BoxStream;

struct Entry {
    backend: Arc<dyn ModelBackend>,
    state: ProviderState,
    latencies_ms: Mutex<Vec<u64>>,
    failures: AtomicU64,
    requests: AtomicU64,
}

/// A single backend's final failure, tagged with whether the orchestrator
/// should advance to the next backend or stop the chain here.
struct AttemptFailure {
    err: Error,
    should_failover: bool,
}

/// Accumulated observability for the orchestrator (spec §4.3
/// "Observability": total requests, total failovers, per-provider
/// failures, per-provider latencies).
#[derive(Debug, Clone, Default)]
pub struct OrchestratorMetrics {
    pub total_requests: u64,
    pub total_failovers: u64,
    pub per_provider_failures: Vec<(String, u64)>,
    pub per_provider_latencies_ms: Vec<(String, Vec<u64>)>,
}

/// Orders a primary backend plus alternates, applying per-backend retry
/// and cross-backend failover under a shared circuit breaker.
pub struct FailoverOrchestrator {
    entries: Vec<Entry>,
    config: FailoverConfig,
    total_requests: AtomicU64,
    total_failovers: AtomicU64,
}

impl FailoverOrchestrator {
    /// `backends` is ordered: index 0 is primary, the rest are fallbacks
    /// attempted in order.
    pub fn new(backends: Vec<Arc<dyn ModelBackend>>, config: FailoverConfig) -> Self {
        let entries = backends
            .into_iter()
            .map(|backend| Entry {
                backend,
                state: ProviderState::new(),
                latencies_ms: Mutex::new(Vec::new()),
                failures: AtomicU64::new(0),
                requests: AtomicU64::new(0),
            })
            .collect();
        Self {
            entries,
            config,
            total_requests: AtomicU64::new(0),
            total_failovers: AtomicU64::new(0),
        }
    }

    /// Attempt the request across the configured backend chain (spec §4.3
    /// "Request path").
    pub async fn stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut last_err: Option<Error> = None;

        for (idx, entry) in self.entries.iter().enumerate() {
            if !entry
                .state
                .is_available(self.config.circuit_breaker_threshold, self.circuit_timeout())
            {
                continue;
            }

            if !req.tools.is_empty() && !entry.backend.capabilities().supports_tools {
                tracing::debug!(backend = %entry.backend.id(), "skipping backend: tools required but unsupported");
                continue;
            }

            if idx > 0 {
                self.total_failovers.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(backend = %entry.backend.id(), "failing over to alternate backend");
            }

            match self.try_with_retry(entry, &req).await {
                Ok(stream) => {
                    entry.state.record_success();
                    return Ok(stream);
                }
                Err(attempt) => {
                    entry.failures.fetch_add(1, Ordering::Relaxed);
                    entry.state.record_failure(self.config.circuit_breaker_threshold);
                    tracing::warn!(
                        backend = %entry.backend.id(),
                        class = ?classify(&attempt.err),
                        error = %attempt.err,
                        "backend request failed"
                    );
                    let should_failover = attempt.should_failover;
                    last_err = Some(attempt.err);
                    // spec §4.3: failover only when (a) the class always fails
                    // over, or (b) retries are exhausted and the class is
                    // configured to fail over on exhaustion. Anything else
                    // (e.g. InvalidRequest, Unknown) stops the chain here.
                    if !should_failover {
                        break;
                    }
                }
            }
        }

        Err(last_err.unwrap_or(Error::Provider(ProviderError::Exhausted)))
    }

    /// Retry within a single backend up to `MaxRetries`, iff the error
    /// class is retryable; exponential backoff capped at `MaxRetryBackoff`.
    /// On final failure, reports whether the caller should advance to the
    /// next backend (spec §4.3's two-condition failover gate) rather than
    /// stop the chain.
    async fn try_with_retry(
        &self,
        entry: &Entry,
        req: &ChatRequest,
    ) -> std::result::Result<BoxStream<'static, Result<StreamChunk>>, AttemptFailure> {
        let mut attempt = 0u32;
        let mut backoff = Duration::from_millis(self.config.retry_backoff_ms);
        loop {
            entry.requests.fetch_add(1, Ordering::Relaxed);
            let start = Instant::now();
            let result = entry.backend.stream(req.clone()).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;
            entry.latencies_ms.lock().push(elapsed_ms);

            match result {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    let class = classify(&err);
                    let retries_exhausted = attempt >= self.config.max_retries;
                    let should_failover = class.always_failover()
                        || (retries_exhausted
                            && ((class == ProviderErrorClass::RateLimit
                                && self.config.failover_on_rate_limit)
                                || (class == ProviderErrorClass::ServerError
                                    && self.config.failover_on_server_error)));

                    if should_failover || retries_exhausted || !is_retryable(class) {
                        return Err(AttemptFailure { err, should_failover });
                    }

                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(
                        backoff * 2,
                        Duration::from_millis(self.config.max_retry_backoff_ms),
                    );
                }
            }
        }
    }

    fn circuit_timeout(&self) -> Duration {
        Duration::from_millis(self.config.circuit_breaker_timeout_ms)
    }

    pub fn metrics(&self) -> OrchestratorMetrics {
        OrchestratorMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_failovers: self.total_failovers.load(Ordering::Relaxed),
            per_provider_failures: self
                .entries
                .iter()
                .map(|e| (e.backend.id().to_string(), e.failures.load(Ordering::Relaxed)))
                .collect(),
            per_provider_latencies_ms: self
                .entries
                .iter()
                .map(|e| (e.backend.id().to_string(), e.latencies_ms.lock().clone()))
                .collect(),
        }
    }
}

fn classify(err: &Error) -> ProviderErrorClass {
    match err {
        Error::Provider(p) => p.class(),
        _ => ProviderErrorClass::Unknown,
    }
}

fn is_retryable(class: ProviderErrorClass) -> bool {
    matches!(
        class,
        ProviderErrorClass::RateLimit | ProviderErrorClass::Timeout | ProviderErrorClass::ServerError
    )
}
