//! Async job queue bridge (spec §4.1 step 4, §5 concurrency level 3):
//! tools on the async-tools list return a synthetic "queued" result
//! immediately, then run later on a process-wide bounded worker pool.
//! The run that dispatched a job never awaits it; only the job store
//! records its final status.

use std::sync::Arc;

use rt_domain::{JobStatus, JobStore, ToolCall};
use rt_executor::ParallelExecutor;
use tokio::sync::Semaphore;

/// Dispatches fire-and-record tool jobs onto a bounded pool sized by
/// `LoopConfig.max_concurrent_jobs`.
pub struct JobQueue {
    semaphore: Arc<Semaphore>,
    executor: Arc<ParallelExecutor>,
    store: Arc<dyn JobStore>,
}

impl JobQueue {
    pub fn new(max_concurrent: usize, executor: Arc<ParallelExecutor>, store: Arc<dyn JobStore>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            executor,
            store,
        }
    }

    /// Create a job record and spawn it on the pool, returning the job ID
    /// immediately. The spawned task blocks on the pool's semaphore, not
    /// the caller.
    pub async fn dispatch(&self, call: ToolCall) -> rt_domain::Result<String> {
        let job_id = self.store.create(&call).await?;

        let semaphore = self.semaphore.clone();
        let executor = self.executor.clone();
        let store = self.store.clone();
        let spawned_job_id = job_id.clone();

        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            if store.set_status(&spawned_job_id, JobStatus::Running).await.is_err() {
                return;
            }
            let outcome = executor.execute_one(&call).await;
            let status = if outcome.result.is_error {
                JobStatus::Failed
            } else {
                JobStatus::Completed
            };
            if let Err(err) = store.set_status(&spawned_job_id, status).await {
                tracing::warn!(job_id = %spawned_job_id, %err, "failed to record job completion");
            }
        });

        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rt_domain::{ExecutorConfig, ToolErrorKind, ToolResult};
    use rt_executor::tool::{Tool, ToolCatalogue};
    use std::collections::HashMap;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        async fn call(&self, call: &ToolCall) -> Result<ToolResult, ToolErrorKind> {
            Ok(ToolResult::ok(call.call_id.clone(), "done"))
        }
    }

    #[derive(Default)]
    struct MemJobStore {
        statuses: Mutex<HashMap<String, JobStatus>>,
    }

    #[async_trait]
    impl JobStore for MemJobStore {
        async fn create(&self, _call: &ToolCall) -> rt_domain::Result<String> {
            let id = uuid::Uuid::new_v4().to_string();
            self.statuses.lock().insert(id.clone(), JobStatus::Queued);
            Ok(id)
        }
        async fn set_status(&self, job_id: &str, status: JobStatus) -> rt_domain::Result<()> {
            self.statuses.lock().insert(job_id.to_string(), status);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_runs_job_and_records_completion() {
        let mut catalogue = ToolCatalogue::default();
        catalogue.register(Arc::new(EchoTool));
        let executor = Arc::new(ParallelExecutor::new(catalogue, ExecutorConfig::default()));
        let store = Arc::new(MemJobStore::default());
        let queue = JobQueue::new(2, executor, store.clone());

        let call = ToolCall {
            call_id: "c1".into(),
            tool_name: "echo".into(),
            arguments: serde_json::json!({}),
        };
        let job_id = queue.dispatch(call).await.unwrap();

        for _ in 0..20 {
            if store.statuses.lock().get(&job_id) == Some(&JobStatus::Completed) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(store.statuses.lock().get(&job_id), Some(&JobStatus::Completed));
    }
}
