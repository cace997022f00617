//! Timed-workflow collaborator boundary.
//!
//! The workflow is the only component that suspends for wall-clock time: it
//! accepts `{wait_seconds, payload}`, sleeps, then invokes the per-strategy
//! execution step. Two runtime tiers exist: `standard` (waits up to 24h)
//! and `fast` (300s hard runtime cap, waits held to 260s).
//!
//! The scheduler core never sleeps itself; it talks to this trait. Tests
//! substitute [`RecordingWorkflow`]; the binary uses [`LocalWorkflowRunner`]
//! which spawns a tokio task per dispatch.

use crate::error::SchedulerError;
use crate::model::DispatchRequest;
use crate::timing::WorkflowTier;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Receives the payload after the wait elapses.
#[async_trait]
pub trait DispatchHandler: Send + Sync {
    async fn handle(&self, request: DispatchRequest);
}

/// Starts one timed execution workflow per dispatch request.
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    /// Accept the request and schedule its execution after
    /// `request.wait_seconds`. Returns once the workflow has been started,
    /// not once it has fired.
    async fn start(&self, request: DispatchRequest) -> Result<(), SchedulerError>;
}

/// In-process workflow runner: sleeps on a spawned task, then hands the
/// request to the handler.
pub struct LocalWorkflowRunner<H: DispatchHandler + 'static> {
    handler: Arc<H>,
    tier: WorkflowTier,
}

impl<H: DispatchHandler + 'static> LocalWorkflowRunner<H> {
    pub fn new(handler: Arc<H>, tier: WorkflowTier) -> Self {
        Self { handler, tier }
    }
}

#[async_trait]
impl<H: DispatchHandler + 'static> WorkflowClient for LocalWorkflowRunner<H> {
    async fn start(&self, request: DispatchRequest) -> Result<(), SchedulerError> {
        if request.wait_seconds < 1 {
            return Err(SchedulerError::Dispatch {
                group: request.execution_time.clone(),
                reason: format!("wait_seconds must be positive, got {}", request.wait_seconds),
            });
        }
        if request.wait_seconds > self.tier.ceiling_seconds() {
            return Err(SchedulerError::Dispatch {
                group: request.execution_time.clone(),
                reason: format!(
                    "wait {}s exceeds {} tier ceiling {}s",
                    request.wait_seconds,
                    self.tier.as_str(),
                    self.tier.ceiling_seconds()
                ),
            });
        }

        let handler = self.handler.clone();
        let wait = Duration::from_secs(request.wait_seconds as u64);
        info!(
            execution_time = %request.execution_time,
            wait_seconds = request.wait_seconds,
            strategies = request.payload.len(),
            "Workflow started"
        );
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            debug!(
                execution_time = %request.execution_time,
                "Wait elapsed, invoking execution step"
            );
            handler.handle(request).await;
        });
        Ok(())
    }
}

/// Test double that records every started request and can be told to
/// reject.
#[derive(Debug, Default)]
pub struct RecordingWorkflow {
    started: RwLock<Vec<DispatchRequest>>,
    reject: AtomicBool,
}

impl RecordingWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `start` call fail.
    pub fn reject_all(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub async fn started(&self) -> Vec<DispatchRequest> {
        self.started.read().await.clone()
    }
}

#[async_trait]
impl WorkflowClient for RecordingWorkflow {
    async fn start(&self, request: DispatchRequest) -> Result<(), SchedulerError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(SchedulerError::Dispatch {
                group: request.execution_time.clone(),
                reason: "workflow rejected".into(),
            });
        }
        self.started.write().await.push(request);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DispatchPayload, MarketPhase};
    use std::sync::atomic::AtomicUsize;
    use tokio_test::assert_ok;

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DispatchHandler for CountingHandler {
        async fn handle(&self, _request: DispatchRequest) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn request(wait_seconds: i64) -> DispatchRequest {
        DispatchRequest {
            owner_id: "owner-1".to_string(),
            execution_time: "09:30".to_string(),
            wait_seconds,
            priority: MarketPhase::Open,
            payload: DispatchPayload::JustInTime {
                strategy_ids: vec!["s1".into()],
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_runner_fires_after_wait() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let runner = LocalWorkflowRunner::new(handler.clone(), WorkflowTier::Fast);

        assert_ok!(runner.start(request(5)).await);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_runner_rejects_nonpositive_wait() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let runner = LocalWorkflowRunner::new(handler, WorkflowTier::Fast);
        assert!(runner.start(request(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_local_runner_enforces_tier_ceiling() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let runner = LocalWorkflowRunner::new(handler, WorkflowTier::Fast);
        let err = runner.start(request(300)).await.unwrap_err();
        assert!(err.to_string().contains("ceiling"));
    }

    #[tokio::test]
    async fn test_recording_workflow_captures_requests() {
        let workflow = RecordingWorkflow::new();
        workflow.start(request(10)).await.unwrap();
        let started = workflow.started().await;
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].wait_seconds, 10);

        workflow.reject_all();
        assert!(workflow.start(request(10)).await.is_err());
    }
}
