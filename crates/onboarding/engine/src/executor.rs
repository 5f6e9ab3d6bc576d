//! Durable step execution
//!
//! Steps are the engine's checkpoints: every side-effecting block of a
//! stage runs under a named step id. A step that already completed is
//! never re-applied — replay returns the recorded result — which is
//! what makes crash/resume safe. Transient I/O failures are retried
//! here, invisibly to stage logic.

use crate::store::WorkflowStore;
use async_trait::async_trait;
use futures::future::BoxFuture;
use onboarding_types::{OnboardingResult, WorkflowId};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// The body of a step. Re-invocable so transient failures can retry.
pub type StepFuture = BoxFuture<'static, OnboardingResult<Value>>;
pub type StepFn = Box<dyn Fn() -> StepFuture + Send + Sync>;

/// Durable, at-least-once step execution with per-step-id
/// deduplication.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn run_step(
        &self,
        workflow_id: &WorkflowId,
        step_id: &str,
        step: StepFn,
    ) -> OnboardingResult<Value>;
}

/// Step executor backed by the workflow store's step log.
pub struct DurableStepExecutor {
    store: Arc<dyn WorkflowStore>,
    transient_retry_limit: u32,
}

impl DurableStepExecutor {
    pub fn new(store: Arc<dyn WorkflowStore>, transient_retry_limit: u32) -> Self {
        Self {
            store,
            transient_retry_limit,
        }
    }
}

#[async_trait]
impl StepExecutor for DurableStepExecutor {
    async fn run_step(
        &self,
        workflow_id: &WorkflowId,
        step_id: &str,
        step: StepFn,
    ) -> OnboardingResult<Value> {
        if let Some(recorded) = self.store.step_result(workflow_id, step_id).await? {
            tracing::debug!(
                workflow_id = %workflow_id,
                step_id,
                "replaying completed step"
            );
            return Ok(recorded);
        }

        let mut attempt: u32 = 0;
        loop {
            match step().await {
                Ok(value) => {
                    self.store
                        .record_step(workflow_id, step_id, value.clone())
                        .await?;
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.transient_retry_limit => {
                    attempt += 1;
                    tracing::warn!(
                        workflow_id = %workflow_id,
                        step_id,
                        attempt,
                        error = %e,
                        "transient step failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use onboarding_types::{ApplicantId, OnboardingError, RiskLevel, WorkflowInstance};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn setup() -> (Arc<MemoryStore>, WorkflowId) {
        let store = Arc::new(MemoryStore::new());
        let inst = WorkflowInstance::new(ApplicantId::new("a"), RiskLevel::Green);
        let id = inst.id.clone();
        store.insert_instance(inst).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_replay_does_not_rerun_side_effects() {
        let (store, id) = setup().await;
        let executor = DurableStepExecutor::new(store.clone(), 3);
        let runs = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let runs = runs.clone();
            let result = executor
                .run_step(
                    &id,
                    "stage1:register_lead",
                    Box::new(move || {
                        let runs = runs.clone();
                        Box::pin(async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            Ok(json!({"done": true}))
                        })
                    }),
                )
                .await
                .unwrap();
            assert_eq!(result, json!({"done": true}));
        }

        // Ran once, replayed twice
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_internally() {
        let (store, id) = setup().await;
        let executor = DurableStepExecutor::new(store, 3);
        let runs = Arc::new(AtomicU32::new(0));

        let runs_in_step = runs.clone();
        let result = executor
            .run_step(
                &id,
                "flaky",
                Box::new(move || {
                    let runs = runs_in_step.clone();
                    Box::pin(async move {
                        if runs.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(OnboardingError::Transient("connection reset".into()))
                        } else {
                            Ok(json!("ok"))
                        }
                    })
                }),
            )
            .await
            .unwrap();

        assert_eq!(result, json!("ok"));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_retries_are_bounded() {
        let (store, id) = setup().await;
        let executor = DurableStepExecutor::new(store.clone(), 2);

        let err = executor
            .run_step(
                &id,
                "always-flaky",
                Box::new(|| {
                    Box::pin(async { Err(OnboardingError::Transient("io".into())) })
                }),
            )
            .await
            .unwrap_err();

        assert!(err.is_transient());
        // Nothing recorded for a failed step
        assert!(store
            .step_result(&id, "always-flaky")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_non_transient_errors_propagate_immediately() {
        let (store, id) = setup().await;
        let executor = DurableStepExecutor::new(store, 5);
        let runs = Arc::new(AtomicU32::new(0));

        let runs_in_step = runs.clone();
        let err = executor
            .run_step(
                &id,
                "fatal",
                Box::new(move || {
                    let runs = runs_in_step.clone();
                    Box::pin(async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Err(OnboardingError::terminated("kill switch fired"))
                    })
                }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, OnboardingError::Terminated { .. }));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
