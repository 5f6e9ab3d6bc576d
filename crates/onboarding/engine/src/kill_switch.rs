//! Kill switch: the single termination authority
//!
//! Every path that ends a workflow early converges here. Firing the
//! switch flips the instance to Terminated, writes the one audit event
//! and the write-once kill record, and cancels every outstanding wait
//! on the bus. A second fire is a no-op: the original reason stands
//! and no duplicate records are written.

use crate::bus::EventBus;
use crate::store::WorkflowStore;
use onboarding_types::{
    ActorType, AuditEntry, KillSwitchRecord, OnboardingError, OnboardingResult,
    TerminationReason, WorkflowId,
};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct KillSwitchGuard {
    store: Arc<dyn WorkflowStore>,
    bus: Arc<EventBus>,
}

impl KillSwitchGuard {
    pub fn new(store: Arc<dyn WorkflowStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Step-boundary check. Called before every step and every wait so
    /// a terminated workflow can never make further progress.
    pub async fn guard(&self, id: &WorkflowId, step_name: &str) -> OnboardingResult<()> {
        let instance = self.store.get_instance(id).await?;
        if instance.is_terminated() {
            let reason = instance
                .termination_reason
                .unwrap_or_else(|| "kill switch fired".to_string());
            tracing::warn!(
                workflow_id = %id,
                step_name,
                reason = %reason,
                "step refused, workflow terminated"
            );
            return Err(OnboardingError::terminated(reason));
        }
        Ok(())
    }

    /// Fire the kill switch. Idempotent: an already-terminated workflow
    /// is left untouched and the call succeeds.
    pub async fn execute(
        &self,
        id: &WorkflowId,
        reason: TerminationReason,
        decided_by: &str,
        notes: Option<String>,
    ) -> OnboardingResult<()> {
        let reason_str = reason.as_str();
        let actor_type = if decided_by == "system" {
            ActorType::System
        } else {
            ActorType::Human
        };
        let entry_notes = notes.clone();
        let entry_actor = decided_by.to_string();

        let committed = self
            .store
            .transition(
                id,
                Box::new(move |inst| {
                    if inst.is_terminated() {
                        return Ok(None);
                    }
                    inst.terminate(reason_str)?;
                    Ok(Some(AuditEntry {
                        event_type: "workflow_terminated".to_string(),
                        payload: json!({
                            "reason": reason_str,
                            "decided_by": entry_actor.clone(),
                            "notes": entry_notes,
                        }),
                        actor_type,
                        actor_id: Some(entry_actor),
                    }))
                }),
            )
            .await?;

        if committed.is_none() {
            tracing::debug!(
                workflow_id = %id,
                reason = reason_str,
                "kill switch already fired, ignoring"
            );
            return Ok(());
        }

        let mut record = KillSwitchRecord::new(reason, decided_by);
        if let Some(n) = notes {
            record = record.with_notes(n);
        }
        self.store.put_kill_switch(id, record).await?;
        self.bus.cancel(id, reason_str)?;

        tracing::warn!(
            workflow_id = %id,
            reason = reason_str,
            decided_by,
            "kill switch fired"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use onboarding_types::{ApplicantId, RiskLevel, WorkflowInstance, WorkflowStatus};
    use std::time::Duration;

    async fn setup() -> (Arc<MemoryStore>, Arc<EventBus>, KillSwitchGuard, WorkflowId) {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new());
        let guard = KillSwitchGuard::new(store.clone(), bus.clone());
        let inst = WorkflowInstance::new(ApplicantId::new("a"), RiskLevel::Green);
        let id = inst.id.clone();
        store.insert_instance(inst).await.unwrap();
        (store, bus, guard, id)
    }

    #[tokio::test]
    async fn test_execute_terminates_and_records() {
        let (store, _bus, guard, id) = setup().await;

        guard
            .execute(&id, TerminationReason::ManualKill, "ops-1", Some("dup".into()))
            .await
            .unwrap();

        let inst = store.get_instance(&id).await.unwrap();
        assert_eq!(inst.status, WorkflowStatus::Terminated);
        assert_eq!(inst.termination_reason.as_deref(), Some("manual_kill"));

        let record = store.kill_switch_for(&id).await.unwrap().unwrap();
        assert_eq!(record.decided_by, "ops-1");
        assert_eq!(record.notes.as_deref(), Some("dup"));

        let events = store.events_for(&id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "workflow_terminated");
        assert_eq!(events[0].actor_type, ActorType::Human);
    }

    #[tokio::test]
    async fn test_second_fire_is_a_noop() {
        let (store, _bus, guard, id) = setup().await;

        guard
            .execute(&id, TerminationReason::ManualKill, "ops-1", None)
            .await
            .unwrap();
        guard
            .execute(&id, TerminationReason::QuoteRejected, "mgr-2", None)
            .await
            .unwrap();

        // First reason stands; exactly one event, one record
        let inst = store.get_instance(&id).await.unwrap();
        assert_eq!(inst.termination_reason.as_deref(), Some("manual_kill"));
        assert_eq!(store.events_for(&id).await.unwrap().len(), 1);
        let record = store.kill_switch_for(&id).await.unwrap().unwrap();
        assert_eq!(record.reason, TerminationReason::ManualKill);
    }

    #[tokio::test]
    async fn test_guard_refuses_terminated_workflow() {
        let (_store, _bus, guard, id) = setup().await;

        guard.guard(&id, "generate_quote").await.unwrap();
        guard
            .execute(&id, TerminationReason::RiskReviewRejected, "rm-1", None)
            .await
            .unwrap();

        let err = guard.guard(&id, "generate_quote").await.unwrap_err();
        assert!(matches!(err, OnboardingError::Terminated { .. }));
        assert!(err.to_string().contains("risk_review_rejected"));
    }

    #[tokio::test]
    async fn test_execute_cancels_in_flight_waits() {
        let (_store, bus, guard, id) = setup().await;

        let wait_bus = bus.clone();
        let wait_id = id.clone();
        let waiter = tokio::spawn(async move {
            wait_bus
                .wait_for(&wait_id, "mandate_confirmed", Duration::from_secs(60))
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        guard
            .execute(&id, TerminationReason::ManualKill, "system", None)
            .await
            .unwrap();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, OnboardingError::Terminated { .. }));
    }

    #[tokio::test]
    async fn test_system_actor_type() {
        let (store, _bus, guard, id) = setup().await;
        guard
            .execute(&id, TerminationReason::MandateMaxRetries, "system", None)
            .await
            .unwrap();

        let events = store.events_for(&id).await.unwrap();
        assert_eq!(events[0].actor_type, ActorType::System);
    }
}
