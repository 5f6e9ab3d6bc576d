//! Two-factor final approval gate
//!
//! Stage 6 needs independent sign-off from the risk manager and the
//! account manager, in either order. Each approval is persisted the
//! instant it arrives, so a crash between the first and second
//! sign-off never loses the first. A rejection by either role fires
//! the kill switch with the rejecting role on record.

use crate::bus::EventBus;
use crate::kill_switch::KillSwitchGuard;
use crate::store::WorkflowStore;
use onboarding_types::{
    AuditEntry, Decision, OnboardingError, OnboardingResult, Signal, TerminationReason,
    WorkflowId,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// How the gate resolved
#[derive(Debug, PartialEq, Eq)]
pub enum GateOutcome {
    /// Both roles approved
    Completed,
    /// The window elapsed with at least one sign-off still missing
    TimedOut,
}

pub struct ApprovalGate {
    store: Arc<dyn WorkflowStore>,
    bus: Arc<EventBus>,
    guard: KillSwitchGuard,
}

impl ApprovalGate {
    pub fn new(store: Arc<dyn WorkflowStore>, bus: Arc<EventBus>, guard: KillSwitchGuard) -> Self {
        Self { store, bus, guard }
    }

    /// Collect sign-offs until both roles have approved or the window
    /// elapses. Duplicate sign-offs for an already-recorded role are
    /// ignored without an audit write.
    pub async fn await_two_factor(
        &self,
        id: &WorkflowId,
        window: Duration,
    ) -> OnboardingResult<GateOutcome> {
        let deadline = tokio::time::Instant::now() + window;

        loop {
            self.guard.guard(id, "final_approval_gate").await?;
            if self.store.get_instance(id).await?.both_approved() {
                return Ok(GateOutcome::Completed);
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(GateOutcome::TimedOut);
            }

            let signal = match self.bus.wait_for(id, "manager_approval", remaining).await? {
                Some(signal) => signal,
                None => return Ok(GateOutcome::TimedOut),
            };
            let (role, decision, manager) = match signal {
                Signal::ManagerApproval {
                    role,
                    decision,
                    manager,
                } => (role, decision, manager),
                // wait_for matched by name; anything else is a bug
                other => {
                    return Err(OnboardingError::InvariantViolation(format!(
                        "approval gate received '{}'",
                        other.event_name()
                    )))
                }
            };

            if decision == Decision::Rejected {
                self.guard
                    .execute(
                        id,
                        TerminationReason::FinalApprovalRejected { role },
                        &manager,
                        None,
                    )
                    .await?;
                return Err(OnboardingError::terminated(
                    TerminationReason::FinalApprovalRejected { role }.as_str(),
                ));
            }

            // Persist immediately, one audit event per recorded sign-off
            self.store
                .transition(
                    id,
                    Box::new(move |inst| {
                        if inst.approval_for(role).is_some() {
                            return Ok(None);
                        }
                        inst.record_approval(role, decision)?;
                        Ok(Some(AuditEntry::human(
                            "final_approval_recorded",
                            json!({
                                "role": role.as_str(),
                                "decision": decision.as_str(),
                            }),
                            manager.clone(),
                        )))
                    }),
                )
                .await?;

            tracing::info!(
                workflow_id = %id,
                role = role.as_str(),
                "final approval sign-off recorded"
            );
        }
    }
}
