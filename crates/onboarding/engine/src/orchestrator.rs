//! Saga orchestrator: the engine's public surface
//!
//! Owns the wiring (store, bus, executor, stage controller) and drives
//! one workflow instance through the six SOP stages, dispatching on
//! the persisted stage so a crashed or halted run re-enters where it
//! left off. Stage timeouts are caught exactly once, here, and turned
//! into the halted-but-recoverable Timeout status; termination is
//! never caught below this level.

use crate::analyze::RiskAnalyzer;
use crate::bus::EventBus;
use crate::config::EngineConfig;
use crate::executor::StepExecutor;
use crate::gate::ApprovalGate;
use crate::kill_switch::KillSwitchGuard;
use crate::notify::Notifier;
use crate::stages::StageController;
use crate::store::WorkflowStore;
use onboarding_feedback::{build_feedback_log, Divergence};
use onboarding_types::{
    Applicant, AuditEntry, Decision, FeedbackLog, KillSwitchRecord, OnboardingError,
    OnboardingResult, Signal, Stage, TerminationReason, WorkflowEvent, WorkflowId,
    WorkflowInstance, WorkflowStatus,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Point-in-time view of one workflow for status queries
#[derive(Clone, Debug, Serialize)]
pub struct StatusView {
    pub workflow_id: WorkflowId,
    pub stage: Stage,
    pub stage_number: u8,
    pub status: WorkflowStatus,
    pub mandate_retry_count: u32,
    pub is_overlimit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_manager_approval: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_manager_approval: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
}

pub struct OnboardingOrchestrator {
    store: Arc<dyn WorkflowStore>,
    bus: Arc<EventBus>,
    guard: KillSwitchGuard,
    controller: StageController,
}

impl OnboardingOrchestrator {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        executor: Arc<dyn StepExecutor>,
        notifier: Arc<dyn Notifier>,
        analyzer: Arc<dyn RiskAnalyzer>,
        config: EngineConfig,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let guard = KillSwitchGuard::new(store.clone(), bus.clone());
        let gate = ApprovalGate::new(store.clone(), bus.clone(), guard.clone());
        let controller = StageController::new(
            store.clone(),
            bus.clone(),
            executor,
            notifier,
            analyzer,
            guard.clone(),
            gate,
            config,
        );
        Self {
            store,
            bus,
            guard,
            controller,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Register an applicant and create its workflow instance. The
    /// saga does not start running until [`run`](Self::run) is called.
    pub async fn start_workflow(&self, applicant: Applicant) -> OnboardingResult<WorkflowId> {
        let instance = WorkflowInstance::new(applicant.id.clone(), applicant.risk_level);
        let id = instance.id.clone();

        self.store.insert_applicant(applicant.clone()).await?;
        self.store.insert_instance(instance).await?;
        self.store
            .append_event(
                &id,
                AuditEntry::system(
                    "workflow_started",
                    json!({
                        "applicant_id": applicant.id.to_string(),
                        "legal_name": applicant.legal_name,
                        "risk_level": applicant.risk_level,
                    }),
                ),
            )
            .await?;

        tracing::info!(
            workflow_id = %id,
            applicant_id = %applicant.id,
            "workflow started"
        );
        Ok(id)
    }

    /// Drive the saga to a terminal status. Returns the status rather
    /// than an error for the expected ends (Completed, Timeout,
    /// Terminated); only engine failures surface as `Err`.
    pub async fn run(&self, id: &WorkflowId) -> OnboardingResult<WorkflowStatus> {
        match self.drive(id).await {
            Ok(()) => Ok(WorkflowStatus::Completed),
            Err(OnboardingError::Timeout { stage, waiting_for }) => {
                tracing::warn!(
                    workflow_id = %id,
                    stage = %stage,
                    waiting_for = %waiting_for,
                    "workflow halted on timeout"
                );
                self.store
                    .transition(
                        id,
                        Box::new(move |inst| {
                            if inst.is_terminal() {
                                return Ok(None);
                            }
                            inst.set_status(WorkflowStatus::Timeout)?;
                            Ok(Some(AuditEntry::system(
                                "workflow_timed_out",
                                json!({ "stage": stage, "waiting_for": waiting_for }),
                            )))
                        }),
                    )
                    .await?;
                Ok(WorkflowStatus::Timeout)
            }
            Err(OnboardingError::Terminated { reason }) => {
                tracing::warn!(workflow_id = %id, reason = %reason, "workflow terminated");
                Ok(WorkflowStatus::Terminated)
            }
            Err(e) => {
                let message = e.to_string();
                self.store
                    .transition(
                        id,
                        Box::new(move |inst| {
                            if inst.is_terminal() {
                                return Ok(None);
                            }
                            inst.set_status(WorkflowStatus::Failed)?;
                            Ok(Some(AuditEntry::system(
                                "workflow_failed",
                                json!({ "error": message }),
                            )))
                        }),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    /// Stage dispatch on the persisted stage. Each stage method is
    /// internally resumable, so re-entering after a crash replays
    /// completed steps instead of re-applying them.
    async fn drive(&self, id: &WorkflowId) -> OnboardingResult<()> {
        loop {
            let instance = self.store.get_instance(id).await?;
            if instance.is_terminated() {
                return Err(OnboardingError::terminated(
                    instance
                        .termination_reason
                        .unwrap_or_else(|| "kill switch fired".to_string()),
                ));
            }
            if instance.status == WorkflowStatus::Completed {
                return Ok(());
            }

            match instance.stage {
                Stage::LeadCapture => self.controller.lead_capture(id).await?,
                Stage::FacilityQuote => self.controller.facility_quote(id).await?,
                Stage::ProcurementAi => self.controller.procurement_ai(id).await?,
                Stage::RiskReview => self.controller.risk_review(id).await?,
                Stage::Contract => self.controller.contract(id).await?,
                Stage::FinalApproval => {
                    self.controller.final_approval(id).await?;
                    return Ok(());
                }
            }
        }
    }

    /// Run the saga on its own task, logging the outcome.
    pub fn spawn(self: &Arc<Self>, id: WorkflowId) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            match orchestrator.run(&id).await {
                Ok(status) => {
                    tracing::info!(workflow_id = %id, status = %status, "workflow run finished")
                }
                Err(e) => {
                    tracing::error!(workflow_id = %id, error = %e, "workflow run failed")
                }
            }
        })
    }

    /// Re-drive a halted workflow. A Timeout or Failed instance flips
    /// back to Processing first; a terminated one is refused.
    pub async fn resume(&self, id: &WorkflowId) -> OnboardingResult<WorkflowStatus> {
        let instance = self.store.get_instance(id).await?;
        if instance.is_terminated() {
            return Err(OnboardingError::terminated(
                instance
                    .termination_reason
                    .unwrap_or_else(|| "kill switch fired".to_string()),
            ));
        }
        if instance.status == WorkflowStatus::Completed {
            return Ok(WorkflowStatus::Completed);
        }

        if matches!(
            instance.status,
            WorkflowStatus::Timeout | WorkflowStatus::Failed
        ) {
            let from = instance.status;
            self.store
                .transition(
                    id,
                    Box::new(move |inst| {
                        inst.completed_at = None;
                        inst.set_status(WorkflowStatus::Processing)?;
                        Ok(Some(AuditEntry::system(
                            "workflow_resumed",
                            json!({ "from": from.as_str() }),
                        )))
                    }),
                )
                .await?;
            tracing::info!(workflow_id = %id, from = from.as_str(), "workflow resumed");
        }

        self.run(id).await
    }

    // ── Ingress ──────────────────────────────────────────────────────

    /// Validate and route an external event into a running workflow.
    /// Malformed payloads are rejected with workflow state untouched;
    /// a manual kill is routed to the kill switch instead of the bus.
    pub async fn signal(
        &self,
        id: &WorkflowId,
        event_name: &str,
        payload: Value,
    ) -> OnboardingResult<()> {
        let signal = Signal::parse(event_name, payload)?;

        if let Signal::KillSwitch {
            reason,
            decided_by,
            notes,
        } = signal
        {
            let notes = match notes {
                Some(n) => format!("{}; {}", reason, n),
                None => reason,
            };
            return self
                .guard
                .execute(id, TerminationReason::ManualKill, &decided_by, Some(notes))
                .await;
        }

        let instance = self.store.get_instance(id).await?;
        if instance.is_terminated() {
            return Err(OnboardingError::terminated(
                instance
                    .termination_reason
                    .unwrap_or_else(|| "kill switch fired".to_string()),
            ));
        }

        let receipt = json!({ "event": event_name });
        let entry = match signal.actor_id() {
            Some(actor) => AuditEntry::human("signal_received", receipt, actor),
            None => AuditEntry::system("signal_received", receipt),
        };
        self.store.append_event(id, entry).await?;
        self.bus.send(id, signal)
    }

    /// Fire the manual kill switch directly.
    pub async fn kill(
        &self,
        id: &WorkflowId,
        decided_by: &str,
        notes: Option<String>,
    ) -> OnboardingResult<()> {
        self.guard
            .execute(id, TerminationReason::ManualKill, decided_by, notes)
            .await
    }

    // ── Queries and feedback ─────────────────────────────────────────

    pub async fn get_status(&self, id: &WorkflowId) -> OnboardingResult<StatusView> {
        let instance = self.store.get_instance(id).await?;
        Ok(StatusView {
            workflow_id: instance.id,
            stage: instance.stage,
            stage_number: instance.stage.number(),
            status: instance.status,
            mandate_retry_count: instance.mandate_retry_count,
            is_overlimit: instance.is_overlimit,
            risk_manager_approval: instance.risk_manager_approval,
            account_manager_approval: instance.account_manager_approval,
            termination_reason: instance.termination_reason,
        })
    }

    pub async fn events_for(&self, id: &WorkflowId) -> OnboardingResult<Vec<WorkflowEvent>> {
        self.store.events_for(id).await
    }

    pub async fn feedback_for(&self, id: &WorkflowId) -> OnboardingResult<Vec<FeedbackLog>> {
        self.store.feedback_for(id).await
    }

    pub async fn kill_switch_for(
        &self,
        id: &WorkflowId,
    ) -> OnboardingResult<Option<KillSwitchRecord>> {
        self.store.kill_switch_for(id).await
    }

    /// Score a human decision against the stored automated
    /// recommendation and persist the feedback row.
    pub async fn record_feedback(
        &self,
        id: &WorkflowId,
        human_outcome: &str,
        override_category: Option<String>,
    ) -> OnboardingResult<Divergence> {
        let instance = self.store.get_instance(id).await?;
        let ai_outcome = instance.ai_outcome.clone().ok_or_else(|| {
            OnboardingError::validation("no automated recommendation on file for this workflow")
        })?;

        let log = build_feedback_log(
            id.clone(),
            ai_outcome,
            instance.ai_confidence,
            human_outcome,
            override_category,
        );
        let scored = Divergence {
            is_divergent: log.is_divergent,
            weight: log.divergence_weight,
            divergence_type: log.divergence_type,
        };
        self.store.insert_feedback(log).await?;
        Ok(scored)
    }
}
