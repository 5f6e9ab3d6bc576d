//! Sequential SOP stages
//!
//! One method per stage, each written as: durable step(s), suspend on
//! the stage's human or document event, persist the outcome, advance.
//! Stage 3 runs two streams concurrently and lives in [`crate::parallel`].
//! Every step and wait passes the kill-switch guard first, so a
//! terminated workflow can never make further progress, and every
//! state transition commits exactly one audit event.

use crate::analyze::RiskAnalyzer;
use crate::bus::EventBus;
use crate::config::EngineConfig;
use crate::executor::{StepExecutor, StepFn};
use crate::gate::{ApprovalGate, GateOutcome};
use crate::kill_switch::KillSwitchGuard;
use crate::notify::{NotificationKind, Notifier};
use crate::retry::{EscalationTier, RetryOutcome, RetryPolicy};
use crate::store::WorkflowStore;
use onboarding_types::{
    Applicant, ApprovalRole, AuditEntry, Decision, OnboardingError, OnboardingResult,
    RiskLevel, Signal, Stage, TerminationReason, WorkflowId, WorkflowStatus,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub struct StageController {
    pub(crate) store: Arc<dyn WorkflowStore>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) executor: Arc<dyn StepExecutor>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) analyzer: Arc<dyn RiskAnalyzer>,
    pub(crate) guard: KillSwitchGuard,
    pub(crate) gate: ApprovalGate,
    pub(crate) config: EngineConfig,
}

impl StageController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        bus: Arc<EventBus>,
        executor: Arc<dyn StepExecutor>,
        notifier: Arc<dyn Notifier>,
        analyzer: Arc<dyn RiskAnalyzer>,
        guard: KillSwitchGuard,
        gate: ApprovalGate,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            bus,
            executor,
            notifier,
            analyzer,
            guard,
            gate,
            config,
        }
    }

    // ── Shared plumbing ──────────────────────────────────────────────

    /// Guarded durable step: refuse if terminated, then run with replay
    /// deduplication.
    pub(crate) async fn durable(
        &self,
        id: &WorkflowId,
        step_id: &str,
        step: StepFn,
    ) -> OnboardingResult<Value> {
        self.guard.guard(id, step_id).await?;
        self.executor.run_step(id, step_id, step).await
    }

    /// Suspend on a named event; an elapsed window becomes the stage's
    /// timeout error, caught once at the orchestrator boundary.
    pub(crate) async fn await_signal(
        &self,
        id: &WorkflowId,
        stage: Stage,
        event_name: &'static str,
        window: Duration,
    ) -> OnboardingResult<Signal> {
        self.guard.guard(id, event_name).await?;
        match self.bus.wait_for(id, event_name, window).await? {
            Some(signal) => Ok(signal),
            None => Err(OnboardingError::timeout(stage.name(), event_name)),
        }
    }

    pub(crate) async fn set_awaiting(
        &self,
        id: &WorkflowId,
        waiting_for: &'static str,
    ) -> OnboardingResult<()> {
        self.store
            .transition(
                id,
                Box::new(move |inst| {
                    if inst.status == WorkflowStatus::AwaitingHuman {
                        return Ok(None);
                    }
                    inst.set_status(WorkflowStatus::AwaitingHuman)?;
                    Ok(Some(AuditEntry::system(
                        "awaiting_input",
                        json!({ "waiting_for": waiting_for }),
                    )))
                }),
            )
            .await?;
        Ok(())
    }

    pub(crate) async fn advance(&self, id: &WorkflowId, to: Stage) -> OnboardingResult<()> {
        self.store
            .transition(
                id,
                Box::new(move |inst| {
                    inst.advance_to(to)?;
                    inst.set_status(WorkflowStatus::Processing)?;
                    Ok(Some(AuditEntry::system(
                        "stage_advanced",
                        json!({ "to": to.name(), "stage_number": to.number() }),
                    )))
                }),
            )
            .await?;
        tracing::info!(workflow_id = %id, stage = to.name(), "stage advanced");
        Ok(())
    }

    pub(crate) async fn applicant_for(&self, id: &WorkflowId) -> OnboardingResult<Applicant> {
        let instance = self.store.get_instance(id).await?;
        self.store.get_applicant(&instance.applicant_id).await
    }

    // ── Stage 1: lead capture ────────────────────────────────────────

    pub async fn lead_capture(&self, id: &WorkflowId) -> OnboardingResult<()> {
        let applicant = self.applicant_for(id).await?;

        let notifier = self.notifier.clone();
        let wf = id.clone();
        let app = applicant.clone();
        self.durable(
            id,
            "stage1:register_lead",
            Box::new(move || {
                let notifier = notifier.clone();
                let wf = wf.clone();
                let app = app.clone();
                Box::pin(async move {
                    notifier
                        .notify(
                            &wf,
                            &app.id,
                            NotificationKind::ActionRequired,
                            "facility_application_requested",
                            &format!("Application form sent to {}", app.legal_name),
                            true,
                        )
                        .await?;
                    Ok(json!({ "lead_registered": true, "segment": app.segment }))
                })
            }),
        )
        .await?;

        // Skipped on resume once the application is already captured
        if self.store.get_instance(id).await?.requested_amount.is_none() {
            self.set_awaiting(id, "facility_application_submitted").await?;
            let signal = self
                .await_signal(
                    id,
                    Stage::LeadCapture,
                    "facility_application_submitted",
                    self.config.application_window,
                )
                .await?;
            let (requested_amount, product) = match signal {
                Signal::FacilityApplicationSubmitted {
                    requested_amount,
                    product,
                } => (requested_amount, product),
                other => return Err(unexpected_signal("lead_capture", &other)),
            };

            self.store
                .transition(
                    id,
                    Box::new(move |inst| {
                        inst.requested_amount = Some(requested_amount);
                        inst.set_status(WorkflowStatus::Processing)?;
                        Ok(Some(AuditEntry::system(
                            "application_captured",
                            json!({
                                "requested_amount": requested_amount,
                                "product": product,
                            }),
                        )))
                    }),
                )
                .await?;
        }

        self.advance(id, Stage::FacilityQuote).await
    }

    // ── Stage 2: facility quote and mandate ──────────────────────────

    pub async fn facility_quote(&self, id: &WorkflowId) -> OnboardingResult<()> {
        let instance = self.store.get_instance(id).await?;
        let applicant = self.store.get_applicant(&instance.applicant_id).await?;
        let amount = instance.requested_amount.ok_or_else(|| {
            OnboardingError::InvariantViolation(
                "quote requested before application captured".into(),
            )
        })?;
        let overlimit = amount > self.config.overlimit_threshold;

        let notifier = self.notifier.clone();
        let wf = id.clone();
        let app_id = applicant.id.clone();
        let segment = applicant.segment.clone();
        self.durable(
            id,
            "stage2:generate_quote",
            Box::new(move || {
                let notifier = notifier.clone();
                let wf = wf.clone();
                let app_id = app_id.clone();
                let segment = segment.clone();
                Box::pin(async move {
                    let kind = if overlimit {
                        NotificationKind::Escalation
                    } else {
                        NotificationKind::ActionRequired
                    };
                    let message = if overlimit {
                        format!("Overlimit quote of {} awaiting manager decision", amount)
                    } else {
                        format!("Quote of {} awaiting manager decision", amount)
                    };
                    notifier
                        .notify(&wf, &app_id, kind, "quote_ready_for_decision", &message, true)
                        .await?;
                    Ok(json!({
                        "amount": amount,
                        "segment": segment,
                        "is_overlimit": overlimit,
                    }))
                })
            }),
        )
        .await?;

        if instance.quote_decision.is_none() {
            self.store
                .transition(
                    id,
                    Box::new(move |inst| {
                        inst.is_overlimit = overlimit;
                        Ok(Some(AuditEntry::system(
                            "quote_generated",
                            json!({ "amount": amount, "is_overlimit": overlimit }),
                        )))
                    }),
                )
                .await?;

            self.set_awaiting(id, "quote_decision").await?;
            let signal = self
                .await_signal(
                    id,
                    Stage::FacilityQuote,
                    "quote_decision",
                    self.config.quote_window,
                )
                .await?;
            let (decision, decided_by) = match signal {
                Signal::QuoteDecision {
                    decision,
                    decided_by,
                } => (decision, decided_by),
                other => return Err(unexpected_signal("facility_quote", &other)),
            };

            if decision == Decision::Rejected {
                self.guard
                    .execute(id, TerminationReason::QuoteRejected, &decided_by, None)
                    .await?;
                return Err(OnboardingError::terminated(
                    TerminationReason::QuoteRejected.as_str(),
                ));
            }

            self.store
                .transition(
                    id,
                    Box::new(move |inst| {
                        inst.quote_decision = Some(decision);
                        inst.set_status(WorkflowStatus::Processing)?;
                        Ok(Some(AuditEntry::human(
                            "quote_approved",
                            json!({ "amount": amount }),
                            decided_by.clone(),
                        )))
                    }),
                )
                .await?;
        }

        self.collect_mandate(id, &applicant).await
    }

    /// Mandate collection: up to `mandate_max_attempts` request cycles,
    /// escalating at attempt 4 (operator follow-up) and attempt 7
    /// (at risk of termination). Resume restarts at the persisted
    /// counter, never from attempt 1.
    async fn collect_mandate(&self, id: &WorkflowId, applicant: &Applicant) -> OnboardingResult<()> {
        let instance = self.store.get_instance(id).await?;
        let policy = RetryPolicy::new(
            self.config.mandate_max_attempts,
            self.config.mandate_retry_interval,
        )
        .with_tier(4, 1, "operator_follow_up")
        .with_tier(7, 2, "at_risk_of_termination");

        let outcome = policy
            .run_from(
                instance.mandate_retry_count + 1,
                |attempt, tier| self.mandate_attempt(id, applicant, attempt, tier),
                |_, interval| self.bus.wait_for(id, "mandate_confirmed", interval),
            )
            .await?;

        match outcome {
            RetryOutcome::Resolved(Signal::MandateConfirmed { mandate_reference }) => {
                // Confirmation and stage advance commit together, so a
                // crash cannot burn a mandate attempt on a signed mandate.
                self.store
                    .transition(
                        id,
                        Box::new(move |inst| {
                            inst.advance_to(Stage::ProcurementAi)?;
                            inst.set_status(WorkflowStatus::Processing)?;
                            Ok(Some(AuditEntry::system(
                                "mandate_secured",
                                json!({
                                    "mandate_reference": mandate_reference,
                                    "attempts": inst.mandate_retry_count,
                                }),
                            )))
                        }),
                    )
                    .await?;
                tracing::info!(workflow_id = %id, "mandate secured, advancing to procurement");
                Ok(())
            }
            RetryOutcome::Resolved(other) => Err(unexpected_signal("collect_mandate", &other)),
            RetryOutcome::Exhausted => self.mandate_exhausted(id, applicant).await,
        }
    }

    async fn mandate_attempt(
        &self,
        id: &WorkflowId,
        applicant: &Applicant,
        attempt: u32,
        tier: Option<EscalationTier>,
    ) -> OnboardingResult<()> {
        self.guard.guard(id, "mandate_request").await?;

        let tier_label = tier.map(|t| t.label);
        self.store
            .transition(
                id,
                Box::new(move |inst| {
                    let counted = inst.count_mandate_attempt()?;
                    inst.set_status(WorkflowStatus::AwaitingHuman)?;
                    Ok(Some(AuditEntry::system(
                        "mandate_requested",
                        json!({ "attempt": counted, "escalation": tier_label }),
                    )))
                }),
            )
            .await?;

        let (kind, title, message) = match tier {
            Some(t) if t.level >= 2 => (
                NotificationKind::Escalation,
                "mandate_at_risk_of_termination",
                format!(
                    "Mandate attempt {} of {}: workflow terminates without a signature",
                    attempt, self.config.mandate_max_attempts
                ),
            ),
            Some(_) => (
                NotificationKind::Escalation,
                "mandate_operator_follow_up",
                format!("Mandate unsigned after {} requests, call the applicant", attempt - 1),
            ),
            None => (
                NotificationKind::ActionRequired,
                "mandate_signature_requested",
                format!("Direct-debit mandate sent for signature (attempt {})", attempt),
            ),
        };
        self.notifier
            .notify(id, &applicant.id, kind, title, &message, true)
            .await
    }

    async fn mandate_exhausted(
        &self,
        id: &WorkflowId,
        applicant: &Applicant,
    ) -> OnboardingResult<()> {
        let salvaged_by = match self.config.salvage_window {
            Some(grace) => {
                self.notifier
                    .notify(
                        id,
                        &applicant.id,
                        NotificationKind::Escalation,
                        "mandate_exhausted_salvage_window",
                        "All mandate attempts exhausted, salvage override window open",
                        true,
                    )
                    .await?;
                match self.bus.wait_for(id, "salvage_override", grace).await? {
                    Some(Signal::SalvageOverride { authorized_by }) => Some(authorized_by),
                    _ => None,
                }
            }
            None => None,
        };

        match salvaged_by {
            Some(authorized_by) => {
                self.store
                    .transition(
                        id,
                        Box::new(move |inst| {
                            inst.advance_to(Stage::ProcurementAi)?;
                            inst.set_status(WorkflowStatus::Processing)?;
                            Ok(Some(AuditEntry::human(
                                "mandate_salvaged",
                                json!({ "attempts": inst.mandate_retry_count }),
                                authorized_by.clone(),
                            )))
                        }),
                    )
                    .await?;
                tracing::warn!(workflow_id = %id, "mandate exhaustion salvaged by override");
                Ok(())
            }
            None => {
                self.guard
                    .execute(id, TerminationReason::MandateMaxRetries, "system", None)
                    .await?;
                Err(OnboardingError::terminated(
                    TerminationReason::MandateMaxRetries.as_str(),
                ))
            }
        }
    }

    // ── Stage 4: risk review ─────────────────────────────────────────

    pub async fn risk_review(&self, id: &WorkflowId) -> OnboardingResult<()> {
        let applicant = self.applicant_for(id).await?;

        let store = self.store.clone();
        let notifier = self.notifier.clone();
        let wf = id.clone();
        self.durable(
            id,
            "stage4:compile_risk_file",
            Box::new(move || {
                let store = store.clone();
                let notifier = notifier.clone();
                let wf = wf.clone();
                Box::pin(async move {
                    let instance = store.get_instance(&wf).await?;
                    let events = store.events_for(&wf).await?;
                    notifier
                        .notify(
                            &wf,
                            &instance.applicant_id,
                            NotificationKind::ActionRequired,
                            "risk_file_ready",
                            "Compiled risk file awaiting risk manager review",
                            true,
                        )
                        .await?;
                    Ok(json!({
                        "event_count": events.len(),
                        "ai_outcome": instance.ai_outcome,
                        "ai_confidence": instance.ai_confidence,
                        "is_overlimit": instance.is_overlimit,
                    }))
                })
            }),
        )
        .await?;

        self.set_awaiting(id, "risk_review_decision").await?;
        let signal = self
            .await_signal(
                id,
                Stage::RiskReview,
                "risk_review_decision",
                self.config.risk_review_window,
            )
            .await?;
        let (decision, reviewer) = match signal {
            Signal::RiskReviewDecision { decision, reviewer } => (decision, reviewer),
            other => return Err(unexpected_signal("risk_review", &other)),
        };

        if decision == Decision::Rejected {
            self.guard
                .execute(id, TerminationReason::RiskReviewRejected, &reviewer, None)
                .await?;
            return Err(OnboardingError::terminated(
                TerminationReason::RiskReviewRejected.as_str(),
            ));
        }

        self.store
            .transition(
                id,
                Box::new(move |inst| {
                    inst.set_status(WorkflowStatus::Processing)?;
                    Ok(Some(AuditEntry::human(
                        "risk_review_approved",
                        json!({}),
                        reviewer.clone(),
                    )))
                }),
            )
            .await?;

        // Red applicants carry an extra financial-statement sub-gate
        if applicant.risk_level == RiskLevel::Red {
            let notifier = self.notifier.clone();
            let wf = id.clone();
            let app_id = applicant.id.clone();
            self.durable(
                id,
                "stage4:request_financial_statements",
                Box::new(move || {
                    let notifier = notifier.clone();
                    let wf = wf.clone();
                    let app_id = app_id.clone();
                    Box::pin(async move {
                        notifier
                            .notify(
                                &wf,
                                &app_id,
                                NotificationKind::ActionRequired,
                                "financial_statements_requested",
                                "Red-band applicant, financial statements required",
                                true,
                            )
                            .await?;
                        Ok(json!({ "requested": true }))
                    })
                }),
            )
            .await?;

            self.set_awaiting(id, "financial_statement_confirmed").await?;
            let signal = self
                .await_signal(
                    id,
                    Stage::RiskReview,
                    "financial_statement_confirmed",
                    self.config.financial_statement_window,
                )
                .await?;
            let confirmed_by = match signal {
                Signal::FinancialStatementConfirmed { confirmed_by } => confirmed_by,
                other => return Err(unexpected_signal("risk_review", &other)),
            };
            self.store
                .transition(
                    id,
                    Box::new(move |inst| {
                        inst.set_status(WorkflowStatus::Processing)?;
                        Ok(Some(AuditEntry::human(
                            "financial_statement_recorded",
                            json!({}),
                            confirmed_by.clone(),
                        )))
                    }),
                )
                .await?;
        }

        self.advance(id, Stage::Contract).await
    }

    // ── Stage 5: contract ────────────────────────────────────────────

    pub async fn contract(&self, id: &WorkflowId) -> OnboardingResult<()> {
        let applicant = self.applicant_for(id).await?;

        let notifier = self.notifier.clone();
        let wf = id.clone();
        let app_id = applicant.id.clone();
        self.durable(
            id,
            "stage5:issue_contract",
            Box::new(move || {
                let notifier = notifier.clone();
                let wf = wf.clone();
                let app_id = app_id.clone();
                Box::pin(async move {
                    notifier
                        .notify(
                            &wf,
                            &app_id,
                            NotificationKind::ActionRequired,
                            "contract_issued",
                            "Facility contract issued for countersignature",
                            true,
                        )
                        .await?;
                    Ok(json!({ "contract_issued": true }))
                })
            }),
        )
        .await?;

        self.set_awaiting(id, "contract_signed").await?;
        let signal = self
            .await_signal(
                id,
                Stage::Contract,
                "contract_signed",
                self.config.contract_window,
            )
            .await?;
        let signatory = match signal {
            Signal::ContractSigned { signatory } => signatory,
            other => return Err(unexpected_signal("contract", &other)),
        };

        self.store
            .transition(
                id,
                Box::new(move |inst| {
                    inst.set_status(WorkflowStatus::Processing)?;
                    Ok(Some(AuditEntry::human(
                        "contract_signed_recorded",
                        json!({}),
                        signatory.clone(),
                    )))
                }),
            )
            .await?;

        self.advance(id, Stage::FinalApproval).await
    }

    // ── Stage 6: two-factor final approval ───────────────────────────

    pub async fn final_approval(&self, id: &WorkflowId) -> OnboardingResult<()> {
        let applicant = self.applicant_for(id).await?;
        let instance = self.store.get_instance(id).await?;

        // Only ask roles whose sign-off is still missing (resume skips)
        for (role, step_id, title) in [
            (
                ApprovalRole::RiskManager,
                "stage6:request_risk_manager_signoff",
                "risk_manager_signoff_requested",
            ),
            (
                ApprovalRole::AccountManager,
                "stage6:request_account_manager_signoff",
                "account_manager_signoff_requested",
            ),
        ] {
            if instance.approval_for(role).is_some() {
                continue;
            }
            let notifier = self.notifier.clone();
            let wf = id.clone();
            let app_id = applicant.id.clone();
            self.durable(
                id,
                step_id,
                Box::new(move || {
                    let notifier = notifier.clone();
                    let wf = wf.clone();
                    let app_id = app_id.clone();
                    Box::pin(async move {
                        notifier
                            .notify(
                                &wf,
                                &app_id,
                                NotificationKind::ActionRequired,
                                title,
                                "Independent final sign-off required",
                                true,
                            )
                            .await?;
                        Ok(json!({ "requested": true }))
                    })
                }),
            )
            .await?;
        }

        self.set_awaiting(id, "manager_approval").await?;
        match self
            .gate
            .await_two_factor(id, self.config.approval_window)
            .await?
        {
            GateOutcome::Completed => {
                self.store
                    .transition(
                        id,
                        Box::new(|inst| {
                            inst.set_status(WorkflowStatus::Completed)?;
                            Ok(Some(AuditEntry::system(
                                "workflow_completed",
                                json!({ "stage": Stage::FinalApproval.name() }),
                            )))
                        }),
                    )
                    .await?;
                tracing::info!(workflow_id = %id, "onboarding completed");
                Ok(())
            }
            GateOutcome::TimedOut => Err(OnboardingError::timeout(
                Stage::FinalApproval.name(),
                "manager_approval",
            )),
        }
    }
}

pub(crate) fn unexpected_signal(context: &str, signal: &Signal) -> OnboardingError {
    OnboardingError::InvariantViolation(format!(
        "{} received unexpected '{}'",
        context,
        signal.event_name()
    ))
}
