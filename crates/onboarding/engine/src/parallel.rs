//! Stage 3: procurement check and document collection, joined
//!
//! The automated risk check and the applicant's document upload are
//! independent, so they run as two concurrent streams and the stage
//! only advances when both have resolved. A kill trigger in the risk
//! check terminates immediately; the bus cancellation it broadcasts
//! also unwinds the sibling stream's in-flight wait.
//!
//! Whatever the automated recommendation says, the check always goes
//! to a human reviewer, and the reviewer's decision is scored against
//! the recommendation into a feedback row.

use crate::analyze::RiskAssessment;
use crate::notify::NotificationKind;
use crate::stages::{unexpected_signal, StageController};
use onboarding_feedback::build_feedback_log;
use onboarding_types::{
    AuditEntry, Decision, OnboardingError, OnboardingResult, Signal, Stage, TerminationReason,
    WorkflowId,
};
use serde_json::json;

impl StageController {
    pub async fn procurement_ai(&self, id: &WorkflowId) -> OnboardingResult<()> {
        // Phase one: fire both streams' outbound work concurrently
        tokio::try_join!(self.run_risk_check(id), self.request_documents(id))?;

        // Phase two: join on both human/document events
        self.set_awaiting(id, "procurement_review_and_documents").await?;
        tokio::try_join!(self.collect_review(id), self.collect_documents(id))?;

        self.advance(id, Stage::RiskReview).await
    }

    // ── Stream A: automated check, then mandatory human review ───────

    async fn run_risk_check(&self, id: &WorkflowId) -> OnboardingResult<()> {
        let applicant = self.applicant_for(id).await?;

        let analyzer = self.analyzer.clone();
        let check_applicant = applicant.clone();
        let recorded = self
            .durable(
                id,
                "stage3:risk_check",
                Box::new(move || {
                    let analyzer = analyzer.clone();
                    let applicant = check_applicant.clone();
                    Box::pin(async move {
                        let assessment = analyzer.analyze(&applicant).await?;
                        serde_json::to_value(&assessment)
                            .map_err(|e| OnboardingError::store(e.to_string()))
                    })
                }),
            )
            .await?;
        let assessment: RiskAssessment = serde_json::from_value(recorded)
            .map_err(|e| OnboardingError::store(e.to_string()))?;

        // Record the recommendation before acting on it, so even a
        // kill-trigger termination leaves the assessment on file.
        let outcome = assessment.recommendation.clone();
        let confidence = assessment.confidence_score;
        let flags = assessment.flags.clone();
        self.store
            .transition(
                id,
                Box::new(move |inst| {
                    if inst.ai_outcome.is_some() {
                        return Ok(None);
                    }
                    inst.record_ai_assessment(outcome.clone(), confidence)?;
                    Ok(Some(AuditEntry::system(
                        "procurement_risk_checked",
                        json!({
                            "recommendation": outcome,
                            "confidence_score": confidence,
                            "flags": flags,
                        }),
                    )))
                }),
            )
            .await?;

        if assessment.has_kill_trigger() {
            self.guard
                .execute(
                    id,
                    TerminationReason::ProcurementKillTrigger,
                    "system",
                    Some(format!("flags: {}", assessment.flags.join(", "))),
                )
                .await?;
            return Err(OnboardingError::terminated(
                TerminationReason::ProcurementKillTrigger.as_str(),
            ));
        }

        let notifier = self.notifier.clone();
        let wf = id.clone();
        let app_id = applicant.id.clone();
        let recommendation = assessment.recommendation.clone();
        self.durable(
            id,
            "stage3:request_procurement_review",
            Box::new(move || {
                let notifier = notifier.clone();
                let wf = wf.clone();
                let app_id = app_id.clone();
                let recommendation = recommendation.clone();
                Box::pin(async move {
                    notifier
                        .notify(
                            &wf,
                            &app_id,
                            NotificationKind::ActionRequired,
                            "procurement_review_requested",
                            &format!(
                                "Automated check says '{}', manual review required",
                                recommendation
                            ),
                            true,
                        )
                        .await?;
                    Ok(json!({ "requested": true }))
                })
            }),
        )
        .await?;
        Ok(())
    }

    async fn collect_review(&self, id: &WorkflowId) -> OnboardingResult<()> {
        let instance = self.store.get_instance(id).await?;
        if instance.procurement_review.is_some() {
            return Ok(());
        }

        let signal = self
            .await_signal(
                id,
                Stage::ProcurementAi,
                "procurement_review_decision",
                self.config.procurement_review_window,
            )
            .await?;
        let (decision, reviewer, notes) = match signal {
            Signal::ProcurementReviewDecision {
                decision,
                reviewer,
                notes,
            } => (decision, reviewer, notes),
            other => return Err(unexpected_signal("procurement_review", &other)),
        };

        // Score the human decision against the stored recommendation
        if let Some(ai_outcome) = instance.ai_outcome.clone() {
            let log = build_feedback_log(
                id.clone(),
                ai_outcome,
                instance.ai_confidence,
                decision.as_str(),
                notes.clone(),
            );
            if log.is_divergent {
                tracing::info!(
                    workflow_id = %id,
                    weight = log.divergence_weight,
                    "human review diverged from automated recommendation"
                );
            }
            self.store.insert_feedback(log).await?;
        }

        if decision == Decision::Rejected {
            self.guard
                .execute(id, TerminationReason::ProcurementRejected, &reviewer, notes)
                .await?;
            return Err(OnboardingError::terminated(
                TerminationReason::ProcurementRejected.as_str(),
            ));
        }

        self.store
            .transition(
                id,
                Box::new(move |inst| {
                    inst.procurement_review = Some(decision);
                    Ok(Some(AuditEntry::human(
                        "procurement_review_approved",
                        json!({ "notes": notes }),
                        reviewer.clone(),
                    )))
                }),
            )
            .await?;
        Ok(())
    }

    // ── Stream B: document collection ────────────────────────────────

    async fn request_documents(&self, id: &WorkflowId) -> OnboardingResult<()> {
        let applicant = self.applicant_for(id).await?;
        let notifier = self.notifier.clone();
        let wf = id.clone();
        let app_id = applicant.id.clone();
        self.durable(
            id,
            "stage3:request_documents",
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
                            "documents_requested",
                            "Onboarding document pack requested from the applicant",
                            true,
                        )
                        .await?;
                    Ok(json!({ "requested": true }))
                })
            }),
        )
        .await?;
        Ok(())
    }

    async fn collect_documents(&self, id: &WorkflowId) -> OnboardingResult<()> {
        if self.store.get_instance(id).await?.documents_received {
            return Ok(());
        }

        let signal = self
            .await_signal(
                id,
                Stage::ProcurementAi,
                "documents_uploaded",
                self.config.document_window,
            )
            .await?;
        let document_count = match signal {
            Signal::DocumentsUploaded { document_count } => document_count,
            other => return Err(unexpected_signal("collect_documents", &other)),
        };

        self.store
            .transition(
                id,
                Box::new(move |inst| {
                    inst.documents_received = true;
                    Ok(Some(AuditEntry::system(
                        "documents_received",
                        json!({ "document_count": document_count }),
                    )))
                }),
            )
            .await?;
        Ok(())
    }
}
