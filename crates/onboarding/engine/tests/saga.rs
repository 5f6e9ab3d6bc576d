//! End-to-end saga runs through the orchestrator's public surface.
//!
//! Signals are injected through `signal()` so every scenario also
//! exercises ingress validation and audit receipts. The bus queues
//! undelivered signals, so scenarios can enqueue a whole script up
//! front and drive the saga synchronously.

use onboarding_engine::analyze::{RiskAssessment, StaticAnalyzer, KILL_TRIGGER_FLAG};
use onboarding_engine::config::EngineConfig;
use onboarding_engine::executor::DurableStepExecutor;
use onboarding_engine::notify::RecordingNotifier;
use onboarding_engine::orchestrator::OnboardingOrchestrator;
use onboarding_engine::store::MemoryStore;
use onboarding_types::{
    Applicant, Decision, OnboardingError, RiskLevel, Stage, WorkflowId, WorkflowStatus,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Saga {
    orchestrator: Arc<OnboardingOrchestrator>,
    notifier: Arc<RecordingNotifier>,
}

fn saga_with(config: EngineConfig, analyzer: StaticAnalyzer) -> Saga {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let executor = Arc::new(DurableStepExecutor::new(
        store.clone(),
        config.transient_retry_limit,
    ));
    let notifier = Arc::new(RecordingNotifier::new());
    let orchestrator = Arc::new(OnboardingOrchestrator::new(
        store,
        executor,
        notifier.clone(),
        Arc::new(analyzer),
        config,
    ));
    Saga {
        orchestrator,
        notifier,
    }
}

fn saga(config: EngineConfig) -> Saga {
    saga_with(config, StaticAnalyzer::approving())
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        application_window: Duration::from_millis(300),
        quote_window: Duration::from_millis(300),
        mandate_retry_interval: Duration::from_millis(300),
        procurement_review_window: Duration::from_millis(300),
        document_window: Duration::from_millis(300),
        risk_review_window: Duration::from_millis(300),
        financial_statement_window: Duration::from_millis(300),
        contract_window: Duration::from_millis(300),
        approval_window: Duration::from_millis(300),
        ..EngineConfig::default()
    }
}

async fn start(s: &Saga, risk: RiskLevel) -> WorkflowId {
    s.orchestrator
        .start_workflow(Applicant::new("app-1", "Acme GmbH").with_risk_level(risk))
        .await
        .unwrap()
}

/// Queue the full happy-path script up to (not including) the final
/// approvals.
async fn script_through_contract(s: &Saga, id: &WorkflowId, amount: u64) {
    let o = &s.orchestrator;
    o.signal(
        id,
        "facility_application_submitted",
        json!({"requested_amount": amount, "product": "invoice_finance"}),
    )
    .await
    .unwrap();
    o.signal(
        id,
        "quote_decision",
        json!({"decision": "approved", "decided_by": "mgr-1"}),
    )
    .await
    .unwrap();
    o.signal(id, "mandate_confirmed", json!({"mandate_reference": "MND-1"}))
        .await
        .unwrap();
    o.signal(
        id,
        "procurement_review_decision",
        json!({"decision": "approved", "reviewer": "rev-1"}),
    )
    .await
    .unwrap();
    o.signal(id, "documents_uploaded", json!({"document_count": 3}))
        .await
        .unwrap();
    o.signal(
        id,
        "risk_review_decision",
        json!({"decision": "approved", "reviewer": "rm-1"}),
    )
    .await
    .unwrap();
    o.signal(id, "contract_signed", json!({"signatory": "ceo-acme"}))
        .await
        .unwrap();
}

async fn send_approval(s: &Saga, id: &WorkflowId, role: &str, decision: &str, manager: &str) {
    s.orchestrator
        .signal(
            id,
            "manager_approval",
            json!({"role": role, "decision": decision, "manager": manager}),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_happy_path_completes_all_six_stages() {
    let s = saga(fast_config());
    let id = start(&s, RiskLevel::Green).await;

    script_through_contract(&s, &id, 100_000).await;
    // Approvals in reverse order: account manager first
    send_approval(&s, &id, "account_manager", "approved", "am-1").await;
    send_approval(&s, &id, "risk_manager", "approved", "rm-2").await;

    let status = s.orchestrator.run(&id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Completed);

    let view = s.orchestrator.get_status(&id).await.unwrap();
    assert_eq!(view.stage, Stage::FinalApproval);
    assert_eq!(view.status, WorkflowStatus::Completed);
    assert!(!view.is_overlimit);
    assert_eq!(view.risk_manager_approval, Some(Decision::Approved));
    assert_eq!(view.account_manager_approval, Some(Decision::Approved));

    // Audit trail: strictly ordered, bookended by start and completion
    let events = s.orchestrator.events_for(&id).await.unwrap();
    assert_eq!(events[0].event_type, "workflow_started");
    assert_eq!(events.last().unwrap().event_type, "workflow_completed");
    for pair in events.windows(2) {
        assert_eq!(pair[1].sequence, pair[0].sequence + 1);
    }

    // One feedback row from the procurement review, in agreement
    let feedback = s.orchestrator.feedback_for(&id).await.unwrap();
    assert_eq!(feedback.len(), 1);
    assert!(!feedback[0].is_divergent);
}

#[tokio::test]
async fn test_red_applicant_needs_financial_statements() {
    let s = saga(fast_config());
    let id = start(&s, RiskLevel::Red).await;

    script_through_contract(&s, &id, 100_000).await;
    s.orchestrator
        .signal(
            &id,
            "financial_statement_confirmed",
            json!({"confirmed_by": "rm-1"}),
        )
        .await
        .unwrap();
    send_approval(&s, &id, "risk_manager", "approved", "rm-2").await;
    send_approval(&s, &id, "account_manager", "approved", "am-1").await;

    let status = s.orchestrator.run(&id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Completed);

    let events = s.orchestrator.events_for(&id).await.unwrap();
    assert!(events
        .iter()
        .any(|e| e.event_type == "financial_statement_recorded"));
}

#[tokio::test]
async fn test_overlimit_quote_passes_the_same_gate() {
    let s = saga(fast_config());
    let id = start(&s, RiskLevel::Green).await;

    script_through_contract(&s, &id, 400_000).await; // above 250k threshold
    send_approval(&s, &id, "risk_manager", "approved", "rm-2").await;
    send_approval(&s, &id, "account_manager", "approved", "am-1").await;

    let status = s.orchestrator.run(&id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Completed);
    assert!(s.orchestrator.get_status(&id).await.unwrap().is_overlimit);
}

#[tokio::test]
async fn test_quote_rejection_terminates_the_saga() {
    let s = saga(fast_config());
    let id = start(&s, RiskLevel::Green).await;

    s.orchestrator
        .signal(
            &id,
            "facility_application_submitted",
            json!({"requested_amount": 50_000, "product": "loan"}),
        )
        .await
        .unwrap();
    s.orchestrator
        .signal(
            &id,
            "quote_decision",
            json!({"decision": "rejected", "decided_by": "mgr-1"}),
        )
        .await
        .unwrap();

    let status = s.orchestrator.run(&id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Terminated);

    let view = s.orchestrator.get_status(&id).await.unwrap();
    assert_eq!(view.termination_reason.as_deref(), Some("quote_rejected"));

    let record = s.orchestrator.kill_switch_for(&id).await.unwrap().unwrap();
    assert_eq!(record.decided_by, "mgr-1");
}

#[tokio::test]
async fn test_mandate_exhaustion_terminates_after_eight_attempts() {
    let mut config = fast_config();
    config.mandate_retry_interval = Duration::from_millis(5);
    let s = saga(config);
    let id = start(&s, RiskLevel::Green).await;

    s.orchestrator
        .signal(
            &id,
            "facility_application_submitted",
            json!({"requested_amount": 50_000, "product": "loan"}),
        )
        .await
        .unwrap();
    s.orchestrator
        .signal(
            &id,
            "quote_decision",
            json!({"decision": "approved", "decided_by": "mgr-1"}),
        )
        .await
        .unwrap();
    // No mandate ever arrives

    let status = s.orchestrator.run(&id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Terminated);

    let view = s.orchestrator.get_status(&id).await.unwrap();
    assert_eq!(view.mandate_retry_count, 8);
    assert!(view
        .termination_reason
        .as_deref()
        .unwrap()
        .contains("max_retries"));

    // Escalation notifications fired at attempts 4 and 7
    let titles = s.notifier.titles();
    assert!(titles.contains(&"mandate_operator_follow_up".to_string()));
    assert!(titles.contains(&"mandate_at_risk_of_termination".to_string()));

    // Exactly one termination event despite eight failed cycles
    let events = s.orchestrator.events_for(&id).await.unwrap();
    assert_eq!(
        events
            .iter()
            .filter(|e| e.event_type == "workflow_terminated")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_mid_mandate_state_is_observable_and_killable() {
    let mut config = fast_config();
    config.mandate_retry_interval = Duration::from_millis(40);
    let s = saga(config);
    let id = start(&s, RiskLevel::Green).await;

    s.orchestrator
        .signal(
            &id,
            "facility_application_submitted",
            json!({"requested_amount": 50_000, "product": "loan"}),
        )
        .await
        .unwrap();
    s.orchestrator
        .signal(
            &id,
            "quote_decision",
            json!({"decision": "approved", "decided_by": "mgr-1"}),
        )
        .await
        .unwrap();

    let handle = s.orchestrator.spawn(id.clone());
    tokio::time::sleep(Duration::from_millis(120)).await;

    let view = s.orchestrator.get_status(&id).await.unwrap();
    assert_eq!(view.status, WorkflowStatus::AwaitingHuman);
    assert!(view.mandate_retry_count >= 2);
    assert!(view.mandate_retry_count < 8);

    // Kill mid-cycle: the in-flight wait unwinds immediately
    s.orchestrator
        .signal(
            &id,
            "kill_switch",
            json!({"reason": "applicant withdrew", "decided_by": "ops-1"}),
        )
        .await
        .unwrap();
    handle.await.unwrap();

    let view = s.orchestrator.get_status(&id).await.unwrap();
    assert_eq!(view.status, WorkflowStatus::Terminated);
    assert_eq!(view.termination_reason.as_deref(), Some("manual_kill"));
}

#[tokio::test]
async fn test_kill_switch_terminates_procurement_kill_trigger() {
    let flagged =
        StaticAnalyzer::new(RiskAssessment::new("DECLINE", 99).with_flag(KILL_TRIGGER_FLAG));
    let s = saga_with(fast_config(), flagged);
    let id = start(&s, RiskLevel::Green).await;

    script_through_contract(&s, &id, 100_000).await;

    let status = s.orchestrator.run(&id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Terminated);
    assert_eq!(
        s.orchestrator
            .get_status(&id)
            .await
            .unwrap()
            .termination_reason
            .as_deref(),
        Some("procurement_kill_trigger")
    );
}

#[tokio::test]
async fn test_final_rejection_names_the_role() {
    let s = saga(fast_config());
    let id = start(&s, RiskLevel::Green).await;

    script_through_contract(&s, &id, 100_000).await;
    send_approval(&s, &id, "account_manager", "approved", "am-1").await;
    send_approval(&s, &id, "risk_manager", "rejected", "rm-2").await;

    let status = s.orchestrator.run(&id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Terminated);
    assert_eq!(
        s.orchestrator
            .get_status(&id)
            .await
            .unwrap()
            .termination_reason
            .as_deref(),
        Some("final_approval_rejected_by_risk_manager")
    );
}

#[tokio::test]
async fn test_timeout_halts_then_resume_continues() {
    let mut config = fast_config();
    config.application_window = Duration::from_millis(40);
    config.quote_window = Duration::from_millis(40);
    let s = saga(config);
    let id = start(&s, RiskLevel::Green).await;

    // Nothing arrives: stage 1 times out
    let status = s.orchestrator.run(&id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Timeout);
    let view = s.orchestrator.get_status(&id).await.unwrap();
    assert_eq!(view.stage, Stage::LeadCapture);

    // Human acts late; resume picks up in the same stage
    s.orchestrator
        .signal(
            &id,
            "facility_application_submitted",
            json!({"requested_amount": 50_000, "product": "loan"}),
        )
        .await
        .unwrap();
    let status = s.orchestrator.resume(&id).await.unwrap();

    // The application was consumed, then the quote gate timed out
    assert_eq!(status, WorkflowStatus::Timeout);
    let view = s.orchestrator.get_status(&id).await.unwrap();
    assert_eq!(view.stage, Stage::FacilityQuote);

    let events = s.orchestrator.events_for(&id).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == "workflow_resumed"));
    assert_eq!(
        events
            .iter()
            .filter(|e| e.event_type == "workflow_timed_out")
            .count(),
        2
    );
}

#[tokio::test]
async fn test_duplicate_kill_leaves_one_record() {
    let s = saga(fast_config());
    let id = start(&s, RiskLevel::Green).await;

    s.orchestrator
        .signal(
            &id,
            "kill_switch",
            json!({"reason": "fraud suspicion", "decided_by": "ops-1"}),
        )
        .await
        .unwrap();
    // Direct second pull: idempotent, first reason stands
    s.orchestrator.kill(&id, "ops-2", None).await.unwrap();

    let events = s.orchestrator.events_for(&id).await.unwrap();
    assert_eq!(
        events
            .iter()
            .filter(|e| e.event_type == "workflow_terminated")
            .count(),
        1
    );
    let record = s.orchestrator.kill_switch_for(&id).await.unwrap().unwrap();
    assert_eq!(record.decided_by, "ops-1");

    let err = s.orchestrator.resume(&id).await.unwrap_err();
    assert!(matches!(err, OnboardingError::Terminated { .. }));
}

#[tokio::test]
async fn test_divergent_feedback_scored_and_stored() {
    let s = saga(fast_config());
    let id = start(&s, RiskLevel::Green).await;

    script_through_contract(&s, &id, 100_000).await;
    send_approval(&s, &id, "risk_manager", "approved", "rm-2").await;
    send_approval(&s, &id, "account_manager", "approved", "am-1").await;
    s.orchestrator.run(&id).await.unwrap();

    // A later human override against the stored APPROVE@85
    let scored = s
        .orchestrator
        .record_feedback(&id, "REJECTED", Some("late_fraud_flag".into()))
        .await
        .unwrap();
    assert!(scored.is_divergent);
    assert_eq!(scored.weight, 10); // false positive 8 + confidence bonus 2

    let feedback = s.orchestrator.feedback_for(&id).await.unwrap();
    assert_eq!(feedback.len(), 2); // procurement agreement + this override
    assert_eq!(
        feedback[1].override_category.as_deref(),
        Some("late_fraud_flag")
    );
}

#[tokio::test]
async fn test_stage_six_approval_order_does_not_matter() {
    for (first, second) in [
        (("risk_manager", "rm-1"), ("account_manager", "am-1")),
        (("account_manager", "am-1"), ("risk_manager", "rm-1")),
    ] {
        let s = saga(fast_config());
        let id = start(&s, RiskLevel::Green).await;
        script_through_contract(&s, &id, 100_000).await;
        send_approval(&s, &id, first.0, "approved", first.1).await;
        send_approval(&s, &id, second.0, "approved", second.1).await;

        let status = s.orchestrator.run(&id).await.unwrap();
        assert_eq!(status, WorkflowStatus::Completed);
        let view = s.orchestrator.get_status(&id).await.unwrap();
        assert_eq!(view.risk_manager_approval, Some(Decision::Approved));
        assert_eq!(view.account_manager_approval, Some(Decision::Approved));
    }
}
