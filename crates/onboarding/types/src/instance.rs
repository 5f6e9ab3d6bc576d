//! Workflow instances: one running onboarding saga per applicant
//!
//! A WorkflowInstance tracks the durable state of a single onboarding
//! run: which SOP stage it is in, its lifecycle status, the approvals
//! collected so far, and the mandate retry counter. The instance row
//! has exactly two writers — the saga's own sequential progression and
//! the kill switch — so every mutation goes through the store's
//! transactional read-modify-write.

use crate::error::{OnboardingError, OnboardingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a workflow instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an applicant
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicantId(pub String);

impl ApplicantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ApplicantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Applicant ────────────────────────────────────────────────────────

/// The applicant under onboarding. Captured at lead intake and handed
/// to the risk analyzer at stage 3.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Applicant {
    pub id: ApplicantId,
    pub legal_name: String,
    pub risk_level: RiskLevel,
    /// Business segment used by the quote step (e.g. "sme", "corporate")
    pub segment: String,
}

impl Applicant {
    pub fn new(id: impl Into<String>, legal_name: impl Into<String>) -> Self {
        Self {
            id: ApplicantId::new(id),
            legal_name: legal_name.into(),
            risk_level: RiskLevel::Green,
            segment: "sme".to_string(),
        }
    }

    pub fn with_risk_level(mut self, level: RiskLevel) -> Self {
        self.risk_level = level;
        self
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = segment.into();
        self
    }
}

/// Applicant risk banding. Red applicants get the extra
/// financial-statement sub-gate in stage 4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Green,
    Amber,
    Red,
}

// ── SOP Stages ───────────────────────────────────────────────────────

/// The six stages of the onboarding Standard Operating Procedure.
///
/// Stages only move forward. A rejected human decision at any gate
/// terminates via the kill switch — the SOP forbids silent regression
/// to an earlier stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    LeadCapture,
    FacilityQuote,
    ProcurementAi,
    RiskReview,
    Contract,
    FinalApproval,
}

impl Stage {
    pub fn number(self) -> u8 {
        match self {
            Self::LeadCapture => 1,
            Self::FacilityQuote => 2,
            Self::ProcurementAi => 3,
            Self::RiskReview => 4,
            Self::Contract => 5,
            Self::FinalApproval => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::LeadCapture => "lead_capture",
            Self::FacilityQuote => "facility_quote",
            Self::ProcurementAi => "procurement_ai",
            Self::RiskReview => "risk_review",
            Self::Contract => "contract",
            Self::FinalApproval => "final_approval",
        }
    }

    pub fn next(self) -> Option<Stage> {
        match self {
            Self::LeadCapture => Some(Self::FacilityQuote),
            Self::FacilityQuote => Some(Self::ProcurementAi),
            Self::ProcurementAi => Some(Self::RiskReview),
            Self::RiskReview => Some(Self::Contract),
            Self::Contract => Some(Self::FinalApproval),
            Self::FinalApproval => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ── Lifecycle Status ─────────────────────────────────────────────────

/// The lifecycle status of a workflow instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Instance created but not yet driven
    #[default]
    Pending,
    /// The saga is executing steps
    Processing,
    /// Suspended on a human decision or document event
    AwaitingHuman,
    /// All six stages passed, both final approvals present
    Completed,
    /// Unrecoverable engine failure
    Failed,
    /// An expected event never arrived within its window. Halted, but a
    /// human can still act on the instance.
    Timeout,
    /// Kill switch fired. Irreversible; the instance never resumes.
    Terminated,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Terminated
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::AwaitingHuman => "awaiting_human",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Human Decisions ──────────────────────────────────────────────────

/// A binary human decision at a gate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// The two independent sign-off roles of the stage 6 gate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRole {
    RiskManager,
    AccountManager,
}

impl ApprovalRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RiskManager => "risk_manager",
            Self::AccountManager => "account_manager",
        }
    }
}

impl std::fmt::Display for ApprovalRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Workflow Instance ────────────────────────────────────────────────

/// Durable state of one onboarding saga
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: WorkflowId,
    pub applicant_id: ApplicantId,
    pub stage: Stage,
    pub status: WorkflowStatus,
    /// Applicant risk banding, copied from intake
    pub risk_level: RiskLevel,
    /// Facility amount requested on the application (stage 1 signal)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_amount: Option<u64>,
    /// Quote exceeded the configured overlimit threshold. Overlimit
    /// quotes still pass the same manager gate as normal ones.
    pub is_overlimit: bool,
    /// Manager decision on the generated quote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_decision: Option<Decision>,
    /// Mandate collection attempts so far (bounded at 8)
    pub mandate_retry_count: u32,
    /// Automated recommendation captured at stage 3
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_outcome: Option<String>,
    /// Confidence score (0-100) attached to the recommendation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_confidence: Option<u8>,
    /// Human review of the stage 3 procurement check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub procurement_review: Option<Decision>,
    /// Stage 3 document collection finished
    pub documents_received: bool,
    /// Stage 6 sign-off (persisted the instant it arrives)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_manager_approval: Option<Decision>,
    /// Stage 6 sign-off (persisted the instant it arrives)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_manager_approval: Option<Decision>,
    /// Why the kill switch fired, if it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    pub fn new(applicant_id: ApplicantId, risk_level: RiskLevel) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::generate(),
            applicant_id,
            stage: Stage::LeadCapture,
            status: WorkflowStatus::Pending,
            risk_level,
            requested_amount: None,
            is_overlimit: false,
            quote_decision: None,
            mandate_retry_count: 0,
            ai_outcome: None,
            ai_confidence: None,
            procurement_review: None,
            documents_received: false,
            risk_manager_approval: None,
            account_manager_approval: None,
            termination_reason: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Advance to a later stage. Stages are monotonically non-decreasing;
    /// a terminated instance never transitions again.
    pub fn advance_to(&mut self, stage: Stage) -> OnboardingResult<()> {
        self.refuse_if_terminated()?;
        if stage < self.stage {
            return Err(OnboardingError::stage_regression(
                self.stage.name(),
                stage.name(),
            ));
        }
        self.stage = stage;
        self.touch();
        Ok(())
    }

    pub fn set_status(&mut self, status: WorkflowStatus) -> OnboardingResult<()> {
        self.refuse_if_terminated()?;
        self.status = status;
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.touch();
        Ok(())
    }

    /// Flip to Terminated. Only the kill switch calls this.
    pub fn terminate(&mut self, reason: impl Into<String>) -> OnboardingResult<()> {
        self.refuse_if_terminated()?;
        self.status = WorkflowStatus::Terminated;
        self.termination_reason = Some(reason.into());
        self.completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Count a mandate collection attempt. The counter is bounded at 8;
    /// exhausting it forces termination.
    pub fn count_mandate_attempt(&mut self) -> OnboardingResult<u32> {
        self.refuse_if_terminated()?;
        if self.mandate_retry_count >= 8 {
            return Err(OnboardingError::InvariantViolation(
                "mandate retry count already exhausted".into(),
            ));
        }
        self.mandate_retry_count += 1;
        self.touch();
        Ok(self.mandate_retry_count)
    }

    pub fn record_ai_assessment(
        &mut self,
        outcome: impl Into<String>,
        confidence: u8,
    ) -> OnboardingResult<()> {
        self.refuse_if_terminated()?;
        self.ai_outcome = Some(outcome.into());
        self.ai_confidence = Some(confidence.min(100));
        self.touch();
        Ok(())
    }

    pub fn record_approval(&mut self, role: ApprovalRole, decision: Decision) -> OnboardingResult<()> {
        self.refuse_if_terminated()?;
        match role {
            ApprovalRole::RiskManager => self.risk_manager_approval = Some(decision),
            ApprovalRole::AccountManager => self.account_manager_approval = Some(decision),
        }
        self.touch();
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn is_terminated(&self) -> bool {
        self.status == WorkflowStatus::Terminated
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Stage 6 completion condition: both roles present and approved
    pub fn both_approved(&self) -> bool {
        self.risk_manager_approval == Some(Decision::Approved)
            && self.account_manager_approval == Some(Decision::Approved)
    }

    pub fn approval_for(&self, role: ApprovalRole) -> Option<Decision> {
        match role {
            ApprovalRole::RiskManager => self.risk_manager_approval,
            ApprovalRole::AccountManager => self.account_manager_approval,
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn refuse_if_terminated(&self) -> OnboardingResult<()> {
        match &self.termination_reason {
            Some(reason) if self.is_terminated() => Err(OnboardingError::terminated(reason.clone())),
            _ if self.is_terminated() => Err(OnboardingError::terminated("kill switch fired")),
            _ => Ok(()),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
