//! Kill switch records: terminal and irreversible
//!
//! A KillSwitchRecord is written exactly once per workflow, inside the
//! same transactional write that flips the instance to Terminated.
//! Nothing ever updates or deletes it.

use crate::instance::ApprovalRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a workflow was irrevocably terminated
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// An authorized human pulled the switch directly
    ManualKill,
    /// Manager rejected the facility quote
    QuoteRejected,
    /// Mandate collection exhausted all 8 attempts with no response
    MandateMaxRetries,
    /// The procurement risk check raised a kill trigger (e.g. sanctions)
    ProcurementKillTrigger,
    /// Human reviewer rejected the procurement check
    ProcurementRejected,
    /// Risk manager rejected the stage 4 risk file
    RiskReviewRejected,
    /// One of the two stage 6 roles rejected
    FinalApprovalRejected { role: ApprovalRole },
}

impl TerminationReason {
    /// Stable reason string recorded on the instance and audit log
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualKill => "manual_kill",
            Self::QuoteRejected => "quote_rejected",
            Self::MandateMaxRetries => "mandate_max_retries_exhausted",
            Self::ProcurementKillTrigger => "procurement_kill_trigger",
            Self::ProcurementRejected => "procurement_review_rejected",
            Self::RiskReviewRejected => "risk_review_rejected",
            Self::FinalApprovalRejected {
                role: ApprovalRole::RiskManager,
            } => "final_approval_rejected_by_risk_manager",
            Self::FinalApprovalRejected {
                role: ApprovalRole::AccountManager,
            } => "final_approval_rejected_by_account_manager",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The single, immutable record of a fired kill switch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KillSwitchRecord {
    pub reason: TerminationReason,
    pub decided_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub terminated_at: DateTime<Utc>,
}

impl KillSwitchRecord {
    pub fn new(reason: TerminationReason, decided_by: impl Into<String>) -> Self {
        Self {
            reason,
            decided_by: decided_by.into(),
            notes: None,
            terminated_at: Utc::now(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}
