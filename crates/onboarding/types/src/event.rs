//! Audit events and ingress signals
//!
//! `WorkflowEvent` is the append-only audit trail: every state
//! transition writes exactly one entry, and entries are never mutated
//! or deleted. `Signal` is the tagged ingress type for everything
//! humans and collaborating systems send into a running saga; payloads
//! are validated here, at the boundary, so malformed input never
//! touches workflow state.

use crate::error::{OnboardingError, OnboardingResult};
use crate::instance::{ApprovalRole, Decision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Audit Trail ──────────────────────────────────────────────────────

/// Who caused an audit event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    #[default]
    System,
    Human,
}

/// A committed entry in the append-only audit log.
///
/// The store assigns `sequence` and `timestamp` at append time;
/// sequence numbers are strictly ordered within one workflow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub sequence: u64,
    pub event_type: String,
    pub payload: Value,
    pub actor_type: ActorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// An audit entry before the store stamps it
#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub event_type: String,
    pub payload: Value,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
}

impl AuditEntry {
    pub fn system(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            actor_type: ActorType::System,
            actor_id: None,
        }
    }

    pub fn human(
        event_type: impl Into<String>,
        payload: Value,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            actor_type: ActorType::Human,
            actor_id: Some(actor_id.into()),
        }
    }
}

// ── Ingress Signals ──────────────────────────────────────────────────

/// Everything the outside world can send into a saga, one variant per
/// event name. Matching is by workflow id plus event name; the payload
/// shape is fixed per name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Signal {
    /// Stage 1: the applicant submitted the facility application form
    FacilityApplicationSubmitted {
        requested_amount: u64,
        product: String,
    },
    /// Stage 2: manager decision on the generated quote
    QuoteDecision { decision: Decision, decided_by: String },
    /// Stage 2: the signed direct-debit mandate arrived
    MandateConfirmed { mandate_reference: String },
    /// Stage 2 (optional): post-exhaustion human override inside the
    /// salvage grace window
    SalvageOverride { authorized_by: String },
    /// Stage 3, stream A: human review of the procurement risk check
    ProcurementReviewDecision {
        decision: Decision,
        reviewer: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    /// Stage 3, stream B: applicant uploaded the requested documents
    DocumentsUploaded { document_count: u32 },
    /// Stage 4: risk manager decision on the compiled risk file
    RiskReviewDecision { decision: Decision, reviewer: String },
    /// Stage 4 (red applicants only): financial statements confirmed
    FinancialStatementConfirmed { confirmed_by: String },
    /// Stage 5: countersigned contract received
    ContractSigned { signatory: String },
    /// Stage 6: one of the two independent sign-offs
    ManagerApproval {
        role: ApprovalRole,
        decision: Decision,
        manager: String,
    },
    /// Manual kill switch, valid at any point
    KillSwitch {
        reason: String,
        decided_by: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
}

impl Signal {
    /// The wire name this signal is matched by
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::FacilityApplicationSubmitted { .. } => "facility_application_submitted",
            Self::QuoteDecision { .. } => "quote_decision",
            Self::MandateConfirmed { .. } => "mandate_confirmed",
            Self::SalvageOverride { .. } => "salvage_override",
            Self::ProcurementReviewDecision { .. } => "procurement_review_decision",
            Self::DocumentsUploaded { .. } => "documents_uploaded",
            Self::RiskReviewDecision { .. } => "risk_review_decision",
            Self::FinancialStatementConfirmed { .. } => "financial_statement_confirmed",
            Self::ContractSigned { .. } => "contract_signed",
            Self::ManagerApproval { .. } => "manager_approval",
            Self::KillSwitch { .. } => "kill_switch",
        }
    }

    /// Parse and validate an ingress payload for a named event.
    ///
    /// Rejects unknown names and malformed payloads with `Validation`;
    /// workflow state is untouched on rejection.
    pub fn parse(event_name: &str, payload: Value) -> OnboardingResult<Signal> {
        let mut tagged = match payload {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(OnboardingError::validation(format!(
                    "payload for '{}' must be an object, got {}",
                    event_name, other
                )))
            }
        };
        tagged.insert("event".to_string(), Value::String(event_name.to_string()));

        let signal: Signal = serde_json::from_value(Value::Object(tagged))
            .map_err(|e| OnboardingError::validation(format!("'{}': {}", event_name, e)))?;
        signal.validate()?;
        Ok(signal)
    }

    /// Semantic checks beyond shape
    fn validate(&self) -> OnboardingResult<()> {
        match self {
            Self::FacilityApplicationSubmitted {
                requested_amount, ..
            } if *requested_amount == 0 => Err(OnboardingError::validation(
                "requested_amount must be positive",
            )),
            Self::DocumentsUploaded { document_count } if *document_count == 0 => Err(
                OnboardingError::validation("documents_uploaded requires at least one document"),
            ),
            Self::KillSwitch { reason, .. } if reason.trim().is_empty() => Err(
                OnboardingError::validation("kill_switch requires a reason"),
            ),
            _ => Ok(()),
        }
    }

    /// The actor behind this signal, for the audit trail
    pub fn actor_id(&self) -> Option<&str> {
        match self {
            Self::QuoteDecision { decided_by, .. } => Some(decided_by),
            Self::SalvageOverride { authorized_by } => Some(authorized_by),
            Self::ProcurementReviewDecision { reviewer, .. } => Some(reviewer),
            Self::RiskReviewDecision { reviewer, .. } => Some(reviewer),
            Self::FinancialStatementConfirmed { confirmed_by } => Some(confirmed_by),
            Self::ContractSigned { signatory } => Some(signatory),
            Self::ManagerApproval { manager, .. } => Some(manager),
            Self::KillSwitch { decided_by, .. } => Some(decided_by),
            _ => None,
        }
    }
}
