//! Feedback log entries for the retraining loop
//!
//! One FeedbackLog row is created per human decision that overrode or
//! confirmed an automated recommendation, and is immutable thereafter.

use crate::instance::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized decision outcome used by the divergence scorer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Approve,
    Reject,
    Review,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Review => "review",
        }
    }
}

/// Classification of an AI/human disagreement
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceType {
    /// AI approved, human rejected — the costly direction
    FalsePositive,
    /// AI rejected, human approved
    FalseNegative,
    /// Any other mismatch (e.g. review vs approve)
    SeverityMismatch,
}

impl DivergenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FalsePositive => "false_positive",
            Self::FalseNegative => "false_negative",
            Self::SeverityMismatch => "severity_mismatch",
        }
    }
}

/// Immutable feedback row, one per human decision
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedbackLog {
    pub workflow_id: WorkflowId,
    pub ai_outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_confidence: Option<u8>,
    pub human_outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_category: Option<String>,
    pub is_divergent: bool,
    /// Weighted disagreement, 0-10
    pub divergence_weight: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub divergence_type: Option<DivergenceType>,
    pub recorded_at: DateTime<Utc>,
}
