//! Risk analysis seam
//!
//! The concrete provider (AI model, sanctions screen, credit bureau)
//! is irrelevant to the engine; it is reduced to a shape-only
//! contract. Per SOP, the outcome is recorded and then **always**
//! escalated to manual human review, whatever the recommendation says.

use async_trait::async_trait;
use onboarding_types::{Applicant, OnboardingResult};
use serde::{Deserialize, Serialize};

/// Flag value that aborts stage 3 immediately via the kill switch
pub const KILL_TRIGGER_FLAG: &str = "sanctions_hit";

/// Result of the automated procurement risk check
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Free-form recommendation, e.g. "APPROVE", "DECLINE", "REVIEW"
    pub recommendation: String,
    /// Confidence score, 0-100
    pub confidence_score: u8,
    /// Provider flags; may include [`KILL_TRIGGER_FLAG`]
    pub flags: Vec<String>,
}

impl RiskAssessment {
    pub fn new(recommendation: impl Into<String>, confidence_score: u8) -> Self {
        Self {
            recommendation: recommendation.into(),
            confidence_score: confidence_score.min(100),
            flags: Vec::new(),
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn has_kill_trigger(&self) -> bool {
        self.flags.iter().any(|f| f == KILL_TRIGGER_FLAG)
    }
}

#[async_trait]
pub trait RiskAnalyzer: Send + Sync {
    async fn analyze(&self, applicant: &Applicant) -> OnboardingResult<RiskAssessment>;
}

/// Returns the same canned assessment for every applicant. Used in
/// tests and as a stand-in until a provider is wired.
pub struct StaticAnalyzer {
    assessment: RiskAssessment,
}

impl StaticAnalyzer {
    pub fn new(assessment: RiskAssessment) -> Self {
        Self { assessment }
    }

    pub fn approving() -> Self {
        Self::new(RiskAssessment::new("APPROVE", 85))
    }
}

#[async_trait]
impl RiskAnalyzer for StaticAnalyzer {
    async fn analyze(&self, _applicant: &Applicant) -> OnboardingResult<RiskAssessment> {
        Ok(self.assessment.clone())
    }
}
