use thiserror::Error;

/// Onboarding engine errors.
///
/// The taxonomy matters for control flow: `Timeout` is caught exactly once,
/// at the stage boundary, and converted into a halted-but-recoverable state.
/// `Terminated` is never caught by stage logic — it propagates and ends the
/// instance. `Transient` is retried inside the step executor and is invisible
/// above it. `Validation` is rejected at the ingress boundary with workflow
/// state untouched.
#[derive(Debug, Error)]
pub enum OnboardingError {
    #[error("Workflow terminated: {reason}")]
    Terminated { reason: String },

    #[error("Timed out waiting for '{waiting_for}' during {stage}")]
    Timeout { stage: String, waiting_for: String },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Invalid signal payload: {0}")]
    Validation(String),

    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Applicant not found: {0}")]
    ApplicantNotFound(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Storage error: {0}")]
    Store(String),
}

impl OnboardingError {
    pub fn terminated(reason: impl Into<String>) -> Self {
        Self::Terminated {
            reason: reason.into(),
        }
    }

    pub fn timeout(stage: impl Into<String>, waiting_for: impl Into<String>) -> Self {
        Self::Timeout {
            stage: stage.into(),
            waiting_for: waiting_for.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn stage_regression(from: &str, to: &str) -> Self {
        Self::InvariantViolation(format!(
            "stage order violation: cannot move from '{}' back to '{}'",
            from, to
        ))
    }

    /// True for errors the step executor may retry internally.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type OnboardingResult<T> = Result<T, OnboardingError>;
