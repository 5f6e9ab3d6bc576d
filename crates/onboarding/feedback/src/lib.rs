//! Divergence scoring and feedback log assembly
//!
//! Every human decision that confirms or overrides an automated
//! recommendation is scored here and turned into an immutable
//! [`FeedbackLog`] row for the retraining loop.
//!
//! ```
//! use onboarding_feedback::compute_divergence;
//!
//! let d = compute_divergence("APPROVE", "REJECT", Some(90));
//! assert!(d.is_divergent);
//! assert_eq!(d.weight, 10);
//! ```

#![deny(unsafe_code)]

pub mod divergence;

pub use divergence::{compute_divergence, normalize_outcome, Divergence};

use chrono::Utc;
use onboarding_types::{FeedbackLog, WorkflowId};

/// Assemble the immutable feedback row for a scored human decision.
pub fn build_feedback_log(
    workflow_id: WorkflowId,
    ai_outcome: impl Into<String>,
    ai_confidence: Option<u8>,
    human_outcome: impl Into<String>,
    override_category: Option<String>,
) -> FeedbackLog {
    let ai_outcome = ai_outcome.into();
    let human_outcome = human_outcome.into();
    let scored = compute_divergence(&ai_outcome, &human_outcome, ai_confidence);

    FeedbackLog {
        workflow_id,
        ai_outcome,
        ai_confidence,
        human_outcome,
        override_category,
        is_divergent: scored.is_divergent,
        divergence_weight: scored.weight,
        divergence_type: scored.divergence_type,
        recorded_at: Utc::now(),
    }
}
