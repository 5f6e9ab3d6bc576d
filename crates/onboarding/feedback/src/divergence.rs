//! Divergence scoring: quantified disagreement between an automated
//! recommendation and the human decision that overrode or confirmed it
//!
//! The scorer is a pure function. It owns no state, performs no I/O,
//! and is unit-testable without persistence — the engine feeds it the
//! stored recommendation and the incoming decision and persists
//! whatever comes back.

use onboarding_types::{DivergenceType, Outcome};
use serde::{Deserialize, Serialize};

/// Weight for an AI approval a human rejected
const FALSE_POSITIVE_WEIGHT: u8 = 8;
/// Weight for an AI rejection a human approved
const FALSE_NEGATIVE_WEIGHT: u8 = 5;
/// Weight for any other mismatch
const SEVERITY_MISMATCH_WEIGHT: u8 = 2;
/// High-confidence recommendations that were overridden score extra
const CONFIDENCE_BONUS_THRESHOLD: u8 = 80;
const CONFIDENCE_BONUS: u8 = 2;
const MAX_WEIGHT: u8 = 10;

/// Scored disagreement between AI and human outcomes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub is_divergent: bool,
    /// 0-10; zero when outcomes agree
    pub weight: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub divergence_type: Option<DivergenceType>,
}

impl Divergence {
    fn none() -> Self {
        Self {
            is_divergent: false,
            weight: 0,
            divergence_type: None,
        }
    }
}

/// Normalize a free-form decision string into {approve, reject, review}.
///
/// Approval keywords are checked before rejection keywords; anything
/// that matches neither set is treated as a request for review.
pub fn normalize_outcome(raw: &str) -> Outcome {
    let upper = raw.to_uppercase();
    if upper.contains("APPROVE") || upper.contains("CLEARED") {
        Outcome::Approve
    } else if upper.contains("REJECT") || upper.contains("DECLINE") || upper.contains("DENIED") {
        Outcome::Reject
    } else {
        Outcome::Review
    }
}

/// Score the disagreement between an automated outcome and a human one.
///
/// Equal normalized outcomes are not divergent and weigh zero. A
/// confidently wrong recommendation (confidence >= 80) scores a +2
/// bonus, capped at 10.
pub fn compute_divergence(
    ai_outcome: &str,
    human_outcome: &str,
    ai_confidence: Option<u8>,
) -> Divergence {
    let ai = normalize_outcome(ai_outcome);
    let human = normalize_outcome(human_outcome);

    if ai == human {
        return Divergence::none();
    }

    let (base, divergence_type) = match (ai, human) {
        (Outcome::Approve, Outcome::Reject) => {
            (FALSE_POSITIVE_WEIGHT, DivergenceType::FalsePositive)
        }
        (Outcome::Reject, Outcome::Approve) => {
            (FALSE_NEGATIVE_WEIGHT, DivergenceType::FalseNegative)
        }
        _ => (SEVERITY_MISMATCH_WEIGHT, DivergenceType::SeverityMismatch),
    };

    let weight = match ai_confidence {
        Some(c) if c >= CONFIDENCE_BONUS_THRESHOLD => (base + CONFIDENCE_BONUS).min(MAX_WEIGHT),
        _ => base,
    };

    Divergence {
        is_divergent: true,
        weight,
        divergence_type: Some(divergence_type),
    }
}
