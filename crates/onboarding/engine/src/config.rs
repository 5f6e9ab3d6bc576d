//! Engine configuration: event windows, retry bounds, thresholds

use std::time::Duration;

const DAY: u64 = 24 * 60 * 60;

/// All tunable windows and thresholds of the saga engine.
///
/// Defaults encode the SOP values; tests shrink the windows to
/// milliseconds.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Stage 1: how long the applicant has to submit the application
    pub application_window: Duration,
    /// Stage 2: how long the manager has to decide on the quote
    pub quote_window: Duration,
    /// Stage 2: window per mandate collection attempt
    pub mandate_retry_interval: Duration,
    /// Stage 2: total mandate attempts before forced termination
    pub mandate_max_attempts: u32,
    /// Stage 2: optional post-exhaustion grace window during which a
    /// human override can still salvage the workflow. Off by default;
    /// the SOP documents 48 hours.
    pub salvage_window: Option<Duration>,
    /// Stage 3: window for the manual procurement review decision
    pub procurement_review_window: Duration,
    /// Stage 3: window for the applicant's document upload
    pub document_window: Duration,
    /// Stage 4: window for the risk manager decision
    pub risk_review_window: Duration,
    /// Stage 4: window for the red-risk financial statement sub-gate
    pub financial_statement_window: Duration,
    /// Stage 5: window for the countersigned contract
    pub contract_window: Duration,
    /// Stage 6: window for both final sign-offs
    pub approval_window: Duration,
    /// Quotes above this amount are flagged overlimit (same gate applies)
    pub overlimit_threshold: u64,
    /// Internal retries of transient step failures
    pub transient_retry_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            application_window: Duration::from_secs(14 * DAY),
            quote_window: Duration::from_secs(7 * DAY),
            mandate_retry_interval: Duration::from_secs(7 * DAY),
            mandate_max_attempts: 8,
            salvage_window: None,
            procurement_review_window: Duration::from_secs(7 * DAY),
            document_window: Duration::from_secs(14 * DAY),
            risk_review_window: Duration::from_secs(7 * DAY),
            financial_statement_window: Duration::from_secs(7 * DAY),
            contract_window: Duration::from_secs(14 * DAY),
            approval_window: Duration::from_secs(7 * DAY),
            overlimit_threshold: 250_000,
            transient_retry_limit: 3,
        }
    }
}
