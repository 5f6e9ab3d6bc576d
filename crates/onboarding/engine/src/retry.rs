//! Bounded retry with tiered escalation
//!
//! Generalizes the SOP's "request, wait, remind, escalate" pattern
//! into one combinator: each attempt fires an action, then waits a
//! fixed window for a resolving event. Specific attempt numbers carry
//! escalation tiers. The first request fires immediately; exhaustion
//! is reported to the caller, which decides what termination means.

use onboarding_types::OnboardingResult;
use std::future::Future;
use std::time::Duration;

/// An escalation bound to a specific attempt number
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EscalationTier {
    pub at_attempt: u32,
    /// 1 = human operator follow-up, 2 = at risk of termination
    pub level: u8,
    pub label: &'static str,
}

/// How a bounded retry run ended
#[derive(Debug, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// The awaited event arrived on some attempt
    Resolved(T),
    /// All attempts elapsed without resolution
    Exhausted,
}

/// Bounded retry policy with escalation tiers
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub tiers: Vec<EscalationTier>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            tiers: Vec::new(),
        }
    }

    pub fn with_tier(mut self, at_attempt: u32, level: u8, label: &'static str) -> Self {
        self.tiers.push(EscalationTier {
            at_attempt,
            level,
            label,
        });
        self
    }

    pub fn tier_for(&self, attempt: u32) -> Option<EscalationTier> {
        self.tiers.iter().copied().find(|t| t.at_attempt == attempt)
    }

    /// Run from attempt 1.
    pub async fn run<T, A, AFut, W, WFut>(
        &self,
        on_attempt: A,
        wait: W,
    ) -> OnboardingResult<RetryOutcome<T>>
    where
        A: FnMut(u32, Option<EscalationTier>) -> AFut,
        AFut: Future<Output = OnboardingResult<()>>,
        W: FnMut(u32, Duration) -> WFut,
        WFut: Future<Output = OnboardingResult<Option<T>>>,
    {
        self.run_from(1, on_attempt, wait).await
    }

    /// Run starting at a given attempt number. Resume re-enters here
    /// with the persisted counter, so completed attempts never repeat.
    pub async fn run_from<T, A, AFut, W, WFut>(
        &self,
        start_attempt: u32,
        mut on_attempt: A,
        mut wait: W,
    ) -> OnboardingResult<RetryOutcome<T>>
    where
        A: FnMut(u32, Option<EscalationTier>) -> AFut,
        AFut: Future<Output = OnboardingResult<()>>,
        W: FnMut(u32, Duration) -> WFut,
        WFut: Future<Output = OnboardingResult<Option<T>>>,
    {
        let mut attempt = start_attempt.max(1);
        while attempt <= self.max_attempts {
            on_attempt(attempt, self.tier_for(attempt)).await?;
            if let Some(resolved) = wait(attempt, self.interval).await? {
                return Ok(RetryOutcome::Resolved(resolved));
            }
            attempt += 1;
        }
        Ok(RetryOutcome::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onboarding_types::OnboardingError;
    use std::cell::RefCell;

    fn mandate_policy() -> RetryPolicy {
        RetryPolicy::new(8, Duration::from_millis(1))
            .with_tier(4, 1, "operator_follow_up")
            .with_tier(7, 2, "at_risk_of_termination")
    }

    #[tokio::test]
    async fn test_exhaustion_after_max_attempts() {
        let policy = mandate_policy();
        let attempts = RefCell::new(Vec::new());

        let outcome: RetryOutcome<()> = policy
            .run(
                |attempt, tier| {
                    attempts.borrow_mut().push((attempt, tier.map(|t| t.level)));
                    async { Ok(()) }
                },
                |_, _| async { Ok(None) },
            )
            .await
            .unwrap();

        assert_eq!(outcome, RetryOutcome::Exhausted);
        let seen = attempts.borrow();
        assert_eq!(seen.len(), 8);
        // Tiers fire at exactly the configured attempts
        assert_eq!(seen[3], (4, Some(1)));
        assert_eq!(seen[6], (7, Some(2)));
        assert_eq!(seen[0], (1, None));
        assert_eq!(seen[7], (8, None));
    }

    #[tokio::test]
    async fn test_resolution_stops_the_loop() {
        let policy = mandate_policy();

        let outcome = policy
            .run(
                |_, _| async { Ok(()) },
                |attempt, _| async move {
                    if attempt == 3 {
                        Ok(Some("confirmed"))
                    } else {
                        Ok(None)
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome, RetryOutcome::Resolved("confirmed"));
    }

    #[tokio::test]
    async fn test_run_from_skips_completed_attempts() {
        let policy = mandate_policy();
        let attempts = RefCell::new(Vec::new());

        let outcome: RetryOutcome<()> = policy
            .run_from(
                6,
                |attempt, _| {
                    attempts.borrow_mut().push(attempt);
                    async { Ok(()) }
                },
                |_, _| async { Ok(None) },
            )
            .await
            .unwrap();

        assert_eq!(outcome, RetryOutcome::Exhausted);
        assert_eq!(*attempts.borrow(), vec![6, 7, 8]);
    }

    #[tokio::test]
    async fn test_run_from_past_the_bound_is_exhausted() {
        let policy = mandate_policy();
        let outcome: RetryOutcome<()> = policy
            .run_from(9, |_, _| async { Ok(()) }, |_, _| async { Ok(None) })
            .await
            .unwrap();
        assert_eq!(outcome, RetryOutcome::Exhausted);
    }

    #[tokio::test]
    async fn test_wait_errors_propagate() {
        // A cancellation arriving mid-wait must unwind the whole loop.
        let policy = mandate_policy();
        let result: OnboardingResult<RetryOutcome<()>> = policy
            .run(
                |_, _| async { Ok(()) },
                |_, _| async { Err(OnboardingError::terminated("manual_kill")) },
            )
            .await;
        assert!(matches!(
            result,
            Err(OnboardingError::Terminated { .. })
        ));
    }
}
