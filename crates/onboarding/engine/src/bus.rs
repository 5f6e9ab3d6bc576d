//! Per-workflow event bus
//!
//! Signals are matched by workflow id plus event name. A waiter
//! suspends until a matching signal arrives or its window elapses —
//! there is no polling loop. Kill-switch cancellation is pushed onto
//! the same wakeup path, so an in-flight wait is interrupted
//! immediately rather than at the next guard check.

use onboarding_types::{OnboardingError, OnboardingResult, Signal, WorkflowId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct ChannelState {
    /// Undelivered signals, consumed exactly once by name
    queued: Vec<Signal>,
    /// Set once by the kill switch; every waiter observes it
    cancelled: Option<String>,
}

#[derive(Default)]
struct Channel {
    state: Mutex<ChannelState>,
    wakeup: Notify,
}

/// Event routing for all workflow instances of one engine
#[derive(Default)]
pub struct EventBus {
    channels: Mutex<HashMap<WorkflowId, Arc<Channel>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, id: &WorkflowId) -> OnboardingResult<Arc<Channel>> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| OnboardingError::store("event bus lock poisoned"))?;
        Ok(channels.entry(id.clone()).or_default().clone())
    }

    /// Deliver a signal to a workflow. Refused once the workflow has
    /// been cancelled — a stale or late write must not proceed.
    pub fn send(&self, id: &WorkflowId, signal: Signal) -> OnboardingResult<()> {
        let channel = self.channel(id)?;
        {
            let mut state = channel
                .state
                .lock()
                .map_err(|_| OnboardingError::store("event bus lock poisoned"))?;
            if let Some(reason) = &state.cancelled {
                return Err(OnboardingError::terminated(reason.clone()));
            }
            state.queued.push(signal);
        }
        channel.wakeup.notify_waiters();
        Ok(())
    }

    /// Broadcast cancellation to every outstanding wait for this
    /// workflow. Idempotent; the first reason wins.
    pub fn cancel(&self, id: &WorkflowId, reason: &str) -> OnboardingResult<()> {
        let channel = self.channel(id)?;
        {
            let mut state = channel
                .state
                .lock()
                .map_err(|_| OnboardingError::store("event bus lock poisoned"))?;
            if state.cancelled.is_none() {
                state.cancelled = Some(reason.to_string());
            }
        }
        channel.wakeup.notify_waiters();
        Ok(())
    }

    /// Suspend until a signal with `event_name` arrives for this
    /// workflow. Returns `Ok(None)` when the window elapses first and
    /// `Err(Terminated)` the moment the kill switch broadcasts.
    pub async fn wait_for(
        &self,
        id: &WorkflowId,
        event_name: &str,
        window: Duration,
    ) -> OnboardingResult<Option<Signal>> {
        let channel = self.channel(id)?;
        let deadline = tokio::time::Instant::now() + window;

        loop {
            // Register for wakeup before inspecting state, so a signal
            // landing in between cannot be missed.
            let notified = channel.wakeup.notified();
            {
                let mut state = channel
                    .state
                    .lock()
                    .map_err(|_| OnboardingError::store("event bus lock poisoned"))?;
                if let Some(reason) = &state.cancelled {
                    return Err(OnboardingError::terminated(reason.clone()));
                }
                if let Some(pos) = state
                    .queued
                    .iter()
                    .position(|s| s.event_name() == event_name)
                {
                    return Ok(Some(state.queued.remove(pos)));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}
