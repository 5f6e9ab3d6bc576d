//! Persistence seam and the in-memory reference store
//!
//! The instance row has exactly two writers — the saga's sequential
//! progression and the kill switch — and both go through
//! [`WorkflowStore::transition`], a closure-based transactional
//! read-modify-write. A transition that mutates the row must return
//! exactly one audit entry; a no-op returns `None` and writes nothing.
//! The audit log is append-only; feedback rows and kill-switch records
//! are write-once.

use async_trait::async_trait;
use chrono::Utc;
use onboarding_types::{
    Applicant, ApplicantId, AuditEntry, FeedbackLog, KillSwitchRecord, OnboardingError,
    OnboardingResult, WorkflowEvent, WorkflowId, WorkflowInstance,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// A transactional mutation of one instance row. Returning
/// `Ok(Some(entry))` commits the mutation together with exactly one
/// audit event; `Ok(None)` discards the mutation entirely.
pub type TransitionFn =
    Box<dyn FnOnce(&mut WorkflowInstance) -> OnboardingResult<Option<AuditEntry>> + Send>;

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn insert_applicant(&self, applicant: Applicant) -> OnboardingResult<()>;
    async fn get_applicant(&self, id: &ApplicantId) -> OnboardingResult<Applicant>;

    async fn insert_instance(&self, instance: WorkflowInstance) -> OnboardingResult<()>;
    async fn get_instance(&self, id: &WorkflowId) -> OnboardingResult<WorkflowInstance>;

    /// Transactional read-modify-write on one instance row, with the
    /// audit event appended in the same commit.
    async fn transition(
        &self,
        id: &WorkflowId,
        apply: TransitionFn,
    ) -> OnboardingResult<Option<WorkflowEvent>>;

    /// Append an audit entry that is not itself a state transition
    /// (e.g. signal receipts, informational escalation markers).
    async fn append_event(
        &self,
        id: &WorkflowId,
        entry: AuditEntry,
    ) -> OnboardingResult<WorkflowEvent>;

    async fn events_for(&self, id: &WorkflowId) -> OnboardingResult<Vec<WorkflowEvent>>;

    /// Write-once: a second record for the same workflow is refused.
    async fn put_kill_switch(
        &self,
        id: &WorkflowId,
        record: KillSwitchRecord,
    ) -> OnboardingResult<()>;
    async fn kill_switch_for(&self, id: &WorkflowId)
        -> OnboardingResult<Option<KillSwitchRecord>>;

    async fn insert_feedback(&self, log: FeedbackLog) -> OnboardingResult<()>;
    async fn feedback_for(&self, id: &WorkflowId) -> OnboardingResult<Vec<FeedbackLog>>;

    /// Completed-step lookup for replay deduplication
    async fn step_result(&self, id: &WorkflowId, step_id: &str)
        -> OnboardingResult<Option<Value>>;
    async fn record_step(
        &self,
        id: &WorkflowId,
        step_id: &str,
        result: Value,
    ) -> OnboardingResult<()>;
}

// ── In-memory store ──────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    applicants: HashMap<ApplicantId, Applicant>,
    instances: HashMap<WorkflowId, WorkflowInstance>,
    events: HashMap<WorkflowId, Vec<WorkflowEvent>>,
    kill_switches: HashMap<WorkflowId, KillSwitchRecord>,
    feedback: HashMap<WorkflowId, Vec<FeedbackLog>>,
    steps: HashMap<(WorkflowId, String), Value>,
}

impl MemoryState {
    fn append(&mut self, id: &WorkflowId, entry: AuditEntry) -> WorkflowEvent {
        let log = self.events.entry(id.clone()).or_default();
        let event = WorkflowEvent {
            sequence: log.len() as u64,
            event_type: entry.event_type,
            payload: entry.payload,
            actor_type: entry.actor_type,
            actor_id: entry.actor_id,
            timestamp: Utc::now(),
        };
        log.push(event.clone());
        event
    }
}

/// Reference store backed by a single mutex. All tables commit under
/// one lock, which makes the transition-plus-event write atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> OnboardingResult<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| OnboardingError::store("memory store lock poisoned"))
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn insert_applicant(&self, applicant: Applicant) -> OnboardingResult<()> {
        self.lock()?
            .applicants
            .insert(applicant.id.clone(), applicant);
        Ok(())
    }

    async fn get_applicant(&self, id: &ApplicantId) -> OnboardingResult<Applicant> {
        self.lock()?
            .applicants
            .get(id)
            .cloned()
            .ok_or_else(|| OnboardingError::ApplicantNotFound(id.to_string()))
    }

    async fn insert_instance(&self, instance: WorkflowInstance) -> OnboardingResult<()> {
        let mut state = self.lock()?;
        if state.instances.contains_key(&instance.id) {
            return Err(OnboardingError::store(format!(
                "instance '{}' already exists",
                instance.id
            )));
        }
        state.instances.insert(instance.id.clone(), instance);
        Ok(())
    }

    async fn get_instance(&self, id: &WorkflowId) -> OnboardingResult<WorkflowInstance> {
        self.lock()?
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| OnboardingError::InstanceNotFound(id.to_string()))
    }

    async fn transition(
        &self,
        id: &WorkflowId,
        apply: TransitionFn,
    ) -> OnboardingResult<Option<WorkflowEvent>> {
        let mut state = self.lock()?;
        let current = state
            .instances
            .get(id)
            .ok_or_else(|| OnboardingError::InstanceNotFound(id.to_string()))?;

        // Mutate a copy; commit only when the closure accepts.
        let mut updated = current.clone();
        match apply(&mut updated)? {
            Some(entry) => {
                state.instances.insert(id.clone(), updated);
                Ok(Some(state.append(id, entry)))
            }
            None => Ok(None),
        }
    }

    async fn append_event(
        &self,
        id: &WorkflowId,
        entry: AuditEntry,
    ) -> OnboardingResult<WorkflowEvent> {
        let mut state = self.lock()?;
        if !state.instances.contains_key(id) {
            return Err(OnboardingError::InstanceNotFound(id.to_string()));
        }
        Ok(state.append(id, entry))
    }

    async fn events_for(&self, id: &WorkflowId) -> OnboardingResult<Vec<WorkflowEvent>> {
        Ok(self.lock()?.events.get(id).cloned().unwrap_or_default())
    }

    async fn put_kill_switch(
        &self,
        id: &WorkflowId,
        record: KillSwitchRecord,
    ) -> OnboardingResult<()> {
        let mut state = self.lock()?;
        if state.kill_switches.contains_key(id) {
            return Err(OnboardingError::InvariantViolation(format!(
                "kill switch record for '{}' already written",
                id
            )));
        }
        state.kill_switches.insert(id.clone(), record);
        Ok(())
    }

    async fn kill_switch_for(
        &self,
        id: &WorkflowId,
    ) -> OnboardingResult<Option<KillSwitchRecord>> {
        Ok(self.lock()?.kill_switches.get(id).cloned())
    }

    async fn insert_feedback(&self, log: FeedbackLog) -> OnboardingResult<()> {
        self.lock()?
            .feedback
            .entry(log.workflow_id.clone())
            .or_default()
            .push(log);
        Ok(())
    }

    async fn feedback_for(&self, id: &WorkflowId) -> OnboardingResult<Vec<FeedbackLog>> {
        Ok(self.lock()?.feedback.get(id).cloned().unwrap_or_default())
    }

    async fn step_result(
        &self,
        id: &WorkflowId,
        step_id: &str,
    ) -> OnboardingResult<Option<Value>> {
        Ok(self
            .lock()?
            .steps
            .get(&(id.clone(), step_id.to_string()))
            .cloned())
    }

    async fn record_step(
        &self,
        id: &WorkflowId,
        step_id: &str,
        result: Value,
    ) -> OnboardingResult<()> {
        self.lock()?
            .steps
            .insert((id.clone(), step_id.to_string()), result);
        Ok(())
    }
}
