//! Onboarding domain types
//!
//! This crate defines the data model of the onboarding saga: the
//! six-stage SOP state machine, workflow instances, ingress signals,
//! the append-only audit trail, kill-switch records, and feedback log
//! rows. It enforces the structural invariants locally (monotonic
//! stages, bounded mandate retries, terminated-is-final) so the engine
//! crate can rely on them.

#![deny(unsafe_code)]

pub mod error;
pub mod event;
pub mod feedback;
pub mod instance;
pub mod killswitch;

pub use error::{OnboardingError, OnboardingResult};
pub use event::{ActorType, AuditEntry, Signal, WorkflowEvent};
pub use feedback::{DivergenceType, FeedbackLog, Outcome};
pub use instance::{
    Applicant, ApplicantId, ApprovalRole, Decision, RiskLevel, Stage, WorkflowId,
    WorkflowInstance, WorkflowStatus,
};
pub use killswitch::{KillSwitchRecord, TerminationReason};
