//! Compliance-first onboarding saga engine
//!
//! Drives financial-services onboarding workflows through a six-stage
//! Standard Operating Procedure: lead capture, facility quote and
//! mandate, parallel procurement check and document collection, risk
//! review, contract, and two-factor final approval. Humans are gates,
//! not observers — the saga suspends on their decisions and a kill
//! switch can irreversibly terminate it at any step boundary.
//!
//! ```no_run
//! use onboarding_engine::analyze::StaticAnalyzer;
//! use onboarding_engine::config::EngineConfig;
//! use onboarding_engine::executor::DurableStepExecutor;
//! use onboarding_engine::notify::TracingNotifier;
//! use onboarding_engine::orchestrator::OnboardingOrchestrator;
//! use onboarding_engine::store::MemoryStore;
//! use onboarding_types::Applicant;
//! use std::sync::Arc;
//!
//! # async fn demo() -> onboarding_types::OnboardingResult<()> {
//! let store = Arc::new(MemoryStore::new());
//! let executor = Arc::new(DurableStepExecutor::new(store.clone(), 3));
//! let orchestrator = Arc::new(OnboardingOrchestrator::new(
//!     store,
//!     executor,
//!     Arc::new(TracingNotifier),
//!     Arc::new(StaticAnalyzer::approving()),
//!     EngineConfig::default(),
//! ));
//!
//! let id = orchestrator
//!     .start_workflow(Applicant::new("app-1", "Acme GmbH"))
//!     .await?;
//! orchestrator.spawn(id);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod analyze;
pub mod bus;
pub mod config;
pub mod executor;
pub mod gate;
pub mod kill_switch;
pub mod notify;
pub mod orchestrator;
pub mod parallel;
pub mod retry;
pub mod stages;
pub mod store;

pub use analyze::{RiskAnalyzer, RiskAssessment, StaticAnalyzer};
pub use bus::EventBus;
pub use config::EngineConfig;
pub use executor::{DurableStepExecutor, StepExecutor, StepFn, StepFuture};
pub use gate::{ApprovalGate, GateOutcome};
pub use kill_switch::KillSwitchGuard;
pub use notify::{NotificationKind, Notifier, RecordingNotifier, TracingNotifier};
pub use orchestrator::{OnboardingOrchestrator, StatusView};
pub use retry::{EscalationTier, RetryOutcome, RetryPolicy};
pub use stages::StageController;
pub use store::{MemoryStore, TransitionFn, WorkflowStore};
