//! Notification seam
//!
//! The engine never renders or delivers anything itself — it hands
//! notifications to a collaborator behind this trait. Delivery
//! technology (email, dashboard inbox, webhook) is out of scope.

use async_trait::async_trait;
use onboarding_types::{ApplicantId, OnboardingResult, WorkflowId};

/// What kind of notification this is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    ActionRequired,
    Escalation,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        workflow_id: &WorkflowId,
        applicant_id: &ApplicantId,
        kind: NotificationKind,
        title: &str,
        message: &str,
        actionable: bool,
    ) -> OnboardingResult<()>;
}

/// Logs notifications through `tracing`. Useful as a default wiring
/// and in environments without a delivery channel.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        workflow_id: &WorkflowId,
        applicant_id: &ApplicantId,
        kind: NotificationKind,
        title: &str,
        message: &str,
        actionable: bool,
    ) -> OnboardingResult<()> {
        tracing::info!(
            workflow_id = %workflow_id,
            applicant_id = %applicant_id,
            kind = ?kind,
            actionable,
            "{}: {}",
            title,
            message
        );
        Ok(())
    }
}

/// A sent notification, as captured by [`RecordingNotifier`]
#[derive(Clone, Debug)]
pub struct SentNotification {
    pub workflow_id: WorkflowId,
    pub applicant_id: ApplicantId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub actionable: bool,
}

/// Captures notifications in memory for assertions
#[derive(Default)]
pub struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn titles(&self) -> Vec<String> {
        self.sent().into_iter().map(|n| n.title).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        workflow_id: &WorkflowId,
        applicant_id: &ApplicantId,
        kind: NotificationKind,
        title: &str,
        message: &str,
        actionable: bool,
    ) -> OnboardingResult<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentNotification {
                workflow_id: workflow_id.clone(),
                applicant_id: applicant_id.clone(),
                kind,
                title: title.to_string(),
                message: message.to_string(),
                actionable,
            });
        }
        Ok(())
    }
}
