//! Per-recipient notification scheduling.
//!
//! [`NotificationScheduler`] resolves the workflow's cadence for each
//! notification: immediate cadences send right away, everything else is
//! queued for the digest dispatcher. If queueing fails the scheduler logs a
//! warning and sends immediately instead, so nothing is silently dropped.

use std::sync::Arc;

use chrono::{Local, Utc};
use formflow_core::cadence::Schedule;
use formflow_core::notification::NotificationKind;
use formflow_core::orchestration::Outcome;
use formflow_core::types::{DbId, Timestamp};
use formflow_core::workflow::WorkflowDefinition;
use formflow_db::models::notification::CreatePendingNotification;
use formflow_db::models::submission::SubmissionDetail;

use crate::delivery::Mailer;
use crate::messages::{MessageRenderer, OutboundMessage};
use crate::queue::NotificationQueue;

/// Counts from one scheduling call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub queued: usize,
    pub failed: usize,
}

/// Decides immediate-versus-digest and delivers.
#[derive(Clone)]
pub struct NotificationScheduler {
    mailer: Arc<dyn Mailer>,
    queue: Arc<dyn NotificationQueue>,
    renderer: Arc<MessageRenderer>,
}

impl NotificationScheduler {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        queue: Arc<dyn NotificationQueue>,
        renderer: Arc<MessageRenderer>,
    ) -> Self {
        Self {
            mailer,
            queue,
            renderer,
        }
    }

    pub fn renderer(&self) -> &MessageRenderer {
        &self.renderer
    }

    /// "Submission received" to the submitter and any extra addresses.
    pub async fn submission_received(
        &self,
        workflow: &WorkflowDefinition,
        submission: &SubmissionDetail,
        now: Timestamp,
    ) -> DispatchReport {
        if !workflow.notifications.notify_on_submission {
            return DispatchReport::default();
        }
        let recipients = submitter_recipients(workflow, submission);
        self.dispatch(
            workflow,
            submission,
            NotificationKind::SubmissionReceived,
            None,
            &recipients,
            now,
            |to| self.renderer.submission_received(to, submission),
        )
        .await
    }

    /// "Approval needed" to every resolved approver of a new task.
    pub async fn approval_request(
        &self,
        workflow: &WorkflowDefinition,
        submission: &SubmissionDetail,
        task_id: DbId,
        step_name: &str,
        approvers: &[String],
        now: Timestamp,
    ) -> DispatchReport {
        self.dispatch(
            workflow,
            submission,
            NotificationKind::ApprovalRequest,
            Some(task_id),
            approvers,
            now,
            |to| self.renderer.approval_request(to, submission, task_id, step_name),
        )
        .await
    }

    /// Final verdict, always sent immediately.
    pub async fn outcome(
        &self,
        workflow: &WorkflowDefinition,
        submission: &SubmissionDetail,
        outcome: Outcome,
    ) -> DispatchReport {
        let enabled = match outcome {
            Outcome::Approved => workflow.notifications.notify_on_approval,
            Outcome::Rejected => workflow.notifications.notify_on_rejection,
        };
        if !enabled {
            return DispatchReport::default();
        }
        let messages = submitter_recipients(workflow, submission)
            .iter()
            .map(|to| self.renderer.outcome(to, submission, outcome))
            .collect();
        self.send_now(messages).await
    }

    /// Deliver messages right away. Failures are logged and counted.
    pub async fn send_now(&self, messages: Vec<OutboundMessage>) -> DispatchReport {
        let mut report = DispatchReport::default();
        for message in &messages {
            match self.mailer.send(message).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(to = %message.to, error = %e, "Failed to send notification");
                }
            }
        }
        report
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch<F>(
        &self,
        workflow: &WorkflowDefinition,
        submission: &SubmissionDetail,
        kind: NotificationKind,
        task_id: Option<DbId>,
        recipients: &[String],
        now: Timestamp,
        render: F,
    ) -> DispatchReport
    where
        F: Fn(&str) -> OutboundMessage,
    {
        if recipients.is_empty() {
            return DispatchReport::default();
        }

        let local_now = now.with_timezone(&Local);
        let scheduled_for = match workflow.cadence.schedule(&local_now, Some(&submission.form_data)) {
            Schedule::Immediate => {
                return self
                    .send_now(recipients.iter().map(|to| render(to.as_str())).collect())
                    .await;
            }
            Schedule::At(at) => at.with_timezone(&Utc),
        };

        let batch: Vec<CreatePendingNotification> = recipients
            .iter()
            .map(|to| CreatePendingNotification {
                kind,
                recipient_email: to.clone(),
                scheduled_for,
                workflow_id: workflow.id,
                submission_id: Some(submission.id),
                approval_task_id: task_id,
            })
            .collect();

        match self.queue.enqueue(&batch).await {
            Ok(()) => {
                tracing::debug!(
                    workflow_id = workflow.id,
                    submission_id = submission.id,
                    kind = %kind,
                    count = batch.len(),
                    %scheduled_for,
                    "Notifications queued"
                );
                DispatchReport {
                    queued: batch.len(),
                    ..DispatchReport::default()
                }
            }
            Err(e) => {
                tracing::warn!(
                    workflow_id = workflow.id,
                    submission_id = submission.id,
                    error = %e,
                    "Failed to queue notifications, sending immediately"
                );
                self.send_now(recipients.iter().map(|to| render(to.as_str())).collect())
                    .await
            }
        }
    }
}

/// Submitter email plus configured extra addresses, de-duplicated.
pub fn submitter_recipients(workflow: &WorkflowDefinition, submission: &SubmissionDetail) -> Vec<String> {
    let mut recipients: Vec<String> = Vec::new();
    let candidates = submission
        .submitter_email
        .iter()
        .chain(workflow.notifications.additional_emails.iter());
    for email in candidates {
        if !email.is_empty() && !recipients.iter().any(|r| r.eq_ignore_ascii_case(email)) {
            recipients.push(email.clone());
        }
    }
    recipients
}
