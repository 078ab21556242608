//! Outbound message rendering.
//!
//! Every email the system sends is built here as a plain-text
//! [`OutboundMessage`]. Transport is the [`Mailer`](crate::Mailer)'s job.

use formflow_core::notification::NotificationKind;
use formflow_core::orchestration::Outcome;
use formflow_core::types::DbId;
use formflow_db::models::notification::DueNotification;
use formflow_db::models::submission::SubmissionDetail;

/// A rendered plain-text email for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Builds links into the forms site.
///
/// Links are absolute when a base URL is configured, else site-relative.
#[derive(Debug, Clone, Default)]
pub struct LinkBuilder {
    base_url: Option<String>,
}

impl LinkBuilder {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
        }
    }

    fn absolute(&self, path: String) -> String {
        match &self.base_url {
            Some(base) => format!("{base}{path}"),
            None => path,
        }
    }

    pub fn submission(&self, submission_id: DbId) -> String {
        self.absolute(format!("/submissions/{submission_id}/"))
    }

    pub fn approval(&self, task_id: DbId) -> String {
        self.absolute(format!("/approvals/{task_id}/"))
    }
}

/// Renders messages with a site name prefix and links.
#[derive(Debug, Clone)]
pub struct MessageRenderer {
    site_name: String,
    links: LinkBuilder,
}

impl MessageRenderer {
    pub fn new(site_name: impl Into<String>, links: LinkBuilder) -> Self {
        Self {
            site_name: site_name.into(),
            links,
        }
    }

    pub fn links(&self) -> &LinkBuilder {
        &self.links
    }

    fn subject(&self, text: String) -> String {
        format!("[{}] {text}", self.site_name)
    }

    /// Confirmation to the submitter (and configured extra addresses).
    pub fn submission_received(&self, to: &str, submission: &SubmissionDetail) -> OutboundMessage {
        OutboundMessage {
            to: to.to_string(),
            subject: self.subject(format!("Submission received: {}", submission.form_name)),
            body: format!(
                "Your submission to \"{}\" has been received.\n\n\
                 Submission #{}\nView it here: {}\n",
                submission.form_name,
                submission.id,
                self.links.submission(submission.id)
            ),
        }
    }

    /// Tells an approver a task is waiting for them.
    pub fn approval_request(
        &self,
        to: &str,
        submission: &SubmissionDetail,
        task_id: DbId,
        step_name: &str,
    ) -> OutboundMessage {
        OutboundMessage {
            to: to.to_string(),
            subject: self.subject(format!("Approval needed: {}", submission.form_name)),
            body: format!(
                "{} submitted \"{}\" and it needs your approval.\n\n\
                 Step: {step_name}\nReview it here: {}\n",
                submission.submitter_display(),
                submission.form_name,
                self.links.approval(task_id)
            ),
        }
    }

    /// The single reminder for an overdue-ish task.
    pub fn reminder(
        &self,
        to: &str,
        submission: &SubmissionDetail,
        task_id: DbId,
        step_name: &str,
    ) -> OutboundMessage {
        OutboundMessage {
            to: to.to_string(),
            subject: self.subject(format!("Reminder: approval pending for {}", submission.form_name)),
            body: format!(
                "A submission to \"{}\" from {} is still waiting for your decision.\n\n\
                 Step: {step_name}\nReview it here: {}\n",
                submission.form_name,
                submission.submitter_display(),
                self.links.approval(task_id)
            ),
        }
    }

    /// Sent to escalation group members when a task expires.
    pub fn escalation(
        &self,
        to: &str,
        submission: &SubmissionDetail,
        task_id: DbId,
        step_name: &str,
    ) -> OutboundMessage {
        OutboundMessage {
            to: to.to_string(),
            subject: self.subject(format!("Escalation: approval overdue for {}", submission.form_name)),
            body: format!(
                "The approval step \"{step_name}\" for a submission to \"{}\" from {} \
                 passed its deadline without a decision.\n\n\
                 Task #{task_id}\nSubmission: {}\n",
                submission.form_name,
                submission.submitter_display(),
                self.links.submission(submission.id)
            ),
        }
    }

    /// Final verdict to the submitter (and configured extra addresses).
    pub fn outcome(&self, to: &str, submission: &SubmissionDetail, outcome: Outcome) -> OutboundMessage {
        let verdict = match outcome {
            Outcome::Approved => "approved",
            Outcome::Rejected => "rejected",
        };
        OutboundMessage {
            to: to.to_string(),
            subject: self.subject(format!("Submission {verdict}: {}", submission.form_name)),
            body: format!(
                "Your submission to \"{}\" has been {verdict}.\n\n\
                 Submission #{}\nView it here: {}\n",
                submission.form_name,
                submission.id,
                self.links.submission(submission.id)
            ),
        }
    }

    /// One digest summarising every grouped item.
    pub fn digest(
        &self,
        to: &str,
        kind: NotificationKind,
        form_name: &str,
        items: &[DueNotification],
    ) -> OutboundMessage {
        let mut body = match kind {
            NotificationKind::SubmissionReceived => {
                format!("New submissions to \"{form_name}\":\n\n")
            }
            NotificationKind::ApprovalRequest => {
                format!("Submissions to \"{form_name}\" waiting for your approval:\n\n")
            }
        };

        for item in items {
            let who = item.submitter_name.as_deref().unwrap_or("Anonymous");
            let when = item
                .submitted_at
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_default();
            let link = match (kind, item.approval_task_id, item.submission_id) {
                (NotificationKind::ApprovalRequest, Some(task_id), _) => self.links.approval(task_id),
                (_, _, Some(submission_id)) => self.links.submission(submission_id),
                _ => String::new(),
            };
            let step = item
                .step_name
                .as_deref()
                .map(|s| format!(" [{s}]"))
                .unwrap_or_default();
            body.push_str(&format!("- {who} {when}{step}\n  {link}\n"));
        }

        OutboundMessage {
            to: to.to_string(),
            subject: self.subject(kind.digest_subject(items.len(), form_name)),
            body,
        }
    }
}
