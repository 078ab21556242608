//! Deadline sweeper.
//!
//! [`DeadlineSweeper`] runs as a background task. Each pass looks at every
//! pending task whose workflow has a deadline or reminder configured and
//! applies the three independent checks from
//! [`formflow_core::deadlines::evaluate`]: send the one reminder, expire the
//! task (escalating to the workflow's escalation groups), and auto-approve
//! the submission. A failure on one task is logged and the pass moves on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use formflow_core::approval::SubmissionStatus;
use formflow_core::deadlines::{evaluate, SweepVerdict};
use formflow_core::types::{DbId, Timestamp};
use formflow_core::workflow::WorkflowDefinition;
use formflow_db::models::approval_task::SweepCandidate;
use formflow_db::models::submission::SubmissionDetail;
use formflow_db::repositories::{ApprovalTaskRepo, SubmissionRepo};
use formflow_db::DbPool;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::directory::approver_emails;
use crate::error::EngineError;
use crate::orchestrator::WorkflowOrchestrator;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub reminders: usize,
    pub auto_approved: usize,
    /// Escalation emails sent.
    pub escalations: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ---------------------------------------------------------------------------
// DeadlineSweeper
// ---------------------------------------------------------------------------

/// Background service that enforces approval deadlines.
pub struct DeadlineSweeper {
    pool: DbPool,
    orchestrator: Arc<WorkflowOrchestrator>,
    interval: Duration,
}

impl DeadlineSweeper {
    pub fn new(pool: DbPool, orchestrator: Arc<WorkflowOrchestrator>, interval: Duration) -> Self {
        Self {
            pool,
            orchestrator,
            interval,
        }
    }

    /// Run the sweeper loop.
    ///
    /// The loop exits gracefully when the provided [`CancellationToken`] is
    /// cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Deadline sweeper cancelled");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(report) if !report.is_empty() => {
                            tracing::info!(
                                expired = report.expired,
                                reminders = report.reminders,
                                auto_approved = report.auto_approved,
                                escalations = report.escalations,
                                "Deadline sweep complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Deadline sweep failed"),
                    }
                }
            }
        }
    }

    /// One pass over every sweepable pending task.
    ///
    /// Running it twice at the same instant is harmless: reminders are
    /// claimed atomically and expiry only moves tasks that are still pending.
    pub async fn sweep_once(&self, now: Timestamp) -> Result<SweepReport, EngineError> {
        let candidates = ApprovalTaskRepo::list_sweep_candidates(&self.pool).await?;
        let mut pass = Pass::default();
        let mut report = SweepReport::default();

        for candidate in &candidates {
            let Some(workflow) = pass.workflow(&self.orchestrator, candidate.form_id).await else {
                continue;
            };
            let status = match candidate.submission_status.parse::<SubmissionStatus>() {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(task_id = candidate.id, error = %e, "Skipping task with unknown submission status");
                    continue;
                }
            };

            let verdict = evaluate(&workflow.deadlines, &candidate.clock(), status, now);
            if verdict.is_noop() {
                continue;
            }
            if let Err(e) = self
                .apply(&mut pass, &workflow, candidate, verdict, &mut report)
                .await
            {
                tracing::error!(
                    task_id = candidate.id,
                    submission_id = candidate.submission_id,
                    error = %e,
                    "Failed to apply deadline checks"
                );
            }
        }

        Ok(report)
    }

    async fn apply(
        &self,
        pass: &mut Pass,
        workflow: &WorkflowDefinition,
        candidate: &SweepCandidate,
        verdict: SweepVerdict,
        report: &mut SweepReport,
    ) -> Result<(), EngineError> {
        // The reminder goes first: once expired the task can no longer claim it.
        if verdict.remind && ApprovalTaskRepo::claim_reminder(&self.pool, candidate.id).await? {
            report.reminders += 1;
            if let Some(detail) = pass.submission(&self.pool, candidate.submission_id).await? {
                self.send_reminder(candidate, &detail).await;
            }
        }

        if verdict.expire {
            let expiry = self
                .orchestrator
                .expire_task(workflow, candidate.id, candidate.submission_id, verdict.auto_approve)
                .await?;
            if expiry.expired {
                report.expired += 1;
                if let Some(detail) = pass.submission(&self.pool, candidate.submission_id).await? {
                    report.escalations += self.escalate(workflow, candidate, &detail).await;
                }
            }
            if expiry.auto_approved {
                report.auto_approved += 1;
            }
        }

        Ok(())
    }

    async fn send_reminder(&self, candidate: &SweepCandidate, detail: &SubmissionDetail) {
        let recipients = approver_emails(
            self.orchestrator.directory(),
            candidate.assigned_to,
            candidate.assigned_group_id,
        )
        .await;
        let notifier = self.orchestrator.notifier();
        let messages = recipients
            .iter()
            .map(|to| notifier.renderer().reminder(to, detail, candidate.id, &candidate.step_name))
            .collect();
        let sent = notifier.send_now(messages).await;
        tracing::info!(task_id = candidate.id, sent = sent.sent, failed = sent.failed, "Reminder sent");
    }

    /// Email every escalation group member once. Returns how many were sent.
    async fn escalate(
        &self,
        workflow: &WorkflowDefinition,
        candidate: &SweepCandidate,
        detail: &SubmissionDetail,
    ) -> usize {
        let group_ids: Vec<DbId> = workflow.escalation_groups.iter().map(|g| g.id).collect();
        if group_ids.is_empty() {
            return 0;
        }
        let recipients = match self.orchestrator.directory().group_member_emails(&group_ids).await {
            Ok(recipients) => recipients,
            Err(e) => {
                tracing::warn!(task_id = candidate.id, error = %e, "Failed to resolve escalation recipients");
                return 0;
            }
        };

        let notifier = self.orchestrator.notifier();
        let messages = dedup_case_insensitive(recipients)
            .iter()
            .map(|to| notifier.renderer().escalation(to, detail, candidate.id, &candidate.step_name))
            .collect();
        let sent = notifier.send_now(messages).await;
        tracing::info!(task_id = candidate.id, sent = sent.sent, failed = sent.failed, "Expired task escalated");
        sent.sent
    }
}

/// Per-pass lookups, so each workflow and submission is loaded once.
#[derive(Default)]
struct Pass {
    workflows: HashMap<DbId, Option<Arc<WorkflowDefinition>>>,
    submissions: HashMap<DbId, Option<SubmissionDetail>>,
}

impl Pass {
    /// Load failures are logged once and the form's tasks are skipped.
    async fn workflow(&mut self, orchestrator: &WorkflowOrchestrator, form_id: DbId) -> Option<Arc<WorkflowDefinition>> {
        if let Some(cached) = self.workflows.get(&form_id) {
            return cached.clone();
        }
        let loaded = match orchestrator.load_workflow(form_id).await {
            Ok(workflow) => workflow.map(Arc::new),
            Err(e) => {
                tracing::warn!(form_id, error = %e, "Failed to load workflow, skipping its tasks");
                None
            }
        };
        self.workflows.insert(form_id, loaded.clone());
        loaded
    }

    async fn submission(&mut self, pool: &DbPool, submission_id: DbId) -> Result<Option<SubmissionDetail>, sqlx::Error> {
        if let Some(cached) = self.submissions.get(&submission_id) {
            return Ok(cached.clone());
        }
        let loaded = SubmissionRepo::find_detail(pool, submission_id).await?;
        self.submissions.insert(submission_id, loaded.clone());
        Ok(loaded)
    }
}

fn dedup_case_insensitive(emails: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(emails.len());
    for email in emails {
        if !out.iter().any(|e| e.eq_ignore_ascii_case(&email)) {
            out.push(email);
        }
    }
    out
}
