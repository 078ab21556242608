//! The workflow orchestrator.
//!
//! Every inbound event follows the same shape: resolve directory facts, open
//! a transaction, lock the submission row (`SELECT ... FOR UPDATE`), write
//! the triggering change, let the [`Planner`] decide what follows, apply that
//! [`Transition`], commit. Notifications and post-submission actions run
//! only after the commit and are best-effort: a failure there is logged and
//! never undoes the status change.

use std::sync::Arc;

use chrono::Utc;
use formflow_core::actions::ActionTrigger;
use formflow_core::approval::{Decision, SubmissionStatus};
use formflow_core::error::CoreError;
use formflow_core::orchestration::{ensure_decidable, plan_withdrawal, Outcome, Planner, Transition};
use formflow_core::types::DbId;
use formflow_core::workflow::WorkflowDefinition;
use formflow_db::models::approval_task::{snapshots, ApprovalTask, CreateApprovalTask};
use formflow_db::models::submission::SubmissionDetail;
use formflow_db::repositories::{ApprovalTaskRepo, SubmissionRepo, WorkflowRepo};
use formflow_db::DbPool;
use formflow_events::NotificationScheduler;
use sqlx::PgConnection;

use crate::actions::ActionExecutor;
use crate::directory::{approver_emails, DirectoryService};
use crate::error::EngineError;

/// What an event changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub submission_id: DbId,
    /// Tasks opened by this event.
    pub created_tasks: Vec<DbId>,
    /// Pending tasks cascaded to `skipped`.
    pub skipped_tasks: u64,
    /// Set when the submission resolved.
    pub outcome: Option<Outcome>,
}

/// Result of expiring one task from the deadline sweeper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Expiry {
    /// The task moved from `pending` to `expired` in this call.
    pub expired: bool,
    /// The submission was approved by the auto-approve timeout.
    pub auto_approved: bool,
}

// ---------------------------------------------------------------------------
// WorkflowOrchestrator
// ---------------------------------------------------------------------------

/// Drives submissions through their approval workflow.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    pool: DbPool,
    directory: Arc<dyn DirectoryService>,
    effects: SideEffects,
}

impl WorkflowOrchestrator {
    pub fn new(
        pool: DbPool,
        directory: Arc<dyn DirectoryService>,
        notifier: NotificationScheduler,
        actions: ActionExecutor,
    ) -> Self {
        Self {
            pool,
            effects: SideEffects {
                directory: Arc::clone(&directory),
                notifier,
                actions,
            },
            directory,
        }
    }

    pub fn notifier(&self) -> &NotificationScheduler {
        &self.effects.notifier
    }

    pub fn directory(&self) -> &dyn DirectoryService {
        self.directory.as_ref()
    }

    /// Load the workflow definition of a form, if it has one.
    pub async fn load_workflow(&self, form_id: DbId) -> Result<Option<WorkflowDefinition>, EngineError> {
        match WorkflowRepo::find_for_form(&self.pool, form_id).await? {
            Some(record) => Ok(Some(record.into_definition()?)),
            None => Ok(None),
        }
    }

    /// Start the workflow of a freshly submitted form.
    ///
    /// Opens the first scope's tasks, or resolves the submission as approved
    /// straight away when no approval is required (or nobody is configured
    /// to give it). Forms without a workflow are approved silently.
    pub async fn on_submission_created(&self, submission_id: DbId) -> Result<Progress, EngineError> {
        let detail = self.find_submission(submission_id).await?;
        let workflow = self.load_workflow(detail.form_id).await?;
        let manager = match &workflow {
            Some(wf) if wf.requires_approval && wf.needs_manager() => self.manager_of(&detail).await,
            _ => None,
        };
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        let submission = SubmissionRepo::lock(&mut *tx, submission_id)
            .await?
            .ok_or_else(|| EngineError::not_found("submission", submission_id))?;
        let status = submission.status()?;
        if !matches!(status, SubmissionStatus::Submitted | SubmissionStatus::PendingApproval) {
            return Err(CoreError::Conflict(format!(
                "Submission {submission_id} is '{status}', not awaiting a workflow"
            ))
            .into());
        }
        if !ApprovalTaskRepo::list_for_submission(&mut *tx, submission_id)
            .await?
            .is_empty()
        {
            return Err(CoreError::Conflict(format!(
                "Workflow for submission {submission_id} has already started"
            ))
            .into());
        }

        let transition = match &workflow {
            Some(wf) => Planner::new(wf, manager, now).on_submission(),
            None => Transition {
                outcome: Some(Outcome::Approved),
                ..Transition::default()
            },
        };
        warn_bypassed_gates(submission_id, &transition);
        let created = apply(&mut *tx, submission_id, &transition).await?;
        if transition.outcome.is_none() {
            SubmissionRepo::mark_pending_approval(&mut *tx, submission_id).await?;
        }
        tx.commit().await?;

        tracing::info!(
            submission_id,
            form_id = detail.form_id,
            tasks = created.tasks.len(),
            outcome = ?transition.outcome,
            "Workflow started"
        );

        if let Some(wf) = &workflow {
            self.effects.notifier.submission_received(wf, &detail, now).await;
        }
        self.effects.run_actions(&detail, ActionTrigger::OnSubmit).await;
        self.effects
            .after_commit(workflow.as_ref(), &detail, &created.tasks, transition.outcome)
            .await;

        Ok(created.into_progress(submission_id, transition.outcome))
    }

    /// Record an approver's decision and advance the workflow.
    pub async fn on_decision(
        &self,
        task_id: DbId,
        decision: Decision,
        comments: Option<&str>,
        acting_user: DbId,
    ) -> Result<Progress, EngineError> {
        let task = ApprovalTaskRepo::find_by_id(&self.pool, task_id)
            .await?
            .ok_or_else(|| EngineError::not_found("approval task", task_id))?;
        let submission_id = task.submission_id;
        let detail = self.find_submission(submission_id).await?;
        let workflow = self
            .load_workflow(detail.form_id)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow", detail.form_id))?;
        let manager = if workflow.needs_manager() {
            self.manager_of(&detail).await
        } else {
            None
        };
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        let submission = SubmissionRepo::lock(&mut *tx, submission_id)
            .await?
            .ok_or_else(|| EngineError::not_found("submission", submission_id))?;

        // Re-read under the lock: another decision may have landed meanwhile.
        let before = ApprovalTaskRepo::list_for_submission(&mut *tx, submission_id).await?;
        let current = before
            .iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| EngineError::not_found("approval task", task_id))?;
        ensure_decidable(submission.status()?, current.status()?)?;

        if !ApprovalTaskRepo::record_decision(&mut *tx, task_id, decision, acting_user, comments).await? {
            return Err(CoreError::Conflict(format!("Task {task_id} is no longer pending")).into());
        }

        let after = ApprovalTaskRepo::list_for_submission(&mut *tx, submission_id).await?;
        let transition = Planner::new(&workflow, manager, now).on_decision(&snapshots(&after)?, task_id)?;
        warn_bypassed_gates(submission_id, &transition);
        let created = apply(&mut *tx, submission_id, &transition).await?;
        tx.commit().await?;

        tracing::info!(
            submission_id,
            task_id,
            %decision,
            acting_user,
            opened = created.tasks.len(),
            skipped = created.skipped,
            outcome = ?transition.outcome,
            "Decision recorded"
        );

        self.effects
            .after_commit(Some(&workflow), &detail, &created.tasks, transition.outcome)
            .await;

        Ok(created.into_progress(submission_id, transition.outcome))
    }

    /// Withdraw a submission on behalf of its submitter.
    ///
    /// Pending tasks are cascaded to `skipped` in the same transaction.
    pub async fn withdraw(&self, submission_id: DbId, acting_user: DbId) -> Result<Progress, EngineError> {
        let mut tx = self.pool.begin().await?;
        let submission = SubmissionRepo::lock(&mut *tx, submission_id)
            .await?
            .ok_or_else(|| EngineError::not_found("submission", submission_id))?;
        let tasks = ApprovalTaskRepo::list_for_submission(&mut *tx, submission_id).await?;

        let cancel = plan_withdrawal(
            submission.status()?,
            submission.submitter_id,
            acting_user,
            &snapshots(&tasks)?,
        )?;
        let skipped = ApprovalTaskRepo::skip(&mut *tx, &cancel).await?;
        SubmissionRepo::complete(&mut *tx, submission_id, SubmissionStatus::Withdrawn).await?;
        tx.commit().await?;

        tracing::info!(submission_id, acting_user, skipped, "Submission withdrawn");

        Ok(Progress {
            submission_id,
            skipped_tasks: skipped,
            ..Progress::default()
        })
    }

    /// Expire a pending task and, when asked, auto-approve its submission.
    ///
    /// Auto-approval only applies while the submission is still
    /// `pending_approval` under the lock; it resolves through the ordinary
    /// approval finalisation.
    pub async fn expire_task(
        &self,
        workflow: &WorkflowDefinition,
        task_id: DbId,
        submission_id: DbId,
        auto_approve: bool,
    ) -> Result<Expiry, EngineError> {
        let mut tx = self.pool.begin().await?;
        let submission = SubmissionRepo::lock(&mut *tx, submission_id)
            .await?
            .ok_or_else(|| EngineError::not_found("submission", submission_id))?;

        let expired = ApprovalTaskRepo::mark_expired(&mut *tx, task_id).await?;
        let auto_approved = auto_approve && submission.status()? == SubmissionStatus::PendingApproval;

        let mut created = Applied::default();
        if auto_approved {
            let tasks = ApprovalTaskRepo::list_for_submission(&mut *tx, submission_id).await?;
            let transition = Planner::new(workflow, None, Utc::now()).force(&snapshots(&tasks)?, Outcome::Approved);
            created = apply(&mut *tx, submission_id, &transition).await?;
        }
        tx.commit().await?;

        if expired {
            tracing::info!(task_id, submission_id, "Approval task expired");
        }
        if auto_approved {
            tracing::info!(submission_id, skipped = created.skipped, "Submission auto-approved after timeout");
            match SubmissionRepo::find_detail(&self.pool, submission_id).await {
                Ok(Some(detail)) => {
                    self.effects
                        .after_commit(Some(workflow), &detail, &[], Some(Outcome::Approved))
                        .await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(submission_id, error = %e, "Failed to load submission for auto-approval effects");
                }
            }
        }

        Ok(Expiry {
            expired,
            auto_approved,
        })
    }

    async fn find_submission(&self, submission_id: DbId) -> Result<SubmissionDetail, EngineError> {
        SubmissionRepo::find_detail(&self.pool, submission_id)
            .await?
            .ok_or_else(|| EngineError::not_found("submission", submission_id))
    }

    /// The submitter's manager. Lookup failures count as "no manager".
    async fn manager_of(&self, detail: &SubmissionDetail) -> Option<DbId> {
        let submitter = detail.submitter_id?;
        match self.directory.resolve_manager(submitter).await {
            Ok(manager) => manager,
            Err(e) => {
                tracing::warn!(submission_id = detail.id, submitter, error = %e, "Manager lookup failed");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Applying transitions
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Applied {
    tasks: Vec<ApprovalTask>,
    skipped: u64,
}

impl Applied {
    fn into_progress(self, submission_id: DbId, outcome: Option<Outcome>) -> Progress {
        Progress {
            submission_id,
            created_tasks: self.tasks.iter().map(|t| t.id).collect(),
            skipped_tasks: self.skipped,
            outcome,
        }
    }
}

/// Write a transition inside the caller's transaction.
async fn apply(
    conn: &mut PgConnection,
    submission_id: DbId,
    transition: &Transition,
) -> Result<Applied, sqlx::Error> {
    let skipped = ApprovalTaskRepo::skip(&mut *conn, &transition.skip).await?;

    let mut tasks = Vec::with_capacity(transition.create.len());
    for planned in &transition.create {
        let input = CreateApprovalTask::from_planned(submission_id, planned);
        tasks.push(ApprovalTaskRepo::create(&mut *conn, &input).await?);
    }

    if let Some(outcome) = transition.outcome {
        SubmissionRepo::complete(&mut *conn, submission_id, outcome.submission_status()).await?;
    }

    Ok(Applied { tasks, skipped })
}

fn warn_bypassed_gates(submission_id: DbId, transition: &Transition) {
    for stage_number in &transition.bypassed_manager_gates {
        tracing::warn!(
            submission_id,
            stage_number = ?stage_number,
            "No manager found for submitter, skipping manager approval"
        );
    }
}

// ---------------------------------------------------------------------------
// Side effects
// ---------------------------------------------------------------------------

/// Everything that happens after a transition commits.
#[derive(Clone)]
pub(crate) struct SideEffects {
    pub(crate) directory: Arc<dyn DirectoryService>,
    pub(crate) notifier: NotificationScheduler,
    pub(crate) actions: ActionExecutor,
}

impl SideEffects {
    /// Approval requests for newly opened tasks, then finalisation effects.
    pub(crate) async fn after_commit(
        &self,
        workflow: Option<&WorkflowDefinition>,
        detail: &SubmissionDetail,
        opened: &[ApprovalTask],
        outcome: Option<Outcome>,
    ) {
        if let Some(wf) = workflow {
            let now = Utc::now();
            for task in opened {
                let recipients =
                    approver_emails(self.directory.as_ref(), task.assigned_to, task.assigned_group_id).await;
                if recipients.is_empty() {
                    tracing::warn!(task_id = task.id, submission_id = detail.id, "No approvers to notify for task");
                    continue;
                }
                self.notifier
                    .approval_request(wf, detail, task.id, &task.step_name, &recipients, now)
                    .await;
            }
        }

        if let Some(outcome) = outcome {
            self.finalized(workflow, detail, outcome).await;
        }
    }

    /// Actions for the outcome's triggers, then the outcome notification.
    async fn finalized(&self, workflow: Option<&WorkflowDefinition>, detail: &SubmissionDetail, outcome: Outcome) {
        let mut resolved = detail.clone();
        resolved.status = outcome.submission_status().as_str().to_string();

        let triggers: &[ActionTrigger] = match outcome {
            Outcome::Approved => &ActionTrigger::ON_APPROVAL,
            Outcome::Rejected => &[ActionTrigger::OnReject],
        };
        for trigger in triggers {
            self.run_actions(&resolved, *trigger).await;
        }

        if let Some(wf) = workflow {
            self.notifier.outcome(wf, &resolved, outcome).await;
        }
    }

    pub(crate) async fn run_actions(&self, detail: &SubmissionDetail, trigger: ActionTrigger) {
        match self.actions.execute(detail, trigger).await {
            Ok(summary) => {
                for failure in summary.reported_failures() {
                    tracing::error!(
                        submission_id = detail.id,
                        %trigger,
                        action_id = failure.action_id,
                        error = %failure.message,
                        "Post-submission action failed"
                    );
                }
            }
            Err(e) => {
                tracing::error!(submission_id = detail.id, %trigger, error = %e, "Failed to load post-submission actions");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
