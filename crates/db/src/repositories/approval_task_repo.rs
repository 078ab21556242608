//! Repository for the `approval_tasks` table.

use formflow_core::approval::{Decision, TaskStatus};
use formflow_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::approval_task::{ApprovalTask, CreateApprovalTask, SweepCandidate};

/// Column list for `approval_tasks` queries.
const COLUMNS: &str = "id, submission_id, task_kind, status, assigned_to, assigned_group_id, \
    workflow_stage_id, stage_number, step_number, step_name, due_date, reminder_sent_at, \
    completed_by, completed_at, decision, comments, created_at, updated_at";

/// Provides task creation, decisions and bulk transitions.
pub struct ApprovalTaskRepo;

impl ApprovalTaskRepo {
    /// Insert a task, returning the created row.
    pub async fn create(
        conn: &mut PgConnection,
        input: &CreateApprovalTask,
    ) -> Result<ApprovalTask, sqlx::Error> {
        let query = format!(
            "INSERT INTO approval_tasks
                (submission_id, task_kind, assigned_to, assigned_group_id, workflow_stage_id,
                 stage_number, step_number, step_name, due_date)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ApprovalTask>(&query)
            .bind(input.submission_id)
            .bind(&input.task_kind)
            .bind(input.assigned_to)
            .bind(input.assigned_group_id)
            .bind(input.workflow_stage_id)
            .bind(input.stage_number)
            .bind(input.step_number)
            .bind(&input.step_name)
            .bind(input.due_date)
            .fetch_one(&mut *conn)
            .await
    }

    /// Find a task by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ApprovalTask>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM approval_tasks WHERE id = $1");
        sqlx::query_as::<_, ApprovalTask>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All tasks of a submission, oldest first.
    pub async fn list_for_submission(
        conn: &mut PgConnection,
        submission_id: DbId,
    ) -> Result<Vec<ApprovalTask>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM approval_tasks \
             WHERE submission_id = $1 \
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, ApprovalTask>(&query)
            .bind(submission_id)
            .fetch_all(&mut *conn)
            .await
    }

    /// Record an approver's decision on a pending task.
    ///
    /// Returns `false` when the task was no longer pending.
    pub async fn record_decision(
        conn: &mut PgConnection,
        id: DbId,
        decision: Decision,
        completed_by: DbId,
        comments: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE approval_tasks \
             SET status = $2, decision = $3, completed_by = $4, comments = $5, \
                 completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(decision.task_status().as_str())
        .bind(decision.as_str())
        .bind(completed_by)
        .bind(comments)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move the given tasks from `pending` to `skipped` in one write.
    pub async fn skip(conn: &mut PgConnection, ids: &[DbId]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE approval_tasks \
             SET status = 'skipped', updated_at = NOW() \
             WHERE id = ANY($1) AND status = 'pending'",
        )
        .bind(ids)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Move a pending task to `expired`.
    ///
    /// Returns `false` if it was already terminal.
    pub async fn mark_expired(conn: &mut PgConnection, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE approval_tasks \
             SET status = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(TaskStatus::Expired.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stamp `reminder_sent_at` unless a reminder already went out.
    ///
    /// Returns `true` only for the caller that set the stamp.
    pub async fn claim_reminder(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE approval_tasks \
             SET reminder_sent_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' AND reminder_sent_at IS NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every pending task whose workflow has a deadline or reminder set.
    pub async fn list_sweep_candidates(pool: &PgPool) -> Result<Vec<SweepCandidate>, sqlx::Error> {
        sqlx::query_as::<_, SweepCandidate>(
            "SELECT t.id, t.submission_id, s.form_id, s.status AS submission_status, \
                    t.step_name, t.assigned_to, t.assigned_group_id, \
                    t.created_at, t.reminder_sent_at \
             FROM approval_tasks t \
             JOIN submissions s ON s.id = t.submission_id \
             JOIN workflows w ON w.form_id = s.form_id \
             WHERE t.status = 'pending' \
               AND (COALESCE(w.approval_deadline_days, 0) > 0 \
                    OR COALESCE(w.send_reminder_after_days, 0) > 0) \
             ORDER BY t.created_at ASC",
        )
        .fetch_all(pool)
        .await
    }
}
