//! Repository for the `pending_notifications` table.

use formflow_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::notification::{CreatePendingNotification, DueNotification};

/// Provides enqueue, due-listing and bulk mark-sent for the digest queue.
pub struct PendingNotificationRepo;

impl PendingNotificationRepo {
    /// Insert a batch of notifications in one transaction.
    ///
    /// Either every entry is queued or none is.
    pub async fn create_batch(
        pool: &PgPool,
        batch: &[CreatePendingNotification],
    ) -> Result<Vec<DbId>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let mut ids = Vec::with_capacity(batch.len());

        for item in batch {
            let id: DbId = sqlx::query_scalar(
                "INSERT INTO pending_notifications \
                    (notification_type, recipient_email, scheduled_for, workflow_id, \
                     submission_id, approval_task_id) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 RETURNING id",
            )
            .bind(item.kind.as_str())
            .bind(&item.recipient_email)
            .bind(item.scheduled_for)
            .bind(item.workflow_id)
            .bind(item.submission_id)
            .bind(item.approval_task_id)
            .fetch_one(&mut *tx)
            .await?;
            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    /// Unsent notifications scheduled at or before `now`, oldest first.
    pub async fn list_due(pool: &PgPool, now: Timestamp) -> Result<Vec<DueNotification>, sqlx::Error> {
        sqlx::query_as::<_, DueNotification>(
            "SELECT pn.id, pn.notification_type, pn.recipient_email, pn.scheduled_for, \
                    pn.workflow_id, f.name AS form_name, pn.submission_id, pn.approval_task_id, \
                    t.step_name, COALESCE(NULLIF(u.full_name, ''), u.email) AS submitter_name, \
                    s.submitted_at \
             FROM pending_notifications pn \
             JOIN workflows w ON w.id = pn.workflow_id \
             JOIN forms f ON f.id = w.form_id \
             LEFT JOIN submissions s ON s.id = pn.submission_id \
             LEFT JOIN users u ON u.id = s.submitter_id \
             LEFT JOIN approval_tasks t ON t.id = pn.approval_task_id \
             WHERE pn.sent = false AND pn.scheduled_for <= $1 \
             ORDER BY pn.scheduled_for ASC, pn.id ASC",
        )
        .bind(now)
        .fetch_all(pool)
        .await
    }

    /// Mark every given notification sent in one statement.
    pub async fn mark_sent(pool: &PgPool, ids: &[DbId]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE pending_notifications \
             SET sent = true, sent_at = NOW() \
             WHERE id = ANY($1) AND sent = false",
        )
        .bind(ids)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
