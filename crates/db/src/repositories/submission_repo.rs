//! Repository for the `submissions` table.

use formflow_core::approval::SubmissionStatus;
use formflow_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::submission::{Submission, SubmissionDetail};

/// Column list for `submissions` queries.
const COLUMNS: &str = "id, form_id, submitter_id, form_data, status, submitted_at, \
    completed_at, created_at, updated_at";

/// Joined column list for [`SubmissionDetail`].
const DETAIL_COLUMNS: &str = "s.id, s.form_id, f.name AS form_name, s.submitter_id, \
    u.email AS submitter_email, u.full_name AS submitter_name, s.form_data, s.status, \
    s.created_at";

/// Provides reads and status transitions for submissions.
pub struct SubmissionRepo;

impl SubmissionRepo {
    /// Lock a submission row for the rest of the transaction.
    ///
    /// Every read-then-write on a submission's tasks starts here, so two
    /// concurrent decisions on one submission run one after the other.
    pub async fn lock(conn: &mut PgConnection, id: DbId) -> Result<Option<Submission>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM submissions WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Submission>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Find a submission with its form name and submitter.
    pub async fn find_detail(pool: &PgPool, id: DbId) -> Result<Option<SubmissionDetail>, sqlx::Error> {
        let query = format!(
            "SELECT {DETAIL_COLUMNS} FROM submissions s \
             JOIN forms f ON f.id = s.form_id \
             LEFT JOIN users u ON u.id = s.submitter_id \
             WHERE s.id = $1"
        );
        sqlx::query_as::<_, SubmissionDetail>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Move a submission to `pending_approval`, stamping `submitted_at` once.
    pub async fn mark_pending_approval(conn: &mut PgConnection, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE submissions \
             SET status = 'pending_approval', \
                 submitted_at = COALESCE(submitted_at, NOW()), \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Set a terminal status and stamp `completed_at`.
    pub async fn complete(
        conn: &mut PgConnection,
        id: DbId,
        status: SubmissionStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE submissions \
             SET status = $2, \
                 submitted_at = COALESCE(submitted_at, NOW()), \
                 completed_at = NOW(), \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
