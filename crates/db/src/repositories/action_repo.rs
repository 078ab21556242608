//! Repository for the `post_submission_actions` table.

use formflow_core::actions::ActionTrigger;
use formflow_core::types::DbId;
use sqlx::PgPool;

use crate::models::action::PostSubmissionAction;

/// Column list for `post_submission_actions` queries.
const COLUMNS: &str = "id, form_id, name, action_type, action_trigger, action_order, is_active, \
    condition_field, condition_operator, condition_value, config, fail_silently, \
    retry_on_failure, max_retries, created_at, updated_at";

/// Reads configured actions.
pub struct PostSubmissionActionRepo;

impl PostSubmissionActionRepo {
    /// Active actions of a form for one trigger, in execution order.
    pub async fn list_active(
        pool: &PgPool,
        form_id: DbId,
        trigger: ActionTrigger,
    ) -> Result<Vec<PostSubmissionAction>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM post_submission_actions \
             WHERE form_id = $1 AND action_trigger = $2 AND is_active = true \
             ORDER BY action_order ASC, name ASC"
        );
        sqlx::query_as::<_, PostSubmissionAction>(&query)
            .bind(form_id)
            .bind(trigger.as_str())
            .fetch_all(pool)
            .await
    }
}
