//! Repository for `workflows` and its group/stage tables.

use formflow_core::types::DbId;
use sqlx::PgPool;

use crate::models::workflow::{GroupAssignment, StageRow, WorkflowRecord, WorkflowRow};

/// Column list for `workflows` queries (aliased `w`, joined to `forms f`).
const COLUMNS: &str = "w.id, w.form_id, f.name AS form_name, w.requires_approval, \
    w.approval_logic, w.requires_manager_approval, w.approval_deadline_days, \
    w.send_reminder_after_days, w.auto_approve_after_days, w.notification_cadence, \
    w.notification_cadence_day, w.notification_cadence_time, \
    w.notification_cadence_form_field, w.notify_on_submission, w.notify_on_approval, \
    w.notify_on_rejection, w.additional_notify_emails";

/// Column list for `workflow_stages` queries.
const STAGE_COLUMNS: &str =
    "id, workflow_id, name, stage_order, approval_logic, requires_manager_approval";

/// Loads workflow configuration.
pub struct WorkflowRepo;

impl WorkflowRepo {
    /// Load the workflow attached to a form with all of its groups and stages.
    ///
    /// Returns `None` when the form has no workflow.
    pub async fn find_for_form(
        pool: &PgPool,
        form_id: DbId,
    ) -> Result<Option<WorkflowRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflows w \
             JOIN forms f ON f.id = w.form_id \
             WHERE w.form_id = $1"
        );
        let Some(workflow) = sqlx::query_as::<_, WorkflowRow>(&query)
            .bind(form_id)
            .fetch_optional(pool)
            .await?
        else {
            return Ok(None);
        };

        let groups = sqlx::query_as::<_, GroupAssignment>(
            "SELECT wg.workflow_id AS owner_id, g.id AS group_id, g.name AS group_name, wg.position \
             FROM workflow_approval_groups wg \
             JOIN approval_groups g ON g.id = wg.group_id \
             WHERE wg.workflow_id = $1 \
             ORDER BY wg.position ASC, g.id ASC",
        )
        .bind(workflow.id)
        .fetch_all(pool)
        .await?;

        let stage_query = format!(
            "SELECT {STAGE_COLUMNS} FROM workflow_stages \
             WHERE workflow_id = $1 \
             ORDER BY stage_order ASC"
        );
        let stages = sqlx::query_as::<_, StageRow>(&stage_query)
            .bind(workflow.id)
            .fetch_all(pool)
            .await?;

        let stage_groups = sqlx::query_as::<_, GroupAssignment>(
            "SELECT sg.stage_id AS owner_id, g.id AS group_id, g.name AS group_name, sg.position \
             FROM workflow_stage_groups sg \
             JOIN workflow_stages st ON st.id = sg.stage_id \
             JOIN approval_groups g ON g.id = sg.group_id \
             WHERE st.workflow_id = $1 \
             ORDER BY sg.stage_id ASC, sg.position ASC, g.id ASC",
        )
        .bind(workflow.id)
        .fetch_all(pool)
        .await?;

        let escalation_groups = sqlx::query_as::<_, GroupAssignment>(
            "SELECT eg.workflow_id AS owner_id, g.id AS group_id, g.name AS group_name, \
                    0 AS position \
             FROM workflow_escalation_groups eg \
             JOIN approval_groups g ON g.id = eg.group_id \
             WHERE eg.workflow_id = $1 \
             ORDER BY g.id ASC",
        )
        .bind(workflow.id)
        .fetch_all(pool)
        .await?;

        Ok(Some(WorkflowRecord {
            workflow,
            groups,
            stages,
            stage_groups,
            escalation_groups,
        }))
    }
}
