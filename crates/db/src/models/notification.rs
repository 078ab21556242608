//! Digest queue models.

use formflow_core::error::CoreError;
use formflow_core::notification::NotificationKind;
use formflow_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// DTO for queueing one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePendingNotification {
    pub kind: NotificationKind,
    pub recipient_email: String,
    pub scheduled_for: Timestamp,
    pub workflow_id: DbId,
    pub submission_id: Option<DbId>,
    pub approval_task_id: Option<DbId>,
}

/// An unsent, due notification joined with what a digest line shows.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DueNotification {
    pub id: DbId,
    pub notification_type: String,
    pub recipient_email: String,
    pub scheduled_for: Timestamp,
    pub workflow_id: DbId,
    pub form_name: String,
    pub submission_id: Option<DbId>,
    pub approval_task_id: Option<DbId>,
    pub step_name: Option<String>,
    pub submitter_name: Option<String>,
    pub submitted_at: Option<Timestamp>,
}

impl DueNotification {
    pub fn kind(&self) -> Result<NotificationKind, CoreError> {
        self.notification_type.parse()
    }
}
