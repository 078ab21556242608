//! Approval task models.

use formflow_core::approval::{TaskKind, TaskStatus};
use formflow_core::deadlines::TaskClock;
use formflow_core::error::CoreError;
use formflow_core::orchestration::{NewTask, TaskSnapshot};
use formflow_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `approval_tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ApprovalTask {
    pub id: DbId,
    pub submission_id: DbId,
    pub task_kind: String,
    pub status: String,
    pub assigned_to: Option<DbId>,
    pub assigned_group_id: Option<DbId>,
    pub workflow_stage_id: Option<DbId>,
    pub stage_number: Option<i32>,
    pub step_number: Option<i32>,
    pub step_name: String,
    pub due_date: Option<Timestamp>,
    pub reminder_sent_at: Option<Timestamp>,
    pub completed_by: Option<DbId>,
    pub completed_at: Option<Timestamp>,
    pub decision: Option<String>,
    pub comments: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ApprovalTask {
    pub fn kind(&self) -> Result<TaskKind, CoreError> {
        self.task_kind.parse()
    }

    pub fn status(&self) -> Result<TaskStatus, CoreError> {
        self.status.parse()
    }

    /// The planner's view of this task.
    pub fn snapshot(&self) -> Result<TaskSnapshot, CoreError> {
        Ok(TaskSnapshot {
            id: self.id,
            kind: self.kind()?,
            status: self.status()?,
            assigned_group: self.assigned_group_id,
            stage_number: self.stage_number,
            step_number: self.step_number,
        })
    }
}

/// Convert a batch of rows into planner snapshots.
pub fn snapshots(tasks: &[ApprovalTask]) -> Result<Vec<TaskSnapshot>, CoreError> {
    tasks.iter().map(ApprovalTask::snapshot).collect()
}

/// DTO for inserting a task the planner asked for.
#[derive(Debug, Clone)]
pub struct CreateApprovalTask {
    pub submission_id: DbId,
    pub task_kind: String,
    pub assigned_to: Option<DbId>,
    pub assigned_group_id: Option<DbId>,
    pub workflow_stage_id: Option<DbId>,
    pub stage_number: Option<i32>,
    pub step_number: Option<i32>,
    pub step_name: String,
    pub due_date: Option<Timestamp>,
}

impl CreateApprovalTask {
    pub fn from_planned(submission_id: DbId, task: &NewTask) -> Self {
        Self {
            submission_id,
            task_kind: task.kind.as_str().to_string(),
            assigned_to: task.assigned_to,
            assigned_group_id: task.assigned_group.as_ref().map(|g| g.id),
            workflow_stage_id: task.stage_id,
            stage_number: task.stage_number,
            step_number: task.step_number,
            step_name: task.step_name.clone(),
            due_date: task.due_date,
        }
    }
}

/// A pending task with the submission facts the deadline sweeper needs.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SweepCandidate {
    pub id: DbId,
    pub submission_id: DbId,
    pub form_id: DbId,
    pub submission_status: String,
    pub step_name: String,
    pub assigned_to: Option<DbId>,
    pub assigned_group_id: Option<DbId>,
    pub created_at: Timestamp,
    pub reminder_sent_at: Option<Timestamp>,
}

impl SweepCandidate {
    pub fn clock(&self) -> TaskClock {
        TaskClock {
            created_at: self.created_at,
            reminder_sent_at: self.reminder_sent_at,
        }
    }
}
