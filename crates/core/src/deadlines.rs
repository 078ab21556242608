//! Approval timeouts: expiry, reminders and auto-approval.
//!
//! The deadline sweeper loads every pending task and asks [`evaluate`] what
//! to do with it. The three checks are independent and may all fire in the
//! same sweep for the same task.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::approval::SubmissionStatus;
use crate::types::Timestamp;

/// Timeout settings of a workflow. A value of zero or less disables a check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlinePolicy {
    pub deadline_days: Option<i32>,
    pub reminder_after_days: Option<i32>,
    pub auto_approve_after_days: Option<i32>,
}

fn enabled(days: Option<i32>) -> Option<i64> {
    days.filter(|d| *d > 0).map(i64::from)
}

impl DeadlinePolicy {
    /// Whether the sweeper has anything to do for this workflow.
    pub fn is_configured(&self) -> bool {
        enabled(self.deadline_days).is_some() || enabled(self.reminder_after_days).is_some()
    }

    /// Due date stamped on a task created at `created_at`.
    pub fn due_date(&self, created_at: Timestamp) -> Option<Timestamp> {
        enabled(self.deadline_days).map(|d| created_at + Duration::days(d))
    }
}

/// The timing facts of one pending task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskClock {
    pub created_at: Timestamp,
    pub reminder_sent_at: Option<Timestamp>,
}

/// What the sweeper should do with one pending task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepVerdict {
    /// Mark the task `expired` and notify escalation groups.
    pub expire: bool,
    /// Approve the submission itself (only together with `expire`).
    pub auto_approve: bool,
    /// Send the one-and-only reminder and stamp `reminder_sent_at`.
    pub remind: bool,
}

impl SweepVerdict {
    pub fn is_noop(&self) -> bool {
        !self.expire && !self.auto_approve && !self.remind
    }
}

/// Decide what happens to a pending task at `now`.
///
/// Every threshold is exclusive: a task created exactly N days ago is not
/// yet N days overdue.
pub fn evaluate(
    policy: &DeadlinePolicy,
    clock: &TaskClock,
    submission_status: SubmissionStatus,
    now: Timestamp,
) -> SweepVerdict {
    let elapsed = |days: i64| now > clock.created_at + Duration::days(days);

    let expire = enabled(policy.deadline_days).is_some_and(elapsed);

    let auto_approve = expire
        && submission_status == SubmissionStatus::PendingApproval
        && enabled(policy.auto_approve_after_days).is_some_and(elapsed);

    let remind = clock.reminder_sent_at.is_none()
        && enabled(policy.reminder_after_days).is_some_and(elapsed);

    SweepVerdict {
        expire,
        auto_approve,
        remind,
    }
}
