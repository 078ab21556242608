//! Deadline sweeps against a real database.
//!
//! Each test runs the sweep twice at the same instant: the second pass must
//! find nothing left to do.

mod common;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use formflow_db::repositories::ApprovalTaskRepo;
use formflow_engine::{DeadlineSweeper, SweepReport};
use sqlx::PgPool;

use common::{
    action, form_with_workflow, group, harness, submission, submission_status, task_statuses, tasks,
    user, Harness, WorkflowSetup,
};

fn sweeper(pool: &PgPool, h: &Harness) -> DeadlineSweeper {
    DeadlineSweeper::new(pool.clone(), h.orchestrator.clone(), Duration::from_secs(60))
}

// ---------------------------------------------------------------------------
// Test: one reminder per task however often the sweep runs
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_reminder_sent_once_across_sweeps(pool: PgPool) {
    let h = harness(&pool);
    let submitter = user(&pool, "ada@x.org").await;
    let a = user(&pool, "a@x.org").await;
    let b = user(&pool, "b@x.org").await;
    let finance = group(&pool, "Finance", &[a, b]).await;
    let form_id = form_with_workflow(
        &pool,
        "Travel",
        &WorkflowSetup {
            groups: vec![finance],
            reminder_after_days: Some(1),
            ..WorkflowSetup::default()
        },
    )
    .await;
    let sid = submission(&pool, form_id, submitter).await;
    let started = h.orchestrator.on_submission_created(sid).await.unwrap();
    let now = Utc::now() + ChronoDuration::days(2);
    let s = sweeper(&pool, &h);

    let first = s.sweep_once(now).await.unwrap();
    assert_eq!(
        first,
        SweepReport {
            reminders: 1,
            ..SweepReport::default()
        }
    );
    assert_eq!(h.mailer.count("Reminder"), 2);

    let second = s.sweep_once(now).await.unwrap();
    assert!(second.is_empty(), "second sweep did {second:?}");
    assert_eq!(h.mailer.count("Reminder"), 2);

    let task = ApprovalTaskRepo::find_by_id(&pool, started.created_tasks[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, "pending");
    assert!(task.reminder_sent_at.is_some());
}

// ---------------------------------------------------------------------------
// Test: expiry escalates once and is not repeated
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_expired_task_is_not_expired_again(pool: PgPool) {
    let h = harness(&pool);
    let submitter = user(&pool, "ada@x.org").await;
    let a = user(&pool, "a@x.org").await;
    let lead = user(&pool, "lead@x.org").await;
    let finance = group(&pool, "Finance", &[a]).await;
    let leads = group(&pool, "Leads", &[lead, a]).await;
    let form_id = form_with_workflow(
        &pool,
        "Travel",
        &WorkflowSetup {
            groups: vec![finance],
            escalation_groups: vec![leads],
            deadline_days: Some(3),
            ..WorkflowSetup::default()
        },
    )
    .await;
    let sid = submission(&pool, form_id, submitter).await;
    h.orchestrator.on_submission_created(sid).await.unwrap();
    let s = sweeper(&pool, &h);

    // Not overdue yet.
    let early = s.sweep_once(Utc::now() + ChronoDuration::days(1)).await.unwrap();
    assert!(early.is_empty());

    let now = Utc::now() + ChronoDuration::days(4);
    let first = s.sweep_once(now).await.unwrap();
    assert_eq!(
        first,
        SweepReport {
            expired: 1,
            escalations: 2,
            ..SweepReport::default()
        }
    );
    assert_eq!(task_statuses(&pool, sid).await, vec!["expired"]);
    // No auto-approval configured: the submission keeps waiting.
    assert_eq!(submission_status(&pool, sid).await, "pending_approval");

    let second = s.sweep_once(now).await.unwrap();
    assert!(second.is_empty(), "second sweep did {second:?}");
    assert_eq!(h.mailer.count("Escalation"), 2);
}

// ---------------------------------------------------------------------------
// Test: auto-approval finalises like an ordinary approval
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_auto_approval_runs_approval_actions(pool: PgPool) {
    let h = harness(&pool);
    let submitter = user(&pool, "ada@x.org").await;
    let a = user(&pool, "a@x.org").await;
    let finance = group(&pool, "Finance", &[a]).await;
    let form_id = form_with_workflow(
        &pool,
        "Travel",
        &WorkflowSetup {
            groups: vec![finance],
            deadline_days: Some(2),
            auto_approve_after_days: Some(2),
            ..WorkflowSetup::default()
        },
    )
    .await;
    action(&pool, form_id, "on_approve").await;
    action(&pool, form_id, "on_complete").await;
    action(&pool, form_id, "on_reject").await;
    let sid = submission(&pool, form_id, submitter).await;
    h.orchestrator.on_submission_created(sid).await.unwrap();
    let s = sweeper(&pool, &h);
    let now = Utc::now() + ChronoDuration::days(3);

    let first = s.sweep_once(now).await.unwrap();
    assert_eq!(
        first,
        SweepReport {
            expired: 1,
            auto_approved: 1,
            ..SweepReport::default()
        }
    );
    assert_eq!(submission_status(&pool, sid).await, "approved");
    assert_eq!(task_statuses(&pool, sid).await, vec!["expired"]);
    assert_eq!(
        h.actions.calls(),
        vec![
            ("on_approve".to_string(), "approved".to_string()),
            ("on_complete".to_string(), "approved".to_string()),
        ]
    );
    assert_eq!(h.mailer.count("Submission approved"), 1);

    let second = s.sweep_once(now).await.unwrap();
    assert!(second.is_empty(), "second sweep did {second:?}");
    assert_eq!(h.actions.calls().len(), 2);
    assert!(tasks(&pool, sid).await.iter().all(|t| t.status != "pending"));
}
