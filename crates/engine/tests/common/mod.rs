//! Shared fixtures for the engine's database tests.
//!
//! Seeds users, groups, forms and workflows with plain SQL and builds an
//! orchestrator whose mailer and action handler record what they were given.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use formflow_core::types::DbId;
use formflow_db::models::action::PostSubmissionAction;
use formflow_db::models::approval_task::ApprovalTask;
use formflow_db::models::submission::SubmissionDetail;
use formflow_db::repositories::{ApprovalTaskRepo, SubmissionRepo};
use formflow_engine::actions::{ActionError, ActionHandler};
use formflow_engine::{ActionExecutor, DbDirectory, HandlerRegistry, PgActionSource, WorkflowOrchestrator};
use formflow_events::{
    DeliveryError, LinkBuilder, Mailer, MessageRenderer, NotificationScheduler, OutboundMessage,
    PgNotificationQueue,
};
use sqlx::PgPool;

/// `action_type` served by [`RecordingHandler`].
pub const RECORD: &str = "record";

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingMailer {
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Messages whose subject contains `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.subject.contains(needle))
            .count()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Records `(trigger, submission status)` for every action it runs.
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingHandler {
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionHandler for RecordingHandler {
    async fn handle(
        &self,
        action: &PostSubmissionAction,
        submission: &SubmissionDetail,
    ) -> Result<String, ActionError> {
        self.calls
            .lock()
            .unwrap()
            .push((action.action_trigger.clone(), submission.status.clone()));
        Ok("recorded".to_string())
    }
}

pub struct Harness {
    pub orchestrator: Arc<WorkflowOrchestrator>,
    pub mailer: Arc<RecordingMailer>,
    pub actions: Arc<RecordingHandler>,
}

/// Orchestrator backed by `pool` with immediate delivery into a recorder.
pub fn harness(pool: &PgPool) -> Harness {
    let mailer = Arc::new(RecordingMailer::default());
    let actions = Arc::new(RecordingHandler::default());

    let renderer = Arc::new(MessageRenderer::new("Forms", LinkBuilder::new(None)));
    let notifier = NotificationScheduler::new(
        mailer.clone(),
        Arc::new(PgNotificationQueue::new(pool.clone())),
        renderer,
    );
    let executor = ActionExecutor::new(
        Arc::new(PgActionSource::new(pool.clone())),
        HandlerRegistry::new().register(RECORD, actions.clone()),
    );
    let orchestrator = Arc::new(WorkflowOrchestrator::new(
        pool.clone(),
        Arc::new(DbDirectory::new(pool.clone())),
        notifier,
        executor,
    ));

    Harness {
        orchestrator,
        mailer,
        actions,
    }
}

// ---------------------------------------------------------------------------
// Seed data
// ---------------------------------------------------------------------------

pub async fn user(pool: &PgPool, email: &str) -> DbId {
    sqlx::query_scalar("INSERT INTO users (email, full_name) VALUES ($1, $2) RETURNING id")
        .bind(email)
        .bind(email.split('@').next().unwrap_or_default())
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn group(pool: &PgPool, name: &str, members: &[DbId]) -> DbId {
    let id: DbId = sqlx::query_scalar("INSERT INTO approval_groups (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await
        .unwrap();
    for member in members {
        sqlx::query("INSERT INTO group_members (group_id, user_id) VALUES ($1, $2)")
            .bind(id)
            .bind(member)
            .execute(pool)
            .await
            .unwrap();
    }
    id
}

/// Flat workflow settings for [`form_with_workflow`].
pub struct WorkflowSetup {
    pub logic: &'static str,
    pub groups: Vec<DbId>,
    pub escalation_groups: Vec<DbId>,
    pub deadline_days: Option<i32>,
    pub reminder_after_days: Option<i32>,
    pub auto_approve_after_days: Option<i32>,
}

impl Default for WorkflowSetup {
    fn default() -> Self {
        Self {
            logic: "all",
            groups: Vec::new(),
            escalation_groups: Vec::new(),
            deadline_days: None,
            reminder_after_days: None,
            auto_approve_after_days: None,
        }
    }
}

/// Create a form with a flat, immediately-notifying workflow. Returns the form id.
pub async fn form_with_workflow(pool: &PgPool, name: &str, setup: &WorkflowSetup) -> DbId {
    let form_id: DbId = sqlx::query_scalar("INSERT INTO forms (name, slug) VALUES ($1, $2) RETURNING id")
        .bind(name)
        .bind(name.to_lowercase().replace(' ', "-"))
        .fetch_one(pool)
        .await
        .unwrap();

    let workflow_id: DbId = sqlx::query_scalar(
        "INSERT INTO workflows \
            (form_id, approval_logic, approval_deadline_days, send_reminder_after_days, \
             auto_approve_after_days) \
         VALUES ($1, $2, $3, $4, $5) RETURNING id",
    )
    .bind(form_id)
    .bind(setup.logic)
    .bind(setup.deadline_days)
    .bind(setup.reminder_after_days)
    .bind(setup.auto_approve_after_days)
    .fetch_one(pool)
    .await
    .unwrap();

    for (position, group_id) in setup.groups.iter().enumerate() {
        sqlx::query(
            "INSERT INTO workflow_approval_groups (workflow_id, group_id, position) VALUES ($1, $2, $3)",
        )
        .bind(workflow_id)
        .bind(group_id)
        .bind(position as i32)
        .execute(pool)
        .await
        .unwrap();
    }
    for group_id in &setup.escalation_groups {
        sqlx::query("INSERT INTO workflow_escalation_groups (workflow_id, group_id) VALUES ($1, $2)")
            .bind(workflow_id)
            .bind(group_id)
            .execute(pool)
            .await
            .unwrap();
    }
    form_id
}

/// Attach a [`RECORD`] action to `trigger`.
pub async fn action(pool: &PgPool, form_id: DbId, trigger: &str) {
    sqlx::query(
        "INSERT INTO post_submission_actions \
            (form_id, name, action_type, action_trigger, fail_silently) \
         VALUES ($1, $2, $3, $4, false)",
    )
    .bind(form_id)
    .bind(format!("record {trigger}"))
    .bind(RECORD)
    .bind(trigger)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn submission(pool: &PgPool, form_id: DbId, submitter_id: DbId) -> DbId {
    sqlx::query_scalar(
        "INSERT INTO submissions (form_id, submitter_id, form_data) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(form_id)
    .bind(submitter_id)
    .bind(serde_json::json!({"amount": 120}))
    .fetch_one(pool)
    .await
    .unwrap()
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

pub async fn tasks(pool: &PgPool, submission_id: DbId) -> Vec<ApprovalTask> {
    let mut conn = pool.acquire().await.unwrap();
    ApprovalTaskRepo::list_for_submission(&mut *conn, submission_id)
        .await
        .unwrap()
}

/// Task statuses in id order.
pub async fn task_statuses(pool: &PgPool, submission_id: DbId) -> Vec<String> {
    tasks(pool, submission_id)
        .await
        .into_iter()
        .map(|t| t.status)
        .collect()
}

pub async fn submission_status(pool: &PgPool, submission_id: DbId) -> String {
    SubmissionRepo::find_detail(pool, submission_id)
        .await
        .unwrap()
        .unwrap()
        .status
}
