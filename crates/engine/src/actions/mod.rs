//! Post-submission action execution.
//!
//! [`ActionExecutor`] loads the active actions of a form for one trigger,
//! checks each action's condition against the submission's form data, and
//! dispatches to the [`ActionHandler`] registered for its `action_type`.
//! Failures never abort sibling actions and never propagate to the caller's
//! state transition; they are logged and counted in the [`ExecutionSummary`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use formflow_core::actions::{should_run, ActionTrigger};
use formflow_core::types::DbId;
use formflow_db::models::action::PostSubmissionAction;
use formflow_db::models::submission::SubmissionDetail;
use formflow_db::repositories::PostSubmissionActionRepo;
use formflow_db::DbPool;
use serde::Serialize;

pub mod api;

/// Backoff between attempts when an action retries (1s, 2s, 4s, then 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for a single handler invocation.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("API returned HTTP {0}")]
    HttpStatus(u16),

    /// The action's configuration is unusable.
    #[error("Invalid action configuration: {0}")]
    Config(String),

    /// Any other handler-reported failure.
    #[error("{0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Runs one kind of action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Perform the action. The returned string is a short success message.
    async fn handle(
        &self,
        action: &PostSubmissionAction,
        submission: &SubmissionDetail,
    ) -> Result<String, ActionError>;
}

/// Where configured actions come from.
#[async_trait]
pub trait ActionSource: Send + Sync {
    /// Active actions of a form for one trigger, in execution order.
    async fn actions_for(
        &self,
        form_id: DbId,
        trigger: ActionTrigger,
    ) -> Result<Vec<PostSubmissionAction>, sqlx::Error>;
}

/// Actions stored in `post_submission_actions`.
#[derive(Clone)]
pub struct PgActionSource {
    pool: DbPool,
}

impl PgActionSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActionSource for PgActionSource {
    async fn actions_for(
        &self,
        form_id: DbId,
        trigger: ActionTrigger,
    ) -> Result<Vec<PostSubmissionAction>, sqlx::Error> {
        PostSubmissionActionRepo::list_active(&self.pool, form_id, trigger).await
    }
}

/// Handlers keyed by `action_type`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers (`api`).
    pub fn with_builtins() -> Result<Self, ActionError> {
        Ok(Self::new().register(api::ACTION_TYPE, Arc::new(api::ApiCallHandler::new()?)))
    }

    pub fn register(mut self, action_type: impl Into<String>, handler: Arc<dyn ActionHandler>) -> Self {
        self.handlers.insert(action_type.into(), handler);
        self
    }

    pub fn get(&self, action_type: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(action_type)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded,
    Failed,
    /// The action's condition did not hold.
    Skipped,
}

/// What happened to one action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub action_id: DbId,
    pub action_name: String,
    pub action_type: String,
    pub outcome: ActionOutcome,
    pub attempts: u32,
    pub message: String,
    /// Failed and not configured to fail silently.
    pub reported: bool,
}

/// Counts for one trigger's run. `executed = succeeded + failed`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionSummary {
    pub executed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<ActionResult>,
}

impl ExecutionSummary {
    fn record(&mut self, result: ActionResult) {
        match result.outcome {
            ActionOutcome::Succeeded => {
                self.executed += 1;
                self.succeeded += 1;
            }
            ActionOutcome::Failed => {
                self.executed += 1;
                self.failed += 1;
            }
            ActionOutcome::Skipped => self.skipped += 1,
        }
        self.results.push(result);
    }

    /// Failures of actions that are not allowed to fail silently.
    pub fn reported_failures(&self) -> impl Iterator<Item = &ActionResult> {
        self.results.iter().filter(|r| r.reported)
    }
}

// ---------------------------------------------------------------------------
// ActionExecutor
// ---------------------------------------------------------------------------

/// Runs the configured actions of a trigger point.
#[derive(Clone)]
pub struct ActionExecutor {
    source: Arc<dyn ActionSource>,
    handlers: HandlerRegistry,
    backoff: Vec<Duration>,
}

impl ActionExecutor {
    pub fn new(source: Arc<dyn ActionSource>, handlers: HandlerRegistry) -> Self {
        Self {
            source,
            handlers,
            backoff: RETRY_DELAYS_SECS.iter().map(|s| Duration::from_secs(*s)).collect(),
        }
    }

    /// Override the delays between retry attempts. The last delay repeats.
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run every active action of `submission`'s form for `trigger`.
    pub async fn execute(
        &self,
        submission: &SubmissionDetail,
        trigger: ActionTrigger,
    ) -> Result<ExecutionSummary, sqlx::Error> {
        let actions = self.source.actions_for(submission.form_id, trigger).await?;
        let mut summary = ExecutionSummary::default();

        if actions.is_empty() {
            tracing::debug!(submission_id = submission.id, %trigger, "No post-submission actions");
            return Ok(summary);
        }

        tracing::info!(
            submission_id = submission.id,
            %trigger,
            count = actions.len(),
            "Executing post-submission actions"
        );

        for action in &actions {
            summary.record(self.execute_action(action, submission).await);
        }

        tracing::info!(
            submission_id = submission.id,
            %trigger,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Post-submission actions complete"
        );
        Ok(summary)
    }

    async fn execute_action(&self, action: &PostSubmissionAction, submission: &SubmissionDetail) -> ActionResult {
        let mut result = ActionResult {
            action_id: action.id,
            action_name: action.name.clone(),
            action_type: action.action_type.clone(),
            outcome: ActionOutcome::Failed,
            attempts: 0,
            message: String::new(),
            reported: false,
        };

        let condition = match action.condition() {
            Ok(condition) => condition,
            Err(e) => return self.failed(action, result, e.to_string()),
        };
        if !should_run(condition.as_ref(), &submission.form_data) {
            tracing::debug!(action_id = action.id, action = %action.name, "Skipping action: condition not met");
            result.outcome = ActionOutcome::Skipped;
            result.message = "Condition not met".to_string();
            return result;
        }

        let Some(handler) = self.handlers.get(&action.action_type) else {
            let message = format!("No handler for action type: {}", action.action_type);
            return self.failed(action, result, message);
        };

        let max_attempts = action.attempts();
        for attempt in 1..=max_attempts {
            result.attempts = attempt;
            match handler.handle(action, submission).await {
                Ok(message) => {
                    result.outcome = ActionOutcome::Succeeded;
                    result.message = message;
                    return result;
                }
                Err(e) => {
                    result.message = e.to_string();
                    if attempt < max_attempts {
                        tracing::warn!(
                            action_id = action.id,
                            action = %action.name,
                            attempt,
                            max_attempts,
                            error = %e,
                            "Action failed, retrying"
                        );
                        tokio::time::sleep(self.delay_before(attempt)).await;
                    }
                }
            }
        }

        let message = std::mem::take(&mut result.message);
        self.failed(action, result, message)
    }

    fn failed(&self, action: &PostSubmissionAction, mut result: ActionResult, message: String) -> ActionResult {
        if action.fail_silently {
            tracing::warn!(action_id = action.id, action = %action.name, attempts = result.attempts, error = %message, "Action failed silently");
        } else {
            tracing::error!(action_id = action.id, action = %action.name, attempts = result.attempts, error = %message, "Action failed");
        }
        result.outcome = ActionOutcome::Failed;
        result.reported = !action.fail_silently;
        result.message = message;
        result
    }

    /// Delay after the `attempt`-th (1-based) failed attempt.
    fn delay_before(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize - 1).min(self.backoff.len().saturating_sub(1));
        self.backoff.get(idx).copied().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use serde_json::json;

    /// Fails the first `failures` calls, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ActionHandler for Flaky {
        async fn handle(&self, _: &PostSubmissionAction, _: &SubmissionDetail) -> Result<String, ActionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(ActionError::HttpStatus(503))
            } else {
                Ok("done".to_string())
            }
        }
    }

    /// Remembers which action ids ran.
    #[derive(Default)]
    struct Recorder {
        ran: Mutex<Vec<DbId>>,
    }

    #[async_trait]
    impl ActionHandler for Recorder {
        async fn handle(&self, action: &PostSubmissionAction, _: &SubmissionDetail) -> Result<String, ActionError> {
            self.ran.lock().unwrap().push(action.id);
            Ok("recorded".to_string())
        }
    }

    struct Fixed(Vec<PostSubmissionAction>);

    #[async_trait]
    impl ActionSource for Fixed {
        async fn actions_for(&self, _: DbId, _: ActionTrigger) -> Result<Vec<PostSubmissionAction>, sqlx::Error> {
            Ok(self.0.clone())
        }
    }

    fn action(id: DbId, action_type: &str) -> PostSubmissionAction {
        let now = Utc::now();
        PostSubmissionAction {
            id,
            form_id: 3,
            name: format!("action {id}"),
            action_type: action_type.to_string(),
            action_trigger: "on_approve".to_string(),
            action_order: id as i32,
            is_active: true,
            condition_field: None,
            condition_operator: None,
            condition_value: None,
            config: json!({}),
            fail_silently: false,
            retry_on_failure: false,
            max_retries: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn submission(form_data: serde_json::Value) -> SubmissionDetail {
        SubmissionDetail {
            id: 12,
            form_id: 3,
            form_name: "Travel".to_string(),
            submitter_id: Some(4),
            submitter_email: Some("ada@x.org".to_string()),
            submitter_name: Some("Ada".to_string()),
            form_data,
            status: "approved".to_string(),
            created_at: Utc::now(),
        }
    }

    fn executor(actions: Vec<PostSubmissionAction>, registry: HandlerRegistry) -> ActionExecutor {
        ActionExecutor::new(Arc::new(Fixed(actions)), registry).with_backoff(vec![])
    }

    #[tokio::test]
    async fn unmet_condition_skips_without_calling_handler() {
        let recorder = Arc::new(Recorder::default());
        let mut gated = action(1, "record");
        gated.condition_field = Some("amount".to_string());
        gated.condition_operator = Some("greater_than".to_string());
        gated.condition_value = Some("1000".to_string());
        let registry = HandlerRegistry::new().register("record", recorder.clone());

        let summary = executor(vec![gated, action(2, "record")], registry)
            .execute(&submission(json!({"amount": 50})), ActionTrigger::OnApprove)
            .await
            .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.executed, 1);
        assert_eq!(*recorder.ran.lock().unwrap(), vec![2]);
        assert_matches!(summary.results[0].outcome, ActionOutcome::Skipped);
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let flaky = Flaky::new(2);
        let mut retrying = action(1, "flaky");
        retrying.retry_on_failure = true;
        retrying.max_retries = 2;
        let registry = HandlerRegistry::new().register("flaky", flaky.clone());

        let summary = executor(vec![retrying], registry)
            .execute(&submission(json!({})), ActionTrigger::OnApprove)
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.results[0].attempts, 3);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn no_retry_means_single_attempt() {
        let flaky = Flaky::new(1);
        let registry = HandlerRegistry::new().register("flaky", flaky.clone());

        let summary = executor(vec![action(1, "flaky")], registry)
            .execute(&submission(json!({})), ActionTrigger::OnApprove)
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.results[0].attempts, 1);
        assert_eq!(summary.results[0].message, "API returned HTTP 503");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_does_not_stop_siblings() {
        let recorder = Arc::new(Recorder::default());
        let registry = HandlerRegistry::new()
            .register("flaky", Flaky::new(10))
            .register("record", recorder.clone());
        let mut silent = action(1, "flaky");
        silent.fail_silently = true;

        let summary = executor(vec![silent, action(2, "missing"), action(3, "record")], registry)
            .execute(&submission(json!({})), ActionTrigger::OnApprove)
            .await
            .unwrap();

        assert_eq!(summary.executed, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(*recorder.ran.lock().unwrap(), vec![3]);

        // Only the loud failure is reported.
        let reported: Vec<DbId> = summary.reported_failures().map(|r| r.action_id).collect();
        assert_eq!(reported, vec![2]);
        assert!(summary.results[1].message.contains("No handler for action type: missing"));
    }

    #[tokio::test]
    async fn malformed_condition_is_a_failure() {
        let recorder = Arc::new(Recorder::default());
        let mut broken = action(1, "record");
        broken.condition_field = Some("amount".to_string());
        broken.condition_operator = Some("roughly".to_string());

        let summary = executor(vec![broken], HandlerRegistry::new().register("record", recorder.clone()))
            .execute(&submission(json!({"amount": 5})), ActionTrigger::OnApprove)
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert!(recorder.ran.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn field_without_operator_runs_unconditionally() {
        let recorder = Arc::new(Recorder::default());
        let mut half = action(1, "record");
        half.condition_field = Some("amount".to_string());

        let summary = executor(vec![half], HandlerRegistry::new().register("record", recorder.clone()))
            .execute(&submission(json!({"amount": 5})), ActionTrigger::OnApprove)
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(*recorder.ran.lock().unwrap(), vec![1]);
    }

    #[test]
    fn backoff_repeats_last_delay() {
        let exec = executor(vec![], HandlerRegistry::new())
            .with_backoff(vec![Duration::from_millis(1), Duration::from_millis(5)]);
        assert_eq!(exec.delay_before(1), Duration::from_millis(1));
        assert_eq!(exec.delay_before(2), Duration::from_millis(5));
        assert_eq!(exec.delay_before(7), Duration::from_millis(5));
        assert_eq!(executor(vec![], HandlerRegistry::new()).delay_before(3), Duration::ZERO);
    }

    #[test]
    fn action_error_display_http_status() {
        assert_eq!(ActionError::HttpStatus(502).to_string(), "API returned HTTP 502");
    }
}
