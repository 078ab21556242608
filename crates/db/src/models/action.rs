//! Post-submission action models.

use formflow_core::actions::{ActionCondition, ActionTrigger};
use formflow_core::error::CoreError;
use formflow_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `post_submission_actions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PostSubmissionAction {
    pub id: DbId,
    pub form_id: DbId,
    pub name: String,
    pub action_type: String,
    pub action_trigger: String,
    pub action_order: i32,
    pub is_active: bool,
    pub condition_field: Option<String>,
    pub condition_operator: Option<String>,
    pub condition_value: Option<String>,
    /// Handler-specific settings.
    pub config: serde_json::Value,
    pub fail_silently: bool,
    pub retry_on_failure: bool,
    pub max_retries: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl PostSubmissionAction {
    pub fn trigger(&self) -> Result<ActionTrigger, CoreError> {
        self.action_trigger.parse()
    }

    pub fn condition(&self) -> Result<Option<ActionCondition>, CoreError> {
        ActionCondition::from_columns(
            self.condition_field.as_deref(),
            self.condition_operator.as_deref(),
            self.condition_value.as_deref(),
        )
    }

    /// Total attempts allowed: one, or `max_retries + 1` when retrying.
    pub fn attempts(&self) -> u32 {
        if self.retry_on_failure {
            self.max_retries.max(0) as u32 + 1
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn action(retry: bool, max_retries: i32) -> PostSubmissionAction {
        let now = Utc::now();
        PostSubmissionAction {
            id: 1,
            form_id: 1,
            name: "Notify ERP".to_string(),
            action_type: "api".to_string(),
            action_trigger: "on_approve".to_string(),
            action_order: 0,
            is_active: true,
            condition_field: Some("amount".to_string()),
            condition_operator: Some("greater_than".to_string()),
            condition_value: Some("100".to_string()),
            config: serde_json::json!({}),
            fail_silently: true,
            retry_on_failure: retry,
            max_retries,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn attempts_follow_retry_flag() {
        assert_eq!(action(false, 3).attempts(), 1);
        assert_eq!(action(true, 3).attempts(), 4);
        assert_eq!(action(true, -1).attempts(), 1);
    }

    #[test]
    fn parses_trigger_and_condition() {
        let a = action(false, 0);
        assert_eq!(a.trigger().unwrap(), ActionTrigger::OnApprove);
        let cond = a.condition().unwrap().unwrap();
        assert!(cond.matches(&serde_json::json!({"amount": 150})));
    }
}
