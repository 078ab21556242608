//! Post-submission action triggers and run conditions.
//!
//! An action only runs when its optional condition holds against the
//! submission's form data. Conditions compare one top-level field.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::approval::string_enum;
use crate::error::CoreError;

string_enum! {
    /// The lifecycle point an action is attached to.
    ActionTrigger, "action trigger" {
        OnSubmit = "on_submit",
        OnApprove = "on_approve",
        OnReject = "on_reject",
        OnComplete = "on_complete",
    }
}

string_enum! {
    /// Comparison applied by an [`ActionCondition`].
    ConditionOperator, "condition operator" {
        Equals = "equals",
        NotEquals = "not_equals",
        Contains = "contains",
        GreaterThan = "greater_than",
        LessThan = "less_than",
        IsTrue = "is_true",
        IsFalse = "is_false",
    }
}

impl ActionTrigger {
    /// Triggers fired, in order, when a submission resolves approved.
    pub const ON_APPROVAL: [ActionTrigger; 2] = [ActionTrigger::OnApprove, ActionTrigger::OnComplete];
}

/// A single-field condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCondition {
    pub field: String,
    pub operator: ConditionOperator,
    /// Ignored by `is_true` / `is_false`.
    pub value: String,
}

impl ActionCondition {
    /// Build from the nullable `condition_*` columns.
    ///
    /// A condition needs both a field and an operator; with either one
    /// missing the action always runs. An unknown operator is invalid.
    pub fn from_columns(
        field: Option<&str>,
        operator: Option<&str>,
        value: Option<&str>,
    ) -> Result<Option<Self>, CoreError> {
        let (Some(field), Some(operator)) = (
            field.filter(|f| !f.trim().is_empty()),
            operator.filter(|o| !o.trim().is_empty()),
        ) else {
            return Ok(None);
        };
        let operator = operator.trim().parse::<ConditionOperator>()?;
        Ok(Some(Self {
            field: field.to_string(),
            operator,
            value: value.unwrap_or_default().to_string(),
        }))
    }

    /// Evaluate against a submission's form data.
    ///
    /// Values compare by their text form: booleans as `True`/`False`, missing
    /// and null fields as `None`. Numeric comparisons that cannot parse
    /// either side are false.
    pub fn matches(&self, form_data: &Value) -> bool {
        let actual = form_data.get(&self.field);
        match self.operator {
            ConditionOperator::Equals => text(actual) == self.value,
            ConditionOperator::NotEquals => text(actual) != self.value,
            ConditionOperator::Contains => text(actual).contains(self.value.as_str()),
            ConditionOperator::GreaterThan => compare(actual, &self.value).is_some_and(|(a, b)| a > b),
            ConditionOperator::LessThan => compare(actual, &self.value).is_some_and(|(a, b)| a < b),
            ConditionOperator::IsTrue => truthy(actual),
            ConditionOperator::IsFalse => !truthy(actual),
        }
    }
}

/// Whether an optional condition lets the action run.
pub fn should_run(condition: Option<&ActionCondition>, form_data: &Value) -> bool {
    condition.map_or(true, |c| c.matches(form_data))
}

fn text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "None".to_string(),
        Some(Value::Bool(true)) => "True".to_string(),
        Some(Value::Bool(false)) => "False".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compare(actual: Option<&Value>, expected: &str) -> Option<(f64, f64)> {
    let a = number(actual?)?;
    let b = expected.trim().parse().ok()?;
    Some((a, b))
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}
