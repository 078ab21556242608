//! HTTP API-call action.
//!
//! Configuration lives in the action's `config` JSON:
//!
//! ```json
//! {
//!   "endpoint": "https://hr.example.org/api/leave",
//!   "method": "POST",
//!   "headers": { "Authorization": "Bearer ..." },
//!   "body_template": "{\"employee\": \"{employee_id}\", \"days\": {days}}"
//! }
//! ```
//!
//! `{name}` placeholders are filled from the form data, then from the
//! submission fields `submission_id`, `form_name`, `status`, `email` and
//! `submitter_name`. Without a template, the whole form data is sent as JSON.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use formflow_db::models::action::PostSubmissionAction;
use formflow_db::models::submission::SubmissionDetail;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{ActionError, ActionHandler};

/// `action_type` handled here.
pub const ACTION_TYPE: &str = "api";

/// HTTP request timeout for a single attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Regex matching `{placeholder}` tokens in body templates.
static PLACEHOLDER_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\{(\w+)\}").expect("valid regex"));

#[derive(Debug, Clone, Deserialize)]
struct ApiConfig {
    endpoint: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body_template: Option<String>,
}

/// Request body produced from the template.
#[derive(Debug, Clone, PartialEq)]
enum RequestBody {
    Json(Value),
    Text(String),
}

// ---------------------------------------------------------------------------
// ApiCallHandler
// ---------------------------------------------------------------------------

/// Calls an external HTTP endpoint with submission data.
pub struct ApiCallHandler {
    client: reqwest::Client,
}

impl ApiCallHandler {
    pub fn new() -> Result<Self, ActionError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ActionHandler for ApiCallHandler {
    async fn handle(
        &self,
        action: &PostSubmissionAction,
        submission: &SubmissionDetail,
    ) -> Result<String, ActionError> {
        let config: ApiConfig = serde_json::from_value(action.config.clone())
            .map_err(|e| ActionError::Config(e.to_string()))?;
        let url = config
            .endpoint
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ActionError::Config("API endpoint not configured".to_string()))?;
        let method = parse_method(config.method.as_deref())?;

        let mut request = self.client.request(method.clone(), url);
        for (name, value) in &config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
            request = match build_body(config.body_template.as_deref(), submission) {
                RequestBody::Json(body) => request.json(&body),
                RequestBody::Text(body) => {
                    if !config.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                        request = request.header("Content-Type", "application/json");
                    }
                    request.body(body)
                }
            };
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ActionError::HttpStatus(status.as_u16()));
        }
        tracing::info!(action_id = action.id, %method, url, status = status.as_u16(), "API call succeeded");
        Ok(format!("API call successful: {method} {url} -> {}", status.as_u16()))
    }
}

fn parse_method(raw: Option<&str>) -> Result<Method, ActionError> {
    let upper = raw.unwrap_or("POST").trim().to_ascii_uppercase();
    match upper.as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        other => Err(ActionError::Config(format!("Unsupported HTTP method '{other}'"))),
    }
}

/// Fill the template, parsing the result as JSON when possible.
///
/// A template that names an unknown placeholder falls back to sending the
/// whole form data.
fn build_body(template: Option<&str>, submission: &SubmissionDetail) -> RequestBody {
    let Some(template) = template.filter(|t| !t.trim().is_empty()) else {
        return RequestBody::Json(submission.form_data.clone());
    };

    let values = placeholders(submission);
    let mut missing = Vec::new();
    let rendered = PLACEHOLDER_RE.replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        match values.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) => String::new(),
            Some(other) => other.to_string(),
            None => {
                missing.push(key.to_string());
                caps[0].to_string()
            }
        }
    });

    if !missing.is_empty() {
        tracing::warn!(
            submission_id = submission.id,
            missing = ?missing,
            "Missing placeholder in body template, sending form data"
        );
        return RequestBody::Json(submission.form_data.clone());
    }

    match serde_json::from_str(&rendered) {
        Ok(json) => RequestBody::Json(json),
        Err(_) => RequestBody::Text(rendered.into_owned()),
    }
}

fn placeholders(submission: &SubmissionDetail) -> Map<String, Value> {
    let mut values = submission.form_data.as_object().cloned().unwrap_or_default();
    values.insert("submission_id".to_string(), Value::from(submission.id));
    values.insert("form_name".to_string(), Value::from(submission.form_name.clone()));
    values.insert("status".to_string(), Value::from(submission.status.clone()));
    values.insert(
        "email".to_string(),
        Value::from(submission.submitter_email.clone().unwrap_or_default()),
    );
    values.insert(
        "submitter_name".to_string(),
        Value::from(submission.submitter_display().to_string()),
    );
    values
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use serde_json::json;

    fn submission() -> SubmissionDetail {
        SubmissionDetail {
            id: 12,
            form_id: 3,
            form_name: "Leave".to_string(),
            submitter_id: Some(4),
            submitter_email: Some("ada@x.org".to_string()),
            submitter_name: Some("Ada".to_string()),
            form_data: json!({"employee_id": "E-7", "days": 3}),
            status: "approved".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn no_template_sends_form_data() {
        assert_eq!(
            build_body(None, &submission()),
            RequestBody::Json(json!({"employee_id": "E-7", "days": 3}))
        );
    }

    #[test]
    fn template_fills_form_and_submission_fields() {
        let body = build_body(
            Some(r#"{"employee": "{employee_id}", "days": {days}, "ref": {submission_id}, "by": "{email}"}"#),
            &submission(),
        );
        assert_eq!(
            body,
            RequestBody::Json(json!({"employee": "E-7", "days": 3, "ref": 12, "by": "ada@x.org"}))
        );
    }

    #[test]
    fn non_json_template_is_sent_as_text() {
        let body = build_body(Some("approved {form_name} for {submitter_name}"), &submission());
        assert_eq!(body, RequestBody::Text("approved Leave for Ada".to_string()));
    }

    #[test]
    fn unknown_placeholder_falls_back_to_form_data() {
        let body = build_body(Some(r#"{"x": "{nope}"}"#), &submission());
        assert_eq!(body, RequestBody::Json(json!({"employee_id": "E-7", "days": 3})));
    }

    #[test]
    fn method_defaults_to_post_and_rejects_unknown() {
        assert_eq!(parse_method(None).unwrap(), Method::POST);
        assert_eq!(parse_method(Some("patch")).unwrap(), Method::PATCH);
        assert_matches!(parse_method(Some("TRACE")), Err(ActionError::Config(_)));
    }

    #[test]
    fn new_does_not_panic() {
        let _handler = ApiCallHandler::new().unwrap();
    }

    #[tokio::test]
    async fn missing_endpoint_is_config_error() {
        let now = Utc::now();
        let action = PostSubmissionAction {
            id: 1,
            form_id: 3,
            name: "notify hr".to_string(),
            action_type: ACTION_TYPE.to_string(),
            action_trigger: "on_approve".to_string(),
            action_order: 0,
            is_active: true,
            condition_field: None,
            condition_operator: None,
            condition_value: None,
            config: json!({"method": "POST"}),
            fail_silently: false,
            retry_on_failure: false,
            max_retries: 0,
            created_at: now,
            updated_at: now,
        };
        let err = ApiCallHandler::new()
            .unwrap()
            .handle(&action, &submission())
            .await
            .unwrap_err();
        assert_matches!(err, ActionError::Config(_));
    }
}
