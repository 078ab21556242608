//! Submission models.

use formflow_core::approval::SubmissionStatus;
use formflow_core::error::CoreError;
use formflow_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `submissions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Submission {
    pub id: DbId,
    pub form_id: DbId,
    pub submitter_id: Option<DbId>,
    pub form_data: serde_json::Value,
    pub status: String,
    pub submitted_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Submission {
    pub fn status(&self) -> Result<SubmissionStatus, CoreError> {
        self.status.parse()
    }
}

/// A submission joined with its form name and submitter, as messages and
/// actions need it.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SubmissionDetail {
    pub id: DbId,
    pub form_id: DbId,
    pub form_name: String,
    pub submitter_id: Option<DbId>,
    pub submitter_email: Option<String>,
    pub submitter_name: Option<String>,
    pub form_data: serde_json::Value,
    pub status: String,
    pub created_at: Timestamp,
}

impl SubmissionDetail {
    pub fn status(&self) -> Result<SubmissionStatus, CoreError> {
        self.status.parse()
    }

    /// Name shown to approvers; falls back to the email, then "Anonymous".
    pub fn submitter_display(&self) -> &str {
        self.submitter_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(self.submitter_email.as_deref())
            .unwrap_or("Anonymous")
    }
}
