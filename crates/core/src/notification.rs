//! Notification vocabulary and digest wording.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::approval::string_enum;
use crate::error::CoreError;

string_enum! {
    /// Kinds of notification that can be queued for a digest.
    NotificationKind, "notification type" {
        /// A submitter (or configured extra address) learns a form arrived.
        SubmissionReceived = "submission_received",
        /// An approver learns a task is waiting for them.
        ApprovalRequest = "approval_request",
    }
}

impl NotificationKind {
    /// Subject line for a digest of `count` items of this kind.
    pub fn digest_subject(self, count: usize, form_name: &str) -> String {
        match (self, count) {
            (NotificationKind::SubmissionReceived, 1) => {
                format!("1 new submission received: {form_name}")
            }
            (NotificationKind::SubmissionReceived, n) => {
                format!("{n} new submissions received: {form_name}")
            }
            (NotificationKind::ApprovalRequest, 1) => {
                format!("1 item pending your approval: {form_name}")
            }
            (NotificationKind::ApprovalRequest, n) => {
                format!("{n} items pending your approval: {form_name}")
            }
        }
    }
}
