//! Approval vocabulary: task and submission statuses, task kinds, approval
//! logic and decisions.
//!
//! Every enum here is stored as a lowercase `TEXT` column. The
//! [`string_enum!`] macro keeps the Rust variant, its database spelling and
//! the validation error message in one place.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every accepted database value, in declaration order.
            pub const VALID: &'static [&'static str] = &[$($val),+];

            /// The database / wire spelling.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $val ),+
                }
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $val => Ok($name::$variant), )+
                    other => Err(CoreError::Validation(format!(
                        "Invalid {} '{other}'. Must be one of: {}",
                        $label,
                        Self::VALID.join(", ")
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use string_enum;

string_enum! {
    /// How the tasks of one scope combine into a scope outcome.
    ApprovalLogic, "approval logic" {
        /// Every group must approve; one rejection vetoes.
        All = "all",
        /// First approval wins; only unanimous rejection vetoes.
        Any = "any",
        /// Groups approve one after another in declared order.
        Sequence = "sequence",
    }
}

string_enum! {
    /// Lifecycle of a single approval task.
    TaskStatus, "task status" {
        Pending = "pending",
        Approved = "approved",
        Rejected = "rejected",
        Expired = "expired",
        Skipped = "skipped",
    }
}

string_enum! {
    /// Explicit discriminant set when a task is created.
    TaskKind, "task kind" {
        /// The single gating task assigned to the submitter's manager.
        Manager = "manager",
        /// A task assigned to an approval group.
        Group = "group",
    }
}

string_enum! {
    /// Lifecycle of a form submission.
    SubmissionStatus, "submission status" {
        Draft = "draft",
        Submitted = "submitted",
        PendingApproval = "pending_approval",
        Approved = "approved",
        Rejected = "rejected",
        Withdrawn = "withdrawn",
    }
}

string_enum! {
    /// An approver's verdict on a task.
    Decision, "decision" {
        Approve = "approve",
        Reject = "reject",
    }
}

impl TaskStatus {
    /// Terminal statuses are never revisited by the orchestrator or sweeper.
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

impl SubmissionStatus {
    /// Once terminal, no further approval task may be created.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Approved | SubmissionStatus::Rejected | SubmissionStatus::Withdrawn
        )
    }
}

impl Decision {
    /// The task status recorded for this decision.
    pub fn task_status(self) -> TaskStatus {
        match self {
            Decision::Approve => TaskStatus::Approved,
            Decision::Reject => TaskStatus::Rejected,
        }
    }
}
