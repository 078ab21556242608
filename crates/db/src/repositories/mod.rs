//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods. Reads
//! that stand alone take `&PgPool`; anything that must run inside the
//! per-submission transaction takes `&mut PgConnection` so callers can pass
//! `&mut *tx`.

pub mod action_repo;
pub mod approval_task_repo;
pub mod directory_repo;
pub mod notification_repo;
pub mod submission_repo;
pub mod workflow_repo;

pub use action_repo::PostSubmissionActionRepo;
pub use approval_task_repo::ApprovalTaskRepo;
pub use directory_repo::DirectoryRepo;
pub use notification_repo::PendingNotificationRepo;
pub use submission_repo::SubmissionRepo;
pub use workflow_repo::WorkflowRepo;
