//! Orchestration shell for form approval workflows.
//!
//! Wraps the pure planner from `formflow-core` in per-submission database
//! transactions and wires in the outside world:
//!
//! - [`WorkflowOrchestrator`]: submission, decision, withdrawal and expiry
//!   events.
//! - [`DeadlineSweeper`]: periodic reminders, expiry, escalation and
//!   auto-approval.
//! - [`ActionExecutor`]: post-submission actions with conditions and retry.
//! - [`DirectoryService`]: manager and approver lookups.

pub mod actions;
pub mod config;
pub mod directory;
pub mod error;
pub mod orchestrator;
pub mod sweeper;

pub use actions::{ActionExecutor, ActionHandler, ExecutionSummary, HandlerRegistry, PgActionSource};
pub use config::EngineConfig;
pub use directory::{DbDirectory, DirectoryService};
pub use error::EngineError;
pub use orchestrator::{Expiry, Progress, WorkflowOrchestrator};
pub use sweeper::{DeadlineSweeper, SweepReport};
