//! Row structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - A create DTO for inserts where the engine writes rows
//! - Conversions into the `formflow-core` types the planners consume

pub mod action;
pub mod approval_task;
pub mod notification;
pub mod submission;
pub mod workflow;
