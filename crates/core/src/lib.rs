//! Pure domain logic for form approval workflows.
//!
//! Nothing in this crate performs I/O. The `db`, `events` and `engine` crates
//! load state, hand it to the planners here, and persist what comes back.

pub mod actions;
pub mod approval;
pub mod cadence;
pub mod deadlines;
pub mod error;
pub mod notification;
pub mod orchestration;
pub mod types;
pub mod workflow;
