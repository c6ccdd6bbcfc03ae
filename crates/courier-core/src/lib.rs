//! Core domain types and traits for the Courier service.
//!
//! This crate contains:
//! - Resource identifiers
//! - Validated subscription and topic names
//! - The job model and its lifecycle
//! - The `JobStore` trait implemented by every storage backend
//! - Job lifecycle events and the `JobNotifier` seam
//! - The shared error taxonomy

pub mod error;
pub mod event;
pub mod id;
pub mod job;
pub mod name;
pub mod store;

pub use error::{Error, Result};
pub use event::{JobEvent, JobNotifier};
pub use id::{ConnectionId, JobId, ResourceId};
pub use job::{Job, JobState, NewJob, Outcome, OutcomeReport};
pub use name::{SubscriptionId, Topic};
pub use store::JobStore;
