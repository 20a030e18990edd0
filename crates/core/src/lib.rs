//! `fieldwork-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the ledger, the task
//! lifecycle and the orchestrator (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{CommentId, EmployeeId, ParcelId, ProjectId, ResourceId, TaskId};
