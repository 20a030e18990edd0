//! Domain error model.

use thiserror::Error;

use crate::id::{ResourceId, TaskId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, stock, graph shape). Infrastructure concerns belong elsewhere.
///
/// Every variant except `InvariantViolation` is an expected, caller-recoverable
/// condition. `InvariantViolation` means the stored data or a caller is wrong and
/// must abort whatever unit of work observed it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested entity was not found (domain-level).
    #[error("not found: {0}")]
    NotFound(String),

    /// A reservation asked for more than the resource has available.
    #[error(
        "insufficient stock for resource {resource_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        resource_id: ResourceId,
        requested: i64,
        available: i64,
    },

    /// Adding `task_id -> dependency_id` would close a cycle.
    #[error("circular dependency: {task_id} cannot depend on {dependency_id}")]
    CircularDependency {
        task_id: TaskId,
        dependency_id: TaskId,
    },

    /// Reported usage is larger than what the reservation holds.
    #[error("usage {used} exceeds required quantity {required}")]
    UsageExceedsRequired { used: i64, required: i64 },

    /// A status change that the task lifecycle does not allow.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// `true` for the unexpected class that signals a bug or corrupted data.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}
