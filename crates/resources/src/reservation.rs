use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fieldwork_core::{DomainError, DomainResult, ResourceId, TaskId};

/// A task's claim on a resource, keyed by `(task_id, resource_id)`.
///
/// The claim is outstanding until `released_at` is set; the row itself is kept
/// for usage history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResourceReservation {
    pub task_id: TaskId,
    pub resource_id: ResourceId,
    pub quantity_required: i64,
    pub quantity_used: i64,
    pub reserved_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl TaskResourceReservation {
    pub fn new(
        task_id: TaskId,
        resource_id: ResourceId,
        quantity_required: i64,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity_required <= 0 {
            return Err(DomainError::validation("quantity_required must be positive"));
        }
        Ok(Self {
            task_id,
            resource_id,
            quantity_required,
            quantity_used: 0,
            reserved_at: now,
            released_at: None,
        })
    }

    pub fn is_outstanding(&self) -> bool {
        self.released_at.is_none()
    }

    /// Record how much of the reservation was actually consumed.
    ///
    /// Informational only; the ledger quantities never move here.
    pub fn record_usage(&mut self, used: i64) -> DomainResult<()> {
        if used < 0 {
            return Err(DomainError::validation("quantity_used cannot be negative"));
        }
        if used > self.quantity_required {
            return Err(DomainError::UsageExceedsRequired {
                used,
                required: self.quantity_required,
            });
        }
        self.quantity_used = used;
        Ok(())
    }

    pub(crate) fn mark_released(&mut self, now: DateTime<Utc>) {
        self.released_at = Some(now);
    }
}
