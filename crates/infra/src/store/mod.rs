//! Transactional work-order store boundary.
//!
//! Every orchestrator operation runs inside one [`WorkOrderTx`]: ledger
//! quantities, reservations, tasks, edges and comments commit together or not at
//! all. Dropping a transaction without calling [`WorkOrderTx::commit`] rolls it
//! back.
//!
//! Locking contract (implementations must honour it):
//! - `task_for_update`, `resources_for_update` and `reservation` lock the rows
//!   they return until the transaction ends;
//! - `resources_for_update` locks in ascending id order;
//! - `release_reservation` writes only `released_at`, so it never clobbers a
//!   usage figure recorded by another transaction;
//! - `lock_dependency_graph` serializes every edge insertion across
//!   transactions until the transaction ends.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use fieldwork_core::{ExpectedVersion, ResourceId, TaskId};
use fieldwork_resources::{ResourceRecord, TaskResourceReservation};
use fieldwork_tasks::{DependencyEdge, Task, TaskComment, TaskRecord};

use crate::query::{Page, Pagination, TaskQuery};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryWorkOrderStore;
pub use postgres::PostgresWorkOrderStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic version check failed or a concurrent writer won a race.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait WorkOrderStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn WorkOrderTx>, StoreError>;
}

#[async_trait]
impl<S> WorkOrderStore for Arc<S>
where
    S: WorkOrderStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn WorkOrderTx>, StoreError> {
        (**self).begin().await
    }
}

#[async_trait]
pub trait WorkOrderTx: Send {
    // tasks
    async fn task(&mut self, id: TaskId) -> Result<Option<Task>, StoreError>;
    async fn task_for_update(&mut self, id: TaskId) -> Result<Option<Task>, StoreError>;
    async fn task_exists(&mut self, id: TaskId) -> Result<bool, StoreError>;
    async fn insert_task(&mut self, task: &Task) -> Result<(), StoreError>;
    async fn update_task(&mut self, task: &Task, expected: ExpectedVersion)
    -> Result<(), StoreError>;
    /// Remove the task with its reservations, comments and every edge that
    /// mentions it on either side.
    async fn delete_task(&mut self, id: TaskId) -> Result<(), StoreError>;
    async fn list_tasks(&mut self, query: &TaskQuery) -> Result<Page<TaskRecord>, StoreError>;

    // ledger
    /// Lock and load the given resources. Unknown ids are simply absent from
    /// the result.
    async fn resources_for_update(
        &mut self,
        ids: &[ResourceId],
    ) -> Result<Vec<ResourceRecord>, StoreError>;
    async fn resource(&mut self, id: ResourceId) -> Result<Option<ResourceRecord>, StoreError>;
    async fn insert_resource(&mut self, record: &ResourceRecord) -> Result<(), StoreError>;
    async fn save_resource(
        &mut self,
        record: &ResourceRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;
    async fn list_resources(
        &mut self,
        pagination: Pagination,
    ) -> Result<Page<ResourceRecord>, StoreError>;

    // reservations
    async fn insert_reservation(
        &mut self,
        reservation: &TaskResourceReservation,
    ) -> Result<(), StoreError>;
    async fn reservation(
        &mut self,
        task_id: TaskId,
        resource_id: ResourceId,
    ) -> Result<Option<TaskResourceReservation>, StoreError>;
    async fn reservations_for_task(
        &mut self,
        task_id: TaskId,
    ) -> Result<Vec<TaskResourceReservation>, StoreError>;
    async fn save_reservation(
        &mut self,
        reservation: &TaskResourceReservation,
    ) -> Result<(), StoreError>;
    /// Stamp `released_at` on a still outstanding reservation and touch no
    /// other column. Fails with [`StoreError::Concurrency`] when the row is
    /// gone or already released.
    async fn release_reservation(
        &mut self,
        task_id: TaskId,
        resource_id: ResourceId,
        released_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // dependency graph
    async fn lock_dependency_graph(&mut self) -> Result<(), StoreError>;
    async fn dependency_edges(&mut self) -> Result<Vec<DependencyEdge>, StoreError>;
    /// Edges where `task_id` is the waiting side.
    async fn dependencies_of(&mut self, task_id: TaskId)
    -> Result<Vec<DependencyEdge>, StoreError>;
    /// Edges where `task_id` is the awaited side.
    async fn dependents_of(&mut self, task_id: TaskId) -> Result<Vec<DependencyEdge>, StoreError>;
    async fn insert_edge(&mut self, edge: &DependencyEdge) -> Result<(), StoreError>;
    async fn delete_edge(
        &mut self,
        task_id: TaskId,
        dependency_id: TaskId,
    ) -> Result<bool, StoreError>;

    // comments
    async fn insert_comment(&mut self, comment: &TaskComment) -> Result<(), StoreError>;
    async fn comments_for_task(&mut self, task_id: TaskId)
    -> Result<Vec<TaskComment>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
