use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use fieldwork_core::{AggregateRoot, ExpectedVersion, ResourceId, TaskId};
use fieldwork_resources::{ResourceRecord, TaskResourceReservation};
use fieldwork_tasks::{DependencyEdge, Task, TaskComment, TaskRecord};

use super::{StoreError, WorkOrderStore, WorkOrderTx};
use crate::query::{Page, Pagination, TaskQuery};

#[derive(Debug, Clone, Default)]
struct State {
    /// Keyed by insertion sequence so listings follow creation order.
    tasks: BTreeMap<u64, Task>,
    task_seq: HashMap<TaskId, u64>,
    next_seq: u64,
    resources: BTreeMap<ResourceId, ResourceRecord>,
    reservations: BTreeMap<(TaskId, ResourceId), TaskResourceReservation>,
    edges: BTreeMap<(TaskId, TaskId), DependencyEdge>,
    comments: Vec<TaskComment>,
}

impl State {
    fn task(&self, id: TaskId) -> Option<&Task> {
        self.task_seq.get(&id).and_then(|seq| self.tasks.get(seq))
    }
}

/// Single-writer in-memory store.
///
/// A transaction owns the state mutex for its whole lifetime and mutates a
/// private copy; commit swaps the copy in, drop discards it. Intended for
/// tests/dev and for running without a database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkOrderStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryWorkOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkOrderStore for InMemoryWorkOrderStore {
    async fn begin(&self) -> Result<Box<dyn WorkOrderTx>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx { guard, working }))
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
}

fn version_conflict(what: &str, expected: ExpectedVersion, actual: u64) -> StoreError {
    StoreError::Concurrency(format!(
        "{what}: expected {expected:?}, found version {actual}"
    ))
}

#[async_trait]
impl WorkOrderTx for InMemoryTx {
    async fn task(&mut self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.working.task(id).cloned())
    }

    async fn task_for_update(&mut self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.working.task(id).cloned())
    }

    async fn task_exists(&mut self, id: TaskId) -> Result<bool, StoreError> {
        Ok(self.working.task_seq.contains_key(&id))
    }

    async fn insert_task(&mut self, task: &Task) -> Result<(), StoreError> {
        let id = task.id_typed();
        if self.working.task_seq.contains_key(&id) {
            return Err(StoreError::Concurrency(format!("task {id} already exists")));
        }
        let seq = self.working.next_seq;
        self.working.next_seq += 1;
        self.working.task_seq.insert(id, seq);
        self.working.tasks.insert(seq, task.clone());
        Ok(())
    }

    async fn update_task(
        &mut self,
        task: &Task,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let id = task.id_typed();
        let seq = *self
            .working
            .task_seq
            .get(&id)
            .ok_or_else(|| StoreError::Concurrency(format!("task {id} no longer exists")))?;
        let stored = self
            .working
            .tasks
            .get_mut(&seq)
            .ok_or_else(|| StoreError::Backend(format!("task index out of sync for {id}")))?;
        if !expected.matches(stored.version()) {
            return Err(version_conflict("task", expected, stored.version()));
        }
        *stored = task.clone();
        Ok(())
    }

    async fn delete_task(&mut self, id: TaskId) -> Result<(), StoreError> {
        if let Some(seq) = self.working.task_seq.remove(&id) {
            self.working.tasks.remove(&seq);
        }
        self.working.reservations.retain(|(task_id, _), _| *task_id != id);
        self.working.comments.retain(|c| c.task_id != id);
        self.working
            .edges
            .retain(|(task_id, dependency_id), _| *task_id != id && *dependency_id != id);
        Ok(())
    }

    async fn list_tasks(&mut self, query: &TaskQuery) -> Result<Page<TaskRecord>, StoreError> {
        let matching: Vec<&Task> = self
            .working
            .tasks
            .values()
            .filter(|t| {
                let r = t.record();
                query.project_id.is_none_or(|p| r.project_id == Some(p))
                    && query.status.is_none_or(|s| r.status == s)
                    && query
                        .category
                        .as_deref()
                        .is_none_or(|c| r.category.as_deref() == Some(c))
            })
            .collect();

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.pagination.offset() as usize)
            .take(query.pagination.limit() as usize)
            .map(|t| t.record().clone())
            .collect();
        Ok(Page::new(items, total, query.pagination))
    }

    async fn resources_for_update(
        &mut self,
        ids: &[ResourceId],
    ) -> Result<Vec<ResourceRecord>, StoreError> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        Ok(ids
            .iter()
            .filter_map(|id| self.working.resources.get(id).cloned())
            .collect())
    }

    async fn resource(&mut self, id: ResourceId) -> Result<Option<ResourceRecord>, StoreError> {
        Ok(self.working.resources.get(&id).cloned())
    }

    async fn insert_resource(&mut self, record: &ResourceRecord) -> Result<(), StoreError> {
        let id = record.id_typed();
        if self.working.resources.contains_key(&id) {
            return Err(StoreError::Concurrency(format!("resource {id} already exists")));
        }
        self.working.resources.insert(id, record.clone());
        Ok(())
    }

    async fn save_resource(
        &mut self,
        record: &ResourceRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let id = record.id_typed();
        let stored = self
            .working
            .resources
            .get_mut(&id)
            .ok_or_else(|| StoreError::Concurrency(format!("resource {id} no longer exists")))?;
        if !expected.matches(stored.version()) {
            return Err(version_conflict("resource", expected, stored.version()));
        }
        *stored = record.clone();
        Ok(())
    }

    async fn list_resources(
        &mut self,
        pagination: Pagination,
    ) -> Result<Page<ResourceRecord>, StoreError> {
        let total = self.working.resources.len() as u64;
        let items = self
            .working
            .resources
            .values()
            .skip(pagination.offset() as usize)
            .take(pagination.limit() as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, total, pagination))
    }

    async fn insert_reservation(
        &mut self,
        reservation: &TaskResourceReservation,
    ) -> Result<(), StoreError> {
        let key = (reservation.task_id, reservation.resource_id);
        if self.working.reservations.contains_key(&key) {
            return Err(StoreError::Concurrency(format!(
                "task {} already holds a reservation on resource {}",
                key.0, key.1
            )));
        }
        self.working.reservations.insert(key, reservation.clone());
        Ok(())
    }

    async fn reservation(
        &mut self,
        task_id: TaskId,
        resource_id: ResourceId,
    ) -> Result<Option<TaskResourceReservation>, StoreError> {
        Ok(self.working.reservations.get(&(task_id, resource_id)).cloned())
    }

    async fn reservations_for_task(
        &mut self,
        task_id: TaskId,
    ) -> Result<Vec<TaskResourceReservation>, StoreError> {
        Ok(self
            .working
            .reservations
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn save_reservation(
        &mut self,
        reservation: &TaskResourceReservation,
    ) -> Result<(), StoreError> {
        let key = (reservation.task_id, reservation.resource_id);
        match self.working.reservations.get_mut(&key) {
            Some(stored) => {
                *stored = reservation.clone();
                Ok(())
            }
            None => Err(StoreError::Concurrency(format!(
                "reservation of task {} on resource {} no longer exists",
                key.0, key.1
            ))),
        }
    }

    async fn release_reservation(
        &mut self,
        task_id: TaskId,
        resource_id: ResourceId,
        released_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match self.working.reservations.get_mut(&(task_id, resource_id)) {
            Some(stored) if stored.released_at.is_none() => {
                stored.released_at = Some(released_at);
                Ok(())
            }
            _ => Err(StoreError::Concurrency(format!(
                "reservation of task {task_id} on resource {resource_id} is no longer outstanding"
            ))),
        }
    }

    async fn lock_dependency_graph(&mut self) -> Result<(), StoreError> {
        // The state mutex already serializes every transaction.
        Ok(())
    }

    async fn dependency_edges(&mut self) -> Result<Vec<DependencyEdge>, StoreError> {
        Ok(self.working.edges.values().cloned().collect())
    }

    async fn dependencies_of(
        &mut self,
        task_id: TaskId,
    ) -> Result<Vec<DependencyEdge>, StoreError> {
        Ok(self
            .working
            .edges
            .values()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn dependents_of(&mut self, task_id: TaskId) -> Result<Vec<DependencyEdge>, StoreError> {
        Ok(self
            .working
            .edges
            .values()
            .filter(|e| e.dependency_id == task_id)
            .cloned()
            .collect())
    }

    async fn insert_edge(&mut self, edge: &DependencyEdge) -> Result<(), StoreError> {
        let key = (edge.task_id, edge.dependency_id);
        if self.working.edges.contains_key(&key) {
            return Err(StoreError::Concurrency(format!(
                "edge {} -> {} already exists",
                key.0, key.1
            )));
        }
        self.working.edges.insert(key, edge.clone());
        Ok(())
    }

    async fn delete_edge(
        &mut self,
        task_id: TaskId,
        dependency_id: TaskId,
    ) -> Result<bool, StoreError> {
        Ok(self.working.edges.remove(&(task_id, dependency_id)).is_some())
    }

    async fn insert_comment(&mut self, comment: &TaskComment) -> Result<(), StoreError> {
        self.working.comments.push(comment.clone());
        Ok(())
    }

    async fn comments_for_task(
        &mut self,
        task_id: TaskId,
    ) -> Result<Vec<TaskComment>, StoreError> {
        Ok(self
            .working
            .comments
            .iter()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fieldwork_resources::NewResource;
    use fieldwork_tasks::NewTask;

    fn resource() -> ResourceRecord {
        ResourceRecord::register(
            ResourceId::new(),
            NewResource {
                name: "Engrais NPK".to_string(),
                resource_type: "intrant".to_string(),
                unit: "kg".to_string(),
                quantity_total: 100,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn task(title: &str) -> Task {
        Task::create(
            TaskId::new(),
            NewTask {
                title: title.to_string(),
                ..NewTask::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemoryWorkOrderStore::new();
        let record = resource();
        let id = record.id_typed();

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_resource(&record).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.resource(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn committed_writes_are_visible_to_later_transactions() {
        let store = InMemoryWorkOrderStore::new();
        let record = resource();
        let id = record.id_typed();

        let mut tx = store.begin().await.unwrap();
        tx.insert_resource(&record).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.resource(id).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn stale_resource_save_is_a_concurrency_error() {
        let store = InMemoryWorkOrderStore::new();
        let mut record = resource();

        let mut tx = store.begin().await.unwrap();
        tx.insert_resource(&record).await.unwrap();
        record.reserve(10, Utc::now()).unwrap();
        let err = tx
            .save_resource(&record, ExpectedVersion::Exact(7))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
    }

    #[tokio::test]
    async fn release_keeps_usage_recorded_after_the_snapshot() {
        let store = InMemoryWorkOrderStore::new();
        let (t, record) = (task("récolte"), resource());
        let now = Utc::now();
        let reservation =
            TaskResourceReservation::new(t.id_typed(), record.id_typed(), 40, now).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_task(&t).await.unwrap();
        tx.insert_resource(&record).await.unwrap();
        tx.insert_reservation(&reservation).await.unwrap();
        tx.commit().await.unwrap();

        // Snapshot taken before usage is recorded.
        let stale = reservation.clone();
        let mut used = reservation;
        used.record_usage(30).unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.save_reservation(&used).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.release_reservation(stale.task_id, stale.resource_id, now)
            .await
            .unwrap();
        let stored = tx
            .reservation(stale.task_id, stale.resource_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.quantity_used, 30);
        assert_eq!(stored.released_at, Some(now));

        let err = tx
            .release_reservation(stale.task_id, stale.resource_id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
    }

    #[tokio::test]
    async fn delete_task_removes_edges_on_both_sides() {
        let store = InMemoryWorkOrderStore::new();
        let (a, b, c) = (task("a"), task("b"), task("c"));

        let mut tx = store.begin().await.unwrap();
        for t in [&a, &b, &c] {
            tx.insert_task(t).await.unwrap();
        }
        let now = Utc::now();
        tx.insert_edge(&DependencyEdge::new(a.id_typed(), b.id_typed(), None, now).unwrap())
            .await
            .unwrap();
        tx.insert_edge(&DependencyEdge::new(b.id_typed(), c.id_typed(), None, now).unwrap())
            .await
            .unwrap();

        tx.delete_task(b.id_typed()).await.unwrap();
        assert!(tx.dependency_edges().await.unwrap().is_empty());
        assert!(!tx.task_exists(b.id_typed()).await.unwrap());
    }

    #[tokio::test]
    async fn list_tasks_keeps_creation_order() {
        let store = InMemoryWorkOrderStore::new();
        let tasks: Vec<Task> = (0..5).map(|i| task(&format!("t{i}"))).collect();

        let mut tx = store.begin().await.unwrap();
        for t in &tasks {
            tx.insert_task(t).await.unwrap();
        }
        let page = tx
            .list_tasks(&TaskQuery {
                pagination: Pagination::new(Some(2), Some(2), 20, 100),
                ..TaskQuery::default()
            })
            .await
            .unwrap();

        let titles: Vec<_> = page.items.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["t2", "t3"]);
        assert_eq!(page.total, 5);
        assert!(page.has_more);
    }
}
