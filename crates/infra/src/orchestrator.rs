//! Task orchestration: every operation on tasks, reservations, dependencies and
//! resources, each run as one store transaction.
//!
//! ```text
//! request
//!   ↓
//! 1. Validate input (pure domain checks, external references)
//!   ↓
//! 2. Begin transaction; lock the rows involved (task first, then resources by id)
//!   ↓
//! 3. Apply domain decisions (ledger, lifecycle, graph)
//!   ↓
//! 4. Write touched rows with version checks
//!   ↓
//! 5. Commit, or roll back on the first error
//! ```
//!
//! Nothing reaches the store before every check of an operation has passed, and
//! any failure discards the transaction, so a failed call leaves no trace.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use fieldwork_core::{
    AggregateRoot, CommentId, DomainError, EmployeeId, ExpectedVersion, ProjectId, ResourceId,
    TaskId,
};
use fieldwork_resources::{
    LedgerBatch, NewResource, ReservationRequest, ResourceCondition, ResourceRecord,
    ResourceSnapshot, TaskResourceReservation,
};
use fieldwork_tasks::{
    DependencyEdge, DependencyGraph, NewDependency, NewTask, Task, TaskComment, TaskPatch,
    TaskRecord, TaskStatus, ViolatedConstraint, WeatherConditions, WeatherVerdict,
};

use crate::config::{OrchestratorConfig, WeatherGateMode};
use crate::providers::{EmployeeDirectory, ProviderError, WeatherProvider};
use crate::query::{Page, Pagination, TaskQuery};
use crate::store::{StoreError, WorkOrderStore, WorkOrderTx};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("resource {0} not found")]
    ResourceNotFound(ResourceId),

    #[error("dependency task {0} not found")]
    DependencyNotFound(TaskId),

    #[error("employee {0} not found")]
    EmployeeNotFound(EmployeeId),

    #[error("task {task_id} holds no reservation on resource {resource_id}")]
    AssociationNotFound {
        task_id: TaskId,
        resource_id: ResourceId,
    },

    #[error(
        "insufficient stock for resource {resource_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        resource_id: ResourceId,
        requested: i64,
        available: i64,
    },

    #[error("circular dependency: {task_id} cannot depend on {dependency_id}")]
    CircularDependency {
        task_id: TaskId,
        dependency_id: TaskId,
    },

    #[error("usage {used} exceeds required quantity {required}")]
    UsageExceedsRequired { used: i64, required: i64 },

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("weather conditions are unfavorable: {}", describe(.violated))]
    WeatherUnfavorable { violated: Vec<ViolatedConstraint> },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("concurrent modification: {0}")]
    Concurrency(String),

    /// A broken invariant: a bug or corrupted data, never a caller mistake.
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

fn describe(violated: &[ViolatedConstraint]) -> String {
    violated
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl OrchestratorError {
    /// Failures the caller could not have avoided or fixed.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Internal(_)
                | OrchestratorError::Store(_)
                | OrchestratorError::Provider(_)
        )
    }
}

impl From<DomainError> for OrchestratorError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                OrchestratorError::Validation(msg)
            }
            DomainError::InvariantViolation(msg) => {
                tracing::error!(error = %msg, "invariant violated; aborting unit of work");
                OrchestratorError::Internal(msg)
            }
            // Existence is checked before the domain is consulted, so a domain-level
            // miss means the loaded working set is inconsistent.
            DomainError::NotFound(msg) => {
                tracing::error!(error = %msg, "entity missing from loaded working set");
                OrchestratorError::Internal(msg)
            }
            DomainError::InsufficientStock {
                resource_id,
                requested,
                available,
            } => OrchestratorError::InsufficientStock {
                resource_id,
                requested,
                available,
            },
            DomainError::CircularDependency {
                task_id,
                dependency_id,
            } => OrchestratorError::CircularDependency {
                task_id,
                dependency_id,
            },
            DomainError::UsageExceedsRequired { used, required } => {
                OrchestratorError::UsageExceedsRequired { used, required }
            }
            DomainError::InvalidTransition { from, to } => {
                OrchestratorError::InvalidTransition { from, to }
            }
            DomainError::Conflict(msg) => OrchestratorError::Concurrency(msg),
        }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => OrchestratorError::Concurrency(msg),
            other => OrchestratorError::Store(other),
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Input of [`TaskOrchestrator::create_task`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(flatten)]
    pub task: NewTask,
    /// Reserved in this order; the first one that cannot be satisfied is reported.
    #[serde(default)]
    pub resources: Vec<ReservationRequest>,
    #[serde(default)]
    pub dependencies: Vec<NewDependency>,
}

/// A task with the rows it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetails {
    #[serde(flatten)]
    pub task: TaskRecord,
    pub reservations: Vec<TaskResourceReservation>,
    pub dependencies: Vec<DependencyEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub task_id: TaskId,
    /// `None` when the task is not weather-dependent and no reading was needed.
    pub conditions: Option<WeatherConditions>,
    #[serde(flatten)]
    pub verdict: WeatherVerdict,
}

/// Advisory view of whether a task could start now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Readiness {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Dependencies that have not reached TERMINEE yet.
    pub pending_dependencies: Vec<TaskId>,
    pub weather: WeatherVerdict,
    pub ready: bool,
}

/// Result of [`TaskOrchestrator::add_dependency`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyOutcome {
    pub edge: DependencyEdge,
    /// `false` when the edge already existed and nothing was written.
    pub created: bool,
}

pub struct TaskOrchestrator<S: WorkOrderStore + ?Sized> {
    store: Arc<S>,
    weather: Arc<dyn WeatherProvider>,
    employees: Arc<dyn EmployeeDirectory>,
    config: OrchestratorConfig,
}

impl<S: WorkOrderStore + ?Sized> Clone for TaskOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            weather: Arc::clone(&self.weather),
            employees: Arc::clone(&self.employees),
            config: self.config,
        }
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(tx: Box<dyn WorkOrderTx>, result: OrchestratorResult<T>) -> OrchestratorResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed; transaction discarded");
            }
            Err(err)
        }
    }
}

impl<S: WorkOrderStore + ?Sized> TaskOrchestrator<S> {
    pub fn new(
        store: Arc<S>,
        weather: Arc<dyn WeatherProvider>,
        employees: Arc<dyn EmployeeDirectory>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            weather,
            employees,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn pagination(&self, page: Option<u32>, page_size: Option<u32>) -> Pagination {
        Pagination::new(
            page,
            page_size,
            self.config.default_page_size,
            self.config.max_page_size,
        )
    }

    async fn ensure_employee(&self, employee_id: EmployeeId) -> OrchestratorResult<()> {
        if self.employees.exists(employee_id).await? {
            Ok(())
        } else {
            Err(OrchestratorError::EmployeeNotFound(employee_id))
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tasks
    // ─────────────────────────────────────────────────────────────────────

    /// Create a task, reserving every listed resource and inserting every
    /// dependency edge, or nothing at all.
    #[instrument(
        skip(self, request),
        fields(
            resources = request.resources.len(),
            dependencies = request.dependencies.len()
        ),
        err
    )]
    pub async fn create_task(&self, request: CreateTaskRequest) -> OrchestratorResult<TaskDetails> {
        let now = Utc::now();
        let task = Task::create(TaskId::new(), request.task, now)?;

        let mut seen = BTreeSet::new();
        for r in &request.resources {
            if !seen.insert(r.resource_id) {
                return Err(OrchestratorError::Validation(format!(
                    "resource {} is listed more than once",
                    r.resource_id
                )));
            }
        }
        if let Some(responsible) = task.record().responsible_id {
            self.ensure_employee(responsible).await?;
        }

        let mut tx = self.store.begin().await?;
        let result = create_in_tx(
            tx.as_mut(),
            task,
            &request.resources,
            &request.dependencies,
            now,
        )
        .await;
        let details = finish(tx, result).await?;

        tracing::info!(
            task_id = %details.task.id,
            reserved = details.reservations.len(),
            "task created"
        );
        Ok(details)
    }

    pub async fn get_task(&self, task_id: TaskId) -> OrchestratorResult<TaskDetails> {
        let mut tx = self.store.begin().await?;
        let result: OrchestratorResult<_> = async {
            let task = tx
                .task(task_id)
                .await?
                .ok_or(OrchestratorError::TaskNotFound(task_id))?;
            Ok(TaskDetails {
                reservations: tx.reservations_for_task(task_id).await?,
                dependencies: tx.dependencies_of(task_id).await?,
                task: task.into_record(),
            })
        }
        .await;
        finish(tx, result).await
    }

    /// Apply a partial update. A status change follows the lifecycle table and,
    /// when it enters TERMINEE or ANNULEE, releases every outstanding reservation
    /// in the same transaction.
    #[instrument(skip(self, patch), fields(task_id = %task_id, status = ?patch.status), err)]
    pub async fn update_task(
        &self,
        task_id: TaskId,
        patch: TaskPatch,
    ) -> OrchestratorResult<TaskRecord> {
        let current = {
            let mut tx = self.store.begin().await?;
            let result: OrchestratorResult<_> = async {
                tx.task(task_id)
                    .await?
                    .ok_or(OrchestratorError::TaskNotFound(task_id))
            }
            .await;
            finish(tx, result).await?
        };
        if let Some(responsible) = patch.responsible_id {
            self.ensure_employee(responsible).await?;
        }
        // Fetched before any row is locked; the provider may be slow.
        let conditions = if self.weather_gate_applies(current.record(), &patch) {
            Some(self.weather.current_conditions().await?)
        } else {
            None
        };
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        let result = self
            .update_in_tx(tx.as_mut(), task_id, &patch, conditions.as_ref(), now)
            .await;
        let (task, released) = finish(tx, result).await?;

        if released > 0 {
            tracing::info!(task_id = %task_id, released, status = %task.status, "reservations released");
        }
        Ok(task)
    }

    /// Whether moving `task` under `patch` must clear the weather gate.
    fn weather_gate_applies(&self, task: &TaskRecord, patch: &TaskPatch) -> bool {
        patch.status == Some(TaskStatus::EnCours)
            && task.status != TaskStatus::EnCours
            && self.config.weather_gate == WeatherGateMode::Enforce
            && patch.weather_dependent.unwrap_or(task.weather_dependent)
    }

    async fn update_in_tx(
        &self,
        tx: &mut dyn WorkOrderTx,
        task_id: TaskId,
        patch: &TaskPatch,
        conditions: Option<&WeatherConditions>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<(TaskRecord, usize)> {
        let mut task = tx
            .task_for_update(task_id)
            .await?
            .ok_or(OrchestratorError::TaskNotFound(task_id))?;
        let loaded_version = task.version();

        task.apply_patch(patch, now)?;

        let mut released = 0;
        if let Some(next) = patch.status {
            if self.weather_gate_applies(task.record(), patch) {
                let conditions = conditions.ok_or_else(|| {
                    OrchestratorError::Concurrency(format!(
                        "task {task_id} became weather dependent while the update was prepared"
                    ))
                })?;
                let verdict = task.evaluate_weather(conditions);
                if !verdict.favorable {
                    return Err(OrchestratorError::WeatherUnfavorable {
                        violated: verdict.violated_constraints,
                    });
                }
            }

            if let Some(transition) = task.transition_to(next, now)? {
                if transition.releases_reservations {
                    released = release_reservations(tx, task_id, now).await?;
                }
            }
        }

        if task.version() != loaded_version {
            tx.update_task(&task, ExpectedVersion::Exact(loaded_version))
                .await?;
        }
        Ok((task.into_record(), released))
    }

    /// Release outstanding reservations, then remove the task with its
    /// reservations, comments and every edge touching it.
    #[instrument(skip(self), fields(task_id = %task_id), err)]
    pub async fn delete_task(&self, task_id: TaskId) -> OrchestratorResult<()> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let result: OrchestratorResult<_> = async {
            tx.task_for_update(task_id)
                .await?
                .ok_or(OrchestratorError::TaskNotFound(task_id))?;
            let released = release_reservations(tx.as_mut(), task_id, now).await?;
            tx.delete_task(task_id).await?;
            Ok(released)
        }
        .await;
        let released = finish(tx, result).await?;

        tracing::info!(task_id = %task_id, released, "task deleted");
        Ok(())
    }

    /// Tasks of a project in creation order, optionally filtered.
    pub async fn list_by_project(
        &self,
        project_id: ProjectId,
        pagination: Pagination,
        status: Option<TaskStatus>,
        category: Option<String>,
    ) -> OrchestratorResult<Page<TaskRecord>> {
        let query = TaskQuery {
            project_id: Some(project_id),
            status,
            category,
            pagination,
        };
        let mut tx = self.store.begin().await?;
        let result = tx.list_tasks(&query).await.map_err(OrchestratorError::from);
        finish(tx, result).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Comments & usage
    // ─────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, text), fields(task_id = %task_id, author_id = %author_id), err)]
    pub async fn add_comment(
        &self,
        task_id: TaskId,
        author_id: EmployeeId,
        text: &str,
    ) -> OrchestratorResult<TaskComment> {
        let comment = TaskComment::new(CommentId::new(), task_id, author_id, text, Utc::now())?;
        self.ensure_employee(author_id).await?;

        let mut tx = self.store.begin().await?;
        let result: OrchestratorResult<_> = async {
            if !tx.task_exists(task_id).await? {
                return Err(OrchestratorError::TaskNotFound(task_id));
            }
            tx.insert_comment(&comment).await?;
            Ok(comment)
        }
        .await;
        finish(tx, result).await
    }

    pub async fn list_comments(&self, task_id: TaskId) -> OrchestratorResult<Vec<TaskComment>> {
        let mut tx = self.store.begin().await?;
        let result: OrchestratorResult<_> = async {
            if !tx.task_exists(task_id).await? {
                return Err(OrchestratorError::TaskNotFound(task_id));
            }
            Ok(tx.comments_for_task(task_id).await?)
        }
        .await;
        finish(tx, result).await
    }

    pub async fn list_reservations(
        &self,
        task_id: TaskId,
    ) -> OrchestratorResult<Vec<TaskResourceReservation>> {
        let mut tx = self.store.begin().await?;
        let result: OrchestratorResult<_> = async {
            if !tx.task_exists(task_id).await? {
                return Err(OrchestratorError::TaskNotFound(task_id));
            }
            Ok(tx.reservations_for_task(task_id).await?)
        }
        .await;
        finish(tx, result).await
    }

    /// Record how much of a reservation was consumed. Ledger quantities do not move.
    #[instrument(skip(self), fields(task_id = %task_id, resource_id = %resource_id), err)]
    pub async fn update_resource_usage(
        &self,
        task_id: TaskId,
        resource_id: ResourceId,
        used: i64,
    ) -> OrchestratorResult<TaskResourceReservation> {
        let mut tx = self.store.begin().await?;
        let result: OrchestratorResult<_> = async {
            let mut reservation = tx.reservation(task_id, resource_id).await?.ok_or(
                OrchestratorError::AssociationNotFound {
                    task_id,
                    resource_id,
                },
            )?;
            reservation.record_usage(used)?;
            tx.save_reservation(&reservation).await?;
            Ok(reservation)
        }
        .await;
        finish(tx, result).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Dependencies
    // ─────────────────────────────────────────────────────────────────────

    /// Make `task_id` wait for `request.dependency_id`.
    ///
    /// The cycle check and the insert happen under the graph lock, so two
    /// opposite edges racing each other can never both succeed.
    #[instrument(
        skip(self, request),
        fields(task_id = %task_id, dependency_id = %request.dependency_id),
        err
    )]
    pub async fn add_dependency(
        &self,
        task_id: TaskId,
        request: NewDependency,
    ) -> OrchestratorResult<DependencyOutcome> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let result: OrchestratorResult<_> = async {
            tx.lock_dependency_graph().await?;
            if !tx.task_exists(task_id).await? {
                return Err(OrchestratorError::TaskNotFound(task_id));
            }
            if !tx.task_exists(request.dependency_id).await? {
                return Err(OrchestratorError::DependencyNotFound(request.dependency_id));
            }
            let edge = DependencyEdge::new(task_id, request.dependency_id, request.kind.as_deref(), now)?;

            let existing = tx.dependency_edges().await?;
            if let Some(found) = existing
                .iter()
                .find(|e| e.task_id == task_id && e.dependency_id == request.dependency_id)
            {
                return Ok(DependencyOutcome {
                    edge: found.clone(),
                    created: false,
                });
            }

            let mut graph =
                DependencyGraph::from_edges(existing.iter().map(|e| (e.task_id, e.dependency_id)))?;
            graph.insert(task_id, request.dependency_id)?;
            tx.insert_edge(&edge).await?;
            Ok(DependencyOutcome {
                edge,
                created: true,
            })
        }
        .await;
        finish(tx, result).await
    }

    pub async fn remove_dependency(
        &self,
        task_id: TaskId,
        dependency_id: TaskId,
    ) -> OrchestratorResult<()> {
        let mut tx = self.store.begin().await?;
        let result: OrchestratorResult<_> = async {
            if !tx.task_exists(task_id).await? {
                return Err(OrchestratorError::TaskNotFound(task_id));
            }
            if !tx.delete_edge(task_id, dependency_id).await? {
                return Err(OrchestratorError::DependencyNotFound(dependency_id));
            }
            Ok(())
        }
        .await;
        finish(tx, result).await
    }

    /// Every edge whose awaited side is `task_id`.
    pub async fn list_dependents(&self, task_id: TaskId) -> OrchestratorResult<Vec<DependencyEdge>> {
        let mut tx = self.store.begin().await?;
        let result: OrchestratorResult<_> = async {
            if !tx.task_exists(task_id).await? {
                return Err(OrchestratorError::TaskNotFound(task_id));
            }
            Ok(tx.dependents_of(task_id).await?)
        }
        .await;
        finish(tx, result).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Weather & readiness
    // ─────────────────────────────────────────────────────────────────────

    pub async fn evaluate_weather(&self, task_id: TaskId) -> OrchestratorResult<WeatherReport> {
        let task = self.load_task(task_id).await?;
        self.weather_report(&task).await
    }

    async fn weather_report(&self, task: &Task) -> OrchestratorResult<WeatherReport> {
        let task_id = task.id_typed();
        if !task.record().weather_dependent {
            return Ok(WeatherReport {
                task_id,
                conditions: None,
                verdict: WeatherVerdict {
                    favorable: true,
                    violated_constraints: Vec::new(),
                },
            });
        }
        let conditions = self.weather.current_conditions().await?;
        Ok(WeatherReport {
            task_id,
            conditions: Some(conditions),
            verdict: task.evaluate_weather(&conditions),
        })
    }

    /// Pending dependencies and weather verdict for a task. Advisory only.
    pub async fn readiness(&self, task_id: TaskId) -> OrchestratorResult<Readiness> {
        let mut tx = self.store.begin().await?;
        let result: OrchestratorResult<_> = async {
            let task = tx
                .task(task_id)
                .await?
                .ok_or(OrchestratorError::TaskNotFound(task_id))?;
            let mut pending = Vec::new();
            for edge in tx.dependencies_of(task_id).await? {
                let done = tx
                    .task(edge.dependency_id)
                    .await?
                    .is_some_and(|dep| dep.status() == TaskStatus::Terminee);
                if !done {
                    pending.push(edge.dependency_id);
                }
            }
            Ok((task, pending))
        }
        .await;
        let (task, pending_dependencies) = finish(tx, result).await?;

        let weather = self.weather_report(&task).await?.verdict;
        let startable = matches!(task.status(), TaskStatus::AFaire | TaskStatus::EnAttente);
        Ok(Readiness {
            task_id,
            status: task.status(),
            ready: startable && pending_dependencies.is_empty() && weather.favorable,
            pending_dependencies,
            weather,
        })
    }

    async fn load_task(&self, task_id: TaskId) -> OrchestratorResult<Task> {
        let mut tx = self.store.begin().await?;
        let result: OrchestratorResult<_> = async {
            tx.task(task_id)
                .await?
                .ok_or(OrchestratorError::TaskNotFound(task_id))
        }
        .await;
        finish(tx, result).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Resources
    // ─────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, new), fields(name = %new.name, quantity_total = new.quantity_total), err)]
    pub async fn register_resource(&self, new: NewResource) -> OrchestratorResult<ResourceSnapshot> {
        let record = ResourceRecord::register(ResourceId::new(), new, Utc::now())?;
        let mut tx = self.store.begin().await?;
        let result = tx
            .insert_resource(&record)
            .await
            .map(|_| record.snapshot())
            .map_err(OrchestratorError::from);
        finish(tx, result).await
    }

    pub async fn get_resource(&self, resource_id: ResourceId) -> OrchestratorResult<ResourceSnapshot> {
        let mut tx = self.store.begin().await?;
        let result: OrchestratorResult<_> = async {
            tx.resource(resource_id)
                .await?
                .map(|r| r.snapshot())
                .ok_or(OrchestratorError::ResourceNotFound(resource_id))
        }
        .await;
        finish(tx, result).await
    }

    pub async fn list_resources(
        &self,
        pagination: Pagination,
    ) -> OrchestratorResult<Page<ResourceSnapshot>> {
        let mut tx = self.store.begin().await?;
        let result = tx
            .list_resources(pagination)
            .await
            .map(|page| page.map(|r| r.snapshot()))
            .map_err(OrchestratorError::from);
        finish(tx, result).await
    }

    /// Restock (positive delta) or write off (negative delta) available stock.
    #[instrument(skip(self), fields(resource_id = %resource_id, delta), err)]
    pub async fn adjust_resource_total(
        &self,
        resource_id: ResourceId,
        delta: i64,
    ) -> OrchestratorResult<ResourceSnapshot> {
        let now = Utc::now();
        self.mutate_resource(resource_id, |record| record.adjust_total(delta, now))
            .await
    }

    #[instrument(skip(self), fields(resource_id = %resource_id, condition = %condition.as_str()), err)]
    pub async fn set_resource_condition(
        &self,
        resource_id: ResourceId,
        condition: ResourceCondition,
    ) -> OrchestratorResult<ResourceSnapshot> {
        let now = Utc::now();
        self.mutate_resource(resource_id, |record| {
            record.set_condition(condition, now);
            Ok(())
        })
        .await
    }

    async fn mutate_resource(
        &self,
        resource_id: ResourceId,
        apply: impl FnOnce(&mut ResourceRecord) -> Result<(), DomainError> + Send,
    ) -> OrchestratorResult<ResourceSnapshot> {
        let mut tx = self.store.begin().await?;
        let result: OrchestratorResult<_> = async {
            let mut record = tx
                .resources_for_update(&[resource_id])
                .await?
                .into_iter()
                .next()
                .ok_or(OrchestratorError::ResourceNotFound(resource_id))?;
            let loaded = record.version();
            apply(&mut record)?;
            if record.version() != loaded {
                tx.save_resource(&record, ExpectedVersion::Exact(loaded))
                    .await?;
            }
            Ok(record.snapshot())
        }
        .await;
        finish(tx, result).await
    }
}

async fn create_in_tx(
    tx: &mut dyn WorkOrderTx,
    task: Task,
    resources: &[ReservationRequest],
    dependencies: &[NewDependency],
    now: DateTime<Utc>,
) -> OrchestratorResult<TaskDetails> {
    let task_id = task.id_typed();

    // Ledger: lock every listed resource (ascending id), then reserve in request order.
    let ids: Vec<ResourceId> = resources.iter().map(|r| r.resource_id).collect();
    let mut batch = LedgerBatch::new(tx.resources_for_update(&ids).await?);
    if let Some(missing) = resources.iter().find(|r| !batch.contains(&r.resource_id)) {
        return Err(OrchestratorError::ResourceNotFound(missing.resource_id));
    }
    batch.reserve_all(resources, now)?;
    let reservations = resources
        .iter()
        .map(|r| TaskResourceReservation::new(task_id, r.resource_id, r.quantity, now))
        .collect::<Result<Vec<_>, _>>()?;

    // Graph: validate every edge under the graph lock.
    let mut edges = Vec::new();
    if !dependencies.is_empty() {
        tx.lock_dependency_graph().await?;
        let stored = tx.dependency_edges().await?;
        let mut graph =
            DependencyGraph::from_edges(stored.iter().map(|e| (e.task_id, e.dependency_id)))?;
        for dep in dependencies {
            if !tx.task_exists(dep.dependency_id).await? {
                return Err(OrchestratorError::DependencyNotFound(dep.dependency_id));
            }
            let edge = DependencyEdge::new(task_id, dep.dependency_id, dep.kind.as_deref(), now)?;
            if graph.insert(task_id, dep.dependency_id)? {
                edges.push(edge);
            }
        }
    }

    tx.insert_task(&task).await?;
    for reservation in &reservations {
        tx.insert_reservation(reservation).await?;
    }
    for edge in &edges {
        tx.insert_edge(edge).await?;
    }
    for (record, expected) in batch.into_touched() {
        tx.save_resource(&record, expected).await?;
    }

    Ok(TaskDetails {
        task: task.into_record(),
        reservations,
        dependencies: edges,
    })
}

/// Release every outstanding reservation of the task and save the touched rows.
///
/// Already-released reservations are skipped, so the ledger is credited at most
/// once per reservation.
async fn release_reservations(
    tx: &mut dyn WorkOrderTx,
    task_id: TaskId,
    now: DateTime<Utc>,
) -> OrchestratorResult<usize> {
    let mut outstanding: Vec<TaskResourceReservation> = tx
        .reservations_for_task(task_id)
        .await?
        .into_iter()
        .filter(TaskResourceReservation::is_outstanding)
        .collect();
    if outstanding.is_empty() {
        return Ok(0);
    }

    let ids: Vec<ResourceId> = outstanding.iter().map(|r| r.resource_id).collect();
    let mut batch = LedgerBatch::new(tx.resources_for_update(&ids).await?);
    let released = batch.release_all(&mut outstanding, now)?;

    for reservation in &outstanding {
        tx.release_reservation(reservation.task_id, reservation.resource_id, now)
            .await?;
    }
    for (record, expected) in batch.into_touched() {
        tx.save_resource(&record, expected).await?;
    }
    Ok(released)
}
