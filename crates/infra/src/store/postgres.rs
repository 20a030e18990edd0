//! Postgres-backed work-order store.
//!
//! ## Locking
//!
//! - Task, resource and reservation rows are locked with
//!   `SELECT ... FOR NO KEY UPDATE`. Keys never change, so the weaker mode still
//!   lets other transactions insert reservations and edges that reference the
//!   locked rows. Resources are always locked `ORDER BY id`, so two
//!   transactions reserving overlapping sets cannot deadlock on each other.
//! - Releasing a reservation only stamps `released_at`; `quantity_used` is
//!   left to whoever last recorded usage.
//! - Edge insertion is serialized with a transaction-scoped advisory lock
//!   (`pg_advisory_xact_lock`), released automatically on commit/rollback.
//! - Every UPDATE also carries the version the row was loaded at; a mismatch is
//!   reported as `StoreError::Concurrency`.
//!
//! ## Error Mapping
//!
//! | PostgreSQL code | StoreError | Scenario |
//! |---|---|---|
//! | `23505` unique violation | `Concurrency` | Two writers inserted the same key |
//! | `23503` foreign key violation | `Concurrency` | Referenced task/resource deleted concurrently |
//! | `40001` / `40P01` | `Concurrency` | Serialization failure / deadlock victim |
//! | anything else | `Backend` | Connectivity, check constraints, decoding |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use fieldwork_core::{
    CommentId, EmployeeId, ExpectedVersion, ParcelId, ProjectId, ResourceId, TaskId,
};
use fieldwork_resources::{
    ResourceRecord, ResourceSnapshot, ResourceStatus, TaskResourceReservation,
};
use fieldwork_tasks::{DependencyEdge, Task, TaskComment, TaskRecord, WeatherConstraints};

use super::{StoreError, WorkOrderStore, WorkOrderTx};
use crate::query::{Page, Pagination, TaskQuery};

const SCHEMA: &str = include_str!("schema.sql");

/// Advisory lock key guarding the dependency graph ("fieldwk" in ASCII).
const GRAPH_LOCK_KEY: i64 = 0x0066_6965_6c64_776b;

const TASK_COLUMNS: &str = "id, project_id, parcel_id, responsible_id, title, description, \
     status, priority, category, start_date, planned_end, actual_end, weather_dependent, \
     min_temperature, max_temperature, max_wind_speed, max_precipitation, completion_percent, \
     estimated_hours, actual_hours, version, created_at, updated_at";

const RESOURCE_COLUMNS: &str = "id, name, resource_type, unit, status, condition, \
     quantity_total, quantity_available, quantity_reserved, version, created_at, updated_at";

const RESERVATION_COLUMNS: &str =
    "task_id, resource_id, quantity_required, quantity_used, reserved_at, released_at";

const EDGE_COLUMNS: &str = "task_id, dependency_id, kind, created_at";

const ROW_LOCK: &str = " FOR NO KEY UPDATE";

const RELEASE_RESERVATION_SQL: &str = "UPDATE task_resources SET released_at = $3 \
     WHERE task_id = $1 AND resource_id = $2 AND released_at IS NULL";

fn lock_resources_sql() -> String {
    format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = ANY($1) ORDER BY id{ROW_LOCK}")
}

#[derive(Debug, Clone)]
pub struct PostgresWorkOrderStore {
    pool: Arc<PgPool>,
}

impl PostgresWorkOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl WorkOrderStore for PostgresWorkOrderStore {
    async fn begin(&self) -> Result<Box<dyn WorkOrderTx>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresTx { tx }))
    }
}

struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTx {
    async fn fetch_task(&mut self, id: TaskId, for_update: bool) -> Result<Option<Task>, StoreError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1{}",
            if for_update { ROW_LOCK } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_task", e))?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn fetch_edges(
        &mut self,
        operation: &str,
        filter: &str,
        task_id: Option<TaskId>,
    ) -> Result<Vec<DependencyEdge>, StoreError> {
        let sql = format!("SELECT {EDGE_COLUMNS} FROM task_dependencies {filter} ORDER BY created_at, task_id, dependency_id");
        let mut query = sqlx::query(&sql);
        if let Some(id) = task_id {
            query = query.bind(*id.as_uuid());
        }
        let rows = query
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(edge_from_row).collect()
    }
}

#[async_trait]
impl WorkOrderTx for PostgresTx {
    async fn task(&mut self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.fetch_task(id, false).await
    }

    async fn task_for_update(&mut self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.fetch_task(id, true).await
    }

    async fn task_exists(&mut self, id: TaskId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM tasks WHERE id = $1) AS present")
            .bind(id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("task_exists", e))?;
        column(&row, "present")
    }

    #[instrument(skip(self, task), fields(task_id = %task.id_typed()), err)]
    async fn insert_task(&mut self, task: &Task) -> Result<(), StoreError> {
        let r = task.record();
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, project_id, parcel_id, responsible_id, title, description,
                status, priority, category, start_date, planned_end, actual_end,
                weather_dependent, min_temperature, max_temperature, max_wind_speed,
                max_precipitation, completion_percent, estimated_hours, actual_hours,
                version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(r.id.as_uuid())
        .bind(r.project_id.map(|id| *id.as_uuid()))
        .bind(r.parcel_id.map(|id| *id.as_uuid()))
        .bind(r.responsible_id.map(|id| *id.as_uuid()))
        .bind(&r.title)
        .bind(&r.description)
        .bind(r.status.as_str())
        .bind(r.priority.as_str())
        .bind(&r.category)
        .bind(r.start_date)
        .bind(r.planned_end)
        .bind(r.actual_end)
        .bind(r.weather_dependent)
        .bind(r.weather.min_temperature)
        .bind(r.weather.max_temperature)
        .bind(r.weather.max_wind_speed)
        .bind(r.weather.max_precipitation)
        .bind(i16::from(r.completion_percent))
        .bind(r.estimated_hours)
        .bind(r.actual_hours)
        .bind(version_to_db(r.version))
        .bind(r.created_at)
        .bind(r.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_task", e))?;
        Ok(())
    }

    #[instrument(skip(self, task), fields(task_id = %task.id_typed(), expected = ?expected), err)]
    async fn update_task(
        &mut self,
        task: &Task,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let r = task.record();
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                project_id = $2, parcel_id = $3, responsible_id = $4, title = $5,
                description = $6, status = $7, priority = $8, category = $9,
                start_date = $10, planned_end = $11, actual_end = $12,
                weather_dependent = $13, min_temperature = $14, max_temperature = $15,
                max_wind_speed = $16, max_precipitation = $17, completion_percent = $18,
                estimated_hours = $19, actual_hours = $20, version = $21, updated_at = $22
            WHERE id = $1 AND ($23::BIGINT IS NULL OR version = $23)
            "#,
        )
        .bind(r.id.as_uuid())
        .bind(r.project_id.map(|id| *id.as_uuid()))
        .bind(r.parcel_id.map(|id| *id.as_uuid()))
        .bind(r.responsible_id.map(|id| *id.as_uuid()))
        .bind(&r.title)
        .bind(&r.description)
        .bind(r.status.as_str())
        .bind(r.priority.as_str())
        .bind(&r.category)
        .bind(r.start_date)
        .bind(r.planned_end)
        .bind(r.actual_end)
        .bind(r.weather_dependent)
        .bind(r.weather.min_temperature)
        .bind(r.weather.max_temperature)
        .bind(r.weather.max_wind_speed)
        .bind(r.weather.max_precipitation)
        .bind(i16::from(r.completion_percent))
        .bind(r.estimated_hours)
        .bind(r.actual_hours)
        .bind(version_to_db(r.version))
        .bind(r.updated_at)
        .bind(expected_to_db(expected))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_task", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Concurrency(format!(
                "task {} changed or vanished (expected {expected:?})",
                r.id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %id), err)]
    async fn delete_task(&mut self, id: TaskId) -> Result<(), StoreError> {
        // Reservations, comments and edges on both sides go with ON DELETE CASCADE.
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_task", e))?;
        Ok(())
    }

    async fn list_tasks(&mut self, query: &TaskQuery) -> Result<Page<TaskRecord>, StoreError> {
        const FILTER: &str = "($1::UUID IS NULL OR project_id = $1) \
             AND ($2::TEXT IS NULL OR status = $2) \
             AND ($3::TEXT IS NULL OR category = $3)";

        let project = query.project_id.map(|id| *id.as_uuid());
        let status = query.status.map(|s| s.as_str());

        let count_sql = format!("SELECT COUNT(*) AS total FROM tasks WHERE {FILTER}");
        let count_row = sqlx::query(&count_sql)
            .bind(project)
            .bind(status)
            .bind(query.category.as_deref())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("count_tasks", e))?;
        let total: i64 = column(&count_row, "total")?;

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE {FILTER} ORDER BY seq ASC LIMIT $4 OFFSET $5"
        );
        let rows = sqlx::query(&sql)
            .bind(project)
            .bind(status)
            .bind(query.category.as_deref())
            .bind(query.pagination.limit() as i64)
            .bind(query.pagination.offset() as i64)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_tasks", e))?;

        let items = rows
            .iter()
            .map(|row| task_from_row(row).map(Task::into_record))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total.max(0) as u64, query.pagination))
    }

    async fn resources_for_update(
        &mut self,
        ids: &[ResourceId],
    ) -> Result<Vec<ResourceRecord>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let sql = lock_resources_sql();
        let rows = sqlx::query(&sql)
            .bind(uuids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_resources", e))?;
        rows.iter().map(resource_from_row).collect()
    }

    async fn resource(&mut self, id: ResourceId) -> Result<Option<ResourceRecord>, StoreError> {
        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_resource", e))?;
        row.as_ref().map(resource_from_row).transpose()
    }

    #[instrument(skip(self, record), fields(resource_id = %record.id_typed()), err)]
    async fn insert_resource(&mut self, record: &ResourceRecord) -> Result<(), StoreError> {
        let s = record.snapshot();
        sqlx::query(
            r#"
            INSERT INTO resources (
                id, name, resource_type, unit, status, condition, quantity_total,
                quantity_available, quantity_reserved, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(s.id.as_uuid())
        .bind(&s.name)
        .bind(&s.resource_type)
        .bind(&s.unit)
        .bind(s.status.as_str())
        .bind(s.condition.as_str())
        .bind(s.quantity_total)
        .bind(s.quantity_available)
        .bind(s.quantity_reserved)
        .bind(version_to_db(s.version))
        .bind(s.created_at)
        .bind(s.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_resource", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, record),
        fields(
            resource_id = %record.id_typed(),
            available = record.quantity_available(),
            reserved = record.quantity_reserved(),
            expected = ?expected
        ),
        err
    )]
    async fn save_resource(
        &mut self,
        record: &ResourceRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let s = record.snapshot();
        let result = sqlx::query(
            r#"
            UPDATE resources SET
                name = $2, resource_type = $3, unit = $4, status = $5, condition = $6,
                quantity_total = $7, quantity_available = $8, quantity_reserved = $9,
                version = $10, updated_at = $11
            WHERE id = $1 AND ($12::BIGINT IS NULL OR version = $12)
            "#,
        )
        .bind(s.id.as_uuid())
        .bind(&s.name)
        .bind(&s.resource_type)
        .bind(&s.unit)
        .bind(s.status.as_str())
        .bind(s.condition.as_str())
        .bind(s.quantity_total)
        .bind(s.quantity_available)
        .bind(s.quantity_reserved)
        .bind(version_to_db(s.version))
        .bind(s.updated_at)
        .bind(expected_to_db(expected))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_resource", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Concurrency(format!(
                "resource {} changed or vanished (expected {expected:?})",
                s.id
            )));
        }
        Ok(())
    }

    async fn list_resources(
        &mut self,
        pagination: Pagination,
    ) -> Result<Page<ResourceRecord>, StoreError> {
        let count_row = sqlx::query("SELECT COUNT(*) AS total FROM resources")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("count_resources", e))?;
        let total: i64 = column(&count_row, "total")?;

        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources ORDER BY id LIMIT $1 OFFSET $2");
        let rows = sqlx::query(&sql)
            .bind(pagination.limit() as i64)
            .bind(pagination.offset() as i64)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_resources", e))?;
        let items = rows
            .iter()
            .map(resource_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total.max(0) as u64, pagination))
    }

    async fn insert_reservation(
        &mut self,
        reservation: &TaskResourceReservation,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO task_resources (
                task_id, resource_id, quantity_required, quantity_used, reserved_at, released_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(reservation.task_id.as_uuid())
        .bind(reservation.resource_id.as_uuid())
        .bind(reservation.quantity_required)
        .bind(reservation.quantity_used)
        .bind(reservation.reserved_at)
        .bind(reservation.released_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_reservation", e))?;
        Ok(())
    }

    async fn reservation(
        &mut self,
        task_id: TaskId,
        resource_id: ResourceId,
    ) -> Result<Option<TaskResourceReservation>, StoreError> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM task_resources \
             WHERE task_id = $1 AND resource_id = $2{ROW_LOCK}"
        );
        let row = sqlx::query(&sql)
            .bind(task_id.as_uuid())
            .bind(resource_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_reservation", e))?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn reservations_for_task(
        &mut self,
        task_id: TaskId,
    ) -> Result<Vec<TaskResourceReservation>, StoreError> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM task_resources WHERE task_id = $1 ORDER BY resource_id"
        );
        let rows = sqlx::query(&sql)
            .bind(task_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_reservations", e))?;
        rows.iter().map(reservation_from_row).collect()
    }

    async fn save_reservation(
        &mut self,
        reservation: &TaskResourceReservation,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE task_resources SET quantity_used = $3, released_at = $4
            WHERE task_id = $1 AND resource_id = $2
            "#,
        )
        .bind(reservation.task_id.as_uuid())
        .bind(reservation.resource_id.as_uuid())
        .bind(reservation.quantity_used)
        .bind(reservation.released_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_reservation", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Concurrency(format!(
                "reservation of task {} on resource {} no longer exists",
                reservation.task_id, reservation.resource_id
            )));
        }
        Ok(())
    }

    async fn release_reservation(
        &mut self,
        task_id: TaskId,
        resource_id: ResourceId,
        released_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(RELEASE_RESERVATION_SQL)
            .bind(task_id.as_uuid())
            .bind(resource_id.as_uuid())
            .bind(released_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("release_reservation", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Concurrency(format!(
                "reservation of task {task_id} on resource {resource_id} is no longer outstanding"
            )));
        }
        Ok(())
    }

    async fn lock_dependency_graph(&mut self) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(GRAPH_LOCK_KEY)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_dependency_graph", e))?;
        Ok(())
    }

    async fn dependency_edges(&mut self) -> Result<Vec<DependencyEdge>, StoreError> {
        self.fetch_edges("load_edges", "", None).await
    }

    async fn dependencies_of(
        &mut self,
        task_id: TaskId,
    ) -> Result<Vec<DependencyEdge>, StoreError> {
        self.fetch_edges("load_dependencies", "WHERE task_id = $1", Some(task_id))
            .await
    }

    async fn dependents_of(&mut self, task_id: TaskId) -> Result<Vec<DependencyEdge>, StoreError> {
        self.fetch_edges("load_dependents", "WHERE dependency_id = $1", Some(task_id))
            .await
    }

    #[instrument(skip(self, edge), fields(task_id = %edge.task_id, dependency_id = %edge.dependency_id), err)]
    async fn insert_edge(&mut self, edge: &DependencyEdge) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO task_dependencies (task_id, dependency_id, kind, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(edge.task_id.as_uuid())
        .bind(edge.dependency_id.as_uuid())
        .bind(&edge.kind)
        .bind(edge.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_edge", e))?;
        Ok(())
    }

    async fn delete_edge(
        &mut self,
        task_id: TaskId,
        dependency_id: TaskId,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM task_dependencies WHERE task_id = $1 AND dependency_id = $2")
                .bind(task_id.as_uuid())
                .bind(dependency_id.as_uuid())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("delete_edge", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_comment(&mut self, comment: &TaskComment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO task_comments (id, task_id, author_id, text, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(comment.id.as_uuid())
        .bind(comment.task_id.as_uuid())
        .bind(comment.author_id.as_uuid())
        .bind(&comment.text)
        .bind(comment.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_comment", e))?;
        Ok(())
    }

    async fn comments_for_task(
        &mut self,
        task_id: TaskId,
    ) -> Result<Vec<TaskComment>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, task_id, author_id, text, created_at FROM task_comments \
             WHERE task_id = $1 ORDER BY created_at, id",
        )
        .bind(task_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_comments", e))?;

        rows.iter()
            .map(|row| {
                Ok(TaskComment {
                    id: CommentId::from_uuid(column(row, "id")?),
                    task_id: TaskId::from_uuid(column(row, "task_id")?),
                    author_id: EmployeeId::from_uuid(column(row, "author_id")?),
                    text: column(row, "text")?,
                    created_at: column(row, "created_at")?,
                })
            })
            .collect()
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Backend(format!("failed to decode column {name}: {e}")))
}

fn corrupt(what: &str, err: impl core::fmt::Display) -> StoreError {
    StoreError::Backend(format!("corrupt {what} row: {err}"))
}

fn version_to_db(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

fn version_from_db(version: i64) -> Result<u64, StoreError> {
    u64::try_from(version).map_err(|e| corrupt("version", e))
}

fn expected_to_db(expected: ExpectedVersion) -> Option<i64> {
    match expected {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(version_to_db(v)),
    }
}

fn task_from_row(row: &PgRow) -> Result<Task, StoreError> {
    let status: String = column(row, "status")?;
    let priority: String = column(row, "priority")?;
    let completion: i16 = column(row, "completion_percent")?;
    let project: Option<Uuid> = column(row, "project_id")?;
    let parcel: Option<Uuid> = column(row, "parcel_id")?;
    let responsible: Option<Uuid> = column(row, "responsible_id")?;

    let record = TaskRecord {
        id: TaskId::from_uuid(column(row, "id")?),
        project_id: project.map(ProjectId::from_uuid),
        parcel_id: parcel.map(ParcelId::from_uuid),
        responsible_id: responsible.map(EmployeeId::from_uuid),
        title: column(row, "title")?,
        description: column(row, "description")?,
        status: status.parse().map_err(|e| corrupt("task", e))?,
        priority: priority.parse().map_err(|e| corrupt("task", e))?,
        category: column(row, "category")?,
        start_date: column(row, "start_date")?,
        planned_end: column(row, "planned_end")?,
        actual_end: column(row, "actual_end")?,
        weather_dependent: column(row, "weather_dependent")?,
        weather: WeatherConstraints {
            min_temperature: column(row, "min_temperature")?,
            max_temperature: column(row, "max_temperature")?,
            max_wind_speed: column(row, "max_wind_speed")?,
            max_precipitation: column(row, "max_precipitation")?,
        },
        completion_percent: u8::try_from(completion).map_err(|e| corrupt("task", e))?,
        estimated_hours: column(row, "estimated_hours")?,
        actual_hours: column(row, "actual_hours")?,
        version: version_from_db(column(row, "version")?)?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    };
    Task::restore(record).map_err(|e| corrupt("task", e))
}

fn resource_from_row(row: &PgRow) -> Result<ResourceRecord, StoreError> {
    let condition: String = column(row, "condition")?;

    // `restore` recomputes status from condition and quantities.
    let snapshot = ResourceSnapshot {
        id: ResourceId::from_uuid(column(row, "id")?),
        name: column(row, "name")?,
        resource_type: column(row, "resource_type")?,
        unit: column(row, "unit")?,
        status: ResourceStatus::Disponible,
        condition: condition.parse().map_err(|e| corrupt("resource", e))?,
        quantity_total: column(row, "quantity_total")?,
        quantity_available: column(row, "quantity_available")?,
        quantity_reserved: column(row, "quantity_reserved")?,
        version: version_from_db(column(row, "version")?)?,
        created_at: column::<DateTime<Utc>>(row, "created_at")?,
        updated_at: column::<DateTime<Utc>>(row, "updated_at")?,
    };
    ResourceRecord::restore(snapshot).map_err(|e| corrupt("resource", e))
}

fn reservation_from_row(row: &PgRow) -> Result<TaskResourceReservation, StoreError> {
    Ok(TaskResourceReservation {
        task_id: TaskId::from_uuid(column(row, "task_id")?),
        resource_id: ResourceId::from_uuid(column(row, "resource_id")?),
        quantity_required: column(row, "quantity_required")?,
        quantity_used: column(row, "quantity_used")?,
        reserved_at: column(row, "reserved_at")?,
        released_at: column(row, "released_at")?,
    })
}

fn edge_from_row(row: &PgRow) -> Result<DependencyEdge, StoreError> {
    Ok(DependencyEdge {
        task_id: TaskId::from_uuid(column(row, "task_id")?),
        dependency_id: TaskId::from_uuid(column(row, "dependency_id")?),
        kind: column(row, "kind")?,
        created_at: column(row, "created_at")?,
    })
}

/// Map SQLx errors to `StoreError`, keeping race outcomes distinguishable from
/// real backend failures.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23503") | Some("40001") | Some("40P01") => {
                    StoreError::Concurrency(msg)
                }
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("timed out waiting for a connection in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_version_maps_to_nullable_bigint() {
        assert_eq!(expected_to_db(ExpectedVersion::Any), None);
        assert_eq!(expected_to_db(ExpectedVersion::Exact(4)), Some(4));
    }

    #[test]
    fn negative_versions_are_reported_as_corruption() {
        assert!(matches!(version_from_db(-1), Err(StoreError::Backend(_))));
        assert_eq!(version_from_db(3).unwrap(), 3);
    }

    #[test]
    fn unmapped_sqlx_errors_are_backend_failures() {
        let err = map_sqlx_error("load_task", sqlx::Error::PoolClosed);
        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("load_task")));
    }

    #[test]
    fn resource_locks_are_ordered_and_key_preserving() {
        let sql = lock_resources_sql();
        assert!(sql.ends_with("ORDER BY id FOR NO KEY UPDATE"), "{sql}");
        assert!(!sql.contains(" FOR UPDATE"));
    }

    #[test]
    fn releasing_leaves_recorded_usage_alone() {
        assert!(!RELEASE_RESERVATION_SQL.contains("quantity_used"));
        assert!(RELEASE_RESERVATION_SQL.contains("released_at IS NULL"));
    }

    #[test]
    fn schema_declares_every_table() {
        for table in ["resources", "tasks", "task_resources", "task_dependencies", "task_comments"] {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table} ")),
                "missing table {table}"
            );
        }
    }
}
