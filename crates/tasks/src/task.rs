use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fieldwork_core::{
    AggregateRoot, DomainError, DomainResult, EmployeeId, ParcelId, ProjectId, TaskId,
};

use crate::weather::WeatherConstraints;

/// Task status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    AFaire,
    EnCours,
    EnAttente,
    Terminee,
    Annulee,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::AFaire => "A_FAIRE",
            TaskStatus::EnCours => "EN_COURS",
            TaskStatus::EnAttente => "EN_ATTENTE",
            TaskStatus::Terminee => "TERMINEE",
            TaskStatus::Annulee => "ANNULEE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Terminee | TaskStatus::Annulee)
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A_FAIRE" => Ok(TaskStatus::AFaire),
            "EN_COURS" => Ok(TaskStatus::EnCours),
            "EN_ATTENTE" => Ok(TaskStatus::EnAttente),
            "TERMINEE" => Ok(TaskStatus::Terminee),
            "ANNULEE" => Ok(TaskStatus::Annulee),
            other => Err(DomainError::validation(format!("unknown task status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Basse,
    #[default]
    Moyenne,
    Haute,
    Urgente,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Basse => "BASSE",
            TaskPriority::Moyenne => "MOYENNE",
            TaskPriority::Haute => "HAUTE",
            TaskPriority::Urgente => "URGENTE",
        }
    }
}

impl core::str::FromStr for TaskPriority {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BASSE" => Ok(TaskPriority::Basse),
            "MOYENNE" => Ok(TaskPriority::Moyenne),
            "HAUTE" => Ok(TaskPriority::Haute),
            "URGENTE" => Ok(TaskPriority::Urgente),
            other => Err(DomainError::validation(format!("unknown task priority '{other}'"))),
        }
    }
}

/// Flat task state as persisted and returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub project_id: Option<ProjectId>,
    pub parcel_id: Option<ParcelId>,
    pub responsible_id: Option<EmployeeId>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub category: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub planned_end: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub weather_dependent: bool,
    pub weather: WeatherConstraints,
    pub completion_percent: u8,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub parcel_id: Option<ParcelId>,
    #[serde(default)]
    pub responsible_id: Option<EmployeeId>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub planned_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub weather_dependent: bool,
    #[serde(default)]
    pub weather: WeatherConstraints,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
}

/// Partial update. `None` leaves a field unchanged.
///
/// `status` is not applied by [`Task::apply_patch`]; it goes through
/// [`Task::transition_to`] so that ledger side effects are never skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub category: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub planned_end: Option<DateTime<Utc>>,
    pub responsible_id: Option<EmployeeId>,
    pub parcel_id: Option<ParcelId>,
    pub completion_percent: Option<u8>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub weather_dependent: Option<bool>,
    pub weather: Option<WeatherConstraints>,
}

/// Aggregate root: Task.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub(crate) record: TaskRecord,
}

impl Task {
    pub fn create(id: TaskId, new: NewTask, now: DateTime<Utc>) -> DomainResult<Self> {
        let title = normalize_title(&new.title)?;
        ensure_hours("estimated_hours", new.estimated_hours)?;
        ensure_schedule(new.start_date, new.planned_end)?;
        new.weather.validate()?;

        Ok(Self {
            record: TaskRecord {
                id,
                project_id: new.project_id,
                parcel_id: new.parcel_id,
                responsible_id: new.responsible_id,
                title,
                description: new.description,
                status: TaskStatus::AFaire,
                priority: new.priority,
                category: new.category,
                start_date: new.start_date,
                planned_end: new.planned_end,
                actual_end: None,
                weather_dependent: new.weather_dependent,
                weather: new.weather,
                completion_percent: 0,
                estimated_hours: new.estimated_hours,
                actual_hours: None,
                version: 1,
                created_at: now,
                updated_at: now,
            },
        })
    }

    /// Rebuild a task from stored state.
    pub fn restore(record: TaskRecord) -> DomainResult<Self> {
        if record.completion_percent > 100 {
            return Err(DomainError::invariant(format!(
                "task {} has completion {}%",
                record.id, record.completion_percent
            )));
        }
        if record.status == TaskStatus::Terminee && record.actual_end.is_none() {
            return Err(DomainError::invariant(format!(
                "task {} is TERMINEE without an actual end",
                record.id
            )));
        }
        Ok(Self { record })
    }

    pub fn record(&self) -> &TaskRecord {
        &self.record
    }

    pub fn into_record(self) -> TaskRecord {
        self.record
    }

    pub fn id_typed(&self) -> TaskId {
        self.record.id
    }

    pub fn status(&self) -> TaskStatus {
        self.record.status
    }

    pub fn project_id(&self) -> Option<ProjectId> {
        self.record.project_id
    }

    /// Apply every field of `patch` except `status`.
    ///
    /// Validates the resulting state as a whole; on error the task is unchanged.
    pub fn apply_patch(&mut self, patch: &TaskPatch, now: DateTime<Utc>) -> DomainResult<()> {
        let mut next = self.record.clone();

        if let Some(title) = &patch.title {
            next.title = normalize_title(title)?;
        }
        if let Some(description) = &patch.description {
            next.description = Some(description.clone());
        }
        if let Some(priority) = patch.priority {
            next.priority = priority;
        }
        if let Some(category) = &patch.category {
            next.category = Some(category.clone());
        }
        if let Some(start) = patch.start_date {
            next.start_date = Some(start);
        }
        if let Some(end) = patch.planned_end {
            next.planned_end = Some(end);
        }
        if let Some(responsible) = patch.responsible_id {
            next.responsible_id = Some(responsible);
        }
        if let Some(parcel) = patch.parcel_id {
            next.parcel_id = Some(parcel);
        }
        if let Some(percent) = patch.completion_percent {
            if percent > 100 {
                return Err(DomainError::validation("completion_percent must be within 0..=100"));
            }
            if next.status == TaskStatus::Terminee && percent != 100 {
                return Err(DomainError::validation(
                    "completion_percent of a finished task is fixed at 100",
                ));
            }
            next.completion_percent = percent;
        }
        if let Some(hours) = patch.estimated_hours {
            ensure_hours("estimated_hours", Some(hours))?;
            next.estimated_hours = Some(hours);
        }
        if let Some(hours) = patch.actual_hours {
            ensure_hours("actual_hours", Some(hours))?;
            next.actual_hours = Some(hours);
        }
        if let Some(flag) = patch.weather_dependent {
            next.weather_dependent = flag;
        }
        if let Some(weather) = patch.weather {
            weather.validate()?;
            next.weather = weather;
        }
        ensure_schedule(next.start_date, next.planned_end)?;

        if next != self.record {
            next.updated_at = now;
            next.version += 1;
            self.record = next;
        }
        Ok(())
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.record.updated_at = now;
        self.record.version += 1;
    }
}

impl AggregateRoot for Task {
    type Id = TaskId;

    fn id(&self) -> &Self::Id {
        &self.record.id
    }

    fn version(&self) -> u64 {
        self.record.version
    }
}

fn normalize_title(title: &str) -> DomainResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(DomainError::validation("title cannot be empty"));
    }
    Ok(title.to_string())
}

fn ensure_hours(field: &str, hours: Option<f64>) -> DomainResult<()> {
    match hours {
        Some(h) if !h.is_finite() || h < 0.0 => Err(DomainError::validation(format!(
            "{field} must be a non-negative number"
        ))),
        _ => Ok(()),
    }
}

fn ensure_schedule(
    start: Option<DateTime<Utc>>,
    planned_end: Option<DateTime<Utc>>,
) -> DomainResult<()> {
    if let (Some(start), Some(end)) = (start, planned_end) {
        if end < start {
            return Err(DomainError::validation("planned_end cannot precede start_date"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            category: Some("semis".to_string()),
            ..NewTask::default()
        }
    }

    #[test]
    fn create_starts_in_a_faire() {
        let task = Task::create(TaskId::new(), new_task("  Semis de blé "), test_time()).unwrap();
        assert_eq!(task.status(), TaskStatus::AFaire);
        assert_eq!(task.record().title, "Semis de blé");
        assert_eq!(task.record().completion_percent, 0);
        assert_eq!(task.version(), 1);
    }

    #[test]
    fn create_rejects_blank_title_and_inverted_schedule() {
        assert!(matches!(
            Task::create(TaskId::new(), new_task(" "), test_time()),
            Err(DomainError::Validation(_))
        ));

        let now = test_time();
        let mut inverted = new_task("Récolte");
        inverted.start_date = Some(now);
        inverted.planned_end = Some(now - Duration::days(1));
        assert!(matches!(
            Task::create(TaskId::new(), inverted, now),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn patch_updates_fields_and_bumps_version() {
        let mut task = Task::create(TaskId::new(), new_task("Irrigation"), test_time()).unwrap();
        let patch = TaskPatch {
            completion_percent: Some(35),
            actual_hours: Some(2.5),
            ..TaskPatch::default()
        };
        task.apply_patch(&patch, test_time()).unwrap();
        assert_eq!(task.record().completion_percent, 35);
        assert_eq!(task.record().actual_hours, Some(2.5));
        assert_eq!(task.version(), 2);
    }

    #[test]
    fn patch_is_all_or_nothing() {
        let mut task = Task::create(TaskId::new(), new_task("Irrigation"), test_time()).unwrap();
        let before = task.clone();
        let patch = TaskPatch {
            title: Some("Arrosage".to_string()),
            completion_percent: Some(140),
            ..TaskPatch::default()
        };
        assert!(task.apply_patch(&patch, test_time()).is_err());
        assert_eq!(task, before);
    }

    #[test]
    fn empty_patch_is_a_no_op() {
        let mut task = Task::create(TaskId::new(), new_task("Taille"), test_time()).unwrap();
        task.apply_patch(&TaskPatch::default(), test_time()).unwrap();
        assert_eq!(task.version(), 1);
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            TaskStatus::AFaire,
            TaskStatus::EnCours,
            TaskStatus::EnAttente,
            TaskStatus::Terminee,
            TaskStatus::Annulee,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert_eq!(TaskStatus::EnAttente.to_string(), "EN_ATTENTE");
    }

    #[test]
    fn restore_refuses_finished_task_without_end() {
        let mut record = Task::create(TaskId::new(), new_task("Taille"), test_time())
            .unwrap()
            .into_record();
        record.status = TaskStatus::Terminee;
        assert!(Task::restore(record).unwrap_err().is_invariant_violation());
    }
}
