//! Task status transitions.
//!
//! ```text
//! A_FAIRE ──► EN_COURS ──► TERMINEE
//!    │          │  ▲   └─► ANNULEE
//!    │          ▼  │
//!    │       EN_ATTENTE ──► ANNULEE
//!    └─────────────────────► ANNULEE
//! ```
//!
//! Entering a terminal state obliges the caller to release every outstanding
//! reservation of the task inside the same unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fieldwork_core::{DomainError, DomainResult};

use crate::task::{Task, TaskStatus};

/// Outcome of an applied status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    /// The caller must release every outstanding reservation of the task.
    pub releases_reservations: bool,
}

impl TaskStatus {
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (AFaire, EnCours)
                | (AFaire, Annulee)
                | (EnCours, EnAttente)
                | (EnCours, Terminee)
                | (EnCours, Annulee)
                | (EnAttente, EnCours)
                | (EnAttente, Annulee)
        )
    }
}

impl Task {
    /// Move the task to `next`.
    ///
    /// Returns `Ok(None)` when the task already has that status. Entering
    /// TERMINEE stamps the actual end and forces completion to 100; entering
    /// EN_COURS for the first time stamps the start date if it was not planned.
    pub fn transition_to(
        &mut self,
        next: TaskStatus,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<Transition>> {
        let from = self.record.status;
        if from == next {
            return Ok(None);
        }
        if !from.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: from.to_string(),
                to: next.to_string(),
            });
        }

        match next {
            TaskStatus::EnCours => {
                if self.record.start_date.is_none() {
                    self.record.start_date = Some(now);
                }
            }
            TaskStatus::Terminee => {
                self.record.actual_end = Some(now);
                self.record.completion_percent = 100;
            }
            TaskStatus::Annulee | TaskStatus::EnAttente | TaskStatus::AFaire => {}
        }
        self.record.status = next;
        self.touch(now);

        tracing::debug!(task_id = %self.record.id, %from, to = %next, "task transitioned");

        Ok(Some(Transition {
            from,
            to: next,
            releases_reservations: next.is_terminal(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::NewTask;
    use fieldwork_core::{AggregateRoot, TaskId};

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn task() -> Task {
        Task::create(
            TaskId::new(),
            NewTask {
                title: "Labour parcelle nord".to_string(),
                ..NewTask::default()
            },
            test_time(),
        )
        .unwrap()
    }

    #[test]
    fn start_then_finish_sets_end_and_completion() {
        let mut t = task();
        let started = t.transition_to(TaskStatus::EnCours, test_time()).unwrap().unwrap();
        assert!(!started.releases_reservations);
        assert!(t.record().start_date.is_some());

        let done = t.transition_to(TaskStatus::Terminee, test_time()).unwrap().unwrap();
        assert!(done.releases_reservations);
        assert_eq!(done.from, TaskStatus::EnCours);
        assert!(t.record().actual_end.is_some());
        assert_eq!(t.record().completion_percent, 100);
        assert_eq!(t.version(), 3);
    }

    #[test]
    fn cancel_releases_without_forcing_completion() {
        let mut t = task();
        t.transition_to(TaskStatus::EnCours, test_time()).unwrap();
        t.record.completion_percent = 40;

        let cancelled = t.transition_to(TaskStatus::Annulee, test_time()).unwrap().unwrap();
        assert!(cancelled.releases_reservations);
        assert_eq!(t.record().completion_percent, 40);
        assert!(t.record().actual_end.is_none());
    }

    #[test]
    fn waiting_detour_returns_to_in_progress() {
        let mut t = task();
        t.transition_to(TaskStatus::EnCours, test_time()).unwrap();
        t.transition_to(TaskStatus::EnAttente, test_time()).unwrap();
        t.transition_to(TaskStatus::EnCours, test_time()).unwrap();
        assert_eq!(t.status(), TaskStatus::EnCours);
    }

    #[test]
    fn same_status_is_a_no_op() {
        let mut t = task();
        assert_eq!(t.transition_to(TaskStatus::AFaire, test_time()).unwrap(), None);
        assert_eq!(t.version(), 1);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut t = task();
        t.transition_to(TaskStatus::Annulee, test_time()).unwrap();
        let before = t.clone();
        let err = t.transition_to(TaskStatus::EnCours, test_time()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(t, before);
    }

    #[test]
    fn cannot_finish_a_task_that_never_started() {
        let mut t = task();
        assert!(matches!(
            t.transition_to(TaskStatus::Terminee, test_time()),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn start_keeps_planned_start_date() {
        let mut t = task();
        let planned = test_time() - chrono::Duration::days(2);
        t.record.start_date = Some(planned);
        t.transition_to(TaskStatus::EnCours, test_time()).unwrap();
        assert_eq!(t.record().start_date, Some(planned));
    }
}
