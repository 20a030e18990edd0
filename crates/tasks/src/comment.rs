use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fieldwork_core::{CommentId, DomainError, DomainResult, EmployeeId, TaskId};

const MAX_COMMENT_LEN: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskComment {
    pub id: CommentId,
    pub task_id: TaskId,
    pub author_id: EmployeeId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl TaskComment {
    pub fn new(
        id: CommentId,
        task_id: TaskId,
        author_id: EmployeeId,
        text: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DomainError::validation("comment text cannot be empty"));
        }
        if text.chars().count() > MAX_COMMENT_LEN {
            return Err(DomainError::validation(format!(
                "comment text cannot exceed {MAX_COMMENT_LEN} characters"
            )));
        }
        Ok(Self {
            id,
            task_id,
            author_id,
            text: text.to_string(),
            created_at: now,
        })
    }
}
