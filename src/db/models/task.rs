use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::scoring::priority::Priority;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDateTime>,
    /// Cached priority tier, see [`Priority`].
    pub priority: i64,
    pub completed: bool,
    pub completed_at: Option<NaiveDateTime>,
    pub source_provider: Option<String>,
    pub source_task_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Task {
    pub fn priority(&self) -> Priority {
        Priority::from_i64(self.priority)
    }
}

/// Fields written when a task is created or re-saved. `priority` is always
/// computed by the service, never taken from the client.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDateTime>,
    pub priority: Priority,
    pub completed: bool,
    pub source_provider: Option<String>,
    pub source_task_id: Option<String>,
}
