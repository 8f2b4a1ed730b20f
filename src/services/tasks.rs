//! Task creation and completion changes.
//!
//! Completion toggles are modelled as [`CompletionChange`] commands with an
//! exact inverse, so a batch that fails part-way can be rolled back by
//! applying the inverses of what already went through.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::db::models::{Task, TaskDraft};
use crate::db::repository::task::EVENT_SOURCE;
use crate::db::{EventRepository, TaskRepository};
use crate::error::{AppError, AppResult};
use crate::scoring::priority_for;

const MAX_TITLE_LEN: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct TaskInput {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

fn draft_from_input(input: TaskInput, now: DateTime<Utc>) -> AppResult<TaskDraft> {
    let title = input.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::Validation("Task title is required".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::Validation(format!(
            "Task title is longer than {} characters",
            MAX_TITLE_LEN
        )));
    }
    let description = input.description.filter(|d| !d.trim().is_empty());

    Ok(TaskDraft {
        priority: priority_for(&title, description.as_deref(), input.due_date, now),
        title,
        description,
        due_date: input.due_date.map(|d| d.naive_utc()),
        completed: false,
        source_provider: None,
        source_task_id: None,
    })
}

pub async fn create(pool: &SqlitePool, user_id: &str, input: TaskInput) -> AppResult<Task> {
    let draft = draft_from_input(input, Utc::now())?;
    TaskRepository::create(pool, user_id, &draft).await
}

/// Re-save a task; its priority is recomputed from the new contents.
pub async fn update(
    pool: &SqlitePool,
    user_id: &str,
    id: &str,
    input: TaskInput,
) -> AppResult<Task> {
    let draft = draft_from_input(input, Utc::now())?;
    TaskRepository::update(pool, user_id, id, &draft)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))
}

/// Turn a stored event into a task due at the event's end.
pub async fn create_from_event(pool: &SqlitePool, user_id: &str, event_id: &str) -> AppResult<Task> {
    let event = EventRepository::find_by_id(pool, user_id, event_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {} not found", event_id)))?;

    let due = event.end_utc();
    let draft = TaskDraft {
        priority: priority_for(&event.title, event.description.as_deref(), Some(due), Utc::now()),
        title: event.title.clone(),
        description: event.description.clone(),
        due_date: Some(event.end_time),
        completed: false,
        source_provider: Some(EVENT_SOURCE.to_string()),
        source_task_id: Some(event.id.clone()),
    };
    TaskRepository::create(pool, user_id, &draft).await
}

/// A change of one task's completion state, carrying the previous state so
/// it can be undone exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionChange {
    pub task_id: String,
    pub completed: bool,
    pub completed_at: Option<NaiveDateTime>,
    pub previous_completed: bool,
    pub previous_completed_at: Option<NaiveDateTime>,
}

impl CompletionChange {
    /// Move `task` to `completed`, stamping `now` when it becomes complete.
    pub fn set(task: &Task, completed: bool, now: NaiveDateTime) -> Self {
        let completed_at = match (completed, task.completed) {
            (true, true) => task.completed_at,
            (true, false) => Some(now),
            (false, _) => None,
        };
        Self {
            task_id: task.id.clone(),
            completed,
            completed_at,
            previous_completed: task.completed,
            previous_completed_at: task.completed_at,
        }
    }

    pub fn toggle(task: &Task, now: NaiveDateTime) -> Self {
        Self::set(task, !task.completed, now)
    }

    pub fn inverse(&self) -> Self {
        Self {
            task_id: self.task_id.clone(),
            completed: self.previous_completed,
            completed_at: self.previous_completed_at,
            previous_completed: self.completed,
            previous_completed_at: self.completed_at,
        }
    }

    pub async fn apply(&self, pool: &SqlitePool, user_id: &str) -> AppResult<Task> {
        TaskRepository::set_completed(
            pool,
            user_id,
            &self.task_id,
            self.completed,
            self.completed_at,
        )
        .await
    }
}

async fn load(pool: &SqlitePool, user_id: &str, id: &str) -> AppResult<Task> {
    TaskRepository::find(pool, user_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))
}

pub async fn toggle(pool: &SqlitePool, user_id: &str, id: &str) -> AppResult<Task> {
    let task = load(pool, user_id, id).await?;
    CompletionChange::toggle(&task, Utc::now().naive_utc())
        .apply(pool, user_id)
        .await
}

/// Apply completion changes for `ids` in order. `completed` forces a state;
/// `None` flips each task. On the first failure every change already applied
/// is undone in reverse order and the failure is returned.
pub async fn toggle_many(
    pool: &SqlitePool,
    user_id: &str,
    ids: &[String],
    completed: Option<bool>,
) -> AppResult<Vec<Task>> {
    let now = Utc::now().naive_utc();
    let mut applied: Vec<CompletionChange> = Vec::with_capacity(ids.len());
    let mut updated = Vec::with_capacity(ids.len());

    for id in ids {
        let step = async {
            let task = load(pool, user_id, id).await?;
            let change = match completed {
                Some(state) => CompletionChange::set(&task, state, now),
                None => CompletionChange::toggle(&task, now),
            };
            let task = change.apply(pool, user_id).await?;
            Ok::<_, AppError>((change, task))
        }
        .await;

        match step {
            Ok((change, task)) => {
                applied.push(change);
                updated.push(task);
            }
            Err(e) => {
                tracing::warn!(
                    "Completion change for task {} failed, undoing {} applied change(s): {:?}",
                    id,
                    applied.len(),
                    e
                );
                for change in applied.iter().rev() {
                    if let Err(undo_err) = change.inverse().apply(pool, user_id).await {
                        tracing::error!(
                            "Failed to undo completion change for task {}: {:?}",
                            change.task_id,
                            undo_err
                        );
                    }
                }
                return Err(e);
            }
        }
    }

    Ok(updated)
}
