//! Task mutation rules.
//!
//! A `PUT /api/tasks/:id` body is turned into exactly one [`TaskPatch`]
//! depending on who sends it:
//!
//! * a body whose only key is `isUserCompleted` is an acknowledgement and is
//!   accepted from any authenticated caller;
//! * admins may change every field;
//! * the assignee may change `status`, `actualHours` and `isUserCompleted`,
//!   anything else they send is dropped;
//! * everybody else is refused.
//!
//! Status has no transition table. Any lane can be reached from any lane in a
//! single step, and a status change never touches the acknowledgement flag.
//! Only the board move ([`board_move`]) clears it.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::auth::CurrentUser;
use crate::db::models::TaskRecord;
use crate::domain::{nullable, AuditAction, Priority, TaskStatus};
use crate::error::{AppError, AppResult};
use crate::timestamps::normalize_timestamp;

pub const ACK_FIELD: &str = "isUserCompleted";
const ASSIGNEE_FIELDS: [&str; 3] = ["status", "actualHours", ACK_FIELD];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminTaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub project: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub assigned_to: Option<Option<String>>,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub due_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub estimated_hours: Option<Option<f64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub actual_hours: Option<Option<f64>>,
    pub tags: Option<Vec<String>>,
    pub order: Option<i64>,
    pub is_user_completed: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssigneeTaskPatch {
    pub status: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub actual_hours: Option<Option<f64>>,
    pub is_user_completed: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPatch {
    pub is_user_completed: bool,
}

#[derive(Debug, Clone)]
pub enum TaskPatch {
    Acknowledge(AckPatch),
    Admin(AdminTaskPatch),
    Assignee(AssigneeTaskPatch),
}

/// Validated field changes, ready to be applied to a stored task.
///
/// `Some(None)` clears a nullable field, `None` leaves it alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub project_id: Option<String>,
    pub assigned_to: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub due_date: Option<Option<String>>,
    pub estimated_hours: Option<Option<f64>>,
    pub actual_hours: Option<Option<f64>>,
    pub tags: Option<Vec<String>>,
    pub order: Option<i64>,
    pub is_user_completed: Option<bool>,
}

pub fn classify(
    caller: &CurrentUser,
    assigned_to: Option<&str>,
    body: Map<String, Value>,
) -> AppResult<TaskPatch> {
    if body.is_empty() {
        return Err(AppError::BadRequest(
            "at least one field must be provided".to_string(),
        ));
    }

    if body.len() == 1 {
        if let Some(flag) = body.get(ACK_FIELD) {
            let is_user_completed = flag.as_bool().ok_or_else(|| {
                AppError::BadRequest(format!("{ACK_FIELD} must be a boolean"))
            })?;
            return Ok(TaskPatch::Acknowledge(AckPatch { is_user_completed }));
        }
    }

    if caller.is_admin() {
        return from_body(body).map(TaskPatch::Admin);
    }

    if assigned_to == Some(caller.id.as_str()) {
        let (kept, dropped): (Map<String, Value>, Map<String, Value>) = body
            .into_iter()
            .partition(|(key, _)| ASSIGNEE_FIELDS.contains(&key.as_str()));

        if !dropped.is_empty() {
            let dropped_keys: Vec<&String> = dropped.keys().collect();
            tracing::debug!(
                user_id = %caller.id,
                dropped = ?dropped_keys,
                "ignoring task fields outside the assignee allow-list"
            );
        }

        return from_body(kept).map(TaskPatch::Assignee);
    }

    Err(AppError::Forbidden(
        "only an admin or the assignee can update this task".to_string(),
    ))
}

impl TaskPatch {
    /// `current_assignee` is the stored assignee; naming it again is a plain update.
    pub fn audit_action(&self, current_assignee: Option<&str>) -> AuditAction {
        match self {
            Self::Acknowledge(_) => AuditAction::CompleteTask,
            Self::Admin(patch) if changes_assignee(patch, current_assignee) => {
                AuditAction::AssignTask
            }
            Self::Admin(_) | Self::Assignee(_) => AuditAction::Update,
        }
    }

    pub fn into_changes(self) -> AppResult<TaskChanges> {
        match self {
            Self::Acknowledge(ack) => Ok(TaskChanges {
                is_user_completed: Some(ack.is_user_completed),
                ..TaskChanges::default()
            }),
            Self::Assignee(patch) => Ok(TaskChanges {
                status: parse_status(patch.status.as_deref())?,
                actual_hours: validate_hours(patch.actual_hours, "actualHours")?,
                is_user_completed: patch.is_user_completed,
                ..TaskChanges::default()
            }),
            Self::Admin(patch) => {
                let title = match patch.title {
                    Some(value) => Some(required_title(&value)?),
                    None => None,
                };

                let due_date = match patch.due_date {
                    Some(Some(value)) if !value.trim().is_empty() => {
                        Some(Some(normalize_timestamp(&value, "dueDate")?))
                    }
                    Some(_) => Some(None),
                    None => None,
                };

                if patch.order.is_some_and(|order| order < 0) {
                    return Err(AppError::BadRequest("order cannot be negative".to_string()));
                }

                Ok(TaskChanges {
                    title,
                    description: patch.description.map(|value| value.trim().to_string()),
                    project_id: patch.project,
                    assigned_to: patch
                        .assigned_to
                        .map(|value| value.filter(|id| !id.trim().is_empty())),
                    status: parse_status(patch.status.as_deref())?,
                    priority: patch
                        .priority
                        .as_deref()
                        .map(Priority::parse)
                        .transpose()?,
                    due_date,
                    estimated_hours: validate_hours(patch.estimated_hours, "estimatedHours")?,
                    actual_hours: validate_hours(patch.actual_hours, "actualHours")?,
                    tags: patch.tags.map(normalize_tags),
                    order: patch.order,
                    is_user_completed: patch.is_user_completed,
                })
            }
        }
    }
}

fn changes_assignee(patch: &AdminTaskPatch, current_assignee: Option<&str>) -> bool {
    match &patch.assigned_to {
        Some(next) => next.as_deref().filter(|id| !id.trim().is_empty()) != current_assignee,
        None => false,
    }
}

/// The board's drag-and-drop move: new lane, optional position, and the
/// acknowledgement flag is cleared because an admin has now acted on it.
/// Other tasks in the lane keep their `order`.
pub fn board_move(status: &str, order: Option<i64>) -> AppResult<TaskChanges> {
    if order.is_some_and(|order| order < 0) {
        return Err(AppError::BadRequest("order cannot be negative".to_string()));
    }

    Ok(TaskChanges {
        status: Some(TaskStatus::parse(status)?),
        order,
        is_user_completed: Some(false),
        ..TaskChanges::default()
    })
}

impl TaskChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the changes in place and returns the replacement tag set, if any.
    pub fn apply_to(self, task: &mut TaskRecord, now: &str) -> Option<Vec<String>> {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(project_id) = self.project_id {
            task.project_id = project_id;
        }
        if let Some(assigned_to) = self.assigned_to {
            task.assigned_to = assigned_to;
        }
        if let Some(status) = self.status {
            task.status = status.as_str().to_string();
        }
        if let Some(priority) = self.priority {
            task.priority = priority.as_str().to_string();
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(estimated_hours) = self.estimated_hours {
            task.estimated_hours = estimated_hours;
        }
        if let Some(actual_hours) = self.actual_hours {
            task.actual_hours = actual_hours;
        }
        if let Some(order) = self.order {
            task.sort_order = order;
        }
        match self.is_user_completed {
            Some(true) => {
                task.is_user_completed = 1;
                task.user_completed_at = Some(now.to_string());
            }
            Some(false) => {
                task.is_user_completed = 0;
                task.user_completed_at = None;
            }
            None => {}
        }

        task.updated_at = now.to_string();
        self.tags
    }
}

pub fn required_title(value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("task title is required".to_string()));
    }
    Ok(trimmed.to_string())
}

pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            continue;
        }
        seen.insert(trimmed.to_string());
    }

    seen.into_iter().collect()
}

pub fn validate_hours(value: Option<Option<f64>>, field: &str) -> AppResult<Option<Option<f64>>> {
    if let Some(Some(hours)) = value {
        if !hours.is_finite() || hours < 0.0 {
            return Err(AppError::BadRequest(format!(
                "{field} must be a non-negative number"
            )));
        }
    }
    Ok(value)
}

fn parse_status(value: Option<&str>) -> AppResult<Option<TaskStatus>> {
    value.map(TaskStatus::parse).transpose()
}

fn from_body<T: for<'de> Deserialize<'de>>(body: Map<String, Value>) -> AppResult<T> {
    serde_json::from_value(Value::Object(body))
        .map_err(|error| AppError::BadRequest(format!("invalid task update: {error}")))
}
