//! Read-only aggregates over projects and tasks, recomputed per request.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::models::{ProjectRecord, TaskRecord, UserSummary};
use crate::domain::{Priority, ProjectStatus, TaskStatus};
use crate::timestamps::parse_timestamp;

pub const TOP_CONTRIBUTORS: usize = 5;
pub const TIMELINE_DAYS: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_projects: i64,
    pub active_projects: i64,
    pub total_tasks: i64,
    pub overdue_tasks: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contributor {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub completed_tasks: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: i64,
    pub todo: i64,
    pub in_progress: i64,
    pub in_review: i64,
    pub completed: i64,
    pub overdue: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelinePoint {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberActivity {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalStats {
    pub assigned: i64,
    pub completed: i64,
    pub in_progress: i64,
    pub overdue: i64,
    pub awaiting_confirmation: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub completed_tasks: i64,
    pub total_tasks: i64,
}

pub fn is_overdue(task: &TaskRecord, now: DateTime<Utc>) -> bool {
    if task.status == TaskStatus::Completed.as_str() {
        return false;
    }

    task.due_date
        .as_deref()
        .and_then(parse_timestamp)
        .is_some_and(|due| due < now)
}

pub fn overview(projects: &[ProjectRecord], tasks: &[TaskRecord], now: DateTime<Utc>) -> Overview {
    Overview {
        total_projects: projects.len() as i64,
        active_projects: projects
            .iter()
            .filter(|project| project.status == ProjectStatus::Active.as_str())
            .count() as i64,
        total_tasks: tasks.len() as i64,
        overdue_tasks: tasks.iter().filter(|task| is_overdue(task, now)).count() as i64,
    }
}

/// Every known status appears, zero when no task has it.
pub fn count_by_status(tasks: &[TaskRecord]) -> BTreeMap<String, i64> {
    let mut counts: BTreeMap<String, i64> = TaskStatus::ALL
        .iter()
        .map(|status| (status.as_str().to_string(), 0))
        .collect();
    for task in tasks {
        *counts.entry(task.status.clone()).or_default() += 1;
    }
    counts
}

pub fn count_by_priority(tasks: &[TaskRecord]) -> BTreeMap<String, i64> {
    let mut counts: BTreeMap<String, i64> = Priority::ALL
        .iter()
        .map(|priority| (priority.as_str().to_string(), 0))
        .collect();
    for task in tasks {
        *counts.entry(task.priority.clone()).or_default() += 1;
    }
    counts
}

/// Assignees ranked by completed tasks. Assignees that no longer exist are skipped.
pub fn top_contributors(
    tasks: &[TaskRecord],
    users: &[UserSummary],
    limit: usize,
) -> Vec<Contributor> {
    let mut completed: HashMap<&str, i64> = HashMap::new();
    for task in tasks {
        if task.status != TaskStatus::Completed.as_str() {
            continue;
        }
        if let Some(assignee) = task.assigned_to.as_deref() {
            *completed.entry(assignee).or_default() += 1;
        }
    }

    let mut contributors: Vec<Contributor> = users
        .iter()
        .filter_map(|user| {
            completed.get(user.id.as_str()).map(|count| Contributor {
                user_id: user.id.clone(),
                name: user.name.clone(),
                email: user.email.clone(),
                completed_tasks: *count,
            })
        })
        .collect();

    contributors.sort_by(|a, b| {
        b.completed_tasks
            .cmp(&a.completed_tasks)
            .then_with(|| a.name.cmp(&b.name))
    });
    contributors.truncate(limit);
    contributors
}

pub fn task_stats(tasks: &[TaskRecord], now: DateTime<Utc>) -> TaskStats {
    let mut stats = TaskStats {
        total: tasks.len() as i64,
        ..TaskStats::default()
    };

    for task in tasks {
        match TaskStatus::parse(&task.status) {
            Ok(TaskStatus::Todo) => stats.todo += 1,
            Ok(TaskStatus::InProgress) => stats.in_progress += 1,
            Ok(TaskStatus::InReview) => stats.in_review += 1,
            Ok(TaskStatus::Completed) => stats.completed += 1,
            Err(_) => {}
        }
        if is_overdue(task, now) {
            stats.overdue += 1;
        }
    }

    stats
}

/// Completed tasks per day of their last update, oldest day first.
pub fn completion_timeline(tasks: &[TaskRecord]) -> Vec<TimelinePoint> {
    let mut per_day: BTreeMap<String, i64> = BTreeMap::new();
    for task in tasks {
        if task.status != TaskStatus::Completed.as_str() {
            continue;
        }
        if let Some(updated) = parse_timestamp(&task.updated_at) {
            *per_day
                .entry(updated.format("%Y-%m-%d").to_string())
                .or_default() += 1;
        }
    }

    per_day
        .into_iter()
        .take(TIMELINE_DAYS)
        .map(|(date, count)| TimelinePoint { date, count })
        .collect()
}

/// Mean milliseconds between creation and last update of completed tasks, 0 when none.
pub fn average_completion_ms(tasks: &[TaskRecord]) -> i64 {
    let durations: Vec<i64> = tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Completed.as_str())
        .filter_map(|task| {
            let created = parse_timestamp(&task.created_at)?;
            let updated = parse_timestamp(&task.updated_at)?;
            Some((updated - created).num_milliseconds())
        })
        .collect();

    if durations.is_empty() {
        return 0;
    }

    durations.iter().sum::<i64>() / durations.len() as i64
}

/// Per-assignee totals for one project's tasks.
pub fn team_activity(tasks: &[TaskRecord], users: &[UserSummary]) -> Vec<MemberActivity> {
    let board = leaderboard(tasks, users);
    board
        .into_iter()
        .map(|entry| MemberActivity {
            completion_rate: completion_rate(entry.completed_tasks, entry.total_tasks),
            user_id: entry.user_id,
            name: entry.name,
            email: entry.email,
            total_tasks: entry.total_tasks,
            completed_tasks: entry.completed_tasks,
        })
        .collect()
}

pub fn personal_stats(tasks: &[TaskRecord], user_id: &str, now: DateTime<Utc>) -> PersonalStats {
    let mut stats = PersonalStats::default();

    for task in tasks.iter().filter(|task| task.assigned_to.as_deref() == Some(user_id)) {
        stats.assigned += 1;
        let completed = task.status == TaskStatus::Completed.as_str();
        if completed {
            stats.completed += 1;
        }
        if task.status == TaskStatus::InProgress.as_str() {
            stats.in_progress += 1;
        }
        if is_overdue(task, now) {
            stats.overdue += 1;
        }
        if task.is_user_completed != 0 && !completed {
            stats.awaiting_confirmation += 1;
        }
    }

    stats
}

/// Completed and total assigned tasks per user, most completed first.
pub fn leaderboard(tasks: &[TaskRecord], users: &[UserSummary]) -> Vec<LeaderboardEntry> {
    let mut totals: HashMap<&str, (i64, i64)> = HashMap::new();
    for task in tasks {
        let Some(assignee) = task.assigned_to.as_deref() else {
            continue;
        };
        let entry = totals.entry(assignee).or_default();
        entry.1 += 1;
        if task.status == TaskStatus::Completed.as_str() {
            entry.0 += 1;
        }
    }

    let mut board: Vec<LeaderboardEntry> = users
        .iter()
        .filter_map(|user| {
            totals
                .get(user.id.as_str())
                .map(|(completed, total)| LeaderboardEntry {
                    user_id: user.id.clone(),
                    name: user.name.clone(),
                    email: user.email.clone(),
                    completed_tasks: *completed,
                    total_tasks: *total,
                })
        })
        .collect();

    board.sort_by(|a, b| {
        b.completed_tasks
            .cmp(&a.completed_tasks)
            .then_with(|| b.total_tasks.cmp(&a.total_tasks))
            .then_with(|| a.name.cmp(&b.name))
    });
    board
}

pub fn completion_rate(completed: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    completed as f64 / total as f64 * 100.0
}

/// Share of users with open work, as a rounded percentage.
pub fn utilization(active_users: i64, users: i64) -> i64 {
    if users == 0 {
        return 0;
    }
    (active_users as f64 / users as f64 * 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn task(id: &str, status: &str, assigned_to: Option<&str>) -> TaskRecord {
        TaskRecord {
            id: id.to_string(),
            project_id: "p1".to_string(),
            title: id.to_string(),
            description: String::new(),
            assigned_to: assigned_to.map(str::to_string),
            status: status.to_string(),
            priority: "medium".to_string(),
            due_date: None,
            estimated_hours: None,
            actual_hours: None,
            sort_order: 0,
            is_user_completed: 0,
            user_completed_at: None,
            created_by: "admin".to_string(),
            version: 1,
            created_at: "2025-01-01T00:00:00.000Z".to_string(),
            updated_at: "2025-01-01T00:00:00.000Z".to_string(),
        }
    }

    fn user(id: &str) -> UserSummary {
        UserSummary {
            id: id.to_string(),
            name: id.to_uppercase(),
            email: format!("{id}@example.com"),
        }
    }

    #[test]
    fn overdue_requires_past_due_date_and_open_status() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().expect("valid date");

        let mut late = task("late", "in-progress", None);
        late.due_date = Some("2025-05-01T00:00:00.000Z".to_string());
        let mut late_but_done = task("done", "completed", None);
        late_but_done.due_date = late.due_date.clone();
        let mut future = task("future", "todo", None);
        future.due_date = Some("2025-07-01T00:00:00.000Z".to_string());

        assert!(is_overdue(&late, now));
        assert!(!is_overdue(&late_but_done, now));
        assert!(!is_overdue(&future, now));
        assert!(!is_overdue(&task("undated", "todo", None), now));
    }

    #[test]
    fn status_counts_include_empty_lanes() {
        let counts = count_by_status(&[task("a", "todo", None), task("b", "todo", None)]);
        assert_eq!(counts.get("todo"), Some(&2));
        assert_eq!(counts.get("in-review"), Some(&0));
        assert_eq!(counts.len(), 4);
    }

    #[test]
    fn contributors_are_ranked_by_completed_tasks() {
        let tasks = vec![
            task("1", "completed", Some("ann")),
            task("2", "completed", Some("bob")),
            task("3", "completed", Some("bob")),
            task("4", "todo", Some("cat")),
            task("5", "completed", Some("ghost")),
        ];
        let users = vec![user("ann"), user("bob"), user("cat")];

        let ranked = top_contributors(&tasks, &users, 5);
        let ids: Vec<(&str, i64)> = ranked
            .iter()
            .map(|c| (c.user_id.as_str(), c.completed_tasks))
            .collect();
        assert_eq!(ids, vec![("bob", 2), ("ann", 1)]);
    }

    #[test]
    fn timeline_and_average_use_completed_tasks_only() {
        let mut first = task("1", "completed", None);
        first.updated_at = "2025-01-01T02:00:00.000Z".to_string();
        let mut second = task("2", "completed", None);
        second.updated_at = "2025-01-03T00:00:00.000Z".to_string();
        let mut open = task("3", "todo", None);
        open.updated_at = "2025-01-02T00:00:00.000Z".to_string();

        let tasks = vec![second.clone(), first.clone(), open];
        assert_eq!(
            completion_timeline(&tasks),
            vec![
                TimelinePoint { date: "2025-01-01".to_string(), count: 1 },
                TimelinePoint { date: "2025-01-03".to_string(), count: 1 },
            ]
        );

        // 2h and 48h
        assert_eq!(average_completion_ms(&tasks), (2 + 48) * 3_600_000 / 2);
        assert_eq!(average_completion_ms(&[]), 0);
    }

    #[test]
    fn personal_stats_count_unconfirmed_acknowledgements() {
        let mut acked = task("1", "in-review", Some("me"));
        acked.is_user_completed = 1;
        let mut acked_done = task("2", "completed", Some("me"));
        acked_done.is_user_completed = 1;
        let tasks = vec![
            acked,
            acked_done,
            task("3", "in-progress", Some("me")),
            task("4", "todo", Some("you")),
        ];

        let stats = personal_stats(&tasks, "me", Utc::now());
        assert_eq!(
            stats,
            PersonalStats {
                assigned: 3,
                completed: 1,
                in_progress: 1,
                overdue: 0,
                awaiting_confirmation: 1,
            }
        );
    }

    #[test]
    fn team_activity_reports_completion_rate() {
        let tasks = vec![
            task("1", "completed", Some("ann")),
            task("2", "todo", Some("ann")),
            task("3", "todo", Some("ann")),
            task("4", "todo", Some("ann")),
        ];
        let activity = team_activity(&tasks, &[user("ann")]);
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].total_tasks, 4);
        assert!((activity[0].completion_rate - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn utilization_rounds_to_whole_percent() {
        assert_eq!(utilization(1, 3), 33);
        assert_eq!(utilization(2, 3), 67);
        assert_eq!(utilization(0, 0), 0);
    }
}
