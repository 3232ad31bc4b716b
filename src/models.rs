use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date format used for every calendar date stored on disk.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parses a stored `YYYY-MM-DD` date, treating blank text as absent.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}

/// Formats a calendar date the way it is persisted.
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// How soon a task should be worked on.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    Now,
    #[default]
    Next,
    Later,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Now => "Now",
            Priority::Next => "Next",
            Priority::Later => "Later",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "now" => Ok(Priority::Now),
            "next" => Ok(Priority::Next),
            "later" => Ok(Priority::Later),
            other => Err(format!("unknown priority '{}'. Supported: Now, Next, Later.", other)),
        }
    }
}

/// Recurrence pattern of a recurring chain.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Recurrence {
    /// Fixed day offset between two occurrences.
    ///
    /// Months and years are approximated as 30 and 365 days; a monthly chain
    /// anchored on the 31st drifts earlier over time.
    pub fn offset_days(self) -> i64 {
        match self {
            Recurrence::Daily => 1,
            Recurrence::Weekly => 7,
            Recurrence::Monthly => 30,
            Recurrence::Yearly => 365,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
            Recurrence::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recurrence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly),
            "monthly" => Ok(Recurrence::Monthly),
            "yearly" => Ok(Recurrence::Yearly),
            other => Err(format!(
                "unknown recurrence pattern '{}'. Supported: daily, weekly, monthly, yearly.",
                other
            )),
        }
    }
}

/// Role of a task inside a recurrence chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Plain task, not part of any chain.
    Single,
    /// Originating record of a chain; carries the default field values.
    Template,
    /// Concrete occurrence spawned from the template `parent_task_id`.
    Instance { parent_task_id: u64 },
}

/// Completion state of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Open,
    Completed { at: Option<String> },
    /// Overdue by more than a day without being completed.
    Missed { at: Option<String> },
}

impl TaskStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Open => "Open",
            TaskStatus::Completed { .. } => "Done",
            TaskStatus::Missed { .. } => "Missed",
        }
    }
}

/// A single task record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "TaskRecord", into = "TaskRecord")]
pub struct Task {
    /// Unique identifier, never reused within a store.
    pub id: u64,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    /// Due date as stored (`YYYY-MM-DD`). Kept as text so a malformed value
    /// only affects this record; use [`Task::due`] to read it.
    pub due_date: Option<String>,
    pub status: TaskStatus,
    /// Linked goal; `None` is shown as "Misc".
    pub goal_id: Option<u64>,
    /// Hours spent, only kept when positive.
    pub time_spent: Option<f64>,
    pub recurrence: Option<Recurrence>,
    pub kind: TaskKind,
    /// Last date a chain may produce an instance for.
    pub recurrence_end_date: Option<String>,
    /// Timestamp when the task was created.
    pub created_at: String,
}

impl Task {
    /// Parsed due date, `None` when undated or malformed.
    pub fn due(&self) -> Option<NaiveDate> {
        self.due_date.as_deref().and_then(parse_date)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, TaskStatus::Completed { .. })
    }

    pub fn is_missed(&self) -> bool {
        matches!(self.status, TaskStatus::Missed { .. })
    }

    pub fn is_template(&self) -> bool {
        self.kind == TaskKind::Template
    }

    pub fn parent_task_id(&self) -> Option<u64> {
        match self.kind {
            TaskKind::Instance { parent_task_id } => Some(parent_task_id),
            _ => None,
        }
    }
}

/// On-disk shape of a task, field for field what the desktop apps exchange.
#[derive(Serialize, Deserialize)]
struct TaskRecord {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    due_date: Option<String>,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    not_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    not_completed_at: Option<String>,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    goal_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_spent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recurrence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_recurring_template: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_task_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recurrence_end_date: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl From<TaskRecord> for Task {
    fn from(r: TaskRecord) -> Self {
        // Completion wins over a stale overdue flag.
        let status = if r.completed {
            TaskStatus::Completed { at: r.completed_at }
        } else if r.not_completed {
            TaskStatus::Missed { at: r.not_completed_at }
        } else {
            TaskStatus::Open
        };
        let kind = if r.is_recurring_template.unwrap_or(false) {
            TaskKind::Template
        } else if let Some(parent_task_id) = r.parent_task_id {
            TaskKind::Instance { parent_task_id }
        } else {
            TaskKind::Single
        };
        Task {
            id: r.id,
            title: r.title,
            description: r.description,
            priority: r
                .priority
                .as_deref()
                .and_then(|p| p.parse().ok())
                .unwrap_or_default(),
            due_date: r.due_date.filter(|d| !d.trim().is_empty()),
            status,
            goal_id: r.goal_id,
            time_spent: r.time_spent.filter(|h| *h > 0.0),
            recurrence: r.recurrence.as_deref().and_then(|s| s.parse().ok()),
            kind,
            recurrence_end_date: r.recurrence_end_date.filter(|d| !d.trim().is_empty()),
            created_at: r.created_at,
        }
    }
}

impl From<Task> for TaskRecord {
    fn from(t: Task) -> Self {
        let (completed, completed_at, not_completed, not_completed_at) = match t.status {
            TaskStatus::Open => (false, None, false, None),
            TaskStatus::Completed { at } => (true, at, false, None),
            TaskStatus::Missed { at } => (false, None, true, at),
        };
        let (is_recurring_template, parent_task_id) = match t.kind {
            TaskKind::Single => (None, None),
            TaskKind::Template => (Some(true), None),
            TaskKind::Instance { parent_task_id } => (Some(false), Some(parent_task_id)),
        };
        TaskRecord {
            id: t.id,
            title: t.title,
            description: t.description,
            priority: Some(t.priority.as_str().to_string()),
            due_date: t.due_date,
            completed,
            completed_at,
            not_completed,
            not_completed_at,
            created_at: t.created_at,
            goal_id: t.goal_id,
            time_spent: t.time_spent.filter(|h| *h > 0.0),
            recurrence: t.recurrence.map(|r| r.as_str().to_string()),
            is_recurring_template,
            parent_task_id,
            recurrence_end_date: t.recurrence_end_date,
        }
    }
}

/// A long-running objective shared by the to-do app and the habit tracker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Goal {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Target duration in hours.
    #[serde(default)]
    pub time_goal: Option<f64>,
    #[serde(default)]
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_record_with_both_flags_loads_as_completed() {
        let json = r#"{"id":3,"title":"x","completed":true,"completed_at":"2024-01-02T10:00:00",
            "not_completed":true,"not_completed_at":"2024-01-03T10:00:00"}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert!(task.is_completed());
        assert!(!task.is_missed());
    }

    #[test]
    fn template_flag_wins_over_parent_reference() {
        let json = r#"{"id":1,"title":"t","recurrence":"daily","is_recurring_template":true,"parent_task_id":null}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.kind, TaskKind::Template);
        assert_eq!(task.recurrence, Some(Recurrence::Daily));
    }

    #[test]
    fn empty_due_date_is_undated_and_unknown_values_are_tolerated() {
        let json = r#"{"id":1,"title":"t","priority":"Someday","due_date":"","recurrence":"hourly"}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.due_date, None);
        assert_eq!(task.priority, Priority::Next);
        assert_eq!(task.recurrence, None);
    }

    #[test]
    fn malformed_due_date_survives_but_does_not_parse() {
        let json = r#"{"id":1,"title":"t","due_date":"01/02/2024"}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.due_date.as_deref(), Some("01/02/2024"));
        assert_eq!(task.due(), None);
    }

    #[test]
    fn serialized_instance_uses_wire_field_names() {
        let task = Task {
            id: 2,
            title: "Standup".into(),
            description: String::new(),
            priority: Priority::Now,
            due_date: Some("2024-01-02".into()),
            status: TaskStatus::Missed { at: Some("2024-01-04T00:00:00".into()) },
            goal_id: None,
            time_spent: Some(0.0),
            recurrence: Some(Recurrence::Daily),
            kind: TaskKind::Instance { parent_task_id: 1 },
            recurrence_end_date: None,
            created_at: "2024-01-01T09:00:00".into(),
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["completed"], false);
        assert!(value["completed_at"].is_null());
        assert!(value["goal_id"].is_null());
        assert_eq!(value["not_completed"], true);
        assert_eq!(value["is_recurring_template"], false);
        assert_eq!(value["parent_task_id"], 1);
        assert_eq!(value["recurrence"], "daily");
        assert_eq!(value["priority"], "Now");
        assert!(value.get("time_spent").is_none());
        assert!(value.get("recurrence_end_date").is_none());
    }

    #[test]
    fn recurrence_parses_case_insensitively() {
        assert_eq!("Weekly".parse::<Recurrence>(), Ok(Recurrence::Weekly));
        assert!("fortnightly".parse::<Recurrence>().is_err());
        assert_eq!(Recurrence::Yearly.offset_days(), 365);
    }
}
