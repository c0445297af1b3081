use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::{format_timestamp, parse_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Done => "DONE",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "To Do"),
            TaskStatus::InProgress => write!(f, "In Progress"),
            TaskStatus::Done => write!(f, "Done"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace(['-', ' '], "_").as_str() {
            "TODO" | "TO_DO" => Ok(TaskStatus::Todo),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "DONE" => Ok(TaskStatus::Done),
            other => Err(format!("Unknown task status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskPriority {
    Low,
    Medium,
    Urgent,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "Low"),
            TaskPriority::Medium => write!(f, "Medium"),
            TaskPriority::Urgent => write!(f, "Urgent"),
        }
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LOW" => Ok(TaskPriority::Low),
            "MEDIUM" => Ok(TaskPriority::Medium),
            "URGENT" => Ok(TaskPriority::Urgent),
            other => Err(format!("Unknown task priority: {}", other)),
        }
    }
}

/// A task as returned by the task service.
///
/// The list and detail endpoints send `status` and `priority` as plain
/// strings; the typed accessors parse them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub team_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_by: String,
    pub assigned_to: String,
    pub status: String,
    pub priority: String,
    pub due_date: String,
    pub created_at: String,
}

impl Task {
    pub fn status(&self) -> Option<TaskStatus> {
        self.status.parse().ok()
    }

    pub fn priority(&self) -> Option<TaskPriority> {
        self.priority.parse().ok()
    }

    /// A task is overdue when its due date has passed and it is not done
    pub fn is_overdue(&self) -> bool {
        if self.status() == Some(TaskStatus::Done) {
            return false;
        }
        parse_timestamp(&self.due_date)
            .map(|due| due < chrono::Utc::now())
            .unwrap_or(false)
    }

    pub fn formatted_due_date(&self) -> String {
        format_timestamp(&self.due_date)
    }
}

/// Payload for `POST /tasks`.
#[derive(Debug, Clone, Serialize)]
pub struct NewTask {
    pub team_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub assigned_to: String,
    pub due_date: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
}

/// Payload for `PATCH /tasks/{id}`. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}

/// Query parameters accepted by the task list endpoints.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub sort_by_due: bool,
}

impl TaskFilter {
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(status) = self.status {
            query.push(("status", status.as_str().to_string()));
        }
        if self.sort_by_due {
            query.push(("sort_by_due", "true".to_string()));
        }
        query
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub text: String,
    pub created_by: String,
    pub created_at: String,
}

/// Attachment metadata. The file itself is served by the download endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub uploaded_by: String,
    pub uploaded_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(status: &str, due_date: &str) -> Task {
        Task {
            id: "t1".to_string(),
            team_id: "team1".to_string(),
            title: "Write release notes".to_string(),
            description: None,
            created_by: "bob".to_string(),
            assigned_to: "carol".to_string(),
            status: status.to_string(),
            priority: "URGENT".to_string(),
            due_date: due_date.to_string(),
            created_at: "2024-01-01T00:00:00".to_string(),
        }
    }

    #[test]
    fn test_task_status_parsing() {
        assert_eq!("todo".parse::<TaskStatus>(), Ok(TaskStatus::Todo));
        assert_eq!("in-progress".parse::<TaskStatus>(), Ok(TaskStatus::InProgress));
        assert_eq!("In Progress".parse::<TaskStatus>(), Ok(TaskStatus::InProgress));
        assert_eq!("DONE".parse::<TaskStatus>(), Ok(TaskStatus::Done));
        assert!("blocked".parse::<TaskStatus>().is_err());
        assert_eq!(serde_json::to_string(&TaskStatus::InProgress).unwrap(), "\"IN_PROGRESS\"");
    }

    #[test]
    fn test_task_priority_ordering() {
        assert!(TaskPriority::Urgent > TaskPriority::Medium);
        assert!(TaskPriority::Medium > TaskPriority::Low);
        assert_eq!(serde_json::to_string(&TaskPriority::Urgent).unwrap(), "\"URGENT\"");
    }

    #[test]
    fn test_task_is_overdue() {
        assert!(sample_task("TODO", "2000-01-01T00:00:00").is_overdue());
        assert!(!sample_task("DONE", "2000-01-01T00:00:00").is_overdue());
        assert!(!sample_task("TODO", "2999-01-01T00:00:00Z").is_overdue());
        assert!(!sample_task("TODO", "someday").is_overdue());
    }

    #[test]
    fn test_task_filter_query() {
        assert!(TaskFilter::default().to_query().is_empty());
        let filter = TaskFilter {
            status: Some(TaskStatus::InProgress),
            sort_by_due: true,
        };
        assert_eq!(
            filter.to_query(),
            vec![
                ("status", "IN_PROGRESS".to_string()),
                ("sort_by_due", "true".to_string())
            ]
        );
    }

    #[test]
    fn test_parse_task() {
        let json = r#"{"id":"6601","team_id":"65a1","title":"Fix login","description":"Users get logged out","created_by":"bob","assigned_to":"carol","status":"IN_PROGRESS","priority":"MEDIUM","due_date":"2024-06-01T12:00:00","created_at":"2024-05-20T08:30:00.100000"}"#;
        let task: Task = serde_json::from_str(json).expect("Failed to parse task test JSON");
        assert_eq!(task.status(), Some(TaskStatus::InProgress));
        assert_eq!(task.priority(), Some(TaskPriority::Medium));
        assert_eq!(task.formatted_due_date(), "Jun 01, 2024 12:00");
    }
}
