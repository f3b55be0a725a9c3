//! Task, TaskLog, and Scenario entities — the scheduler's unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The task type enumeration from COMPONENT DESIGN §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    AccountCheck,
    PrivateMessage,
    Broadcast,
    VerifyCode,
    GroupChat,
    Scenario,
    JoinGroup,
    ForceAddGroup,
    TerminateSessions,
    Update2fa,
}

/// `status is a DAG: pending→queued→running→{completed|failed|cancelled|paused}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub owner: String,
    pub account_ids: Vec<i64>,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: u8,
    pub config: Value,
    pub result: Value,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(owner: impl Into<String>, task_type: TaskType, account_ids: Vec<i64>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            owner: owner.into(),
            account_ids,
            task_type,
            status: TaskStatus::Pending,
            priority: 5,
            config: Value::Object(Default::default()),
            result: Value::Object(Default::default()),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            created_at: now,
        }
    }

    /// Whether this task is due for dispatch: `scheduled_at is null or scheduled_at ≤ now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_at.is_none_or(|at| at <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLog {
    pub task_id: Uuid,
    pub account_id: Option<i64>,
    pub level: LogLevel,
    pub action: String,
    pub message: String,
    pub extra: Value,
    pub created_at: DateTime<Utc>,
}

impl TaskLog {
    pub fn new(
        task_id: Uuid,
        account_id: Option<i64>,
        level: LogLevel,
        action: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            account_id,
            level,
            action: action.into(),
            message: message.into(),
            extra: Value::Null,
            created_at: Utc::now(),
        }
    }
}

/// Per-agent participant of a `scenario` task, embedded in `Task.config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioAgent {
    pub account_id: i64,
    pub persona: Value,
    pub goal: String,
    pub active_rate: f64,
    #[serde(default)]
    pub image_pool: Vec<String>,
    #[serde(default)]
    pub image_gen_enabled: bool,
}

/// The `scenario` task's config payload, once parsed out of `Task.config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub topic: String,
    pub duration_seconds: u64,
    pub agents: Vec<ScenarioAgent>,
}

impl Scenario {
    /// `agent count ≥1`.
    pub fn is_valid(&self) -> bool {
        !self.agents.is_empty()
            && self
                .agents
                .iter()
                .all(|a| (0.0..=1.0).contains(&a.active_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_is_due_when_unscheduled() {
        let task = Task::new("alice", TaskType::PrivateMessage, vec![1]);
        assert!(task.is_due(Utc::now()));
    }

    #[test]
    fn task_is_not_due_before_scheduled_at() {
        let mut task = Task::new("alice", TaskType::PrivateMessage, vec![1]);
        task.scheduled_at = Some(Utc::now() + chrono::Duration::seconds(60));
        assert!(!task.is_due(Utc::now()));
    }

    #[test]
    fn non_pending_task_is_never_due() {
        let mut task = Task::new("alice", TaskType::PrivateMessage, vec![1]);
        task.status = TaskStatus::Running;
        assert!(!task.is_due(Utc::now()));
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
    }

    #[test]
    fn scenario_requires_at_least_one_agent() {
        let scenario = Scenario {
            name: "s".into(),
            topic: "chat".into(),
            duration_seconds: 60,
            agents: vec![],
        };
        assert!(!scenario.is_valid());
    }

    #[test]
    fn scenario_rejects_out_of_range_active_rate() {
        let scenario = Scenario {
            name: "s".into(),
            topic: "chat".into(),
            duration_seconds: 60,
            agents: vec![ScenarioAgent {
                account_id: 1,
                persona: Value::Null,
                goal: "chat".into(),
                active_rate: 1.5,
                image_pool: vec![],
                image_gen_enabled: false,
            }],
        };
        assert!(!scenario.is_valid());
    }
}
