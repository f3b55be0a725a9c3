//! Task Scheduler (§4.3) — dispatches due tasks to the connection pool,
//! fans each one out across its `account_ids`, and aggregates per-account
//! outcomes back onto the task.
//!
//! Picks up directly where [`crate::pool::ConnectionPool`] leaves off:
//! the pool serializes work per account and runs the typed executor, the
//! scheduler decides *when* a task runs and *which* accounts take part.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{ErrorKind, PoolError};
use crate::executor::{ExecutionContext, TaskExecutor};
use crate::pool::ConnectionPool;
use crate::repository::{TaskLogRepository, TaskRepository};
use crate::task::{LogLevel, Task, TaskLog, TaskStatus, TaskType};

const LOG_CHANNEL_CAPACITY: usize = 1024;

pub struct TaskScheduler {
    pool: Arc<ConnectionPool>,
    task_repo: Arc<dyn TaskRepository>,
    log_repo: Arc<dyn TaskLogRepository>,
    executors: HashMap<TaskType, Arc<dyn TaskExecutor>>,
    config: SchedulerConfig,
    running: DashMap<Uuid, CancellationToken>,
    log_tx: broadcast::Sender<TaskLog>,
    closed: CancellationToken,
}

impl TaskScheduler {
    pub fn new(
        pool: Arc<ConnectionPool>,
        task_repo: Arc<dyn TaskRepository>,
        log_repo: Arc<dyn TaskLogRepository>,
        executors: HashMap<TaskType, Arc<dyn TaskExecutor>>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let (log_tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        let scheduler = Arc::new(Self {
            pool,
            task_repo,
            log_repo,
            executors,
            config,
            running: DashMap::new(),
            log_tx,
            closed: CancellationToken::new(),
        });
        scheduler.clone().spawn_dispatch_loop();
        scheduler
    }

    /// Enqueues a new task for dispatch; it becomes eligible as soon as it is due.
    pub async fn submit(&self, task: Task) -> Result<(), PoolError> {
        self.save_task(&task).await
    }

    /// Live feed of every [`TaskLog`] this scheduler appends, for callers
    /// that want to stream progress rather than poll `TaskLogRepository`.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<TaskLog> {
        self.log_tx.subscribe()
    }

    /// Requests cancellation of a task. A task already `running` has its
    /// per-dispatch [`CancellationToken`] cancelled, which every executor
    /// observes at its `check_cancelled` suspension points; a task still
    /// `pending`/`queued` is marked `cancelled` directly.
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<(), PoolError> {
        if let Some(token) = self.running.get(&task_id) {
            token.cancel();
            return Ok(());
        }

        let mut task = self.get_task(task_id).await?;
        if !task.status.is_terminal() {
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(chrono::Utc::now());
            self.save_task(&task).await?;
        }
        Ok(())
    }

    /// Stops the dispatch loop. In-flight dispatches run to completion.
    pub fn shutdown(&self) {
        self.closed.cancel();
    }

    fn spawn_dispatch_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            self.recover_stale_tasks().await;

            let mut ticker =
                tokio::time::interval(Duration::from_millis(self.config.dispatch_interval_ms));
            loop {
                tokio::select! {
                    _ = self.closed.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                self.dispatch_due_tasks().await;
                self.timeout_stale_running_tasks().await;
            }
        });
    }

    /// Crash-restart idempotence sweep (§4.3): every task left `running` by a
    /// prior process instance did not survive to report an outcome, so all
    /// of them are swept to `failed` unconditionally on startup, before this
    /// process has dispatched anything of its own.
    async fn recover_stale_tasks(&self) {
        let stale = match self.task_repo.running_tasks().await {
            Ok(tasks) => tasks,
            Err(_) => return,
        };
        for mut task in stale {
            task.status = TaskStatus::Failed;
            task.result = json!({"errors": {"*": "swept as stale on restart"}});
            task.completed_at = Some(chrono::Utc::now());
            let _ = self.task_repo.save(&task).await;
        }
    }

    /// The "separate cron sweep" from §4.3's Timeouts paragraph: during
    /// normal operation, a task whose `started_at` is older than
    /// `stale_running_secs` is failed with a timeout marker even though this
    /// process never restarted. A task this sweep catches is still owned by
    /// this process's `run_task`, which observes the save below the next
    /// time it tries to persist an outcome; the in-flight dispatch itself is
    /// left to notice cancellation at its own suspension points rather than
    /// being forcibly aborted here.
    async fn timeout_stale_running_tasks(&self) {
        let running = match self.task_repo.running_tasks().await {
            Ok(tasks) => tasks,
            Err(_) => return,
        };
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(self.config.stale_running_secs as i64);
        for mut task in running {
            let Some(started_at) = task.started_at else {
                continue;
            };
            if started_at > cutoff {
                continue;
            }
            if let Some(token) = self.running.get(&task.id) {
                token.cancel();
            }
            task.status = TaskStatus::Failed;
            task.result = json!({"errors": {"*": "timed out: exceeded stale_running_secs"}});
            task.completed_at = Some(chrono::Utc::now());
            let _ = self.task_repo.save(&task).await;
            self.running.remove(&task.id);
        }
    }

    async fn dispatch_due_tasks(self: &Arc<Self>) {
        let due = match self.task_repo.due_tasks(chrono::Utc::now()).await {
            Ok(tasks) => tasks,
            Err(_) => return,
        };

        for mut task in due {
            task.status = TaskStatus::Queued;
            if self.save_task(&task).await.is_err() {
                continue;
            }
            self.clone().spawn_task(task);
        }
    }

    fn spawn_task(self: Arc<Self>, task: Task) {
        tokio::spawn(async move {
            self.run_task(task).await;
        });
    }

    async fn run_task(self: Arc<Self>, mut task: Task) {
        let Some(executor) = self.executors.get(&task.task_type).cloned() else {
            task.status = TaskStatus::Failed;
            task.result = json!({"errors": {"*": format!("no executor registered for {:?}", task.task_type)}});
            task.completed_at = Some(chrono::Utc::now());
            let _ = self.task_repo.save(&task).await;
            return;
        };

        let cancel = CancellationToken::new();
        self.running.insert(task.id, cancel.clone());

        task.status = TaskStatus::Running;
        task.started_at = Some(chrono::Utc::now());
        if self.save_task(&task).await.is_err() {
            self.running.remove(&task.id);
            return;
        }

        let account_count = task.account_ids.len();
        let dispatches = task.account_ids.iter().enumerate().map(|(index, &account_id)| {
            let pool = self.pool.clone();
            let executor = executor.clone();
            let ctx = ExecutionContext::new(task.id, account_id, task.config.clone(), cancel.clone())
                .with_position(index, account_count);
            async move { (account_id, pool.execute_task(account_id, executor.as_ref(), &ctx).await) }
        });
        let outcomes = join_all(dispatches).await;

        let mut results = serde_json::Map::new();
        let mut errors = serde_json::Map::new();
        for (account_id, outcome) in outcomes {
            match outcome {
                Ok(value) => {
                    self.append_log(TaskLog::new(
                        task.id,
                        Some(account_id),
                        LogLevel::Info,
                        "execute_task",
                        "completed",
                    ))
                    .await;
                    results.insert(account_id.to_string(), value);
                }
                Err(err) => {
                    self.append_log(TaskLog::new(
                        task.id,
                        Some(account_id),
                        LogLevel::Error,
                        "execute_task",
                        err.message.clone(),
                    ))
                    .await;
                    errors.insert(account_id.to_string(), json!(err.message));
                }
            }
        }

        task.status = if cancel.is_cancelled() {
            TaskStatus::Cancelled
        } else if !results.is_empty() || errors.is_empty() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        let mut outcome = serde_json::Map::new();
        outcome.insert("results".to_string(), Value::Object(results));
        outcome.insert("errors".to_string(), Value::Object(errors));
        task.result = Value::Object(outcome);
        task.completed_at = Some(chrono::Utc::now());
        let _ = self.task_repo.save(&task).await;
        self.running.remove(&task.id);
    }

    async fn append_log(&self, log: TaskLog) {
        let _ = self.log_repo.append(log.clone()).await;
        let _ = self.log_tx.send(log);
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Task, PoolError> {
        self.task_repo
            .get(task_id)
            .await
            .map_err(|e| PoolError::new(ErrorKind::InvalidInput, e.to_string()))
    }

    async fn save_task(&self, task: &Task) -> Result<(), PoolError> {
        self.task_repo
            .save(task)
            .await
            .map_err(|e| PoolError::new(ErrorKind::Transient, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use crate::executor::ResultBuilder;
    use crate::repository::memory::{
        InMemoryAccountRepository, InMemoryTaskLogRepository, InMemoryTaskRepository,
    };
    use crate::session_client::mock::{MockSession, MockSessionClient};
    use crate::session_client::{SessionClient, SessionClientFactory, SessionHandle};
    use async_trait::async_trait;
    use std::time::Duration as StdDuration;

    struct OkFactory;

    #[async_trait]
    impl SessionClientFactory for OkFactory {
        async fn connect(&self, account: &Account) -> Result<Box<dyn SessionClient>, PoolError> {
            Ok(Box::new(MockSessionClient {
                session: MockSession::new(account.id),
            }))
        }
    }

    struct EchoExecutor;

    #[async_trait]
    impl TaskExecutor for EchoExecutor {
        async fn execute(
            &self,
            ctx: &ExecutionContext,
            handle: Arc<dyn SessionHandle>,
        ) -> Result<serde_json::Value, PoolError> {
            handle.self_identity().await?;
            let mut result = ResultBuilder::new();
            result.set("account_id", ctx.account_id);
            Ok(result.build())
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl TaskExecutor for FailingExecutor {
        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            _handle: Arc<dyn SessionHandle>,
        ) -> Result<serde_json::Value, PoolError> {
            Err(PoolError::from_upstream("boom"))
        }
    }

    fn test_scheduler(
        executors: HashMap<TaskType, Arc<dyn TaskExecutor>>,
    ) -> (Arc<TaskScheduler>, Arc<dyn TaskRepository>) {
        let account_repo = Arc::new(
            InMemoryAccountRepository::new()
                .with_account(Account::new(1, "+1", "alice"))
                .with_account(Account::new(2, "+2", "bob")),
        );
        let pool = ConnectionPool::new(
            account_repo,
            Arc::new(OkFactory),
            crate::config::ConnectionConfig::default(),
        );
        let task_repo: Arc<dyn TaskRepository> = Arc::new(InMemoryTaskRepository::new());
        let log_repo: Arc<dyn TaskLogRepository> = Arc::new(InMemoryTaskLogRepository::new());
        let scheduler = TaskScheduler::new(
            pool,
            task_repo.clone(),
            log_repo,
            executors,
            SchedulerConfig {
                stale_running_secs: 1800,
                dispatch_interval_ms: 20,
            },
        );
        (scheduler, task_repo)
    }

    async fn wait_for_terminal(task_repo: &Arc<dyn TaskRepository>, task_id: Uuid) -> Task {
        for _ in 0..100 {
            let task = task_repo.get(task_id).await.unwrap();
            if task.status.is_terminal() {
                return task;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        task_repo.get(task_id).await.unwrap()
    }

    #[tokio::test]
    async fn dispatches_a_due_task_and_marks_it_completed() {
        let mut executors: HashMap<TaskType, Arc<dyn TaskExecutor>> = HashMap::new();
        executors.insert(TaskType::AccountCheck, Arc::new(EchoExecutor));
        let (scheduler, task_repo) = test_scheduler(executors);

        let task = Task::new("alice", TaskType::AccountCheck, vec![1]);
        let task_id = task.id;
        scheduler.submit(task).await.unwrap();

        let task = wait_for_terminal(&task_repo, task_id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.result["errors"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_failure_across_accounts_is_completed_with_errors() {
        let mut executors: HashMap<TaskType, Arc<dyn TaskExecutor>> = HashMap::new();
        executors.insert(TaskType::Broadcast, Arc::new(EchoExecutor));
        let (scheduler, task_repo) = test_scheduler(executors);

        let mut task = Task::new("alice", TaskType::Broadcast, vec![1, 999]);
        task.task_type = TaskType::Broadcast;
        let task_id = task.id;
        scheduler.submit(task).await.unwrap();

        let task = wait_for_terminal(&task_repo, task_id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result["results"].as_object().unwrap().len(), 1);
        assert_eq!(task.result["errors"].as_object().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn every_account_failing_marks_the_task_failed() {
        let mut executors: HashMap<TaskType, Arc<dyn TaskExecutor>> = HashMap::new();
        executors.insert(TaskType::AccountCheck, Arc::new(FailingExecutor));
        let (scheduler, task_repo) = test_scheduler(executors);

        let task = Task::new("alice", TaskType::AccountCheck, vec![1]);
        let task_id = task.id;
        scheduler.submit(task).await.unwrap();

        let task = wait_for_terminal(&task_repo, task_id).await;
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn missing_executor_fails_fast() {
        let (scheduler, task_repo) = test_scheduler(HashMap::new());
        let task = Task::new("alice", TaskType::AccountCheck, vec![1]);
        let task_id = task.id;
        scheduler.submit(task).await.unwrap();

        let task = wait_for_terminal(&task_repo, task_id).await;
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn cancelling_a_queued_task_marks_it_cancelled_directly() {
        let (scheduler, task_repo) = test_scheduler(HashMap::new());
        let mut task = Task::new("alice", TaskType::AccountCheck, vec![1]);
        task.status = TaskStatus::Paused;
        let task_id = task.id;
        task_repo.save(&task).await.unwrap();

        scheduler.cancel_task(task_id).await.unwrap();
        let task = task_repo.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn stale_running_tasks_are_swept_to_failed_on_restart() {
        let task_repo: Arc<dyn TaskRepository> = Arc::new(InMemoryTaskRepository::new());
        let mut stale = Task::new("alice", TaskType::AccountCheck, vec![1]);
        stale.status = TaskStatus::Running;
        let task_id = stale.id;
        task_repo.save(&stale).await.unwrap();

        let account_repo = Arc::new(InMemoryAccountRepository::new());
        let pool = ConnectionPool::new(
            account_repo,
            Arc::new(OkFactory),
            crate::config::ConnectionConfig::default(),
        );
        let log_repo: Arc<dyn TaskLogRepository> = Arc::new(InMemoryTaskLogRepository::new());
        let _scheduler = TaskScheduler::new(
            pool,
            task_repo.clone(),
            log_repo,
            HashMap::new(),
            SchedulerConfig {
                stale_running_secs: 1800,
                dispatch_interval_ms: 20,
            },
        );

        let mut task = task_repo.get(task_id).await.unwrap();
        for _ in 0..50 {
            if task.status == TaskStatus::Failed {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            task = task_repo.get(task_id).await.unwrap();
        }
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn a_hung_task_is_timed_out_during_normal_operation_without_restart() {
        // Unlike `stale_running_tasks_are_swept_to_failed_on_restart`, this
        // task is inserted *after* the scheduler is already running, so only
        // the periodic ticker-driven sweep (not the one-shot startup sweep)
        // can catch it.
        let account_repo = Arc::new(InMemoryAccountRepository::new());
        let pool = ConnectionPool::new(
            account_repo,
            Arc::new(OkFactory),
            crate::config::ConnectionConfig::default(),
        );
        let task_repo: Arc<dyn TaskRepository> = Arc::new(InMemoryTaskRepository::new());
        let log_repo: Arc<dyn TaskLogRepository> = Arc::new(InMemoryTaskLogRepository::new());
        let _scheduler = TaskScheduler::new(
            pool,
            task_repo.clone(),
            log_repo,
            HashMap::new(),
            SchedulerConfig {
                stale_running_secs: 1,
                dispatch_interval_ms: 20,
            },
        );

        let mut hung = Task::new("alice", TaskType::AccountCheck, vec![1]);
        hung.status = TaskStatus::Running;
        hung.started_at = Some(chrono::Utc::now() - chrono::Duration::seconds(10));
        let task_id = hung.id;
        task_repo.save(&hung).await.unwrap();

        let task = wait_for_terminal(&task_repo, task_id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.result["errors"]["*"].as_str().unwrap().contains("timed out"));
    }
}
