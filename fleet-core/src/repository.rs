//! External-collaborator ports (§6): account, proxy, task, task-log, and
//! verify-code persistence. These are contracts only — the concrete
//! database-backed implementation lives outside this crate (it is named in
//! §1's Non-goals as "persistence schemas beyond the fields the core reads/
//! writes"). Only in-memory fakes live here, used by this crate's own tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::account::Account;
use crate::proxy::Proxy;
use crate::task::{Task, TaskLog, TaskStatus};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found")]
    NotFound,
    #[error("backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Account, RepositoryError>;
    async fn save(&self, account: &Account) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProxyRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Proxy, RepositoryError>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Pending tasks ordered by priority desc, then created-at asc, filtered
    /// to `scheduled_at is null or scheduled_at <= now` (§4.3 dispatch order).
    async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>, RepositoryError>;
    async fn get(&self, id: Uuid) -> Result<Task, RepositoryError>;
    async fn save(&self, task: &Task) -> Result<(), RepositoryError>;
    /// All tasks currently `running` (§4.3 crash-restart idempotence sweep).
    async fn running_tasks(&self) -> Result<Vec<Task>, RepositoryError>;
}

#[async_trait]
pub trait TaskLogRepository: Send + Sync {
    async fn append(&self, log: TaskLog) -> Result<(), RepositoryError>;
    async fn for_task(&self, task_id: Uuid) -> Result<Vec<TaskLog>, RepositoryError>;
}

/// A temporary access code issued by an external onboarding flow, consumed
/// by the `verify_code` executor's allow-list / correlation logic.
#[derive(Debug, Clone)]
pub struct VerifyCodeGrant {
    pub code: String,
    pub account_id: i64,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait VerifyCodeRepository: Send + Sync {
    async fn issue(&self, grant: VerifyCodeGrant) -> Result<(), RepositoryError>;
    async fn consume(&self, code: &str) -> Result<Option<VerifyCodeGrant>, RepositoryError>;
}

/// In-memory fakes for all five ports, used across this crate's test suites.
pub mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct InMemoryAccountRepository {
        accounts: Mutex<HashMap<i64, Account>>,
    }

    impl InMemoryAccountRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_account(self, account: Account) -> Self {
            self.accounts.lock().unwrap().insert(account.id, account);
            self
        }
    }

    #[async_trait]
    impl AccountRepository for InMemoryAccountRepository {
        async fn get(&self, id: i64) -> Result<Account, RepositoryError> {
            self.accounts
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(RepositoryError::NotFound)
        }

        async fn save(&self, account: &Account) -> Result<(), RepositoryError> {
            self.accounts
                .lock()
                .unwrap()
                .insert(account.id, account.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct InMemoryProxyRepository {
        proxies: Mutex<HashMap<i64, Proxy>>,
    }

    impl InMemoryProxyRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_proxy(self, proxy: Proxy) -> Self {
            self.proxies.lock().unwrap().insert(proxy.id, proxy);
            self
        }
    }

    #[async_trait]
    impl ProxyRepository for InMemoryProxyRepository {
        async fn get(&self, id: i64) -> Result<Proxy, RepositoryError> {
            self.proxies
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(RepositoryError::NotFound)
        }
    }

    #[derive(Default)]
    pub struct InMemoryTaskRepository {
        tasks: Mutex<HashMap<Uuid, Task>>,
    }

    impl InMemoryTaskRepository {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl TaskRepository for InMemoryTaskRepository {
        async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>, RepositoryError> {
            let tasks = self.tasks.lock().unwrap();
            let mut due: Vec<Task> = tasks.values().filter(|t| t.is_due(now)).cloned().collect();
            due.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.created_at.cmp(&b.created_at))
            });
            Ok(due)
        }

        async fn get(&self, id: Uuid) -> Result<Task, RepositoryError> {
            self.tasks
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(RepositoryError::NotFound)
        }

        async fn save(&self, task: &Task) -> Result<(), RepositoryError> {
            self.tasks.lock().unwrap().insert(task.id, task.clone());
            Ok(())
        }

        async fn running_tasks(&self) -> Result<Vec<Task>, RepositoryError> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.status == TaskStatus::Running)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    pub struct InMemoryTaskLogRepository {
        logs: Mutex<Vec<TaskLog>>,
    }

    impl InMemoryTaskLogRepository {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl TaskLogRepository for InMemoryTaskLogRepository {
        async fn append(&self, log: TaskLog) -> Result<(), RepositoryError> {
            self.logs.lock().unwrap().push(log);
            Ok(())
        }

        async fn for_task(&self, task_id: Uuid) -> Result<Vec<TaskLog>, RepositoryError> {
            Ok(self
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|l| l.task_id == task_id)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    pub struct InMemoryVerifyCodeRepository {
        grants: Mutex<HashMap<String, VerifyCodeGrant>>,
    }

    impl InMemoryVerifyCodeRepository {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl VerifyCodeRepository for InMemoryVerifyCodeRepository {
        async fn issue(&self, grant: VerifyCodeGrant) -> Result<(), RepositoryError> {
            self.grants
                .lock()
                .unwrap()
                .insert(grant.code.clone(), grant);
            Ok(())
        }

        async fn consume(&self, code: &str) -> Result<Option<VerifyCodeGrant>, RepositoryError> {
            Ok(self.grants.lock().unwrap().remove(code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::*;
    use super::*;
    use crate::task::TaskType;

    #[tokio::test]
    async fn task_repository_orders_by_priority_then_created_at() {
        let repo = InMemoryTaskRepository::new();
        let mut low = Task::new("alice", TaskType::PrivateMessage, vec![1]);
        low.priority = 1;
        let mut high = Task::new("alice", TaskType::PrivateMessage, vec![1]);
        high.priority = 9;
        repo.save(&low).await.unwrap();
        repo.save(&high).await.unwrap();

        let due = repo.due_tasks(Utc::now()).await.unwrap();
        assert_eq!(due[0].id, high.id);
        assert_eq!(due[1].id, low.id);
    }

    #[tokio::test]
    async fn verify_code_grant_is_consumed_once() {
        let repo = InMemoryVerifyCodeRepository::new();
        repo.issue(VerifyCodeGrant {
            code: "48392".into(),
            account_id: 1,
            owner: "alice".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(60),
        })
        .await
        .unwrap();

        assert!(repo.consume("48392").await.unwrap().is_some());
        assert!(repo.consume("48392").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn account_repository_round_trip() {
        let repo = InMemoryAccountRepository::new().with_account(Account::new(1, "+1", "alice"));
        let account = repo.get(1).await.unwrap();
        assert_eq!(account.phone, "+1");
        assert!(matches!(repo.get(2).await, Err(RepositoryError::NotFound)));
    }
}
