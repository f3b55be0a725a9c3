//! `scenario` (§4.2, §4.4): the task type that drives a multi-agent
//! conversation. Each participating account's `execute_task` call arrives
//! here independently; they rendezvous on a shared [`AgentRunner`] keyed by
//! task id so the whole scenario's rate limits and history are shared
//! rather than per-account.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use super::{ExecutionContext, TaskExecutor};
use crate::agent::{AgentRunner, NullDecisionProvider, ScenarioDecisionProvider};
use crate::config::AgentConfig;
use crate::error::{ErrorKind, PoolError};
use crate::session_client::SessionHandle;
use crate::task::Scenario;

pub struct ScenarioExecutor {
    runners: DashMap<Uuid, Arc<AgentRunner>>,
    decision_provider: Arc<dyn ScenarioDecisionProvider>,
    agent_config: AgentConfig,
}

impl ScenarioExecutor {
    pub fn new(decision_provider: Arc<dyn ScenarioDecisionProvider>, agent_config: AgentConfig) -> Self {
        Self {
            runners: DashMap::new(),
            decision_provider,
            agent_config,
        }
    }
}

impl Default for ScenarioExecutor {
    fn default() -> Self {
        Self::new(Arc::new(NullDecisionProvider), AgentConfig::default())
    }
}

#[async_trait]
impl TaskExecutor for ScenarioExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        handle: Arc<dyn SessionHandle>,
    ) -> Result<Value, PoolError> {
        let scenario: Scenario = ctx.parse_config()?;
        if !scenario.is_valid() {
            return Err(PoolError::new(
                ErrorKind::InvalidInput,
                "scenario requires at least one agent with active_rate in [0, 1]",
            ));
        }

        let runner = self
            .runners
            .entry(ctx.task_id)
            .or_insert_with(|| {
                Arc::new(AgentRunner::new(
                    scenario,
                    self.agent_config.clone(),
                    self.decision_provider.clone(),
                ))
            })
            .clone();

        let result = runner.join(ctx.account_id, handle, ctx.cancel.clone()).await;
        if runner.leave() == 0 {
            self.runners.remove(&ctx.task_id);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_client::mock::MockSession;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn rejects_scenario_with_no_agents() {
        let executor = ScenarioExecutor::default();
        let ctx = ExecutionContext::new(
            Uuid::now_v7(),
            1,
            serde_json::json!({"name": "s", "topic": "t", "duration_seconds": 1, "agents": []}),
            CancellationToken::new(),
        );
        let session = MockSession::new(1);
        let err = executor.execute(&ctx, session).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn two_accounts_in_the_same_task_share_one_runner() {
        let executor = ScenarioExecutor::default();
        let task_id = Uuid::now_v7();
        let config = serde_json::json!({
            "name": "s",
            "topic": "t",
            "duration_seconds": 1,
            "agents": [
                {"account_id": 1, "persona": {}, "goal": "chat", "active_rate": 0.0},
                {"account_id": 2, "persona": {}, "goal": "chat", "active_rate": 0.0},
            ],
        });

        let ctx1 = ExecutionContext::new(task_id, 1, config.clone(), CancellationToken::new());
        let ctx2 = ExecutionContext::new(task_id, 2, config, CancellationToken::new());
        let session1 = MockSession::new(1);
        let session2 = MockSession::new(2);

        let (r1, r2) = tokio::join!(
            executor.execute(&ctx1, session1),
            executor.execute(&ctx2, session2)
        );
        let result1 = r1.unwrap();
        let result2 = r2.unwrap();
        assert_eq!(result1["participant_count"], 2);
        assert_eq!(result2["participant_count"], 2);
        assert!(executor.runners.is_empty(), "registry entry should be cleaned up");
    }
}
