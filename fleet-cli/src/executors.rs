//! Wires up one executor instance per [`TaskType`], the table the scheduler
//! dispatches against.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_core::TaskType;
use fleet_core::agent::NullDecisionProvider;
use fleet_core::config::AgentConfig;
use fleet_core::executor::{
    AccountCheckExecutor, BroadcastExecutor, ForceAddGroupExecutor, GroupChatExecutor,
    JoinGroupExecutor, PrivateMessageExecutor, ScenarioExecutor, TaskExecutor,
    TerminateSessionsExecutor, Update2faExecutor, VerifyCodeExecutor,
};

/// No AI decision provider ships in this crate (§4.4 Non-goal); scenarios
/// run with [`NullDecisionProvider`], which observes but never speaks.
pub fn build(agent_config: AgentConfig) -> HashMap<TaskType, Arc<dyn TaskExecutor>> {
    let mut executors: HashMap<TaskType, Arc<dyn TaskExecutor>> = HashMap::new();
    executors.insert(TaskType::AccountCheck, Arc::new(AccountCheckExecutor));
    executors.insert(TaskType::PrivateMessage, Arc::new(PrivateMessageExecutor));
    executors.insert(TaskType::Broadcast, Arc::new(BroadcastExecutor));
    executors.insert(TaskType::VerifyCode, Arc::new(VerifyCodeExecutor));
    executors.insert(TaskType::GroupChat, Arc::new(GroupChatExecutor));
    executors.insert(
        TaskType::Scenario,
        Arc::new(ScenarioExecutor::new(Arc::new(NullDecisionProvider), agent_config)),
    );
    executors.insert(TaskType::JoinGroup, Arc::new(JoinGroupExecutor));
    executors.insert(TaskType::ForceAddGroup, Arc::new(ForceAddGroupExecutor));
    executors.insert(
        TaskType::TerminateSessions,
        Arc::new(TerminateSessionsExecutor),
    );
    executors.insert(TaskType::Update2fa, Arc::new(Update2faExecutor));
    executors
}
