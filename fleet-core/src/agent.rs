//! Agent Runner (§4.4): the observe-decide-act loop a `scenario` task drives
//! across its participating accounts.
//!
//! One [`AgentRunner`] instance is shared by every account participating in
//! a given scenario task (`crate::executor::ScenarioExecutor` keys a
//! per-task registry of these by task id). Exactly one of the task's
//! concurrent per-account executions drives the loop to completion; the
//! rest simply wait on its result, since each account's connection is
//! legitimately "busy" with the scenario for its whole duration either way.
//!
//! The actual conversational decision ("should this persona speak, and what
//! would it say") is out of scope (§1 Non-goals: "AI decision logic/prompt
//! construction") and is represented only as the [`ScenarioDecisionProvider`]
//! port; [`NullDecisionProvider`] is the only concrete implementation this
//! crate carries, and never elects to speak.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::error::PoolError;
use crate::executor::ResultBuilder;
use crate::session_client::{PeerRef, SessionHandle};
use crate::task::{Scenario, ScenarioAgent};

/// One observed or sent message, kept in the scenario's shared history cache.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub account_id: i64,
    pub sender_id: Option<i64>,
    pub sender_username: Option<String>,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Everything a decision provider needs to judge whether (and what) one
/// persona should say next.
#[derive(Debug, Clone)]
pub struct DecisionInput {
    pub agent: ScenarioAgent,
    pub scenario_topic: String,
    pub history: Vec<ChatMessage>,
}

/// The decision provider's verdict: stay silent, or speak `text`.
#[derive(Debug, Clone, Default)]
pub struct Decision {
    pub should_speak: bool,
    pub text: Option<String>,
}

/// AI decision port (§1 Non-goals, §4.4). Concrete reasoning over personas
/// and conversation history lives outside this crate.
#[async_trait]
pub trait ScenarioDecisionProvider: Send + Sync {
    async fn decide(&self, input: &DecisionInput) -> Result<Decision, PoolError>;
}

/// Always stays silent; the only `ScenarioDecisionProvider` this crate ships.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDecisionProvider;

#[async_trait]
impl ScenarioDecisionProvider for NullDecisionProvider {
    async fn decide(&self, _input: &DecisionInput) -> Result<Decision, PoolError> {
        Ok(Decision::default())
    }
}

/// Shared state for one running `scenario` task, fanned out across its
/// participating accounts' connections.
pub struct AgentRunner {
    scenario: Scenario,
    config: AgentConfig,
    decision_provider: Arc<dyn ScenarioDecisionProvider>,
    handles: DashMap<i64, Arc<dyn SessionHandle>>,
    tg_user_ids: DashMap<i64, i64>,
    last_agent_act: DashMap<i64, DateTime<Utc>>,
    last_global_act: Mutex<DateTime<Utc>>,
    last_seen_peer: Mutex<Option<PeerRef>>,
    history: Mutex<VecDeque<ChatMessage>>,
    drive_tx: Mutex<Option<watch::Sender<Option<Value>>>>,
    drive_rx: watch::Receiver<Option<Value>>,
    remaining: AtomicUsize,
}

impl AgentRunner {
    pub fn new(
        scenario: Scenario,
        config: AgentConfig,
        decision_provider: Arc<dyn ScenarioDecisionProvider>,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        let remaining = scenario.agents.len();
        Self {
            scenario,
            config,
            decision_provider,
            handles: DashMap::new(),
            tg_user_ids: DashMap::new(),
            last_agent_act: DashMap::new(),
            last_global_act: Mutex::new(DateTime::<Utc>::MIN_UTC),
            last_seen_peer: Mutex::new(None),
            history: Mutex::new(VecDeque::new()),
            drive_tx: Mutex::new(Some(tx)),
            drive_rx: rx,
            remaining: AtomicUsize::new(remaining),
        }
    }

    /// Registers `account_id`'s live handle and either drives the scenario
    /// to completion (the first caller) or awaits the driver's result (every
    /// other participating account).
    ///
    /// Before registering, ensures this account is a member of the topic
    /// chat (§4.4 setup), with a small jittered delay so concurrently
    /// joining participants don't all hit `join_group` in the same instant.
    pub async fn join(
        &self,
        account_id: i64,
        handle: Arc<dyn SessionHandle>,
        cancel: CancellationToken,
    ) -> Result<Value, PoolError> {
        let jitter_ms = rand::rng().random_range(0..250);
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
        if let Err(err) = handle.join_group(&self.scenario.topic).await
            && !err.message.to_uppercase().contains("USER_ALREADY_PARTICIPANT")
        {
            tracing::warn!(account_id, %err, "scenario participant failed to join topic chat");
        }

        self.handles.insert(account_id, handle);

        let maybe_tx = self.drive_tx.lock().await.take();
        match maybe_tx {
            Some(tx) => {
                let result = self.drive(cancel).await;
                let _ = tx.send(Some(result.clone()));
                Ok(result)
            }
            None => {
                let mut rx = self.drive_rx.clone();
                loop {
                    if let Some(v) = rx.borrow().clone() {
                        return Ok(v);
                    }
                    if rx.changed().await.is_err() {
                        return Err(PoolError::cancelled("scenario driver ended without a result"));
                    }
                }
            }
        }
    }

    /// Marks one participating account as having left (its `join` call
    /// returned). Returns the number of accounts still pending, so the
    /// caller can tell when it is safe to drop this runner's registry entry.
    pub fn leave(&self) -> usize {
        self.remaining.fetch_sub(1, Ordering::SeqCst) - 1
    }

    async fn push_history(&self, message: ChatMessage) {
        let mut history = self.history.lock().await;
        history.push_back(message);
        while history.len() > self.config.history_cache_cap {
            history.pop_front();
        }
    }

    async fn history_snapshot(&self) -> Vec<ChatMessage> {
        self.history.lock().await.iter().cloned().collect()
    }

    /// The observe-decide-act loop: poll each participant's dialogs,
    /// append genuinely inbound messages to the shared history (dropping
    /// anything that is this same account's own message echoed back), then
    /// — subject to the global/per-agent rate limits and each persona's
    /// `active_rate` gate — let the decision provider pick a speaker.
    async fn drive(&self, cancel: CancellationToken) -> Value {
        let mut result = ResultBuilder::new();
        let mut spoken = 0u32;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.scenario.duration_seconds);

        for entry in self.handles.iter() {
            if let Ok(identity) = entry.value().self_identity().await {
                self.tg_user_ids.insert(*entry.key(), identity.user_id);
            }
        }

        let poll_interval = Duration::from_secs(self.config.min_global_interval_secs.max(1).min(30));
        loop {
            let now_inst = tokio::time::Instant::now();
            if now_inst >= deadline {
                result.log("scenario duration elapsed");
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(poll_interval.min(deadline - now_inst)) => {}
                _ = cancel.cancelled() => {
                    result.log("scenario cancelled");
                    break;
                }
            }
            if cancel.is_cancelled() {
                result.log("scenario cancelled");
                break;
            }

            self.observe().await;

            if let Some((agent_cfg, text)) = self.decide_next_speaker().await {
                let Some(peer) = self.last_seen_peer.lock().await.clone() else {
                    continue;
                };
                let Some(handle) = self.handles.get(&agent_cfg.account_id).map(|h| h.clone()) else {
                    continue;
                };
                match handle.send_message(&peer, &text).await {
                    Ok(_) => {
                        spoken += 1;
                        *self.last_global_act.lock().await = Utc::now();
                        self.last_agent_act.insert(agent_cfg.account_id, Utc::now());
                        self.push_history(ChatMessage {
                            account_id: agent_cfg.account_id,
                            sender_id: self.tg_user_ids.get(&agent_cfg.account_id).map(|e| *e),
                            sender_username: None,
                            text: text.clone(),
                            at: Utc::now(),
                        })
                        .await;
                        result.log(format!("account {} spoke", agent_cfg.account_id));
                    }
                    Err(err) => {
                        result.log(format!("account {} failed to send: {err}", agent_cfg.account_id));
                    }
                }
            }
        }

        result
            .set("messages_sent", spoken)
            .set("participant_count", self.scenario.agents.len());
        result.build()
    }

    /// Pulls each participant's recent dialog messages into the shared
    /// history, skipping messages the account sent itself (§9 self-message
    /// dedup: compared against the account's own `tg_user_id`).
    async fn observe(&self) {
        for agent_cfg in &self.scenario.agents {
            let Some(handle) = self.handles.get(&agent_cfg.account_id).map(|h| h.clone()) else {
                continue;
            };
            let Ok(dialogs) = handle.list_dialogs(5).await else {
                continue;
            };
            let own_id = self.tg_user_ids.get(&agent_cfg.account_id).map(|e| *e);
            for dialog in dialogs {
                *self.last_seen_peer.lock().await = Some(dialog.peer.clone());
                for message in dialog.recent_messages {
                    if own_id.is_some() && message.sender_id == own_id {
                        continue;
                    }
                    self.push_history(ChatMessage {
                        account_id: agent_cfg.account_id,
                        sender_id: message.sender_id,
                        sender_username: message.sender_username,
                        text: message.text,
                        at: message.date,
                    })
                    .await;
                }
            }
        }
    }

    /// Applies the global interval, per-agent speak interval, and
    /// `active_rate` probabilistic gates, then asks the decision provider
    /// whether the chosen candidate actually wants to speak.
    async fn decide_next_speaker(&self) -> Option<(ScenarioAgent, String)> {
        let now = Utc::now();
        {
            let last_global = *self.last_global_act.lock().await;
            if now - last_global < chrono::Duration::seconds(self.config.min_global_interval_secs as i64) {
                return None;
            }
        }

        let eligible: Vec<&ScenarioAgent> = self
            .scenario
            .agents
            .iter()
            .filter(|a| {
                self.handles.contains_key(&a.account_id)
                    && self
                        .last_agent_act
                        .get(&a.account_id)
                        .map(|t| now - *t >= chrono::Duration::seconds(self.config.min_speak_interval_secs as i64))
                        .unwrap_or(true)
            })
            .collect();

        for agent_cfg in eligible {
            let draw: f64 = rand::rng().random();
            if draw > agent_cfg.active_rate {
                continue;
            }
            let history = self.history_snapshot().await;
            let input = DecisionInput {
                agent: agent_cfg.clone(),
                scenario_topic: self.scenario.topic.clone(),
                history,
            };
            if let Ok(decision) = self.decision_provider.decide(&input).await {
                if decision.should_speak {
                    if let Some(text) = decision.text {
                        return Some((agent_cfg.clone(), text));
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_client::mock::MockSession;

    fn scenario(agents: Vec<ScenarioAgent>) -> Scenario {
        Scenario {
            name: "s".into(),
            topic: "chat".into(),
            duration_seconds: 1,
            agents,
        }
    }

    fn agent(account_id: i64, active_rate: f64) -> ScenarioAgent {
        ScenarioAgent {
            account_id,
            persona: Value::Null,
            goal: "chat".into(),
            active_rate,
            image_pool: vec![],
            image_gen_enabled: false,
        }
    }

    #[tokio::test]
    async fn null_decision_provider_never_speaks() {
        let runner = Arc::new(AgentRunner::new(
            scenario(vec![agent(1, 1.0)]),
            AgentConfig {
                min_global_interval_secs: 0,
                ..AgentConfig::default()
            },
            Arc::new(NullDecisionProvider),
        ));
        let session = MockSession::new(1);
        let result = runner
            .join(1, session.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result["messages_sent"], 0);
        assert!(session.sent_messages.lock().await.is_empty());
    }

    #[tokio::test]
    async fn second_participant_joins_the_already_running_driver() {
        let runner = Arc::new(AgentRunner::new(
            scenario(vec![agent(1, 0.0), agent(2, 0.0)]),
            AgentConfig::default(),
            Arc::new(NullDecisionProvider),
        ));
        let session1 = MockSession::new(1);
        let session2 = MockSession::new(2);

        let r1 = runner.clone();
        let s1 = session1.clone();
        let driver = tokio::spawn(async move { r1.join(1, s1, CancellationToken::new()).await });

        tokio::task::yield_now().await;
        let follower_result = runner.join(2, session2, CancellationToken::new()).await.unwrap();
        let driver_result = driver.await.unwrap().unwrap();
        assert_eq!(follower_result["participant_count"], driver_result["participant_count"]);
    }

    #[test]
    fn leave_counts_down_to_zero() {
        let runner = AgentRunner::new(
            scenario(vec![agent(1, 0.0), agent(2, 0.0)]),
            AgentConfig::default(),
            Arc::new(NullDecisionProvider),
        );
        assert_eq!(runner.leave(), 1);
        assert_eq!(runner.leave(), 0);
    }
}
