//! Task Executors (§4.2) — one module per [`crate::task::TaskType`], sharing
//! a uniform [`TaskExecutor`] contract against the session client port.

mod account_check;
mod broadcast;
mod force_add_group;
mod group_chat;
mod join_group;
mod private_message;
mod scenario;
mod terminate_sessions;
mod update_2fa;
mod verify_code;

pub use account_check::AccountCheckExecutor;
pub use broadcast::BroadcastExecutor;
pub use force_add_group::ForceAddGroupExecutor;
pub use group_chat::GroupChatExecutor;
pub use join_group::JoinGroupExecutor;
pub use private_message::PrivateMessageExecutor;
pub use scenario::ScenarioExecutor;
pub use terminate_sessions::TerminateSessionsExecutor;
pub use update_2fa::Update2faExecutor;
pub use verify_code::VerifyCodeExecutor;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::PoolError;
use crate::session_client::SessionHandle;

/// Everything an executor needs beyond the live session handle: which task
/// and account it is running for, the task's opaque config, and the
/// cancellation signal it must honor at every suspension point (§5).
#[derive(Clone)]
pub struct ExecutionContext {
    pub task_id: Uuid,
    pub account_id: i64,
    pub config: Value,
    pub cancel: CancellationToken,
    /// This account's position within the task's `account_ids`, and how many
    /// accounts the task dispatches to in total — the "even ceil-split by
    /// account index" fallback (§4.2) needs both to partition a target list
    /// without a caller-supplied `limit_per_account`. Defaults to `(0, 1)`
    /// for single-account callers and direct executor tests.
    pub account_index: usize,
    pub account_count: usize,
}

impl ExecutionContext {
    pub fn new(task_id: Uuid, account_id: i64, config: Value, cancel: CancellationToken) -> Self {
        Self {
            task_id,
            account_id,
            config,
            cancel,
            account_index: 0,
            account_count: 1,
        }
    }

    /// Records this account's position within its task's multi-account
    /// dispatch (§4.3 fan-out); used by `broadcast`/`force_add_group`'s
    /// ceil-split fallback.
    pub fn with_position(mut self, account_index: usize, account_count: usize) -> Self {
        self.account_index = account_index;
        self.account_count = account_count;
        self
    }

    /// Deserializes `config` into `T`, defaulting to `T::default()`-shaped
    /// behavior via serde's field defaults when a field is absent.
    pub fn parse_config<T: serde::de::DeserializeOwned>(&self) -> Result<T, PoolError> {
        serde_json::from_value(self.config.clone())
            .map_err(|e| PoolError::new(crate::error::ErrorKind::InvalidInput, e.to_string()))
    }

    pub async fn check_cancelled(&self) -> Result<(), PoolError> {
        if self.cancel.is_cancelled() {
            return Err(PoolError::cancelled("task context cancelled"));
        }
        Ok(())
    }
}

/// The uniform executor contract (§4.2, §9 "Executor polymorphism"): a
/// tagged variant with a single `execute(ctx, handle)` entry point, standing
/// in for the distilled spec's `execute`/`executeAdvanced` split — this
/// port's [`SessionHandle`] already exposes both the raw-API-level and
/// higher-level operations an executor might need.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        handle: Arc<dyn SessionHandle>,
    ) -> Result<Value, PoolError>;
}

/// Accumulates the common `{logs, completion_time, ...}` result shape (§6
/// "Task result schema") that every executor writes.
#[derive(Default)]
pub struct ResultBuilder {
    logs: Vec<String>,
    fields: Map<String, Value>,
}

impl ResultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, message: impl Into<String>) -> &mut Self {
        let ts = chrono::Utc::now().to_rfc3339();
        self.logs.push(format!("[{ts}] {}", message.into()));
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn build(mut self) -> Value {
        self.fields
            .insert("logs".to_string(), Value::Array(self.logs.into_iter().map(Value::from).collect()));
        self.fields.insert(
            "completion_time".to_string(),
            Value::from(chrono::Utc::now().timestamp()),
        );
        Value::Object(self.fields)
    }
}

/// Extracts 4-8 consecutive ASCII digits from `text`, the way the
/// `verify_code` executor (and `account_check`'s 2FA probe) pull a code out
/// of a free-form message.
pub(crate) fn extract_digit_run(text: &str, min_len: usize, max_len: usize) -> Option<String> {
    let mut current = String::new();
    let mut best: Option<String> = None;
    for ch in text.chars().chain(std::iter::once(' ')) {
        if ch.is_ascii_digit() && current.len() < max_len {
            current.push(ch);
        } else {
            if current.len() >= min_len {
                best = Some(current.clone());
            }
            current.clear();
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_builder_includes_logs_and_completion_time() {
        let mut builder = ResultBuilder::new();
        builder.log("did a thing").set("sent_count", 2);
        let value = builder.build();
        assert!(value["logs"][0].as_str().unwrap().contains("did a thing"));
        assert_eq!(value["sent_count"], 2);
        assert!(value["completion_time"].is_i64());
    }

    #[test]
    fn extract_digit_run_finds_code_in_sentence() {
        assert_eq!(
            extract_digit_run("Your Telegram code is 48392, do not share it", 4, 8),
            Some("48392".to_string())
        );
        assert_eq!(extract_digit_run("no digits here", 4, 8), None);
        assert_eq!(extract_digit_run("too short 12", 4, 8), None);
    }
}
