//! `verify_code` (§4.2): polls dialogs for an incoming verification code
//! from an allow-listed sender within a bounded deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ExecutionContext, ResultBuilder, TaskExecutor, extract_digit_run};
use crate::error::PoolError;
use crate::session_client::SessionHandle;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

const DEFAULT_SENDERS: &[&str] = &["777000", "Telegram"];
const KEYWORDS: &[&str] = &[
    "code",
    "verification",
    "verify",
    "login",
    "telegram",
    "код",
    "verificación",
];

fn default_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    senders: Option<Vec<String>>,
    #[serde(default = "default_timeout_secs")]
    timeout_seconds: u64,
}

pub struct VerifyCodeExecutor;

#[async_trait]
impl TaskExecutor for VerifyCodeExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        handle: Arc<dyn SessionHandle>,
    ) -> Result<Value, PoolError> {
        let config: Config = ctx.parse_config()?;
        let timeout = Duration::from_secs(config.timeout_seconds.clamp(30, 600));
        let senders: Vec<String> = config
            .senders
            .unwrap_or_else(|| DEFAULT_SENDERS.iter().map(|s| s.to_string()).collect());

        let mut result = ResultBuilder::new();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            ctx.check_cancelled().await?;

            let dialogs = handle.list_dialogs(20).await?;
            for dialog in &dialogs {
                for message in &dialog.recent_messages {
                    let sender_matches = message
                        .sender_username
                        .as_deref()
                        .map(|u| senders.iter().any(|s| s.eq_ignore_ascii_case(u)))
                        .unwrap_or(false)
                        || message
                            .sender_id
                            .map(|id| senders.iter().any(|s| s == &id.to_string()))
                            .unwrap_or(false);
                    if !sender_matches {
                        continue;
                    }

                    let lower = message.text.to_lowercase();
                    if !KEYWORDS.iter().any(|k| lower.contains(k)) {
                        continue;
                    }

                    if let Some(code) = extract_digit_run(&message.text, 4, 8) {
                        result.log(format!("received code from {:?}", message.sender_username));
                        result
                            .set("verify_code", code)
                            .set(
                                "sender",
                                message.sender_username.clone().unwrap_or_default(),
                            )
                            .set("received_at", message.date.timestamp())
                            .set("status", "received");
                        return Ok(result.build());
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                result.log("timed out waiting for verification code");
                result.set("status", "timeout");
                return Ok(result.build());
            }

            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = ctx.cancel.cancelled() => return Err(PoolError::cancelled("task context cancelled")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_client::{DialogMessage, DialogSummary, PeerRef};
    use async_trait::async_trait as at;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    struct ScriptedHandle {
        dialogs: Vec<DialogSummary>,
    }

    #[at]
    impl SessionHandle for ScriptedHandle {
        async fn self_identity(&self) -> Result<crate::session_client::Identity, PoolError> {
            unimplemented!()
        }
        async fn resolve_username(&self, _username: &str) -> Result<PeerRef, PoolError> {
            unimplemented!()
        }
        async fn send_message(&self, _peer: &PeerRef, _text: &str) -> Result<i64, PoolError> {
            unimplemented!()
        }
        async fn send_typing(&self, _peer: &PeerRef) -> Result<(), PoolError> {
            Ok(())
        }
        async fn join_group(&self, _target: &str) -> Result<(), PoolError> {
            Ok(())
        }
        async fn invite_to_group(&self, _group: &PeerRef, _user: &PeerRef) -> Result<(), PoolError> {
            Ok(())
        }
        async fn list_dialogs(&self, _limit: usize) -> Result<Vec<DialogSummary>, PoolError> {
            Ok(self.dialogs.clone())
        }
        async fn list_authorizations(
            &self,
        ) -> Result<Vec<crate::session_client::AuthorizationInfo>, PoolError> {
            Ok(Vec::new())
        }
        async fn reset_authorizations(&self) -> Result<u32, PoolError> {
            Ok(0)
        }
        async fn get_password_info(&self) -> Result<crate::session_client::PasswordInfo, PoolError> {
            unimplemented!()
        }
        async fn update_password(
            &self,
            _new_verifier: Vec<u8>,
            _new_salt1: Vec<u8>,
            _hint: Option<String>,
        ) -> Result<(), PoolError> {
            Ok(())
        }
        async fn verify_password(&self, _password: &str) -> Result<bool, PoolError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn finds_code_from_allow_listed_sender() {
        let handle = Arc::new(ScriptedHandle {
            dialogs: vec![DialogSummary {
                peer: PeerRef::User { id: 1, access_hash: 0 },
                recent_messages: vec![DialogMessage {
                    sender_id: None,
                    sender_username: Some("Telegram".to_string()),
                    text: "Login code: 48392".to_string(),
                    date: chrono::Utc::now(),
                }],
            }],
        });
        let ctx = ExecutionContext::new(
            Uuid::now_v7(),
            1,
            serde_json::json!({"timeout_seconds": 30}),
            CancellationToken::new(),
        );
        let result = VerifyCodeExecutor.execute(&ctx, handle).await.unwrap();
        assert_eq!(result["verify_code"], "48392");
        assert_eq!(result["status"], "received");
    }

    #[tokio::test]
    async fn times_out_when_no_matching_message_arrives() {
        let handle = Arc::new(ScriptedHandle { dialogs: vec![] });
        let ctx = ExecutionContext::new(
            Uuid::now_v7(),
            1,
            serde_json::json!({"timeout_seconds": 30}),
            CancellationToken::new(),
        );
        // Force an immediate timeout by using the minimum clamp with a
        // deadline that has already elapsed relative to the poll interval.
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            VerifyCodeExecutor.execute(&ctx, handle).await
        })
        .await;
        // The real deadline is 30s; this just exercises the no-match path
        // without looping forever in a unit test.
        assert!(result.is_err(), "executor should still be polling after 5s");
    }
}
