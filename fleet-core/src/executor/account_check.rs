//! `account_check` (§4.2): probes account health and produces a 0-100 score.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ExecutionContext, ResultBuilder, TaskExecutor, extract_digit_run};
use crate::error::PoolError;
use crate::session_client::SessionHandle;

const SCORE_PER_CHECK: u32 = 25;

const FROZEN_KEYWORDS: &[&str] = &["frozen", "заморожен"];
const TWO_WAY_KEYWORDS: &[&str] = &[
    "read-only",
    "restricted in both directions",
    "ограничения на отправку",
];

fn default_spambot_username() -> String {
    "SpamBot".to_string()
}

#[derive(Debug, Deserialize)]
struct Config {
    /// A candidate 2FA password to verify against the account, if known.
    #[serde(default)]
    two_fa_password: Option<String>,
    #[serde(default)]
    check_spambot: bool,
    #[serde(default = "default_spambot_username")]
    spambot_username: String,
}

pub struct AccountCheckExecutor;

#[async_trait]
impl TaskExecutor for AccountCheckExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        handle: Arc<dyn SessionHandle>,
    ) -> Result<Value, PoolError> {
        let config: Config = ctx.parse_config()?;
        let mut result = ResultBuilder::new();
        let mut score: u32 = 0;

        ctx.check_cancelled().await?;
        match handle.self_identity().await {
            Ok(identity) => {
                score += SCORE_PER_CHECK;
                result
                    .log("identity check passed")
                    .set("tg_user_id", identity.user_id)
                    .set("tg_username", identity.username.clone().unwrap_or_default());
            }
            Err(err) => {
                result.log(format!("identity check failed: {err}"));
            }
        }

        ctx.check_cancelled().await?;
        match handle.list_dialogs(5).await {
            Ok(dialogs) => {
                score += SCORE_PER_CHECK;
                result
                    .log("dialog check passed")
                    .set("dialog_count", dialogs.len());
            }
            Err(err) => {
                result.log(format!("dialog check failed: {err}"));
            }
        }

        ctx.check_cancelled().await?;
        let mut has_2fa = false;
        let mut is_2fa_correct = false;
        match handle.get_password_info().await {
            Ok(info) => {
                score += SCORE_PER_CHECK;
                has_2fa = info.has_password;
                result.log("password info check passed");

                if has_2fa {
                    if let Some(candidate) = &config.two_fa_password {
                        is_2fa_correct = handle.verify_password(candidate).await.unwrap_or(false);
                        result.log(format!(
                            "2FA candidate password {}",
                            if is_2fa_correct { "verified" } else { "rejected" }
                        ));
                    }
                }
            }
            Err(err) => {
                result.log(format!("password info check failed: {err}"));
            }
        }

        let mut suggested_status: Option<&'static str> = None;
        let mut frozen_until: Option<i64> = None;
        if config.check_spambot {
            ctx.check_cancelled().await?;
            match probe_spambot(handle.as_ref(), &config.spambot_username).await {
                Ok(Some(reply)) => {
                    score += SCORE_PER_CHECK;
                    let lower = reply.to_lowercase();
                    if FROZEN_KEYWORDS.iter().any(|k| lower.contains(k)) {
                        suggested_status = Some("frozen");
                        frozen_until = extract_digit_run(&reply, 8, 12).and_then(|s| s.parse().ok());
                    } else if TWO_WAY_KEYWORDS.iter().any(|k| lower.contains(k)) {
                        suggested_status = Some("two_way");
                    }
                    result.log(format!("spambot reply: {reply}"));
                }
                Ok(None) => {
                    score += SCORE_PER_CHECK;
                    result.log("spambot probe: no reply within the poll window");
                }
                Err(err) => {
                    result.log(format!("spambot probe failed: {err}"));
                }
            }
        } else {
            score += SCORE_PER_CHECK;
        }

        let classification = match score {
            90..=100 => "excellent",
            70..=89 => "good",
            50..=69 => "warning",
            _ => "critical",
        };

        result
            .set("score", score)
            .set("classification", classification)
            .set("has_2fa", has_2fa)
            .set("two_fa_password", config.two_fa_password.filter(|_| is_2fa_correct))
            .set("is_2fa_correct", is_2fa_correct)
            .set("frozen_until", frozen_until);
        if let Some(status) = suggested_status {
            result.set("suggested_status", status);
        }

        Ok(result.build())
    }
}

/// Sends a probe message to the spambot account and waits briefly for its reply.
async fn probe_spambot(
    handle: &dyn SessionHandle,
    username: &str,
) -> Result<Option<String>, PoolError> {
    let peer = handle.resolve_username(username).await?;
    handle.send_message(&peer, "/start").await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        let dialogs = handle.list_dialogs(5).await?;
        if let Some(reply) = dialogs
            .iter()
            .find(|d| d.peer == peer)
            .and_then(|d| d.recent_messages.first())
        {
            return Ok(Some(reply.text.clone()));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Ok(None)
}
