//! `group_chat` (§4.2): lightweight keyword-triggered reply in one group.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;

use super::{ExecutionContext, ResultBuilder, TaskExecutor};
use crate::error::PoolError;
use crate::session_client::SessionHandle;

const PHRASE_BANK: &[&str] = &[
    "interesting point!",
    "lol true",
    "what does everyone else think?",
    "haha fair",
];

fn default_response_rate() -> f64 {
    0.3
}

#[derive(Debug, Deserialize)]
struct Config {
    group: String,
    #[serde(default = "default_response_rate")]
    response_rate: f64,
    #[serde(default)]
    persona_tag: Option<String>,
}

pub struct GroupChatExecutor;

#[async_trait]
impl TaskExecutor for GroupChatExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        handle: Arc<dyn SessionHandle>,
    ) -> Result<Value, PoolError> {
        let config: Config = ctx.parse_config()?;
        let mut result = ResultBuilder::new();

        let peer = handle.resolve_username(&config.group).await?;
        let dialogs = handle.list_dialogs(1).await?;
        let recent = dialogs
            .into_iter()
            .find(|d| d.peer == peer)
            .map(|d| d.recent_messages)
            .unwrap_or_default();
        result.set("recent_message_count", recent.len());

        let draw: f64 = rand::rng().random();
        if draw > config.response_rate {
            result.log("response_rate gate did not fire").set("responded", false);
            return Ok(result.build());
        }

        let phrase_index = rand::rng().random_range(0..PHRASE_BANK.len());
        let mut phrase = PHRASE_BANK[phrase_index].to_string();
        if let Some(tag) = &config.persona_tag {
            phrase = format!("[{tag}] {phrase}");
        }

        handle.send_typing(&peer).await?;
        handle.send_message(&peer, &phrase).await?;
        result
            .log(format!("replied in {}: {phrase}", config.group))
            .set("responded", true)
            .set("message", phrase);

        Ok(result.build())
    }
}
