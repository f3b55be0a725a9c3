//! `private_message` (§4.2): serial send to N target usernames.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ExecutionContext, ResultBuilder, TaskExecutor};
use crate::error::PoolError;
use crate::session_client::SessionHandle;

fn default_interval_secs() -> u64 {
    2
}

#[derive(Debug, Deserialize)]
struct Config {
    targets: Vec<String>,
    message: String,
    #[serde(default = "default_interval_secs")]
    interval_seconds: u64,
}

pub struct PrivateMessageExecutor;

#[async_trait]
impl TaskExecutor for PrivateMessageExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        handle: Arc<dyn SessionHandle>,
    ) -> Result<Value, PoolError> {
        let config: Config = ctx.parse_config()?;
        let mut result = ResultBuilder::new();
        let mut sent = 0u32;
        let mut failed = 0u32;
        let mut per_target = Vec::new();

        for (i, target) in config.targets.iter().enumerate() {
            ctx.check_cancelled().await?;
            let started = std::time::Instant::now();
            let outcome = async {
                let peer = handle.resolve_username(target).await?;
                handle.send_message(&peer, &config.message).await
            }
            .await;

            match outcome {
                Ok(_) => {
                    sent += 1;
                    result.log(format!("sent to {target}"));
                    per_target.push(serde_json::json!({
                        "target": target,
                        "status": "success",
                        "duration_ms": started.elapsed().as_millis(),
                    }));
                }
                Err(err) => {
                    failed += 1;
                    result.log(format!("failed to send to {target}: {err}"));
                    per_target.push(serde_json::json!({
                        "target": target,
                        "status": "failed",
                        "error": err.message,
                        "duration_ms": started.elapsed().as_millis(),
                    }));
                }
            }

            if i + 1 < config.targets.len() {
                tokio::time::sleep(Duration::from_secs(config.interval_seconds)).await;
            }
        }

        // §7: per-target failures never become a task failure unless every
        // dispatched sub-target failed.
        if failed > 0 && sent == 0 {
            return Err(PoolError::new(
                crate::error::ErrorKind::Transient,
                format!("all {failed} send(s) failed"),
            ));
        }

        let total = config.targets.len() as u32;
        result
            .set("sent_count", sent)
            .set("failed_count", failed)
            .set(
                "success_rate",
                if total == 0 { 0.0 } else { sent as f64 / total as f64 },
            )
            .set("targets", Value::Array(per_target));

        Ok(result.build())
    }
}
