//! `broadcast` (§4.2): send to N group targets, with optional cross-account
//! partitioning via `limit_per_account` and a `next_group_index` cursor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ExecutionContext, ResultBuilder, TaskExecutor};
use crate::error::PoolError;
use crate::session_client::SessionHandle;

fn default_interval_secs() -> u64 {
    3
}

#[derive(Debug, Deserialize)]
struct Config {
    groups: Vec<String>,
    message: String,
    #[serde(default = "default_interval_secs")]
    interval_seconds: u64,
    #[serde(default)]
    auto_join: bool,
    /// 0 means "no partitioning": this account processes every target.
    #[serde(default)]
    limit_per_account: usize,
    #[serde(default)]
    next_group_index: usize,
}

pub struct BroadcastExecutor;

#[async_trait]
impl TaskExecutor for BroadcastExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        handle: Arc<dyn SessionHandle>,
    ) -> Result<Value, PoolError> {
        let config: Config = ctx.parse_config()?;
        let mut result = ResultBuilder::new();

        let total = config.groups.len();
        let (start, end) = if config.limit_per_account > 0 {
            let start = config.next_group_index;
            (start, (start + config.limit_per_account).min(total))
        } else if ctx.account_count > 1 {
            // "else even ceil-split by account index" (§4.2) when no
            // explicit per-account limit was configured.
            let per_account = total.div_ceil(ctx.account_count);
            let start = (ctx.account_index * per_account).min(total);
            (start, (start + per_account).min(total))
        } else {
            (0, total)
        };

        let mut sent = 0u32;
        let mut failed = 0u32;
        let mut per_target = Vec::new();

        for (i, group) in config.groups[start..end].iter().enumerate() {
            ctx.check_cancelled().await?;
            if config.auto_join {
                if let Err(err) = handle.join_group(group).await
                    && !err.message.to_uppercase().contains("USER_ALREADY_PARTICIPANT")
                {
                    result.log(format!("auto_join failed for {group}: {err}"));
                }
            }

            let outcome = async {
                let peer = handle.resolve_username(group).await?;
                handle.send_message(&peer, &config.message).await
            }
            .await;

            match outcome {
                Ok(_) => {
                    sent += 1;
                    result.log(format!("broadcast sent to {group}"));
                    per_target.push(serde_json::json!({"target": group, "status": "success"}));
                }
                Err(err) => {
                    failed += 1;
                    result.log(format!("broadcast failed for {group}: {err}"));
                    per_target.push(
                        serde_json::json!({"target": group, "status": "failed", "error": err.message}),
                    );
                }
            }

            if start + i + 1 < end {
                tokio::time::sleep(Duration::from_secs(config.interval_seconds)).await;
            }
        }

        // §7: per-target failures never become a task failure unless every
        // dispatched sub-target failed.
        if failed > 0 && sent == 0 {
            return Err(PoolError::new(
                crate::error::ErrorKind::Transient,
                format!("all {failed} broadcast send(s) failed"),
            ));
        }

        result
            .set("sent_count", sent)
            .set("failed_count", failed)
            .set("next_group_index", end)
            .set("targets", Value::Array(per_target));

        Ok(result.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_client::mock::MockSession;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    #[tokio::test]
    async fn partitions_across_accounts_via_limit_and_cursor() {
        let session = MockSession::new(1);
        let groups: Vec<String> = (0..10).map(|i| format!("g{i}")).collect();

        let ctx = ExecutionContext::new(
            Uuid::now_v7(),
            1,
            serde_json::json!({
                "groups": groups,
                "message": "hi",
                "interval_seconds": 0,
                "limit_per_account": 4,
            }),
            CancellationToken::new(),
        );
        let first = BroadcastExecutor.execute(&ctx, session.clone()).await.unwrap();
        assert_eq!(first["sent_count"], 4);
        assert_eq!(first["next_group_index"], 4);

        let ctx2 = ExecutionContext::new(
            Uuid::now_v7(),
            1,
            serde_json::json!({
                "groups": groups,
                "message": "hi",
                "interval_seconds": 0,
                "limit_per_account": 4,
                "next_group_index": 8,
            }),
            CancellationToken::new(),
        );
        let second = BroadcastExecutor.execute(&ctx2, session).await.unwrap();
        assert_eq!(second["sent_count"], 2);
        assert_eq!(second["next_group_index"], 10);
    }

    #[tokio::test]
    async fn ceil_splits_groups_across_accounts_when_no_limit_is_set() {
        let groups: Vec<String> = (0..10).map(|i| format!("g{i}")).collect();
        let config = serde_json::json!({
            "groups": groups,
            "message": "hi",
            "interval_seconds": 0,
        });

        let session0 = MockSession::new(1);
        let ctx0 = ExecutionContext::new(Uuid::now_v7(), 1, config.clone(), CancellationToken::new())
            .with_position(0, 2);
        let first = BroadcastExecutor.execute(&ctx0, session0).await.unwrap();
        assert_eq!(first["sent_count"], 5);

        let session1 = MockSession::new(2);
        let ctx1 = ExecutionContext::new(Uuid::now_v7(), 2, config, CancellationToken::new())
            .with_position(1, 2);
        let second = BroadcastExecutor.execute(&ctx1, session1).await.unwrap();
        assert_eq!(second["sent_count"], 5);
    }

    #[tokio::test]
    async fn every_group_failing_is_promoted_to_task_failure() {
        let session = MockSession::new(1);
        session
            .fail_operations
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let ctx = ExecutionContext::new(
            Uuid::now_v7(),
            1,
            serde_json::json!({
                "groups": ["g0", "g1"],
                "message": "hi",
                "interval_seconds": 0,
            }),
            CancellationToken::new(),
        );
        let err = BroadcastExecutor.execute(&ctx, session).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Transient);
    }
}
