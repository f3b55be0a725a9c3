//! `force_add_group` (§4.2): invite a partitioned list of users to a group.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ExecutionContext, ResultBuilder, TaskExecutor};
use crate::error::PoolError;
use crate::session_client::{PeerRef, SessionHandle};

fn default_interval_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct Config {
    targets: Vec<String>,
    group_name: String,
    #[serde(default = "default_interval_secs")]
    interval_seconds: u64,
    #[serde(default)]
    limit_per_account: usize,
    #[serde(default)]
    next_target_index: usize,
    #[serde(default)]
    auto_join: bool,
}

pub struct ForceAddGroupExecutor;

#[async_trait]
impl TaskExecutor for ForceAddGroupExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        handle: Arc<dyn SessionHandle>,
    ) -> Result<Value, PoolError> {
        let config: Config = ctx.parse_config()?;
        let mut result = ResultBuilder::new();

        if config.auto_join
            && let Err(err) = handle.join_group(&config.group_name).await
            && !err.message.to_uppercase().contains("USER_ALREADY_PARTICIPANT")
        {
            result.log(format!("auto_join failed: {err}"));
        }

        let group: PeerRef = handle.resolve_username(&config.group_name).await?;

        let total = config.targets.len();
        let (start, end) = if config.limit_per_account > 0 {
            let start = config.next_target_index;
            (start, (start + config.limit_per_account).min(total))
        } else if ctx.account_count > 1 {
            // "else even ceil-split by account index" (§4.2): no explicit
            // per-account limit was given, so divide the target list evenly
            // across every account dispatched for this task.
            let per_account = total.div_ceil(ctx.account_count);
            let start = (ctx.account_index * per_account).min(total);
            (start, (start + per_account).min(total))
        } else {
            (0, total)
        };

        let mut invited = 0u32;
        let mut failed = 0u32;
        for target in &config.targets[start..end] {
            ctx.check_cancelled().await?;
            let outcome = async {
                let user = handle.resolve_username(target).await?;
                handle.invite_to_group(&group, &user).await
            }
            .await;

            match outcome {
                Ok(()) => {
                    invited += 1;
                    result.log(format!("invited {target}"));
                }
                Err(err) if err.message.to_uppercase().contains("USER_ALREADY_PARTICIPANT") => {
                    invited += 1;
                    result.log(format!("{target} already a participant"));
                }
                Err(err) => {
                    failed += 1;
                    result.log(format!("failed to invite {target}: {err}"));
                }
            }

            tokio::time::sleep(Duration::from_secs(config.interval_seconds)).await;
        }

        // §7: per-target failures never become a task failure unless every
        // dispatched sub-target failed.
        if failed > 0 && invited == 0 {
            return Err(PoolError::new(
                crate::error::ErrorKind::Transient,
                format!("all {failed} invite(s) failed"),
            ));
        }

        result
            .set("invited_count", invited)
            .set("failed_count", failed)
            .set("next_target_index", end);

        Ok(result.build())
    }
}
