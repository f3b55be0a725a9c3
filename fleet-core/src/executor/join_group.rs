//! `join_group` (§4.2): ensure membership in a group by username or
//! joinchat/+hash link, treating `USER_ALREADY_PARTICIPANT` as success.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ExecutionContext, ResultBuilder, TaskExecutor};
use crate::error::PoolError;
use crate::session_client::SessionHandle;

#[derive(Debug, Deserialize)]
struct Config {
    target: String,
}

pub struct JoinGroupExecutor;

#[async_trait]
impl TaskExecutor for JoinGroupExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        handle: Arc<dyn SessionHandle>,
    ) -> Result<Value, PoolError> {
        let config: Config = ctx.parse_config()?;
        let mut result = ResultBuilder::new();

        match handle.join_group(&config.target).await {
            Ok(()) => {
                result.log(format!("joined {}", config.target)).set("joined", true);
            }
            Err(err) if err.message.to_uppercase().contains("USER_ALREADY_PARTICIPANT") => {
                result
                    .log(format!("already a member of {}", config.target))
                    .set("joined", true);
            }
            Err(err) => return Err(err),
        }

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
    async fn join_reports_success() {
        let session = MockSession::new(1);
        let ctx = ExecutionContext::new(
            Uuid::now_v7(),
            1,
            serde_json::json!({"target": "somegroup"}),
            CancellationToken::new(),
        );
        let result = JoinGroupExecutor.execute(&ctx, session).await.unwrap();
        assert_eq!(result["joined"], true);
    }
}
