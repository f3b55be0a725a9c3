//! `update_2fa` (§4.2, §9 "SRP password update"): verifies the current 2FA
//! password (if any) then installs a new one via the SRP verifier KDF in
//! [`crate::srp`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ExecutionContext, ResultBuilder, TaskExecutor};
use crate::error::{ErrorKind, PoolError};
use crate::session_client::SessionHandle;
use crate::srp;

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    old_password: Option<String>,
    new_password: String,
    #[serde(default)]
    hint: Option<String>,
}

pub struct Update2faExecutor;

#[async_trait]
impl TaskExecutor for Update2faExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        handle: Arc<dyn SessionHandle>,
    ) -> Result<Value, PoolError> {
        let config: Config = ctx.parse_config()?;
        let mut result = ResultBuilder::new();

        ctx.check_cancelled().await?;
        let info = handle.get_password_info().await?;

        if info.has_password {
            let current = config.old_password.as_deref().ok_or_else(|| {
                PoolError::new(
                    ErrorKind::InvalidInput,
                    "account has a 2FA password set; old_password is required",
                )
            })?;
            let verified = handle.verify_password(current).await?;
            if !verified {
                result.log("current password verification failed");
                result.set("status", "rejected");
                return Ok(result.build());
            }
            result.log("current password verified");
        }

        ctx.check_cancelled().await?;
        let verifier = srp::derive_verifier(&config.new_password, &info.new_algo_salt2);
        handle
            .update_password(verifier, info.new_algo_salt1.clone(), config.hint.clone())
            .await?;

        result
            .log("2FA password updated")
            .set("status", "updated")
            .set("had_prior_password", info.has_password);

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
    async fn sets_a_new_password_when_none_was_set() {
        let session = MockSession::new(1);
        let ctx = ExecutionContext::new(
            Uuid::now_v7(),
            1,
            serde_json::json!({"new_password": "hunter2"}),
            CancellationToken::new(),
        );
        let result = Update2faExecutor.execute(&ctx, session).await.unwrap();
        assert_eq!(result["status"], "updated");
        assert_eq!(result["had_prior_password"], false);
    }

    #[tokio::test]
    async fn rejects_when_old_password_is_missing() {
        let session = MockSession::new(1);
        session.correct_password.lock().await.replace("old".to_string());
        let ctx = ExecutionContext::new(
            Uuid::now_v7(),
            1,
            serde_json::json!({"new_password": "hunter3"}),
            CancellationToken::new(),
        );
        let err = Update2faExecutor.execute(&ctx, session).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn rejects_when_old_password_is_wrong() {
        let session = MockSession::new(1);
        session.correct_password.lock().await.replace("old".to_string());
        let ctx = ExecutionContext::new(
            Uuid::now_v7(),
            1,
            serde_json::json!({"new_password": "hunter3", "old_password": "wrong"}),
            CancellationToken::new(),
        );
        let result = Update2faExecutor.execute(&ctx, session).await.unwrap();
        assert_eq!(result["status"], "rejected");
    }

    #[tokio::test]
    async fn updates_after_correct_old_password() {
        let session = MockSession::new(1);
        session.correct_password.lock().await.replace("old".to_string());
        let ctx = ExecutionContext::new(
            Uuid::now_v7(),
            1,
            serde_json::json!({"new_password": "hunter3", "old_password": "old"}),
            CancellationToken::new(),
        );
        let result = Update2faExecutor.execute(&ctx, session).await.unwrap();
        assert_eq!(result["status"], "updated");
        assert_eq!(result["had_prior_password"], true);
    }
}
