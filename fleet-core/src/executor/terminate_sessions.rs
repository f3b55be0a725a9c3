//! `terminate_sessions` (§4.2): kick all other authorized sessions.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{ExecutionContext, ResultBuilder, TaskExecutor};
use crate::error::PoolError;
use crate::session_client::SessionHandle;

pub struct TerminateSessionsExecutor;

#[async_trait]
impl TaskExecutor for TerminateSessionsExecutor {
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        handle: Arc<dyn SessionHandle>,
    ) -> Result<Value, PoolError> {
        let mut result = ResultBuilder::new();

        let authorizations = handle.list_authorizations().await?;
        for auth in &authorizations {
            result.log(format!(
                "session: {} on {} (current={})",
                auth.device_model, auth.platform, auth.current
            ));
        }

        let terminated = handle.reset_authorizations().await?;
        result
            .log(format!("terminated {terminated} other session(s)"))
            .set("terminated_count", terminated)
            .set("enumerated_count", authorizations.len() as u32);

        Ok(result.build())
    }
}
