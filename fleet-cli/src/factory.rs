//! [`SessionClientFactory`] implementations for the demo binary. The core
//! crate only ships the port and the `grammers` adapter's run-loop/handle
//! pair (§2 "session client ... opaque"); bridging an [`Account`] to a live
//! connection is left to whoever wires the pool up, which is this binary.

use async_trait::async_trait;
use fleet_core::account::Account;
use fleet_core::error::PoolError;
use fleet_core::session_client::{SessionClient, SessionClientFactory};

/// Every account connects through an in-memory mock session — no network,
/// no real Telegram credentials required. Used unless `--live` is passed.
pub struct DryRunFactory;

#[async_trait]
impl SessionClientFactory for DryRunFactory {
    async fn connect(&self, account: &Account) -> Result<Box<dyn SessionClient>, PoolError> {
        let session = fleet_core::session_client::mock::MockSession::new(
            account.tg_user_id.unwrap_or(account.id),
        );
        Ok(Box::new(fleet_core::session_client::mock::MockSessionClient { session }))
    }
}

#[cfg(feature = "grammers")]
pub use live::LiveFactory;

#[cfg(feature = "grammers")]
mod live {
    use super::*;
    use fleet_core::session_client::grammers_adapter::GrammersSessionClient;
    use grammers_session::Session as GSession;

    /// Reconnects each account from its stored session blob using API
    /// credentials supplied out of band (`FLEET_API_ID`/`FLEET_API_HASH`).
    pub struct LiveFactory {
        pub api_id: i32,
        pub api_hash: String,
    }

    #[async_trait]
    impl SessionClientFactory for LiveFactory {
        async fn connect(&self, account: &Account) -> Result<Box<dyn SessionClient>, PoolError> {
            let blob = account.session_blob.as_deref().ok_or_else(|| {
                PoolError::config_missing(account.id)
            })?;
            let session = GSession::load(blob)
                .map_err(|e| PoolError::from_upstream(format!("invalid session blob: {e}")))?;
            let client =
                GrammersSessionClient::connect(self.api_id, self.api_hash.clone(), session).await?;
            Ok(Box::new(client))
        }
    }
}
