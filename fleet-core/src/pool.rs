//! Connection Pool (§4.1) — the core of this crate.
//!
//! Owns one [`ManagedConnection`] per account, hides reconnection from
//! callers, serializes work on each account via the connection's busy flag,
//! and surfaces connection status. See the module-level docs on
//! [`ManagedConnection`] for the per-connection state machine this pool
//! drives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::account::Account;
use crate::config::ConnectionConfig;
use crate::connection::{ConnectionState, ManagedConnection, reconnect_delay_secs};
use crate::error::{ErrorKind, PoolError};
use crate::executor::{ExecutionContext, TaskExecutor};
use crate::repository::AccountRepository;
use crate::risk::RiskController;
use crate::session_client::{SessionClientFactory, SessionHandle, Update};

/// Registered per-account consumer of that account's inbound update stream
/// (§9 "Update-handler registry").
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle(&self, account_id: i64, update: Update);
}

#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub total_connections: usize,
    pub connected: usize,
    pub reconnecting: usize,
    pub busy: usize,
}

const MAX_CONNECTION_REPLACED_RETRIES: u32 = 3;

pub struct ConnectionPool {
    connections: RwLock<HashMap<i64, Arc<ManagedConnection>>>,
    update_handlers: RwLock<HashMap<i64, Arc<dyn UpdateHandler>>>,
    account_repo: Arc<dyn AccountRepository>,
    client_factory: Arc<dyn SessionClientFactory>,
    risk: RiskController,
    config: ConnectionConfig,
    closed: tokio_util::sync::CancellationToken,
}

impl ConnectionPool {
    /// `proxy_repo` resolution for an account is the `client_factory`'s
    /// responsibility (it owns the wire-protocol specific dial step); the
    /// pool itself only needs the account repository to validate accounts
    /// and persist risk-controller state transitions.
    pub fn new(
        account_repo: Arc<dyn AccountRepository>,
        client_factory: Arc<dyn SessionClientFactory>,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            update_handlers: RwLock::new(HashMap::new()),
            account_repo,
            client_factory,
            risk: RiskController,
            config,
            closed: CancellationToken::new(),
        });
        pool.clone().spawn_idle_reaper();
        pool
    }

    /// `executeTask` (§4.1).
    pub async fn execute_task(
        self: &Arc<Self>,
        account_id: i64,
        executor: &dyn TaskExecutor,
        ctx: &ExecutionContext,
    ) -> Result<Value, PoolError> {
        self.check_account_usable(account_id).await?;

        let mut replaced_retries = 0;
        loop {
            let conn = self.get_or_create_connection(account_id).await?;

            match self.wait_until_connected(&conn).await {
                Ok(()) => {}
                Err(err) if err.kind == ErrorKind::ConnectionReplaced => {
                    replaced_retries += 1;
                    if replaced_retries > MAX_CONNECTION_REPLACED_RETRIES {
                        return Err(err);
                    }
                    continue;
                }
                Err(err) => return Err(err),
            }

            if !conn.try_acquire_busy().await {
                return Err(PoolError::account_busy());
            }

            let handle = match conn.handle().await {
                Some(h) => h,
                None => {
                    conn.release_busy().await;
                    return Err(PoolError::config_missing(account_id));
                }
            };

            let result = executor.execute(ctx, handle).await;
            conn.touch_last_used().await;
            conn.release_busy().await;

            let mut account = self.account_repo.get(account_id).await.map_err(|e| {
                PoolError::new(ErrorKind::ConfigMissing, e.to_string())
            })?;
            match &result {
                Ok(_) => self.risk.on_task_success(&mut account),
                Err(err) => self.risk.on_task_error(&mut account, &err.message),
            }
            let _ = self.account_repo.save(&account).await;

            return result;
        }
    }

    /// `checkConnection` (§4.1) — liveness probe that also validates session
    /// authenticity via a self-identity call.
    pub async fn check_connection(self: &Arc<Self>, account_id: i64) -> Result<(), PoolError> {
        let conn = self.get_or_create_connection(account_id).await?;
        self.wait_until_connected(&conn).await?;

        let handle = conn
            .handle()
            .await
            .ok_or_else(|| PoolError::config_missing(account_id))?;

        let mut account = self
            .account_repo
            .get(account_id)
            .await
            .map_err(|e| PoolError::new(ErrorKind::ConfigMissing, e.to_string()))?;

        match handle.self_identity().await {
            Ok(identity) => {
                account.tg_user_id = Some(identity.user_id);
                account.tg_username = identity.username;
                self.risk.on_success(&mut account);
                let _ = self.account_repo.save(&account).await;
                Ok(())
            }
            Err(err) => {
                self.risk.on_error(&mut account, &err.message);
                let _ = self.account_repo.save(&account).await;
                Err(err)
            }
        }
    }

    /// `setUpdateHandler` (§4.1) — replaces any prior handler for this account.
    pub async fn set_update_handler(&self, account_id: i64, handler: Arc<dyn UpdateHandler>) {
        self.update_handlers.write().await.insert(account_id, handler);
    }

    pub async fn get_status(&self, account_id: i64) -> Option<ConnectionState> {
        let conn = self.connections.read().await.get(&account_id).cloned()?;
        Some(conn.state().await)
    }

    pub async fn is_busy(&self, account_id: i64) -> bool {
        match self.connections.read().await.get(&account_id) {
            Some(conn) => conn.is_busy().await,
            None => false,
        }
    }

    pub async fn get_stats(&self) -> PoolStats {
        let connections = self.connections.read().await;
        let mut stats = PoolStats {
            total_connections: connections.len(),
            ..Default::default()
        };
        for conn in connections.values() {
            match conn.state().await {
                ConnectionState::Connected => stats.connected += 1,
                ConnectionState::Reconnecting => stats.reconnecting += 1,
                _ => {}
            }
            if conn.is_busy().await {
                stats.busy += 1;
            }
        }
        stats
    }

    /// `close()` — cancels all maintenance contexts, clears maps; idempotent.
    pub async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        let mut connections = self.connections.write().await;
        for conn in connections.values() {
            conn.cancel.cancel();
        }
        connections.clear();
        self.update_handlers.write().await.clear();
    }

    /// Rejects dead and still-cooling accounts before any connection work
    /// starts (§3 "status∈dead⇒not selectable; cooling⇒rejected until
    /// cooling-until elapses"). A cooling rejection surfaces `RateLimited`
    /// so the scheduler can defer re-dispatch per §7.
    async fn check_account_usable(&self, account_id: i64) -> Result<(), PoolError> {
        let account = self
            .account_repo
            .get(account_id)
            .await
            .map_err(|_| PoolError::config_missing(account_id))?;
        let now = chrono::Utc::now();
        if account.status == crate::account::AccountStatus::Dead {
            return Err(PoolError::new(ErrorKind::Banned, "account is dead"));
        }
        if account.is_cooling(now) {
            return Err(PoolError::new(
                ErrorKind::RateLimited,
                "account is cooling down",
            ));
        }
        Ok(())
    }

    async fn get_or_create_connection(
        self: &Arc<Self>,
        account_id: i64,
    ) -> Result<Arc<ManagedConnection>, PoolError> {
        if let Some(conn) = self.connections.read().await.get(&account_id) {
            return Ok(conn.clone());
        }

        let mut connections = self.connections.write().await;
        if let Some(conn) = connections.get(&account_id) {
            return Ok(conn.clone());
        }

        // Verify the account is reachable via the repository before
        // starting maintenance (`ConfigMissing` if the lookup fails).
        self.account_repo
            .get(account_id)
            .await
            .map_err(|_| PoolError::config_missing(account_id))?;

        let conn = Arc::new(ManagedConnection::new(account_id));
        connections.insert(account_id, conn.clone());
        drop(connections);

        self.clone().spawn_maintenance(conn.clone());
        Ok(conn)
    }

    /// Blocks until `conn` reaches `Connected`, or fails per §4.1's waiting
    /// semantics: error state surfaces a classified failure, cancellation of
    /// the connection's own context (replaced by a reconnect) surfaces
    /// `ConnectionReplaced`, and the bounded wait timer surfaces
    /// `ConnectionTimeout`.
    async fn wait_until_connected(&self, conn: &Arc<ManagedConnection>) -> Result<(), PoolError> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.connect_wait_secs);
        loop {
            match conn.state().await {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Error => {
                    return Err(PoolError::new(
                        ErrorKind::Transient,
                        "connection entered error state",
                    ));
                }
                _ => {}
            }
            if conn.cancel.is_cancelled() {
                return Err(PoolError::connection_replaced());
            }

            let since = conn.signal.current_generation();
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(PoolError::connection_timeout());
            }
            tokio::select! {
                _ = conn.signal.wait_for_change(since) => {}
                _ = tokio::time::sleep(deadline - now) => return Err(PoolError::connection_timeout()),
            }
        }
    }

    fn spawn_maintenance(self: Arc<Self>, conn: Arc<ManagedConnection>) {
        let account_id = conn.account_id;
        tokio::spawn(async move {
            self.run_connection(account_id, conn).await;
        });
    }

    async fn run_connection(self: Arc<Self>, account_id: i64, conn: Arc<ManagedConnection>) {
        loop {
            if conn.cancel.is_cancelled() {
                conn.set_state(ConnectionState::Disconnected).await;
                return;
            }

            conn.set_state(ConnectionState::Connecting).await;

            let account = match self.account_repo.get(account_id).await {
                Ok(a) => a,
                Err(_) => {
                    conn.set_state(ConnectionState::Error).await;
                    self.remove_connection(account_id).await;
                    return;
                }
            };

            let mut client = match self.client_factory.connect(&account).await {
                Ok(c) => c,
                Err(err) => {
                    if self.reconnect_or_give_up(&conn, &err).await {
                        return;
                    }
                    continue;
                }
            };

            conn.set_handle(client.handle()).await;
            conn.set_state(ConnectionState::Connected).await;
            conn.reset_reconnect_attempts();

            {
                let mut account = account;
                self.risk.on_success(&mut account);
                let _ = self.account_repo.save(&account).await;
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let dispatch = self.clone().spawn_update_dispatch(account_id, rx);

            let run_result = client.run(conn.cancel.clone(), tx).await;
            dispatch.abort();

            match run_result {
                Ok(()) => {
                    conn.set_state(ConnectionState::Disconnected).await;
                    return;
                }
                Err(err) => {
                    conn.set_state(ConnectionState::Reconnecting).await;
                    let mut account = match self.account_repo.get(account_id).await {
                        Ok(a) => a,
                        Err(_) => return,
                    };
                    account.online = false;
                    self.risk.on_error(&mut account, &err.message);
                    let _ = self.account_repo.save(&account).await;

                    if self.reconnect_or_give_up(&conn, &err).await {
                        return;
                    }
                }
            }
        }
    }

    /// Returns `true` if the caller should stop (budget exhausted / cancelled).
    async fn reconnect_or_give_up(&self, conn: &Arc<ManagedConnection>, _err: &PoolError) -> bool {
        let attempts = conn.increment_reconnect_attempts();
        if attempts > self.config.max_reconnect_attempts {
            self.remove_connection(conn.account_id).await;
            return true;
        }

        let delay = reconnect_delay_secs(
            attempts,
            self.config.reconnect_base_secs,
            self.config.reconnect_cap_secs,
        );
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(delay)) => false,
            _ = conn.cancel.cancelled() => {
                conn.set_state(ConnectionState::Disconnected).await;
                true
            }
        }
    }

    async fn remove_connection(&self, account_id: i64) {
        let mut account = match self.account_repo.get(account_id).await {
            Ok(a) => a,
            Err(_) => return,
        };
        account.online = false;
        let _ = self.account_repo.save(&account).await;
        self.connections.write().await.remove(&account_id);
    }

    fn spawn_update_dispatch(
        self: Arc<Self>,
        account_id: i64,
        mut rx: mpsc::UnboundedReceiver<Update>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let handler = self.update_handlers.read().await.get(&account_id).cloned();
                if let Some(handler) = handler {
                    handler.handle(account_id, update).await;
                }
            }
        })
    }

    /// Idle reaping sweep (§4.1, every `idle_sweep_interval_secs`).
    fn spawn_idle_reaper(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.idle_sweep_interval_secs);
        let idle_timeout = chrono::Duration::seconds(self.config.idle_timeout_secs as i64);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = self.closed.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let now = chrono::Utc::now();
                let idle: Vec<(i64, Arc<ManagedConnection>)> = {
                    let connections = self.connections.read().await;
                    let mut found = Vec::new();
                    for (id, conn) in connections.iter() {
                        if conn.is_idle(now, idle_timeout).await {
                            found.push((*id, conn.clone()));
                        }
                    }
                    found
                };
                for (id, conn) in idle {
                    conn.cancel.cancel();
                    self.connections.write().await.remove(&id);
                }
            }
        });
    }

    #[cfg(test)]
    fn account_repo(&self) -> &Arc<dyn AccountRepository> {
        &self.account_repo
    }
}
