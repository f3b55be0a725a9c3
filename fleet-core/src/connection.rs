//! Managed Connection (§2 item 3, §4.1 "Connection lifecycle state machine").

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::session_client::SessionHandle;

/// `disconnected → connecting → connected → {reconnecting → connecting → …} | error`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

/// A single-slot, coalescing state-change signal: a condition variable with
/// a generation counter (§9 design note — any of the three equivalent forms
/// satisfies the contract; this crate picks this one).
#[derive(Default)]
pub struct StateSignal {
    generation: AtomicU64,
    notify: Notify,
}

impl StateSignal {
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Bump the generation and wake every waiter; waiters re-check the
    /// actual state themselves rather than trusting the wakeup alone.
    pub fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Block until the generation advances past `since`.
    pub async fn wait_for_change(&self, since: u64) {
        loop {
            if self.generation.load(Ordering::SeqCst) != since {
                return;
            }
            let notified = self.notify.notified();
            // Re-check after subscribing to avoid missing a bump that
            // happened between the load above and registering interest.
            if self.generation.load(Ordering::SeqCst) != since {
                return;
            }
            notified.await;
        }
    }
}

/// One account's live (or most recently live) MTProto session.
///
/// `executeTask` (`crate::pool::ConnectionPool::execute_task`) acquires this
/// connection's busy slot before invoking an executor, and clears it
/// unconditionally on the way out. State transitions are monotonic within
/// one lifetime; reconnect replacement starts a fresh lifetime (and thus a
/// fresh [`StateSignal`] generation baseline, though the signal struct
/// itself is reused for simplicity — callers always compare against a
/// generation they just observed, never an absolute value from a prior
/// lifetime).
pub struct ManagedConnection {
    pub account_id: i64,
    state: RwLock<ConnectionState>,
    pub signal: StateSignal,
    busy: Mutex<bool>,
    reconnect_attempts: AtomicU32,
    last_used: Mutex<DateTime<Utc>>,
    pub cancel: CancellationToken,
    handle: Mutex<Option<Arc<dyn SessionHandle>>>,
}

impl ManagedConnection {
    pub fn new(account_id: i64) -> Self {
        Self {
            account_id,
            state: RwLock::new(ConnectionState::Disconnected),
            signal: StateSignal::default(),
            busy: Mutex::new(false),
            reconnect_attempts: AtomicU32::new(0),
            last_used: Mutex::new(Utc::now()),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// A fresh connection that inherits a prior lifetime's reconnect
    /// attempt count (§4.1 reconnect policy, §9 "reconnect counter
    /// inheritance").
    pub fn with_inherited_attempts(account_id: i64, attempts: u32) -> Self {
        let conn = Self::new(account_id);
        conn.reconnect_attempts.store(attempts, Ordering::SeqCst);
        conn
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn set_state(&self, new_state: ConnectionState) {
        *self.state.write().await = new_state;
        self.signal.bump();
    }

    pub async fn set_handle(&self, handle: Arc<dyn SessionHandle>) {
        *self.handle.lock().await = Some(handle);
    }

    pub async fn handle(&self) -> Option<Arc<dyn SessionHandle>> {
        self.handle.lock().await.clone()
    }

    /// Atomically observe-and-set the busy flag; returns `true` if this
    /// caller acquired it.
    pub async fn try_acquire_busy(&self) -> bool {
        let mut busy = self.busy.lock().await;
        if *busy {
            false
        } else {
            *busy = true;
            true
        }
    }

    pub async fn release_busy(&self) {
        *self.busy.lock().await = false;
    }

    pub async fn is_busy(&self) -> bool {
        *self.busy.lock().await
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn increment_reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// A fresh authenticated lifetime clears the attempt budget (§4.1: "on
    /// connected, reset reconnect counter").
    pub fn reset_reconnect_attempts(&self) {
        self.reconnect_attempts.store(0, Ordering::SeqCst);
    }

    pub async fn touch_last_used(&self) {
        *self.last_used.lock().await = Utc::now();
    }

    pub async fn last_used(&self) -> DateTime<Utc> {
        *self.last_used.lock().await
    }

    pub async fn is_idle(&self, now: DateTime<Utc>, idle_timeout: chrono::Duration) -> bool {
        !self.is_busy().await && now - self.last_used().await > idle_timeout
    }
}

/// `min(base·2^(n-1), cap)` reconnect delay schedule (§4.1).
pub fn reconnect_delay_secs(attempt: u32, base_secs: u64, cap_secs: u64) -> u64 {
    let exp = attempt.saturating_sub(1);
    let scaled = base_secs.saturating_mul(1u64 << exp.min(32));
    scaled.min(cap_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn busy_flag_is_mutually_exclusive() {
        let conn = ManagedConnection::new(1);
        assert!(conn.try_acquire_busy().await);
        assert!(!conn.try_acquire_busy().await);
        conn.release_busy().await;
        assert!(conn.try_acquire_busy().await);
    }

    #[tokio::test]
    async fn set_state_bumps_signal_generation() {
        let conn = ManagedConnection::new(1);
        let gen0 = conn.signal.current_generation();
        conn.set_state(ConnectionState::Connecting).await;
        assert_ne!(gen0, conn.signal.current_generation());
    }

    #[tokio::test]
    async fn wait_for_change_resolves_after_bump() {
        let conn = Arc::new(ManagedConnection::new(1));
        let since = conn.signal.current_generation();
        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.signal.wait_for_change(since).await;
            })
        };
        tokio::task::yield_now().await;
        conn.set_state(ConnectionState::Connected).await;
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve")
            .unwrap();
    }

    #[test]
    fn reconnect_delay_follows_exponential_schedule_with_cap() {
        assert_eq!(reconnect_delay_secs(1, 30, 300), 30);
        assert_eq!(reconnect_delay_secs(2, 30, 300), 60);
        assert_eq!(reconnect_delay_secs(3, 30, 300), 120);
        assert_eq!(reconnect_delay_secs(4, 30, 300), 240);
        assert_eq!(reconnect_delay_secs(5, 30, 300), 300); // capped
    }

    #[tokio::test]
    async fn reconnect_attempts_are_inherited_across_lifetimes() {
        let conn = ManagedConnection::with_inherited_attempts(1, 2);
        assert_eq!(conn.reconnect_attempts(), 2);
        assert_eq!(conn.increment_reconnect_attempts(), 3);
    }

    #[tokio::test]
    async fn idle_detection_respects_busy_flag() {
        let conn = ManagedConnection::new(1);
        *conn.last_used.lock().await = Utc::now() - chrono::Duration::hours(1);
        assert!(conn.is_idle(Utc::now(), chrono::Duration::minutes(30)).await);

        conn.try_acquire_busy().await;
        assert!(!conn.is_idle(Utc::now(), chrono::Duration::minutes(30)).await);
    }
}
