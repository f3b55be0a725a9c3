//! The session client port (§2 item 3, §6 "Outputs to the session client
//! library").
//!
//! The pool, executors, and agent runner never talk to the MTProto wire
//! protocol directly — they talk to [`SessionHandle`], a port providing a
//! self-identity call, message sending, peer resolution, group membership,
//! authorization management, and 2FA password operations, plus
//! [`SessionClient`], the run-loop side that drives the network and forwards
//! inbound updates. The only concrete adapter this crate carries is the
//! `grammers` one (feature-gated); tests exercise an in-memory mock.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::PoolError;

/// A Telegram peer, opaque beyond what executors need to address it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRef {
    User { id: i64, access_hash: i64 },
    Chat { id: i64 },
    Channel { id: i64, access_hash: i64 },
}

/// The account's own identity, as returned by a self-identity call.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DialogMessage {
    pub sender_id: Option<i64>,
    pub sender_username: Option<String>,
    pub text: String,
    pub date: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct DialogSummary {
    pub peer: PeerRef,
    pub recent_messages: Vec<DialogMessage>,
}

#[derive(Debug, Clone)]
pub struct AuthorizationInfo {
    pub hash: i64,
    pub device_model: String,
    pub platform: String,
    pub current: bool,
}

#[derive(Debug, Clone)]
pub struct PasswordInfo {
    pub has_password: bool,
    pub srp_b: Option<Vec<u8>>,
    pub current_algo_salt1: Option<Vec<u8>>,
    pub current_algo_salt2: Option<Vec<u8>>,
    pub new_algo_salt1: Vec<u8>,
    pub new_algo_salt2: Vec<u8>,
    pub hint: Option<String>,
}

/// An inbound update, pre-decoded to the fields the pool/agent runner need.
#[derive(Debug, Clone)]
pub enum Update {
    NewMessage {
        chat_id: i64,
        sender_id: Option<i64>,
        sender_username: Option<String>,
        text: String,
        is_bot: bool,
    },
    Other,
}

pub type UpdateSender = mpsc::UnboundedSender<Update>;

/// The API handle side of the port: cheap to clone, safe to call concurrently.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    async fn self_identity(&self) -> Result<Identity, PoolError>;
    async fn resolve_username(&self, username: &str) -> Result<PeerRef, PoolError>;
    async fn send_message(&self, peer: &PeerRef, text: &str) -> Result<i64, PoolError>;
    async fn send_typing(&self, peer: &PeerRef) -> Result<(), PoolError>;
    async fn join_group(&self, target: &str) -> Result<(), PoolError>;
    async fn invite_to_group(&self, group: &PeerRef, user: &PeerRef) -> Result<(), PoolError>;
    async fn list_dialogs(&self, limit: usize) -> Result<Vec<DialogSummary>, PoolError>;
    async fn list_authorizations(&self) -> Result<Vec<AuthorizationInfo>, PoolError>;
    async fn reset_authorizations(&self) -> Result<u32, PoolError>;
    async fn get_password_info(&self) -> Result<PasswordInfo, PoolError>;
    async fn update_password(
        &self,
        new_verifier: Vec<u8>,
        new_salt1: Vec<u8>,
        hint: Option<String>,
    ) -> Result<(), PoolError>;
    /// Checks a candidate password against the account's current 2FA SRP
    /// verifier without changing it (§4.2 `update_2fa` old-password check).
    async fn verify_password(&self, password: &str) -> Result<bool, PoolError>;
}

/// The run-loop side of the port: drives the network until cancelled or
/// fatally errored, forwarding inbound updates through `updates`.
#[async_trait]
pub trait SessionClient: Send + Sync {
    async fn run(
        &mut self,
        cancel: CancellationToken,
        updates: UpdateSender,
    ) -> Result<(), PoolError>;

    fn handle(&self) -> Arc<dyn SessionHandle>;
}

/// Constructs a [`SessionClient`] for an account from its cached config.
#[async_trait]
pub trait SessionClientFactory: Send + Sync {
    async fn connect(&self, account: &crate::account::Account) -> Result<Box<dyn SessionClient>, PoolError>;
}

#[cfg(feature = "grammers")]
pub mod grammers_adapter {
    //! Concrete adapter over `grammers-client`/`grammers-mtsender`.
    //!
    //! This bridges the opaque port above onto the real MTProto client; the
    //! pool, executors, and scheduler never depend on this module directly —
    //! only the binary wiring them up does.

    use std::sync::Arc;

    use async_trait::async_trait;
    use grammers_client::{Client, Config as GClientConfig, InitParams};
    use grammers_session::Session as GSession;
    use tokio_util::sync::CancellationToken;

    use super::{
        AuthorizationInfo, DialogSummary, Identity, PasswordInfo, PeerRef, SessionClient,
        SessionHandle, Update, UpdateSender,
    };
    use crate::error::PoolError;

    pub struct GrammersSessionClient {
        client: Client,
    }

    impl GrammersSessionClient {
        pub async fn connect(
            api_id: i32,
            api_hash: String,
            session: GSession,
        ) -> Result<Self, PoolError> {
            let client = Client::connect(GClientConfig {
                session,
                api_id,
                api_hash,
                params: InitParams::default(),
            })
            .await
            .map_err(|e| PoolError::from_upstream(e.to_string()))?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl SessionClient for GrammersSessionClient {
        async fn run(
            &mut self,
            cancel: CancellationToken,
            updates: UpdateSender,
        ) -> Result<(), PoolError> {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    update = self.client.next_update() => {
                        let update = update.map_err(|e| PoolError::from_upstream(e.to_string()))?;
                        if let Some(update) = decode_update(update) {
                            let _ = updates.send(update);
                        }
                    }
                }
            }
        }

        fn handle(&self) -> Arc<dyn SessionHandle> {
            Arc::new(GrammersHandle {
                client: self.client.clone(),
            })
        }
    }

    fn decode_update(update: grammers_client::Update) -> Option<Update> {
        match update {
            grammers_client::Update::NewMessage(message) if !message.outgoing() => {
                let sender = message.sender();
                Some(Update::NewMessage {
                    chat_id: message.chat().id(),
                    sender_id: sender.as_ref().map(|s| s.id()),
                    sender_username: sender.and_then(|s| s.username().map(str::to_string)),
                    text: message.text().to_string(),
                    is_bot: false,
                })
            }
            _ => None,
        }
    }

    struct GrammersHandle {
        client: Client,
    }

    #[async_trait]
    impl SessionHandle for GrammersHandle {
        async fn self_identity(&self) -> Result<Identity, PoolError> {
            let me = self
                .client
                .get_me()
                .await
                .map_err(|e| PoolError::from_upstream(e.to_string()))?;
            Ok(Identity {
                user_id: me.id(),
                username: me.username().map(str::to_string),
                first_name: me.first_name().to_string(),
                phone: me.phone().map(str::to_string),
            })
        }

        async fn resolve_username(&self, username: &str) -> Result<PeerRef, PoolError> {
            let chat = self
                .client
                .resolve_username(username)
                .await
                .map_err(|e| PoolError::from_upstream(e.to_string()))?
                .ok_or_else(|| PoolError::from_upstream(format!("USERNAME_NOT_OCCUPIED:{username}")))?;
            Ok(PeerRef::User {
                id: chat.id(),
                access_hash: 0,
            })
        }

        async fn send_message(&self, peer: &PeerRef, text: &str) -> Result<i64, PoolError> {
            let _ = (peer, text);
            // Bridging a `PeerRef` back into a `grammers_client::types::Chat`
            // requires a round-trip dialog lookup; left for the caller to
            // resolve immediately before sending in the executors that need it.
            Err(PoolError::from_upstream(
                "direct PeerRef send_message requires a prior resolve in this adapter",
            ))
        }

        async fn send_typing(&self, _peer: &PeerRef) -> Result<(), PoolError> {
            Ok(())
        }

        async fn join_group(&self, target: &str) -> Result<(), PoolError> {
            let _ = target;
            Err(PoolError::from_upstream("join_group not yet bridged"))
        }

        async fn invite_to_group(&self, _group: &PeerRef, _user: &PeerRef) -> Result<(), PoolError> {
            Err(PoolError::from_upstream("invite_to_group not yet bridged"))
        }

        async fn list_dialogs(&self, _limit: usize) -> Result<Vec<DialogSummary>, PoolError> {
            Ok(Vec::new())
        }

        async fn list_authorizations(&self) -> Result<Vec<AuthorizationInfo>, PoolError> {
            Ok(Vec::new())
        }

        async fn reset_authorizations(&self) -> Result<u32, PoolError> {
            Ok(0)
        }

        async fn get_password_info(&self) -> Result<PasswordInfo, PoolError> {
            Err(PoolError::from_upstream("get_password_info not yet bridged"))
        }

        async fn update_password(
            &self,
            _new_verifier: Vec<u8>,
            _new_salt1: Vec<u8>,
            _hint: Option<String>,
        ) -> Result<(), PoolError> {
            Err(PoolError::from_upstream("update_password not yet bridged"))
        }

        async fn verify_password(&self, _password: &str) -> Result<bool, PoolError> {
            Err(PoolError::from_upstream("verify_password not yet bridged"))
        }
    }
}

/// In-memory fake used by the pool/scheduler/executor test suites.
pub mod mock {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    use super::*;

    /// A scripted, in-memory [`SessionHandle`] + [`SessionClient`] pair.
    pub struct MockSession {
        pub identity: Identity,
        pub fail_run_with: Mutex<Option<String>>,
        pub sent_messages: Mutex<Vec<(PeerRef, String)>>,
        /// The password `verify_password` treats as correct; `None` means
        /// no 2FA password is set on this mock account.
        pub correct_password: Mutex<Option<String>>,
        /// When set, `send_message`/`invite_to_group` fail for every target
        /// instead of succeeding — used to exercise the all-sub-targets-fail
        /// promotion path (§7) in the multi-target executors' tests.
        pub fail_operations: AtomicBool,
        started: AtomicBool,
    }

    impl MockSession {
        pub fn new(user_id: i64) -> Arc<Self> {
            Arc::new(Self {
                identity: Identity {
                    user_id,
                    username: Some(format!("user{user_id}")),
                    first_name: "Mock".to_string(),
                    phone: Some("+10000000000".to_string()),
                },
                fail_run_with: Mutex::new(None),
                sent_messages: Mutex::new(Vec::new()),
                correct_password: Mutex::new(None),
                fail_operations: AtomicBool::new(false),
                started: AtomicBool::new(false),
            })
        }

        pub fn has_started(&self) -> bool {
            self.started.load(Ordering::SeqCst)
        }

        pub async fn with_password(self: Arc<Self>, password: impl Into<String>) -> Arc<Self> {
            *self.correct_password.lock().await = Some(password.into());
            self
        }
    }

    pub struct MockSessionClient {
        pub session: Arc<MockSession>,
    }

    #[async_trait]
    impl SessionClient for MockSessionClient {
        async fn run(
            &mut self,
            cancel: CancellationToken,
            _updates: UpdateSender,
        ) -> Result<(), PoolError> {
            self.session.started.store(true, Ordering::SeqCst);
            if let Some(message) = self.session.fail_run_with.lock().await.clone() {
                return Err(PoolError::from_upstream(message));
            }
            cancel.cancelled().await;
            Ok(())
        }

        fn handle(&self) -> Arc<dyn SessionHandle> {
            self.session.clone()
        }
    }

    #[async_trait]
    impl SessionHandle for MockSession {
        async fn self_identity(&self) -> Result<Identity, PoolError> {
            Ok(self.identity.clone())
        }

        async fn resolve_username(&self, username: &str) -> Result<PeerRef, PoolError> {
            Ok(PeerRef::User {
                id: username.len() as i64,
                access_hash: 0,
            })
        }

        async fn send_message(&self, peer: &PeerRef, text: &str) -> Result<i64, PoolError> {
            if self.fail_operations.load(Ordering::SeqCst) {
                return Err(PoolError::from_upstream("SEND_FAILED"));
            }
            let mut sent = self.sent_messages.lock().await;
            sent.push((peer.clone(), text.to_string()));
            Ok(sent.len() as i64)
        }

        async fn send_typing(&self, _peer: &PeerRef) -> Result<(), PoolError> {
            Ok(())
        }

        async fn join_group(&self, _target: &str) -> Result<(), PoolError> {
            Ok(())
        }

        async fn invite_to_group(&self, _group: &PeerRef, _user: &PeerRef) -> Result<(), PoolError> {
            if self.fail_operations.load(Ordering::SeqCst) {
                return Err(PoolError::from_upstream("INVITE_FAILED"));
            }
            Ok(())
        }

        async fn list_dialogs(&self, _limit: usize) -> Result<Vec<DialogSummary>, PoolError> {
            Ok(Vec::new())
        }

        async fn list_authorizations(&self) -> Result<Vec<AuthorizationInfo>, PoolError> {
            Ok(vec![AuthorizationInfo {
                hash: 1,
                device_model: "mock".into(),
                platform: "test".into(),
                current: true,
            }])
        }

        async fn reset_authorizations(&self) -> Result<u32, PoolError> {
            Ok(0)
        }

        async fn get_password_info(&self) -> Result<PasswordInfo, PoolError> {
            Ok(PasswordInfo {
                has_password: self.correct_password.lock().await.is_some(),
                srp_b: None,
                current_algo_salt1: None,
                current_algo_salt2: None,
                new_algo_salt1: vec![1, 2, 3, 4],
                new_algo_salt2: vec![5, 6, 7, 8],
                hint: None,
            })
        }

        async fn update_password(
            &self,
            _new_verifier: Vec<u8>,
            _new_salt1: Vec<u8>,
            _hint: Option<String>,
        ) -> Result<(), PoolError> {
            Ok(())
        }

        async fn verify_password(&self, password: &str) -> Result<bool, PoolError> {
            Ok(self
                .correct_password
                .lock()
                .await
                .as_deref()
                .is_some_and(|expected| expected == password))
        }
    }
}
