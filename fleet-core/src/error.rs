//! Cross-cutting error taxonomy.
//!
//! Every component in this crate surfaces failures through [`ErrorKind`], a
//! small classification enum consumed by the risk controller and persisted
//! (as a short code plus the original message) by the scheduler. [`PoolError`]
//! is the concrete error type returned by the public pool/scheduler APIs; it
//! always carries a kind so callers never need to pattern-match on message
//! text themselves.

use thiserror::Error;

/// Coarse classification of a failure, independent of which component raised it.
///
/// The risk controller (`crate::risk`) maps inbound error strings onto these
/// kinds (see [`ErrorKind::classify`]); the pool and scheduler propagate
/// whichever kind a lower layer already assigned rather than reclassifying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller's context was cancelled while waiting or executing.
    Cancelled,
    /// A connection never reached `connected` within the bounded wait.
    ConnectionTimeout,
    /// The connection instance being waited on was replaced by a reconnect.
    ConnectionReplaced,
    /// Another task already holds the account's busy slot.
    AccountBusy,
    /// No cached client config and the repository lookup also failed.
    ConfigMissing,
    /// The session is no longer authenticated (revoked, deactivated, banned auth key).
    Unauthenticated,
    /// Server-enforced rate limiting (flood wait, slow mode, peer flood).
    RateLimited,
    /// The account is restricted from the requested action.
    Restricted,
    /// The account is permanently dead (deactivated, banned, revoked).
    Banned,
    /// The caller supplied invalid task configuration.
    InvalidInput,
    /// Anything else; treated as retryable at the pool layer up to budget.
    Transient,
}

impl ErrorKind {
    /// Classify a raw upstream error message the way the risk controller does.
    ///
    /// Matching is case-insensitive and prefix-independent: the pattern only
    /// needs to appear somewhere in the uppercased message.
    pub fn classify(message: &str) -> Self {
        let upper = message.to_uppercase();
        const DEAD: &[&str] = &[
            "AUTH_KEY_UNREGISTERED",
            "USER_DEACTIVATED",
            "PHONE_NUMBER_BANNED",
            "SESSION_REVOKED",
        ];
        const RATE_LIMITED: &[&str] = &["FLOOD_WAIT", "SLOWMODE_WAIT", "PEER_FLOOD"];
        const RESTRICTED: &[&str] = &["CHAT_WRITE_FORBIDDEN", "USER_RESTRICTED", "CHAT_RESTRICTED"];

        if DEAD.iter().any(|p| upper.contains(p)) {
            return ErrorKind::Banned;
        }
        if RATE_LIMITED.iter().any(|p| upper.contains(p)) {
            return ErrorKind::RateLimited;
        }
        if RESTRICTED.iter().any(|p| upper.contains(p)) {
            return ErrorKind::Restricted;
        }
        ErrorKind::Transient
    }

    /// Whether the pool should retry an operation carrying this kind.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::Transient | ErrorKind::ConnectionTimeout | ErrorKind::ConnectionReplaced
        )
    }
}

/// The crate's unified error type.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct PoolError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PoolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn connection_timeout() -> Self {
        Self::new(
            ErrorKind::ConnectionTimeout,
            "connection did not become ready within the bounded wait",
        )
    }

    pub fn connection_replaced() -> Self {
        Self::new(
            ErrorKind::ConnectionReplaced,
            "connection instance was replaced by a reconnect",
        )
    }

    pub fn account_busy() -> Self {
        Self::new(ErrorKind::AccountBusy, "account already has a task running")
    }

    pub fn config_missing(account_key: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::ConfigMissing,
            format!("no client config available for account {account_key}"),
        )
    }

    /// Build a `PoolError` from an upstream message, classifying it along the way.
    pub fn from_upstream(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = ErrorKind::classify(&message);
        Self::new(kind, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_dead_patterns_regardless_of_case() {
        assert_eq!(
            ErrorKind::classify("auth_key_unregistered"),
            ErrorKind::Banned
        );
        assert_eq!(
            ErrorKind::classify("420 USER_DEACTIVATED blah"),
            ErrorKind::Banned
        );
    }

    #[test]
    fn classifies_rate_limit_patterns() {
        assert_eq!(ErrorKind::classify("FLOOD_WAIT_30"), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::classify("peer_flood"), ErrorKind::RateLimited);
    }

    #[test]
    fn classifies_restricted_patterns() {
        assert_eq!(
            ErrorKind::classify("CHAT_WRITE_FORBIDDEN"),
            ErrorKind::Restricted
        );
    }

    #[test]
    fn falls_back_to_transient() {
        assert_eq!(ErrorKind::classify("anything else"), ErrorKind::Transient);
    }

    #[test]
    fn recoverable_kinds() {
        assert!(ErrorKind::Transient.is_recoverable());
        assert!(ErrorKind::ConnectionTimeout.is_recoverable());
        assert!(ErrorKind::ConnectionReplaced.is_recoverable());
        assert!(!ErrorKind::Banned.is_recoverable());
        assert!(!ErrorKind::AccountBusy.is_recoverable());
    }

    #[test]
    fn from_upstream_sets_message_and_kind() {
        let err = PoolError::from_upstream("FLOOD_WAIT_30");
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(err.message, "FLOOD_WAIT_30");
    }
}
