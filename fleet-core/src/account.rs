//! Account entity — the unit the connection pool, scheduler, and risk
//! controller all key their state by.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account lifecycle status (see DATA MODEL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    New,
    Normal,
    Warning,
    Restricted,
    Dead,
    Cooling,
    Maintenance,
}

impl AccountStatus {
    /// `status∈dead⇒not selectable`.
    pub fn is_selectable(self) -> bool {
        self != AccountStatus::Dead
    }
}

/// A single Telegram user account under management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub phone: String,
    pub owner: String,
    /// Opaque serialized MTProto session state; written through on change.
    pub session_blob: Option<Vec<u8>>,
    pub proxy_id: Option<i64>,
    pub status: AccountStatus,
    pub online: bool,
    pub consecutive_failures: u32,
    pub cooling_until: Option<DateTime<Utc>>,
    pub has_2fa: bool,
    pub two_fa_password: Option<String>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Telegram-side identity fields, refreshed opportunistically on connect.
    pub tg_user_id: Option<i64>,
    pub tg_username: Option<String>,
}

impl Account {
    pub fn new(id: i64, phone: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id,
            phone: phone.into(),
            owner: owner.into(),
            session_blob: None,
            proxy_id: None,
            status: AccountStatus::New,
            online: false,
            consecutive_failures: 0,
            cooling_until: None,
            has_2fa: false,
            two_fa_password: None,
            last_check_at: None,
            last_used_at: None,
            tg_user_id: None,
            tg_username: None,
        }
    }

    /// `cooling⇒rejected until cooling-until elapses`.
    pub fn is_cooling(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, AccountStatus::Cooling)
            && self.cooling_until.is_some_and(|until| now < until)
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status.is_selectable() && !self.is_cooling(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_accounts_are_never_selectable() {
        assert!(!AccountStatus::Dead.is_selectable());
        assert!(AccountStatus::Normal.is_selectable());
        assert!(AccountStatus::Cooling.is_selectable());
    }

    #[test]
    fn cooling_rejects_until_deadline_elapses() {
        let mut acct = Account::new(1, "+100000", "owner");
        acct.status = AccountStatus::Cooling;
        let now = Utc::now();
        acct.cooling_until = Some(now + chrono::Duration::seconds(30));
        assert!(acct.is_cooling(now));
        assert!(!acct.is_usable(now));

        let later = now + chrono::Duration::seconds(31);
        assert!(!acct.is_cooling(later));
        assert!(acct.is_usable(later));
    }

    #[test]
    fn new_account_defaults() {
        let acct = Account::new(7, "+1", "alice");
        assert_eq!(acct.status, AccountStatus::New);
        assert!(!acct.online);
        assert_eq!(acct.consecutive_failures, 0);
    }
}
