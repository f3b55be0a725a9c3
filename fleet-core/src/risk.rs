//! Risk Controller (§4.5): the rule-based state machine that maps task and
//! connection outcomes onto [`AccountStatus`] transitions.
//!
//! Classification reuses [`ErrorKind::classify`] so the pool, the scheduler,
//! and this controller never disagree on what a given upstream message means.

use chrono::Utc;

use crate::account::{Account, AccountStatus};
use crate::error::ErrorKind;

/// `onSuccess ⇒ normal (from warning/new)`.
fn apply_success(account: &mut Account) {
    account.consecutive_failures = 0;
    if matches!(account.status, AccountStatus::Warning | AccountStatus::New) {
        account.status = AccountStatus::Normal;
    }
    account.last_check_at = Some(Utc::now());
}

/// Extract the last contiguous run of digits in `message`, e.g. the `30` in
/// `FLOOD_WAIT_30`. Left unset (per the cooling-until Open Question
/// resolution) when no digit run is present.
fn parse_wait_seconds(message: &str) -> Option<i64> {
    let mut current = String::new();
    let mut last: Option<String> = None;
    for ch in message.chars().chain(std::iter::once(' ')) {
        if ch.is_ascii_digit() {
            current.push(ch);
        } else if !current.is_empty() {
            last = Some(std::mem::take(&mut current));
        }
    }
    last.and_then(|s| s.parse::<i64>().ok())
}

/// Shared classification logic for both connection-level and task-level
/// failures. `allow_restricted` gates the "task-only restricted patterns"
/// rule (§4.5): a bare connection error never downgrades an account to
/// `restricted`, only a task failure does.
fn apply_error(account: &mut Account, message: &str, allow_restricted: bool) {
    let kind = ErrorKind::classify(message);
    match kind {
        ErrorKind::Banned => {
            account.status = AccountStatus::Dead;
        }
        ErrorKind::RateLimited => {
            account.status = AccountStatus::Cooling;
            account.cooling_until = parse_wait_seconds(message)
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        }
        ErrorKind::Restricted if allow_restricted => {
            account.status = AccountStatus::Restricted;
        }
        _ => {
            account.consecutive_failures += 1;
            if matches!(account.status, AccountStatus::Normal | AccountStatus::New) {
                account.status = AccountStatus::Warning;
            }
        }
    }
    account.last_check_at = Some(Utc::now());
}

/// Rule-based risk control (§4.5). Holds no state of its own; every
/// transition reads and writes the [`Account`] passed in, so it is cheap to
/// share across every connection the pool manages.
#[derive(Debug, Default, Clone, Copy)]
pub struct RiskController;

impl RiskController {
    pub fn new() -> Self {
        Self
    }

    /// A connection-level success (identity probe, update-loop entry).
    pub fn on_success(&self, account: &mut Account) {
        apply_success(account);
    }

    /// A connection-level failure (identity probe, the maintenance loop's
    /// `client.run` error path). Restricted patterns are task-only here.
    pub fn on_error(&self, account: &mut Account, message: &str) {
        apply_error(account, message, false);
    }

    /// A task execution's success outcome.
    pub fn on_task_success(&self, account: &mut Account) {
        apply_success(account);
    }

    /// A task execution's failure outcome. Unlike [`Self::on_error`], task
    /// failures can carry the account into `restricted`.
    pub fn on_task_error(&self, account: &mut Account, message: &str) {
        apply_error(account, message, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new(1, "+100000", "owner")
    }

    #[test]
    fn dead_patterns_kill_the_account_regardless_of_source() {
        let mut acct = account();
        RiskController.on_error(&mut acct, "AUTH_KEY_UNREGISTERED");
        assert_eq!(acct.status, AccountStatus::Dead);

        let mut acct = account();
        RiskController.on_task_error(&mut acct, "USER_DEACTIVATED");
        assert_eq!(acct.status, AccountStatus::Dead);
    }

    #[test]
    fn rate_limit_patterns_cool_the_account_with_parsed_deadline() {
        let mut acct = account();
        let before = Utc::now();
        RiskController.on_error(&mut acct, "FLOOD_WAIT_30");
        assert_eq!(acct.status, AccountStatus::Cooling);
        let until = acct.cooling_until.expect("deadline should be parsed");
        assert!(until >= before + chrono::Duration::seconds(29));
        assert!(until <= before + chrono::Duration::seconds(31));
    }

    #[test]
    fn unparseable_rate_limit_message_leaves_cooling_until_unset() {
        let mut acct = account();
        RiskController.on_error(&mut acct, "PEER_FLOOD");
        assert_eq!(acct.status, AccountStatus::Cooling);
        assert!(acct.cooling_until.is_none());
    }

    #[test]
    fn restricted_patterns_only_apply_from_task_failures() {
        let mut acct = account();
        RiskController.on_error(&mut acct, "CHAT_WRITE_FORBIDDEN");
        assert_eq!(acct.status, AccountStatus::Warning);

        let mut acct = account();
        RiskController.on_task_error(&mut acct, "CHAT_WRITE_FORBIDDEN");
        assert_eq!(acct.status, AccountStatus::Restricted);
    }

    #[test]
    fn other_errors_warn_only_from_normal_or_new() {
        let mut acct = account();
        acct.status = AccountStatus::Normal;
        RiskController.on_error(&mut acct, "some transient blip");
        assert_eq!(acct.status, AccountStatus::Warning);
        assert_eq!(acct.consecutive_failures, 1);

        let mut restricted = account();
        restricted.status = AccountStatus::Restricted;
        RiskController.on_error(&mut restricted, "some transient blip");
        assert_eq!(restricted.status, AccountStatus::Restricted);
    }

    #[test]
    fn success_resets_warning_and_new_back_to_normal() {
        let mut acct = account();
        acct.status = AccountStatus::Warning;
        acct.consecutive_failures = 3;
        RiskController.on_success(&mut acct);
        assert_eq!(acct.status, AccountStatus::Normal);
        assert_eq!(acct.consecutive_failures, 0);

        let mut new_acct = account();
        RiskController.on_task_success(&mut new_acct);
        assert_eq!(new_acct.status, AccountStatus::Normal);
    }

    #[test]
    fn success_does_not_resurrect_dead_or_restricted_accounts() {
        let mut dead = account();
        dead.status = AccountStatus::Dead;
        RiskController.on_success(&mut dead);
        assert_eq!(dead.status, AccountStatus::Dead);

        let mut restricted = account();
        restricted.status = AccountStatus::Restricted;
        RiskController.on_success(&mut restricted);
        assert_eq!(restricted.status, AccountStatus::Restricted);
    }
}
