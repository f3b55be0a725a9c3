//! Loads the demo account roster from a JSON file into an in-memory
//! [`AccountRepository`], standing in for the external onboarding flow
//! that owns account lifecycle in a real deployment.

use std::path::Path;

use anyhow::{Context, Result};
use fleet_core::Account;
use fleet_core::repository::memory::InMemoryAccountRepository;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct AccountSeed {
    id: i64,
    phone: String,
    owner: String,
    #[serde(default)]
    proxy_id: Option<i64>,
}

/// Reads a JSON array of `{id, phone, owner, proxy_id?}` objects.
pub async fn load(path: &Path) -> Result<InMemoryAccountRepository> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read accounts file '{}'", path.display()))?;
    let seeds: Vec<AccountSeed> =
        serde_json::from_str(&content).context("accounts file is not a valid JSON array")?;

    let mut repo = InMemoryAccountRepository::new();
    for seed in seeds {
        let mut account = Account::new(seed.id, seed.phone, seed.owner);
        account.proxy_id = seed.proxy_id;
        repo = repo.with_account(account);
    }
    Ok(repo)
}
