//! Demo binary: loads configuration and an account roster, wires a
//! [`ConnectionPool`] and [`TaskScheduler`] together, and either runs them
//! as a long-lived worker or submits one task and prints its result.
//!
//! There is no HTTP/WebSocket surface here (out of scope, §1) — this is
//! the "coherent library rather than a pile of traits" demo the core
//! crate's own docs call for, not an operator-facing product.

mod accounts;
mod executors;
mod factory;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleet_core::repository::memory::{InMemoryTaskLogRepository, InMemoryTaskRepository};
use fleet_core::repository::TaskRepository;
use fleet_core::{Config, ConnectionPool, Task, TaskScheduler, TaskStatus, TaskType};

#[derive(Parser)]
#[command(name = "fleet")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file (falls back to `Config::load`'s search path).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON file of `{id, phone, owner, proxy_id?}` account seeds.
    #[arg(short, long, default_value = "accounts.json")]
    accounts: PathBuf,

    /// Connect real Telegram sessions instead of the in-memory mock.
    #[cfg(feature = "grammers")]
    #[arg(long)]
    live: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the pool and scheduler, dispatching due tasks until interrupted.
    Serve,
    /// Submit one task, wait for it to reach a terminal status, print the result.
    Submit {
        /// One of the `TaskType` variants in snake_case (e.g. `account_check`).
        task_type: String,
        /// Comma-separated account ids this task runs against.
        #[arg(long, value_delimiter = ',')]
        account: Vec<i64>,
        /// Task config payload as a JSON object.
        #[arg(long, default_value = "{}")]
        task_config: String,
        #[arg(long, default_value_t = 5)]
        priority: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from(path).context("failed to load config file")?,
        None => Config::load().context("failed to load config")?,
    };

    let account_repo = Arc::new(
        accounts::load(&args.accounts)
            .await
            .context("failed to load accounts file")?,
    );

    #[cfg(feature = "grammers")]
    let pool: Arc<ConnectionPool> = if args.live {
        let api_id: i32 = std::env::var("FLEET_API_ID")
            .context("FLEET_API_ID must be set for --live")?
            .parse()
            .context("FLEET_API_ID must be an integer")?;
        let api_hash = std::env::var("FLEET_API_HASH").context("FLEET_API_HASH must be set for --live")?;
        ConnectionPool::new(
            account_repo,
            Arc::new(factory::LiveFactory { api_id, api_hash }),
            config.connection.clone(),
        )
    } else {
        ConnectionPool::new(account_repo, Arc::new(factory::DryRunFactory), config.connection.clone())
    };
    #[cfg(not(feature = "grammers"))]
    let pool: Arc<ConnectionPool> =
        ConnectionPool::new(account_repo, Arc::new(factory::DryRunFactory), config.connection.clone());

    let task_repo: Arc<dyn TaskRepository> = Arc::new(InMemoryTaskRepository::new());
    let log_repo = Arc::new(InMemoryTaskLogRepository::new());
    let scheduler = TaskScheduler::new(
        pool,
        task_repo.clone(),
        log_repo,
        executors::build(config.agent.clone()),
        config.scheduler.clone(),
    );

    match args.command {
        Commands::Serve => {
            tracing::info!("scheduler running, press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("failed to wait for ctrl-c")?;
            scheduler.shutdown();
        }
        Commands::Submit {
            task_type,
            account,
            task_config,
            priority,
        } => {
            let task_type = parse_task_type(&task_type)?;
            let config_value: serde_json::Value =
                serde_json::from_str(&task_config).context("--task-config is not valid JSON")?;

            let mut task = Task::new("cli", task_type, account);
            task.priority = priority;
            task.config = config_value;
            let task_id = task.id;
            scheduler.submit(task).await.context("failed to submit task")?;

            loop {
                let task = task_repo.get(task_id).await.context("task disappeared")?;
                if task.status.is_terminal() {
                    println!("{}", serde_json::to_string_pretty(&task.result)?);
                    if task.status != TaskStatus::Completed {
                        anyhow::bail!("task ended in {:?}", task.status);
                    }
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }

    Ok(())
}

fn parse_task_type(raw: &str) -> Result<TaskType> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .with_context(|| format!("unknown task type '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_task_types() {
        assert!(matches!(
            parse_task_type("account_check").unwrap(),
            TaskType::AccountCheck
        ));
        assert!(matches!(parse_task_type("scenario").unwrap(), TaskType::Scenario));
    }

    #[test]
    fn rejects_unknown_task_type() {
        assert!(parse_task_type("not_a_real_type").is_err());
    }

    #[test]
    fn args_parse_submit_subcommand() {
        let args = Args::parse_from([
            "fleet",
            "submit",
            "account_check",
            "--account",
            "1,2,3",
        ]);
        match args.command {
            Commands::Submit { task_type, account, .. } => {
                assert_eq!(task_type, "account_check");
                assert_eq!(account, vec![1, 2, 3]);
            }
            _ => panic!("expected Submit"),
        }
    }
}
