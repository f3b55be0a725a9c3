//! Account connection pool and task scheduler core library.
//!
//! Owns per-account MTProto session connections (dial, reconnect, idle
//! reap), serializes task execution per account, runs the typed task
//! executors, drives multi-agent scenarios through an observe-decide-act
//! loop, and applies rule-based risk control to account health.

pub mod account;
pub mod agent;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod net;
pub mod pool;
pub mod proxy;
pub mod repository;
pub mod risk;
pub mod scheduler;
pub mod session_client;
pub mod srp;
pub mod storage;
pub mod task;

pub use account::{Account, AccountStatus};
pub use config::Config;
pub use connection::{ConnectionState, ManagedConnection};
pub use error::{ErrorKind, PoolError};
pub use pool::{ConnectionPool, PoolStats};
pub use proxy::{Proxy, ProxyProtocol};
pub use scheduler::TaskScheduler;
pub use session_client::{SessionClient, SessionClientFactory, SessionHandle};
pub use task::{Scenario, ScenarioAgent, Task, TaskLog, TaskStatus, TaskType};
